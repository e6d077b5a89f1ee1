//! Grouped skipna behavior across aggregation engines and dtypes.
//!
//! Each case builds a two-group fixture where exactly one group contains a
//! missing value, then checks that skipna=true excludes it while
//! skipna=false propagates it to the whole group's aggregate. Expected
//! outputs come from the per-group `apply` path, which reduces each group
//! with the matching Series reduction.

use ff_frame::DataFrame;
use ff_groupby::{
    AggKind, AggOptions, Engine, GroupByError, GroupByOptions, SeriesGroupBy,
};
use ff_runtime::{EvidenceLedger, RuntimePolicy};
use ff_testing::{CompareOptions, assert_series_close, assert_series_equal};
use ff_types::{NullKind, Scalar};

const ALL_KINDS: [AggKind; 9] = [
    AggKind::Sum,
    AggKind::Prod,
    AggKind::Min,
    AggKind::Max,
    AggKind::Mean,
    AggKind::Median,
    AggKind::Std,
    AggKind::Var,
    AggKind::Sem,
];

const TEMPORAL_KINDS: [AggKind; 5] = [
    AggKind::Min,
    AggKind::Max,
    AggKind::Mean,
    AggKind::Median,
    AggKind::Std,
];

const COMPILED_KINDS: [AggKind; 6] = [
    AggKind::Sum,
    AggKind::Min,
    AggKind::Max,
    AggKind::Mean,
    AggKind::Std,
    AggKind::Var,
];

fn keys() -> Vec<Scalar> {
    ["A", "A", "A", "B", "B", "B"]
        .into_iter()
        .map(|k| Scalar::Utf8(k.to_owned()))
        .collect()
}

/// Group A is complete, group B carries a NaN in the middle.
fn float_fixture() -> DataFrame {
    DataFrame::from_columns(vec![
        ("a", keys()),
        (
            "b",
            vec![
                Scalar::Float64(-1.0),
                Scalar::Float64(1.0),
                Scalar::Float64(-1.0),
                Scalar::Float64(1.0),
                Scalar::Float64(f64::NAN),
                Scalar::Float64(1.0),
            ],
        ),
    ])
    .expect("frame")
}

/// Variant used by the compiled-engine cases: the missing value sits in
/// the last row of group B instead of the middle.
fn float_fixture_trailing_nan() -> DataFrame {
    DataFrame::from_columns(vec![
        ("a", keys()),
        (
            "b",
            vec![
                Scalar::Float64(-1.0),
                Scalar::Float64(1.0),
                Scalar::Float64(-1.0),
                Scalar::Float64(1.0),
                Scalar::Float64(1.0),
                Scalar::Float64(f64::NAN),
            ],
        ),
    ])
    .expect("frame")
}

/// Group A is complete, group B ends with a NaT.
fn timestamp_fixture() -> DataFrame {
    DataFrame::from_columns(vec![
        ("a", keys()),
        (
            "b",
            vec![
                Scalar::timestamp_days(1),
                Scalar::timestamp_days(2),
                Scalar::timestamp_days(3),
                Scalar::timestamp_days(4),
                Scalar::timestamp_days(6),
                Scalar::Null(NullKind::NaT),
            ],
        ),
    ])
    .expect("frame")
}

/// Consistency-check variant with the NaT in the middle of group B.
fn timestamp_fixture_mid_nat() -> DataFrame {
    DataFrame::from_columns(vec![
        ("a", keys()),
        (
            "b",
            vec![
                Scalar::timestamp_days(1),
                Scalar::timestamp_days(2),
                Scalar::timestamp_days(3),
                Scalar::timestamp_days(4),
                Scalar::Null(NullKind::NaT),
                Scalar::timestamp_days(6),
            ],
        ),
    ])
    .expect("frame")
}

fn timedelta_fixture() -> DataFrame {
    DataFrame::from_columns(vec![
        ("a", keys()),
        (
            "b",
            vec![
                Scalar::timedelta_days(1),
                Scalar::timedelta_days(2),
                Scalar::timedelta_days(3),
                Scalar::timedelta_days(4),
                Scalar::timedelta_days(6),
                Scalar::Null(NullKind::NaT),
            ],
        ),
    ])
    .expect("frame")
}

fn string_fixture() -> DataFrame {
    DataFrame::from_columns(vec![
        ("a", keys()),
        (
            "b",
            vec![
                Scalar::Utf8("foo".to_owned()),
                Scalar::Utf8("bar".to_owned()),
                Scalar::Utf8("baz".to_owned()),
                Scalar::Utf8("foo".to_owned()),
                Scalar::Null(NullKind::Null),
                Scalar::Utf8("foo".to_owned()),
            ],
        ),
    ])
    .expect("frame")
}

fn grouped(frame: &DataFrame) -> SeriesGroupBy {
    let keys = frame.column("a").expect("keys");
    let values = frame.column("b").expect("values");
    SeriesGroupBy::new(&keys, &values, GroupByOptions::default()).expect("groupby")
}

/// Engine output must equal reducing each group independently.
fn check_engine_against_apply(g: &SeriesGroupBy, kind: AggKind, skipna: bool, engine: Engine) {
    let expected = g
        .apply(|group| {
            Ok(match kind {
                AggKind::Sum => group.sum_with(skipna)?,
                AggKind::Prod => group.prod_with(skipna)?,
                AggKind::Min => group.min_with(skipna)?,
                AggKind::Max => group.max_with(skipna)?,
                AggKind::Mean => group.mean_with(skipna)?,
                AggKind::Median => group.median_with(skipna)?,
                AggKind::Std => group.std_with(skipna)?,
                AggKind::Var => group.var_with(skipna)?,
                AggKind::Sem => group.sem_with(skipna)?,
            })
        })
        .expect("apply");
    let actual = g
        .agg(kind, AggOptions::skipna(skipna).with_engine(engine))
        .expect("agg");
    assert_series_close(&actual, &expected);
}

#[test]
fn vectorized_numeric_agg_matches_per_group_reduction() {
    let g = grouped(&float_fixture());
    for kind in ALL_KINDS {
        for skipna in [true, false] {
            check_engine_against_apply(&g, kind, skipna, Engine::Vectorized);
        }
    }
}

#[test]
fn vectorized_temporal_agg_matches_per_group_reduction() {
    for frame in [timestamp_fixture(), timedelta_fixture()] {
        let g = grouped(&frame);
        for kind in TEMPORAL_KINDS {
            for skipna in [true, false] {
                check_engine_against_apply(&g, kind, skipna, Engine::Vectorized);
            }
        }
    }
}

#[test]
fn compiled_numeric_agg_matches_per_group_reduction() {
    let g = grouped(&float_fixture_trailing_nan());
    for kind in COMPILED_KINDS {
        for skipna in [true, false] {
            check_engine_against_apply(&g, kind, skipna, Engine::Compiled);
        }
    }
}

#[test]
fn sum_concrete_values() {
    let g = grouped(&float_fixture());

    // skipna=false: the NaN in group B poisons its sum; A is unaffected.
    let propagated = g.sum(AggOptions::skipna(false)).expect("sum");
    assert_eq!(propagated.index().labels(), &["A".into(), "B".into()]);
    assert!(propagated.values()[0].semantic_eq(&Scalar::Float64(-1.0)));
    assert!(propagated.values()[1].is_missing());

    // skipna=true: the NaN is excluded and B sums the remaining values.
    let skipped = g.sum(AggOptions::skipna(true)).expect("sum");
    assert!(skipped.values()[0].semantic_eq(&Scalar::Float64(-1.0)));
    assert!(skipped.values()[1].semantic_eq(&Scalar::Float64(2.0)));
}

#[test]
fn temporal_concrete_values() {
    let g = grouped(&timestamp_fixture());

    let skipped = g.mean(AggOptions::skipna(true)).expect("mean");
    assert_eq!(skipped.values()[0], Scalar::timestamp_days(2));
    assert_eq!(skipped.values()[1], Scalar::timestamp_days(5));

    let propagated = g.max(AggOptions::skipna(false)).expect("max");
    assert_eq!(propagated.values()[0], Scalar::timestamp_days(3));
    assert_eq!(propagated.values()[1], Scalar::Null(NullKind::NaT));

    // Dispersion of timestamps comes back in duration units.
    let spread = g.std(AggOptions::skipna(true)).expect("std");
    assert_eq!(spread.values()[0].dtype(), ff_types::DType::Timedelta);
}

#[test]
fn string_sum_matches_per_group_reduction() {
    let g = grouped(&string_fixture());
    for skipna in [true, false] {
        check_engine_against_apply(&g, AggKind::Sum, skipna, Engine::Vectorized);
    }
}

#[test]
fn string_sum_concatenates_and_propagates_missing() {
    let g = grouped(&string_fixture());

    let skipped = g.sum(AggOptions::skipna(true)).expect("sum");
    assert_eq!(skipped.values()[0], Scalar::Utf8("foobarbaz".to_owned()));
    assert_eq!(skipped.values()[1], Scalar::Utf8("foofoo".to_owned()));

    let propagated = g.sum(AggOptions::skipna(false)).expect("sum");
    assert_eq!(propagated.values()[0], Scalar::Utf8("foobarbaz".to_owned()));
    assert_eq!(propagated.values()[1], Scalar::Null(NullKind::Null));
}

#[test]
fn string_rejects_non_sum_aggregations() {
    let g = grouped(&string_fixture());
    for kind in [AggKind::Mean, AggKind::Median, AggKind::Std] {
        let err = g.agg(kind, AggOptions::default()).expect_err("must reject");
        assert!(matches!(err, GroupByError::Type(_)), "{kind:?}: {err:?}");
    }
}

#[test]
fn temporal_rejects_additive_aggregations() {
    let g = grouped(&timestamp_fixture());
    for kind in [AggKind::Sum, AggKind::Prod, AggKind::Var, AggKind::Sem] {
        let err = g.agg(kind, AggOptions::default()).expect_err("must reject");
        assert!(matches!(err, GroupByError::Type(_)), "{kind:?}: {err:?}");
    }
}

#[test]
fn default_options_behave_like_explicit_skipna_true() {
    for frame in [float_fixture(), string_fixture(), timestamp_fixture_mid_nat()] {
        let g = grouped(&frame);
        let kinds: &[AggKind] = match frame.column("b").expect("b").dtype() {
            ff_types::DType::Utf8 => &[AggKind::Sum],
            ff_types::DType::Timestamp | ff_types::DType::Timedelta => &TEMPORAL_KINDS,
            _ => &ALL_KINDS,
        };
        for &kind in kinds {
            let default = g.agg(kind, AggOptions::default()).expect("default");
            let explicit = g.agg(kind, AggOptions::skipna(true)).expect("explicit");
            assert_series_equal(&default, &explicit, CompareOptions::exact());
        }
    }
}

#[test]
fn compiled_default_options_behave_like_explicit_skipna_true() {
    let g = grouped(&float_fixture());
    for kind in COMPILED_KINDS {
        let default = g
            .agg(kind, AggOptions::default().with_engine(Engine::Compiled))
            .expect("default");
        let explicit = g
            .agg(kind, AggOptions::skipna(true).with_engine(Engine::Compiled))
            .expect("explicit");
        assert_series_equal(&default, &explicit, CompareOptions::exact());
    }
}

#[test]
fn compiled_engine_is_restricted_to_numeric_dtypes() {
    for frame in [timestamp_fixture(), string_fixture()] {
        let g = grouped(&frame);
        let err = g
            .agg(AggKind::Sum, AggOptions::default().with_engine(Engine::Compiled))
            .expect_err("must reject");
        assert!(matches!(
            err,
            GroupByError::CompiledEngineUnsupported { op: "sum", .. }
        ));
    }
}

#[test]
fn hardened_policy_repairs_compiled_capability_miss() {
    let g = grouped(&float_fixture());
    let mut ledger = EvidenceLedger::new();
    let repaired = g
        .agg_with_policy(
            AggKind::Sem,
            AggOptions::default().with_engine(Engine::Compiled),
            ff_groupby::GroupByExecutionOptions::default(),
            &RuntimePolicy::hardened(),
            &mut ledger,
        )
        .expect("repaired");
    let vectorized = g.agg(AggKind::Sem, AggOptions::default()).expect("vectorized");

    assert_series_equal(&repaired, &vectorized, CompareOptions::exact());
    assert_eq!(ledger.records().len(), 1);
    assert_eq!(ledger.records()[0].issue.subject, "compiled_engine");
}

#[test]
fn engines_agree_on_shared_kinds() {
    let g = grouped(&float_fixture());
    for kind in COMPILED_KINDS {
        for skipna in [true, false] {
            let vectorized = g.agg(kind, AggOptions::skipna(skipna)).expect("vectorized");
            let compiled = g
                .agg(kind, AggOptions::skipna(skipna).with_engine(Engine::Compiled))
                .expect("compiled");
            assert_series_close(&compiled, &vectorized);
        }
    }
}

#[test]
fn output_series_keeps_value_column_name() {
    let g = grouped(&float_fixture());
    let out = g.sum(AggOptions::default()).expect("sum");
    assert_eq!(out.name(), "b");
}
