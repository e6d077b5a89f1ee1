//! Property checks for grouped aggregation.
//!
//! The per-group `apply` path is the reference implementation; the optimized
//! engines must agree with it on arbitrary key/value inputs, including
//! missing keys and missing values.

use ff_frame::Series;
use ff_groupby::{
    AggKind, AggOptions, Engine, GroupByExecutionOptions, GroupByOptions, SeriesGroupBy,
};
use ff_runtime::{EvidenceLedger, RuntimePolicy};
use ff_testing::assert_series_close;
use ff_types::{NullKind, Scalar};
use proptest::prelude::*;

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

const COMPILED_KINDS: [AggKind; 6] = [
    AggKind::Sum,
    AggKind::Min,
    AggKind::Max,
    AggKind::Mean,
    AggKind::Std,
    AggKind::Var,
];

fn key_strategy() -> impl Strategy<Value = Scalar> {
    prop_oneof![
        8 => prop_oneof![Just("a"), Just("b"), Just("c"), Just("d")]
            .prop_map(|k| Scalar::Utf8(k.to_owned())),
        1 => Just(Scalar::Null(NullKind::Null)),
    ]
}

fn value_strategy() -> impl Strategy<Value = Scalar> {
    prop_oneof![
        6 => (-100.0_f64..100.0).prop_map(Scalar::Float64),
        2 => (-50_i64..50).prop_map(Scalar::Int64),
        1 => Just(Scalar::Float64(f64::NAN)),
        1 => Just(Scalar::Null(NullKind::NaN)),
    ]
}

fn rows_strategy() -> impl Strategy<Value = Vec<(Scalar, Scalar)>> {
    proptest::collection::vec((key_strategy(), value_strategy()), 0..40)
}

fn grouped(rows: &[(Scalar, Scalar)], dropna: bool) -> SeriesGroupBy {
    let keys = Series::from_column_values(
        "key",
        rows.iter().map(|(k, _)| k.clone()).collect(),
    )
    .expect("keys");
    let values = Series::from_column_values(
        "value",
        rows.iter().map(|(_, v)| v.clone()).collect(),
    )
    .expect("values");
    SeriesGroupBy::new(&keys, &values, GroupByOptions { dropna }).expect("groupby")
}

fn apply_reference(g: &SeriesGroupBy, kind: AggKind, skipna: bool) -> Series {
    g.apply(|group| {
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
    .expect("apply")
}

proptest! {
    #[test]
    fn vectorized_engine_matches_apply(
        rows in rows_strategy(),
        skipna in proptest::bool::ANY,
        dropna in proptest::bool::ANY,
    ) {
        let g = grouped(&rows, dropna);
        for kind in ALL_KINDS {
            let engine = g.agg(kind, AggOptions::skipna(skipna)).expect("agg");
            let reference = apply_reference(&g, kind, skipna);
            assert_series_close(&engine, &reference);
        }
    }

    #[test]
    fn compiled_engine_matches_vectorized(
        rows in rows_strategy(),
        skipna in proptest::bool::ANY,
    ) {
        let g = grouped(&rows, true);
        for kind in COMPILED_KINDS {
            let compiled = g
                .agg(kind, AggOptions::skipna(skipna).with_engine(Engine::Compiled))
                .expect("compiled");
            let vectorized = g.agg(kind, AggOptions::skipna(skipna)).expect("vectorized");
            assert_series_close(&compiled, &vectorized);
        }
    }

    #[test]
    fn default_equals_explicit_skipna_true(rows in rows_strategy()) {
        let g = grouped(&rows, true);
        for kind in ALL_KINDS {
            let default = g.agg(kind, AggOptions::default()).expect("default");
            let explicit = g.agg(kind, AggOptions::skipna(true)).expect("explicit");
            assert_series_close(&default, &explicit);
        }
    }

    #[test]
    fn arena_budget_does_not_change_results(
        rows in rows_strategy(),
        skipna in proptest::bool::ANY,
    ) {
        let g = grouped(&rows, true);
        let mut ledger = EvidenceLedger::new();
        for kind in ALL_KINDS {
            let arena = g
                .agg_with_policy(
                    kind,
                    AggOptions::skipna(skipna),
                    GroupByExecutionOptions::default(),
                    &RuntimePolicy::strict(),
                    &mut ledger,
                )
                .expect("arena");
            let global = g
                .agg_with_policy(
                    kind,
                    AggOptions::skipna(skipna),
                    GroupByExecutionOptions { use_arena: false, arena_budget_bytes: 0 },
                    &RuntimePolicy::strict(),
                    &mut ledger,
                )
                .expect("global");
            assert_series_close(&arena, &global);
        }
    }
}
