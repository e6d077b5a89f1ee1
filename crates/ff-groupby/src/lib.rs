#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::mem::size_of;

use bumpalo::{Bump, collections::Vec as BumpVec};
use ff_columnar::{Column, ColumnError};
use ff_frame::{FrameError, Series};
use ff_index::{IndexError, IndexLabel, align_union, validate_alignment_plan};
use ff_runtime::{DecisionAction, EvidenceLedger, RuntimePolicy};
use ff_types::reduce::ReduceKind;
use ff_types::{DType, NullKind, Scalar, TypeError};
use thiserror::Error;

mod compiled;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupByOptions {
    pub dropna: bool,
}

impl Default for GroupByOptions {
    fn default() -> Self {
        Self { dropna: true }
    }
}

/// Execution engine for grouped aggregation.
///
/// `Vectorized` is the default single-pass accumulator path and covers every
/// aggregation over every supported dtype. `Compiled` models a lowered kernel
/// path: values are packed into dense f64 buffers with group codes before a
/// branch-light loop runs. It only supports a subset of aggregations over
/// purely numeric columns; that asymmetry is deliberate and preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Engine {
    #[default]
    Vectorized,
    Compiled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggKind {
    Sum,
    Prod,
    Min,
    Max,
    Mean,
    Median,
    Std,
    Var,
    Sem,
}

impl AggKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        self.reduce_kind().name()
    }

    #[must_use]
    pub fn reduce_kind(self) -> ReduceKind {
        match self {
            Self::Sum => ReduceKind::Sum,
            Self::Prod => ReduceKind::Prod,
            Self::Min => ReduceKind::Min,
            Self::Max => ReduceKind::Max,
            Self::Mean => ReduceKind::Mean,
            Self::Median => ReduceKind::Median,
            Self::Std => ReduceKind::Std,
            Self::Var => ReduceKind::Var,
            Self::Sem => ReduceKind::Sem,
        }
    }
}

/// Per-call aggregation options. The no-argument call sites use
/// `AggOptions::default()`, which must behave exactly like an explicit
/// `skipna=true` on the vectorized engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggOptions {
    pub skipna: bool,
    pub engine: Engine,
}

impl Default for AggOptions {
    fn default() -> Self {
        Self {
            skipna: true,
            engine: Engine::Vectorized,
        }
    }
}

impl AggOptions {
    #[must_use]
    pub fn skipna(skipna: bool) -> Self {
        Self {
            skipna,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engine = engine;
        self
    }
}

pub const DEFAULT_ARENA_BUDGET_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupByExecutionOptions {
    pub use_arena: bool,
    pub arena_budget_bytes: usize,
}

impl Default for GroupByExecutionOptions {
    fn default() -> Self {
        Self {
            use_arena: true,
            arena_budget_bytes: DEFAULT_ARENA_BUDGET_BYTES,
        }
    }
}

#[derive(Debug, Error)]
pub enum GroupByError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Type(#[from] TypeError),
    #[error("compiled engine does not support '{op}' over dtype {dtype:?}")]
    CompiledEngineUnsupported { op: &'static str, dtype: DType },
}

/// Borrowed hashable view of a group key, avoiding per-row key clones.
/// Every missing key collapses to `Missing` regardless of marker kind, so
/// Null/NaN/NaT keys (and float NaN keys) form a single group.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub(crate) enum GroupKeyRef<'a> {
    Missing,
    Bool(bool),
    Int64(i64),
    FloatBits(u64),
    Utf8(&'a str),
    Timestamp(i64),
    Timedelta(i64),
}

impl<'a> GroupKeyRef<'a> {
    pub(crate) fn from_scalar(key: &'a Scalar) -> Self {
        if key.is_missing() {
            return Self::Missing;
        }
        match key {
            Scalar::Bool(v) => Self::Bool(*v),
            Scalar::Int64(v) => Self::Int64(*v),
            Scalar::Float64(v) => Self::FloatBits(v.to_bits()),
            Scalar::Utf8(v) => Self::Utf8(v.as_str()),
            Scalar::Timestamp(v) => Self::Timestamp(*v),
            Scalar::Timedelta(v) => Self::Timedelta(*v),
            Scalar::Null(_) => Self::Missing,
        }
    }
}

/// Output index label for a group key, reconstructed from the source row.
fn key_label(key: &Scalar) -> IndexLabel {
    match key {
        Scalar::Int64(v) => IndexLabel::Int64(*v),
        Scalar::Utf8(v) => IndexLabel::Utf8(v.clone()),
        Scalar::Bool(v) => IndexLabel::Utf8(v.to_string()),
        Scalar::Float64(v) if !v.is_nan() => IndexLabel::Utf8(v.to_string()),
        Scalar::Timestamp(v) | Scalar::Timedelta(v) => IndexLabel::Utf8(v.to_string()),
        _ => IndexLabel::Utf8("<null>".to_owned()),
    }
}

/// Estimate intermediate memory for one aggregation pass (accumulator state,
/// first-seen ordering, hash-map entry overhead per row).
fn estimate_agg_intermediate_bytes(input_rows: usize) -> usize {
    input_rows.saturating_mul(
        size_of::<NumericState>()
            .saturating_add(size_of::<usize>())
            .saturating_add(64),
    )
}

/// Running accumulator for one numeric group. Dispersion uses Welford's
/// update so results stay close to the two-pass reference reductions.
#[derive(Debug, Clone, Copy)]
struct NumericState {
    count: usize,
    sum: f64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
    prod: f64,
    saw_missing: bool,
}

impl NumericState {
    fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            prod: 1.0,
            saw_missing: false,
        }
    }

    fn push(&mut self, v: f64) {
        self.count += 1;
        self.sum += v;
        let delta = v - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (v - self.mean);
        if v < self.min {
            self.min = v;
        }
        if v > self.max {
            self.max = v;
        }
        self.prod *= v;
    }
}

fn emit_numeric(
    kind: AggKind,
    skipna: bool,
    ddof: usize,
    state: &NumericState,
    collected: &mut Vec<f64>,
) -> Scalar {
    if state.saw_missing && !skipna {
        return Scalar::Null(NullKind::NaN);
    }

    let missing = Scalar::Null(NullKind::NaN);
    let n = state.count;
    match kind {
        AggKind::Sum => Scalar::Float64(state.sum),
        AggKind::Prod => Scalar::Float64(state.prod),
        AggKind::Min => {
            if n == 0 {
                missing
            } else {
                Scalar::Float64(state.min)
            }
        }
        AggKind::Max => {
            if n == 0 {
                missing
            } else {
                Scalar::Float64(state.max)
            }
        }
        AggKind::Mean => {
            if n == 0 {
                missing
            } else {
                Scalar::Float64(state.sum / n as f64)
            }
        }
        AggKind::Median => {
            if collected.is_empty() {
                missing
            } else {
                collected
                    .sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let mid = collected.len() / 2;
                if collected.len().is_multiple_of(2) {
                    Scalar::Float64((collected[mid - 1] + collected[mid]) / 2.0)
                } else {
                    Scalar::Float64(collected[mid])
                }
            }
        }
        AggKind::Var | AggKind::Std | AggKind::Sem => {
            if n <= ddof {
                missing
            } else {
                let var = state.m2 / (n - ddof) as f64;
                match kind {
                    AggKind::Var => Scalar::Float64(var),
                    AggKind::Std => Scalar::Float64(var.sqrt()),
                    _ => Scalar::Float64(var.sqrt() / (n as f64).sqrt()),
                }
            }
        }
    }
}

/// Grouped view of a values Series partitioned by a keys Series.
///
/// Indexes are union-aligned on construction when they differ; group identity
/// follows first-seen key order; missing keys are dropped under the default
/// `GroupByOptions`.
#[derive(Debug, Clone)]
pub struct SeriesGroupBy {
    name: String,
    keys: Vec<Scalar>,
    values: Vec<Scalar>,
    dtype: DType,
    options: GroupByOptions,
}

impl SeriesGroupBy {
    pub fn new(
        keys: &Series,
        values: &Series,
        options: GroupByOptions,
    ) -> Result<Self, GroupByError> {
        // Fast path: matching duplicate-free indexes need no alignment.
        if keys.index() == values.index() && !keys.index().has_duplicates() {
            return Ok(Self {
                name: values.name().to_owned(),
                keys: keys.values().to_vec(),
                values: values.values().to_vec(),
                dtype: values.dtype(),
                options,
            });
        }

        let plan = align_union(keys.index(), values.index());
        validate_alignment_plan(&plan)?;
        let aligned_keys = keys.column().reindex_by_positions(&plan.left_positions)?;
        let aligned_values = values.column().reindex_by_positions(&plan.right_positions)?;

        Ok(Self {
            name: values.name().to_owned(),
            keys: aligned_keys.values().to_vec(),
            values: aligned_values.values().to_vec(),
            dtype: aligned_values.dtype(),
            options,
        })
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn value_dtype(&self) -> DType {
        self.dtype
    }

    /// First-seen source position and row positions of every group.
    fn partition(&self) -> (Vec<usize>, Vec<Vec<usize>>) {
        let mut ordering = Vec::<usize>::new();
        let mut rows = Vec::<Vec<usize>>::new();
        let mut slot = HashMap::<GroupKeyRef<'_>, usize>::new();

        for (pos, key) in self.keys.iter().enumerate() {
            if self.options.dropna && key.is_missing() {
                continue;
            }
            let key_id = GroupKeyRef::from_scalar(key);
            let gid = *slot.entry(key_id).or_insert_with(|| {
                ordering.push(pos);
                rows.push(Vec::new());
                rows.len() - 1
            });
            rows[gid].push(pos);
        }

        (ordering, rows)
    }

    /// Generic per-group escape hatch: slices the values per group, applies
    /// the callback, and recombines scalar results keyed by group label.
    /// Encodes the reference semantics the optimized engines must match.
    pub fn apply<F>(&self, f: F) -> Result<Series, GroupByError>
    where
        F: Fn(&Series) -> Result<Scalar, FrameError>,
    {
        let (ordering, rows) = self.partition();

        let mut out_values = Vec::with_capacity(rows.len());
        for group_rows in &rows {
            let group_values = group_rows
                .iter()
                .map(|&pos| self.values[pos].clone())
                .collect::<Vec<_>>();
            let column = Column::new(self.dtype, group_values)?;
            let group = Series::new(
                self.name.clone(),
                ff_index::Index::from_range(column.len()),
                column,
            )?;
            out_values.push(f(&group)?);
        }

        self.emit(&ordering, out_values)
    }

    pub fn agg(&self, kind: AggKind, options: AggOptions) -> Result<Series, GroupByError> {
        let mut ledger = EvidenceLedger::new();
        self.agg_with_policy(
            kind,
            options,
            GroupByExecutionOptions::default(),
            &RuntimePolicy::strict(),
            &mut ledger,
        )
    }

    pub fn agg_with_policy(
        &self,
        kind: AggKind,
        options: AggOptions,
        exec_options: GroupByExecutionOptions,
        policy: &RuntimePolicy,
        ledger: &mut EvidenceLedger,
    ) -> Result<Series, GroupByError> {
        match options.engine {
            Engine::Vectorized => self.agg_vectorized(kind, options.skipna, exec_options),
            Engine::Compiled => {
                if compiled::supports(kind, self.dtype) {
                    return self.agg_compiled(kind, options.skipna);
                }

                let detail = format!("{} over dtype {:?}", kind.name(), self.dtype);
                match policy.decide_unsupported_kernel("compiled_engine", detail, ledger) {
                    DecisionAction::Repair => {
                        self.agg_vectorized(kind, options.skipna, exec_options)
                    }
                    DecisionAction::Allow | DecisionAction::Reject => {
                        Err(GroupByError::CompiledEngineUnsupported {
                            op: kind.name(),
                            dtype: self.dtype,
                        })
                    }
                }
            }
        }
    }

    // ── Convenience methods, one per aggregation ───────────────────────

    pub fn sum(&self, options: AggOptions) -> Result<Series, GroupByError> {
        self.agg(AggKind::Sum, options)
    }

    pub fn prod(&self, options: AggOptions) -> Result<Series, GroupByError> {
        self.agg(AggKind::Prod, options)
    }

    pub fn min(&self, options: AggOptions) -> Result<Series, GroupByError> {
        self.agg(AggKind::Min, options)
    }

    pub fn max(&self, options: AggOptions) -> Result<Series, GroupByError> {
        self.agg(AggKind::Max, options)
    }

    pub fn mean(&self, options: AggOptions) -> Result<Series, GroupByError> {
        self.agg(AggKind::Mean, options)
    }

    pub fn median(&self, options: AggOptions) -> Result<Series, GroupByError> {
        self.agg(AggKind::Median, options)
    }

    pub fn std(&self, options: AggOptions) -> Result<Series, GroupByError> {
        self.agg(AggKind::Std, options)
    }

    pub fn var(&self, options: AggOptions) -> Result<Series, GroupByError> {
        self.agg(AggKind::Var, options)
    }

    pub fn sem(&self, options: AggOptions) -> Result<Series, GroupByError> {
        self.agg(AggKind::Sem, options)
    }

    // ── Vectorized engine ──────────────────────────────────────────────

    fn agg_vectorized(
        &self,
        kind: AggKind,
        skipna: bool,
        exec_options: GroupByExecutionOptions,
    ) -> Result<Series, GroupByError> {
        match self.dtype {
            DType::Null | DType::Bool | DType::Int64 | DType::Float64 => {
                let estimated = estimate_agg_intermediate_bytes(self.keys.len());
                let use_arena =
                    exec_options.use_arena && estimated <= exec_options.arena_budget_bytes;
                let (ordering, out_values) = if use_arena {
                    self.numeric_pass_arena(kind, skipna)
                } else {
                    self.numeric_pass_global(kind, skipna)
                };
                self.emit(&ordering, out_values)
            }
            DType::Timestamp | DType::Timedelta => self.temporal_pass(kind, skipna),
            DType::Utf8 => self.utf8_pass(kind, skipna),
        }
    }

    fn numeric_pass_global(&self, kind: AggKind, skipna: bool) -> (Vec<usize>, Vec<Scalar>) {
        let mut ordering = Vec::<usize>::new();
        let mut states = Vec::<NumericState>::new();
        let mut collected = Vec::<Vec<f64>>::new();
        let mut slot = HashMap::<GroupKeyRef<'_>, usize>::new();

        for (pos, (key, value)) in self.keys.iter().zip(self.values.iter()).enumerate() {
            if self.options.dropna && key.is_missing() {
                continue;
            }

            let key_id = GroupKeyRef::from_scalar(key);
            let gid = *slot.entry(key_id).or_insert_with(|| {
                ordering.push(pos);
                states.push(NumericState::new());
                collected.push(Vec::new());
                states.len() - 1
            });

            if value.is_missing() {
                states[gid].saw_missing = true;
                continue;
            }
            if let Ok(v) = value.to_f64() {
                states[gid].push(v);
                if kind == AggKind::Median {
                    collected[gid].push(v);
                }
            }
        }

        let out_values = states
            .iter()
            .zip(collected.iter_mut())
            .map(|(state, group_collected)| emit_numeric(kind, skipna, 1, state, group_collected))
            .collect();
        (ordering, out_values)
    }

    /// Arena-backed twin of `numeric_pass_global`: ordering and accumulator
    /// state live in a bump arena and are freed in bulk when it drops.
    fn numeric_pass_arena(&self, kind: AggKind, skipna: bool) -> (Vec<usize>, Vec<Scalar>) {
        let arena = Bump::new();
        let mut ordering = BumpVec::<usize>::new_in(&arena);
        let mut states = BumpVec::<NumericState>::new_in(&arena);
        let mut collected = Vec::<Vec<f64>>::new();
        let mut slot = HashMap::<GroupKeyRef<'_>, usize>::new();

        for (pos, (key, value)) in self.keys.iter().zip(self.values.iter()).enumerate() {
            if self.options.dropna && key.is_missing() {
                continue;
            }

            let key_id = GroupKeyRef::from_scalar(key);
            let gid = *slot.entry(key_id).or_insert_with(|| {
                ordering.push(pos);
                states.push(NumericState::new());
                collected.push(Vec::new());
                states.len() - 1
            });

            if value.is_missing() {
                states[gid].saw_missing = true;
                continue;
            }
            if let Ok(v) = value.to_f64() {
                states[gid].push(v);
                if kind == AggKind::Median {
                    collected[gid].push(v);
                }
            }
        }

        let out_values = states
            .iter()
            .zip(collected.iter_mut())
            .map(|(state, group_collected)| emit_numeric(kind, skipna, 1, state, group_collected))
            .collect();
        (ordering.to_vec(), out_values)
    }

    fn temporal_pass(&self, kind: AggKind, skipna: bool) -> Result<Series, GroupByError> {
        if !kind.reduce_kind().supports_temporal() {
            return Err(GroupByError::Type(TypeError::UnsupportedReduction {
                op: kind.name(),
                dtype: self.dtype,
            }));
        }

        let mut ordering = Vec::<usize>::new();
        let mut ticks = Vec::<Vec<i64>>::new();
        let mut saw_missing = Vec::<bool>::new();
        let mut slot = HashMap::<GroupKeyRef<'_>, usize>::new();

        for (pos, (key, value)) in self.keys.iter().zip(self.values.iter()).enumerate() {
            if self.options.dropna && key.is_missing() {
                continue;
            }

            let key_id = GroupKeyRef::from_scalar(key);
            let gid = *slot.entry(key_id).or_insert_with(|| {
                ordering.push(pos);
                ticks.push(Vec::new());
                saw_missing.push(false);
                ticks.len() - 1
            });

            if value.is_missing() {
                saw_missing[gid] = true;
                continue;
            }
            if let Ok(t) = value.to_ticks() {
                ticks[gid].push(t);
            }
        }

        let out_values = ticks
            .iter_mut()
            .zip(saw_missing.iter())
            .map(|(group_ticks, &missing)| {
                self.emit_temporal(kind, skipna, group_ticks, missing)
            })
            .collect();
        self.emit(&ordering, out_values)
    }

    fn emit_temporal(
        &self,
        kind: AggKind,
        skipna: bool,
        ticks: &mut Vec<i64>,
        saw_missing: bool,
    ) -> Scalar {
        if (saw_missing && !skipna) || ticks.is_empty() {
            return Scalar::Null(NullKind::NaT);
        }

        let wrap = |t: i64| {
            if self.dtype == DType::Timestamp && kind != AggKind::Std {
                Scalar::Timestamp(t)
            } else {
                Scalar::Timedelta(t)
            }
        };

        // Nanosecond ticks exceed f64's exact integer range, so arithmetic
        // runs on offsets from the first observation.
        let base = ticks[0];
        let offset = |t: i64| (i128::from(t) - i128::from(base)) as f64;

        match kind {
            AggKind::Min => wrap(ticks.iter().copied().min().unwrap_or(base)),
            AggKind::Max => wrap(ticks.iter().copied().max().unwrap_or(base)),
            AggKind::Mean => {
                let mean_offset =
                    ticks.iter().map(|&t| offset(t)).sum::<f64>() / ticks.len() as f64;
                wrap(base + mean_offset.round() as i64)
            }
            AggKind::Median => {
                ticks.sort_unstable();
                let mid = ticks.len() / 2;
                if ticks.len().is_multiple_of(2) {
                    let half = (offset(ticks[mid - 1]) + offset(ticks[mid])) / 2.0;
                    wrap(base + half.round() as i64)
                } else {
                    wrap(ticks[mid])
                }
            }
            AggKind::Std => {
                let ddof = 1;
                if ticks.len() <= ddof {
                    return Scalar::Null(NullKind::NaT);
                }
                let n = ticks.len() as f64;
                let mean = ticks.iter().map(|&t| offset(t)).sum::<f64>() / n;
                let ss: f64 = ticks.iter().map(|&t| (offset(t) - mean).powi(2)).sum();
                Scalar::Timedelta((ss / (n - ddof as f64)).sqrt().round() as i64)
            }
            _ => Scalar::Null(NullKind::NaT),
        }
    }

    fn utf8_pass(&self, kind: AggKind, skipna: bool) -> Result<Series, GroupByError> {
        if kind != AggKind::Sum {
            return Err(GroupByError::Type(TypeError::UnsupportedReduction {
                op: kind.name(),
                dtype: DType::Utf8,
            }));
        }

        let mut ordering = Vec::<usize>::new();
        let mut buffers = Vec::<String>::new();
        let mut saw_missing = Vec::<bool>::new();
        let mut slot = HashMap::<GroupKeyRef<'_>, usize>::new();

        for (pos, (key, value)) in self.keys.iter().zip(self.values.iter()).enumerate() {
            if self.options.dropna && key.is_missing() {
                continue;
            }

            let key_id = GroupKeyRef::from_scalar(key);
            let gid = *slot.entry(key_id).or_insert_with(|| {
                ordering.push(pos);
                buffers.push(String::new());
                saw_missing.push(false);
                buffers.len() - 1
            });

            match value {
                Scalar::Null(_) => saw_missing[gid] = true,
                Scalar::Utf8(s) => buffers[gid].push_str(s),
                _ => {}
            }
        }

        let out_values = buffers
            .into_iter()
            .zip(saw_missing.iter())
            .map(|(buf, &missing)| {
                if missing && !skipna {
                    Scalar::Null(NullKind::Null)
                } else {
                    Scalar::Utf8(buf)
                }
            })
            .collect();
        self.emit(&ordering, out_values)
    }

    // ── Compiled engine ────────────────────────────────────────────────

    fn agg_compiled(&self, kind: AggKind, skipna: bool) -> Result<Series, GroupByError> {
        let packed = compiled::pack(&self.keys, &self.values, self.options.dropna);
        let out_values = compiled::aggregate(&packed, kind, skipna, 1);
        self.emit(packed.ordering(), out_values)
    }

    /// Turn accumulated per-group results into the output Series, rebuilding
    /// group labels from first-seen source rows.
    fn emit(&self, ordering: &[usize], out_values: Vec<Scalar>) -> Result<Series, GroupByError> {
        let labels = ordering
            .iter()
            .map(|&pos| key_label(&self.keys[pos]))
            .collect::<Vec<_>>();
        Ok(Series::from_values(self.name.clone(), labels, out_values)?)
    }
}
