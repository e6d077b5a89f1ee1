//! Lowered aggregation path.
//!
//! Values are packed into dense f64 buffers with integer group codes, then a
//! branch-light loop accumulates per-group state. Only a fixed subset of
//! aggregations over purely numeric columns is lowered; everything else is a
//! capability miss handled by runtime policy at the call site.

use std::collections::HashMap;

use ff_types::{DType, NullKind, Scalar};

use crate::{AggKind, GroupKeyRef};

/// Aggregations and dtypes the lowered kernels cover.
pub(crate) fn supports(kind: AggKind, dtype: DType) -> bool {
    let kind_ok = matches!(
        kind,
        AggKind::Sum | AggKind::Min | AggKind::Max | AggKind::Mean | AggKind::Std | AggKind::Var
    );
    let dtype_ok = matches!(dtype, DType::Null | DType::Bool | DType::Int64 | DType::Float64);
    kind_ok && dtype_ok
}

/// Dense packed form of a grouped numeric column.
pub(crate) struct PackedGroups {
    data: Vec<f64>,
    missing: Vec<bool>,
    codes: Vec<u32>,
    ordering: Vec<usize>,
    num_groups: usize,
}

impl PackedGroups {
    pub(crate) fn ordering(&self) -> &[usize] {
        &self.ordering
    }
}

/// Factorize keys into dense codes and flatten values into f64 buffers.
/// Codes follow first-seen key order; rows with a missing key are dropped
/// when `dropna` is set.
pub(crate) fn pack(keys: &[Scalar], values: &[Scalar], dropna: bool) -> PackedGroups {
    let mut data = Vec::with_capacity(values.len());
    let mut missing = Vec::with_capacity(values.len());
    let mut codes = Vec::with_capacity(values.len());
    let mut ordering = Vec::<usize>::new();
    let mut slot = HashMap::<GroupKeyRef<'_>, u32>::new();

    for (pos, (key, value)) in keys.iter().zip(values.iter()).enumerate() {
        if dropna && key.is_missing() {
            continue;
        }

        let key_id = GroupKeyRef::from_scalar(key);
        let next_code = slot.len() as u32;
        let code = *slot.entry(key_id).or_insert_with(|| {
            ordering.push(pos);
            next_code
        });

        codes.push(code);
        if value.is_missing() {
            data.push(f64::NAN);
            missing.push(true);
        } else {
            data.push(value.to_f64().unwrap_or(f64::NAN));
            missing.push(false);
        }
    }

    let num_groups = slot.len();
    PackedGroups {
        data,
        missing,
        codes,
        ordering,
        num_groups,
    }
}

/// Run the lowered kernel over packed input, yielding one scalar per group
/// in code order.
pub(crate) fn aggregate(
    packed: &PackedGroups,
    kind: AggKind,
    skipna: bool,
    ddof: usize,
) -> Vec<Scalar> {
    let n = packed.num_groups;
    let mut count = vec![0_usize; n];
    let mut sum = vec![0.0_f64; n];
    let mut mean = vec![0.0_f64; n];
    let mut m2 = vec![0.0_f64; n];
    let mut min = vec![f64::INFINITY; n];
    let mut max = vec![f64::NEG_INFINITY; n];
    let mut saw_missing = vec![false; n];

    // Welford updates keep dispersion stable for one-pass accumulation.
    for ((&v, &is_missing), &code) in packed
        .data
        .iter()
        .zip(packed.missing.iter())
        .zip(packed.codes.iter())
    {
        let g = code as usize;
        if is_missing {
            saw_missing[g] = true;
            continue;
        }
        count[g] += 1;
        sum[g] += v;
        let delta = v - mean[g];
        mean[g] += delta / count[g] as f64;
        m2[g] += delta * (v - mean[g]);
        if v < min[g] {
            min[g] = v;
        }
        if v > max[g] {
            max[g] = v;
        }
    }

    (0..n)
        .map(|g| {
            if saw_missing[g] && !skipna {
                return Scalar::Null(NullKind::NaN);
            }
            let c = count[g];
            match kind {
                AggKind::Sum => Scalar::Float64(sum[g]),
                AggKind::Min if c > 0 => Scalar::Float64(min[g]),
                AggKind::Max if c > 0 => Scalar::Float64(max[g]),
                AggKind::Mean if c > 0 => Scalar::Float64(sum[g] / c as f64),
                AggKind::Std | AggKind::Var if c > ddof => {
                    let var = m2[g] / (c - ddof) as f64;
                    if kind == AggKind::Var {
                        Scalar::Float64(var)
                    } else {
                        Scalar::Float64(var.sqrt())
                    }
                }
                _ => Scalar::Null(NullKind::NaN),
            }
        })
        .collect()
}
