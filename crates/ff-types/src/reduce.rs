//! Skipna-aware scalar reduction kernels.
//!
//! Each kernel reduces a slice of scalars to one scalar. With `skipna=true`
//! missing values are excluded before reducing; with `skipna=false` any
//! missing value forces the dtype's missing marker as the result. These are
//! the reference semantics that the grouped engines must reproduce per group.

use crate::{DType, NullKind, Scalar, TypeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReduceKind {
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

impl ReduceKind {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Prod => "prod",
            Self::Min => "min",
            Self::Max => "max",
            Self::Mean => "mean",
            Self::Median => "median",
            Self::Std => "std",
            Self::Var => "var",
            Self::Sem => "sem",
        }
    }

    /// Reductions that are well-defined for ordered-but-non-arithmetic
    /// (timestamp/timedelta) values.
    #[must_use]
    pub fn supports_temporal(self) -> bool {
        matches!(
            self,
            Self::Min | Self::Max | Self::Mean | Self::Median | Self::Std
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReduceOptions {
    pub skipna: bool,
    pub ddof: usize,
}

impl Default for ReduceOptions {
    fn default() -> Self {
        Self {
            skipna: true,
            ddof: 1,
        }
    }
}

impl ReduceOptions {
    #[must_use]
    pub fn with_skipna(skipna: bool) -> Self {
        Self {
            skipna,
            ..Self::default()
        }
    }
}

/// Reduce a homogeneous slice, dispatching on the column dtype.
pub fn reduce_values(
    values: &[Scalar],
    dtype: DType,
    kind: ReduceKind,
    options: ReduceOptions,
) -> Result<Scalar, TypeError> {
    match dtype {
        DType::Null | DType::Bool | DType::Int64 | DType::Float64 => {
            reduce_numeric(values, kind, options)
        }
        DType::Timestamp | DType::Timedelta => reduce_temporal(values, dtype, kind, options),
        DType::Utf8 => reduce_utf8(values, kind, options),
    }
}

fn sample_var(nums: &[f64], ddof: usize) -> Option<f64> {
    if nums.len() <= ddof {
        return None;
    }
    let mean = nums.iter().sum::<f64>() / nums.len() as f64;
    let ss: f64 = nums.iter().map(|x| (x - mean).powi(2)).sum();
    Some(ss / (nums.len() - ddof) as f64)
}

pub fn reduce_numeric(
    values: &[Scalar],
    kind: ReduceKind,
    options: ReduceOptions,
) -> Result<Scalar, TypeError> {
    let mut nums = Vec::with_capacity(values.len());
    for value in values {
        if value.is_missing() {
            if !options.skipna {
                return Ok(Scalar::Null(NullKind::NaN));
            }
            continue;
        }
        nums.push(value.to_f64()?);
    }

    let missing = || Scalar::Null(NullKind::NaN);
    Ok(match kind {
        ReduceKind::Sum => Scalar::Float64(nums.iter().sum()),
        ReduceKind::Prod => Scalar::Float64(nums.iter().product()),
        ReduceKind::Min => {
            if nums.is_empty() {
                missing()
            } else {
                Scalar::Float64(nums.iter().copied().fold(f64::INFINITY, f64::min))
            }
        }
        ReduceKind::Max => {
            if nums.is_empty() {
                missing()
            } else {
                Scalar::Float64(nums.iter().copied().fold(f64::NEG_INFINITY, f64::max))
            }
        }
        ReduceKind::Mean => {
            if nums.is_empty() {
                missing()
            } else {
                Scalar::Float64(nums.iter().sum::<f64>() / nums.len() as f64)
            }
        }
        ReduceKind::Median => {
            if nums.is_empty() {
                missing()
            } else {
                nums.sort_unstable_by(|a, b| {
                    a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)
                });
                let mid = nums.len() / 2;
                if nums.len().is_multiple_of(2) {
                    Scalar::Float64((nums[mid - 1] + nums[mid]) / 2.0)
                } else {
                    Scalar::Float64(nums[mid])
                }
            }
        }
        ReduceKind::Var => match sample_var(&nums, options.ddof) {
            Some(v) => Scalar::Float64(v),
            None => missing(),
        },
        ReduceKind::Std => match sample_var(&nums, options.ddof) {
            Some(v) => Scalar::Float64(v.sqrt()),
            None => missing(),
        },
        ReduceKind::Sem => match sample_var(&nums, options.ddof) {
            Some(v) => Scalar::Float64(v.sqrt() / (nums.len() as f64).sqrt()),
            None => missing(),
        },
    })
}

pub fn reduce_temporal(
    values: &[Scalar],
    dtype: DType,
    kind: ReduceKind,
    options: ReduceOptions,
) -> Result<Scalar, TypeError> {
    if !kind.supports_temporal() {
        return Err(TypeError::UnsupportedReduction {
            op: kind.name(),
            dtype,
        });
    }

    let mut ticks = Vec::with_capacity(values.len());
    for value in values {
        if value.is_missing() {
            if !options.skipna {
                return Ok(Scalar::Null(NullKind::NaT));
            }
            continue;
        }
        ticks.push(value.to_ticks()?);
    }

    if ticks.is_empty() {
        return Ok(Scalar::Null(NullKind::NaT));
    }

    // Min/max/mean/median keep the input unit; std is always a duration.
    let wrap = |t: i64| {
        if dtype == DType::Timestamp && kind != ReduceKind::Std {
            Scalar::Timestamp(t)
        } else {
            Scalar::Timedelta(t)
        }
    };

    // Ticks near the epoch scale of nanoseconds exceed f64's exact integer
    // range, so arithmetic runs on offsets from the first observation.
    let base = ticks[0];
    let offset = |t: i64| (i128::from(t) - i128::from(base)) as f64;

    Ok(match kind {
        ReduceKind::Min => wrap(ticks.iter().copied().min().unwrap_or(base)),
        ReduceKind::Max => wrap(ticks.iter().copied().max().unwrap_or(base)),
        ReduceKind::Mean => {
            let mean_offset = ticks.iter().map(|&t| offset(t)).sum::<f64>() / ticks.len() as f64;
            wrap(base + mean_offset.round() as i64)
        }
        ReduceKind::Median => {
            ticks.sort_unstable();
            let mid = ticks.len() / 2;
            if ticks.len().is_multiple_of(2) {
                let half = (offset(ticks[mid - 1]) + offset(ticks[mid])) / 2.0;
                wrap(base + half.round() as i64)
            } else {
                wrap(ticks[mid])
            }
        }
        ReduceKind::Std => {
            let offsets: Vec<f64> = ticks.iter().map(|&t| offset(t)).collect();
            match sample_var(&offsets, options.ddof) {
                Some(v) => Scalar::Timedelta(v.sqrt().round() as i64),
                None => Scalar::Null(NullKind::NaT),
            }
        }
        ReduceKind::Sum
        | ReduceKind::Prod
        | ReduceKind::Var
        | ReduceKind::Sem => unreachable!("rejected by supports_temporal"),
    })
}

pub fn reduce_utf8(
    values: &[Scalar],
    kind: ReduceKind,
    options: ReduceOptions,
) -> Result<Scalar, TypeError> {
    if kind != ReduceKind::Sum {
        return Err(TypeError::UnsupportedReduction {
            op: kind.name(),
            dtype: DType::Utf8,
        });
    }

    let mut out = String::new();
    for value in values {
        match value {
            Scalar::Null(_) => {
                if !options.skipna {
                    return Ok(Scalar::Null(NullKind::Null));
                }
            }
            Scalar::Utf8(s) => out.push_str(s),
            other => {
                return Err(TypeError::InvalidCast {
                    from: other.dtype(),
                    to: DType::Utf8,
                });
            }
        }
    }
    Ok(Scalar::Utf8(out))
}
