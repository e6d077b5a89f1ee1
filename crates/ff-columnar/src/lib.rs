#![forbid(unsafe_code)]

use ff_types::reduce::{ReduceKind, ReduceOptions, reduce_values};
use ff_types::{DType, Scalar, TypeError, cast_scalar_owned, infer_dtype};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Packed bitmask tracking which rows hold non-missing values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityMask {
    bits: Vec<u64>,
    len: usize,
}

impl ValidityMask {
    #[must_use]
    pub fn from_values(values: &[Scalar]) -> Self {
        let mut mask = Self::all_invalid(values.len());
        for (idx, value) in values.iter().enumerate() {
            if !value.is_missing() {
                mask.set(idx, true);
            }
        }
        mask
    }

    #[must_use]
    pub fn all_valid(len: usize) -> Self {
        let mut bits = vec![u64::MAX; len.div_ceil(64)];
        let tail = len % 64;
        if tail != 0
            && let Some(last) = bits.last_mut()
        {
            *last = (1_u64 << tail) - 1;
        }
        Self { bits, len }
    }

    #[must_use]
    pub fn all_invalid(len: usize) -> Self {
        Self {
            bits: vec![0_u64; len.div_ceil(64)],
            len,
        }
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> bool {
        if idx >= self.len {
            return false;
        }
        self.bits[idx / 64] & (1_u64 << (idx % 64)) != 0
    }

    pub fn set(&mut self, idx: usize, value: bool) {
        if idx >= self.len {
            return;
        }
        if value {
            self.bits[idx / 64] |= 1_u64 << (idx % 64);
        } else {
            self.bits[idx / 64] &= !(1_u64 << (idx % 64));
        }
    }

    #[must_use]
    pub fn count_valid(&self) -> usize {
        self.bits.iter().map(|word| word.count_ones() as usize).sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bits(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(|idx| self.get(idx))
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("column length mismatch: left={left}, right={right}")]
    LengthMismatch { left: usize, right: usize },
    #[error(transparent)]
    Type(#[from] TypeError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    dtype: DType,
    values: Vec<Scalar>,
    validity: ValidityMask,
}

impl Column {
    /// Construct a column, coercing values to the target dtype. Takes
    /// ownership of the values vec so identity casts skip cloning.
    pub fn new(dtype: DType, values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let needs_coercion = values.iter().any(|v| {
            let d = v.dtype();
            d != dtype && d != DType::Null
        });

        let coerced = if needs_coercion {
            values
                .into_iter()
                .map(|value| cast_scalar_owned(value, dtype))
                .collect::<Result<Vec<_>, _>>()?
        } else {
            // Values already match dtype; only remap Null variants to the
            // dtype-specific missing marker.
            values
                .into_iter()
                .map(|value| match value {
                    Scalar::Null(_) => Scalar::missing_for_dtype(dtype),
                    other => other,
                })
                .collect()
        };

        let validity = ValidityMask::from_values(&coerced);

        Ok(Self {
            dtype,
            values: coerced,
            validity,
        })
    }

    pub fn from_values(values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let dtype = infer_dtype(&values)?;
        Self::new(dtype, values)
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    #[must_use]
    pub fn value(&self, idx: usize) -> Option<&Scalar> {
        self.values.get(idx)
    }

    #[must_use]
    pub fn validity(&self) -> &ValidityMask {
        &self.validity
    }

    pub fn reindex_by_positions(&self, positions: &[Option<usize>]) -> Result<Self, ColumnError> {
        let values = positions
            .iter()
            .map(|slot| match slot {
                Some(idx) => self
                    .values
                    .get(*idx)
                    .cloned()
                    .unwrap_or_else(|| Scalar::missing_for_dtype(self.dtype)),
                None => Scalar::missing_for_dtype(self.dtype),
            })
            .collect::<Vec<_>>();

        Self::new(self.dtype, values)
    }

    /// Gather rows by position; used to slice per-group sub-columns.
    pub fn take_positions(&self, positions: &[usize]) -> Result<Self, ColumnError> {
        let values = positions
            .iter()
            .map(|&idx| {
                self.values
                    .get(idx)
                    .cloned()
                    .unwrap_or_else(|| Scalar::missing_for_dtype(self.dtype))
            })
            .collect::<Vec<_>>();

        Self::new(self.dtype, values)
    }

    /// Reduce the column to a single scalar, dispatching on dtype.
    pub fn reduce(&self, kind: ReduceKind, options: ReduceOptions) -> Result<Scalar, ColumnError> {
        Ok(reduce_values(&self.values, self.dtype, kind, options)?)
    }

    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(other.values.iter())
                .all(|(a, b)| a.semantic_eq(b))
    }
}

#[cfg(test)]
mod tests {
    use super::{Column, ValidityMask};
    use ff_types::reduce::{ReduceKind, ReduceOptions};
    use ff_types::{DType, NullKind, Scalar};

    #[test]
    fn validity_mask_tracks_missing() {
        let values = vec![
            Scalar::Int64(1),
            Scalar::Null(NullKind::Null),
            Scalar::Float64(f64::NAN),
            Scalar::Int64(4),
        ];
        let mask = ValidityMask::from_values(&values);
        assert!(mask.get(0));
        assert!(!mask.get(1));
        assert!(!mask.get(2));
        assert!(mask.get(3));
        assert_eq!(mask.count_valid(), 2);
    }

    #[test]
    fn validity_mask_out_of_range_reads_invalid() {
        let mask = ValidityMask::all_valid(3);
        assert!(!mask.get(3));
        assert_eq!(mask.count_valid(), 3);
    }

    #[test]
    fn all_valid_masks_tail_word_bits() {
        let mask = ValidityMask::all_valid(70);
        assert_eq!(mask.count_valid(), 70);
        assert!(mask.get(63));
        assert!(mask.get(69));
        assert!(!mask.get(70));

        let aligned = ValidityMask::all_valid(64);
        assert_eq!(aligned.count_valid(), 64);
        assert!(!aligned.get(64));
    }

    #[test]
    fn column_coerces_to_common_dtype() {
        let column = Column::from_values(vec![
            Scalar::Bool(true),
            Scalar::Int64(2),
            Scalar::Float64(3.5),
        ])
        .expect("column");
        assert_eq!(column.dtype(), DType::Float64);
        assert_eq!(column.values()[0], Scalar::Float64(1.0));
    }

    #[test]
    fn column_null_values_take_dtype_marker() {
        let column = Column::from_values(vec![
            Scalar::timestamp_days(1),
            Scalar::Null(NullKind::Null),
        ])
        .expect("column");
        assert_eq!(column.dtype(), DType::Timestamp);
        assert_eq!(column.values()[1], Scalar::Null(NullKind::NaT));
    }

    #[test]
    fn reindex_fills_missing_positions() {
        let column = Column::from_values(vec![Scalar::Int64(10), Scalar::Int64(20)])
            .expect("column");
        let out = column
            .reindex_by_positions(&[Some(1), None, Some(0)])
            .expect("reindex");
        assert_eq!(
            out.values(),
            &[
                Scalar::Int64(20),
                Scalar::Null(NullKind::Null),
                Scalar::Int64(10)
            ]
        );
    }

    #[test]
    fn take_positions_slices_rows() {
        let column = Column::from_values(vec![
            Scalar::Int64(10),
            Scalar::Int64(20),
            Scalar::Int64(30),
        ])
        .expect("column");
        let out = column.take_positions(&[2, 0]).expect("take");
        assert_eq!(out.values(), &[Scalar::Int64(30), Scalar::Int64(10)]);
    }

    #[test]
    fn reduce_dispatches_on_dtype() {
        let numeric = Column::from_values(vec![Scalar::Int64(1), Scalar::Int64(2)])
            .expect("column");
        assert_eq!(
            numeric
                .reduce(ReduceKind::Sum, ReduceOptions::default())
                .expect("sum"),
            Scalar::Float64(3.0)
        );

        let strings = Column::from_values(vec![
            Scalar::Utf8("a".to_owned()),
            Scalar::Utf8("b".to_owned()),
        ])
        .expect("column");
        assert_eq!(
            strings
                .reduce(ReduceKind::Sum, ReduceOptions::default())
                .expect("sum"),
            Scalar::Utf8("ab".to_owned())
        );
        strings
            .reduce(ReduceKind::Median, ReduceOptions::default())
            .expect_err("median over strings must fail");
    }
}
