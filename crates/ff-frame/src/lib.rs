#![forbid(unsafe_code)]

use ff_columnar::{Column, ColumnError};
use ff_index::{Index, IndexError, IndexLabel};
use ff_types::reduce::{ReduceKind, ReduceOptions};
use ff_types::{DType, Scalar};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("index length ({index_len}) does not match column length ({column_len})")]
    LengthMismatch { index_len: usize, column_len: usize },
    #[error("frame has no column named '{name}'")]
    UnknownColumn { name: String },
    #[error("duplicate column name '{name}'")]
    DuplicateColumn { name: String },
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    name: String,
    index: Index,
    column: Column,
}

impl Series {
    pub fn new(name: impl Into<String>, index: Index, column: Column) -> Result<Self, FrameError> {
        if index.len() != column.len() {
            return Err(FrameError::LengthMismatch {
                index_len: index.len(),
                column_len: column.len(),
            });
        }

        Ok(Self {
            name: name.into(),
            index,
            column,
        })
    }

    pub fn from_values(
        name: impl Into<String>,
        index_labels: Vec<IndexLabel>,
        values: Vec<Scalar>,
    ) -> Result<Self, FrameError> {
        let index = Index::new(index_labels);
        let column = Column::from_values(values)?;
        Self::new(name, index, column)
    }

    /// Construct over a default 0..n positional index.
    pub fn from_column_values(
        name: impl Into<String>,
        values: Vec<Scalar>,
    ) -> Result<Self, FrameError> {
        let index = Index::from_range(values.len());
        let column = Column::from_values(values)?;
        Self::new(name, index, column)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn column(&self) -> &Column {
        &self.column
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        self.column.values()
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.column.dtype()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.column.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.column.is_empty()
    }

    /// Count of non-missing values.
    #[must_use]
    pub fn count(&self) -> usize {
        self.column.validity().count_valid()
    }

    /// Gather rows by position into a new Series over a fresh positional
    /// index; used to slice per-group views.
    pub fn take_positions(&self, positions: &[usize]) -> Result<Self, FrameError> {
        let column = self.column.take_positions(positions)?;
        let index = Index::from_range(column.len());
        Self::new(self.name.clone(), index, column)
    }

    fn reduce_with(&self, kind: ReduceKind, skipna: bool) -> Result<Scalar, FrameError> {
        Ok(self
            .column
            .reduce(kind, ReduceOptions::with_skipna(skipna))?)
    }

    // ── Reductions ─────────────────────────────────────────────────────
    //
    // Each reduction comes in two forms: a skipna-parametrized `_with`
    // variant and a no-argument default that is exactly the skipna=true
    // call. Grouped engines must match these semantics per group.

    pub fn sum_with(&self, skipna: bool) -> Result<Scalar, FrameError> {
        self.reduce_with(ReduceKind::Sum, skipna)
    }

    pub fn sum(&self) -> Result<Scalar, FrameError> {
        self.sum_with(true)
    }

    pub fn prod_with(&self, skipna: bool) -> Result<Scalar, FrameError> {
        self.reduce_with(ReduceKind::Prod, skipna)
    }

    pub fn prod(&self) -> Result<Scalar, FrameError> {
        self.prod_with(true)
    }

    pub fn min_with(&self, skipna: bool) -> Result<Scalar, FrameError> {
        self.reduce_with(ReduceKind::Min, skipna)
    }

    pub fn min(&self) -> Result<Scalar, FrameError> {
        self.min_with(true)
    }

    pub fn max_with(&self, skipna: bool) -> Result<Scalar, FrameError> {
        self.reduce_with(ReduceKind::Max, skipna)
    }

    pub fn max(&self) -> Result<Scalar, FrameError> {
        self.max_with(true)
    }

    pub fn mean_with(&self, skipna: bool) -> Result<Scalar, FrameError> {
        self.reduce_with(ReduceKind::Mean, skipna)
    }

    pub fn mean(&self) -> Result<Scalar, FrameError> {
        self.mean_with(true)
    }

    pub fn median_with(&self, skipna: bool) -> Result<Scalar, FrameError> {
        self.reduce_with(ReduceKind::Median, skipna)
    }

    pub fn median(&self) -> Result<Scalar, FrameError> {
        self.median_with(true)
    }

    /// Sample standard deviation, ddof=1.
    pub fn std_with(&self, skipna: bool) -> Result<Scalar, FrameError> {
        self.reduce_with(ReduceKind::Std, skipna)
    }

    pub fn std(&self) -> Result<Scalar, FrameError> {
        self.std_with(true)
    }

    /// Sample variance, ddof=1.
    pub fn var_with(&self, skipna: bool) -> Result<Scalar, FrameError> {
        self.reduce_with(ReduceKind::Var, skipna)
    }

    pub fn var(&self) -> Result<Scalar, FrameError> {
        self.var_with(true)
    }

    /// Standard error of the mean, ddof=1.
    pub fn sem_with(&self, skipna: bool) -> Result<Scalar, FrameError> {
        self.reduce_with(ReduceKind::Sem, skipna)
    }

    pub fn sem(&self) -> Result<Scalar, FrameError> {
        self.sem_with(true)
    }
}

/// Ordered named columns over a shared index. Only the fixture-building
/// subset of a frame surface: construction and per-column Series views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    index: Index,
    columns: Vec<(String, Column)>,
}

impl DataFrame {
    pub fn new(index: Index, columns: Vec<(String, Column)>) -> Result<Self, FrameError> {
        for (name, column) in &columns {
            if column.len() != index.len() {
                return Err(FrameError::LengthMismatch {
                    index_len: index.len(),
                    column_len: column.len(),
                });
            }
            let occurrences = columns.iter().filter(|(n, _)| n == name).count();
            if occurrences > 1 {
                return Err(FrameError::DuplicateColumn { name: name.clone() });
            }
        }

        Ok(Self { index, columns })
    }

    /// Build from (name, values) pairs over a default positional index.
    pub fn from_columns(pairs: Vec<(&str, Vec<Scalar>)>) -> Result<Self, FrameError> {
        let len = pairs.first().map_or(0, |(_, values)| values.len());
        let index = Index::from_range(len);
        let columns = pairs
            .into_iter()
            .map(|(name, values)| Ok((name.to_owned(), Column::from_values(values)?)))
            .collect::<Result<Vec<_>, ColumnError>>()?;
        Self::new(index, columns)
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Series view of one column (clones the column data).
    pub fn column(&self, name: &str) -> Result<Series, FrameError> {
        let column = self
            .columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, column)| column.clone())
            .ok_or_else(|| FrameError::UnknownColumn {
                name: name.to_owned(),
            })?;
        Series::new(name, self.index.clone(), column)
    }
}
