//! Owning two-dimensional `f32` buffer with a storage orientation chosen
//! at construction.
//!
//! The orientation decides which of `row_slice` / `col_slice` is
//! contiguous; it does not change the `(row, col)` element-access
//! contract. Bounds are checked with `debug_assert!` so the hot loops pay
//! nothing in release builds.

/// Storage orientation of a [`DenseMatrix`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout {
    /// Rows are contiguous in memory.
    RowMajor,
    /// Columns are contiguous in memory.
    ColMajor,
}

/// Dense `nrows x ncols` matrix over `f32`.
#[derive(Clone, Debug)]
pub struct DenseMatrix {
    nrows: usize,
    ncols: usize,
    layout: Layout,
    data: Vec<f32>,
}

impl DenseMatrix {
    /// Zero-initialized row-major matrix.
    pub fn zeros(nrows: usize, ncols: usize) -> Self {
        Self::zeros_with(nrows, ncols, Layout::RowMajor)
    }

    /// Zero-initialized matrix with an explicit orientation.
    pub fn zeros_with(nrows: usize, ncols: usize, layout: Layout) -> Self {
        DenseMatrix {
            nrows,
            ncols,
            layout,
            data: vec![0.0; nrows * ncols],
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    #[inline]
    fn offset(&self, row: usize, col: usize) -> usize {
        debug_assert!(row < self.nrows && col < self.ncols);
        match self.layout {
            Layout::RowMajor => row * self.ncols + col,
            Layout::ColMajor => col * self.nrows + row,
        }
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[self.offset(row, col)]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        let k = self.offset(row, col);
        self.data[k] = value;
    }

    #[inline]
    pub fn add(&mut self, row: usize, col: usize, value: f32) {
        let k = self.offset(row, col);
        self.data[k] += value;
    }

    pub fn fill(&mut self, value: f32) {
        self.data.fill(value);
    }

    /// Raw storage in the matrix's own orientation.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Contiguous view of one row; the matrix must be row-major.
    #[inline]
    pub fn row_slice(&self, row: usize) -> &[f32] {
        debug_assert_eq!(self.layout, Layout::RowMajor);
        let lo = row * self.ncols;
        &self.data[lo..lo + self.ncols]
    }

    #[inline]
    pub fn row_slice_mut(&mut self, row: usize) -> &mut [f32] {
        debug_assert_eq!(self.layout, Layout::RowMajor);
        let lo = row * self.ncols;
        &mut self.data[lo..lo + self.ncols]
    }

    /// Contiguous view of one column; the matrix must be column-major.
    #[inline]
    pub fn col_slice(&self, col: usize) -> &[f32] {
        debug_assert_eq!(self.layout, Layout::ColMajor);
        let lo = col * self.nrows;
        &self.data[lo..lo + self.nrows]
    }

    #[inline]
    pub fn col_slice_mut(&mut self, col: usize) -> &mut [f32] {
        debug_assert_eq!(self.layout, Layout::ColMajor);
        let lo = col * self.nrows;
        &mut self.data[lo..lo + self.nrows]
    }

    /// `self[i] *= rhs[i]` over the raw storage. Shapes and orientations
    /// must match.
    pub fn hadamard_assign(&mut self, rhs: &DenseMatrix) {
        assert_eq!(self.nrows, rhs.nrows);
        assert_eq!(self.ncols, rhs.ncols);
        assert_eq!(self.layout, rhs.layout);
        for (x, &y) in self.data.iter_mut().zip(rhs.data.iter()) {
            *x *= y;
        }
    }

    /// `self[i] = numer[i] / self[i]`, collapsing to zero whenever either
    /// operand is zero. Shapes and orientations must match.
    pub fn quotient_assign(&mut self, numer: &DenseMatrix) {
        assert_eq!(self.nrows, numer.nrows);
        assert_eq!(self.ncols, numer.ncols);
        assert_eq!(self.layout, numer.layout);
        for (den, &num) in self.data.iter_mut().zip(numer.data.iter()) {
            *den = if num == 0.0 || *den == 0.0 {
                0.0
            } else {
                num / *den
            };
        }
    }
}
