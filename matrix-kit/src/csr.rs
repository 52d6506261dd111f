//! Compressed-sparse-row matrix over `f32`.

use crate::blas::Blas;
use crate::dense::DenseMatrix;

/// `m x n` sparse matrix in CSR form: `vals`/`col_ind` hold the non-zero
/// entries row by row, `row_ptr[r]..row_ptr[r+1]` delimits row `r`.
#[derive(Clone, Debug)]
pub struct CsrMatrix {
    m: usize,
    n: usize,
    vals: Vec<f32>,
    col_ind: Vec<usize>,
    row_ptr: Vec<usize>,
}

impl CsrMatrix {
    /// Assemble from the three parallel arrays. The column count `n`
    /// cannot be inferred from the arrays and must be given explicitly.
    pub fn from_parts(
        n: usize,
        vals: Vec<f32>,
        row_ptr: Vec<usize>,
        col_ind: Vec<usize>,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(!row_ptr.is_empty(), "row_ptr must have at least one entry");
        anyhow::ensure!(
            vals.len() == col_ind.len(),
            "vals and col_ind must have equal length"
        );
        anyhow::ensure!(
            *row_ptr.last().unwrap() == vals.len(),
            "row_ptr must end at nnz"
        );
        anyhow::ensure!(
            row_ptr.windows(2).all(|w| w[0] <= w[1]),
            "row_ptr must be non-decreasing"
        );
        anyhow::ensure!(
            col_ind.iter().all(|&c| c < n),
            "column index out of range"
        );

        Ok(CsrMatrix {
            m: row_ptr.len() - 1,
            n,
            vals,
            col_ind,
            row_ptr,
        })
    }

    /// Assemble from `(row, col, value)` triplets, dropping exact zeros.
    pub fn from_nonzero_triplets(
        m: usize,
        n: usize,
        mut triplets: Vec<(usize, usize, f32)>,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            triplets.iter().all(|&(r, c, _)| r < m && c < n),
            "triplet index out of range"
        );
        triplets.sort_by_key(|&(r, c, _)| (r, c));

        let mut vals = Vec::with_capacity(triplets.len());
        let mut col_ind = Vec::with_capacity(triplets.len());
        let mut row_ptr = vec![0usize; m + 1];
        for (r, c, v) in triplets {
            if v == 0.0 {
                continue;
            }
            row_ptr[r + 1] += 1;
            col_ind.push(c);
            vals.push(v);
        }
        for r in 0..m {
            row_ptr[r + 1] += row_ptr[r];
        }

        Ok(CsrMatrix {
            m,
            n,
            vals,
            col_ind,
            row_ptr,
        })
    }

    pub fn m(&self) -> usize {
        self.m
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn nnz(&self) -> usize {
        self.vals.len()
    }

    pub fn vals(&self) -> &[f32] {
        &self.vals
    }

    pub fn col_ind(&self) -> &[usize] {
        &self.col_ind
    }

    pub fn row_ptr(&self) -> &[usize] {
        &self.row_ptr
    }

    /// Index range of row `r` into `vals` / `col_ind`.
    #[inline]
    pub fn row_range(&self, r: usize) -> std::ops::Range<usize> {
        self.row_ptr[r]..self.row_ptr[r + 1]
    }

    /// Transpose via the `scsr2csc` kernel; `m` and `n` swap.
    pub fn transpose(&self, blas: &dyn Blas) -> CsrMatrix {
        let nnz = self.nnz();
        let mut csc_val = vec![0.0f32; nnz];
        let mut csc_row_ind = vec![0usize; nnz];
        let mut csc_col_ptr = vec![0usize; self.n + 1];
        blas.scsr2csc(
            self.m,
            self.n,
            &self.vals,
            &self.row_ptr,
            &self.col_ind,
            &mut csc_val,
            &mut csc_row_ind,
            &mut csc_col_ptr,
        );

        CsrMatrix {
            m: self.n,
            n: self.m,
            vals: csc_val,
            col_ind: csc_row_ind,
            row_ptr: csc_col_ptr,
        }
    }

    /// Materialize as a row-major dense matrix. Intended for tests and
    /// small inputs.
    pub fn to_dense(&self) -> DenseMatrix {
        let mut out = DenseMatrix::zeros(self.m, self.n);
        for r in 0..self.m {
            for idx in self.row_range(r) {
                out.add(r, self.col_ind[idx], self.vals[idx]);
            }
        }
        out
    }
}
