//! BLAS-style kernels behind a trait seam.
//!
//! The processing loops only ever talk to [`Blas`], so an accelerated
//! backend (MKL, OpenBLAS, ...) can be slotted in without touching them.
//! [`BuiltinBlas`] is the portable implementation that is always
//! available; [`preferred`] probes for an accelerated backend and falls
//! back to it.
//!
//! All dense kernels use the row-major convention: `lda`/`ldb`/`ldc` are
//! row strides.

use rayon::prelude::*;
use std::sync::Once;

/// Per-operand transposition flag for [`Blas::sgemm`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    NoTrans,
    Trans,
}

pub trait Blas: Send + Sync {
    /// Dot product of two strided `f32` vectors of logical length `n`.
    fn sdot(&self, n: usize, x: &[f32], incx: usize, y: &[f32], incy: usize) -> f32;

    /// `y += alpha * x` over strided vectors of logical length `n`.
    fn saxpy(&self, n: usize, alpha: f32, x: &[f32], incx: usize, y: &mut [f32], incy: usize);

    /// `C = alpha * op(A) * op(B) + beta * C` with row-major storage.
    ///
    /// `op(A)` is `m x k` and `op(B)` is `k x n`.
    #[allow(clippy::too_many_arguments)]
    fn sgemm(
        &self,
        trans_a: Op,
        trans_b: Op,
        m: usize,
        n: usize,
        k: usize,
        alpha: f32,
        a: &[f32],
        lda: usize,
        b: &[f32],
        ldb: usize,
        beta: f32,
        c: &mut [f32],
        ldc: usize,
    );

    /// Convert an `m x n` CSR triple into the CSC triple of the same
    /// matrix (equivalently, the CSR triple of its transpose).
    #[allow(clippy::too_many_arguments)]
    fn scsr2csc(
        &self,
        m: usize,
        n: usize,
        val: &[f32],
        row_ptr: &[usize],
        col_ind: &[usize],
        csc_val: &mut [f32],
        csc_row_ind: &mut [usize],
        csc_col_ptr: &mut [usize],
    );
}

/// Portable pure-Rust kernels.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuiltinBlas;

static BUILTIN: BuiltinBlas = BuiltinBlas;
static PROBE_ONCE: Once = Once::new();

/// The best kernel backend linked into this build.
///
/// Probes for an accelerated BLAS; none is linked in the portable build,
/// so the builtin kernels are returned (reported once at `info` level).
pub fn preferred() -> &'static dyn Blas {
    PROBE_ONCE.call_once(|| {
        log::info!("no accelerated BLAS backend detected, using builtin kernels");
    });
    &BUILTIN
}

impl Blas for BuiltinBlas {
    fn sdot(&self, n: usize, x: &[f32], incx: usize, y: &[f32], incy: usize) -> f32 {
        if n == 0 {
            return 0.0;
        }
        debug_assert!(x.len() > (n - 1) * incx);
        debug_assert!(y.len() > (n - 1) * incy);
        if incx == 1 && incy == 1 {
            return x[..n].iter().zip(&y[..n]).map(|(&a, &b)| a * b).sum();
        }
        (0..n).map(|i| x[i * incx] * y[i * incy]).sum()
    }

    fn saxpy(&self, n: usize, alpha: f32, x: &[f32], incx: usize, y: &mut [f32], incy: usize) {
        if n == 0 || alpha == 0.0 {
            return;
        }
        debug_assert!(x.len() > (n - 1) * incx);
        debug_assert!(y.len() > (n - 1) * incy);
        if incx == 1 && incy == 1 {
            for (yi, &xi) in y[..n].iter_mut().zip(&x[..n]) {
                *yi += alpha * xi;
            }
            return;
        }
        for i in 0..n {
            y[i * incy] += alpha * x[i * incx];
        }
    }

    fn sgemm(
        &self,
        trans_a: Op,
        trans_b: Op,
        m: usize,
        n: usize,
        k: usize,
        alpha: f32,
        a: &[f32],
        lda: usize,
        b: &[f32],
        ldb: usize,
        beta: f32,
        c: &mut [f32],
        ldc: usize,
    ) {
        if m == 0 || n == 0 {
            return;
        }
        debug_assert!(ldc >= n);
        debug_assert!(c.len() >= (m - 1) * ldc + n);

        c.par_chunks_mut(ldc)
            .take(m)
            .enumerate()
            .for_each(|(i, c_chunk)| {
                let c_row = &mut c_chunk[..n];
                if beta == 0.0 {
                    c_row.fill(0.0);
                } else if beta != 1.0 {
                    for cj in c_row.iter_mut() {
                        *cj *= beta;
                    }
                }

                for l in 0..k {
                    let a_il = match trans_a {
                        Op::NoTrans => a[i * lda + l],
                        Op::Trans => a[l * lda + i],
                    };
                    let scale = alpha * a_il;
                    if scale == 0.0 {
                        continue;
                    }
                    match trans_b {
                        Op::NoTrans => {
                            let b_row = &b[l * ldb..l * ldb + n];
                            for (cj, &bj) in c_row.iter_mut().zip(b_row) {
                                *cj += scale * bj;
                            }
                        }
                        Op::Trans => {
                            for (j, cj) in c_row.iter_mut().enumerate() {
                                *cj += scale * b[j * ldb + l];
                            }
                        }
                    }
                }
            });
    }

    fn scsr2csc(
        &self,
        m: usize,
        n: usize,
        val: &[f32],
        row_ptr: &[usize],
        col_ind: &[usize],
        csc_val: &mut [f32],
        csc_row_ind: &mut [usize],
        csc_col_ptr: &mut [usize],
    ) {
        let nnz = val.len();
        debug_assert_eq!(col_ind.len(), nnz);
        debug_assert_eq!(row_ptr.len(), m + 1);
        debug_assert_eq!(csc_val.len(), nnz);
        debug_assert_eq!(csc_row_ind.len(), nnz);
        debug_assert_eq!(csc_col_ptr.len(), n + 1);

        csc_col_ptr.fill(0);
        for &c in col_ind {
            debug_assert!(c < n);
            csc_col_ptr[c + 1] += 1;
        }
        for c in 0..n {
            csc_col_ptr[c + 1] += csc_col_ptr[c];
        }

        let mut next: Vec<usize> = csc_col_ptr[..n].to_vec();
        for r in 0..m {
            for idx in row_ptr[r]..row_ptr[r + 1] {
                let c = col_ind[idx];
                let dst = next[c];
                next[c] += 1;
                csc_val[dst] = val[idx];
                csc_row_ind[dst] = r;
            }
        }
    }
}
