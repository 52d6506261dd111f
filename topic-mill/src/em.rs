//! EM inner loops for bag-of-words items, in sparse and dense variants.
//!
//! Both refine `theta` in place over `inner_iterations_count` passes and
//! return the `n_wt` increment (batch tokens x topics). The stream mask
//! filters only the `n_wt` accumulation, never the theta refinement.
//! Division by zero collapses to zero throughout.

use crate::config::ModelConfig;
use crate::regularize::regularize_and_normalize_theta;
use crate::schema::InstanceSchema;
use crate::types::Batch;
use matrix_kit::{Blas, CsrMatrix, DenseMatrix, Layout, Op};

/// Sparse-BOW variant. `theta` must be column-major; `phi` row-major.
#[allow(clippy::too_many_arguments)]
pub fn calculate_nwt_sparse(
    model_config: &ModelConfig,
    batch: &Batch,
    mask: Option<&[bool]>,
    schema: &InstanceSchema,
    sparse_ndw: &CsrMatrix,
    phi: &DenseMatrix,
    theta: &mut DenseMatrix,
    blas: &dyn Blas,
) -> DenseMatrix {
    let tokens_count = phi.nrows();
    let topics_count = phi.ncols();
    let docs_count = theta.ncols();

    for inner_iter in 0..model_config.inner_iterations_count {
        let mut n_td = DenseMatrix::zeros_with(theta.nrows(), theta.ncols(), Layout::ColMajor);

        for d in 0..docs_count {
            for i in sparse_ndw.row_range(d) {
                let w = sparse_ndw.col_ind()[i];
                let p_dw = blas.sdot(topics_count, phi.row_slice(w), 1, theta.col_slice(d), 1);
                if p_dw == 0.0 {
                    continue;
                }
                blas.saxpy(
                    topics_count,
                    sparse_ndw.vals()[i] / p_dw,
                    phi.row_slice(w),
                    1,
                    n_td.col_slice_mut(d),
                    1,
                );
            }
        }

        theta.hadamard_assign(&n_td);
        regularize_and_normalize_theta(inner_iter, batch, model_config, schema, theta);
    }

    let mut n_wt = DenseMatrix::zeros(tokens_count, topics_count);
    let sparse_nwd = sparse_ndw.transpose(blas);

    for w in 0..tokens_count {
        for i in sparse_nwd.row_range(w) {
            let d = sparse_nwd.col_ind()[i];
            if let Some(mask) = mask {
                if !mask[d] {
                    continue;
                }
            }
            let p_wd = blas.sdot(topics_count, phi.row_slice(w), 1, theta.col_slice(d), 1);
            if p_wd == 0.0 {
                continue;
            }
            blas.saxpy(
                topics_count,
                sparse_nwd.vals()[i] / p_wd,
                theta.col_slice(d),
                1,
                n_wt.row_slice_mut(w),
                1,
            );
        }
    }

    n_wt.hadamard_assign(phi);
    n_wt
}

/// Dense-BOW variant. Every matrix is row-major; `dense_ndw` is batch
/// tokens x items.
#[allow(clippy::too_many_arguments)]
pub fn calculate_nwt_dense(
    model_config: &ModelConfig,
    batch: &Batch,
    mask: Option<&[bool]>,
    schema: &InstanceSchema,
    dense_ndw: &DenseMatrix,
    phi: &DenseMatrix,
    theta: &mut DenseMatrix,
    blas: &dyn Blas,
) -> DenseMatrix {
    let tokens_count = phi.nrows();
    let topics_count = phi.ncols();
    let docs_count = theta.ncols();

    let mut z = DenseMatrix::zeros(tokens_count, docs_count);

    for inner_iter in 0..model_config.inner_iterations_count {
        // Z = Phi * Theta, then Z = n_dw ./ Z
        blas.sgemm(
            Op::NoTrans,
            Op::NoTrans,
            tokens_count,
            docs_count,
            topics_count,
            1.0,
            phi.as_slice(),
            topics_count,
            theta.as_slice(),
            docs_count,
            0.0,
            z.as_mut_slice(),
            docs_count,
        );
        z.quotient_assign(dense_ndw);

        // Theta = Theta .* (Phi' * Z)
        let mut prod_trans_phi_z = DenseMatrix::zeros(topics_count, docs_count);
        blas.sgemm(
            Op::Trans,
            Op::NoTrans,
            topics_count,
            docs_count,
            tokens_count,
            1.0,
            phi.as_slice(),
            topics_count,
            z.as_slice(),
            docs_count,
            0.0,
            prod_trans_phi_z.as_mut_slice(),
            docs_count,
        );
        theta.hadamard_assign(&prod_trans_phi_z);

        regularize_and_normalize_theta(inner_iter, batch, model_config, schema, theta);
    }

    blas.sgemm(
        Op::NoTrans,
        Op::NoTrans,
        tokens_count,
        docs_count,
        topics_count,
        1.0,
        phi.as_slice(),
        topics_count,
        theta.as_slice(),
        docs_count,
        0.0,
        z.as_mut_slice(),
        docs_count,
    );
    z.quotient_assign(dense_ndw);

    let mut n_wt = DenseMatrix::zeros(tokens_count, topics_count);
    match mask {
        Some(mask) => {
            // Compact Z and Theta to the masked-in columns before the
            // final product.
            let kept: Vec<usize> = (0..docs_count).filter(|&d| mask[d]).collect();
            let mut masked_z = DenseMatrix::zeros(tokens_count, kept.len());
            let mut masked_theta = DenseMatrix::zeros(topics_count, kept.len());
            for (dst, &src) in kept.iter().enumerate() {
                for r in 0..tokens_count {
                    masked_z.set(r, dst, z.get(r, src));
                }
                for r in 0..topics_count {
                    masked_theta.set(r, dst, theta.get(r, src));
                }
            }

            blas.sgemm(
                Op::NoTrans,
                Op::Trans,
                tokens_count,
                topics_count,
                kept.len(),
                1.0,
                masked_z.as_slice(),
                kept.len(),
                masked_theta.as_slice(),
                kept.len(),
                0.0,
                n_wt.as_mut_slice(),
                topics_count,
            );
        }
        None => {
            blas.sgemm(
                Op::NoTrans,
                Op::Trans,
                tokens_count,
                topics_count,
                docs_count,
                1.0,
                z.as_slice(),
                docs_count,
                theta.as_slice(),
                docs_count,
                0.0,
                n_wt.as_mut_slice(),
                topics_count,
            );
        }
    }

    n_wt.hadamard_assign(phi);
    n_wt
}
