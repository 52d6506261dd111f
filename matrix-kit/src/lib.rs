//! Dense and compressed-sparse-row matrix containers for the batch
//! processing pipeline, together with the BLAS-style kernels that the
//! inner loops are written against.
//!
//! The containers are deliberately small: an owning `f32` buffer with a
//! fixed storage orientation, and a CSR triple. Everything a hot loop
//! needs is reachable through contiguous slices, so the kernels in
//! [`blas`] stay free of per-element indirection.

pub mod blas;
pub mod csr;
pub mod dense;

pub use blas::{Blas, BuiltinBlas, Op};
pub use csr::CsrMatrix;
pub use dense::{DenseMatrix, Layout};
