//! Typed failures surfaced by the processor.
//!
//! Only invariant violations and bad caller arguments become errors;
//! everything the worker can recover from (missing regularizer, empty
//! phi, cache write failure) is logged and skipped instead.

#[derive(Debug, thiserror::Error)]
pub enum ProcessorError {
    /// A structural invariant of the batch, config, or model snapshot
    /// does not hold. Aborts the worker.
    #[error("internal invariant violated: {0}")]
    Internal(String),

    /// A caller-supplied argument (e.g. an unknown model name) is out of
    /// range.
    #[error("argument out of range: {0}")]
    ArgumentOutOfRange(String),
}
