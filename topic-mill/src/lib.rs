//! Batch processor for additive-regularization topic models.
//!
//! The pipeline fits per-batch topic distributions (`theta`) against an
//! immutable snapshot of a global token-topic model (`phi`) and emits
//! token-count increments (`n_wt`) for an external merger to fold into
//! the next model revision. Bag-of-words items run the sparse or dense
//! EM inner loop; items carrying transaction cuts run the transaction
//! loop. Workers pull inputs from a shared MPMC queue and push
//! increments to the merger queue under backpressure.
//!
//! Regularizers and score calculators are plug-ins consumed through the
//! traits in [`schema`]; the merger is consumed through
//! [`model::TopicModelProvider`].

pub mod cache;
pub mod config;
pub mod em;
pub mod error;
pub mod model;
pub mod prepare;
pub mod processor;
pub mod queue;
pub mod regularize;
pub mod schema;
pub mod scores;
pub mod stream;
pub mod transaction;
pub mod types;

pub use config::{InstanceConfig, ModelConfig};
pub use error::ProcessorError;
pub use model::{
    IncrementOp, ModelIncrement, ModelRegistry, TopicModel, TopicModelProvider,
};
pub use processor::Processor;
pub use queue::ThreadSafeQueue;
pub use schema::{InstanceSchema, RegularizeTheta, SchemaHolder, ScoreCalculator};
pub use types::{
    Batch, Field, GetThetaMatrixArgs, Item, Mat, ProcessorInput, ThetaCacheEntry, ThetaMatrix,
    Token,
};
