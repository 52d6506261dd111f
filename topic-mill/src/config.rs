//! Per-model and process-wide configuration.

use std::path::PathBuf;

/// Options for fitting one topic model against incoming batches.
///
/// `class_id`/`class_weight` and `regularizer_name`/`regularizer_tau` are
/// parallel arrays; mismatched lengths of the class arrays are a fatal
/// invariant violation at processing time. When `class_id` is empty every
/// class weighs 1; when it enumerates classes, unlisted classes weigh 0.
/// The same convention applies to `transaction_typename` /
/// `transaction_weight` in the transaction loop.
#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub name: String,
    pub topics_count: usize,
    pub topic_name: Vec<String>,
    pub enabled: bool,
    pub inner_iterations_count: usize,
    pub use_sparse_bow: bool,
    pub reuse_theta: bool,
    pub use_random_theta: bool,
    /// Name of the stream whose mask filters items contributing to
    /// `n_wt`. An empty or unknown name means no mask.
    pub stream_name: String,
    pub class_id: Vec<String>,
    pub class_weight: Vec<f32>,
    pub regularizer_name: Vec<String>,
    pub regularizer_tau: Vec<f64>,
    pub score_name: Vec<String>,
    pub transaction_typename: Vec<String>,
    pub transaction_weight: Vec<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            name: String::new(),
            topics_count: 1,
            topic_name: vec!["topic_0".to_string()],
            enabled: true,
            inner_iterations_count: 1,
            use_sparse_bow: true,
            reuse_theta: false,
            use_random_theta: false,
            stream_name: String::new(),
            class_id: Vec::new(),
            class_weight: Vec::new(),
            regularizer_name: Vec::new(),
            regularizer_tau: Vec::new(),
            score_name: Vec::new(),
            transaction_typename: Vec::new(),
            transaction_weight: Vec::new(),
        }
    }
}

impl ModelConfig {
    /// Config with auto-generated topic names `topic_0 .. topic_{n-1}`.
    pub fn new(name: impl Into<String>, topics_count: usize) -> Self {
        ModelConfig {
            name: name.into(),
            topics_count,
            topic_name: (0..topics_count).map(|k| format!("topic_{k}")).collect(),
            ..ModelConfig::default()
        }
    }
}

/// Process-wide settings shared by every worker through the schema.
#[derive(Clone, Debug)]
pub struct InstanceConfig {
    /// Backpressure bound of the merger queue.
    pub merger_queue_max_size: usize,
    /// Attach per-item theta distributions to each increment.
    pub cache_theta: bool,
    /// Spill theta cache entries to `<dir>/<uuid>.cache` instead of
    /// carrying them inline.
    pub disk_cache_path: Option<PathBuf>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        InstanceConfig {
            merger_queue_max_size: 10,
            cache_theta: false,
            disk_cache_path: None,
        }
    }
}
