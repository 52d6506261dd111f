//! Per-batch preparation: the document-word count matrix, the initial
//! theta, and the phi slice copied out of the global model snapshot.

use crate::config::ModelConfig;
use crate::model::TopicModel;
use crate::types::{Batch, ProcessorInput, ThetaCacheEntry};
use fnv::FnvHashMap;
use matrix_kit::{CsrMatrix, DenseMatrix, Layout};
use rand::Rng;

/// Weights below this threshold are snapped to zero when phi is copied
/// out of the model, to keep denormals off the hot path. The same
/// threshold snaps theta entries after normalization.
pub const WEIGHT_EPS: f32 = 1e-16;

/// Per-class token weight lookup. `None` means the config enumerates no
/// classes and every class weighs 1; otherwise unlisted classes weigh 0.
fn class_weight_map(config: &ModelConfig) -> Option<FnvHashMap<&str, f32>> {
    if config.class_id.is_empty() {
        return None;
    }
    let mut map = FnvHashMap::default();
    for (class_id, &weight) in config.class_id.iter().zip(&config.class_weight) {
        map.insert(class_id.as_str(), weight);
    }
    Some(map)
}

fn token_weight(batch: &Batch, weights: &Option<FnvHashMap<&str, f32>>, token_id: usize) -> f32 {
    match weights {
        None => 1.0,
        Some(map) => map
            .get(batch.class_id[token_id].as_str())
            .copied()
            .unwrap_or(0.0),
    }
}

/// Sparse `n_dw`: one row per item, columns are batch token ids, values
/// are `class_weight * token_count`.
pub fn build_sparse_ndw(batch: &Batch, config: &ModelConfig) -> anyhow::Result<CsrMatrix> {
    let weights = class_weight_map(config);

    let mut vals = Vec::new();
    let mut col_ind = Vec::new();
    let mut row_ptr = Vec::with_capacity(batch.item_size() + 1);

    for item in &batch.items {
        row_ptr.push(vals.len());
        for field in &item.fields {
            for (&token_id, &count) in field.token_id.iter().zip(&field.token_count) {
                vals.push(token_weight(batch, &weights, token_id) * count as f32);
                col_ind.push(token_id);
            }
        }
    }
    row_ptr.push(vals.len());

    CsrMatrix::from_parts(batch.token_size(), vals, row_ptr, col_ind)
}

/// Dense `n_dw`: batch tokens x items, accumulating
/// `class_weight * token_count` per occurrence.
pub fn build_dense_ndw(batch: &Batch, config: &ModelConfig) -> DenseMatrix {
    let weights = class_weight_map(config);
    let mut n_dw = DenseMatrix::zeros(batch.token_size(), batch.item_size());

    for (item_index, item) in batch.items.iter().enumerate() {
        for field in &item.fields {
            for (&token_id, &count) in field.token_id.iter().zip(&field.token_count) {
                n_dw.add(
                    token_id,
                    item_index,
                    token_weight(batch, &weights, token_id) * count as f32,
                );
            }
        }
    }

    n_dw
}

/// Initial theta (topics x items), column-major for the sparse-BOW path.
///
/// Items found in the cache are copied verbatim when `reuse_theta` is
/// set; everything else starts uniform at `1 / topics_count`, or with
/// fresh uniform random values when `use_random_theta` is set.
pub fn init_theta(
    batch: &Batch,
    config: &ModelConfig,
    cache: Option<&ThetaCacheEntry>,
) -> DenseMatrix {
    let topic_size = config.topics_count;
    let layout = if config.use_sparse_bow {
        Layout::ColMajor
    } else {
        Layout::RowMajor
    };
    let mut theta = DenseMatrix::zeros_with(topic_size, batch.item_size(), layout);
    let mut rng = rand::rng();

    for (item_index, item) in batch.items.iter().enumerate() {
        let cached = if config.reuse_theta {
            cache.and_then(|c| {
                let pos = c.item_id.iter().position(|&id| id == item.id)?;
                Some(&c.theta[pos])
            })
        } else {
            None
        };

        match cached {
            Some(values) => {
                for (topic_index, &v) in values.iter().take(topic_size).enumerate() {
                    theta.set(topic_index, item_index, v);
                }
            }
            None => {
                let default_theta = 1.0 / topic_size as f32;
                for topic_index in 0..topic_size {
                    let v = if config.use_random_theta {
                        rng.random::<f32>()
                    } else {
                        default_theta
                    };
                    theta.set(topic_index, item_index, v);
                }
            }
        }
    }

    theta
}

/// Phi slice (batch tokens x topics) copied from the model snapshot,
/// with sub-`WEIGHT_EPS` weights snapped to zero. Returns `None` when no
/// batch token is known to the model; the caller logs and skips the
/// model for this batch.
pub fn init_phi(batch: &Batch, topic_model: &TopicModel) -> Option<DenseMatrix> {
    let topic_size = topic_model.topic_size();
    let mut phi = DenseMatrix::zeros(batch.token_size(), topic_size);
    let mut phi_is_empty = true;

    for token_id in 0..batch.token_size() {
        let token = batch.batch_token(token_id);
        if let Some(row) = topic_model.token_index(&token) {
            phi_is_empty = false;
            for (topic_index, &value) in topic_model.token_weights(row).iter().enumerate() {
                let value = if value < WEIGHT_EPS { 0.0 } else { value };
                phi.set(token_id, topic_index, value);
            }
        }
    }

    if phi_is_empty {
        None
    } else {
        Some(phi)
    }
}

/// The cache entry carried by the input for this `(batch, model)` pair.
pub fn find_cache_entry<'a>(
    part: &'a ProcessorInput,
    config: &ModelConfig,
) -> Option<&'a ThetaCacheEntry> {
    part.cached_theta
        .iter()
        .find(|c| c.batch_uuid == part.batch_uuid && c.model_name == config.name)
}
