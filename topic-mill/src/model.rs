//! Read-only topic model snapshots and the increments produced against
//! them.

use crate::config::ModelConfig;
use crate::types::{Batch, ProcessorInput, ThetaCacheEntry, Token};
use fnv::FnvHashMap;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Immutable snapshot of one model's token-topic weights.
///
/// Tokens are interned: `token_index` resolves a [`Token`] to a dense row
/// of length `topic_size()`.
#[derive(Clone, Debug, Default)]
pub struct TopicModel {
    name: String,
    topic_name: Vec<String>,
    index: FnvHashMap<Token, usize>,
    weights: Vec<Vec<f32>>,
}

impl TopicModel {
    pub fn new(name: impl Into<String>, topic_name: Vec<String>) -> Self {
        TopicModel {
            name: name.into(),
            topic_name,
            index: FnvHashMap::default(),
            weights: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topic_size(&self) -> usize {
        self.topic_name.len()
    }

    pub fn topic_name(&self) -> &[String] {
        &self.topic_name
    }

    /// Register a token with its per-topic weights. Replaces the weights
    /// if the token is already present.
    pub fn upsert_token(&mut self, token: Token, weights: Vec<f32>) -> anyhow::Result<()> {
        anyhow::ensure!(
            weights.len() == self.topic_size(),
            "token weight vector must have one entry per topic"
        );
        match self.index.get(&token) {
            Some(&row) => self.weights[row] = weights,
            None => {
                self.index.insert(token, self.weights.len());
                self.weights.push(weights);
            }
        }
        Ok(())
    }

    pub fn has_token(&self, token: &Token) -> bool {
        self.index.contains_key(token)
    }

    pub fn token_index(&self, token: &Token) -> Option<usize> {
        self.index.get(token).copied()
    }

    /// Per-topic weights of an interned token row.
    pub fn token_weights(&self, row: usize) -> &[f32] {
        &self.weights[row]
    }

    /// Single `p_wt` entry; used by the transaction loop.
    #[inline]
    pub fn get(&self, row: usize, topic: usize) -> f32 {
        self.weights[row][topic]
    }
}

/// Accessor to the latest published snapshot per model, safe to call
/// concurrently with the publisher (the merger collaborator).
pub trait TopicModelProvider: Send + Sync {
    fn latest(&self, model_name: &str) -> Option<Arc<TopicModel>>;
}

/// In-process snapshot registry: the publisher swaps whole `Arc`s in,
/// readers keep their reference for the rest of the batch.
#[derive(Default)]
pub struct ModelRegistry {
    inner: RwLock<HashMap<String, Arc<TopicModel>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, model: TopicModel) {
        let mut map = self.inner.write().expect("model registry poisoned");
        map.insert(model.name().to_string(), Arc::new(model));
    }
}

impl TopicModelProvider for ModelRegistry {
    fn latest(&self, model_name: &str) -> Option<Arc<TopicModel>> {
        let map = self.inner.read().expect("model registry poisoned");
        map.get(model_name).cloned()
    }
}

/// Per-token merge operation carried by an increment row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IncrementOp {
    /// Token is unknown to the model snapshot; the merger should intern
    /// it. The increment vector is empty.
    CreateIfNotExist,
    /// Token is known; the increment vector has `topics_count` entries to
    /// add into the model counts.
    IncrementValue,
}

/// The unit handed to the merger: one batch's contribution to one model.
#[derive(Clone, Debug)]
pub struct ModelIncrement {
    pub model_name: String,
    pub topics_count: usize,
    pub topic_name: Vec<String>,
    pub batch_uuid: Uuid,
    pub token_keyword: Vec<String>,
    pub class_id: Vec<String>,
    pub operation_type: Vec<IncrementOp>,
    pub token_increment: Vec<Vec<f32>>,
    pub cache: Vec<ThetaCacheEntry>,
    pub score_name: Vec<String>,
    pub score: Vec<Vec<u8>>,
}

impl ModelIncrement {
    /// Skeleton increment for one `(batch, model)` pair: one row per
    /// batch token, `IncrementValue` rows pre-sized with zeros for tokens
    /// the snapshot already knows, `CreateIfNotExist` with an empty
    /// vector otherwise.
    pub fn for_batch(
        part: &ProcessorInput,
        model_config: &ModelConfig,
        topic_model: &TopicModel,
    ) -> Self {
        let batch = &part.batch;
        let topic_size = model_config.topics_count;

        let mut increment = ModelIncrement {
            model_name: model_config.name.clone(),
            topics_count: topic_size,
            topic_name: topic_model.topic_name().to_vec(),
            batch_uuid: part.batch_uuid,
            token_keyword: Vec::with_capacity(batch.token_size()),
            class_id: Vec::with_capacity(batch.token_size()),
            operation_type: Vec::with_capacity(batch.token_size()),
            token_increment: Vec::with_capacity(batch.token_size()),
            cache: Vec::new(),
            score_name: Vec::new(),
            score: Vec::new(),
        };

        for token_id in 0..batch.token_size() {
            let token = batch.batch_token(token_id);
            increment.token_keyword.push(token.keyword.clone());
            increment.class_id.push(token.class_id.clone());
            if topic_model.has_token(&token) {
                increment.operation_type.push(IncrementOp::IncrementValue);
                increment.token_increment.push(vec![0.0; topic_size]);
            } else {
                increment.operation_type.push(IncrementOp::CreateIfNotExist);
                increment.token_increment.push(Vec::new());
            }
        }

        increment
    }
}

/// Sink for the transaction loop's per-token `n_wt` contributions, keyed
/// by the model-level (global) token row.
pub trait NwtWriter {
    fn store(&mut self, global_token_id: usize, values: &[f32]);
}

/// Writes transaction contributions back into a batch-shaped increment by
/// inverting the local-to-global token map.
pub struct IncrementWriter<'a> {
    increment: &'a mut ModelIncrement,
    global_to_local: FnvHashMap<usize, usize>,
}

impl<'a> IncrementWriter<'a> {
    pub fn new(
        increment: &'a mut ModelIncrement,
        batch: &Batch,
        topic_model: &TopicModel,
    ) -> Self {
        let mut global_to_local = FnvHashMap::default();
        for local in 0..batch.token_size() {
            if let Some(global) = topic_model.token_index(&batch.batch_token(local)) {
                global_to_local.entry(global).or_insert(local);
            }
        }
        IncrementWriter {
            increment,
            global_to_local,
        }
    }
}

impl NwtWriter for IncrementWriter<'_> {
    fn store(&mut self, global_token_id: usize, values: &[f32]) {
        let Some(&local) = self.global_to_local.get(&global_token_id) else {
            return;
        };
        if self.increment.operation_type[local] != IncrementOp::IncrementValue {
            return;
        }
        let row = &mut self.increment.token_increment[local];
        for (acc, &v) in row.iter_mut().zip(values) {
            *acc += v;
        }
    }
}
