//! Instance schema: the registry of model configs, regularizer and score
//! plug-ins, and process-wide settings, published as an atomic snapshot.

use crate::config::{InstanceConfig, ModelConfig};
use crate::model::TopicModel;
use crate::types::{Item, Token};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Theta regularizer plug-in contract.
///
/// `theta_next` holds the item's unnormalized topic column; the
/// regularizer mutates it in place. Returning `false` signals a
/// misconfiguration: the caller logs and keeps the unregularized values
/// for this iteration.
pub trait RegularizeTheta: Send + Sync {
    fn regularize_theta(
        &self,
        item: &Item,
        theta_next: &mut [f32],
        topic_name: &[String],
        inner_iter: usize,
        tau: f64,
    ) -> bool;
}

/// Cumulative score plug-in contract.
///
/// Accumulators are opaque to the processor: `create_score` makes one,
/// `append_score` folds one in-stream item into it, and
/// `serialize_score` renders it for the increment.
pub trait ScoreCalculator: Send + Sync {
    fn is_cumulative(&self) -> bool;

    /// Stream this score is restricted to; an empty name matches every
    /// item.
    fn stream_name(&self) -> &str {
        ""
    }

    fn create_score(&self) -> Box<dyn Any + Send>;

    fn append_score(
        &self,
        item: &Item,
        token_dict: &[Token],
        topic_model: &TopicModel,
        theta_vec: &[f32],
        score: &mut (dyn Any + Send),
    );

    fn serialize_score(&self, score: &(dyn Any + Send)) -> anyhow::Result<Vec<u8>>;
}

/// Immutable registry snapshot consulted once per batch.
#[derive(Default)]
pub struct InstanceSchema {
    config: InstanceConfig,
    models: Vec<ModelConfig>,
    regularizers: HashMap<String, Arc<dyn RegularizeTheta>>,
    score_calculators: HashMap<String, Arc<dyn ScoreCalculator>>,
}

impl InstanceSchema {
    pub fn new(config: InstanceConfig) -> Self {
        InstanceSchema {
            config,
            ..InstanceSchema::default()
        }
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    pub fn insert_model(&mut self, config: ModelConfig) {
        match self.models.iter_mut().find(|m| m.name == config.name) {
            Some(slot) => *slot = config,
            None => self.models.push(config),
        }
    }

    pub fn insert_regularizer(
        &mut self,
        name: impl Into<String>,
        regularizer: Arc<dyn RegularizeTheta>,
    ) {
        self.regularizers.insert(name.into(), regularizer);
    }

    pub fn insert_score_calculator(
        &mut self,
        name: impl Into<String>,
        calculator: Arc<dyn ScoreCalculator>,
    ) {
        self.score_calculators.insert(name.into(), calculator);
    }

    /// Model names in registration order.
    pub fn model_names(&self) -> Vec<String> {
        self.models.iter().map(|m| m.name.clone()).collect()
    }

    pub fn model_config(&self, name: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.name == name)
    }

    pub fn regularizer(&self, name: &str) -> Option<&Arc<dyn RegularizeTheta>> {
        self.regularizers.get(name)
    }

    pub fn score_calculator(&self, name: &str) -> Option<&Arc<dyn ScoreCalculator>> {
        self.score_calculators.get(name)
    }
}

/// Shared-by-reference snapshot holder: writers publish whole `Arc`s,
/// readers keep theirs for the duration of a batch. No locks are held on
/// the hot path.
pub struct SchemaHolder {
    inner: RwLock<Arc<InstanceSchema>>,
}

impl SchemaHolder {
    pub fn new(schema: InstanceSchema) -> Self {
        SchemaHolder {
            inner: RwLock::new(Arc::new(schema)),
        }
    }

    pub fn get(&self) -> Arc<InstanceSchema> {
        self.inner.read().expect("schema holder poisoned").clone()
    }

    pub fn set(&self, schema: InstanceSchema) {
        *self.inner.write().expect("schema holder poisoned") = Arc::new(schema);
    }
}
