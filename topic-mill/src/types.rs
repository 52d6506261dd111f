//! Batch-level data model: tokens, items, batches, processor inputs, and
//! the theta-side outputs (cache entries and the one-shot theta matrix).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Dense `f32` matrix alias for public results.
pub type Mat = nalgebra::DMatrix<f32>;

/// Token identity: a class id paired with a surface form. Tokens are
/// interned at the model level; batches carry parallel
/// `class_id`/`token` arrays instead.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Token {
    pub class_id: String,
    pub keyword: String,
}

impl Token {
    pub fn new(class_id: impl Into<String>, keyword: impl Into<String>) -> Self {
        Token {
            class_id: class_id.into(),
            keyword: keyword.into(),
        }
    }
}

/// One field of an item: parallel `(token_id, token_count)` pairs, where
/// `token_id` indexes into the parent batch's token arrays.
#[derive(Clone, Debug, Default)]
pub struct Field {
    pub token_id: Vec<usize>,
    pub token_count: Vec<u32>,
}

/// A single document (bag of words) or transaction sequence.
///
/// The transaction extension is empty for plain bag-of-words items:
/// `token_id` is the flat token stream, `token_weight` its parallel
/// weights, `transaction_start_index` a cut vector over the stream
/// (`T + 1` entries for `T` transactions), and `transaction_typename_id`
/// indexes into the batch-level typename table per transaction.
#[derive(Clone, Debug, Default)]
pub struct Item {
    pub id: i64,
    pub fields: Vec<Field>,
    pub token_id: Vec<usize>,
    pub token_weight: Vec<f32>,
    pub transaction_start_index: Vec<usize>,
    pub transaction_typename_id: Vec<usize>,
}

impl Item {
    pub fn transaction_count(&self) -> usize {
        self.transaction_start_index.len().saturating_sub(1)
    }

    pub fn has_transactions(&self) -> bool {
        self.transaction_count() > 0
    }
}

/// An ordered bundle of items with batch-local token arrays.
#[derive(Clone, Debug, Default)]
pub struct Batch {
    pub token: Vec<String>,
    pub class_id: Vec<String>,
    pub transaction_typename: Vec<String>,
    pub items: Vec<Item>,
}

impl Batch {
    pub fn token_size(&self) -> usize {
        self.token.len()
    }

    pub fn item_size(&self) -> usize {
        self.items.len()
    }

    pub fn batch_token(&self, token_id: usize) -> Token {
        Token::new(self.class_id[token_id].clone(), self.token[token_id].clone())
    }

    /// True when any item carries transaction cuts; such batches take the
    /// transaction inner loop instead of the BOW loops.
    pub fn has_transactions(&self) -> bool {
        self.items.iter().any(Item::has_transactions)
    }
}

/// Cached per-item topic distributions for one `(batch, model)` pair.
///
/// When spilled to disk only `filename` (plus the identity fields) stays
/// populated; `item_id` and `theta` are cleared.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ThetaCacheEntry {
    pub batch_uuid: Uuid,
    pub model_name: String,
    pub topic_name: Vec<String>,
    pub item_id: Vec<i64>,
    pub theta: Vec<Vec<f32>>,
    pub filename: Option<PathBuf>,
}

/// The unit of work pulled by a processor worker: one batch plus its
/// stream masks and any theta cache entries carried over from earlier
/// passes.
#[derive(Clone, Debug)]
pub struct ProcessorInput {
    pub batch: Batch,
    pub batch_uuid: Uuid,
    pub batch_weight: f32,
    pub stream_name: Vec<String>,
    pub stream_mask: Vec<Vec<bool>>,
    pub cached_theta: Vec<ThetaCacheEntry>,
}

impl ProcessorInput {
    pub fn new(batch: Batch) -> Self {
        ProcessorInput {
            batch,
            batch_uuid: Uuid::new_v4(),
            batch_weight: 1.0,
            stream_name: Vec::new(),
            stream_mask: Vec::new(),
            cached_theta: Vec::new(),
        }
    }

    /// Index of a named stream, if the input carries it.
    pub fn stream_index(&self, name: &str) -> Option<usize> {
        self.stream_name.iter().position(|s| s == name)
    }
}

/// Result of the one-shot theta query: per-item topic distributions
/// (topics x items) for one model.
#[derive(Clone, Debug)]
pub struct ThetaMatrix {
    pub model_name: String,
    pub topic_name: Vec<String>,
    pub item_id: Vec<i64>,
    pub weights: Mat,
}

/// Arguments of [`crate::processor::Processor::find_theta_matrix`].
#[derive(Clone, Debug)]
pub struct GetThetaMatrixArgs {
    pub model_name: String,
}
