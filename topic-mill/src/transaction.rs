//! Inner loop for items composed of transactions: higher-order tuples
//! over weighted typenames.
//!
//! A transaction is a contiguous slice `[start, end)` of the item's
//! token stream; its probability under topic `k` is the product of
//! `p_wt` entries over the slice, seeded with the item's current theta.
//! Products are accumulated in `f64` to survive long transactions.

use crate::config::ModelConfig;
use crate::model::{NwtWriter, TopicModel};
use crate::regularize::regularize_theta_item;
use crate::schema::InstanceSchema;
use crate::types::{Batch, Item};
use fnv::FnvHashMap;
use matrix_kit::DenseMatrix;

const TRANSACTION_EPS: f64 = 1e-100;

/// Transaction-type weight lookup: `None` means no typenames are
/// enumerated and every type weighs 1; otherwise unlisted typenames
/// weigh 0.
fn typename_weight_map(config: &ModelConfig) -> Option<FnvHashMap<&str, f32>> {
    if config.transaction_typename.is_empty() {
        return None;
    }
    let mut map = FnvHashMap::default();
    for (name, &weight) in config
        .transaction_typename
        .iter()
        .zip(&config.transaction_weight)
    {
        map.insert(name.as_str(), weight);
    }
    Some(map)
}

fn typename_weight(map: &Option<FnvHashMap<&str, f32>>, name: &str) -> f32 {
    match map {
        None => 1.0,
        Some(map) => map.get(name).copied().unwrap_or(0.0),
    }
}

/// `init_value * prod_{i in [start, end)} p_wt[token_i, topic]`.
///
/// A token unknown to the model zeroes the whole product; the enclosing
/// transaction then falls under the epsilon guard and is skipped.
fn compute_ptdx(
    item: &Item,
    init_value: f32,
    start: usize,
    end: usize,
    topic: usize,
    local_to_global: &[Option<usize>],
    p_wt: &TopicModel,
) -> f64 {
    let mut value = init_value as f64;
    for idx in start..end {
        match local_to_global[item.token_id[idx]] {
            Some(global) => value *= p_wt.get(global, topic) as f64,
            None => return 0.0,
        }
    }
    value
}

struct TransactionTerm {
    start: usize,
    end: usize,
    token_weight: f64,
    type_weight: f64,
}

fn transaction_term(
    batch: &Batch,
    item: &Item,
    t_index: usize,
    tt_weights: &Option<FnvHashMap<&str, f32>>,
) -> TransactionTerm {
    let start = item.transaction_start_index[t_index];
    let end = item.transaction_start_index[t_index + 1];
    let tt_name = &batch.transaction_typename[item.transaction_typename_id[t_index]];
    TransactionTerm {
        start,
        end,
        token_weight: item.token_weight[start] as f64,
        type_weight: typename_weight(tt_weights, tt_name) as f64,
    }
}

/// Refine `theta` over the transaction structure and, when a writer is
/// supplied, emit the `n_wt` contributions through it.
///
/// The refinement runs `inner_iterations_count + 1` passes per document;
/// the extra pass relative to the BOW loops is deliberate.
pub fn infer_theta_and_update_nwt_transaction(
    model_config: &ModelConfig,
    batch: &Batch,
    batch_weight: f32,
    p_wt: &TopicModel,
    schema: &InstanceSchema,
    theta: &mut DenseMatrix,
    nwt_writer: Option<&mut dyn NwtWriter>,
) {
    let num_topics = p_wt.topic_size();

    let local_to_global: Vec<Option<usize>> = (0..batch.token_size())
        .map(|local| p_wt.token_index(&batch.batch_token(local)))
        .collect();
    let tt_weights = typename_weight_map(model_config);

    let mut helper = vec![0.0f64; num_topics];
    let mut n_td = vec![0.0f32; num_topics];

    for (d, item) in batch.items.iter().enumerate() {
        for inner_iter in 0..=model_config.inner_iterations_count {
            n_td.fill(0.0);

            for t_index in 0..item.transaction_count() {
                let term = transaction_term(batch, item, t_index, &tt_weights);

                let mut p_dx = 0.0f64;
                for (k, h) in helper.iter_mut().enumerate() {
                    *h = compute_ptdx(
                        item,
                        theta.get(k, d),
                        term.start,
                        term.end,
                        k,
                        &local_to_global,
                        p_wt,
                    );
                    p_dx += *h;
                }
                if p_dx.abs() < TRANSACTION_EPS {
                    continue;
                }

                for (acc, &h) in n_td.iter_mut().zip(helper.iter()) {
                    *acc += (term.type_weight * term.token_weight * h / p_dx) as f32;
                }
            }

            for (k, &v) in n_td.iter().enumerate() {
                theta.set(k, d, v);
            }
            regularize_theta_item(inner_iter, item, d, model_config, schema, theta);
        }
    }

    let Some(writer) = nwt_writer else {
        return;
    };

    for (d, item) in batch.items.iter().enumerate() {
        for t_index in 0..item.transaction_count() {
            let term = transaction_term(batch, item, t_index, &tt_weights);

            let mut p_dx = 0.0f64;
            for (k, h) in helper.iter_mut().enumerate() {
                *h = compute_ptdx(
                    item,
                    theta.get(k, d),
                    term.start,
                    term.end,
                    k,
                    &local_to_global,
                    p_wt,
                );
                p_dx += *h;
            }
            if p_dx.abs() < TRANSACTION_EPS {
                continue;
            }

            let values: Vec<f32> = helper
                .iter()
                .map(|&h| (term.type_weight * h * term.token_weight * batch_weight as f64 / p_dx) as f32)
                .collect();

            for idx in term.start..term.end {
                if let Some(global) = local_to_global[item.token_id[idx]] {
                    writer.store(global, &values);
                }
            }
        }
    }
}
