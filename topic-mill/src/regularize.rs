//! Theta regularization and normalization, applied after every inner
//! iteration's multiplicative update.

use crate::config::ModelConfig;
use crate::prepare::WEIGHT_EPS;
use crate::schema::InstanceSchema;
use crate::types::{Batch, Item};
use log::error;
use matrix_kit::DenseMatrix;

/// Regularize and normalize one item's theta column in place.
///
/// The column is copied into a scratch vector, passed through every
/// configured regularizer (missing regularizers and `false` returns are
/// logged and skipped), clipped at zero, normalized to sum 1 (or zeroed
/// when all mass is gone), snapped below [`WEIGHT_EPS`], and written
/// back.
pub fn regularize_theta_item(
    inner_iter: usize,
    item: &Item,
    item_index: usize,
    model_config: &ModelConfig,
    schema: &InstanceSchema,
    theta: &mut DenseMatrix,
) {
    let topic_size = model_config.topics_count;

    let mut theta_next: Vec<f32> = (0..topic_size)
        .map(|topic_index| theta.get(topic_index, item_index))
        .collect();

    for (reg_name, &tau) in model_config
        .regularizer_name
        .iter()
        .zip(&model_config.regularizer_tau)
    {
        match schema.regularizer(reg_name) {
            Some(regularizer) => {
                let ok = regularizer.regularize_theta(
                    item,
                    &mut theta_next,
                    &model_config.topic_name,
                    inner_iter,
                    tau,
                );
                if !ok {
                    error!(
                        "theta regularizer <{reg_name}> rejected its parameters, \
                         turned off for this iteration"
                    );
                }
            }
            None => {
                error!("theta regularizer <{reg_name}> does not exist");
            }
        }
    }

    for v in theta_next.iter_mut() {
        if *v < 0.0 {
            *v = 0.0;
        }
    }

    let sum: f32 = theta_next.iter().sum();
    for (topic_index, &v) in theta_next.iter().enumerate() {
        let mut val = if sum > 0.0 { v / sum } else { 0.0 };
        if val < WEIGHT_EPS {
            val = 0.0;
        }
        theta.set(topic_index, item_index, val);
    }
}

/// Apply [`regularize_theta_item`] to every item column of `theta`.
pub fn regularize_and_normalize_theta(
    inner_iter: usize,
    batch: &Batch,
    model_config: &ModelConfig,
    schema: &InstanceSchema,
    theta: &mut DenseMatrix,
) {
    for (item_index, item) in batch.items.iter().enumerate() {
        regularize_theta_item(inner_iter, item, item_index, model_config, schema, theta);
    }
}
