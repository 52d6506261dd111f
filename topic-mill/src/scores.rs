//! Score accumulation over the items of one batch.

use crate::config::ModelConfig;
use crate::model::{ModelIncrement, TopicModel};
use crate::schema::{InstanceSchema, ScoreCalculator};
use crate::stream::StreamIterator;
use crate::types::{ProcessorInput, Token};
use log::error;
use matrix_kit::DenseMatrix;
use std::any::Any;
use std::sync::Arc;

/// Accumulate every cumulative score the model config requests and
/// attach the serialized results to the increment.
///
/// Missing calculators are logged and skipped; non-cumulative scores are
/// dropped silently.
pub fn compute_scores(
    part: &ProcessorInput,
    model_config: &ModelConfig,
    schema: &InstanceSchema,
    topic_model: &TopicModel,
    theta: &DenseMatrix,
    increment: &mut ModelIncrement,
) {
    let mut container: Vec<(String, Arc<dyn ScoreCalculator>, Box<dyn Any + Send>)> = Vec::new();
    for score_name in &model_config.score_name {
        let Some(calc) = schema.score_calculator(score_name) else {
            error!(
                "unable to find score calculator <{score_name}> referenced by model <{}>",
                model_config.name
            );
            continue;
        };
        if !calc.is_cumulative() {
            continue;
        }
        container.push((score_name.clone(), calc.clone(), calc.create_score()));
    }
    if container.is_empty() {
        return;
    }

    let batch = &part.batch;
    let topic_size = topic_model.topic_size();
    let token_dict: Vec<Token> = (0..batch.token_size())
        .map(|token_id| batch.batch_token(token_id))
        .collect();

    let mut iter = StreamIterator::new(part);
    while let Some(item) = iter.next() {
        let item_index = iter.item_index().expect("cursor is on an item");
        for (_, calc, score) in container.iter_mut() {
            if !iter.in_stream(calc.stream_name()) {
                continue;
            }
            let theta_vec: Vec<f32> = (0..topic_size)
                .map(|topic_index| theta.get(topic_index, item_index))
                .collect();
            calc.append_score(item, &token_dict, topic_model, &theta_vec, score.as_mut());
        }
    }

    for (score_name, calc, score) in container {
        match calc.serialize_score(score.as_ref()) {
            Ok(bytes) => {
                increment.score_name.push(score_name);
                increment.score.push(bytes);
            }
            Err(err) => error!("unable to serialize score <{score_name}>: {err}"),
        }
    }
}
