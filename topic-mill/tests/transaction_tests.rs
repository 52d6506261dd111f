use approx::assert_abs_diff_eq;
use topic_mill::model::{IncrementWriter, ModelIncrement};
use topic_mill::prepare::init_theta;
use topic_mill::transaction::infer_theta_and_update_nwt_transaction;
use topic_mill::{
    Batch, InstanceConfig, InstanceSchema, Item, ModelConfig, ProcessorInput, Token, TopicModel,
};

/// One item whose token stream is cut into single-token transactions of
/// the given typename ids.
fn transaction_batch(
    tokens: &[(&str, &str)],
    typenames: &[&str],
    stream: &[(usize, usize)], // (token_id, typename_id) per transaction
) -> Batch {
    let item = Item {
        id: 1,
        token_id: stream.iter().map(|&(t, _)| t).collect(),
        token_weight: vec![1.0; stream.len()],
        transaction_start_index: (0..=stream.len()).collect(),
        transaction_typename_id: stream.iter().map(|&(_, tt)| tt).collect(),
        ..Item::default()
    };
    Batch {
        token: tokens.iter().map(|(_, w)| w.to_string()).collect(),
        class_id: tokens.iter().map(|(c, _)| c.to_string()).collect(),
        transaction_typename: typenames.iter().map(|s| s.to_string()).collect(),
        items: vec![item],
    }
}

fn empty_schema() -> InstanceSchema {
    InstanceSchema::new(InstanceConfig::default())
}

#[test]
fn single_topic_single_transaction_yields_unit_increment() {
    let batch = transaction_batch(&[("c", "a"), ("c", "b")], &["default"], &[(0, 0)]);

    let mut model = TopicModel::new("m", vec!["topic_0".to_string()]);
    model
        .upsert_token(Token::new("c", "a"), vec![0.5])
        .unwrap();
    model
        .upsert_token(Token::new("c", "b"), vec![0.3])
        .unwrap();

    let config = ModelConfig::new("m", 1);
    let schema = empty_schema();
    let part = ProcessorInput::new(batch.clone());

    let mut theta = init_theta(&batch, &config, None);
    let mut increment = ModelIncrement::for_batch(&part, &config, &model);
    let mut writer = IncrementWriter::new(&mut increment, &batch, &model);

    infer_theta_and_update_nwt_transaction(
        &config,
        &batch,
        1.0,
        &model,
        &schema,
        &mut theta,
        Some(&mut writer as &mut dyn topic_mill::model::NwtWriter),
    );

    assert_abs_diff_eq!(theta.get(0, 0), 1.0);
    // token "a" carries the whole transaction mass, token "b" none
    assert_abs_diff_eq!(increment.token_increment[0][0], 1.0);
    assert_abs_diff_eq!(increment.token_increment[1][0], 0.0);
}

#[test]
fn theta_concentrates_on_the_dominant_topic() {
    let batch = transaction_batch(&[("c", "a")], &["default"], &[(0, 0)]);

    let mut model = TopicModel::new("m", vec!["topic_0".to_string(), "topic_1".to_string()]);
    model
        .upsert_token(Token::new("c", "a"), vec![0.9, 0.1])
        .unwrap();

    let mut config = ModelConfig::new("m", 2);
    config.inner_iterations_count = 1; // runs 2 passes
    let schema = empty_schema();

    let mut theta = init_theta(&batch, &config, None);
    infer_theta_and_update_nwt_transaction(
        &config,
        &batch,
        1.0,
        &model,
        &schema,
        &mut theta,
        None,
    );

    let sum: f32 = theta.get(0, 0) + theta.get(1, 0);
    assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-6);
    assert!(theta.get(0, 0) > 0.95);
}

#[test]
fn unlisted_typenames_weigh_zero_when_typenames_are_enumerated() {
    let batch = transaction_batch(
        &[("c", "a"), ("c", "b")],
        &["listed", "unlisted"],
        &[(0, 0), (1, 1)],
    );

    let mut model = TopicModel::new("m", vec!["topic_0".to_string()]);
    model
        .upsert_token(Token::new("c", "a"), vec![0.5])
        .unwrap();
    model
        .upsert_token(Token::new("c", "b"), vec![0.5])
        .unwrap();

    let mut config = ModelConfig::new("m", 1);
    config.transaction_typename = vec!["listed".to_string()];
    config.transaction_weight = vec![2.0];
    let schema = empty_schema();
    let part = ProcessorInput::new(batch.clone());

    let mut theta = init_theta(&batch, &config, None);
    let mut increment = ModelIncrement::for_batch(&part, &config, &model);
    let mut writer = IncrementWriter::new(&mut increment, &batch, &model);

    infer_theta_and_update_nwt_transaction(
        &config,
        &batch,
        1.0,
        &model,
        &schema,
        &mut theta,
        Some(&mut writer as &mut dyn topic_mill::model::NwtWriter),
    );

    // only the listed transaction contributes
    assert!(increment.token_increment[0][0] > 0.0);
    assert_abs_diff_eq!(increment.token_increment[1][0], 0.0);
}

#[test]
fn transactions_over_unknown_tokens_are_skipped_without_nan() {
    let batch = transaction_batch(&[("c", "a"), ("c", "mystery")], &["default"], &[(0, 0), (1, 0)]);

    let mut model = TopicModel::new("m", vec!["topic_0".to_string()]);
    model
        .upsert_token(Token::new("c", "a"), vec![0.5])
        .unwrap();

    let config = ModelConfig::new("m", 1);
    let schema = empty_schema();
    let part = ProcessorInput::new(batch.clone());

    let mut theta = init_theta(&batch, &config, None);
    let mut increment = ModelIncrement::for_batch(&part, &config, &model);
    let mut writer = IncrementWriter::new(&mut increment, &batch, &model);

    infer_theta_and_update_nwt_transaction(
        &config,
        &batch,
        1.0,
        &model,
        &schema,
        &mut theta,
        Some(&mut writer as &mut dyn topic_mill::model::NwtWriter),
    );

    assert!(theta.get(0, 0).is_finite());
    assert!(increment.token_increment[0][0].is_finite());
    assert_abs_diff_eq!(increment.token_increment[0][0], 1.0);
    // the unknown token has no increment row body
    assert!(increment.token_increment[1].is_empty());
}

#[test]
fn batch_weight_scales_the_stored_values() {
    let batch = transaction_batch(&[("c", "a")], &["default"], &[(0, 0)]);

    let mut model = TopicModel::new("m", vec!["topic_0".to_string()]);
    model
        .upsert_token(Token::new("c", "a"), vec![0.5])
        .unwrap();

    let config = ModelConfig::new("m", 1);
    let schema = empty_schema();
    let part = ProcessorInput::new(batch.clone());

    let mut theta = init_theta(&batch, &config, None);
    let mut increment = ModelIncrement::for_batch(&part, &config, &model);
    let mut writer = IncrementWriter::new(&mut increment, &batch, &model);

    infer_theta_and_update_nwt_transaction(
        &config,
        &batch,
        0.25,
        &model,
        &schema,
        &mut theta,
        Some(&mut writer as &mut dyn topic_mill::model::NwtWriter),
    );

    assert_abs_diff_eq!(increment.token_increment[0][0], 0.25);
}
