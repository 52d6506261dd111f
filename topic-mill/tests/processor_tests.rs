use approx::assert_abs_diff_eq;
use std::any::Any;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use topic_mill::schema::ScoreCalculator;
use topic_mill::{
    Batch, Field, GetThetaMatrixArgs, InstanceConfig, InstanceSchema, Item, ModelConfig,
    ModelIncrement, ModelRegistry, IncrementOp, Processor, ProcessorError, ProcessorInput,
    SchemaHolder, ThreadSafeQueue, Token, TopicModel,
};

fn batch_with_tokens(tokens: &[(&str, &str)]) -> Batch {
    Batch {
        token: tokens.iter().map(|(_, w)| w.to_string()).collect(),
        class_id: tokens.iter().map(|(c, _)| c.to_string()).collect(),
        ..Batch::default()
    }
}

fn bow_item(id: i64, pairs: &[(usize, u32)]) -> Item {
    Item {
        id,
        fields: vec![Field {
            token_id: pairs.iter().map(|&(t, _)| t).collect(),
            token_count: pairs.iter().map(|&(_, n)| n).collect(),
        }],
        ..Item::default()
    }
}

fn unit_batch() -> Batch {
    let mut batch = batch_with_tokens(&[("c", "w")]);
    batch.items.push(bow_item(1, &[(0, 1)]));
    batch
}

fn unit_model() -> TopicModel {
    let mut model = TopicModel::new("m", vec!["topic_0".to_string()]);
    model
        .upsert_token(Token::new("c", "w"), vec![1.0])
        .unwrap();
    model
}

struct Harness {
    inputs: Arc<ThreadSafeQueue<ProcessorInput>>,
    increments: Arc<ThreadSafeQueue<ModelIncrement>>,
    schema: Arc<SchemaHolder>,
    processor: Processor,
}

impl Harness {
    fn start(schema: InstanceSchema, models: Vec<TopicModel>) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let inputs = Arc::new(ThreadSafeQueue::new());
        let increments = Arc::new(ThreadSafeQueue::new());
        let registry = Arc::new(ModelRegistry::new());
        for model in models {
            registry.publish(model);
        }
        let schema = Arc::new(SchemaHolder::new(schema));
        let processor = Processor::new(
            inputs.clone(),
            increments.clone(),
            registry.clone(),
            schema.clone(),
        );

        Harness {
            inputs,
            increments,
            schema,
            processor,
        }
    }

    fn push(&self, part: ProcessorInput) {
        self.inputs.push(Arc::new(part));
    }

    fn pop_increment(&self, timeout: Duration) -> Option<Arc<ModelIncrement>> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Some(increment) = self.increments.try_pop() {
                return Some(increment);
            }
            thread::sleep(Duration::from_millis(5));
        }
        None
    }

    fn wait_for_queue_len(&self, len: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.increments.len() == len {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }
}

fn schema_with_models(instance: InstanceConfig, models: Vec<ModelConfig>) -> InstanceSchema {
    let mut schema = InstanceSchema::new(instance);
    for model in models {
        schema.insert_model(model);
    }
    schema
}

#[test]
fn processes_a_minimal_batch_end_to_end() {
    let schema = schema_with_models(
        InstanceConfig::default(),
        vec![ModelConfig::new("m", 1)],
    );
    let harness = Harness::start(schema, vec![unit_model()]);

    let part = ProcessorInput::new(unit_batch());
    let batch_uuid = part.batch_uuid;
    harness.push(part);

    let increment = harness
        .pop_increment(Duration::from_secs(2))
        .expect("one increment per enabled model");

    assert_eq!(increment.model_name, "m");
    assert_eq!(increment.batch_uuid, batch_uuid);
    assert_eq!(increment.operation_type, vec![IncrementOp::IncrementValue]);
    assert_eq!(increment.token_increment.len(), 1);
    assert_abs_diff_eq!(increment.token_increment[0][0], 1.0);
    assert!(increment.score_name.is_empty());
    assert!(increment.cache.is_empty());
}

#[test]
fn unknown_tokens_produce_a_skeleton_increment() {
    let mut model = TopicModel::new("m", vec!["topic_0".to_string()]);
    model
        .upsert_token(Token::new("c", "something_else"), vec![1.0])
        .unwrap();

    let instance = InstanceConfig {
        cache_theta: true,
        ..InstanceConfig::default()
    };
    let schema = schema_with_models(instance, vec![ModelConfig::new("m", 1)]);
    let harness = Harness::start(schema, vec![model]);

    harness.push(ProcessorInput::new(unit_batch()));
    let increment = harness
        .pop_increment(Duration::from_secs(2))
        .expect("skeleton increment is still pushed");

    assert_eq!(
        increment.operation_type,
        vec![IncrementOp::CreateIfNotExist]
    );
    assert!(increment.token_increment[0].is_empty());
    assert!(increment.score_name.is_empty());
    assert!(increment.cache.is_empty());

    // the worker is still alive and processes the next batch
    let mut batch = unit_batch();
    batch.token[0] = "something_else".to_string();
    harness.push(ProcessorInput::new(batch));
    let increment = harness
        .pop_increment(Duration::from_secs(2))
        .expect("worker proceeded to the next batch");
    assert_eq!(increment.operation_type, vec![IncrementOp::IncrementValue]);
}

struct ItemCounter {
    stream: String,
}

impl ScoreCalculator for ItemCounter {
    fn is_cumulative(&self) -> bool {
        true
    }

    fn stream_name(&self) -> &str {
        &self.stream
    }

    fn create_score(&self) -> Box<dyn Any + Send> {
        Box::new(0u64)
    }

    fn append_score(
        &self,
        _item: &Item,
        _token_dict: &[Token],
        _topic_model: &TopicModel,
        _theta_vec: &[f32],
        score: &mut (dyn Any + Send),
    ) {
        if let Some(count) = score.downcast_mut::<u64>() {
            *count += 1;
        }
    }

    fn serialize_score(&self, score: &(dyn Any + Send)) -> anyhow::Result<Vec<u8>> {
        let count = score
            .downcast_ref::<u64>()
            .ok_or_else(|| anyhow::anyhow!("unexpected score type"))?;
        Ok(count.to_le_bytes().to_vec())
    }
}

#[test]
fn an_all_false_stream_mask_zeroes_nwt_but_still_refines_theta() {
    let mut config = ModelConfig::new("m", 1);
    config.stream_name = "train".to_string();
    config.score_name = vec!["items".to_string()];

    let instance = InstanceConfig {
        cache_theta: true,
        ..InstanceConfig::default()
    };
    let mut schema = schema_with_models(instance, vec![config]);
    schema.insert_score_calculator(
        "items",
        Arc::new(ItemCounter {
            stream: "train".to_string(),
        }),
    );
    let harness = Harness::start(schema, vec![unit_model()]);

    let mut part = ProcessorInput::new(unit_batch());
    part.stream_name = vec!["train".to_string()];
    part.stream_mask = vec![vec![false]];
    harness.push(part);

    let increment = harness
        .pop_increment(Duration::from_secs(2))
        .expect("increment is pushed even with an empty stream");

    // nwt is all zeros
    assert_eq!(increment.operation_type, vec![IncrementOp::IncrementValue]);
    assert_abs_diff_eq!(increment.token_increment[0][0], 0.0);

    // theta was still refined over every item
    let cache = &increment.cache[0];
    assert_eq!(cache.item_id, vec![1]);
    assert_abs_diff_eq!(cache.theta[0][0], 1.0);

    // the score saw no in-stream items
    assert_eq!(increment.score_name, vec!["items".to_string()]);
    assert_eq!(increment.score[0], 0u64.to_le_bytes().to_vec());
}

#[test]
fn scores_with_no_stream_restriction_count_every_item() {
    let mut config = ModelConfig::new("m", 1);
    config.score_name = vec!["items".to_string()];

    let mut schema = schema_with_models(InstanceConfig::default(), vec![config]);
    schema.insert_score_calculator(
        "items",
        Arc::new(ItemCounter {
            stream: String::new(),
        }),
    );
    let harness = Harness::start(schema, vec![unit_model()]);

    let mut batch = unit_batch();
    batch.items.push(bow_item(2, &[(0, 2)]));
    harness.push(ProcessorInput::new(batch));

    let increment = harness
        .pop_increment(Duration::from_secs(2))
        .expect("increment with scores");
    assert_eq!(increment.score[0], 2u64.to_le_bytes().to_vec());
}

/// Two-topic fixture for the cache round-trip scenario.
fn two_topic_setup(inner_iterations: usize, reuse_theta: bool) -> (InstanceSchema, TopicModel, Batch) {
    let mut config = ModelConfig::new("m", 2);
    config.inner_iterations_count = inner_iterations;
    config.reuse_theta = reuse_theta;

    let instance = InstanceConfig {
        cache_theta: true,
        ..InstanceConfig::default()
    };
    let schema = schema_with_models(instance, vec![config]);

    let mut model = TopicModel::new("m", vec!["topic_0".to_string(), "topic_1".to_string()]);
    model
        .upsert_token(Token::new("c", "a"), vec![0.7, 0.3])
        .unwrap();
    model
        .upsert_token(Token::new("c", "b"), vec![0.1, 0.9])
        .unwrap();

    let mut batch = batch_with_tokens(&[("c", "a"), ("c", "b")]);
    batch.items.push(bow_item(1, &[(0, 3), (1, 1)]));
    batch.items.push(bow_item(2, &[(1, 2)]));

    (schema, model, batch)
}

#[test]
fn theta_cache_feeds_back_into_the_next_run() {
    let (schema, model, batch) = two_topic_setup(2, false);
    let harness = Harness::start(schema, vec![model]);

    // first pass: two inner iterations, emit the cache
    let part = ProcessorInput::new(batch.clone());
    let batch_uuid = part.batch_uuid;
    harness.push(part);
    let first = harness
        .pop_increment(Duration::from_secs(2))
        .expect("first increment");
    let cache = first.cache[0].clone();
    assert_eq!(cache.batch_uuid, batch_uuid);
    assert_eq!(cache.item_id, vec![1, 2]);

    // second pass: seed theta from the cache and run two more iterations
    let (schema, _, _) = two_topic_setup(2, true);
    harness.schema.set(schema);
    let mut part = ProcessorInput::new(batch.clone());
    part.batch_uuid = batch_uuid;
    part.cached_theta = vec![cache];
    harness.push(part);
    let second = harness
        .pop_increment(Duration::from_secs(2))
        .expect("second increment");

    // reference: four iterations from the cold start
    let (schema, _, _) = two_topic_setup(4, false);
    harness.schema.set(schema);
    harness.push(ProcessorInput::new(batch));
    let reference = harness
        .pop_increment(Duration::from_secs(2))
        .expect("reference increment");

    for (resumed, cold) in second.cache[0].theta.iter().zip(&reference.cache[0].theta) {
        for (&a, &b) in resumed.iter().zip(cold) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-5);
        }
    }
}

#[test]
fn backpressure_holds_the_second_increment_until_the_merger_drains() {
    let instance = InstanceConfig {
        merger_queue_max_size: 1,
        ..InstanceConfig::default()
    };
    let schema = schema_with_models(instance, vec![ModelConfig::new("m", 1)]);
    let harness = Harness::start(schema, vec![unit_model()]);

    let first = ProcessorInput::new(unit_batch());
    let second = ProcessorInput::new(unit_batch());
    let first_uuid = first.batch_uuid;
    let second_uuid = second.batch_uuid;
    harness.push(first);
    harness.push(second);

    assert!(harness.wait_for_queue_len(1, Duration::from_secs(2)));
    // the worker has finished the first batch but must not push the
    // second increment while the queue is at capacity
    thread::sleep(Duration::from_millis(100));
    assert_eq!(harness.increments.len(), 1);

    let drained = harness.increments.try_pop().expect("first increment");
    assert_eq!(drained.batch_uuid, first_uuid);

    let next = harness
        .pop_increment(Duration::from_secs(2))
        .expect("second increment after the drain");
    assert_eq!(next.batch_uuid, second_uuid);
}

#[test]
fn disabled_models_do_not_produce_increments() {
    let mut disabled = ModelConfig::new("off", 1);
    disabled.enabled = false;
    let schema = schema_with_models(
        InstanceConfig::default(),
        vec![disabled, ModelConfig::new("m", 1)],
    );
    let harness = Harness::start(schema, vec![unit_model()]);

    harness.push(ProcessorInput::new(unit_batch()));
    let increment = harness
        .pop_increment(Duration::from_secs(2))
        .expect("enabled model produces an increment");
    assert_eq!(increment.model_name, "m");
    assert!(harness.pop_increment(Duration::from_millis(200)).is_none());
}

#[test]
fn a_malformed_batch_is_fatal_and_produces_no_increment() {
    let schema = schema_with_models(
        InstanceConfig::default(),
        vec![ModelConfig::new("m", 1)],
    );
    let harness = Harness::start(schema, vec![unit_model()]);

    let mut batch = unit_batch();
    batch.class_id.push("stray".to_string()); // class_id_size != token_size
    harness.push(ProcessorInput::new(batch));

    assert!(harness.pop_increment(Duration::from_millis(300)).is_none());
}

#[test]
fn transaction_batches_take_the_transaction_path() {
    let schema = schema_with_models(
        InstanceConfig::default(),
        vec![ModelConfig::new("m", 1)],
    );
    let harness = Harness::start(schema, vec![unit_model()]);

    let mut batch = batch_with_tokens(&[("c", "w")]);
    batch.transaction_typename = vec!["default".to_string()];
    batch.items.push(Item {
        id: 1,
        token_id: vec![0],
        token_weight: vec![1.0],
        transaction_start_index: vec![0, 1],
        transaction_typename_id: vec![0],
        ..Item::default()
    });
    harness.push(ProcessorInput::new(batch));

    let increment = harness
        .pop_increment(Duration::from_secs(2))
        .expect("transaction increment");
    assert_eq!(increment.operation_type, vec![IncrementOp::IncrementValue]);
    assert_abs_diff_eq!(increment.token_increment[0][0], 1.0);
}

#[test]
fn find_theta_matrix_runs_the_inner_loop_without_mask_or_cache() {
    let (schema, model, batch) = two_topic_setup(2, false);
    let harness = Harness::start(schema, vec![model]);

    let theta = harness
        .processor
        .find_theta_matrix(
            &batch,
            &GetThetaMatrixArgs {
                model_name: "m".to_string(),
            },
        )
        .expect("known model");

    assert_eq!(theta.model_name, "m");
    assert_eq!(theta.item_id, vec![1, 2]);
    assert_eq!(theta.weights.nrows(), 2);
    assert_eq!(theta.weights.ncols(), 2);
    for d in 0..2 {
        let sum: f32 = theta.weights.column(d).iter().sum();
        assert_abs_diff_eq!(sum, 1.0, epsilon = 1e-6);
    }
}

#[test]
fn find_theta_matrix_rejects_unknown_models() {
    let (schema, model, batch) = two_topic_setup(1, false);
    let harness = Harness::start(schema, vec![model]);

    let err = harness
        .processor
        .find_theta_matrix(
            &batch,
            &GetThetaMatrixArgs {
                model_name: "nope".to_string(),
            },
        )
        .unwrap_err();
    assert!(matches!(err, ProcessorError::ArgumentOutOfRange(_)));
}
