//! The processor worker: pulls [`ProcessorInput`]s, runs the inner loop
//! for every enabled model, and hands [`ModelIncrement`]s to the merger
//! queue under backpressure.

use crate::cache::export_theta_cache;
use crate::config::ModelConfig;
use crate::em::{calculate_nwt_dense, calculate_nwt_sparse};
use crate::error::ProcessorError;
use crate::model::{
    IncrementOp, IncrementWriter, ModelIncrement, TopicModel, TopicModelProvider,
};
use crate::prepare::{build_dense_ndw, build_sparse_ndw, find_cache_entry, init_phi, init_theta};
use crate::queue::ThreadSafeQueue;
use crate::schema::{InstanceSchema, SchemaHolder};
use crate::scores::compute_scores;
use crate::transaction::infer_theta_and_update_nwt_transaction;
use crate::types::{Batch, GetThetaMatrixArgs, Mat, ProcessorInput, ThetaMatrix};
use log::{error, info, warn};
use matrix_kit::{blas, Blas, DenseMatrix};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Sleep period at the two suspension points: empty processor queue and
/// full merger queue.
pub const IDLE_LOOP_FREQUENCY: Duration = Duration::from_millis(20);

const POP_RETRIES_MAX: usize = 20;
const PUSH_RETRIES_MAX: usize = 50;

/// One worker on a dedicated thread. Construction spawns the thread;
/// dropping the processor signals stop and joins.
///
/// Several processors may share the same pair of queues: the processor
/// queue is consumed by all of them, the merger queue fed by all of them.
pub struct Processor {
    models: Arc<dyn TopicModelProvider>,
    schema: Arc<SchemaHolder>,
    is_stopping: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Processor {
    pub fn new(
        processor_queue: Arc<ThreadSafeQueue<ProcessorInput>>,
        merger_queue: Arc<ThreadSafeQueue<ModelIncrement>>,
        models: Arc<dyn TopicModelProvider>,
        schema: Arc<SchemaHolder>,
    ) -> Self {
        let is_stopping = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            processor_queue,
            merger_queue,
            models: models.clone(),
            schema: schema.clone(),
            is_stopping: is_stopping.clone(),
        };
        let handle = thread::Builder::new()
            .name("processor".to_string())
            .spawn(move || worker.run())
            .expect("spawn processor thread");

        Processor {
            models,
            schema,
            is_stopping,
            handle: Some(handle),
        }
    }

    /// Cooperative stop: the worker finishes its current batch, pushes
    /// all deferred increments, and exits.
    pub fn stop(&self) {
        self.is_stopping.store(true, Ordering::SeqCst);
    }

    /// One-shot query: run preparation and the inner loop for one batch
    /// against the latest snapshot of the named model, with no stream
    /// mask and no theta cache, and return the refined theta.
    pub fn find_theta_matrix(
        &self,
        batch: &Batch,
        args: &GetThetaMatrixArgs,
    ) -> Result<ThetaMatrix, ProcessorError> {
        let blas = blas::preferred();

        let topic_model = self.models.latest(&args.model_name).ok_or_else(|| {
            ProcessorError::ArgumentOutOfRange(format!(
                "unable to find topic model <{}>",
                args.model_name
            ))
        })?;
        let schema = self.schema.get();
        let model_config = schema.model_config(&args.model_name).ok_or_else(|| {
            ProcessorError::ArgumentOutOfRange(format!(
                "unable to find model config <{}>",
                args.model_name
            ))
        })?;

        if batch.class_id.len() != batch.token_size() {
            return Err(ProcessorError::Internal(
                "batch class_id size != batch token size".to_string(),
            ));
        }
        if model_config.class_id.len() != model_config.class_weight.len() {
            return Err(ProcessorError::Internal(
                "model class_id size != model class_weight size".to_string(),
            ));
        }
        let topic_size = topic_model.topic_size();
        if topic_size != model_config.topics_count {
            return Err(ProcessorError::Internal(
                "topics count mismatch between model config and model snapshot".to_string(),
            ));
        }

        let mut theta = init_theta(batch, model_config, None);

        if batch.has_transactions() {
            if !batch_has_known_tokens(batch, &topic_model) {
                info!(
                    "phi is empty, model <{}> is not processed for this batch",
                    args.model_name
                );
                return Ok(empty_theta_matrix(&args.model_name, &topic_model));
            }
            infer_theta_and_update_nwt_transaction(
                model_config,
                batch,
                1.0,
                &topic_model,
                &schema,
                &mut theta,
                None,
            );
        } else {
            let Some(phi) = init_phi(batch, &topic_model) else {
                info!(
                    "phi is empty, model <{}> is not processed for this batch",
                    args.model_name
                );
                return Ok(empty_theta_matrix(&args.model_name, &topic_model));
            };

            if model_config.use_sparse_bow {
                let sparse_ndw = build_sparse_ndw(batch, model_config)
                    .map_err(|err| ProcessorError::Internal(err.to_string()))?;
                calculate_nwt_sparse(
                    model_config,
                    batch,
                    None,
                    &schema,
                    &sparse_ndw,
                    &phi,
                    &mut theta,
                    blas,
                );
            } else {
                let dense_ndw = build_dense_ndw(batch, model_config);
                calculate_nwt_dense(
                    model_config,
                    batch,
                    None,
                    &schema,
                    &dense_ndw,
                    &phi,
                    &mut theta,
                    blas,
                );
            }
        }

        Ok(ThetaMatrix {
            model_name: args.model_name.clone(),
            topic_name: topic_model.topic_name().to_vec(),
            item_id: batch.items.iter().map(|item| item.id).collect(),
            weights: Mat::from_fn(topic_size, batch.item_size(), |k, d| theta.get(k, d)),
        })
    }
}

impl Drop for Processor {
    fn drop(&mut self) {
        self.is_stopping.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn empty_theta_matrix(model_name: &str, topic_model: &TopicModel) -> ThetaMatrix {
    ThetaMatrix {
        model_name: model_name.to_string(),
        topic_name: topic_model.topic_name().to_vec(),
        item_id: Vec::new(),
        weights: Mat::zeros(0, 0),
    }
}

fn batch_has_known_tokens(batch: &Batch, topic_model: &TopicModel) -> bool {
    (0..batch.token_size()).any(|token_id| topic_model.has_token(&batch.batch_token(token_id)))
}

struct Worker {
    processor_queue: Arc<ThreadSafeQueue<ProcessorInput>>,
    merger_queue: Arc<ThreadSafeQueue<ModelIncrement>>,
    models: Arc<dyn TopicModelProvider>,
    schema: Arc<SchemaHolder>,
    is_stopping: Arc<AtomicBool>,
}

impl Worker {
    fn run(self) {
        let blas = blas::preferred();
        info!("processor thread started");

        let mut total_processed_batches = 0usize;
        let mut pop_retries = 0usize;

        loop {
            if self.is_stopping.load(Ordering::SeqCst) {
                info!("processor thread stopped");
                info!("total number of processed batches: {total_processed_batches}");
                break;
            }

            let Some(part) = self.processor_queue.try_pop() else {
                pop_retries += 1;
                if pop_retries == POP_RETRIES_MAX {
                    info!("no data in the processing queue, waiting...");
                }
                thread::sleep(IDLE_LOOP_FREQUENCY);
                continue;
            };
            if pop_retries >= POP_RETRIES_MAX {
                info!("processing queue has data, processing started");
            }
            pop_retries = 0;

            let started = Instant::now();
            total_processed_batches += 1;

            let (increments, result) = self.process_batch(&part, blas);
            self.flush_increments(increments);
            info!(
                "batch {} processed in {} ms",
                part.batch_uuid,
                started.elapsed().as_millis()
            );

            if let Err(err) = result {
                error!("fatal error while processing batch {}: {err}", part.batch_uuid);
                break;
            }
        }
    }

    /// Process every enabled model against one input.
    ///
    /// Every increment created along the way is returned for flushing —
    /// including the one belonging to a model that failed fatally — so
    /// the merger sees exactly one record per enabled model per batch.
    fn process_batch(
        &self,
        part: &ProcessorInput,
        blas: &dyn Blas,
    ) -> (Vec<ModelIncrement>, Result<(), ProcessorError>) {
        let mut increments = Vec::new();
        let batch = &part.batch;

        if batch.class_id.len() != batch.token_size() {
            return (
                increments,
                Err(ProcessorError::Internal(
                    "batch class_id size != batch token size".to_string(),
                )),
            );
        }

        let schema = self.schema.get();
        let mut shared_dense_ndw: Option<DenseMatrix> = None;

        for model_name in schema.model_names() {
            let Some(model_config) = schema.model_config(&model_name) else {
                continue;
            };
            if !model_config.enabled {
                continue;
            }

            let result = self.process_model(
                part,
                model_config,
                &schema,
                &mut shared_dense_ndw,
                &mut increments,
                blas,
            );
            if let Err(err) = result {
                return (increments, Err(err));
            }
        }

        (increments, Ok(()))
    }

    fn process_model(
        &self,
        part: &ProcessorInput,
        model_config: &ModelConfig,
        schema: &InstanceSchema,
        shared_dense_ndw: &mut Option<DenseMatrix>,
        increments: &mut Vec<ModelIncrement>,
        blas: &dyn Blas,
    ) -> Result<(), ProcessorError> {
        let batch = &part.batch;

        if model_config.class_id.len() != model_config.class_weight.len() {
            return Err(ProcessorError::Internal(format!(
                "model <{}>: class_id size != class_weight size",
                model_config.name
            )));
        }

        let topic_model = self.models.latest(&model_config.name).ok_or_else(|| {
            ProcessorError::Internal(format!(
                "no topic model snapshot published for <{}>",
                model_config.name
            ))
        })?;
        let topic_size = topic_model.topic_size();
        if topic_size != model_config.topics_count {
            return Err(ProcessorError::Internal(format!(
                "topics count mismatch between model config and model snapshot <{}>",
                model_config.name
            )));
        }

        let use_transactions = batch.has_transactions();

        let sparse_ndw = if !use_transactions && model_config.use_sparse_bow {
            Some(
                build_sparse_ndw(batch, model_config)
                    .map_err(|err| ProcessorError::Internal(err.to_string()))?,
            )
        } else {
            None
        };

        // The dense n_dw is config-independent when no classes are
        // enumerated, so it can be shared by every such model.
        let mut local_dense_ndw: Option<DenseMatrix> = None;
        let dense_ndw: Option<&DenseMatrix> = if !use_transactions && !model_config.use_sparse_bow {
            if model_config.class_id.is_empty() {
                if shared_dense_ndw.is_none() {
                    *shared_dense_ndw = Some(build_dense_ndw(batch, model_config));
                }
                shared_dense_ndw.as_ref()
            } else {
                local_dense_ndw = Some(build_dense_ndw(batch, model_config));
                local_dense_ndw.as_ref()
            }
        } else {
            None
        };

        let cache = find_cache_entry(part, model_config);
        let mut theta = init_theta(batch, model_config, cache);

        // From here on the increment is queued for flushing no matter how
        // this model ends, empty-phi skip and fatal error included.
        increments.push(ModelIncrement::for_batch(part, model_config, &topic_model));
        let increment = increments.last_mut().expect("increment just pushed");

        if use_transactions {
            if !batch_has_known_tokens(batch, &topic_model) {
                info!(
                    "phi is empty, model <{}> is not processed for this batch",
                    model_config.name
                );
                return Ok(());
            }
            let mut writer = IncrementWriter::new(increment, batch, &topic_model);
            infer_theta_and_update_nwt_transaction(
                model_config,
                batch,
                part.batch_weight,
                &topic_model,
                schema,
                &mut theta,
                Some(&mut writer),
            );
        } else {
            let Some(phi) = init_phi(batch, &topic_model) else {
                info!(
                    "phi is empty, model <{}> is not processed for this batch",
                    model_config.name
                );
                return Ok(());
            };

            let mask: Option<&[bool]> = part
                .stream_index(&model_config.stream_name)
                .map(|stream| part.stream_mask[stream].as_slice());

            let n_wt = if model_config.use_sparse_bow {
                calculate_nwt_sparse(
                    model_config,
                    batch,
                    mask,
                    schema,
                    sparse_ndw.as_ref().expect("sparse n_dw prepared above"),
                    &phi,
                    &mut theta,
                    blas,
                )
            } else {
                calculate_nwt_dense(
                    model_config,
                    batch,
                    mask,
                    schema,
                    dense_ndw.expect("dense n_dw prepared above"),
                    &phi,
                    &mut theta,
                    blas,
                )
            };

            for token_id in 0..n_wt.nrows() {
                if increment.token_increment[token_id].is_empty() {
                    continue;
                }
                if increment.token_increment[token_id].len() != topic_size {
                    return Err(ProcessorError::Internal(
                        "token increment row length != topics count".to_string(),
                    ));
                }
                if increment.operation_type[token_id] == IncrementOp::IncrementValue {
                    increment.token_increment[token_id].copy_from_slice(n_wt.row_slice(token_id));
                }
            }
        }

        if schema.config().cache_theta {
            let entry = export_theta_cache(
                part,
                &model_config.name,
                topic_model.topic_name(),
                &theta,
                schema.config(),
            );
            increment.cache.push(entry);
        }

        compute_scores(part, model_config, schema, &topic_model, &theta, increment);

        Ok(())
    }

    /// Backpressure against the merger: wait until the queue is below its
    /// bound, then enqueue every deferred increment in order. A stop
    /// request overrides the wait so the increments still reach the
    /// merger before the worker exits.
    fn flush_increments(&self, increments: Vec<ModelIncrement>) {
        if increments.is_empty() {
            return;
        }

        let max_size = self.schema.get().config().merger_queue_max_size;
        let mut push_retries = 0usize;
        loop {
            if self.merger_queue.len() < max_size {
                break;
            }
            if self.is_stopping.load(Ordering::SeqCst) {
                break;
            }
            push_retries += 1;
            if push_retries == PUSH_RETRIES_MAX {
                warn!("merger queue is full, waiting...");
            }
            thread::sleep(IDLE_LOOP_FREQUENCY);
        }
        if push_retries >= PUSH_RETRIES_MAX {
            warn!("merger queue is healthy again");
        }

        for increment in increments {
            self.merger_queue.push(Arc::new(increment));
        }
    }
}
