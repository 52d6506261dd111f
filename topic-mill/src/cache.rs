//! Theta cache export and the on-disk cache entry format.

use crate::config::InstanceConfig;
use crate::types::{ProcessorInput, ThetaCacheEntry};
use log::error;
use matrix_kit::DenseMatrix;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Serialize a cache entry to `<dir>/<filename>` and return the full
/// path.
pub fn save_cache_entry(
    entry: &ThetaCacheEntry,
    dir: &Path,
    filename: &str,
) -> anyhow::Result<PathBuf> {
    let path = dir.join(filename);
    let bytes = bincode::serialize(entry)?;
    fs::write(&path, bytes)?;
    Ok(path)
}

pub fn load_cache_entry(path: &Path) -> anyhow::Result<ThetaCacheEntry> {
    let bytes = fs::read(path)?;
    Ok(bincode::deserialize(&bytes)?)
}

/// Build the cache entry for one `(batch, model)` pair from the refined
/// theta.
///
/// With `disk_cache_path` set, the entry is spilled to
/// `<dir>/<uuid>.cache` and the in-memory copy keeps only its identity
/// fields plus the filename; a failed write is logged and the full
/// in-memory entry is kept instead.
pub fn export_theta_cache(
    part: &ProcessorInput,
    model_name: &str,
    topic_name: &[String],
    theta: &DenseMatrix,
    instance: &InstanceConfig,
) -> ThetaCacheEntry {
    let batch = &part.batch;
    let topic_size = topic_name.len();

    let mut entry = ThetaCacheEntry {
        batch_uuid: part.batch_uuid,
        model_name: model_name.to_string(),
        topic_name: topic_name.to_vec(),
        item_id: Vec::with_capacity(batch.item_size()),
        theta: Vec::with_capacity(batch.item_size()),
        filename: None,
    };
    for (item_index, item) in batch.items.iter().enumerate() {
        entry.item_id.push(item.id);
        entry.theta.push(
            (0..topic_size)
                .map(|topic_index| theta.get(topic_index, item_index))
                .collect(),
        );
    }

    if let Some(dir) = &instance.disk_cache_path {
        let filename = format!("{}.cache", Uuid::new_v4());
        match save_cache_entry(&entry, dir, &filename) {
            Ok(path) => {
                entry.filename = Some(path);
                entry.theta.clear();
                entry.item_id.clear();
            }
            Err(err) => {
                error!("unable to save cache entry to {}: {err}", dir.display());
            }
        }
    }

    entry
}
