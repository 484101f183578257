use crate::jsonl::read_jsonl;
use crate::models::{DatasetItem, PredictionRecord, Task};
use anyhow::{Result, bail};
use log::{info, warn};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::path::Path;

/// Load a dataset file, keeping the first occurrence of each id
pub fn load_dataset(path: &Path) -> Result<Vec<DatasetItem>> {
    let rows: Vec<DatasetItem> = read_jsonl(path)?;
    let total = rows.len();
    let items = dedupe_items(rows);
    info!(
        "Loaded {} dataset items from {} ({} duplicates dropped)",
        items.len(),
        path.display(),
        total - items.len()
    );
    Ok(items)
}

/// Load a predictions file
pub fn load_predictions(path: &Path) -> Result<Vec<PredictionRecord>> {
    let rows: Vec<PredictionRecord> = read_jsonl(path)?;
    info!("Loaded {} prediction records from {}", rows.len(), path.display());
    Ok(rows)
}

/// Drop repeated ids, first occurrence wins
pub fn dedupe_items(rows: Vec<DatasetItem>) -> Vec<DatasetItem> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|item| {
            let fresh = seen.insert(item.id.clone());
            if !fresh {
                warn!("Duplicate dataset id {:?} dropped", item.id);
            }
            fresh
        })
        .collect()
}

/// Items that belong to `task`. Items without a task field are assumed to.
pub fn items_for_task(items: &[DatasetItem], task: Task) -> Vec<DatasetItem> {
    items
        .iter()
        .filter(|item| item.task.is_none_or(|t| t == task))
        .cloned()
        .collect()
}

/// Draw a reproducible sample of `k` items (all items if `k` exceeds the
/// dataset size). The same seed always yields the same sample.
pub fn sample_items(items: &[DatasetItem], k: usize, seed: u64) -> Result<Vec<DatasetItem>> {
    if items.is_empty() {
        bail!("No valid items to sample from");
    }
    let mut rng = StdRng::seed_from_u64(seed);
    Ok(items
        .choose_multiple(&mut rng, k.min(items.len()))
        .cloned()
        .collect())
}
