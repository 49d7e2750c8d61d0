use crate::controller::binding::{JobBinding, TaskStream};
use crate::storage::store::FeatureStore;
use crate::storage::types::RegionRecord;
use crate::task::types::{ExtractedRegion, ImageId, RowId, Task, TaskResult};

use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use std::sync::Arc;

/// Extracts local features for every image that has none yet.
pub struct FeatureExtractionJob<S> {
    store: Arc<S>,
    image_root: PathBuf,
    /// Index of the last region written; the next region goes right after it.
    reg_last: Option<RowId>,
    processed: u64,
    failed: u64,
}

impl<S: FeatureStore + 'static> FeatureExtractionJob<S> {
    /// Image paths in tasks are `image_root` joined with the stored file name.
    pub fn new(store: Arc<S>, image_root: impl Into<PathBuf>) -> Self {
        let reg_last = store.last_region_index();
        Self {
            store,
            image_root: image_root.into(),
            reg_last,
            processed: 0,
            failed: 0,
        }
    }

    /// Images whose regions were stored by this job.
    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Images the extractor failed on; they stay pending.
    pub fn failed(&self) -> u64 {
        self.failed
    }

    fn store_regions(&mut self, key: ImageId, regions: Vec<ExtractedRegion>) -> Result<()> {
        let image = self
            .store
            .image(key)?
            .with_context(|| format!("result for unknown image {}", key))?;

        let first = self.reg_last.map_or(0, |last| last + 1);
        let count = regions.len() as u64;

        for (offset, region) in regions.into_iter().enumerate() {
            self.store.append_region(RegionRecord {
                index: first + offset as u64,
                image: key,
                class: image.class,
                center: region.center,
                radius: region.radius,
                cornerness: region.cornerness,
                descriptor: region.descriptor,
                neighbors: None,
            })?;
        }
        if count > 0 {
            self.reg_last = Some(first + count - 1);
        }

        self.store
            .set_image_regions(key, count, (count > 0).then_some(first))?;
        self.processed += 1;

        tracing::debug!(
            "Image {} ({}): {} regions",
            key,
            image.file_name.display(),
            count
        );
        Ok(())
    }
}

impl<S: FeatureStore + 'static> JobBinding for FeatureExtractionJob<S> {
    fn name(&self) -> &str {
        "feature-extraction"
    }

    fn task_stream(&mut self) -> Result<TaskStream> {
        let pending = self.store.images_without_features()?;
        let root = self.image_root.clone();
        let total = pending.len();

        let tasks = pending.into_iter().map(move |image| {
            Ok(Task::Extract {
                image: root.join(&image.file_name),
                key: image.index,
            })
        });
        Ok(TaskStream::new(total, tasks))
    }

    fn handle_result(&mut self, result: TaskResult, checkpoint: bool) -> Result<()> {
        match result {
            TaskResult::Extract {
                key,
                outcome: Ok(regions),
            } => self.store_regions(key, regions)?,
            TaskResult::Extract {
                key,
                outcome: Err(failure),
            } => {
                self.failed += 1;
                tracing::warn!("Feature extraction failed for image {}: {}", key, failure);
            }
            other => bail!("feature extraction received an unexpected result: {:?}", other),
        }

        if checkpoint {
            self.checkpoint()?;
        }
        Ok(())
    }

    fn checkpoint(&mut self) -> Result<()> {
        self.store.flush().context("flushing feature store")
    }
}
