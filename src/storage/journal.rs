//! Journaled Feature Store
//!
//! In-memory tables backed by an append-only journal of length-prefixed bincode frames.
//! Reopening the store replays the journal. A frame cut short by a crash is dropped and
//! the file truncated back to the last complete frame.

use super::error::StoreError;
use super::store::FeatureStore;
use super::types::{ImageRecord, JournalEntry, RegionRecord};
use crate::task::types::{ImageId, Neighbor, RowId};

use dashmap::DashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

const FRAME_HEADER: usize = 4;

pub struct JournalStore {
    images: DashMap<ImageId, ImageRecord>,
    regions: DashMap<RowId, RegionRecord>,
    /// One past the highest image index.
    next_image: AtomicU64,
    /// One past the highest region index; zero when there are no regions.
    region_end: AtomicU64,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl JournalStore {
    /// A store that lives only in memory; `flush` is a no-op.
    pub fn in_memory() -> Self {
        Self {
            images: DashMap::new(),
            regions: DashMap::new(),
            next_image: AtomicU64::new(0),
            region_end: AtomicU64::new(0),
            writer: Mutex::new(None),
        }
    }

    /// Opens (or creates) the journal at `path` and replays it.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let store = Self::in_memory();

        if path.exists() {
            let bytes = std::fs::read(path)?;
            let (entries, valid_len) = decode_frames(&bytes);

            if valid_len < bytes.len() {
                tracing::warn!(
                    "Discarding {} bytes of incomplete journal tail in {}",
                    bytes.len() - valid_len,
                    path.display()
                );
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(valid_len as u64)?;
                file.sync_all()?;
            }

            let replayed = entries.len();
            for entry in entries {
                store.apply(entry);
            }

            let orphans = store.discard_orphan_regions();
            if orphans > 0 {
                tracing::warn!(
                    "Discarded {} regions of images whose extraction never completed",
                    orphans
                );
            }
            tracing::info!(
                "Replayed {} journal records from {} ({} images, {} regions)",
                replayed,
                path.display(),
                store.images.len(),
                store.regions.len()
            );
        } else if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        *store.writer.lock().map_err(|_| StoreError::Poisoned)? = Some(BufWriter::new(file));

        Ok(store)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    pub fn region(&self, row: RowId) -> Option<RegionRecord> {
        self.regions.get(&row).map(|entry| entry.value().clone())
    }

    /// Image file names already registered, for idempotent imports.
    pub fn known_files(&self) -> std::collections::HashSet<std::path::PathBuf> {
        self.images
            .iter()
            .map(|entry| entry.value().file_name.clone())
            .collect()
    }

    /// Drops regions outside the back-filled range of their image.
    ///
    /// Region frames of an image reach the journal before its region count, so a crash in
    /// between leaves regions for an image that is still pending. The re-run writes them
    /// again, so only regions an image has claimed are kept.
    fn discard_orphan_regions(&self) -> usize {
        let orphans: Vec<RowId> = self
            .regions
            .iter()
            .filter(|entry| !self.claims(entry.value()))
            .map(|entry| *entry.key())
            .collect();
        for row in &orphans {
            self.regions.remove(row);
        }

        let end = self
            .regions
            .iter()
            .map(|entry| *entry.key() + 1)
            .max()
            .unwrap_or(0);
        self.region_end.store(end, Ordering::SeqCst);
        orphans.len()
    }

    fn claims(&self, region: &RegionRecord) -> bool {
        self.images
            .get(&region.image)
            .and_then(|image| image.reg_first.zip(image.reg_count))
            .is_some_and(|(first, count)| region.index >= first && region.index < first + count)
    }

    fn record(&self, entry: JournalEntry) -> Result<(), StoreError> {
        {
            let mut writer = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
            if let Some(writer) = writer.as_mut() {
                let bytes = bincode::serialize(&entry)?;
                writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
                writer.write_all(&bytes)?;
            }
        }
        self.apply(entry);
        Ok(())
    }

    fn apply(&self, entry: JournalEntry) {
        match entry {
            JournalEntry::Image(image) => {
                self.next_image.fetch_max(image.index + 1, Ordering::SeqCst);
                self.images.insert(image.index, image);
            }
            JournalEntry::ImageRegions {
                image,
                count,
                first,
            } => {
                if let Some(mut record) = self.images.get_mut(&image) {
                    record.reg_count = Some(count);
                    record.reg_first = first;
                }
            }
            JournalEntry::Region(region) => {
                self.region_end.fetch_max(region.index + 1, Ordering::SeqCst);
                self.regions.insert(region.index, region);
            }
            JournalEntry::Neighbors { row, neighbors } => {
                if let Some(mut record) = self.regions.get_mut(&row) {
                    record.neighbors = Some(neighbors);
                }
            }
        }
    }
}

/// Splits a journal into entries; returns them with the length of the intact prefix.
fn decode_frames(bytes: &[u8]) -> (Vec<JournalEntry>, usize) {
    let mut entries = Vec::new();
    let mut offset = 0;

    while offset + FRAME_HEADER <= bytes.len() {
        let mut len = [0u8; FRAME_HEADER];
        len.copy_from_slice(&bytes[offset..offset + FRAME_HEADER]);
        let len = u32::from_le_bytes(len) as usize;

        let start = offset + FRAME_HEADER;
        let Some(frame) = bytes.get(start..start + len) else {
            break;
        };
        match bincode::deserialize::<JournalEntry>(frame) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                tracing::warn!("Corrupt journal frame at byte {}: {}", offset, e);
                break;
            }
        }
        offset = start + len;
    }

    (entries, offset)
}

impl FeatureStore for JournalStore {
    fn add_image(&self, file_name: &Path, class: Option<u8>) -> Result<ImageId, StoreError> {
        let index = self.next_image.load(Ordering::SeqCst);
        self.record(JournalEntry::Image(ImageRecord {
            index,
            file_name: file_name.to_path_buf(),
            class,
            reg_first: None,
            reg_count: None,
        }))?;
        Ok(index)
    }

    fn image(&self, image: ImageId) -> Result<Option<ImageRecord>, StoreError> {
        Ok(self.images.get(&image).map(|entry| entry.value().clone()))
    }

    fn images_without_features(&self) -> Result<Vec<ImageRecord>, StoreError> {
        let mut pending: Vec<ImageRecord> = self
            .images
            .iter()
            .filter(|entry| !entry.value().has_features())
            .map(|entry| entry.value().clone())
            .collect();
        pending.sort_by_key(|image| image.index);
        Ok(pending)
    }

    fn has_features(&self, image: ImageId) -> Result<bool, StoreError> {
        self.images
            .get(&image)
            .map(|entry| entry.value().has_features())
            .ok_or(StoreError::UnknownImage(image))
    }

    fn last_region_index(&self) -> Option<RowId> {
        self.region_end.load(Ordering::SeqCst).checked_sub(1)
    }

    fn append_region(&self, region: RegionRecord) -> Result<RowId, StoreError> {
        if self.regions.contains_key(&region.index) {
            return Err(StoreError::DuplicateRegion(region.index));
        }
        if !self.images.contains_key(&region.image) {
            return Err(StoreError::UnknownImage(region.image));
        }
        let index = region.index;
        self.record(JournalEntry::Region(region))?;
        Ok(index)
    }

    fn set_image_regions(
        &self,
        image: ImageId,
        count: u64,
        first: Option<RowId>,
    ) -> Result<(), StoreError> {
        if !self.images.contains_key(&image) {
            return Err(StoreError::UnknownImage(image));
        }
        self.record(JournalEntry::ImageRegions {
            image,
            count,
            first,
        })
    }

    fn regions_without_neighbors(&self) -> Result<Vec<RowId>, StoreError> {
        let mut pending: Vec<RowId> = self
            .regions
            .iter()
            .filter(|entry| entry.value().neighbors.is_none())
            .map(|entry| *entry.key())
            .collect();
        pending.sort_unstable();
        Ok(pending)
    }

    fn descriptors(&self, rows: &[RowId]) -> Result<Vec<Vec<u8>>, StoreError> {
        rows.iter()
            .map(|row| {
                self.regions
                    .get(row)
                    .map(|entry| entry.value().descriptor.clone())
                    .ok_or(StoreError::UnknownRegion(*row))
            })
            .collect()
    }

    fn write_neighbors(&self, row: RowId, neighbors: Vec<Neighbor>) -> Result<(), StoreError> {
        if !self.regions.contains_key(&row) {
            return Err(StoreError::UnknownRegion(row));
        }
        self.record(JournalEntry::Neighbors { row, neighbors })
    }

    fn flush(&self) -> Result<(), StoreError> {
        let mut writer = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
        if let Some(writer) = writer.as_mut() {
            writer.flush()?;
            writer.get_ref().sync_data()?;
        }
        Ok(())
    }
}
