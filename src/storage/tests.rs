//! Storage Module Tests
//!
//! ## Test Scopes
//! - **Predicates**: pending images and pending regions as the job task streams see them.
//! - **Journal**: replay after reopening, durability of flushed records, torn tails.

#[cfg(test)]
mod tests {
    use crate::storage::error::StoreError;
    use crate::storage::journal::JournalStore;
    use crate::storage::store::FeatureStore;
    use crate::storage::types::RegionRecord;
    use crate::task::types::Neighbor;
    use std::io::Write;
    use std::path::Path;

    fn region(index: u64, image: u64) -> RegionRecord {
        RegionRecord {
            index,
            image,
            class: Some(2),
            center: [10, 20],
            radius: 8,
            cornerness: 0.5,
            descriptor: vec![index as u8; 4],
            neighbors: None,
        }
    }

    // ============================================================
    // PREDICATE TESTS
    // ============================================================

    #[test]
    fn test_new_images_need_features() {
        let store = JournalStore::in_memory();
        let a = store.add_image(Path::new("a.jpg"), Some(1)).unwrap();
        let b = store.add_image(Path::new("b.jpg"), None).unwrap();

        assert_eq!((a, b), (0, 1));
        let pending: Vec<u64> = store
            .images_without_features()
            .unwrap()
            .iter()
            .map(|image| image.index)
            .collect();
        assert_eq!(pending, vec![0, 1]);

        store.set_image_regions(a, 0, None).unwrap();

        assert!(store.has_features(a).unwrap());
        assert!(!store.has_features(b).unwrap());
        assert_eq!(store.images_without_features().unwrap().len(), 1);
    }

    #[test]
    fn test_regions_without_neighbors_are_pending() {
        let store = JournalStore::in_memory();
        let image = store.add_image(Path::new("a.jpg"), None).unwrap();
        for i in 0..3 {
            assert_eq!(store.append_region(region(i, image)).unwrap(), i);
        }

        store
            .write_neighbors(
                1,
                vec![Neighbor {
                    centroid: 0,
                    distance: 1.0,
                }],
            )
            .unwrap();

        assert_eq!(store.regions_without_neighbors().unwrap(), vec![0, 2]);
        assert_eq!(store.last_region_index(), Some(2));
        assert_eq!(
            store.descriptors(&[2, 0]).unwrap(),
            vec![vec![2u8; 4], vec![0u8; 4]]
        );
    }

    #[test]
    fn test_invalid_writes_are_rejected() {
        let store = JournalStore::in_memory();
        let image = store.add_image(Path::new("a.jpg"), None).unwrap();
        store.append_region(region(0, image)).unwrap();

        assert!(matches!(
            store.append_region(region(0, image)),
            Err(StoreError::DuplicateRegion(0))
        ));
        assert!(matches!(
            store.append_region(region(1, 99)),
            Err(StoreError::UnknownImage(99))
        ));
        assert!(matches!(
            store.write_neighbors(5, vec![]),
            Err(StoreError::UnknownRegion(5))
        ));
        assert!(store.last_region_index() == Some(0));
    }

    // ============================================================
    // JOURNAL TESTS
    // ============================================================

    #[test]
    fn test_flushed_records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.journal");

        {
            let store = JournalStore::open(&path).unwrap();
            let image = store.add_image(Path::new("a.jpg"), Some(3)).unwrap();
            store.append_region(region(0, image)).unwrap();
            store.append_region(region(1, image)).unwrap();
            store.set_image_regions(image, 2, Some(0)).unwrap();
            store
                .write_neighbors(
                    0,
                    vec![Neighbor {
                        centroid: 4,
                        distance: 2.5,
                    }],
                )
                .unwrap();
            store.flush().unwrap();
        }

        let store = JournalStore::open(&path).unwrap();

        assert_eq!(store.image_count(), 1);
        assert_eq!(store.region_count(), 2);
        let image = store.image(0).unwrap().unwrap();
        assert_eq!(image.reg_count, Some(2));
        assert_eq!(image.reg_first, Some(0));
        assert_eq!(image.class, Some(3));
        assert_eq!(store.regions_without_neighbors().unwrap(), vec![1]);
        assert_eq!(store.last_region_index(), Some(1));

        // Indices continue after the replayed ones.
        assert_eq!(store.add_image(Path::new("b.jpg"), None).unwrap(), 1);
    }

    #[test]
    fn test_torn_tail_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.journal");

        {
            let store = JournalStore::open(&path).unwrap();
            store.add_image(Path::new("a.jpg"), None).unwrap();
            store.add_image(Path::new("b.jpg"), None).unwrap();
            store.flush().unwrap();
        }
        let intact_len = std::fs::metadata(&path).unwrap().len();

        // Simulate a crash in the middle of writing a frame.
        {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .unwrap();
            file.write_all(&200u32.to_le_bytes()).unwrap();
            file.write_all(&[1, 2, 3]).unwrap();
        }

        let store = JournalStore::open(&path).unwrap();

        assert_eq!(store.image_count(), 2);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), intact_len);
    }

    #[test]
    fn test_regions_of_unfinished_image_are_dropped_on_reopen() {
        // ARRANGE: region frames reached the file, the image's region count did not.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.journal");
        {
            let store = JournalStore::open(&path).unwrap();
            let image = store.add_image(Path::new("a.jpg"), None).unwrap();
            for i in 0..90 {
                store.append_region(region(i, image)).unwrap();
            }
            store.flush().unwrap();
        }

        // ACT
        let store = JournalStore::open(&path).unwrap();

        // ASSERT
        assert!(!store.has_features(0).unwrap());
        assert_eq!(store.region_count(), 0);
        assert_eq!(store.last_region_index(), None);
        assert!(store.regions_without_neighbors().unwrap().is_empty());
    }

    #[test]
    fn test_rewritten_regions_replace_stale_ones_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.journal");
        {
            // First attempt on image 0 crashes after three regions.
            let store = JournalStore::open(&path).unwrap();
            store.add_image(Path::new("a.jpg"), None).unwrap();
            store.add_image(Path::new("b.jpg"), None).unwrap();
            for i in 0..3 {
                store.append_region(region(i, 0)).unwrap();
            }
            store.flush().unwrap();
        }
        {
            // The re-run gives the first two offsets to image 1; image 0 fails again.
            let store = JournalStore::open(&path).unwrap();
            store.append_region(region(0, 1)).unwrap();
            store.append_region(region(1, 1)).unwrap();
            store.set_image_regions(1, 2, Some(0)).unwrap();
            store.flush().unwrap();
        }

        let store = JournalStore::open(&path).unwrap();

        assert_eq!(store.region_count(), 2);
        assert_eq!(store.region(0).unwrap().image, 1);
        assert!(store.region(2).is_none());
        assert_eq!(store.last_region_index(), Some(1));
        assert_eq!(store.regions_without_neighbors().unwrap(), vec![0, 1]);
    }

    #[test]
    fn test_known_files_lists_registered_images() {
        let store = JournalStore::in_memory();
        store.add_image(Path::new("site/a.jpg"), None).unwrap();

        let known = store.known_files();

        assert!(known.contains(Path::new("site/a.jpg")));
        assert_eq!(known.len(), 1);
    }
}
