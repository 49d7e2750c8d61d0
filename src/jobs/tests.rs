//! Job Binding Tests
//!
//! ## Test Scopes
//! - **Feature extraction**: task derivation from pending images, region offsets,
//!   back-filled image fields, failed images staying pending.
//! - **Neighbor search**: batch splitting, lazy descriptor reads, neighbor writes.
//! - **End to end**: both jobs through a controller and a live pool of workers, then a
//!   re-run that finds nothing left to do.

#[cfg(test)]
mod tests {
    use crate::controller::binding::JobBinding;
    use crate::controller::controller::Controller;
    use crate::controller::pool::PoolHandle;
    use crate::controller::types::ControllerConfig;
    use crate::jobs::extraction::FeatureExtractionJob;
    use crate::jobs::neighbors::NeighborSearchJob;
    use crate::queue::client::QueueClient;
    use crate::queue::server::QueueServer;
    use crate::storage::journal::JournalStore;
    use crate::storage::store::FeatureStore;
    use crate::storage::types::RegionRecord;
    use crate::task::types::{ExtractedRegion, Neighbor, Task, TaskFailure, TaskResult};
    use crate::worker::codebook::Codebook;
    use crate::worker::extract::{ExtractError, FeatureExtractor};
    use crate::worker::runtime::Worker;

    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use std::time::Duration;

    const SECRET: &str = "jobs-secret";

    fn region(descriptor: Vec<u8>) -> ExtractedRegion {
        ExtractedRegion {
            center: [4, 5],
            radius: 12,
            cornerness: 0.75,
            descriptor,
        }
    }

    fn stored_region(index: u64, image: u64) -> RegionRecord {
        RegionRecord {
            index,
            image,
            class: None,
            center: [0, 0],
            radius: 1,
            cornerness: 0.1,
            descriptor: vec![index as u8, 0],
            neighbors: None,
        }
    }

    fn store_with_images(names: &[&str]) -> Arc<JournalStore> {
        let store = Arc::new(JournalStore::in_memory());
        for name in names {
            store.add_image(Path::new(name), Some(4)).unwrap();
        }
        store
    }

    fn store_with_regions(count: u64) -> Arc<JournalStore> {
        let store = store_with_images(&["a.jpg"]);
        for i in 0..count {
            store.append_region(stored_region(i, 0)).unwrap();
        }
        store.set_image_regions(0, count, Some(0)).unwrap();
        store
    }

    // ============================================================
    // FEATURE EXTRACTION TESTS
    // ============================================================

    #[test]
    fn test_extraction_stream_covers_pending_images_only() {
        let store = store_with_images(&["a.jpg", "b.jpg", "c.jpg"]);
        store.set_image_regions(1, 0, None).unwrap();
        let mut job = FeatureExtractionJob::new(store, "/data/images");

        let stream = job.task_stream().unwrap();
        assert_eq!(stream.total(), 2);

        let tasks: Vec<Task> = stream.into_tasks().map(Result::unwrap).collect();
        assert_eq!(
            tasks,
            vec![
                Task::Extract {
                    image: PathBuf::from("/data/images/a.jpg"),
                    key: 0
                },
                Task::Extract {
                    image: PathBuf::from("/data/images/c.jpg"),
                    key: 2
                },
            ]
        );
    }

    #[test]
    fn test_extraction_assigns_consecutive_offsets_in_result_order() {
        // ARRANGE
        let store = store_with_images(&["a.jpg", "b.jpg", "c.jpg"]);
        let mut job = FeatureExtractionJob::new(store.clone(), "/data");

        // ACT: results arrive out of submission order
        job.handle_result(
            TaskResult::Extract {
                key: 2,
                outcome: Ok(vec![region(vec![1]), region(vec![2])]),
            },
            false,
        )
        .unwrap();
        job.handle_result(
            TaskResult::Extract {
                key: 0,
                outcome: Ok(vec![]),
            },
            false,
        )
        .unwrap();
        job.handle_result(
            TaskResult::Extract {
                key: 1,
                outcome: Ok(vec![region(vec![3])]),
            },
            true,
        )
        .unwrap();

        // ASSERT
        let c = store.image(2).unwrap().unwrap();
        assert_eq!((c.reg_first, c.reg_count), (Some(0), Some(2)));
        let a = store.image(0).unwrap().unwrap();
        assert_eq!((a.reg_first, a.reg_count), (None, Some(0)));
        let b = store.image(1).unwrap().unwrap();
        assert_eq!((b.reg_first, b.reg_count), (Some(2), Some(1)));

        let third = store.region(2).unwrap();
        assert_eq!(third.image, 1);
        assert_eq!(third.class, Some(4));
        assert_eq!(third.descriptor, vec![3]);
        assert_eq!(store.last_region_index(), Some(2));
        assert_eq!(job.processed(), 3);
    }

    #[test]
    fn test_extraction_continues_after_existing_regions() {
        let store = store_with_regions(3);
        store.add_image(Path::new("b.jpg"), None).unwrap();
        let mut job = FeatureExtractionJob::new(store.clone(), "/data");

        job.handle_result(
            TaskResult::Extract {
                key: 1,
                outcome: Ok(vec![region(vec![9])]),
            },
            false,
        )
        .unwrap();

        assert_eq!(store.image(1).unwrap().unwrap().reg_first, Some(3));
        assert_eq!(store.region(3).unwrap().class, None);
    }

    #[test]
    fn test_failed_image_stays_pending() {
        let store = store_with_images(&["a.jpg", "broken.jpg"]);
        let mut job = FeatureExtractionJob::new(store.clone(), "/data");

        job.handle_result(
            TaskResult::Extract {
                key: 1,
                outcome: Err(TaskFailure::new("extractor exited with status 1")),
            },
            false,
        )
        .unwrap();

        assert_eq!(job.failed(), 1);
        assert!(!store.has_features(1).unwrap());
        assert_eq!(job.task_stream().unwrap().total(), 2);
    }

    #[test]
    fn test_rerun_after_completion_yields_no_tasks() {
        let store = store_with_images(&["a.jpg", "b.jpg"]);
        let mut job = FeatureExtractionJob::new(store.clone(), "/data");
        for task in job.task_stream().unwrap().into_tasks() {
            let Task::Extract { key, .. } = task.unwrap() else {
                panic!("expected extract task");
            };
            job.handle_result(
                TaskResult::Extract {
                    key,
                    outcome: Ok(vec![region(vec![key as u8])]),
                },
                false,
            )
            .unwrap();
        }
        job.checkpoint().unwrap();

        let mut rerun = FeatureExtractionJob::new(store, "/data");
        let stream = rerun.task_stream().unwrap();

        assert_eq!(stream.total(), 0);
        assert_eq!(stream.into_tasks().count(), 0);
    }

    #[test]
    fn test_rerun_after_crash_mid_image_stores_each_region_once() {
        // ARRANGE: a crash after the regions of image 0 were written but before its
        // region count was.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.journal");
        {
            let store = JournalStore::open(&path).unwrap();
            store.add_image(Path::new("a.jpg"), None).unwrap();
            for index in 0..100 {
                let mut record = stored_region(index, 0);
                record.descriptor = vec![7; 384];
                store.append_region(record).unwrap();
            }
            store.flush().unwrap();
        }

        // ACT: the re-run sees the image as pending and extracts it again
        let store = Arc::new(JournalStore::open(&path).unwrap());
        let mut job = FeatureExtractionJob::new(store.clone(), "/data");
        assert_eq!(job.task_stream().unwrap().total(), 1);
        let regions = (0..100).map(|_| region(vec![7; 384])).collect();
        job.handle_result(
            TaskResult::Extract {
                key: 0,
                outcome: Ok(regions),
            },
            true,
        )
        .unwrap();
        drop(job);
        drop(store);

        // ASSERT
        let store = JournalStore::open(&path).unwrap();
        let image = store.image(0).unwrap().unwrap();
        assert_eq!((image.reg_first, image.reg_count), (Some(0), Some(100)));
        assert_eq!(store.region_count(), 100);
        assert_eq!(store.regions_without_neighbors().unwrap().len(), 100);
        assert_eq!(store.last_region_index(), Some(99));
    }

    #[test]
    fn test_extraction_rejects_foreign_results() {
        let store = store_with_images(&["a.jpg"]);
        let mut job = FeatureExtractionJob::new(store, "/data");

        let err = job.handle_result(TaskResult::Done { worker: 0 }, false);

        assert!(err.is_err());
    }

    // ============================================================
    // NEIGHBOR SEARCH TESTS
    // ============================================================

    #[test]
    fn test_pending_rows_split_into_full_batches_and_a_remainder() {
        let store = store_with_regions(105);
        let mut job = NeighborSearchJob::new(store, 100);

        let stream = job.task_stream().unwrap();
        assert_eq!(stream.total(), 2);

        let sizes: Vec<usize> = stream
            .into_tasks()
            .map(|task| match task.unwrap() {
                Task::Neighbor { vectors, rows } => {
                    assert_eq!(vectors.len(), rows.len());
                    rows.len()
                }
                other => panic!("unexpected task {:?}", other),
            })
            .collect();
        assert_eq!(sizes, vec![100, 5]);
    }

    #[test]
    fn test_batches_carry_descriptors_as_floats() {
        let store = store_with_regions(3);
        let mut job = NeighborSearchJob::new(store, 2);

        let tasks: Vec<Task> = job
            .task_stream()
            .unwrap()
            .into_tasks()
            .map(Result::unwrap)
            .collect();

        assert_eq!(
            tasks[1],
            Task::Neighbor {
                vectors: vec![vec![2.0, 0.0]],
                rows: vec![2],
            }
        );
    }

    #[test]
    fn test_neighbor_lists_written_per_row() {
        let store = store_with_regions(2);
        let mut job = NeighborSearchJob::new(store.clone(), 10);
        let first = vec![
            Neighbor {
                centroid: 0,
                distance: 2.0,
            },
            Neighbor {
                centroid: 1,
                distance: 162.0,
            },
        ];
        let second = vec![Neighbor {
            centroid: 1,
            distance: 0.0,
        }];

        job.handle_result(
            TaskResult::Neighbor {
                rows: vec![1, 0],
                outcome: Ok(vec![second.clone(), first.clone()]),
            },
            true,
        )
        .unwrap();

        assert_eq!(store.region(0).unwrap().neighbors, Some(first));
        assert_eq!(store.region(1).unwrap().neighbors, Some(second));
        assert_eq!(job.written(), 2);
        assert_eq!(job.pending().unwrap(), 0);
    }

    #[test]
    fn test_failed_batch_leaves_rows_pending() {
        let store = store_with_regions(2);
        let mut job = NeighborSearchJob::new(store, 10);

        job.handle_result(
            TaskResult::Neighbor {
                rows: vec![0, 1],
                outcome: Err(TaskFailure::new("uninitialized codebook")),
            },
            false,
        )
        .unwrap();

        assert_eq!(job.failed_batches(), 1);
        assert_eq!(job.pending().unwrap(), 2);
    }

    #[test]
    fn test_mismatched_neighbor_result_is_an_error() {
        let store = store_with_regions(2);
        let mut job = NeighborSearchJob::new(store, 10);

        let result = job.handle_result(
            TaskResult::Neighbor {
                rows: vec![0, 1],
                outcome: Ok(vec![vec![]]),
            },
            false,
        );

        assert!(result.is_err());
    }

    // ============================================================
    // END TO END
    // ============================================================

    /// Two regions for ordinary images, none for "empty", a failure for "broken".
    struct StubExtractor;

    #[async_trait]
    impl FeatureExtractor for StubExtractor {
        async fn extract(
            &self,
            image: &Path,
            _scratch: &Path,
        ) -> Result<Vec<ExtractedRegion>, ExtractError> {
            let name = image.to_string_lossy();
            if name.contains("broken") {
                Err(ExtractError::MissingOutput)
            } else if name.contains("empty") {
                Ok(Vec::new())
            } else {
                Ok(vec![region(vec![1, 1]), region(vec![9, 9])])
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_extraction_then_neighbor_search_on_one_pool() {
        // ARRANGE
        let scratch = tempfile::tempdir().unwrap();
        let store = store_with_images(&["a.jpg", "empty.jpg", "broken.jpg"]);
        let codebook = Arc::new(Codebook::new(vec![vec![0.0, 0.0], vec![10.0, 10.0]]).unwrap());

        let server = QueueServer::new(4, SECRET)
            .bind("127.0.0.1", 0, None, SECRET)
            .await
            .unwrap();
        let mut pool = PoolHandle::new(server);
        let client = QueueClient::new(pool.address());
        let scratch_root = scratch.path().to_path_buf();
        pool.grow_tasks(2, |index| {
            let worker = Worker::new(
                index,
                client.clone(),
                StubExtractor,
                Some(codebook.clone()),
                2,
                &scratch_root,
            );
            async move {
                worker.run().await?;
                Ok(())
            }
        });

        // ACT: extraction keeps the pool for the next job
        let extraction = Controller::new(
            client.clone(),
            ControllerConfig {
                pool_size: 2,
                checkpoint_every: 2,
                progress_every: 10,
                release_workers: false,
            },
        );
        let mut extract_job = FeatureExtractionJob::new(store.clone(), "/images");
        let outcome = tokio::time::timeout(Duration::from_secs(10), extraction.run(&mut extract_job))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.summary().tasks, 3);
        assert_eq!(outcome.summary().failures, 1);

        // ACT: neighbor search releases the pool
        let mut neighbor_job = NeighborSearchJob::new(store.clone(), 1);
        assert_eq!(neighbor_job.pending().unwrap(), 2);
        let search = Controller::new(
            client,
            ControllerConfig {
                pool_size: 2,
                checkpoint_every: 1,
                progress_every: 10,
                release_workers: true,
            },
        );
        let outcome = tokio::time::timeout(Duration::from_secs(10), search.run(&mut neighbor_job))
            .await
            .unwrap()
            .unwrap();
        let report = pool.finalize().await.unwrap();

        // ASSERT
        assert_eq!(outcome.summary().tasks, 2);
        assert_eq!(outcome.summary().acknowledgments, 2);
        assert_eq!(report.exited, 2);

        let low = store.region(0).unwrap();
        assert_eq!(
            low.neighbors,
            Some(vec![
                Neighbor {
                    centroid: 0,
                    distance: 2.0
                },
                Neighbor {
                    centroid: 1,
                    distance: 162.0
                },
            ])
        );
        let high = store.region(1).unwrap();
        assert_eq!(high.neighbors.unwrap()[0].centroid, 1);

        // A re-run only finds the image that failed.
        let mut rerun = FeatureExtractionJob::new(store.clone(), "/images");
        assert_eq!(rerun.task_stream().unwrap().total(), 1);
        assert_eq!(NeighborSearchJob::new(store, 1).pending().unwrap(), 0);
    }
}
