use std::{io::Write, path::Path, sync::Arc, time::Duration};

use sea_orm::{DatabaseConnection, EntityTrait, PaginatorTrait};
use tokio_util::sync::CancellationToken;
use zip::{write::FileOptions, ZipWriter};

use super::{
    init_db,
    mock::{event, MockHandle, MockSource},
};
use crate::{
    content_store::ContentStore,
    extractor::{ExtractionLimits, Extractor},
    hasher::hash_bytes,
    pipeline::{PipelineContext, WorkerPool},
    queue,
    repository::{indicators, processed_files},
    scanner::{IocPatterns, Scanner},
    settings::DownloadSettings,
    types::{DocumentEvent, ExternalFileRef, IndicatorType, JobStatus},
};

fn zip_bytes(members: &[(&str, &str)]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    let mut writer = ZipWriter::new(&mut cursor);
    for (name, content) in members {
        writer.start_file(*name, FileOptions::default()).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
    drop(writer);
    cursor.into_inner()
}

struct Harness {
    _dir: tempfile::TempDir,
    db: blockscout_service_launcher::test_database::TestDbGuard,
}

impl Harness {
    async fn new(test_name: &str) -> Self {
        Self {
            _dir: tempfile::tempdir().unwrap(),
            db: init_db(test_name).await,
        }
    }

    fn client(&self) -> Arc<DatabaseConnection> {
        self.db.client()
    }

    fn storage_root(&self) -> &Path {
        self._dir.path()
    }

    async fn run(
        &self,
        events: Vec<DocumentEvent<MockHandle>>,
        worker_count: usize,
        cidrs: &[&str],
    ) {
        let store = ContentStore::new(self.storage_root().join("objects"))
            .await
            .unwrap();
        let work_root = self.storage_root().join("work");
        tokio::fs::create_dir_all(&work_root).await.unwrap();

        let cidrs: Vec<ipnet::Ipv4Net> = cidrs.iter().map(|c| c.parse().unwrap()).collect();
        let scanner = Scanner::new(IocPatterns::compile(
            &["example.com".to_string()],
            &["@example.gov".to_string()],
            &cidrs,
        ));

        let context = Arc::new(PipelineContext {
            db: self.client(),
            source: Arc::new(MockSource::new(vec![])),
            store,
            extractor: Extractor::new(ExtractionLimits {
                max_decompressed_bytes: 64 * 1024 * 1024,
                max_decompression_ratio: 100,
            }),
            scanner: Arc::new(scanner),
            download: DownloadSettings {
                max_retries: 5,
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
            },
            work_root,
        });

        let (sender, receiver) = queue::bounded(events.len().max(1));
        for event in events {
            sender.enqueue(event).await.unwrap();
        }
        drop(sender);

        WorkerPool::new(context, worker_count)
            .run(receiver, CancellationToken::new())
            .await;
    }

    async fn job_count(&self) -> u64 {
        ioc_indexer_entity::processing_jobs::Entity::find()
            .count(self.client().as_ref())
            .await
            .unwrap()
    }

    async fn file_count(&self) -> u64 {
        ioc_indexer_entity::processed_files::Entity::find()
            .count(self.client().as_ref())
            .await
            .unwrap()
    }

    async fn indicator_count(&self) -> u64 {
        ioc_indexer_entity::extracted_indicators::Entity::find()
            .count(self.client().as_ref())
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn duplicate_events_process_once() {
    let harness = Harness::new("pipeline_duplicate_events").await;
    let payload = b"plain artifact".to_vec();

    // the same external ref delivered back-to-back
    let events = vec![
        event(42, 7, 1001, "dump.bin", MockHandle::new(payload.clone())),
        event(42, 7, 1001, "dump.bin", MockHandle::new(payload)),
    ];
    harness.run(events, 1, &[]).await;

    assert_eq!(harness.file_count().await, 1);
    assert_eq!(harness.job_count().await, 1);

    let reference = ExternalFileRef {
        channel_id: 42,
        message_id: 7,
        document_id: 1001,
    };
    let file = processed_files::find_by_external_ref(harness.client().as_ref(), &reference)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(file.telegram_file_id, "42_7_1001");
}

#[tokio::test]
async fn archive_members_are_scanned() {
    let harness = Harness::new("pipeline_archive_scan").await;
    let payload = zip_bytes(&[("a.txt", "admin@example.gov\n10.0.0.5\n")]);
    let expected_hash = hash_bytes(&payload);

    let events = vec![event(42, 8, 1002, "leak.zip", MockHandle::new(payload))];
    harness.run(events, 4, &["10.0.0.0/24"]).await;

    assert_eq!(harness.file_count().await, 1);

    let rows = indicators::find_by_source_hash(harness.client().as_ref(), &expected_hash)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].indicator_type, IndicatorType::Email);
    assert_eq!(rows[0].value, "admin@example.gov");
    assert_eq!(rows[0].source_relative_path, "a.txt");
    assert_eq!(rows[0].source_line, 1);
    assert_eq!(rows[1].indicator_type, IndicatorType::Ipv4);
    assert_eq!(rows[1].value, "10.0.0.5");
    assert_eq!(rows[1].source_line, 2);
    assert!(rows.iter().all(|row| row.channel_id == 42));
}

#[tokio::test]
async fn stored_bytes_hash_to_their_name() {
    let harness = Harness::new("pipeline_hash_invariant").await;
    let payload = b"bytes that should round-trip".to_vec();
    let expected_hash = hash_bytes(&payload);

    harness
        .run(
            vec![event(42, 9, 1003, "blob.bin", MockHandle::new(payload.clone()))],
            1,
            &[],
        )
        .await;

    let reference = ExternalFileRef {
        channel_id: 42,
        message_id: 9,
        document_id: 1003,
    };
    let file = processed_files::find_by_external_ref(harness.client().as_ref(), &reference)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(file.file_hash, expected_hash);
    assert_eq!(file.size_bytes, payload.len() as i64);

    let on_disk = tokio::fs::read(
        harness
            .storage_root()
            .join("objects")
            .join(&file.storage_path),
    )
    .await
    .unwrap();
    assert_eq!(hash_bytes(&on_disk), file.file_hash);
}

#[tokio::test]
async fn identical_bytes_share_one_object() {
    let harness = Harness::new("pipeline_shared_bytes").await;
    let payload = zip_bytes(&[("a.txt", "nothing to see\n")]);

    let events = vec![
        event(42, 10, 1004, "copy-one.zip", MockHandle::new(payload.clone())),
        event(42, 11, 1005, "copy-two.zip", MockHandle::new(payload.clone())),
    ];
    harness.run(events, 1, &[]).await;

    assert_eq!(harness.file_count().await, 2);
    let rows = processed_files::find_by_hash(harness.client().as_ref(), &hash_bytes(&payload))
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].storage_path, rows[1].storage_path);
}

#[tokio::test]
async fn transient_download_failures_are_retried() {
    let harness = Harness::new("pipeline_download_retry").await;
    let payload = b"eventually arrives".to_vec();
    let expected_hash = hash_bytes(&payload);

    harness
        .run(
            vec![event(
                42,
                12,
                1006,
                "flaky.bin",
                MockHandle::failing(payload, 2),
            )],
            1,
            &[],
        )
        .await;

    assert_eq!(harness.job_count().await, 1);
    let reference = ExternalFileRef {
        channel_id: 42,
        message_id: 12,
        document_id: 1006,
    };
    let file = processed_files::find_by_external_ref(harness.client().as_ref(), &reference)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(file.file_hash, expected_hash);
}

#[tokio::test]
async fn exhausted_retries_fail_the_job() {
    let harness = Harness::new("pipeline_retries_exhausted").await;
    let payload = b"never arrives".to_vec();

    harness
        .run(
            vec![event(
                42,
                13,
                1007,
                "gone.bin",
                MockHandle::failing(payload, 100),
            )],
            1,
            &[],
        )
        .await;

    assert_eq!(harness.file_count().await, 0);
    assert_eq!(harness.job_count().await, 1);
    let job = ioc_indexer_entity::processing_jobs::Entity::find()
        .one(harness.client().as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().starts_with("transient_network"));
}

#[tokio::test]
async fn ip_outside_configured_ranges_is_ignored() {
    let harness = Harness::new("pipeline_cidr_filter").await;
    let payload = zip_bytes(&[("a.txt", "192.168.1.10\n")]);

    harness
        .run(
            vec![event(42, 14, 1008, "leak.zip", MockHandle::new(payload))],
            1,
            &["10.0.0.0/8"],
        )
        .await;

    assert_eq!(harness.indicator_count().await, 0);
    assert_eq!(harness.file_count().await, 1);
}

#[tokio::test]
async fn unsafe_archive_fails_without_file_row() {
    let harness = Harness::new("pipeline_unsafe_archive").await;
    let payload = zip_bytes(&[("../../etc/passwd", "root:x:0:0\n")]);

    harness
        .run(
            vec![event(42, 15, 1009, "evil.zip", MockHandle::new(payload))],
            1,
            &[],
        )
        .await;

    assert_eq!(harness.file_count().await, 0);
    assert_eq!(harness.indicator_count().await, 0);
    let job = ioc_indexer_entity::processing_jobs::Entity::find()
        .one(harness.client().as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().starts_with("unsafe_archive"));

    // the extraction work tree is cleaned up on the failure path too
    let mut work = tokio::fs::read_dir(harness.storage_root().join("work"))
        .await
        .unwrap();
    assert!(work.next_entry().await.unwrap().is_none());
}

#[tokio::test]
async fn replaying_the_stream_changes_nothing() {
    let harness = Harness::new("pipeline_replay_idempotent").await;
    let payload = zip_bytes(&[("a.txt", "admin@example.gov\n")]);

    let make_events = || {
        vec![
            event(42, 16, 1010, "leak.zip", MockHandle::new(payload.clone())),
            event(43, 17, 1011, "other.bin", MockHandle::new(b"plain".to_vec())),
        ]
    };
    harness.run(make_events(), 2, &[]).await;
    let files = harness.file_count().await;
    let jobs_before = harness.job_count().await;
    let indicators_before = harness.indicator_count().await;

    harness.run(make_events(), 2, &[]).await;
    assert_eq!(harness.file_count().await, files);
    assert_eq!(harness.job_count().await, jobs_before);
    assert_eq!(harness.indicator_count().await, indicators_before);
}

#[tokio::test]
async fn zero_length_artifact_completes() {
    let harness = Harness::new("pipeline_zero_length").await;

    harness
        .run(
            vec![event(42, 18, 1012, "empty.bin", MockHandle::new(vec![]))],
            1,
            &[],
        )
        .await;

    let reference = ExternalFileRef {
        channel_id: 42,
        message_id: 18,
        document_id: 1012,
    };
    let file = processed_files::find_by_external_ref(harness.client().as_ref(), &reference)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        file.file_hash,
        "0e5751c026e543b2e8ab2eb06099daa1d1e5df47778f7787faab45cdf12fe3a8"
    );
    assert_eq!(file.size_bytes, 0);

    let job = ioc_indexer_entity::processing_jobs::Entity::find()
        .one(harness.client().as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.file_hash.as_deref(), Some(file.file_hash.as_str()));
}
