//! Backup engine unit tests.
//!
//! Most tests drive the engine with a scripted backend so the pipeline
//! (connect, dump, compress, store, retention) can be observed without a
//! database server. The sqlite scenario runs the real backend end to end.

use hegemon_core::error::CompressionError;
use hegemon_core::{
    BackupEngine, BackupKind, CompressionFormat, CredentialResolver, Error, StorageError,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use super::helpers::{
    file_names, generate_sql_dump, seed_sqlite, storage_with_space, test_config, CallLog,
    RecordingNotifier, Script, ScriptedFactory,
};

struct Fixture {
    root: TempDir,
    _db_dir: TempDir,
    engine: BackupEngine,
    factory: Arc<ScriptedFactory>,
}

fn scripted(script: Script, compression: bool, max_count: usize, available: u64) -> Fixture {
    let root = TempDir::new().unwrap();
    let db_dir = TempDir::new().unwrap();
    let config = test_config(root.path(), &db_dir.path().join("app.db"), compression, max_count);

    let factory = ScriptedFactory::new(script);
    let engine = BackupEngine::new(config, Arc::new(CredentialResolver::empty()))
        .unwrap()
        .with_backend_factory(factory.clone())
        .with_storage(storage_with_space(root.path(), available));

    Fixture {
        root,
        _db_dir: db_dir,
        engine,
        factory,
    }
}

// ============================================================================
// End-to-End Tests
// ============================================================================

#[tokio::test]
async fn sqlite_backup_is_compressed_and_verifiable() {
    let root = TempDir::new().unwrap();
    let db_dir = TempDir::new().unwrap();
    let db_path = db_dir.path().join("orders.db");
    seed_sqlite(&db_path, 200).await;
    let db_size = std::fs::metadata(&db_path).unwrap().len();
    assert!(db_size >= 10 * 1024);

    let config = test_config(root.path(), &db_path, true, 10);
    let engine = BackupEngine::new(config, Arc::new(CredentialResolver::empty()))
        .unwrap()
        .with_storage(storage_with_space(root.path(), u64::MAX));

    let report = engine.run("full").await.unwrap();

    assert_eq!(report.kind, BackupKind::Full);
    assert!(report.compressed);
    assert!(report.artifact.file_name.starts_with("backup_"));
    assert!(report.artifact.file_name.ends_with("_full.db.zst"));
    assert!(report.artifact.size_bytes < db_size);

    let storage = engine.storage();
    assert_eq!(storage.list().await.unwrap().len(), 1);
    assert!(storage.verify(&report.artifact.file_name).await.unwrap());
    assert!(file_names(&storage.staging_dir()).is_empty());
}

#[tokio::test]
async fn retention_runs_after_each_backup() {
    let fx = scripted(Script::dumping(generate_sql_dump(2048)), false, 2, u64::MAX);

    let mut reports = Vec::new();
    for _ in 0..3 {
        reports.push(fx.engine.run("full").await.unwrap());
    }

    assert_eq!(reports[0].retention_deleted, 0);
    assert_eq!(reports[2].retention_deleted, 1);

    let names: Vec<_> = fx
        .engine
        .storage()
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.file_name)
        .collect();
    assert_eq!(
        names,
        vec![
            reports[1].artifact.file_name.clone(),
            reports[2].artifact.file_name.clone()
        ]
    );
    assert!(!fx.root.path().join(&reports[0].artifact.file_name).exists());
    assert_eq!(file_names(fx.root.path()).len(), 2);
}

// ============================================================================
// Failure Path Tests
// ============================================================================

#[tokio::test]
async fn dump_failure_leaves_ledger_untouched() {
    let script = Script {
        fail_dump: true,
        ..Default::default()
    };
    let fx = scripted(script, true, 10, u64::MAX);

    let err = fx.engine.run("full").await.unwrap_err();
    assert!(matches!(err, Error::Dump { .. }), "got {:?}", err);

    assert!(fx.engine.storage().list().await.unwrap().is_empty());
    assert_eq!(CallLog::count(&fx.factory.log.disconnects), 1);

    // The partial dump stays in staging for inspection
    assert_eq!(file_names(&fx.engine.storage().staging_dir()).len(), 1);
}

#[tokio::test]
async fn connect_failure_skips_dump() {
    let script = Script {
        fail_connect: true,
        ..Default::default()
    };
    let fx = scripted(script, false, 10, u64::MAX);

    let err = fx.engine.run("full").await.unwrap_err();
    assert!(err.is_connection());
    assert_eq!(CallLog::count(&fx.factory.log.connects), 1);
    assert_eq!(CallLog::count(&fx.factory.log.dumps), 0);
    assert_eq!(CallLog::count(&fx.factory.log.disconnects), 1);
}

#[tokio::test]
async fn auth_failure_is_a_connection_failure() {
    let script = Script {
        fail_connect_auth: true,
        ..Default::default()
    };
    let fx = scripted(script, false, 10, u64::MAX);

    let err = fx.engine.run("full").await.unwrap_err();
    assert!(err.is_authentication());
    // Authentication failures are a kind of connection failure
    assert!(err.is_connection());
    assert!(matches!(err, Error::Authentication { .. }));

    assert_eq!(CallLog::count(&fx.factory.log.dumps), 0);
    assert_eq!(CallLog::count(&fx.factory.log.disconnects), 1);
}

#[tokio::test]
async fn compression_falls_back_when_space_is_short() {
    // 1000 bytes needs 1100 to store raw but ~1924 for a medium estimate
    let fx = scripted(Script::dumping(generate_sql_dump(1000)), true, 10, 1500);

    let report = fx.engine.run("full").await.unwrap();

    assert!(!report.compressed);
    assert!(report.artifact.file_name.ends_with("_full.sql"));
    assert_eq!(report.artifact.size_bytes, 1000);
}

#[tokio::test]
async fn insufficient_space_fails_backup() {
    let fx = scripted(Script::dumping(generate_sql_dump(1000)), false, 10, 100);

    let err = fx.engine.run("full").await.unwrap_err();
    assert!(matches!(
        err,
        Error::Storage(StorageError::InsufficientSpace { .. })
    ));
    assert!(fx.engine.storage().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn unsupported_format_rejected_at_construction() {
    let root = TempDir::new().unwrap();
    let mut config = test_config(root.path(), &root.path().join("app.db"), true, 10);
    config.backup.compression.format = CompressionFormat::Lz4;

    let err = BackupEngine::new(config, Arc::new(CredentialResolver::empty()))
        .err()
        .unwrap();
    assert!(matches!(
        err,
        Error::Compression(CompressionError::UnsupportedFormat(_))
    ));
}

#[tokio::test]
async fn unsupported_format_ignored_when_disabled() {
    let root = TempDir::new().unwrap();
    let mut config = test_config(root.path(), &root.path().join("app.db"), false, 10);
    config.backup.compression.format = CompressionFormat::Xz;

    assert!(BackupEngine::new(config, Arc::new(CredentialResolver::empty())).is_ok());
}

#[tokio::test]
async fn invalid_label_creates_no_backend() {
    let fx = scripted(Script::dumping("x"), false, 10, u64::MAX);

    for label in ["", "weekly", "Full"] {
        let err = fx.engine.run(label).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "{:?}", label);
    }
    assert_eq!(CallLog::count(&fx.factory.log.creates), 0);
}

// ============================================================================
// Concurrency and Notification Tests
// ============================================================================

#[tokio::test]
async fn try_run_skips_while_backup_in_flight() {
    let script = Script {
        dump_content: b"SELECT 1;".to_vec(),
        dump_delay: Some(Duration::from_millis(300)),
        ..Default::default()
    };
    let fx = scripted(script, false, 10, u64::MAX);

    let (first, second) = tokio::join!(fx.engine.run("full"), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        fx.engine.try_run("incremental").await
    });

    assert_eq!(first.unwrap().kind, BackupKind::Full);
    assert!(second.unwrap().is_none());
    assert_eq!(CallLog::count(&fx.factory.log.dumps), 1);

    // Once the first run finished the lock is free again
    let third = fx.engine.try_run("differential").await.unwrap();
    assert_eq!(third.unwrap().kind, BackupKind::Differential);
}

#[tokio::test]
async fn notifications_follow_outcome() {
    let notifier = Arc::new(RecordingNotifier::default());
    let ok = scripted(Script::dumping("SELECT 1;"), false, 10, u64::MAX);
    let engine = ok.engine.with_notifier(notifier.clone());

    engine.run("full").await.unwrap();
    let messages = notifier.messages();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].starts_with("Backup started"));
    assert!(messages[1].starts_with("Backup completed"));

    let failing = Arc::new(RecordingNotifier::default());
    let fx = scripted(
        Script {
            fail_dump: true,
            ..Default::default()
        },
        false,
        10,
        u64::MAX,
    );
    let engine = fx.engine.with_notifier(failing.clone());
    assert!(engine.run("full").await.is_err());
    let messages = failing.messages();
    assert_eq!(messages.len(), 2);
    assert!(messages[1].starts_with("Backup failed"));
}
