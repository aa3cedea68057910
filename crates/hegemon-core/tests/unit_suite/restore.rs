//! Restore engine unit tests.
//!
//! Tests for artifact resolution, decompression into a temporary sibling,
//! and failure handling before and after the backend is reached.

use hegemon_core::error::CompressionError;
use hegemon_core::{
    BackupEngine, Codec, CompressionFormat, CompressionLevel, CompressionSpec, CredentialResolver,
    Error, RestoreEngine,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

use super::helpers::{
    count_orders, file_names, generate_sql_dump, seed_sqlite, storage_with_space, test_config,
    CallLog, RecordingNotifier, Script, ScriptedFactory,
};

fn restore_engine(root: &Path, factory: Arc<ScriptedFactory>, compression: bool) -> RestoreEngine {
    let config = test_config(root, &root.join("app.db"), compression, 10);
    RestoreEngine::new(config, Arc::new(CredentialResolver::empty()))
        .unwrap()
        .with_backend_factory(factory)
        .with_storage(storage_with_space(root, u64::MAX))
}

// ============================================================================
// Resolution Tests
// ============================================================================

#[tokio::test]
async fn missing_artifact_rejected_before_backend() {
    let root = TempDir::new().unwrap();
    let factory = ScriptedFactory::new(Script::default());
    let engine = restore_engine(root.path(), factory.clone(), true);

    for artifact in ["/nonexistent/backup_20240101_000000_full.sql", "no_such_backup.sql"] {
        let err = engine.run(artifact).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "{}: {:?}", artifact, err);
    }

    assert_eq!(CallLog::count(&factory.log.creates), 0);
    assert_eq!(CallLog::count(&factory.log.connects), 0);
}

#[tokio::test]
async fn empty_artifact_rejected() {
    let root = TempDir::new().unwrap();
    let factory = ScriptedFactory::new(Script::default());
    let engine = restore_engine(root.path(), factory.clone(), false);

    for artifact in ["", "   "] {
        assert!(matches!(
            engine.run(artifact).await.unwrap_err(),
            Error::Validation(_)
        ));
    }
    assert_eq!(CallLog::count(&factory.log.creates), 0);
}

#[tokio::test]
async fn directory_is_not_an_artifact() {
    let root = TempDir::new().unwrap();
    let factory = ScriptedFactory::new(Script::default());
    let engine = restore_engine(root.path(), factory.clone(), false);

    let dir = root.path().join("nested").join("dir.sql");
    std::fs::create_dir_all(&dir).unwrap();

    let err = engine.run(&dir.display().to_string()).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(CallLog::count(&factory.log.creates), 0);
}

// ============================================================================
// Decompression Tests
// ============================================================================

#[tokio::test]
async fn restores_compressed_backup_by_name() {
    let root = TempDir::new().unwrap();
    let dump = generate_sql_dump(40_000);
    let factory = ScriptedFactory::new(Script::dumping(dump.clone()));

    let config = test_config(root.path(), &root.path().join("app.db"), true, 10);
    let storage = storage_with_space(root.path(), u64::MAX);
    let backup = BackupEngine::new(config, Arc::new(CredentialResolver::empty()))
        .unwrap()
        .with_backend_factory(factory.clone())
        .with_storage(storage.clone());
    let report = backup.run("full").await.unwrap();
    assert!(report.artifact.file_name.ends_with(".sql.zst"));

    let engine = restore_engine(root.path(), factory.clone(), true);
    let restored = engine.run(&report.artifact.file_name).await.unwrap();

    assert!(restored.decompressed);
    assert_eq!(restored.artifact, root.path().join(&report.artifact.file_name));
    assert_eq!(factory.log.restored.lock().unwrap().as_slice(), &[dump]);
    assert_eq!(CallLog::count(&factory.log.disconnects), 2);

    let leftovers: Vec<_> = file_names(root.path())
        .into_iter()
        .filter(|n| n.starts_with(".restore-"))
        .collect();
    assert!(leftovers.is_empty(), "left behind: {:?}", leftovers);
}

#[tokio::test]
async fn compressed_backup_restores_with_compression_disabled() {
    let root = TempDir::new().unwrap();
    let src = root.path().join("dump.sql");
    let packed = root.path().join("dump.sql.zst");
    std::fs::write(&src, b"CREATE TABLE t (id INTEGER);\n").unwrap();

    let codec = Codec::new(CompressionSpec {
        format: CompressionFormat::Zstd,
        level: CompressionLevel::Low,
    })
    .unwrap();
    codec.compress(&src, &packed).unwrap();

    let factory = ScriptedFactory::new(Script::default());
    let engine = restore_engine(root.path(), factory.clone(), false);
    let report = engine.run(&packed.display().to_string()).await.unwrap();

    assert!(report.decompressed);
    assert_eq!(
        factory.log.restored.lock().unwrap()[0],
        b"CREATE TABLE t (id INTEGER);\n".to_vec()
    );
}

#[tokio::test]
async fn zstd_artifact_restores_when_configured_format_is_unsupported() {
    let root = TempDir::new().unwrap();
    let src = root.path().join("dump.sql");
    let packed = root.path().join("dump.sql.zst");
    std::fs::write(&src, b"INSERT INTO t VALUES (1);\n").unwrap();
    Codec::new(CompressionSpec {
        format: CompressionFormat::Zstd,
        level: CompressionLevel::High,
    })
    .unwrap()
    .compress(&src, &packed)
    .unwrap();

    let mut config = test_config(root.path(), &root.path().join("app.db"), false, 10);
    config.backup.compression.format = CompressionFormat::Lz4;

    let factory = ScriptedFactory::new(Script::default());
    let engine = RestoreEngine::new(config, Arc::new(CredentialResolver::empty()))
        .unwrap()
        .with_backend_factory(factory.clone())
        .with_storage(storage_with_space(root.path(), u64::MAX));

    let report = engine.run(&packed.display().to_string()).await.unwrap();
    assert!(report.decompressed);
    assert_eq!(
        factory.log.restored.lock().unwrap()[0],
        b"INSERT INTO t VALUES (1);\n".to_vec()
    );

    let lz4 = root.path().join("dump.sql.lz4");
    std::fs::write(&lz4, b"not decoded").unwrap();
    match engine.run(&lz4.display().to_string()).await.unwrap_err() {
        Error::Compression(CompressionError::UnsupportedFormat(format)) => {
            assert!(format.starts_with("lz4"), "{}", format);
        }
        other => panic!("expected UnsupportedFormat, got {:?}", other),
    }
}

#[tokio::test]
async fn uncompressed_path_is_restored_directly() {
    let root = TempDir::new().unwrap();
    let dump = root.path().join("plain.sql");
    std::fs::write(&dump, b"SELECT 1;").unwrap();

    let factory = ScriptedFactory::new(Script::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = restore_engine(root.path(), factory.clone(), true).with_notifier(notifier.clone());

    let report = engine.run(&dump.display().to_string()).await.unwrap();
    assert!(!report.decompressed);
    assert_eq!(factory.log.restored.lock().unwrap()[0], b"SELECT 1;".to_vec());

    let messages = notifier.messages();
    assert!(messages[0].starts_with("Restore started"));
    assert!(messages[1].starts_with("Restore completed"));
}

#[tokio::test]
async fn unsupported_extension_is_a_compression_error() {
    let root = TempDir::new().unwrap();
    let artifact = root.path().join("dump.sql.xz");
    std::fs::write(&artifact, b"\xfd7zXZ\0 not really").unwrap();

    let factory = ScriptedFactory::new(Script::default());
    let engine = restore_engine(root.path(), factory.clone(), true);

    let err = engine.run(&artifact.display().to_string()).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Compression(CompressionError::UnsupportedFormat(_))
    ));
    assert_eq!(CallLog::count(&factory.log.restores), 0);
}

#[tokio::test]
async fn corrupt_stream_aborts_before_restore() {
    let root = TempDir::new().unwrap();
    let artifact = root.path().join("dump.sql.zst");
    std::fs::write(&artifact, b"definitely not a zstd frame").unwrap();

    let factory = ScriptedFactory::new(Script::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let engine = restore_engine(root.path(), factory.clone(), true).with_notifier(notifier.clone());

    let err = engine.run(&artifact.display().to_string()).await.unwrap_err();
    assert!(matches!(err, Error::Compression(_)), "got {:?}", err);
    assert_eq!(CallLog::count(&factory.log.restores), 0);
    assert_eq!(CallLog::count(&factory.log.disconnects), 1);
    assert!(notifier.messages()[1].starts_with("Restore failed"));

    assert_eq!(file_names(root.path()), vec!["dump.sql.zst"]);
}

#[tokio::test]
async fn backend_restore_failure_propagates() {
    let root = TempDir::new().unwrap();
    let dump = root.path().join("plain.sql");
    std::fs::write(&dump, b"SELECT 1;").unwrap();

    let factory = ScriptedFactory::new(Script {
        fail_restore: true,
        ..Default::default()
    });
    let engine = restore_engine(root.path(), factory.clone(), false);

    let err = engine.run(&dump.display().to_string()).await.unwrap_err();
    assert!(matches!(err, Error::Restore { .. }));
    assert_eq!(CallLog::count(&factory.log.disconnects), 1);
}

// ============================================================================
// End-to-End Tests
// ============================================================================

#[tokio::test]
async fn sqlite_roundtrip_restores_rows() {
    let root = TempDir::new().unwrap();
    let db_dir = TempDir::new().unwrap();
    let db_path = db_dir.path().join("orders.db");
    seed_sqlite(&db_path, 150).await;

    let config = test_config(root.path(), &db_path, true, 10);
    let storage = storage_with_space(root.path(), u64::MAX);
    let backup = BackupEngine::new(config.clone(), Arc::new(CredentialResolver::empty()))
        .unwrap()
        .with_storage(storage.clone());
    let report = backup.run("full").await.unwrap();

    // Replace the live database with a smaller one
    std::fs::remove_file(&db_path).unwrap();
    seed_sqlite(&db_path, 3).await;
    assert_eq!(count_orders(&db_path).await, 3);

    let restore = RestoreEngine::new(config, Arc::new(CredentialResolver::empty()))
        .unwrap()
        .with_storage(storage);
    let restored = restore.run(&report.artifact.file_name).await.unwrap();

    assert!(restored.decompressed);
    assert_eq!(count_orders(&db_path).await, 150);
    assert!(!db_dir.path().join("orders.db.restore").exists());
}

#[tokio::test]
async fn sqlite_rejects_non_database_input() {
    let root = TempDir::new().unwrap();
    let db_dir = TempDir::new().unwrap();
    let db_path = db_dir.path().join("orders.db");
    seed_sqlite(&db_path, 5).await;

    let junk = root.path().join("junk.db");
    std::fs::write(&junk, generate_sql_dump(8192)).unwrap();

    let config = test_config(root.path(), &db_path, false, 10);
    let restore = RestoreEngine::new(config, Arc::new(CredentialResolver::empty()))
        .unwrap()
        .with_storage(storage_with_space(root.path(), u64::MAX));

    let err = restore.run(&junk.display().to_string()).await.unwrap_err();
    assert!(matches!(err, Error::Restore { .. }), "got {:?}", err);
    assert_eq!(count_orders(&db_path).await, 5);
}
