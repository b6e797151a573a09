mod common;

use std::fs;
use std::sync::Arc;

use ::common::protocol::BackupRequest;
use mcsman::StatusStore;
use mcsman::backup::BackupCoordinator;

use crate::common::{FakeDriver, FakeQuery, RecordingStore, make_server_dir, test_config};

struct Fixture {
    store: Arc<StatusStore>,
    driver: Arc<FakeDriver>,
    query: Arc<FakeQuery>,
    storage: Arc<RecordingStore>,
    backups: BackupCoordinator,
}

fn fixture(base_dir: &std::path::Path) -> Fixture {
    let store = Arc::new(StatusStore::empty(base_dir));
    let driver = Arc::new(FakeDriver::obedient());
    let query = Arc::new(FakeQuery::default());
    let storage = Arc::new(RecordingStore::default());
    let backups = BackupCoordinator::new(
        store.clone(),
        driver.clone(),
        query.clone(),
        storage.clone(),
        Arc::new(test_config(base_dir)),
    );
    Fixture {
        store,
        driver,
        query,
        storage,
        backups,
    }
}

fn make_world(base_dir: &std::path::Path, server: &str) {
    let dir = make_server_dir(base_dir, server);
    let world = dir.join("world");
    fs::create_dir_all(world.join("region")).unwrap();
    fs::write(world.join("level.dat"), b"level data").unwrap();
    fs::write(world.join("region/r.0.0.mca"), b"region data").unwrap();
}

fn request(servers: &[&str]) -> BackupRequest {
    BackupRequest {
        force: false,
        bucket: "gs://test-bucket/backups".to_string(),
        skip_upload: false,
        servers: servers.iter().map(|s| s.to_string()).collect(),
    }
}

#[tokio::test]
async fn archives_and_uploads_eligible_server() {
    let base = tempfile::tempdir().unwrap();
    make_world(base.path(), "alpha");
    let fx = fixture(base.path());
    fx.store.register_server("alpha", 25565).unwrap();
    fx.store.set_backup_enabled("alpha", true);

    let backed_up = fx.backups.create(&request(&["alpha"])).await.unwrap();

    assert_eq!(backed_up, vec!["alpha".to_string()]);
    assert_eq!(
        fx.storage.uploaded(),
        vec!["gs://test-bucket/backups/alpha/alpha-backup.tar.gz".to_string()]
    );
    // nobody online afterwards: stop backing up until activity returns
    assert_eq!(fx.store.backup_enabled("alpha"), Some(false));
    assert!(base.path().join("backup.lock").exists());
}

#[tokio::test]
async fn skips_ineligible_server_without_force() {
    let base = tempfile::tempdir().unwrap();
    make_world(base.path(), "alpha");
    let fx = fixture(base.path());
    fx.store.register_server("alpha", 25565).unwrap();
    fx.store.set_backup_enabled("alpha", false);

    let backed_up = fx.backups.create(&request(&["alpha"])).await.unwrap();

    assert!(backed_up.is_empty());
    assert!(fx.storage.uploaded().is_empty());
}

#[tokio::test]
async fn force_overrides_eligibility() {
    let base = tempfile::tempdir().unwrap();
    make_world(base.path(), "alpha");
    let fx = fixture(base.path());
    fx.store.register_server("alpha", 25565).unwrap();
    fx.store.set_backup_enabled("alpha", false);

    let mut req = request(&["alpha"]);
    req.force = true;
    let backed_up = fx.backups.create(&req).await.unwrap();

    assert_eq!(backed_up, vec!["alpha".to_string()]);
    assert_eq!(fx.storage.uploaded().len(), 1);
}

#[tokio::test]
async fn unknown_server_defaults_to_eligible() {
    let base = tempfile::tempdir().unwrap();
    make_world(base.path(), "alpha");
    let fx = fixture(base.path());

    let backed_up = fx.backups.create(&request(&["alpha"])).await.unwrap();

    assert_eq!(backed_up, vec!["alpha".to_string()]);
    // never-seen server gets locked out after an idle backup
    assert_eq!(fx.store.backup_enabled("alpha"), Some(false));
}

#[tokio::test]
async fn skip_upload_archives_locally_only() {
    let base = tempfile::tempdir().unwrap();
    make_world(base.path(), "alpha");
    let fx = fixture(base.path());
    fx.store.register_server("alpha", 25565).unwrap();

    let mut req = request(&["alpha"]);
    req.skip_upload = true;
    let backed_up = fx.backups.create(&req).await.unwrap();

    assert_eq!(backed_up, vec!["alpha".to_string()]);
    assert!(fx.storage.uploaded().is_empty());
}

#[tokio::test]
async fn running_server_is_flushed_and_notified() {
    let base = tempfile::tempdir().unwrap();
    make_world(base.path(), "alpha");
    let fx = fixture(base.path());
    fx.store.register_server("alpha", 25565).unwrap();
    fx.driver.running.lock().unwrap().insert("alpha".to_string());
    let port = fx.store.server("alpha").unwrap().port;
    fx.query.set_online(port, 2);

    fx.backups.create(&request(&["alpha"])).await.unwrap();

    let lines = fx.driver.lines_for("alpha");
    assert!(lines.iter().any(|l| l == "save-all"));
    assert!(lines.iter().any(|l| l.starts_with("say Creating backup")));
    assert!(lines.iter().any(|l| l.starts_with("say Backup created")));
    // players online: eligibility untouched
    assert_eq!(fx.store.backup_enabled("alpha"), None);
}

#[tokio::test]
async fn all_expands_to_every_server_directory() {
    let base = tempfile::tempdir().unwrap();
    make_world(base.path(), "alpha");
    make_world(base.path(), "beta");
    let fx = fixture(base.path());

    let mut backed_up = fx.backups.create(&request(&["all"])).await.unwrap();
    backed_up.sort_unstable();

    assert_eq!(backed_up, vec!["alpha".to_string(), "beta".to_string()]);
    assert_eq!(fx.storage.uploaded().len(), 2);
}

#[tokio::test]
async fn rejects_bad_destination_before_any_work() {
    let base = tempfile::tempdir().unwrap();
    make_world(base.path(), "alpha");
    let fx = fixture(base.path());

    let mut req = request(&["alpha"]);
    req.bucket = "s3://wrong-scheme".to_string();
    assert!(fx.backups.create(&req).await.is_err());
    assert!(fx.storage.uploaded().is_empty());
    assert!(fx.driver.lines_for("alpha").is_empty());
}

#[tokio::test]
async fn mixed_list_backs_up_only_eligible_servers() {
    let base = tempfile::tempdir().unwrap();
    make_world(base.path(), "alpha");
    make_world(base.path(), "beta");
    let fx = fixture(base.path());
    fx.store.register_server("alpha", 25565).unwrap();
    fx.store.register_server("beta", 25565).unwrap();
    fx.store.set_backup_enabled("alpha", true);
    fx.store.set_backup_enabled("beta", false);

    let backed_up = fx.backups.create(&request(&["alpha", "beta"])).await.unwrap();

    assert_eq!(backed_up, vec!["alpha".to_string()]);
    assert_eq!(
        fx.storage.uploaded(),
        vec!["gs://test-bucket/backups/alpha/alpha-backup.tar.gz".to_string()]
    );
    // the ineligible sibling keeps its state and is never touched
    assert_eq!(fx.store.backup_enabled("beta"), Some(false));
    assert!(fx.driver.lines_for("beta").is_empty());
}
