use std::fs;
use std::path::PathBuf;

use onyx_storage::env::Backend;
use onyxd::{run_with_config, Config};

fn config(data_dir: PathBuf, backend: Backend) -> Config {
    Config {
        backend,
        conf_path: data_dir.join("onyx.conf"),
        data_dir,
        pid_file: PathBuf::from("onyxd.pid"),
        detach_db: false,
        rescan: false,
        salvage_wallet: false,
        upgrade_wallet: None,
        load_block: Vec::new(),
        checkpoint_key: None,
        tor_proxy: None,
        bind: None,
        external_ips: vec!["203.0.113.1".to_string()],
        seed_nodes: Vec::new(),
        reserve_balance: None,
        db_cache_mb: None,
        db_log_size_mb: None,
        keypool: 2,
        print_block_index: false,
        print_block: None,
        log_level: onyx_log::Level::Error,
        log_format: onyx_log::Format::Text,
        log_timestamps: false,
    }
}

/// A wallet file from a later release: well-framed, version beyond this
/// build.
fn future_wallet_bytes() -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"onyxwlt\0");
    bytes.extend_from_slice(&3u32.to_le_bytes());
    bytes.push(0);
    bytes.push(0x7f);
    bytes.push(4);
    bytes.extend_from_slice(b"data");
    bytes
}

#[tokio::test(flavor = "multi_thread")]
async fn too_new_wallet_survives_failed_bootstrap_untouched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let wallet_path = dir.path().join("wallet.dat");
    let original = future_wallet_bytes();
    fs::write(&wallet_path, &original).expect("write wallet");

    let result = run_with_config(config(dir.path().to_path_buf(), Backend::Memory)).await;
    let message = result.expect_err("a too-new wallet must fail bootstrap");
    assert!(message.contains("requires a newer onyxd"), "got: {message}");

    // The failure is a report, never a write: the operator's file must
    // come back byte for byte, ready for the newer release.
    assert_eq!(fs::read(&wallet_path).expect("read wallet"), original);
}

#[tokio::test(flavor = "multi_thread")]
async fn store_open_failure_is_reported_before_salvage_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let wallet_path = dir.path().join("wallet.dat");
    fs::write(&wallet_path, b"damaged beyond recovery").expect("write wallet");
    // A plain file where the store directory belongs makes open fail.
    fs::write(dir.path().join("db"), b"in the way").expect("write blocker");

    let mut config = config(dir.path().to_path_buf(), Backend::Fjall);
    config.salvage_wallet = true;
    let message = run_with_config(config)
        .await
        .expect_err("store open must fail");
    assert!(message.contains("BACKUP THAT DIRECTORY"), "got: {message}");

    // Salvage never ran: the damaged wallet is untouched and no backup
    // copy was made.
    assert_eq!(
        fs::read(&wallet_path).expect("read wallet"),
        b"damaged beyond recovery"
    );
    let backups = fs::read_dir(dir.path())
        .expect("read dir")
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".bak"))
        .count();
    assert_eq!(backups, 0);
}
