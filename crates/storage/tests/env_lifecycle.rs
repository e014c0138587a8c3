use std::cell::Cell;
use std::fs;

use onyx_storage::env::{Backend, EnvOptions, EnvState, StoreEnv, VerifyResult};
use onyx_storage::{Column, KeyValueStore, StoreError};

fn memory_env() -> StoreEnv {
    StoreEnv::new(Backend::Memory, EnvOptions::default())
}

#[test]
fn open_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = memory_env();
    assert_eq!(env.state(), EnvState::Closed);
    env.open(dir.path()).expect("first open");
    env.open(dir.path()).expect("second open is a no-op");
    assert_eq!(env.state(), EnvState::Open);
}

#[test]
fn store_access_requires_open() {
    let env = memory_env();
    match env.store() {
        Err(StoreError::Closed) => {}
        other => panic!("expected Closed error, got {other:?}"),
    }

    let dir = tempfile::tempdir().expect("tempdir");
    env.open(dir.path()).expect("open");
    let store = env.store().expect("store");
    store.put(Column::Meta, b"key", b"value").expect("put");
    assert_eq!(
        store.get(Column::Meta, b"key").expect("get"),
        Some(b"value".to_vec())
    );
}

#[test]
fn verify_intact_file_never_invokes_recovery() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = memory_env();
    let path = dir.path().join("wallet.dat");
    fs::write(&path, b"good").expect("write");

    let recovered = Cell::new(false);
    let result = env.verify(
        &path,
        |bytes| bytes == b"good",
        |_| {
            recovered.set(true);
            true
        },
    );
    assert_eq!(result, VerifyResult::Ok);
    assert!(!recovered.get());
}

#[test]
fn verify_missing_file_is_clean() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = memory_env();
    let recovered = Cell::new(false);
    let result = env.verify(
        &dir.path().join("wallet.dat"),
        |_| false,
        |_| {
            recovered.set(true);
            true
        },
    );
    assert_eq!(result, VerifyResult::Ok);
    assert!(!recovered.get());
}

#[test]
fn verify_corrupt_file_invokes_recovery_exactly_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = memory_env();
    let path = dir.path().join("wallet.dat");
    fs::write(&path, b"garbage").expect("write");

    let calls = Cell::new(0u32);
    let result = env.verify(
        &path,
        |_| false,
        |_| {
            calls.set(calls.get() + 1);
            true
        },
    );
    assert_eq!(result, VerifyResult::RecoveredOk);
    assert_eq!(calls.get(), 1);

    let result = env.verify(&path, |_| false, |_| false);
    assert_eq!(result, VerifyResult::RecoverFailed);
}

#[test]
fn final_flush_transitions_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = memory_env();
    env.open(dir.path()).expect("open");

    env.flush(false);
    assert_eq!(env.state(), EnvState::Open);

    env.flush(true);
    assert_eq!(env.state(), EnvState::Flushed);
    assert!(matches!(env.store(), Err(StoreError::Closed)));
}

#[test]
fn detaching_final_flush_marks_detached() {
    let dir = tempfile::tempdir().expect("tempdir");
    let env = memory_env();
    env.set_detach(true);
    env.open(dir.path()).expect("open");
    env.flush(true);
    assert_eq!(env.state(), EnvState::Detached);
}
