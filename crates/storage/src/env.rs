//! Lifecycle wrapper around the transactional store.
//!
//! The environment owns open/verify/flush/detach for the backing store.
//! Store-dependent components must not touch the database while the
//! environment is `Closed`; `store()` enforces that.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::memory::MemoryStore;
use crate::{KeyValueStore, StoreError};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Backend {
    Memory,
    Fjall,
}

impl Backend {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "memory" => Some(Self::Memory),
            "fjall" => Some(Self::Fjall),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EnvState {
    Closed,
    Open,
    Flushed,
    Detached,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VerifyResult {
    Ok,
    RecoveredOk,
    RecoverFailed,
}

#[derive(Clone, Debug, Default)]
pub struct EnvOptions {
    pub cache_bytes: Option<u64>,
    pub journal_bytes: Option<u64>,
}

struct EnvInner {
    state: EnvState,
    dir: Option<PathBuf>,
    store: Option<Arc<dyn KeyValueStore>>,
}

pub struct StoreEnv {
    backend: Backend,
    options: EnvOptions,
    detach: AtomicBool,
    inner: Mutex<EnvInner>,
}

impl StoreEnv {
    pub fn new(backend: Backend, options: EnvOptions) -> Self {
        Self {
            backend,
            options,
            detach: AtomicBool::new(false),
            inner: Mutex::new(EnvInner {
                state: EnvState::Closed,
                dir: None,
                store: None,
            }),
        }
    }

    /// Configuration only: a detaching final flush releases write-ahead
    /// segments, trading slower shutdown for less steady-state disk.
    pub fn set_detach(&self, detach: bool) {
        self.detach.store(detach, Ordering::Relaxed);
    }

    pub fn detach(&self) -> bool {
        self.detach.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> EnvState {
        self.inner.lock().expect("store env lock").state
    }

    /// Open the environment rooted at `dir`. Calling `open` again while
    /// already open is a no-op success.
    pub fn open(&self, dir: &Path) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("store env lock");
        if inner.store.is_some() {
            return Ok(());
        }
        if inner.state != EnvState::Closed {
            return Err(StoreError::Backend(
                "store environment already shut down".to_string(),
            ));
        }

        let db_path = dir.join("db");
        let store: Arc<dyn KeyValueStore> = match self.backend {
            Backend::Memory => Arc::new(MemoryStore::new()),
            Backend::Fjall => open_fjall(&db_path, &self.options).map_err(|err| {
                StoreError::Backend(format!(
                    "error initializing store environment {}: {err}. To recover, \
                     BACKUP THAT DIRECTORY, then remove everything from it except \
                     for wallet.dat",
                    dir.display()
                ))
            })?,
        };

        inner.state = EnvState::Open;
        inner.dir = Some(dir.to_path_buf());
        inner.store = Some(store);
        Ok(())
    }

    /// Handle to the open store; refuses while `Closed`.
    pub fn store(&self) -> Result<Arc<dyn KeyValueStore>, StoreError> {
        let inner = self.inner.lock().expect("store env lock");
        inner.store.clone().ok_or(StoreError::Closed)
    }

    /// Structural-integrity check of a flat file managed alongside the
    /// environment. `check` judges the file bytes; on corruption (or an
    /// unreadable file) `recover` runs exactly once and its outcome
    /// decides between `RecoveredOk` and `RecoverFailed`. A missing file
    /// verifies clean.
    pub fn verify(
        &self,
        path: &Path,
        check: impl FnOnce(&[u8]) -> bool,
        recover: impl FnOnce(&Path) -> bool,
    ) -> VerifyResult {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return VerifyResult::Ok,
            Err(err) => {
                onyx_log::log_warn!("cannot read {} for verification: {err}", path.display());
                return run_recover(path, recover);
            }
        };
        if check(&bytes) {
            return VerifyResult::Ok;
        }
        run_recover(path, recover)
    }

    /// Force durability of pending writes. The non-final flush is
    /// best-effort and must not block long operations; the final flush
    /// blocks until everything is synced and moves the environment to
    /// `Flushed` (or `Detached` when the detach flag is set).
    pub fn flush(&self, final_flush: bool) {
        let mut inner = self.inner.lock().expect("store env lock");
        let Some(store) = inner.store.clone() else {
            return;
        };
        if !final_flush {
            if let Err(err) = store.persist(false) {
                onyx_log::log_warn!("non-final store flush failed: {err}");
            }
            return;
        }

        if let Err(err) = store.persist(true) {
            onyx_log::log_error!("final store flush failed: {err}");
        }
        if self.detach() {
            if let Err(err) = store.release_logs() {
                onyx_log::log_warn!("failed to release store logs: {err}");
            }
            inner.state = EnvState::Detached;
        } else {
            inner.state = EnvState::Flushed;
        }
        inner.store = None;
    }
}

fn run_recover(path: &Path, recover: impl FnOnce(&Path) -> bool) -> VerifyResult {
    if recover(path) {
        VerifyResult::RecoveredOk
    } else {
        VerifyResult::RecoverFailed
    }
}

#[cfg(feature = "fjall")]
fn open_fjall(
    db_path: &Path,
    options: &EnvOptions,
) -> Result<Arc<dyn KeyValueStore>, StoreError> {
    let store = crate::fjall::FjallStore::open_with_options(
        db_path,
        crate::fjall::FjallOptions {
            cache_bytes: options.cache_bytes,
            journal_bytes: options.journal_bytes,
        },
    )?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "fjall"))]
fn open_fjall(
    _db_path: &Path,
    _options: &EnvOptions,
) -> Result<Arc<dyn KeyValueStore>, StoreError> {
    Err(StoreError::Backend(
        "fjall backend requested but the fjall feature is disabled".to_string(),
    ))
}
