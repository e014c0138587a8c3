//! Single-instance lock on the data directory.
//!
//! The sentinel file persists after release; only the advisory lock,
//! not the file, is the mutex.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

pub const LOCK_FILE_NAME: &str = ".lock";

#[derive(Debug)]
pub enum LockError {
    AlreadyRunning { dir: PathBuf, holder: Option<String> },
    Io(String),
}

impl std::fmt::Display for LockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockError::AlreadyRunning { dir, holder } => {
                write!(
                    f,
                    "cannot obtain a lock on data directory {}; onyxd is probably already running",
                    dir.display()
                )?;
                if let Some(holder) = holder {
                    write!(f, " ({holder})")?;
                }
                Ok(())
            }
            LockError::Io(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for LockError {}

pub struct InstanceLock {
    _file: File,
    lock_path: PathBuf,
}

impl InstanceLock {
    /// Non-blocking exclusive lock on `<data_dir>/.lock`. Failure means
    /// another live process holds the directory; it is never retried and
    /// nothing is written on that path.
    pub fn acquire(data_dir: &Path) -> Result<Self, LockError> {
        let lock_path = data_dir.join(LOCK_FILE_NAME);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&lock_path)
            .map_err(|err| {
                LockError::Io(format!(
                    "failed to open lock file {}: {err}",
                    lock_path.display()
                ))
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                let pid = std::process::id();
                let _ = file.set_len(0);
                let _ = file.seek(SeekFrom::Start(0));
                let _ = writeln!(file, "pid={pid}");
                let _ = file.flush();
                Ok(Self {
                    _file: file,
                    lock_path,
                })
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                let mut holder = String::new();
                let _ = File::open(&lock_path)
                    .and_then(|mut reader| reader.read_to_string(&mut holder));
                let holder = holder.trim();
                Err(LockError::AlreadyRunning {
                    dir: data_dir.to_path_buf(),
                    holder: (!holder.is_empty()).then(|| holder.to_string()),
                })
            }
            Err(err) => Err(LockError::Io(format!(
                "failed to lock data dir {} (lock file {}): {err}",
                data_dir.display(),
                lock_path.display()
            ))),
        }
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

pub fn write_pid_file(path: &Path) -> Result<(), String> {
    std::fs::write(path, format!("{}\n", std::process::id()))
        .map_err(|err| format!("failed to write pid file {}: {err}", path.display()))
}

pub fn remove_pid_file(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            onyx_log::log_warn!("failed to remove pid file {}: {err}", path.display());
        }
    }
}
