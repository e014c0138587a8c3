//! Peer address table with best-effort JSON persistence.
//!
//! A missing or corrupt peers file costs only discovery state; the
//! caller recreates an empty table and keeps going.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::write_file_atomic;

pub const PEERS_FILE_NAME: &str = "peers.dat";
const PEERS_FILE_VERSION: u32 = 1;
const ADDR_BOOK_MAX: usize = 5000;
const PEERS_PERSIST_INTERVAL_SECS: u64 = 60;
const PERSIST_POLL_SECS: u64 = 1;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AddrBookEntry {
    pub last_seen: u64,
    pub attempts: u32,
}

#[derive(Default)]
pub struct AddrBook {
    inner: Mutex<HashMap<SocketAddr, AddrBookEntry>>,
    revision: AtomicU64,
}

impl AddrBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, addr: SocketAddr, entry: AddrBookEntry) {
        let mut inner = self.inner.lock().expect("addr book lock");
        if inner.len() >= ADDR_BOOK_MAX && !inner.contains_key(&addr) {
            return;
        }
        inner.insert(addr, entry);
        drop(inner);
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    pub fn mark_seen(&self, addr: SocketAddr, now: u64) {
        let mut inner = self.inner.lock().expect("addr book lock");
        let entry = inner.entry(addr).or_default();
        entry.last_seen = now;
        drop(inner);
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("addr book lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Vec<(SocketAddr, AddrBookEntry)> {
        let inner = self.inner.lock().expect("addr book lock");
        inner.iter().map(|(addr, entry)| (*addr, *entry)).collect()
    }
}

#[derive(Deserialize, Serialize)]
struct PeersFile {
    version: u32,
    peers: Vec<PeersFileEntry>,
}

#[derive(Deserialize, Serialize)]
struct PeersFileEntry {
    addr: String,
    #[serde(default)]
    last_seen: u64,
    #[serde(default)]
    attempts: u32,
}

pub fn load_peers_file(path: &Path) -> Result<Vec<(SocketAddr, AddrBookEntry)>, String> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.to_string()),
    };
    let file: PeersFile =
        serde_json::from_slice(&bytes).map_err(|err| format!("invalid peers file: {err}"))?;
    if file.version != PEERS_FILE_VERSION {
        return Err(format!(
            "unsupported peers file version {} (expected {})",
            file.version, PEERS_FILE_VERSION
        ));
    }

    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for peer in file.peers {
        if out.len() >= ADDR_BOOK_MAX {
            break;
        }
        let Ok(addr) = peer.addr.parse::<SocketAddr>() else {
            continue;
        };
        if addr.port() == 0 {
            continue;
        }
        if seen.insert(addr) {
            out.push((
                addr,
                AddrBookEntry {
                    last_seen: peer.last_seen,
                    attempts: peer.attempts,
                },
            ));
        }
    }
    Ok(out)
}

pub fn save_peers_file(path: &Path, peers: &[(SocketAddr, AddrBookEntry)]) -> Result<(), String> {
    let mut entries = peers
        .iter()
        .map(|(addr, entry)| PeersFileEntry {
            addr: addr.to_string(),
            last_seen: entry.last_seen,
            attempts: entry.attempts,
        })
        .collect::<Vec<_>>();
    entries.sort_by(|a, b| a.addr.cmp(&b.addr));
    entries.dedup_by(|a, b| a.addr == b.addr);
    if entries.len() > ADDR_BOOK_MAX {
        entries.truncate(ADDR_BOOK_MAX);
    }

    let file = PeersFile {
        version: PEERS_FILE_VERSION,
        peers: entries,
    };
    let json = serde_json::to_vec_pretty(&file).map_err(|err| err.to_string())?;
    write_file_atomic(path, &json)
}

/// Background persistence of the address table. Owns the writer thread;
/// `stop` flushes one final snapshot and joins.
pub struct PeerPersistHandle {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl PeerPersistHandle {
    pub fn spawn(addr_book: Arc<AddrBook>, path: PathBuf) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let handle = thread::spawn(move || {
            persist_peers_loop(addr_book, path, thread_stop);
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn persist_peers_loop(addr_book: Arc<AddrBook>, path: PathBuf, stop: Arc<AtomicBool>) {
    let mut last_revision = addr_book.revision().wrapping_sub(1);
    let mut since_persist = PEERS_PERSIST_INTERVAL_SECS;
    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        if since_persist >= PEERS_PERSIST_INTERVAL_SECS {
            since_persist = 0;
            let revision = addr_book.revision();
            if revision != last_revision {
                let snapshot = addr_book.snapshot();
                match save_peers_file(&path, &snapshot) {
                    Ok(()) => last_revision = revision,
                    Err(err) => onyx_log::log_warn!("failed to persist peers: {err}"),
                }
            }
        }
        thread::sleep(Duration::from_secs(PERSIST_POLL_SECS));
        since_persist += PERSIST_POLL_SECS;
    }

    // Final snapshot on the way out.
    let revision = addr_book.revision();
    if revision != last_revision {
        if let Err(err) = save_peers_file(&path, &addr_book.snapshot()) {
            onyx_log::log_warn!("failed to persist peers at shutdown: {err}");
        }
    }
}
