//! Flat-file wallet store: keys, keypool, address book, transaction
//! records, and the block locator used to plan rescans.
//!
//! The file is a fixed header followed by self-delimiting records, so a
//! lossy reader can skip record types it does not understand while any
//! damage to key material is treated as corruption.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use onyx_chainstate::encoding::{Decoder, Encoder};
use onyx_chainstate::locator::BlockLocator;
use onyx_chainstate::Hash256;
use rand::RngCore;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use zeroize::Zeroize;

use crate::write_file_atomic;

pub const WALLET_FILE_NAME: &str = "wallet.dat";
pub const WALLET_FILE_VERSION: u32 = 2;
pub const DEFAULT_KEYPOOL_SIZE: usize = 100;

const WALLET_MAGIC: &[u8; 8] = b"onyxwlt\0";
const WALLET_HEADER_LEN: usize = 13;
const FLAG_NEEDS_REWRITE: u8 = 1 << 0;

const RECORD_KEY: u8 = 1;
const RECORD_ADDRESS_BOOK: u8 = 2;
const RECORD_DEFAULT_KEY: u8 = 3;
const RECORD_LOCATOR: u8 = 4;
const RECORD_KEYPOOL: u8 = 5;
const RECORD_TX: u8 = 6;

/// Secret key bytes, wiped on drop.
pub struct SecretBytes([u8; 32]);

impl SecretBytes {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Clone for SecretBytes {
    fn clone(&self) -> Self {
        Self(self.0)
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

#[derive(Debug)]
pub enum WalletLoadError {
    Corrupt,
    TooNew(u32),
    NeedRewrite,
    Io(String),
}

impl std::fmt::Display for WalletLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WalletLoadError::Corrupt => write!(f, "error loading wallet.dat: wallet corrupted"),
            WalletLoadError::TooNew(version) => write!(
                f,
                "error loading wallet.dat: wallet file version {version} requires a newer onyxd"
            ),
            WalletLoadError::NeedRewrite => {
                write!(f, "wallet.dat needed to be rewritten: restart onyxd to complete")
            }
            WalletLoadError::Io(message) => write!(f, "error loading wallet.dat: {message}"),
        }
    }
}

impl std::error::Error for WalletLoadError {}

pub struct WalletLoadOutcome {
    pub wallet: Wallet,
    pub first_run: bool,
    /// Non-critical read problem: keys are intact but auxiliary records
    /// were skipped.
    pub warning: Option<String>,
}

pub struct Wallet {
    path: PathBuf,
    version: u32,
    max_version: Option<u32>,
    keys: BTreeMap<Vec<u8>, SecretBytes>,
    keypool: VecDeque<(Vec<u8>, SecretBytes)>,
    address_book: BTreeMap<Vec<u8>, String>,
    default_key: Option<Vec<u8>>,
    locator: Option<BlockLocator>,
    tx_store: BTreeMap<Hash256, Vec<u8>>,
}

impl Wallet {
    /// A wallet with no records, used for first runs and as the
    /// replacement store when a damaged wallet cannot be loaded.
    pub(crate) fn empty(path: PathBuf) -> Self {
        Self {
            path,
            version: WALLET_FILE_VERSION,
            max_version: None,
            keys: BTreeMap::new(),
            keypool: VecDeque::new(),
            address_book: BTreeMap::new(),
            default_key: None,
            locator: None,
            tx_store: BTreeMap::new(),
        }
    }

    /// Load the wallet file. A missing file is a fresh wallet
    /// (`first_run`), not an error. Damage to key records is `Corrupt`;
    /// damage confined to auxiliary records loads with a warning.
    pub fn load(path: &Path) -> Result<WalletLoadOutcome, WalletLoadError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(WalletLoadOutcome {
                    wallet: Self::empty(path.to_path_buf()),
                    first_run: true,
                    warning: None,
                });
            }
            Err(err) => return Err(WalletLoadError::Io(err.to_string())),
        };

        let (version, flags, body) = decode_header(&bytes).ok_or(WalletLoadError::Corrupt)?;
        if version > WALLET_FILE_VERSION {
            return Err(WalletLoadError::TooNew(version));
        }
        if flags & FLAG_NEEDS_REWRITE != 0 {
            return Err(WalletLoadError::NeedRewrite);
        }

        let mut wallet = Self::empty(path.to_path_buf());
        wallet.version = version;
        let mut lossy = false;

        let mut decoder = Decoder::new(body);
        while !decoder.is_empty() {
            let record_type = decoder.read_u8().map_err(|_| WalletLoadError::Corrupt)?;
            let payload = decoder
                .read_var_bytes()
                .map_err(|_| WalletLoadError::Corrupt)?;
            let mut record = Decoder::new(&payload);
            match record_type {
                RECORD_KEY | RECORD_KEYPOOL => {
                    let public = record.read_var_bytes().map_err(|_| WalletLoadError::Corrupt)?;
                    let secret = record
                        .read_fixed::<32>()
                        .map_err(|_| WalletLoadError::Corrupt)?;
                    if PublicKey::from_slice(&public).is_err()
                        || SecretKey::from_slice(&secret).is_err()
                    {
                        return Err(WalletLoadError::Corrupt);
                    }
                    if record_type == RECORD_KEY {
                        wallet.keys.insert(public, SecretBytes::new(secret));
                    } else {
                        wallet.keypool.push_back((public, SecretBytes::new(secret)));
                    }
                }
                RECORD_ADDRESS_BOOK => {
                    match (record.read_var_bytes(), record.read_var_str()) {
                        (Ok(public), Ok(label)) => {
                            wallet.address_book.insert(public, label);
                        }
                        _ => lossy = true,
                    }
                }
                RECORD_DEFAULT_KEY => match record.read_var_bytes() {
                    Ok(public) => wallet.default_key = Some(public),
                    Err(_) => lossy = true,
                },
                RECORD_LOCATOR => match BlockLocator::decode(&payload) {
                    Ok(locator) => wallet.locator = Some(locator),
                    Err(_) => lossy = true,
                },
                RECORD_TX => match (record.read_hash(), record.read_var_bytes()) {
                    (Ok(txid), Ok(raw)) => {
                        wallet.tx_store.insert(txid, raw);
                    }
                    _ => lossy = true,
                },
                _ => lossy = true,
            }
        }

        let warning = lossy.then(|| {
            "error reading wallet.dat: all keys read correctly, but transaction data, \
             address book entries or the sync locator may be missing or incorrect"
                .to_string()
        });
        Ok(WalletLoadOutcome {
            wallet,
            first_run: false,
            warning,
        })
    }

    pub fn save(&self) -> Result<(), String> {
        write_file_atomic(&self.path, &self.encode())
            .map_err(|err| format!("failed to write {}: {err}", self.path.display()))
    }

    fn encode(&self) -> Vec<u8> {
        let mut encoder = Encoder::new();
        encoder.write_bytes(WALLET_MAGIC);
        encoder.write_u32_le(self.version);
        encoder.write_u8(0);

        for (public, secret) in &self.keys {
            write_record(&mut encoder, RECORD_KEY, |record| {
                record.write_var_bytes(public);
                record.write_bytes(secret.as_bytes());
            });
        }
        for (public, secret) in &self.keypool {
            write_record(&mut encoder, RECORD_KEYPOOL, |record| {
                record.write_var_bytes(public);
                record.write_bytes(secret.as_bytes());
            });
        }
        for (public, label) in &self.address_book {
            write_record(&mut encoder, RECORD_ADDRESS_BOOK, |record| {
                record.write_var_bytes(public);
                record.write_var_str(label);
            });
        }
        if let Some(public) = &self.default_key {
            write_record(&mut encoder, RECORD_DEFAULT_KEY, |record| {
                record.write_var_bytes(public);
            });
        }
        if let Some(locator) = &self.locator {
            let payload = locator.encode();
            encoder.write_u8(RECORD_LOCATOR);
            encoder.write_var_bytes(&payload);
        }
        for (txid, raw) in &self.tx_store {
            write_record(&mut encoder, RECORD_TX, |record| {
                record.write_hash(txid);
                record.write_var_bytes(raw);
            });
        }
        encoder.into_inner()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Apply an operator upgrade request. `Some(0)` means "latest"; the
    /// version bump is persisted immediately so it survives a crash
    /// mid-upgrade. A non-zero request is only a ceiling for future
    /// feature negotiation: it is recorded, the file version stays
    /// untouched. A ceiling below the current version is a downgrade
    /// and rejected. Returns an operator warning when the recorded
    /// ceiling stays below the latest version.
    pub fn upgrade(&mut self, requested: Option<u32>) -> Result<Option<String>, String> {
        let Some(requested) = requested else {
            return Ok(None);
        };
        if requested == 0 {
            if self.version != WALLET_FILE_VERSION {
                self.version = WALLET_FILE_VERSION;
                self.save()?;
            }
            return Ok(None);
        }
        if requested < self.version {
            return Err("cannot downgrade wallet".to_string());
        }
        self.max_version = Some(requested);
        let warning = (requested < WALLET_FILE_VERSION).then(|| {
            format!(
                "wallet version ceiling {requested} is below the latest \
                 {WALLET_FILE_VERSION}; some features stay disabled"
            )
        });
        Ok(warning)
    }

    pub fn max_version(&self) -> Option<u32> {
        self.max_version
    }

    /// First-run provisioning: one generated default key with an
    /// empty-label address book entry, plus a filled keypool. Sub-step
    /// failures are reported, not fatal here; the orchestrator defers
    /// them.
    pub fn first_run_init(&mut self, keypool_target: usize) -> Vec<String> {
        let mut problems = Vec::new();
        if let Err(err) = self.top_up_keypool(keypool_target) {
            problems.push(format!("cannot initialize keypool: {err}"));
        }
        match self.take_pool_key() {
            Ok((public, secret)) => {
                self.keys.insert(public.clone(), secret);
                self.address_book.insert(public.clone(), String::new());
                self.default_key = Some(public);
            }
            Err(err) => problems.push(format!("cannot write default address: {err}")),
        }
        if let Err(err) = self.save() {
            problems.push(err);
        }
        problems
    }

    pub fn top_up_keypool(&mut self, target: usize) -> Result<usize, String> {
        let mut added = 0usize;
        while self.keypool.len() < target {
            let (public, secret) = generate_key()?;
            self.keypool.push_back((public, secret));
            added += 1;
        }
        Ok(added)
    }

    /// Pop a key from the pool, generating one directly if the pool is
    /// dry.
    fn take_pool_key(&mut self) -> Result<(Vec<u8>, SecretBytes), String> {
        match self.keypool.pop_front() {
            Some(entry) => Ok(entry),
            None => generate_key(),
        }
    }

    pub fn locator(&self) -> Option<&BlockLocator> {
        self.locator.as_ref()
    }

    pub fn set_locator(&mut self, locator: BlockLocator) {
        self.locator = Some(locator);
    }

    /// Replay hook: each historical block the rescan touches moves the
    /// wallet's sync position forward.
    pub fn observe_block(&mut self, _height: i32, hash: Hash256) {
        self.locator = Some(BlockLocator::new(vec![hash]));
    }

    pub fn record_transaction(&mut self, txid: Hash256, raw: Vec<u8>) {
        self.tx_store.insert(txid, raw);
    }

    pub fn default_key(&self) -> Option<&[u8]> {
        self.default_key.as_deref()
    }

    pub fn address_label(&self, public: &[u8]) -> Option<&str> {
        self.address_book.get(public).map(|label| label.as_str())
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    pub fn keypool_size(&self) -> usize {
        self.keypool.len()
    }
}

fn write_record(encoder: &mut Encoder, record_type: u8, build: impl FnOnce(&mut Encoder)) {
    let mut record = Encoder::new();
    build(&mut record);
    encoder.write_u8(record_type);
    encoder.write_var_bytes(&record.into_inner());
}

fn decode_header(bytes: &[u8]) -> Option<(u32, u8, &[u8])> {
    if bytes.len() < WALLET_HEADER_LEN || &bytes[..8] != WALLET_MAGIC {
        return None;
    }
    let version = u32::from_le_bytes(bytes[8..12].try_into().ok()?);
    if version == 0 {
        return None;
    }
    Some((version, bytes[12], &bytes[WALLET_HEADER_LEN..]))
}

/// Structural check used by the store environment's verify pass: the
/// header must parse and the record framing must walk to the end.
pub fn check_format(bytes: &[u8]) -> bool {
    let Some((_, _, body)) = decode_header(bytes) else {
        return false;
    };
    let mut decoder = Decoder::new(body);
    while !decoder.is_empty() {
        if decoder.read_u8().is_err() || decoder.read_var_bytes().is_err() {
            return false;
        }
    }
    true
}

pub struct SalvageStats {
    pub recovered_keys: usize,
    pub backup_path: PathBuf,
}

/// Best-effort recovery: scan the damaged file for readable key pairs
/// (pool keys included) and write a fresh wallet containing only those.
/// Transaction history, labels and the locator are not preserved, which
/// is why salvage always implies a full rescan. The damaged original is
/// kept as `wallet.<unix-ts>.bak`.
pub fn salvage(path: &Path) -> Result<SalvageStats, String> {
    let bytes = fs::read(path)
        .map_err(|err| format!("cannot read {} for salvage: {err}", path.display()))?;

    let body = match decode_header(&bytes) {
        Some((_, _, body)) => body,
        None => &bytes[..],
    };

    let secp = Secp256k1::new();
    let mut recovered: BTreeMap<Vec<u8>, SecretBytes> = BTreeMap::new();
    let mut decoder = Decoder::new(body);
    while !decoder.is_empty() {
        let Ok(record_type) = decoder.read_u8() else {
            break;
        };
        let Ok(payload) = decoder.read_var_bytes() else {
            break;
        };
        if record_type != RECORD_KEY && record_type != RECORD_KEYPOOL {
            continue;
        }
        let mut record = Decoder::new(&payload);
        let (Ok(public), Ok(secret)) = (record.read_var_bytes(), record.read_fixed::<32>())
        else {
            continue;
        };
        let (Ok(parsed_public), Ok(parsed_secret)) = (
            PublicKey::from_slice(&public),
            SecretKey::from_slice(&secret),
        ) else {
            continue;
        };
        // A key pair that does not match is damage, not data.
        if parsed_secret.public_key(&secp) != parsed_public {
            continue;
        }
        recovered.insert(public, SecretBytes::new(secret));
    }

    if recovered.is_empty() {
        return Err(format!(
            "salvage of {} found no recoverable keys",
            path.display()
        ));
    }

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);
    let backup_path = path.with_file_name(format!("wallet.{timestamp}.bak"));
    fs::copy(path, &backup_path)
        .map_err(|err| format!("cannot back up {}: {err}", path.display()))?;

    let mut fresh = Wallet::empty(path.to_path_buf());
    let recovered_keys = recovered.len();
    fresh.keys = recovered;
    fresh.save()?;
    onyx_log::log_info!(
        "salvaged {} key(s) from {} (backup at {})",
        recovered_keys,
        path.display(),
        backup_path.display()
    );
    Ok(SalvageStats {
        recovered_keys,
        backup_path,
    })
}

/// Recovery callback handed to `StoreEnv::verify`.
pub fn recover_file(path: &Path) -> bool {
    match salvage(path) {
        Ok(_) => true,
        Err(err) => {
            onyx_log::log_error!("{err}");
            false
        }
    }
}

fn generate_key() -> Result<(Vec<u8>, SecretBytes), String> {
    let secp = Secp256k1::new();
    let mut rng = rand::rngs::OsRng;
    let mut seed = [0u8; 32];
    for _ in 0..100 {
        rng.fill_bytes(&mut seed);
        let Ok(secret) = SecretKey::from_slice(&seed) else {
            continue;
        };
        let public = secret.public_key(&secp).serialize().to_vec();
        let secret_bytes = SecretBytes::new(seed);
        seed.zeroize();
        return Ok((public, secret_bytes));
    }
    Err("failed to generate a secret key".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_fresh(dir: &Path) -> Wallet {
        let outcome = Wallet::load(&dir.join(WALLET_FILE_NAME)).expect("load");
        assert!(outcome.first_run);
        outcome.wallet
    }

    #[test]
    fn missing_file_is_first_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let wallet = load_fresh(dir.path());
        assert_eq!(wallet.key_count(), 0);
        assert!(wallet.locator().is_none());
    }

    #[test]
    fn first_run_creates_default_key_with_empty_label() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut wallet = load_fresh(dir.path());
        let problems = wallet.first_run_init(5);
        assert!(problems.is_empty(), "unexpected problems: {problems:?}");
        let default_key = wallet.default_key().expect("default key").to_vec();
        assert_eq!(wallet.address_label(&default_key), Some(""));
        assert_eq!(wallet.key_count(), 1);
        assert_eq!(wallet.keypool_size(), 4);

        let reloaded = Wallet::load(&dir.path().join(WALLET_FILE_NAME)).expect("reload");
        assert!(!reloaded.first_run);
        assert!(reloaded.warning.is_none());
        assert_eq!(reloaded.wallet.default_key(), Some(default_key.as_slice()));
        assert_eq!(reloaded.wallet.keypool_size(), 4);
    }

    #[test]
    fn locator_and_transactions_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut wallet = load_fresh(dir.path());
        wallet.set_locator(BlockLocator::new(vec![[9u8; 32]]));
        wallet.record_transaction([3u8; 32], vec![1, 2, 3]);
        wallet.save().expect("save");

        let reloaded = Wallet::load(&dir.path().join(WALLET_FILE_NAME))
            .expect("reload")
            .wallet;
        assert_eq!(
            reloaded.locator().expect("locator").hashes,
            vec![[9u8; 32]]
        );
        assert_eq!(reloaded.tx_store.get(&[3u8; 32]), Some(&vec![1, 2, 3]));
    }

    #[test]
    fn garbage_file_is_corrupt() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(WALLET_FILE_NAME);
        fs::write(&path, b"not a wallet").expect("write");
        match Wallet::load(&path) {
            Err(WalletLoadError::Corrupt) => {}
            other => panic!("expected Corrupt, got {:?}", other.err()),
        }
        assert!(!check_format(b"not a wallet"));
    }

    #[test]
    fn future_version_is_too_new() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(WALLET_FILE_NAME);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(WALLET_MAGIC);
        bytes.extend_from_slice(&(WALLET_FILE_VERSION + 1).to_le_bytes());
        bytes.push(0);
        fs::write(&path, &bytes).expect("write");
        match Wallet::load(&path) {
            Err(WalletLoadError::TooNew(version)) => {
                assert_eq!(version, WALLET_FILE_VERSION + 1);
            }
            other => panic!("expected TooNew, got {:?}", other.err()),
        }
    }

    #[test]
    fn rewrite_flag_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(WALLET_FILE_NAME);
        let mut bytes = Vec::new();
        bytes.extend_from_slice(WALLET_MAGIC);
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.push(FLAG_NEEDS_REWRITE);
        fs::write(&path, &bytes).expect("write");
        match Wallet::load(&path) {
            Err(WalletLoadError::NeedRewrite) => {}
            other => panic!("expected NeedRewrite, got {:?}", other.err()),
        }
    }

    #[test]
    fn unknown_record_loads_with_warning() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut wallet = load_fresh(dir.path());
        wallet.first_run_init(1);
        let path = dir.path().join(WALLET_FILE_NAME);

        // Append a well-framed record of an unknown type.
        let mut bytes = fs::read(&path).expect("read");
        let mut encoder = Encoder::new();
        encoder.write_u8(0x7e);
        encoder.write_var_bytes(b"future data");
        bytes.extend_from_slice(&encoder.into_inner());
        fs::write(&path, &bytes).expect("write");

        assert!(check_format(&bytes));
        let outcome = Wallet::load(&path).expect("load");
        assert!(outcome.warning.is_some());
        assert_eq!(outcome.wallet.key_count(), 1);
    }

    #[test]
    fn upgrade_to_latest_persists_immediately() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(WALLET_FILE_NAME);
        let mut wallet = Wallet::empty(path.clone());
        wallet.version = 1;
        wallet.save().expect("save");

        let mut wallet = Wallet::load(&path).expect("load").wallet;
        assert_eq!(wallet.version(), 1);
        let warning = wallet.upgrade(Some(0)).expect("upgrade");
        assert!(warning.is_none());
        assert_eq!(wallet.version(), WALLET_FILE_VERSION);
        // Already on disk without another save call.
        let reloaded = Wallet::load(&path).expect("reload").wallet;
        assert_eq!(reloaded.version(), WALLET_FILE_VERSION);
    }

    #[test]
    fn downgrade_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut wallet = Wallet::empty(dir.path().join(WALLET_FILE_NAME));
        assert_eq!(wallet.version(), WALLET_FILE_VERSION);
        assert!(wallet.upgrade(Some(1)).is_err());
        assert_eq!(wallet.version(), WALLET_FILE_VERSION);
        assert_eq!(wallet.max_version(), None);
    }

    #[test]
    fn nonzero_ceiling_is_recorded_without_bumping_version() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(WALLET_FILE_NAME);
        let mut wallet = Wallet::empty(path.clone());
        wallet.version = 1;
        wallet.save().expect("save");

        let mut wallet = Wallet::load(&path).expect("load").wallet;
        let warning = wallet.upgrade(Some(WALLET_FILE_VERSION)).expect("upgrade");
        assert!(warning.is_none());
        assert_eq!(wallet.version(), 1);
        assert_eq!(wallet.max_version(), Some(WALLET_FILE_VERSION));
        // Only the zero request rewrites the file.
        let reloaded = Wallet::load(&path).expect("reload").wallet;
        assert_eq!(reloaded.version(), 1);
    }

    #[test]
    fn ceiling_below_latest_warns() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut wallet = Wallet::empty(dir.path().join(WALLET_FILE_NAME));
        wallet.version = 1;
        let warning = wallet.upgrade(Some(1)).expect("upgrade");
        assert!(warning.is_some());
        assert_eq!(wallet.version(), 1);
        assert_eq!(wallet.max_version(), Some(1));
    }

    #[test]
    fn upgrade_without_request_is_a_no_op() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut wallet = Wallet::empty(dir.path().join(WALLET_FILE_NAME));
        wallet.version = 1;
        assert!(wallet.upgrade(None).expect("no-op").is_none());
        assert_eq!(wallet.version(), 1);
    }

    #[test]
    fn salvage_recovers_keys_and_backs_up_original() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut wallet = load_fresh(dir.path());
        wallet.first_run_init(3);
        wallet.set_locator(BlockLocator::new(vec![[5u8; 32]]));
        wallet.save().expect("save");
        let path = dir.path().join(WALLET_FILE_NAME);

        // Truncate mid-stream to damage the tail of the file.
        let bytes = fs::read(&path).expect("read");
        fs::write(&path, &bytes[..bytes.len() - 3]).expect("truncate");

        let stats = salvage(&path).expect("salvage");
        assert!(stats.recovered_keys >= 1);
        assert!(stats.backup_path.exists());

        let outcome = Wallet::load(&path).expect("load salvaged");
        assert_eq!(
            outcome.wallet.key_count() + outcome.wallet.keypool_size(),
            0 + stats.recovered_keys
        );
        // Salvage drops the locator, forcing a full rescan.
        assert!(outcome.wallet.locator().is_none());
    }

    #[test]
    fn salvage_with_no_keys_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(WALLET_FILE_NAME);
        fs::write(&path, b"nothing useful in here").expect("write");
        assert!(salvage(&path).is_err());
        assert!(!recover_file(&path));
    }
}
