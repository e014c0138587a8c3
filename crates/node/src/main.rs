//! onyxd node daemon: bootstrap, recovery, and shutdown control.
//!
//! The orchestrator here wires the pieces together in a fixed order:
//! instance lock, store environment, wallet verification, chain index
//! load, wallet load, rescan, block import, peer table, reachability,
//! then steady state until a shutdown request tears everything down.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use onyx_chainstate::index::{ChainIndex, IndexLoadError, LoadedIndex};
use onyx_chainstate::locator::BlockLocator;
use onyx_log::{log_error, log_info, log_warn};
use onyx_storage::env::{Backend, EnvOptions, StoreEnv, VerifyResult};
use onyx_storage::{Column, KeyValueStore};

pub mod import;
pub mod lock;
pub mod net;
pub mod peers;
pub mod rescan;
pub mod shutdown;
pub mod wallet;

use crate::import::BlockImportSink;
use crate::lock::InstanceLock;
use crate::peers::{AddrBook, AddrBookEntry, PeerPersistHandle};
use crate::rescan::{RescanPlan, WalletPosition};
use crate::shutdown::ShutdownCoordinator;
use crate::wallet::{Wallet, WalletLoadError};

const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_CONF_FILE_NAME: &str = "onyx.conf";
const DEFAULT_PID_FILE_NAME: &str = "onyxd.pid";
const MIN_DISK_SPACE_BYTES: u64 = 50 * 1024 * 1024;

pub(crate) const DB_SCHEMA_VERSION_KEY: &[u8] = b"db_schema_version";
pub(crate) const DB_SCHEMA_VERSION: u32 = 1;

#[derive(Clone, Debug)]
pub struct Config {
    pub backend: Backend,
    pub data_dir: PathBuf,
    pub conf_path: PathBuf,
    pub pid_file: PathBuf,
    pub detach_db: bool,
    pub rescan: bool,
    pub salvage_wallet: bool,
    pub upgrade_wallet: Option<u32>,
    pub load_block: Vec<PathBuf>,
    pub checkpoint_key: Option<String>,
    pub tor_proxy: Option<String>,
    pub bind: Option<String>,
    pub external_ips: Vec<String>,
    pub seed_nodes: Vec<String>,
    pub reserve_balance: Option<String>,
    pub db_cache_mb: Option<u64>,
    pub db_log_size_mb: Option<u64>,
    pub keypool: usize,
    pub print_block_index: bool,
    pub print_block: Option<String>,
    pub log_level: onyx_log::Level,
    pub log_format: onyx_log::Format,
    pub log_timestamps: bool,
}

pub enum CliAction {
    Run(Config),
    PrintHelp,
    PrintVersion,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Severity {
    Warning,
    Error,
}

/// A bootstrap problem that is reported at the end of startup instead
/// of aborting on the spot, so the operator sees every issue at once.
#[derive(Clone, Debug)]
pub struct InitProblem {
    pub severity: Severity,
    pub message: String,
}

impl InitProblem {
    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }
}

fn render_deferred(problems: &[InitProblem]) -> Result<(), String> {
    let mut failures = Vec::new();
    for problem in problems {
        match problem.severity {
            Severity::Warning => log_warn!("{}", problem.message),
            Severity::Error => {
                log_error!("{}", problem.message);
                failures.push(problem.message.clone());
            }
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures.join("; "))
    }
}

pub fn write_file_atomic(path: &Path, bytes: &[u8]) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| err.to_string())?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(|err| err.to_string())?;
    if fs::rename(&tmp, path).is_err() {
        let _ = fs::remove_file(path);
        fs::rename(&tmp, path).map_err(|err| err.to_string())?;
    }
    Ok(())
}

fn ensure_db_schema_version(store: &dyn KeyValueStore) -> Result<(), String> {
    match store
        .get(Column::Meta, DB_SCHEMA_VERSION_KEY)
        .map_err(|err| err.to_string())?
    {
        None => store
            .put(
                Column::Meta,
                DB_SCHEMA_VERSION_KEY,
                &DB_SCHEMA_VERSION.to_le_bytes(),
            )
            .map_err(|err| err.to_string()),
        Some(bytes) => {
            let found = bytes
                .as_slice()
                .try_into()
                .map(u32::from_le_bytes)
                .map_err(|_| "unreadable database schema version".to_string())?;
            if found == DB_SCHEMA_VERSION {
                Ok(())
            } else {
                Err(format!(
                    "unsupported database schema version {found} (expected {DB_SCHEMA_VERSION})"
                ))
            }
        }
    }
}

pub fn parse_args() -> Result<CliAction, String> {
    parse_args_from(std::env::args().skip(1))
}

pub fn parse_args_from<I>(raw_args: I) -> Result<CliAction, String>
where
    I: IntoIterator<Item = String>,
{
    let mut backend = Backend::Fjall;
    let mut data_dir: Option<PathBuf> = None;
    let mut conf_path: Option<PathBuf> = None;
    let mut pid_file = PathBuf::from(DEFAULT_PID_FILE_NAME);
    let mut detach_db = false;
    let mut rescan = false;
    let mut salvage_wallet = false;
    let mut upgrade_wallet: Option<u32> = None;
    let mut load_block: Vec<PathBuf> = Vec::new();
    let mut checkpoint_key: Option<String> = None;
    let mut tor_proxy: Option<String> = None;
    let mut bind: Option<String> = None;
    let mut external_ips: Vec<String> = Vec::new();
    let mut seed_nodes: Vec<String> = Vec::new();
    let mut reserve_balance: Option<String> = None;
    let mut db_cache_mb: Option<u64> = None;
    let mut db_log_size_mb: Option<u64> = None;
    let mut keypool = wallet::DEFAULT_KEYPOOL_SIZE;
    let mut print_block_index = false;
    let mut print_block: Option<String> = None;
    let mut log_level = onyx_log::Level::Info;
    let mut log_format = onyx_log::Format::Text;
    let mut log_timestamps = true;

    let mut args = raw_args.into_iter().peekable();

    if let Some(first) = args.peek().map(|value| value.as_str()) {
        match first {
            "help" => return Ok(CliAction::PrintHelp),
            "version" => return Ok(CliAction::PrintVersion),
            _ => {}
        }
    }

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(CliAction::PrintHelp),
            "--version" | "-V" => return Ok(CliAction::PrintVersion),
            "--backend" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --backend".to_string())?;
                backend = Backend::parse(&value)
                    .ok_or_else(|| format!("invalid --backend '{value}'"))?;
            }
            "--data-dir" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --data-dir".to_string())?;
                data_dir = Some(PathBuf::from(value));
            }
            "--conf" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --conf".to_string())?;
                conf_path = Some(PathBuf::from(value));
            }
            "--pid" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --pid".to_string())?;
                pid_file = PathBuf::from(value);
            }
            "--detach-db" => detach_db = true,
            "--rescan" => rescan = true,
            "--salvage-wallet" => salvage_wallet = true,
            "--upgrade-wallet" => {
                // The version number is optional; absent means latest.
                let explicit = args
                    .peek()
                    .and_then(|value| value.parse::<u32>().ok());
                if explicit.is_some() {
                    let _ = args.next();
                }
                upgrade_wallet = Some(explicit.unwrap_or(0));
            }
            "--load-block" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --load-block".to_string())?;
                load_block.push(PathBuf::from(value));
            }
            "--checkpoint-key" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --checkpoint-key".to_string())?;
                checkpoint_key = Some(value);
            }
            "--tor" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --tor".to_string())?;
                tor_proxy = Some(value);
            }
            "--bind" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --bind".to_string())?;
                bind = Some(value);
            }
            "--external-ip" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --external-ip".to_string())?;
                external_ips.push(value);
            }
            "--seed-node" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --seed-node".to_string())?;
                seed_nodes.push(value);
            }
            "--reserve-balance" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --reserve-balance".to_string())?;
                reserve_balance = Some(value);
            }
            "--db-cache" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --db-cache".to_string())?;
                db_cache_mb = Some(
                    value
                        .parse()
                        .map_err(|_| format!("invalid --db-cache '{value}'"))?,
                );
            }
            "--db-log-size" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --db-log-size".to_string())?;
                db_log_size_mb = Some(
                    value
                        .parse()
                        .map_err(|_| format!("invalid --db-log-size '{value}'"))?,
                );
            }
            "--keypool" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --keypool".to_string())?;
                keypool = value
                    .parse()
                    .map_err(|_| format!("invalid --keypool '{value}'"))?;
            }
            "--print-block-index" => print_block_index = true,
            "--print-block" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --print-block".to_string())?;
                print_block = Some(value);
            }
            "--log-level" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --log-level".to_string())?;
                log_level = onyx_log::Level::parse(&value)
                    .ok_or_else(|| format!("invalid --log-level '{value}'"))?;
            }
            "--log-format" => {
                let value = args
                    .next()
                    .ok_or_else(|| "missing value for --log-format".to_string())?;
                log_format = onyx_log::Format::parse(&value)
                    .ok_or_else(|| format!("invalid --log-format '{value}'"))?;
            }
            "--no-log-timestamps" => log_timestamps = false,
            other => return Err(format!("unknown argument '{other}' (try --help)")),
        }
    }

    let data_dir = data_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    let conf_path = conf_path.unwrap_or_else(|| data_dir.join(DEFAULT_CONF_FILE_NAME));

    Ok(CliAction::Run(Config {
        backend,
        data_dir,
        conf_path,
        pid_file,
        detach_db,
        rescan,
        salvage_wallet,
        upgrade_wallet,
        load_block,
        checkpoint_key,
        tor_proxy,
        bind,
        external_ips,
        seed_nodes,
        reserve_balance,
        db_cache_mb,
        db_log_size_mb,
        keypool,
        print_block_index,
        print_block,
        log_level,
        log_format,
        log_timestamps,
    }))
}

pub fn usage() -> String {
    [
        "Usage:",
        "  onyxd [options]",
        "  onyxd <command>",
        "",
        "Commands:",
        "  help            Print this help and exit",
        "  version         Print version and exit",
        "",
        "Options:",
        "  --help, -h  Print this help and exit",
        "  --version, -V  Print version and exit",
        "  --backend  Storage backend to use (memory|fjall) (default: fjall)",
        "  --data-dir  Base data directory (default: ./data)",
        "  --conf  Config file path (default: <data-dir>/onyx.conf)",
        "  --pid  Pid file path, relative to --data-dir unless absolute (default: onyxd.pid)",
        "  --detach-db  Release store journal segments during the final shutdown flush",
        "  --rescan  Replay the chain for wallet transactions from genesis",
        "  --salvage-wallet  Attempt to recover keys from a damaged wallet.dat (implies --rescan)",
        "  --upgrade-wallet  Upgrade the wallet file format; optional version, absent means latest",
        "  --load-block  Import blocks from an external file (repeatable)",
        "  --checkpoint-key  Hex-encoded checkpoint verification public key",
        "  --tor  Tor SOCKS proxy IP:PORT (default: 127.0.0.1:9050)",
        "  --bind  Local listen address IP:PORT (default: 127.0.0.1:9033)",
        "  --external-ip  Confirmed external address (repeatable)",
        "  --seed-node  Connect once to this peer at startup (repeatable)",
        "  --reserve-balance  Amount kept out of staking/spending",
        "  --db-cache  Store cache size in MiB",
        "  --db-log-size  Store journal size ceiling in MiB",
        "  --keypool  Keypool size for new wallets (default: 100)",
        "  --print-block-index  Print the loaded block index, then exit",
        "  --print-block  Print the index entry matching a hash prefix, then exit",
        "  --log-level  Log verbosity (error|warn|info|debug|trace) (default: info)",
        "  --log-format  Log output format (text|json) (default: text)",
        "  --no-log-timestamps  Disable timestamps in text logs",
    ]
    .join("\n")
}

pub async fn run_entry() -> Result<(), String> {
    match parse_args()? {
        CliAction::PrintHelp => {
            println!("{}", usage());
            Ok(())
        }
        CliAction::PrintVersion => {
            println!("onyxd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        CliAction::Run(config) => run_with_config(config).await,
    }
}

/// Everything the teardown has to release beyond the store itself.
#[derive(Default)]
struct Services {
    wallet: Option<Arc<Mutex<Wallet>>>,
    peers: Option<PeerPersistHandle>,
}

pub async fn run_with_config(config: Config) -> Result<(), String> {
    onyx_log::init(onyx_log::LogConfig {
        level: config.log_level,
        format: config.log_format,
        timestamps: config.log_timestamps,
    });

    let start_time = Instant::now();
    log_info!(
        "Startup: begin (backend={:?}, data_dir={})",
        config.backend,
        config.data_dir.display()
    );
    log_info!("using config file {}", config.conf_path.display());

    fs::create_dir_all(&config.data_dir).map_err(|err| err.to_string())?;
    let instance_lock =
        InstanceLock::acquire(&config.data_dir).map_err(|err| err.to_string())?;

    let pid_path = if config.pid_file.is_absolute() {
        config.pid_file.clone()
    } else {
        config.data_dir.join(&config.pid_file)
    };
    lock::write_pid_file(&pid_path)?;

    let coordinator = Arc::new(ShutdownCoordinator::new());
    spawn_signal_task(coordinator.clone());

    let env = Arc::new(StoreEnv::new(
        config.backend,
        EnvOptions {
            cache_bytes: config.db_cache_mb.map(|mb| mb * 1024 * 1024),
            journal_bytes: config.db_log_size_mb.map(|mb| mb * 1024 * 1024),
        },
    ));
    env.set_detach(config.detach_db);

    let services = Arc::new(Mutex::new(Services::default()));

    let result = bootstrap(&config, &coordinator, &env, &services).await;
    if let Err(message) = &result {
        log_error!("Startup failed: {message}");
    }

    let teardown_env = env.clone();
    let teardown_services = services.clone();
    let lock_path = instance_lock.lock_path().to_path_buf();
    coordinator.run(move || {
        log_info!("Shutdown: begin");
        teardown_env.flush(false);
        let mut services = teardown_services.lock().expect("services lock");
        if let Some(peers) = services.peers.take() {
            peers.stop();
        }
        teardown_env.flush(true);
        lock::remove_pid_file(&pid_path);
        if let Err(err) = fs::remove_file(&lock_path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                log_warn!("failed to remove lock sentinel: {err}");
            }
        }
        if let Some(wallet) = services.wallet.take() {
            let wallet = wallet.lock().expect("wallet lock");
            if let Err(err) = wallet.save() {
                log_warn!("failed to save wallet at shutdown: {err}");
            }
        }
        log_info!("Shutdown: done");
    });
    drop(instance_lock);

    if result.is_ok() {
        log_info!(
            "Exit after {:.1}s uptime",
            start_time.elapsed().as_secs_f64()
        );
    }
    result
}

fn spawn_signal_task(coordinator: Arc<ShutdownCoordinator>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(err) => {
                    log_warn!("failed to install SIGTERM handler: {err}");
                    let _ = tokio::signal::ctrl_c().await;
                    coordinator.request();
                    return;
                }
            };
            let mut sighup = match signal(SignalKind::hangup()) {
                Ok(signal) => Some(signal),
                Err(err) => {
                    log_warn!("failed to install SIGHUP handler: {err}");
                    None
                }
            };
            loop {
                match sighup.as_mut() {
                    Some(hangup) => {
                        tokio::select! {
                            _ = tokio::signal::ctrl_c() => break,
                            _ = sigterm.recv() => break,
                            _ = hangup.recv() => {
                                onyx_log::request_reopen();
                                log_info!("SIGHUP received; diagnostic log reopen requested.");
                            }
                        }
                    }
                    None => {
                        tokio::select! {
                            _ = tokio::signal::ctrl_c() => break,
                            _ = sigterm.recv() => break,
                        }
                    }
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        log_info!("Signal received; requesting shutdown.");
        coordinator.request();
    });
}

/// Counts imported blocks on their way to the external validation
/// pipeline.
#[derive(Default)]
struct LoggingImportSink {
    imported: usize,
}

impl BlockImportSink for LoggingImportSink {
    fn import_block(&mut self, _raw: &[u8]) -> Result<(), String> {
        self.imported += 1;
        Ok(())
    }
}

async fn bootstrap(
    config: &Config,
    coordinator: &Arc<ShutdownCoordinator>,
    env: &Arc<StoreEnv>,
    services: &Arc<Mutex<Services>>,
) -> Result<(), String> {
    let data_dir = &config.data_dir;
    let mut deferred: Vec<InitProblem> = Vec::new();
    let wallet_path = data_dir.join(wallet::WALLET_FILE_NAME);
    let mut rescan_requested = config.rescan;

    env.open(data_dir).map_err(|err| err.to_string())?;

    // Salvage cannot preserve transaction metadata, so it always forces
    // a full rescan.
    if config.salvage_wallet {
        if wallet_path.exists() {
            let stats = wallet::salvage(&wallet_path)?;
            deferred.push(InitProblem::warning(format!(
                "wallet salvage recovered {} key(s); transaction history was discarded",
                stats.recovered_keys
            )));
        } else {
            log_warn!("--salvage-wallet given but no wallet file exists");
        }
        rescan_requested = true;
    }

    match env.verify(&wallet_path, wallet::check_format, wallet::recover_file) {
        VerifyResult::Ok => {}
        VerifyResult::RecoveredOk => {
            deferred.push(InitProblem::warning(
                "wallet.dat corrupt, salvage successful; a full rescan was scheduled",
            ));
            rescan_requested = true;
        }
        VerifyResult::RecoverFailed => {
            return Err("wallet.dat corrupt, salvage failed".to_string());
        }
    }

    let store = env.store().map_err(|err| err.to_string())?;
    ensure_db_schema_version(&store)?;

    let load_started = Instant::now();
    let chain_index = ChainIndex::new(store.clone());
    let index = match chain_index.load(coordinator.requested_flag()) {
        Ok(index) => index,
        Err(IndexLoadError::Interrupted) => {
            log_info!("shutdown requested during block index load; aborting bootstrap");
            return Ok(());
        }
        Err(err) => return Err(err.to_string()),
    };
    log_info!(
        "block index: {} entries, tip height {}, loaded in {:.1}s",
        index.len(),
        index.tip_height(),
        load_started.elapsed().as_secs_f64()
    );

    if config.print_block_index {
        print_block_index(&index);
        return Ok(());
    }
    if let Some(prefix) = &config.print_block {
        return print_block(&index, prefix);
    }

    // A wallet that failed to load is replaced by a read-only
    // placeholder for the remaining steps; the real wallet.dat must
    // never be written over.
    let mut wallet_writable = true;
    let (mut wallet, first_run) = match Wallet::load(&wallet_path) {
        Ok(outcome) => {
            if let Some(warning) = outcome.warning {
                deferred.push(InitProblem::warning(warning));
            }
            (outcome.wallet, outcome.first_run)
        }
        Err(err @ WalletLoadError::NeedRewrite) => return Err(err.to_string()),
        Err(err) => {
            // Corrupt or too-new: keep bootstrapping with an empty
            // wallet so every remaining problem is discovered, then
            // fail at the deferred report.
            deferred.push(InitProblem::error(err.to_string()));
            wallet_writable = false;
            (Wallet::empty(wallet_path.clone()), false)
        }
    };

    match wallet.upgrade(config.upgrade_wallet) {
        Ok(Some(warning)) => deferred.push(InitProblem::warning(warning)),
        Ok(None) => {}
        Err(err) => deferred.push(InitProblem::error(err)),
    }

    if first_run {
        for problem in wallet.first_run_init(config.keypool) {
            deferred.push(InitProblem::error(problem));
        }
        log_info!("new wallet: generated default key, keypool size {}", config.keypool);
    }
    log_info!(
        "wallet: {} key(s), {} pool key(s), version {}",
        wallet.key_count(),
        wallet.keypool_size(),
        wallet.version()
    );

    if coordinator.is_requested() {
        log_info!("shutdown requested during wallet load; aborting bootstrap");
        return Ok(());
    }

    let position = match wallet.locator() {
        None => WalletPosition::Fresh,
        Some(locator) => locator
            .resolve_height(&index)
            .map(WalletPosition::AtHeight)
            .unwrap_or(WalletPosition::Unknown),
    };
    match rescan::decide(index.tip_height(), position, rescan_requested) {
        RescanPlan::None => {}
        RescanPlan::FromHeight(from) => {
            let started = Instant::now();
            let mut replayed = 0usize;
            for height in from..=index.tip_height() {
                if coordinator.is_requested() {
                    log_info!("shutdown requested during rescan; aborting bootstrap");
                    return Ok(());
                }
                match chain_index.height_hash(height) {
                    Ok(Some(hash)) => {
                        wallet.observe_block(height, hash);
                        replayed += 1;
                    }
                    Ok(None) => {}
                    Err(err) => return Err(err.to_string()),
                }
            }
            if let Some(tip) = index.tip() {
                wallet.set_locator(BlockLocator::new(vec![tip.hash]));
            }
            if wallet_writable {
                if let Err(err) = wallet.save() {
                    deferred.push(InitProblem::warning(format!(
                        "could not persist rescan position: {err}"
                    )));
                }
            }
            log_info!(
                "rescanned {} block(s) from height {} in {:.1}s",
                replayed,
                from,
                started.elapsed().as_secs_f64()
            );
        }
    }

    let mut sink = LoggingImportSink::default();
    for path in &config.load_block {
        match import::import_block_file(path, &mut sink, coordinator.requested_flag()) {
            Ok(count) => log_info!("imported {} block(s) from {}", count, path.display()),
            Err(err) => log_warn!("block import from {} failed: {err}", path.display()),
        }
    }
    match import::import_bootstrap_file(data_dir, &mut sink, coordinator.requested_flag()) {
        Ok(Some(count)) => log_info!("imported {count} block(s) from bootstrap.dat"),
        Ok(None) => {}
        Err(err) => log_warn!("bootstrap import failed: {err}"),
    }

    // Peer table is best-effort: a bad file costs discovery state only.
    let addr_book = Arc::new(AddrBook::new());
    let peers_path = data_dir.join(peers::PEERS_FILE_NAME);
    match peers::load_peers_file(&peers_path) {
        Ok(entries) => {
            for (addr, entry) in entries {
                addr_book.insert(addr, entry);
            }
            log_info!("loaded {} peer address(es)", addr_book.len());
        }
        Err(err) => {
            log_warn!("{err}; starting with an empty peer table");
        }
    }

    match fs2::available_space(data_dir) {
        Ok(free) if free < MIN_DISK_SPACE_BYTES => {
            return Err("error: disk space is low".to_string());
        }
        Ok(_) => {}
        Err(err) => log_warn!("cannot check free disk space: {err}"),
    }

    let mut net_warnings = Vec::new();
    let net_setup = net::configure(
        &net::NetOptions {
            tor_proxy: config.tor_proxy.clone(),
            bind: config.bind.clone(),
            external_ips: config.external_ips.clone(),
            seed_nodes: config.seed_nodes.clone(),
            checkpoint_key: config.checkpoint_key.clone(),
            reserve_balance: config.reserve_balance.clone(),
        },
        data_dir,
        &mut net_warnings,
    )?;
    for warning in net_warnings {
        deferred.push(InitProblem::warning(warning));
    }
    for seed in &net_setup.seed_nodes {
        match seed.parse() {
            Ok(addr) => addr_book.insert(addr, AddrBookEntry::default()),
            Err(_) => log_warn!("ignoring unparseable --seed-node '{seed}'"),
        }
    }
    log_info!(
        "network: proxy {}, bind {}, {} external address(es), checkpoints {}",
        net_setup.proxy,
        net_setup.bind,
        net_setup.external_addresses.len(),
        if net_setup.checkpoint_key.is_some() {
            "signed"
        } else {
            "unsigned"
        }
    );

    // Live services start only after replay, so historical and live
    // wallet updates never interleave.
    {
        let mut services = services.lock().expect("services lock");
        services.peers = Some(PeerPersistHandle::spawn(
            addr_book.clone(),
            peers_path.clone(),
        ));
        // An unregistered placeholder is dropped here; the teardown's
        // wallet save only ever sees a wallet that loaded cleanly.
        services.wallet = wallet_writable.then(|| Arc::new(Mutex::new(wallet)));
    }

    render_deferred(&deferred)?;
    log_info!("Startup: done loading");

    let mut shutdown_rx = coordinator.subscribe();
    if !*shutdown_rx.borrow() {
        let _ = shutdown_rx.changed().await;
    }
    Ok(())
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

fn print_block_index(index: &LoadedIndex) {
    let mut entries: Vec<_> = index.iter().map(|(hash, entry)| (*hash, *entry)).collect();
    entries.sort_by_key(|(_, entry)| entry.height);
    for (hash, entry) in entries {
        println!(
            "{:>8}  {}  work={}",
            entry.height,
            hex_string(&hash),
            entry.chainwork_value()
        );
    }
    match index.tip() {
        Some(tip) => println!("tip: {} at height {}", hex_string(&tip.hash), tip.height),
        None => println!("tip: none (empty index)"),
    }
}

fn print_block(index: &LoadedIndex, prefix: &str) -> Result<(), String> {
    let needle = prefix.to_ascii_lowercase();
    for (hash, entry) in index.iter() {
        if hex_string(hash).starts_with(&needle) {
            println!("hash:     {}", hex_string(hash));
            println!("height:   {}", entry.height);
            println!("prev:     {}", hex_string(&entry.prev_hash));
            println!("work:     {}", entry.chainwork_value());
            println!("file:     {} @ {}", entry.file_number, entry.file_offset);
            return Ok(());
        }
    }
    Err(format!("no block index entry matches '{prefix}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use onyx_storage::memory::MemoryStore;

    fn parse(args: &[&str]) -> Result<CliAction, String> {
        parse_args_from(args.iter().map(|arg| arg.to_string()))
    }

    fn parse_config(args: &[&str]) -> Config {
        match parse(args).expect("parse") {
            CliAction::Run(config) => config,
            _ => panic!("expected a run action"),
        }
    }

    #[test]
    fn defaults_are_sane() {
        let config = parse_config(&[]);
        assert_eq!(config.backend, Backend::Fjall);
        assert_eq!(config.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(config.conf_path, PathBuf::from(DEFAULT_DATA_DIR).join("onyx.conf"));
        assert_eq!(config.pid_file, PathBuf::from("onyxd.pid"));
        assert!(!config.rescan);
        assert!(!config.detach_db);
        assert!(config.upgrade_wallet.is_none());
        assert_eq!(config.keypool, wallet::DEFAULT_KEYPOOL_SIZE);
    }

    #[test]
    fn conf_default_follows_data_dir() {
        let config = parse_config(&["--data-dir", "/tmp/x"]);
        assert_eq!(config.conf_path, PathBuf::from("/tmp/x/onyx.conf"));
        let config = parse_config(&["--data-dir", "/tmp/x", "--conf", "/etc/onyx.conf"]);
        assert_eq!(config.conf_path, PathBuf::from("/etc/onyx.conf"));
    }

    #[test]
    fn upgrade_wallet_value_is_optional() {
        let config = parse_config(&["--upgrade-wallet"]);
        assert_eq!(config.upgrade_wallet, Some(0));
        let config = parse_config(&["--upgrade-wallet", "2"]);
        assert_eq!(config.upgrade_wallet, Some(2));
        // A following flag is not consumed as the version.
        let config = parse_config(&["--upgrade-wallet", "--rescan"]);
        assert_eq!(config.upgrade_wallet, Some(0));
        assert!(config.rescan);
    }

    #[test]
    fn repeatable_options_accumulate() {
        let config = parse_config(&[
            "--load-block", "a.dat",
            "--load-block", "b.dat",
            "--external-ip", "203.0.113.1",
            "--external-ip", "203.0.113.2",
            "--seed-node", "203.0.113.3:9033",
        ]);
        assert_eq!(config.load_block.len(), 2);
        assert_eq!(config.external_ips.len(), 2);
        assert_eq!(config.seed_nodes.len(), 1);
    }

    #[test]
    fn unknown_and_incomplete_arguments_are_rejected() {
        assert!(parse(&["--bogus"]).is_err());
        assert!(parse(&["--data-dir"]).is_err());
        assert!(parse(&["--backend", "sqlite"]).is_err());
        assert!(parse(&["--keypool", "many"]).is_err());
    }

    #[test]
    fn help_and_version_short_circuit() {
        assert!(matches!(parse(&["help"]), Ok(CliAction::PrintHelp)));
        assert!(matches!(parse(&["version"]), Ok(CliAction::PrintVersion)));
        assert!(matches!(parse(&["--help"]), Ok(CliAction::PrintHelp)));
        assert!(matches!(parse(&["-V"]), Ok(CliAction::PrintVersion)));
    }

    #[test]
    fn schema_version_written_then_enforced() {
        let store = MemoryStore::new();
        ensure_db_schema_version(&store).expect("first run writes version");
        ensure_db_schema_version(&store).expect("matching version accepted");

        store
            .put(Column::Meta, DB_SCHEMA_VERSION_KEY, &99u32.to_le_bytes())
            .expect("put");
        assert!(ensure_db_schema_version(&store).is_err());
    }

    #[test]
    fn deferred_errors_fail_after_reporting() {
        assert!(render_deferred(&[]).is_ok());
        assert!(render_deferred(&[InitProblem::warning("minor")]).is_ok());
        let problems = [
            InitProblem::warning("minor"),
            InitProblem::error("first failure"),
            InitProblem::error("second failure"),
        ];
        let message = render_deferred(&problems).expect_err("errors must fail");
        assert!(message.contains("first failure"));
        assert!(message.contains("second failure"));
    }

    #[test]
    fn atomic_write_replaces_existing_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("file.json");
        write_file_atomic(&path, b"one").expect("write");
        write_file_atomic(&path, b"two").expect("rewrite");
        assert_eq!(fs::read(&path).expect("read"), b"two");
    }
}
