//! Network reachability setup for a privacy-routed node.
//!
//! This build only talks through the onion proxy: every network class
//! except Onion starts limited. The node refuses to start without a
//! confirmed listening identity (an explicit external address or the
//! hidden-service hostname file).

use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use secp256k1::PublicKey;

pub const DEFAULT_TOR_PROXY: &str = "127.0.0.1:9050";
pub const ONION_HOSTNAME_FILE: &str = "onion/hostname";

const COIN: i64 = 100_000_000;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NetClass {
    Ipv4,
    Ipv6,
    Onion,
}

impl NetClass {
    pub const ALL: [NetClass; 3] = [NetClass::Ipv4, NetClass::Ipv6, NetClass::Onion];

    const fn index(self) -> usize {
        match self {
            NetClass::Ipv4 => 0,
            NetClass::Ipv6 => 1,
            NetClass::Onion => 2,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Reachability {
    reachable: [bool; 3],
}

impl Default for Reachability {
    /// Everything limited except the privacy-routed class.
    fn default() -> Self {
        let mut reachable = [false; 3];
        reachable[NetClass::Onion.index()] = true;
        Self { reachable }
    }
}

impl Reachability {
    pub fn is_reachable(&self, class: NetClass) -> bool {
        self.reachable[class.index()]
    }

    pub fn set_reachable(&mut self, class: NetClass, reachable: bool) {
        self.reachable[class.index()] = reachable;
    }
}

/// The node's confirmed listening identity.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ExternalAddress {
    Ip(IpAddr),
    Onion(String),
}

#[derive(Clone, Debug, Default)]
pub struct NetOptions {
    pub tor_proxy: Option<String>,
    pub bind: Option<String>,
    pub external_ips: Vec<String>,
    pub seed_nodes: Vec<String>,
    pub checkpoint_key: Option<String>,
    pub reserve_balance: Option<String>,
}

pub struct NetSetup {
    pub proxy: SocketAddr,
    pub bind: SocketAddr,
    pub reachability: Reachability,
    pub external_addresses: Vec<ExternalAddress>,
    pub seed_nodes: Vec<String>,
    pub checkpoint_key: Option<PublicKey>,
    pub reserve_balance: i64,
}

pub const DEFAULT_BIND: &str = "127.0.0.1:9033";

/// Validate and apply the operator's network options. Invalid proxy,
/// bind address, external address or reserve amount is fatal; a bad
/// checkpoint key only degrades checkpoint enforcement to unsigned.
pub fn configure(
    options: &NetOptions,
    data_dir: &Path,
    warnings: &mut Vec<String>,
) -> Result<NetSetup, String> {
    let proxy_raw = options.tor_proxy.as_deref().unwrap_or(DEFAULT_TOR_PROXY);
    let proxy: SocketAddr = proxy_raw
        .parse()
        .map_err(|_| format!("invalid --tor proxy address '{proxy_raw}'"))?;

    let bind_raw = options.bind.as_deref().unwrap_or(DEFAULT_BIND);
    let bind: SocketAddr = bind_raw
        .parse()
        .map_err(|_| format!("invalid --bind address '{bind_raw}'"))?;

    let mut external_addresses = Vec::new();
    for raw in &options.external_ips {
        let address: IpAddr = raw
            .parse()
            .map_err(|_| format!("invalid --external-ip address '{raw}'"))?;
        external_addresses.push(ExternalAddress::Ip(address));
    }

    if external_addresses.is_empty() {
        let hostname_path = data_dir.join(ONION_HOSTNAME_FILE);
        let hostname = fs::read_to_string(&hostname_path)
            .map(|contents| contents.trim().to_string())
            .unwrap_or_default();
        if hostname.is_empty() {
            return Err(format!(
                "no external address configured and {} is missing; \
                 the node has no confirmed listening identity",
                hostname_path.display()
            ));
        }
        external_addresses.push(ExternalAddress::Onion(hostname));
    }

    let checkpoint_key = match options.checkpoint_key.as_deref() {
        None => None,
        Some(raw) => match parse_checkpoint_key(raw) {
            Some(key) => Some(key),
            None => {
                warnings.push(format!(
                    "invalid checkpoint key '{raw}'; checkpoint enforcement stays unsigned"
                ));
                None
            }
        },
    };

    let reserve_balance = match options.reserve_balance.as_deref() {
        None => 0,
        Some(raw) => parse_amount(raw)
            .ok_or_else(|| format!("invalid amount for --reserve-balance '{raw}'"))?,
    };

    Ok(NetSetup {
        proxy,
        bind,
        reachability: Reachability::default(),
        external_addresses,
        seed_nodes: options.seed_nodes.clone(),
        checkpoint_key,
        reserve_balance,
    })
}

fn parse_checkpoint_key(raw: &str) -> Option<PublicKey> {
    let bytes = from_hex(raw)?;
    PublicKey::from_slice(&bytes).ok()
}

fn from_hex(raw: &str) -> Option<Vec<u8>> {
    if raw.is_empty() || raw.len() % 2 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(raw.len() / 2);
    let bytes = raw.as_bytes();
    for pair in bytes.chunks(2) {
        let high = (pair[0] as char).to_digit(16)?;
        let low = (pair[1] as char).to_digit(16)?;
        out.push(((high << 4) | low) as u8);
    }
    Some(out)
}

/// Parse a decimal coin amount ("12.345") into base units, eight
/// fractional digits max.
pub fn parse_amount(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('-') {
        return None;
    }
    let (whole, fraction) = match raw.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (raw, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if fraction.len() > 8 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let whole: i64 = if whole.is_empty() {
        0
    } else {
        whole.parse().ok()?
    };
    let mut fraction_units: i64 = 0;
    if !fraction.is_empty() {
        fraction_units = fraction.parse().ok()?;
        for _ in 0..(8 - fraction.len()) {
            fraction_units *= 10;
        }
    }
    whole
        .checked_mul(COIN)
        .and_then(|units| units.checked_add(fraction_units))
}
