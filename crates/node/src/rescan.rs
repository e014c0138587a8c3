//! Decides whether historical block replay is needed for the wallet.

/// Where the wallet last saw the chain, derived from its persisted
/// locator against the loaded index.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WalletPosition {
    /// No locator persisted: a wallet with no history has nothing to
    /// replay.
    Fresh,
    /// A locator exists but none of its hashes are known to the index;
    /// only a full replay can be trusted.
    Unknown,
    /// The locator resolved to this height.
    AtHeight(i32),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RescanPlan {
    None,
    FromHeight(i32),
}

pub const GENESIS_HEIGHT: i32 = 0;

/// Rescanning touches every block since the wallet's last checkpoint,
/// so the default path never replays more than necessary; an explicit
/// operator request always wins.
pub fn decide(tip_height: i32, position: WalletPosition, rescan_requested: bool) -> RescanPlan {
    if rescan_requested {
        return RescanPlan::FromHeight(GENESIS_HEIGHT);
    }
    match position {
        WalletPosition::Fresh => RescanPlan::None,
        WalletPosition::Unknown => RescanPlan::FromHeight(GENESIS_HEIGHT),
        WalletPosition::AtHeight(height) if height < tip_height => RescanPlan::FromHeight(height),
        WalletPosition::AtHeight(_) => RescanPlan::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_wallet_never_rescans() {
        assert_eq!(
            decide(150, WalletPosition::Fresh, false),
            RescanPlan::None
        );
    }

    #[test]
    fn wallet_behind_tip_resumes_at_its_height() {
        assert_eq!(
            decide(150, WalletPosition::AtHeight(100), false),
            RescanPlan::FromHeight(100)
        );
    }

    #[test]
    fn explicit_request_forces_genesis() {
        assert_eq!(
            decide(150, WalletPosition::AtHeight(100), true),
            RescanPlan::FromHeight(GENESIS_HEIGHT)
        );
        assert_eq!(
            decide(150, WalletPosition::Fresh, true),
            RescanPlan::FromHeight(GENESIS_HEIGHT)
        );
    }

    #[test]
    fn unresolved_locator_forces_genesis() {
        assert_eq!(
            decide(150, WalletPosition::Unknown, false),
            RescanPlan::FromHeight(GENESIS_HEIGHT)
        );
    }

    #[test]
    fn wallet_at_or_ahead_of_tip_skips_replay() {
        assert_eq!(
            decide(150, WalletPosition::AtHeight(150), false),
            RescanPlan::None
        );
        // A locator ahead of the tip (store rolled back) still skips.
        assert_eq!(
            decide(150, WalletPosition::AtHeight(160), false),
            RescanPlan::None
        );
    }

    #[test]
    fn plan_height_is_min_of_wallet_and_tip() {
        for (wallet_height, tip_height) in [(0, 10), (5, 10), (9, 10)] {
            match decide(tip_height, WalletPosition::AtHeight(wallet_height), false) {
                RescanPlan::FromHeight(height) => {
                    assert_eq!(height, wallet_height.min(tip_height));
                }
                RescanPlan::None => panic!("expected a replay plan"),
            }
        }
    }
}
