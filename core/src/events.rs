use serde::{Deserialize, Serialize};

/// Everything the node reacts to, as one closed tagged enum.
///
/// Token and lamport quantities cross process boundaries as decimal strings
/// so 64-bit precision survives JSON; percentages and counts stay floats.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InternalEvent {
    WalletTransaction {
        #[serde(flatten)]
        meta: EventMeta,
        wallet: String,
        mint_address: String,
        lamports: String,
    },
    TokenTransfer {
        #[serde(flatten)]
        meta: EventMeta,
        mint_address: String,
        from: String,
        to: String,
        amount: String,
    },
    TokenBalanceChange {
        #[serde(flatten)]
        meta: EventMeta,
        mint_address: String,
        wallet: String,
        pre_amount: String,
        post_amount: String,
    },
    LpAdd {
        #[serde(flatten)]
        meta: EventMeta,
        mint_address: String,
        pool_address: String,
        liquidity_amount: String,
    },
    LpRemove {
        #[serde(flatten)]
        meta: EventMeta,
        mint_address: String,
        pool_address: String,
        liquidity_amount: String,
    },
    DevWalletSell {
        #[serde(flatten)]
        meta: EventMeta,
        mint_address: String,
        dev_wallet: String,
        amount: String,
        percentage_of_holdings: f64,
    },
    DevWalletTransfer {
        #[serde(flatten)]
        meta: EventMeta,
        mint_address: String,
        dev_wallet: String,
        destination: String,
        amount: String,
    },
    SupplyChange {
        #[serde(flatten)]
        meta: EventMeta,
        mint_address: String,
        previous_supply: String,
        new_supply: String,
        change_percentage: f64,
    },
    PositionOpened {
        #[serde(flatten)]
        meta: EventMeta,
        mint_address: String,
        position_id: String,
    },
    PositionClosed {
        #[serde(flatten)]
        meta: EventMeta,
        mint_address: String,
        position_id: String,
    },
}

/// Fields every event carries regardless of variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMeta {
    pub id: String,
    pub slot: u64,
    pub timestamp_ms: i64,
    #[serde(default)]
    pub signature: String,
}

impl InternalEvent {
    pub fn meta(&self) -> &EventMeta {
        match self {
            Self::WalletTransaction { meta, .. }
            | Self::TokenTransfer { meta, .. }
            | Self::TokenBalanceChange { meta, .. }
            | Self::LpAdd { meta, .. }
            | Self::LpRemove { meta, .. }
            | Self::DevWalletSell { meta, .. }
            | Self::DevWalletTransfer { meta, .. }
            | Self::SupplyChange { meta, .. }
            | Self::PositionOpened { meta, .. }
            | Self::PositionClosed { meta, .. } => meta,
        }
    }

    /// Mint the event concerns. Every variant carries one.
    pub fn mint_address(&self) -> &str {
        match self {
            Self::WalletTransaction { mint_address, .. }
            | Self::TokenTransfer { mint_address, .. }
            | Self::TokenBalanceChange { mint_address, .. }
            | Self::LpAdd { mint_address, .. }
            | Self::LpRemove { mint_address, .. }
            | Self::DevWalletSell { mint_address, .. }
            | Self::DevWalletTransfer { mint_address, .. }
            | Self::SupplyChange { mint_address, .. }
            | Self::PositionOpened { mint_address, .. }
            | Self::PositionClosed { mint_address, .. } => mint_address,
        }
    }

    /// Stable discriminator name, used for the event log and metrics labels.
    pub fn variant(&self) -> &'static str {
        match self {
            Self::WalletTransaction { .. } => "wallet_transaction",
            Self::TokenTransfer { .. } => "token_transfer",
            Self::TokenBalanceChange { .. } => "token_balance_change",
            Self::LpAdd { .. } => "lp_add",
            Self::LpRemove { .. } => "lp_remove",
            Self::DevWalletSell { .. } => "dev_wallet_sell",
            Self::DevWalletTransfer { .. } => "dev_wallet_transfer",
            Self::SupplyChange { .. } => "supply_change",
            Self::PositionOpened { .. } => "position_opened",
            Self::PositionClosed { .. } => "position_closed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_amounts_as_strings() {
        let ev = InternalEvent::DevWalletSell {
            meta: EventMeta {
                id: "ev-1".into(),
                slot: 311_224_100,
                timestamp_ms: 1_730_000_000_000,
                signature: "5x".into(),
            },
            mint_address: "MintA".into(),
            dev_wallet: "DevA".into(),
            amount: u64::MAX.to_string(),
            percentage_of_holdings: 12.5,
        };

        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains(&format!("\"{}\"", u64::MAX)));

        let back: InternalEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.variant(), "dev_wallet_sell");
        assert_eq!(back.mint_address(), "MintA");
        assert_eq!(back.meta().slot, 311_224_100);
    }
}
