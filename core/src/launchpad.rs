//! On-chain layout and address derivation for the bonding-curve launchpad.

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

pub const LAUNCHPAD_PROGRAM: &str = "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P";
pub const GLOBAL: &str = "4wTVyMKBvC6P4p58Prv7SzaLxe89nJ641PzN4331vX78";
pub const FEE_RECIPIENT: &str = "CebNoMenuPSToyuS9232FNRXF288Ukyy5oBv3e2xR9sN";
pub const EVENT_AUTHORITY: &str = "Ce6TQqeHC9p8KBAZvYtSAsvS6J2fXmzkm1Yw2XJ1f3R7";

pub const BONDING_CURVE_SEED: &[u8] = b"bonding-curve";
pub const CREATOR_VAULT_SEED: &[u8] = b"creator-vault";

/// Anchor account discriminator length.
const DISCRIMINATOR_LEN: usize = 8;
/// Curve body without the trailing creator key (pre-creator-fee layout).
const LEGACY_BODY_LEN: usize = 41;

pub fn program_id() -> Pubkey {
    Pubkey::from_str(LAUNCHPAD_PROGRAM).expect("static program id")
}

/// State of one token's bonding curve, as stored on chain.
#[derive(Debug, Clone, Serialize, Deserialize, BorshDeserialize, BorshSerialize)]
pub struct BondingCurveState {
    pub virtual_token_reserves: u64,
    pub virtual_sol_reserves: u64,
    pub real_token_reserves: u64,
    pub real_sol_reserves: u64,
    pub token_total_supply: u64,
    pub complete: bool,
    pub creator: [u8; 32],
}

impl BondingCurveState {
    /// Decode a raw curve account, tolerating both the legacy layout (no
    /// creator key) and the current one.
    pub fn from_account_data(data: &[u8]) -> Result<Self, borsh::io::Error> {
        if data.len() < DISCRIMINATOR_LEN + LEGACY_BODY_LEN {
            return Err(borsh::io::Error::new(
                borsh::io::ErrorKind::UnexpectedEof,
                format!("curve account too short: {} bytes", data.len()),
            ));
        }
        let body = &data[DISCRIMINATOR_LEN..];

        let mut cursor = body;
        let virtual_token_reserves = <u64 as BorshDeserialize>::deserialize(&mut cursor)?;
        let virtual_sol_reserves = <u64 as BorshDeserialize>::deserialize(&mut cursor)?;
        let real_token_reserves = <u64 as BorshDeserialize>::deserialize(&mut cursor)?;
        let real_sol_reserves = <u64 as BorshDeserialize>::deserialize(&mut cursor)?;
        let token_total_supply = <u64 as BorshDeserialize>::deserialize(&mut cursor)?;
        let complete = <bool as BorshDeserialize>::deserialize(&mut cursor)?;
        let creator = if cursor.len() >= 32 {
            <[u8; 32] as BorshDeserialize>::deserialize(&mut cursor)?
        } else {
            [0u8; 32]
        };

        Ok(Self {
            virtual_token_reserves,
            virtual_sol_reserves,
            real_token_reserves,
            real_sol_reserves,
            token_total_supply,
            complete,
            creator,
        })
    }

    pub fn creator_pubkey(&self) -> Pubkey {
        Pubkey::new_from_array(self.creator)
    }
}

/// PDA of a mint's bonding curve account.
pub fn bonding_curve_address(mint: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[BONDING_CURVE_SEED, mint.as_ref()], &program_id()).0
}

/// PDA holding the creator's accumulated fee share.
pub fn creator_vault_address(creator: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(&[CREATOR_VAULT_SEED, creator.as_ref()], &program_id()).0
}

/// The curve's associated token account for its mint.
pub fn associated_bonding_curve(mint: &Pubkey) -> Pubkey {
    spl_ata(&bonding_curve_address(mint), mint)
}

// Inlined associated-token-account derivation so this crate stays free of
// spl crates; the executor uses the spl builder for instruction creation.
fn spl_ata(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
    let token_program = Pubkey::from_str("TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA").expect("static id");
    let ata_program =
        Pubkey::from_str("ATokenGPvbdGVxr1b2hvZbsiqW5xWH25efTNsLJA8knL").expect("static id");
    Pubkey::find_program_address(
        &[owner.as_ref(), token_program.as_ref(), mint.as_ref()],
        &ata_program,
    )
    .0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(complete: bool, with_creator: bool) -> Vec<u8> {
        let mut data = vec![0u8; DISCRIMINATOR_LEN];
        for v in [
            1_000_000_000_000_000u64, // virtual token
            30_000_000_000,           // virtual sol
            800_000_000_000_000,      // real token
            0,                        // real sol
            1_000_000_000_000_000,    // supply
        ] {
            data.extend_from_slice(&v.to_le_bytes());
        }
        data.push(complete as u8);
        if with_creator {
            data.extend_from_slice(&[7u8; 32]);
        }
        data
    }

    #[test]
    fn decodes_current_layout() {
        let state = BondingCurveState::from_account_data(&encoded(false, true)).unwrap();
        assert_eq!(state.virtual_sol_reserves, 30_000_000_000);
        assert!(!state.complete);
        assert_eq!(state.creator, [7u8; 32]);
    }

    #[test]
    fn decodes_legacy_layout_without_creator() {
        let state = BondingCurveState::from_account_data(&encoded(true, false)).unwrap();
        assert!(state.complete);
        assert_eq!(state.creator, [0u8; 32]);
    }

    #[test]
    fn rejects_truncated_account() {
        assert!(BondingCurveState::from_account_data(&[0u8; 12]).is_err());
    }

    #[test]
    fn curve_pda_is_stable() {
        let mint = Pubkey::new_unique();
        assert_eq!(bonding_curve_address(&mint), bonding_curve_address(&mint));
        assert_ne!(bonding_curve_address(&mint), creator_vault_address(&mint));
    }
}
