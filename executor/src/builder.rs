//! Instruction builders for the launchpad bonding-curve AMM.

use aegis_core::launchpad::{
    self, BondingCurveState, EVENT_AUTHORITY, FEE_RECIPIENT, GLOBAL,
};
use borsh::{to_vec, BorshSerialize};
use solana_sdk::compute_budget::ComputeBudgetInstruction;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::system_program;
use spl_associated_token_account::get_associated_token_address;
use spl_associated_token_account::instruction::create_associated_token_account_idempotent;
use std::str::FromStr;

/// Compute units requested for a curve trade.
pub const COMPUTE_UNIT_LIMIT: u32 = 100_000;

// Anchor discriminators.
const BUY_DISCRIMINATOR: [u8; 8] = [102, 6, 61, 18, 1, 218, 235, 234];
const SELL_DISCRIMINATOR: [u8; 8] = [51, 230, 133, 164, 1, 127, 131, 210];

#[derive(BorshSerialize)]
struct BuyArgs {
    amount: u64,
    max_sol_cost: u64,
}

#[derive(BorshSerialize)]
struct SellArgs {
    amount: u64,
    min_sol_output: u64,
}

pub fn priority_fee(micro_lamports: u64) -> Instruction {
    ComputeBudgetInstruction::set_compute_unit_price(micro_lamports)
}

pub fn compute_unit_limit(units: u32) -> Instruction {
    ComputeBudgetInstruction::set_compute_unit_limit(units)
}

pub fn create_token_account_idempotent(payer: &Pubkey, owner: &Pubkey, mint: &Pubkey) -> Instruction {
    create_associated_token_account_idempotent(payer, owner, mint, &spl_token::id())
}

pub fn user_token_account(owner: &Pubkey, mint: &Pubkey) -> Pubkey {
    get_associated_token_address(owner, mint)
}

/// Sell `token_amount` back into the curve, aborting on chain below
/// `min_sol_output`.
pub fn sell(
    seller: &Pubkey,
    mint: &Pubkey,
    curve: &BondingCurveState,
    token_amount: u64,
    min_sol_output: u64,
) -> Instruction {
    let program_id = launchpad::program_id();
    let bonding_curve = launchpad::bonding_curve_address(mint);
    let associated_bonding_curve = launchpad::associated_bonding_curve(mint);
    let creator_vault = launchpad::creator_vault_address(&curve.creator_pubkey());
    let seller_token_account = get_associated_token_address(seller, mint);

    let mut data = SELL_DISCRIMINATOR.to_vec();
    data.extend(to_vec(&SellArgs { amount: token_amount, min_sol_output }).expect("borsh"));

    let accounts = vec![
        AccountMeta::new_readonly(static_key(GLOBAL), false),
        AccountMeta::new(static_key(FEE_RECIPIENT), false),
        AccountMeta::new_readonly(*mint, false),
        AccountMeta::new(bonding_curve, false),
        AccountMeta::new(associated_bonding_curve, false),
        AccountMeta::new(seller_token_account, false),
        AccountMeta::new(*seller, true),
        AccountMeta::new_readonly(system_program::id(), false),
        AccountMeta::new(creator_vault, false),
        AccountMeta::new_readonly(spl_token::id(), false),
    ];

    Instruction { program_id, accounts, data }
}

/// Buy `token_amount` off the curve for at most `max_sol_cost`.
pub fn buy(
    buyer: &Pubkey,
    mint: &Pubkey,
    curve: &BondingCurveState,
    token_amount: u64,
    max_sol_cost: u64,
) -> Instruction {
    let program_id = launchpad::program_id();
    let bonding_curve = launchpad::bonding_curve_address(mint);
    let associated_bonding_curve = launchpad::associated_bonding_curve(mint);
    let creator_vault = launchpad::creator_vault_address(&curve.creator_pubkey());
    let buyer_token_account = get_associated_token_address(buyer, mint);

    let mut data = BUY_DISCRIMINATOR.to_vec();
    data.extend(to_vec(&BuyArgs { amount: token_amount, max_sol_cost }).expect("borsh"));

    let accounts = vec![
        AccountMeta::new_readonly(static_key(GLOBAL), false),
        AccountMeta::new(static_key(FEE_RECIPIENT), false),
        AccountMeta::new_readonly(*mint, false),
        AccountMeta::new(bonding_curve, false),
        AccountMeta::new(associated_bonding_curve, false),
        AccountMeta::new(buyer_token_account, false),
        AccountMeta::new(*buyer, true),
        AccountMeta::new_readonly(system_program::id(), false),
        AccountMeta::new(creator_vault, false),
        AccountMeta::new_readonly(spl_token::id(), false),
        AccountMeta::new_readonly(static_key(EVENT_AUTHORITY), false),
        AccountMeta::new_readonly(program_id, false),
    ];

    Instruction { program_id, accounts, data }
}

fn static_key(s: &str) -> Pubkey {
    Pubkey::from_str(s).expect("static launchpad key")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve() -> BondingCurveState {
        BondingCurveState {
            virtual_token_reserves: 1_000_000_000_000,
            virtual_sol_reserves: 30_000_000_000,
            real_token_reserves: 800_000_000_000,
            real_sol_reserves: 0,
            token_total_supply: 1_000_000_000_000,
            complete: false,
            creator: [3u8; 32],
        }
    }

    #[test]
    fn sell_instruction_shape() {
        let seller = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let ix = sell(&seller, &mint, &curve(), 1_000, 900);

        assert_eq!(ix.program_id, launchpad::program_id());
        assert_eq!(ix.accounts.len(), 10);
        // seller signs, curve PDA is writable
        assert!(ix.accounts[6].is_signer);
        assert!(ix.accounts[3].is_writable);
        // discriminator + two u64 args
        assert_eq!(ix.data.len(), 8 + 16);
        assert_eq!(&ix.data[..8], &SELL_DISCRIMINATOR);
        assert_eq!(u64::from_le_bytes(ix.data[8..16].try_into().unwrap()), 1_000);
        assert_eq!(u64::from_le_bytes(ix.data[16..24].try_into().unwrap()), 900);
    }

    #[test]
    fn buy_instruction_encodes_max_cost() {
        let buyer = Pubkey::new_unique();
        let mint = Pubkey::new_unique();
        let ix = buy(&buyer, &mint, &curve(), 5_000_000, 1_050_000_000);

        assert_eq!(&ix.data[..8], &BUY_DISCRIMINATOR);
        assert_eq!(u64::from_le_bytes(ix.data[8..16].try_into().unwrap()), 5_000_000);
        assert_eq!(u64::from_le_bytes(ix.data[16..24].try_into().unwrap()), 1_050_000_000);
        assert!(ix.accounts[6].is_signer);
    }

    #[test]
    fn budget_instructions_target_compute_budget_program() {
        let fee = priority_fee(25_000);
        let limit = compute_unit_limit(COMPUTE_UNIT_LIMIT);
        assert_eq!(fee.program_id, solana_sdk::compute_budget::id());
        assert_eq!(limit.program_id, solana_sdk::compute_budget::id());
    }
}
