//! Constant-product bonding-curve math.
//!
//! All reserve arithmetic is on u64 with u128 widening for the product step;
//! floats never touch balances. Quotes are deterministic and never exceed the
//! real reserve on the receiving side.

/// Launchpad trade fee, buyer/seller pays.
pub const FEE_BPS: u64 = 100; // 1%

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub amount_in: u64,
    pub amount_out: u64,
    pub fee_lamports: u64,
    pub price_impact_bps: u64,
}

/// Quote tokens received for `lamports_in`, fee-on-input, capped to the real
/// token reserve.
pub fn buy_quote(
    virtual_sol: u64,
    virtual_token: u64,
    real_token: u64,
    lamports_in: u64,
) -> Quote {
    if lamports_in == 0 || virtual_sol == 0 || virtual_token == 0 {
        return Quote { amount_in: lamports_in, amount_out: 0, fee_lamports: 0, price_impact_bps: 0 };
    }

    let net_sol = (lamports_in as u128 * 10_000) / (10_000 + FEE_BPS as u128);
    let tokens_out = net_sol * virtual_token as u128 / (virtual_sol as u128 + net_sol);
    let amount_out = (tokens_out as u64).min(real_token);
    let fee = lamports_in - net_sol as u64;

    Quote {
        amount_in: lamports_in,
        amount_out,
        fee_lamports: fee,
        price_impact_bps: buy_impact_bps(virtual_sol, virtual_token, lamports_in, amount_out),
    }
}

/// Quote lamports received for `tokens_in`, fee-on-output, capped to the real
/// SOL reserve.
pub fn sell_quote(
    virtual_sol: u64,
    virtual_token: u64,
    real_sol: u64,
    tokens_in: u64,
) -> Quote {
    if tokens_in == 0 || virtual_sol == 0 || virtual_token == 0 {
        return Quote { amount_in: tokens_in, amount_out: 0, fee_lamports: 0, price_impact_bps: 0 };
    }

    let gross_sol = tokens_in as u128 * virtual_sol as u128 / (virtual_token as u128 + tokens_in as u128);
    let net_sol = gross_sol * (10_000 - FEE_BPS as u128) / 10_000;
    let amount_out = (net_sol as u64).min(real_sol);
    let fee = (gross_sol - net_sol) as u64;

    Quote {
        amount_in: tokens_in,
        amount_out,
        fee_lamports: fee,
        price_impact_bps: sell_impact_bps(virtual_sol, virtual_token, tokens_in, amount_out),
    }
}

/// Slippage bound for a quoted amount: maximum cost on the buy side, minimum
/// receipt on the sell side.
pub fn apply_slippage(amount: u64, slippage_bps: u16, side: Side) -> u64 {
    let amount = amount as u128;
    let bps = slippage_bps as u128;
    let bounded = match side {
        Side::Buy => amount * (10_000 + bps) / 10_000,
        Side::Sell => amount * (10_000 - bps) / 10_000,
    };
    bounded as u64
}

// Execution price vs spot, both scaled by 10_000; zero when undefined.
fn buy_impact_bps(virtual_sol: u64, virtual_token: u64, lamports_in: u64, tokens_out: u64) -> u64 {
    if tokens_out == 0 || virtual_token == 0 {
        return 0;
    }
    let spot = virtual_sol as u128 * 10_000 / virtual_token as u128;
    if spot == 0 {
        return 0;
    }
    let exec = lamports_in as u128 * 10_000 / tokens_out as u128;
    (exec.saturating_sub(spot) * 10_000 / spot) as u64
}

fn sell_impact_bps(virtual_sol: u64, virtual_token: u64, tokens_in: u64, lamports_out: u64) -> u64 {
    if tokens_in == 0 || virtual_token == 0 {
        return 0;
    }
    let spot = virtual_sol as u128 * 10_000 / virtual_token as u128;
    if spot == 0 {
        return 0;
    }
    let exec = lamports_out as u128 * 10_000 / tokens_in as u128;
    (spot.saturating_sub(exec) * 10_000 / spot) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIRTUAL_SOL: u64 = 30_000_000_000; // 30 SOL
    const VIRTUAL_TOKEN: u64 = 1_000_000_000_000;
    const REAL_SOL: u64 = 20_000_000_000;
    const REAL_TOKEN: u64 = 800_000_000_000;

    #[test]
    fn sell_quote_reference_values() {
        let q = sell_quote(VIRTUAL_SOL, VIRTUAL_TOKEN, REAL_SOL, 10_000_000_000);
        assert_eq!(q.amount_in, 10_000_000_000);
        // floor(1e10 * 30e9 / 1.01e12) = 297_029_702, then 1% fee off
        assert_eq!(q.amount_out, 294_059_404);
        assert_eq!(q.price_impact_bps, 200);
    }

    #[test]
    fn buy_never_exceeds_real_token_reserve() {
        // a buy big enough to drain the curve gets capped
        let q = buy_quote(VIRTUAL_SOL, VIRTUAL_TOKEN, REAL_TOKEN, u64::MAX / 4);
        assert_eq!(q.amount_out, REAL_TOKEN);

        for lamports in [0u64, 1, 1_000, 1_000_000_000, 77_000_000_000] {
            let q = buy_quote(VIRTUAL_SOL, VIRTUAL_TOKEN, REAL_TOKEN, lamports);
            assert!(q.amount_out <= REAL_TOKEN);
        }
    }

    #[test]
    fn sell_never_exceeds_real_sol_reserve() {
        for tokens in [0u64, 1, 10_000_000_000, VIRTUAL_TOKEN, u64::MAX / 4] {
            let q = sell_quote(VIRTUAL_SOL, VIRTUAL_TOKEN, REAL_SOL, tokens);
            assert!(q.amount_out <= REAL_SOL);
        }
    }

    #[test]
    fn zero_in_zero_out() {
        assert_eq!(buy_quote(VIRTUAL_SOL, VIRTUAL_TOKEN, REAL_TOKEN, 0).amount_out, 0);
        assert_eq!(sell_quote(VIRTUAL_SOL, VIRTUAL_TOKEN, REAL_SOL, 0).amount_out, 0);
    }

    #[test]
    fn quotes_are_deterministic() {
        let a = buy_quote(VIRTUAL_SOL, VIRTUAL_TOKEN, REAL_TOKEN, 1_234_567_890);
        let b = buy_quote(VIRTUAL_SOL, VIRTUAL_TOKEN, REAL_TOKEN, 1_234_567_890);
        assert_eq!(a, b);
    }

    #[test]
    fn slippage_guard_bounds() {
        assert_eq!(apply_slippage(1_000_000, 0, Side::Buy), 1_000_000);
        assert_eq!(apply_slippage(1_000_000, 0, Side::Sell), 1_000_000);

        for bps in [1u16, 50, 500, 10_000] {
            let x = 987_654_321u64;
            assert!(apply_slippage(x, bps, Side::Buy) >= x);
            assert!(apply_slippage(x, bps, Side::Sell) <= x);
        }

        // exact: 500 bps on 1 SOL
        assert_eq!(apply_slippage(1_000_000_000, 500, Side::Buy), 1_050_000_000);
        assert_eq!(apply_slippage(1_000_000_000, 500, Side::Sell), 950_000_000);
    }

    #[test]
    fn buyer_pays_the_fee() {
        let q = buy_quote(VIRTUAL_SOL, VIRTUAL_TOKEN, REAL_TOKEN, 1_010_000_000);
        // 1% of net: 1.01 SOL in -> 1.00 SOL net -> 0.01 SOL fee
        assert_eq!(q.fee_lamports, 10_000_000);
    }
}
