//! Share-price arithmetic for the stake pool.
//!
//! Pure functions, no contract state. Base-asset amounts are motes (`U512`),
//! pool shares are CEP-18 units (`U256`). Every helper returns `None` on
//! overflow so callers decide how to revert.

use odra::casper_types::{U256, U512};

/// Basis points divisor for the protocol fee rate.
pub const FEE_BASE_BPS: u64 = 10_000;

/// Widen a share amount into the base-asset integer width.
pub fn widen(value: U256) -> U512 {
    let mut words = [0u64; 8];
    words[..4].copy_from_slice(&value.0);
    U512(words)
}

/// Narrow back to share width, `None` if the value does not fit.
pub fn narrow(value: U512) -> Option<U256> {
    if value.0[4..].iter().any(|word| *word != 0) {
        return None;
    }
    let mut words = [0u64; 4];
    words.copy_from_slice(&value.0[..4]);
    Some(U256(words))
}

/// Zero totals are treated as 1 so the genesis price is exactly 1:1.
fn floor_one(value: U512) -> U512 {
    if value.is_zero() {
        U512::one()
    } else {
        value
    }
}

/// Pool shares worth `amount` motes.
///
/// `shares = amount * supply / pooled`, rounded down.
pub fn to_shares(amount: U512, supply: U256, pooled: U512) -> Option<U256> {
    let supply = floor_one(widen(supply));
    let pooled = floor_one(pooled);
    amount
        .checked_mul(supply)
        .map(|scaled| scaled / pooled)
        .and_then(narrow)
}

/// Motes redeemable for `shares` pool shares.
///
/// `amount = shares * pooled / supply`, rounded down.
pub fn to_base(shares: U256, supply: U256, pooled: U512) -> Option<U512> {
    let supply = floor_one(widen(supply));
    let pooled = floor_one(pooled);
    widen(shares)
        .checked_mul(pooled)
        .map(|scaled| scaled / supply)
}

/// Protocol cut of `profit` at `rate_bps`.
pub fn fee_of(profit: U512, rate_bps: u64) -> Option<U512> {
    profit
        .checked_mul(U512::from(rate_bps))
        .map(|scaled| scaled / U512::from(FEE_BASE_BPS))
}

/// `amount * part / whole`, truncated in favour of the pool.
pub fn pro_rata(amount: U512, part: U256, whole: U256) -> Option<U512> {
    if whole.is_zero() {
        return None;
    }
    amount
        .checked_mul(widen(part))
        .map(|scaled| scaled / widen(whole))
}
