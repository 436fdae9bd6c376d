//! Validator bonding backend interface.
//!
//! The pool never holds validator stake itself. Every validator position lives in
//! a stake hub contract that tracks, per validator, the delegator's bonding shares
//! and an internal exchange rate between those shares and motes. That rate moves
//! with validator rewards and is unrelated to the pool-share price.
//!
//! Unbonding follows the hub's queue: `undelegate` locks the value for the
//! network's unbonding period and `claim` pays matured requests back to the caller.

use alloc::rc::Rc;
use odra::casper_types::U512;
use odra::prelude::*;
use odra::{ContractEnv, ContractRef};

/// A single pending unbond at a validator.
#[odra::odra_type]
pub struct UnbondRequest {
    /// Bonding shares given up
    pub shares: U512,
    /// Motes locked until `unlock_time`
    pub amount: U512,
    /// Block time (ms) after which the request is claimable
    pub unlock_time: u64,
}

/// Stake hub external contract interface.
///
/// All queries are keyed by validator; the delegator is the calling contract for
/// mutating calls and an explicit argument for views.
#[odra::external_contract]
pub trait StakeHub {
    /// Bond the attached value with `validator`.
    fn delegate(&mut self, validator: Address, vote_power: bool);

    /// Start unbonding `shares` of the caller's position at `validator`.
    fn undelegate(&mut self, validator: Address, shares: U512);

    /// Move `shares` from `src_validator` to `dst_validator` without unbonding.
    fn redelegate(
        &mut self,
        src_validator: Address,
        dst_validator: Address,
        shares: U512,
        vote_power: bool,
    );

    /// Pay out up to `request_number` matured unbond requests (0 = all).
    fn claim(&mut self, validator: Address, request_number: u64);

    /// Current mote value of `delegator`'s bonded shares.
    fn pooled_value(&self, validator: Address, delegator: Address) -> U512;

    /// Motes represented by `shares` at the validator's rate.
    fn base_for_shares(&self, validator: Address, shares: U512) -> U512;

    /// Bonding shares represented by `amount` motes at the validator's rate.
    fn shares_for_base(&self, validator: Address, amount: U512) -> U512;

    /// Motes locked in the first `number` unbond requests (0 = all).
    fn locked_value(&self, validator: Address, delegator: Address, number: u64) -> U512;

    /// Smallest delegation the hub accepts.
    fn min_delegation(&self) -> U512;

    /// Number of `delegator`'s unbond requests that have matured.
    fn claimable_request_count(&self, validator: Address, delegator: Address) -> u64;

    /// Unbond request at `index` in `delegator`'s queue.
    fn unbond_request(&self, validator: Address, delegator: Address, index: u64) -> UnbondRequest;

    /// Redelegation fee rate, over `fee_rate_base`.
    fn redelegate_fee_rate(&self) -> u64;

    fn fee_rate_base(&self) -> u64;
}

/// Build a hub reference for `address`.
pub fn stake_hub_ref(env: Rc<ContractEnv>, address: Address) -> StakeHubContractRef {
    StakeHubContractRef::new(env, address)
}
