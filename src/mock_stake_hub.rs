//! Reference stake hub.
//!
//! Implements the [`StakeHub`](crate::stake_hub::StakeHub) entry points with an
//! in-contract share ledger per validator. Used by the integration tests and by
//! the livenet demo when no hub address is supplied.
//!
//! Rates: the first bond at a validator is 1:1; afterwards
//! `shares = amount * total_shares / total_pooled`. Rewards pushed through
//! `distribute_reward` raise `total_pooled` and therefore the value per share.

use odra::casper_types::U512;
use odra::prelude::*;
use alloc::vec::Vec;

use crate::stake_hub::UnbondRequest;

/// Denominator for `redelegate_fee_rate`.
pub const REDELEGATE_FEE_RATE_BASE: u64 = 10_000;

pub mod events {
    use odra::prelude::*;
    use odra::casper_types::U512;

    #[odra::event]
    pub struct Bonded {
        pub validator: Address,
        pub delegator: Address,
        pub amount: U512,
        pub shares: U512,
        pub vote_power: bool,
    }

    #[odra::event]
    pub struct UnbondQueued {
        pub validator: Address,
        pub delegator: Address,
        pub shares: U512,
        pub amount: U512,
        pub unlock_time: u64,
    }

    #[odra::event]
    pub struct UnbondClaimed {
        pub validator: Address,
        pub delegator: Address,
        pub requests: u64,
        pub amount: U512,
    }

    #[odra::event]
    pub struct RewardDistributed {
        pub validator: Address,
        pub amount: U512,
    }
}

#[odra::odra_error]
pub enum StakeHubError {
    ZeroAmount = 100,
    BelowMinDelegation = 101,
    InsufficientShares = 102,
    RequestNotFound = 103,
    SameValidator = 104,
    NotOperator = 105,
}

#[odra::module(
    events = [
        events::Bonded,
        events::UnbondQueued,
        events::UnbondClaimed,
        events::RewardDistributed
    ],
    errors = StakeHubError
)]
pub struct MockStakeHub {
    operator: Var<Address>,
    min_delegation: Var<U512>,
    unbond_period: Var<u64>,
    redelegate_fee_rate: Var<u64>,

    // Per validator
    total_pooled: Mapping<Address, U512>,
    total_shares: Mapping<Address, U512>,

    // Per (validator, delegator)
    shares: Mapping<(Address, Address), U512>,
    unbond_requests: Mapping<(Address, Address), Vec<UnbondRequest>>,
}

#[odra::module]
impl MockStakeHub {
    /// `unbond_period` is in milliseconds of block time.
    pub fn init(&mut self, min_delegation: U512, unbond_period: u64, redelegate_fee_rate: u64) {
        self.operator.set(self.env().caller());
        self.min_delegation.set(min_delegation);
        self.unbond_period.set(unbond_period);
        self.redelegate_fee_rate.set(redelegate_fee_rate);
    }

    #[odra(payable)]
    pub fn delegate(&mut self, validator: Address, vote_power: bool) {
        let amount = self.env().attached_value();
        if amount.is_zero() {
            self.env().revert(StakeHubError::ZeroAmount);
        }
        if amount < self.min_delegation.get_or_default() {
            self.env().revert(StakeHubError::BelowMinDelegation);
        }
        let delegator = self.env().caller();
        let minted = self.shares_for_base(validator, amount);
        self.bond(validator, delegator, amount, minted, vote_power);
    }

    pub fn undelegate(&mut self, validator: Address, shares: U512) {
        if shares.is_zero() {
            self.env().revert(StakeHubError::ZeroAmount);
        }
        let delegator = self.env().caller();
        let amount = self.base_for_shares(validator, shares);
        self.unbond(validator, delegator, shares, amount);
    }

    pub fn redelegate(
        &mut self,
        src_validator: Address,
        dst_validator: Address,
        shares: U512,
        vote_power: bool,
    ) {
        if src_validator == dst_validator {
            self.env().revert(StakeHubError::SameValidator);
        }
        if shares.is_zero() {
            self.env().revert(StakeHubError::ZeroAmount);
        }
        let delegator = self.env().caller();
        let amount = self.base_for_shares(src_validator, shares);
        self.burn_shares(src_validator, delegator, shares, amount);

        // fee leaves the books entirely
        let fee = amount * U512::from(self.redelegate_fee_rate.get_or_default())
            / U512::from(REDELEGATE_FEE_RATE_BASE);
        let net = amount - fee;
        if net < self.min_delegation.get_or_default() {
            self.env().revert(StakeHubError::BelowMinDelegation);
        }
        let minted = self.shares_for_base(dst_validator, net);
        self.bond(dst_validator, delegator, net, minted, vote_power);
    }

    pub fn claim(&mut self, validator: Address, request_number: u64) {
        let delegator = self.env().caller();
        let key = (validator, delegator);
        let mut requests = self.unbond_requests.get(&key).unwrap_or_default();
        let now = self.env().get_block_time();

        let mut claimed = 0u64;
        let mut paid = U512::zero();
        while !requests.is_empty()
            && (request_number == 0 || claimed < request_number)
            && requests[0].unlock_time <= now
        {
            let request = requests.remove(0);
            paid += request.amount;
            claimed += 1;
        }
        if claimed == 0 {
            return;
        }

        self.unbond_requests.set(&key, requests);
        self.env().transfer_tokens(&delegator, &paid);
        self.env().emit_event(events::UnbondClaimed {
            validator,
            delegator,
            requests: claimed,
            amount: paid,
        });
    }

    pub fn pooled_value(&self, validator: Address, delegator: Address) -> U512 {
        let held = self.shares.get(&(validator, delegator)).unwrap_or_default();
        self.base_for_shares(validator, held)
    }

    pub fn base_for_shares(&self, validator: Address, shares: U512) -> U512 {
        let total_shares = self.total_shares.get(&validator).unwrap_or_default();
        if total_shares.is_zero() {
            return shares;
        }
        let total_pooled = self.total_pooled.get(&validator).unwrap_or_default();
        shares * total_pooled / total_shares
    }

    pub fn shares_for_base(&self, validator: Address, amount: U512) -> U512 {
        let total_shares = self.total_shares.get(&validator).unwrap_or_default();
        let total_pooled = self.total_pooled.get(&validator).unwrap_or_default();
        if total_shares.is_zero() || total_pooled.is_zero() {
            return amount;
        }
        amount * total_shares / total_pooled
    }

    pub fn locked_value(&self, validator: Address, delegator: Address, number: u64) -> U512 {
        let requests = self.unbond_requests.get(&(validator, delegator)).unwrap_or_default();
        let take = if number == 0 { requests.len() } else { number as usize };
        requests
            .iter()
            .take(take)
            .fold(U512::zero(), |sum, request| sum + request.amount)
    }

    pub fn min_delegation(&self) -> U512 {
        self.min_delegation.get_or_default()
    }

    pub fn claimable_request_count(&self, validator: Address, delegator: Address) -> u64 {
        let now = self.env().get_block_time();
        self.unbond_requests
            .get(&(validator, delegator))
            .unwrap_or_default()
            .iter()
            .take_while(|request| request.unlock_time <= now)
            .count() as u64
    }

    pub fn unbond_request(&self, validator: Address, delegator: Address, index: u64) -> UnbondRequest {
        let requests = self.unbond_requests.get(&(validator, delegator)).unwrap_or_default();
        match requests.get(index as usize) {
            Some(request) => request.clone(),
            None => self.env().revert(StakeHubError::RequestNotFound),
        }
    }

    pub fn redelegate_fee_rate(&self) -> u64 {
        self.redelegate_fee_rate.get_or_default()
    }

    pub fn fee_rate_base(&self) -> u64 {
        REDELEGATE_FEE_RATE_BASE
    }

    pub fn unbond_period(&self) -> u64 {
        self.unbond_period.get_or_default()
    }

    // ==========================================
    // Operator hooks (simulate network events)
    // ==========================================

    /// Credit the attached value to every delegator of `validator` pro rata.
    #[odra(payable)]
    pub fn distribute_reward(&mut self, validator: Address) {
        self.require_operator();
        let amount = self.env().attached_value();
        if amount.is_zero() {
            self.env().revert(StakeHubError::ZeroAmount);
        }
        let pooled = self.total_pooled.get(&validator).unwrap_or_default();
        self.total_pooled.set(&validator, pooled + amount);
        self.env().emit_event(events::RewardDistributed { validator, amount });
    }

    /// Unbond a delegator's whole position, as the network does when a validator exits.
    pub fn force_unbond(&mut self, validator: Address, delegator: Address) {
        self.require_operator();
        let held = self.shares.get(&(validator, delegator)).unwrap_or_default();
        if held.is_zero() {
            self.env().revert(StakeHubError::InsufficientShares);
        }
        let amount = self.base_for_shares(validator, held);
        self.unbond(validator, delegator, held, amount);
    }
}

impl MockStakeHub {
    fn require_operator(&self) {
        if self.operator.get() != Some(self.env().caller()) {
            self.env().revert(StakeHubError::NotOperator);
        }
    }

    fn bond(
        &mut self,
        validator: Address,
        delegator: Address,
        amount: U512,
        shares: U512,
        vote_power: bool,
    ) {
        let key = (validator, delegator);
        let held = self.shares.get(&key).unwrap_or_default();
        self.shares.set(&key, held + shares);
        let total_shares = self.total_shares.get(&validator).unwrap_or_default();
        self.total_shares.set(&validator, total_shares + shares);
        let total_pooled = self.total_pooled.get(&validator).unwrap_or_default();
        self.total_pooled.set(&validator, total_pooled + amount);

        self.env().emit_event(events::Bonded {
            validator,
            delegator,
            amount,
            shares,
            vote_power,
        });
    }

    fn burn_shares(&mut self, validator: Address, delegator: Address, shares: U512, amount: U512) {
        let key = (validator, delegator);
        let held = self.shares.get(&key).unwrap_or_default();
        if shares > held {
            self.env().revert(StakeHubError::InsufficientShares);
        }
        self.shares.set(&key, held - shares);
        let total_shares = self.total_shares.get(&validator).unwrap_or_default();
        self.total_shares.set(&validator, total_shares - shares);
        let total_pooled = self.total_pooled.get(&validator).unwrap_or_default();
        self.total_pooled.set(&validator, total_pooled.saturating_sub(amount));
    }

    fn unbond(&mut self, validator: Address, delegator: Address, shares: U512, amount: U512) {
        self.burn_shares(validator, delegator, shares, amount);

        let unlock_time = self.env().get_block_time() + self.unbond_period.get_or_default();
        let key = (validator, delegator);
        let mut requests = self.unbond_requests.get(&key).unwrap_or_default();
        requests.push(UnbondRequest {
            shares,
            amount,
            unlock_time,
        });
        self.unbond_requests.set(&key, requests);

        self.env().emit_event(events::UnbondQueued {
            validator,
            delegator,
            shares,
            amount,
            unlock_time,
        });
    }
}
