//! Pooled liquid-staking contract
//!
//! Users deposit CSPR and receive psCSPR pool shares. The pool delegates its
//! liquidity across whitelisted validators through a stake hub, compounds
//! validator rewards into the share price, and pays withdrawals through a FIFO
//! queue that is settled as unbonded funds come back.
//!
//! ## Units
//! - CSPR: motes (U512), 1 CSPR = 1e9 motes
//! - psCSPR: token units (U256), 9 decimals
//! - validator shares: the stake hub's own bonding units (U512)
//!
//! ## Settlement
//! Request ids come from one counter shared by two record kinds:
//! - a single legacy batch, migrated from the pre-upgrade single-validator pool,
//!   whose id sits just below the first queue entry;
//! - queue entries, one per `request_withdraw`.
//!
//! `settled_cursor` is the next id to settle. Everything below it is claimable.
//! The legacy range must be fully settled before any queue entry is.

use odra::prelude::*;
use odra::casper_types::{U256, U512};
use odra::ContractRef;
use alloc::vec::Vec;

use crate::math;
use crate::stake_hub::{stake_hub_ref, StakeHubContractRef};
use crate::tokens::PoolShareTokenContractRef;

// ==========================================
// Events
// ==========================================

pub mod events {
    use odra::prelude::*;
    use odra::casper_types::{U256, U512};

    #[odra::event]
    pub struct Deposited {
        pub user: Address,
        pub amount: U512,
        pub shares: U256,
    }

    #[odra::event]
    pub struct Delegated {
        pub validator: Address,
        pub amount: U512,
    }

    #[odra::event]
    pub struct Redelegated {
        pub src_validator: Address,
        pub dst_validator: Address,
        pub amount: U512,
        pub fee: U512,
    }

    #[odra::event]
    pub struct RewardsCompounded {
        pub profit: U512,
        pub fee: U512,
        pub total_delegated: U512,
    }

    #[odra::event]
    pub struct FeeClaimed {
        pub recipient: Address,
        pub amount: U512,
        pub shares: U256,
    }

    #[odra::event]
    pub struct WithdrawRequested {
        pub user: Address,
        pub id: u64,
        pub shares: U256,
        pub amount: U512,
    }

    #[odra::event]
    pub struct LegacyRequestImported {
        pub user: Address,
        pub id: u64,
        pub shares: U256,
    }

    #[odra::event]
    pub struct LegacyUndelegated {
        pub id: u64,
        pub validator: Address,
        pub amount: U512,
        pub shares: U256,
    }

    #[odra::event]
    pub struct Undelegated {
        pub validator: Address,
        pub amount: U512,
        pub validator_shares: U512,
    }

    #[odra::event]
    pub struct UndelegatedClaimed {
        pub validator: Address,
        pub amount: U512,
        pub settled_cursor: u64,
    }

    #[odra::event]
    pub struct UnbondingDrift {
        pub validator: Address,
        pub recorded: U512,
        pub received: U512,
    }

    #[odra::event]
    pub struct WithdrawClaimed {
        pub user: Address,
        pub id: u64,
        pub amount: U512,
    }

    #[odra::event]
    pub struct ValidatorAdded {
        pub validator: Address,
    }

    #[odra::event]
    pub struct ValidatorRemoved {
        pub validator: Address,
    }

    #[odra::event]
    pub struct ReserveDeposited {
        pub amount: U512,
        pub total_reserve_amount: U512,
    }

    #[odra::event]
    pub struct ReserveWithdrawn {
        pub amount: U512,
        pub total_reserve_amount: U512,
    }

    #[odra::event]
    pub struct FeeRateUpdated {
        pub old_rate_bps: u64,
        pub new_rate_bps: u64,
    }
}

// ==========================================
// Types
// ==========================================

/// Pool-side record of a current-scheme withdrawal
#[odra::odra_type]
pub struct QueueEntry {
    pub id: u64,
    /// Motes owed, fixed at request time
    pub base_amount: U512,
    /// Shares held in pool custody until settlement
    pub shares_burned: U256,
}

/// User-side record, shared by both schemes
#[odra::odra_type]
pub struct WithdrawalRequest {
    pub id: u64,
    pub shares_burned: U256,
    pub requested_at: u64,
}

/// The one undelegation round inherited from the single-validator pool
#[odra::odra_type]
pub struct LegacyBatch {
    pub id: u64,
    pub started_at: u64,
    pub settled_at: Option<u64>,
    pub base_amount: U512,
    pub shares_burned: U256,
}

/// Returned by get_user_request_status
#[odra::odra_type]
pub struct RequestStatus {
    pub id: u64,
    pub claimable: bool,
    pub amount: U512,
}

/// Returned by get_validator_info
#[odra::odra_type]
pub struct ValidatorInfo {
    pub active: bool,
    pub pooled_value: U512,
    pub locked_value: U512,
}

// ==========================================
// Errors
// ==========================================

#[odra::odra_error]
pub enum PoolError {
    InvalidAmount = 1,
    ZeroAddress = 2,
    Unauthorized = 3,
    ValidatorInactive = 4,
    BelowMinimumDelegation = 5,
    InsufficientReserve = 6,
    OutOfOrderClaim = 7,
    IndexOutOfRange = 8,
    NothingToClaim = 9,
    FeeRateOutOfRange = 10,
    StaleLegacyState = 11,
    NoNewProfit = 12,
}

// ==========================================
// Contract
// ==========================================

#[odra::module(
    events = [
        events::Deposited,
        events::Delegated,
        events::Redelegated,
        events::RewardsCompounded,
        events::FeeClaimed,
        events::WithdrawRequested,
        events::LegacyRequestImported,
        events::LegacyUndelegated,
        events::Undelegated,
        events::UndelegatedClaimed,
        events::UnbondingDrift,
        events::WithdrawClaimed,
        events::ValidatorAdded,
        events::ValidatorRemoved,
        events::ReserveDeposited,
        events::ReserveWithdrawn,
        events::FeeRateUpdated
    ],
    errors = PoolError
)]
pub struct StakePool {
    // External contracts
    share_token: Var<Address>,
    stake_hub: Var<Address>,

    // Validator registry (list is append-only, whitelist flag is mutable)
    validators: Mapping<Address, bool>,
    validator_listed: Mapping<Address, bool>,
    validator_list: Mapping<u32, Address>,
    validator_count: Var<u32>,

    // Ledger, all in motes
    amount_to_delegate: Var<U512>,  // Deposits not yet bonded
    total_delegated: Var<U512>,     // Bonded + unbonding + unsettled quota
    reserve_amount: Var<U512>,      // Target buffer
    total_reserve_amount: Var<U512>, // Buffer actually held
    unbonding: Var<U512>,           // Undelegated, not yet claimed from hub
    undelegated_quota: Var<U512>,   // Claimed from hub, not yet settled
    total_fee: Var<U512>,           // Accrued protocol fee
    fee_rate_bps: Var<u64>,
    fee_recipient: Var<Address>,

    // Withdrawal queue
    next_request_id: Var<u64>,
    settled_cursor: Var<u64>,
    queue: Mapping<u32, QueueEntry>,
    queue_len: Var<u32>,
    queue_positions: Mapping<u64, u32>,
    queued_amount: Var<U512>,       // Sum of base_amount at/after the cursor
    user_requests: Mapping<Address, Vec<WithdrawalRequest>>,

    // Legacy bridge
    legacy_validator: Var<Address>,
    legacy_round_id: Var<u64>,
    legacy_pending_shares: Var<U256>,
    legacy_batches: Mapping<u64, LegacyBatch>,

    // Roles
    admin: Var<Address>,
    bots: Mapping<Address, bool>,
    reserve_custodian: Var<Address>,
}

#[odra::module]
impl StakePool {
    // ==========================================
    // Initialization
    // ==========================================

    /// Initialize the pool. The deployer becomes admin and bot.
    ///
    /// `legacy_validator` is the validator that held the single-validator pool's
    /// stake; it is whitelisted so its residual stake is compounded.
    pub fn init(
        &mut self,
        share_token: Address,
        stake_hub: Address,
        fee_rate_bps: u64,
        legacy_validator: Option<Address>,
    ) {
        if fee_rate_bps > math::FEE_BASE_BPS {
            self.env().revert(PoolError::FeeRateOutOfRange);
        }
        let deployer = self.env().caller();

        self.share_token.set(share_token);
        self.stake_hub.set(stake_hub);
        self.fee_rate_bps.set(fee_rate_bps);
        self.next_request_id.set(1);
        self.settled_cursor.set(1);
        self.admin.set(deployer);
        self.bots.set(&deployer, true);

        if let Some(validator) = legacy_validator {
            self.legacy_validator.set(validator);
            self.register_validator(validator);
        }
    }

    // ==========================================
    // User Functions
    // ==========================================

    /// Deposit CSPR and receive pool shares at the current price.
    #[odra(payable)]
    pub fn deposit(&mut self) {
        let caller = self.env().caller();
        let amount = self.env().attached_value();
        if amount.is_zero() {
            self.env().revert(PoolError::InvalidAmount);
        }

        let shares = self.to_shares(amount);
        if shares.is_zero() {
            self.env().revert(PoolError::InvalidAmount);
        }

        let pending = self.amount_to_delegate.get_or_default();
        self.amount_to_delegate.set(pending + amount);

        self.env().emit_event(events::Deposited {
            user: caller,
            amount,
            shares,
        });
        self.share_token().mint(caller, shares);
    }

    /// Queue `shares` for redemption at the current price.
    ///
    /// The caller must approve the pool for `shares` first; the shares stay in
    /// pool custody until the request is settled.
    pub fn request_withdraw(&mut self, shares: U256) {
        if shares.is_zero() {
            self.env().revert(PoolError::InvalidAmount);
        }
        let amount = self.to_base(shares);
        if amount.is_zero() {
            self.env().revert(PoolError::InvalidAmount);
        }

        let user = self.env().caller();
        let id = self.take_request_id();

        let mut requests = self.user_requests.get(&user).unwrap_or_default();
        requests.push(WithdrawalRequest {
            id,
            shares_burned: shares,
            requested_at: self.env().get_block_time(),
        });
        self.user_requests.set(&user, requests);

        let position = self.queue_len.get_or_default();
        self.queue.set(&position, QueueEntry {
            id,
            base_amount: amount,
            shares_burned: shares,
        });
        self.queue_positions.set(&id, position);
        self.queue_len.set(position + 1);
        let queued = self.queued_amount.get_or_default();
        self.queued_amount.set(queued + amount);

        self.env().emit_event(events::WithdrawRequested {
            user,
            id,
            shares,
            amount,
        });

        let pool = self.env().self_address();
        self.share_token().transfer_from(user, pool, shares);
    }

    /// Pay out the caller's settled request at `index`.
    ///
    /// The request is swap-removed, so the last request takes its index.
    pub fn claim_withdraw(&mut self, index: u32) {
        let user = self.env().caller();
        let mut requests = self.user_requests.get(&user).unwrap_or_default();
        let position = index as usize;
        if position >= requests.len() {
            self.env().revert(PoolError::IndexOutOfRange);
        }

        let request = requests.swap_remove(position);
        let amount = match self.settled_amount(&request) {
            Some(amount) => amount,
            None => self.env().revert(PoolError::OutOfOrderClaim),
        };
        self.user_requests.set(&user, requests);

        self.env().emit_event(events::WithdrawClaimed {
            user,
            id: request.id,
            amount,
        });
        self.env().transfer_tokens(&user, &amount);
    }

    // ==========================================
    // Bot Functions
    // ==========================================

    /// Bond `amount` of pending deposits with `validator`.
    pub fn delegate_to(&mut self, validator: Address, amount: U512) {
        self.require_bot();
        if amount.is_zero() {
            self.env().revert(PoolError::InvalidAmount);
        }
        if !self.is_validator(validator) {
            self.env().revert(PoolError::ValidatorInactive);
        }
        let pending = self.amount_to_delegate.get_or_default();
        if amount > pending {
            self.env().revert(PoolError::InvalidAmount);
        }
        let hub = self.stake_hub();
        if amount < hub.min_delegation() {
            self.env().revert(PoolError::BelowMinimumDelegation);
        }

        self.amount_to_delegate.set(pending - amount);
        let delegated = self.total_delegated.get_or_default();
        self.total_delegated.set(delegated + amount);

        self.env().emit_event(events::Delegated { validator, amount });
        hub.with_tokens(amount).delegate(validator, true);
    }

    /// Fold rewards observed at the stake hub into `total_delegated`, keeping
    /// the protocol cut in `total_fee`.
    pub fn compound_rewards(&mut self) {
        self.require_bot();
        let observed = self.observed_value();
        let delegated = self.total_delegated.get_or_default();
        let accrued_fee = self.total_fee.get_or_default();

        let profit = observed
            .checked_sub(delegated)
            .and_then(|rest| rest.checked_sub(accrued_fee))
            .unwrap_or_default();
        if profit.is_zero() {
            self.env().revert(PoolError::NoNewProfit);
        }

        let fee = self.checked(math::fee_of(profit, self.fee_rate_bps.get_or_default()));
        let total_delegated = delegated + (profit - fee);
        self.total_fee.set(accrued_fee + fee);
        self.total_delegated.set(total_delegated);

        self.env().emit_event(events::RewardsCompounded {
            profit,
            fee,
            total_delegated,
        });
    }

    /// Realise the accrued fee as shares minted to the fee recipient.
    pub fn claim_fee(&mut self) {
        self.require_bot();
        let fee = self.total_fee.get_or_default();
        if fee.is_zero() {
            self.env().revert(PoolError::NothingToClaim);
        }
        let recipient = self.fee_recipient.get_or_revert_with(PoolError::ZeroAddress);

        // price before the fee joins the pooled value
        let shares = self.to_shares(fee);
        let delegated = self.total_delegated.get_or_default();
        self.total_delegated.set(delegated + fee);
        self.total_fee.set(U512::zero());

        self.env().emit_event(events::FeeClaimed {
            recipient,
            amount: fee,
            shares,
        });
        if !shares.is_zero() {
            self.share_token().mint(recipient, shares);
        }
    }

    /// One-time bridge: undelegate everything the legacy requests are owed
    /// from the legacy validator and open their batch.
    pub fn undelegate_legacy(&mut self) {
        self.require_bot();
        let pending = self.legacy_pending_shares.get_or_default();
        if pending.is_zero() {
            self.env().revert(PoolError::NothingToClaim);
        }
        let validator = self.legacy_validator.get_or_revert_with(PoolError::ZeroAddress);

        let id = self.first_queue_id() - 1;
        let amount = self.to_base(pending);
        let mut hub = self.stake_hub();
        let validator_shares = hub.shares_for_base(validator, amount);
        if validator_shares.is_zero() {
            self.env().revert(PoolError::InvalidAmount);
        }
        // the batch owes what the hub will release, not the requested value
        let actual = hub.base_for_shares(validator, validator_shares);

        self.legacy_batches.set(&id, LegacyBatch {
            id,
            started_at: self.env().get_block_time(),
            settled_at: None,
            base_amount: actual,
            shares_burned: pending,
        });
        self.legacy_pending_shares.set(U256::zero());
        let unbonding = self.unbonding.get_or_default();
        self.unbonding.set(unbonding + actual);

        self.env().emit_event(events::LegacyUndelegated {
            id,
            validator,
            amount: actual,
            shares: pending,
        });
        hub.undelegate(validator, validator_shares);
    }

    /// Start unbonding `amount` from `validator` to serve the queue.
    pub fn undelegate_from(&mut self, validator: Address, amount: U512) {
        self.require_bot();
        self.require_legacy_bridged();
        if amount.is_zero() {
            self.env().revert(PoolError::InvalidAmount);
        }
        let allowance = self.amount_to_undelegate() + self.reserve_amount.get_or_default();
        if amount > allowance {
            self.env().revert(PoolError::InsufficientReserve);
        }

        let mut hub = self.stake_hub();
        let validator_shares = hub.shares_for_base(validator, amount);
        if validator_shares.is_zero() {
            self.env().revert(PoolError::InvalidAmount);
        }
        // rounding at the hub may differ from the requested amount
        let actual = hub.base_for_shares(validator, validator_shares);

        let unbonding = self.unbonding.get_or_default();
        self.unbonding.set(unbonding + actual);

        self.env().emit_event(events::Undelegated {
            validator,
            amount: actual,
            validator_shares,
        });
        hub.undelegate(validator, validator_shares);
    }

    /// Collect matured unbonds from `validator` and settle as much of the
    /// queue as the released funds cover.
    ///
    /// Returns the new settlement cursor and the amount received by this call.
    pub fn claim_undelegated(&mut self, validator: Address) -> (u64, U512) {
        self.require_bot();
        self.require_legacy_bridged();

        let before = self.env().self_balance();
        self.stake_hub().claim(validator, 0);
        let received = self.env().self_balance().saturating_sub(before);
        if received.is_zero() {
            self.env().revert(PoolError::NothingToClaim);
        }

        let mut quota = self.undelegated_quota.get_or_default() + received;
        let unbonding = self.unbonding.get_or_default();
        if received > unbonding {
            // more came back than was recorded, e.g. a forced unbond by the network
            self.env().emit_event(events::UnbondingDrift {
                validator,
                recorded: unbonding,
                received,
            });
            self.unbonding.set(U512::zero());
        } else {
            self.unbonding.set(unbonding - received);
        }

        let now = self.env().get_block_time();
        let mut cursor = self.settled_cursor.get_or_default();
        let mut covered_amount = U512::zero();
        let mut covered_shares = U256::zero();

        // Phase A: legacy range, below the first queue entry
        let legacy_end = self.first_queue_id();
        let mut legacy_drained = true;
        while cursor < legacy_end {
            if let Some(mut batch) = self.legacy_batches.get(&cursor) {
                if batch.settled_at.is_none() {
                    if quota < batch.base_amount {
                        legacy_drained = false;
                        break;
                    }
                    quota -= batch.base_amount;
                    covered_amount += batch.base_amount;
                    covered_shares += batch.shares_burned;
                    batch.settled_at = Some(now);
                    self.legacy_batches.set(&cursor, batch);
                }
            }
            cursor += 1;
        }

        // Phase B: queue entries in id order, stop at the first that does not fit
        if legacy_drained {
            let mut queue_covered = U512::zero();
            while let Some(entry) = self.queue_entry(cursor) {
                if entry.base_amount > quota {
                    break;
                }
                quota -= entry.base_amount;
                queue_covered += entry.base_amount;
                covered_shares += entry.shares_burned;
                cursor += 1;
            }
            let queued = self.queued_amount.get_or_default();
            self.queued_amount.set(queued.saturating_sub(queue_covered));
            covered_amount += queue_covered;
        }

        let delegated = self.total_delegated.get_or_default();
        let remaining = self.checked(delegated.checked_sub(covered_amount));
        self.total_delegated.set(remaining);
        self.undelegated_quota.set(quota);
        self.settled_cursor.set(cursor);

        self.env().emit_event(events::UndelegatedClaimed {
            validator,
            amount: received,
            settled_cursor: cursor,
        });
        if !covered_shares.is_zero() {
            let pool = self.env().self_address();
            self.share_token().burn(pool, covered_shares);
        }
        (cursor, received)
    }

    // ==========================================
    // Admin Functions
    // ==========================================

    /// Move `amount` of stake from `src_validator` to `dst_validator`.
    ///
    /// Pool totals are untouched; the hub's redelegation fee shows up as a
    /// shortfall that later rewards have to cover before compounding resumes.
    pub fn redelegate(&mut self, src_validator: Address, dst_validator: Address, amount: U512) {
        self.require_admin();
        if src_validator == dst_validator || amount.is_zero() {
            self.env().revert(PoolError::InvalidAmount);
        }
        if !self.is_validator(dst_validator) {
            self.env().revert(PoolError::ValidatorInactive);
        }

        let mut hub = self.stake_hub();
        let pool = self.env().self_address();
        if amount > hub.pooled_value(src_validator, pool) {
            self.env().revert(PoolError::InvalidAmount);
        }
        let validator_shares = hub.shares_for_base(src_validator, amount);
        if validator_shares.is_zero() {
            self.env().revert(PoolError::InvalidAmount);
        }
        let moved = hub.base_for_shares(src_validator, validator_shares);
        let fee = self.checked(
            moved
                .checked_mul(U512::from(hub.redelegate_fee_rate()))
                .map(|scaled| scaled / U512::from(hub.fee_rate_base().max(1))),
        );
        if moved - fee < hub.min_delegation() {
            self.env().revert(PoolError::BelowMinimumDelegation);
        }

        self.env().emit_event(events::Redelegated {
            src_validator,
            dst_validator,
            amount: moved,
            fee,
        });
        hub.redelegate(src_validator, dst_validator, validator_shares, true);
    }

    /// Re-register one pre-upgrade pending withdrawal under the legacy round id.
    ///
    /// Only allowed before the queue has any entry and before the legacy batch
    /// is opened. `user` must have approved the pool for `shares`.
    pub fn import_legacy_request(&mut self, user: Address, shares: U256, requested_at: u64) {
        self.require_admin();
        if self.legacy_validator.get().is_none() {
            self.env().revert(PoolError::ZeroAddress);
        }
        if shares.is_zero() {
            self.env().revert(PoolError::InvalidAmount);
        }
        let batch_opened = self
            .legacy_round_id
            .get()
            .map(|id| self.legacy_batches.get(&id).is_some())
            .unwrap_or(false);
        if self.queue_len.get_or_default() > 0 || batch_opened {
            self.env().revert(PoolError::StaleLegacyState);
        }

        let id = match self.legacy_round_id.get() {
            Some(id) => id,
            None => {
                let id = self.take_request_id();
                self.legacy_round_id.set(id);
                id
            }
        };

        let mut requests = self.user_requests.get(&user).unwrap_or_default();
        requests.push(WithdrawalRequest {
            id,
            shares_burned: shares,
            requested_at,
        });
        self.user_requests.set(&user, requests);
        let pending = self.legacy_pending_shares.get_or_default();
        self.legacy_pending_shares.set(pending + shares);

        self.env().emit_event(events::LegacyRequestImported { user, id, shares });

        let pool = self.env().self_address();
        self.share_token().transfer_from(user, pool, shares);
    }

    pub fn add_validator(&mut self, validator: Address) {
        self.require_admin();
        self.register_validator(validator);
    }

    /// Stop new delegations to `validator`. It stays listed so its remaining
    /// stake is still compounded and can be undelegated.
    pub fn remove_validator(&mut self, validator: Address) {
        self.require_admin();
        if !self.is_validator(validator) {
            self.env().revert(PoolError::ValidatorInactive);
        }
        self.validators.set(&validator, false);
        self.env().emit_event(events::ValidatorRemoved { validator });
    }

    pub fn set_fee_rate(&mut self, rate_bps: u64) {
        self.require_admin();
        if rate_bps > math::FEE_BASE_BPS {
            self.env().revert(PoolError::FeeRateOutOfRange);
        }
        let old_rate_bps = self.fee_rate_bps.get_or_default();
        self.fee_rate_bps.set(rate_bps);
        self.env().emit_event(events::FeeRateUpdated {
            old_rate_bps,
            new_rate_bps: rate_bps,
        });
    }

    pub fn set_fee_recipient(&mut self, recipient: Address) {
        self.require_admin();
        self.fee_recipient.set(recipient);
    }

    pub fn set_bot(&mut self, bot: Address, enabled: bool) {
        self.require_admin();
        self.bots.set(&bot, enabled);
    }

    pub fn set_reserve_custodian(&mut self, custodian: Address) {
        self.require_admin();
        self.reserve_custodian.set(custodian);
    }

    /// Target reserve; widens what `undelegate_from` may take beyond queue demand.
    pub fn set_reserve_amount(&mut self, amount: U512) {
        self.require_admin();
        self.reserve_amount.set(amount);
    }

    pub fn transfer_admin(&mut self, new_admin: Address) {
        self.require_admin();
        self.admin.set(new_admin);
    }

    // ==========================================
    // Reserve Custodian Functions
    // ==========================================

    #[odra(payable)]
    pub fn deposit_reserve(&mut self) {
        self.require_custodian();
        let amount = self.env().attached_value();
        if amount.is_zero() {
            self.env().revert(PoolError::InvalidAmount);
        }
        let total = self.total_reserve_amount.get_or_default() + amount;
        self.total_reserve_amount.set(total);
        self.env().emit_event(events::ReserveDeposited {
            amount,
            total_reserve_amount: total,
        });
    }

    pub fn withdraw_reserve(&mut self, amount: U512) {
        self.require_custodian();
        if amount.is_zero() {
            self.env().revert(PoolError::InvalidAmount);
        }
        let held = self.total_reserve_amount.get_or_default();
        if amount > held {
            self.env().revert(PoolError::InsufficientReserve);
        }
        let total = held - amount;
        self.total_reserve_amount.set(total);
        self.env().emit_event(events::ReserveWithdrawn {
            amount,
            total_reserve_amount: total,
        });
        let custodian = self.env().caller();
        self.env().transfer_tokens(&custodian, &amount);
    }

    // ==========================================
    // View Functions
    // ==========================================

    /// Pool shares worth `amount` motes at the current price.
    pub fn to_shares(&self, amount: U512) -> U256 {
        self.checked(math::to_shares(amount, self.share_supply(), self.pooled_value()))
    }

    /// Motes redeemable for `shares` at the current price.
    pub fn to_base(&self, shares: U256) -> U512 {
        self.checked(math::to_base(shares, self.share_supply(), self.pooled_value()))
    }

    pub fn to_validator_shares(&self, validator: Address, amount: U512) -> U512 {
        self.stake_hub().shares_for_base(validator, amount)
    }

    pub fn to_validator_base(&self, validator: Address, shares: U512) -> U512 {
        self.stake_hub().base_for_shares(validator, shares)
    }

    /// Liquidity still needed from validators to cover every unsettled queue entry.
    pub fn amount_to_undelegate(&self) -> U512 {
        self.queued_amount
            .get_or_default()
            .saturating_sub(self.unbonding.get_or_default())
            .saturating_sub(self.undelegated_quota.get_or_default())
    }

    /// Same resolution as `claim_withdraw`, without touching state.
    pub fn get_user_request_status(&self, user: Address, index: u32) -> RequestStatus {
        let requests = self.user_requests.get(&user).unwrap_or_default();
        let request = match requests.get(index as usize) {
            Some(request) => request,
            None => self.env().revert(PoolError::IndexOutOfRange),
        };
        match self.settled_amount(request) {
            Some(amount) => RequestStatus {
                id: request.id,
                claimable: true,
                amount,
            },
            None => RequestStatus {
                id: request.id,
                claimable: false,
                amount: self.pending_amount(request),
            },
        }
    }

    pub fn get_user_withdrawal_requests(&self, user: Address) -> Vec<WithdrawalRequest> {
        self.user_requests.get(&user).unwrap_or_default()
    }

    /// Queue entry with `id`, `None` for legacy or unassigned ids.
    pub fn queue_entry(&self, id: u64) -> Option<QueueEntry> {
        self.queue_positions
            .get(&id)
            .and_then(|position| self.queue.get(&position))
    }

    pub fn legacy_batch(&self, id: u64) -> Option<LegacyBatch> {
        self.legacy_batches.get(&id)
    }

    pub fn is_validator(&self, validator: Address) -> bool {
        self.validators.get(&validator).unwrap_or_default()
    }

    /// Every validator ever registered, whitelisted or not.
    pub fn validators(&self) -> Vec<Address> {
        (0..self.validator_count.get_or_default())
            .filter_map(|index| self.validator_list.get(&index))
            .collect()
    }

    pub fn get_validator_info(&self, validator: Address) -> ValidatorInfo {
        let hub = self.stake_hub();
        let pool = self.env().self_address();
        ValidatorInfo {
            active: self.is_validator(validator),
            pooled_value: hub.pooled_value(validator, pool),
            locked_value: hub.locked_value(validator, pool, 0),
        }
    }

    /// Matured unbond requests at `validator` waiting for `claim_undelegated`.
    pub fn claimable_unbond_count(&self, validator: Address) -> u64 {
        let pool = self.env().self_address();
        self.stake_hub().claimable_request_count(validator, pool)
    }

    /// `amount_to_delegate + total_delegated`, the value backing the share supply.
    pub fn pooled_value(&self) -> U512 {
        self.amount_to_delegate.get_or_default() + self.total_delegated.get_or_default()
    }

    pub fn amount_to_delegate(&self) -> U512 {
        self.amount_to_delegate.get_or_default()
    }

    pub fn total_delegated(&self) -> U512 {
        self.total_delegated.get_or_default()
    }

    pub fn reserve_amount(&self) -> U512 {
        self.reserve_amount.get_or_default()
    }

    pub fn total_reserve_amount(&self) -> U512 {
        self.total_reserve_amount.get_or_default()
    }

    pub fn unbonding(&self) -> U512 {
        self.unbonding.get_or_default()
    }

    pub fn undelegated_quota(&self) -> U512 {
        self.undelegated_quota.get_or_default()
    }

    pub fn total_fee(&self) -> U512 {
        self.total_fee.get_or_default()
    }

    pub fn fee_rate_bps(&self) -> u64 {
        self.fee_rate_bps.get_or_default()
    }

    pub fn fee_recipient(&self) -> Option<Address> {
        self.fee_recipient.get()
    }

    pub fn next_request_id(&self) -> u64 {
        self.next_request_id.get_or_default()
    }

    pub fn settled_cursor(&self) -> u64 {
        self.settled_cursor.get_or_default()
    }

    pub fn queue_len(&self) -> u32 {
        self.queue_len.get_or_default()
    }

    pub fn legacy_pending_shares(&self) -> U256 {
        self.legacy_pending_shares.get_or_default()
    }

    pub fn legacy_round_id(&self) -> Option<u64> {
        self.legacy_round_id.get()
    }

    pub fn legacy_validator(&self) -> Option<Address> {
        self.legacy_validator.get()
    }

    pub fn share_token_address(&self) -> Option<Address> {
        self.share_token.get()
    }

    pub fn stake_hub_address(&self) -> Option<Address> {
        self.stake_hub.get()
    }

    pub fn admin(&self) -> Option<Address> {
        self.admin.get()
    }

    pub fn is_bot(&self, account: Address) -> bool {
        self.bots.get(&account).unwrap_or_default()
    }

    pub fn reserve_custodian(&self) -> Option<Address> {
        self.reserve_custodian.get()
    }
}

impl StakePool {
    // ==========================================
    // Access control
    // ==========================================

    fn require_admin(&self) {
        if self.admin.get() != Some(self.env().caller()) {
            self.env().revert(PoolError::Unauthorized);
        }
    }

    fn require_bot(&self) {
        if !self.is_bot(self.env().caller()) {
            self.env().revert(PoolError::Unauthorized);
        }
    }

    fn require_custodian(&self) {
        if self.reserve_custodian.get() != Some(self.env().caller()) {
            self.env().revert(PoolError::Unauthorized);
        }
    }

    fn require_legacy_bridged(&self) {
        if !self.legacy_pending_shares.get_or_default().is_zero() {
            self.env().revert(PoolError::StaleLegacyState);
        }
    }

    // ==========================================
    // Internal helpers
    // ==========================================

    fn checked<T>(&self, value: Option<T>) -> T {
        value.unwrap_or_else(|| self.env().revert(PoolError::InvalidAmount))
    }

    fn share_token(&self) -> PoolShareTokenContractRef {
        let address = self.share_token.get_or_revert_with(PoolError::ZeroAddress);
        PoolShareTokenContractRef::new(self.env(), address)
    }

    fn stake_hub(&self) -> StakeHubContractRef {
        let address = self.stake_hub.get_or_revert_with(PoolError::ZeroAddress);
        stake_hub_ref(self.env(), address)
    }

    fn share_supply(&self) -> U256 {
        self.share_token().total_supply()
    }

    fn take_request_id(&mut self) -> u64 {
        let id = self.next_request_id.get_or_default();
        self.next_request_id.set(id + 1);
        id
    }

    /// Id of the oldest queue entry, or the next id to be assigned.
    fn first_queue_id(&self) -> u64 {
        self.queue
            .get(&0)
            .map(|entry| entry.id)
            .unwrap_or_else(|| self.next_request_id.get_or_default())
    }

    fn register_validator(&mut self, validator: Address) {
        self.validators.set(&validator, true);
        if !self.validator_listed.get(&validator).unwrap_or_default() {
            let index = self.validator_count.get_or_default();
            self.validator_list.set(&index, validator);
            self.validator_count.set(index + 1);
            self.validator_listed.set(&validator, true);
        }
        self.env().emit_event(events::ValidatorAdded { validator });
    }

    /// Value the pool has at the hub plus settled-but-unassigned liquidity.
    fn observed_value(&self) -> U512 {
        let hub = self.stake_hub();
        let pool = self.env().self_address();
        self.validators()
            .into_iter()
            .fold(self.undelegated_quota.get_or_default(), |sum, validator| {
                sum + hub.pooled_value(validator, pool) + hub.locked_value(validator, pool, 0)
            })
    }

    /// Payout for `request` if it is settled, `None` while it is still pending.
    fn settled_amount(&self, request: &WithdrawalRequest) -> Option<U512> {
        if self.legacy_round_id.get() == Some(request.id) {
            let batch = self.legacy_batches.get(&request.id)?;
            if batch.settled_at.is_none() {
                return None;
            }
            return Some(self.checked(math::pro_rata(
                batch.base_amount,
                request.shares_burned,
                batch.shares_burned,
            )));
        }
        if request.id >= self.settled_cursor.get_or_default() {
            return None;
        }
        self.queue_entry(request.id).map(|entry| entry.base_amount)
    }

    fn pending_amount(&self, request: &WithdrawalRequest) -> U512 {
        match self.queue_entry(request.id) {
            Some(entry) => entry.base_amount,
            None => self.to_base(request.shares_burned),
        }
    }
}
