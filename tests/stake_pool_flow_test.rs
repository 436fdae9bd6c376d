//! Stake pool flow tests
//!
//! Deposit, delegation, compounding, FIFO withdrawal settlement and the legacy
//! bridge, run against MockStakeHub on the Odra VM.

use odra::prelude::*;
use odra::host::{Deployer, HostEnv, HostRef};
use odra::casper_types::{U256, U512};

use stake_pool_casper::mock_stake_hub::{MockStakeHub, MockStakeHubHostRef, MockStakeHubInitArgs};
use stake_pool_casper::pool::{PoolError, StakePool, StakePoolHostRef, StakePoolInitArgs};
use stake_pool_casper::tokens::{PoolShareToken, PoolShareTokenHostRef, PoolShareTokenInitArgs};

const MOTES_PER_CSPR: u64 = 1_000_000_000;
const UNBOND_PERIOD_MS: u64 = 86_400_000;
const REDELEGATE_FEE_RATE: u64 = 20; // 0.2%
const POOL_FEE_RATE_BPS: u64 = 1_000; // 10%

fn cspr(amount: u64) -> U512 {
    U512::from(amount) * U512::from(MOTES_PER_CSPR)
}

/// Pool share units for `amount` whole shares (9 decimals)
fn shares(amount: u64) -> U256 {
    U256::from(amount) * U256::from(MOTES_PER_CSPR)
}

struct Deployment {
    env: HostEnv,
    token: PoolShareTokenHostRef,
    hub: MockStakeHubHostRef,
    pool: StakePoolHostRef,
    owner: Address,
    v1: Address,
    v2: Address,
    legacy: Address,
}

// ==========================================
// Helper: Deploy contracts
// ==========================================

/// `with_legacy` configures account 7 as the pre-upgrade validator.
fn deploy(with_legacy: bool) -> Deployment {
    let env = odra_test::env();
    let owner = env.get_account(0);
    let legacy = env.get_account(7);
    env.set_caller(owner);

    let mut token = PoolShareToken::deploy(&env, PoolShareTokenInitArgs { minter: owner });
    let hub = MockStakeHub::deploy(&env, MockStakeHubInitArgs {
        min_delegation: cspr(1),
        unbond_period: UNBOND_PERIOD_MS,
        redelegate_fee_rate: REDELEGATE_FEE_RATE,
    });
    let mut pool = StakePool::deploy(&env, StakePoolInitArgs {
        share_token: token.address(),
        stake_hub: hub.address(),
        fee_rate_bps: POOL_FEE_RATE_BPS,
        legacy_validator: with_legacy.then_some(legacy),
    });
    token.set_minter(pool.address());

    let v1 = env.get_account(8);
    let v2 = env.get_account(9);
    pool.add_validator(v1);
    pool.add_validator(v2);

    Deployment { env, token, hub, pool, owner, v1, v2, legacy }
}

fn deposit(d: &mut Deployment, user: Address, amount: U512) {
    d.env.set_caller(user);
    d.pool.with_tokens(amount).deposit();
}

fn request_withdraw(d: &mut Deployment, user: Address, amount: U256) {
    d.env.set_caller(user);
    d.token.approve(d.pool.address(), amount);
    d.pool.request_withdraw(amount);
}

/// Owner pays `amount` of validator rewards into the hub for `validator`.
fn reward(d: &mut Deployment, validator: Address, amount: U512) {
    d.env.set_caller(d.owner);
    d.hub.with_tokens(amount).distribute_reward(validator);
}

fn wait_for_unbonding(d: &Deployment) {
    d.env.advance_block_time(UNBOND_PERIOD_MS + 1_000);
}

fn pool_balance(d: &Deployment) -> U512 {
    d.env.balance_of(&d.pool.address())
}

// ==========================================
// Deposits and pricing
// ==========================================

#[test]
fn test_deposit_at_genesis_mints_one_to_one() {
    let mut d = deploy(false);
    let user = d.env.get_account(1);

    deposit(&mut d, user, cspr(100));

    assert_eq!(d.token.balance_of(user), shares(100));
    assert_eq!(d.token.total_supply(), shares(100));
    assert_eq!(d.pool.amount_to_delegate(), cspr(100));
    assert_eq!(d.pool.pooled_value(), cspr(100));
    assert_eq!(d.pool.to_base(shares(1)), cspr(1));
    assert_eq!(d.pool.to_shares(cspr(1)), shares(1));
    assert_eq!(pool_balance(&d), cspr(100));
}

#[test]
#[should_panic(expected = "InvalidAmount")]
fn test_zero_deposit_rejected() {
    let mut d = deploy(false);
    let user = d.env.get_account(1);
    deposit(&mut d, user, U512::zero());
}

#[test]
fn test_share_price_never_decreases_across_deposits_and_compounds() {
    let mut d = deploy(false);
    let user1 = d.env.get_account(1);
    let user2 = d.env.get_account(2);
    let v1 = d.v1;
    let mut last_price = U512::zero();
    let mut check_price = |pool: &StakePoolHostRef| {
        let price = pool.to_base(shares(1));
        assert!(price >= last_price, "price dropped: {} < {}", price, last_price);
        last_price = price;
    };

    deposit(&mut d, user1, cspr(100));
    check_price(&d.pool);

    d.env.set_caller(d.owner);
    d.pool.delegate_to(v1, cspr(100));
    check_price(&d.pool);

    reward(&mut d, v1, cspr(7));
    d.pool.compound_rewards();
    check_price(&d.pool);

    deposit(&mut d, user2, cspr(33));
    check_price(&d.pool);

    reward(&mut d, v1, cspr(3));
    d.pool.compound_rewards();
    check_price(&d.pool);

    d.pool.set_fee_recipient(d.env.get_account(6));
    d.pool.claim_fee();
    check_price(&d.pool);

    assert!(last_price > cspr(1));
}

// ==========================================
// Delegation
// ==========================================

#[test]
fn test_delegate_to_moves_pending_into_delegated() {
    let mut d = deploy(false);
    let user = d.env.get_account(1);
    let (v1, owner) = (d.v1, d.owner);
    deposit(&mut d, user, cspr(100));

    d.env.set_caller(owner);
    d.pool.delegate_to(v1, cspr(60));

    assert_eq!(d.pool.amount_to_delegate(), cspr(40));
    assert_eq!(d.pool.total_delegated(), cspr(60));
    assert_eq!(d.pool.pooled_value(), cspr(100));
    assert_eq!(d.hub.pooled_value(v1, d.pool.address()), cspr(60));
    assert_eq!(d.pool.get_validator_info(v1).pooled_value, cspr(60));
    assert_eq!(pool_balance(&d), cspr(40));

    let stranger = d.env.get_account(3);
    assert_eq!(
        d.pool.try_delegate_to(stranger, cspr(10)),
        Err(PoolError::ValidatorInactive.into())
    );
    assert_eq!(
        d.pool.try_delegate_to(v1, U512::from(MOTES_PER_CSPR / 2)),
        Err(PoolError::BelowMinimumDelegation.into())
    );
    assert_eq!(
        d.pool.try_delegate_to(v1, cspr(50)),
        Err(PoolError::InvalidAmount.into())
    );

    d.env.set_caller(user);
    assert_eq!(
        d.pool.try_delegate_to(v1, cspr(10)),
        Err(PoolError::Unauthorized.into())
    );
}

#[test]
fn test_redelegate_moves_stake_between_validators() {
    let mut d = deploy(false);
    let user = d.env.get_account(1);
    let (v1, v2, owner) = (d.v1, d.v2, d.owner);
    deposit(&mut d, user, cspr(100));
    d.env.set_caller(owner);
    d.pool.delegate_to(v1, cspr(100));

    d.pool.redelegate(v1, v2, cspr(50));

    // 0.2% hub fee on the moved 50 CSPR
    assert_eq!(d.pool.get_validator_info(v1).pooled_value, cspr(50));
    assert_eq!(
        d.pool.get_validator_info(v2).pooled_value,
        U512::from(49_900_000_000u64)
    );
    assert_eq!(d.pool.total_delegated(), cspr(100));
    assert_eq!(d.pool.amount_to_delegate(), U512::zero());

    assert_eq!(
        d.pool.try_redelegate(v1, v1, cspr(10)),
        Err(PoolError::InvalidAmount.into())
    );
    assert_eq!(
        d.pool.try_redelegate(v1, d.env.get_account(3), cspr(10)),
        Err(PoolError::ValidatorInactive.into())
    );
    // 1 CSPR minus the fee lands under the hub minimum
    assert_eq!(
        d.pool.try_redelegate(v1, v2, cspr(1)),
        Err(PoolError::BelowMinimumDelegation.into())
    );

    d.pool.remove_validator(v2);
    assert_eq!(
        d.pool.try_redelegate(v1, v2, cspr(10)),
        Err(PoolError::ValidatorInactive.into())
    );

    d.env.set_caller(user);
    assert_eq!(
        d.pool.try_redelegate(v2, v1, cspr(10)),
        Err(PoolError::Unauthorized.into())
    );
}

#[test]
fn test_validator_rate_is_independent_of_pool_price() {
    let mut d = deploy(false);
    let user = d.env.get_account(1);
    let (v1, v2, owner) = (d.v1, d.v2, d.owner);
    deposit(&mut d, user, cspr(100));
    d.env.set_caller(owner);
    d.pool.delegate_to(v1, cspr(100));

    reward(&mut d, v1, cspr(10));

    // validator: 110 CSPR behind 100 bonding shares
    assert_eq!(d.pool.to_validator_shares(v1, cspr(11)), cspr(10));
    assert_eq!(d.pool.to_validator_base(v1, cspr(10)), cspr(11));
    // empty validator stays 1:1
    assert_eq!(d.pool.to_validator_shares(v2, cspr(5)), cspr(5));
    // pool price only moves once rewards are compounded
    assert_eq!(d.pool.to_base(shares(1)), cspr(1));
}

#[test]
fn test_validator_registry() {
    let mut d = deploy(false);
    let (v1, v2, owner) = (d.v1, d.v2, d.owner);

    d.env.set_caller(owner);
    d.pool.add_validator(v1);
    assert_eq!(d.pool.validators(), vec![v1, v2]);

    d.pool.remove_validator(v2);
    assert!(!d.pool.is_validator(v2));
    // still listed so residual stake keeps being compounded
    assert_eq!(d.pool.validators(), vec![v1, v2]);
    assert_eq!(
        d.pool.try_remove_validator(v2),
        Err(PoolError::ValidatorInactive.into())
    );

    d.pool.add_validator(v2);
    assert!(d.pool.is_validator(v2));
    assert_eq!(d.pool.validators().len(), 2);

    d.env.set_caller(d.env.get_account(1));
    assert_eq!(
        d.pool.try_add_validator(d.env.get_account(3)),
        Err(PoolError::Unauthorized.into())
    );
}

// ==========================================
// Rewards and fees
// ==========================================

#[test]
fn test_compound_rewards_accrues_fee() {
    let mut d = deploy(false);
    let user = d.env.get_account(1);
    let (v1, owner) = (d.v1, d.owner);
    deposit(&mut d, user, cspr(100));
    d.env.set_caller(owner);
    d.pool.delegate_to(v1, cspr(100));
    let price_before = d.pool.to_base(shares(1));

    reward(&mut d, v1, cspr(10));
    d.pool.compound_rewards();

    assert_eq!(d.pool.total_fee(), cspr(1));
    assert_eq!(d.pool.total_delegated(), cspr(109));
    assert_eq!(d.pool.to_base(shares(1)), U512::from(1_090_000_000u64));
    assert!(d.pool.to_base(shares(1)) > price_before);

    assert_eq!(d.pool.try_compound_rewards(), Err(PoolError::NoNewProfit.into()));
}

#[test]
fn test_claim_fee_mints_at_pre_claim_price() {
    let mut d = deploy(false);
    let user = d.env.get_account(1);
    let recipient = d.env.get_account(6);
    let (v1, owner) = (d.v1, d.owner);
    deposit(&mut d, user, cspr(100));
    d.env.set_caller(owner);
    d.pool.delegate_to(v1, cspr(100));
    reward(&mut d, v1, cspr(10));
    d.pool.compound_rewards();

    assert_eq!(d.pool.try_claim_fee(), Err(PoolError::ZeroAddress.into()));

    d.pool.set_fee_recipient(recipient);
    let price_before = d.pool.to_base(shares(1));
    d.pool.claim_fee();

    // 1 CSPR at 1.09 CSPR per share
    assert_eq!(d.token.balance_of(recipient), U256::from(917_431_192u64));
    assert_eq!(d.pool.total_fee(), U512::zero());
    assert_eq!(d.pool.total_delegated(), cspr(110));
    assert!(d.pool.to_base(shares(1)) >= price_before);

    assert_eq!(d.pool.try_claim_fee(), Err(PoolError::NothingToClaim.into()));
}

#[test]
fn test_fee_rate_bounds() {
    let mut d = deploy(false);
    d.env.set_caller(d.owner);

    assert_eq!(
        d.pool.try_set_fee_rate(10_001),
        Err(PoolError::FeeRateOutOfRange.into())
    );
    d.pool.set_fee_rate(500);
    assert_eq!(d.pool.fee_rate_bps(), 500);
    d.pool.set_fee_rate(10_000);
    assert_eq!(d.pool.fee_rate_bps(), 10_000);
}

// ==========================================
// Withdrawal queue
// ==========================================

#[test]
#[should_panic(expected = "InvalidAmount")]
fn test_request_withdraw_zero_rejected() {
    let mut d = deploy(false);
    let user = d.env.get_account(1);
    deposit(&mut d, user, cspr(10));
    request_withdraw(&mut d, user, U256::zero());
}

#[test]
fn test_fifo_settlement_and_claim() {
    let mut d = deploy(false);
    let user1 = d.env.get_account(1);
    let user2 = d.env.get_account(2);
    let (v1, owner) = (d.v1, d.owner);
    deposit(&mut d, user1, cspr(50));
    deposit(&mut d, user2, cspr(60));
    d.env.set_caller(owner);
    d.pool.delegate_to(v1, cspr(110));

    request_withdraw(&mut d, user1, shares(50));
    request_withdraw(&mut d, user2, shares(60));

    assert_eq!(d.pool.queue_entry(1).map(|e| e.base_amount), Some(cspr(50)));
    assert_eq!(d.pool.queue_entry(2).map(|e| e.base_amount), Some(cspr(60)));
    assert_eq!(d.token.balance_of(d.pool.address()), shares(110));
    assert_eq!(d.pool.amount_to_undelegate(), cspr(110));

    d.env.set_caller(owner);
    d.pool.undelegate_from(v1, cspr(50));
    assert_eq!(d.pool.unbonding(), cspr(50));
    assert_eq!(d.pool.amount_to_undelegate(), cspr(60));

    wait_for_unbonding(&d);
    let (cursor, received) = d.pool.claim_undelegated(v1);

    assert_eq!(cursor, 2);
    assert_eq!(received, cspr(50));
    assert_eq!(d.pool.settled_cursor(), 2);
    assert_eq!(d.pool.undelegated_quota(), U512::zero());
    assert_eq!(d.pool.unbonding(), U512::zero());
    assert_eq!(d.pool.total_delegated(), cspr(60));
    assert_eq!(d.token.total_supply(), shares(60));
    assert_eq!(pool_balance(&d), cspr(50));

    // id 2 is still pending
    d.env.set_caller(user2);
    assert_eq!(
        d.pool.try_claim_withdraw(0),
        Err(PoolError::OutOfOrderClaim.into())
    );

    d.env.set_caller(user1);
    d.pool.claim_withdraw(0);
    assert_eq!(pool_balance(&d), U512::zero());
    assert!(d.pool.get_user_withdrawal_requests(user1).is_empty());
    assert_eq!(
        d.pool.try_claim_withdraw(0),
        Err(PoolError::IndexOutOfRange.into())
    );
}

#[test]
fn test_settlement_stops_at_first_uncovered_entry() {
    let mut d = deploy(false);
    let user1 = d.env.get_account(1);
    let user2 = d.env.get_account(2);
    let user3 = d.env.get_account(3);
    let (v1, owner) = (d.v1, d.owner);
    deposit(&mut d, user1, cspr(50));
    deposit(&mut d, user2, cspr(60));
    deposit(&mut d, user3, cspr(10));
    d.env.set_caller(owner);
    d.pool.delegate_to(v1, cspr(120));

    request_withdraw(&mut d, user1, shares(50));
    request_withdraw(&mut d, user2, shares(60));
    request_withdraw(&mut d, user3, shares(10));

    d.env.set_caller(owner);
    d.pool.undelegate_from(v1, cspr(70));
    wait_for_unbonding(&d);
    let (cursor, received) = d.pool.claim_undelegated(v1);

    // 20 left over would cover id 3, but id 2 comes first
    assert_eq!((cursor, received), (2, cspr(70)));
    assert_eq!(d.pool.undelegated_quota(), cspr(20));
    let status = d.pool.get_user_request_status(user3, 0);
    assert_eq!(status.id, 3);
    assert!(!status.claimable);
    assert_eq!(status.amount, cspr(10));
    assert_eq!(d.pool.amount_to_undelegate(), cspr(50));

    d.pool.undelegate_from(v1, cspr(50));
    wait_for_unbonding(&d);
    let (cursor, received) = d.pool.claim_undelegated(v1);

    assert_eq!((cursor, received), (4, cspr(50)));
    assert_eq!(d.pool.undelegated_quota(), U512::zero());
    assert_eq!(d.pool.total_delegated(), U512::zero());
    assert_eq!(d.token.total_supply(), U256::zero());

    let status = d.pool.get_user_request_status(user3, 0);
    assert!(status.claimable);
    assert_eq!(status.amount, cspr(10));

    d.env.set_caller(user3);
    d.pool.claim_withdraw(0);
    d.env.set_caller(user2);
    d.pool.claim_withdraw(0);
    assert_eq!(pool_balance(&d), cspr(50));
}

#[test]
fn test_claim_undelegated_requires_released_funds() {
    let mut d = deploy(false);
    let user = d.env.get_account(1);
    let (v1, owner) = (d.v1, d.owner);
    deposit(&mut d, user, cspr(20));
    d.env.set_caller(owner);
    d.pool.delegate_to(v1, cspr(20));
    request_withdraw(&mut d, user, shares(5));

    d.env.set_caller(owner);
    d.pool.undelegate_from(v1, cspr(5));
    // still unbonding
    assert_eq!(
        d.pool.try_claim_undelegated(v1),
        Err(PoolError::NothingToClaim.into())
    );
    assert_eq!(d.pool.claimable_unbond_count(v1), 0);

    wait_for_unbonding(&d);
    assert_eq!(d.pool.claimable_unbond_count(v1), 1);
    assert_eq!(d.pool.claim_undelegated(v1), (2, cspr(5)));
}

#[test]
fn test_unbonding_drift_is_floored() {
    let mut d = deploy(false);
    let user = d.env.get_account(1);
    let (v1, owner) = (d.v1, d.owner);
    deposit(&mut d, user, cspr(100));
    d.env.set_caller(owner);
    d.pool.delegate_to(v1, cspr(100));
    request_withdraw(&mut d, user, shares(50));

    d.env.set_caller(owner);
    d.pool.undelegate_from(v1, cspr(50));
    // network exits the validator: the rest of the stake unbonds unrequested
    d.hub.force_unbond(v1, d.pool.address());

    wait_for_unbonding(&d);
    let (cursor, received) = d.pool.claim_undelegated(v1);

    assert_eq!((cursor, received), (2, cspr(100)));
    assert_eq!(d.pool.unbonding(), U512::zero());
    assert_eq!(d.pool.undelegated_quota(), cspr(50));
    assert_eq!(d.pool.total_delegated(), cspr(50));
    assert_eq!(d.pool.amount_to_undelegate(), U512::zero());
    // the unassigned 50 still backs the remaining shares
    assert_eq!(d.pool.to_base(shares(50)), cspr(50));
    assert_eq!(d.pool.try_compound_rewards(), Err(PoolError::NoNewProfit.into()));
}

// ==========================================
// Legacy bridge
// ==========================================

#[test]
fn test_legacy_bridge_drains_before_queue() {
    let mut d = deploy(true);
    let legacy = d.legacy;
    let user1 = d.env.get_account(1);
    let user2 = d.env.get_account(2);
    let owner = d.owner;

    assert!(d.pool.is_validator(legacy));
    assert_eq!(d.pool.validators(), vec![legacy, d.v1, d.v2]);

    deposit(&mut d, user1, cspr(40));
    deposit(&mut d, user2, cspr(10));
    d.env.set_caller(owner);
    d.pool.delegate_to(legacy, cspr(50));

    // pre-upgrade requests: user1 30, user2 10
    d.env.set_caller(user1);
    d.token.approve(d.pool.address(), shares(30));
    d.env.set_caller(user2);
    d.token.approve(d.pool.address(), shares(10));
    d.env.set_caller(owner);
    d.pool.import_legacy_request(user1, shares(30), 1_000);
    d.pool.import_legacy_request(user2, shares(10), 2_000);

    assert_eq!(d.pool.legacy_round_id(), Some(1));
    assert_eq!(d.pool.next_request_id(), 2);
    assert_eq!(d.pool.legacy_pending_shares(), shares(40));
    assert_eq!(d.token.balance_of(d.pool.address()), shares(40));

    request_withdraw(&mut d, user1, shares(10));
    assert_eq!(d.pool.queue_entry(2).map(|e| e.base_amount), Some(cspr(10)));

    d.env.set_caller(owner);
    assert_eq!(
        d.pool.try_import_legacy_request(user2, shares(1), 3_000),
        Err(PoolError::StaleLegacyState.into())
    );
    assert_eq!(
        d.pool.try_undelegate_from(legacy, cspr(10)),
        Err(PoolError::StaleLegacyState.into())
    );
    assert_eq!(
        d.pool.try_claim_undelegated(legacy),
        Err(PoolError::StaleLegacyState.into())
    );

    d.pool.undelegate_legacy();

    let batch = d.pool.legacy_batch(1).unwrap();
    assert_eq!(batch.id, 1);
    assert_eq!(batch.settled_at, None);
    assert_eq!(batch.base_amount, cspr(40));
    assert_eq!(batch.shares_burned, shares(40));
    assert_eq!(d.pool.legacy_pending_shares(), U256::zero());
    assert_eq!(d.pool.unbonding(), cspr(40));
    assert_eq!(
        d.pool.try_undelegate_legacy(),
        Err(PoolError::NothingToClaim.into())
    );
    assert!(!d.pool.get_user_request_status(user1, 0).claimable);

    wait_for_unbonding(&d);
    let (cursor, received) = d.pool.claim_undelegated(legacy);

    assert_eq!((cursor, received), (2, cspr(40)));
    assert!(d.pool.legacy_batch(1).unwrap().settled_at.is_some());
    assert_eq!(d.pool.total_delegated(), cspr(10));
    assert_eq!(d.token.total_supply(), shares(10));

    // pro rata: 40 * 10 / 40
    d.env.set_caller(user2);
    d.pool.claim_withdraw(0);
    assert_eq!(pool_balance(&d), cspr(30));

    // user1 holds [legacy id 1, queue id 2]; id 2 is not settled yet
    d.env.set_caller(user1);
    assert_eq!(
        d.pool.try_claim_withdraw(1),
        Err(PoolError::OutOfOrderClaim.into())
    );
    d.pool.claim_withdraw(0);
    assert_eq!(pool_balance(&d), U512::zero());

    d.env.set_caller(owner);
    assert_eq!(d.pool.amount_to_undelegate(), cspr(10));
    d.pool.undelegate_from(legacy, cspr(10));
    wait_for_unbonding(&d);
    assert_eq!(d.pool.claim_undelegated(legacy), (3, cspr(10)));

    d.env.set_caller(user1);
    d.pool.claim_withdraw(0);
    assert_eq!(pool_balance(&d), U512::zero());
    assert_eq!(d.token.total_supply(), U256::zero());
    assert_eq!(d.pool.total_delegated(), U512::zero());
}

#[test]
fn test_legacy_import_requires_legacy_validator() {
    let mut d = deploy(false);
    let user = d.env.get_account(1);
    deposit(&mut d, user, cspr(10));

    d.env.set_caller(d.owner);
    assert_eq!(
        d.pool.try_import_legacy_request(user, shares(5), 0),
        Err(PoolError::ZeroAddress.into())
    );
    assert_eq!(
        d.pool.try_undelegate_legacy(),
        Err(PoolError::NothingToClaim.into())
    );
}

#[test]
fn test_legacy_batch_books_hub_rounded_amount() {
    let mut d = deploy(true);
    let legacy = d.legacy;
    let user = d.env.get_account(1);
    let owner = d.owner;

    deposit(&mut d, user, cspr(100));
    d.env.set_caller(owner);
    d.pool.delegate_to(legacy, cspr(100));
    // validator rate 1.1, pool price 1.09
    reward(&mut d, legacy, cspr(10));
    d.pool.compound_rewards();

    d.env.set_caller(user);
    d.token.approve(d.pool.address(), shares(40));
    d.env.set_caller(owner);
    d.pool.import_legacy_request(user, shares(40), 1_000);
    assert_eq!(d.pool.to_base(shares(40)), U512::from(43_600_000_000u64));

    // 43.6 CSPR is 39_636_363_636 validator shares, worth 43_599_999_999 motes
    d.pool.undelegate_legacy();
    let owed = U512::from(43_599_999_999u64);
    assert_eq!(d.pool.legacy_batch(1).unwrap().base_amount, owed);
    assert_eq!(d.pool.unbonding(), owed);

    wait_for_unbonding(&d);
    assert_eq!(d.pool.claim_undelegated(legacy), (2, owed));
    assert!(d.pool.legacy_batch(1).unwrap().settled_at.is_some());
    assert_eq!(d.pool.unbonding(), U512::zero());
    assert_eq!(d.pool.undelegated_quota(), U512::zero());
    assert_eq!(d.pool.total_delegated(), U512::from(65_400_000_001u64));
    assert_eq!(d.token.total_supply(), shares(60));

    d.env.set_caller(user);
    assert!(d.pool.get_user_request_status(user, 0).claimable);
    d.pool.claim_withdraw(0);
    assert_eq!(pool_balance(&d), U512::zero());
}

#[test]
fn test_uncovered_legacy_batch_blocks_queue() {
    let mut d = deploy(true);
    let legacy = d.legacy;
    let v1 = d.v1;
    let user1 = d.env.get_account(1);
    let user2 = d.env.get_account(2);
    let owner = d.owner;

    deposit(&mut d, user1, cspr(40));
    deposit(&mut d, user2, cspr(10));
    d.env.set_caller(owner);
    d.pool.delegate_to(legacy, cspr(40));
    d.pool.delegate_to(v1, cspr(10));

    d.env.set_caller(user1);
    d.token.approve(d.pool.address(), shares(30));
    d.env.set_caller(owner);
    d.pool.import_legacy_request(user1, shares(30), 1_000);
    request_withdraw(&mut d, user2, shares(5));
    assert_eq!(d.pool.queue_entry(2).map(|e| e.base_amount), Some(cspr(5)));

    d.env.set_caller(owner);
    d.pool.undelegate_legacy();
    assert_eq!(d.pool.unbonding(), cspr(30));
    // queue demand is hidden behind the legacy unbond
    assert_eq!(d.pool.amount_to_undelegate(), U512::zero());
    d.pool.set_reserve_amount(cspr(5));
    d.pool.undelegate_from(v1, cspr(5));
    wait_for_unbonding(&d);

    // 5 released: not enough for the 30 CSPR batch, entry 2 must wait too
    assert_eq!(d.pool.claim_undelegated(v1), (1, cspr(5)));
    assert_eq!(d.pool.settled_cursor(), 1);
    assert_eq!(d.pool.legacy_batch(1).unwrap().settled_at, None);
    assert_eq!(d.pool.undelegated_quota(), cspr(5));
    assert_eq!(d.pool.unbonding(), cspr(30));
    assert_eq!(d.pool.total_delegated(), cspr(50));
    assert_eq!(d.token.total_supply(), shares(50));
    assert!(!d.pool.get_user_request_status(user1, 0).claimable);
    assert!(!d.pool.get_user_request_status(user2, 0).claimable);

    // the batch settles first, then the queue entry in the same call
    assert_eq!(d.pool.claim_undelegated(legacy), (3, cspr(30)));
    assert!(d.pool.legacy_batch(1).unwrap().settled_at.is_some());
    assert_eq!(d.pool.undelegated_quota(), U512::zero());
    assert_eq!(d.pool.unbonding(), U512::zero());
    assert_eq!(d.pool.total_delegated(), cspr(15));
    assert_eq!(d.token.total_supply(), shares(15));
    assert_eq!(pool_balance(&d), cspr(35));

    d.env.set_caller(user1);
    d.pool.claim_withdraw(0);
    d.env.set_caller(user2);
    d.pool.claim_withdraw(0);
    assert_eq!(pool_balance(&d), U512::zero());
    assert_eq!(d.pool.amount_to_undelegate(), U512::zero());
}

#[test]
fn test_legacy_batch_anchored_without_queue() {
    let mut d = deploy(true);
    let legacy = d.legacy;
    let user1 = d.env.get_account(1);
    let user2 = d.env.get_account(2);
    let owner = d.owner;

    deposit(&mut d, user1, cspr(20));
    d.env.set_caller(owner);
    d.pool.delegate_to(legacy, cspr(20));
    d.env.set_caller(user1);
    d.token.approve(d.pool.address(), shares(20));
    d.env.set_caller(owner);
    d.pool.import_legacy_request(user1, shares(20), 1_000);
    assert_eq!(d.pool.next_request_id(), 2);

    // no queue entry yet: the batch takes the reserved round id
    d.pool.undelegate_legacy();
    assert_eq!(d.pool.legacy_batch(1).map(|batch| batch.id), Some(1));
    assert!(d.pool.legacy_batch(2).is_none());

    deposit(&mut d, user2, cspr(10));
    request_withdraw(&mut d, user2, shares(10));
    assert_eq!(d.pool.queue_entry(2).map(|e| e.base_amount), Some(cspr(10)));

    d.env.set_caller(owner);
    wait_for_unbonding(&d);
    assert_eq!(d.pool.claim_undelegated(legacy), (2, cspr(20)));
    assert!(d.pool.legacy_batch(1).unwrap().settled_at.is_some());
    assert_eq!(d.pool.total_delegated(), U512::zero());
    assert_eq!(d.pool.amount_to_undelegate(), cspr(10));

    d.env.set_caller(user1);
    d.pool.claim_withdraw(0);
    assert_eq!(pool_balance(&d), cspr(10));
    d.env.set_caller(user2);
    assert_eq!(
        d.pool.try_claim_withdraw(0),
        Err(PoolError::OutOfOrderClaim.into())
    );
}

// ==========================================
// Reserve
// ==========================================

#[test]
fn test_reserve_widens_undelegation_allowance() {
    let mut d = deploy(false);
    let user = d.env.get_account(1);
    let custodian = d.env.get_account(5);
    let (v1, owner) = (d.v1, d.owner);
    deposit(&mut d, user, cspr(100));
    d.env.set_caller(owner);
    d.pool.delegate_to(v1, cspr(100));
    d.pool.set_reserve_custodian(custodian);

    d.env.set_caller(custodian);
    d.pool.with_tokens(cspr(20)).deposit_reserve();
    assert_eq!(d.pool.total_reserve_amount(), cspr(20));
    assert_eq!(
        d.pool.try_withdraw_reserve(cspr(30)),
        Err(PoolError::InsufficientReserve.into())
    );
    d.pool.withdraw_reserve(cspr(5));
    assert_eq!(d.pool.total_reserve_amount(), cspr(15));
    assert_eq!(pool_balance(&d), cspr(15));

    d.env.set_caller(user);
    assert_eq!(
        d.pool.try_withdraw_reserve(cspr(1)),
        Err(PoolError::Unauthorized.into())
    );

    // no queue demand: only the reserve target allows undelegating
    d.env.set_caller(owner);
    assert_eq!(
        d.pool.try_undelegate_from(v1, cspr(10)),
        Err(PoolError::InsufficientReserve.into())
    );
    d.pool.set_reserve_amount(cspr(10));
    d.pool.undelegate_from(v1, cspr(10));
    assert_eq!(d.pool.unbonding(), cspr(10));

    // in: 100 deposit + 20 reserve, out: 5 reserve
    let accounted = d.pool.amount_to_delegate()
        + d.pool.total_delegated()
        + d.pool.total_reserve_amount();
    assert_eq!(accounted, cspr(115));
}

#[test]
fn test_admin_roles() {
    let mut d = deploy(false);
    let bot = d.env.get_account(4);
    let new_admin = d.env.get_account(5);
    let user = d.env.get_account(1);
    let v1 = d.v1;
    deposit(&mut d, user, cspr(10));

    d.env.set_caller(d.owner);
    d.pool.set_bot(bot, true);
    assert!(d.pool.is_bot(bot));

    d.env.set_caller(bot);
    d.pool.delegate_to(v1, cspr(5));
    assert_eq!(d.pool.total_delegated(), cspr(5));
    assert_eq!(
        d.pool.try_set_fee_rate(100),
        Err(PoolError::Unauthorized.into())
    );

    d.env.set_caller(d.owner);
    d.pool.transfer_admin(new_admin);
    assert_eq!(d.pool.admin(), Some(new_admin));
    assert_eq!(
        d.pool.try_set_bot(bot, false),
        Err(PoolError::Unauthorized.into())
    );

    d.env.set_caller(new_admin);
    d.pool.set_bot(bot, false);
    d.env.set_caller(bot);
    assert_eq!(
        d.pool.try_delegate_to(v1, cspr(5)),
        Err(PoolError::Unauthorized.into())
    );
}
