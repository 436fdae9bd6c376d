//! Livenet deploy and operations binary for the stake pool.
//!
//! Run with:
//! - Deploy only:           STAKE_POOL_LIVENET_MODE=deploy cargo run --bin stake_pool_livenet --features=livenet
//! - Deploy + demo:         STAKE_POOL_LIVENET_MODE=deploy_and_demo cargo run --bin stake_pool_livenet --features=livenet
//! - Demo on existing:      STAKE_POOL_LIVENET_MODE=demo STAKE_POOL_EXISTING_POOL=... STAKE_POOL_EXISTING_TOKEN=... cargo run ...
//! - Bot settlement pass:   STAKE_POOL_LIVENET_MODE=settle STAKE_POOL_EXISTING_POOL=... STAKE_POOL_EXISTING_TOKEN=... cargo run ...
//! - Query state as JSON:   STAKE_POOL_LIVENET_MODE=query STAKE_POOL_EXISTING_POOL=... STAKE_POOL_EXISTING_TOKEN=... cargo run ...
//!
//! Required environment variables (Odra livenet):
//! - ODRA_CASPER_LIVENET_SECRET_KEY_PATH
//! - ODRA_CASPER_LIVENET_NODE_ADDRESS        (base URL; Odra appends "/rpc")
//! - ODRA_CASPER_LIVENET_EVENTS_URL          (required by Odra; placeholder URL is OK here)
//! - ODRA_CASPER_LIVENET_CHAIN_NAME
//!
//! Optional:
//! - ODRA_CASPER_LIVENET_DEPLOY_GAS_TOKEN    (motes)
//! - ODRA_CASPER_LIVENET_DEPLOY_GAS_HUB      (motes)
//! - ODRA_CASPER_LIVENET_DEPLOY_GAS_POOL     (motes)
//! - ODRA_CASPER_LIVENET_CALL_GAS            (motes)
//! - ODRA_CASPER_LIVENET_GAS                 (fallback for token deploy; motes)
//! - STAKE_POOL_EXISTING_TOKEN               (64-hex or formatted "hash-..."/"contract-package-...")
//! - STAKE_POOL_EXISTING_HUB                 (stake hub to use; a MockStakeHub is deployed when unset)
//! - STAKE_POOL_EXISTING_POOL
//! - STAKE_POOL_VALIDATORS                   (comma separated "account-hash-..." addresses; default: caller)
//! - STAKE_POOL_FEE_RATE_BPS                 (default: 1000)
//! - STAKE_POOL_MOCK_MIN_DELEGATION_CSPR     (default: 1)
//! - STAKE_POOL_MOCK_UNBOND_PERIOD_MS        (default: 3600000)
//! - STAKE_POOL_DEMO_DEPOSIT_CSPR            (default: 100)
//! - STAKE_POOL_DEMO_WITHDRAW_BPS            (share of the deposit to queue for withdrawal; default: 5000)

use odra::host::{Deployer, HostRef, HostRefLoader};
use odra::prelude::*;
use odra::casper_types::{U256, U512};

use stake_pool_casper::mock_stake_hub::{MockStakeHub, MockStakeHubInitArgs};
use stake_pool_casper::pool::{StakePool, StakePoolHostRef, StakePoolInitArgs};
use stake_pool_casper::tokens::{PoolShareToken, PoolShareTokenHostRef, PoolShareTokenInitArgs};

const MOTES_PER_CSPR: u64 = 1_000_000_000;

const DEFAULT_DEPLOY_GAS_TOKEN_MOTES: u64 = 450_000_000_000; // 450 CSPR
const DEFAULT_DEPLOY_GAS_HUB_MOTES: u64 = 450_000_000_000; // 450 CSPR
const DEFAULT_DEPLOY_GAS_POOL_MOTES: u64 = 700_000_000_000; // 700 CSPR
const DEFAULT_CALL_GAS_MOTES: u64 = 50_000_000_000; // 50 CSPR

const DEFAULT_FEE_RATE_BPS: u64 = 1_000;
const DEFAULT_MOCK_UNBOND_PERIOD_MS: u64 = 3_600_000;

fn main() {
    println!("============================================");
    println!("  Pooled Staked CSPR - Livenet");
    println!("============================================\n");

    let env = odra_casper_livenet_env::env();

    let mode = std::env::var("STAKE_POOL_LIVENET_MODE").unwrap_or_else(|_| "deploy".to_string());
    let should_deploy = mode == "deploy" || mode == "deploy_and_demo";
    let should_demo = mode == "demo" || mode == "deploy_and_demo";
    let should_settle = mode == "settle";
    let should_query = mode == "query";

    let gas_fallback = read_u64_env("ODRA_CASPER_LIVENET_GAS", DEFAULT_DEPLOY_GAS_TOKEN_MOTES);
    let deploy_gas_token = read_u64_env("ODRA_CASPER_LIVENET_DEPLOY_GAS_TOKEN", gas_fallback);
    let deploy_gas_hub = read_u64_env("ODRA_CASPER_LIVENET_DEPLOY_GAS_HUB", DEFAULT_DEPLOY_GAS_HUB_MOTES);
    let deploy_gas_pool = read_u64_env("ODRA_CASPER_LIVENET_DEPLOY_GAS_POOL", DEFAULT_DEPLOY_GAS_POOL_MOTES);
    let call_gas = read_u64_env("ODRA_CASPER_LIVENET_CALL_GAS", DEFAULT_CALL_GAS_MOTES);

    let fee_rate_bps = read_u64_env("STAKE_POOL_FEE_RATE_BPS", DEFAULT_FEE_RATE_BPS);
    let min_delegation_cspr = read_u64_env("STAKE_POOL_MOCK_MIN_DELEGATION_CSPR", 1);
    let unbond_period_ms = read_u64_env("STAKE_POOL_MOCK_UNBOND_PERIOD_MS", DEFAULT_MOCK_UNBOND_PERIOD_MS);
    let deposit_cspr = read_u64_env("STAKE_POOL_DEMO_DEPOSIT_CSPR", 100);
    let withdraw_bps = read_u64_env("STAKE_POOL_DEMO_WITHDRAW_BPS", 5_000).min(10_000);

    let validators: Vec<Address> = match std::env::var("STAKE_POOL_VALIDATORS") {
        Ok(raw) if !raw.trim().is_empty() => raw.split(',').map(parse_address).collect(),
        _ => vec![env.caller()],
    };

    println!("[INFO] Mode: {}", mode);
    println!("[INFO] Caller: {:?}", env.caller());
    println!(
        "[INFO] Gas (motes): deploy_token={} ({} CSPR), deploy_hub={} ({} CSPR), deploy_pool={} ({} CSPR), calls={} ({} CSPR)",
        deploy_gas_token,
        deploy_gas_token / MOTES_PER_CSPR,
        deploy_gas_hub,
        deploy_gas_hub / MOTES_PER_CSPR,
        deploy_gas_pool,
        deploy_gas_pool / MOTES_PER_CSPR,
        call_gas,
        call_gas / MOTES_PER_CSPR,
    );
    println!("[INFO] Validators: {:?}", validators);
    println!(
        "[INFO] Demo params: deposit={} CSPR, withdraw={} bps",
        deposit_cspr, withdraw_bps
    );
    println!();

    // ==========================================
    // Step 1: Deploy (or reuse) psCSPR
    // ==========================================
    let token = if should_deploy {
        println!("[STEP 1] Deploying psCSPR token...");
        env.set_gas(deploy_gas_token);
        let token = PoolShareToken::deploy(&env, PoolShareTokenInitArgs { minter: env.caller() });
        println!("[OK] psCSPR deployed at: {:?}", token.address());
        println!("     Name: {}", token.name());
        println!("     Symbol: {}", token.symbol());
        println!();
        token
    } else {
        println!("[STEP 1] Reusing existing psCSPR token...");
        let addr = existing_address("STAKE_POOL_EXISTING_TOKEN", &mode);
        println!("[OK] psCSPR: {:?}", addr);
        println!();
        PoolShareToken::load(&env, addr)
    };
    let token_addr = token.address();

    // ==========================================
    // Step 2: Stake hub (existing, or a fresh MockStakeHub)
    // ==========================================
    let hub_addr = match std::env::var("STAKE_POOL_EXISTING_HUB") {
        Ok(raw) if !raw.trim().is_empty() => {
            let addr = parse_address(&raw);
            println!("[STEP 2] Using existing stake hub: {:?}", addr);
            Some(addr)
        }
        _ if should_deploy => {
            println!("[STEP 2] Deploying MockStakeHub...");
            env.set_gas(deploy_gas_hub);
            let hub = MockStakeHub::deploy(
                &env,
                MockStakeHubInitArgs {
                    min_delegation: U512::from(min_delegation_cspr) * U512::from(MOTES_PER_CSPR),
                    unbond_period: unbond_period_ms,
                    redelegate_fee_rate: 0,
                },
            );
            println!("[OK] MockStakeHub deployed at: {:?}", hub.address());
            Some(hub.address())
        }
        _ => {
            println!("[STEP 2] Stake hub will be read from the pool contract.");
            None
        }
    };
    println!();

    // ==========================================
    // Step 3: Deploy (or reuse) StakePool
    // ==========================================
    let pool = if should_deploy {
        println!("[STEP 3] Deploying StakePool...");
        env.set_gas(deploy_gas_pool);
        let pool = StakePool::deploy(
            &env,
            StakePoolInitArgs {
                share_token: token_addr,
                stake_hub: hub_addr.unwrap_or_else(|| panic!("stake hub address missing")),
                fee_rate_bps,
                legacy_validator: None,
            },
        );
        println!("[OK] StakePool deployed at: {:?}", pool.address());
        println!("     Fee rate: {} bps", pool.fee_rate_bps());
        println!();
        pool
    } else {
        println!("[STEP 3] Reusing existing StakePool...");
        let addr = existing_address("STAKE_POOL_EXISTING_POOL", &mode);
        println!("[OK] StakePool: {:?}", addr);
        println!();
        StakePool::load(&env, addr)
    };
    let pool_addr = pool.address();
    let hub_addr = pool
        .stake_hub_address()
        .or(hub_addr)
        .unwrap_or_else(|| panic!("stake hub address unknown for pool {:?}", pool_addr));

    // ==========================================
    // Step 4: Wire roles (minter, validators, fee recipient)
    // ==========================================
    let mut token = token;
    let mut pool = pool;
    if should_deploy {
        println!("[STEP 4] Handing psCSPR minter to the pool...");
        env.set_gas(call_gas);
        if token.minter() == Some(pool_addr) {
            println!("[OK] Minter already set.");
        } else {
            token.set_minter(pool_addr);
            println!("[OK] psCSPR minter: {:?}", token.minter());
        }

        println!("[STEP 5] Registering validators and fee recipient...");
        for validator in &validators {
            if !pool.is_validator(*validator) {
                env.set_gas(call_gas);
                pool.add_validator(*validator);
            }
            println!("     + {:?}", validator);
        }
        env.set_gas(call_gas);
        pool.set_fee_recipient(env.caller());
        println!("[OK] Fee recipient: {:?}", pool.fee_recipient());
        println!();
    }

    // ==========================================
    // Demo: deposit -> delegate -> request_withdraw -> undelegate
    // ==========================================
    if should_demo {
        let caller = env.caller();
        let validator = validators[0];
        let deposit_motes = U512::from(deposit_cspr) * U512::from(MOTES_PER_CSPR);

        println!("[DEMO 1] Depositing {} CSPR...", deposit_cspr);
        env.set_gas(call_gas);
        pool.with_tokens(deposit_motes).deposit();
        println!("[OK] Deposit complete.");
        print_pool_state(&pool, &token, caller);

        let pending = pool.amount_to_delegate();
        println!("[DEMO 2] Delegating {} motes to {:?}...", pending, validator);
        env.set_gas(call_gas);
        pool.delegate_to(validator, pending);
        println!("[OK] Delegated.");
        print_pool_state(&pool, &token, caller);

        let shares = token.balance_of(caller) * U256::from(withdraw_bps) / U256::from(10_000u64);
        if shares > U256::zero() {
            println!("[DEMO 3] Requesting withdrawal of {} psCSPR units...", shares);
            env.set_gas(call_gas);
            token.approve(pool_addr, shares);
            env.set_gas(call_gas);
            pool.request_withdraw(shares);
            println!("[OK] Withdraw requested.");

            let needed = pool.amount_to_undelegate();
            if needed > U512::zero() {
                println!("[DEMO 4] Undelegating {} motes from {:?}...", needed, validator);
                env.set_gas(call_gas);
                pool.undelegate_from(validator, needed);
                println!("[OK] Undelegation started.");
            }
            print_pool_state(&pool, &token, caller);
            println!("[INFO] Run with STAKE_POOL_LIVENET_MODE=settle once the unbonding period has passed.");
        } else {
            println!("[SKIP] Nothing to withdraw.");
        }
    }

    // ==========================================
    // Settle: claim matured unbonds, compound, pay the caller's claimable requests
    // ==========================================
    if should_settle {
        let caller = env.caller();
        for validator in pool.validators() {
            let matured = pool.claimable_unbond_count(validator);
            if matured == 0 {
                println!("[SKIP] {:?}: no matured unbonds.", validator);
                continue;
            }
            println!("[SETTLE] Claiming {} matured unbond(s) from {:?}...", matured, validator);
            env.set_gas(call_gas);
            match pool.try_claim_undelegated(validator) {
                Ok((cursor, received)) => {
                    println!("[OK] Received {} motes, settled cursor -> {}", received, cursor)
                }
                Err(err) => println!("[WARN] claim_undelegated failed: {:?}", err),
            }
        }

        println!("[SETTLE] Compounding rewards...");
        env.set_gas(call_gas);
        match pool.try_compound_rewards() {
            Ok(()) => println!("[OK] Rewards compounded. total_fee={}", pool.total_fee()),
            Err(err) => println!("[SKIP] compound_rewards: {:?}", err),
        }

        // swap_remove on claim: walk from the back so indices stay valid
        let requests = pool.get_user_withdrawal_requests(caller);
        for index in (0..requests.len() as u32).rev() {
            let status = pool.get_user_request_status(caller, index);
            if !status.claimable {
                println!("[PENDING] request #{} ({} motes)", status.id, status.amount);
                continue;
            }
            println!("[SETTLE] Claiming request #{} for {} motes...", status.id, status.amount);
            env.set_gas(call_gas);
            pool.claim_withdraw(index);
            println!("[OK] Claimed.");
        }
        print_pool_state(&pool, &token, caller);
    }

    // ==========================================
    // Query mode: Output pool state as JSON
    // ==========================================
    if should_query {
        let pool = StakePoolHostRef::new(pool_addr, env.clone());
        let query_user = env.caller();
        let one_share = U256::from(MOTES_PER_CSPR);

        println!("STAKE_POOL_STATE_JSON={{\"amount_to_delegate\":\"{}\",\"total_delegated\":\"{}\",\"total_reserve_amount\":\"{}\",\"unbonding\":\"{}\",\"undelegated_quota\":\"{}\",\"total_fee\":\"{}\",\"amount_to_undelegate\":\"{}\",\"settled_cursor\":{},\"next_request_id\":{},\"share_supply\":\"{}\",\"share_price_motes\":\"{}\",\"user_shares\":\"{}\",\"user\":\"{:?}\"}}",
            pool.amount_to_delegate(),
            pool.total_delegated(),
            pool.total_reserve_amount(),
            pool.unbonding(),
            pool.undelegated_quota(),
            pool.total_fee(),
            pool.amount_to_undelegate(),
            pool.settled_cursor(),
            pool.next_request_id(),
            token.total_supply(),
            pool.to_base(one_share),
            token.balance_of(query_user),
            query_user
        );
        return;
    }

    output_deploy_json(token_addr, hub_addr, pool_addr, fee_rate_bps);
}

fn print_pool_state(pool: &StakePoolHostRef, token: &PoolShareTokenHostRef, user: Address) {
    println!("     amount_to_delegate: {}", pool.amount_to_delegate());
    println!("     total_delegated: {}", pool.total_delegated());
    println!("     unbonding: {}", pool.unbonding());
    println!("     undelegated_quota: {}", pool.undelegated_quota());
    println!("     total_fee: {}", pool.total_fee());
    println!("     settled_cursor: {}", pool.settled_cursor());
    println!("     share supply: {}", token.total_supply());
    println!("     user psCSPR balance: {}", token.balance_of(user));
    println!();
}

fn read_u64_env(name: &str, default_value: u64) -> u64 {
    match std::env::var(name) {
        Ok(raw) => {
            let cleaned = raw.trim().replace('_', "");
            cleaned.parse::<u64>().unwrap_or(default_value)
        }
        Err(_) => default_value,
    }
}

fn existing_address(var: &str, mode: &str) -> Address {
    let raw = std::env::var(var)
        .unwrap_or_else(|_| panic!("{} must be set for mode={}", var, mode));
    parse_address(&raw)
}

fn output_deploy_json(token_addr: Address, hub_addr: Address, pool_addr: Address, fee_rate_bps: u64) {
    let chain_name =
        std::env::var("ODRA_CASPER_LIVENET_CHAIN_NAME").unwrap_or_else(|_| "casper-test".to_string());
    let node_url = std::env::var("ODRA_CASPER_LIVENET_NODE_ADDRESS")
        .unwrap_or_else(|_| "https://node.testnet.casper.network".to_string());

    println!(
        r#"STAKE_POOL_DEPLOY_JSON={{"chain_name":"{}","node_url":"{}","share_token_contract_hash":"{}","stake_hub_contract_hash":"{}","stake_pool_contract_hash":"{}","fee_rate_bps":{},"deployed_at":"{}"}}"#,
        chain_name,
        node_url,
        format_address_hash(&token_addr),
        format_address_hash(&hub_addr),
        format_address_hash(&pool_addr),
        fee_rate_bps,
        chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ")
    );
}

fn format_address_hash(addr: &Address) -> String {
    let debug_str = format!("{:?}", addr);
    let (Some(start), Some(end)) = (debug_str.find('['), debug_str.rfind(']')) else {
        return debug_str;
    };
    debug_str[start + 1..end]
        .split(", ")
        .filter_map(|part| part.strip_prefix("0x").or_else(|| part.strip_prefix("0X")))
        .collect()
}

/// Accepts "account-hash-", "contract-package-", "package-", "hash-" prefixes or
/// a bare 64-hex package hash.
fn parse_address(raw: &str) -> Address {
    use odra::casper_types::account::AccountHash;
    use odra::casper_types::contracts::ContractPackageHash;

    fn decode_hex_32(s: &str) -> [u8; 32] {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            panic!("Invalid address hash (expected 64 hex): {}", s);
        }
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .unwrap_or_else(|_| panic!("Invalid hex in address: {}", s));
        }
        out
    }

    let trimmed = raw.trim();
    if let Some(hex) = trimmed.strip_prefix("account-hash-") {
        return Address::Account(AccountHash::new(decode_hex_32(hex)));
    }
    let package_hex = ["contract-package-", "package-", "hash-"]
        .iter()
        .find_map(|prefix| trimmed.strip_prefix(prefix))
        .unwrap_or(trimmed);
    Address::Contract(ContractPackageHash::new(decode_hex_32(package_hex)))
}
