//! Pooled liquid staking for Casper (Odra)
//!
//! - psCSPR: pool share token, mintable only by the pool
//! - StakePool: deposits, multi-validator delegation, reward compounding and
//!   the FIFO withdrawal queue
//! - StakeHub: validator bonding backend interface, with MockStakeHub as the
//!   in-contract reference implementation

#![cfg_attr(target_arch = "wasm32", no_std)]

extern crate alloc;

pub mod math;
pub mod stake_hub;
pub mod mock_stake_hub;
pub mod tokens;
pub mod pool;
