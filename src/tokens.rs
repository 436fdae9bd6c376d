//! Pool share token (psCSPR)
//!
//! CEP-18 token whose supply is controlled by the stake pool. Holders own a
//! proportional claim on the pool's pooled value; only the minter (the pool
//! contract) can mint on deposit / fee realisation and burn on settlement.

use alloc::string::String;
use odra::casper_types::U256;
use odra::prelude::*;
use odra_modules::cep18::events::{
    Burn, DecreaseAllowance, IncreaseAllowance, Mint, SetAllowance, Transfer, TransferFrom,
};
use odra_modules::cep18_token::Cep18;

pub const SHARE_TOKEN_NAME: &str = "Pooled Staked CSPR";
pub const SHARE_TOKEN_SYMBOL: &str = "psCSPR";
/// Same precision as motes so the genesis 1:1 price reads naturally.
pub const SHARE_TOKEN_DECIMALS: u8 = 9;

pub mod events {
    use odra::prelude::*;

    #[odra::event]
    pub struct MinterSet {
        pub old_minter: Option<Address>,
        pub new_minter: Address,
    }
}

/// Errors for token operations (aligned with CEP-18 codes where applicable)
#[odra::odra_error]
pub enum TokenError {
    InsufficientBalance = 60001,
    InsufficientAllowance = 60002,
    CannotTargetSelfUser = 60003,
    Unauthorized = 60004,
}

#[odra::module(
    events = [
        Mint,
        Burn,
        SetAllowance,
        IncreaseAllowance,
        DecreaseAllowance,
        Transfer,
        TransferFrom,
        events::MinterSet
    ],
    errors = TokenError
)]
pub struct PoolShareToken {
    token: SubModule<Cep18>,
    minter: Var<Address>,
}

#[odra::module]
impl PoolShareToken {
    /// Initialize the token. `minter` is normally the deployer until the pool
    /// exists, then handed over with `set_minter`.
    pub fn init(&mut self, minter: Address) {
        self.token.init(
            SHARE_TOKEN_SYMBOL.to_string(),
            SHARE_TOKEN_NAME.to_string(),
            SHARE_TOKEN_DECIMALS,
            U256::zero(),
        );
        self.minter.set(minter);
        self.env().emit_event(events::MinterSet {
            old_minter: None,
            new_minter: minter,
        });
    }

    pub fn minter(&self) -> Option<Address> {
        self.minter.get()
    }

    /// Hand minting rights to `new_minter` (only current minter can call)
    pub fn set_minter(&mut self, new_minter: Address) {
        let caller = self.env().caller();
        let current_minter = self.minter.get();
        if !self.is_authorized_minter(&caller) {
            self.env().revert(TokenError::Unauthorized);
        }
        self.minter.set(new_minter);
        self.env().emit_event(events::MinterSet {
            old_minter: current_minter,
            new_minter,
        });
    }

    pub fn name(&self) -> String {
        self.token.name()
    }

    pub fn symbol(&self) -> String {
        self.token.symbol()
    }

    pub fn decimals(&self) -> u8 {
        self.token.decimals()
    }

    pub fn total_supply(&self) -> U256 {
        self.token.total_supply()
    }

    pub fn balance_of(&self, owner: Address) -> U256 {
        self.token.balance_of(&owner)
    }

    pub fn allowance(&self, owner: Address, spender: Address) -> U256 {
        self.token.allowance(&owner, &spender)
    }

    pub fn transfer(&mut self, recipient: Address, amount: U256) {
        self.token.transfer(&recipient, &amount);
    }

    pub fn approve(&mut self, spender: Address, amount: U256) {
        self.token.approve(&spender, &amount);
    }

    pub fn increase_allowance(&mut self, spender: Address, amount: U256) {
        self.token.increase_allowance(&spender, &amount);
    }

    pub fn decrease_allowance(&mut self, spender: Address, amount: U256) {
        self.token.decrease_allowance(&spender, &amount);
    }

    /// Spend `owner`'s allowance to the caller. The pool uses this to take
    /// custody of shares queued for withdrawal.
    pub fn transfer_from(&mut self, owner: Address, recipient: Address, amount: U256) {
        self.token.transfer_from(&owner, &recipient, &amount);
    }

    /// Mint shares (minter only)
    pub fn mint(&mut self, to: Address, amount: U256) {
        let caller = self.env().caller();
        if !self.is_authorized_minter(&caller) {
            self.env().revert(TokenError::Unauthorized);
        }
        self.token.raw_mint(&to, &amount);
    }

    /// Burn shares held by `from` (minter only)
    pub fn burn(&mut self, from: Address, amount: U256) {
        let caller = self.env().caller();
        if !self.is_authorized_minter(&caller) {
            self.env().revert(TokenError::Unauthorized);
        }
        if self.token.balance_of(&from) < amount {
            self.env().revert(TokenError::InsufficientBalance);
        }
        self.token.raw_burn(&from, &amount);
    }

    // Contract callers may show up as either entity or package address on Casper 2.0
    fn is_authorized_minter(&self, caller: &Address) -> bool {
        match self.minter.get() {
            Some(m) if &m == caller => true,
            Some(m) => match (m.as_contract_package_hash(), caller.as_contract_package_hash()) {
                (Some(m_pkg), Some(caller_pkg)) => m_pkg == caller_pkg,
                _ => false,
            },
            None => false,
        }
    }
}
