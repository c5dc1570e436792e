//! Raw account fixtures for decoder and pool-service tests.

use crate::dex::{meteora, orca, pool, raydium};
use crate::testing::MockRpcTransport;
use solana_sdk::{
    account::Account,
    address_lookup_table::{
        self,
        state::{AddressLookupTable, LookupTableMeta},
    },
    program_pack::Pack,
    pubkey::Pubkey,
};
use spl_token::state::{Account as TokenAccount, AccountState, Mint};
use std::borrow::Cow;

fn put(data: &mut [u8], offset: usize, bytes: &[u8]) {
    data[offset..offset + bytes.len()].copy_from_slice(bytes);
}

/// `LiquidityStateV4` with status 6 (swap only) and a 0.25% swap fee.
pub fn raydium_pool_data(
    base_mint: &Pubkey,
    quote_mint: &Pubkey,
    base_vault: &Pubkey,
    quote_vault: &Pubkey,
    base_decimal: u8,
    quote_decimal: u8,
) -> Vec<u8> {
    let mut data = vec![0u8; raydium::LIQUIDITY_STATE_V4_LEN];
    put(&mut data, 0, &6u64.to_le_bytes());
    put(&mut data, 32, &(base_decimal as u64).to_le_bytes());
    put(&mut data, 40, &(quote_decimal as u64).to_le_bytes());
    put(&mut data, 176, &25u64.to_le_bytes());
    put(&mut data, 184, &10_000u64.to_le_bytes());
    put(&mut data, 336, base_vault.as_ref());
    put(&mut data, 368, quote_vault.as_ref());
    put(&mut data, 400, base_mint.as_ref());
    put(&mut data, 432, quote_mint.as_ref());
    data
}

/// Whirlpool at price 1.0 (sqrt price 2^64), tick spacing 64, 0.30% fee.
pub fn whirlpool_data(mint_a: &Pubkey, mint_b: &Pubkey, vault_a: &Pubkey, vault_b: &Pubkey) -> Vec<u8> {
    let mut data = vec![0u8; orca::WHIRLPOOL_LEN];
    put(&mut data, 0, &orca::discriminator());
    put(&mut data, 41, &64u16.to_le_bytes());
    put(&mut data, 45, &3_000u16.to_le_bytes());
    put(&mut data, 49, &1_000_000_000_000u128.to_le_bytes());
    put(&mut data, 65, &(1u128 << 64).to_le_bytes());
    put(&mut data, 81, &0i32.to_le_bytes());
    put(&mut data, 101, mint_a.as_ref());
    put(&mut data, 133, vault_a.as_ref());
    put(&mut data, 181, mint_b.as_ref());
    put(&mut data, 213, vault_b.as_ref());
    data
}

/// `LbPair` with base factor 10_000, bin step 25 and active bin -120.
pub fn lb_pair_data(mint_x: &Pubkey, mint_y: &Pubkey, reserve_x: &Pubkey, reserve_y: &Pubkey) -> Vec<u8> {
    let mut data = vec![0u8; meteora::LB_PAIR_LEN];
    put(&mut data, 0, &meteora::discriminator());
    put(&mut data, 8, &10_000u16.to_le_bytes());
    put(&mut data, 76, &(-120i32).to_le_bytes());
    put(&mut data, 80, &25u16.to_le_bytes());
    put(&mut data, 88, mint_x.as_ref());
    put(&mut data, 120, mint_y.as_ref());
    put(&mut data, 152, reserve_x.as_ref());
    put(&mut data, 184, reserve_y.as_ref());
    data
}

pub fn token_account_data(mint: &Pubkey, amount: u64) -> Vec<u8> {
    let account = TokenAccount {
        mint: *mint,
        owner: Pubkey::new_unique(),
        amount,
        state: AccountState::Initialized,
        ..TokenAccount::default()
    };
    let mut data = vec![0u8; TokenAccount::LEN];
    account.pack_into_slice(&mut data);
    data
}

pub fn mint_data(decimals: u8) -> Vec<u8> {
    let mint = Mint {
        decimals,
        supply: 1_000_000_000_000,
        is_initialized: true,
        ..Mint::default()
    };
    let mut data = vec![0u8; Mint::LEN];
    mint.pack_into_slice(&mut data);
    data
}

pub fn program_account(owner: Pubkey, data: Vec<u8>) -> Account {
    Account {
        lamports: 1_000_000,
        data,
        owner,
        executable: false,
        rent_epoch: 0,
    }
}

pub fn token_account(mint: &Pubkey, amount: u64) -> Account {
    program_account(spl_token::id(), token_account_data(mint, amount))
}

pub fn mint_account(decimals: u8) -> Account {
    program_account(spl_token::id(), mint_data(decimals))
}

/// Active lookup table holding `addresses`.
pub fn lookup_table_account(addresses: &[Pubkey]) -> Account {
    let table = AddressLookupTable {
        meta: LookupTableMeta::default(),
        addresses: Cow::Owned(addresses.to_vec()),
    };
    let data = table.serialize_for_tests().unwrap_or_default();
    program_account(address_lookup_table::program::id(), data)
}

/// Pool account plus the vault and mint accounts it depends on.
pub struct PoolFixture {
    pub address: Pubkey,
    pub pool_account: Account,
    pub mint_a: Pubkey,
    pub mint_b: Pubkey,
    pub accounts: Vec<(Pubkey, Account)>,
}

impl PoolFixture {
    pub fn install(&self, transport: &MockRpcTransport) {
        transport.set_account(self.address, self.pool_account.clone());
        for (address, account) in &self.accounts {
            transport.set_account(*address, account.clone());
        }
    }
}

pub fn raydium_fixture(reserve_a: u64, reserve_b: u64, decimals_a: u8, decimals_b: u8) -> PoolFixture {
    let (mint_a, mint_b) = (Pubkey::new_unique(), Pubkey::new_unique());
    let (vault_a, vault_b) = (Pubkey::new_unique(), Pubkey::new_unique());
    let address = Pubkey::new_unique();
    PoolFixture {
        address,
        pool_account: program_account(
            pool::RAYDIUM_AMM_V4_PROGRAM_ID,
            raydium_pool_data(&mint_a, &mint_b, &vault_a, &vault_b, decimals_a, decimals_b),
        ),
        mint_a,
        mint_b,
        accounts: vec![
            (vault_a, token_account(&mint_a, reserve_a)),
            (vault_b, token_account(&mint_b, reserve_b)),
        ],
    }
}

pub fn whirlpool_fixture(reserve_a: u64, reserve_b: u64, decimals_a: u8, decimals_b: u8) -> PoolFixture {
    let (mint_a, mint_b) = (Pubkey::new_unique(), Pubkey::new_unique());
    let (vault_a, vault_b) = (Pubkey::new_unique(), Pubkey::new_unique());
    let address = Pubkey::new_unique();
    PoolFixture {
        address,
        pool_account: program_account(
            pool::ORCA_WHIRLPOOL_PROGRAM_ID,
            whirlpool_data(&mint_a, &mint_b, &vault_a, &vault_b),
        ),
        mint_a,
        mint_b,
        accounts: vec![
            (vault_a, token_account(&mint_a, reserve_a)),
            (vault_b, token_account(&mint_b, reserve_b)),
            (mint_a, mint_account(decimals_a)),
            (mint_b, mint_account(decimals_b)),
        ],
    }
}

pub fn meteora_fixture(reserve_a: u64, reserve_b: u64, decimals_a: u8, decimals_b: u8) -> PoolFixture {
    let (mint_a, mint_b) = (Pubkey::new_unique(), Pubkey::new_unique());
    let (vault_a, vault_b) = (Pubkey::new_unique(), Pubkey::new_unique());
    let address = Pubkey::new_unique();
    PoolFixture {
        address,
        pool_account: program_account(
            pool::METEORA_DLMM_PROGRAM_ID,
            lb_pair_data(&mint_a, &mint_b, &vault_a, &vault_b),
        ),
        mint_a,
        mint_b,
        accounts: vec![
            (vault_a, token_account(&mint_a, reserve_a)),
            (vault_b, token_account(&mint_b, reserve_b)),
            (mint_a, mint_account(decimals_a)),
            (mint_b, mint_account(decimals_b)),
        ],
    }
}
