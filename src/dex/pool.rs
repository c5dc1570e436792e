// src/dex/pool.rs
//! Shared pool types, the program-id dispatch table and price/TVL math.

use crate::dex::{meteora, orca, raydium};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use solana_sdk::{program_pack::Pack, pubkey, pubkey::Pubkey};
use spl_token::state::{Account as TokenAccount, Mint};

pub const RAYDIUM_AMM_V4_PROGRAM_ID: Pubkey = pubkey!("675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8");
pub const ORCA_WHIRLPOOL_PROGRAM_ID: Pubkey = pubkey!("whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc");
pub const METEORA_DLMM_PROGRAM_ID: Pubkey = pubkey!("LBUZKhRxPF3XUpBCjp4YzTKgLccjZhTSDM9YuVaPwxo");

/// Highest decimals accepted from an on-chain layout.
pub const MAX_TOKEN_DECIMALS: u8 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DexKind {
    RaydiumAmmV4,
    OrcaWhirlpool,
    MeteoraDlmm,
}

type Decoder = fn(&Pubkey, &[u8]) -> Option<PoolLayout>;

/// Owning program -> layout decoder.
const DECODERS: [(Pubkey, DexKind, Decoder); 3] = [
    (RAYDIUM_AMM_V4_PROGRAM_ID, DexKind::RaydiumAmmV4, raydium::decode),
    (ORCA_WHIRLPOOL_PROGRAM_ID, DexKind::OrcaWhirlpool, orca::decode),
    (METEORA_DLMM_PROGRAM_ID, DexKind::MeteoraDlmm, meteora::decode),
];

impl DexKind {
    pub fn from_program_id(program_id: &Pubkey) -> Option<Self> {
        DECODERS
            .iter()
            .find(|(id, _, _)| id == program_id)
            .map(|(_, kind, _)| *kind)
    }

    pub fn program_id(&self) -> Pubkey {
        match self {
            DexKind::RaydiumAmmV4 => RAYDIUM_AMM_V4_PROGRAM_ID,
            DexKind::OrcaWhirlpool => ORCA_WHIRLPOOL_PROGRAM_ID,
            DexKind::MeteoraDlmm => METEORA_DLMM_PROGRAM_ID,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DexKind::RaydiumAmmV4 => "Raydium AMM v4",
            DexKind::OrcaWhirlpool => "Orca Whirlpool",
            DexKind::MeteoraDlmm => "Meteora DLMM",
        }
    }

    pub fn decode(&self, address: &Pubkey, data: &[u8]) -> Option<PoolLayout> {
        DECODERS
            .iter()
            .find(|(_, kind, _)| kind == self)
            .and_then(|(_, _, decoder)| decoder(address, data))
    }
}

impl std::fmt::Display for DexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Venue-specific pricing state carried alongside reserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolPricing {
    ConstantProduct,
    Concentrated {
        sqrt_price_x64: u128,
        liquidity: u128,
        tick_current: i32,
        tick_spacing: u16,
    },
    Bins {
        active_id: i32,
        bin_step: u16,
    },
}

/// Everything a pool account itself says about the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolLayout {
    pub address: Pubkey,
    pub dex: DexKind,
    pub mint_a: Pubkey,
    pub mint_b: Pubkey,
    pub vault_a: Pubkey,
    pub vault_b: Pubkey,
    /// Present when the layout stores decimals; otherwise read from the mints.
    pub decimals: Option<(u8, u8)>,
    pub fee_numerator: u64,
    pub fee_denominator: u64,
    pub pricing: PoolPricing,
}

impl PoolLayout {
    /// Accounts needed to complete the pool state: vaults, plus mints when decimals are missing.
    pub fn dependent_accounts(&self) -> Vec<Pubkey> {
        let mut keys = vec![self.vault_a, self.vault_b];
        if self.decimals.is_none() {
            keys.push(self.mint_a);
            keys.push(self.mint_b);
        }
        keys
    }
}

/// Fully populated pool record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolState {
    pub address: Pubkey,
    pub dex: DexKind,
    pub mint_a: Pubkey,
    pub mint_b: Pubkey,
    pub vault_a: Pubkey,
    pub vault_b: Pubkey,
    pub reserve_a: u128,
    pub reserve_b: u128,
    pub decimals_a: u8,
    pub decimals_b: u8,
    pub fee_numerator: u64,
    pub fee_denominator: u64,
    pub pricing: PoolPricing,
    pub last_updated: DateTime<Utc>,
}

impl PoolState {
    pub fn fee_bps(&self) -> f64 {
        if self.fee_denominator == 0 {
            return 0.0;
        }
        self.fee_numerator as f64 * 10_000.0 / self.fee_denominator as f64
    }

    /// Price of token A in token B using the record's own decimals.
    pub fn price(&self) -> Option<f64> {
        calculate_price(self, self.decimals_a, self.decimals_b)
    }
}

pub(crate) fn read_bytes<const N: usize>(data: &[u8], offset: usize) -> Option<[u8; N]> {
    data.get(offset..offset.checked_add(N)?)?.try_into().ok()
}

pub(crate) fn read_u16(data: &[u8], offset: usize) -> Option<u16> {
    read_bytes(data, offset).map(u16::from_le_bytes)
}

pub(crate) fn read_i32(data: &[u8], offset: usize) -> Option<i32> {
    read_bytes(data, offset).map(i32::from_le_bytes)
}

pub(crate) fn read_u64(data: &[u8], offset: usize) -> Option<u64> {
    read_bytes(data, offset).map(u64::from_le_bytes)
}

pub(crate) fn read_u128(data: &[u8], offset: usize) -> Option<u128> {
    read_bytes(data, offset).map(u128::from_le_bytes)
}

pub(crate) fn read_pubkey(data: &[u8], offset: usize) -> Option<Pubkey> {
    read_bytes::<32>(data, offset).map(Pubkey::new_from_array)
}

/// Anchor account discriminator: first 8 bytes of `sha256("account:<Name>")`.
pub(crate) fn anchor_discriminator(account_name: &str) -> [u8; 8] {
    let hash = solana_sdk::hash::hashv(&[format!("account:{}", account_name).as_bytes()]);
    let mut discriminator = [0u8; 8];
    discriminator.copy_from_slice(&hash.to_bytes()[..8]);
    discriminator
}

/// Mints must be set and distinct; vaults must be set.
pub(crate) fn well_formed(mint_a: &Pubkey, mint_b: &Pubkey, vault_a: &Pubkey, vault_b: &Pubkey) -> bool {
    let unset = Pubkey::default();
    *mint_a != unset && *mint_b != unset && mint_a != mint_b && *vault_a != unset && *vault_b != unset
}

/// SPL token account, tolerating trailing extension bytes.
pub fn unpack_token_account(data: &[u8]) -> Option<TokenAccount> {
    TokenAccount::unpack(data.get(..TokenAccount::LEN)?).ok()
}

pub fn unpack_mint(data: &[u8]) -> Option<Mint> {
    Mint::unpack(data.get(..Mint::LEN)?).ok()
}

/// Combines a decoded layout with its vault (and, if needed, mint) accounts.
///
/// Returns `None` when any dependent account cannot be decoded or does not
/// belong to the pool's mints.
pub fn assemble_pool_state(
    layout: &PoolLayout,
    vault_a: &[u8],
    vault_b: &[u8],
    mint_a: Option<&[u8]>,
    mint_b: Option<&[u8]>,
) -> Option<PoolState> {
    let vault_a = unpack_token_account(vault_a)?;
    let vault_b = unpack_token_account(vault_b)?;
    if vault_a.mint != layout.mint_a || vault_b.mint != layout.mint_b {
        return None;
    }

    let (decimals_a, decimals_b) = match layout.decimals {
        Some(decimals) => decimals,
        None => (
            unpack_mint(mint_a?)?.decimals,
            unpack_mint(mint_b?)?.decimals,
        ),
    };
    if decimals_a > MAX_TOKEN_DECIMALS || decimals_b > MAX_TOKEN_DECIMALS {
        return None;
    }

    Some(PoolState {
        address: layout.address,
        dex: layout.dex,
        mint_a: layout.mint_a,
        mint_b: layout.mint_b,
        vault_a: layout.vault_a,
        vault_b: layout.vault_b,
        reserve_a: vault_a.amount as u128,
        reserve_b: vault_b.amount as u128,
        decimals_a,
        decimals_b,
        fee_numerator: layout.fee_numerator,
        fee_denominator: layout.fee_denominator,
        pricing: layout.pricing,
        last_updated: Utc::now(),
    })
}

fn to_ui_amount(raw: u128, decimals: u8) -> f64 {
    raw as f64 / 10f64.powi(decimals as i32)
}

/// Token B per token A: `(reserve_b / 10^decimals_b) / (reserve_a / 10^decimals_a)`.
/// `None` for an empty A side.
pub fn calculate_price(state: &PoolState, decimals_a: u8, decimals_b: u8) -> Option<f64> {
    if state.reserve_a == 0 {
        return None;
    }
    let a = to_ui_amount(state.reserve_a, decimals_a);
    let b = to_ui_amount(state.reserve_b, decimals_b);
    let price = b / a;
    price.is_finite().then_some(price)
}

/// USD value of both sides of the pool.
pub fn calculate_tvl(
    state: &PoolState,
    decimals_a: u8,
    decimals_b: u8,
    price_a_usd: f64,
    price_b_usd: f64,
) -> f64 {
    to_ui_amount(state.reserve_a, decimals_a) * price_a_usd
        + to_ui_amount(state.reserve_b, decimals_b) * price_b_usd
}
