// src/dex/orca.rs
//! Orca Whirlpool account decoder.

use crate::dex::pool::{
    anchor_discriminator, read_bytes, read_i32, read_pubkey, read_u128, read_u16, well_formed,
    DexKind, PoolLayout, PoolPricing,
};
use solana_sdk::pubkey::Pubkey;

pub const WHIRLPOOL_LEN: usize = 653;

const TICK_SPACING: usize = 41;
/// Fee in hundredths of a basis point.
const FEE_RATE: usize = 45;
const LIQUIDITY: usize = 49;
const SQRT_PRICE: usize = 65;
const TICK_CURRENT_INDEX: usize = 81;
const TOKEN_MINT_A: usize = 101;
const TOKEN_VAULT_A: usize = 133;
const TOKEN_MINT_B: usize = 181;
const TOKEN_VAULT_B: usize = 213;

pub const FEE_RATE_DENOMINATOR: u64 = 1_000_000;

pub fn discriminator() -> [u8; 8] {
    anchor_discriminator("Whirlpool")
}

pub fn decode(address: &Pubkey, data: &[u8]) -> Option<PoolLayout> {
    if data.len() < WHIRLPOOL_LEN || read_bytes::<8>(data, 0)? != discriminator() {
        return None;
    }

    let mint_a = read_pubkey(data, TOKEN_MINT_A)?;
    let mint_b = read_pubkey(data, TOKEN_MINT_B)?;
    let vault_a = read_pubkey(data, TOKEN_VAULT_A)?;
    let vault_b = read_pubkey(data, TOKEN_VAULT_B)?;
    if !well_formed(&mint_a, &mint_b, &vault_a, &vault_b) {
        return None;
    }

    let sqrt_price_x64 = read_u128(data, SQRT_PRICE)?;
    let tick_spacing = read_u16(data, TICK_SPACING)?;
    if sqrt_price_x64 == 0 || tick_spacing == 0 {
        return None;
    }

    Some(PoolLayout {
        address: *address,
        dex: DexKind::OrcaWhirlpool,
        mint_a,
        mint_b,
        vault_a,
        vault_b,
        decimals: None,
        fee_numerator: read_u16(data, FEE_RATE)? as u64,
        fee_denominator: FEE_RATE_DENOMINATOR,
        pricing: PoolPricing::Concentrated {
            sqrt_price_x64,
            liquidity: read_u128(data, LIQUIDITY)?,
            tick_current: read_i32(data, TICK_CURRENT_INDEX)?,
            tick_spacing,
        },
    })
}
