// src/dex/raydium.rs
//! Raydium AMM v4 `LiquidityStateV4` decoder.
//!
//! The account has no discriminator; the `status` field doubles as the tag and
//! must hold one of the AMM's known states.

use crate::dex::pool::{
    read_pubkey, read_u64, well_formed, DexKind, PoolLayout, PoolPricing, MAX_TOKEN_DECIMALS,
};
use log::debug;
use solana_sdk::pubkey::Pubkey;

pub const LIQUIDITY_STATE_V4_LEN: usize = 752;

const STATUS: usize = 0;
const BASE_DECIMAL: usize = 32;
const QUOTE_DECIMAL: usize = 40;
const SWAP_FEE_NUMERATOR: usize = 176;
const SWAP_FEE_DENOMINATOR: usize = 184;
const BASE_VAULT: usize = 336;
const QUOTE_VAULT: usize = 368;
const BASE_MINT: usize = 400;
const QUOTE_MINT: usize = 432;

/// Valid `status` values (uninitialized is 0).
const KNOWN_STATUSES: std::ops::RangeInclusive<u64> = 1..=7;

pub fn decode(address: &Pubkey, data: &[u8]) -> Option<PoolLayout> {
    if data.len() < LIQUIDITY_STATE_V4_LEN {
        return None;
    }

    let status = read_u64(data, STATUS)?;
    if !KNOWN_STATUSES.contains(&status) {
        debug!("Raydium account {} has unknown status {}", address, status);
        return None;
    }

    let base_decimal = read_u64(data, BASE_DECIMAL)?;
    let quote_decimal = read_u64(data, QUOTE_DECIMAL)?;
    if base_decimal > MAX_TOKEN_DECIMALS as u64 || quote_decimal > MAX_TOKEN_DECIMALS as u64 {
        return None;
    }

    let fee_numerator = read_u64(data, SWAP_FEE_NUMERATOR)?;
    let fee_denominator = read_u64(data, SWAP_FEE_DENOMINATOR)?;
    if fee_denominator == 0 || fee_numerator > fee_denominator {
        return None;
    }

    let mint_a = read_pubkey(data, BASE_MINT)?;
    let mint_b = read_pubkey(data, QUOTE_MINT)?;
    let vault_a = read_pubkey(data, BASE_VAULT)?;
    let vault_b = read_pubkey(data, QUOTE_VAULT)?;
    if !well_formed(&mint_a, &mint_b, &vault_a, &vault_b) {
        return None;
    }

    Some(PoolLayout {
        address: *address,
        dex: DexKind::RaydiumAmmV4,
        mint_a,
        mint_b,
        vault_a,
        vault_b,
        decimals: Some((base_decimal as u8, quote_decimal as u8)),
        fee_numerator,
        fee_denominator,
        pricing: PoolPricing::ConstantProduct,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::raydium_pool_data;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_well_formed_pool() {
        let (mint_a, mint_b) = (Pubkey::new_unique(), Pubkey::new_unique());
        let (vault_a, vault_b) = (Pubkey::new_unique(), Pubkey::new_unique());
        let data = raydium_pool_data(&mint_a, &mint_b, &vault_a, &vault_b, 9, 6);
        let address = Pubkey::new_unique();

        let layout = decode(&address, &data).unwrap();
        assert_eq!(layout.mint_a, mint_a);
        assert_eq!(layout.vault_b, vault_b);
        assert_eq!(layout.decimals, Some((9, 6)));
        assert_eq!((layout.fee_numerator, layout.fee_denominator), (25, 10_000));
    }

    #[test]
    fn test_short_buffer_and_bad_status_rejected() {
        let (mint_a, mint_b) = (Pubkey::new_unique(), Pubkey::new_unique());
        let mut data = raydium_pool_data(&mint_a, &mint_b, &Pubkey::new_unique(), &Pubkey::new_unique(), 9, 6);
        let address = Pubkey::new_unique();

        assert!(decode(&address, &data[..LIQUIDITY_STATE_V4_LEN - 1]).is_none());

        data[STATUS..STATUS + 8].copy_from_slice(&0u64.to_le_bytes());
        assert!(decode(&address, &data).is_none());
    }
}
