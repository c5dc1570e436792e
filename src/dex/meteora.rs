// src/dex/meteora.rs
//! Meteora DLMM `LbPair` decoder.

use crate::dex::pool::{
    anchor_discriminator, read_bytes, read_i32, read_pubkey, read_u16, well_formed, DexKind,
    PoolLayout, PoolPricing,
};
use solana_sdk::pubkey::Pubkey;

pub const LB_PAIR_LEN: usize = 904;

const BASE_FACTOR: usize = 8;
const ACTIVE_ID: usize = 76;
const BIN_STEP: usize = 80;
const TOKEN_X_MINT: usize = 88;
const TOKEN_Y_MINT: usize = 120;
const RESERVE_X: usize = 152;
const RESERVE_Y: usize = 184;

/// Base fee rate is `base_factor * bin_step * 10` in 1e-9 units.
pub const FEE_PRECISION: u64 = 1_000_000_000;

pub fn discriminator() -> [u8; 8] {
    anchor_discriminator("LbPair")
}

pub fn decode(address: &Pubkey, data: &[u8]) -> Option<PoolLayout> {
    if data.len() < LB_PAIR_LEN || read_bytes::<8>(data, 0)? != discriminator() {
        return None;
    }

    let mint_a = read_pubkey(data, TOKEN_X_MINT)?;
    let mint_b = read_pubkey(data, TOKEN_Y_MINT)?;
    let vault_a = read_pubkey(data, RESERVE_X)?;
    let vault_b = read_pubkey(data, RESERVE_Y)?;
    if !well_formed(&mint_a, &mint_b, &vault_a, &vault_b) {
        return None;
    }

    let bin_step = read_u16(data, BIN_STEP)?;
    if bin_step == 0 {
        return None;
    }
    let base_factor = read_u16(data, BASE_FACTOR)? as u64;

    Some(PoolLayout {
        address: *address,
        dex: DexKind::MeteoraDlmm,
        mint_a,
        mint_b,
        vault_a,
        vault_b,
        decimals: None,
        fee_numerator: base_factor * bin_step as u64 * 10,
        fee_denominator: FEE_PRECISION,
        pricing: PoolPricing::Bins {
            active_id: read_i32(data, ACTIVE_ID)?,
            bin_step,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures::lb_pair_data;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_decode_lb_pair() {
        let (mint_x, mint_y) = (Pubkey::new_unique(), Pubkey::new_unique());
        let (reserve_x, reserve_y) = (Pubkey::new_unique(), Pubkey::new_unique());
        let data = lb_pair_data(&mint_x, &mint_y, &reserve_x, &reserve_y);

        let layout = decode(&Pubkey::new_unique(), &data).unwrap();
        assert_eq!(layout.mint_a, mint_x);
        assert_eq!(layout.vault_b, reserve_y);
        assert_eq!(layout.pricing, PoolPricing::Bins { active_id: -120, bin_step: 25 });
        // base_factor 10_000 * bin_step 25 -> 25 bps
        let bps = layout.fee_numerator as f64 * 10_000.0 / layout.fee_denominator as f64;
        assert_approx_eq!(bps, 25.0);
    }

    #[test]
    fn test_short_or_foreign_buffer_rejected() {
        let data = lb_pair_data(
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
        );
        assert!(decode(&Pubkey::new_unique(), &data[..LB_PAIR_LEN - 1]).is_none());
        assert!(decode(&Pubkey::new_unique(), &vec![0u8; LB_PAIR_LEN]).is_none());
    }
}
