//! FeeEstimator: priority-fee tiers and compute-unit budgeting for every transaction we build.

use crate::api::ConnectionPool;
use crate::config::FeeConfig;
use crate::error::{CoreError, Result};
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use solana_sdk::{
    address_lookup_table::AddressLookupTableAccount,
    compute_budget::ComputeBudgetInstruction,
    hash::Hash,
    instruction::Instruction,
    message::{v0, VersionedMessage},
    pubkey::Pubkey,
    signature::Signature,
    transaction::VersionedTransaction,
};
use std::sync::Arc;
use std::time::Instant;

/// Protocol ceiling on compute units per transaction.
pub const MAX_COMPUTE_UNITS: u32 = 1_400_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FeeTier {
    Low,
    #[default]
    Medium,
    High,
    Turbo,
}

/// Micro-lamports per compute unit for each tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityFeeTiers {
    pub low: u64,
    pub medium: u64,
    pub high: u64,
    pub turbo: u64,
    /// False when the static fallback was used.
    pub from_samples: bool,
}

impl PriorityFeeTiers {
    pub fn fallback(tiers: &[u64; 4]) -> Self {
        Self {
            low: tiers[0],
            medium: tiers[1],
            high: tiers[2],
            turbo: tiers[3],
            from_samples: false,
        }
    }

    pub fn fee_for(&self, tier: FeeTier) -> u64 {
        match tier {
            FeeTier::Low => self.low,
            FeeTier::Medium => self.medium,
            FeeTier::High => self.high,
            FeeTier::Turbo => self.turbo,
        }
    }
}

/// Nearest-rank percentile of an ascending slice.
fn percentile(sorted: &[u64], pct: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((pct.clamp(0.0, 100.0) / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

/// The two budget instructions every transaction starts with: unit limit, then unit price.
pub fn compute_budget_instructions(units: u32, fee_per_unit: u64) -> [Instruction; 2] {
    [
        ComputeBudgetInstruction::set_compute_unit_limit(units),
        ComputeBudgetInstruction::set_compute_unit_price(fee_per_unit),
    ]
}

pub fn is_compute_budget_instruction(ix: &Instruction) -> bool {
    ix.program_id == solana_sdk::compute_budget::id()
}

struct CachedTiers {
    fetched_at: Instant,
    accounts: Vec<Pubkey>,
    tiers: PriorityFeeTiers,
}

pub struct FeeEstimator {
    pool: Arc<ConnectionPool>,
    config: FeeConfig,
    cached: Mutex<Option<CachedTiers>>,
}

impl FeeEstimator {
    pub fn new(pool: Arc<ConnectionPool>, config: FeeConfig) -> Self {
        Self {
            pool,
            config,
            cached: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &FeeConfig {
        &self.config
    }

    /// Tiers from recent prioritization fees, optionally scoped to writable
    /// `accounts`. Falls back to the configured static tiers when the cluster
    /// returns no non-zero samples or cannot be reached.
    pub async fn priority_fee_tiers(&self, accounts: &[Pubkey]) -> PriorityFeeTiers {
        {
            let cached = self.cached.lock();
            if let Some(entry) = cached.as_ref() {
                if entry.accounts == accounts && entry.fetched_at.elapsed() < self.config.tiers_ttl {
                    return entry.tiers;
                }
            }
        }

        let tiers = match self.pool.recent_prioritization_fees(accounts).await {
            Ok(samples) => {
                let mut non_zero: Vec<u64> = samples.into_iter().filter(|f| *f > 0).collect();
                if non_zero.is_empty() {
                    debug!("No non-zero fee samples, using static tiers");
                    PriorityFeeTiers::fallback(&self.config.fallback_tiers)
                } else {
                    non_zero.sort_unstable();
                    let [p_low, p_medium, p_high, p_turbo] = self.config.tier_percentiles;
                    let tiers = PriorityFeeTiers {
                        low: percentile(&non_zero, p_low),
                        medium: percentile(&non_zero, p_medium),
                        high: percentile(&non_zero, p_high),
                        turbo: percentile(&non_zero, p_turbo),
                        from_samples: true,
                    };
                    debug!(
                        "💸 Fee tiers from {} samples: {}/{}/{}/{}",
                        non_zero.len(),
                        tiers.low,
                        tiers.medium,
                        tiers.high,
                        tiers.turbo
                    );
                    tiers
                }
            }
            Err(e) => {
                warn!("⚠️ Fee sampling failed, using static tiers: {}", e);
                PriorityFeeTiers::fallback(&self.config.fallback_tiers)
            }
        };

        *self.cached.lock() = Some(CachedTiers {
            fetched_at: Instant::now(),
            accounts: accounts.to_vec(),
            tiers,
        });
        tiers
    }

    /// Simulated consumption times the safety multiplier, clamped to [`MAX_COMPUTE_UNITS`].
    pub async fn estimate_compute_units(
        &self,
        instructions: &[Instruction],
        payer: &Pubkey,
        lookup_tables: &[AddressLookupTableAccount],
    ) -> Result<u32> {
        let mut ixs = Vec::with_capacity(instructions.len() + 1);
        ixs.push(ComputeBudgetInstruction::set_compute_unit_limit(MAX_COMPUTE_UNITS));
        ixs.extend_from_slice(instructions);

        // Blockhash and signatures are replaced/skipped by the simulation config.
        let message = v0::Message::try_compile(payer, &ixs, lookup_tables, Hash::default())
            .map_err(|e| CoreError::InvalidInput(format!("cannot compile message: {}", e)))?;
        let tx = VersionedTransaction {
            signatures: vec![Signature::default(); message.header.num_required_signatures as usize],
            message: VersionedMessage::V0(message),
        };

        let outcome = self.pool.simulate(&tx).await?;
        if let Some(err) = outcome.err {
            return Err(CoreError::Simulation {
                message: err,
                logs: outcome.logs,
            });
        }

        let units = match outcome.units_consumed {
            Some(consumed) => self.apply_margin(consumed),
            None => {
                debug!(
                    "Simulation reported no units, using default {}",
                    self.config.default_compute_units
                );
                self.config.default_compute_units.min(MAX_COMPUTE_UNITS)
            }
        };
        debug!("🧮 Estimated {} compute units", units);
        Ok(units)
    }

    fn apply_margin(&self, consumed: u64) -> u32 {
        // Per-mille integer math keeps 1.1x of round numbers exact.
        let per_mille = (self.config.compute_unit_multiplier * 1000.0).round() as u64;
        let padded = consumed.saturating_mul(per_mille).saturating_add(999) / 1000;
        padded.min(MAX_COMPUTE_UNITS as u64) as u32
    }

    pub fn compute_budget_instructions(&self, units: u32, fee_per_unit: u64) -> [Instruction; 2] {
        compute_budget_instructions(units, fee_per_unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Endpoint;
    use crate::config::PoolConfig;
    use crate::error::RetryPolicy;
    use crate::solana::rpc::SimulationOutcome;
    use crate::testing::MockRpcTransport;
    use pretty_assertions::assert_eq;

    fn estimator(transport: Arc<MockRpcTransport>) -> FeeEstimator {
        let pool = ConnectionPool::new(&PoolConfig {
            retry: RetryPolicy::immediate(0),
            ..PoolConfig::default()
        });
        pool.register(Endpoint::rpc("mock", transport));
        FeeEstimator::new(Arc::new(pool), FeeConfig::default())
    }

    fn transfer(payer: &Pubkey) -> Instruction {
        solana_sdk::system_instruction::transfer(payer, &Pubkey::new_unique(), 1)
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let samples: Vec<u64> = (1..=100).collect();
        assert_eq!(percentile(&samples, 25.0), 25);
        assert_eq!(percentile(&samples, 95.0), 95);
        assert_eq!(percentile(&[7], 50.0), 7);
    }

    #[test]
    fn test_budget_instruction_order() {
        let [limit, price] = compute_budget_instructions(300_000, 5_000);
        assert!(is_compute_budget_instruction(&limit));
        assert!(is_compute_budget_instruction(&price));
        assert_eq!(limit, ComputeBudgetInstruction::set_compute_unit_limit(300_000));
        assert_eq!(price, ComputeBudgetInstruction::set_compute_unit_price(5_000));
    }

    #[tokio::test]
    async fn test_tiers_from_samples_ignore_zeroes() {
        let transport = Arc::new(MockRpcTransport::new("mock"));
        let mut fees: Vec<u64> = (1..=20).map(|i| i * 100).collect();
        fees.extend([0, 0, 0]);
        transport.set_prioritization_fees(fees);

        let tiers = estimator(transport).priority_fee_tiers(&[]).await;
        assert!(tiers.from_samples);
        assert_eq!(tiers.low, 500);
        assert_eq!(tiers.medium, 1_000);
        assert_eq!(tiers.high, 1_500);
        assert_eq!(tiers.turbo, 1_900);
    }

    #[tokio::test]
    async fn test_tiers_fall_back_without_samples() {
        let transport = Arc::new(MockRpcTransport::new("mock"));
        transport.fail_always(CoreError::Timeout {
            endpoint: "mock".into(),
            message: "slow".into(),
        });
        let tiers = estimator(transport).priority_fee_tiers(&[]).await;
        assert_eq!(tiers, PriorityFeeTiers::fallback(&FeeConfig::default().fallback_tiers));
    }

    #[tokio::test]
    async fn test_tiers_are_cached_briefly() {
        let transport = Arc::new(MockRpcTransport::new("mock"));
        transport.set_prioritization_fees(vec![10, 20, 30]);
        let estimator = estimator(transport.clone());
        estimator.priority_fee_tiers(&[]).await;
        estimator.priority_fee_tiers(&[]).await;
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn test_compute_units_padded_and_clamped() {
        let payer = Pubkey::new_unique();
        let transport = Arc::new(MockRpcTransport::new("mock"));
        transport.set_simulation(SimulationOutcome {
            err: None,
            logs: vec![],
            units_consumed: Some(100_000),
        });
        let estimator = estimator(transport.clone());
        let units = estimator
            .estimate_compute_units(&[transfer(&payer)], &payer, &[])
            .await
            .unwrap();
        assert_eq!(units, 110_000);

        transport.set_simulation(SimulationOutcome {
            err: None,
            logs: vec![],
            units_consumed: Some(1_390_000),
        });
        let units = estimator
            .estimate_compute_units(&[transfer(&payer)], &payer, &[])
            .await
            .unwrap();
        assert_eq!(units, MAX_COMPUTE_UNITS);
    }

    #[tokio::test]
    async fn test_simulation_error_surfaces() {
        let payer = Pubkey::new_unique();
        let transport = Arc::new(MockRpcTransport::new("mock"));
        transport.set_simulation(SimulationOutcome {
            err: Some("InsufficientFundsForRent".to_string()),
            logs: vec!["Program log: fail".to_string()],
            units_consumed: Some(1_000),
        });
        let err = estimator(transport)
            .estimate_compute_units(&[transfer(&payer)], &payer, &[])
            .await
            .unwrap_err();
        match err {
            CoreError::Simulation { logs, .. } => assert_eq!(logs.len(), 1),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
