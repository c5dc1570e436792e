//! Transaction builder: compute budget, blockhash and lookup-table compression
//! assembled into a signable v0 message.

use crate::api::ConnectionPool;
use crate::config::BuilderConfig;
use crate::error::{CoreError, Result};
use crate::execution::fee_manager::{
    compute_budget_instructions, is_compute_budget_instruction, FeeEstimator, FeeTier,
    MAX_COMPUTE_UNITS,
};
use crate::solana::signer::TransactionSigner;
use dashmap::DashMap;
use log::{debug, info};
use solana_sdk::{
    address_lookup_table::{self, state::AddressLookupTable, AddressLookupTableAccount},
    commitment_config::CommitmentLevel,
    hash::Hash,
    instruction::Instruction,
    message::{v0, VersionedMessage},
    pubkey::Pubkey,
    transaction::VersionedTransaction,
};
use std::collections::HashSet;
use std::sync::Arc;

/// Lamports charged per required signature.
pub const LAMPORTS_PER_SIGNATURE: u64 = 5_000;
const MICRO_LAMPORTS_PER_LAMPORT: u128 = 1_000_000;
/// `getRecentPrioritizationFees` accepts at most this many accounts.
const MAX_FEE_SAMPLE_ACCOUNTS: usize = 128;

#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Lookup tables to load and use for key compression.
    pub lookup_tables: Vec<Pubkey>,
    pub fee_tier: FeeTier,
    /// Skips simulation when set.
    pub compute_units: Option<u32>,
    /// Skips fee sampling when set (micro-lamports per CU).
    pub fee_per_unit: Option<u64>,
    pub blockhash_commitment: CommitmentLevel,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            lookup_tables: Vec::new(),
            fee_tier: FeeTier::default(),
            compute_units: None,
            fee_per_unit: None,
            blockhash_commitment: CommitmentLevel::Confirmed,
        }
    }
}

/// A compiled, unsigned transaction and everything needed to price and expire it.
#[derive(Debug, Clone)]
pub struct TransactionTemplate {
    /// Budget instructions followed by the caller's instructions.
    pub instructions: Vec<Instruction>,
    pub fee_payer: Pubkey,
    /// Tables actually applied to the message (empty when not compressed).
    pub lookup_tables: Vec<AddressLookupTableAccount>,
    pub blockhash: Hash,
    pub last_valid_block_height: u64,
    pub compute_units: u32,
    pub fee_per_unit: u64,
    pub message: VersionedMessage,
}

impl TransactionTemplate {
    pub fn num_required_signatures(&self) -> usize {
        self.message.header().num_required_signatures as usize
    }

    pub fn required_signers(&self) -> &[Pubkey] {
        let keys = self.message.static_account_keys();
        &keys[..self.num_required_signatures().min(keys.len())]
    }

    pub fn is_compressed(&self) -> bool {
        !self.lookup_tables.is_empty()
    }

    /// True once the chain has moved past the blockhash's validity window.
    pub fn is_expired(&self, current_block_height: u64) -> bool {
        current_block_height > self.last_valid_block_height
    }

    /// Collects one signature per required signer, in message order.
    pub async fn sign(&self, signers: &[&dyn TransactionSigner]) -> Result<VersionedTransaction> {
        let message_bytes = self.message.serialize();
        let mut signatures = Vec::with_capacity(self.num_required_signatures());
        for required in self.required_signers() {
            let signer = signers
                .iter()
                .find(|s| s.pubkey() == *required)
                .ok_or_else(|| CoreError::Signer(format!("missing signer for {}", required)))?;
            signatures.push(signer.sign_message(&message_bytes).await?);
        }
        Ok(VersionedTransaction {
            signatures,
            message: self.message.clone(),
        })
    }
}

/// Base fee per signature plus the priority fee, in lamports.
pub fn calculate_transaction_fee(template: &TransactionTemplate) -> u64 {
    let base = LAMPORTS_PER_SIGNATURE * template.num_required_signatures() as u64;
    let micro = template.compute_units as u128 * template.fee_per_unit as u128;
    let priority = (micro + MICRO_LAMPORTS_PER_LAMPORT - 1) / MICRO_LAMPORTS_PER_LAMPORT;
    base.saturating_add(u64::try_from(priority).unwrap_or(u64::MAX))
}

fn unique_key_count(instructions: &[Instruction], payer: &Pubkey) -> usize {
    let mut keys: HashSet<&Pubkey> = HashSet::new();
    keys.insert(payer);
    for ix in instructions {
        keys.insert(&ix.program_id);
        keys.extend(ix.accounts.iter().map(|meta| &meta.pubkey));
    }
    keys.len()
}

fn writable_accounts(instructions: &[Instruction]) -> Vec<Pubkey> {
    let mut seen = HashSet::new();
    instructions
        .iter()
        .flat_map(|ix| ix.accounts.iter())
        .filter(|meta| meta.is_writable && seen.insert(meta.pubkey))
        .map(|meta| meta.pubkey)
        .take(MAX_FEE_SAMPLE_ACCOUNTS)
        .collect()
}

pub struct TransactionBuilder {
    pool: Arc<ConnectionPool>,
    fees: Arc<FeeEstimator>,
    config: BuilderConfig,
    lookup_tables: DashMap<Pubkey, AddressLookupTableAccount>,
}

impl TransactionBuilder {
    pub fn new(pool: Arc<ConnectionPool>, fees: Arc<FeeEstimator>, config: BuilderConfig) -> Self {
        Self {
            pool,
            fees,
            config,
            lookup_tables: DashMap::new(),
        }
    }

    pub async fn build(
        &self,
        instructions: &[Instruction],
        fee_payer: &Pubkey,
        options: &BuildOptions,
    ) -> Result<TransactionTemplate> {
        if instructions.is_empty() {
            return Err(CoreError::InvalidInput(
                "cannot build a transaction without instructions".to_string(),
            ));
        }
        if instructions.iter().any(is_compute_budget_instruction) {
            return Err(CoreError::InvalidInput(
                "compute budget instructions are added by the builder".to_string(),
            ));
        }

        let resolved = self.resolve_lookup_tables(&options.lookup_tables).await?;
        let key_count = unique_key_count(instructions, fee_payer);
        let tables: &[AddressLookupTableAccount] = if key_count > self.config.compression_key_threshold {
            &resolved
        } else {
            &[]
        };

        let compute_units = match options.compute_units {
            Some(units) => units.min(MAX_COMPUTE_UNITS),
            None => {
                self.fees
                    .estimate_compute_units(instructions, fee_payer, tables)
                    .await?
            }
        };
        let fee_per_unit = match options.fee_per_unit {
            Some(fee) => fee,
            None => self
                .fees
                .priority_fee_tiers(&writable_accounts(instructions))
                .await
                .fee_for(options.fee_tier),
        };

        let blockhash = self.pool.latest_blockhash(options.blockhash_commitment).await?;

        let mut all_instructions = Vec::with_capacity(instructions.len() + 2);
        all_instructions.extend(compute_budget_instructions(compute_units, fee_per_unit));
        all_instructions.extend_from_slice(instructions);

        let message = v0::Message::try_compile(fee_payer, &all_instructions, tables, blockhash.blockhash)
            .map_err(|e| CoreError::InvalidInput(format!("cannot compile message: {}", e)))?;

        debug!(
            "🔨 Built template: {} instructions, {} keys{}, {} CU @ {} µL/CU",
            all_instructions.len(),
            key_count,
            if tables.is_empty() { "" } else { " (compressed)" },
            compute_units,
            fee_per_unit
        );

        Ok(TransactionTemplate {
            instructions: all_instructions,
            fee_payer: *fee_payer,
            lookup_tables: tables.to_vec(),
            blockhash: blockhash.blockhash,
            last_valid_block_height: blockhash.last_valid_block_height,
            compute_units,
            fee_per_unit,
            message: VersionedMessage::V0(message),
        })
    }

    /// Loads lookup tables through the pool, serving repeat requests from cache.
    pub async fn resolve_lookup_tables(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<AddressLookupTableAccount>> {
        let missing: Vec<Pubkey> = addresses
            .iter()
            .filter(|a| !self.lookup_tables.contains_key(*a))
            .copied()
            .collect();

        if !missing.is_empty() {
            let accounts = self.pool.get_multiple_accounts(&missing).await?;
            for (address, account) in missing.iter().zip(accounts) {
                let account = account.ok_or_else(|| {
                    CoreError::AccountNotFound(format!("lookup table {}", address))
                })?;
                if account.owner != address_lookup_table::program::id() {
                    return Err(CoreError::InvalidInput(format!(
                        "{} is not a lookup table (owner {})",
                        address, account.owner
                    )));
                }
                let table = AddressLookupTable::deserialize(&account.data).map_err(|e| {
                    CoreError::Parse(format!("lookup table {}: {}", address, e))
                })?;
                self.lookup_tables.insert(
                    *address,
                    AddressLookupTableAccount {
                        key: *address,
                        addresses: table.addresses.to_vec(),
                    },
                );
                info!(
                    "📇 Cached lookup table {} ({} addresses)",
                    address,
                    table.addresses.len()
                );
            }
        }

        addresses
            .iter()
            .map(|a| {
                self.lookup_tables
                    .get(a)
                    .map(|t| t.value().clone())
                    .ok_or_else(|| CoreError::AccountNotFound(format!("lookup table {}", a)))
            })
            .collect()
    }

    pub fn cached_lookup_tables(&self) -> usize {
        self.lookup_tables.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::instruction::AccountMeta;

    fn template(signers: u8, compute_units: u32, fee_per_unit: u64) -> TransactionTemplate {
        let payer = Pubkey::new_unique();
        let mut accounts = vec![];
        for _ in 1..signers {
            accounts.push(AccountMeta::new(Pubkey::new_unique(), true));
        }
        let ix = Instruction::new_with_bytes(Pubkey::new_unique(), &[1], accounts);
        let message = v0::Message::try_compile(&payer, &[ix.clone()], &[], Hash::default()).unwrap();
        TransactionTemplate {
            instructions: vec![ix],
            fee_payer: payer,
            lookup_tables: vec![],
            blockhash: Hash::default(),
            last_valid_block_height: 100,
            compute_units,
            fee_per_unit,
            message: VersionedMessage::V0(message),
        }
    }

    #[test]
    fn test_fee_is_signatures_plus_priority() {
        assert_eq!(calculate_transaction_fee(&template(1, 200_000, 0)), 5_000);
        // 200_000 CU * 10_000 µL = 2_000 lamports
        assert_eq!(calculate_transaction_fee(&template(2, 200_000, 10_000)), 12_000);
        // Fractional lamports round up.
        assert_eq!(calculate_transaction_fee(&template(1, 1, 1)), 5_001);
    }

    #[test]
    fn test_expiry_is_strictly_after_last_valid_height() {
        let t = template(1, 1, 1);
        assert!(!t.is_expired(100));
        assert!(t.is_expired(101));
    }

    #[test]
    fn test_unique_keys_count_payer_programs_and_accounts() {
        let payer = Pubkey::new_unique();
        let program = Pubkey::new_unique();
        let shared = Pubkey::new_unique();
        let ixs = vec![
            Instruction::new_with_bytes(program, &[], vec![AccountMeta::new(shared, false)]),
            Instruction::new_with_bytes(program, &[], vec![AccountMeta::new_readonly(shared, false)]),
        ];
        assert_eq!(unique_key_count(&ixs, &payer), 3);
        assert_eq!(writable_accounts(&ixs), vec![shared]);
    }
}
