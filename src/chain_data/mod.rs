//! Chain Data Reader
//!
//! Read-only access to block metrics and an external price quote. No state
//! is retained between calls.

pub mod http;

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use http::HttpChainReader;

/// Block metrics used by the settlement strategies
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Block {
    pub height: u64,
    pub base_fee_per_gas: Option<u128>,
    pub gas_used: Option<u128>,
    pub burnt_fees: Option<u128>,
}

/// Numeric block field a strategy aggregates
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BlockField {
    BaseFeePerGas,
    GasUsed,
    BurntFees,
}

impl BlockField {
    pub fn as_str(&self) -> &str {
        match self {
            BlockField::BaseFeePerGas => "base_fee_per_gas",
            BlockField::GasUsed => "gas_used",
            BlockField::BurntFees => "burnt_fees",
        }
    }
}

impl Block {
    pub fn field(&self, field: BlockField) -> Option<u128> {
        match field {
            BlockField::BaseFeePerGas => self.base_fee_per_gas,
            BlockField::GasUsed => self.gas_used,
            BlockField::BurntFees => self.burnt_fees,
        }
    }
}

#[async_trait::async_trait]
pub trait ChainDataReader: Send + Sync {
    /// Fetch one block. Errors on network failure, parse failure or unknown height.
    async fn get_block(&self, height: u64) -> Result<Block>;

    /// Best-effort batch fetch of `[lo, hi]`. Heights that fail are left out
    /// of the result instead of failing the whole call; callers reconcile the
    /// gaps themselves.
    async fn get_block_range(&self, lo: u64, hi: u64) -> Vec<Block>;

    async fn get_latest_height(&self) -> Result<u64>;

    /// Current external asset price in the configured quote currency
    async fn get_external_price(&self) -> Result<f64>;
}
