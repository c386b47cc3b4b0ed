//! Settlement Calculator
//!
//! Turns a category and a block range into the actual value a bet settles
//! against. Data-source trouble degrades the result (zero with an
//! explanation, or a partial sum) instead of failing, so settlement can
//! always go ahead. Only an unknown category or a missing price quote is an
//! error.

use std::collections::{HashMap, HashSet};

use rand::{seq::index, Rng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chain_data::{BlockField, ChainDataReader};
use crate::models::CalculationResult;

/// How many sampled heights are listed in the details string
const DETAILS_PREVIEW_LEN: usize = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Average of a field over every retrievable block in range, rounded
    FullRangeAverage(BlockField),
    /// Sum of a field over a random distinct sample of heights
    SampledSum(BlockField),
    /// External price converted to cents, truncated
    PriceSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct BetCategory {
    pub category: &'static str,
    pub description: &'static str,
    pub calculation_method: &'static str,
    pub strategy: Strategy,
}

pub const BET_CATEGORIES: &[BetCategory] = &[
    BetCategory {
        category: "base_fee_per_gas",
        description: "Average base fee per gas over next 5 minutes",
        calculation_method: "Average of base_fee_per_gas from all blocks in the range",
        strategy: Strategy::FullRangeAverage(BlockField::BaseFeePerGas),
    },
    BetCategory {
        category: "burnt_fees",
        description: "Total burnt fees in randomly sampled blocks over next 5 minutes",
        calculation_method: "Sum burnt_fees from 40-60 randomly sampled blocks",
        strategy: Strategy::SampledSum(BlockField::BurntFees),
    },
    BetCategory {
        category: "gas_used",
        description: "Total gas used in randomly sampled blocks over next 5 minutes",
        calculation_method: "Sum gas_used from 40-60 randomly sampled blocks",
        strategy: Strategy::SampledSum(BlockField::GasUsed),
    },
    BetCategory {
        category: "xtz_price",
        description: "XTZ price in USD cents at the end of 5 minutes",
        calculation_method: "Fetch XTZ price from the price API and multiply by 100",
        strategy: Strategy::PriceSnapshot,
    },
];

pub fn find_category(category: &str) -> Option<&'static BetCategory> {
    BET_CATEGORIES.iter().find(|c| c.category == category)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalculationError {
    /// Category has no strategy; a configuration or data bug, never retried
    UnknownCategory(String),
    /// A required data source could not provide a value
    DataUnavailable(String),
}

impl CalculationError {
    pub fn is_validation(&self) -> bool {
        matches!(self, CalculationError::UnknownCategory(_))
    }
}

impl std::fmt::Display for CalculationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownCategory(c) => write!(f, "unknown category: {}", c),
            Self::DataUnavailable(msg) => write!(f, "settlement data unavailable: {}", msg),
        }
    }
}

impl std::error::Error for CalculationError {}

/// Inclusive bounds on the random sample size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRange {
    pub min: usize,
    pub max: usize,
}

impl Default for SampleRange {
    fn default() -> Self {
        Self { min: 40, max: 60 }
    }
}

/// Draw `min..=max` distinct heights from `[start, end]` (capped at the
/// range size), uniformly without replacement. Order is the draw order.
pub fn sample_heights<R: Rng>(
    rng: &mut R,
    start: u64,
    end: u64,
    range: SampleRange,
) -> Vec<u64> {
    if end < start {
        return Vec::new();
    }
    let total = (end - start + 1) as usize;
    let wanted = rng.gen_range(range.min..=range.max.max(range.min));
    let size = wanted.min(total);

    index::sample(rng, total, size)
        .into_iter()
        .map(|i| start + i as u64)
        .collect()
}

pub struct SettlementCalculator<'a> {
    reader: &'a dyn ChainDataReader,
    sample_range: SampleRange,
}

impl<'a> SettlementCalculator<'a> {
    pub fn new(reader: &'a dyn ChainDataReader, sample_range: SampleRange) -> Self {
        Self {
            reader,
            sample_range,
        }
    }

    pub async fn calculate<R: Rng + Send>(
        &self,
        category: &str,
        start_block: u64,
        end_block: u64,
        rng: &mut R,
    ) -> Result<CalculationResult, CalculationError> {
        info!(
            "🧮 Calculating result for {} from blocks {} to {}",
            category, start_block, end_block
        );

        let spec = find_category(category)
            .ok_or_else(|| CalculationError::UnknownCategory(category.to_string()))?;

        match spec.strategy {
            Strategy::FullRangeAverage(field) => {
                Ok(self.full_range_average(field, start_block, end_block).await)
            }
            Strategy::SampledSum(field) => {
                let heights = sample_heights(rng, start_block, end_block, self.sample_range);
                Ok(self
                    .sampled_sum(field, start_block, end_block, heights)
                    .await)
            }
            Strategy::PriceSnapshot => self.price_snapshot().await,
        }
    }

    async fn full_range_average(
        &self,
        field: BlockField,
        start_block: u64,
        end_block: u64,
    ) -> CalculationResult {
        let mut total: u128 = 0;
        let mut count: u128 = 0;

        let blocks = self.reader.get_block_range(start_block, end_block).await;
        let mut fetched: HashSet<u64> = HashSet::with_capacity(blocks.len());
        for block in &blocks {
            fetched.insert(block.height);
            if let Some(v) = block.field(field) {
                total = total.saturating_add(v);
                count += 1;
            }
        }

        // Sequential reconciliation of whatever the batch missed
        for height in start_block..=end_block {
            if fetched.contains(&height) {
                continue;
            }
            match self.reader.get_block(height).await {
                Ok(block) => {
                    if let Some(v) = block.field(field) {
                        total = total.saturating_add(v);
                        count += 1;
                    }
                }
                Err(e) => warn!("Could not fetch block {} to fill gap: {:#}", height, e),
            }
        }

        if count == 0 {
            return CalculationResult {
                value: 0,
                sampled_blocks: Vec::new(),
                details: format!(
                    "No blocks found in range {}-{} to calculate average {}.",
                    start_block,
                    end_block,
                    field.as_str()
                ),
            };
        }

        // round half up
        let value = (total + count / 2) / count;
        CalculationResult {
            value,
            sampled_blocks: Vec::new(),
            details: format!(
                "Calculated average {} from {} blocks between {} and {}.",
                field.as_str(),
                count,
                start_block,
                end_block
            ),
        }
    }

    async fn sampled_sum(
        &self,
        field: BlockField,
        start_block: u64,
        end_block: u64,
        heights: Vec<u64>,
    ) -> CalculationResult {
        let batch: HashMap<u64, _> = self
            .reader
            .get_block_range(start_block, end_block)
            .await
            .into_iter()
            .map(|b| (b.height, b))
            .collect();
        if batch.is_empty() && !heights.is_empty() {
            warn!("Sampled block batch fetch returned nothing, falling back to individual requests");
        }

        let mut value: u128 = 0;
        let mut excluded: Vec<u64> = Vec::new();
        for &height in &heights {
            let field_value = match batch.get(&height) {
                Some(block) => block.field(field),
                None => match self.reader.get_block(height).await {
                    Ok(block) => block.field(field),
                    Err(e) => {
                        warn!("Error fetching sampled block {}: {:#}", height, e);
                        excluded.push(height);
                        continue;
                    }
                },
            };
            value = value.saturating_add(field_value.unwrap_or(0));
        }

        let preview: Vec<String> = heights
            .iter()
            .take(DETAILS_PREVIEW_LEN)
            .map(|h| h.to_string())
            .collect();
        let mut details = format!(
            "Summed {} from {} randomly sampled blocks: [{}{}]",
            field.as_str(),
            heights.len(),
            preview.join(", "),
            if heights.len() > DETAILS_PREVIEW_LEN { "..." } else { "" }
        );
        if !excluded.is_empty() {
            details.push_str(&format!(
                "; {} unavailable blocks excluded",
                excluded.len()
            ));
        }
        debug!(
            sampled = heights.len(),
            excluded = excluded.len(),
            value,
            "Sampled sum computed"
        );

        CalculationResult {
            value,
            sampled_blocks: heights,
            details,
        }
    }

    async fn price_snapshot(&self) -> Result<CalculationResult, CalculationError> {
        let price = self
            .reader
            .get_external_price()
            .await
            .map_err(|e| CalculationError::DataUnavailable(format!("{:#}", e)))?;
        if !price.is_finite() || price < 0.0 {
            return Err(CalculationError::DataUnavailable(format!(
                "invalid price {}",
                price
            )));
        }

        let value = (price * 100.0).trunc() as u128;
        Ok(CalculationResult {
            value,
            sampled_blocks: Vec::new(),
            details: format!(
                "Price fetched at settlement time: ${:.2} ({} cents)",
                price, value
            ),
        })
    }
}
