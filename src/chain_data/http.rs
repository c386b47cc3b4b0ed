//! Explorer + price API client
//!
//! Blocks come from a Blockscout-style REST API (`/blocks/{height}` and
//! `/blocks?type=block`); the price from a CoinGecko-style `simple/price`
//! endpoint.

use std::{collections::HashMap, time::Duration};

use anyhow::{anyhow, Context, Result};
use futures_util::stream::{self, StreamExt};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::{Block, ChainDataReader};
use crate::config::AutomationConfig;

#[derive(Debug, Deserialize)]
struct ExplorerBlock {
    height: u64,
    #[serde(default)]
    base_fee_per_gas: Option<String>,
    #[serde(default)]
    gas_used: Option<String>,
    #[serde(default)]
    burnt_fees: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExplorerBlockPage {
    #[serde(default)]
    items: Vec<ExplorerBlock>,
}

fn parse_amount(raw: Option<String>, field: &str, height: u64) -> Result<Option<u128>> {
    match raw {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => s
            .trim()
            .parse::<u128>()
            .map(Some)
            .with_context(|| format!("block {}: invalid {} {:?}", height, field, s)),
    }
}

impl TryFrom<ExplorerBlock> for Block {
    type Error = anyhow::Error;

    fn try_from(raw: ExplorerBlock) -> Result<Self> {
        let height = raw.height;
        Ok(Block {
            height,
            base_fee_per_gas: parse_amount(raw.base_fee_per_gas, "base_fee_per_gas", height)?,
            gas_used: parse_amount(raw.gas_used, "gas_used", height)?,
            burnt_fees: parse_amount(raw.burnt_fees, "burnt_fees", height)?,
        })
    }
}

#[derive(Clone)]
pub struct HttpChainReader {
    client: Client,
    blocks_url: String,
    price_url: String,
    price_asset_id: String,
    price_quote: String,
    concurrency: usize,
}

impl HttpChainReader {
    pub fn new(
        explorer_api_url: &str,
        price_api_url: &str,
        price_asset_id: &str,
        price_quote: &str,
        timeout: Duration,
        concurrency: usize,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(concurrency.max(1))
            .build()
            .context("Failed to build chain data HTTP client")?;

        Ok(Self {
            client,
            blocks_url: format!("{}/blocks", explorer_api_url.trim_end_matches('/')),
            price_url: price_api_url.to_string(),
            price_asset_id: price_asset_id.to_string(),
            price_quote: price_quote.to_string(),
            concurrency: concurrency.clamp(1, 64),
        })
    }

    pub fn from_config(config: &AutomationConfig) -> Result<Self> {
        Self::new(
            &config.explorer_api_url,
            &config.price_api_url,
            &config.price_asset_id,
            &config.price_quote,
            config.http_timeout(),
            config.block_fetch_concurrency,
        )
    }
}

#[async_trait::async_trait]
impl ChainDataReader for HttpChainReader {
    async fn get_block(&self, height: u64) -> Result<Block> {
        let url = format!("{}/{}", self.blocks_url, height);
        debug!("Fetching block {} from {}", height, url);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET block {} failed", height))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(anyhow!("block {} not found", height));
        }
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("GET block {} {}: {}", height, status, text));
        }

        let raw = resp
            .json::<ExplorerBlock>()
            .await
            .with_context(|| format!("failed to parse block {}", height))?;
        Block::try_from(raw)
    }

    async fn get_block_range(&self, lo: u64, hi: u64) -> Vec<Block> {
        if lo > hi {
            return Vec::new();
        }

        let results: Vec<(u64, Result<Block>)> = stream::iter(lo..=hi)
            .map(|height| async move { (height, self.get_block(height).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut blocks = Vec::with_capacity(results.len());
        let mut failed = 0usize;
        for (height, res) in results {
            match res {
                Ok(block) => blocks.push(block),
                Err(e) => {
                    failed += 1;
                    warn!("range fetch: block {} unavailable: {:#}", height, e);
                }
            }
        }
        blocks.sort_by_key(|b| b.height);

        debug!(
            "Fetched {} blocks in range {}-{} ({} failed)",
            blocks.len(),
            lo,
            hi,
            failed
        );
        blocks
    }

    async fn get_latest_height(&self) -> Result<u64> {
        let resp = self
            .client
            .get(&self.blocks_url)
            .query(&[("type", "block")])
            .send()
            .await
            .context("GET latest blocks failed")?;

        if !resp.status().is_success() {
            return Err(anyhow!("GET latest blocks {}", resp.status()));
        }

        let page = resp
            .json::<ExplorerBlockPage>()
            .await
            .context("failed to parse latest blocks")?;

        page.items
            .iter()
            .map(|b| b.height)
            .max()
            .ok_or_else(|| anyhow!("no blocks available"))
    }

    async fn get_external_price(&self) -> Result<f64> {
        let resp = self
            .client
            .get(&self.price_url)
            .query(&[
                ("ids", self.price_asset_id.as_str()),
                ("vs_currencies", self.price_quote.as_str()),
            ])
            .send()
            .await
            .context("GET price failed")?;

        if !resp.status().is_success() {
            return Err(anyhow!("GET price {}", resp.status()));
        }

        let body = resp
            .json::<HashMap<String, HashMap<String, f64>>>()
            .await
            .context("failed to parse price response")?;

        let price = body
            .get(&self.price_asset_id)
            .and_then(|quotes| quotes.get(&self.price_quote))
            .copied()
            .ok_or_else(|| {
                anyhow!(
                    "price response missing {}/{}",
                    self.price_asset_id,
                    self.price_quote
                )
            })?;

        if !price.is_finite() || price < 0.0 {
            return Err(anyhow!("invalid price {}", price));
        }
        Ok(price)
    }
}
