//! EVM betting contract client
//!
//! Calls are encoded against a human-readable ABI and signed with a local
//! key. Writes wait for one confirmation; a receipt with status 0 is a
//! revert.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use ethers::abi::{parse_abi, Abi, Function, Token};
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, TransactionRequest, U256, U64};
use tracing::{debug, info};

use super::{Ledger, LedgerError, LedgerResult, TxReceipt};
use crate::config::AutomationConfig;
use crate::models::{
    AutomationData, BetId, BetInfo, BetStatus, Currency, NewBet, PlayerBet, SettlementAudit,
};

const BETTING_ABI: &[&str] = &[
    "function getActiveBets() external view returns (uint256[])",
    "function getSettledBets() external view returns (uint256[])",
    "function getBetInfo(uint256 betId) external view returns (uint256,string,string,uint8,uint256,uint256,uint8,uint256,bool,uint256,uint256,uint256,uint256)",
    "function getBetAutomationData(uint256 betId) external view returns (uint256,uint256,uint256[],string,bool)",
    "function getBetPlayerBets(uint256 betId) external view returns ((address,uint256,bool)[])",
    "function getBetWinnerIndices(uint256 betId) external view returns (uint256[])",
    "function createBet(string category, string description, uint8 currencyType, uint256 betAmount) external",
    "function createAutomatedBet(string category, string description, uint8 currencyType, uint256 betAmount, uint256 startTime, uint256 endTime, uint256 startBlockHeight, string calculationMethod) external",
    "function settleBet(uint256 betId, uint256 actualValue) external",
    "function settleAutomatedBet(uint256 betId, uint256 actualValue, uint256 endBlockHeight, uint256[] sampledBlocks, string calculationDetails) external",
    "function cancelBet(uint256 betId) external",
    "function claimPrize(uint256 betId) external",
    "function placeBetNative(uint256 betId, uint256 guess) external payable",
    "function placeBetUSDC(uint256 betId, uint256 guess) external",
    "function usdcToken() external view returns (address)",
];

const ERC20_ABI: &[&str] = &["function approve(address spender, uint256 amount) external returns (bool)"];

type Client = SignerMiddleware<Provider<Http>, LocalWallet>;

pub struct ContractLedger {
    client: Arc<Client>,
    address: Address,
    abi: Abi,
    erc20: Abi,
}

impl ContractLedger {
    /// Connect using the signer and contract from config; asks the node for
    /// its chain id.
    pub async fn connect(config: &AutomationConfig) -> Result<Self> {
        let (address, key) = config.require_ledger_credentials()?;
        let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
            .with_context(|| format!("invalid RPC url {}", config.rpc_url))?;
        let chain_id = provider
            .get_chainid()
            .await
            .context("failed to read chain id from RPC")?;
        Self::with_chain_id(&config.rpc_url, address, key, chain_id.as_u64())
    }

    pub fn with_chain_id(rpc_url: &str, address: &str, key: &str, chain_id: u64) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .with_context(|| format!("invalid RPC url {}", rpc_url))?;
        let wallet = key
            .trim()
            .parse::<LocalWallet>()
            .map_err(|e| anyhow!("invalid signer key: {}", e))?
            .with_chain_id(chain_id);
        let address: Address = address
            .trim()
            .parse()
            .with_context(|| format!("invalid contract address {}", address))?;

        info!(
            "🔗 Ledger client for contract {:?} on chain {} (signer {:?})",
            address,
            chain_id,
            wallet.address()
        );

        Ok(Self {
            client: Arc::new(SignerMiddleware::new(provider, wallet)),
            address,
            abi: parse_abi(BETTING_ABI).context("betting ABI")?,
            erc20: parse_abi(ERC20_ABI).context("ERC20 ABI")?,
        })
    }

    pub fn signer_address(&self) -> Address {
        self.client.signer().address()
    }

    pub fn contract_address(&self) -> Address {
        self.address
    }

    fn function(&self, name: &str) -> LedgerResult<&Function> {
        self.abi
            .function(name)
            .map_err(|e| LedgerError::Decode(format!("{}: {}", name, e)))
    }

    async fn call(&self, name: &str, args: &[Token]) -> LedgerResult<Vec<Token>> {
        self.call_at(self.address, self.function(name)?, args).await
    }

    async fn call_at(
        &self,
        to: Address,
        function: &Function,
        args: &[Token],
    ) -> LedgerResult<Vec<Token>> {
        let data = function
            .encode_input(args)
            .map_err(|e| LedgerError::Decode(format!("encode {}: {}", function.name, e)))?;
        let tx = TransactionRequest::new().to(to).data(data);

        let raw = self
            .client
            .call(&tx.into(), None)
            .await
            .map_err(|e| classify(&function.name, e.to_string()))?;

        function
            .decode_output(&raw)
            .map_err(|e| LedgerError::Decode(format!("decode {}: {}", function.name, e)))
    }

    async fn send(&self, name: &str, args: &[Token], value: Option<U256>) -> LedgerResult<TxReceipt> {
        self.send_at(self.address, self.function(name)?, args, value)
            .await
    }

    async fn send_at(
        &self,
        to: Address,
        function: &Function,
        args: &[Token],
        value: Option<U256>,
    ) -> LedgerResult<TxReceipt> {
        let name = function.name.as_str();
        let data = function
            .encode_input(args)
            .map_err(|e| LedgerError::Decode(format!("encode {}: {}", name, e)))?;
        let mut tx = TransactionRequest::new().to(to).data(data);
        if let Some(value) = value {
            tx = tx.value(value);
        }

        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(|e| classify(name, e.to_string()))?;
        let tx_hash = format!("{:?}", pending.tx_hash());
        debug!("📤 {} sent: {}", name, tx_hash);

        let receipt = pending
            .confirmations(1)
            .await
            .map_err(|e| LedgerError::Unconfirmed(format!("{} {}: {}", name, tx_hash, e)))?
            .ok_or_else(|| LedgerError::Unconfirmed(format!("{} {}: dropped", name, tx_hash)))?;

        if receipt.status == Some(U64::zero()) {
            return Err(LedgerError::Reverted {
                reason: format!("{} reverted in {}", name, tx_hash),
            });
        }

        info!("✅ {} confirmed: {}", name, tx_hash);
        Ok(TxReceipt { tx_hash })
    }
}

fn classify(name: &str, message: String) -> LedgerError {
    if message.to_ascii_lowercase().contains("revert") {
        LedgerError::Reverted {
            reason: format!("{}: {}", name, message),
        }
    } else {
        LedgerError::Transport(format!("{}: {}", name, message))
    }
}

fn decode_err(what: &str) -> LedgerError {
    LedgerError::Decode(format!("unexpected {} in contract output", what))
}

fn to_u128(value: U256, what: &str) -> LedgerResult<u128> {
    if value > U256::from(u128::MAX) {
        return Err(LedgerError::Decode(format!("{} {} exceeds u128", what, value)));
    }
    Ok(value.as_u128())
}

fn to_u64(value: U256, what: &str) -> LedgerResult<u64> {
    if value > U256::from(u64::MAX) {
        return Err(LedgerError::Decode(format!("{} {} exceeds u64", what, value)));
    }
    Ok(value.as_u64())
}

fn to_i64(value: U256, what: &str) -> LedgerResult<i64> {
    i64::try_from(to_u64(value, what)?)
        .map_err(|_| LedgerError::Decode(format!("{} {} exceeds i64", what, value)))
}

fn uint(token: Option<Token>, what: &str) -> LedgerResult<U256> {
    token.and_then(Token::into_uint).ok_or_else(|| decode_err(what))
}

fn string(token: Option<Token>, what: &str) -> LedgerResult<String> {
    token.and_then(Token::into_string).ok_or_else(|| decode_err(what))
}

fn boolean(token: Option<Token>, what: &str) -> LedgerResult<bool> {
    token.and_then(Token::into_bool).ok_or_else(|| decode_err(what))
}

fn uint_array(token: Option<Token>, what: &str) -> LedgerResult<Vec<U256>> {
    token
        .and_then(Token::into_array)
        .ok_or_else(|| decode_err(what))?
        .into_iter()
        .map(|t| t.into_uint().ok_or_else(|| decode_err(what)))
        .collect()
}

fn ids(tokens: Vec<Token>) -> LedgerResult<Vec<BetId>> {
    uint_array(tokens.into_iter().next(), "bet id list")?
        .into_iter()
        .map(|v| to_u64(v, "bet id"))
        .collect()
}

fn decode_bet_info(tokens: Vec<Token>) -> LedgerResult<BetInfo> {
    let mut it = tokens.into_iter();
    let id = to_u64(uint(it.next(), "id")?, "id")?;
    let category = string(it.next(), "category")?;
    let description = string(it.next(), "description")?;
    let currency_raw = to_u64(uint(it.next(), "currency")?, "currency")?;
    let currency = u8::try_from(currency_raw)
        .ok()
        .and_then(Currency::from_u8)
        .ok_or_else(|| LedgerError::Decode(format!("unknown currency type {}", currency_raw)))?;
    let bet_amount = to_u128(uint(it.next(), "betAmount")?, "betAmount")?;
    let actual_value = to_u128(uint(it.next(), "actualValue")?, "actualValue")?;
    let status_raw = to_u64(uint(it.next(), "status")?, "status")?;
    let status = u8::try_from(status_raw)
        .ok()
        .and_then(BetStatus::from_u8)
        .ok_or_else(|| LedgerError::Decode(format!("unknown bet status {}", status_raw)))?;
    let total_pot = to_u128(uint(it.next(), "totalPot")?, "totalPot")?;
    let refund_mode = boolean(it.next(), "refundMode")?;
    let player_bet_count = to_u64(uint(it.next(), "playerBetCount")?, "playerBetCount")? as usize;
    let created_at = to_i64(uint(it.next(), "createdAt")?, "createdAt")?;
    let start_time = to_i64(uint(it.next(), "startTime")?, "startTime")?;
    let end_time = to_i64(uint(it.next(), "endTime")?, "endTime")?;

    Ok(BetInfo {
        id,
        category,
        description,
        currency,
        bet_amount,
        actual_value,
        status,
        total_pot,
        refund_mode,
        player_bet_count,
        created_at,
        start_time,
        end_time,
    })
}

fn decode_automation(tokens: Vec<Token>) -> LedgerResult<AutomationData> {
    let mut it = tokens.into_iter();
    let start_block_height = to_u64(uint(it.next(), "startBlockHeight")?, "startBlockHeight")?;
    let end_block_height = to_u64(uint(it.next(), "endBlockHeight")?, "endBlockHeight")?;
    let sampled_blocks = uint_array(it.next(), "sampledBlocks")?
        .into_iter()
        .map(|v| to_u64(v, "sampled block"))
        .collect::<LedgerResult<Vec<_>>>()?;
    let calculation_method = string(it.next(), "calculationMethod")?;
    let is_automated = boolean(it.next(), "isAutomated")?;

    Ok(AutomationData {
        start_block_height,
        end_block_height,
        sampled_blocks,
        calculation_method,
        calculation_details: String::new(),
        is_automated,
    })
}

fn decode_player_bets(tokens: Vec<Token>) -> LedgerResult<Vec<PlayerBet>> {
    tokens
        .into_iter()
        .next()
        .and_then(Token::into_array)
        .ok_or_else(|| decode_err("player bet list"))?
        .into_iter()
        .map(|entry| {
            let mut fields = entry
                .into_tuple()
                .ok_or_else(|| decode_err("player bet"))?
                .into_iter();
            let player = fields
                .next()
                .and_then(Token::into_address)
                .ok_or_else(|| decode_err("player"))?;
            let guess = to_u128(uint(fields.next(), "guess")?, "guess")?;
            let claimed = boolean(fields.next(), "claimed")?;
            Ok(PlayerBet {
                player,
                guess,
                claimed,
            })
        })
        .collect()
}

#[async_trait::async_trait]
impl Ledger for ContractLedger {
    async fn active_bets(&self) -> LedgerResult<Vec<BetId>> {
        ids(self.call("getActiveBets", &[]).await?)
    }

    async fn settled_bets(&self) -> LedgerResult<Vec<BetId>> {
        ids(self.call("getSettledBets", &[]).await?)
    }

    async fn bet_info(&self, bet_id: BetId) -> LedgerResult<BetInfo> {
        let info = decode_bet_info(
            self.call("getBetInfo", &[Token::Uint(U256::from(bet_id))])
                .await?,
        )?;
        // The contract returns a zeroed struct for unknown ids
        if info.id != bet_id {
            return Err(LedgerError::NotFound(bet_id));
        }
        Ok(info)
    }

    async fn automation_data(&self, bet_id: BetId) -> LedgerResult<AutomationData> {
        decode_automation(
            self.call("getBetAutomationData", &[Token::Uint(U256::from(bet_id))])
                .await?,
        )
    }

    async fn bet_players(&self, bet_id: BetId) -> LedgerResult<Vec<PlayerBet>> {
        decode_player_bets(
            self.call("getBetPlayerBets", &[Token::Uint(U256::from(bet_id))])
                .await?,
        )
    }

    async fn winner_indices(&self, bet_id: BetId) -> LedgerResult<Vec<usize>> {
        uint_array(
            self.call("getBetWinnerIndices", &[Token::Uint(U256::from(bet_id))])
                .await?
                .into_iter()
                .next(),
            "winner indices",
        )?
        .into_iter()
        .map(|v| to_u64(v, "winner index").map(|i| i as usize))
        .collect()
    }

    async fn create_bet(&self, bet: NewBet) -> LedgerResult<TxReceipt> {
        let base = [
            Token::String(bet.category),
            Token::String(bet.description),
            Token::Uint(U256::from(bet.currency.as_u8())),
            Token::Uint(U256::from(bet.bet_amount)),
        ];
        match bet.automation {
            Some(seed) => {
                let mut args = base.to_vec();
                args.extend([
                    Token::Uint(U256::from(bet.start_time.max(0) as u64)),
                    Token::Uint(U256::from(bet.end_time.max(0) as u64)),
                    Token::Uint(U256::from(seed.start_block_height)),
                    Token::String(seed.calculation_method),
                ]);
                self.send("createAutomatedBet", &args, None).await
            }
            None => self.send("createBet", &base, None).await,
        }
    }

    async fn settle_bet(
        &self,
        bet_id: BetId,
        actual_value: u128,
        audit: Option<SettlementAudit>,
    ) -> LedgerResult<TxReceipt> {
        let id = Token::Uint(U256::from(bet_id));
        let value = Token::Uint(U256::from(actual_value));
        match audit {
            Some(audit) => {
                let sampled = audit
                    .sampled_blocks
                    .iter()
                    .map(|h| Token::Uint(U256::from(*h)))
                    .collect();
                self.send(
                    "settleAutomatedBet",
                    &[
                        id,
                        value,
                        Token::Uint(U256::from(audit.end_block_height)),
                        Token::Array(sampled),
                        Token::String(audit.details),
                    ],
                    None,
                )
                .await
            }
            None => self.send("settleBet", &[id, value], None).await,
        }
    }

    async fn cancel_bet(&self, bet_id: BetId) -> LedgerResult<TxReceipt> {
        self.send("cancelBet", &[Token::Uint(U256::from(bet_id))], None)
            .await
    }

    async fn claim_prize(&self, bet_id: BetId) -> LedgerResult<TxReceipt> {
        self.send("claimPrize", &[Token::Uint(U256::from(bet_id))], None)
            .await
    }

    async fn place_bet(&self, bet_id: BetId, guess: u128) -> LedgerResult<TxReceipt> {
        let info = self.bet_info(bet_id).await?;
        let args = [
            Token::Uint(U256::from(bet_id)),
            Token::Uint(U256::from(guess)),
        ];
        let stake = U256::from(info.bet_amount);

        match info.currency {
            Currency::Native => self.send("placeBetNative", &args, Some(stake)).await,
            Currency::Stable => {
                let token = self
                    .call("usdcToken", &[])
                    .await?
                    .into_iter()
                    .next()
                    .and_then(Token::into_address)
                    .ok_or_else(|| decode_err("stable token address"))?;
                let approve = self
                    .erc20
                    .function("approve")
                    .map_err(|e| LedgerError::Decode(format!("approve: {}", e)))?;
                self.send_at(
                    token,
                    approve,
                    &[Token::Address(self.address), Token::Uint(stake)],
                    None,
                )
                .await?;
                self.send("placeBetUSDC", &args, None).await
            }
        }
    }
}
