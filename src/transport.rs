//! # Transport
//!
//! The only wire-level boundary of the SDK. Everything that touches the node goes
//! through the [`Transport`] trait: read calls, transaction submission, gas
//! estimation, log queries, chain head and receipts. ABI encoding and signing
//! stay with ethers; this module only moves bytes.
//!
//! [`EthersTransport`] adapts any ethers [`Middleware`] (plain HTTP provider,
//! signer middleware, ...) to the trait.

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::types::transaction::eip2718::TypedTransaction;
use log::debug;
use std::sync::Arc;
use std::time::Instant;

use crate::error::TransportError;
use crate::metrics;

/// Options for read-only calls.
#[derive(Debug, Clone, Default)]
pub struct CallOpts {
    /// Block to execute the call against; `None` means latest.
    pub block: Option<BlockId>,
    /// Optional `msg.sender` for the call.
    pub from: Option<Address>,
}

impl CallOpts {
    pub fn at_block(block: u64) -> Self {
        Self {
            block: Some(BlockId::Number(BlockNumber::Number(block.into()))),
            from: None,
        }
    }
}

/// Options for state-changing transactions.
#[derive(Debug, Clone, Default)]
pub struct TransactOpts {
    pub from: Option<Address>,
    pub value: Option<U256>,
    pub gas: Option<U256>,
    pub gas_price: Option<U256>,
    pub nonce: Option<U256>,
}

/// RPC transport consumed by the SDK.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute a read-only call and return the raw ABI-encoded result.
    async fn call(&self, to: Address, data: Bytes, opts: &CallOpts) -> Result<Bytes, TransportError>;

    /// Estimate the gas a transaction would consume.
    async fn estimate_gas(
        &self,
        to: Address,
        data: Bytes,
        opts: &TransactOpts,
    ) -> Result<U256, TransportError>;

    /// Submit a transaction and return its hash without waiting for it to be mined.
    async fn send_transaction(
        &self,
        to: Address,
        data: Bytes,
        opts: &TransactOpts,
    ) -> Result<TxHash, TransportError>;

    /// Run a log filter. Logs come back in chain order.
    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, TransportError>;

    /// Current chain head.
    async fn block_number(&self) -> Result<u64, TransportError>;

    /// Receipt of a mined transaction, `None` while pending.
    async fn transaction_receipt(
        &self,
        hash: TxHash,
    ) -> Result<Option<TransactionReceipt>, TransportError>;
}

/// [`Transport`] over an ethers middleware.
#[derive(Clone)]
pub struct EthersTransport<M: Middleware> {
    provider: Arc<M>,
}

impl<M: Middleware + 'static> EthersTransport<M> {
    pub fn new(provider: Arc<M>) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &Arc<M> {
        &self.provider
    }
}

impl EthersTransport<Provider<Http>> {
    /// Build a transport over a plain HTTP provider.
    pub fn http(url: &str) -> Result<Self, TransportError> {
        let provider = Provider::<Http>::try_from(url)
            .map_err(|e| TransportError::Other(format!("invalid rpc url {}: {}", url, e)))?;
        Ok(Self::new(Arc::new(provider)))
    }
}

fn rpc_err<E: std::fmt::Display>(err: E) -> TransportError {
    TransportError::Rpc(err.to_string())
}

fn build_tx(to: Address, data: Bytes, opts: &TransactOpts) -> TypedTransaction {
    let mut request = TransactionRequest::new().to(to).data(data);
    if let Some(from) = opts.from {
        request = request.from(from);
    }
    if let Some(value) = opts.value {
        request = request.value(value);
    }
    if let Some(gas) = opts.gas {
        request = request.gas(gas);
    }
    if let Some(gas_price) = opts.gas_price {
        request = request.gas_price(gas_price);
    }
    if let Some(nonce) = opts.nonce {
        request = request.nonce(nonce);
    }
    request.into()
}

#[async_trait]
impl<M: Middleware + 'static> Transport for EthersTransport<M> {
    async fn call(&self, to: Address, data: Bytes, opts: &CallOpts) -> Result<Bytes, TransportError> {
        let start = Instant::now();
        let mut request = TransactionRequest::new().to(to).data(data);
        if let Some(from) = opts.from {
            request = request.from(from);
        }
        let tx: TypedTransaction = request.into();
        let result = self.provider.call(&tx, opts.block).await.map_err(rpc_err);
        metrics::record_rpc_call("eth_call", start.elapsed(), result.is_ok());
        result
    }

    async fn estimate_gas(
        &self,
        to: Address,
        data: Bytes,
        opts: &TransactOpts,
    ) -> Result<U256, TransportError> {
        let start = Instant::now();
        let tx = build_tx(to, data, opts);
        let result = self.provider.estimate_gas(&tx, None).await.map_err(rpc_err);
        metrics::record_rpc_call("eth_estimateGas", start.elapsed(), result.is_ok());
        result
    }

    async fn send_transaction(
        &self,
        to: Address,
        data: Bytes,
        opts: &TransactOpts,
    ) -> Result<TxHash, TransportError> {
        let start = Instant::now();
        let tx = build_tx(to, data, opts);
        let result = match self.provider.send_transaction(tx, None).await {
            Ok(pending) => Ok(pending.tx_hash()),
            Err(e) => Err(rpc_err(e)),
        };
        metrics::record_rpc_call("eth_sendTransaction", start.elapsed(), result.is_ok());
        if let Ok(hash) = &result {
            debug!("Submitted transaction {:?} to {:?}", hash, to);
        }
        result
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, TransportError> {
        let start = Instant::now();
        let result = self.provider.get_logs(filter).await.map_err(rpc_err);
        metrics::record_rpc_call("eth_getLogs", start.elapsed(), result.is_ok());
        result
    }

    async fn block_number(&self) -> Result<u64, TransportError> {
        let start = Instant::now();
        let result = self
            .provider
            .get_block_number()
            .await
            .map(|n| n.as_u64())
            .map_err(rpc_err);
        metrics::record_rpc_call("eth_blockNumber", start.elapsed(), result.is_ok());
        result
    }

    async fn transaction_receipt(
        &self,
        hash: TxHash,
    ) -> Result<Option<TransactionReceipt>, TransportError> {
        let start = Instant::now();
        let result = self
            .provider
            .get_transaction_receipt(hash)
            .await
            .map_err(rpc_err);
        metrics::record_rpc_call("eth_getTransactionReceipt", start.elapsed(), result.is_ok());
        result
    }
}
