//! # Contract handle
//!
//! A resolved `{name, address, ABI, transport}` bundle. Handles are immutable and
//! shared as `Arc<Contract>`; the registry replaces them wholesale when the
//! cache entry expires.

use base64::Engine;
use ethers::abi::{Abi, Detokenize, Event, RawLog, Token, Tokenize};
use ethers::types::{Address, Bytes, Log, TxHash, H256, U256};
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::transport::{CallOpts, TransactOpts, Transport};
use crate::utils::u256_to_u64;

pub struct Contract {
    name: String,
    address: Address,
    abi: Arc<Abi>,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contract")
            .field("name", &self.name)
            .field("address", &self.address)
            .finish()
    }
}

impl Contract {
    pub fn new(
        name: impl Into<String>,
        address: Address,
        abi: Arc<Abi>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            name: name.into(),
            address,
            abi,
            transport,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn abi(&self) -> &Arc<Abi> {
        &self.abi
    }

    /// ABI-encode a call to `method` with `args`.
    pub fn encode_call<T: Tokenize>(&self, method: &str, args: T) -> Result<Bytes> {
        let function = self.abi.function(method).map_err(|_| {
            Error::InvalidInput(format!("contract {} has no method {}", self.name, method))
        })?;
        let data = function
            .encode_input(&args.into_tokens())
            .map_err(|e| Error::InvalidInput(format!("{}.{} arguments: {}", self.name, method, e)))?;
        Ok(Bytes::from(data))
    }

    /// Call `method` and return the decoded output tokens.
    pub async fn call_tokens<T: Tokenize>(
        &self,
        method: &str,
        args: T,
        opts: &CallOpts,
    ) -> Result<Vec<Token>> {
        let data = self.encode_call(method, args)?;
        let context = format!("call {}.{}", self.name, method);
        let raw = self
            .transport
            .call(self.address, data, opts)
            .await
            .map_err(|e| Error::transport(context.clone(), e))?;
        // Encoding already proved the method exists.
        let function = self.abi.function(method)?;
        function
            .decode_output(&raw)
            .map_err(|e| Error::decode(context, e))
    }

    /// Call `method` and decode the output into `D`.
    pub async fn call<D: Detokenize, T: Tokenize>(
        &self,
        method: &str,
        args: T,
        opts: &CallOpts,
    ) -> Result<D> {
        let tokens = self.call_tokens(method, args, opts).await?;
        D::from_tokens(tokens)
            .map_err(|e| Error::decode(format!("call {}.{}", self.name, method), e.0))
    }

    /// Call a `uint256` getter and narrow the result to `u64`.
    pub async fn call_u64<T: Tokenize>(&self, method: &str, args: T, opts: &CallOpts) -> Result<u64> {
        let value: U256 = self.call(method, args, opts).await?;
        u256_to_u64(value, &format!("call {}.{}", self.name, method))
    }

    /// Submit a transaction calling `method`. Returns the transaction hash.
    pub async fn transact<T: Tokenize>(
        &self,
        method: &str,
        args: T,
        opts: &TransactOpts,
    ) -> Result<TxHash> {
        let data = self.encode_call(method, args)?;
        self.transport
            .send_transaction(self.address, data, opts)
            .await
            .map_err(|e| Error::transport(format!("transact {}.{}", self.name, method), e))
    }

    /// Estimate the gas limit of a `method` transaction.
    pub async fn estimate_gas<T: Tokenize>(
        &self,
        method: &str,
        args: T,
        opts: &TransactOpts,
    ) -> Result<U256> {
        let data = self.encode_call(method, args)?;
        self.transport
            .estimate_gas(self.address, data, opts)
            .await
            .map_err(|e| Error::transport(format!("estimate gas {}.{}", self.name, method), e))
    }

    pub fn event(&self, name: &str) -> Result<&Event> {
        self.abi
            .event(name)
            .map_err(|_| Error::InvalidInput(format!("contract {} has no event {}", self.name, name)))
    }

    /// Topic 0 of `name`.
    pub fn event_signature(&self, name: &str) -> Result<H256> {
        Ok(self.event(name)?.signature())
    }

    /// Decode `log` as an instance of event `name`.
    pub fn decode_log(&self, name: &str, log: &Log) -> Result<ethers::abi::Log> {
        let event = self.event(name)?;
        event
            .parse_log(RawLog {
                topics: log.topics.clone(),
                data: log.data.to_vec(),
            })
            .map_err(|e| Error::decode(format!("decode {}.{} log", self.name, name), e))
    }
}

/// Fetch a named parameter from a decoded log.
pub fn log_param(log: &ethers::abi::Log, name: &str) -> Result<Token> {
    log.params
        .iter()
        .find(|p| p.name == name)
        .map(|p| p.value.clone())
        .ok_or_else(|| Error::decode("decode log", format!("missing parameter {}", name)))
}

/// Parse an ABI as stored in the storage contract: plain JSON or base64-encoded JSON.
pub fn decode_abi(raw: &str) -> Result<Abi> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::decode("decode abi", "empty abi"));
    }
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed).map_err(|e| Error::decode("decode abi", e));
    }
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(trimmed)
        .map_err(|e| Error::decode("decode abi", e))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::decode("decode abi", e))
}
