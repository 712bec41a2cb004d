//! In-memory chain used by the integration tests.
//!
//! Contracts are scripted per `(address, selector)`; the storage contract is
//! backed by a key/value table. Logs are filtered the way a node would filter
//! them and every call and log query is recorded.

#![allow(dead_code)]

use async_trait::async_trait;
use ethers::abi::{Abi, Function, Token};
use ethers::types::{
    Address, Bytes, Filter, Log, TransactionReceipt, TxHash, ValueOrArray, H256, U256,
};
use gogopool_sdk::registry::{abi_key, address_key, deploy_block_key, storage_abi};
use gogopool_sdk::transport::{CallOpts, TransactOpts, Transport};
use gogopool_sdk::TransportError;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Responder = Arc<dyn Fn(&[Token]) -> Result<Vec<Token>, String> + Send + Sync>;

pub const STORAGE: Address = Address::repeat_byte(0x5a);

pub fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn function_json(name: &str, inputs: &[&str], outputs: &[&str]) -> Value {
    let params = |types: &[&str]| -> Vec<Value> {
        types
            .iter()
            .enumerate()
            .map(|(i, ty)| json!({"name": format!("arg{}", i), "type": ty}))
            .collect()
    };
    json!({
        "type": "function",
        "name": name,
        "inputs": params(inputs),
        "outputs": params(outputs),
        "stateMutability": "view"
    })
}

/// `inputs` are `(name, type, indexed)`.
pub fn event_json(name: &str, inputs: &[(&str, &str, bool)]) -> Value {
    let params: Vec<Value> = inputs
        .iter()
        .map(|(param, ty, indexed)| json!({"name": param, "type": ty, "indexed": indexed}))
        .collect();
    json!({"type": "event", "name": name, "anonymous": false, "inputs": params})
}

pub fn make_log(address: Address, topics: Vec<H256>, data: Vec<u8>, block: u64, tx_index: u64) -> Log {
    Log {
        address,
        topics,
        data: Bytes::from(data),
        block_number: Some(block.into()),
        transaction_index: Some(tx_index.into()),
        transaction_hash: Some(H256::from_low_u64_be(block * 1_000 + tx_index)),
        ..Default::default()
    }
}

struct Handler {
    function: Function,
    respond: Responder,
}

pub struct MockChain {
    handlers: Mutex<HashMap<(Address, [u8; 4]), Arc<Handler>>>,
    storage_values: Arc<Mutex<HashMap<H256, Token>>>,
    calls: Mutex<HashMap<(Address, String), usize>>,
    failing: Mutex<HashSet<(Address, String)>>,
    logs: Mutex<Vec<Log>>,
    log_queries: Mutex<Vec<Filter>>,
    log_failure_from: Mutex<Option<u64>>,
    head: AtomicU64,
    latency: Mutex<Duration>,
    key_latency: Mutex<HashMap<H256, Duration>>,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        let _ = env_logger::builder().is_test(true).try_init();
        let chain = Arc::new(Self {
            handlers: Mutex::new(HashMap::new()),
            storage_values: Arc::new(Mutex::new(HashMap::new())),
            calls: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            logs: Mutex::new(Vec::new()),
            log_queries: Mutex::new(Vec::new()),
            log_failure_from: Mutex::new(None),
            head: AtomicU64::new(0),
            latency: Mutex::new(Duration::ZERO),
            key_latency: Mutex::new(HashMap::new()),
        });

        let abi = storage_abi();
        for (method, default) in [
            ("getAddress", Token::Address(Address::zero())),
            ("getString", Token::String(String::new())),
            ("getUint", Token::Uint(U256::zero())),
        ] {
            let values = chain.storage_values.clone();
            chain.on_call(STORAGE, &abi, method, move |args| {
                let key = match args.first() {
                    Some(Token::FixedBytes(bytes)) => H256::from_slice(bytes),
                    other => return Err(format!("bad storage key {:?}", other)),
                };
                let values = values.lock().unwrap();
                Ok(vec![values.get(&key).cloned().unwrap_or_else(|| default.clone())])
            });
        }
        chain
    }

    /// Script `method` of the contract at `address`.
    pub fn on_call<F>(&self, address: Address, abi: &Abi, method: &str, respond: F)
    where
        F: Fn(&[Token]) -> Result<Vec<Token>, String> + Send + Sync + 'static,
    {
        let function = abi.function(method).unwrap().clone();
        let selector = function.short_signature();
        self.handlers.lock().unwrap().insert(
            (address, selector),
            Arc::new(Handler {
                function,
                respond: Arc::new(respond),
            }),
        );
    }

    /// Bind `name` to `address` with an ABI made of `items`, returning the ABI.
    pub fn register_contract(&self, name: &str, address: Address, items: Vec<Value>) -> Abi {
        let json = Value::Array(items).to_string();
        let abi: Abi = serde_json::from_str(&json).unwrap();
        let mut values = self.storage_values.lock().unwrap();
        values.insert(address_key(name), Token::Address(address));
        values.insert(abi_key(name), Token::String(json));
        abi
    }

    /// Store only an ABI under `name`, for contracts bound to arbitrary addresses.
    pub fn register_abi(&self, name: &str, items: Vec<Value>) -> Abi {
        let json = Value::Array(items).to_string();
        let abi: Abi = serde_json::from_str(&json).unwrap();
        self.storage_values
            .lock()
            .unwrap()
            .insert(abi_key(name), Token::String(json));
        abi
    }

    pub fn set_deploy_block(&self, block: u64) {
        self.storage_values
            .lock()
            .unwrap()
            .insert(deploy_block_key(), Token::Uint(U256::from(block)));
    }

    pub fn set_head(&self, block: u64) {
        self.head.store(block, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Delay storage reads of `key` only, on top of the global latency.
    pub fn set_storage_latency(&self, key: H256, latency: Duration) {
        self.key_latency.lock().unwrap().insert(key, latency);
    }

    pub fn set_failing(&self, address: Address, method: &str, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert((address, method.to_string()));
        } else {
            set.remove(&(address, method.to_string()));
        }
    }

    /// Fail every log query whose range starts at or after `block`.
    pub fn fail_logs_from(&self, block: Option<u64>) {
        *self.log_failure_from.lock().unwrap() = block;
    }

    pub fn push_log(&self, log: Log) {
        self.logs.lock().unwrap().push(log);
    }

    pub fn call_count(&self, address: Address, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(&(address, method.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn log_queries(&self) -> Vec<Filter> {
        self.log_queries.lock().unwrap().clone()
    }

    fn matches(filter: &Filter, log: &Log) -> bool {
        let block = log.block_number.map(|b| b.as_u64()).unwrap_or(0);
        let from = filter.get_from_block().map(|b| b.as_u64()).unwrap_or(0);
        let to = filter.get_to_block().map(|b| b.as_u64()).unwrap_or(u64::MAX);
        if block < from || block > to {
            return false;
        }
        let address_ok = match &filter.address {
            None => true,
            Some(ValueOrArray::Value(a)) => *a == log.address,
            Some(ValueOrArray::Array(all)) => all.contains(&log.address),
        };
        if !address_ok {
            return false;
        }
        filter.topics.iter().enumerate().all(|(i, topic)| match topic {
            None | Some(ValueOrArray::Value(None)) => true,
            Some(ValueOrArray::Value(Some(h))) => log.topics.get(i) == Some(h),
            Some(ValueOrArray::Array(values)) => values
                .iter()
                .any(|v| v.is_none() || v.as_ref() == log.topics.get(i)),
        })
    }
}

#[async_trait]
impl Transport for MockChain {
    async fn call(&self, to: Address, data: Bytes, _opts: &CallOpts) -> Result<Bytes, TransportError> {
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if data.len() < 4 {
            return Err(TransportError::Other("missing selector".into()));
        }
        let selector: [u8; 4] = data[..4].try_into().unwrap();
        let handler = self
            .handlers
            .lock()
            .unwrap()
            .get(&(to, selector))
            .cloned()
            .ok_or_else(|| TransportError::Other(format!("execution reverted at {:?}", to)))?;

        let key = (to, handler.function.name.clone());
        *self.calls.lock().unwrap().entry(key.clone()).or_insert(0) += 1;
        if self.failing.lock().unwrap().contains(&key) {
            return Err(TransportError::Other(format!("{} failed", key.1)));
        }

        let args = handler
            .function
            .decode_input(&data[4..])
            .map_err(|e| TransportError::Other(e.to_string()))?;
        if to == STORAGE {
            let delay = match args.first() {
                Some(Token::FixedBytes(key)) if key.len() == 32 => {
                    self.key_latency.lock().unwrap().get(&H256::from_slice(key)).copied()
                }
                _ => None,
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
        }
        let output = (handler.respond)(&args).map_err(TransportError::Other)?;
        Ok(Bytes::from(ethers::abi::encode(&output)))
    }

    async fn estimate_gas(&self, _to: Address, _data: Bytes, _opts: &TransactOpts) -> Result<U256, TransportError> {
        Ok(U256::from(21_000))
    }

    async fn send_transaction(&self, _to: Address, data: Bytes, _opts: &TransactOpts) -> Result<TxHash, TransportError> {
        Ok(H256::from(ethers::utils::keccak256(&data)))
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, TransportError> {
        self.log_queries.lock().unwrap().push(filter.clone());
        if let Some(fail_from) = *self.log_failure_from.lock().unwrap() {
            let from = filter.get_from_block().map(|b| b.as_u64()).unwrap_or(0);
            if from >= fail_from {
                return Err(TransportError::Other("query returned more than 10000 results".into()));
            }
        }
        let logs = self.logs.lock().unwrap();
        Ok(logs.iter().filter(|log| Self::matches(filter, log)).cloned().collect())
    }

    async fn block_number(&self) -> Result<u64, TransportError> {
        Ok(self.head.load(Ordering::SeqCst))
    }

    async fn transaction_receipt(&self, _hash: TxHash) -> Result<Option<TransactionReceipt>, TransportError> {
        Ok(None)
    }
}
