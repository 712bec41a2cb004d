//! # Contract Registry
//!
//! Resolves logical contract names (`"gogoNodeManager"`, `"gogoMinipoolManager"`, ...)
//! to live [`Contract`] handles through the protocol's storage contract.
//!
//! ## Caching
//!
//! Three independent TTL tables (address, ABI, handle) keyed by name. A hit
//! within the TTL returns without I/O. On a miss the address and ABI are read
//! concurrently, the handle is built from both, and every table is written
//! before the handle is returned. Failures are never cached.
//!
//! ## Stampede guard
//!
//! Concurrent misses for the same key are collapsed: the first caller fetches,
//! the others wait on a per-key gate and then read the freshly cached value.
//! Hits never touch the gate, and different keys never share one.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let registry = ContractRegistry::connect(&Settings::new()?)?;
//! let node_manager = registry.resolve("gogoNodeManager").await?;
//! let count: U256 = node_manager.call("getNodeCount", (), &CallOpts::default()).await?;
//! ```

use dashmap::DashMap;
use ethers::abi::{parse_abi, Abi};
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use futures::future::try_join_all;
use log::{debug, info};
use once_cell::sync::Lazy;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::batch::BatchFetcher;
use crate::cache::{TtlCache, DEFAULT_TTL};
use crate::contract::{decode_abi, Contract};
use crate::error::{Error, Result};
use crate::settings::Settings;
use crate::transport::{CallOpts, EthersTransport, Transport};
use crate::utils::u256_to_u64;

const ADDRESS_KEY_PREFIX: &[u8] = b"contract.address";
const ABI_KEY_PREFIX: &[u8] = b"contract.abi";
const DEPLOY_BLOCK_KEY: &[u8] = b"deploy.block";

/// Name under which the storage contract itself is exposed.
pub const STORAGE_CONTRACT_NAME: &str = "gogoStorage";

/// Default per-batch concurrency ceiling shared by every fetch.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

static STORAGE_ABI: Lazy<Arc<Abi>> = Lazy::new(|| {
    Arc::new(
        parse_abi(&[
            "function getAddress(bytes32 _key) external view returns (address)",
            "function getBool(bytes32 _key) external view returns (bool)",
            "function getBytes32(bytes32 _key) external view returns (bytes32)",
            "function getString(bytes32 _key) external view returns (string)",
            "function getUint(bytes32 _key) external view returns (uint256)",
            "function getNodeWithdrawalAddress(address _nodeAddress) external view returns (address)",
            "function getNodePendingWithdrawalAddress(address _nodeAddress) external view returns (address)",
            "function setWithdrawalAddress(address _nodeAddress, address _newWithdrawalAddress, bool _confirm) external",
            "function confirmWithdrawalAddress(address _nodeAddress) external",
        ])
        .expect("storage ABI literal is valid"),
    )
});

/// ABI of the storage contract.
pub fn storage_abi() -> Arc<Abi> {
    STORAGE_ABI.clone()
}

/// Storage key for `name` under `prefix`: `keccak256(prefix ++ name)`.
pub fn storage_key(prefix: &[u8], name: &str) -> H256 {
    let mut preimage = Vec::with_capacity(prefix.len() + name.len());
    preimage.extend_from_slice(prefix);
    preimage.extend_from_slice(name.as_bytes());
    H256::from(keccak256(preimage))
}

pub fn address_key(name: &str) -> H256 {
    storage_key(ADDRESS_KEY_PREFIX, name)
}

pub fn abi_key(name: &str) -> H256 {
    storage_key(ABI_KEY_PREFIX, name)
}

pub fn deploy_block_key() -> H256 {
    H256::from(keccak256(DEPLOY_BLOCK_KEY))
}

/// Tuning knobs for a registry.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub cache_ttl: Duration,
    pub max_in_flight: usize,
    pub log_chunk_size: Option<u64>,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_TTL,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            log_chunk_size: None,
        }
    }
}

impl From<&Settings> for RegistryOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            cache_ttl: settings.cache_ttl(),
            max_in_flight: settings.concurrency.max_in_flight,
            log_chunk_size: settings.logs.chunk_size,
        }
    }
}

struct RegistryInner {
    transport: Arc<dyn Transport>,
    storage: Arc<Contract>,
    addresses: TtlCache<Address>,
    abis: TtlCache<Arc<Abi>>,
    contracts: TtlCache<Arc<Contract>>,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
    fetcher: BatchFetcher,
    log_chunk_size: Option<u64>,
}

/// Name → address → ABI → handle resolver with TTL caches.
///
/// Cloning is cheap; clones share caches, the stampede guard and the batch
/// fetcher's concurrency ceiling.
#[derive(Clone)]
pub struct ContractRegistry {
    inner: Arc<RegistryInner>,
}

impl ContractRegistry {
    pub fn new(transport: Arc<dyn Transport>, storage_address: Address) -> Self {
        Self::with_options(transport, storage_address, RegistryOptions::default())
    }

    pub fn with_options(
        transport: Arc<dyn Transport>,
        storage_address: Address,
        options: RegistryOptions,
    ) -> Self {
        let storage = Arc::new(Contract::new(
            STORAGE_CONTRACT_NAME,
            storage_address,
            storage_abi(),
            transport.clone(),
        ));
        Self {
            inner: Arc::new(RegistryInner {
                transport,
                storage,
                addresses: TtlCache::new("address", options.cache_ttl),
                abis: TtlCache::new("abi", options.cache_ttl),
                contracts: TtlCache::new("contract", options.cache_ttl),
                in_flight: DashMap::new(),
                fetcher: BatchFetcher::new(options.max_in_flight),
                log_chunk_size: options.log_chunk_size,
            }),
        }
    }

    /// Build a registry over an HTTP provider described by `settings`.
    pub fn connect(settings: &Settings) -> Result<Self> {
        let storage_address = settings.contracts.storage_address.ok_or_else(|| {
            Error::InvalidInput("contracts.storage_address is not configured".to_string())
        })?;
        let transport = EthersTransport::http(&settings.rpc.http_url)
            .map_err(|e| Error::transport("connect to rpc", e))?;
        info!(
            "Contract registry connected to {} (storage {:?})",
            settings.rpc.http_url, storage_address
        );
        Ok(Self::with_options(
            Arc::new(transport),
            storage_address,
            RegistryOptions::from(settings),
        ))
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Handle on the storage contract itself.
    pub fn storage(&self) -> &Arc<Contract> {
        &self.inner.storage
    }

    pub fn fetcher(&self) -> &BatchFetcher {
        &self.inner.fetcher
    }

    /// Configured default block span for chunked log queries.
    pub fn log_chunk_size(&self) -> Option<u64> {
        self.inner.log_chunk_size
    }

    pub fn cache_ttl(&self) -> Duration {
        self.inner.contracts.ttl()
    }

    /// Resolve `name` to a callable contract handle.
    pub async fn resolve(&self, name: &str) -> Result<Arc<Contract>> {
        let inner = &self.inner;
        self.single_flight(&inner.contracts, "contract", name, || async {
            let (address, abi) = tokio::try_join!(self.get_address(name), self.get_abi(name))?;
            debug!("Resolved contract {} at {:?}", name, address);
            Ok(Arc::new(Contract::new(
                name,
                address,
                abi,
                inner.transport.clone(),
            )))
        })
        .await
    }

    /// Resolve several names concurrently. Output order matches `names`.
    pub async fn resolve_many(&self, names: &[&str]) -> Result<Vec<Arc<Contract>>> {
        try_join_all(names.iter().map(|name| self.resolve(name))).await
    }

    /// Current address bound to `name`.
    pub async fn get_address(&self, name: &str) -> Result<Address> {
        self.single_flight(&self.inner.addresses, "address", name, || async {
            let address: Address = self
                .inner
                .storage
                .call("getAddress", address_key(name), &CallOpts::default())
                .await
                .map_err(|e| {
                    Error::resolution(name, e.context(format!("could not load contract {} address", name)))
                })?;
            if address.is_zero() {
                return Err(Error::resolution(
                    name,
                    Error::decode(
                        format!("could not load contract {} address", name),
                        "name is not registered",
                    ),
                ));
            }
            Ok(address)
        })
        .await
    }

    pub async fn get_addresses(&self, names: &[&str]) -> Result<Vec<Address>> {
        try_join_all(names.iter().map(|name| self.get_address(name))).await
    }

    /// ABI registered for `name`.
    pub async fn get_abi(&self, name: &str) -> Result<Arc<Abi>> {
        self.single_flight(&self.inner.abis, "abi", name, || async {
            let context = format!("could not load contract {} ABI", name);
            let encoded: String = self
                .inner
                .storage
                .call("getString", abi_key(name), &CallOpts::default())
                .await
                .map_err(|e| Error::resolution(name, e.context(context.clone())))?;
            let abi = decode_abi(&encoded).map_err(|e| Error::resolution(name, e.context(context)))?;
            Ok(Arc::new(abi))
        })
        .await
    }

    pub async fn get_abis(&self, names: &[&str]) -> Result<Vec<Arc<Abi>>> {
        try_join_all(names.iter().map(|name| self.get_abi(name))).await
    }

    /// Bind the ABI registered under `abi_name` to an arbitrary address,
    /// e.g. a minipool created by the minipool manager. Not cached.
    pub async fn make_contract(&self, abi_name: &str, address: Address) -> Result<Contract> {
        let abi = self.get_abi(abi_name).await?;
        Ok(Contract::new(
            abi_name,
            address,
            abi,
            self.inner.transport.clone(),
        ))
    }

    /// Block the protocol was deployed at, as recorded in storage.
    pub async fn deploy_block(&self) -> Result<u64> {
        let block: U256 = self
            .inner
            .storage
            .call("getUint", deploy_block_key(), &CallOpts::default())
            .await
            .map_err(|e| e.context("could not get protocol deployment block"))?;
        u256_to_u64(block, "protocol deployment block")
    }

    /// Drop every cached entry for `name`.
    pub fn invalidate(&self, name: &str) {
        self.inner.addresses.remove(name);
        self.inner.abis.remove(name);
        self.inner.contracts.remove(name);
    }

    /// Names with a fill in progress or callers queued behind one.
    pub fn in_flight_len(&self) -> usize {
        self.inner.in_flight.len()
    }

    pub fn clear_caches(&self) {
        self.inner.addresses.clear();
        self.inner.abis.clear();
        self.inner.contracts.clear();
    }

    async fn single_flight<T, F, Fut>(
        &self,
        cache: &TtlCache<T>,
        table: &'static str,
        name: &str,
        fetch: F,
    ) -> Result<T>
    where
        T: Clone,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = cache.get(name) {
            return Ok(value);
        }

        let slot = InFlight::enter(&self.inner.in_flight, format!("{}:{}", table, name));
        let _guard = slot.gate.lock().await;

        // Another caller may have filled the entry while we waited.
        if let Some(value) = cache.get(name) {
            return Ok(value);
        }

        let value = fetch().await?;
        cache.insert(name, value.clone());
        Ok(value)
    }
}

/// Per-key gate held for the duration of one fill. The map entry is removed
/// when its last holder drops, on every exit path.
struct InFlight<'a> {
    map: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
    gate: Arc<Mutex<()>>,
}

impl<'a> InFlight<'a> {
    fn enter(map: &'a DashMap<String, Arc<Mutex<()>>>, key: String) -> Self {
        let gate = map
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        Self { map, key, gate }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        // Two references left means the map and this holder.
        self.map.remove_if(&self.key, |_, gate| {
            Arc::ptr_eq(gate, &self.gate) && Arc::strong_count(gate) == 2
        });
    }
}
