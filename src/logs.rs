//! # Event Log Retriever
//!
//! Range-bounded `eth_getLogs` queries, optionally split into fixed-size block
//! windows that are requested one after another and concatenated in chain
//! order. Windows are inclusive and never overlap, so a log on a window
//! boundary is returned exactly once.
//!
//! [`filter_contract_logs`] widens a query to every address a contract name has
//! ever been bound to, using the upgrade contract's `ContractUpgraded` history.

use ethers::types::{Address, Filter, Log, ValueOrArray, H256};
use tracing::{debug, info_span, Instrument};

use crate::error::{Error, Result};
use crate::metrics;
use crate::registry::ContractRegistry;
use crate::utils::{create_block_chunks, string_topic, topic_at, topic_to_address};

/// Contract that records upgrades of named contracts.
pub const UPGRADE_CONTRACT: &str = "gogoDAONodeTrustedUpgrade";
pub const CONTRACT_UPGRADED_EVENT: &str = "ContractUpgraded";

/// Log filter parameters.
///
/// `topics[i]` is the set of accepted values at topic position `i`; an empty
/// set is a wildcard.
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    pub addresses: Vec<Address>,
    pub topics: Vec<Vec<H256>>,
    /// Defaults to the protocol deployment block.
    pub from_block: Option<u64>,
    /// Defaults to latest (the chain head when chunking).
    pub to_block: Option<u64>,
    /// Exact block filter; takes precedence over the range.
    pub block_hash: Option<H256>,
    /// Window size; `None` issues a single unbounded query.
    pub chunk_size: Option<u64>,
}

impl LogQuery {
    pub fn new(addresses: Vec<Address>) -> Self {
        Self {
            addresses,
            ..Default::default()
        }
    }

    pub fn topics(mut self, topics: Vec<Vec<H256>>) -> Self {
        self.topics = topics;
        self
    }

    pub fn from_block(mut self, block: u64) -> Self {
        self.from_block = Some(block);
        self
    }

    pub fn to_block(mut self, block: u64) -> Self {
        self.to_block = Some(block);
        self
    }

    pub fn block_hash(mut self, hash: H256) -> Self {
        self.block_hash = Some(hash);
        self
    }

    pub fn chunk_size(mut self, size: Option<u64>) -> Self {
        self.chunk_size = size;
        self
    }

    fn filter(&self, from_block: Option<u64>, to_block: Option<u64>) -> Filter {
        let mut filter = Filter::new();
        match self.block_hash {
            Some(hash) => filter = filter.at_block_hash(hash),
            None => {
                if let Some(from) = from_block {
                    filter = filter.from_block(from);
                }
                if let Some(to) = to_block {
                    filter = filter.to_block(to);
                }
            }
        }
        if !self.addresses.is_empty() {
            filter = filter.address(self.addresses.clone());
        }
        for (position, values) in self.topics.iter().take(4).enumerate() {
            if values.is_empty() {
                continue;
            }
            filter.topics[position] = Some(ValueOrArray::Array(
                values.iter().copied().map(Some).collect(),
            ));
        }
        filter
    }
}

/// Run `query`, chunking the block range when `chunk_size` is set.
pub async fn get_logs(registry: &ContractRegistry, query: &LogQuery) -> Result<Vec<Log>> {
    if query.chunk_size == Some(0) {
        return Err(Error::InvalidInput("log chunk size must be > 0".to_string()));
    }
    let transport = registry.transport();

    if query.block_hash.is_some() {
        let filter = query.filter(None, None);
        return transport
            .get_logs(&filter)
            .await
            .map_err(|e| Error::transport("get logs by block hash", e));
    }

    let from_block = match query.from_block {
        Some(block) => block,
        None => registry.deploy_block().await?,
    };

    let chunk_size = match query.chunk_size {
        Some(size) => size,
        None => {
            return transport
                .get_logs(&query.filter(Some(from_block), query.to_block))
                .await
                .map_err(|e| Error::transport(format!("get logs from block {}", from_block), e));
        }
    };

    let to_block = match query.to_block {
        Some(block) => block,
        None => transport
            .block_number()
            .await
            .map_err(|e| Error::transport("get latest block number", e))?,
    };

    let chunks = create_block_chunks(from_block, to_block, chunk_size);
    metrics::record_log_chunks(chunks.len() as f64);

    let span = info_span!("get_logs", from_block, to_block, chunk_size, chunks = chunks.len());
    async move {
        let mut logs = Vec::new();
        for (start, end) in chunks {
            let mut chunk_logs = transport
                .get_logs(&query.filter(Some(start), Some(end)))
                .await
                .map_err(|e| Error::transport(format!("get logs for blocks {}-{}", start, end), e))?;
            debug!(start, end, found = chunk_logs.len(), "log window done");
            logs.append(&mut chunk_logs);
        }
        Ok(logs)
    }
    .instrument(span)
    .await
}

/// Every address `contract_name` has been deployed at, oldest first, ending
/// with the current one.
pub async fn contract_address_history(
    registry: &ContractRegistry,
    contract_name: &str,
    chunk_size: Option<u64>,
) -> Result<Vec<Address>> {
    let (upgrade, current) = tokio::try_join!(
        registry.resolve(UPGRADE_CONTRACT),
        registry.get_address(contract_name)
    )?;
    let upgraded = upgrade.event_signature(CONTRACT_UPGRADED_EVENT)?;

    let history = LogQuery::new(vec![upgrade.address()])
        .topics(vec![vec![upgraded], vec![string_topic(contract_name)]])
        .chunk_size(chunk_size);
    let upgrades = get_logs(registry, &history).await?;

    let mut addresses = Vec::with_capacity(upgrades.len() + 1);
    for log in &upgrades {
        let old = topic_at(&log.topics, 2, "decode ContractUpgraded log")?;
        addresses.push(topic_to_address(&old));
    }
    addresses.push(current);
    Ok(addresses)
}

/// Run `query` against every historical and the current address of
/// `contract_name`. Any addresses already on `query` are replaced.
pub async fn filter_contract_logs(
    registry: &ContractRegistry,
    contract_name: &str,
    query: &LogQuery,
) -> Result<Vec<Log>> {
    let addresses = contract_address_history(registry, contract_name, query.chunk_size).await?;
    debug!(contract = contract_name, addresses = addresses.len(), "querying upgraded contract logs");
    let widened = LogQuery {
        addresses,
        ..query.clone()
    };
    get_logs(registry, &widened).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::{BlockNumber, FilterBlockOption};

    #[test]
    fn test_filter_sets_range_addresses_and_topics() {
        let address: Address = "0x0000000000000000000000000000000000000abc".parse().unwrap();
        let sig = H256::repeat_byte(1);
        let query = LogQuery::new(vec![address]).topics(vec![vec![sig], vec![]]);
        let filter = query.filter(Some(10), Some(20));

        assert_eq!(filter.get_from_block().map(|b| b.as_u64()), Some(10));
        assert_eq!(filter.get_to_block().map(|b| b.as_u64()), Some(20));
        assert_eq!(filter.address, Some(ValueOrArray::Array(vec![address])));
        assert_eq!(filter.topics[0], Some(ValueOrArray::Array(vec![Some(sig)])));
        assert_eq!(filter.topics[1], None);
    }

    #[test]
    fn test_block_hash_overrides_range() {
        let hash = H256::repeat_byte(9);
        let filter = LogQuery::default().block_hash(hash).filter(Some(1), Some(2));
        assert_eq!(filter.block_option, FilterBlockOption::AtBlockHash(hash));
    }

    #[test]
    fn test_open_ended_range() {
        let filter = LogQuery::default().filter(Some(5), None);
        match filter.block_option {
            FilterBlockOption::Range { from_block, to_block } => {
                assert_eq!(from_block, Some(BlockNumber::Number(5u64.into())));
                assert_eq!(to_block, None);
            }
            other => panic!("unexpected block option {:?}", other),
        }
    }
}
