//! Registered node operators.

use ethers::types::{Address, TxHash, U256};
use serde::{Deserialize, Serialize};

use crate::contract::Contract;
use crate::error::{Error, Result};
use crate::registry::ContractRegistry;
use crate::transport::{CallOpts, TransactOpts};

pub const NODE_MANAGER: &str = "gogoNodeManager";

pub const NODE_ADDRESS_BATCH_SIZE: u64 = 50;
pub const NODE_DETAILS_BATCH_SIZE: u64 = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDetails {
    pub address: Address,
    pub exists: bool,
    pub withdrawal_address: Address,
    pub pending_withdrawal_address: Address,
    pub timezone_location: String,
}

/// Details of every registered node, in registration order.
pub async fn get_nodes(registry: &ContractRegistry, opts: &CallOpts) -> Result<Vec<NodeDetails>> {
    let addresses = get_node_addresses(registry, opts).await?;
    let manager = registry.resolve(NODE_MANAGER).await?;
    registry
        .fetcher()
        .fetch_each(&addresses, NODE_DETAILS_BATCH_SIZE, |address| {
            node_details(registry, &manager, *address, opts)
        })
        .await
}

pub async fn get_node_addresses(registry: &ContractRegistry, opts: &CallOpts) -> Result<Vec<Address>> {
    let manager = registry.resolve(NODE_MANAGER).await?;
    let count = node_count(&manager, opts).await?;
    registry
        .fetcher()
        .fetch_indexed(count, NODE_ADDRESS_BATCH_SIZE, |index| node_at(&manager, index, opts))
        .await
}

pub async fn get_node_details(
    registry: &ContractRegistry,
    address: Address,
    opts: &CallOpts,
) -> Result<NodeDetails> {
    let manager = registry.resolve(NODE_MANAGER).await?;
    node_details(registry, &manager, address, opts).await
}

pub async fn get_node_count(registry: &ContractRegistry, opts: &CallOpts) -> Result<u64> {
    let manager = registry.resolve(NODE_MANAGER).await?;
    node_count(&manager, opts).await
}

pub async fn get_node_at(registry: &ContractRegistry, index: u64, opts: &CallOpts) -> Result<Address> {
    let manager = registry.resolve(NODE_MANAGER).await?;
    node_at(&manager, index, opts).await
}

pub async fn get_node_exists(registry: &ContractRegistry, address: Address, opts: &CallOpts) -> Result<bool> {
    let manager = registry.resolve(NODE_MANAGER).await?;
    manager
        .call("getNodeExists", address, opts)
        .await
        .map_err(|e| e.context(format!("could not get node {:?} exists status", address)))
}

pub async fn get_node_withdrawal_address(
    registry: &ContractRegistry,
    address: Address,
    opts: &CallOpts,
) -> Result<Address> {
    registry
        .storage()
        .call("getNodeWithdrawalAddress", address, opts)
        .await
        .map_err(|e| e.context(format!("could not get node {:?} withdrawal address", address)))
}

pub async fn get_node_pending_withdrawal_address(
    registry: &ContractRegistry,
    address: Address,
    opts: &CallOpts,
) -> Result<Address> {
    registry
        .storage()
        .call("getNodePendingWithdrawalAddress", address, opts)
        .await
        .map_err(|e| e.context(format!("could not get node {:?} pending withdrawal address", address)))
}

pub async fn get_node_timezone_location(
    registry: &ContractRegistry,
    address: Address,
    opts: &CallOpts,
) -> Result<String> {
    let manager = registry.resolve(NODE_MANAGER).await?;
    timezone_location(&manager, address, opts).await
}

pub async fn estimate_register_node_gas(
    registry: &ContractRegistry,
    timezone_location: &str,
    opts: &TransactOpts,
) -> Result<U256> {
    check_timezone(timezone_location)?;
    let manager = registry.resolve(NODE_MANAGER).await?;
    manager
        .estimate_gas("registerNode", timezone_location.to_string(), opts)
        .await
}

pub async fn register_node(
    registry: &ContractRegistry,
    timezone_location: &str,
    opts: &TransactOpts,
) -> Result<TxHash> {
    check_timezone(timezone_location)?;
    let manager = registry.resolve(NODE_MANAGER).await?;
    manager
        .transact("registerNode", timezone_location.to_string(), opts)
        .await
        .map_err(|e| e.context("could not register node"))
}

pub async fn set_timezone_location(
    registry: &ContractRegistry,
    timezone_location: &str,
    opts: &TransactOpts,
) -> Result<TxHash> {
    check_timezone(timezone_location)?;
    let manager = registry.resolve(NODE_MANAGER).await?;
    manager
        .transact("setTimezoneLocation", timezone_location.to_string(), opts)
        .await
        .map_err(|e| e.context("could not set node timezone location"))
}

async fn node_count(manager: &Contract, opts: &CallOpts) -> Result<u64> {
    manager
        .call_u64("getNodeCount", (), opts)
        .await
        .map_err(|e| e.context("could not get node count"))
}

async fn node_at(manager: &Contract, index: u64, opts: &CallOpts) -> Result<Address> {
    manager
        .call("getNodeAt", U256::from(index), opts)
        .await
        .map_err(|e| e.context(format!("could not get node {} address", index)))
}

async fn timezone_location(manager: &Contract, address: Address, opts: &CallOpts) -> Result<String> {
    let raw: String = manager
        .call("getNodeTimezoneLocation", address, opts)
        .await
        .map_err(|e| e.context(format!("could not get node {:?} timezone location", address)))?;
    Ok(sanitize(&raw))
}

async fn node_details(
    registry: &ContractRegistry,
    manager: &Contract,
    address: Address,
    opts: &CallOpts,
) -> Result<NodeDetails> {
    let (exists, withdrawal_address, pending_withdrawal_address, timezone_location) = tokio::try_join!(
        async {
            manager
                .call::<bool, _>("getNodeExists", address, opts)
                .await
                .map_err(|e| e.context(format!("could not get node {:?} exists status", address)))
        },
        get_node_withdrawal_address(registry, address, opts),
        get_node_pending_withdrawal_address(registry, address, opts),
        timezone_location(manager, address, opts),
    )?;
    Ok(NodeDetails {
        address,
        exists,
        withdrawal_address,
        pending_withdrawal_address,
        timezone_location,
    })
}

/// Timezone names are `Area/Location` identifiers such as `Europe/Paris`.
fn check_timezone(timezone_location: &str) -> Result<()> {
    let valid = !timezone_location.is_empty()
        && timezone_location
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | '+'));
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidInput(format!(
            "could not verify timezone [{}]",
            timezone_location
        )))
    }
}

/// Strips control characters from strings written by untrusted accounts.
fn sanitize(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_control()).collect::<String>().trim().to_string()
}
