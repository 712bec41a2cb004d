//! Minipools created by the minipool manager.

use ethers::types::{Address, Bytes, H256, U256};
use futures::future::try_join;
use serde::Serialize;

use crate::address::MINIPOOL_MANAGER;
use crate::contract::Contract;
use crate::deposits::ValidatorPubkey;
use crate::error::{Error, Result};
use crate::registry::ContractRegistry;
use crate::transport::CallOpts;

pub const MINIPOOL_PRELAUNCH_BATCH_SIZE: u64 = 750;
pub const MINIPOOL_ADDRESS_BATCH_SIZE: u64 = 50;
pub const MINIPOOL_DETAILS_BATCH_SIZE: u64 = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MinipoolDetails {
    pub address: Address,
    pub exists: bool,
    pub pubkey: ValidatorPubkey,
}

/// Minipool totals by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MinipoolCountsPerStatus {
    pub initialized: U256,
    pub prelaunch: U256,
    pub staking: U256,
    pub withdrawable: U256,
    pub dissolved: U256,
}

pub async fn get_minipools(registry: &ContractRegistry, opts: &CallOpts) -> Result<Vec<MinipoolDetails>> {
    let addresses = get_minipool_addresses(registry, opts).await?;
    load_details(registry, &addresses, opts).await
}

pub async fn get_node_minipools(
    registry: &ContractRegistry,
    node_address: Address,
    opts: &CallOpts,
) -> Result<Vec<MinipoolDetails>> {
    let addresses = get_node_minipool_addresses(registry, node_address, opts).await?;
    load_details(registry, &addresses, opts).await
}

pub async fn get_minipool_addresses(registry: &ContractRegistry, opts: &CallOpts) -> Result<Vec<Address>> {
    let manager = registry.resolve(MINIPOOL_MANAGER).await?;
    registry
        .fetcher()
        .fetch_counted(
            minipool_count(&manager, opts),
            MINIPOOL_ADDRESS_BATCH_SIZE,
            |index| minipool_at(&manager, index, opts),
        )
        .await
}

pub async fn get_node_minipool_addresses(
    registry: &ContractRegistry,
    node_address: Address,
    opts: &CallOpts,
) -> Result<Vec<Address>> {
    let manager = registry.resolve(MINIPOOL_MANAGER).await?;
    registry
        .fetcher()
        .fetch_counted(
            node_minipool_count(&manager, node_address, opts),
            MINIPOOL_ADDRESS_BATCH_SIZE,
            |index| node_minipool_at(&manager, node_address, index, opts),
        )
        .await
}

/// Addresses of every minipool in prelaunch, read in pages of
/// [`MINIPOOL_PRELAUNCH_BATCH_SIZE`] over the whole minipool set.
pub async fn get_prelaunch_minipool_addresses(
    registry: &ContractRegistry,
    opts: &CallOpts,
) -> Result<Vec<Address>> {
    let manager = registry.resolve(MINIPOOL_MANAGER).await?;
    let total = minipool_count(&manager, opts).await?;
    let mut addresses = Vec::new();
    for offset in (0..total).step_by(MINIPOOL_PRELAUNCH_BATCH_SIZE as usize) {
        let mut page: Vec<Address> = manager
            .call(
                "getPrelaunchMinipools",
                (U256::from(offset), U256::from(MINIPOOL_PRELAUNCH_BATCH_SIZE)),
                opts,
            )
            .await
            .map_err(|e| e.context("could not get prelaunch minipool addresses"))?;
        addresses.append(&mut page);
    }
    Ok(addresses)
}

/// Status totals, summed over pages of [`MINIPOOL_PRELAUNCH_BATCH_SIZE`].
pub async fn get_minipool_count_per_status(
    registry: &ContractRegistry,
    opts: &CallOpts,
) -> Result<MinipoolCountsPerStatus> {
    let manager = registry.resolve(MINIPOOL_MANAGER).await?;
    let total = minipool_count(&manager, opts).await?;
    let mut counts = MinipoolCountsPerStatus::default();
    for offset in (0..total).step_by(MINIPOOL_PRELAUNCH_BATCH_SIZE as usize) {
        let (initialized, prelaunch, staking, withdrawable, dissolved): (U256, U256, U256, U256, U256) =
            manager
                .call(
                    "getMinipoolCountPerStatus",
                    (U256::from(offset), U256::from(MINIPOOL_PRELAUNCH_BATCH_SIZE)),
                    opts,
                )
                .await
                .map_err(|e| e.context("could not get minipool counts"))?;
        counts.initialized += initialized;
        counts.prelaunch += prelaunch;
        counts.staking += staking;
        counts.withdrawable += withdrawable;
        counts.dissolved += dissolved;
    }
    Ok(counts)
}

pub async fn get_minipool_details(
    registry: &ContractRegistry,
    minipool_address: Address,
    opts: &CallOpts,
) -> Result<MinipoolDetails> {
    let manager = registry.resolve(MINIPOOL_MANAGER).await?;
    minipool_details(&manager, minipool_address, opts).await
}

pub async fn get_minipool_count(registry: &ContractRegistry, opts: &CallOpts) -> Result<u64> {
    let manager = registry.resolve(MINIPOOL_MANAGER).await?;
    minipool_count(&manager, opts).await
}

pub async fn get_minipool_at(registry: &ContractRegistry, index: u64, opts: &CallOpts) -> Result<Address> {
    let manager = registry.resolve(MINIPOOL_MANAGER).await?;
    minipool_at(&manager, index, opts).await
}

pub async fn get_node_minipool_count(
    registry: &ContractRegistry,
    node_address: Address,
    opts: &CallOpts,
) -> Result<u64> {
    let manager = registry.resolve(MINIPOOL_MANAGER).await?;
    node_minipool_count(&manager, node_address, opts).await
}

pub async fn get_minipool_exists(
    registry: &ContractRegistry,
    minipool_address: Address,
    opts: &CallOpts,
) -> Result<bool> {
    let manager = registry.resolve(MINIPOOL_MANAGER).await?;
    minipool_exists(&manager, minipool_address, opts).await
}

pub async fn get_minipool_pubkey(
    registry: &ContractRegistry,
    minipool_address: Address,
    opts: &CallOpts,
) -> Result<ValidatorPubkey> {
    let manager = registry.resolve(MINIPOOL_MANAGER).await?;
    minipool_pubkey(&manager, minipool_address, opts).await
}

/// Minipool running the validator with `pubkey`; zero when there is none.
pub async fn get_minipool_by_pubkey(
    registry: &ContractRegistry,
    pubkey: &ValidatorPubkey,
    opts: &CallOpts,
) -> Result<Address> {
    let manager = registry.resolve(MINIPOOL_MANAGER).await?;
    manager
        .call("getMinipoolByPubkey", Bytes::from(pubkey.as_bytes().to_vec()), opts)
        .await
        .map_err(|e| e.context(format!("could not get validator {} minipool address", pubkey)))
}

/// 0x01-prefixed beacon chain withdrawal credentials of a minipool.
pub async fn get_minipool_withdrawal_credentials(
    registry: &ContractRegistry,
    minipool_address: Address,
    opts: &CallOpts,
) -> Result<H256> {
    let manager = registry.resolve(MINIPOOL_MANAGER).await?;
    manager
        .call("getMinipoolWithdrawalCredentials", minipool_address, opts)
        .await
        .map_err(|e| e.context("could not get minipool withdrawal credentials"))
}

async fn load_details(
    registry: &ContractRegistry,
    addresses: &[Address],
    opts: &CallOpts,
) -> Result<Vec<MinipoolDetails>> {
    let manager = registry.resolve(MINIPOOL_MANAGER).await?;
    registry
        .fetcher()
        .fetch_each(addresses, MINIPOOL_DETAILS_BATCH_SIZE, |address| {
            minipool_details(&manager, *address, opts)
        })
        .await
}

async fn minipool_details(manager: &Contract, address: Address, opts: &CallOpts) -> Result<MinipoolDetails> {
    let (exists, pubkey) = try_join(
        minipool_exists(manager, address, opts),
        minipool_pubkey(manager, address, opts),
    )
    .await?;
    Ok(MinipoolDetails {
        address,
        exists,
        pubkey,
    })
}

async fn minipool_count(manager: &Contract, opts: &CallOpts) -> Result<u64> {
    manager
        .call_u64("getMinipoolCount", (), opts)
        .await
        .map_err(|e| e.context("could not get minipool count"))
}

async fn minipool_at(manager: &Contract, index: u64, opts: &CallOpts) -> Result<Address> {
    manager
        .call("getMinipoolAt", U256::from(index), opts)
        .await
        .map_err(|e| e.context(format!("could not get minipool {} address", index)))
}

async fn node_minipool_count(manager: &Contract, node_address: Address, opts: &CallOpts) -> Result<u64> {
    manager
        .call_u64("getNodeMinipoolCount", node_address, opts)
        .await
        .map_err(|e| e.context(format!("could not get node {:?} minipool count", node_address)))
}

async fn node_minipool_at(
    manager: &Contract,
    node_address: Address,
    index: u64,
    opts: &CallOpts,
) -> Result<Address> {
    manager
        .call("getNodeMinipoolAt", (node_address, U256::from(index)), opts)
        .await
        .map_err(|e| {
            e.context(format!("could not get node {:?} minipool {} address", node_address, index))
        })
}

async fn minipool_exists(manager: &Contract, address: Address, opts: &CallOpts) -> Result<bool> {
    manager
        .call("getMinipoolExists", address, opts)
        .await
        .map_err(|e| e.context(format!("could not get minipool {:?} exists status", address)))
}

async fn minipool_pubkey(manager: &Contract, address: Address, opts: &CallOpts) -> Result<ValidatorPubkey> {
    let context = format!("could not get minipool {:?} pubkey", address);
    let raw: Bytes = manager
        .call("getMinipoolPubkey", address, opts)
        .await
        .map_err(|e| e.context(context.clone()))?;
    // Minipools that have not deposited yet report an empty key.
    if raw.is_empty() {
        return Ok(ValidatorPubkey([0u8; crate::deposits::PUBKEY_LENGTH]));
    }
    ValidatorPubkey::from_slice(&raw).map_err(|e| Error::decode(context, e))
}
