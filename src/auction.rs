//! GGP auction lots held by the auction manager.

use ethers::types::{Address, TxHash, U256};
use serde::Serialize;

use crate::contract::Contract;
use crate::error::Result;
use crate::registry::ContractRegistry;
use crate::transport::{CallOpts, TransactOpts};

pub const AUCTION_MANAGER: &str = "rocketAuctionManager";

pub const LOT_DETAILS_BATCH_SIZE: u64 = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LotDetails {
    pub index: u64,
    pub exists: bool,
    pub start_block: u64,
    pub end_block: u64,
    pub start_price: U256,
    pub reserve_price: U256,
    pub price_at_current_block: U256,
    pub price_by_total_bids: U256,
    pub current_price: U256,
    pub total_ggp_amount: U256,
    pub claimed_ggp_amount: U256,
    pub remaining_ggp_amount: U256,
    pub total_bid_amount: U256,
    /// Only set by the `_with_bids` variants.
    pub address_bid_amount: U256,
    pub cleared: bool,
    pub ggp_recovered: bool,
}

/// Details of every lot, in lot index order.
pub async fn get_lots(registry: &ContractRegistry, opts: &CallOpts) -> Result<Vec<LotDetails>> {
    let manager = registry.resolve(AUCTION_MANAGER).await?;
    registry
        .fetcher()
        .fetch_counted(lot_count(&manager, opts), LOT_DETAILS_BATCH_SIZE, |index| {
            lot_details(&manager, index, opts)
        })
        .await
}

/// [`get_lots`] with the amount `bidder` has bid on each lot.
pub async fn get_lots_with_bids(
    registry: &ContractRegistry,
    bidder: Address,
    opts: &CallOpts,
) -> Result<Vec<LotDetails>> {
    let manager = registry.resolve(AUCTION_MANAGER).await?;
    registry
        .fetcher()
        .fetch_counted(lot_count(&manager, opts), LOT_DETAILS_BATCH_SIZE, |index| {
            lot_details_with_bids(&manager, index, bidder, opts)
        })
        .await
}

pub async fn get_lot_details(registry: &ContractRegistry, index: u64, opts: &CallOpts) -> Result<LotDetails> {
    let manager = registry.resolve(AUCTION_MANAGER).await?;
    lot_details(&manager, index, opts).await
}

pub async fn get_lot_details_with_bids(
    registry: &ContractRegistry,
    index: u64,
    bidder: Address,
    opts: &CallOpts,
) -> Result<LotDetails> {
    let manager = registry.resolve(AUCTION_MANAGER).await?;
    lot_details_with_bids(&manager, index, bidder, opts).await
}

pub async fn get_lot_count(registry: &ContractRegistry, opts: &CallOpts) -> Result<u64> {
    let manager = registry.resolve(AUCTION_MANAGER).await?;
    lot_count(&manager, opts).await
}

pub async fn get_lot_address_bid_amount(
    registry: &ContractRegistry,
    index: u64,
    bidder: Address,
    opts: &CallOpts,
) -> Result<U256> {
    let manager = registry.resolve(AUCTION_MANAGER).await?;
    address_bid_amount(&manager, index, bidder, opts).await
}

/// GGP held by the auction manager.
pub async fn get_total_ggp_balance(registry: &ContractRegistry, opts: &CallOpts) -> Result<U256> {
    balance(registry, "getTotalGGPBalance", "total", opts).await
}

/// GGP already put up in lots.
pub async fn get_allotted_ggp_balance(registry: &ContractRegistry, opts: &CallOpts) -> Result<U256> {
    balance(registry, "getAllottedGGPBalance", "allotted", opts).await
}

/// GGP available for new lots.
pub async fn get_remaining_ggp_balance(registry: &ContractRegistry, opts: &CallOpts) -> Result<U256> {
    balance(registry, "getRemainingGGPBalance", "remaining", opts).await
}

pub async fn estimate_create_lot_gas(registry: &ContractRegistry, opts: &TransactOpts) -> Result<U256> {
    let manager = registry.resolve(AUCTION_MANAGER).await?;
    manager.estimate_gas("createLot", (), opts).await
}

/// Create a lot. Returns the new lot's index with the transaction hash.
pub async fn create_lot(registry: &ContractRegistry, opts: &TransactOpts) -> Result<(u64, TxHash)> {
    let manager = registry.resolve(AUCTION_MANAGER).await?;
    let index = lot_count(&manager, &CallOpts::default()).await?;
    let hash = manager
        .transact("createLot", (), opts)
        .await
        .map_err(|e| e.context("could not create lot"))?;
    Ok((index, hash))
}

/// Bid on a lot; the bid amount is `opts.value`.
pub async fn place_bid(registry: &ContractRegistry, index: u64, opts: &TransactOpts) -> Result<TxHash> {
    lot_transaction(registry, "placeBid", index, "could not place bid", opts).await
}

pub async fn claim_bid(registry: &ContractRegistry, index: u64, opts: &TransactOpts) -> Result<TxHash> {
    lot_transaction(registry, "claimBid", index, "could not claim bid", opts).await
}

pub async fn recover_unclaimed_ggp(registry: &ContractRegistry, index: u64, opts: &TransactOpts) -> Result<TxHash> {
    lot_transaction(
        registry,
        "recoverUnclaimedGGP",
        index,
        "could not recover unclaimed GGP",
        opts,
    )
    .await
}

async fn lot_transaction(
    registry: &ContractRegistry,
    method: &str,
    index: u64,
    failure: &str,
    opts: &TransactOpts,
) -> Result<TxHash> {
    let manager = registry.resolve(AUCTION_MANAGER).await?;
    manager
        .transact(method, U256::from(index), opts)
        .await
        .map_err(|e| e.context(format!("{} on lot {}", failure, index)))
}

async fn balance(registry: &ContractRegistry, method: &str, label: &str, opts: &CallOpts) -> Result<U256> {
    let manager = registry.resolve(AUCTION_MANAGER).await?;
    manager
        .call(method, (), opts)
        .await
        .map_err(|e| e.context(format!("could not get auction contract {} GGP balance", label)))
}

async fn lot_count(manager: &Contract, opts: &CallOpts) -> Result<u64> {
    manager
        .call_u64("getLotCount", (), opts)
        .await
        .map_err(|e| e.context("could not get lot count"))
}

async fn lot_details(manager: &Contract, index: u64, opts: &CallOpts) -> Result<LotDetails> {
    let (
        exists,
        start_block,
        end_block,
        start_price,
        reserve_price,
        price_at_current_block,
        price_by_total_bids,
        current_price,
        total_ggp_amount,
        claimed_ggp_amount,
        remaining_ggp_amount,
        total_bid_amount,
        cleared,
        ggp_recovered,
    ) = tokio::try_join!(
        lot_flag(manager, "getLotExists", index, "exists status", opts),
        lot_block(manager, "getLotStartBlock", index, "start block", opts),
        lot_block(manager, "getLotEndBlock", index, "end block", opts),
        lot_amount(manager, "getLotStartPrice", index, "start price", opts),
        lot_amount(manager, "getLotReservePrice", index, "reserve price", opts),
        lot_amount(manager, "getLotPriceAtCurrentBlock", index, "price at current block", opts),
        lot_amount(manager, "getLotPriceByTotalBids", index, "price by total bids", opts),
        lot_amount(manager, "getLotCurrentPrice", index, "current price", opts),
        lot_amount(manager, "getLotTotalGGPAmount", index, "total GGP amount", opts),
        lot_amount(manager, "getLotClaimedGGPAmount", index, "claimed GGP amount", opts),
        lot_amount(manager, "getLotRemainingGGPAmount", index, "remaining GGP amount", opts),
        lot_amount(manager, "getLotTotalBidAmount", index, "total bid amount", opts),
        lot_flag(manager, "getLotIsCleared", index, "cleared status", opts),
        lot_flag(manager, "getLotGGPRecovered", index, "GGP recovered status", opts),
    )?;
    Ok(LotDetails {
        index,
        exists,
        start_block,
        end_block,
        start_price,
        reserve_price,
        price_at_current_block,
        price_by_total_bids,
        current_price,
        total_ggp_amount,
        claimed_ggp_amount,
        remaining_ggp_amount,
        total_bid_amount,
        address_bid_amount: U256::zero(),
        cleared,
        ggp_recovered,
    })
}

async fn lot_details_with_bids(
    manager: &Contract,
    index: u64,
    bidder: Address,
    opts: &CallOpts,
) -> Result<LotDetails> {
    let (mut details, bid) = tokio::try_join!(
        lot_details(manager, index, opts),
        address_bid_amount(manager, index, bidder, opts),
    )?;
    details.address_bid_amount = bid;
    Ok(details)
}

async fn address_bid_amount(manager: &Contract, index: u64, bidder: Address, opts: &CallOpts) -> Result<U256> {
    manager
        .call("getLotAddressBidAmount", (U256::from(index), bidder), opts)
        .await
        .map_err(|e| e.context(format!("could not get lot {} address {:?} bid amount", index, bidder)))
}

async fn lot_amount(manager: &Contract, method: &str, index: u64, field: &str, opts: &CallOpts) -> Result<U256> {
    manager
        .call(method, U256::from(index), opts)
        .await
        .map_err(|e| e.context(format!("could not get lot {} {}", index, field)))
}

async fn lot_block(manager: &Contract, method: &str, index: u64, field: &str, opts: &CallOpts) -> Result<u64> {
    manager
        .call_u64(method, U256::from(index), opts)
        .await
        .map_err(|e| e.context(format!("could not get lot {} {}", index, field)))
}

async fn lot_flag(manager: &Contract, method: &str, index: u64, field: &str, opts: &CallOpts) -> Result<bool> {
    manager
        .call(method, U256::from(index), opts)
        .await
        .map_err(|e| e.context(format!("could not get lot {} {}", index, field)))
}
