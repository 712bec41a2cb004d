//! Trusted node DAO membership.

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::contract::Contract;
use crate::error::Result;
use crate::registry::ContractRegistry;
use crate::transport::CallOpts;

pub const TRUSTED_DAO: &str = "gogoDAONodeTrusted";

pub const MEMBER_ADDRESS_BATCH_SIZE: u64 = 50;
pub const MEMBER_DETAILS_BATCH_SIZE: u64 = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberDetails {
    pub address: Address,
    pub exists: bool,
    pub id: String,
    pub url: String,
    pub joined_time: u64,
    pub last_proposal_time: u64,
    pub ggp_bond_amount: U256,
    pub unbonded_validator_count: u64,
}

/// Details of every member, in membership index order.
pub async fn get_members(registry: &ContractRegistry, opts: &CallOpts) -> Result<Vec<MemberDetails>> {
    let addresses = get_member_addresses(registry, opts).await?;
    let dao = registry.resolve(TRUSTED_DAO).await?;
    registry
        .fetcher()
        .fetch_each(&addresses, MEMBER_DETAILS_BATCH_SIZE, |address| {
            member_details(&dao, *address, opts)
        })
        .await
}

pub async fn get_member_addresses(registry: &ContractRegistry, opts: &CallOpts) -> Result<Vec<Address>> {
    let dao = registry.resolve(TRUSTED_DAO).await?;
    let count = member_count(&dao, opts).await?;
    registry
        .fetcher()
        .fetch_indexed(count, MEMBER_ADDRESS_BATCH_SIZE, |index| member_at(&dao, index, opts))
        .await
}

pub async fn get_member_details(
    registry: &ContractRegistry,
    address: Address,
    opts: &CallOpts,
) -> Result<MemberDetails> {
    let dao = registry.resolve(TRUSTED_DAO).await?;
    member_details(&dao, address, opts).await
}

pub async fn get_member_count(registry: &ContractRegistry, opts: &CallOpts) -> Result<u64> {
    let dao = registry.resolve(TRUSTED_DAO).await?;
    member_count(&dao, opts).await
}

pub async fn get_minimum_member_count(registry: &ContractRegistry, opts: &CallOpts) -> Result<u64> {
    let dao = registry.resolve(TRUSTED_DAO).await?;
    dao.call_u64("getMemberMinRequired", (), opts)
        .await
        .map_err(|e| e.context("could not get trusted node DAO minimum member count"))
}

pub async fn get_member_at(registry: &ContractRegistry, index: u64, opts: &CallOpts) -> Result<Address> {
    let dao = registry.resolve(TRUSTED_DAO).await?;
    member_at(&dao, index, opts).await
}

async fn member_count(dao: &Contract, opts: &CallOpts) -> Result<u64> {
    dao.call_u64("getMemberCount", (), opts)
        .await
        .map_err(|e| e.context("could not get trusted node DAO member count"))
}

async fn member_at(dao: &Contract, index: u64, opts: &CallOpts) -> Result<Address> {
    dao.call("getMemberAt", U256::from(index), opts)
        .await
        .map_err(|e| e.context(format!("could not get trusted node DAO member {} address", index)))
}

async fn member_details(dao: &Contract, address: Address, opts: &CallOpts) -> Result<MemberDetails> {
    let context = |what: &str| format!("could not get trusted node DAO member {:?} {}", address, what);
    let (exists, id, url, joined_time, last_proposal_time, ggp_bond_amount, unbonded_validator_count) = tokio::try_join!(
        async {
            dao.call::<bool, _>("getMemberIsValid", address, opts)
                .await
                .map_err(|e| e.context(context("exists status")))
        },
        async {
            dao.call::<String, _>("getMemberID", address, opts)
                .await
                .map_err(|e| e.context(context("ID")))
        },
        async {
            dao.call::<String, _>("getMemberUrl", address, opts)
                .await
                .map_err(|e| e.context(context("URL")))
        },
        async {
            dao.call_u64("getMemberJoinedTime", address, opts)
                .await
                .map_err(|e| e.context(context("joined time")))
        },
        async {
            dao.call_u64("getMemberLastProposalTime", address, opts)
                .await
                .map_err(|e| e.context(context("last proposal time")))
        },
        async {
            dao.call::<U256, _>("getMemberGGPBondAmount", address, opts)
                .await
                .map_err(|e| e.context(context("GGP bond amount")))
        },
        async {
            dao.call_u64("getMemberUnbondedValidatorCount", address, opts)
                .await
                .map_err(|e| e.context(context("unbonded validator count")))
        },
    )?;

    Ok(MemberDetails {
        address,
        exists,
        id,
        url,
        joined_time,
        last_proposal_time,
        ggp_bond_amount,
        unbonded_validator_count,
    })
}
