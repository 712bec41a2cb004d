//! DAO proposals.
//!
//! Proposal IDs are 1-indexed: proposal `i` of a collection of `count` lives at
//! index `i - 1` of every returned vector.

use ethers::abi::Token;
use ethers::types::{Address, Bytes, U256};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::contract::Contract;
use crate::error::{Error, Result};
use crate::registry::ContractRegistry;
use crate::transport::CallOpts;

pub const DAO_PROPOSAL: &str = "gogoDAOProposal";

pub const PROPOSAL_DAO_NAMES_BATCH_SIZE: u64 = 50;
pub const PROPOSAL_DETAILS_BATCH_SIZE: u64 = 10;

const UNKNOWN_PAYLOAD: &str = "(unknown)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProposalState {
    Pending,
    Active,
    Cancelled,
    Defeated,
    Succeeded,
    Expired,
    Executed,
}

impl TryFrom<u8> for ProposalState {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => Self::Pending,
            1 => Self::Active,
            2 => Self::Cancelled,
            3 => Self::Defeated,
            4 => Self::Succeeded,
            5 => Self::Expired,
            6 => Self::Executed,
            other => {
                return Err(Error::decode(
                    "decode proposal state",
                    format!("unknown state {}", other),
                ))
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalDetails {
    pub id: u64,
    pub dao: String,
    pub proposer_address: Address,
    pub message: String,
    pub created_time: u64,
    pub start_time: u64,
    pub end_time: u64,
    pub expiry_time: u64,
    pub votes_required: U256,
    pub votes_for: U256,
    pub votes_against: U256,
    pub member_voted: bool,
    pub member_supported: bool,
    pub is_cancelled: bool,
    pub is_executed: bool,
    pub payload: Bytes,
    pub payload_str: String,
    pub state: ProposalState,
}

pub async fn get_proposal_count(registry: &ContractRegistry, opts: &CallOpts) -> Result<u64> {
    let proposals = registry.resolve(DAO_PROPOSAL).await?;
    proposal_count(&proposals, opts).await
}

/// Every proposal, ordered by ID.
pub async fn get_proposals(registry: &ContractRegistry, opts: &CallOpts) -> Result<Vec<ProposalDetails>> {
    let proposals = registry.resolve(DAO_PROPOSAL).await?;
    let count = proposal_count(&proposals, opts).await?;
    registry
        .fetcher()
        .fetch_indexed(count, PROPOSAL_DETAILS_BATCH_SIZE, |index| {
            proposal_details(registry, &proposals, index + 1, opts)
        })
        .await
}

/// Every proposal with `member`'s vote, ordered by ID.
pub async fn get_proposals_with_member(
    registry: &ContractRegistry,
    member: Address,
    opts: &CallOpts,
) -> Result<Vec<ProposalDetails>> {
    let proposals = registry.resolve(DAO_PROPOSAL).await?;
    let count = proposal_count(&proposals, opts).await?;
    registry
        .fetcher()
        .fetch_indexed(count, PROPOSAL_DETAILS_BATCH_SIZE, |index| {
            proposal_details_with_member(registry, &proposals, index + 1, member, opts)
        })
        .await
}

/// IDs of proposals raised by `dao_name`, ascending.
pub async fn get_dao_proposal_ids(
    registry: &ContractRegistry,
    dao_name: &str,
    opts: &CallOpts,
) -> Result<Vec<u64>> {
    let proposals = registry.resolve(DAO_PROPOSAL).await?;
    let count = proposal_count(&proposals, opts).await?;
    let indices = registry
        .fetcher()
        .filter_indices(
            count,
            PROPOSAL_DAO_NAMES_BATCH_SIZE,
            |index| proposal_dao(&proposals, index + 1, opts),
            |name| name == dao_name,
        )
        .await?;
    Ok(indices.into_iter().map(|index| index + 1).collect())
}

/// Proposals raised by `dao_name`, ordered by ID.
pub async fn get_dao_proposals(
    registry: &ContractRegistry,
    dao_name: &str,
    opts: &CallOpts,
) -> Result<Vec<ProposalDetails>> {
    let ids = get_dao_proposal_ids(registry, dao_name, opts).await?;
    let proposals = registry.resolve(DAO_PROPOSAL).await?;
    registry
        .fetcher()
        .fetch_each(&ids, PROPOSAL_DETAILS_BATCH_SIZE, |id| {
            proposal_details(registry, &proposals, *id, opts)
        })
        .await
}

pub async fn get_dao_proposals_with_member(
    registry: &ContractRegistry,
    dao_name: &str,
    member: Address,
    opts: &CallOpts,
) -> Result<Vec<ProposalDetails>> {
    let ids = get_dao_proposal_ids(registry, dao_name, opts).await?;
    let proposals = registry.resolve(DAO_PROPOSAL).await?;
    registry
        .fetcher()
        .fetch_each(&ids, PROPOSAL_DETAILS_BATCH_SIZE, |id| {
            proposal_details_with_member(registry, &proposals, *id, member, opts)
        })
        .await
}

pub async fn get_proposal_details(
    registry: &ContractRegistry,
    proposal_id: u64,
    opts: &CallOpts,
) -> Result<ProposalDetails> {
    let proposals = registry.resolve(DAO_PROPOSAL).await?;
    proposal_details(registry, &proposals, proposal_id, opts).await
}

pub async fn get_proposal_details_with_member(
    registry: &ContractRegistry,
    proposal_id: u64,
    member: Address,
    opts: &CallOpts,
) -> Result<ProposalDetails> {
    let proposals = registry.resolve(DAO_PROPOSAL).await?;
    proposal_details_with_member(registry, &proposals, proposal_id, member, opts).await
}

async fn proposal_count(proposals: &Contract, opts: &CallOpts) -> Result<u64> {
    proposals
        .call_u64("getTotal", (), opts)
        .await
        .map_err(|e| e.context("could not get proposal count"))
}

async fn proposal_dao(proposals: &Contract, id: u64, opts: &CallOpts) -> Result<String> {
    proposals
        .call("getDAO", U256::from(id), opts)
        .await
        .map_err(|e| e.context(format!("could not get proposal {} DAO", id)))
}

async fn proposal_field<D: ethers::abi::Detokenize>(
    proposals: &Contract,
    method: &str,
    id: u64,
    what: &str,
    opts: &CallOpts,
) -> Result<D> {
    proposals
        .call(method, U256::from(id), opts)
        .await
        .map_err(|e| e.context(format!("could not get proposal {} {}", id, what)))
}

async fn proposal_u64(proposals: &Contract, method: &str, id: u64, what: &str, opts: &CallOpts) -> Result<u64> {
    proposals
        .call_u64(method, U256::from(id), opts)
        .await
        .map_err(|e| e.context(format!("could not get proposal {} {}", id, what)))
}

async fn proposal_details(
    registry: &ContractRegistry,
    proposals: &Contract,
    id: u64,
    opts: &CallOpts,
) -> Result<ProposalDetails> {
    let (
        dao,
        proposer_address,
        message,
        created_time,
        start_time,
        end_time,
        expiry_time,
        votes_required,
        votes_for,
        votes_against,
        is_cancelled,
        is_executed,
        payload,
        state,
    ) = tokio::try_join!(
        proposal_dao(proposals, id, opts),
        proposal_field::<Address>(proposals, "getProposer", id, "proposer", opts),
        proposal_field::<String>(proposals, "getMessage", id, "message", opts),
        proposal_u64(proposals, "getCreated", id, "created time", opts),
        proposal_u64(proposals, "getStart", id, "start time", opts),
        proposal_u64(proposals, "getEnd", id, "end time", opts),
        proposal_u64(proposals, "getExpires", id, "expiry time", opts),
        proposal_field::<U256>(proposals, "getVotesRequired", id, "votes required", opts),
        proposal_field::<U256>(proposals, "getVotesFor", id, "votes for", opts),
        proposal_field::<U256>(proposals, "getVotesAgainst", id, "votes against", opts),
        proposal_field::<bool>(proposals, "getCancelled", id, "cancelled status", opts),
        proposal_field::<bool>(proposals, "getExecuted", id, "executed status", opts),
        proposal_field::<Bytes>(proposals, "getPayload", id, "payload", opts),
        proposal_u64(proposals, "getState", id, "state", opts),
    )?;

    let payload_str = match payload_string(registry, &dao, &payload).await {
        Ok(text) => text,
        Err(e) => {
            debug!("Could not describe proposal {} payload: {}", id, e);
            UNKNOWN_PAYLOAD.to_string()
        }
    };

    Ok(ProposalDetails {
        id,
        dao,
        proposer_address,
        message,
        created_time,
        start_time,
        end_time,
        expiry_time,
        votes_required,
        votes_for,
        votes_against,
        member_voted: false,
        member_supported: false,
        is_cancelled,
        is_executed,
        payload,
        payload_str,
        state: ProposalState::try_from(u8::try_from(state).unwrap_or(u8::MAX))?,
    })
}

async fn proposal_details_with_member(
    registry: &ContractRegistry,
    proposals: &Contract,
    id: u64,
    member: Address,
    opts: &CallOpts,
) -> Result<ProposalDetails> {
    let (mut details, member_voted, member_supported) = tokio::try_join!(
        proposal_details(registry, proposals, id, opts),
        async {
            proposals
                .call::<bool, _>("getReceiptHasVoted", (U256::from(id), member), opts)
                .await
                .map_err(|e| e.context(format!("could not get proposal {} member voted status", id)))
        },
        async {
            proposals
                .call::<bool, _>("getReceiptSupported", (U256::from(id), member), opts)
                .await
                .map_err(|e| e.context(format!("could not get proposal {} member supported status", id)))
        },
    )?;
    details.member_voted = member_voted;
    details.member_supported = member_supported;
    Ok(details)
}

/// Renders a proposal payload as `method(arg, ...)` using the ABI of the DAO
/// contract that raised it.
pub async fn payload_string(registry: &ContractRegistry, dao_name: &str, payload: &[u8]) -> Result<String> {
    let abi = registry.get_abi(dao_name).await?;
    describe_call(&abi, payload)
}

/// `method(arg, ...)` for ABI-encoded calldata.
pub fn describe_call(abi: &ethers::abi::Abi, calldata: &[u8]) -> Result<String> {
    if calldata.len() < 4 {
        return Err(Error::decode("describe payload", "payload is shorter than a selector"));
    }
    let function = abi
        .functions()
        .find(|f| f.short_signature() == calldata[..4])
        .ok_or_else(|| Error::decode("describe payload", "no method matches the selector"))?;
    let args = function
        .decode_input(&calldata[4..])
        .map_err(|e| Error::decode("describe payload", e))?;
    let rendered: Vec<String> = args.iter().map(render_token).collect();
    Ok(format!("{}({})", function.name, rendered.join(", ")))
}

fn render_token(token: &Token) -> String {
    match token {
        Token::Address(address) => format!("{:?}", address),
        Token::Uint(value) | Token::Int(value) => value.to_string(),
        Token::Bool(value) => value.to_string(),
        Token::String(value) => value.clone(),
        Token::Bytes(bytes) | Token::FixedBytes(bytes) => format!("0x{}", hex::encode(bytes)),
        Token::Array(items) | Token::FixedArray(items) | Token::Tuple(items) => {
            let inner: Vec<String> = items.iter().map(render_token).collect();
            format!("[{}]", inner.join(", "))
        }
    }
}
