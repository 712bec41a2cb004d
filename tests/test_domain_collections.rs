//! Integration tests for the protocol collections
//!
//! Tests cover:
//! - Node, minipool and trusted member collections assembled through the batch fetcher
//! - Auction lots in index order, with per-bidder amounts
//! - Proposal filtering by DAO and 1-based proposal IDs
//! - Deposit events grouped by validator pubkey
//! - Minipool address precomputation against the live manager
//! - Trusted node participation end to end

mod common;

use common::{addr, event_json, function_json, make_log, MockChain, STORAGE};
use ethers::abi::{Abi, Token};
use ethers::types::{Address, H256, U256};
use gogopool_sdk::address::{generate_minipool_address, MINIPOOL_MANAGER};
use gogopool_sdk::auction::{self, AUCTION_MANAGER, LOT_DETAILS_BATCH_SIZE};
use gogopool_sdk::dao::{self, ProposalState, DAO_PROPOSAL};
use gogopool_sdk::deposits::{get_deposits, ValidatorPubkey, DEPOSIT_CONTRACT, PUBKEY_LENGTH};
use gogopool_sdk::participation::{self, NETWORK_SETTINGS, TRUSTED_ACTIONS};
use gogopool_sdk::registry::storage_abi;
use gogopool_sdk::trusted_node::{self, TRUSTED_DAO};
use gogopool_sdk::utils::address_to_topic;
use gogopool_sdk::{
    minipool, node, precompute_address, AddressDerivationInput, CallOpts, ContractRegistry, Error,
    MinipoolDeposit, SubmissionKind,
};
use std::collections::HashSet;
use std::sync::Arc;

fn uint(value: u64) -> Token {
    Token::Uint(U256::from(value))
}

fn arg_u64(args: &[Token]) -> u64 {
    args[0].clone().into_uint().unwrap().as_u64()
}

fn arg_address(args: &[Token]) -> Address {
    args[0].clone().into_address().unwrap()
}

fn setup() -> (Arc<MockChain>, ContractRegistry) {
    let chain = MockChain::new();
    let registry = ContractRegistry::new(chain.clone(), STORAGE);
    (chain, registry)
}

fn register_trusted_dao(chain: &MockChain, members: Vec<Address>) -> Abi {
    let abi = chain.register_contract(
        TRUSTED_DAO,
        addr(0x70),
        vec![
            function_json("getMemberCount", &[], &["uint256"]),
            function_json("getMemberMinRequired", &[], &["uint256"]),
            function_json("getMemberAt", &["uint256"], &["address"]),
            function_json("getMemberIsValid", &["address"], &["bool"]),
            function_json("getMemberID", &["address"], &["string"]),
            function_json("getMemberUrl", &["address"], &["string"]),
            function_json("getMemberJoinedTime", &["address"], &["uint256"]),
            function_json("getMemberLastProposalTime", &["address"], &["uint256"]),
            function_json("getMemberGGPBondAmount", &["address"], &["uint256"]),
            function_json("getMemberUnbondedValidatorCount", &["address"], &["uint256"]),
        ],
    );
    let count = members.len() as u64;
    chain.on_call(addr(0x70), &abi, "getMemberCount", move |_| Ok(vec![uint(count)]));
    chain.on_call(addr(0x70), &abi, "getMemberMinRequired", |_| Ok(vec![uint(3)]));
    chain.on_call(addr(0x70), &abi, "getMemberAt", move |args| {
        members
            .get(arg_u64(args) as usize)
            .map(|m| vec![Token::Address(*m)])
            .ok_or_else(|| "index out of range".to_string())
    });
    chain.on_call(addr(0x70), &abi, "getMemberIsValid", |_| Ok(vec![Token::Bool(true)]));
    chain.on_call(addr(0x70), &abi, "getMemberID", |args| {
        Ok(vec![Token::String(format!("member-{:x}", arg_address(args).as_bytes()[0]))])
    });
    chain.on_call(addr(0x70), &abi, "getMemberUrl", |_| Ok(vec![Token::String("https://gogopool.example".into())]));
    chain.on_call(addr(0x70), &abi, "getMemberJoinedTime", |_| Ok(vec![uint(1_650_000_000)]));
    chain.on_call(addr(0x70), &abi, "getMemberLastProposalTime", |_| Ok(vec![uint(0)]));
    chain.on_call(addr(0x70), &abi, "getMemberGGPBondAmount", |_| Ok(vec![uint(1_750)]));
    chain.on_call(addr(0x70), &abi, "getMemberUnbondedValidatorCount", |_| Ok(vec![uint(2)]));
    abi
}

/// Node details come back in registration order with storage-backed withdrawal addresses
#[tokio::test]
async fn test_get_nodes_in_registration_order() {
    let (chain, registry) = setup();
    let nodes: Vec<Address> = (1..=25u64).map(Address::from_low_u64_be).collect();
    let abi = chain.register_contract(
        node::NODE_MANAGER,
        addr(0x60),
        vec![
            function_json("getNodeCount", &[], &["uint256"]),
            function_json("getNodeAt", &["uint256"], &["address"]),
            function_json("getNodeExists", &["address"], &["bool"]),
            function_json("getNodeTimezoneLocation", &["address"], &["string"]),
        ],
    );
    chain.on_call(addr(0x60), &abi, "getNodeCount", |_| Ok(vec![uint(25)]));
    let listed = nodes.clone();
    chain.on_call(addr(0x60), &abi, "getNodeAt", move |args| {
        Ok(vec![Token::Address(listed[arg_u64(args) as usize])])
    });
    chain.on_call(addr(0x60), &abi, "getNodeExists", |_| Ok(vec![Token::Bool(true)]));
    chain.on_call(addr(0x60), &abi, "getNodeTimezoneLocation", |_| {
        Ok(vec![Token::String("Europe/Paris\u{0}".into())])
    });
    let storage = storage_abi();
    chain.on_call(STORAGE, &storage, "getNodeWithdrawalAddress", |args| {
        Ok(vec![Token::Address(Address::from_low_u64_be(arg_address(args).to_low_u64_be() + 1_000))])
    });
    chain.on_call(STORAGE, &storage, "getNodePendingWithdrawalAddress", |_| {
        Ok(vec![Token::Address(Address::zero())])
    });

    let details = node::get_nodes(&registry, &CallOpts::default()).await.unwrap();

    assert_eq!(details.len(), 25);
    for (detail, expected) in details.iter().zip(&nodes) {
        assert_eq!(detail.address, *expected, "Order should follow node indices");
        assert_eq!(
            detail.withdrawal_address,
            Address::from_low_u64_be(expected.to_low_u64_be() + 1_000)
        );
        assert_eq!(detail.timezone_location, "Europe/Paris");
        assert!(detail.exists);
    }
    assert_eq!(chain.call_count(addr(0x60), "getNodeAt"), 25);
}

/// A failing element call fails the whole collection with its batch index
#[tokio::test]
async fn test_get_nodes_propagates_element_failure() {
    let (chain, registry) = setup();
    let abi = chain.register_contract(
        node::NODE_MANAGER,
        addr(0x60),
        vec![
            function_json("getNodeCount", &[], &["uint256"]),
            function_json("getNodeAt", &["uint256"], &["address"]),
        ],
    );
    chain.on_call(addr(0x60), &abi, "getNodeCount", |_| Ok(vec![uint(5)]));
    chain.on_call(addr(0x60), &abi, "getNodeAt", |args| {
        if arg_u64(args) == 3 {
            Err("execution reverted".to_string())
        } else {
            Ok(vec![Token::Address(Address::from_low_u64_be(arg_u64(args) + 1))])
        }
    });

    let err = node::get_node_addresses(&registry, &CallOpts::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Batch { index: 3, .. }), "got {:?}", err);
    assert!(err.is_transport());
}

/// Trusted members are listed with their full details
#[tokio::test]
async fn test_get_trusted_members() {
    let (chain, registry) = setup();
    let members = vec![addr(0xa1), addr(0xa2), addr(0xa3)];
    register_trusted_dao(&chain, members.clone());

    let details = trusted_node::get_members(&registry, &CallOpts::default()).await.unwrap();
    let addresses: Vec<Address> = details.iter().map(|m| m.address).collect();
    assert_eq!(addresses, members);
    assert_eq!(details[1].id, "member-a2");
    assert_eq!(details[0].ggp_bond_amount, U256::from(1_750));
    assert_eq!(details[2].unbonded_validator_count, 2);

    let minimum = trusted_node::get_minimum_member_count(&registry, &CallOpts::default())
        .await
        .unwrap();
    assert_eq!(minimum, 3);
}

fn register_auction(chain: &MockChain, lots: u64, failing_lot: Option<u64>) -> Abi {
    let amounts = [
        "getLotStartPrice",
        "getLotReservePrice",
        "getLotPriceAtCurrentBlock",
        "getLotPriceByTotalBids",
        "getLotCurrentPrice",
        "getLotTotalGGPAmount",
        "getLotClaimedGGPAmount",
        "getLotRemainingGGPAmount",
        "getLotTotalBidAmount",
    ];
    let flags = ["getLotExists", "getLotIsCleared", "getLotGGPRecovered"];
    let mut items = vec![
        function_json("getLotCount", &[], &["uint256"]),
        function_json("getLotStartBlock", &["uint256"], &["uint256"]),
        function_json("getLotEndBlock", &["uint256"], &["uint256"]),
        function_json("getLotAddressBidAmount", &["uint256", "address"], &["uint256"]),
    ];
    items.extend(amounts.iter().map(|m| function_json(m, &["uint256"], &["uint256"])));
    items.extend(flags.iter().map(|m| function_json(m, &["uint256"], &["bool"])));
    let abi = chain.register_contract(AUCTION_MANAGER, addr(0x90), items);

    chain.on_call(addr(0x90), &abi, "getLotCount", move |_| Ok(vec![uint(lots)]));
    chain.on_call(addr(0x90), &abi, "getLotStartBlock", |args| Ok(vec![uint(1_000 + arg_u64(args))]));
    chain.on_call(addr(0x90), &abi, "getLotEndBlock", |args| Ok(vec![uint(2_000 + arg_u64(args))]));
    chain.on_call(addr(0x90), &abi, "getLotAddressBidAmount", |args| {
        let bidder = args[1].clone().into_address().unwrap();
        Ok(vec![uint(if bidder == addr(0xb1) { 5 * arg_u64(args) } else { 0 })])
    });
    for method in amounts {
        chain.on_call(addr(0x90), &abi, method, move |args| {
            let index = arg_u64(args);
            if method == "getLotCurrentPrice" && Some(index) == failing_lot {
                return Err("execution reverted".to_string());
            }
            Ok(vec![uint(index * 100)])
        });
    }
    for method in flags {
        chain.on_call(addr(0x90), &abi, method, move |args| {
            Ok(vec![Token::Bool(method == "getLotExists" || arg_u64(args) % 2 == 1)])
        });
    }
    abi
}

/// Lots come back in index order across several batches of ten
#[tokio::test]
async fn test_get_lots_in_index_order() {
    let (chain, registry) = setup();
    register_auction(&chain, 23, None);

    let lots = auction::get_lots(&registry, &CallOpts::default()).await.unwrap();

    assert_eq!(LOT_DETAILS_BATCH_SIZE, 10);
    assert_eq!(lots.len(), 23);
    for (position, lot) in lots.iter().enumerate() {
        let index = position as u64;
        assert_eq!(lot.index, index, "Order should follow lot indices");
        assert!(lot.exists);
        assert_eq!(lot.start_block, 1_000 + index);
        assert_eq!(lot.end_block, 2_000 + index);
        assert_eq!(lot.current_price, U256::from(index * 100));
        assert_eq!(lot.cleared, index % 2 == 1);
        assert_eq!(lot.address_bid_amount, U256::zero());
    }
    assert_eq!(chain.call_count(addr(0x90), "getLotCount"), 1);
    assert_eq!(chain.call_count(addr(0x90), "getLotTotalBidAmount"), 23);
    assert_eq!(chain.call_count(addr(0x90), "getLotAddressBidAmount"), 0);
}

/// Bid amounts are filled in for the requested bidder only
#[tokio::test]
async fn test_get_lots_with_bids() {
    let (chain, registry) = setup();
    register_auction(&chain, 4, None);

    let lots = auction::get_lots_with_bids(&registry, addr(0xb1), &CallOpts::default())
        .await
        .unwrap();
    let bids: Vec<U256> = lots.iter().map(|l| l.address_bid_amount).collect();
    assert_eq!(bids, vec![U256::from(0), U256::from(5), U256::from(10), U256::from(15)]);

    let other = auction::get_lot_details_with_bids(&registry, 3, addr(0xb2), &CallOpts::default())
        .await
        .unwrap();
    assert_eq!(other.address_bid_amount, U256::zero());
    assert_eq!(other.total_ggp_amount, U256::from(300));
}

/// One failing lot getter fails the whole collection with the lot's index
#[tokio::test]
async fn test_get_lots_propagates_lot_failure() {
    let (chain, registry) = setup();
    register_auction(&chain, 23, Some(14));

    let err = auction::get_lots(&registry, &CallOpts::default()).await.unwrap_err();
    assert!(matches!(err, Error::Batch { index: 14, .. }), "got {:?}", err);
    assert!(err.is_transport());
    assert!(err.to_string().contains("current price"), "got {}", err);
    // The third batch never starts
    assert!(chain.call_count(addr(0x90), "getLotStartPrice") <= 20);
}

fn register_proposals(chain: &MockChain, daos: Vec<&'static str>, payload: Vec<u8>) {
    let abi = chain.register_contract(
        DAO_PROPOSAL,
        addr(0x80),
        vec![
            function_json("getTotal", &[], &["uint256"]),
            function_json("getDAO", &["uint256"], &["string"]),
            function_json("getProposer", &["uint256"], &["address"]),
            function_json("getMessage", &["uint256"], &["string"]),
            function_json("getCreated", &["uint256"], &["uint256"]),
            function_json("getStart", &["uint256"], &["uint256"]),
            function_json("getEnd", &["uint256"], &["uint256"]),
            function_json("getExpires", &["uint256"], &["uint256"]),
            function_json("getVotesRequired", &["uint256"], &["uint256"]),
            function_json("getVotesFor", &["uint256"], &["uint256"]),
            function_json("getVotesAgainst", &["uint256"], &["uint256"]),
            function_json("getCancelled", &["uint256"], &["bool"]),
            function_json("getExecuted", &["uint256"], &["bool"]),
            function_json("getPayload", &["uint256"], &["bytes"]),
            function_json("getState", &["uint256"], &["uint8"]),
            function_json("getReceiptHasVoted", &["uint256", "address"], &["bool"]),
            function_json("getReceiptSupported", &["uint256", "address"], &["bool"]),
        ],
    );
    let total = daos.len() as u64;
    chain.on_call(addr(0x80), &abi, "getTotal", move |_| Ok(vec![uint(total)]));
    chain.on_call(addr(0x80), &abi, "getDAO", move |args| {
        // Proposal IDs start at 1
        let id = arg_u64(args);
        if id == 0 || id > daos.len() as u64 {
            return Err(format!("no proposal {}", id));
        }
        Ok(vec![Token::String(daos[id as usize - 1].to_string())])
    });
    chain.on_call(addr(0x80), &abi, "getProposer", |_| Ok(vec![Token::Address(addr(0xa1))]));
    chain.on_call(addr(0x80), &abi, "getMessage", |args| {
        Ok(vec![Token::String(format!("proposal {}", arg_u64(args)))])
    });
    for (method, value) in [
        ("getCreated", 100),
        ("getStart", 200),
        ("getEnd", 300),
        ("getExpires", 400),
        ("getVotesRequired", 2),
        ("getVotesFor", 3),
        ("getVotesAgainst", 1),
    ] {
        chain.on_call(addr(0x80), &abi, method, move |_| Ok(vec![uint(value)]));
    }
    chain.on_call(addr(0x80), &abi, "getCancelled", |_| Ok(vec![Token::Bool(false)]));
    chain.on_call(addr(0x80), &abi, "getExecuted", |_| Ok(vec![Token::Bool(true)]));
    chain.on_call(addr(0x80), &abi, "getPayload", move |_| Ok(vec![Token::Bytes(payload.clone())]));
    chain.on_call(addr(0x80), &abi, "getState", |_| Ok(vec![uint(6)]));
    chain.on_call(addr(0x80), &abi, "getReceiptHasVoted", |_| Ok(vec![Token::Bool(true)]));
    chain.on_call(addr(0x80), &abi, "getReceiptSupported", |_| Ok(vec![Token::Bool(false)]));
}

/// Filtering by DAO returns 1-based proposal IDs in ascending order
#[tokio::test]
async fn test_dao_proposal_ids_are_one_based() {
    let (chain, registry) = setup();
    register_proposals(
        &chain,
        vec![
            "gogoDAONodeTrustedProposals",
            "gogoDAOProtocolProposals",
            "gogoDAONodeTrustedProposals",
            "gogoDAOProtocolProposals",
            "gogoDAONodeTrustedProposals",
        ],
        vec![],
    );

    let ids = dao::get_dao_proposal_ids(&registry, "gogoDAONodeTrustedProposals", &CallOpts::default())
        .await
        .unwrap();
    assert_eq!(ids, vec![1, 3, 5]);
    assert_eq!(chain.call_count(addr(0x80), "getDAO"), 5);
}

/// Proposal details include the decoded payload and the member's vote
#[tokio::test]
async fn test_proposal_details_with_member() {
    let (chain, registry) = setup();
    let trusted_proposals = chain.register_abi(
        "gogoDAONodeTrustedProposals",
        vec![function_json("proposalLeave", &["address"], &[])],
    );
    let payload = trusted_proposals
        .function("proposalLeave")
        .unwrap()
        .encode_input(&[Token::Address(addr(0xa2))])
        .unwrap();
    register_proposals(&chain, vec!["gogoDAONodeTrustedProposals"], payload.clone());

    let details = dao::get_proposal_details_with_member(&registry, 1, addr(0xa1), &CallOpts::default())
        .await
        .unwrap();

    assert_eq!(details.id, 1);
    assert_eq!(details.message, "proposal 1");
    assert_eq!(details.votes_for, U256::from(3));
    assert_eq!(details.state, ProposalState::Executed);
    assert!(details.member_voted);
    assert!(!details.member_supported);
    assert_eq!(details.payload.to_vec(), payload);
    assert_eq!(details.payload_str, format!("proposalLeave({:?})", addr(0xa2)));
}

/// A payload no registered ABI can describe is reported as unknown
#[tokio::test]
async fn test_undescribable_payload() {
    let (chain, registry) = setup();
    register_proposals(&chain, vec!["gogoDAOProtocolProposals"], vec![0xde, 0xad, 0xbe, 0xef]);

    let details = dao::get_proposal_details(&registry, 1, &CallOpts::default()).await.unwrap();
    assert_eq!(details.payload_str, "(unknown)");
}

fn deposit_log(abi: &Abi, pubkey: &ValidatorPubkey, amount_gwei: u64, block: u64, tx_index: u64) -> ethers::types::Log {
    raw_deposit_log(
        abi,
        pubkey.as_bytes().to_vec(),
        amount_gwei.to_le_bytes().to_vec(),
        block,
        tx_index,
    )
}

fn raw_deposit_log(abi: &Abi, pubkey: Vec<u8>, amount: Vec<u8>, block: u64, tx_index: u64) -> ethers::types::Log {
    let data = ethers::abi::encode(&[
        Token::Bytes(pubkey),
        Token::Bytes(vec![0x01; 32]),
        Token::Bytes(amount),
        Token::Bytes(vec![0x02; 96]),
        Token::Bytes(0u64.to_le_bytes().to_vec()),
    ]);
    make_log(addr(0xdd), vec![abi.event("DepositEvent").unwrap().signature()], data, block, tx_index)
}

fn register_deposit_contract(chain: &MockChain) -> Abi {
    chain.register_contract(
        DEPOSIT_CONTRACT,
        addr(0xdd),
        vec![event_json(
            "DepositEvent",
            &[
                ("pubkey", "bytes", false),
                ("withdrawal_credentials", "bytes", false),
                ("amount", "bytes", false),
                ("signature", "bytes", false),
                ("index", "bytes", false),
            ],
        )],
    )
}

/// Deposits are grouped by requested pubkey and ordered by block then transaction index
#[tokio::test]
async fn test_get_deposits_grouped_and_sorted() {
    let (chain, registry) = setup();
    let abi = register_deposit_contract(&chain);
    let first = ValidatorPubkey([0x11; PUBKEY_LENGTH]);
    let second = ValidatorPubkey([0x22; PUBKEY_LENGTH]);
    let ignored = ValidatorPubkey([0x33; PUBKEY_LENGTH]);
    chain.push_log(deposit_log(&abi, &first, 1_000_000_000, 20, 1));
    chain.push_log(deposit_log(&abi, &first, 31_000_000_000, 10, 3));
    chain.push_log(deposit_log(&abi, &ignored, 32_000_000_000, 12, 0));
    chain.push_log(deposit_log(&abi, &second, 32_000_000_000, 15, 2));

    let wanted: HashSet<ValidatorPubkey> = [first, second].into_iter().collect();
    let deposits = get_deposits(&registry, &wanted, Some(0), None).await.unwrap();

    assert_eq!(deposits.len(), 2, "Unrequested pubkeys should be dropped");
    let first_deposits: Vec<(u64, u64, u64)> = deposits[&first]
        .iter()
        .map(|d| (d.block_number, d.tx_index, d.amount))
        .collect();
    assert_eq!(first_deposits, vec![(10, 3, 31_000_000_000), (20, 1, 1_000_000_000)]);
    assert_eq!(deposits[&second][0].withdrawal_credentials, H256::repeat_byte(0x01));
}

/// Malformed deposits for other validators are skipped; a malformed requested one fails
#[tokio::test]
async fn test_malformed_foreign_deposits_are_skipped() {
    let (chain, registry) = setup();
    let abi = register_deposit_contract(&chain);
    let wanted_key = ValidatorPubkey([0x11; PUBKEY_LENGTH]);
    chain.push_log(raw_deposit_log(&abi, vec![0x33; PUBKEY_LENGTH], vec![0x01; 4], 11, 0));
    chain.push_log(raw_deposit_log(&abi, vec![0x44; 20], vec![0x01; 8], 12, 0));
    chain.push_log(deposit_log(&abi, &wanted_key, 32_000_000_000, 13, 0));

    let wanted: HashSet<ValidatorPubkey> = [wanted_key].into_iter().collect();
    let deposits = get_deposits(&registry, &wanted, Some(0), None).await.unwrap();
    assert_eq!(deposits.len(), 1);
    assert_eq!(deposits[&wanted_key][0].amount, 32_000_000_000);

    chain.push_log(raw_deposit_log(&abi, wanted_key.as_bytes().to_vec(), vec![0x01; 4], 14, 0));
    let err = get_deposits(&registry, &wanted, Some(0), None).await.unwrap_err();
    assert!(matches!(err, Error::Decode { .. }), "got {:?}", err);
}

/// The live address derivation agrees with the pure function
#[tokio::test]
async fn test_generate_minipool_address() {
    let (chain, registry) = setup();
    let bytecode = vec![0x60, 0x80, 0x60, 0x40, 0x52];
    let abi = chain.register_contract(
        MINIPOOL_MANAGER,
        addr(0x61),
        vec![function_json("getMinipoolBytecode", &[], &["bytes"])],
    );
    let served = bytecode.clone();
    chain.on_call(addr(0x61), &abi, "getMinipoolBytecode", move |_| Ok(vec![Token::Bytes(served.clone())]));

    let node_address = addr(0xab);
    let salt = U256::from(42);
    let address = generate_minipool_address(&registry, node_address, MinipoolDeposit::Full, salt, None)
        .await
        .unwrap();

    let expected = precompute_address(&AddressDerivationInput {
        factory: addr(0x61),
        node_address,
        salt,
        bytecode: bytecode.clone().into(),
        storage_address: STORAGE,
        deposit: MinipoolDeposit::Full,
    });
    assert_eq!(address, expected);

    // Supplied bytecode skips the manager call
    let supplied = generate_minipool_address(
        &registry,
        node_address,
        MinipoolDeposit::Half,
        salt,
        Some(bytecode.as_slice()),
    )
    .await
    .unwrap();
    assert_ne!(supplied, address, "Deposit kind is part of the init code");
    assert_eq!(chain.call_count(addr(0x61), "getMinipoolBytecode"), 1);
}

fn register_participation(chain: &MockChain, members: &[Address], frequency: u64) -> Abi {
    let settings = chain.register_contract(
        NETWORK_SETTINGS,
        addr(0x50),
        vec![
            function_json("getSubmitPricesFrequency", &[], &["uint256"]),
            function_json("getSubmitBalancesFrequency", &[], &["uint256"]),
        ],
    );
    chain.on_call(addr(0x50), &settings, "getSubmitPricesFrequency", move |_| Ok(vec![uint(frequency)]));
    chain.on_call(addr(0x50), &settings, "getSubmitBalancesFrequency", move |_| Ok(vec![uint(frequency)]));

    let node_event = |name: &str| {
        event_json(
            name,
            &[
                ("nodeAddress", "address", true),
                ("ggpBondAmount", "uint256", false),
                ("time", "uint256", false),
            ],
        )
    };
    let actions = chain.register_contract(
        TRUSTED_ACTIONS,
        addr(0x51),
        vec![
            node_event("ActionJoined"),
            node_event("ActionLeave"),
            node_event("ActionKick"),
            event_json(
                "ActionChallengeDecided",
                &[
                    ("nodeChallengedAddress", "address", true),
                    ("nodeChallengeDeciderAddress", "address", true),
                    ("success", "bool", false),
                    ("time", "uint256", false),
                ],
            ),
        ],
    );
    // Membership changes at 250; the failed challenge at 260 is not a change
    chain.push_log(make_log(
        addr(0x51),
        vec![actions.event("ActionJoined").unwrap().signature(), address_to_topic(members[2])],
        ethers::abi::encode(&[uint(1_750), uint(0)]),
        250,
        0,
    ));
    chain.push_log(make_log(
        addr(0x51),
        vec![
            actions.event("ActionChallengeDecided").unwrap().signature(),
            address_to_topic(members[0]),
            address_to_topic(members[1]),
        ],
        ethers::abi::encode(&[Token::Bool(false), uint(0)]),
        260,
        0,
    ));

    register_trusted_dao(chain, members.to_vec());

    chain.register_contract(
        "gogoNetworkPrices",
        addr(0x52),
        vec![event_json(
            "PricesSubmitted",
            &[
                ("from", "address", true),
                ("block", "uint256", false),
                ("ggpPrice", "uint256", false),
                ("time", "uint256", false),
            ],
        )],
    )
}

fn price_submission(abi: &Abi, member: Address, block: u64) -> ethers::types::Log {
    make_log(
        addr(0x52),
        vec![abi.event("PricesSubmitted").unwrap().signature(), address_to_topic(member)],
        ethers::abi::encode(&[uint(block), uint(1_000), uint(0)]),
        block,
        0,
    )
}

/// Evenly shared submissions give probability 1 and per-interval tables
#[tokio::test]
async fn test_calculate_participation_end_to_end() {
    let (chain, registry) = setup();
    let members = vec![addr(0xa1), addr(0xa2), addr(0xa3)];
    let prices = register_participation(&chain, &members, 100);
    chain.set_head(500);

    // Before the membership change, never counted
    chain.push_log(price_submission(&prices, members[0], 200));
    for (member, block) in [
        (members[0], 300),
        (members[1], 300),
        (members[0], 400),
        (members[2], 400),
        (members[1], 500),
        (members[2], 500),
    ] {
        chain.push_log(price_submission(&prices, member, block));
    }

    let report = participation::calculate_participation(&registry, SubmissionKind::Prices, &CallOpts::default())
        .await
        .unwrap();

    assert_eq!(report.start_block, 300);
    assert_eq!(report.update_frequency, 100);
    assert_eq!(report.update_count, 3);
    assert!((report.expected_submissions - 2.0).abs() < 1e-12);
    assert!((report.probability - 1.0).abs() < 1e-12, "got {}", report.probability);
    assert_eq!(report.actual_submissions[&members[0]], 2);
    assert_eq!(report.participation[&members[0]], vec![true, true, false]);
    assert_eq!(report.participation[&members[1]], vec![true, false, true]);
    assert_eq!(report.participation[&members[2]], vec![false, true, true]);
}

/// Latest participation flags members that submitted in the current interval
#[tokio::test]
async fn test_latest_participation() {
    let (chain, registry) = setup();
    let members = vec![addr(0xa1), addr(0xa2), addr(0xa3)];
    let prices = register_participation(&chain, &members, 100);
    chain.set_head(520);
    chain.push_log(price_submission(&prices, members[0], 400));
    chain.push_log(price_submission(&prices, members[1], 500));
    chain.push_log(price_submission(&prices, members[2], 500));

    let latest = participation::latest_participation(&registry, SubmissionKind::Prices, &CallOpts::default())
        .await
        .unwrap();

    assert_eq!(latest.len(), 3);
    assert!(!latest[&members[0]]);
    assert!(latest[&members[1]]);
    assert!(latest[&members[2]]);
}

fn register_minipool_manager(chain: &MockChain, total: u64) -> Abi {
    let abi = chain.register_contract(
        MINIPOOL_MANAGER,
        addr(0x61),
        vec![
            function_json("getMinipoolCount", &[], &["uint256"]),
            function_json("getMinipoolAt", &["uint256"], &["address"]),
            function_json("getMinipoolExists", &["address"], &["bool"]),
            function_json("getMinipoolPubkey", &["address"], &["bytes"]),
            function_json("getPrelaunchMinipools", &["uint256", "uint256"], &["address[]"]),
        ],
    );
    chain.on_call(addr(0x61), &abi, "getMinipoolCount", move |_| Ok(vec![uint(total)]));
    chain.on_call(addr(0x61), &abi, "getMinipoolAt", |args| {
        Ok(vec![Token::Address(Address::from_low_u64_be(arg_u64(args) + 1))])
    });
    chain.on_call(addr(0x61), &abi, "getMinipoolExists", |_| Ok(vec![Token::Bool(true)]));
    chain.on_call(addr(0x61), &abi, "getMinipoolPubkey", |args| {
        // Minipool 2 has not deposited yet
        let minipool = arg_address(args).to_low_u64_be();
        if minipool == 2 {
            Ok(vec![Token::Bytes(vec![])])
        } else {
            Ok(vec![Token::Bytes(vec![minipool as u8; PUBKEY_LENGTH])])
        }
    });
    // Every tenth minipool is in prelaunch
    chain.on_call(addr(0x61), &abi, "getPrelaunchMinipools", move |args| {
        let offset = arg_u64(args);
        let limit = args[1].clone().into_uint().unwrap().as_u64();
        let page = (offset..(offset + limit).min(total))
            .filter(|index| index % 10 == 0)
            .map(|index| Token::Address(Address::from_low_u64_be(index + 1)))
            .collect();
        Ok(vec![Token::Array(page)])
    });
    abi
}

/// Minipool details pair each address with its validator pubkey
#[tokio::test]
async fn test_get_minipools() {
    let (chain, registry) = setup();
    register_minipool_manager(&chain, 3);

    let minipools = minipool::get_minipools(&registry, &CallOpts::default()).await.unwrap();

    let addresses: Vec<Address> = minipools.iter().map(|m| m.address).collect();
    assert_eq!(addresses, (1..=3u64).map(Address::from_low_u64_be).collect::<Vec<_>>());
    assert_eq!(minipools[0].pubkey, ValidatorPubkey([1; PUBKEY_LENGTH]));
    assert_eq!(minipools[1].pubkey, ValidatorPubkey([0; PUBKEY_LENGTH]), "Empty key reads as zero");
    assert!(minipools.iter().all(|m| m.exists));
}

/// Prelaunch addresses are read in fixed pages covering every minipool
#[tokio::test]
async fn test_prelaunch_minipools_are_paged() {
    let (chain, registry) = setup();
    register_minipool_manager(&chain, 1_600);

    let prelaunch = minipool::get_prelaunch_minipool_addresses(&registry, &CallOpts::default())
        .await
        .unwrap();

    assert_eq!(chain.call_count(addr(0x61), "getPrelaunchMinipools"), 3, "1600 minipools span 3 pages of 750");
    assert_eq!(prelaunch.len(), 160);
    assert_eq!(prelaunch[0], Address::from_low_u64_be(1));
    assert_eq!(prelaunch[159], Address::from_low_u64_be(1_591));
}
