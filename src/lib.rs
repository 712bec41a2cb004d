//! # GoGoPool SDK
//!
//! A Rust client library for the GoGoPool liquid staking protocol on Avalanche.
//! The protocol is a suite of interlinked contracts that find each other through
//! a single storage contract; this SDK does the same from the outside.
//!
//! ## Overview
//!
//! - **Registry**: resolves logical contract names to callable handles through
//!   the storage contract, with TTL caching and a per-name stampede guard
//! - **Batch fetching**: retrieves index-addressed on-chain collections in
//!   fixed-width, bounded-concurrency batches
//! - **Event logs**: chunked `eth_getLogs` queries that follow a contract
//!   across every address it has been upgraded from
//! - **Address precomputation**: CREATE2 addresses of minipools before they
//!   are deployed
//! - **Participation**: how evenly trusted nodes share price and balance
//!   submissions
//!
//! ## Architecture
//!
//! ### Core Layer
//! [`ContractRegistry`] owns the [`Transport`], the cache tables and the
//! [`BatchFetcher`]. Everything else takes a `&ContractRegistry`.
//!
//! ### Domain Layer
//! `node`, `minipool`, `trusted_node`, `dao`, `auction` and `deposits` are
//! thin collections built on the core layer.
//!
//! ```rust,ignore
//! use gogopool_sdk::{node, CallOpts, ContractRegistry, Settings};
//!
//! let registry = ContractRegistry::connect(&Settings::new()?)?;
//! let nodes = node::get_nodes(&registry, &CallOpts::default()).await?;
//! ```

// Core
/// Error taxonomy
pub mod error;
/// RPC transport seam and ethers adapter
pub mod transport;
/// Resolved contract handles
pub mod contract;
/// TTL cache tables
pub mod cache;
/// Name → address → ABI → handle registry
pub mod registry;
/// Bounded-concurrency batch fetching
pub mod batch;
/// Chunked, upgrade-aware event log retrieval
pub mod logs;
/// CREATE2 address precomputation
pub mod address;
/// Trusted node participation estimates
pub mod participation;

// Domain collections
/// Registered nodes
pub mod node;
/// Minipools
pub mod minipool;
/// Trusted node DAO members
pub mod trusted_node;
/// DAO proposals
pub mod dao;
/// Beacon deposit events
pub mod deposits;
/// GGP auction lots
pub mod auction;

// Infrastructure
/// Metrics and observability
pub mod metrics;
/// Configuration management
pub mod settings;
/// General utilities
pub mod utils;

// Re-exports for convenience
pub use address::{create2_address, precompute_address, AddressDerivationInput, MinipoolDeposit};
pub use batch::BatchFetcher;
pub use contract::Contract;
pub use error::{Error, Result, TransportError};
pub use logs::{filter_contract_logs, get_logs, LogQuery};
pub use participation::{SubmissionKind, TrustedNodeParticipation};
pub use registry::{ContractRegistry, RegistryOptions};
pub use settings::Settings;
pub use transport::{CallOpts, EthersTransport, TransactOpts, Transport};
