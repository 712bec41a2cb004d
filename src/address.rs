//! # CREATE2 Address Precomputer
//!
//! Deterministic computation of the address a minipool will be deployed at,
//! before any transaction is sent. The derivation mirrors the minipool
//! manager's deployment:
//!
//! - `node_salt = keccak256(node_address ++ uint256(salt))`
//! - `init_hash = keccak256(creation_code ++ abi.encode(storage, node, deposit_type))`
//! - `address   = keccak256(0xff ++ deployer ++ node_salt ++ init_hash)[12..]`
//!
//! Everything except [`generate_minipool_address`] is pure.

use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::{get_create2_address_from_hash, keccak256};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::registry::ContractRegistry;
use crate::transport::CallOpts;

pub const MINIPOOL_MANAGER: &str = "rocketMinipoolManager";

/// Deposit kind encoded as `uint8` in the minipool constructor arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MinipoolDeposit {
    None = 0,
    Full = 1,
    Half = 2,
    Empty = 3,
}

impl MinipoolDeposit {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MinipoolDeposit {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Full),
            2 => Ok(Self::Half),
            3 => Ok(Self::Empty),
            other => Err(Error::InvalidInput(format!("unknown deposit type {}", other))),
        }
    }
}

/// Raw inputs to a minipool address derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressDerivationInput {
    /// Contract that runs CREATE2, the minipool manager.
    pub factory: Address,
    pub node_address: Address,
    pub salt: U256,
    /// Creation bytecode, without constructor arguments.
    pub bytecode: Bytes,
    /// Storage contract passed to the minipool constructor.
    pub storage_address: Address,
    pub deposit: MinipoolDeposit,
}

/// `keccak256(node_address ++ salt as 32-byte big-endian)`.
pub fn node_salt(node_address: Address, salt: U256) -> H256 {
    let mut preimage = [0u8; 52];
    preimage[..20].copy_from_slice(node_address.as_bytes());
    salt.to_big_endian(&mut preimage[20..]);
    H256::from(keccak256(preimage))
}

/// Hash of creation bytecode followed by its ABI-encoded constructor arguments.
pub fn init_code_hash(bytecode: &[u8], constructor_args: &[Token]) -> H256 {
    let mut init_code = bytecode.to_vec();
    init_code.extend_from_slice(&encode(constructor_args));
    H256::from(keccak256(init_code))
}

/// Minipool init code hash for a given storage contract, node and deposit kind.
pub fn minipool_init_code_hash(
    bytecode: &[u8],
    storage_address: Address,
    node_address: Address,
    deposit: MinipoolDeposit,
) -> H256 {
    init_code_hash(
        bytecode,
        &[
            Token::Address(storage_address),
            Token::Address(node_address),
            Token::Uint(U256::from(deposit.as_u8())),
        ],
    )
}

/// Address `input.factory` deploys the minipool at.
pub fn precompute_address(input: &AddressDerivationInput) -> Address {
    let salt = node_salt(input.node_address, input.salt);
    let init_hash = minipool_init_code_hash(
        &input.bytecode,
        input.storage_address,
        input.node_address,
        input.deposit,
    );
    create2_address(input.factory, salt, init_hash)
}

/// Standard CREATE2 address from an already hashed salt and init code.
pub fn create2_address(deployer: Address, salt: H256, init_code_hash: H256) -> Address {
    get_create2_address_from_hash(deployer, salt, init_code_hash)
}

/// Creation bytecode the minipool manager deploys.
pub async fn get_minipool_bytecode(registry: &ContractRegistry, opts: &CallOpts) -> Result<Bytes> {
    let manager = registry.resolve(MINIPOOL_MANAGER).await?;
    manager
        .call("getMinipoolBytecode", (), opts)
        .await
        .map_err(|e| e.context("could not get minipool contract bytecode"))
}

/// Address the minipool manager would deploy a minipool at for `node_address`,
/// `deposit` and `salt`. The bytecode is read from the manager unless supplied.
pub async fn generate_minipool_address(
    registry: &ContractRegistry,
    node_address: Address,
    deposit: MinipoolDeposit,
    salt: U256,
    bytecode: Option<&[u8]>,
) -> Result<Address> {
    let manager = registry.resolve(MINIPOOL_MANAGER).await?;
    let bytecode: Bytes = match bytecode {
        Some(code) if !code.is_empty() => Bytes::from(code.to_vec()),
        _ => get_minipool_bytecode(registry, &CallOpts::default()).await?,
    };
    if bytecode.is_empty() {
        return Err(Error::decode(
            "could not get minipool contract bytecode",
            "empty bytecode",
        ));
    }

    Ok(precompute_address(&AddressDerivationInput {
        factory: manager.address(),
        node_address,
        salt,
        bytecode,
        storage_address: registry.storage().address(),
        deposit,
    }))
}
