//! Beacon deposit contract events for a set of validator pubkeys.

use ethers::abi::Token;
use ethers::types::{Bytes, Log, TxHash, H256};
use serde::{Serialize, Serializer};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::contract::{log_param, Contract};
use crate::error::{Error, Result};
use crate::logs::{get_logs, LogQuery};
use crate::registry::ContractRegistry;

pub const DEPOSIT_CONTRACT: &str = "casperDeposit";
pub const DEPOSIT_EVENT: &str = "DepositEvent";

pub const PUBKEY_LENGTH: usize = 48;

/// BLS public key of a validator.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValidatorPubkey(pub [u8; PUBKEY_LENGTH]);

impl ValidatorPubkey {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; PUBKEY_LENGTH] = bytes.try_into().map_err(|_| {
            Error::InvalidInput(format!(
                "validator pubkey must be {} bytes, got {}",
                PUBKEY_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for ValidatorPubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for ValidatorPubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for ValidatorPubkey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let raw = s.trim().trim_start_matches("0x");
        let bytes = hex::decode(raw)
            .map_err(|e| Error::InvalidInput(format!("invalid validator pubkey {}: {}", s, e)))?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for ValidatorPubkey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositData {
    pub pubkey: ValidatorPubkey,
    pub withdrawal_credentials: H256,
    /// Deposit amount in gwei.
    pub amount: u64,
    pub signature: Bytes,
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub tx_index: u64,
}

/// Every deposit made for one of `pubkeys` since `start_block`, grouped by
/// pubkey and ordered by block then transaction index.
pub async fn get_deposits(
    registry: &ContractRegistry,
    pubkeys: &HashSet<ValidatorPubkey>,
    start_block: Option<u64>,
    chunk_size: Option<u64>,
) -> Result<HashMap<ValidatorPubkey, Vec<DepositData>>> {
    let deposit = registry.resolve(DEPOSIT_CONTRACT).await?;
    let signature = deposit.event_signature(DEPOSIT_EVENT)?;
    let mut query = LogQuery::new(vec![deposit.address()])
        .topics(vec![vec![signature]])
        .chunk_size(chunk_size);
    query.from_block = start_block;
    let logs = get_logs(registry, &query).await?;

    let mut deposits: HashMap<ValidatorPubkey, Vec<DepositData>> = HashMap::with_capacity(pubkeys.len());
    for log in &logs {
        if let Some(data) = decode_deposit(&deposit, log, pubkeys)? {
            deposits.entry(data.pubkey).or_default().push(data);
        }
    }
    for entries in deposits.values_mut() {
        sort_deposits(entries);
    }
    Ok(deposits)
}

/// Decode `log` if it is a deposit for one of `pubkeys`. Deposits for other
/// validators are skipped before any of their other fields are checked.
fn decode_deposit(
    deposit: &Contract,
    log: &Log,
    pubkeys: &HashSet<ValidatorPubkey>,
) -> Result<Option<DepositData>> {
    let decoded = deposit.decode_log(DEPOSIT_EVENT, log)?;
    let pubkey = match ValidatorPubkey::from_slice(&bytes_param(&decoded, "pubkey")?) {
        Ok(pubkey) if pubkeys.contains(&pubkey) => pubkey,
        _ => return Ok(None),
    };
    let credentials = bytes_param(&decoded, "withdrawal_credentials")?;
    if credentials.len() != 32 {
        return Err(Error::decode(
            "decode DepositEvent",
            format!("withdrawal credentials are {} bytes", credentials.len()),
        ));
    }
    let amount = decode_amount(&bytes_param(&decoded, "amount")?)?;
    let signature = bytes_param(&decoded, "signature")?;

    Ok(Some(DepositData {
        pubkey,
        withdrawal_credentials: H256::from_slice(&credentials),
        amount,
        signature: Bytes::from(signature),
        tx_hash: log.transaction_hash.unwrap_or_default(),
        block_number: log.block_number.map(|n| n.as_u64()).unwrap_or_default(),
        tx_index: log.transaction_index.map(|n| n.as_u64()).unwrap_or_default(),
    }))
}

fn bytes_param(decoded: &ethers::abi::Log, name: &str) -> Result<Vec<u8>> {
    match log_param(decoded, name)? {
        Token::Bytes(bytes) | Token::FixedBytes(bytes) => Ok(bytes),
        other => Err(Error::decode(
            "decode DepositEvent",
            format!("{} is not bytes: {:?}", name, other),
        )),
    }
}

/// Deposit amounts are emitted as 8 little-endian bytes.
pub fn decode_amount(raw: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = raw.try_into().map_err(|_| {
        Error::decode(
            "decode DepositEvent",
            format!("amount is {} bytes, expected 8", raw.len()),
        )
    })?;
    Ok(u64::from_le_bytes(bytes))
}

/// Lower blocks first; lower transaction indices first within a block.
pub fn sort_deposits(deposits: &mut [DepositData]) {
    deposits.sort_by_key(|d| (d.block_number, d.tx_index));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deposit_at(block_number: u64, tx_index: u64) -> DepositData {
        DepositData {
            pubkey: ValidatorPubkey([7u8; PUBKEY_LENGTH]),
            withdrawal_credentials: H256::zero(),
            amount: 32_000_000_000,
            signature: Bytes::default(),
            tx_hash: TxHash::zero(),
            block_number,
            tx_index,
        }
    }

    #[test]
    fn test_amount_is_little_endian() {
        let raw = 32_000_000_000u64.to_le_bytes();
        assert_eq!(decode_amount(&raw).unwrap(), 32_000_000_000);
        assert!(decode_amount(&raw[..4]).is_err());
    }

    #[test]
    fn test_sort_by_block_then_index() {
        let mut deposits = vec![deposit_at(10, 3), deposit_at(9, 7), deposit_at(10, 1)];
        sort_deposits(&mut deposits);
        let order: Vec<(u64, u64)> = deposits.iter().map(|d| (d.block_number, d.tx_index)).collect();
        assert_eq!(order, vec![(9, 7), (10, 1), (10, 3)]);
    }

    #[test]
    fn test_pubkey_parsing() {
        let hex_key = format!("0x{}", "ab".repeat(PUBKEY_LENGTH));
        let pubkey: ValidatorPubkey = hex_key.parse().unwrap();
        assert_eq!(pubkey.to_string(), hex_key);
        assert!("0xabcd".parse::<ValidatorPubkey>().is_err());
    }
}
