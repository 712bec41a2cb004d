//! # Participation Estimator
//!
//! Estimates how evenly trusted nodes share the work of submitting prices or
//! balances. Since the latest change in membership, each interval of
//! `frequency` blocks needs `floor(members / 2 + 1)` submissions. If members
//! submitted at random, each would be expected to submit
//! `intervals * consensus / members` times. A chi-square statistic over the
//! actual counts, with `members - 1` degrees of freedom, gives the probability
//! that the observed spread is consistent with that random model.

use ethers::abi::Token;
use ethers::types::{Address, Log};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::contract::log_param;
use crate::error::{Error, Result};
use crate::logs::{get_logs, LogQuery};
use crate::registry::ContractRegistry;
use crate::transport::CallOpts;
use crate::trusted_node::{self, MEMBER_DETAILS_BATCH_SIZE};
use crate::utils::{address_to_topic, topic_at, topic_to_address, u256_to_u64};

pub const NETWORK_SETTINGS: &str = "rocketDAOProtocolSettingsNetwork";
pub const TRUSTED_ACTIONS: &str = "gogoDAONodeTrustedActions";

/// Membership changes are only searched for this many intervals back.
pub const MEMBER_CHANGE_LOOKBACK_INTERVALS: u64 = 50;

const MEMBER_CHANGE_EVENTS: [&str; 4] = [
    "ActionJoined",
    "ActionLeave",
    "ActionKick",
    "ActionChallengeDecided",
];
const CHALLENGE_DECIDED_EVENT: &str = "ActionChallengeDecided";

/// Which trusted-node submission cadence to analyse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubmissionKind {
    Prices,
    Balances,
}

impl SubmissionKind {
    pub fn contract_name(self) -> &'static str {
        match self {
            SubmissionKind::Prices => "gogoNetworkPrices",
            SubmissionKind::Balances => "gogoNetworkBalances",
        }
    }

    pub fn event_name(self) -> &'static str {
        match self {
            SubmissionKind::Prices => "PricesSubmitted",
            SubmissionKind::Balances => "BalancesSubmitted",
        }
    }

    fn frequency_method(self) -> &'static str {
        match self {
            SubmissionKind::Prices => "getSubmitPricesFrequency",
            SubmissionKind::Balances => "getSubmitBalancesFrequency",
        }
    }

    fn label(self) -> &'static str {
        match self {
            SubmissionKind::Prices => "prices",
            SubmissionKind::Balances => "balances",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustedNodeParticipation {
    pub start_block: u64,
    pub update_frequency: u64,
    pub update_count: u64,
    /// Probability that the observed submission counts arose from members
    /// taking turns at random. `1.0` when nothing can be measured yet.
    pub probability: f64,
    pub expected_submissions: f64,
    pub actual_submissions: HashMap<Address, u64>,
    /// Per member, one flag per interval since `start_block`.
    pub participation: HashMap<Address, Vec<bool>>,
}

/// First interval boundary strictly after `change_block`.
pub fn participation_start_block(change_block: u64, frequency: u64) -> u64 {
    (change_block / frequency + 1) * frequency
}

/// Intervals passed between `start_block` and `current_block`.
pub fn intervals_passed(current_block: u64, start_block: u64, frequency: u64) -> u64 {
    if current_block > start_block {
        (current_block - start_block) / frequency + 1
    } else {
        0
    }
}

/// Submissions each of `members` would make if consensus were reached by
/// members taking turns at random.
pub fn expected_submissions(intervals: u64, members: usize) -> f64 {
    if members == 0 {
        return 0.0;
    }
    let consensus = (members as f64 / 2.0 + 1.0).floor();
    intervals as f64 * consensus / members as f64
}

/// Builds the participation report from submission block lists, one entry
/// per current member.
pub fn compute_participation(
    current_block: u64,
    frequency: u64,
    change_block: u64,
    submissions: &[(Address, Vec<u64>)],
) -> Result<TrustedNodeParticipation> {
    if frequency == 0 {
        return Err(Error::InvalidInput("submission frequency must be > 0".to_string()));
    }
    let start_block = participation_start_block(change_block, frequency);
    let update_count = intervals_passed(current_block, start_block, frequency);
    let expected = expected_submissions(update_count, submissions.len());

    let mut actual_submissions = HashMap::with_capacity(submissions.len());
    let mut participation = HashMap::with_capacity(submissions.len());
    let mut chi = 0.0;
    let first_interval = start_block / frequency;

    for (member, blocks) in submissions {
        let mut table = vec![false; update_count as usize];
        let actual = if update_count > 0 { blocks.len() as u64 } else { 0 };
        if update_count > 0 && expected > 0.0 {
            let delta = actual as f64 - expected;
            chi += delta * delta / expected;
            for block in blocks {
                // Off-step submissions count towards the total only.
                if block % frequency != 0 {
                    continue;
                }
                if let Some(index) = (block / frequency).checked_sub(first_interval) {
                    if let Some(slot) = table.get_mut(index as usize) {
                        *slot = true;
                    }
                }
            }
        }
        actual_submissions.insert(*member, actual);
        participation.insert(*member, table);
    }

    let degrees_of_freedom = submissions.len().saturating_sub(1);
    let probability = if update_count > 0 && degrees_of_freedom > 0 && expected > 0.0 {
        regularized_gamma_q(degrees_of_freedom as f64 / 2.0, chi / 2.0)
    } else {
        1.0
    };

    Ok(TrustedNodeParticipation {
        start_block,
        update_frequency: frequency,
        update_count,
        probability,
        expected_submissions: expected,
        actual_submissions,
        participation,
    })
}

/// Submission cadence in blocks.
pub async fn get_submit_frequency(
    registry: &ContractRegistry,
    kind: SubmissionKind,
    opts: &CallOpts,
) -> Result<u64> {
    let settings = registry.resolve(NETWORK_SETTINGS).await?;
    let frequency = settings
        .call_u64(kind.frequency_method(), (), opts)
        .await
        .map_err(|e| e.context(format!("could not get submit {} frequency", kind.label())))?;
    if frequency == 0 {
        return Err(Error::decode(
            format!("could not get submit {} frequency", kind.label()),
            "frequency is zero",
        ));
    }
    Ok(frequency)
}

/// Most recent block at which trusted membership changed, searching from
/// `from_block`. Returns `from_block` when nothing changed.
pub async fn latest_member_change_block(
    registry: &ContractRegistry,
    from_block: u64,
    chunk_size: Option<u64>,
) -> Result<u64> {
    let actions = registry.resolve(TRUSTED_ACTIONS).await?;
    let signatures = MEMBER_CHANGE_EVENTS
        .iter()
        .map(|event| actions.event_signature(event))
        .collect::<Result<Vec<_>>>()?;
    let challenge_decided = actions.event_signature(CHALLENGE_DECIDED_EVENT)?;

    let query = LogQuery::new(vec![actions.address()])
        .topics(vec![signatures])
        .from_block(from_block)
        .chunk_size(chunk_size);
    let logs = get_logs(registry, &query).await?;

    for log in logs.iter().rev() {
        if topic_at(&log.topics, 0, "decode membership log")? == challenge_decided {
            let decoded = actions.decode_log(CHALLENGE_DECIDED_EVENT, log)?;
            if log_param(&decoded, "success")? != Token::Bool(true) {
                continue;
            }
        }
        return block_of(log);
    }
    Ok(from_block)
}

/// Blocks `member` reported for, from its `kind` submissions since `from_block`.
pub async fn member_submissions(
    registry: &ContractRegistry,
    kind: SubmissionKind,
    member: Address,
    from_block: u64,
    chunk_size: Option<u64>,
) -> Result<Vec<u64>> {
    let contract = registry.resolve(kind.contract_name()).await?;
    let signature = contract.event_signature(kind.event_name())?;
    let query = LogQuery::new(vec![contract.address()])
        .topics(vec![vec![signature], vec![address_to_topic(member)]])
        .from_block(from_block)
        .chunk_size(chunk_size);
    let logs = get_logs(registry, &query).await?;

    logs.iter()
        .map(|log| {
            let decoded = contract.decode_log(kind.event_name(), log)?;
            match log_param(&decoded, "block")? {
                Token::Uint(block) => u256_to_u64(block, "submitted block"),
                other => Err(Error::decode(
                    format!("decode {} log", kind.event_name()),
                    format!("block is not a uint: {:?}", other),
                )),
            }
        })
        .collect()
}

pub async fn prices_submissions(
    registry: &ContractRegistry,
    member: Address,
    from_block: u64,
    chunk_size: Option<u64>,
) -> Result<Vec<u64>> {
    member_submissions(registry, SubmissionKind::Prices, member, from_block, chunk_size).await
}

pub async fn balances_submissions(
    registry: &ContractRegistry,
    member: Address,
    from_block: u64,
    chunk_size: Option<u64>,
) -> Result<Vec<u64>> {
    member_submissions(registry, SubmissionKind::Balances, member, from_block, chunk_size).await
}

/// Participation of every trusted member since the latest membership change.
pub async fn calculate_participation(
    registry: &ContractRegistry,
    kind: SubmissionKind,
    opts: &CallOpts,
) -> Result<TrustedNodeParticipation> {
    let frequency = get_submit_frequency(registry, kind, opts).await?;
    let current_block = current_block(registry).await?;
    let chunk_size = registry.log_chunk_size();

    let min_block = (current_block / frequency)
        .saturating_sub(MEMBER_CHANGE_LOOKBACK_INTERVALS)
        * frequency;
    let change_block = latest_member_change_block(registry, min_block, chunk_size).await?;
    let members = trusted_node::get_member_addresses(registry, opts).await?;

    let start_block = participation_start_block(change_block, frequency);
    let submissions = if intervals_passed(current_block, start_block, frequency) > 0 {
        registry
            .fetcher()
            .fetch_each(&members, MEMBER_DETAILS_BATCH_SIZE, |member| async move {
                let blocks =
                    member_submissions(registry, kind, *member, start_block, chunk_size).await?;
                Ok((*member, blocks))
            })
            .await?
    } else {
        members.iter().map(|member| (*member, Vec::new())).collect()
    };

    debug!(
        "Computing {} participation: {} members, change block {}, head {}",
        kind.label(),
        members.len(),
        change_block,
        current_block
    );
    compute_participation(current_block, frequency, change_block, &submissions)
}

/// Whether each member has submitted during the current interval. Submitters
/// that are no longer members are included as `true`.
pub async fn latest_participation(
    registry: &ContractRegistry,
    kind: SubmissionKind,
    opts: &CallOpts,
) -> Result<HashMap<Address, bool>> {
    let frequency = get_submit_frequency(registry, kind, opts).await?;
    let current_block = current_block(registry).await?;
    let members = trusted_node::get_member_addresses(registry, opts).await?;

    let from_block = current_block / frequency * frequency;
    let contract = registry.resolve(kind.contract_name()).await?;
    let signature = contract.event_signature(kind.event_name())?;
    let query = LogQuery::new(vec![contract.address()])
        .topics(vec![vec![signature]])
        .from_block(from_block)
        .chunk_size(registry.log_chunk_size());
    let logs = get_logs(registry, &query).await?;

    let mut table: HashMap<Address, bool> = members.into_iter().map(|m| (m, false)).collect();
    for log in &logs {
        let submitter = topic_at(&log.topics, 1, "decode submission log")?;
        table.insert(topic_to_address(&submitter), true);
    }
    Ok(table)
}

async fn current_block(registry: &ContractRegistry) -> Result<u64> {
    registry
        .transport()
        .block_number()
        .await
        .map_err(|e| Error::transport("get latest block number", e))
}

fn block_of(log: &Log) -> Result<u64> {
    log.block_number
        .map(|n| n.as_u64())
        .ok_or_else(|| Error::decode("decode membership log", "log has no block number"))
}

const LANCZOS_G: f64 = 7.0;
const LANCZOS: [f64; 9] = [
    0.999_999_999_999_809_9,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_6e-7,
];
const GAMMA_EPS: f64 = 1e-15;
const GAMMA_FPMIN: f64 = 1e-300;
const GAMMA_MAX_ITER: usize = 1_000;

/// Natural log of the gamma function (Lanczos approximation).
pub fn ln_gamma(x: f64) -> f64 {
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut sum = LANCZOS[0];
    for (i, coefficient) in LANCZOS.iter().enumerate().skip(1) {
        sum += coefficient / (x + i as f64);
    }
    let t = x + LANCZOS_G + 0.5;
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + sum.ln()
}

/// Regularized upper incomplete gamma `Q(a, x) = Γ(a, x) / Γ(a)`.
///
/// `1 - Q(k/2, chi²/2)` is the chi-square CDF with `k` degrees of freedom.
pub fn regularized_gamma_q(a: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 1.0;
    }
    if a <= 0.0 {
        return 0.0;
    }
    if x < a + 1.0 {
        (1.0 - gamma_p_series(a, x)).clamp(0.0, 1.0)
    } else {
        gamma_q_continued_fraction(a, x).clamp(0.0, 1.0)
    }
}

fn gamma_p_series(a: f64, x: f64) -> f64 {
    let mut ap = a;
    let mut delta = 1.0 / a;
    let mut sum = delta;
    for _ in 0..GAMMA_MAX_ITER {
        ap += 1.0;
        delta *= x / ap;
        sum += delta;
        if delta.abs() < sum.abs() * GAMMA_EPS {
            break;
        }
    }
    sum * (-x + a * x.ln() - ln_gamma(a)).exp()
}

fn gamma_q_continued_fraction(a: f64, x: f64) -> f64 {
    let mut b = x + 1.0 - a;
    let mut c = 1.0 / GAMMA_FPMIN;
    let mut d = 1.0 / b;
    let mut h = d;
    for i in 1..=GAMMA_MAX_ITER {
        let an = -(i as f64) * (i as f64 - a);
        b += 2.0;
        d = an * d + b;
        if d.abs() < GAMMA_FPMIN {
            d = GAMMA_FPMIN;
        }
        c = b + an / c;
        if c.abs() < GAMMA_FPMIN {
            c = GAMMA_FPMIN;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;
        if (delta - 1.0).abs() < GAMMA_EPS {
            break;
        }
    }
    (-x + a * x.ln() - ln_gamma(a)).exp() * h
}
