//! Command-line interface.
//!
//! Every state-changing command loads the latest snapshot, runs through the
//! protocol service once and persists before printing its result as JSON.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Args, Parser, Subcommand};
use lockgov_governance::{Command, Proposal, ProposalRequest, ProposalState, VoteSupport};
use lockgov_staking::{StakePosition, VotingPower};
use lockgov_types::{Address, Amount, Timestamp, DAY};
use serde::Serialize;

use crate::config::NodeConfig;
use crate::node;
use crate::service::{ProtocolService, Request, Response};

/// Main CLI.
#[derive(Parser, Debug)]
#[command(name = "lockgov")]
#[command(about = "Lockgov - time-locked staking with timelocked on-chain governance")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Config file path (defaults to <data-dir>/lockgov.toml)
    #[arg(short, long, value_name = "FILE", global = true, env = "LOCKGOV_CONFIG")]
    pub config: Option<PathBuf>,

    /// Data directory
    #[arg(short, long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level or filter directive
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Time of the command in unix seconds (defaults to the wall clock)
    #[arg(long, global = true)]
    pub now: Option<Timestamp>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
///
/// Accounts are `lock1..` or `0x..` addresses. Any other string names a
/// deterministic account derived from it, e.g. `alice`.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the state store and write the config file
    Init {
        /// Replace an existing store
        #[arg(long)]
        force: bool,
    },

    /// Lock tokens until a bucket boundary
    Stake {
        #[arg(value_parser = parse_account)]
        owner: Address,
        amount: Amount,
        #[command(flatten)]
        lock: LockArgs,
        /// Delegate for the new stake (defaults to the current delegate)
        #[arg(long, value_parser = parse_account)]
        delegate: Option<Address>,
    },

    /// Move a stake to a later bucket and optionally add to it
    Extend {
        #[arg(value_parser = parse_account)]
        owner: Address,
        /// Bucket the stake sits in now
        bucket: Timestamp,
        #[command(flatten)]
        lock: LockArgs,
        /// Amount added on top
        #[arg(long, default_value = "0")]
        amount: Amount,
    },

    /// Withdraw a stake whose bucket has passed
    Withdraw {
        #[arg(value_parser = parse_account)]
        owner: Address,
        bucket: Timestamp,
    },

    /// Move all voting power of an account to a delegate
    Delegate {
        #[arg(value_parser = parse_account)]
        owner: Address,
        #[arg(value_parser = parse_account)]
        to: Address,
    },

    /// Submit a proposal
    Propose {
        #[arg(value_parser = parse_account)]
        proposer: Address,
        /// Proposal description
        #[arg(short = 'm', long, default_value = "")]
        description: String,
        /// Action as `Name=arg,..`, e.g. `SetVotingDelay=86400` or
        /// `TreasuryTransfer=bob,500`
        #[arg(short, long = "action", required = true)]
        actions: Vec<String>,
    },

    /// Vote on an active proposal
    Vote {
        #[arg(value_parser = parse_account)]
        voter: Address,
        id: u64,
        /// for, against or abstain
        support: VoteSupport,
    },

    /// Queue a succeeded proposal in the timelock
    Queue { id: u64 },

    /// Execute a queued proposal once its eta has passed
    Execute { id: u64 },

    /// Cancel a proposal
    Cancel {
        #[arg(value_parser = parse_account)]
        caller: Address,
        id: u64,
    },

    /// Drop timelock entries past their grace period
    Prune,

    /// Voting power and stakes of an account
    Power {
        #[arg(value_parser = parse_account)]
        account: Address,
        /// Point to read power at (defaults to now)
        #[arg(long)]
        at: Option<Timestamp>,
    },

    /// Protocol summary, or one proposal with `--proposal`
    Status {
        #[arg(long)]
        proposal: Option<u64>,
    },
}

/// Lock end, absolute or relative to now.
#[derive(Args, Debug, Clone, Copy)]
#[group(required = true, multiple = false)]
pub struct LockArgs {
    /// Lock end in unix seconds
    #[arg(long)]
    pub until: Option<Timestamp>,
    /// Lock length in days
    #[arg(long)]
    pub days: Option<u64>,
}

impl LockArgs {
    pub fn resolve(&self, now: Timestamp) -> anyhow::Result<Timestamp> {
        match (self.until, self.days) {
            (Some(until), _) => Ok(until),
            (None, Some(days)) => days
                .checked_mul(DAY)
                .and_then(|secs| now.checked_add(secs))
                .ok_or_else(|| anyhow::anyhow!("Lock of {} days overflows", days)),
            (None, None) => anyhow::bail!("Either --until or --days is required"),
        }
    }
}

impl Cli {
    /// Load the config file, falling back to defaults when none exists yet.
    pub fn load_config(&self) -> anyhow::Result<(NodeConfig, PathBuf)> {
        let data_dir = self
            .data_dir
            .clone()
            .unwrap_or_else(|| NodeConfig::default().data_dir);
        let path = self
            .config
            .clone()
            .unwrap_or_else(|| node::config_path(&data_dir));

        let mut config = if path.exists() {
            NodeConfig::from_file(&path)?
        } else if self.config.is_some() && !matches!(self.command, Commands::Init { .. }) {
            anyhow::bail!("Config file '{}' does not exist", path.display());
        } else {
            NodeConfig::default()
        };

        if let Some(data_dir) = &self.data_dir {
            config.data_dir = data_dir.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.log_json {
            config.logging.format = "json".to_string();
        }
        config.validate()?;
        Ok((config, path))
    }

    pub fn now(&self) -> anyhow::Result<Timestamp> {
        match self.now {
            Some(now) => Ok(now),
            None => Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs()),
        }
    }
}

/// Account argument: an address, or a name to derive one from.
pub fn parse_account(s: &str) -> Result<Address, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("account cannot be empty".to_string());
    }
    if s.starts_with("lock1") || s.starts_with("0x") {
        return s.parse::<Address>().map_err(|e| e.to_string());
    }
    Ok(Address::derive(s.as_bytes()))
}

/// Parse `Name=arg,..` into a target and a command.
///
/// Governance commands target the protocol itself; treasury transfers target
/// the treasury capability. `treasury` names that capability as an upgrade
/// target.
pub fn parse_action(raw: &str, config: &NodeConfig) -> anyhow::Result<(Address, Command)> {
    let (name, args) = match raw.split_once('=') {
        Some((name, args)) => (name.trim(), args.trim()),
        None => (raw.trim(), ""),
    };
    let args: Vec<&str> = if args.is_empty() {
        Vec::new()
    } else {
        args.split(',').map(str::trim).collect()
    };

    let account = |s: &str| parse_account(s).map_err(|e| anyhow::anyhow!(e));

    let command = match (name, args.as_slice()) {
        ("SetVotingDelay", [delay]) => Command::SetVotingDelay {
            delay: delay.parse()?,
        },
        ("SetVotingPeriod", [period]) => Command::SetVotingPeriod {
            period: period.parse()?,
        },
        ("SetProposalThreshold", [threshold]) => Command::SetProposalThreshold {
            threshold: threshold.parse()?,
        },
        ("SetQuorumVotes", [quorum]) => Command::SetQuorumVotes {
            quorum: quorum.parse()?,
        },
        ("SetTimelockDelay", [delay]) => Command::SetTimelockDelay {
            delay: delay.parse()?,
        },
        ("SetGuardian", [guardian]) => Command::SetGuardian {
            guardian: account(guardian)?,
        },
        ("TreasuryTransfer", [to, amount]) => Command::TreasuryTransfer {
            to: account(to)?,
            amount: amount.parse()?,
        },
        ("UpgradeCapability", [target, version]) => Command::UpgradeCapability {
            target: if *target == "treasury" {
                config.treasury.capability
            } else {
                account(target)?
            },
            version: version.parse()?,
        },
        _ => anyhow::bail!("Unknown or malformed action '{}'", raw),
    };

    let target = if command.is_governance() {
        config.protocol.address
    } else {
        config.treasury.capability
    };
    Ok((target, command))
}

#[derive(Debug, Serialize)]
struct PowerReport {
    account: Address,
    at: Timestamp,
    voting_power: VotingPower,
    delegate: Address,
    positions: Vec<StakePosition>,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    protocol: Address,
    clock: Timestamp,
    total_staked: Amount,
    proposals: u64,
    queued_actions: usize,
    timelock_delay: Timestamp,
    guardian: Option<Address>,
    capabilities: BTreeMap<Address, u32>,
}

#[derive(Debug, Serialize)]
struct ProposalReport<'a> {
    state: ProposalState,
    proposal: &'a Proposal,
}

/// Run a command against the configured store and render its result as JSON.
pub async fn run(
    command: Commands,
    config: &NodeConfig,
    config_path: &Path,
    now: Timestamp,
) -> anyhow::Result<String> {
    let request = match command {
        Commands::Init { force } => return init(config, config_path, force),
        Commands::Power { account, at } => return power(config, account, at.unwrap_or(now)),
        Commands::Status { proposal } => return status(config, proposal, now),
        Commands::Stake {
            owner,
            amount,
            lock,
            delegate,
        } => {
            let delegate = match delegate {
                Some(delegate) => delegate,
                None => current_delegate(config, &owner)?,
            };
            Request::Stake {
                owner,
                amount,
                until: lock.resolve(now)?,
                delegate,
            }
        }
        Commands::Extend {
            owner,
            bucket,
            lock,
            amount,
        } => Request::ExtendAndIncrease {
            owner,
            from_bucket: bucket,
            until: lock.resolve(now)?,
            additional: amount,
        },
        Commands::Withdraw { owner, bucket } => Request::Withdraw { owner, bucket },
        Commands::Delegate { owner, to } => Request::Delegate { owner, to },
        Commands::Propose {
            proposer,
            description,
            actions,
        } => {
            let mut request = ProposalRequest::new(description);
            for raw in &actions {
                let (target, command) = parse_action(raw, config)?;
                request = request.with_command(target, Amount::ZERO, &command)?;
            }
            Request::Propose { proposer, request }
        }
        Commands::Vote { voter, id, support } => Request::CastVote { voter, id, support },
        Commands::Queue { id } => Request::Queue { id },
        Commands::Execute { id } => Request::Execute { id },
        Commands::Cancel { caller, id } => Request::Cancel { caller, id },
        Commands::Prune => Request::PruneStale,
    };

    let response = submit(config, request, now).await?;
    Ok(serde_json::to_string_pretty(&response)?)
}

async fn submit(config: &NodeConfig, request: Request, now: Timestamp) -> anyhow::Result<Response> {
    let (protocol, store) = node::open(config)?;
    let (handle, task) = ProtocolService::spawn(protocol, store);

    let result = handle.submit(request, now).await;
    drop(handle);
    task.await?;

    result.map_err(|e| anyhow::anyhow!("{} ({})", e, e.kind()))
}

fn init(config: &NodeConfig, config_path: &Path, force: bool) -> anyhow::Result<String> {
    node::init_store(config, force)?;
    if force || !config_path.exists() {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        config.to_file(config_path)?;
    }
    Ok(serde_json::to_string_pretty(&serde_json::json!({
        "initialized": config.data_dir,
        "config": config_path,
        "protocol": config.protocol.address,
    }))?)
}

fn current_delegate(config: &NodeConfig, owner: &Address) -> anyhow::Result<Address> {
    let (protocol, _) = node::open(config)?;
    Ok(protocol.ledger().delegate_of(owner))
}

fn power(config: &NodeConfig, account: Address, at: Timestamp) -> anyhow::Result<String> {
    let (protocol, _) = node::open(config)?;
    let ledger = protocol.ledger();
    let report = PowerReport {
        account,
        at,
        voting_power: ledger.voting_power_at(&account, at)?,
        delegate: ledger.delegate_of(&account),
        positions: ledger.positions(&account),
    };
    Ok(serde_json::to_string_pretty(&report)?)
}

fn status(config: &NodeConfig, proposal: Option<u64>, now: Timestamp) -> anyhow::Result<String> {
    let (protocol, _) = node::open(config)?;

    if let Some(id) = proposal {
        let report = ProposalReport {
            state: protocol.proposal_state(id, now)?,
            proposal: protocol
                .governor()
                .get(id)
                .ok_or_else(|| anyhow::anyhow!("Unknown proposal {}", id))?,
        };
        return Ok(serde_json::to_string_pretty(&report)?);
    }

    let report = StatusReport {
        protocol: *protocol.address(),
        clock: protocol.clock(),
        total_staked: protocol.ledger().total_staked(),
        proposals: protocol.governor().proposal_count(),
        queued_actions: protocol.timelock().len(),
        timelock_delay: protocol.timelock().delay(),
        guardian: protocol.governor().guardian().copied(),
        capabilities: protocol.state().capabilities.clone(),
    };
    Ok(serde_json::to_string_pretty(&report)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenesisAllocation;
    use lockgov_types::YEAR;
    use tempfile::TempDir;

    const START: Timestamp = 1_000 * DAY;

    fn test_config(dir: &TempDir) -> NodeConfig {
        let mut config = NodeConfig {
            data_dir: dir.path().join("state"),
            ..NodeConfig::default()
        };
        config.treasury.initial_balance = Amount::from_u64(1_000);
        config.genesis.push(GenesisAllocation {
            account: Address::derive(b"alice"),
            amount: Amount::from_u64(10_000),
        });
        config
    }

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("lockgov").chain(args.iter().copied()))
    }

    async fn exec(
        config: &NodeConfig,
        args: &[&str],
        now: Timestamp,
    ) -> anyhow::Result<serde_json::Value> {
        let path = node::config_path(&config.data_dir);
        let out = run(cli(args).command, config, &path, now).await?;
        Ok(serde_json::from_str(&out)?)
    }

    #[test]
    fn test_cli_args() {
        let cli = cli(&["--now", "42", "stake", "alice", "500", "--days", "30"]);
        assert_eq!(cli.now, Some(42));
        match cli.command {
            Commands::Stake {
                owner,
                amount,
                lock,
                delegate,
            } => {
                assert_eq!(owner, Address::derive(b"alice"));
                assert_eq!(amount, Amount::from_u64(500));
                assert_eq!(lock.resolve(42).unwrap(), 42 + 30 * DAY);
                assert!(delegate.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_lock_needs_exactly_one_bound() {
        let base = ["lockgov", "stake", "alice", "1"];
        assert!(Cli::try_parse_from(base).is_err());
        assert!(Cli::try_parse_from(base.iter().chain(&["--days", "1", "--until", "5"])).is_err());
    }

    #[test]
    fn test_parse_account() {
        let alice = Address::derive(b"alice");
        assert_eq!(parse_account("alice").unwrap(), alice);
        assert_eq!(parse_account(&alice.to_string()).unwrap(), alice);
        assert_eq!(parse_account(&format!("{:x}", alice)).unwrap(), alice);
        assert!(parse_account("0xnothex").is_err());
        assert!(parse_account("  ").is_err());
    }

    #[test]
    fn test_parse_action() {
        let config = NodeConfig::default();

        let (target, command) = parse_action("SetVotingDelay=86400", &config).unwrap();
        assert_eq!(target, config.protocol.address);
        assert_eq!(command, Command::SetVotingDelay { delay: 86_400 });

        let (target, command) = parse_action("TreasuryTransfer = bob, 500", &config).unwrap();
        assert_eq!(target, config.treasury.capability);
        assert_eq!(
            command,
            Command::TreasuryTransfer {
                to: Address::derive(b"bob"),
                amount: Amount::from_u64(500),
            }
        );

        let (target, command) = parse_action("UpgradeCapability=treasury,2", &config).unwrap();
        assert_eq!(target, config.protocol.address);
        assert_eq!(
            command,
            Command::UpgradeCapability {
                target: config.treasury.capability,
                version: 2,
            }
        );

        assert!(parse_action("SetVotingDelay", &config).is_err());
        assert!(parse_action("SetVotingDelay=soon", &config).is_err());
        assert!(parse_action("SelfDestruct=1", &config).is_err());
    }

    #[tokio::test]
    async fn test_init_and_stake_flow() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        exec(&config, &["init"], 0).await.unwrap();
        assert!(node::config_path(&config.data_dir).exists());
        assert!(exec(&config, &["init"], 0).await.is_err());

        let out = exec(&config, &["stake", "alice", "10000", "--days", "1095"], START)
            .await
            .unwrap();
        assert!(out.get("staked").is_some());

        let out = exec(&config, &["power", "alice"], START).await.unwrap();
        let power = out["voting_power"].as_u64().unwrap();
        assert!(power > 29_500);
        assert_eq!(out["positions"].as_array().unwrap().len(), 1);

        // The store moved on; an earlier clock is rejected
        assert!(exec(&config, &["delegate", "alice", "bob"], START - 1).await.is_err());

        let out = exec(&config, &["status"], START).await.unwrap();
        assert_eq!(out["clock"].as_u64(), Some(START));
        assert_eq!(out["total_staked"].as_str(), Some("10000"));
    }

    #[tokio::test]
    async fn test_proposal_flow() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        exec(&config, &["init"], 0).await.unwrap();
        exec(&config, &["stake", "alice", "10000", "--until", &(START + 3 * YEAR).to_string()], START)
            .await
            .unwrap();

        let out = exec(
            &config,
            &["propose", "alice", "-m", "pay bob", "--action", "TreasuryTransfer=bob,400"],
            START + 1,
        )
        .await
        .unwrap();
        let id = out["proposed"].as_u64().unwrap();
        let id = id.to_string();

        let params = &config.protocol;
        let start = START + 1 + params.governor.voting_delay;
        exec(&config, &["vote", "alice", &id, "for"], start).await.unwrap();

        let end = start + params.governor.voting_period;
        let out = exec(&config, &["queue", &id], end + 1).await.unwrap();
        let eta = out["queued"]["eta"].as_u64().unwrap();
        assert_eq!(eta, end + 1 + params.timelock.delay);

        let out = exec(&config, &["execute", &id], eta).await.unwrap();
        let receipts = out["executed"]["receipts"].as_array().unwrap();
        assert_eq!(receipts.len(), 1);

        let out = exec(&config, &["status", "--proposal", &id], eta).await.unwrap();
        assert_eq!(out["state"].as_str(), Some("Executed"));
    }
}
