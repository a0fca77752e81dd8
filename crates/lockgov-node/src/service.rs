//! Single-writer protocol service.
//!
//! One task owns the `Protocol` and applies commands strictly in arrival
//! order. After every successful command the state is persisted and a fresh
//! read snapshot is published, so historical queries never wait on the
//! writer. A command whose commit fails is undone and never published.

use std::sync::Arc;

use lockgov_governance::{
    ExecutionReport, GovernanceError, Protocol, ProposalRequest, ProposalState,
    ProtocolState, VoteSupport,
};
use lockgov_staking::{InMemoryVault, StakeReceipt, VotingPower};
use lockgov_storage::{Snapshot, StateStore, StorageError};
use lockgov_types::{Address, Amount, ErrorKind, Hash, Timestamp};
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Pending commands the service buffers before senders wait.
const COMMAND_QUEUE: usize = 64;

/// A state-changing command.
#[derive(Debug, Clone)]
pub enum Request {
    Stake {
        owner: Address,
        amount: Amount,
        until: Timestamp,
        delegate: Address,
    },
    ExtendAndIncrease {
        owner: Address,
        from_bucket: Timestamp,
        until: Timestamp,
        additional: Amount,
    },
    Withdraw {
        owner: Address,
        bucket: Timestamp,
    },
    Delegate {
        owner: Address,
        to: Address,
    },
    Propose {
        proposer: Address,
        request: ProposalRequest,
    },
    CastVote {
        voter: Address,
        id: u64,
        support: VoteSupport,
    },
    Queue {
        id: u64,
    },
    Execute {
        id: u64,
    },
    Cancel {
        caller: Address,
        id: u64,
    },
    PruneStale,
}

impl Request {
    fn name(&self) -> &'static str {
        match self {
            Request::Stake { .. } => "stake",
            Request::ExtendAndIncrease { .. } => "extend",
            Request::Withdraw { .. } => "withdraw",
            Request::Delegate { .. } => "delegate",
            Request::Propose { .. } => "propose",
            Request::CastVote { .. } => "vote",
            Request::Queue { .. } => "queue",
            Request::Execute { .. } => "execute",
            Request::Cancel { .. } => "cancel",
            Request::PruneStale => "prune",
        }
    }
}

/// Result of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    Staked(StakeReceipt),
    Withdrawn(Amount),
    /// Previous delegate, `None` if nothing changed
    Delegated(Option<Address>),
    Proposed(u64),
    Voted(VotingPower),
    Queued { eta: Timestamp },
    Executed(ExecutionReport),
    Canceled,
    Pruned(Vec<Hash>),
}

/// Errors returned to service callers.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Governance(#[from] GovernanceError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Protocol service has stopped")]
    Closed,
}

impl ServiceError {
    /// Taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Governance(e) => e.kind(),
            ServiceError::Storage(e) => e.kind(),
            ServiceError::Closed => ErrorKind::Storage,
        }
    }
}

struct Envelope {
    request: Request,
    now: Timestamp,
    reply: oneshot::Sender<Result<Response, ServiceError>>,
}

/// Cloneable access to a running service.
#[derive(Clone)]
pub struct ServiceHandle {
    commands: mpsc::Sender<Envelope>,
    snapshot: Arc<RwLock<Arc<ProtocolState>>>,
}

impl ServiceHandle {
    /// Submit a command and wait for its result.
    pub async fn submit(&self, request: Request, now: Timestamp) -> Result<Response, ServiceError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Envelope {
                request,
                now,
                reply,
            })
            .await
            .map_err(|_| ServiceError::Closed)?;
        response.await.map_err(|_| ServiceError::Closed)?
    }

    /// State as of the last successful command.
    pub fn snapshot(&self) -> Arc<ProtocolState> {
        self.snapshot.read().clone()
    }

    pub fn voting_power_at(
        &self,
        account: &Address,
        point: Timestamp,
    ) -> Result<VotingPower, ServiceError> {
        let snapshot = self.snapshot();
        let power = snapshot
            .ledger
            .voting_power_at(account, point)
            .map_err(GovernanceError::from)?;
        Ok(power)
    }

    pub fn proposal_state(&self, id: u64, now: Timestamp) -> Result<ProposalState, ServiceError> {
        let snapshot = self.snapshot();
        Ok(snapshot.governor.state(id, now, &snapshot.timelock)?)
    }
}

/// The writer task.
pub struct ProtocolService {
    protocol: Protocol,
    store: StateStore,
    commands: mpsc::Receiver<Envelope>,
    published: Arc<RwLock<Arc<ProtocolState>>>,
}

impl ProtocolService {
    /// Start the writer task. It stops once every handle is dropped.
    pub fn spawn(protocol: Protocol, store: StateStore) -> (ServiceHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let published = Arc::new(RwLock::new(Arc::new(protocol.state().clone())));

        let service = Self {
            protocol,
            store,
            commands: rx,
            published: published.clone(),
        };
        let task = tokio::spawn(service.run());

        (
            ServiceHandle {
                commands: tx,
                snapshot: published,
            },
            task,
        )
    }

    async fn run(mut self) {
        info!(clock = self.protocol.clock(), "Protocol service started");

        while let Some(envelope) = self.commands.recv().await {
            let name = envelope.request.name();
            let before = (self.protocol.state().clone(), self.protocol.vault().clone());
            let result = match self.apply(envelope.request, envelope.now) {
                Ok(response) => self
                    .persist(before)
                    .map(|()| response)
                    .map_err(ServiceError::from),
                Err(e) => {
                    debug!(command = name, kind = %e.kind(), "Command rejected: {}", e);
                    Err(e.into())
                }
            };
            if envelope.reply.send(result).is_err() {
                debug!(command = name, "Caller went away before the reply");
            }
        }

        info!("Protocol service stopped");
    }

    fn apply(&mut self, request: Request, now: Timestamp) -> Result<Response, GovernanceError> {
        let protocol = &mut self.protocol;
        let response = match request {
            Request::Stake {
                owner,
                amount,
                until,
                delegate,
            } => Response::Staked(protocol.stake(owner, amount, until, delegate, now)?),
            Request::ExtendAndIncrease {
                owner,
                from_bucket,
                until,
                additional,
            } => Response::Staked(protocol.extend_and_increase(
                owner,
                from_bucket,
                until,
                additional,
                now,
            )?),
            Request::Withdraw { owner, bucket } => {
                Response::Withdrawn(protocol.withdraw(owner, bucket, now)?)
            }
            Request::Delegate { owner, to } => {
                Response::Delegated(protocol.delegate(owner, to, now)?)
            }
            Request::Propose { proposer, request } => {
                Response::Proposed(protocol.propose(proposer, &request, now)?)
            }
            Request::CastVote { voter, id, support } => {
                Response::Voted(protocol.cast_vote(voter, id, support, now)?)
            }
            Request::Queue { id } => Response::Queued {
                eta: protocol.queue(id, now)?,
            },
            Request::Execute { id } => Response::Executed(protocol.execute(id, now)?),
            Request::Cancel { caller, id } => {
                protocol.cancel(caller, id, now)?;
                Response::Canceled
            }
            Request::PruneStale => Response::Pruned(protocol.prune_stale(now)?),
        };
        Ok(response)
    }

    /// Commit the state and journal of the last command, then publish it.
    /// On failure the protocol goes back to `before`.
    fn persist(&mut self, before: (ProtocolState, InMemoryVault)) -> Result<(), StorageError> {
        let entries = self.protocol.drain_journal();
        let state = self.protocol.state().clone();
        let snapshot = Snapshot::new(state, self.protocol.vault().clone());

        if let Err(e) = self.store.commit(&snapshot, &entries) {
            error!(
                clock = before.0.clock,
                dropped = entries.len(),
                "Failed to persist state, command undone: {}",
                e
            );
            let (state, vault) = before;
            self.protocol.rollback(state, vault);
            return Err(e);
        }

        *self.published.write() = Arc::new(snapshot.state);
        Ok(())
    }
}
