//! Proposal actions.
//!
//! An action keeps the raw `(target, value, signature, data)` tuple the
//! timelock hashes, but only whitelisted commands are accepted: `signature`
//! names a [`Command`] and `data` is the borsh encoding of its arguments.

use lockgov_types::{Address, Amount, Hash, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::GovernanceError;

/// Upper bound on an action's calldata.
pub const MAX_CALLDATA_LEN: usize = 16 * 1024;

/// Whitelisted governance commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    SetVotingDelay { delay: Timestamp },
    SetVotingPeriod { period: Timestamp },
    SetProposalThreshold { threshold: u128 },
    SetQuorumVotes { quorum: u128 },
    SetTimelockDelay { delay: Timestamp },
    SetGuardian { guardian: Address },
    TreasuryTransfer { to: Address, amount: Amount },
    /// Switch the active handler version of a capability target
    UpgradeCapability { target: Address, version: u32 },
}

impl Command {
    /// Every accepted signature.
    pub const SIGNATURES: [&'static str; 8] = [
        "SetVotingDelay",
        "SetVotingPeriod",
        "SetProposalThreshold",
        "SetQuorumVotes",
        "SetTimelockDelay",
        "SetGuardian",
        "TreasuryTransfer",
        "UpgradeCapability",
    ];

    pub fn signature(&self) -> &'static str {
        match self {
            Command::SetVotingDelay { .. } => "SetVotingDelay",
            Command::SetVotingPeriod { .. } => "SetVotingPeriod",
            Command::SetProposalThreshold { .. } => "SetProposalThreshold",
            Command::SetQuorumVotes { .. } => "SetQuorumVotes",
            Command::SetTimelockDelay { .. } => "SetTimelockDelay",
            Command::SetGuardian { .. } => "SetGuardian",
            Command::TreasuryTransfer { .. } => "TreasuryTransfer",
            Command::UpgradeCapability { .. } => "UpgradeCapability",
        }
    }

    /// Borsh encoding of the command arguments.
    pub fn encode_args(&self) -> Result<Vec<u8>, GovernanceError> {
        let encoded = match self {
            Command::SetVotingDelay { delay } => borsh::to_vec(delay),
            Command::SetVotingPeriod { period } => borsh::to_vec(period),
            Command::SetProposalThreshold { threshold } => borsh::to_vec(threshold),
            Command::SetQuorumVotes { quorum } => borsh::to_vec(quorum),
            Command::SetTimelockDelay { delay } => borsh::to_vec(delay),
            Command::SetGuardian { guardian } => borsh::to_vec(guardian),
            Command::TreasuryTransfer { to, amount } => borsh::to_vec(&(*to, *amount)),
            Command::UpgradeCapability { target, version } => borsh::to_vec(&(*target, *version)),
        };
        encoded.map_err(|e| GovernanceError::InvalidParameter(format!("encode arguments: {}", e)))
    }

    /// Decode a command from its signature and borsh-encoded arguments.
    /// Trailing bytes are rejected.
    pub fn decode(signature: &str, data: &[u8]) -> Result<Self, GovernanceError> {
        fn args<T: borsh::BorshDeserialize>(signature: &str, data: &[u8]) -> Result<T, GovernanceError> {
            borsh::from_slice(data).map_err(|e| {
                GovernanceError::InvalidParameter(format!("bad arguments for {}: {}", signature, e))
            })
        }

        let command = match signature {
            "SetVotingDelay" => Command::SetVotingDelay {
                delay: args(signature, data)?,
            },
            "SetVotingPeriod" => Command::SetVotingPeriod {
                period: args(signature, data)?,
            },
            "SetProposalThreshold" => Command::SetProposalThreshold {
                threshold: args(signature, data)?,
            },
            "SetQuorumVotes" => Command::SetQuorumVotes {
                quorum: args(signature, data)?,
            },
            "SetTimelockDelay" => Command::SetTimelockDelay {
                delay: args(signature, data)?,
            },
            "SetGuardian" => Command::SetGuardian {
                guardian: args(signature, data)?,
            },
            "TreasuryTransfer" => {
                let (to, amount) = args(signature, data)?;
                Command::TreasuryTransfer { to, amount }
            }
            "UpgradeCapability" => {
                let (target, version) = args(signature, data)?;
                Command::UpgradeCapability { target, version }
            }
            other => {
                return Err(GovernanceError::InvalidParameter(format!(
                    "unknown action signature '{}'",
                    other
                )))
            }
        };
        Ok(command)
    }

    /// Whether the command reconfigures governance itself rather than an
    /// external capability.
    pub fn is_governance(&self) -> bool {
        !matches!(self, Command::TreasuryTransfer { .. })
    }
}

/// A single action of a proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalAction {
    pub target: Address,
    pub value: Amount,
    pub signature: String,
    #[serde(with = "hex_bytes")]
    pub data: Vec<u8>,
}

impl ProposalAction {
    /// Build an action from a typed command.
    pub fn new(target: Address, value: Amount, command: &Command) -> Result<Self, GovernanceError> {
        Ok(Self {
            target,
            value,
            signature: command.signature().to_string(),
            data: command.encode_args()?,
        })
    }

    /// Decode and check the action.
    pub fn command(&self) -> Result<Command, GovernanceError> {
        if self.target.is_zero() {
            return Err(GovernanceError::InvalidParameter(
                "action target is the zero address".to_string(),
            ));
        }
        if self.data.len() > MAX_CALLDATA_LEN {
            return Err(GovernanceError::InvalidParameter(format!(
                "calldata of {} bytes exceeds {}",
                self.data.len(),
                MAX_CALLDATA_LEN
            )));
        }
        Command::decode(&self.signature, &self.data)
    }

    /// Content hash keying the action in the timelock.
    ///
    /// `blake3(target | value u96 BE | sig_len u32 BE | sig | data_len u32 BE | data | eta u64 BE)`
    pub fn hash(&self, eta: Timestamp) -> Hash {
        let sig_len = (self.signature.len() as u32).to_be_bytes();
        let data_len = (self.data.len() as u32).to_be_bytes();
        Hash::compute_multi(&[
            self.target.as_bytes(),
            &self.value.to_be_bytes(),
            &sig_len,
            self.signature.as_bytes(),
            &data_len,
            &self.data,
            &eta.to_be_bytes(),
        ])
    }
}

/// Input of `propose`: parallel action lists plus a description.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalRequest {
    pub targets: Vec<Address>,
    pub values: Vec<Amount>,
    pub signatures: Vec<String>,
    pub calldatas: Vec<Vec<u8>>,
    pub description: String,
}

impl ProposalRequest {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Default::default()
        }
    }

    /// Append a typed command as the next action.
    pub fn with_command(
        mut self,
        target: Address,
        value: Amount,
        command: &Command,
    ) -> Result<Self, GovernanceError> {
        self.targets.push(target);
        self.values.push(value);
        self.signatures.push(command.signature().to_string());
        self.calldatas.push(command.encode_args()?);
        Ok(self)
    }

    /// Zip the parallel lists into actions, checking their lengths match.
    pub fn actions(&self) -> Result<Vec<ProposalAction>, GovernanceError> {
        let n = self.targets.len();
        if self.values.len() != n || self.signatures.len() != n || self.calldatas.len() != n {
            return Err(GovernanceError::InvalidParameter(format!(
                "action lists differ in length: {} targets, {} values, {} signatures, {} calldatas",
                n,
                self.values.len(),
                self.signatures.len(),
                self.calldatas.len()
            )));
        }

        Ok(self
            .targets
            .iter()
            .zip(&self.values)
            .zip(&self.signatures)
            .zip(&self.calldatas)
            .map(|(((target, value), signature), data)| ProposalAction {
                target: *target,
                value: *value,
                signature: signature.clone(),
                data: data.clone(),
            })
            .collect())
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        Address::from_bytes([n; 20])
    }

    #[test]
    fn test_command_roundtrip_through_action() {
        let command = Command::TreasuryTransfer {
            to: addr(9),
            amount: Amount::from_u64(1_000),
        };
        let action = ProposalAction::new(addr(1), Amount::ZERO, &command).unwrap();
        assert_eq!(action.signature, "TreasuryTransfer");
        assert_eq!(action.data.len(), 20 + Amount::BYTES);
        assert_eq!(action.command().unwrap(), command);
    }

    #[test]
    fn test_every_signature_is_decodable() {
        let commands = [
            Command::SetVotingDelay { delay: 1 },
            Command::SetVotingPeriod { period: 2 },
            Command::SetProposalThreshold { threshold: 3 },
            Command::SetQuorumVotes { quorum: 4 },
            Command::SetTimelockDelay { delay: 5 },
            Command::SetGuardian { guardian: addr(6) },
            Command::TreasuryTransfer { to: addr(7), amount: Amount::ONE },
            Command::UpgradeCapability { target: addr(8), version: 2 },
        ];
        for (command, signature) in commands.iter().zip(Command::SIGNATURES) {
            assert_eq!(command.signature(), signature);
            let data = command.encode_args().unwrap();
            assert_eq!(&Command::decode(signature, &data).unwrap(), command);
        }
    }

    #[test]
    fn test_decode_rejects_unknown_and_malformed() {
        let err = Command::decode("selfdestruct()", &[]).unwrap_err();
        assert!(matches!(err, GovernanceError::InvalidParameter(_)));

        // Truncated argument
        assert!(Command::decode("SetVotingDelay", &[1, 2, 3]).is_err());
        // Trailing bytes
        assert!(Command::decode("SetVotingDelay", &[0u8; 9]).is_err());

        let action = ProposalAction {
            target: Address::ZERO,
            value: Amount::ZERO,
            signature: "SetVotingDelay".to_string(),
            data: vec![0u8; 8],
        };
        assert!(action.command().is_err());
    }

    #[test]
    fn test_hash_depends_on_every_field() {
        let action =
            ProposalAction::new(addr(1), Amount::ZERO, &Command::SetVotingDelay { delay: 10 }).unwrap();
        let base = action.hash(100);
        assert_eq!(base, action.hash(100));
        assert_ne!(base, action.hash(101));

        let mut other = action.clone();
        other.target = addr(2);
        assert_ne!(base, other.hash(100));

        let mut other = action.clone();
        other.value = Amount::ONE;
        assert_ne!(base, other.hash(100));

        let mut other = action.clone();
        other.data = Command::SetVotingDelay { delay: 11 }.encode_args().unwrap();
        assert_ne!(base, other.hash(100));
    }

    #[test]
    fn test_hash_layout() {
        let action = ProposalAction {
            target: addr(1),
            value: Amount::from_u64(2),
            signature: "SetGuardian".to_string(),
            data: vec![0xaa, 0xbb],
        };
        let mut preimage = Vec::new();
        preimage.extend_from_slice(&[1u8; 20]);
        preimage.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2]);
        preimage.extend_from_slice(&11u32.to_be_bytes());
        preimage.extend_from_slice(b"SetGuardian");
        preimage.extend_from_slice(&2u32.to_be_bytes());
        preimage.extend_from_slice(&[0xaa, 0xbb]);
        preimage.extend_from_slice(&7u64.to_be_bytes());
        assert_eq!(action.hash(7), Hash::compute(&preimage));
    }

    #[test]
    fn test_request_lengths_must_match() {
        let mut request = ProposalRequest::new("tweak")
            .with_command(addr(1), Amount::ZERO, &Command::SetVotingDelay { delay: 1 })
            .unwrap();
        assert_eq!(request.actions().unwrap().len(), 1);

        request.values.push(Amount::ONE);
        assert!(request.actions().is_err());
    }

    #[test]
    fn test_action_json_uses_hex_data() {
        let action =
            ProposalAction::new(addr(1), Amount::ZERO, &Command::SetVotingDelay { delay: 1 }).unwrap();
        let json = serde_json::to_string(&action).unwrap();
        assert!(json.contains("\"data\":\"0x0100000000000000\""));
        let back: ProposalAction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, action);
    }
}
