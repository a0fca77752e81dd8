//! Versioned capability registry.
//!
//! Non-governance actions are routed to handlers registered per target
//! address and version. Which version is active is part of the protocol
//! state and changes only through an `UpgradeCapability` action; the
//! registry itself just holds the handler code.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use lockgov_staking::TokenVault;
use lockgov_types::{Address, Amount, Timestamp};
use serde::{Deserialize, Serialize};

use crate::action::Command;
use crate::error::GovernanceError;

/// What a successfully dispatched action did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionOutput {
    ParameterChanged { name: String, value: String },
    Transferred { from: Address, to: Address, amount: Amount },
    CapabilityUpgraded { target: Address, version: u32 },
}

/// Execution environment handed to a handler.
pub struct ActionContext<'a> {
    pub proposal_id: u64,
    pub target: Address,
    pub value: Amount,
    pub now: Timestamp,
    pub vault: &'a mut dyn TokenVault,
}

/// Code behind a capability target.
pub trait ActionHandler: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Run `command`. An error becomes a failed receipt; it does not undo
    /// the proposal's execution.
    fn handle(&self, ctx: &mut ActionContext<'_>, command: &Command) -> Result<ActionOutput, String>;
}

/// Handlers by target and version.
#[derive(Default)]
pub struct CapabilityRegistry {
    handlers: HashMap<Address, BTreeMap<u32, Box<dyn ActionHandler>>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` as `version` of `target`.
    pub fn register(
        &mut self,
        target: Address,
        version: u32,
        handler: Box<dyn ActionHandler>,
    ) -> Result<(), GovernanceError> {
        if target.is_zero() {
            return Err(GovernanceError::InvalidParameter(
                "capability target is the zero address".to_string(),
            ));
        }
        let versions = self.handlers.entry(target).or_default();
        if versions.contains_key(&version) {
            return Err(GovernanceError::StateConflict(format!(
                "version {} of {} is already registered",
                version, target
            )));
        }
        tracing::debug!(target = %target, version, handler = handler.name(), "Capability registered");
        versions.insert(version, handler);
        Ok(())
    }

    pub fn resolve(&self, target: &Address, version: u32) -> Option<&dyn ActionHandler> {
        self.handlers
            .get(target)
            .and_then(|versions| versions.get(&version))
            .map(|handler| handler.as_ref())
    }

    pub fn has_target(&self, target: &Address) -> bool {
        self.handlers.contains_key(target)
    }

    pub fn has_version(&self, target: &Address, version: u32) -> bool {
        self.resolve(target, version).is_some()
    }

    /// Registered versions of `target`, ascending.
    pub fn versions(&self, target: &Address) -> Vec<u32> {
        self.handlers
            .get(target)
            .map(|versions| versions.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn latest_version(&self, target: &Address) -> Option<u32> {
        self.handlers
            .get(target)
            .and_then(|versions| versions.keys().next_back().copied())
    }
}

impl fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (target, versions) in &self.handlers {
            let names: Vec<(u32, &str)> = versions.iter().map(|(v, h)| (*v, h.name())).collect();
            map.entry(target, &names);
        }
        map.finish()
    }
}

/// Pays out of a treasury account held in the vault.
#[derive(Debug, Clone)]
pub struct TreasuryHandler {
    treasury: Address,
    per_transfer_cap: Option<Amount>,
}

impl TreasuryHandler {
    pub fn new(treasury: Address) -> Self {
        Self {
            treasury,
            per_transfer_cap: None,
        }
    }

    /// Refuse transfers above `cap`.
    pub fn with_cap(mut self, cap: Amount) -> Self {
        self.per_transfer_cap = Some(cap);
        self
    }

    pub fn treasury(&self) -> &Address {
        &self.treasury
    }
}

impl ActionHandler for TreasuryHandler {
    fn name(&self) -> &str {
        if self.per_transfer_cap.is_some() {
            "treasury-capped"
        } else {
            "treasury"
        }
    }

    fn handle(&self, ctx: &mut ActionContext<'_>, command: &Command) -> Result<ActionOutput, String> {
        let Command::TreasuryTransfer { to, amount } = command else {
            return Err(format!("{} does not handle {}", self.name(), command.signature()));
        };
        if to.is_zero() {
            return Err("transfer to the zero address".to_string());
        }
        if let Some(cap) = self.per_transfer_cap {
            if *amount > cap {
                return Err(format!("transfer of {} exceeds the cap of {}", amount, cap));
            }
        }

        ctx.vault
            .transfer(&self.treasury, to, *amount)
            .map_err(|e| e.to_string())?;

        tracing::info!(
            proposal = ctx.proposal_id,
            to = %to,
            amount = %amount,
            "Treasury transfer"
        );
        Ok(ActionOutput::Transferred {
            from: self.treasury,
            to: *to,
            amount: *amount,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lockgov_staking::InMemoryVault;

    fn addr(n: u8) -> Address {
        Address::from_bytes([n; 20])
    }

    fn context(vault: &mut InMemoryVault) -> ActionContext<'_> {
        ActionContext {
            proposal_id: 1,
            target: addr(0x70),
            value: Amount::ZERO,
            now: 0,
            vault,
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = CapabilityRegistry::new();
        let target = addr(0x70);
        registry
            .register(target, 1, Box::new(TreasuryHandler::new(addr(0x71))))
            .unwrap();
        registry
            .register(target, 2, Box::new(TreasuryHandler::new(addr(0x71)).with_cap(Amount::from_u64(5))))
            .unwrap();

        assert!(registry.has_target(&target));
        assert!(registry.has_version(&target, 2));
        assert!(!registry.has_version(&target, 3));
        assert_eq!(registry.versions(&target), vec![1, 2]);
        assert_eq!(registry.latest_version(&target), Some(2));
        assert_eq!(registry.resolve(&target, 2).map(|h| h.name()), Some("treasury-capped"));
        assert!(registry.resolve(&addr(0x72), 1).is_none());

        let err = registry
            .register(target, 1, Box::new(TreasuryHandler::new(addr(0x71))))
            .unwrap_err();
        assert!(matches!(err, GovernanceError::StateConflict(_)));

        let err = registry
            .register(Address::ZERO, 1, Box::new(TreasuryHandler::new(addr(0x71))))
            .unwrap_err();
        assert!(matches!(err, GovernanceError::InvalidParameter(_)));
    }

    #[test]
    fn test_treasury_transfer() {
        let mut vault = InMemoryVault::new();
        vault.mint(addr(0x71), Amount::from_u64(100)).unwrap();
        let handler = TreasuryHandler::new(addr(0x71));

        let command = Command::TreasuryTransfer {
            to: addr(5),
            amount: Amount::from_u64(40),
        };
        let output = handler.handle(&mut context(&mut vault), &command).unwrap();
        assert_eq!(
            output,
            ActionOutput::Transferred {
                from: addr(0x71),
                to: addr(5),
                amount: Amount::from_u64(40),
            }
        );
        assert_eq!(vault.balance_of(&addr(5)), Amount::from_u64(40));
        assert_eq!(vault.balance_of(&addr(0x71)), Amount::from_u64(60));

        // Insufficient funds leave balances alone
        let command = Command::TreasuryTransfer {
            to: addr(5),
            amount: Amount::from_u64(61),
        };
        assert!(handler.handle(&mut context(&mut vault), &command).is_err());
        assert_eq!(vault.balance_of(&addr(0x71)), Amount::from_u64(60));
    }

    #[test]
    fn test_cap_and_foreign_commands() {
        let mut vault = InMemoryVault::new();
        vault.mint(addr(0x71), Amount::from_u64(100)).unwrap();
        let handler = TreasuryHandler::new(addr(0x71)).with_cap(Amount::from_u64(10));

        let command = Command::TreasuryTransfer {
            to: addr(5),
            amount: Amount::from_u64(11),
        };
        let err = handler.handle(&mut context(&mut vault), &command).unwrap_err();
        assert!(err.contains("cap"));

        let err = handler
            .handle(&mut context(&mut vault), &Command::SetVotingDelay { delay: 1 })
            .unwrap_err();
        assert!(err.contains("SetVotingDelay"));
    }
}
