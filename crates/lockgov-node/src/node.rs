//! Bootstrap of the protocol from configuration and the state store.

use std::path::PathBuf;

use anyhow::Context;
use lockgov_governance::{CapabilityRegistry, Protocol, TreasuryHandler};
use lockgov_staking::InMemoryVault;
use lockgov_storage::{Snapshot, StateStore};
use tracing::info;

use crate::config::{NodeConfig, TreasuryConfig};

/// Config file written next to the store by `init`.
pub const CONFIG_FILE: &str = "lockgov.toml";

/// Treasury handler versions, in registration order.
pub fn treasury_handlers(treasury: &TreasuryConfig) -> [(u32, TreasuryHandler); 2] {
    [
        (1, TreasuryHandler::new(treasury.account)),
        (
            2,
            TreasuryHandler::new(treasury.account).with_cap(treasury.per_transfer_cap),
        ),
    ]
}

/// Handler code is not persisted; rebuild it from configuration.
pub fn build_registry(config: &NodeConfig) -> anyhow::Result<CapabilityRegistry> {
    let mut registry = CapabilityRegistry::new();
    if config.treasury.enabled {
        for (version, handler) in treasury_handlers(&config.treasury) {
            registry.register(config.treasury.capability, version, Box::new(handler))?;
        }
    }
    Ok(registry)
}

/// Fresh protocol with genesis balances credited and capabilities registered.
pub fn genesis(config: &NodeConfig) -> anyhow::Result<Protocol> {
    let mut vault = InMemoryVault::new();
    for allocation in &config.genesis {
        vault
            .mint(allocation.account, allocation.amount)
            .with_context(|| format!("genesis allocation to {}", allocation.account))?;
    }

    let treasury = &config.treasury;
    if treasury.enabled && !treasury.initial_balance.is_zero() {
        vault
            .mint(treasury.account, treasury.initial_balance)
            .context("treasury initial balance")?;
    }

    let mut protocol = Protocol::new(config.protocol.clone(), vault)?;
    if treasury.enabled {
        for (version, handler) in treasury_handlers(treasury) {
            protocol.register_capability(treasury.capability, version, Box::new(handler))?;
        }
    }
    Ok(protocol)
}

/// Write the genesis snapshot. An existing store is only replaced with `force`.
pub fn init_store(config: &NodeConfig, force: bool) -> anyhow::Result<StateStore> {
    let store = StateStore::open(&config.data_dir)?;
    if store.load_snapshot()?.is_some() || store.journal_len() > 0 {
        if !force {
            anyhow::bail!(
                "State store at '{}' is already initialized (use --force to replace it)",
                config.data_dir.display()
            );
        }
        store.clear()?;
    }

    let mut protocol = genesis(config)?;
    let entries = protocol.drain_journal();
    let (state, vault, _) = protocol.into_parts();
    store.commit(&Snapshot::new(state, vault), &entries)?;

    info!(
        data_dir = %config.data_dir.display(),
        protocol = %config.protocol.address,
        "Initialized state store"
    );
    Ok(store)
}

/// Resume the protocol from the latest snapshot.
pub fn open(config: &NodeConfig) -> anyhow::Result<(Protocol, StateStore)> {
    let store = StateStore::open(&config.data_dir)?;
    let snapshot = store.load_snapshot()?.with_context(|| {
        format!(
            "No state at '{}', run `lockgov init` first",
            config.data_dir.display()
        )
    })?;

    if snapshot.state.address != config.protocol.address {
        anyhow::bail!(
            "Store belongs to protocol {}, config names {}",
            snapshot.state.address,
            config.protocol.address
        );
    }

    let registry = build_registry(config)?;
    for target in snapshot.state.capabilities.keys() {
        if !registry.has_target(target) {
            anyhow::bail!("No handler configured for capability {}", target);
        }
    }

    let protocol = Protocol::from_snapshot(snapshot.state, snapshot.vault, registry);
    info!(clock = protocol.clock(), "Loaded protocol state");
    Ok((protocol, store))
}

/// Default config location inside a data directory.
pub fn config_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join(CONFIG_FILE)
}
