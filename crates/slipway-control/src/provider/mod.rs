//! Machine provider for cloud VM lifecycle.
//!
//! This module provides abstractions for creating, inspecting and deleting
//! virtual machines on a cloud provider. The primary implementation is a
//! REST client; a mock is provided for testing.

mod http;

pub use http::HttpProvider;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ProviderConfig, ProviderType};
use crate::error::{ControlError, ControlResult};
use crate::types::{MachineId, MachineSpec};

/// Scope of a machine network address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkScope {
    /// Publicly reachable address.
    Public,
    /// Provider-internal address.
    Private,
}

/// One network address assigned to a machine.
#[derive(Debug, Clone)]
pub struct NetworkAddress {
    /// The address itself.
    pub address: String,
    /// Whether the address is public or private.
    pub scope: NetworkScope,
}

/// A machine as reported by the provider.
#[derive(Debug, Clone)]
pub struct Machine {
    /// Provider-assigned machine ID.
    pub id: MachineId,
    /// Machine name.
    pub name: String,
    /// Assigned network addresses; empty until the machine is ready.
    pub networks: Vec<NetworkAddress>,
}

impl Machine {
    /// Whether the provider has assigned any network yet.
    #[must_use]
    pub fn has_network(&self) -> bool {
        !self.networks.is_empty()
    }

    /// The public-facing address, if one is assigned.
    #[must_use]
    pub fn public_address(&self) -> Option<&str> {
        self.networks
            .iter()
            .find(|n| n.scope == NetworkScope::Public)
            .map(|n| n.address.as_str())
    }
}

/// Trait for machine provider implementations.
#[async_trait]
pub trait MachineProvider: Send + Sync {
    /// Create a machine from the given spec.
    async fn create_machine(&self, spec: &MachineSpec) -> ControlResult<Machine>;

    /// Get a machine by ID, including its current network assignments.
    async fn get_machine(&self, id: MachineId) -> ControlResult<Machine>;

    /// Look up a machine by name.
    ///
    /// Used to re-attach to a machine a redelivered job already created.
    async fn find_machine(&self, name: &str) -> ControlResult<Option<Machine>>;

    /// Delete a machine.
    ///
    /// Callers treat this as best-effort; a missing machine is not an
    /// error.
    async fn delete_machine(&self, id: MachineId) -> ControlResult<()>;
}

/// Create a provider from configuration.
pub fn create_provider(config: &ProviderConfig) -> ControlResult<Arc<dyn MachineProvider>> {
    match config.provider_type {
        ProviderType::Http => Ok(Arc::new(HttpProvider::new(config)?)),
        ProviderType::Mock => Ok(Arc::new(MockProvider::default())),
    }
}

struct MockEntry {
    machine: Machine,
    get_calls: u32,
}

#[derive(Default)]
struct MockState {
    machines: std::collections::HashMap<i64, MockEntry>,
    next_id: i64,
    create_calls: u32,
    deleted: Vec<MachineId>,
}

/// Mock provider for testing.
///
/// Machines report no networks until `ready_after` get calls have been
/// made for them, mimicking a machine that takes a while to boot.
pub struct MockProvider {
    state: std::sync::RwLock<MockState>,
    ready_after: u32,
    fail_create: bool,
    public_addresses: bool,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            state: std::sync::RwLock::new(MockState {
                next_id: 1,
                ..MockState::default()
            }),
            ready_after: 1,
            fail_create: false,
            public_addresses: true,
        }
    }
}

impl MockProvider {
    /// Set the ID the next created machine receives.
    #[must_use]
    pub fn with_first_id(self, id: i64) -> Self {
        if let Ok(mut state) = self.state.write() {
            state.next_id = id;
        }
        self
    }

    /// Report networks only after this many get calls per machine.
    #[must_use]
    pub const fn ready_after(mut self, polls: u32) -> Self {
        self.ready_after = polls;
        self
    }

    /// Never report any network assignment.
    #[must_use]
    pub const fn never_ready(mut self) -> Self {
        self.ready_after = u32::MAX;
        self
    }

    /// Fail every create call.
    #[must_use]
    pub const fn fail_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    /// Assign only private addresses once ready.
    #[must_use]
    pub const fn private_only(mut self) -> Self {
        self.public_addresses = false;
        self
    }

    /// Machines deleted so far, in order.
    pub fn deleted(&self) -> Vec<MachineId> {
        self.state.read().map(|s| s.deleted.clone()).unwrap_or_default()
    }

    /// Number of create calls issued so far.
    pub fn create_calls(&self) -> u32 {
        self.state.read().map(|s| s.create_calls).unwrap_or(0)
    }

    fn address_for(&self, id: i64) -> NetworkAddress {
        NetworkAddress {
            address: format!("192.0.2.{}", id.rem_euclid(250) + 1),
            scope: if self.public_addresses {
                NetworkScope::Public
            } else {
                NetworkScope::Private
            },
        }
    }
}

#[async_trait]
impl MachineProvider for MockProvider {
    async fn create_machine(&self, spec: &MachineSpec) -> ControlResult<Machine> {
        let mut state = self
            .state
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        state.create_calls += 1;

        if self.fail_create {
            return Err(ControlError::provider("simulated create failure"));
        }

        let id = state.next_id;
        state.next_id += 1;

        let machine = Machine {
            id: MachineId::new(id),
            name: spec.name.clone(),
            networks: Vec::new(),
        };

        state.machines.insert(
            id,
            MockEntry {
                machine: machine.clone(),
                get_calls: 0,
            },
        );

        Ok(machine)
    }

    async fn get_machine(&self, id: MachineId) -> ControlResult<Machine> {
        let address = self.address_for(id.as_i64());
        let mut state = self
            .state
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let ready_after = self.ready_after;
        let entry = state
            .machines
            .get_mut(&id.as_i64())
            .ok_or_else(|| ControlError::provider(format!("machine not found: {id}")))?;

        entry.get_calls = entry.get_calls.saturating_add(1);
        if entry.get_calls >= ready_after && entry.machine.networks.is_empty() {
            entry.machine.networks.push(address);
        }

        Ok(entry.machine.clone())
    }

    async fn find_machine(&self, name: &str) -> ControlResult<Option<Machine>> {
        let state = self
            .state
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(state
            .machines
            .values()
            .find(|e| e.machine.name == name)
            .map(|e| e.machine.clone()))
    }

    async fn delete_machine(&self, id: MachineId) -> ControlResult<()> {
        let mut state = self
            .state
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        state.machines.remove(&id.as_i64());
        state.deleted.push(id);

        Ok(())
    }
}

impl std::fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockProvider")
            .field("ready_after", &self.ready_after)
            .finish_non_exhaustive()
    }
}
