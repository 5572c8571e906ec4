//! Per-node state machine and resource record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capacity::Capacity;
use crate::chain::{Chain, PowerTarget};
use crate::error::{FarmerbotError, Result};
use crate::node_rpc::NodeRpc;

/// Power state of a managed node. A closed, cyclic set — no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    On,
    Off,
    WakingUp,
    ShuttingDown,
}

impl PowerState {
    /// Nodes in this state count toward farm online capacity.
    pub fn counts_as_online(&self) -> bool {
        matches!(self, PowerState::On | PowerState::WakingUp)
    }
}

/// Resources known for a node: installed total, and observed used.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Resources {
    pub total: Capacity,
    pub used: Capacity,
}

/// A single managed node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: u32,
    pub twin_id: u32,
    pub resources: Resources,
    pub public_config_present: bool,
    pub never_shut_down: bool,
    pub has_active_rent_contract: bool,
    pub has_active_contracts: bool,
    pub power_state: PowerState,
    pub last_time_awake: DateTime<Utc>,
    pub last_time_power_state_changed: DateTime<Utc>,
    pub last_time_periodic_wake_up: DateTime<Utc>,
    pub times_random_wake_ups: u32,
    pub timeout_claimed_resources: DateTime<Utc>,
    pub dedicated: bool,
}

/// Derive the power state implied by the chain's confirmed/desired power
/// target: `state_up` is what the chain has confirmed, `target_up` is what
/// it has been asked for. The four combinations map exactly onto the four
/// `PowerState` variants, so the chain is the sole source of truth here —
/// callers never need to special-case a node's prior local state to decide
/// between e.g. `WakingUp` and `On`.
fn settle_power_state(target: &PowerTarget) -> PowerState {
    match (target.target_up, target.state_up) {
        (true, true) => PowerState::On,
        (true, false) => PowerState::WakingUp,
        (false, true) => PowerState::ShuttingDown,
        (false, false) => PowerState::Off,
    }
}

impl Node {
    /// `node.used == {0,0,0,0}`.
    pub fn is_unused(&self) -> bool {
        self.resources.used.is_zero()
    }

    /// Admit a node for the first time: fetch its on-chain descriptor and
    /// live stats, and populate every field. Power state reflects the
    /// chain's reported target/state as-is; a `never_shut_down` node
    /// observed `Off` is corrected by the reconciler's explicit `power_on`
    /// call on the same cycle, not by a local field flip here.
    pub async fn admit(
        chain: &dyn Chain,
        rpc: &dyn NodeRpc,
        farm_id: u32,
        node_id: u32,
        never_shut_down: bool,
    ) -> Result<Node> {
        let descriptor = chain
            .get_node(node_id)
            .await
            .map_err(|e| FarmerbotError::ChainError(e.to_string()))?;

        let target = chain
            .get_power_target(node_id)
            .await
            .map_err(|e| FarmerbotError::ChainError(e.to_string()))?;

        let stats = rpc
            .stats(descriptor.twin_id)
            .await
            .map_err(|e| FarmerbotError::Unreachable(node_id, e.to_string()))?;

        let (has_active_contracts, has_active_rent_contract) = rpc
            .active_contracts(descriptor.twin_id)
            .await
            .map_err(|e| FarmerbotError::Unreachable(node_id, e.to_string()))?;

        let public_config_present = rpc
            .public_config(descriptor.twin_id)
            .await
            .map_err(|e| FarmerbotError::Unreachable(node_id, e.to_string()))?
            .is_some();

        let now = Utc::now();
        let power_state = settle_power_state(&target);

        let _ = farm_id;
        Ok(Node {
            id: node_id,
            twin_id: descriptor.twin_id,
            resources: Resources {
                total: descriptor.resources_total,
                used: stats,
            },
            public_config_present,
            never_shut_down,
            has_active_rent_contract,
            has_active_contracts,
            power_state,
            last_time_awake: now,
            last_time_power_state_changed: now,
            last_time_periodic_wake_up: now,
            times_random_wake_ups: 0,
            timeout_claimed_resources: now,
            dedicated: descriptor.dedicated,
        })
    }

    /// Re-read stats, contracts, resources, and power state. On RPC failure
    /// the prior state is preserved by the caller (this returns the error
    /// but does not mutate `self`), so the next cycle retries.
    ///
    /// Power state is resettled from the chain's confirmed/desired target
    /// on every call, so `WakingUp`/`ShuttingDown` nodes transition to
    /// `On`/`Off` once the chain confirms the change — without this, a node
    /// that was ever woken up would count toward online capacity forever
    /// under `WakingUp` but never again match `filter_allowed_to_shut_down`
    /// or the minimum-online guard, both of which require exactly `On`.
    /// `never_shut_down` plays no part in this: a node observed `Off` is
    /// left `Off` here, and it is the reconciler's explicit `power_on` call
    /// (a real chain transaction) that corrects it.
    pub async fn refresh(
        &mut self,
        chain: &dyn Chain,
        rpc: &dyn NodeRpc,
        never_shut_down: bool,
    ) -> Result<()> {
        let target = chain
            .get_power_target(self.id)
            .await
            .map_err(|e| FarmerbotError::ChainError(e.to_string()))?;

        let stats = rpc
            .stats(self.twin_id)
            .await
            .map_err(|e| FarmerbotError::Unreachable(self.id, e.to_string()))?;

        let (has_active_contracts, has_active_rent_contract) = rpc
            .active_contracts(self.twin_id)
            .await
            .map_err(|e| FarmerbotError::Unreachable(self.id, e.to_string()))?;

        let public_config_present = rpc
            .public_config(self.twin_id)
            .await
            .map_err(|e| FarmerbotError::Unreachable(self.id, e.to_string()))?
            .is_some();

        self.never_shut_down = never_shut_down;
        self.resources.used = stats;
        self.has_active_contracts = has_active_contracts;
        self.has_active_rent_contract = has_active_rent_contract;
        self.public_config_present = public_config_present;

        let settled = settle_power_state(&target);
        if settled != self.power_state {
            self.power_state = settled;
            self.last_time_power_state_changed = Utc::now();
        }

        Ok(())
    }
}
