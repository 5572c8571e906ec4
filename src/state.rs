//! Process-wide farm snapshot: configured policy, indexed nodes, identity,
//! and the single mutex that orders every mutation.
//!
//! Every mutating path — whether driven by the reconciler or by an RPC
//! handler — goes through these methods. None of them hold the lock across
//! an `.await` that performs I/O; the caller fetches fresh data first, then
//! calls in to mutate.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::config::FarmConfig;
use crate::error::{FarmerbotError, Result};
use crate::node::{Node, PowerState};

/// Wall-clock duration a node must stay in its current power state before
/// it becomes eligible for another transition (cool-down window).
pub fn periodic_wake_up_duration() -> chrono::Duration {
    chrono::Duration::minutes(30)
}

struct Inner {
    nodes: HashMap<u32, Node>,
    /// Year/month of the last monthly reset of `times_random_wake_ups`,
    /// tracked explicitly so a missed 01:00 cycle (downtime, DST) still
    /// resets on the next cycle that observes a new month rather than being
    /// silently skipped for the rest of that month.
    last_random_wakeup_reset_month: Option<(i32, u32)>,
}

/// The shared state owned by the reconciler and referenced by the RPC
/// surface.
pub struct State {
    pub config: FarmConfig,
    pub farmer_twin_id: u32,
    inner: Mutex<Inner>,
}

/// A point-in-time view of a node, returned to callers so references never
/// alias the mutable map.
#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub id: u32,
    pub twin_id: u32,
    pub power_state: PowerState,
    pub used_cru: u64,
    pub used_mru: u64,
    pub used_sru: u64,
    pub used_hru: u64,
    pub total_cru: u64,
    pub total_mru: u64,
    pub total_sru: u64,
    pub total_hru: u64,
    pub has_active_rent_contract: bool,
    pub has_active_contracts: bool,
    pub never_shut_down: bool,
}

impl From<&Node> for NodeReport {
    fn from(n: &Node) -> Self {
        NodeReport {
            id: n.id,
            twin_id: n.twin_id,
            power_state: n.power_state,
            used_cru: n.resources.used.cru,
            used_mru: n.resources.used.mru,
            used_sru: n.resources.used.sru,
            used_hru: n.resources.used.hru,
            total_cru: n.resources.total.cru,
            total_mru: n.resources.total.mru,
            total_sru: n.resources.total.sru,
            total_hru: n.resources.total.hru,
            has_active_rent_contract: n.has_active_rent_contract,
            has_active_contracts: n.has_active_contracts,
            never_shut_down: n.never_shut_down,
        }
    }
}

impl State {
    pub fn new(config: FarmConfig, farmer_twin_id: u32) -> Self {
        Self {
            config,
            farmer_twin_id,
            inner: Mutex::new(Inner {
                nodes: HashMap::new(),
                last_random_wakeup_reset_month: None,
            }),
        }
    }

    pub async fn add_node(&self, node: Node) {
        let mut inner = self.inner.lock().await;
        inner.nodes.insert(node.id, node);
    }

    pub async fn delete_node(&self, id: u32) {
        let mut inner = self.inner.lock().await;
        inner.nodes.remove(&id);
    }

    pub async fn contains_node(&self, id: u32) -> bool {
        self.inner.lock().await.nodes.contains_key(&id)
    }

    pub async fn get_node(&self, id: u32) -> Result<Node> {
        self.inner
            .lock()
            .await
            .nodes
            .get(&id)
            .cloned()
            .ok_or(FarmerbotError::NodeNotFound(id))
    }

    pub async fn update_node(&self, node: Node) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.nodes.contains_key(&node.id) {
            return Err(FarmerbotError::NodeNotFound(node.id));
        }
        inner.nodes.insert(node.id, node);
        Ok(())
    }

    pub async fn node_ids(&self) -> Vec<u32> {
        self.inner.lock().await.nodes.keys().copied().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.nodes.len()
    }

    /// Return nodes whose power state is in `states`, preserving no
    /// particular order (callers that need determinism sort afterwards).
    pub async fn filter_by_power(&self, states: &[PowerState]) -> Vec<Node> {
        self.inner
            .lock()
            .await
            .nodes
            .values()
            .filter(|n| states.contains(&n.power_state))
            .cloned()
            .collect()
    }

    /// Nodes allowed to shut down: excludes public-config nodes, nodes
    /// still in their post-transition cool-down, and nodes with active
    /// rent/other contracts. Order is insertion order into the underlying
    /// map is not guaranteed by `HashMap`, so callers that need the "first
    /// candidate in a stable order" tie-break should sort by id, which is
    /// what the balancer does.
    pub async fn filter_allowed_to_shut_down(&self) -> Vec<Node> {
        let now = Utc::now();
        let mut candidates: Vec<Node> = self
            .inner
            .lock()
            .await
            .nodes
            .values()
            .filter(|n| {
                n.power_state == PowerState::On
                    && !n.public_config_present
                    && !n.never_shut_down
                    && !n.has_active_rent_contract
                    && !n.has_active_contracts
                    && n.timeout_claimed_resources <= now
                    && now - n.last_time_power_state_changed >= periodic_wake_up_duration()
                    && n.is_unused()
            })
            .cloned()
            .collect();
        candidates.sort_by_key(|n| n.id);
        candidates
    }

    pub async fn report(&self) -> Vec<NodeReport> {
        self.inner
            .lock()
            .await
            .nodes
            .values()
            .map(NodeReport::from)
            .collect()
    }

    /// Reset `times_random_wake_ups` for every managed node on the first
    /// cycle that observes a new month, and remember that month so it is
    /// not repeated until the month changes again.
    pub async fn reset_monthly_random_wakeups_if_due(&self, now: DateTime<Utc>) {
        use chrono::Datelike;
        let key = (now.year(), now.month());
        let mut inner = self.inner.lock().await;
        if inner.last_random_wakeup_reset_month == Some(key) {
            return;
        }
        inner.last_random_wakeup_reset_month = Some(key);
        for node in inner.nodes.values_mut() {
            node.times_random_wake_ups = 0;
        }
    }
}
