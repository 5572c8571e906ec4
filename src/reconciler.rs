//! The outer periodic cycle: fetch farm inventory, admit/refresh nodes,
//! apply the wake-up policy, balance, and report — forever, until a
//! cancellation token fires.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::chain::Chain;
use crate::node::{Node, PowerState};
use crate::node_rpc::NodeRpc;
use crate::power;
use crate::proxy::Proxy;
use crate::state::State;
use crate::wakeup::{self, WakeUpDecision};

/// Cycle period. Named `timeout_update` in the control loop's own
/// vocabulary; the reconciler wakes up this often to re-evaluate the farm.
pub fn cycle_period() -> StdDuration {
    StdDuration::from_secs(5 * 60)
}

/// Signals the reconciler loop to stop after its current cycle completes.
#[derive(Clone, Default)]
pub struct CancelToken {
    notify: Arc<Notify>,
    cancelled: Arc<std::sync::atomic::AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, std::sync::atomic::Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(std::sync::atomic::Ordering::SeqCst)
    }

    async fn cancelled_or_elapsed(&self, duration: StdDuration) {
        if self.is_cancelled() {
            return;
        }
        tokio::select! {
            _ = self.notify.notified() => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }
}

/// Run the reconciler loop until cancelled. Consumes its own cancel token
/// clone so callers keep one to trigger shutdown.
pub async fn run(
    state: Arc<State>,
    chain: Arc<dyn Chain>,
    rpc: Arc<dyn NodeRpc>,
    proxy: Arc<dyn Proxy>,
    cancel: CancelToken,
) {
    info!("reconciler starting");
    while !cancel.is_cancelled() {
        if let Err(e) = run_cycle(&state, chain.as_ref(), rpc.as_ref(), proxy.as_ref()).await {
            if e.is_transient() {
                warn!(error = %e, "reconciler cycle encountered a transient error, retrying next cycle");
            } else {
                error!(error = %e, "reconciler cycle failed");
            }
        }
        cancel.cancelled_or_elapsed(cycle_period()).await;
    }
    info!("reconciler stopped");
}

/// Run exactly one reconciliation cycle. Exposed separately from `run` so
/// tests can drive individual cycles deterministically.
pub async fn run_cycle(
    state: &State,
    chain: &dyn Chain,
    rpc: &dyn NodeRpc,
    proxy: &dyn Proxy,
) -> crate::error::Result<()> {
    let round_start = Utc::now();

    let farm_nodes = chain
        .list_nodes(state.config.farm_id)
        .await
        .map_err(|e| crate::error::FarmerbotError::ChainError(e.to_string()))?;

    // Drop managed nodes that left the farm.
    for id in state.node_ids().await {
        if !farm_nodes.contains(&id) {
            info!(node_id = id, "node left the farm, dropping from managed set");
            state.delete_node(id).await;
        }
    }

    let ordered = order_with_priority_first(&farm_nodes, &state.config.priority_nodes);

    state.reset_monthly_random_wakeups_if_due(round_start).await;

    let total_managed_nodes = state.len().await;
    let mut wake_up_calls = 0u32;

    for node_id in ordered {
        if state.config.excluded_nodes.contains(&node_id) {
            continue;
        }
        if !state.config.included_nodes.is_empty()
            && !state.config.included_nodes.contains(&node_id)
        {
            continue;
        }

        if let Err(e) = add_or_update(state, chain, rpc, node_id).await {
            if e.is_transient() {
                warn!(node_id, error = %e, "failed to admit/refresh node, will retry next cycle");
                continue;
            }
            return Err(e);
        }

        let node = state.get_node(node_id).await?;

        if node.power_state == PowerState::Off
            && (node.never_shut_down || node.has_active_rent_contract)
        {
            if let Err(e) = power::power_on(state, chain, node_id).await {
                warn!(node_id, error = %e, "failed to power on node that must stay up");
            }
        }

        let node = state.get_node(node_id).await?;
        let decision = wakeup::should_wake_up(
            &node,
            &state.config,
            proxy,
            round_start,
            wake_up_calls,
            total_managed_nodes,
        )
        .await;

        if decision.should_wake() {
            match power::power_on(state, chain, node_id).await {
                Ok(()) => {
                    wake_up_calls += 1;
                    apply_wake_bookkeeping(state, node_id, &decision, round_start).await;
                }
                Err(e) => {
                    warn!(node_id, error = %e, "failed to power on node per wake-up policy");
                }
            }
        }
    }

    power::balance(state, chain).await;

    let report = state.report().await;
    info!(managed_nodes = report.len(), "reconciler cycle complete");

    Ok(())
}

async fn apply_wake_bookkeeping(
    state: &State,
    node_id: u32,
    decision: &WakeUpDecision,
    round_start: chrono::DateTime<Utc>,
) {
    if let Ok(mut node) = state.get_node(node_id).await {
        match decision {
            WakeUpDecision::WakeUrgent | WakeUpDecision::WakePeriodic => {
                node.last_time_periodic_wake_up = round_start;
            }
            WakeUpDecision::WakeRandom => {
                node.times_random_wake_ups += 1;
            }
            WakeUpDecision::DontWake => return,
        }
        let _ = state.update_node(node).await;
    }
}

/// Admit a node that isn't yet managed, or refresh one that is.
async fn add_or_update(
    state: &State,
    chain: &dyn Chain,
    rpc: &dyn NodeRpc,
    node_id: u32,
) -> crate::error::Result<()> {
    let never_shut_down = state.config.never_shut_down_nodes.contains(&node_id);

    if state.contains_node(node_id).await {
        let mut node = state.get_node(node_id).await?;
        node.refresh(chain, rpc, never_shut_down).await?;
        state.update_node(node).await
    } else {
        let node = Node::admit(chain, rpc, state.config.farm_id, node_id, never_shut_down).await?;
        state.add_node(node).await;
        Ok(())
    }
}

/// `dedup(priority ∩ farm_nodes) ++ (farm_nodes \ priority)`, preserving
/// `priority_nodes`' configured order and `farm_nodes`' order otherwise.
fn order_with_priority_first(farm_nodes: &[u32], priority_nodes: &[u32]) -> Vec<u32> {
    let mut ordered = Vec::with_capacity(farm_nodes.len());
    let mut seen = std::collections::HashSet::new();

    for id in priority_nodes {
        if farm_nodes.contains(id) && seen.insert(*id) {
            ordered.push(*id);
        }
    }
    for id in farm_nodes {
        if seen.insert(*id) {
            ordered.push(*id);
        }
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::Capacity;
    use crate::chain::mock::MockChain;
    use crate::chain::{NodeDescriptor, PowerTarget};
    use crate::config::{FarmConfig, PowerConfig};
    use crate::node_rpc::mock::MockNodeRpc;
    use crate::proxy::mock::MockProxy;

    fn config(farm_id: u32) -> FarmConfig {
        FarmConfig {
            farm_id,
            included_nodes: vec![],
            excluded_nodes: vec![],
            priority_nodes: vec![],
            never_shut_down_nodes: vec![],
            continue_on_powering_on_err: false,
            power: PowerConfig::default(),
        }
    }

    #[test]
    fn priority_nodes_are_deduplicated_and_come_first() {
        let farm = vec![1, 2, 3, 4];
        let priority = vec![3, 3, 1];
        assert_eq!(order_with_priority_first(&farm, &priority), vec![3, 1, 2, 4]);
    }

    #[tokio::test]
    async fn cycle_admits_new_nodes_and_wakes_on_high_utilization() {
        let state = State::new(config(1), 99);
        let total = Capacity::new(8, 16, 100, 1000);

        let chain = MockChain::new(vec![1, 2])
            .with_node(1, NodeDescriptor { twin_id: 101, resources_total: total, public_config: false, dedicated: false }, PowerTarget { state_up: true, target_up: true })
            .with_node(2, NodeDescriptor { twin_id: 102, resources_total: total, public_config: false, dedicated: false }, PowerTarget { state_up: false, target_up: false });

        let rpc = MockNodeRpc::default();
        rpc.set_stats(101, Capacity::new(7, 14, 90, 900));
        rpc.set_stats(102, Capacity::ZERO);

        let proxy = MockProxy::default();

        run_cycle(&state, &chain, &rpc, &proxy).await.unwrap();

        assert_eq!(state.len().await, 2);
        let n2 = state.get_node(2).await.unwrap();
        assert_eq!(n2.power_state, PowerState::WakingUp);
    }

    #[tokio::test]
    async fn excluded_node_is_never_admitted() {
        let mut cfg = config(1);
        cfg.excluded_nodes = vec![2];
        let state = State::new(cfg, 99);
        let total = Capacity::new(8, 16, 100, 1000);

        let chain = MockChain::new(vec![1, 2])
            .with_node(1, NodeDescriptor { twin_id: 101, resources_total: total, public_config: false, dedicated: false }, PowerTarget { state_up: true, target_up: true })
            .with_node(2, NodeDescriptor { twin_id: 102, resources_total: total, public_config: false, dedicated: false }, PowerTarget { state_up: true, target_up: true });

        let rpc = MockNodeRpc::default();
        rpc.set_stats(101, Capacity::ZERO);
        let proxy = MockProxy::default();

        run_cycle(&state, &chain, &rpc, &proxy).await.unwrap();

        assert!(state.contains_node(1).await);
        assert!(!state.contains_node(2).await);
    }

    #[tokio::test]
    async fn node_leaving_farm_is_dropped() {
        let state = State::new(config(1), 99);
        let total = Capacity::new(8, 16, 100, 1000);

        let chain = MockChain::new(vec![1])
            .with_node(1, NodeDescriptor { twin_id: 101, resources_total: total, public_config: false, dedicated: false }, PowerTarget { state_up: true, target_up: true });
        let rpc = MockNodeRpc::default();
        rpc.set_stats(101, Capacity::ZERO);
        let proxy = MockProxy::default();

        run_cycle(&state, &chain, &rpc, &proxy).await.unwrap();
        assert!(state.contains_node(1).await);

        let chain2 = MockChain::new(vec![]);
        run_cycle(&state, &chain2, &rpc, &proxy).await.unwrap();
        assert!(!state.contains_node(1).await);
    }
}
