//! Power actuator: power_on/power_off guards and the balancing policy.

use chrono::Utc;
use tracing::{info, warn};

use crate::capacity::{aggregate_usage, utilization_percent};
use crate::chain::Chain;
use crate::error::{FarmerbotError, Result};
use crate::node::PowerState;
use crate::state::{periodic_wake_up_duration, State};

/// Power a node on. No-op success if already On/WakingUp.
pub async fn power_on(state: &State, chain: &dyn Chain, node_id: u32) -> Result<()> {
    info!(node_id, "power on");

    let mut node = state.get_node(node_id).await?;

    if node.power_state.counts_as_online() {
        return Ok(());
    }

    chain
        .set_power_target(state.farmer_twin_id, node_id, true)
        .await
        .map_err(|e| FarmerbotError::ChainError(e.to_string()))?;

    let now = Utc::now();
    node.power_state = PowerState::WakingUp;
    node.last_time_awake = now;
    node.last_time_power_state_changed = now;
    state.update_node(node).await
}

/// Power a node off. Guarded: refuses with a descriptive, policy-refused
/// error if any precondition in §4.4 is violated. No-op success if already
/// Off/ShuttingDown.
pub async fn power_off(state: &State, chain: &dyn Chain, node_id: u32) -> Result<()> {
    info!(node_id, "power off");

    let mut node = state.get_node(node_id).await?;

    if matches!(node.power_state, PowerState::Off | PowerState::ShuttingDown) {
        return Ok(());
    }

    if node.never_shut_down {
        return Err(FarmerbotError::PolicyRefused(format!(
            "cannot power off node {node_id}, node is configured to never be shut down"
        )));
    }
    if node.public_config_present {
        return Err(FarmerbotError::PolicyRefused(format!(
            "cannot power off node {node_id}, node has public config"
        )));
    }
    if node.timeout_claimed_resources > Utc::now() {
        return Err(FarmerbotError::PolicyRefused(format!(
            "cannot power off node {node_id}, node has claimed resources"
        )));
    }
    if node.has_active_rent_contract {
        return Err(FarmerbotError::PolicyRefused(format!(
            "cannot power off node {node_id}, node has a rent contract"
        )));
    }
    if node.has_active_contracts {
        return Err(FarmerbotError::PolicyRefused(format!(
            "cannot power off node {node_id}, node has active contracts"
        )));
    }
    if !node.is_unused() {
        return Err(FarmerbotError::PolicyRefused(format!(
            "cannot power off node {node_id}, node is used"
        )));
    }
    if Utc::now() - node.last_time_power_state_changed < periodic_wake_up_duration() {
        return Err(FarmerbotError::PolicyRefused(format!(
            "cannot power off node {node_id}, node is still in its wake-up duration"
        )));
    }

    let online = state.filter_by_power(&[PowerState::On]).await;
    if online.len() < 2 {
        return Err(FarmerbotError::PolicyRefused(format!(
            "cannot power off node {node_id}, at least one node must stay on in the farm"
        )));
    }

    match chain.set_power_target(state.farmer_twin_id, node_id, false).await {
        Ok(()) => {
            let now = Utc::now();
            node.power_state = PowerState::ShuttingDown;
            node.last_time_power_state_changed = now;
            state.update_node(node).await
        }
        Err(e) => {
            // Check on-chain truth: the chain may already be shutting the
            // node down even though this call failed.
            match chain.get_power_target(node_id).await {
                Ok(target) if target.is_down() || target.target_is_down() => {
                    warn!(
                        node_id,
                        "node is shutting down on-chain although set_power_target failed"
                    );
                    let now = Utc::now();
                    node.power_state = PowerState::ShuttingDown;
                    node.last_time_power_state_changed = now;
                    state.update_node(node).await?;
                }
                _ => {}
            }
            Err(FarmerbotError::ChainError(format!(
                "failed to set node {node_id} power target to down: {e}"
            )))
        }
    }
}

/// Run the balancer: called every cycle after node refresh.
pub async fn balance(state: &State, chain: &dyn Chain) {
    let online = state.filter_by_power(&[PowerState::On, PowerState::WakingUp]).await;

    let pairs: Vec<_> = online
        .iter()
        .map(|n| (&n.resources.used, &n.resources.total, n.has_active_rent_contract))
        .collect();
    let (used, total) = aggregate_usage(pairs);

    if total.is_zero() {
        return;
    }

    let usage_percent = utilization_percent(&used, &total);
    let threshold = state.config.power.wake_up_threshold as f64;

    if usage_percent >= threshold {
        info!(usage_percent, threshold, "resource usage too high");
        resource_usage_too_high(state, chain).await;
    } else {
        info!(usage_percent, threshold, "resource usage too low");
        resource_usage_too_low(state, chain, used, total).await;
    }
}

/// Wake the first `Off` node in deterministic (id) order.
async fn resource_usage_too_high(state: &State, chain: &dyn Chain) {
    let mut ids = state.node_ids().await;
    ids.sort_unstable();

    for id in ids {
        if let Ok(node) = state.get_node(id).await {
            if node.power_state == PowerState::Off {
                if let Err(e) = power_on(state, chain, id).await {
                    warn!(node_id = id, error = %e, "failed to power on node");
                }
                return;
            }
        }
    }
    warn!("no available node to wake up, resource usage is high");
}

async fn resource_usage_too_low(
    state: &State,
    chain: &dyn Chain,
    used: crate::capacity::Capacity,
    total: crate::capacity::Capacity,
) {
    let online = state.filter_by_power(&[PowerState::On]).await;
    if online.len() <= 1 {
        return;
    }

    let candidates = state.filter_allowed_to_shut_down().await;
    if candidates.is_empty() {
        return;
    }

    let threshold = state.config.power.wake_up_threshold as f64;
    let mut new_used = used;
    let mut new_total = total;
    let mut nodes_left_online = online.len();

    for node in candidates {
        if nodes_left_online <= 1 {
            break;
        }

        nodes_left_online -= 1;
        new_used -= node.resources.used;
        new_total -= node.resources.total;

        if new_total.is_zero() {
            break;
        }

        let new_usage = utilization_percent(&new_used, &new_total);
        if new_usage < threshold {
            info!(node_id = node.id, new_usage, "turning off unused node");
            match power_off(state, chain, node.id).await {
                Ok(()) => {}
                Err(e) => {
                    warn!(node_id = node.id, error = %e, "failed to power off node");
                    let still_shutting_down = state
                        .get_node(node.id)
                        .await
                        .map(|n| n.power_state == PowerState::ShuttingDown)
                        .unwrap_or(false);
                    if !still_shutting_down {
                        nodes_left_online += 1;
                        new_used += node.resources.used;
                        new_total += node.resources.total;
                    }
                }
            }
        } else {
            // Keeping this node online would still leave us over threshold;
            // revert the tentative removal and try the next candidate.
            nodes_left_online += 1;
            new_used += node.resources.used;
            new_total += node.resources.total;
        }
    }
}
