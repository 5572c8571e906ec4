//! Admin RPC method handlers: version/report/findnode/includenode/poweron/poweroff.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::chain::Chain;
use crate::config::MIN_BALANCE_FOR_ACTION;
use crate::error::{FarmerbotError, Result};
use crate::node::{Node, PowerState};
use crate::node_rpc::NodeRpc;
use crate::power;
use crate::state::State;

/// Raw on-chain balance units per whole TFT, per the chain adapter's integer
/// convention (divide by this to get a display value).
const BALANCE_UNITS_PER_TFT: i64 = 10_000_000;

async fn require_min_balance_for_action(state: &State, chain: &dyn Chain) -> Result<()> {
    let raw = chain
        .get_balance(state.farmer_twin_id)
        .await
        .map_err(|e| FarmerbotError::ChainError(e.to_string()))?;
    let balance = raw as f64 / BALANCE_UNITS_PER_TFT as f64;
    if balance < MIN_BALANCE_FOR_ACTION {
        return Err(FarmerbotError::PolicyRefused(format!(
            "farmer balance {balance} tft is below the minimum {MIN_BALANCE_FOR_ACTION} tft required for this action"
        )));
    }
    Ok(())
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Minimum free capacity a node must offer, plus whether it must expose a
/// public config or be non-dedicated, to satisfy `findnode`.
#[derive(Debug, Deserialize, Default)]
pub struct NodeFilter {
    #[serde(default)]
    pub min_cru: u64,
    #[serde(default)]
    pub min_mru: u64,
    #[serde(default)]
    pub min_sru: u64,
    #[serde(default)]
    pub min_hru: u64,
    #[serde(default)]
    pub public_config_required: bool,
    #[serde(default)]
    pub dedicated_required: bool,
}

fn free_capacity(node: &Node) -> crate::capacity::Capacity {
    node.resources.total.saturating_sub(&node.resources.used)
}

fn satisfies(node: &Node, filter: &NodeFilter) -> bool {
    if node.power_state != PowerState::On {
        return false;
    }
    if filter.public_config_required && !node.public_config_present {
        return false;
    }
    if filter.dedicated_required && !node.dedicated {
        return false;
    }
    let free = free_capacity(node);
    free.cru >= filter.min_cru
        && free.mru >= filter.min_mru
        && free.sru >= filter.min_sru
        && free.hru >= filter.min_hru
}

pub fn version() -> Value {
    json!({ "version": VERSION })
}

pub async fn report(state: &State) -> Value {
    json!({ "nodes": state.report().await })
}

/// Return the lowest-id node satisfying `filter`, or `NoSuitableNode`.
pub async fn findnode(state: &State, filter: NodeFilter) -> Result<Value> {
    let mut ids = state.node_ids().await;
    ids.sort_unstable();

    for id in ids {
        if let Ok(node) = state.get_node(id).await {
            if satisfies(&node, &filter) {
                return Ok(json!({ "node_id": id }));
            }
        }
    }
    Err(FarmerbotError::NoSuitableNode)
}

/// Admit a node into the managed set, honoring the same exclusion/inclusion
/// rules the reconciler applies on each cycle.
pub async fn includenode(state: &State, chain: &dyn Chain, rpc: &dyn NodeRpc, node_id: u32) -> Result<Value> {
    if state.contains_node(node_id).await {
        return Err(FarmerbotError::PolicyRefused(format!(
            "node {node_id} is already managed"
        )));
    }
    if state.config.excluded_nodes.contains(&node_id) {
        return Err(FarmerbotError::PolicyRefused(format!(
            "node {node_id} is in excluded_nodes"
        )));
    }
    if !state.config.included_nodes.is_empty() && !state.config.included_nodes.contains(&node_id) {
        return Err(FarmerbotError::PolicyRefused(format!(
            "node {node_id} is not in included_nodes"
        )));
    }

    let never_shut_down = state.config.never_shut_down_nodes.contains(&node_id);
    let node = Node::admit(chain, rpc, state.config.farm_id, node_id, never_shut_down).await?;
    state.add_node(node).await;
    Ok(json!({ "included": node_id }))
}

/// Power a node on manually, then remove it from the managed set so the
/// reconciler does not immediately contest the farmer's own action.
pub async fn poweron(state: &State, chain: &dyn Chain, node_id: u32) -> Result<Value> {
    require_min_balance_for_action(state, chain).await?;
    power::power_on(state, chain, node_id).await?;
    state.delete_node(node_id).await;
    Ok(json!({ "powered_on": node_id }))
}

/// Power a node off manually, then remove it from the managed set.
pub async fn poweroff(state: &State, chain: &dyn Chain, node_id: u32) -> Result<Value> {
    require_min_balance_for_action(state, chain).await?;
    power::power_off(state, chain, node_id).await?;
    state.delete_node(node_id).await;
    Ok(json!({ "powered_off": node_id }))
}
