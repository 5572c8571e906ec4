//! End-to-end scenarios exercising a full reconciler cycle and the RPC
//! surface together, against the in-memory mock adapters.

use std::sync::Arc;

use chrono::Utc;

use farmerbot::capacity::Capacity;
use farmerbot::chain::mock::MockChain;
use farmerbot::chain::{Chain, NodeDescriptor, PowerTarget};
use farmerbot::config::{FarmConfig, PowerConfig};
use farmerbot::node::{Node, PowerState, Resources};
use farmerbot::node_rpc::mock::MockNodeRpc;
use farmerbot::node_rpc::NodeRpc;
use farmerbot::proxy::mock::MockProxy;
use farmerbot::proxy::Proxy;
use farmerbot::reconciler::run_cycle;
use farmerbot::rpc::auth::AuthGate;
use farmerbot::rpc::handlers;
use farmerbot::state::State;

/// A node already past its post-transition cool-down window, as if it had
/// been managed since a prior cycle — used where a scenario's precondition
/// is "already past cool-down" rather than "just admitted this cycle".
fn seeded_node(id: u32, twin_id: u32, total: Capacity, used: Capacity) -> Node {
    let past = Utc::now() - chrono::Duration::hours(1);
    Node {
        id,
        twin_id,
        resources: Resources { total, used },
        public_config_present: false,
        never_shut_down: false,
        has_active_rent_contract: false,
        has_active_contracts: false,
        power_state: PowerState::On,
        last_time_awake: past,
        last_time_power_state_changed: past,
        last_time_periodic_wake_up: past,
        times_random_wake_ups: 0,
        timeout_claimed_resources: past,
        dedicated: false,
    }
}

fn base_config() -> FarmConfig {
    FarmConfig {
        farm_id: 1,
        included_nodes: vec![],
        excluded_nodes: vec![],
        priority_nodes: vec![],
        never_shut_down_nodes: vec![],
        continue_on_powering_on_err: false,
        power: PowerConfig {
            wake_up_threshold: 80,
            ..Default::default()
        },
    }
}

#[tokio::test]
async fn scenario_1_high_utilization_wakes_one_node() {
    let state = State::new(base_config(), 99);
    let total = Capacity::new(8, 16, 100, 1000);

    let chain = MockChain::new(vec![1, 2])
        .with_node(1, NodeDescriptor { twin_id: 101, resources_total: total, public_config: false, dedicated: false }, PowerTarget { state_up: true, target_up: true })
        .with_node(2, NodeDescriptor { twin_id: 102, resources_total: total, public_config: false, dedicated: false }, PowerTarget { state_up: false, target_up: false });

    let rpc = MockNodeRpc::default();
    rpc.set_stats(101, Capacity::new(7, 14, 90, 900));
    rpc.set_stats(102, Capacity::ZERO);
    let proxy = MockProxy::default();

    run_cycle(&state, &chain, &rpc, &proxy).await.unwrap();

    let target = chain.get_power_target(2).await.unwrap();
    assert!(target.target_up);
    assert_eq!(state.get_node(2).await.unwrap().power_state, PowerState::WakingUp);
}

#[tokio::test]
async fn scenario_2_low_utilization_powers_one_off_keeps_one_on() {
    let state = State::new(base_config(), 99);
    let total = Capacity::new(8, 16, 100, 1000);

    // Both nodes are already managed and past their cool-down window, as the
    // scenario requires ("both past cool-down") — a node admitted in the
    // same cycle it is evaluated in has not cleared the 30-minute cool-down
    // yet, so it must already be present in state rather than freshly
    // admitted here.
    state.add_node(seeded_node(1, 101, total, Capacity::ZERO)).await;
    state.add_node(seeded_node(2, 102, total, Capacity::ZERO)).await;

    let chain = MockChain::new(vec![1, 2])
        .with_node(1, NodeDescriptor { twin_id: 101, resources_total: total, public_config: false, dedicated: false }, PowerTarget { state_up: true, target_up: true })
        .with_node(2, NodeDescriptor { twin_id: 102, resources_total: total, public_config: false, dedicated: false }, PowerTarget { state_up: true, target_up: true });

    let rpc = MockNodeRpc::default();
    rpc.set_stats(101, Capacity::ZERO);
    rpc.set_stats(102, Capacity::ZERO);
    let proxy = MockProxy::default();

    run_cycle(&state, &chain, &rpc, &proxy).await.unwrap();

    let n1 = state.get_node(1).await.unwrap().power_state;
    let n2 = state.get_node(2).await.unwrap().power_state;
    let off_count = [n1, n2].iter().filter(|s| **s == PowerState::ShuttingDown).count();
    let on_count = [n1, n2].iter().filter(|s| **s == PowerState::On).count();
    assert_eq!(off_count, 1, "exactly one node should be commanded down");
    assert_eq!(on_count, 1, "at least one node must stay on (P1)");
}

#[tokio::test]
async fn scenario_3_rent_contract_overrides_idle() {
    let state = State::new(base_config(), 99);
    let total = Capacity::new(8, 16, 100, 1000);

    let chain = MockChain::new(vec![1, 2])
        .with_node(1, NodeDescriptor { twin_id: 101, resources_total: total, public_config: false, dedicated: false }, PowerTarget { state_up: true, target_up: true })
        .with_node(2, NodeDescriptor { twin_id: 102, resources_total: total, public_config: false, dedicated: false }, PowerTarget { state_up: true, target_up: true });

    let rpc = MockNodeRpc::default();
    rpc.set_stats(101, Capacity::ZERO);
    rpc.set_contracts(101, false, true); // rented
    rpc.set_stats(102, Capacity::ZERO);
    let proxy = MockProxy::default();

    run_cycle(&state, &chain, &rpc, &proxy).await.unwrap();

    assert_eq!(state.get_node(1).await.unwrap().power_state, PowerState::On);
}

#[tokio::test]
async fn scenario_4_manual_override_stops_management() {
    let state = Arc::new(State::new(base_config(), 99));
    let total = Capacity::new(8, 16, 100, 1000);

    let chain: Arc<dyn Chain> = Arc::new(
        MockChain::new(vec![1, 2])
            .with_node(1, NodeDescriptor { twin_id: 101, resources_total: total, public_config: false, dedicated: false }, PowerTarget { state_up: true, target_up: true })
            .with_node(2, NodeDescriptor { twin_id: 102, resources_total: total, public_config: false, dedicated: false }, PowerTarget { state_up: true, target_up: true }),
    );
    let rpc: Arc<dyn NodeRpc> = Arc::new(MockNodeRpc::default());
    let proxy: Arc<dyn Proxy> = Arc::new(MockProxy::default());

    run_cycle(&state, chain.as_ref(), rpc.as_ref(), proxy.as_ref()).await.unwrap();
    assert!(state.contains_node(1).await);

    handlers::poweroff(&state, chain.as_ref(), 1).await.unwrap();
    assert!(!state.contains_node(1).await);

    run_cycle(&state, chain.as_ref(), rpc.as_ref(), proxy.as_ref()).await.unwrap();
    assert!(
        !state.contains_node(1).await,
        "a manually powered-off node must not be re-admitted without includenode"
    );
}

#[tokio::test]
async fn scenario_5_urgent_wake_up() {
    let state = State::new(base_config(), 99);
    let total = Capacity::new(8, 16, 100, 1000);

    let chain = MockChain::new(vec![1])
        .with_node(1, NodeDescriptor { twin_id: 101, resources_total: total, public_config: false, dedicated: false }, PowerTarget { state_up: false, target_up: false });
    let rpc = MockNodeRpc::default();
    rpc.set_stats(101, Capacity::ZERO);

    let proxy = MockProxy::default();
    proxy.set_last_updated(1, Utc::now() - chrono::Duration::hours(24));

    run_cycle(&state, &chain, &rpc, &proxy).await.unwrap();

    let target = chain.get_power_target(1).await.unwrap();
    assert!(target.target_up, "urgent wake up must issue set_power_target(up)");
    assert_eq!(state.get_node(1).await.unwrap().power_state, PowerState::WakingUp);
}

#[tokio::test]
async fn scenario_6_authorization_mismatch_refuses_without_chain_call() {
    let state = State::new(base_config(), 42);
    let chain = MockChain::new(vec![1]);
    let gate = AuthGate::new(42);

    let result = gate.authorize(7);
    assert!(result.is_err());

    // An authorization failure must short-circuit before any chain call or
    // state mutation; the farm's node list is untouched (it still lists 1).
    let farm_nodes = chain.list_nodes(1).await.unwrap();
    assert_eq!(farm_nodes, vec![1]);
    assert_eq!(state.len().await, 0);
}
