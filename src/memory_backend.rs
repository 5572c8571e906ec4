//! A reference, non-persistent backend for `Chain`/`NodeRpc`/`Proxy`.
//!
//! Production deployments plug in a real substrate chain client, node RPC
//! transport, and grid-proxy HTTP client — those wire formats are outside
//! this crate's scope. This module exists so the binary is runnable
//! standalone (demos, `--network dev`, integration smoke tests) without
//! depending on a live grid.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::capacity::Capacity;
use crate::chain::{Chain, NodeDescriptor, PowerTarget};
use crate::node_rpc::{NodeRpc, PublicConfig};
use crate::proxy::{Proxy, ProxyNode};

pub struct InMemoryChain {
    farm_nodes: Mutex<Vec<u32>>,
    nodes: Mutex<HashMap<u32, NodeDescriptor>>,
    targets: Mutex<HashMap<u32, PowerTarget>>,
    balance: Mutex<i64>,
}

impl InMemoryChain {
    pub fn new(farm_nodes: Vec<u32>, nodes: HashMap<u32, NodeDescriptor>, balance: i64) -> Self {
        let targets = nodes
            .keys()
            .map(|id| (*id, PowerTarget { state_up: true, target_up: true }))
            .collect();
        Self {
            farm_nodes: Mutex::new(farm_nodes),
            nodes: Mutex::new(nodes),
            targets: Mutex::new(targets),
            balance: Mutex::new(balance),
        }
    }
}

#[async_trait]
impl Chain for InMemoryChain {
    async fn list_nodes(&self, _farm_id: u32) -> anyhow::Result<Vec<u32>> {
        Ok(self.farm_nodes.lock().unwrap().clone())
    }

    async fn get_node(&self, id: u32) -> anyhow::Result<NodeDescriptor> {
        self.nodes
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown node {id}"))
    }

    async fn get_power_target(&self, id: u32) -> anyhow::Result<PowerTarget> {
        self.targets
            .lock()
            .unwrap()
            .get(&id)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("unknown node {id}"))
    }

    async fn set_power_target(&self, _identity: u32, id: u32, up: bool) -> anyhow::Result<()> {
        let mut targets = self.targets.lock().unwrap();
        let entry = targets
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("unknown node {id}"))?;
        entry.target_up = up;
        entry.state_up = up;
        Ok(())
    }

    async fn get_balance(&self, _account: u32) -> anyhow::Result<i64> {
        Ok(*self.balance.lock().unwrap())
    }

    async fn get_twin_by_pubkey(&self, _key: &str) -> anyhow::Result<u32> {
        Ok(1)
    }
}

#[derive(Default)]
pub struct InMemoryNodeRpc {
    stats: Mutex<HashMap<u32, Capacity>>,
}

impl InMemoryNodeRpc {
    pub fn new(stats: HashMap<u32, Capacity>) -> Self {
        Self {
            stats: Mutex::new(stats),
        }
    }
}

#[async_trait]
impl NodeRpc for InMemoryNodeRpc {
    async fn stats(&self, twin_id: u32) -> anyhow::Result<Capacity> {
        Ok(self.stats.lock().unwrap().get(&twin_id).copied().unwrap_or(Capacity::ZERO))
    }

    async fn active_contracts(&self, _twin_id: u32) -> anyhow::Result<(bool, bool)> {
        Ok((false, false))
    }

    async fn public_config(&self, _twin_id: u32) -> anyhow::Result<Option<PublicConfig>> {
        Ok(None)
    }
}

#[derive(Default)]
pub struct InMemoryProxy;

#[async_trait]
impl Proxy for InMemoryProxy {
    async fn node(&self, _id: u32) -> anyhow::Result<ProxyNode> {
        Ok(ProxyNode {
            last_updated_at: Utc::now(),
        })
    }
}
