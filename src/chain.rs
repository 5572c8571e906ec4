//! Chain adapter: the on-chain substrate client interface.
//!
//! The wire format is out of scope for this crate — callers provide a
//! concrete implementation. A simple in-memory mock is provided for tests.

use async_trait::async_trait;

use crate::capacity::Capacity;

/// On-chain node descriptor as returned by `get_node`.
#[derive(Debug, Clone)]
pub struct NodeDescriptor {
    pub twin_id: u32,
    pub resources_total: Capacity,
    pub public_config: bool,
    pub dedicated: bool,
}

/// Power target as reported/desired on-chain.
#[derive(Debug, Clone, Copy)]
pub struct PowerTarget {
    /// Current observed state: true if up.
    pub state_up: bool,
    /// Desired target: true if up.
    pub target_up: bool,
}

impl PowerTarget {
    pub fn is_down(&self) -> bool {
        !self.state_up
    }

    pub fn target_is_down(&self) -> bool {
        !self.target_up
    }
}

/// The chain adapter farmerbot consumes. Implementations are expected to be
/// cheap to clone/share (e.g. `Arc<dyn Chain>`); each reconciler cycle opens
/// a scoped connection and releases it at cycle end, per the concurrency
/// model — that lifecycle lives in the concrete implementation, not here.
#[async_trait]
pub trait Chain: Send + Sync {
    async fn list_nodes(&self, farm_id: u32) -> anyhow::Result<Vec<u32>>;
    async fn get_node(&self, id: u32) -> anyhow::Result<NodeDescriptor>;
    async fn get_power_target(&self, id: u32) -> anyhow::Result<PowerTarget>;
    async fn set_power_target(&self, identity: u32, id: u32, up: bool) -> anyhow::Result<()>;
    async fn get_balance(&self, account: u32) -> anyhow::Result<i64>;
    async fn get_twin_by_pubkey(&self, key: &str) -> anyhow::Result<u32>;
}

#[cfg(any(test, feature = "testing"))]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// An in-memory chain double for reconciler/balancer tests.
    #[derive(Default)]
    pub struct MockChain {
        pub nodes: Mutex<HashMap<u32, NodeDescriptor>>,
        pub targets: Mutex<HashMap<u32, PowerTarget>>,
        pub farm_nodes: Mutex<Vec<u32>>,
        pub balance: Mutex<i64>,
        pub fail_set_power_target: Mutex<Option<u32>>,
    }

    impl MockChain {
        pub fn new(farm_nodes: Vec<u32>) -> Self {
            Self {
                farm_nodes: Mutex::new(farm_nodes),
                balance: Mutex::new(1_000_000_000),
                ..Default::default()
            }
        }

        pub fn with_node(self, id: u32, descriptor: NodeDescriptor, target: PowerTarget) -> Self {
            self.nodes.lock().unwrap().insert(id, descriptor);
            self.targets.lock().unwrap().insert(id, target);
            self
        }
    }

    #[async_trait]
    impl Chain for MockChain {
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
            if *self.fail_set_power_target.lock().unwrap() == Some(id) {
                anyhow::bail!("simulated set_power_target failure for node {id}");
            }
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
}
