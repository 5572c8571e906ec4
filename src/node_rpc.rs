//! Node RPC adapter: the long-lived transport used to query individual
//! nodes directly (resource stats, contracts, public config).

use async_trait::async_trait;

use crate::capacity::Capacity;

/// Public network configuration exposed by a node, if any.
#[derive(Debug, Clone)]
pub struct PublicConfig {
    pub ipv4: Option<String>,
    pub ipv6: Option<String>,
    pub domain: Option<String>,
}

#[async_trait]
pub trait NodeRpc: Send + Sync {
    async fn stats(&self, twin_id: u32) -> anyhow::Result<Capacity>;
    async fn active_contracts(&self, twin_id: u32) -> anyhow::Result<(bool, bool)>;
    async fn public_config(&self, twin_id: u32) -> anyhow::Result<Option<PublicConfig>>;
}

#[cfg(any(test, feature = "testing"))]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockNodeRpc {
        pub stats: Mutex<HashMap<u32, Capacity>>,
        pub contracts: Mutex<HashMap<u32, (bool, bool)>>,
        pub public_config: Mutex<HashMap<u32, PublicConfig>>,
        pub unreachable: Mutex<Vec<u32>>,
    }

    impl MockNodeRpc {
        pub fn set_stats(&self, twin_id: u32, cap: Capacity) {
            self.stats.lock().unwrap().insert(twin_id, cap);
        }

        pub fn set_contracts(&self, twin_id: u32, has_contracts: bool, has_rent: bool) {
            self.contracts
                .lock()
                .unwrap()
                .insert(twin_id, (has_contracts, has_rent));
        }
    }

    #[async_trait]
    impl NodeRpc for MockNodeRpc {
        async fn stats(&self, twin_id: u32) -> anyhow::Result<Capacity> {
            if self.unreachable.lock().unwrap().contains(&twin_id) {
                anyhow::bail!("node {twin_id} unreachable");
            }
            Ok(self
                .stats
                .lock()
                .unwrap()
                .get(&twin_id)
                .copied()
                .unwrap_or(Capacity::ZERO))
        }

        async fn active_contracts(&self, twin_id: u32) -> anyhow::Result<(bool, bool)> {
            Ok(self
                .contracts
                .lock()
                .unwrap()
                .get(&twin_id)
                .copied()
                .unwrap_or((false, false)))
        }

        async fn public_config(&self, twin_id: u32) -> anyhow::Result<Option<PublicConfig>> {
            Ok(self.public_config.lock().unwrap().get(&twin_id).cloned())
        }
    }
}
