//! Grid-proxy adapter: a read-only client used only to drive the urgent
//! wake-up check (how long since the proxy last saw this node advertise
//! itself).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct ProxyNode {
    pub last_updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait Proxy: Send + Sync {
    async fn node(&self, id: u32) -> anyhow::Result<ProxyNode>;
}

#[cfg(any(test, feature = "testing"))]
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockProxy {
        pub nodes: Mutex<HashMap<u32, ProxyNode>>,
    }

    impl MockProxy {
        pub fn set_last_updated(&self, id: u32, when: DateTime<Utc>) {
            self.nodes
                .lock()
                .unwrap()
                .insert(id, ProxyNode { last_updated_at: when });
        }
    }

    #[async_trait]
    impl Proxy for MockProxy {
        async fn node(&self, id: u32) -> anyhow::Result<ProxyNode> {
            self.nodes
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("proxy has no record for node {id}"))
        }
    }
}
