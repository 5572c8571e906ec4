//! Admin RPC transport: a line-delimited JSON-RPC-shaped server over TCP.
//!
//! Each connection is framed with `LinesCodec`; each line is one JSON-RPC
//! request, answered with one JSON-RPC response line.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, error, info, warn};

use crate::chain::Chain;
use crate::node_rpc::NodeRpc;
use crate::rpc::auth::AuthGate;
use crate::rpc::errors::RpcError;
use crate::rpc::handlers::{self, NodeFilter};
use crate::state::State;

/// Shared handles the dispatcher needs to answer every request.
#[derive(Clone)]
pub struct RpcContext {
    pub state: Arc<State>,
    pub chain: Arc<dyn Chain>,
    pub rpc: Arc<dyn NodeRpc>,
    pub auth: AuthGate,
}

pub struct RpcServer {
    addr: SocketAddr,
    ctx: RpcContext,
}

impl RpcServer {
    pub fn new(addr: SocketAddr, ctx: RpcContext) -> Self {
        Self { addr, ctx }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "rpc server listening");

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "new rpc connection");
                    let ctx = self.ctx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, ctx).await {
                            warn!(%peer, error = %e, "rpc connection ended with error");
                        }
                    });
                }
                Err(e) => error!(error = %e, "failed to accept rpc connection"),
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, ctx: RpcContext) -> anyhow::Result<()> {
    let mut framed = Framed::new(stream, LinesCodec::new());

    while let Some(line) = framed.next().await {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = process_request(&line, &ctx).await;
        let out = serde_json::to_string(&response).unwrap_or_else(|_| "{}".to_string());
        framed.send(out).await?;
    }
    Ok(())
}

/// Process one request line, returning the JSON-RPC response envelope.
/// Exposed for tests and for in-process embedding without a socket.
pub async fn process_request(line: &str, ctx: &RpcContext) -> Value {
    let request: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => return RpcError::parse_error(format!("invalid JSON: {e}")).to_json(None),
    };

    let method = request.get("method").and_then(Value::as_str).unwrap_or("");
    let params = request.get("params").cloned().unwrap_or(json!({}));
    let id = request.get("id").cloned();
    let caller_twin_id = request.get("caller_twin_id").and_then(Value::as_u64).unwrap_or(0) as u32;

    match call_method(ctx, method, caller_twin_id, params).await {
        Ok(result) => json!({ "jsonrpc": "2.0", "result": result, "id": id }),
        Err(e) => e.to_json(id),
    }
}

async fn call_method(
    ctx: &RpcContext,
    method: &str,
    caller_twin_id: u32,
    params: Value,
) -> Result<Value, RpcError> {
    match method {
        "version" => {
            ctx.auth.authorize(caller_twin_id)?;
            Ok(handlers::version())
        }
        "report" => {
            ctx.auth.authorize(caller_twin_id)?;
            Ok(handlers::report(&ctx.state).await)
        }
        "findnode" => {
            ctx.auth.authorize(caller_twin_id)?;
            let filter: NodeFilter = serde_json::from_value(params)
                .map_err(|e| RpcError::invalid_params(e.to_string()))?;
            Ok(handlers::findnode(&ctx.state, filter).await?)
        }
        "includenode" => {
            ctx.auth.authorize(caller_twin_id)?;
            let node_id = parse_node_id(&params)?;
            Ok(handlers::includenode(&ctx.state, ctx.chain.as_ref(), ctx.rpc.as_ref(), node_id).await?)
        }
        "poweron" => {
            ctx.auth.authorize(caller_twin_id)?;
            let node_id = parse_node_id(&params)?;
            Ok(handlers::poweron(&ctx.state, ctx.chain.as_ref(), node_id).await?)
        }
        "poweroff" => {
            ctx.auth.authorize(caller_twin_id)?;
            let node_id = parse_node_id(&params)?;
            Ok(handlers::poweroff(&ctx.state, ctx.chain.as_ref(), node_id).await?)
        }
        _ => Err(RpcError::method_not_found(method)),
    }
}

fn parse_node_id(params: &Value) -> Result<u32, RpcError> {
    params
        .get("node_id")
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .ok_or_else(|| RpcError::invalid_params("missing or invalid node_id"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockChain;
    use crate::config::FarmConfig;
    use crate::node_rpc::mock::MockNodeRpc;

    fn ctx(farmer_twin_id: u32) -> RpcContext {
        let config = FarmConfig {
            farm_id: 1,
            included_nodes: vec![],
            excluded_nodes: vec![],
            priority_nodes: vec![],
            never_shut_down_nodes: vec![],
            continue_on_powering_on_err: false,
            power: Default::default(),
        };
        RpcContext {
            state: Arc::new(State::new(config, farmer_twin_id)),
            chain: Arc::new(MockChain::new(vec![])),
            rpc: Arc::new(MockNodeRpc::default()),
            auth: AuthGate::new(farmer_twin_id),
        }
    }

    #[tokio::test]
    async fn authorized_caller_gets_version_string() {
        let ctx = ctx(1);
        let req = r#"{"method":"version","caller_twin_id":1,"id":1}"#;
        let resp = process_request(req, &ctx).await;
        assert!(resp["result"]["version"].is_string());
    }

    #[tokio::test]
    async fn mismatched_caller_is_unauthorized() {
        let ctx = ctx(5);
        let req = r#"{"method":"report","caller_twin_id":1,"id":1}"#;
        let resp = process_request(req, &ctx).await;
        assert_eq!(resp["error"]["code"], -32000);
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let ctx = ctx(1);
        let req = r#"{"method":"bogus","caller_twin_id":1,"id":1}"#;
        let resp = process_request(req, &ctx).await;
        assert_eq!(resp["error"]["code"], -32601);
    }
}
