use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use farmerbot::cli::Cli;
use farmerbot::config::MIN_BALANCE_TO_RUN;
use farmerbot::memory_backend::{InMemoryChain, InMemoryNodeRpc, InMemoryProxy};
use farmerbot::reconciler::{self, CancelToken};
use farmerbot::rpc::{RpcContext, RpcServer};
use farmerbot::rpc::auth::AuthGate;
use farmerbot::state::State;
use farmerbot::FarmerbotError;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    cli.init_logging();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "farmerbot exited with a fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> farmerbot::Result<()> {
    let config = cli.load_config()?;
    let mnemonic = cli.load_mnemonic()?;
    let _ = mnemonic; // consumed by the real chain client's identity handshake

    let chain: Arc<dyn farmerbot::chain::Chain> =
        Arc::new(InMemoryChain::new(vec![], Default::default(), 1_000_000_000));
    let node_rpc: Arc<dyn farmerbot::node_rpc::NodeRpc> = Arc::new(InMemoryNodeRpc::default());
    let proxy: Arc<dyn farmerbot::proxy::Proxy> = Arc::new(InMemoryProxy);

    let farmer_twin_id = chain
        .get_twin_by_pubkey(&cli.network)
        .await
        .map_err(|e| FarmerbotError::Fatal(format!("failed to resolve farmer twin id: {e}")))?;

    let raw_balance = chain
        .get_balance(farmer_twin_id)
        .await
        .map_err(|e| FarmerbotError::Fatal(format!("chain handshake failed: {e}")))?;
    let balance = raw_balance as f64 / 10_000_000.0;
    if balance < MIN_BALANCE_TO_RUN {
        return Err(FarmerbotError::Fatal(format!(
            "account contains {balance} tft, you need at least {MIN_BALANCE_TO_RUN} tft"
        )));
    }
    if balance < farmerbot::config::RECOMMENDED_BALANCE_TO_RUN {
        warn!(balance, "balance is below the recommended level to run farmerbot");
    }

    let farm_nodes = chain
        .list_nodes(config.farm_id)
        .await
        .map_err(|e| FarmerbotError::Fatal(format!("failed to list farm nodes: {e}")))?;
    config.validate(&farm_nodes)?;

    let state = Arc::new(State::new(config, farmer_twin_id));
    let cancel = CancelToken::new();

    let reconciler_handle = tokio::spawn(reconciler::run(
        state.clone(),
        chain.clone(),
        node_rpc.clone(),
        proxy.clone(),
        cancel.clone(),
    ));

    let rpc_ctx = RpcContext {
        state: state.clone(),
        chain: chain.clone(),
        rpc: node_rpc.clone(),
        auth: AuthGate::new(farmer_twin_id),
    };
    let rpc_server = RpcServer::new(cli.rpc_addr, rpc_ctx);
    let rpc_handle = tokio::spawn(rpc_server.run());

    info!("farmerbot running, awaiting shutdown signal");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        result = rpc_handle => {
            if let Ok(Err(e)) = result {
                error!(error = %e, "rpc server exited unexpectedly");
            }
        }
    }

    cancel.cancel();
    let _ = reconciler_handle.await;
    info!("farmerbot shut down cleanly");
    Ok(())
}
