use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use webcraft_core::config::GlobalConfig;
use webcraft_core::ipc::IPCServer;
use webcraft_core::scheduler;
use webcraft_core::supervisor::{monitor, Supervisor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    tracing::info!("Webcraft daemon starting");

    let config = GlobalConfig::load()?;
    let listen = config.ipc.listen.clone();
    let supervisor = Arc::new(Supervisor::new(config));

    // 서버 시작 실패는 데몬을 멈추지 않음 (IPC로 재시도 가능)
    match supervisor.start() {
        Ok(true) => {}
        Ok(false) => tracing::info!("Server already running"),
        Err(e) => tracing::error!("Failed to start server: {}", e),
    }

    let shutdown = CancellationToken::new();

    // 백그라운드 루프: 종료 감지, 주간 백업, 플레이어 목록
    tokio::spawn(monitor::run_exit_monitor(supervisor.clone(), shutdown.clone()));
    if supervisor.config.schedule.enabled {
        let sup = supervisor.clone();
        let token = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = scheduler::run(sup, token).await {
                tracing::error!("Scheduler disabled: {}", e);
            }
        });
    }
    tokio::spawn(monitor::run_roster_poll(supervisor.clone(), shutdown.clone()));

    // Graceful shutdown: Ctrl+C 시 정리
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received, cleaning up...");
        signal_token.cancel();
    });

    let ipc_server = IPCServer::new(supervisor.clone(), &listen);
    if let Err(e) = ipc_server.start(shutdown.clone()).await {
        tracing::error!("IPC server error: {}", e);
        shutdown.cancel();
    }

    supervisor.shutdown().await;
    tracing::info!("Webcraft daemon shutting down");
    Ok(())
}
