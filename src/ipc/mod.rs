use anyhow::Result;
use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::coordinator::Task;
use crate::supervisor::error::SupervisorError;
use crate::supervisor::roster::web_guest_name;
use crate::supervisor::Supervisor;

const DEFAULT_CONSOLE_LIMIT: usize = 100;

/// IPC 요청 타입
#[derive(Debug, Clone, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskRequest {
    /// Uploaded archive for `restore`
    #[serde(default)]
    pub archive: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsoleQuery {
    pub limit: Option<usize>,
    /// Return only lines with id greater than this
    pub since: Option<u64>,
}

/// IPC Server State
#[derive(Clone)]
pub struct IPCServer {
    pub supervisor: Arc<Supervisor>,
    pub listen_addr: String,
}

impl IPCServer {
    pub fn new(supervisor: Arc<Supervisor>, listen_addr: &str) -> Self {
        Self {
            supervisor,
            listen_addr: listen_addr.to_string(),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/status", get(get_status))
            .route("/api/chat", get(get_chat).post(post_chat))
            .route("/api/players", get(get_players))
            .route("/api/console", get(get_console))
            .route("/api/command", post(post_command))
            .route("/api/task/:name", post(post_task))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
            .with_state(self.clone())
    }

    /// Serve until `shutdown` is cancelled.
    pub async fn start(self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!("IPC HTTP server starting on {}", self.listen_addr);
        let router = self.router();

        // TCP 리스너
        let listener = tokio::net::TcpListener::bind(&self.listen_addr).await?;
        tracing::info!("IPC listening on http://{}", self.listen_addr);

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
        Ok(())
    }
}

/// GET /api/status - 프로세스 상태와 진행 중인 작업
async fn get_status(State(state): State<IPCServer>) -> impl IntoResponse {
    Json(state.supervisor.status())
}

/// GET /api/chat?limit= - 채팅 로그 스냅샷 (오래된 순)
async fn get_chat(
    State(state): State<IPCServer>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let sup = &state.supervisor;
    let limit = query.limit.unwrap_or(sup.config.console.chat_snapshot);
    Json(json!({ "messages": sup.chat_snapshot(limit) }))
}

/// POST /api/chat - 웹 게스트 채팅 중계
async fn post_chat(
    State(state): State<IPCServer>,
    peer: Option<ConnectInfo<SocketAddr>>,
    Json(req): Json<ChatRequest>,
) -> Result<impl IntoResponse, SupervisorError> {
    let sup = &state.supervisor;
    let guest = guest_name(&sup.config.roster.guest_prefix, peer.map(|ConnectInfo(addr)| addr));

    let relayed = sup.send_web_chat(&guest, &req.message)?;
    Ok(Json(json!({ "success": true, "relayed": relayed, "guest": guest })))
}

/// Web visitors are always named from their address, never by the client.
fn guest_name(prefix: &str, peer: Option<SocketAddr>) -> String {
    match peer {
        Some(addr) => web_guest_name(prefix, addr.ip()),
        None => format!("{}00", prefix),
    }
}

/// GET /api/players - 접속 중인 플레이어 (정렬됨)
async fn get_players(State(state): State<IPCServer>) -> impl IntoResponse {
    Json(json!({ "players": state.supervisor.players() }))
}

/// GET /api/console?limit=&since= - 원시 출력 로그
async fn get_console(
    State(state): State<IPCServer>,
    Query(query): Query<ConsoleQuery>,
) -> impl IntoResponse {
    let sup = &state.supervisor;
    let lines = match query.since {
        Some(since) => sup.raw_log_since(since),
        None => sup.raw_log_snapshot(query.limit.unwrap_or(DEFAULT_CONSOLE_LIMIT)),
    };
    Json(json!({ "lines": lines }))
}

/// POST /api/command - 서버 stdin에 명령 전달
async fn post_command(
    State(state): State<IPCServer>,
    Json(req): Json<CommandRequest>,
) -> Result<impl IntoResponse, SupervisorError> {
    if !state.supervisor.send_command(&req.command) {
        return Err(SupervisorError::ProcessUnavailable);
    }
    tracing::info!("Operator command: {}", req.command);
    Ok(Json(json!({ "success": true })))
}

/// POST /api/task/:name - 유지보수 작업 시작 (단일 실행)
async fn post_task(
    Path(name): Path<String>,
    State(state): State<IPCServer>,
    body: Option<Json<TaskRequest>>,
) -> Result<impl IntoResponse, SupervisorError> {
    let archive = body.and_then(|Json(req)| req.archive);
    let task = Task::from_name(&name, archive)?;
    let task_name = task.name();
    state.supervisor.trigger_task(task)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "success": true, "task": task_name })),
    ))
}
