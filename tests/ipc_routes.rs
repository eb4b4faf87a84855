//! IPC 라우터 테스트: Axum 라우터를 직접 호출 (소켓 없이)

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use webcraft_core::config::GlobalConfig;
use webcraft_core::ipc::IPCServer;
use webcraft_core::supervisor::console::LogSource;
use webcraft_core::supervisor::Supervisor;

fn app() -> (Arc<Supervisor>, Router) {
    let sup = Arc::new(Supervisor::new(GlobalConfig::default()));
    let router = IPCServer::new(sup.clone(), "127.0.0.1:0").router();
    (sup, router)
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let req = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), 1024 * 64).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

#[tokio::test]
async fn test_status_when_stopped() {
    let (_sup, app) = app();
    let (status, json) = call(&app, "GET", "/api/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["running"], false);
    assert!(json["pid"].is_null());
    assert!(json["current_task"].is_null());
}

#[tokio::test]
async fn test_chat_and_players_snapshots() {
    let (sup, app) = app();
    sup.ingest_line(LogSource::Stdout, "[12:00:00] [Server thread/INFO]: Steve joined the game".into());
    sup.ingest_line(LogSource::Stdout, "[12:00:01] [Server thread/INFO]: <Steve> hello".into());

    let (status, json) = call(&app, "GET", "/api/chat?limit=1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["messages"], serde_json::json!(["<Steve> hello"]));

    let (_, json) = call(&app, "GET", "/api/players", None).await;
    assert_eq!(json["players"], serde_json::json!(["Steve"]));
}

#[tokio::test]
async fn test_console_since_polling() {
    let (sup, app) = app();
    for i in 0..3 {
        sup.ingest_line(LogSource::Stdout, format!("line {}", i));
    }
    let (_, json) = call(&app, "GET", "/api/console?since=2", None).await;
    let lines = json["lines"].as_array().unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["content"], "line 2");
    assert_eq!(lines[0]["source"], "stdout");

    let (_, json) = call(&app, "GET", "/api/console?limit=2", None).await;
    assert_eq!(json["lines"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_command_rejected_when_not_running() {
    let (_sup, app) = app();
    let body = serde_json::json!({ "command": "say hi" });
    let (status, json) = call(&app, "POST", "/api/command", Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["success"], false);
    assert_eq!(json["error_code"], "NOT_RUNNING");
}

#[tokio::test]
async fn test_web_chat_blank_ignored_and_offline_rejected() {
    let (_sup, app) = app();
    let blank = serde_json::json!({ "message": "   " });
    let (status, json) = call(&app, "POST", "/api/chat", Some(blank)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["relayed"], false);

    let msg = serde_json::json!({ "message": "hello" });
    let (status, json) = call(&app, "POST", "/api/chat", Some(msg)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error_code"], "NOT_RUNNING");
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_web_chat_ignores_client_chosen_name() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = GlobalConfig::default();
    cfg.server.dir = tmp.path().to_path_buf();
    cfg.server.command = Some(vec!["sh".into(), "-c".into(), "cat > /dev/null".into()]);
    let sup = Arc::new(Supervisor::new(cfg));
    let app = IPCServer::new(sup.clone(), "127.0.0.1:0").router();
    assert!(sup.start().unwrap());

    let body = serde_json::json!({ "guest": "Steve", "message": "hi all" });
    let (status, json) = call(&app, "POST", "/api/chat", Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["relayed"], true);
    assert_eq!(json["guest"], "WebGuest00");
    assert_eq!(sup.players(), vec!["WebGuest00"]);
    assert_eq!(sup.chat_snapshot(10), vec!["<WebGuest00> hi all"]);
    sup.force_kill();
}

#[tokio::test]
async fn test_task_route_errors() {
    let (sup, app) = app();

    let (status, json) = call(&app, "POST", "/api/task/format-disk", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error_code"], "UNKNOWN_TASK");

    let (status, _) = call(&app, "POST", "/api/task/restore", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let missing = serde_json::json!({ "archive": "/nonexistent/upload.zip" });
    let (status, json) = call(&app, "POST", "/api/task/restore", Some(missing)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error_code"], "MISSING_DATA");

    assert!(sup.tasks.acquire("backup"));
    let (status, json) = call(&app, "POST", "/api/task/restart", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error_code"], "TASK_RUNNING");
    assert_eq!(sup.tasks.current().unwrap().name, "backup");
}
