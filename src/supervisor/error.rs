//! Supervisor 전용 에러 타입, 에러 종류를 구분하여 IPC 핸들러에서
//! 적절한 HTTP 상태 코드를 반환할 수 있게 합니다.

use axum::http::StatusCode;

/// Errors surfaced by the supervisor, the task coordinator and config loading
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    #[error("Server is not running")]
    ProcessUnavailable,

    #[error("Task '{0}' is already running")]
    TaskAlreadyRunning(String),

    #[error("Unknown task '{0}'")]
    UnknownTask(String),

    #[error("Archive tool failed: {0}")]
    ArchiveToolFailure(String),

    #[error("Network failure: {0}")]
    NetworkFailure(String),

    /// Not a failure for backups: the task logs it and skips archiving.
    #[error("Missing data at '{0}'")]
    MissingData(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl SupervisorError {
    /// HTTP 상태 코드 매핑
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ProcessUnavailable | Self::TaskAlreadyRunning(_) => StatusCode::CONFLICT,
            Self::UnknownTask(_) | Self::MissingData(_) => StatusCode::NOT_FOUND,
            Self::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            Self::NetworkFailure(_) => StatusCode::BAD_GATEWAY,
            Self::ArchiveToolFailure(_) | Self::Io(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// JSON 에러 응답 생성
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "error_code": self.error_code(),
        })
    }

    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ProcessUnavailable => "NOT_RUNNING",
            Self::TaskAlreadyRunning(_) => "TASK_RUNNING",
            Self::UnknownTask(_) => "UNKNOWN_TASK",
            Self::ArchiveToolFailure(_) => "ARCHIVE_FAILURE",
            Self::NetworkFailure(_) => "NETWORK_FAILURE",
            Self::MissingData(_) => "MISSING_DATA",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Io(_) => "IO_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// axum 핸들러에서 SupervisorError를 직접 반환할 수 있도록 IntoResponse 구현
impl axum::response::IntoResponse for SupervisorError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = axum::Json(self.to_json());
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections_map_to_conflict() {
        assert_eq!(SupervisorError::ProcessUnavailable.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            SupervisorError::TaskAlreadyRunning("backup".into()).status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_json_body() {
        let body = SupervisorError::TaskAlreadyRunning("restore".into()).to_json();
        assert_eq!(body["success"], false);
        assert_eq!(body["error_code"], "TASK_RUNNING");
        assert!(body["error"].as_str().unwrap().contains("restore"));
    }
}
