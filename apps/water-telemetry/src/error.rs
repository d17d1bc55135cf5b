use crate::dispatch::DispatchError;
use crate::query::QueryError;
use crate::store::StoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::fmt::Display;

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn internal(err: impl Display) -> Self {
        tracing::error!(error = %err, "internal error");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "Internal server error",
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "error": self.code, "message": self.message })),
        )
            .into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "storage error");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage_error",
            "Storage error",
        )
    }
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        let code = match err {
            QueryError::Store(store) => return store.into(),
            QueryError::MissingParameter(_) => "missing_parameter",
            QueryError::InvalidTime { .. } => "invalid_time",
            QueryError::InvertedWindow { .. } => "inverted_window",
            QueryError::UnknownChannel(_) => "unknown_channel",
        };
        Self::bad_request(code, err.to_string())
    }
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::EmptyOpcode => Self::bad_request("empty_opcode", err.to_string()),
            DispatchError::LinkDown(_) => {
                tracing::warn!(error = %err, "command refused; link down");
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "link_down", err.to_string())
            }
            DispatchError::Write(_) => {
                tracing::error!(error = %err, "command write failed");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "link_write_failed",
                    err.to_string(),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::UnknownChannel;
    use crate::link::LinkError;
    use std::io;

    #[test]
    fn validation_errors_are_bad_requests() {
        let cases = [
            (QueryError::MissingParameter("from"), "missing_parameter"),
            (
                QueryError::InvalidTime {
                    param: "to",
                    value: "yesterday".to_string(),
                },
                "invalid_time",
            ),
            (
                QueryError::InvertedWindow {
                    from: "2026-07-02 00:00".to_string(),
                    to: "2026-07-01 00:00".to_string(),
                },
                "inverted_window",
            ),
            (
                QueryError::UnknownChannel(UnknownChannel("TankZ".to_string())),
                "unknown_channel",
            ),
        ];
        for (err, code) in cases {
            let app: AppError = err.into();
            assert_eq!(app.status, StatusCode::BAD_REQUEST);
            assert_eq!(app.code, code);
        }
    }

    #[test]
    fn storage_errors_hide_details() {
        let app: AppError = QueryError::Store(StoreError::Poisoned).into();
        assert_eq!(app.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(app.code, "storage_error");
        assert_eq!(app.message, "Storage error");
    }

    #[test]
    fn dispatch_errors_map_to_link_codes() {
        let app: AppError = DispatchError::EmptyOpcode.into();
        assert_eq!((app.status, app.code), (StatusCode::BAD_REQUEST, "empty_opcode"));

        let app: AppError = DispatchError::LinkDown("device link closed".to_string()).into();
        assert_eq!((app.status, app.code), (StatusCode::SERVICE_UNAVAILABLE, "link_down"));

        let write = LinkError::Write(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));
        let app: AppError = DispatchError::Write(write).into();
        assert_eq!(
            (app.status, app.code),
            (StatusCode::INTERNAL_SERVER_ERROR, "link_write_failed")
        );
    }
}
