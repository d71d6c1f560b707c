use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

pub type Result<T> = std::result::Result<T, ServiceError>;

const AUTH_CHALLENGE: &str = "Basic realm=\"Login Required\"";

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("authentication failed")]
    Auth,

    #[error("view {0} not found")]
    ViewNotFound(String),

    #[error("missing parameters: {0:?}")]
    MissingParameters(Vec<String>),

    #[error("parameter '{0}' is not a date in the format yyyy-mm-dd hh:mm:ss")]
    InvalidParameterFormat(String),

    #[error("database unavailable: {0}")]
    DatabaseUnavailable(String),

    #[error("too many queries in flight")]
    Busy,

    #[error("query failed")]
    QueryFailed(#[source] tokio_postgres::Error),

    #[error("query exceeded its deadline")]
    Timeout,

    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Auth => StatusCode::UNAUTHORIZED,
            ServiceError::ViewNotFound(_)
            | ServiceError::MissingParameters(_)
            | ServiceError::InvalidParameterFormat(_) => StatusCode::BAD_REQUEST,
            ServiceError::Busy => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ServiceError::DatabaseUnavailable(_)
            | ServiceError::QueryFailed(_)
            | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Plain-text body sent to the caller.
    pub fn body(&self) -> String {
        match self {
            ServiceError::Auth => "Could not verify your access level for that URL.\n\
                 You have to login with proper credentials"
                .to_string(),
            ServiceError::ViewNotFound(name) => format!("View {name} not found.\n"),
            ServiceError::MissingParameters(names) => {
                format!("Missing parameters.\n{}", render_name_list(names))
            }
            ServiceError::InvalidParameterFormat(_) => {
                "Parameters must be a date in the format yyyy-mm-dd hh:mm:ss.\n".to_string()
            }
            ServiceError::DatabaseUnavailable(_) => "Database error.\n".to_string(),
            ServiceError::Busy => "Server busy.\n".to_string(),
            ServiceError::QueryFailed(_) => "Query failed.\n".to_string(),
            ServiceError::Timeout => "Query timed out.\n".to_string(),
            ServiceError::Internal(_) => "Internal error.\n".to_string(),
        }
    }
}

/// `['start', 'end']`, the list shape existing clients parse.
fn render_name_list(names: &[String]) -> String {
    let quoted: Vec<String> = names.iter().map(|name| format!("'{name}'")).collect();
    format!("[{}]", quoted.join(", "))
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            error!(error = %self, source = ?std::error::Error::source(&self), "request failed");
        }

        let mut response = (status, self.body()).into_response();
        if matches!(self, ServiceError::Auth) {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(AUTH_CHALLENGE),
            );
        }
        response
    }
}
