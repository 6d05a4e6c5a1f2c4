//! Login flow errors and their browser-facing responses
//!
//! Every variant carries enough detail for the server log. The response body
//! never does: browsers only ever see one of a few fixed messages, so provider
//! text and "unknown" vs "already used" state distinctions cannot leak.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use provider::ProviderError;
use thiserror::Error;
use tracing::{error, warn};

use crate::views;

/// Message shown for every server-side failure.
pub const GENERIC_FAILURE: &str = "Unable to complete login. Please try again.";

#[derive(Error, Debug)]
pub enum LoginError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("oauth state not found")]
    StateNotFound,

    #[error("state does not match a configured provider: {0}")]
    ProviderMismatch(String),

    #[error("state registration failed: {0}")]
    RegistrationFailed(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("invalid callback: {0}")]
    InvalidRequest(String),

    #[error("request has been tampered with")]
    TamperedRequest,

    #[error("datastore error: {0}")]
    Datastore(account_store::Error),

    #[error("session error: {0}")]
    Session(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<account_store::Error> for LoginError {
    fn from(err: account_store::Error) -> Self {
        match err {
            account_store::Error::StateNotFound => LoginError::StateNotFound,
            other => LoginError::Datastore(other),
        }
    }
}

impl LoginError {
    /// Short label for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            LoginError::UnknownProvider(_) => "unknown_provider",
            LoginError::StateNotFound => "state_not_found",
            LoginError::ProviderMismatch(_) => "provider_mismatch",
            LoginError::RegistrationFailed(_) => "registration_failed",
            LoginError::Provider(e) => e.kind(),
            LoginError::InvalidRequest(_) => "invalid_request",
            LoginError::TamperedRequest => "tampered_request",
            LoginError::Datastore(_) => "datastore",
            LoginError::Session(_) => "session",
            LoginError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            LoginError::UnknownProvider(_) => StatusCode::NOT_FOUND,
            LoginError::TamperedRequest | LoginError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> &'static str {
        match self {
            LoginError::UnknownProvider(_) => "Unknown login provider.",
            LoginError::TamperedRequest => "Request has been tampered with.",
            _ => GENERIC_FAILURE,
        }
    }
}

impl IntoResponse for LoginError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, kind = self.kind(), "oauth login failed");
        } else {
            warn!(error = %self, kind = self.kind(), "oauth login rejected");
        }
        (status, views::error_page(status, self.public_message())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn store_state_error_maps_to_state_not_found() {
        let err: LoginError = account_store::Error::StateNotFound.into();
        assert!(matches!(err, LoginError::StateNotFound));

        let err: LoginError = account_store::Error::UserNotFound(3).into();
        assert!(matches!(err, LoginError::Datastore(_)));
    }

    #[test]
    fn statuses_follow_taxonomy() {
        assert_eq!(LoginError::TamperedRequest.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            LoginError::UnknownProvider("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            LoginError::StateNotFound.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            LoginError::Provider(ProviderError::ResponseTooLarge { limit: 1 }).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn provider_detail_never_reaches_the_body() {
        let err = LoginError::Provider(ProviderError::Provider(
            "token endpoint returned 500: secret-internal-detail".into(),
        ));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_text(response).await;
        assert!(!body.contains("secret-internal-detail"), "got: {body}");
        assert!(body.contains(GENERIC_FAILURE));
    }

    #[tokio::test]
    async fn state_failures_share_one_message() {
        let not_found = body_text(LoginError::StateNotFound.into_response()).await;
        let mismatch = body_text(LoginError::ProviderMismatch("acme".into()).into_response()).await;
        assert_eq!(not_found, mismatch);
    }
}
