//! Participant token middleware.
//!
//! Extracts the Bearer token from the Authorization header, verifies it with
//! the `TokenSigner` and injects the resulting `ParticipantClaims` into the
//! request extensions. Handlers still check that the claims belong to the
//! session in the path.

use crate::auth::{ParticipantClaims, TokenSigner};
use crate::errors::RvError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    pub signer: Arc<TokenSigner>,
}

fn extract_bearer_token(req: &Request) -> Result<&str, RvError> {
    let auth_header = req
        .headers()
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "rv.middleware.auth", "Missing Authorization header");
            RvError::InvalidToken("Missing Authorization header".to_string())
        })?;

    auth_header.strip_prefix("Bearer ").ok_or_else(|| {
        tracing::debug!(target: "rv.middleware.auth", "Invalid Authorization header format");
        RvError::InvalidToken("Invalid Authorization header format".to_string())
    })
}

/// Verify a participant token from a header or query parameter.
pub fn verify_participant(signer: &TokenSigner, token: &str) -> Result<ParticipantClaims, RvError> {
    signer.verify_participant_token(token).map_err(|e| {
        tracing::debug!(target: "rv.middleware.auth", error = %e, "Participant token rejected");
        RvError::from(e)
    })
}

/// Authentication middleware for participant routes.
///
/// - Returns 401 Unauthorized if the token is missing or invalid
/// - Continues with `ParticipantClaims` in extensions otherwise
#[instrument(skip_all, name = "rv.middleware.auth")]
pub async fn require_participant(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, RvError> {
    let token = extract_bearer_token(&req)?;
    let claims = verify_participant(&state.signer, token)?;

    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware,
        routing::get,
        Extension, Router,
    };
    use common::types::{ParticipantId, SessionId};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn signer() -> Arc<TokenSigner> {
        Arc::new(TokenSigner::new(vec![9; 32]).unwrap())
    }

    async fn whoami(Extension(claims): Extension<ParticipantClaims>) -> String {
        claims.participant_id.to_string()
    }

    fn test_app(signer: Arc<TokenSigner>) -> Router {
        Router::new().route("/whoami", get(whoami)).route_layer(
            middleware::from_fn_with_state(Arc::new(AuthState { signer }), require_participant),
        )
    }

    async fn call(app: Router, auth: Option<&str>) -> (StatusCode, String) {
        let mut builder = HttpRequest::builder().uri("/whoami");
        if let Some(value) = auth {
            builder = builder.header("authorization", value);
        }
        let response = app
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_valid_token_injects_claims() {
        let signer = signer();
        let participant_id = ParticipantId::new();
        let token = signer
            .issue_participant_token(SessionId::new(), participant_id)
            .unwrap();

        let (status, body) = call(test_app(signer), Some(&format!("Bearer {token}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, participant_id.to_string());
    }

    #[tokio::test]
    async fn test_missing_or_malformed_header() {
        let (status, body) = call(test_app(signer()), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("Missing Authorization header"));

        let (status, _) = call(test_app(signer()), Some("Token abc")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_token_from_other_secret_rejected() {
        let other = Arc::new(TokenSigner::new(vec![1; 32]).unwrap());
        let token = other
            .issue_participant_token(SessionId::new(), ParticipantId::new())
            .unwrap();

        let (status, body) = call(test_app(signer()), Some(&format!("Bearer {token}"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body.contains("INVALID_TOKEN"));
    }
}
