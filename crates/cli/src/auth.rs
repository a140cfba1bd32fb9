//! Bearer credential check for the pipeline endpoints.
//!
//! Requests must carry `Authorization: Bearer <token>`. The verified
//! [`Identity`] is inserted into the request extensions; handlers do not
//! use it yet.

use crate::error::ApiError;
use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Caller identity attached to an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub subject: String,
}

/// Decides whether a bearer token is acceptable.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Option<Identity>;
}

/// Accepts a fixed set of tokens.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashSet<String>,
}

impl StaticTokenVerifier {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tokens = tokens
            .into_iter()
            .map(Into::into)
            .map(|t: String| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        Self { tokens }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl CredentialVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Option<Identity> {
        self.tokens.contains(token).then(|| Identity {
            subject: "static-token".to_string(),
        })
    }
}

pub type SharedVerifier = Arc<dyn CredentialVerifier>;

fn bearer_token(request: &Request) -> Option<&str> {
    let value = request.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") {
        Some(token.trim())
    } else {
        None
    }
}

/// Middleware rejecting requests without a valid bearer token with 401.
pub async fn require_bearer(State(verifier): State<SharedVerifier>, mut request: Request, next: Next) -> Response {
    // owned so the request is not borrowed across the await
    let Some(token) = bearer_token(&request).map(str::to_owned) else {
        return ApiError::unauthorized("missing bearer token").into_response();
    };

    match verifier.verify(&token).await {
        Some(identity) => {
            debug!(subject = %identity.subject, path = %request.uri().path(), "authenticated");
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        None => ApiError::unauthorized("invalid bearer token").into_response(),
    }
}
