use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use sha2::{Digest, Sha256};
use tracing::warn;

use targetwatch_common::TargetWatchError;

use crate::error::ApiError;
use crate::AppState;

/// Caller presented the scan secret, or came from the app's own origin.
pub struct ScanCaller;

/// Caller presented the scan secret. Origin alone is not enough.
pub struct SecretCaller;

impl FromRequestParts<Arc<AppState>> for ScanCaller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if has_secret(&parts.headers, &state.scan_secret)
            || same_origin(&parts.headers, state.public_origin.as_deref())
        {
            return Ok(ScanCaller);
        }
        warn!(path = %parts.uri.path(), "Rejected unauthenticated request");
        Err(TargetWatchError::Unauthorized.into())
    }
}

impl FromRequestParts<Arc<AppState>> for SecretCaller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if has_secret(&parts.headers, &state.scan_secret) {
            return Ok(SecretCaller);
        }
        warn!(path = %parts.uri.path(), "Rejected request without scan secret");
        Err(TargetWatchError::Unauthorized.into())
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

fn has_secret(headers: &HeaderMap, secret: &str) -> bool {
    !secret.is_empty() && bearer_token(headers).is_some_and(|t| constant_time_eq(t, secret))
}

fn same_origin(headers: &HeaderMap, public_origin: Option<&str>) -> bool {
    let Some(expected) = public_origin else {
        return false;
    };
    headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|origin| origin.trim_end_matches('/') == expected.trim_end_matches('/'))
}

/// Compare secrets without leaking where they differ. Hashing first makes the
/// comparison length-independent.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = Sha256::digest(a.as_bytes());
    let b = Sha256::digest(b.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
