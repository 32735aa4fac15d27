//! Request extractors for the caller's identity.
//!
//! The outer authentication layer forwards the verified user id in the
//! [`USER_ID_HEADER`] header.

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::error::ApiError;
use crate::conversation::UserId;
use crate::relay::OwnerIdentity;

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

fn header_value(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
}

impl<S> FromRequestParts<S> for OwnerIdentity
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let identity = Self::from_raw(header_value(parts));
        if !identity.is_authenticated() {
            tracing::warn!("user not authenticated, using anonymous owner");
        }
        Ok(identity)
    }
}

/// A caller that must be authenticated.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AuthenticatedUser(pub UserId);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(raw) = header_value(parts) else {
            tracing::warn!("user id missing from request");
            return Err(ApiError::unauthorized());
        };
        raw.parse::<UserId>().map(Self).map_err(|_| {
            tracing::warn!(user_id = raw, "invalid user id");
            ApiError::bad_request("Invalid user ID")
        })
    }
}
