//! Authentication boundary.
//!
//! Session handling lives in an upstream proxy; by the time a request
//! reaches this service, the caller's identity has been reduced to two
//! trusted headers. The storage core trusts this boundary completely.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::Json;
use geochart_layout::Namespace;

/// Header naming the authenticated caller's namespace (their UUID).
pub const USER_HEADER: &str = "x-user-uuid";

/// Header flagging the caller as an administrator.
pub const ADMIN_HEADER: &str = "x-admin";

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// The caller's own namespace
    pub namespace: Namespace,
    pub is_admin: bool,
}

impl AuthContext {
    /// Returns whether the caller may write into `target`.
    ///
    /// Users own exactly their namespace; admins may write anywhere.
    pub fn may_write(&self, target: &Namespace) -> bool {
        self.is_admin || &self.namespace == target
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<crate::error::ErrorBody>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| unauthorized("Missing user identity"))?;
        let namespace =
            Namespace::parse(raw).map_err(|_| unauthorized("Invalid user identity"))?;
        let is_admin = parts
            .headers
            .get(ADMIN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v == "true")
            .unwrap_or(false);
        Ok(Self {
            namespace,
            is_admin,
        })
    }
}

fn unauthorized(message: &str) -> (StatusCode, Json<crate::error::ErrorBody>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(crate::error::ErrorBody {
            error: message.to_owned(),
        }),
    )
}
