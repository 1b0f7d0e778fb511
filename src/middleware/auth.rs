//! Resolves the caller's tenant from the `Authorization` header.
//!
//! With auth enabled, a missing token is 401 and a token the auth service
//! rejects is 403. The resolved tenant (possibly none) is attached to the
//! request as a [`Tenant`] extension for the item handlers.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use crate::{
    errors::AppError,
    models::item::partition_prefix,
    services::{
        auth::{AuthError, tenant_id},
        backend::ensure_key_safe,
    },
    state::AppState,
};

/// The authenticated caller's partition. `None` means tenantless.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Tenant(pub Option<String>);

impl Tenant {
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

pub async fn resolve_tenant(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !state.auth_enabled {
        req.extensions_mut().insert(Tenant::default());
        return Ok(next.run(req).await);
    }

    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    if token.is_empty() {
        return Err(AppError::unauthorized("Missing Authorization header"));
    }

    let user = state.auth.validate_token(&token).await.map_err(|err| {
        warn!("validation failed: {}", err);
        match err {
            AuthError::Rejected(_) => AppError::forbidden(err.to_string()),
            AuthError::Transport(_) | AuthError::Decode(_) => {
                AppError::forbidden("Token validation failed")
            }
        }
    })?;

    let tenant = tenant_id(&user);
    if let Some(t) = tenant.as_deref() {
        if !usable_tenant(t) {
            warn!("tenant id {:?} cannot form a storage key", t);
            return Err(AppError::forbidden("Invalid tenant id"));
        }
    }
    debug!("resolved tenant {:?}", tenant);

    req.extensions_mut().insert(Tenant(tenant));
    Ok(next.run(req).await)
}

/// A tenant id must stay one path segment and yield a valid key prefix.
fn usable_tenant(tenant: &str) -> bool {
    !tenant.contains('/') && ensure_key_safe(&partition_prefix(Some(tenant))).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_ids_must_form_valid_prefixes() {
        for good in ["t1", "acme.corp", "tenant-42"] {
            assert!(usable_tenant(good), "{good}");
        }
        for bad in ["a/b", "acme..corp", "..", "bell\u{7}", "back\\slash"] {
            assert!(!usable_tenant(bad), "{bad:?}");
        }
    }
}
