//! Gateway-style token authorizer.
//!
//! Turns a bearer token into an IAM policy document allowing or denying
//! `execute-api:Invoke` on the requested method ARN. Allowed callers carry
//! their tenant in the policy context.

use axum::{Json, body::Bytes, extract::State};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::{
    errors::AppError,
    services::auth::{AuthClient, tenant_id},
    state::AppState,
};

const POLICY_VERSION: &str = "2012-10-17";
const INVOKE_ACTION: &str = "execute-api:Invoke";
const PRINCIPAL: &str = "user";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    pub action: String,
    pub effect: Effect,
    pub resource: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<Statement>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyContext {
    pub tenant_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub principal_id: String,
    pub policy_document: PolicyDocument,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<PolicyContext>,
}

impl Policy {
    pub fn effect(&self) -> Option<Effect> {
        self.policy_document.statement.first().map(|s| s.effect)
    }
}

/// The request a gateway sends to a token authorizer.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizerEvent {
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub method_arn: String,
}

impl AuthorizerEvent {
    fn authorization(&self) -> &str {
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("authorization"))
            .map(|(_, value)| value.trim())
            .unwrap_or_default()
    }
}

/// Build a single-statement policy for `resource`.
pub fn generate_policy(
    principal_id: &str,
    effect: Effect,
    resource: &str,
    tenant_id: Option<String>,
) -> Policy {
    Policy {
        principal_id: principal_id.to_string(),
        policy_document: PolicyDocument {
            version: POLICY_VERSION.to_string(),
            statement: vec![Statement {
                action: INVOKE_ACTION.to_string(),
                effect,
                resource: resource.to_string(),
            }],
        },
        context: tenant_id.map(|tenant_id| PolicyContext { tenant_id }),
    }
}

/// Allow when the auth service accepts the token, deny otherwise.
pub async fn authorize(client: &AuthClient, event: &AuthorizerEvent) -> Policy {
    let token = event.authorization();
    if token.is_empty() {
        warn!("empty API key");
        return generate_policy(PRINCIPAL, Effect::Deny, &event.method_arn, None);
    }

    match client.validate_token(token).await {
        Ok(user) => {
            let tenant = tenant_id(&user);
            info!("validation successful, tenant {:?}", tenant);
            generate_policy(PRINCIPAL, Effect::Allow, &event.method_arn, tenant)
        }
        Err(err) => {
            warn!("validation failed: {}", err);
            generate_policy(PRINCIPAL, Effect::Deny, &event.method_arn, None)
        }
    }
}

/// `POST /authorize`
pub async fn authorize_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Policy>, AppError> {
    let event: AuthorizerEvent = serde_json::from_slice(&body)
        .map_err(|err| AppError::validation(format!("Invalid authorizer event: {}", err)))?;
    Ok(Json(authorize(&state.auth, &event).await))
}
