//! Shared helpers: an in-memory app driven with `tower::ServiceExt::oneshot`,
//! and a stand-in auth service on an ephemeral port.

#![allow(dead_code)]

use axum::{
    Json, Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use http_body_util::BodyExt;
use item_store::{
    AppState, routes,
    services::{
        auth::{AuthClient, DEFAULT_AUTH_TIMEOUT},
        item_store::ItemStore,
        memory_backend::MemoryBackend,
    },
};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceExt;

pub struct TestApp {
    pub router: Router,
    pub store: ItemStore,
}

/// App over a fresh memory backend. `auth_url` of `None` disables token checks.
pub fn app(auth_url: Option<&str>) -> TestApp {
    let backend = Arc::new(MemoryBackend::new("test-bucket"));
    let store = ItemStore::new(backend);
    let auth = AuthClient::new(
        auth_url.unwrap_or("http://127.0.0.1:9/unused"),
        DEFAULT_AUTH_TIMEOUT,
    )
    .expect("auth client");
    let state = AppState::new(
        store.clone(),
        auth,
        auth_url.is_some(),
        vec!["name".into(), "description".into()],
    );
    TestApp {
        router: routes(state),
        store,
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

impl TestApp {
    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn send_raw(&self, method: &str, uri: &str, raw: &'static str) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::from(raw))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        TestResponse {
            status,
            headers,
            body: serde_json::from_slice(&bytes).unwrap_or(Value::Null),
        }
    }
}

/// Auth service accepting `t1-token` (tenant t1), `t2-token` (tenant t2) and
/// `plain-token` (no tenant). `dotted-token` and `bell-token` carry tenant ids
/// that cannot form a key; `garbled-token` answers 200 with a non-JSON body.
/// Returns the validation URL.
pub async fn spawn_auth_service() -> String {
    async fn validate(headers: HeaderMap) -> Response {
        let token = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        match token {
            Some("t1-token") => Json(json!({"sub": "alice", "tenantId": "t1"})).into_response(),
            Some("t2-token") => Json(json!({"sub": "bob", "tenantId": "t2"})).into_response(),
            Some("plain-token") => Json(json!({"sub": "carol"})).into_response(),
            Some("dotted-token") => {
                Json(json!({"sub": "dave", "tenantId": "acme..corp"})).into_response()
            }
            Some("bell-token") => {
                Json(json!({"sub": "erin", "tenantId": "acme\u{7}corp"})).into_response()
            }
            Some("garbled-token") => (StatusCode::OK, "<html>oops</html>").into_response(),
            _ => StatusCode::UNAUTHORIZED.into_response(),
        }
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let service = Router::new().route("/auth/validate", get(validate));
    tokio::spawn(async move { axum::serve(listener, service).await.unwrap() });
    format!("http://{addr}/auth/validate")
}
