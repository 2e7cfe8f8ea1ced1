//! In-process vendor stub for client tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use serde_json::{Value as JsonValue, json};
use url::Url;

/// Serves `router` on an ephemeral local port and returns its base URL.
pub(crate) async fn serve(router: Router) -> Url {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}").parse().unwrap()
}

pub(crate) fn envelope(payload: JsonValue) -> JsonValue {
    json!({
        "EnvelopeType": "Object",
        "Envelope": payload,
        "Status": { "Code": 0, "Message": "OK" },
        "RequestId": "stub",
        "Timestamp": 1_760_000_000_000_i64,
        "TimestampFormatted": "2026-10-15 10:00:00",
    })
}

pub(crate) fn failure(code: i64, message: &str) -> JsonValue {
    json!({
        "EnvelopeType": "Object",
        "Envelope": null,
        "Status": { "Code": code, "Message": message },
    })
}

/// First element of a pupil registration envelope.
pub(crate) fn pupil() -> JsonValue {
    json!({
        "Links": { "Symbol": "S1" },
        "Pupil": { "Id": 42 },
        "ConstituentUnit": { "Id": 7 },
        "Unit": { "Id": 3, "Symbol": "000088" },
        "MessageBox": { "GlobalKey": "box-key", "Name": "Jan" },
        "Periods": [
            { "Id": 10, "Current": false },
            { "Id": 11, "Current": true },
        ],
    })
}

/// Stub of the vendor's registration and resource endpoints.
#[derive(Clone)]
pub(crate) struct StubVendor {
    pub(crate) registrations: Arc<AtomicUsize>,
    pub(crate) resource_hits: Arc<AtomicUsize>,
    pub(crate) fail_auth: Arc<AtomicBool>,
    pupils: Arc<JsonValue>,
    messages: Arc<JsonValue>,
}

impl StubVendor {
    pub(crate) fn new() -> Self {
        Self::with_pupils(json!([pupil()]))
    }

    pub(crate) fn with_pupils(pupils: JsonValue) -> Self {
        Self {
            registrations: Arc::default(),
            resource_hits: Arc::default(),
            fail_auth: Arc::default(),
            pupils: Arc::new(pupils),
            messages: Arc::new(json!([
                { "Id": 1, "DateSent": { "Timestamp": 3 } },
                { "Id": 2, "DateSent": { "Timestamp": 1 } },
                { "Id": 3, "DateSent": { "Timestamp": 2 } },
            ])),
        }
    }

    pub(crate) fn router(&self) -> Router {
        Router::new()
            .route("/{tenant}/api/mobile/register/jwt", post(register_jwt))
            .route("/{tenant}/api/mobile/register/hebe", get(register_hebe))
            .route("/{tenant}/{unit}/api/mobile/{*rest}", get(resource))
            .with_state(self.clone())
    }

    pub(crate) fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }

    pub(crate) fn resource_hits(&self) -> usize {
        self.resource_hits.load(Ordering::SeqCst)
    }

    pub(crate) fn set_fail_auth(&self, fail: bool) {
        self.fail_auth.store(fail, Ordering::SeqCst);
    }
}

async fn register_jwt(
    State(stub): State<StubVendor>,
    Path(tenant): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<JsonValue> {
    stub.registrations.fetch_add(1, Ordering::SeqCst);
    if !headers.contains_key("signature") || !headers.contains_key("digest") {
        return Json(failure(101, "Missing signature"));
    }
    let Ok(request) = serde_json::from_slice::<JsonValue>(&body) else {
        return Json(failure(-1, "Bad body"));
    };
    if request["Envelope"]["Tokens"].as_array().map(Vec::len) != Some(1) {
        return Json(failure(-1, "Expected one token"));
    }
    let host = headers
        .get("host")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    Json(envelope(json!({
        "RestURL": format!("http://{host}/{tenant}"),
        "LoginId": 1,
        "UserLogin": "jan@example.com",
        "UserName": "jan@example.com",
    })))
}

async fn register_hebe(State(stub): State<StubVendor>) -> Json<JsonValue> {
    Json(envelope((*stub.pupils).clone()))
}

async fn resource(
    State(stub): State<StubVendor>,
    Path((_tenant, _unit, rest)): Path<(String, String, String)>,
) -> Json<JsonValue> {
    stub.resource_hits.fetch_add(1, Ordering::SeqCst);
    if stub.fail_auth.load(Ordering::SeqCst) {
        return Json(failure(108, "Unknown device"));
    }
    if rest.starts_with("messages/") {
        return Json(envelope((*stub.messages).clone()));
    }
    if rest == "school/lucky" {
        return Json(envelope(json!({ "Day": "2026-10-15", "Number": 13 })));
    }
    Json(envelope(json!([])))
}
