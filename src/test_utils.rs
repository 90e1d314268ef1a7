// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities: a mock Kubernetes API transport and a scripted seal
//! client for protocol tests.

use crate::error::{Result, WardenError};
use crate::vault::{HealthStatus, SealApi, SealStatus};
use async_trait::async_trait;
use base64::Engine;
use http::{Request, Response};
use kube::client::Body;
use kube::Client;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tower::Service;

/// A mock HTTP service that returns predefined responses based on request paths.
#[derive(Clone)]
pub struct MockService {
    responses: Arc<Mutex<HashMap<(String, String), (u16, String)>>>,
}

impl MockService {
    pub fn new() -> Self {
        Self {
            responses: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Add a response for GET requests matching the exact path
    pub fn on_get(self, path: &str, status: u16, body: &str) -> Self {
        self.insert("GET", path, status, body);
        self
    }

    /// Add a response for POST requests matching the exact path
    pub fn on_post(self, path: &str, status: u16, body: &str) -> Self {
        self.insert("POST", path, status, body);
        self
    }

    /// Add a response for PATCH requests matching the exact path
    pub fn on_patch(self, path: &str, status: u16, body: &str) -> Self {
        self.insert("PATCH", path, status, body);
        self
    }

    fn insert(&self, method: &str, path: &str, status: u16, body: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert((method.to_string(), path.to_string()), (status, body.to_string()));
    }

    /// Build a kube Client from this mock service
    pub fn into_client(self) -> Client {
        Client::new(self, "default")
    }

    fn find_response(&self, method: &str, path: &str) -> Option<(u16, String)> {
        let responses = self.responses.lock().unwrap();

        // Try exact match first
        if let Some(resp) = responses.get(&(method.to_string(), path.to_string())) {
            return Some(resp.clone());
        }

        // Try prefix match for paths like /api/v1/namespaces/foo
        for ((m, p), resp) in responses.iter() {
            if m == method && path.starts_with(p) {
                return Some(resp.clone());
            }
        }

        None
    }
}

impl Default for MockService {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<Request<Body>> for MockService {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();

        let response = self.find_response(&method, &path);

        Box::pin(async move {
            match response {
                Some((status, body)) => Ok(Response::builder()
                    .status(status)
                    .header("content-type", "application/json")
                    .body(Body::from(body.into_bytes()))
                    .unwrap()),
                None => {
                    // Default 404 for unmatched requests
                    let body = r#"{"kind":"Status","apiVersion":"v1","status":"Failure","message":"not found","reason":"NotFound","code":404}"#;
                    Ok(Response::builder()
                        .status(404)
                        .header("content-type", "application/json")
                        .body(Body::from(body.as_bytes().to_vec()))
                        .unwrap())
                }
            }
        })
    }
}

/// Create a mock Secret JSON response with one base64-encoded data entry
pub fn secret_json(name: &str, namespace: &str, data_key: &str, value: &[u8]) -> String {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": {
            "name": name,
            "namespace": namespace,
            "uid": "test-uid"
        },
        "type": "Opaque",
        "data": {
            data_key: base64::engine::general_purpose::STANDARD.encode(value)
        }
    })
    .to_string()
}

/// Create a 404 not found response
pub fn not_found_json(resource: &str, name: &str) -> String {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": format!("{} \"{}\" not found", resource, name),
        "reason": "NotFound",
        "code": 404
    })
    .to_string()
}

#[derive(Clone)]
enum Scripted {
    Sealed,
    Unsealed,
    Error(String),
}

impl Scripted {
    fn into_result(self) -> Result<SealStatus> {
        match self {
            Scripted::Sealed => Ok(status(true)),
            Scripted::Unsealed => Ok(status(false)),
            Scripted::Error(message) => Err(WardenError::Connectivity(message)),
        }
    }
}

fn status(sealed: bool) -> SealStatus {
    SealStatus {
        sealed,
        initialized: true,
        t: 3,
        n: 5,
        progress: 0,
        version: None,
    }
}

/// A scripted [`SealApi`] for protocol and watcher tests.
///
/// Status queries drain a queue, then repeat the last drained entry;
/// key submissions drain their own queue, defaulting to "still sealed".
/// Clones share state, so tests can hold a handle for assertions.
#[derive(Clone)]
pub struct MockSealApi {
    inner: Arc<MockSealInner>,
}

struct MockSealInner {
    status_queue: Mutex<VecDeque<Scripted>>,
    last_status: Mutex<Scripted>,
    submit_queue: Mutex<VecDeque<Scripted>>,
    submit_calls: AtomicUsize,
    submit_ok: AtomicUsize,
}

impl MockSealApi {
    fn with_initial(initial: Scripted) -> Self {
        MockSealApi {
            inner: Arc::new(MockSealInner {
                status_queue: Mutex::new(VecDeque::from([initial.clone()])),
                last_status: Mutex::new(initial),
                submit_queue: Mutex::new(VecDeque::new()),
                submit_calls: AtomicUsize::new(0),
                submit_ok: AtomicUsize::new(0),
            }),
        }
    }

    pub fn sealed() -> Self {
        Self::with_initial(Scripted::Sealed)
    }

    pub fn unsealed() -> Self {
        Self::with_initial(Scripted::Unsealed)
    }

    pub fn status_error(message: &str) -> Self {
        Self::with_initial(Scripted::Error(message.to_string()))
    }

    /// Queue an additional sealed response for a later status query
    pub fn status_sealed(self) -> Self {
        self.push_status(Scripted::Sealed)
    }

    /// Queue an additional unsealed response for a later status query
    pub fn status_unsealed(self) -> Self {
        self.push_status(Scripted::Unsealed)
    }

    /// Queue a "still sealed" result for the next key submission
    pub fn submit_sealed(self) -> Self {
        self.push_submit(Scripted::Sealed)
    }

    /// Queue an "unsealed" result for the next key submission
    pub fn submit_unsealed(self) -> Self {
        self.push_submit(Scripted::Unsealed)
    }

    /// Queue a failure for the next key submission
    pub fn submit_error(self, message: &str) -> Self {
        self.push_submit(Scripted::Error(message.to_string()))
    }

    fn push_status(self, scripted: Scripted) -> Self {
        self.inner.status_queue.lock().unwrap().push_back(scripted);
        self
    }

    fn push_submit(self, scripted: Scripted) -> Self {
        self.inner.submit_queue.lock().unwrap().push_back(scripted);
        self
    }

    /// Number of key submissions Vault accepted
    pub fn submissions(&self) -> usize {
        self.inner.submit_ok.load(Ordering::SeqCst)
    }

    /// Number of key submission attempts, including failed ones
    pub fn submission_calls(&self) -> usize {
        self.inner.submit_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SealApi for MockSealApi {
    async fn seal_status(&self) -> Result<SealStatus> {
        let next = {
            let mut queue = self.inner.status_queue.lock().unwrap();
            match queue.pop_front() {
                Some(scripted) => {
                    *self.inner.last_status.lock().unwrap() = scripted.clone();
                    scripted
                }
                None => self.inner.last_status.lock().unwrap().clone(),
            }
        };
        next.into_result()
    }

    async fn submit_unseal_key(&self, _key: &str) -> Result<SealStatus> {
        self.inner.submit_calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .inner
            .submit_queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Scripted::Sealed);
        let result = next.into_result();
        if result.is_ok() {
            self.inner.submit_ok.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    async fn is_initialized(&self) -> bool {
        self.seal_status().await.map(|s| s.initialized).unwrap_or(false)
    }

    async fn health_check(&self) -> HealthStatus {
        match self.seal_status().await {
            Ok(status) => HealthStatus {
                initialized: status.initialized,
                sealed: status.sealed,
                standby: false,
            },
            Err(_) => HealthStatus::unavailable(),
        }
    }
}
