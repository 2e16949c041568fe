// crates/db-relay-api/tests/common/mod.rs
// ============================================================================
// Module: Scripted Upstream
// Description: tiny_http server answering fixed routes and recording calls.
// Purpose: Exercise the REST engine without network access.
// ============================================================================

#![allow(dead_code, reason = "Not every test binary uses every helper.")]

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread;
use std::thread::JoinHandle;

use db_relay_api::ApiEngine;
use db_relay_api::ApiEngineConfig;
use db_relay_core::SchemaRegistry;
use tiny_http::Header;
use tiny_http::Response;
use tiny_http::Server;

/// One request observed by the upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seen {
    pub method: String,
    pub url: String,
    pub authorization: Option<String>,
    pub body: String,
}

/// Running scripted upstream; stops on drop.
pub struct Upstream {
    pub base_url: String,
    server: Arc<Server>,
    seen: Arc<Mutex<Vec<Seen>>>,
    handle: Option<JoinHandle<()>>,
}

impl Upstream {
    /// Starts a server answering `"METHOD /path?query"` routes.
    pub fn start(routes: &[(&str, u16, &str)]) -> Self {
        let routes: BTreeMap<String, (u16, String)> = routes
            .iter()
            .map(|(route, status, body)| ((*route).to_string(), (*status, (*body).to_string())))
            .collect();
        let server = Arc::new(Server::http("127.0.0.1:0").unwrap());
        let addr = server.server_addr().to_ip().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handle = {
            let server = Arc::clone(&server);
            let seen = Arc::clone(&seen);
            thread::spawn(move || {
                for mut request in server.incoming_requests() {
                    let mut body = String::new();
                    let _ = request.as_reader().read_to_string(&mut body);
                    let authorization = request
                        .headers()
                        .iter()
                        .find(|header| header.field.equiv("Authorization"))
                        .map(|header| header.value.as_str().to_string());
                    let key = format!("{} {}", request.method(), request.url());
                    seen.lock().unwrap().push(Seen {
                        method: request.method().to_string(),
                        url: request.url().to_string(),
                        authorization,
                        body,
                    });
                    let (status, payload) =
                        routes.get(&key).cloned().unwrap_or((404, "not found".to_string()));
                    let content_type =
                        Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap();
                    let response =
                        Response::from_string(payload).with_status_code(status).with_header(content_type);
                    let _ = request.respond(response);
                }
            })
        };
        Self {
            base_url: format!("http://{addr}"),
            server,
            seen,
            handle: Some(handle),
        }
    }

    /// Returns every request observed so far.
    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    /// Builds an engine pointed at this upstream.
    pub fn engine(&self, allow_write: bool) -> ApiEngine {
        ApiEngine::new(
            ApiEngineConfig {
                base_url: format!("{}/", self.base_url),
                token: Some("secret".to_string()),
                timeout_ms: 2_000,
                page_size: 2,
                allow_write,
                ..ApiEngineConfig::default()
            },
            SchemaRegistry::builtin(),
        )
        .unwrap()
    }
}

impl Drop for Upstream {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
