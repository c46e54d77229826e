//! Authenticated HTTP push endpoint. Lets the content server short-circuit
//! polling for latency-sensitive content by POSTing directly.

use std::io::Read;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{error, info, warn};
use tiny_http::{Header, Method, Response, Server};

use crate::content::{AuthConfig, AuthType, Content};
use crate::limits::{ContentLimits, ServerLimits};

/// Invoked for every accepted push; expected to both enqueue the content and
/// reset the poll client's timer so the two paths coalesce rather than race.
pub type PushCallback = Arc<dyn Fn(Content) + Send + Sync>;

pub struct PushServer {
    server: Arc<Server>,
    worker: Option<JoinHandle<()>>,
}

fn json_response(status: u16, body: &str) -> Response<std::io::Cursor<Vec<u8>>> {
    let header = Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
        .expect("static header is valid");
    Response::from_string(body)
        .with_status_code(status)
        .with_header(header)
}

fn authenticate(auth: &AuthConfig, request: &tiny_http::Request) -> bool {
    match auth.auth_type {
        AuthType::Bearer => {
            let expected = match &auth.token {
                Some(t) => format!("Bearer {t}"),
                None => return true,
            };
            request
                .headers()
                .iter()
                .find(|h| h.field.to_string().eq_ignore_ascii_case("Authorization"))
                .map(|h| h.value.as_str() == expected)
                .unwrap_or(false)
        }
        AuthType::ApiKey => {
            let Some(expected) = &auth.key else {
                return true;
            };
            request
                .headers()
                .iter()
                .find(|h| h.field.to_string().eq_ignore_ascii_case(&auth.header_name))
                .map(|h| h.value.as_str() == expected)
                .unwrap_or(false)
        }
    }
}

fn content_length(request: &tiny_http::Request) -> u64 {
    request
        .headers()
        .iter()
        .find(|h| h.field.to_string().eq_ignore_ascii_case("Content-Length"))
        .and_then(|h| h.value.as_str().parse::<u64>().ok())
        .unwrap_or(0)
}

fn handle_push(
    mut request: tiny_http::Request,
    auth: &AuthConfig,
    content_limits: &ContentLimits,
    server_limits: &ServerLimits,
    display_dims: Option<(u32, u32)>,
    callback: &PushCallback,
) {
    if !authenticate(auth, &request) {
        warn!(
            "unauthorized push request from {:?}",
            request.remote_addr()
        );
        let _ = request.respond(json_response(401, r#"{"error":"Unauthorized"}"#));
        return;
    }

    let len = content_length(&request);
    if len > server_limits.max_request_size {
        warn!("request too large: {len} bytes (max {})", server_limits.max_request_size);
        let _ = request.respond(json_response(413, r#"{"error":"Request too large"}"#));
        return;
    }
    if len == 0 {
        let _ = request.respond(json_response(400, r#"{"error":"Empty request"}"#));
        return;
    }

    let mut body = String::new();
    if let Err(e) = request.as_reader().take(len).read_to_string(&mut body) {
        error!("error reading push request body: {e}");
        let _ = request.respond(json_response(500, r#"{"error":"Internal server error"}"#));
        return;
    }

    let content: Content = match serde_json::from_str(&body) {
        Ok(c) => c,
        Err(e) => {
            error!("invalid JSON in push request: {e}");
            let _ = request.respond(json_response(400, r#"{"error":"Invalid JSON"}"#));
            return;
        }
    };

    if let Err(e) = content.validate(content_limits) {
        error!("push content failed validation: {e}");
        let body = format!(r#"{{"error":"{e}"}}"#);
        let _ = request.respond(json_response(422, &body));
        return;
    }

    if let Some((w, h)) = display_dims {
        if let Err(e) = content.validate_display_dimensions(w, h) {
            error!("push content dimension mismatch: {e}");
            let body = format!(r#"{{"error":"{e}"}}"#);
            let _ = request.respond(json_response(422, &body));
            return;
        }
    }

    info!(
        "received push content: {} (priority={})",
        content.content_id, content.playback.priority
    );
    callback(content);
    let _ = request.respond(json_response(200, r#"{"status":"accepted"}"#));
}

impl PushServer {
    pub fn start(
        host: &str,
        port: u16,
        auth: AuthConfig,
        content_limits: ContentLimits,
        server_limits: ServerLimits,
        display_dims: Option<(u32, u32)>,
        callback: PushCallback,
    ) -> std::io::Result<Self> {
        let addr = format!("{host}:{port}");
        let server = Server::http(&addr)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let server = Arc::new(server);

        info!("push server listening on {addr}");

        let worker_server = Arc::clone(&server);
        let worker = std::thread::spawn(move || {
            for request in worker_server.incoming_requests() {
                match (request.method(), request.url()) {
                    (Method::Get, "/health") => {
                        let _ = request.respond(json_response(200, r#"{"status":"ok"}"#));
                    }
                    (Method::Post, "/") => {
                        handle_push(
                            request,
                            &auth,
                            &content_limits,
                            &server_limits,
                            display_dims,
                            &callback,
                        );
                    }
                    _ => {
                        let _ = request.respond(json_response(404, r#"{"error":"Not found"}"#));
                    }
                }
            }
        });

        Ok(Self {
            server,
            worker: Some(worker),
        })
    }

    /// Stop accepting new requests and join the worker thread, bounded at ~5s.
    pub fn stop(mut self) {
        self.server.unblock();
        if let Some(worker) = self.worker.take() {
            let (tx, rx) = std::sync::mpsc::channel();
            std::thread::spawn(move || {
                let _ = worker.join();
                let _ = tx.send(());
            });
            if rx.recv_timeout(Duration::from_secs(5)).is_err() {
                warn!("push server worker did not shut down within 5s");
            }
        }
    }
}
