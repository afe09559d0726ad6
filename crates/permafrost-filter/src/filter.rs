//! proxy-wasm contexts: the host-facing side of the filter.

use log::{debug, info, warn};
use proxy_wasm::traits::{Context, HttpContext, RootContext};
use proxy_wasm::types::{Action, ContextType, LogLevel};

use crate::trace;
use crate::wire::{self, Decision, EMPTY_JSON_BODY, FilterConfig};

proxy_wasm::main! {{
    proxy_wasm::set_log_level(LogLevel::Info);
    proxy_wasm::set_root_context(|_| -> Box<dyn RootContext> {
        Box::new(FilterRoot {
            config: FilterConfig::default(),
        })
    });
}}

/// Root context: holds the plugin configuration shared by all requests.
struct FilterRoot {
    config: FilterConfig,
}

impl Context for FilterRoot {}

impl RootContext for FilterRoot {
    fn on_configure(&mut self, _plugin_configuration_size: usize) -> bool {
        if let Some(bytes) = self.get_plugin_configuration() {
            match serde_json::from_slice(&bytes) {
                Ok(config) => self.config = config,
                Err(error) => {
                    // Keep the defaults rather than wedging the listener.
                    warn!("invalid plugin configuration, using defaults: {error}");
                }
            }
        }
        info!(
            "freeze filter configured (cluster={}, timeout={}ms)",
            self.config.cluster, self.config.dispatch_timeout_ms
        );
        true
    }

    fn create_http_context(&self, _context_id: u32) -> Option<Box<dyn HttpContext>> {
        Some(Box::new(FreezeFilter::new(self.config.clone())))
    }

    fn get_type(&self) -> Option<ContextType> {
        Some(ContextType::HttpContext)
    }
}

/// Per-request filter state.
///
/// Each request owns its context; nothing is shared across requests.
struct FreezeFilter {
    config: FilterConfig,

    /// Extracted trace id; `None` means the request is untagged and this
    /// context does nothing further.
    trace_id: Option<String>,

    method: String,
    path: String,
    authority: String,

    /// Original non-pseudo request headers, mirrored onto check calls.
    original_headers: Vec<(String, String)>,

    /// Fully buffered request body.
    body: Vec<u8>,

    /// The network snapshot is posted at most once per request.
    snapshot_sent: bool,

    /// The verdict is in and the request has been resumed; later phase
    /// callbacks must not re-enter the poll loop.
    resolved: bool,

    check_token: Option<u32>,
    snapshot_token: Option<u32>,
}

impl FreezeFilter {
    fn new(config: FilterConfig) -> Self {
        Self {
            config,
            trace_id: None,
            method: String::new(),
            path: String::new(),
            authority: String::new(),
            original_headers: Vec::new(),
            body: Vec::new(),
            snapshot_sent: false,
            resolved: false,
            check_token: None,
            snapshot_token: None,
        }
    }

    /// Issues one check call; on any dispatch failure the request resumes.
    fn dispatch_check(&mut self) {
        let Some(trace_id) = self.trace_id.clone() else {
            return;
        };

        let headers = wire::check_call_headers(
            &self.config.authority,
            &trace_id,
            &self.authority,
            &self.path,
            &self.original_headers,
        );
        let header_refs: Vec<(&str, &str)> = headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();
        let body = if self.body.is_empty() {
            EMPTY_JSON_BODY
        } else {
            self.body.as_slice()
        };

        match self.dispatch_http_call(
            &self.config.cluster,
            header_refs,
            Some(body),
            vec![],
            self.config.dispatch_timeout(),
        ) {
            Ok(token) => self.check_token = Some(token),
            Err(status) => {
                warn!("check dispatch failed ({status:?}), failing open");
                self.finish(None);
            }
        }
    }

    /// Posts the network snapshot. Fire-and-forget: a failure is logged
    /// and the freeze loop continues regardless.
    fn send_snapshot(&mut self) {
        let Some(trace_id) = self.trace_id.as_deref() else {
            return;
        };

        let payload = wire::SnapshotPayload {
            trace_id,
            service_name: &self.authority,
            method: format!("{} {}", self.method, self.path),
            body: String::from_utf8_lossy(&self.body).into_owned(),
        };
        let Ok(body) = serde_json::to_vec(&payload) else {
            return;
        };

        let headers = wire::snapshot_call_headers(&self.config.authority);
        let header_refs: Vec<(&str, &str)> = headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();

        match self.dispatch_http_call(
            &self.config.cluster,
            header_refs,
            Some(&body),
            vec![],
            self.config.dispatch_timeout(),
        ) {
            Ok(token) => self.snapshot_token = Some(token),
            Err(status) => warn!("snapshot dispatch failed ({status:?})"),
        }
    }

    /// Resumes the request, applying a body override when one was granted.
    fn finish(&mut self, override_body: Option<String>) {
        if let Some(body) = override_body {
            debug!("applying release override ({} bytes)", body.len());
            self.set_http_request_header("content-length", Some(&body.len().to_string()));
            self.set_http_request_body(0, self.body.len(), body.as_bytes());
        }
        self.resolved = true;
        self.resume_http_request();
    }
}

impl Context for FreezeFilter {
    fn on_http_call_response(
        &mut self,
        token_id: u32,
        _num_headers: usize,
        body_size: usize,
        _num_trailers: usize,
    ) {
        if self.snapshot_token == Some(token_id) {
            self.snapshot_token = None;
            return;
        }
        if self.check_token != Some(token_id) {
            return;
        }
        self.check_token = None;

        let response = self.get_http_call_response_body(0, body_size);
        let Some(decision) = response.as_deref().and_then(wire::parse_decision) else {
            warn!("undecodable check response, failing open");
            self.finish(None);
            return;
        };

        match decision {
            Decision::Freeze => {
                if !self.snapshot_sent {
                    self.snapshot_sent = true;
                    self.send_snapshot();
                }
                // Still frozen: poll again. The request stays suspended
                // between calls.
                self.dispatch_check();
            }
            Decision::Allow { override_body } => {
                self.finish(Some(override_body).filter(|body| !body.is_empty()));
            }
        }
    }
}

impl HttpContext for FreezeFilter {
    fn on_http_request_headers(&mut self, _num_headers: usize, end_of_stream: bool) -> Action {
        let headers = self.get_http_request_headers();
        let Some(trace_id) = trace::extract_trace_id(&headers) else {
            // Untagged traffic must not be delayed.
            return Action::Continue;
        };

        for (name, value) in headers {
            match name.as_str() {
                ":method" => self.method = value,
                ":path" => self.path = value,
                ":authority" => self.authority = value,
                _ if !name.starts_with(':') => self.original_headers.push((name, value)),
                _ => {}
            }
        }
        debug!(
            "intercepting {} {} (trace {trace_id})",
            self.method, self.path
        );
        self.trace_id = Some(trace_id);

        // The body may be replaced at release time.
        self.set_http_request_header("content-length", None);

        if end_of_stream {
            self.dispatch_check();
        }
        if self.resolved {
            // Dispatch failed and the request already failed open.
            return Action::Continue;
        }
        Action::Pause
    }

    fn on_http_request_body(&mut self, body_size: usize, end_of_stream: bool) -> Action {
        if self.trace_id.is_none() || self.resolved {
            return Action::Continue;
        }
        if !end_of_stream {
            // Partial body: keep buffering.
            return Action::Pause;
        }

        if body_size > 0 {
            if let Some(body) = self.get_http_request_body(0, body_size) {
                self.body = body;
            }
        }
        self.dispatch_check();
        if self.resolved {
            return Action::Continue;
        }
        Action::Pause
    }
}
