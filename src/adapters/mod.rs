//! Provider adapters — one implementation per API dialect.
//!
//! Vendors disagree on auth headers, listing shapes and completion
//! payloads, but every one of them can (a) list models, (b) maybe look a
//! single model up, and (c) answer a tiny chat request. That is the whole
//! `ProviderAdapter` surface. Adapters never see the store or each other,
//! and never enforce deadlines themselves; the discovery and probe clients
//! wrap every call in a timeout.

use async_trait::async_trait;
use futures::StreamExt;
use http::StatusCode;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::catalog::{Provider, ProviderFamily, Secret};
use crate::error::{ErrorKind, ProbeFailure};
use crate::models::DiscoveredModel;

pub mod anthropic;
pub mod google;
pub mod openai;

#[cfg(test)]
pub(crate) mod testing;

pub(crate) const USER_AGENT: &str = concat!("model-verifier/", env!("CARGO_PKG_VERSION"));

// ── Core Types ──────────────────────────────────────────────────────

/// Outcome of a single-model lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found,
    Missing,
    /// The dialect (or this provider) has no lookup endpoint; fall back to
    /// checking the listing.
    Unsupported,
}

/// The minimal completion sent to check a model answers at all.
#[derive(Debug, Clone)]
pub struct ChatProbeRequest {
    pub model_id: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub stream: bool,
}

/// A successful completion with timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    pub status: u16,
    /// Request start → final byte.
    pub total: Duration,
    /// Request start → first streamed token. `None` when not streamed.
    pub ttft: Option<Duration>,
}

// ── Adapter Trait ───────────────────────────────────────────────────

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn family(&self) -> ProviderFamily;

    fn display_name(&self) -> &str;

    /// Every model id the provider currently advertises.
    async fn list_models(
        &self,
        provider: &Provider,
        secret: &Secret,
    ) -> Result<Vec<DiscoveredModel>, ProbeFailure>;

    /// Ask for one model by id. A 404 is `Ok(Lookup::Missing)`, not an error.
    async fn lookup_model(
        &self,
        provider: &Provider,
        secret: &Secret,
        model_id: &str,
    ) -> Result<Lookup, ProbeFailure>;

    /// Send one short completion and time it. Non-2xx → `Err`.
    async fn chat_probe(
        &self,
        provider: &Provider,
        secret: &Secret,
        req: &ChatProbeRequest,
    ) -> Result<ChatReply, ProbeFailure>;
}

// ── Registry ────────────────────────────────────────────────────────

/// Adapters keyed by the dialect they speak.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<ProviderFamily, Box<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// OpenAI-compatible, Anthropic and Google adapters sharing one client.
    pub fn with_defaults() -> Self {
        let client = build_client();
        let mut registry = Self::empty();
        registry.register(Box::new(openai::OpenAiAdapter::with_client(client.clone())));
        registry.register(Box::new(anthropic::AnthropicAdapter::with_client(client.clone())));
        registry.register(Box::new(google::GoogleAdapter::with_client(client)));
        registry
    }

    /// Add or replace the adapter for its family.
    pub fn register(&mut self, adapter: Box<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.family(), adapter);
    }

    pub fn get(&self, family: ProviderFamily) -> Option<&dyn ProviderAdapter> {
        self.adapters.get(&family).map(|a| a.as_ref())
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

pub(crate) fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

// ── Permissive Listing Decode ───────────────────────────────────────

/// Decode a model-listing body without caring about its exact schema.
///
/// Accepts `{"data": [...]}`, `{"models": [...]}` or a bare array. Only
/// the known fields are read; anything else in the payload, nested or
/// not, is ignored. Entries without an id are skipped.
pub fn decode_model_list(raw: &[u8]) -> Result<Vec<DiscoveredModel>, ProbeFailure> {
    let body: Value = serde_json::from_slice(raw).map_err(|e| {
        ProbeFailure::new(ErrorKind::MalformedResponse, None, format!("listing is not JSON: {e}"))
    })?;

    let entries = match &body {
        Value::Array(arr) => arr,
        Value::Object(obj) => match obj.get("data").or_else(|| obj.get("models")) {
            Some(Value::Array(arr)) => arr,
            // Some vendors answer an empty account with `"data": null`.
            Some(Value::Null) => return Ok(Vec::new()),
            _ => {
                return Err(ProbeFailure::new(
                    ErrorKind::MalformedResponse,
                    None,
                    "listing has neither a `data` nor a `models` array",
                ))
            }
        },
        _ => {
            return Err(ProbeFailure::new(
                ErrorKind::MalformedResponse,
                None,
                "listing is neither an object nor an array",
            ))
        }
    };

    Ok(entries.iter().filter_map(model_from_entry).collect())
}

fn model_from_entry(entry: &Value) -> Option<DiscoveredModel> {
    // Plain string entries: `["gpt-4o", "gpt-4o-mini"]`.
    if let Some(id) = entry.as_str() {
        return non_empty(id).map(DiscoveredModel::new);
    }

    let id = entry["id"]
        .as_str()
        .or_else(|| entry["model"].as_str())
        .or_else(|| entry["name"].as_str())
        .map(|s| s.strip_prefix("models/").unwrap_or(s))
        .and_then(non_empty)?;

    let display_name = entry["display_name"]
        .as_str()
        .or_else(|| entry["displayName"].as_str())
        .or_else(|| entry["name"].as_str().filter(|n| !n.starts_with("models/")))
        .filter(|n| *n != id)
        .map(str::to_string);

    let created = entry["created"]
        .as_i64()
        .or_else(|| entry["created_at"].as_i64());

    let max_context_tokens = [
        "context_length",
        "context_window",
        "max_context_tokens",
        "max_input_tokens",
        "inputTokenLimit",
    ]
    .iter()
    .find_map(|k| entry[*k].as_u64());

    Some(DiscoveredModel {
        id: id.to_string(),
        display_name,
        created,
        max_context_tokens,
    })
}

fn non_empty(s: &str) -> Option<&str> {
    let t = s.trim();
    (!t.is_empty()).then_some(t)
}

// ── Shared HTTP Plumbing ────────────────────────────────────────────

/// Send a request and return the body of a 2xx response.
pub(crate) async fn fetch_body(req: reqwest::RequestBuilder) -> Result<Vec<u8>, ProbeFailure> {
    let resp = req.send().await.map_err(|e| ProbeFailure::from_transport(&e))?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ProbeFailure::from_status(status, &body));
    }
    resp.bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| ProbeFailure::from_transport(&e))
}

/// GET-by-id semantics: 2xx → found, 404 → missing, anything else → error.
pub(crate) async fn lookup(req: reqwest::RequestBuilder) -> Result<Lookup, ProbeFailure> {
    match fetch_body(req).await {
        Ok(_) => Ok(Lookup::Found),
        Err(f) if f.kind == ErrorKind::NotFound => Ok(Lookup::Missing),
        Err(f) => Err(f),
    }
}

/// Send a completion request and time it.
///
/// For `text/event-stream` responses, time-to-first-token is taken at the
/// first event `is_token` accepts; the stream must contain at least one
/// JSON event and no error event. Buffered responses must be a JSON object without an
/// `error` member.
pub(crate) async fn timed_completion(
    req: reqwest::RequestBuilder,
    is_token: fn(&Value) -> bool,
) -> Result<ChatReply, ProbeFailure> {
    let start = Instant::now();
    let resp = req.send().await.map_err(|e| ProbeFailure::from_transport(&e))?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ProbeFailure::from_status(status, &body));
    }

    let is_sse = resp
        .headers()
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/event-stream"));

    if !is_sse {
        let raw = resp.bytes().await.map_err(|e| ProbeFailure::from_transport(&e))?;
        let total = start.elapsed();
        let body: Value = serde_json::from_slice(&raw).map_err(|e| {
            ProbeFailure::new(ErrorKind::MalformedResponse, Some(status.as_u16()), e.to_string())
        })?;
        if !body.is_object() || !body["error"].is_null() {
            let msg = crate::error::extract_error_message(&String::from_utf8_lossy(&raw))
                .unwrap_or_else(|| "unexpected completion body".into());
            return Err(ProbeFailure::new(ErrorKind::MalformedResponse, Some(status.as_u16()), msg));
        }
        return Ok(ChatReply { status: status.as_u16(), total, ttft: None });
    }

    let mut scanner = SseScanner::default();
    let mut ttft = None;
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ProbeFailure::from_transport(&e))?;
        for event in scanner.push(&chunk) {
            if let Some(failure) = stream_error(&event, status.as_u16()) {
                return Err(failure);
            }
            if ttft.is_none() && is_token(&event) {
                ttft = Some(start.elapsed());
            }
        }
    }
    for event in scanner.finish() {
        if let Some(failure) = stream_error(&event, status.as_u16()) {
            return Err(failure);
        }
        if ttft.is_none() && is_token(&event) {
            ttft = Some(start.elapsed());
        }
    }
    let total = start.elapsed();

    if scanner.events == 0 {
        return Err(ProbeFailure::new(
            ErrorKind::MalformedResponse,
            Some(status.as_u16()),
            "event stream carried no JSON events",
        ));
    }
    Ok(ChatReply { status: status.as_u16(), total, ttft })
}

/// An error reported inside a 2xx event stream: `{"error": ...}` from
/// OpenAI-style proxies or `{"type": "error", ...}` from Anthropic.
///
/// Classified by the embedded numeric code when there is one, otherwise
/// as a server error. The recorded status stays the HTTP one.
fn stream_error(event: &Value, status: u16) -> Option<ProbeFailure> {
    if event["type"] != "error" && event["error"].is_null() {
        return None;
    }
    let error = &event["error"];
    let kind = error["code"]
        .as_u64()
        .and_then(|c| u16::try_from(c).ok())
        .and_then(|c| StatusCode::from_u16(c).ok())
        .and_then(crate::error::classify_status)
        .unwrap_or(ErrorKind::ServerError);
    let message = error["message"]
        .as_str()
        .or_else(|| error.as_str())
        .unwrap_or("error event in completion stream");
    Some(ProbeFailure::new(kind, Some(status), format!("stream error: {message}")))
}

/// Incremental `data:` line extractor for server-sent events.
#[derive(Default)]
pub(crate) struct SseScanner {
    pending: String,
    pub(crate) events: usize,
}

impl SseScanner {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.pending.push_str(&String::from_utf8_lossy(chunk));
        let mut out = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            if let Some(v) = self.parse_line(&line) {
                out.push(v);
            }
        }
        out
    }

    pub(crate) fn finish(&mut self) -> Vec<Value> {
        let rest = std::mem::take(&mut self.pending);
        self.parse_line(&rest).into_iter().collect()
    }

    fn parse_line(&mut self, line: &str) -> Option<Value> {
        let data = line.trim().strip_prefix("data:")?.trim();
        if data.is_empty() || data == "[DONE]" {
            return None;
        }
        let value = serde_json::from_str::<Value>(data).ok()?;
        self.events += 1;
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_openai_shape() {
        let raw = br#"{"object":"list","data":[
            {"id":"gpt-4o","object":"model","created":1715367049,"owned_by":"system"},
            {"id":"gpt-4o-mini","object":"model","created":1721172741,"owned_by":"system"}
        ]}"#;
        let models = decode_model_list(raw).unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].id, "gpt-4o");
        assert_eq!(models[0].created, Some(1715367049));
        assert_eq!(models[0].display_name, None);
    }

    #[test]
    fn test_decode_ignores_unexpected_nested_fields() {
        let raw = br#"{"data":[{
            "id":"claude-sonnet-4",
            "display_name":"Claude Sonnet 4",
            "context_over_200k":{"nested":"obj"},
            "pricing":{"prompt":"0.000003","tiers":[1,2,{"x":null}]},
            "context_length":200000
        }],"has_more":false,"first_id":null}"#;
        let models = decode_model_list(raw).unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "claude-sonnet-4");
        assert_eq!(models[0].display_name.as_deref(), Some("Claude Sonnet 4"));
        assert_eq!(models[0].max_context_tokens, Some(200_000));
    }

    #[test]
    fn test_decode_google_shape() {
        let raw = br#"{"models":[
            {"name":"models/gemini-2.5-flash","displayName":"Gemini 2.5 Flash","inputTokenLimit":1048576,
             "supportedGenerationMethods":["generateContent","countTokens"]}
        ],"nextPageToken":"abc"}"#;
        let models = decode_model_list(raw).unwrap();
        assert_eq!(models[0].id, "gemini-2.5-flash");
        assert_eq!(models[0].display_name.as_deref(), Some("Gemini 2.5 Flash"));
        assert_eq!(models[0].max_context_tokens, Some(1_048_576));
    }

    #[test]
    fn test_decode_bare_array_and_strings() {
        let models = decode_model_list(br#"[{"id":"a"},"b",{"object":"model"},"  "]"#).unwrap();
        let ids: Vec<_> = models.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_decode_empty_listing_is_ok() {
        assert!(decode_model_list(br#"{"data":[]}"#).unwrap().is_empty());
        assert!(decode_model_list(br#"{"data":null}"#).unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode_model_list(b"<html>502 Bad Gateway</html>").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedResponse);
        let err = decode_model_list(br#"{"object":"list"}"#).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedResponse);
        let err = decode_model_list(b"42").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedResponse);
    }

    #[test]
    fn test_sse_scanner_handles_split_lines() {
        let mut scanner = SseScanner::default();
        let first = scanner.push(b"data: {\"choices\":[{\"delta\":{\"cont");
        assert!(first.is_empty());
        let second = scanner.push(b"ent\":\"4\"}}]}\n\ndata: [DONE]\n");
        assert_eq!(second.len(), 1);
        assert_eq!(second[0]["choices"][0]["delta"]["content"], "4");
        assert!(scanner.finish().is_empty());
        assert_eq!(scanner.events, 1);
    }

    #[test]
    fn test_sse_scanner_skips_comments_and_event_lines() {
        let mut scanner = SseScanner::default();
        let events = scanner.push(b": keep-alive\nevent: ping\ndata: {\"type\":\"ping\"}\n");
        assert_eq!(events.len(), 1);
        let tail = {
            scanner.push(b"data: {\"type\":\"message_stop\"}");
            scanner.finish()
        };
        assert_eq!(tail.len(), 1);
        assert_eq!(scanner.events, 2);
    }

    #[test]
    fn test_stream_error_shapes() {
        let anthropic = serde_json::json!({"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}});
        let failure = stream_error(&anthropic, 200).unwrap();
        assert_eq!(failure.kind, ErrorKind::ServerError);
        assert_eq!(failure.status, Some(200));
        assert_eq!(failure.message, "stream error: Overloaded");

        let limited = serde_json::json!({"error":{"code":429,"message":"slow down"}});
        assert_eq!(stream_error(&limited, 200).unwrap().kind, ErrorKind::RateLimited);

        let chunk = serde_json::json!({"choices":[{"delta":{"content":"4"}}],"error":null});
        assert!(stream_error(&chunk, 200).is_none());
        assert!(stream_error(&serde_json::json!({"type":"message_stop"}), 200).is_none());
    }

    #[test]
    fn test_registry_replaces_by_family() {
        let mut registry = AdapterRegistry::with_defaults();
        assert_eq!(registry.len(), 3);
        registry.register(Box::new(openai::OpenAiAdapter::new()));
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get(ProviderFamily::Google).map(|a| a.family()), Some(ProviderFamily::Google));
        assert!(AdapterRegistry::empty().get(ProviderFamily::OpenAi).is_none());
    }
}
