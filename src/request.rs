//! Building request log entries for framework adapters.
//!
//! An adapter collects one [`InboundRequest`] / [`InboundResponse`] pair
//! per handled request, lets outbound-call logging append to a
//! per-request [`NestedCalls`] accumulator, and finally turns everything
//! into a single field set with [`build_entry_fields`] that it passes to
//! [`Logger::log`](crate::logger::Logger::log). gRPC interceptors do the
//! same with a [`GrpcExchange`] and [`build_grpc_entry_fields`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::record::Fields;

/// Header carrying the correlation identifier on inbound requests and
/// echoed back on responses.
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Metadata key used to forward the correlation identifier on outbound
/// calls (gRPC metadata keys are lowercase).
pub const REQUEST_ID_METADATA_KEY: &str = "x-request-id";

/// Field holding the ordered list of nested target calls.
pub const TARGET_FIELD: &str = "target";

/// Anything that can list its headers as key/value pairs.
///
/// Each framework adapter implements this for its own header type; the
/// entry builders never look at concrete header types.
pub trait HeaderPairs {
    fn header_pairs(&self) -> Vec<(String, String)>;

    /// First value of `name`, compared case-insensitively.
    fn header(&self, name: &str) -> Option<String> {
        self.header_pairs()
            .into_iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value)
    }
}

impl HeaderPairs for http::HeaderMap {
    fn header_pairs(&self) -> Vec<(String, String)> {
        self.iter()
            .filter_map(|(name, value)| {
                Some((name.as_str().to_string(), value.to_str().ok()?.to_string()))
            })
            .collect()
    }
}

impl HeaderPairs for BTreeMap<String, String> {
    fn header_pairs(&self) -> Vec<(String, String)> {
        self.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl HeaderPairs for HashMap<String, String> {
    fn header_pairs(&self) -> Vec<(String, String)> {
        self.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl HeaderPairs for [(&str, &str)] {
    fn header_pairs(&self) -> Vec<(String, String)> {
        self.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }
}

/// Render headers as a JSON object. Repeated headers are joined with
/// `", "`, the usual HTTP folding.
pub fn headers_to_value<H: HeaderPairs + ?Sized>(headers: &H) -> Value {
    let mut map: Map<String, Value> = Map::new();
    for (key, value) in headers.header_pairs() {
        match map.get_mut(&key) {
            Some(Value::String(existing)) => {
                existing.push_str(", ");
                existing.push_str(&value);
            }
            _ => {
                map.insert(key, Value::String(value));
            }
        }
    }
    Value::Object(map)
}

/// Reuse the inbound correlation identifier or mint a new UUID v4.
pub fn resolve_request_id<H: HeaderPairs + ?Sized>(headers: &H) -> String {
    headers
        .header(REQUEST_ID_HEADER)
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

/// Parse a body as JSON, `null` when it is empty or not JSON.
pub fn body_to_value(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap_or(Value::Null)
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn nested_to_value(nested: Vec<Fields>) -> Value {
    let calls = nested
        .into_iter()
        .map(|fields| Value::Object(fields.into_iter().collect()))
        .collect();
    Value::Array(calls)
}

fn latency_to_string(latency: Duration) -> String {
    format!("{latency:?}")
}

fn response_time(at: DateTime<Utc>, latency: Duration) -> DateTime<Utc> {
    at + chrono::Duration::from_std(latency).unwrap_or_else(|_| chrono::Duration::zero())
}

/// The request side of a handled inbound request.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: String,
    pub url: String,
    pub protocol: String,
    pub host: String,
    pub client_ip: String,
    pub user_agent: String,
    pub content_type: String,
    pub headers: Value,
    pub body: Vec<u8>,
    pub received_at: DateTime<Utc>,
}

/// The response side of a handled inbound request.
#[derive(Debug, Clone)]
pub struct InboundResponse {
    pub status: u16,
    pub headers: Value,
    pub body: Vec<u8>,
    pub latency: Duration,
    /// Identity the request was served for, if the adapter knows one.
    pub user: Option<String>,
}

/// Flatten one handled request, its response and the nested calls made
/// while handling it into a single field set.
pub fn build_entry_fields(
    request_id: &str,
    request: &InboundRequest,
    response: &InboundResponse,
    nested: Vec<Fields>,
) -> Fields {
    let mut fields = Fields::new();
    let mut put = |key: &str, value: Value| {
        fields.insert(key.to_string(), value);
    };

    put("requestAgent", request.user_agent.clone().into());
    put("requestBody", body_to_value(&request.body));
    put("requestBodyString", String::from_utf8_lossy(&request.body).into_owned().into());
    put("requestContentType", request.content_type.clone().into());
    put("requestHeader", request.headers.clone());
    put("requestHostName", request.host.clone().into());
    put("requestId", request_id.into());
    put("requestIp", request.client_ip.clone().into());
    put("requestMethod", request.method.clone().into());
    put("requestProtocol", request.protocol.clone().into());
    put("requestTimestamp", timestamp(request.received_at).into());
    put("requestUrl", request.url.clone().into());
    put("responseBody", body_to_value(&response.body));
    put("responseBodyString", String::from_utf8_lossy(&response.body).into_owned().into());
    put("responseHeader", response.headers.clone());
    put("responseLatency", latency_to_string(response.latency).into());
    put("responseStatus", response.status.into());
    put(
        "responseTimestamp",
        timestamp(response_time(request.received_at, response.latency)).into(),
    );
    put("responseUser", response.user.clone().unwrap_or_else(|| "unknown".to_string()).into());
    put(TARGET_FIELD, nested_to_value(nested));

    fields
}

/// Render call metadata as a JSON object. A key seen once maps to its
/// value, a repeated key maps to the array of its values.
pub fn metadata_to_value<H: HeaderPairs + ?Sized>(metadata: &H) -> Value {
    let mut map: Map<String, Value> = Map::new();
    for (key, value) in metadata.header_pairs() {
        match map.get_mut(&key) {
            Some(Value::Array(values)) => values.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
            None => {
                map.insert(key, Value::String(value));
            }
        }
    }
    Value::Object(map)
}

/// Encoded message as an object plus its raw text. A missing message is
/// `{}` and `""`.
fn message_to_values(message: Option<&[u8]>) -> (Value, Value) {
    let Some(raw) = message else {
        return (Value::Object(Map::new()), Value::String(String::new()));
    };
    let parsed = match serde_json::from_slice(raw) {
        Ok(value @ Value::Object(_)) => value,
        _ => Value::Object(Map::new()),
    };
    (parsed, String::from_utf8_lossy(raw).into_owned().into())
}

/// Shape of a handled gRPC call.
#[derive(Debug, Clone)]
pub enum GrpcCallKind {
    /// Request and response messages, already encoded as JSON (`None`
    /// when the handler produced no message).
    Unary {
        request: Option<Vec<u8>>,
        response: Option<Vec<u8>>,
    },
    Stream {
        client_stream: bool,
        server_stream: bool,
    },
}

/// One handled gRPC call, as seen by a server interceptor.
#[derive(Debug, Clone)]
pub struct GrpcExchange {
    /// Full method name, `/package.Service/Method`.
    pub method: String,
    pub peer: String,
    /// Incoming metadata, see [`metadata_to_value`].
    pub metadata: Value,
    /// Canonical status code name, `OK` on success.
    pub status_code: String,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub latency: Duration,
    pub user: Option<String>,
    pub kind: GrpcCallKind,
}

/// Flatten one handled gRPC call and the nested calls made while handling
/// it into a single field set. Unary calls carry their messages, streams
/// carry their direction flags.
pub fn build_grpc_entry_fields(
    request_id: &str,
    exchange: &GrpcExchange,
    nested: Vec<Fields>,
) -> Fields {
    let mut fields = Fields::new();
    let mut put = |key: &str, value: Value| {
        fields.insert(key.to_string(), value);
    };

    put("grpcMethod", exchange.method.clone().into());
    put("grpcRequestMeta", exchange.metadata.clone());
    put("grpcPeer", exchange.peer.clone().into());
    put("grpcStatusCode", exchange.status_code.clone().into());
    put("grpcError", exchange.error.clone().unwrap_or_default().into());
    match &exchange.kind {
        GrpcCallKind::Unary { request, response } => {
            let (body, raw) = message_to_values(request.as_deref());
            put("grpcRequest", body);
            put("grpcRequestString", raw);
            let (body, raw) = message_to_values(response.as_deref());
            put("grpcResponse", body);
            put("grpcResponseString", raw);
        }
        GrpcCallKind::Stream { client_stream, server_stream } => {
            put("grpcIsClientStream", (*client_stream).into());
            put("grpcIsServerStream", (*server_stream).into());
        }
    }
    put("requestId", request_id.into());
    put("requestTimestamp", timestamp(exchange.started_at).into());
    put(
        "responseTimestamp",
        timestamp(response_time(exchange.started_at, exchange.latency)).into(),
    );
    put("responseLatency", latency_to_string(exchange.latency).into());
    put("responseUser", exchange.user.clone().unwrap_or_else(|| "unknown".to_string()).into());
    put(TARGET_FIELD, nested_to_value(nested));

    fields
}

/// An outbound call made while handling a request.
#[derive(Debug, Clone)]
pub struct TargetRequest {
    pub url: String,
    pub method: String,
    pub content_type: String,
    pub headers: Value,
    pub body: Vec<u8>,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TargetResponse {
    pub headers: Value,
    pub body: Vec<u8>,
    pub status: u16,
    pub latency: Duration,
}

/// Field set describing one outbound call.
pub fn build_target_fields(request: &TargetRequest, response: &TargetResponse) -> Fields {
    let mut fields = Fields::new();
    let mut put = |key: &str, value: Value| {
        fields.insert(key.to_string(), value);
    };

    put("targetRequestBody", body_to_value(&request.body));
    put("targetRequestBodyString", String::from_utf8_lossy(&request.body).into_owned().into());
    put("targetRequestContentType", request.content_type.clone().into());
    put("targetRequestHeader", request.headers.clone());
    put("targetRequestMethod", request.method.clone().into());
    put("targetRequestTimestamp", timestamp(request.sent_at).into());
    put("targetRequestURL", request.url.clone().into());
    put("targetResponseBody", body_to_value(&response.body));
    put("targetResponseBodyString", String::from_utf8_lossy(&response.body).into_owned().into());
    put("targetResponseHeader", response.headers.clone());
    put("targetResponseLatency", latency_to_string(response.latency).into());
    put("targetResponseStatus", response.status.into());
    put(
        "targetResponseTimestamp",
        timestamp(response_time(request.sent_at, response.latency)).into(),
    );

    fields
}

/// Per-request accumulator of nested target calls.
///
/// Clones share the same list, so the adapter can hand one clone to the
/// handler (or its HTTP client wrapper) and keep another to read back
/// when the request completes.
#[derive(Clone, Default)]
pub struct NestedCalls {
    calls: Arc<Mutex<Vec<Fields>>>,
}

impl NestedCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one outbound call.
    pub fn append(&self, request: &TargetRequest, response: &TargetResponse) {
        self.push(build_target_fields(request, response));
    }

    pub fn push(&self, fields: Fields) {
        self.calls.lock().push(fields);
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }

    /// Copy of the calls recorded so far, in order.
    pub fn snapshot(&self) -> Vec<Fields> {
        self.calls.lock().clone()
    }

    /// Take the recorded calls, leaving the accumulator empty.
    pub fn take(&self) -> Vec<Fields> {
        std::mem::take(&mut *self.calls.lock())
    }
}
