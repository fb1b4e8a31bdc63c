use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info};
use search_log_sink::{
    init::init_tracing,
    logger,
    request::{
        build_entry_fields, headers_to_value, resolve_request_id, InboundRequest, InboundResponse,
        NestedCalls, TargetRequest, TargetResponse,
    },
};

#[tokio::main]
async fn main() {
    // Reads LOG_SINK_URL, LOG_SINK_INDEX, LOG_SINK_USERNAME, ...
    // e.g. LOG_SINK_URL=http://localhost:9200 LOG_SINK_INDEX=orders
    let logger = logger();
    init_tracing(logger.clone()).expect("another subscriber is already installed");
    info!(connected = logger.is_connected(), "opensearch backend example started");

    // What a framework adapter does around one handled request.
    let mut inbound = BTreeMap::new();
    inbound.insert("User-Agent".to_string(), "curl/8.5".to_string());
    let request_id = resolve_request_id(&inbound);

    let calls = NestedCalls::new();
    calls.append(
        &TargetRequest {
            url: "http://inventory.local/items/7".to_string(),
            method: "GET".to_string(),
            content_type: String::new(),
            headers: headers_to_value(&[("X-Request-ID", request_id.as_str())][..]),
            body: Vec::new(),
            sent_at: Utc::now(),
        },
        &TargetResponse {
            headers: serde_json::json!({}),
            body: br#"{"id":7,"stock":3}"#.to_vec(),
            status: 200,
            latency: Duration::from_millis(12),
        },
    );

    let request = InboundRequest {
        method: "POST".to_string(),
        url: "/orders".to_string(),
        protocol: "HTTP/1.1".to_string(),
        host: "api.local".to_string(),
        client_ip: "127.0.0.1".to_string(),
        user_agent: "curl/8.5".to_string(),
        content_type: "application/json".to_string(),
        headers: headers_to_value(&inbound),
        body: br#"{"item":7}"#.to_vec(),
        received_at: Utc::now(),
    };
    let response = InboundResponse {
        status: 201,
        headers: serde_json::json!({ "X-Request-ID": request_id }),
        body: br#"{"order":1}"#.to_vec(),
        latency: Duration::from_millis(30),
        user: None,
    };

    let fields = build_entry_fields(&request_id, &request, &response, calls.take());
    logger.info("request handled", fields);
    error!(index = "orders", "simulated error sent via OpenSearch backend");

    tokio::time::sleep(Duration::from_secs(1)).await;
}
