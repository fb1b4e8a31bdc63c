use crate::backend::{BackendConfig, BackendError};
use crate::format::EcsFormatter;
use crate::{record::LogRecord, sink::BoxError, sink::LogSink};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::Deserialize;
use serde_json::json;

/// Client for the OpenSearch / Elasticsearch bulk API.
///
/// Each record becomes one ECS document indexed into the rolling index
/// derived from [`BackendConfig::index_prefix`].
#[derive(Clone)]
pub struct OpenSearchClient {
    client: Client,
    /// Base URL of the cluster, e.g. "http://localhost:9200".
    base_url: String,
    config: BackendConfig,
    formatter: EcsFormatter,
}

#[derive(Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

impl OpenSearchClient {
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let base_url = normalize_url(&config.url)?;
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.response_timeout)
            .build()?;

        Ok(OpenSearchClient {
            client,
            base_url,
            config,
            formatter: EcsFormatter,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.username {
            Some(user) => request.basic_auth(user, self.config.password.as_deref()),
            None => request,
        }
    }

    fn bulk_body(&self, record: &LogRecord) -> Result<String, serde_json::Error> {
        let action = json!({ "index": { "_index": self.config.index_name(record.timestamp) } });
        let doc = self.formatter.document(record);
        Ok(format!("{}\n{}\n", serde_json::to_string(&action)?, serde_json::to_string(&doc)?))
    }
}

fn normalize_url(raw: &str) -> Result<String, BackendError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(BackendError::MissingUrl);
    }

    let with_scheme = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    };

    let url = Url::parse(&with_scheme).map_err(|e| BackendError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if url.host_str().is_none() {
        return Err(BackendError::InvalidUrl {
            url: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok(with_scheme.trim_end_matches('/').to_string())
}

/// First error reason reported inside a bulk response.
fn first_item_error(items: &[serde_json::Value]) -> Option<String> {
    items
        .iter()
        .filter_map(|item| item.as_object()?.values().next()?.get("error"))
        .map(|error| match error.get("reason").and_then(|r| r.as_str()) {
            Some(reason) => reason.to_string(),
            None => error.to_string(),
        })
        .next()
}

#[async_trait]
impl LogSink for OpenSearchClient {
    async fn send(&self, record: &LogRecord) -> Result<(), BoxError> {
        let body = self.bulk_body(record)?;

        let url = format!("{}/_bulk", self.base_url);
        let resp = self
            .authorize(self.client.post(&url))
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_else(|_| "<no body>".to_string());
            return Err(format!("bulk insert failed with status {}: {}", status, text).into());
        }

        let bulk: BulkResponse = resp.json().await?;
        if bulk.errors {
            let reason = first_item_error(&bulk.items)
                .unwrap_or_else(|| "unknown item error".to_string());
            return Err(format!("bulk insert rejected document: {}", reason).into());
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), BoxError> {
        let url = format!("{}/", self.base_url);
        let resp = self.authorize(self.client.get(&url)).send().await?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(format!("ping failed with status {}", resp.status()).into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> OpenSearchClient {
        let mut config = BackendConfig::new(server.uri());
        config.index_prefix = "svc".to_string();
        OpenSearchClient::new(config).unwrap()
    }

    fn record() -> LogRecord {
        LogRecord::new("INFO", "api").with_message("hello").with_field("requestId", "abc")
    }

    #[test]
    fn scheme_defaults_to_http() {
        assert_eq!(normalize_url("localhost:9200/").unwrap(), "http://localhost:9200");
        assert_eq!(normalize_url("https://es.internal").unwrap(), "https://es.internal");
        assert!(matches!(normalize_url(""), Err(BackendError::MissingUrl)));

        let client = OpenSearchClient::new(BackendConfig::new("es.internal:9200/")).unwrap();
        assert_eq!(client.base_url(), "http://es.internal:9200");
    }

    #[tokio::test]
    async fn ping_reports_reachability() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "name": "node-1" })))
            .mount(&server)
            .await;

        assert!(client(&server).ping().await.is_ok());
    }

    #[tokio::test]
    async fn ping_fails_on_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        assert!(client(&server).ping().await.is_err());
    }

    #[tokio::test]
    async fn send_posts_bulk_document_into_rolling_index() {
        let server = MockServer::start().await;
        let record = record();
        let index = format!("svc-{}", record.timestamp.format("%Y-%m-%d"));
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .and(header("content-type", "application/x-ndjson"))
            .and(body_string_contains(index.as_str()))
            .and(body_string_contains("\"message\":\"hello\""))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "errors": false, "items": [] })),
            )
            .expect(1)
            .mount(&server)
            .await;

        client(&server).send(&record).await.unwrap();
    }

    #[tokio::test]
    async fn rejected_items_are_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": true,
                "items": [{
                    "index": {
                        "status": 400,
                        "error": { "type": "mapper_parsing_exception", "reason": "bad field" }
                    }
                }]
            })))
            .mount(&server)
            .await;

        let err = client(&server).send(&record()).await.unwrap_err();
        assert!(err.to_string().contains("bad field"));
    }

    #[tokio::test]
    async fn credentials_are_sent_as_basic_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = BackendConfig::new(server.uri());
        config.username = Some("elastic".to_string());
        config.password = Some("secret".to_string());
        OpenSearchClient::new(config).unwrap().ping().await.unwrap();
    }
}
