use crate::models::Config;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("malformed response body: {0}")]
    Decode(String),
    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if err.is_connect() {
            FetchError::Connection(err.to_string())
        } else if let Some(status) = err.status() {
            FetchError::Status(status.as_u16())
        } else if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else {
            FetchError::Request(err.to_string())
        }
    }
}

/// Result of a single request for one entity code.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Payload(Value),
    NoData,
    Failed(FetchError),
}

pub trait Fetch {
    async fn fetch(&self, code: &str) -> FetchOutcome;
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    #[serde(rename = "indicadores")]
    indicators: &'a [String],
    #[serde(rename = "agregado")]
    code: &'a str,
    #[serde(rename = "filtros")]
    filters: Vec<Value>,
    #[serde(rename = "nivel_abaixo")]
    level_below: &'a str,
}

pub struct HttpFetcher {
    client: reqwest::Client,
    api_url: String,
    headers: BTreeMap<String, String>,
    indicators: Vec<String>,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(
        api_url: impl Into<String>,
        headers: BTreeMap<String, String>,
        indicators: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into(),
            headers,
            indicators,
            timeout,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.api_url.clone(),
            config.api_headers.clone(),
            config.indicators.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    async fn request(&self, code: &str) -> Result<Value, FetchError> {
        let body = ApiRequest {
            indicators: &self.indicators,
            code,
            filters: Vec::new(),
            level_below: "0",
        };

        let mut request = self
            .client
            .post(&self.api_url)
            .timeout(self.timeout)
            .json(&body);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let content = response.text().await?;
        serde_json::from_str(&content).map_err(|e| FetchError::Decode(e.to_string()))
    }
}

impl Fetch for HttpFetcher {
    async fn fetch(&self, code: &str) -> FetchOutcome {
        let code = code.trim();
        debug!(code, url = %self.api_url, "requesting entity");

        match self.request(code).await {
            Ok(payload) if is_falsy(&payload) => {
                debug!(code, "empty payload");
                FetchOutcome::NoData
            }
            Ok(payload) => FetchOutcome::Payload(payload),
            Err(e) => {
                warn!(code, error = %e, "fetch failed");
                FetchOutcome::Failed(e)
            }
        }
    }
}

/// Payloads that carry nothing: null, empty containers, empty string, false and zero.
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn server_answering(response: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/consulta"))
            .respond_with(response)
            .mount(&server)
            .await;
        server
    }

    fn fetcher(server: &MockServer, timeout: Duration) -> HttpFetcher {
        HttpFetcher::new(
            format!("{}/consulta", server.uri()),
            BTreeMap::new(),
            vec!["TX_PARTICIPACAO".to_string()],
            timeout,
        )
    }

    #[test]
    fn falsy_payloads() {
        assert!(is_falsy(&json!(null)));
        assert!(is_falsy(&json!({})));
        assert!(is_falsy(&json!([])));
        assert!(is_falsy(&json!("")));
        assert!(is_falsy(&json!(0)));
        assert!(!is_falsy(&json!({"result": []})));
        assert!(!is_falsy(&json!([{"A": 1}])));
    }

    #[tokio::test]
    async fn posts_trimmed_code_with_configured_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/consulta"))
            .and(header("X-Api-Key", "segredo"))
            .and(body_json(json!({
                "indicadores": ["TX_PARTICIPACAO"],
                "agregado": "230010",
                "filtros": [],
                "nivel_abaixo": "0"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"NM_ENTIDADE": "ESCOLA A"}])))
            .expect(1)
            .mount(&server)
            .await;

        let mut headers = BTreeMap::new();
        headers.insert("X-Api-Key".to_string(), "segredo".to_string());
        let fetcher = HttpFetcher::new(
            format!("{}/consulta", server.uri()),
            headers,
            vec!["TX_PARTICIPACAO".to_string()],
            Duration::from_secs(5),
        );

        let outcome = fetcher.fetch(" 230010 ").await;
        assert_eq!(outcome, FetchOutcome::Payload(json!([{"NM_ENTIDADE": "ESCOLA A"}])));
    }

    #[tokio::test]
    async fn successful_response_is_payload() {
        let server = server_answering(
            ResponseTemplate::new(200).set_body_json(json!({"result": [{"NM_ENTIDADE": "ESCOLA A"}]})),
        )
        .await;
        let outcome = fetcher(&server, Duration::from_secs(5)).fetch("230010").await;
        assert_eq!(
            outcome,
            FetchOutcome::Payload(json!({"result": [{"NM_ENTIDADE": "ESCOLA A"}]}))
        );
    }

    #[tokio::test]
    async fn empty_list_is_no_data() {
        let server = server_answering(ResponseTemplate::new(200).set_body_json(json!([]))).await;
        let outcome = fetcher(&server, Duration::from_secs(5)).fetch("23").await;
        assert_eq!(outcome, FetchOutcome::NoData);
    }

    #[tokio::test]
    async fn server_error_is_status_failure() {
        let server = server_answering(ResponseTemplate::new(500)).await;
        let outcome = fetcher(&server, Duration::from_secs(5)).fetch("23").await;
        assert_eq!(outcome, FetchOutcome::Failed(FetchError::Status(500)));
    }

    #[tokio::test]
    async fn malformed_body_is_decode_failure() {
        let server = server_answering(ResponseTemplate::new(200).set_body_string("{not json")).await;
        let outcome = fetcher(&server, Duration::from_secs(5)).fetch("23").await;
        assert!(matches!(outcome, FetchOutcome::Failed(FetchError::Decode(_))));
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let server = server_answering(
            ResponseTemplate::new(200)
                .set_body_json(json!([{"NM_ENTIDADE": "ESCOLA A"}]))
                .set_delay(Duration::from_secs(5)),
        )
        .await;
        let outcome = fetcher(&server, Duration::from_millis(200)).fetch("23").await;
        assert_eq!(outcome, FetchOutcome::Failed(FetchError::Timeout));
    }

    #[tokio::test]
    async fn refused_connection_is_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let fetcher = HttpFetcher::new(
            format!("http://{}/consulta", addr),
            BTreeMap::new(),
            vec!["TX_PARTICIPACAO".to_string()],
            Duration::from_secs(5),
        );
        let outcome = fetcher.fetch("23").await;
        assert!(matches!(outcome, FetchOutcome::Failed(FetchError::Connection(_))));
    }
}
