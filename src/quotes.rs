// src/quotes.rs
use crate::error::QuoteError;
use crate::models::Quote;
use async_trait::async_trait;
use log::{debug, error};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

#[async_trait]
pub trait QuoteProvider: Send + Sync {
    /// Latest close for `symbol`. Partial data is never returned.
    async fn lookup(&self, symbol: &str) -> Result<Quote, QuoteError>;
}

#[derive(Deserialize)]
struct QuoteResponse {
    symbol: Option<String>,
    name: Option<String>,
    close: Option<Value>,
    status: Option<String>,
    code: Option<u16>,
    message: Option<String>,
}

/// Twelve Data `/quote` endpoint.
pub struct TwelveDataClient {
    http: Client,
    base_url: String,
    api_key: String,
}

impl TwelveDataClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, QuoteError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| QuoteError::Provider(e.to_string()))?;
        Ok(TwelveDataClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl QuoteProvider for TwelveDataClient {
    async fn lookup(&self, symbol: &str) -> Result<Quote, QuoteError> {
        if symbol.is_empty() {
            return Err(QuoteError::NotFound(String::new()));
        }
        let url = format!("{}/quote", self.base_url);
        debug!("Fetching quote for {} from provider.", symbol);

        let response = self
            .http
            .get(&url)
            .query(&[("symbol", symbol), ("apikey", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| {
                error!("Quote request for {} failed: {}", symbol, e);
                QuoteError::Provider(e.to_string())
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(QuoteError::NotFound(symbol.to_string()));
        }
        if !status.is_success() {
            error!("Failed to fetch quote for {}: HTTP {}", symbol, status);
            return Err(QuoteError::Provider(format!("HTTP {}", status)));
        }

        let body = response
            .json::<QuoteResponse>()
            .await
            .map_err(|e| QuoteError::Provider(format!("unreadable response: {}", e)))?;
        parse_quote(symbol, body)
    }
}

fn parse_quote(requested: &str, body: QuoteResponse) -> Result<Quote, QuoteError> {
    if let Some(status) = body.status.filter(|s| s != "ok") {
        let message = body.message.unwrap_or(status);
        return match body.code {
            Some(400) | Some(404) => Err(QuoteError::NotFound(requested.to_string())),
            _ => Err(QuoteError::Provider(message)),
        };
    }

    let missing = |field: &str| QuoteError::Provider(format!("response has no {}", field));
    let symbol = body.symbol.ok_or_else(|| missing("symbol"))?;
    let name = body.name.ok_or_else(|| missing("name"))?;
    let price = match body.close.ok_or_else(|| missing("close"))? {
        Value::String(raw) => Decimal::from_str(raw.trim()).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
    .ok_or_else(|| QuoteError::Provider("unparsable close price".into()))?;

    if price.is_sign_negative() {
        return Err(QuoteError::Provider(format!("negative price {}", price)));
    }
    Ok(Quote { symbol, name, price })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> TwelveDataClient {
        TwelveDataClient::new(&server.uri(), "test-key", Duration::from_millis(500)).unwrap()
    }

    #[tokio::test]
    async fn returns_quote_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote"))
            .and(query_param("symbol", "AAPL"))
            .and(query_param("apikey", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "symbol": "AAPL",
                "name": "Apple Inc",
                "exchange": "NASDAQ",
                "close": "150.00"
            })))
            .mount(&server)
            .await;

        let quote = client(&server).lookup("AAPL").await.unwrap();
        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.name, "Apple Inc");
        assert_eq!(quote.price, dec!(150.00));
    }

    #[tokio::test]
    async fn symbol_is_url_encoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote"))
            .and(query_param("symbol", "BRK/A&X"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "symbol": "BRK/A",
                "name": "Berkshire Hathaway",
                "close": 612000.5
            })))
            .mount(&server)
            .await;

        let quote = client(&server).lookup("BRK/A&X").await.unwrap();
        assert_eq!(quote.price, dec!(612000.5));
    }

    #[tokio::test]
    async fn error_status_means_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 404,
                "message": "symbol not found: ZZZZ",
                "status": "error"
            })))
            .mount(&server)
            .await;

        let err = client(&server).lookup("ZZZZ").await.unwrap_err();
        assert_eq!(err, QuoteError::NotFound("ZZZZ".into()));
    }

    #[tokio::test]
    async fn rate_limit_is_a_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": 429,
                "message": "run out of API credits",
                "status": "error"
            })))
            .mount(&server)
            .await;

        let err = client(&server).lookup("AAPL").await.unwrap_err();
        assert_eq!(err, QuoteError::Provider("run out of API credits".into()));
    }

    #[tokio::test]
    async fn http_failure_is_a_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server).lookup("AAPL").await.unwrap_err();
        assert!(matches!(err, QuoteError::Provider(_)));
    }

    #[tokio::test]
    async fn partial_or_negative_data_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote"))
            .and(query_param("symbol", "NONAME"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "symbol": "NONAME",
                "close": "10.00"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/quote"))
            .and(query_param("symbol", "NEG"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "symbol": "NEG",
                "name": "Negative Corp",
                "close": "-1.00"
            })))
            .mount(&server)
            .await;

        let client = client(&server);
        assert!(matches!(
            client.lookup("NONAME").await,
            Err(QuoteError::Provider(_))
        ));
        assert!(matches!(
            client.lookup("NEG").await,
            Err(QuoteError::Provider(_))
        ));
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_secs(2))
                    .set_body_json(serde_json::json!({
                        "symbol": "AAPL",
                        "name": "Apple Inc",
                        "close": "150.00"
                    })),
            )
            .mount(&server)
            .await;

        let err = client(&server).lookup("AAPL").await.unwrap_err();
        assert!(matches!(err, QuoteError::Provider(_)));
    }
}
