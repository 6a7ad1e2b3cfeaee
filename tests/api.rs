// tests/api.rs
use async_trait::async_trait;
use finance_tracker::api::routes;
use finance_tracker::auth::{AuthService, SessionManager};
use finance_tracker::db::MemoryStore;
use finance_tracker::error::QuoteError;
use finance_tracker::models::Quote;
use finance_tracker::quotes::QuoteProvider;
use finance_tracker::trading::TradingEngine;
use finance_tracker::FinanceTracker;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use warp::http::StatusCode;
use warp::{Filter, Reply};

#[derive(Default)]
struct FixedQuotes {
    prices: Mutex<HashMap<String, Decimal>>,
}

impl FixedQuotes {
    fn set(&self, symbol: &str, price: Decimal) {
        self.prices.lock().unwrap().insert(symbol.to_string(), price);
    }
}

#[async_trait]
impl QuoteProvider for FixedQuotes {
    async fn lookup(&self, symbol: &str) -> Result<Quote, QuoteError> {
        let price = self.prices.lock().unwrap().get(symbol).copied();
        match price {
            Some(price) => Ok(Quote {
                symbol: symbol.to_string(),
                name: format!("{} Corp", symbol),
                price,
            }),
            None => Err(QuoteError::NotFound(symbol.to_string())),
        }
    }
}

fn app(
    quotes: Arc<FixedQuotes>,
) -> impl Filter<Extract = impl Reply, Error = std::convert::Infallible> + Clone {
    let store = Arc::new(MemoryStore::new());
    let sessions = SessionManager::new("integration-secret", Duration::from_secs(3600));
    let tracker = FinanceTracker::new(
        AuthService::new(store.clone(), sessions),
        TradingEngine::new(store, quotes),
    );
    routes(Arc::new(tracker))
}

fn body(response: &warp::http::Response<warp::hyper::body::Bytes>) -> Value {
    serde_json::from_slice(response.body()).unwrap()
}

async fn register<F>(api: &F, username: &str) -> String
where
    F: Filter + 'static,
    F::Extract: Reply + Send,
{
    let response = warp::test::request()
        .method("POST")
        .path("/register")
        .json(&json!({
            "username": username,
            "password": "secret1",
            "confirmation": "secret1"
        }))
        .reply(api)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    body(&response)["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn trading_session_end_to_end() {
    let quotes = Arc::new(FixedQuotes::default());
    quotes.set("AAPL", dec!(150.00));
    let api = app(quotes.clone());
    let token = register(&api, "alice").await;
    let bearer = format!("Bearer {}", token);

    let response = warp::test::request()
        .method("POST")
        .path("/buy")
        .header("authorization", &bearer)
        .json(&json!({"symbol": "AAPL", "shares": "10"}))
        .reply(&api)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body(&response)["price"], "1500.00");
    assert_eq!(
        response.headers()["cache-control"],
        "no-cache, no-store, must-revalidate"
    );

    let response = warp::test::request()
        .path("/portfolio")
        .header("authorization", &bearer)
        .reply(&api)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let view = body(&response);
    assert_eq!(view["cash"], "8500.00");
    assert_eq!(view["holdings"][0]["symbol"], "AAPL");
    assert_eq!(view["holdings"][0]["shares"], 10);

    quotes.set("AAPL", dec!(160.00));
    let response = warp::test::request()
        .method("POST")
        .path("/sell")
        .header("authorization", &bearer)
        .json(&json!({"symbol": "AAPL", "shares": 10}))
        .reply(&api)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body(&response)["shares"], -10);

    let response = warp::test::request()
        .path("/history")
        .header("authorization", &bearer)
        .reply(&api)
        .await;
    let history = body(&response);
    assert_eq!(history.as_array().unwrap().len(), 2);
    assert_eq!(history[0]["price"], "1600.00");

    let response = warp::test::request()
        .path("/portfolio")
        .header("authorization", &bearer)
        .reply(&api)
        .await;
    let view = body(&response);
    assert_eq!(view["cash"], "10100.00");
    assert!(view["holdings"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn trade_failures_map_to_statuses() {
    let quotes = Arc::new(FixedQuotes::default());
    quotes.set("TSLA", dec!(200));
    quotes.set("BRK.A", dec!(612000));
    let api = app(quotes);
    let token = register(&api, "bob").await;
    let bearer = format!("Bearer {}", token);

    let cases = [
        ("/sell", json!({"symbol": "TSLA", "shares": "5"}), StatusCode::UNPROCESSABLE_ENTITY),
        ("/buy", json!({"symbol": "BRK.A", "shares": "1"}), StatusCode::UNPROCESSABLE_ENTITY),
        ("/buy", json!({"symbol": "TSLA", "shares": "abc"}), StatusCode::BAD_REQUEST),
        ("/buy", json!({"symbol": "TSLA", "shares": -2}), StatusCode::BAD_REQUEST),
        ("/buy", json!({"symbol": "NOPE", "shares": "1"}), StatusCode::NOT_FOUND),
    ];
    for (path, payload, expected) in cases {
        let response = warp::test::request()
            .method("POST")
            .path(path)
            .header("authorization", &bearer)
            .json(&payload)
            .reply(&api)
            .await;
        assert_eq!(response.status(), expected, "{} {}", path, payload);
        assert_eq!(body(&response)["code"], expected.as_u16());
    }

    let response = warp::test::request()
        .path("/history")
        .header("authorization", &bearer)
        .reply(&api)
        .await;
    assert!(body(&response).as_array().unwrap().is_empty());
}

#[tokio::test]
async fn trading_requires_a_session() {
    let api = app(Arc::new(FixedQuotes::default()));

    let response = warp::test::request().path("/portfolio").reply(&api).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = warp::test::request()
        .method("POST")
        .path("/buy")
        .header("authorization", "Bearer not-a-token")
        .json(&json!({"symbol": "AAPL", "shares": "1"}))
        .reply(&api)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_invalidates_the_token() {
    let api = app(Arc::new(FixedQuotes::default()));
    let token = register(&api, "carol").await;
    let bearer = format!("Bearer {}", token);

    let response = warp::test::request()
        .method("POST")
        .path("/logout")
        .header("authorization", &bearer)
        .reply(&api)
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = warp::test::request()
        .path("/history")
        .header("authorization", &bearer)
        .reply(&api)
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = warp::test::request()
        .method("POST")
        .path("/login")
        .json(&json!({"username": "carol", "password": "secret1"}))
        .reply(&api)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body(&response)["token"].is_string());
}

#[tokio::test]
async fn registration_and_login_errors() {
    let api = app(Arc::new(FixedQuotes::default()));

    let response = warp::test::request()
        .method("POST")
        .path("/register")
        .json(&json!({"username": "ab", "password": "secret1", "confirmation": "secret1"}))
        .reply(&api)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    register(&api, "dave").await;
    let unknown = warp::test::request()
        .method("POST")
        .path("/login")
        .json(&json!({"username": "nobody", "password": "secret1"}))
        .reply(&api)
        .await;
    let wrong = warp::test::request()
        .method("POST")
        .path("/login")
        .json(&json!({"username": "dave", "password": "secret2"}))
        .reply(&api)
        .await;
    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body(&unknown), body(&wrong));

    let response = warp::test::request()
        .method("POST")
        .path("/login")
        .header("content-type", "application/json")
        .body("{not json")
        .reply(&api)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn quote_lookup() {
    let quotes = Arc::new(FixedQuotes::default());
    quotes.set("MSFT", dec!(312.5));
    let api = app(quotes);
    let token = register(&api, "erin").await;

    let response = warp::test::request()
        .path("/quote/msft")
        .header("authorization", format!("Bearer {}", token))
        .reply(&api)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let quote = body(&response);
    assert_eq!(quote["symbol"], "MSFT");
    assert_eq!(quote["price"], "312.5");

    let response = warp::test::request().path("/nowhere").reply(&api).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn quote_symbol_is_percent_decoded() {
    let quotes = Arc::new(FixedQuotes::default());
    quotes.set("BTC/USD", dec!(64250.10));
    let api = app(quotes);
    let token = register(&api, "frank").await;
    let bearer = format!("Bearer {}", token);

    let response = warp::test::request()
        .path("/quote/BTC%2FUSD")
        .header("authorization", &bearer)
        .reply(&api)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body(&response)["symbol"], "BTC/USD");

    let response = warp::test::request()
        .path("/quote/%FF%FE")
        .header("authorization", &bearer)
        .reply(&api)
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
