// src/api.rs
use crate::error::{Error, QuoteError};
use crate::models::SessionToken;
use crate::tracker::FinanceTracker;
use log::{error, info};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

const MAX_BODY_BYTES: u64 = 16 * 1024;

#[derive(Deserialize)]
struct RegisterRequest {
    username: String,
    password: String,
    confirmation: String,
}

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

/// Share counts arrive as form-style text, but plain JSON numbers are accepted too.
#[derive(Deserialize)]
#[serde(untagged)]
enum SharesInput {
    Text(String),
    Number(serde_json::Number),
}

impl SharesInput {
    fn as_text(&self) -> String {
        match self {
            SharesInput::Text(s) => s.clone(),
            SharesInput::Number(n) => n.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct TradeRequest {
    symbol: String,
    shares: SharesInput,
}

#[derive(Serialize)]
struct TokenResponse {
    token: SessionToken,
}

#[derive(Serialize)]
struct ErrorBody {
    code: u16,
    message: String,
}

pub fn routes(
    tracker: Arc<FinanceTracker>,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let register = warp::path!("register")
        .and(warp::post())
        .and(with_tracker(tracker.clone()))
        .and(json_body::<RegisterRequest>())
        .and_then(register_handler);

    let login = warp::path!("login")
        .and(warp::post())
        .and(with_tracker(tracker.clone()))
        .and(json_body::<LoginRequest>())
        .and_then(login_handler);

    let logout = warp::path!("logout")
        .and(warp::post())
        .and(with_token())
        .and(with_tracker(tracker.clone()))
        .and_then(logout_handler);

    let quote = warp::path!("quote" / String)
        .and(warp::get())
        .and(with_token())
        .and(with_tracker(tracker.clone()))
        .and_then(quote_handler);

    let buy = warp::path!("buy")
        .and(warp::post())
        .and(with_token())
        .and(with_tracker(tracker.clone()))
        .and(json_body::<TradeRequest>())
        .and_then(buy_handler);

    let sell = warp::path!("sell")
        .and(warp::post())
        .and(with_token())
        .and(with_tracker(tracker.clone()))
        .and(json_body::<TradeRequest>())
        .and_then(sell_handler);

    let portfolio = warp::path!("portfolio")
        .and(warp::get())
        .and(with_token())
        .and(with_tracker(tracker.clone()))
        .and_then(portfolio_handler);

    let history = warp::path!("history")
        .and(warp::get())
        .and(with_token())
        .and(with_tracker(tracker))
        .and_then(history_handler);

    register
        .or(login)
        .or(logout)
        .or(quote)
        .or(buy)
        .or(sell)
        .or(portfolio)
        .or(history)
        .recover(handle_rejection)
        .with(warp::reply::with::header(
            "cache-control",
            "no-cache, no-store, must-revalidate",
        ))
}

fn with_tracker(
    tracker: Arc<FinanceTracker>,
) -> impl Filter<Extract = (Arc<FinanceTracker>,), Error = Infallible> + Clone {
    warp::any().map(move || tracker.clone())
}

fn json_body<T: serde::de::DeserializeOwned + Send>(
) -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(MAX_BODY_BYTES).and(warp::body::json())
}

/// Extracts the bearer token. A missing or malformed header is `Unauthenticated`.
fn with_token() -> impl Filter<Extract = (SessionToken,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization").and_then(
        |header: Option<String>| async move {
            header
                .as_deref()
                .and_then(|value| value.strip_prefix("Bearer "))
                .map(str::trim)
                .filter(|token| !token.is_empty())
                .map(|token| SessionToken(token.to_string()))
                .ok_or_else(|| warp::reject::custom(Error::Unauthenticated))
        },
    )
}

async fn register_handler(
    tracker: Arc<FinanceTracker>,
    request: RegisterRequest,
) -> Result<impl Reply, Rejection> {
    let token = tracker
        .register(&request.username, &request.password, &request.confirmation)
        .await
        .map_err(warp::reject::custom)?;
    Ok(warp::reply::with_status(
        warp::reply::json(&TokenResponse { token }),
        StatusCode::CREATED,
    ))
}

async fn login_handler(
    tracker: Arc<FinanceTracker>,
    request: LoginRequest,
) -> Result<impl Reply, Rejection> {
    match tracker.login(&request.username, &request.password).await {
        Ok(token) => Ok(warp::reply::json(&TokenResponse { token })),
        Err(e) => {
            info!("Failed login for {}: {}", request.username, e);
            Err(warp::reject::custom(e))
        }
    }
}

async fn logout_handler(
    token: SessionToken,
    tracker: Arc<FinanceTracker>,
) -> Result<impl Reply, Rejection> {
    tracker.logout(&token).await;
    Ok(warp::reply::json(&json!({"message": "Logged out"})))
}

async fn quote_handler(
    symbol: String,
    token: SessionToken,
    tracker: Arc<FinanceTracker>,
) -> Result<impl Reply, Rejection> {
    // warp hands over the raw segment, so `BTC%2FUSD` is still escaped here
    let symbol = percent_decode_str(&symbol).decode_utf8().map_err(|_| {
        warp::reject::custom(Error::Validation("Invalid symbol. Please, try again".into()))
    })?;
    let quote = tracker
        .quote(&token, &symbol)
        .await
        .map_err(warp::reject::custom)?;
    Ok(warp::reply::json(&quote))
}

async fn buy_handler(
    token: SessionToken,
    tracker: Arc<FinanceTracker>,
    request: TradeRequest,
) -> Result<impl Reply, Rejection> {
    let transaction = tracker
        .buy(&token, &request.symbol, &request.shares.as_text())
        .await
        .map_err(warp::reject::custom)?;
    Ok(warp::reply::json(&transaction))
}

async fn sell_handler(
    token: SessionToken,
    tracker: Arc<FinanceTracker>,
    request: TradeRequest,
) -> Result<impl Reply, Rejection> {
    let transaction = tracker
        .sell(&token, &request.symbol, &request.shares.as_text())
        .await
        .map_err(warp::reject::custom)?;
    Ok(warp::reply::json(&transaction))
}

async fn portfolio_handler(
    token: SessionToken,
    tracker: Arc<FinanceTracker>,
) -> Result<impl Reply, Rejection> {
    let view = tracker
        .get_portfolio(&token)
        .await
        .map_err(warp::reject::custom)?;
    Ok(warp::reply::json(&view))
}

async fn history_handler(
    token: SessionToken,
    tracker: Arc<FinanceTracker>,
) -> Result<impl Reply, Rejection> {
    let history = tracker
        .get_history(&token)
        .await
        .map_err(warp::reject::custom)?;
    Ok(warp::reply::json(&history))
}

fn status_of(e: &Error) -> StatusCode {
    match e {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::InvalidCredentials | Error::Unauthenticated => StatusCode::UNAUTHORIZED,
        Error::QuoteUnavailable {
            source: QuoteError::NotFound(_),
            ..
        } => StatusCode::NOT_FOUND,
        Error::QuoteUnavailable { .. } => StatusCode::BAD_GATEWAY,
        Error::InsufficientFunds { .. }
        | Error::InsufficientShares { .. }
        | Error::InvalidQuantity
        | Error::NoSuchHolding(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Storage(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn handle_rejection(rejection: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if let Some(e) = rejection.find::<Error>() {
        let status = status_of(e);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", e);
            (status, "Internal server error. Please, try again".to_string())
        } else {
            (status, e.to_string())
        }
    } else if let Some(e) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, e.to_string())
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large".to_string())
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed".to_string())
    } else {
        error!("Unhandled rejection: {:?}", rejection);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error. Please, try again".to_string(),
        )
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ErrorBody {
            code: status.as_u16(),
            message,
        }),
        status,
    ))
}
