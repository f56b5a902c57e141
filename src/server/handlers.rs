use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::token::TokenRecord;
use crate::config::apps::AppCredential;
use crate::error::TokenError;
use crate::server::server::AppState;

static PARAMS_FAIL_CODE: &str = "params_validate_fail";
static TOKEN_FAIL_CODE: &str = "main:get_token_fail";

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub appid: Option<String>,
    pub appsecret: Option<String>,
}

impl TokenQuery {
    fn credential(&self) -> Option<AppCredential> {
        match (self.appid.as_deref(), self.appsecret.as_deref()) {
            (Some(appid), Some(appsecret)) if !appid.is_empty() && !appsecret.is_empty() => {
                Some(AppCredential::new(appid, appsecret))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenBody {
    pub token: String,
    pub expires_in: u64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

fn bad_request(code: &str, message: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            code: code.to_owned(),
            message,
        }),
    )
        .into_response()
}

fn render(app: &AppCredential, outcome: Result<TokenRecord, TokenError>) -> Response {
    match outcome {
        Ok(record) => Json(TokenBody {
            expires_in: record.remaining_seconds(),
            token: record.value,
        })
        .into_response(),
        Err(err) => {
            warn!("token request for appid {} failed: {}", app.appid, err);
            bad_request(TOKEN_FAIL_CODE, err.to_string())
        }
    }
}

/// `GET /access_token?appid=&appsecret=`
pub async fn get_access_token(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Response {
    let Some(app) = query.credential() else {
        return bad_request(PARAMS_FAIL_CODE, "appid and appsecret are required".to_owned());
    };
    let outcome = state.coordinator.get_token(&app.key()).await;
    render(&app, outcome)
}

/// `GET /new_access_token?appid=&appsecret=`, forces a fetch and waits for it.
pub async fn get_new_access_token(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Response {
    let Some(app) = query.credential() else {
        return bad_request(PARAMS_FAIL_CODE, "appid and appsecret are required".to_owned());
    };
    info!("forced refresh requested for appid {}", app.appid);
    let outcome = state.coordinator.refresh_and_wait(&app.key()).await;
    render(&app, outcome)
}
