use crate::state::AppState;
use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Bearer token claims. Tokens are HMAC-SHA512 signed with the configured
/// shared secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub username: String,
    pub exp: u64,
}

pub fn create_token(secret: &str, username: &str, expire_secs: u64) -> anyhow::Result<String> {
    let now = chrono::Utc::now().timestamp() as u64;
    let claims = Claims {
        username: username.to_string(),
        exp: now + expire_secs,
    };
    let token = encode(
        &Header::new(Algorithm::HS512),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok(token)
}

fn auth_error(msg: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        axum::Json(serde_json::json!({ "error": msg })),
    )
        .into_response()
}

/// Verifies HTTP Basic or Bearer credentials when authentication is
/// enabled. Error strings are part of the API contract.
pub async fn auth_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !state.auth.enabled {
        return next.run(req).await;
    }

    let header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let Some(header) = header else {
        return auth_error("unable to parse authentication credentials");
    };

    if let Some(basic) = header.strip_prefix("Basic ") {
        let decoded = match base64::engine::general_purpose::STANDARD.decode(basic) {
            Ok(d) => d,
            Err(_) => return auth_error("unable to parse authentication credentials"),
        };
        let decoded = String::from_utf8_lossy(&decoded).into_owned();
        let Some((username, password)) = decoded.split_once(':') else {
            return auth_error("unable to parse authentication credentials");
        };
        let valid = state
            .auth
            .users
            .iter()
            .any(|u| u.username == username && u.password == password);
        if !valid {
            return auth_error("invalid credentials");
        }
        return next.run(req).await;
    }

    if let Some(token) = header.strip_prefix("Bearer ") {
        let mut validation = Validation::new(Algorithm::HS512);
        validation.leeway = 0;
        match decode::<Claims>(
            token,
            &DecodingKey::from_secret(state.auth.shared_secret.as_bytes()),
            &validation,
        ) {
            Ok(_) => return next.run(req).await,
            Err(e) => {
                return match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                        auth_error("invalid token: Token is expired")
                    }
                    jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                        auth_error("invalid token: signature is invalid")
                    }
                    _ => auth_error("unable to parse authentication credentials"),
                };
            }
        }
    }

    auth_error("unable to parse authentication credentials")
}
