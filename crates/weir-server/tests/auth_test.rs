mod common;

use common::TestServer;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::json;

const SECRET: &str = "super secret key";

async fn auth_server() -> TestServer {
    TestServer::start_with(|c| {
        c.auth.enabled = true;
        c.auth.shared_secret = SECRET.to_string();
        c.auth.users = vec![weir_server::config::UserConfig {
            username: "bob".to_string(),
            password: "bob's secure password".to_string(),
        }];
    })
    .await
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_credentials_fail_to_parse() {
    let s = auth_server().await;
    let resp = s.client.get(s.url("/weir/v1/tasks")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "unable to parse authentication credentials");
}

#[tokio::test(flavor = "multi_thread")]
async fn basic_credentials_grant_access() {
    let s = auth_server().await;
    let resp = s
        .client
        .get(s.url("/weir/v1/tasks"))
        .basic_auth("bob", Some("bob's secure password"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = s
        .client
        .get(s.url("/weir/v1/tasks"))
        .basic_auth("bob", Some("wrong password"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test(flavor = "multi_thread")]
async fn bearer_token_grants_access() {
    let s = auth_server().await;
    let token = weir_server::auth::create_token(SECRET, "bob", 600).unwrap();
    let resp = s
        .client
        .get(s.url("/weir/v1/tasks"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test(flavor = "multi_thread")]
async fn bearer_token_with_bad_signature_is_rejected() {
    let s = auth_server().await;
    let token = weir_server::auth::create_token("wrong secret", "bob", 600).unwrap();
    let resp = s
        .client
        .get(s.url("/weir/v1/tasks"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "invalid token: signature is invalid");
}

#[tokio::test(flavor = "multi_thread")]
async fn expired_bearer_token_is_rejected() {
    let s = auth_server().await;
    let claims = json!({
        "username": "bob",
        "exp": chrono::Utc::now().timestamp() - 10 * 60,
    });
    let token = encode(
        &Header::new(Algorithm::HS512),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();
    let resp = s
        .client
        .get(s.url("/weir/v1/tasks"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "invalid token: Token is expired");
}

#[tokio::test(flavor = "multi_thread")]
async fn ping_stays_reachable_without_credentials() {
    let s = auth_server().await;
    let resp = s.client.get(s.url("/weir/v1/ping")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
}
