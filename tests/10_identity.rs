mod common;

use anyhow::Result;
use axum::http::{Method, StatusCode};
use serde_json::json;

use common::{token, TestGateway};

#[tokio::test]
async fn health_endpoint_responds() -> Result<()> {
    let gateway = TestGateway::new();
    let (status, body) = gateway.send_raw(Method::GET, "/health", None, String::new()).await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");
    Ok(())
}

#[tokio::test]
async fn root_lists_domain_endpoints() -> Result<()> {
    let gateway = TestGateway::new();
    let (status, body) = gateway.send_raw(Method::GET, "/", None, String::new()).await?;

    assert_eq!(status, StatusCode::OK);
    let endpoints = body["data"]["endpoints"].as_array().expect("endpoints");
    assert!(endpoints.contains(&json!("/api/campaign_ops")));
    assert!(endpoints.contains(&json!("/api/contentmoderation_ops")));
    Ok(())
}

#[tokio::test]
async fn missing_token_is_a_guest() -> Result<()> {
    let gateway = TestGateway::new();

    let (status, _) = gateway.post("campaign_ops", None, json!({"action": "list_campaigns"})).await?;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = gateway
        .post("campaign_ops", None, json!({"action": "create_campaign", "slug": "spring"}))
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHENTICATED");
    assert_eq!(gateway.domain_calls().len(), 1);
    Ok(())
}

#[tokio::test]
async fn invalid_token_degrades_to_guest() -> Result<()> {
    let gateway = TestGateway::new();

    let (status, _) = gateway
        .post("search_ops", Some("not-a-token"), json!({"action": "search", "query": "shoes"}))
        .await?;
    assert_eq!(status, StatusCode::OK);

    let calls = gateway.domain_calls();
    assert!(calls[0].caller.is_guest());
    assert_eq!(calls[0].metadata.audit("search").expect("audit").performed_by, "guest");
    Ok(())
}

#[tokio::test]
async fn token_without_roles_is_not_a_guest() -> Result<()> {
    let gateway = TestGateway::new();
    let bearer = token("u-9", &[]);

    let (status, _) = gateway
        .post("content_ops", Some(&bearer), json!({"action": "add_reaction", "content_id": "c-1"}))
        .await?;
    assert_eq!(status, StatusCode::OK);

    let calls = gateway.domain_calls();
    assert_eq!(calls[0].caller.caller_id(), "u-9");
    assert!(calls[0].caller.roles().is_empty());
    Ok(())
}

#[tokio::test]
async fn token_from_another_secret_is_ignored() -> Result<()> {
    let gateway = TestGateway::new();
    let claims = action_gateway::auth::Claims::new("u-1", vec!["admin".to_string()], 1);
    let forged = action_gateway::auth::generate_jwt(&claims, "some-other-secret")?;

    let (status, _) = gateway
        .post("user_ops", Some(&forged), json!({"action": "list_audit_logs"}))
        .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(gateway.domain_calls().is_empty());
    Ok(())
}
