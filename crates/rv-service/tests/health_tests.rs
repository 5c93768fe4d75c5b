//! Integration tests for the operational endpoints.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use rv_test_utils::{TestRvServer, TestSession};

#[tokio::test]
async fn test_health_reports_ledger_and_sessions() -> Result<()> {
    let server = TestRvServer::spawn().await?;

    let body: serde_json::Value = reqwest::get(format!("{}/health", server.url()))
        .await?
        .json()
        .await?;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["ledger"], "memory");
    assert_eq!(body["active_sessions"], 0);

    TestSession::create(&server, "cafe", "Alice").await?;

    let body: serde_json::Value = reqwest::get(format!("{}/health", server.url()))
        .await?
        .json()
        .await?;
    assert_eq!(body["active_sessions"], 1);

    Ok(())
}

#[tokio::test]
async fn test_metrics_endpoint_is_public() -> Result<()> {
    let server = TestRvServer::spawn().await?;

    let response = reqwest::get(format!("{}/metrics", server.url())).await?;
    assert_eq!(response.status(), 200);

    Ok(())
}

#[tokio::test]
async fn test_unknown_route_is_404() -> Result<()> {
    let server = TestRvServer::spawn().await?;

    let response = reqwest::get(format!("{}/api/v1/nothing-here", server.url())).await?;
    assert_eq!(response.status(), 404);

    Ok(())
}
