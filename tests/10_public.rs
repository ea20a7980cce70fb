mod common;

use anyhow::Result;
use reqwest::StatusCode;

#[tokio::test]
async fn root_describes_the_service() -> Result<()> {
    let server = common::ensure_server().await?;
    let body: serde_json::Value = reqwest::get(format!("{}/", server.base_url)).await?.json().await?;

    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["name"], "IndCloud API");
    assert!(body["data"]["endpoints"]["health"].is_string());
    Ok(())
}

#[tokio::test]
async fn health_reports_database_and_sessions() -> Result<()> {
    let server = common::ensure_server().await?;
    let res = reqwest::get(format!("{}/health", server.base_url)).await?;
    let status = res.status();
    let body: serde_json::Value = res.json().await?;

    match status {
        StatusCode::OK => {
            assert_eq!(body["data"]["status"], "ok");
            assert_eq!(body["data"]["database"], "ok");
        }
        StatusCode::SERVICE_UNAVAILABLE => {
            assert_eq!(body["success"], false);
            assert_eq!(body["data"]["status"], "degraded");
        }
        other => panic!("unexpected status: {}", other),
    }
    assert!(body["data"]["websocketSessions"].is_u64());
    Ok(())
}

#[tokio::test]
async fn unknown_route_is_404() -> Result<()> {
    let server = common::ensure_server().await?;
    let res = reqwest::get(format!("{}/api/v1/nope", server.base_url)).await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    Ok(())
}
