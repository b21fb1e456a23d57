use super::common;

use common::test_server::TestServer;
use serde_json::{json, Value};

async fn create(client: &reqwest::Client, server: &TestServer, body: Value) -> String {
    let response = client
        .post(server.url("/connections"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    body["data"]["id"].as_str().unwrap().to_string()
}

fn sqlite(name: &str, path: &str) -> Value {
    json!({
        "name": name,
        "type": "sqlite",
        "provider": "SQLite",
        "database_name": path,
        "tags": ["local"],
    })
}

async fn get_json(client: &reqwest::Client, url: String) -> Value {
    client.get(url).send().await.unwrap().json().await.unwrap()
}

#[tokio::test]
async fn test_forced_check_degrades_and_raises_alert() {
    let server = TestServer::new().await;
    let client = reqwest::Client::new();
    let id = create(&client, &server, sqlite("broken", "/nonexistent/dir/broken.db")).await;

    let response = client
        .post(server.url(&format!("/connections/{}/health-check", id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["connection_id"], id.as_str());
    assert_eq!(body["data"]["result"]["success"], false);

    let connection = get_json(&client, server.url(&format!("/connections/{}", id))).await;
    assert_eq!(connection["data"]["status"], "error");
    assert!(connection["data"]["last_error"].is_string());

    let summary = get_json(&client, server.url("/connections/health-summary")).await;
    assert_eq!(summary["data"]["total_connections"], 1);
    assert_eq!(summary["data"]["error_connections"], 1);
    assert_eq!(summary["data"]["uptime_percentage"], 0.0);

    let alerts = get_json(&client, server.url("/connections/health-alerts?limit=10")).await;
    assert_eq!(alerts["data"]["limit"], 10);
    let entries = alerts["data"]["alerts"].as_array().unwrap();
    assert!(!entries.is_empty());
    assert!(entries.iter().all(|a| a["connection_name"] == "broken"));
    assert!(entries
        .iter()
        .any(|a| a["message"] == "Health check status changed from pending to error"));
}

#[tokio::test]
async fn test_forced_check_activates_healthy_connection() {
    let server = TestServer::new().await;
    let client = reqwest::Client::new();
    let id = create(&client, &server, sqlite("scratch", ":memory:")).await;

    let response = client
        .post(server.url(&format!("/connections/{}/health-check", id)))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["result"]["success"], true);

    let summary = get_json(&client, server.url("/connections/health-summary")).await;
    assert_eq!(summary["data"]["active_connections"], 1);
    assert_eq!(summary["data"]["stale_connections"], 0);
    assert_eq!(summary["data"]["uptime_percentage"], 100.0);

    let logs = get_json(
        &client,
        server.url(&format!("/connections/{}/logs?level=debug", id)),
    )
    .await;
    let logs = logs["data"]["logs"].as_array().unwrap();
    assert_eq!(logs.len(), 1);
    assert!(logs[0]["message"]
        .as_str()
        .unwrap()
        .starts_with("Health check completed"));
}

#[tokio::test]
async fn test_update_evicts_cached_provider() {
    let server = TestServer::new().await;
    let client = reqwest::Client::new();
    let id = create(&client, &server, sqlite("moving", ":memory:")).await;

    let test_url = server.url(&format!("/connections/{}/test", id));
    let body: Value = client.post(&test_url).send().await.unwrap().json().await.unwrap();
    assert_eq!(body["data"]["success"], true);

    let active = get_json(&client, server.url("/connections/active")).await;
    assert_eq!(active["data"]["total"], 1);

    let response = client
        .put(server.url(&format!("/connections/{}", id)))
        .json(&json!({ "database_name": "/nonexistent/dir/moved.db" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let active = get_json(&client, server.url("/connections/active")).await;
    assert_eq!(active["data"]["total"], 0);

    let body: Value = client.post(&test_url).send().await.unwrap().json().await.unwrap();
    assert_eq!(body["data"]["success"], false);

    let connection = get_json(&client, server.url(&format!("/connections/{}", id))).await;
    assert_eq!(connection["data"]["status"], "error");
    assert_eq!(connection["data"]["success_count"], 1);
    assert_eq!(connection["data"]["error_count"], 1);
}

#[tokio::test]
async fn test_listing_filters_and_pagination() {
    let server = TestServer::new().await;
    let client = reqwest::Client::new();
    create(&client, &server, sqlite("orders", ":memory:")).await;
    create(&client, &server, sqlite("orders-archive", ":memory:")).await;
    create(
        &client,
        &server,
        json!({
            "name": "events",
            "type": "api",
            "provider": "Segment",
            "config": { "base_url": "http://127.0.0.1:9" },
        }),
    )
    .await;

    let page = get_json(&client, server.url("/connections?limit=2&page=1")).await;
    assert_eq!(page["data"]["total"], 3);
    assert_eq!(page["data"]["limit"], 2);
    assert_eq!(page["data"]["connections"].as_array().unwrap().len(), 2);

    let page = get_json(&client, server.url("/connections?search=ORDERS")).await;
    assert_eq!(page["data"]["total"], 2);

    let page = get_json(&client, server.url("/connections?type=api")).await;
    assert_eq!(page["data"]["total"], 1);
    assert_eq!(page["data"]["connections"][0]["provider"], "Segment");

    let stats = get_json(&client, server.url("/connections/statistics")).await;
    assert_eq!(stats["data"]["total_connections"], 3);
    assert_eq!(stats["data"]["connections_by_type"]["sqlite"], 2);
    assert_eq!(stats["data"]["connections_by_type"]["snowflake"], 0);
    assert_eq!(stats["data"]["connections_by_status"]["pending"], 3);
}
