use std::time::Duration;

use bus::CommandBus;
use config::ServerConfig;
use ingress::IngressService;
use reqwest::Client;
use tokio::spawn;
use tokio::time::sleep;
use types::Service;

#[tokio::test]
async fn posted_command_reaches_the_bus() {
    let bus = CommandBus::new();
    let mut commands = bus.subscribe_commands();

    let config = ServerConfig {
        http_addr: "127.0.0.1".to_string(),
        http_port: 18080,
        ws_addr: "127.0.0.1".to_string(),
        ws_port: 18765,
    };
    let service = std::sync::Arc::new(IngressService::new(bus, config));

    let server_handle = spawn(async move { service.run().await });
    sleep(Duration::from_millis(100)).await;

    let client = Client::new();
    let response = client
        .post("http://127.0.0.1:18080/")
        .json(&serde_json::json!({ "type": "recording_start" }))
        .send()
        .await
        .expect("request succeeds");
    assert!(response.status().is_success());

    let command = commands.recv().await.expect("receives command");
    assert_eq!(command.kind, "recording_start");

    server_handle.abort();
}

#[tokio::test]
async fn non_object_body_is_rejected() {
    let bus = CommandBus::new();
    let config = ServerConfig {
        http_addr: "127.0.0.1".to_string(),
        http_port: 18081,
        ws_addr: "127.0.0.1".to_string(),
        ws_port: 18766,
    };
    let service = std::sync::Arc::new(IngressService::new(bus, config));

    let server_handle = spawn(async move { service.run().await });
    sleep(Duration::from_millis(100)).await;

    let client = Client::new();
    let response = client
        .post("http://127.0.0.1:18081/")
        .json(&serde_json::json!("not an object"))
        .send()
        .await
        .expect("request succeeds");
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    server_handle.abort();
}
