use std::time::Duration;

use bus::CommandBus;
use config::ServerConfig;
use futures_util::{SinkExt, StreamExt};
use ingress::IngressService;
use tokio::spawn;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use types::Service;

#[tokio::test]
async fn websocket_command_reaches_the_bus() {
    let bus = CommandBus::new();
    let mut commands = bus.subscribe_commands();

    let config = ServerConfig {
        http_addr: "127.0.0.1".to_string(),
        http_port: 18090,
        ws_addr: "127.0.0.1".to_string(),
        ws_port: 18767,
    };
    let service = std::sync::Arc::new(IngressService::new(bus, config));

    let server_handle = spawn(async move { service.run().await });
    sleep(Duration::from_millis(100)).await;

    let (mut socket, _) = connect_async("ws://127.0.0.1:18767/")
        .await
        .expect("connects");
    socket
        .send(Message::Text(r#"{"type":"recording_start"}"#.to_string()))
        .await
        .expect("send succeeds");

    let command = commands.recv().await.expect("receives command");
    assert_eq!(command.kind, "recording_start");

    socket.close(None).await.ok();
    server_handle.abort();
}

#[tokio::test]
async fn non_object_frame_is_dropped_without_closing_the_socket() {
    let bus = CommandBus::new();
    let mut commands = bus.subscribe_commands();

    let config = ServerConfig {
        http_addr: "127.0.0.1".to_string(),
        http_port: 18091,
        ws_addr: "127.0.0.1".to_string(),
        ws_port: 18768,
    };
    let service = std::sync::Arc::new(IngressService::new(bus, config));

    let server_handle = spawn(async move { service.run().await });
    sleep(Duration::from_millis(100)).await;

    let (mut socket, _) = connect_async("ws://127.0.0.1:18768/")
        .await
        .expect("connects");
    socket
        .send(Message::Text(r#""just a string""#.to_string()))
        .await
        .expect("send succeeds");
    socket
        .send(Message::Text(r#"{"type":"recording_stop"}"#.to_string()))
        .await
        .expect("send succeeds");

    let command = commands.recv().await.expect("receives command");
    assert_eq!(command.kind, "recording_stop");

    socket.close(None).await.ok();
    server_handle.abort();
}
