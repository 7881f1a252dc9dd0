//! End-to-end tests: real WebSocket observers, real UDP application.

use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{Value, json};
use sigbridge_server::{BridgeServer, HubConfig, ServerConfig};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn boot_server() -> (String, BridgeServer, SocketAddr) {
    let handle = PrometheusBuilder::new().build_recorder().handle();
    let server = BridgeServer::new(ServerConfig::default(), HubConfig::default(), handle);
    let (addr, _task) = server.listen().await.unwrap();
    (format!("ws://{addr}/ws"), server, addr)
}

/// Connect and consume the `connected` greeting.
async fn connect(url: &str) -> (WsStream, String) {
    let (mut ws, _) = connect_async(url).await.unwrap();
    let hello = read_json(&mut ws).await;
    assert_eq!(hello["event"], "connected");
    let id = hello["observerId"].as_str().unwrap().to_string();
    (ws, id)
}

async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Read until an event named `event` arrives.
async fn read_event(ws: &mut WsStream, event: &str) -> Value {
    loop {
        let v = read_json(ws).await;
        if v["event"] == event {
            return v;
        }
    }
}

async fn command(ws: &mut WsStream, frame: Value) {
    ws.send(Message::text(frame.to_string())).await.unwrap();
}

/// Fake application: listens on an ephemeral port for commands.
async fn fake_app() -> (UdpSocket, u16) {
    let app = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = app.local_addr().unwrap().port();
    (app, port)
}

async fn construct(ws: &mut WsStream, command_port: u16) -> SocketAddr {
    command(
        ws,
        json!({"event": "construct", "params": {"host": "127.0.0.1", "signalPort": 0, "commandPort": command_port}}),
    )
    .await;
    let reply = read_event(ws, "configured").await;
    assert_eq!(reply["commandPort"], command_port);
    reply["signalAddr"].as_str().unwrap().parse().unwrap()
}

async fn recv_datagram(app: &UdpSocket) -> Value {
    let mut buf = vec![0u8; 64 * 1024];
    let (n, _) = timeout(TIMEOUT, app.recv_from(&mut buf))
        .await
        .expect("timeout waiting for datagram")
        .unwrap();
    serde_json::from_slice(&buf[..n]).unwrap()
}

#[tokio::test]
async fn e2e_connected_greeting_has_unique_ids() {
    let (url, server, _) = boot_server().await;
    let (_a, id_a) = connect(&url).await;
    let (_b, id_b) = connect(&url).await;
    assert!(id_a.starts_with("observer_"));
    assert_ne!(id_a, id_b);
    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_two_observers_receive_identical_broadcasts_in_order() {
    let (url, server, _) = boot_server().await;
    let (mut a, _) = connect(&url).await;
    let (mut b, _) = connect(&url).await;
    let (app, port) = fake_app().await;
    let signal_addr = construct(&mut a, port).await;

    for i in 0..3 {
        let datagram = json!({"protocol": 1, "sent": 1000 + i, "signal": "console:log", "seq": i});
        let _ = app
            .send_to(datagram.to_string().as_bytes(), signal_addr)
            .await
            .unwrap();
    }

    for i in 0..3 {
        let ra = read_event(&mut a, "receive").await;
        let rb = read_event(&mut b, "receive").await;
        assert_eq!(ra, rb);
        assert_eq!(ra["msg"]["seq"], i);
        assert_eq!(ra["msg"]["signal"], "console:log");
    }
    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_send_reaches_app_stamped() {
    let (url, server, _) = boot_server().await;
    let (mut ws, _) = connect(&url).await;
    let (app, port) = fake_app().await;
    let _ = construct(&mut ws, port).await;

    command(
        &mut ws,
        json!({"event": "send", "msg": {"signal": "console:in", "cmd": "1+1"}}),
    )
    .await;
    let datagram = recv_datagram(&app).await;
    assert_eq!(datagram["signal"], "console:in");
    assert_eq!(datagram["cmd"], "1+1");
    assert_eq!(datagram["protocol"], 1);
    assert!(datagram["sent"].is_i64());
    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_send_constructed_is_unchanged() {
    let (url, server, _) = boot_server().await;
    let (mut ws, _) = connect(&url).await;
    let (app, port) = fake_app().await;
    let _ = construct(&mut ws, port).await;

    let msg = json!({"protocol": 1, "sent": 42, "signal": "elements:mod", "element": 7});
    command(&mut ws, json!({"event": "send_constructed", "msg": msg})).await;
    assert_eq!(recv_datagram(&app).await, msg);
    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_commands_without_transport_are_rejected() {
    let (url, server, _) = boot_server().await;
    let (mut ws, _) = connect(&url).await;

    command(&mut ws, json!({"event": "send", "msg": {"signal": "x"}})).await;
    let r = read_event(&mut ws, "rejected").await;
    assert_eq!(r["command"], "send");

    command(
        &mut ws,
        json!({"event": "configure", "params": {"signalPort": 0, "commandPort": 9001}}),
    )
    .await;
    let r = read_event(&mut ws, "rejected").await;
    assert_eq!(r["command"], "configure");
    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_rejection_goes_to_issuer_only() {
    let (url, server, _) = boot_server().await;
    let (mut a, _) = connect(&url).await;
    let (mut b, _) = connect(&url).await;

    command(&mut a, json!({"event": "explode"})).await;
    let r = read_event(&mut a, "rejected").await;
    assert_eq!(r["command"], "explode");

    command(&mut b, json!({"event": "status"})).await;
    let next = read_json(&mut b).await;
    assert_eq!(next["event"], "status");
    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_malformed_frame_is_dropped_silently() {
    let (url, server, _) = boot_server().await;
    let (mut ws, _) = connect(&url).await;
    ws.send(Message::text("{nope")).await.unwrap();
    command(&mut ws, json!({"event": "status"})).await;
    // the next frame is the status reply, not an error
    let next = read_json(&mut ws).await;
    assert_eq!(next["event"], "status");
    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_ack_round_trip() {
    let (url, server, _) = boot_server().await;
    let (mut ws, _) = connect(&url).await;
    command(
        &mut ws,
        json!({"event": "ack_request", "requested": 1000, "tag": "probe-1"}),
    )
    .await;
    let ack = read_event(&mut ws, "ack").await;
    assert_eq!(ack["request"]["tag"], "probe-1");
    assert_eq!(ack["request"]["requested"], 1000);
    assert!(ack["responded"].as_i64().unwrap() >= ack["received"].as_i64().unwrap());
    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_reconfigure_moves_inbound_port() {
    let (url, server, _) = boot_server().await;
    let (mut ws, _) = connect(&url).await;
    let (app, port) = fake_app().await;
    let first = construct(&mut ws, port).await;

    command(
        &mut ws,
        json!({"event": "configure", "params": {"signalPort": 0, "commandPort": port}}),
    )
    .await;
    let reply = read_event(&mut ws, "configured").await;
    assert_eq!(reply["host"], "127.0.0.1");
    let second: SocketAddr = reply["signalAddr"].as_str().unwrap().parse().unwrap();
    assert_ne!(first, second);

    let _ = app
        .send_to(br#"{"signal":"net:update","id":1}"#, second)
        .await
        .unwrap();
    let r = read_event(&mut ws, "receive").await;
    assert_eq!(r["msg"]["signal"], "net:update");
    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_app_ping_gets_pong_and_is_relayed() {
    let (url, server, _) = boot_server().await;
    let (mut ws, _) = connect(&url).await;
    let (app, port) = fake_app().await;
    let signal_addr = construct(&mut ws, port).await;

    let _ = app
        .send_to(br#"{"protocol":1,"sent":5,"signal":"misc:ping"}"#, signal_addr)
        .await
        .unwrap();
    let pong = recv_datagram(&app).await;
    assert_eq!(pong["signal"], "misc:pong");

    let r = read_event(&mut ws, "receive").await;
    assert_eq!(r["msg"]["signal"], "misc:ping");
    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_probe_command_reports_status() {
    let (url, server, _) = boot_server().await;
    let (mut ws, _) = connect(&url).await;
    command(
        &mut ws,
        json!({"event": "probe", "params": {"enabled": true, "intervalMs": 500}}),
    )
    .await;
    let status = read_event(&mut ws, "status").await;
    assert_eq!(status["chain"], "app");
    assert_eq!(status["enabled"], true);
    assert_eq!(status["intervalMs"], 500);
    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_observer_disconnect_keeps_transport() {
    let (url, server, _) = boot_server().await;
    let (mut a, _) = connect(&url).await;
    let (app, port) = fake_app().await;
    let signal_addr = construct(&mut a, port).await;
    a.close(None).await.unwrap();
    drop(a);

    let (mut b, _) = connect(&url).await;
    let _ = app
        .send_to(br#"{"signal":"usage:stats"}"#, signal_addr)
        .await
        .unwrap();
    let r = read_event(&mut b, "receive").await;
    assert_eq!(r["msg"]["signal"], "usage:stats");
    assert!(server.hub().transport().is_some());
    server.shutdown().shutdown();
}

#[tokio::test]
async fn e2e_health_over_http() {
    let (url, server, addr) = boot_server().await;
    let (_ws, _) = connect(&url).await;
    let body: Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["observers"], 1);
    server.shutdown().shutdown();
}
