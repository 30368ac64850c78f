//! Browser sessions over real websockets against an in-process server.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clicker_device::{BoxedStream, CommandTable, Connector, DeviceLink, LinkConfig};
use clicker_flow::Participant;
use clicker_relay::server::router;
use clicker_relay::{AppRegistry, ConnectionRegistry, RelayConfig};
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Aggregator that is never reachable.
struct Offline;

#[async_trait]
impl Connector for Offline {
	async fn connect(&self) -> io::Result<BoxedStream> {
		Err(io::Error::new(io::ErrorKind::ConnectionRefused, "offline"))
	}

	fn describe(&self) -> String {
		"offline".to_string()
	}
}

async fn spawn_server() -> SocketAddr {
	let config = RelayConfig {
		roster: vec![Participant::new("a1"), Participant::new("a2")],
		..RelayConfig::default()
	};
	let link = DeviceLink::new(Arc::new(Offline), CommandTable::clicker(), LinkConfig::default());
	let registry = Arc::new(ConnectionRegistry::new(Arc::new(config), link, AppRegistry::builtin()));

	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(async move {
		axum::serve(listener, router(registry).into_make_service())
			.await
			.unwrap();
	});
	addr
}

async fn connect(addr: SocketAddr) -> Socket {
	let (socket, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
	socket
}

async fn send(socket: &mut Socket, frame: Value) {
	socket.send(Message::Text(frame.to_string())).await.unwrap();
}

async fn register(socket: &mut Socket, role: &str, session: &str) {
	send(socket, json!({ "event": "register", "data": { "type": role, "sessionId": session } })).await;
}

/// Payload of the next frame named `event`, skipping others.
async fn expect(socket: &mut Socket, event: &str) -> Value {
	timeout(Duration::from_secs(2), async {
		loop {
			let msg = socket.next().await.expect("socket closed").unwrap();
			let Message::Text(text) = msg else {
				continue;
			};
			let mut frame: Value = serde_json::from_str(&text).unwrap();
			if frame["event"] == event {
				return frame["data"].take();
			}
		}
	})
	.await
	.unwrap_or_else(|_| panic!("timed out waiting for {event}"))
}

#[tokio::test]
async fn viewer_registers_and_gets_the_current_view() {
	let addr = spawn_server().await;
	let mut viewer = connect(addr).await;

	register(&mut viewer, "viewer", "m1").await;

	assert_eq!(expect(&mut viewer, "registered").await, json!({ "type": "viewer", "id": "viewer1" }));
	let view = expect(&mut viewer, "load-view").await;
	assert_eq!(view["view"], "attendance");
	assert_eq!(view["options"]["participants"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn controller_and_viewers_talk_through_the_hub() {
	let addr = spawn_server().await;
	let mut controller = connect(addr).await;
	register(&mut controller, "controller", "m2").await;
	assert_eq!(expect(&mut controller, "registered").await["id"], "controller1");
	assert_eq!(expect(&mut controller, "viewer-list").await, json!({ "viewers": [] }));
	assert_eq!(expect(&mut controller, "app-state").await["current"], "attendance");

	let mut viewer = connect(addr).await;
	register(&mut viewer, "viewer", "m2").await;
	let id = expect(&mut viewer, "registered").await["id"].clone();
	assert_eq!(expect(&mut viewer, "load-view").await["view"], "attendance");
	assert_eq!(expect(&mut controller, "viewer-connect").await, json!({ "id": id }));

	send(
		&mut controller,
		json!({ "event": "app-message", "data": { "viewer": id, "text": "hello" } }),
	)
	.await;
	assert_eq!(expect(&mut viewer, "app-message").await["text"], "hello");

	send(&mut viewer, json!({ "event": "app-message", "data": { "ready": true } })).await;
	let relayed = expect(&mut controller, "app-message").await;
	assert_eq!(relayed["viewer"], id);
	assert_eq!(relayed["data"], json!({ "ready": true }));

	send(&mut controller, json!({ "event": "app-next" })).await;
	let state = expect(&mut controller, "app-state").await;
	assert_eq!(state["current"], "phase");
	assert_eq!(expect(&mut viewer, "load-view").await["view"], "play");

	viewer.close(None).await.unwrap();
	assert_eq!(expect(&mut controller, "viewer-disconnect").await, json!({ "id": id }));
}

#[tokio::test]
async fn unknown_roles_stay_connected_but_unattached() {
	let addr = spawn_server().await;
	let mut socket = connect(addr).await;

	register(&mut socket, "projector", "m3").await;
	send(&mut socket, json!({ "event": "app-next" })).await;
	register(&mut socket, "viewer", "m3").await;

	assert_eq!(expect(&mut socket, "registered").await["type"], "viewer");
}

#[tokio::test]
async fn root_answers_ok() {
	let addr = spawn_server().await;
	let mut stream = TcpStream::connect(addr).await.unwrap();
	stream
		.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
		.await
		.unwrap();

	let mut response = String::new();
	stream.read_to_string(&mut response).await.unwrap();
	assert!(response.starts_with("HTTP/1.1 200"));
	assert!(response.ends_with("OK"));
}
