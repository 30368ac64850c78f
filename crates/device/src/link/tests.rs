use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use clicker_protocol::ChoiceEntry;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::sync::Notify;
use tokio::time::timeout;

use super::*;

/// Connector handing out in-memory pipes; the far ends go to the test.
struct PipeConnector {
	calls: AtomicUsize,
	gate: Option<Arc<Notify>>,
	refuse: bool,
	servers: mpsc::UnboundedSender<DuplexStream>,
}

#[async_trait]
impl Connector for PipeConnector {
	async fn connect(&self) -> io::Result<BoxedStream> {
		self.calls.fetch_add(1, Ordering::SeqCst);
		if let Some(gate) = &self.gate {
			gate.notified().await;
		}
		if self.refuse {
			return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
		}
		let (client, server) = tokio::io::duplex(4096);
		let _ = self.servers.send(server);
		Ok(Box::new(client))
	}

	fn describe(&self) -> String {
		"pipe".to_string()
	}
}

struct Harness {
	link: Arc<DeviceLink>,
	connector: Arc<PipeConnector>,
	servers: mpsc::UnboundedReceiver<DuplexStream>,
}

fn harness(gate: Option<Arc<Notify>>, refuse: bool) -> Harness {
	let (tx, servers) = mpsc::unbounded_channel();
	let connector = Arc::new(PipeConnector {
		calls: AtomicUsize::new(0),
		gate,
		refuse,
		servers: tx,
	});
	let config = LinkConfig {
		ping_interval: Duration::from_millis(20),
		..LinkConfig::default()
	};
	let link = DeviceLink::new(connector.clone(), CommandTable::clicker(), config);
	Harness {
		link,
		connector,
		servers,
	}
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<LinkEvent>) -> Option<LinkEvent> {
	timeout(Duration::from_secs(2), rx.recv())
		.await
		.expect("timed out waiting for link event")
}

#[tokio::test]
async fn connect_notifies_listeners_and_queries_status() {
	let mut h = harness(None, false);
	let (tx, mut rx) = mpsc::unbounded_channel();
	h.link.add_listener("m1PSH", tx);

	assert!(h.link.connect().await);
	assert!(h.link.is_connected());
	assert_eq!(next_event(&mut rx).await, Some(LinkEvent::Connected));

	let server = h.servers.recv().await.unwrap();
	let mut lines = BufReader::new(server).lines();
	let first = timeout(Duration::from_secs(2), lines.next_line())
		.await
		.unwrap()
		.unwrap();
	assert_eq!(first.as_deref(), Some("{\"command\":\"status\"}"));
}

#[tokio::test]
async fn concurrent_connects_open_a_single_socket() {
	let gate = Arc::new(Notify::new());
	let h = harness(Some(gate.clone()), false);

	let first = tokio::spawn({
		let link = h.link.clone();
		async move { link.connect().await }
	});
	while !h.link.is_connecting() {
		tokio::task::yield_now().await;
	}

	assert!(!h.link.connect().await, "second attempt must not connect");
	gate.notify_one();
	assert!(first.await.unwrap());

	assert!(h.link.connect().await, "already connected is a no-op success");
	assert_eq!(h.connector.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concatenated_choices_arrive_as_one_event() {
	let mut h = harness(None, false);
	let (tx, mut rx) = mpsc::unbounded_channel();
	h.link.add_listener("m1PSH", tx);
	h.link.connect().await;
	assert_eq!(next_event(&mut rx).await, Some(LinkEvent::Connected));

	let mut server = h.servers.recv().await.unwrap();
	server
		.write_all(br#"{"type":"choices","data":[{"id":"a","choice":"A"}]}{"type":"choices","data":[{"id":"b","choice":"B"}]}"#)
		.await
		.unwrap();

	assert_eq!(
		next_event(&mut rx).await,
		Some(LinkEvent::Device(DeviceEvent::Choices(vec![
			ChoiceEntry::new("a", "A"),
			ChoiceEntry::new("b", "B"),
		])))
	);
}

#[tokio::test]
async fn frame_split_across_reads_is_reassembled() {
	let mut h = harness(None, false);
	let (tx, mut rx) = mpsc::unbounded_channel();
	h.link.add_listener("m1PSH", tx);
	h.link.connect().await;
	next_event(&mut rx).await;

	let mut server = h.servers.recv().await.unwrap();
	server.write_all(br#"{"type":"command","comm"#).await.unwrap();
	server.flush().await.unwrap();
	tokio::time::sleep(Duration::from_millis(10)).await;
	server
		.write_all(br#"and":"enable choices","data":true}"#)
		.await
		.unwrap();

	match next_event(&mut rx).await {
		Some(LinkEvent::Device(DeviceEvent::Command { name, token, .. })) => {
			assert_eq!(name.as_deref(), Some("enableChoices"));
			assert_eq!(token, "enable choices");
		}
		other => panic!("expected command event, got {other:?}"),
	}
}

#[tokio::test]
async fn socket_failure_disconnects_exactly_once() {
	let mut h = harness(None, false);
	let (tx, mut rx) = mpsc::unbounded_channel();
	h.link.add_listener("m1PSH", tx);
	h.link.connect().await;
	assert_eq!(next_event(&mut rx).await, Some(LinkEvent::Connected));

	let server = h.servers.recv().await.unwrap();
	drop(server);

	assert_eq!(next_event(&mut rx).await, Some(LinkEvent::Disconnected));
	// listener was reset, so its sender is gone and nothing else arrives
	assert_eq!(next_event(&mut rx).await, None);
	assert!(!h.link.is_connected());
	assert!(!h.link.is_listening("m1PSH"));
}

#[tokio::test]
async fn refused_connection_notifies_disconnected() {
	let h = harness(None, true);
	let (tx, mut rx) = mpsc::unbounded_channel();
	h.link.add_listener("m1PSH", tx);

	assert!(!h.link.connect().await);
	assert_eq!(next_event(&mut rx).await, Some(LinkEvent::Disconnected));
	assert!(!h.link.is_connecting());
	assert!(!h.link.is_listening("m1PSH"));
}

#[tokio::test]
async fn send_requires_connection_and_known_command() {
	let h = harness(None, false);
	assert!(!h.link.send(crate::commands::ENABLE_CHOICES, &[]));

	h.link.connect().await;
	assert!(h.link.send(crate::commands::ENABLE_CHOICES, &[]));
	assert!(!h.link.send("selfDestruct", &[]));
}

#[tokio::test]
async fn attach_reuses_the_live_socket() {
	let mut h = harness(None, false);
	let (tx1, mut rx1) = mpsc::unbounded_channel();
	assert_eq!(h.link.attach("m1PSH", &tx1).await, Attach::Started);
	assert_eq!(next_event(&mut rx1).await, Some(LinkEvent::Connected));
	assert_eq!(h.link.attach("m1PSH", &tx1).await, Attach::AlreadyAttached);

	let (tx2, mut rx2) = mpsc::unbounded_channel();
	assert_eq!(h.link.attach("m2PSH", &tx2).await, Attach::Attached);
	assert_eq!(next_event(&mut rx2).await, Some(LinkEvent::Connected));
	assert_eq!(h.connector.calls.load(Ordering::SeqCst), 1);

	let mut server = h.servers.recv().await.unwrap();
	server
		.write_all(br#"{"type":"choices","data":[{"id":"z","choice":"E"}]}"#)
		.await
		.unwrap();
	let expected = Some(LinkEvent::Device(DeviceEvent::Choices(vec![ChoiceEntry::new("z", "E")])));
	assert_eq!(next_event(&mut rx1).await, expected);
	assert_eq!(next_event(&mut rx2).await, expected);
}

#[tokio::test]
async fn health_check_pings_while_connected() {
	let mut h = harness(None, false);
	h.link.connect().await;
	let task = h.link.spawn_health_check();

	let server = h.servers.recv().await.unwrap();
	let mut lines = BufReader::new(server).lines();
	let mut saw_ping = false;
	for _ in 0..3 {
		let line = timeout(Duration::from_secs(2), lines.next_line())
			.await
			.unwrap()
			.unwrap();
		if line.as_deref() == Some("{\"command\":\"ping\"}") {
			saw_ping = true;
			break;
		}
	}
	assert!(saw_ping);
	task.abort();
}

#[tokio::test]
async fn disconnect_is_idempotent() {
	let h = harness(None, false);
	let (tx, mut rx) = mpsc::unbounded_channel();
	h.link.add_listener("m1PSH", tx);
	h.link.connect().await;
	next_event(&mut rx).await;

	h.link.disconnect();
	h.link.disconnect();
	assert_eq!(next_event(&mut rx).await, Some(LinkEvent::Disconnected));
	assert_eq!(next_event(&mut rx).await, None);
}

#[tokio::test]
async fn zero_ping_interval_keeps_the_health_check_alive() {
	let (tx, mut servers) = mpsc::unbounded_channel();
	let connector = Arc::new(PipeConnector {
		calls: AtomicUsize::new(0),
		gate: None,
		refuse: false,
		servers: tx,
	});
	let config = LinkConfig {
		ping_interval: Duration::ZERO,
		..LinkConfig::default()
	};
	let link = DeviceLink::new(connector, CommandTable::clicker(), config);
	link.connect().await;
	let task = link.spawn_health_check();

	let server = servers.recv().await.unwrap();
	let mut lines = BufReader::new(server).lines();
	let ping = timeout(Duration::from_secs(2), async {
		loop {
			let line = lines.next_line().await.unwrap();
			if line.as_deref() == Some("{\"command\":\"ping\"}") {
				break;
			}
		}
	})
	.await;
	assert!(ping.is_ok());
	assert!(!task.is_finished());
	task.abort();
}
