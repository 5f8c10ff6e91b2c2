//! End-to-end tests against a relay bound to an ephemeral port.

use futures_util::{SinkExt, StreamExt};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use websim_relay::{
    notice, BrowserLauncher, HubConfig, RelayServer, ServerConfig, SharedHub, UploadClient,
    CIRCUIT_FILE, SIMULATOR_URL,
};
use websim_symbols::BUILD_OPTIONS_FILE;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Default)]
struct CountingLauncher {
    opened: AtomicUsize,
}

impl BrowserLauncher for CountingLauncher {
    fn open(&self, _url: &str) -> io::Result<()> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn start() -> (SocketAddr, SharedHub, Arc<CountingLauncher>) {
    let config = ServerConfig {
        hub: HubConfig {
            poll_interval: Duration::from_millis(20),
            wait_timeout: Duration::from_millis(400),
            ..HubConfig::default()
        },
        ..ServerConfig::with_port(0)
    };
    let launcher = Arc::new(CountingLauncher::default());
    let server = RelayServer::bind_with_launcher(config, launcher.clone())
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let hub = server.hub();
    tokio::spawn(server.run());
    (addr, hub, launcher)
}

async fn connect(addr: SocketAddr, query: &str) -> Socket {
    let (ws, _) = connect_async(format!("ws://{}/?{}", addr, query))
        .await
        .unwrap();
    ws
}

/// Next text or binary frame, skipping control frames.
async fn next_data(ws: &mut Socket) -> Message {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection ended")
            .unwrap();
        if msg.is_text() || msg.is_binary() {
            return msg;
        }
    }
}

async fn wait_for_browser(hub: &SharedHub) {
    for _ in 0..100 {
        if hub.has_browser().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("no browser designated");
}

#[tokio::test]
async fn test_upload_reaches_browser() {
    let (addr, hub, launcher) = start().await;
    let mut browser = connect(addr, "from=web").await;
    assert_eq!(next_data(&mut browser).await, Message::Text(notice::WELCOME.into()));
    wait_for_browser(&hub).await;

    let dir = tempdir().unwrap();
    let hex = dir.path().join("blink.ino.hex");
    std::fs::write(&hex, [0x3a, 0x10, 0x00, 0x00]).unwrap();

    let mut replies = Vec::new();
    let report = UploadClient::new(addr.port())
        .send_file(&hex, Some("UNO_DBG"), |text| replies.push(text.to_string()))
        .await
        .unwrap();

    assert_eq!(report.bytes, 4);
    assert!(!report.timed_out);
    assert_eq!(report.circuit, None);
    assert_eq!(replies, vec![notice::WELCOME.to_string()]);
    assert_eq!(launcher.opened.load(Ordering::SeqCst), 0);

    assert_eq!(
        next_data(&mut browser).await,
        Message::Text(r#"{"action":"change-board","board":"UNO_DBG"}"#.into())
    );
    assert_eq!(
        next_data(&mut browser).await,
        Message::Binary(vec![0x3a, 0x10, 0x00, 0x00])
    );
}

#[tokio::test]
async fn test_upload_without_browser_times_out() {
    let (addr, _hub, launcher) = start().await;

    let dir = tempdir().unwrap();
    let hex = dir.path().join("blink.ino.hex");
    std::fs::write(&hex, [0u8; 10]).unwrap();

    let mut replies = Vec::new();
    let report = UploadClient::new(addr.port())
        .send_file(&hex, None, |text| replies.push(text.to_string()))
        .await
        .unwrap();

    assert!(report.timed_out);
    assert_eq!(
        replies,
        vec![
            notice::WELCOME.to_string(),
            notice::no_web_client(SIMULATOR_URL),
            notice::WAITING_FOR_BROWSER.to_string(),
            notice::TIMED_OUT.to_string(),
        ]
    );
    assert_eq!(launcher.opened.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_circuit_sent_before_firmware() {
    let (addr, hub, _launcher) = start().await;
    let mut browser = connect(addr, "from=web").await;
    next_data(&mut browser).await;
    wait_for_browser(&hub).await;

    let build = tempdir().unwrap();
    let sketch = tempdir().unwrap();
    let options = serde_json::json!({ "sketchLocation": sketch.path().to_string_lossy() });
    std::fs::write(build.path().join(BUILD_OPTIONS_FILE), options.to_string()).unwrap();
    std::fs::write(sketch.path().join(CIRCUIT_FILE), r#"{"parts":["led"]}"#).unwrap();
    let hex = build.path().join("blink.ino.hex");
    std::fs::write(&hex, [1, 2, 3]).unwrap();

    let report = UploadClient::new(addr.port())
        .send_file(&hex, None, |_| {})
        .await
        .unwrap();

    assert_eq!(report.circuit, Some(sketch.path().join(CIRCUIT_FILE)));
    let circuit = match next_data(&mut browser).await {
        Message::Text(text) => serde_json::from_str::<serde_json::Value>(&text).unwrap(),
        other => panic!("expected circuit text, got {:?}", other),
    };
    assert_eq!(circuit["action"], "load-circuit-json");
    assert_eq!(circuit["data"], r#"{"parts":["led"]}"#);
    assert_eq!(next_data(&mut browser).await, Message::Binary(vec![1, 2, 3]));
}

#[tokio::test]
async fn test_signature_makes_untagged_peer_the_browser() {
    let (addr, hub, _launcher) = start().await;
    let mut tab = connect(addr, "tab=1").await;

    // Untagged peers count as uploaders until they announce themselves.
    assert_eq!(next_data(&mut tab).await, Message::Text(notice::WELCOME.into()));
    assert_eq!(
        next_data(&mut tab).await,
        Message::Text(notice::no_web_client(SIMULATOR_URL))
    );
    tab.send(Message::Text(r#"{"from":"web","ready":true}"#.into()))
        .await
        .unwrap();
    wait_for_browser(&hub).await;

    let dir = tempdir().unwrap();
    let hex = dir.path().join("blink.ino.hex");
    std::fs::write(&hex, [7, 7]).unwrap();

    let report = UploadClient::new(addr.port())
        .send_file(&hex, None, |_| {})
        .await
        .unwrap();

    assert!(!report.timed_out);
    assert_eq!(next_data(&mut tab).await, Message::Binary(vec![7, 7]));
}

#[tokio::test]
async fn test_debug_info_is_broadcast() {
    let (addr, hub, _launcher) = start().await;
    let mut browser = connect(addr, "from=web").await;
    next_data(&mut browser).await;
    wait_for_browser(&hub).await;

    let info = websim_relay::DebugInfo {
        from: "cli".into(),
        breakpoints: vec!["0x1a4".into()],
        sources: vec!["  digitalWrite(13, HIGH);".into()],
    };
    UploadClient::new(addr.port())
        .send_debug_info(&info)
        .await
        .unwrap();

    match next_data(&mut browser).await {
        Message::Text(text) => {
            let parsed: websim_relay::DebugInfo = serde_json::from_str(&text).unwrap();
            assert_eq!(parsed, info);
        }
        other => panic!("expected debug info, got {:?}", other),
    }
}
