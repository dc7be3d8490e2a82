//! End-to-end tests over a real broker socket.
//!
//! The test process connects through the proxy crate, so every connection
//! carries this process's credentials; the platform manifest maps our pid to
//! a test application. Multi-application authorization paths are covered by
//! the in-crate server and service tests, where peer identity is injected.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::mpsc;

use msgport_broker::{Broker, BrokerConfig};
use msgport_platform::{AppId, AppRecord, ManifestPlatform};
use msgport_proxy::{DeliveredMessage, MessageCallback, MessagePortProxy, ProxyConfig};
use msgport_wire::Bundle;

const SELF_APP: &str = "com.example.selftest";

fn self_pid() -> i32 {
    std::process::id() as i32
}

fn platform() -> Arc<ManifestPlatform> {
    Arc::new(ManifestPlatform {
        apps: vec![AppRecord {
            app_id: AppId::from(SELF_APP),
            preloaded: false,
            certificate: "cert-self".to_string(),
            pids: vec![self_pid()],
        }],
    })
}

fn start_broker(tmp: &TempDir) -> PathBuf {
    let platform = platform();
    let config = BrokerConfig {
        socket_dir: tmp.path().join("run"),
    };
    let broker = Broker::bind(&config, platform.clone(), platform).unwrap();
    let socket_path = broker.socket_path().to_path_buf();
    tokio::spawn(async move {
        let _ = broker.run().await;
    });
    socket_path
}

async fn connect(socket_path: &PathBuf) -> MessagePortProxy {
    MessagePortProxy::connect(ProxyConfig {
        socket_path: socket_path.clone(),
        app_id: AppId::from(SELF_APP),
        packages: platform(),
    })
    .await
    .unwrap()
}

fn capture() -> (MessageCallback, mpsc::UnboundedReceiver<DeliveredMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let callback: MessageCallback = Arc::new(move |message| {
        let _ = tx.send(message);
    });
    (callback, rx)
}

async fn recv_delivery(rx: &mut mpsc::UnboundedReceiver<DeliveredMessage>) -> DeliveredMessage {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a delivery")
        .expect("delivery channel closed")
}

#[tokio::test]
async fn test_unidirectional_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let socket_path = start_broker(&tmp);
    let proxy = connect(&socket_path).await;

    let (callback, mut delivered) = capture();
    let id = proxy.register_port("p", false, callback).await.unwrap();

    let mut payload = Bundle::new();
    payload.insert("k", "hello");
    proxy
        .send_message(&AppId::from(SELF_APP), "p", false, payload)
        .await
        .unwrap();

    let message = recv_delivery(&mut delivered).await;
    assert_eq!(message.port_id, id);
    assert_eq!(message.peer_app_id, None);
    assert_eq!(message.peer_port, None);
    assert!(!message.trusted_peer);
    assert_eq!(message.bundle.get("k"), Some("hello"));
    assert_eq!(message.bundle.len(), 1, "system keys must be stripped");
}

#[tokio::test]
async fn test_bidirectional_trusted_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let socket_path = start_broker(&tmp);
    let proxy = connect(&socket_path).await;

    let (callback, mut delivered) = capture();
    let id = proxy.register_port("p", true, callback).await.unwrap();

    let mut payload = Bundle::new();
    payload.insert("k", "hi");
    proxy
        .send_bidir_message("q", true, &AppId::from(SELF_APP), "p", true, payload)
        .await
        .unwrap();

    let message = recv_delivery(&mut delivered).await;
    assert_eq!(message.port_id, id);
    assert_eq!(message.peer_app_id.as_deref(), Some(SELF_APP));
    assert_eq!(message.peer_port.as_deref(), Some("q"));
    assert!(message.trusted_peer);
    assert_eq!(message.bundle.get("k"), Some("hi"));
}

#[tokio::test]
async fn test_check_remote_port_existence() {
    let tmp = TempDir::new().unwrap();
    let socket_path = start_broker(&tmp);
    let proxy = connect(&socket_path).await;

    let self_app = AppId::from(SELF_APP);
    assert!(!proxy.check_remote_port(&self_app, "p", false).await.unwrap());

    proxy
        .register_port("p", false, Arc::new(|_| {}))
        .await
        .unwrap();
    assert!(proxy.check_remote_port(&self_app, "p", false).await.unwrap());
    // Registered untrusted only; the trusted namespace is separate.
    assert!(!proxy.check_remote_port(&self_app, "p", true).await.unwrap());
}

#[tokio::test]
async fn test_disconnect_purges_registrations() {
    let tmp = TempDir::new().unwrap();
    let socket_path = start_broker(&tmp);

    let first = connect(&socket_path).await;
    first
        .register_port("p", false, Arc::new(|_| {}))
        .await
        .unwrap();
    first
        .register_port("q", true, Arc::new(|_| {}))
        .await
        .unwrap();
    drop(first);

    // Give the broker a moment to observe the closed channels.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let second = connect(&socket_path).await;
    let self_app = AppId::from(SELF_APP);
    assert!(!second
        .check_remote_port(&self_app, "p", false)
        .await
        .unwrap());
    assert!(!second.check_remote_port(&self_app, "q", true).await.unwrap());
}

#[tokio::test]
async fn test_deliveries_arrive_in_send_order() {
    let tmp = TempDir::new().unwrap();
    let socket_path = start_broker(&tmp);
    let proxy = connect(&socket_path).await;

    let (callback, mut delivered) = capture();
    proxy.register_port("p", false, callback).await.unwrap();

    for seq in 0..10 {
        let mut payload = Bundle::new();
        payload.insert("seq", seq.to_string());
        proxy
            .send_message(&AppId::from(SELF_APP), "p", false, payload)
            .await
            .unwrap();
    }

    for seq in 0..10 {
        let message = recv_delivery(&mut delivered).await;
        assert_eq!(message.bundle.get("seq"), Some(seq.to_string().as_str()));
    }
}

#[tokio::test]
async fn test_stale_socket_is_replaced_on_bind() {
    let tmp = TempDir::new().unwrap();
    let socket_dir = tmp.path().join("run");
    std::fs::create_dir_all(&socket_dir).unwrap();
    std::fs::write(socket_dir.join("message-port-server"), b"stale").unwrap();

    let platform = platform();
    let config = BrokerConfig {
        socket_dir: socket_dir.clone(),
    };
    let broker = Broker::bind(&config, platform.clone(), platform).unwrap();
    let socket_path = broker.socket_path().to_path_buf();
    tokio::spawn(async move {
        let _ = broker.run().await;
    });

    let proxy = connect(&socket_path).await;
    assert!(proxy
        .register_port("p", false, Arc::new(|_| {}))
        .await
        .is_ok());
}
