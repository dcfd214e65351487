//! Fleet reconciliation behavior when a server leaves the snapshot.

use gateway::{upstream, ClientRegistry, FleetRegistry, GameServer};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn dropped_server_closes_once_and_reader_exits() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = Arc::new(GameServer::new(
        "S1".to_string(),
        "127.0.0.1".to_string(),
        port,
        vec!["mines_pro".to_string()],
        1,
    ));

    let fleet = Arc::new(FleetRegistry::new());
    fleet
        .replace_all(HashMap::from([("S1".to_string(), server.clone())]))
        .await;

    let clients = Arc::new(ClientRegistry::new());
    let (read_half, closed_rx) = server.connect().await.unwrap();
    let reader = tokio::spawn(upstream::run_reader(
        server.clone(),
        read_half,
        closed_rx,
        clients.clone(),
    ));

    let (mut accepted, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    assert!(server.is_connected());

    // Next discovery snapshot no longer lists S1.
    fleet.replace_all(HashMap::new()).await;

    assert!(fleet.get("S1").await.is_none());
    assert_eq!(fleet.len().await, 0);
    assert!(!server.is_connected());

    // The reader task stops on the shutdown signal.
    timeout(WAIT, reader).await.unwrap().unwrap();

    // The write half was dropped, so the stub sees EOF.
    let mut buf = [0u8; 16];
    let n = timeout(WAIT, accepted.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(n, 0);

    // The connection can only be torn down once; a second close is a no-op.
    assert!(!server.close_conn().await);
}

#[tokio::test]
async fn surviving_server_keeps_its_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = Arc::new(GameServer::new(
        "S1".to_string(),
        "127.0.0.1".to_string(),
        port,
        vec!["mines_pro".to_string()],
        1,
    ));
    let fleet = Arc::new(FleetRegistry::new());
    fleet
        .replace_all(HashMap::from([("S1".to_string(), server.clone())]))
        .await;

    let clients = Arc::new(ClientRegistry::new());
    upstream::ensure_connected(&server, &clients).await.unwrap();
    let _accepted = timeout(WAIT, listener.accept()).await.unwrap().unwrap();

    // A refresh that still lists S1 carries the live connection over.
    fleet
        .replace_all(HashMap::from([("S1".to_string(), server.clone())]))
        .await;
    assert!(server.is_connected());
    assert!(fleet.get("S1").await.is_some());
}
