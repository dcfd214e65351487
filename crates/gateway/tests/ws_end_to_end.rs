//! End-to-end: a real WebSocket client logs in through a bound gateway
//! and relays frames to a stub game server.

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use gateway::{
    create_router, AppState, ClientRegistry, Config, FleetRegistry, GameServer, StaticAffinity,
};
use protocol::{Frame, LoginReq, LoginResp, MSG_HEARTBEAT, MSG_LOGIN_REQ, MSG_LOGIN_RESP};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

async fn read_frame(stream: &mut TcpStream) -> Frame {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await.unwrap();
    let length = u32::from_be_bytes(header) as usize;

    let mut rest = vec![0u8; length - 4];
    stream.read_exact(&mut rest).await.unwrap();

    let mut buf = BytesMut::with_capacity(length);
    buf.extend_from_slice(&header);
    buf.extend_from_slice(&rest);
    Frame::decode(&mut buf).unwrap().unwrap()
}

#[tokio::test]
async fn full_login_and_relay_over_websocket() {
    // Stub game server.
    let upstream_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_port = upstream_listener.local_addr().unwrap().port();
    let server = Arc::new(GameServer::new(
        "S1".to_string(),
        "127.0.0.1".to_string(),
        upstream_port,
        vec!["mines_pro".to_string()],
        5,
    ));

    let fleet = Arc::new(FleetRegistry::new());
    fleet
        .replace_all(HashMap::from([("S1".to_string(), server)]))
        .await;

    let state = Arc::new(AppState {
        config: Config::from_env(),
        clients: Arc::new(ClientRegistry::new()),
        fleet,
        affinity: Arc::new(StaticAffinity::default()),
    });

    // Gateway bound to an ephemeral port.
    let app = create_router(state.clone());
    let ws_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws_port = ws_listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(
            ws_listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    let (mut ws, _) = timeout(
        WAIT,
        tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{ws_port}/ws")),
    )
    .await
    .unwrap()
    .unwrap();

    // Login. The session ID in the client's frame is deliberately junk;
    // the gateway stamps its own.
    let req = LoginReq {
        loginname: "u1".to_string(),
        token: "tok".to_string(),
        game_type: "mines_pro".to_string(),
        version: 1,
        client_ip: "198.18.0.1".to_string(),
    };
    let login = Frame::new(
        MSG_LOGIN_REQ,
        "junk-session",
        serde_json::to_vec(&req).unwrap(),
    );
    ws.send(Message::Binary(login.encode_to_bytes()))
        .await
        .unwrap();

    let (mut upstream, _) = timeout(WAIT, upstream_listener.accept())
        .await
        .unwrap()
        .unwrap();
    let forwarded = timeout(WAIT, read_frame(&mut upstream)).await.unwrap();
    assert_eq!(forwarded.msg_id, MSG_LOGIN_REQ);
    assert_ne!(forwarded.session_id, "junk-session");
    assert_eq!(forwarded.session_id.len(), protocol::SESSION_ID_LEN);

    let stamped: LoginReq = serde_json::from_slice(&forwarded.payload).unwrap();
    assert_eq!(stamped.client_ip, "127.0.0.1");

    // Accept the login.
    let resp = LoginResp {
        loginname: "u1".to_string(),
        code: 0,
        message: "ok".to_string(),
        info: None,
    };
    let resp_frame = Frame::new(
        MSG_LOGIN_RESP,
        forwarded.session_id.clone(),
        serde_json::to_vec(&resp).unwrap(),
    );
    upstream
        .write_all(&resp_frame.encode_to_bytes())
        .await
        .unwrap();

    let delivered = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
    let Message::Binary(data) = delivered else {
        panic!("expected binary login response");
    };
    let mut buf = BytesMut::from(&data[..]);
    let delivered = Frame::decode(&mut buf).unwrap().unwrap();
    assert_eq!(delivered.msg_id, MSG_LOGIN_RESP);
    let delivered: LoginResp = serde_json::from_slice(&delivered.payload).unwrap();
    assert_eq!(delivered.code, 0);

    // Subsequent frames relay verbatim to the bound server, re-stamped
    // with the gateway session.
    let heartbeat = Frame::new(MSG_HEARTBEAT, "junk-session", &b"ping"[..]);
    ws.send(Message::Binary(heartbeat.encode_to_bytes()))
        .await
        .unwrap();

    let relayed = timeout(WAIT, read_frame(&mut upstream)).await.unwrap();
    assert_eq!(relayed.msg_id, MSG_HEARTBEAT);
    assert_eq!(relayed.session_id, forwarded.session_id);
    assert_eq!(&relayed.payload[..], b"ping");

    ws.close(None).await.unwrap();

    // Client teardown notifies the game server with a ConnClose notice.
    let notice = timeout(WAIT, read_frame(&mut upstream)).await.unwrap();
    assert_eq!(notice.msg_id, protocol::MSG_CONN_CLOSE);
    assert_eq!(notice.session_id, forwarded.session_id);
    assert!(notice.payload.is_empty());
}
