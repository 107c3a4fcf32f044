//! End-to-end engine tests over loopback sockets

use std::time::Duration;
use tokio_test::assert_ok;
use termwire::{
    AutoSocketConfig, BinarySettings, DisplaySettings, Endpoint, LinkState, ReconnectPolicy,
    SessionSettings, SocketRole, TcpClientConfig, TerminalMode, TerminalSession, View, XOFF, XON,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

async fn wait_for_state(session: &TerminalSession, target: LinkState, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if session.state() == target {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    session.state() == target
}

async fn wait_for<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

fn client_settings(port: u16) -> SessionSettings {
    SessionSettings::new(
        "itest",
        Endpoint::TcpClient(
            TcpClientConfig::new("127.0.0.1", port).connect_timeout_ms(5_000),
        ),
    )
    .reconnect(ReconnectPolicy::default().initial_delay(Duration::from_millis(50)))
}

#[tokio::test]
async fn text_session_reassembles_lines_and_transmits() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(b"hello\r").await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        stream.write_all(b"\nworld").await.unwrap();
        stream.flush().await.unwrap();

        let mut received = Vec::new();
        while received.len() < 6 {
            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "client hung up early");
            received.extend_from_slice(&buf[..n]);
        }
        received
    });

    let session = TerminalSession::open(client_settings(addr.port())).unwrap();
    assert!(wait_for_state(&session, LinkState::Opened, Duration::from_secs(5)).await);

    // EOL split across two chunks still yields exactly one closed line
    assert!(
        wait_for(
            || {
                let lines = session.snapshot(View::Rx);
                lines.len() == 2 && lines[0].is_closed() && !lines[1].is_closed()
            },
            Duration::from_secs(5)
        )
        .await,
        "rx lines: {:?}",
        session.snapshot(View::Rx)
    );
    let lines = session.snapshot(View::Rx);
    assert_eq!(lines[0].text(), "hello");
    assert_eq!(lines[1].text(), "world");

    tokio_test::assert_ok!(session.transmit("ping\\<CR\\>\\<LF\\>").await);
    assert_eq!(server.await.unwrap(), b"ping\r\n");

    // The transmitted bytes also land in the Tx and Bidir views
    assert!(
        wait_for(
            || session
                .snapshot(View::Tx)
                .first()
                .is_some_and(|l| l.is_closed() && l.text() == "ping"),
            Duration::from_secs(5)
        )
        .await
    );
    assert!(session.line_count(View::Bidir) >= 2);

    session.close();
    assert!(wait_for_state(&session, LinkState::Closed, Duration::from_secs(5)).await);
}

#[tokio::test]
async fn xoff_holds_transmission_until_xon() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(&[XOFF]).await.unwrap();
        stream.flush().await.unwrap();
        ready_rx.await.unwrap();
        stream.write_all(&[XON]).await.unwrap();
        stream.flush().await.unwrap();

        let mut received = Vec::new();
        while received.len() < 4 {
            let mut buf = [0u8; 64];
            let n = stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "client hung up early");
            received.extend_from_slice(&buf[..n]);
        }
        received
    });

    let settings = client_settings(addr.port()).software_flow_control(true);
    let session = TerminalSession::open(settings).unwrap();
    assert!(wait_for_state(&session, LinkState::Opened, Duration::from_secs(5)).await);

    // Wait until the XOFF has been observed, then send: bytes are
    // accepted but held, nothing reaches the wire
    assert!(wait_for(|| session.line_count(View::Rx) > 0, Duration::from_secs(5)).await);
    session.transmit("ab").await.unwrap();
    session.transmit("cd").await.unwrap();
    assert!(wait_for(|| session.flow_pending() == 4, Duration::from_secs(1)).await);

    // Release: everything arrives in original order
    ready_tx.send(()).unwrap();
    assert_eq!(server.await.unwrap(), b"abcd");
    assert_eq!(session.flow_pending(), 0);

    session.close();
}

#[tokio::test]
async fn binary_session_breaks_lines_by_width() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        stream.write_all(&[0x41, 0x42]).await.unwrap();
        stream.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        stream.write_all(&[0x43]).await.unwrap();
        stream.flush().await.unwrap();
        // Keep the peer alive until the client is done looking
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let display = DisplaySettings {
        mode: TerminalMode::Binary,
        binary: BinarySettings::default()
            .line_width(2)
            .idle_flush(None),
        ..DisplaySettings::default()
    };
    let settings = client_settings(addr.port()).display(display);
    let session = TerminalSession::open(settings).unwrap();
    assert!(wait_for_state(&session, LinkState::Opened, Duration::from_secs(5)).await);

    assert!(
        wait_for(
            || {
                let lines = session.snapshot(View::Rx);
                lines.len() == 2 && lines[0].is_closed() && !lines[1].is_closed()
            },
            Duration::from_secs(5)
        )
        .await,
        "rx lines: {:?}",
        session.snapshot(View::Rx)
    );
    let lines = session.snapshot(View::Rx);
    assert_eq!(lines[0].text(), "41 42");
    assert_eq!(lines[1].text(), "43");

    session.close();
    server.abort();
}

#[tokio::test]
async fn auto_socket_session_takes_client_role_when_remote_listens() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accept = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(stream);
    });

    let settings = SessionSettings::new(
        "auto",
        Endpoint::TcpAutoSocket(
            AutoSocketConfig::new("127.0.0.1", addr.port())
                .local_port(0)
                .connect_timeout_ms(2_000),
        ),
    );
    let session = TerminalSession::open(settings).unwrap();

    assert!(wait_for_state(&session, LinkState::Opened, Duration::from_secs(5)).await);
    assert_eq!(session.role().await, Some(SocketRole::Client));

    session.close();
    accept.abort();
}

#[tokio::test]
async fn client_session_reconnects_after_remote_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (reaccepted_tx, reaccepted_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        // First connection: accept and drop straight away
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);
        // Second connection: the reconnect; keep it open
        let (stream, _) = listener.accept().await.unwrap();
        reaccepted_tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(stream);
    });

    let session = TerminalSession::open(client_settings(addr.port())).unwrap();

    // The drop is observed, the policy reconnects, and the link reopens
    tokio::time::timeout(Duration::from_secs(10), reaccepted_rx)
        .await
        .expect("no reconnect within 10s")
        .unwrap();
    assert!(wait_for_state(&session, LinkState::Opened, Duration::from_secs(5)).await);

    session.close();
    server.abort();
}
