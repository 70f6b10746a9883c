// Integration tests for the WebSocket streaming transport
//
// The transport connects to the mock backend's socket endpoint; events are
// read back from the channel handed to `open`.

use anyhow::Result;
use futures::StreamExt;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use voicelink::error::TransportError;
use voicelink::http::{create_router, AppState};
use voicelink::transport::{ControlMessage, Outbound, TransportEvent};
use voicelink::{AudioFrame, HandshakeClient, HttpHandshake, StreamTransport, WebSocketTransport};

const WAIT: Duration = Duration::from_secs(3);

async fn start_backend(state: AppState) -> Result<std::net::SocketAddr> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let router = create_router(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(addr)
}

/// Drain events until every sender is gone
async fn drain(events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Result<Vec<TransportEvent>> {
    let mut seen = Vec::new();
    while let Some(event) = tokio::time::timeout(WAIT, events.recv()).await? {
        seen.push(event);
    }
    Ok(seen)
}

async fn next_text(events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Result<String> {
    loop {
        match tokio::time::timeout(WAIT, events.recv()).await? {
            Some(TransportEvent::Message(ControlMessage::ServerEvent { payload })) => {
                return Ok(payload)
            }
            Some(other) => anyhow::bail!("unexpected event: {:?}", other),
            None => anyhow::bail!("event channel closed"),
        }
    }
}

#[tokio::test]
async fn test_stream_round_trip_with_mock_backend() -> Result<()> {
    let state = AppState::new().with_reply_every(2);
    let addr = start_backend(state.clone()).await?;

    let handshake = HttpHandshake::new(
        format!("http://{}/api/realtime-session", addr),
        Duration::from_secs(5),
    )?;
    let session_id = handshake.negotiate(Some(16_000)).await?;

    let transport = WebSocketTransport::new(format!("ws://{}/", addr));
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut connection = transport.open(events_tx).await?;
    assert!(connection.is_open());

    assert!(connection.send(Outbound::Control(ControlMessage::StartSession {
        session_id: session_id.clone(),
    })));
    assert_eq!(next_text(&mut events).await?, "Session started");

    for _ in 0..4 {
        assert!(connection.send(Outbound::Audio(AudioFrame::new(vec![0.25; 512], 16_000))));
    }
    assert_eq!(next_text(&mut events).await?, "Received 2 frames");
    assert_eq!(next_text(&mut events).await?, "Received 4 frames");

    assert!(connection.send(Outbound::Control(ControlMessage::EndSession)));
    assert_eq!(next_text(&mut events).await?, "Session ended");
    connection.close();
    assert!(!connection.is_open());

    // Closed is always the final event
    let last = loop {
        match tokio::time::timeout(WAIT, events.recv()).await? {
            Some(TransportEvent::Closed) => break TransportEvent::Closed,
            Some(_) => continue,
            None => anyhow::bail!("channel ended without a close event"),
        }
    };
    assert_eq!(last, TransportEvent::Closed);

    let sessions = state.sessions.read().await;
    let session = &sessions[&session_id];
    assert_eq!(session.frames_received, 4);
    assert_eq!(session.bytes_received, 4 * 512 * 4);
    assert!(session.ended);
    Ok(())
}

#[tokio::test]
async fn test_send_after_close_is_dropped() -> Result<()> {
    let addr = start_backend(AppState::new()).await?;
    let transport = WebSocketTransport::new(format!("ws://{}/", addr));

    let (events_tx, _events) = mpsc::unbounded_channel();
    let mut connection = transport.open(events_tx).await?;
    connection.close();
    connection.close();

    assert!(!connection.is_open());
    assert!(!connection.send(Outbound::Audio(AudioFrame::new(vec![0.0; 8], 16_000))));
    Ok(())
}

#[tokio::test]
async fn test_connect_failure() -> Result<()> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let transport = WebSocketTransport::new(format!("ws://{}/", addr));
    let (events_tx, _events) = mpsc::unbounded_channel();
    let result = transport.open(events_tx).await;

    assert!(matches!(result, Err(TransportError::ConnectFailed(_))));
    Ok(())
}

#[tokio::test]
async fn test_close_is_bounded_when_peer_never_answers() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (resume_tx, resume_rx) = oneshot::channel::<()>();
    let (ended_tx, ended_rx) = oneshot::channel::<()>();

    // Accepts the upgrade, then neither reads nor replies to the close frame
    tokio::spawn(async move {
        let Ok((tcp, _)) = listener.accept().await else { return };
        let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else { return };
        let _ = resume_rx.await;
        while let Some(Ok(_)) = ws.next().await {}
        let _ = ended_tx.send(());
    });

    let transport = WebSocketTransport::new(format!("ws://{}/", addr))
        .with_close_timeout(Duration::from_millis(100));
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut connection = transport.open(events_tx).await?;

    connection.close();
    drop(connection);

    let closed = tokio::time::timeout(Duration::from_secs(1), events.recv()).await?;
    assert_eq!(closed, Some(TransportEvent::Closed));

    // Both socket tasks are gone, so the event channel ends
    assert!(drain(&mut events).await?.is_empty());

    // The peer sees the socket go away
    let _ = resume_tx.send(());
    tokio::time::timeout(WAIT, ended_rx).await??;
    Ok(())
}

#[tokio::test]
async fn test_peer_dropping_socket_mid_stream() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    // Reads the first message, then drops the socket without a close handshake
    tokio::spawn(async move {
        let Ok((tcp, _)) = listener.accept().await else { return };
        let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else { return };
        let _ = ws.next().await;
        drop(ws);
    });

    let transport = WebSocketTransport::new(format!("ws://{}/", addr));
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut connection = transport.open(events_tx).await?;

    assert!(connection.send(Outbound::Control(ControlMessage::StartSession {
        session_id: "s-1".to_string(),
    })));

    // Keep writing into the dead socket so the writer fails too
    let deadline = tokio::time::Instant::now() + WAIT;
    while connection.is_open() && tokio::time::Instant::now() < deadline {
        connection.send(Outbound::Audio(AudioFrame::new(vec![0.5; 512], 16_000)));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(!connection.is_open());

    connection.close();
    drop(connection);
    let seen = drain(&mut events).await?;

    let errors = seen
        .iter()
        .filter(|e| matches!(e, TransportEvent::Error(_)))
        .count();
    let closes = seen
        .iter()
        .filter(|e| matches!(e, TransportEvent::Closed))
        .count();
    assert!(errors <= 1, "events: {:?}", seen);
    assert_eq!(closes, 1, "events: {:?}", seen);
    assert_eq!(seen.last(), Some(&TransportEvent::Closed));
    Ok(())
}

#[tokio::test]
async fn test_peer_closing_gracefully() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    tokio::spawn(async move {
        let Ok((tcp, _)) = listener.accept().await else { return };
        let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await else { return };
        let _ = ws.close(None).await;
        while let Some(Ok(_)) = ws.next().await {}
    });

    let transport = WebSocketTransport::new(format!("ws://{}/", addr));
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let connection = transport.open(events_tx).await?;

    let closed = tokio::time::timeout(WAIT, events.recv()).await?;
    assert_eq!(closed, Some(TransportEvent::Closed));
    assert!(!connection.is_open());

    drop(connection);
    assert!(drain(&mut events).await?.is_empty());
    Ok(())
}
