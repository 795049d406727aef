//! TransportAdapter against a real echo server.

use futures_util::{SinkExt, StreamExt};
use planebattle_sync::{Frame, ReadyState, TransportAdapter, TransportEvent};
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;

/// Echo every data frame back; close when the client does.
async fn start_echo_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                let (mut tx, mut rx) = ws.split();
                while let Some(Ok(msg)) = rx.next().await {
                    match msg {
                        Message::Binary(_) | Message::Text(_) => {
                            if tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
            });
        }
    });
    format!("ws://{addr}")
}

async fn next_event(rx: &mut UnboundedReceiver<TransportEvent>) -> TransportEvent {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("event within timeout")
        .expect("adapter alive")
}

#[tokio::test]
async fn test_open_then_echo_in_order() {
    let url = start_echo_server().await;
    let mut adapter = TransportAdapter::new(url);
    let (_, mut rx) = adapter.observe();
    adapter.connect().await.unwrap();
    assert_eq!(adapter.ready_state(), ReadyState::Open);
    assert_eq!(next_event(&mut rx).await, TransportEvent::Open);

    for i in 0..50u8 {
        adapter.send(Frame::Binary(vec![i]));
    }
    adapter.send(Frame::Text("done".into()));
    for i in 0..50u8 {
        assert_eq!(next_event(&mut rx).await, TransportEvent::Message(Frame::Binary(vec![i])));
    }
    assert_eq!(
        next_event(&mut rx).await,
        TransportEvent::Message(Frame::Text("done".into()))
    );
}

#[tokio::test]
async fn test_every_observer_sees_every_frame() {
    let url = start_echo_server().await;
    let mut adapter = TransportAdapter::new(url);
    let (_, mut first) = adapter.observe();
    let (_, mut second) = adapter.observe();
    adapter.connect().await.unwrap();

    adapter.send(Frame::Text("a".into()));
    adapter.send(Frame::Text("b".into()));
    for rx in [&mut first, &mut second] {
        assert_eq!(next_event(rx).await, TransportEvent::Open);
        assert_eq!(next_event(rx).await, TransportEvent::Message(Frame::Text("a".into())));
        assert_eq!(next_event(rx).await, TransportEvent::Message(Frame::Text("b".into())));
    }
}

#[tokio::test]
async fn test_unobserved_receiver_gets_nothing_more() {
    let url = start_echo_server().await;
    let mut adapter = TransportAdapter::new(url);
    let (id, mut gone) = adapter.observe();
    let (_, mut kept) = adapter.observe();
    adapter.connect().await.unwrap();
    assert!(adapter.unobserve(id));

    adapter.send(Frame::Binary(vec![7]));
    assert_eq!(next_event(&mut kept).await, TransportEvent::Open);
    assert_eq!(next_event(&mut kept).await, TransportEvent::Message(Frame::Binary(vec![7])));
    assert_eq!(gone.try_recv().ok(), Some(TransportEvent::Open));
    assert!(gone.try_recv().is_err());
}

#[tokio::test]
async fn test_close_emits_once_and_silences_send() {
    let url = start_echo_server().await;
    let mut adapter = TransportAdapter::new(url);
    let (_, mut rx) = adapter.observe();
    adapter.connect().await.unwrap();
    assert_eq!(next_event(&mut rx).await, TransportEvent::Open);

    adapter.close();
    adapter.close();
    assert_eq!(adapter.ready_state(), ReadyState::Closed);
    assert_eq!(next_event(&mut rx).await, TransportEvent::Close);

    adapter.send(Frame::Text("late".into()));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_server_side_close_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _ = ws.close(None).await;
    });

    let mut adapter = TransportAdapter::new(format!("ws://{addr}"));
    let (_, mut rx) = adapter.observe();
    adapter.connect().await.unwrap();
    assert_eq!(next_event(&mut rx).await, TransportEvent::Open);
    assert_eq!(next_event(&mut rx).await, TransportEvent::Close);
    assert!(!adapter.is_open());
}
