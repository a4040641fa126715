//! Scripted chat hub server for integration tests.

#![allow(dead_code)]

use std::time::Duration;

use chathub_core::query::{Query, QueryOptions, build_query};
use chathub_core::{ConversationIdentity, SessionConfig};
use futures_util::{SinkExt, StreamExt};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

pub const RS: char = '\u{1e}';

/// One action the server performs after it has read the client's opening
/// handshake, ping and query.
#[derive(Debug, Clone)]
pub enum Step {
    /// Send a text payload as-is
    Send(String),
    /// Read this many more client text frames
    Collect(usize),
    Sleep(Duration),
    /// Send a close frame
    Close(u16, &'static str),
    /// Drop the socket without a close handshake
    Drop,
}

/// What the server saw on one connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Connected { uri: String },
    Text(String),
    Closed(Option<(u16, String)>),
}

/// Bind a local server that plays one script per accepted connection.
pub async fn serve(scripts: Vec<Vec<Step>>) -> (String, mpsc::UnboundedReceiver<Seen>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for script in scripts {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let mut uri = String::new();
            let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                uri = req.uri().to_string();
                Ok(resp)
            };
            let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                continue;
            };
            let _ = tx.send(Seen::Connected { uri });

            let mut opening = 0;
            while opening < 3 {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        let _ = tx.send(Seen::Text(text.as_str().to_string()));
                        opening += 1;
                    }
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }

            let mut dropped = false;
            for step in script {
                match step {
                    Step::Send(payload) => {
                        let _ = ws.send(Message::text(payload)).await;
                    }
                    Step::Collect(n) => {
                        let mut got = 0;
                        while got < n {
                            match ws.next().await {
                                Some(Ok(Message::Text(text))) => {
                                    let _ = tx.send(Seen::Text(text.as_str().to_string()));
                                    got += 1;
                                }
                                Some(Ok(_)) => {}
                                _ => break,
                            }
                        }
                    }
                    Step::Sleep(d) => tokio::time::sleep(d).await,
                    Step::Close(code, reason) => {
                        let _ = ws
                            .send(Message::Close(Some(CloseFrame {
                                code: CloseCode::from(code),
                                reason: reason.into(),
                            })))
                            .await;
                    }
                    Step::Drop => {
                        dropped = true;
                        break;
                    }
                }
            }
            if dropped {
                drop(ws);
                continue;
            }

            // Drain until the client goes away, recording its close frame.
            while let Some(msg) = ws.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let _ = tx.send(Seen::Text(text.as_str().to_string()));
                    }
                    Ok(Message::Close(frame)) => {
                        let _ = tx.send(Seen::Closed(
                            frame.map(|f| (u16::from(f.code), f.reason.as_str().to_string())),
                        ));
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        }
    });

    (format!("ws://{addr}/sydney/ChatHub"), rx)
}

pub fn frame(json: &str) -> String {
    format!("{json}{RS}")
}

pub fn identity() -> ConversationIdentity {
    ConversationIdentity {
        conversation_id: "conv-1".into(),
        client_id: "client-1".into(),
        conversation_signature: "sig-1".into(),
        encrypted_conversation_signature: "enc-token".into(),
    }
}

pub fn query(prompt: &str) -> Query {
    let mut rng = StdRng::seed_from_u64(7);
    build_query(prompt, &identity(), &QueryOptions::default(), &mut rng).unwrap()
}

pub fn session_config(endpoint: &str) -> SessionConfig {
    SessionConfig {
        endpoint: endpoint.to_string(),
        keepalive_interval: Duration::from_secs(15),
        connect_timeout: Duration::from_secs(5),
    }
}

pub fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(item) = rx.try_recv() {
        out.push(item);
    }
    out
}

/// Wait until the server reports the client's close frame (or gives up).
pub async fn wait_for_close(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Vec<Seen> {
    let mut seen = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(event) = rx.recv().await {
            let done = matches!(event, Seen::Closed(_));
            seen.push(event);
            if done {
                break;
            }
        }
    })
    .await;
    seen
}
