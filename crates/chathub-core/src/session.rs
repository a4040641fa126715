//! Stream session: one websocket connection serving exactly one turn.
//!
//! The session connects, negotiates the JSON sub-protocol, arms a keep-alive
//! ticker, sends the query and then folds every inbound frame through the
//! codec and the classifier until a terminal status, a transport failure or
//! a cancellation settles the turn.
//!
//! Progress and settlement are kept apart: progress goes out on an ordered
//! channel any number of times, the settlement is the single return value of
//! [`StreamSession::run`].

use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use strum::Display;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::error::{Error as WsError, ProtocolError};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::error::TurnError;
use crate::protocol::{
    HANDSHAKE_FRAME, PING_FRAME, ResultFrame, ServerFrame, TurnStatus, classify, decode_payload,
    encode_frame,
};
use crate::query::Query;
use crate::types::{TurnProgress, TurnResult};

pub const DEFAULT_CHATHUB_URL: &str = "wss://sydney.bing.com/sydney/ChatHub";
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Close code reported when the socket vanished without a close frame.
pub const ABNORMAL_CLOSE: u16 = 1006;

const ACCESS_TOKEN_PARAM: &str = "sec_access_token";

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub endpoint: String,
    pub keepalive_interval: Duration,
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_CHATHUB_URL.to_string(),
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SessionState {
    Idle,
    Handshaking,
    Streaming,
    Finished,
    Failed,
}

/// Optional sinks for everything a turn produces besides its result.
///
/// A dropped receiver is ignored; observers never influence the turn.
#[derive(Debug, Clone, Default)]
pub struct TurnObserver {
    pub progress: Option<mpsc::UnboundedSender<TurnProgress>>,
    pub frames: Option<mpsc::UnboundedSender<ServerFrame>>,
    pub raw: Option<mpsc::UnboundedSender<String>>,
}

impl TurnObserver {
    fn progress(&self, update: TurnProgress) {
        if let Some(tx) = &self.progress {
            let _ = tx.send(update);
        }
    }

    fn frame(&self, frame: &ServerFrame) {
        if let Some(tx) = &self.frames {
            let _ = tx.send(frame.clone());
        }
    }

    fn raw(&self, payload: &str) {
        if let Some(tx) = &self.raw {
            let _ = tx.send(payload.to_string());
        }
    }
}

/// Single-assignment outcome cell. The first settlement wins.
#[derive(Debug, Default)]
struct Settlement(Option<Result<TurnResult, TurnError>>);

impl Settlement {
    fn settle(&mut self, outcome: Result<TurnResult, TurnError>) -> bool {
        if self.0.is_some() {
            trace!("ignoring late settlement");
            return false;
        }
        self.0 = Some(outcome);
        true
    }

    fn is_settled(&self) -> bool {
        self.0.is_some()
    }

    fn get(&self) -> Option<&Result<TurnResult, TurnError>> {
        self.0.as_ref()
    }
}

/// Owns one connection for one turn.
pub struct StreamSession {
    config: SessionConfig,
    access_token: String,
    observer: TurnObserver,
    cancel: CancellationToken,
    state: SessionState,
    status: TurnStatus,
    text: String,
    settlement: Settlement,
}

impl StreamSession {
    pub fn new(config: SessionConfig, access_token: impl Into<String>) -> Self {
        Self {
            config,
            access_token: access_token.into(),
            observer: TurnObserver::default(),
            cancel: CancellationToken::new(),
            state: SessionState::Idle,
            status: TurnStatus::Pending,
            text: String::new(),
            settlement: Settlement::default(),
        }
    }

    pub fn with_observer(mut self, observer: TurnObserver) -> Self {
        self.observer = observer;
        self
    }

    /// Cancelling the token settles the turn as [`TurnError::Cancelled`].
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn status(&self) -> TurnStatus {
        self.status
    }

    /// Best-known partial or final text so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Run the turn to settlement. Calling this again returns the same
    /// outcome without touching the network.
    #[instrument(skip_all, fields(invocation = %query.invocation_id))]
    pub async fn run(&mut self, query: &Query) -> Result<TurnResult, TurnError> {
        if let Some(outcome) = self.settlement.get() {
            return outcome.clone();
        }

        self.drive(query).await;

        match self.settlement.get() {
            Some(outcome) => outcome.clone(),
            None => Err(self.transport_error("session ended without a result")),
        }
    }

    async fn drive(&mut self, query: &Query) {
        self.observer
            .progress(TurnProgress::new(TurnStatus::Pending, ""));

        let query_frame = match encode_frame(query) {
            Ok(frame) => frame,
            Err(err) => {
                let err = self.transport_error(format!("failed to encode query: {err}"));
                self.fail(err);
                return;
            }
        };

        let url = match url::Url::parse_with_params(
            &self.config.endpoint,
            &[(ACCESS_TOKEN_PARAM, self.access_token.as_str())],
        ) {
            Ok(url) => url,
            Err(err) => {
                let err = self.transport_error(format!("invalid endpoint: {err}"));
                self.fail(err);
                return;
            }
        };

        let cancel = self.cancel.clone();
        debug!(endpoint = %self.config.endpoint, "connecting");
        let connect = time::timeout(
            self.config.connect_timeout,
            tokio_tungstenite::connect_async(url.as_str()),
        );
        let ws = tokio::select! {
            _ = cancel.cancelled() => {
                self.fail(TurnError::Cancelled { partial: self.text.clone() });
                return;
            }
            res = connect => match res {
                Ok(Ok((ws, _response))) => ws,
                Ok(Err(err)) => {
                    let err = self.transport_error(format!("connection failed: {err}"));
                    self.fail(err);
                    return;
                }
                Err(_) => {
                    let err = self.transport_error("connection timed out");
                    self.fail(err);
                    return;
                }
            },
        };

        let (mut sink, mut stream) = ws.split();
        self.transition(SessionState::Handshaking);

        if let Err(err) = sink.send(Message::text(HANDSHAKE_FRAME.to_string())).await {
            let err = self.transport_error(format!("handshake failed: {err}"));
            self.fail(err);
            return;
        }
        self.status = TurnStatus::Sending;
        self.observer
            .progress(TurnProgress::new(TurnStatus::Sending, ""));

        if let Err(err) = sink.send(Message::text(PING_FRAME.to_string())).await {
            let err = self.transport_error(format!("handshake failed: {err}"));
            self.fail(err);
            return;
        }

        let period = if self.config.keepalive_interval.is_zero() {
            DEFAULT_KEEPALIVE_INTERVAL
        } else {
            self.config.keepalive_interval
        };
        let mut keepalive = time::interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        if let Err(err) = sink.send(Message::text(query_frame)).await {
            let err = self.transport_error(format!("failed to send query: {err}"));
            self.fail(err);
            return;
        }
        self.transition(SessionState::Streaming);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("turn cancelled");
                    self.fail(TurnError::Cancelled { partial: self.text.clone() });
                    close(&mut sink, CloseCode::Away, "cancelled").await;
                    break;
                }
                msg = stream.next() => {
                    match msg {
                        Some(Ok(Message::Text(payload))) => self.handle_payload(payload.as_str()),
                        Some(Ok(Message::Binary(data))) => {
                            self.handle_payload(&String::from_utf8_lossy(&data));
                        }
                        Some(Ok(Message::Close(frame))) => self.handle_close(frame),
                        Some(Ok(_)) => {}
                        Some(Err(WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake)))
                        | None => self.handle_close(None),
                        Some(Err(err)) => {
                            warn!(%err, "websocket error");
                            let err = self.transport_error(err.to_string());
                            self.fail(err);
                        }
                    }
                    if self.settlement.is_settled() {
                        if self.status.is_terminal() {
                            close(&mut sink, CloseCode::Normal, self.status.as_ref()).await;
                        }
                        break;
                    }
                }
                _ = keepalive.tick() => best_effort_send(&mut sink, PING_FRAME).await,
            }
        }
    }

    /// Classify every frame of one payload in order.
    fn handle_payload(&mut self, payload: &str) {
        self.observer.raw(payload);

        for frame in decode_payload(payload) {
            self.observer.frame(&frame);
            let classified = classify(&frame, self.status);
            if classified.stop_batch {
                trace!("keep-alive frame, skipping rest of batch");
                break;
            }
            let Some(text) = classified.text else {
                continue;
            };

            // Failure text is an error message, never part of the answer.
            let failed = classified.status == TurnStatus::Failed;
            if !failed && !text.is_empty() {
                self.text.clone_from(&text);
            }
            if classified.status != self.status {
                debug!(from = %self.status, to = %classified.status, "turn status changed");
                self.status = classified.status;
            }
            let shown = if failed && !text.is_empty() {
                text.clone()
            } else {
                self.text.clone()
            };
            self.observer
                .progress(TurnProgress::new(classified.status, shown));

            match classified.status {
                TurnStatus::Finished => {
                    let raw = match frame {
                        ServerFrame::Result(result) => *result,
                        _ => ResultFrame::default(),
                    };
                    info!(len = text.len(), "turn finished");
                    self.settle(Ok(TurnResult { text, raw }));
                    break;
                }
                TurnStatus::Failed => {
                    info!(message = %text, "turn failed");
                    let partial = self.text.clone();
                    self.fail(TurnError::Protocol {
                        message: text,
                        partial,
                    });
                    break;
                }
                _ => {}
            }
        }
    }

    fn handle_close(&mut self, frame: Option<CloseFrame>) {
        let (code, reason) = match frame {
            Some(frame) => (u16::from(frame.code), frame.reason.as_str().to_string()),
            None => (ABNORMAL_CLOSE, "connection dropped".to_string()),
        };
        warn!(code, %reason, "websocket closed before the turn finished");
        self.fail(TurnError::Closed {
            code,
            reason,
            partial: self.text.clone(),
        });
    }

    fn transport_error(&self, detail: impl Into<String>) -> TurnError {
        TurnError::Transport {
            detail: detail.into(),
            partial: self.text.clone(),
        }
    }

    fn fail(&mut self, err: TurnError) {
        self.settle(Err(err));
    }

    fn settle(&mut self, outcome: Result<TurnResult, TurnError>) {
        let next = if outcome.is_ok() {
            SessionState::Finished
        } else {
            SessionState::Failed
        };
        if self.settlement.settle(outcome) {
            self.transition(next);
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = %self.state, to = %next, "session state");
        self.state = next;
    }
}

/// Send a frame, discarding any error. Used for keep-alives, where a failure
/// means the socket is busy or already closing.
async fn best_effort_send(sink: &mut WsSink, frame: &str) {
    if let Err(err) = sink.send(Message::text(frame.to_string())).await {
        debug!(%err, "keep-alive send failed");
    }
}

async fn close(sink: &mut WsSink, code: CloseCode, reason: &str) {
    let frame = CloseFrame {
        code,
        reason: reason.to_string().into(),
    };
    if let Err(err) = sink.send(Message::Close(Some(frame))).await {
        debug!(%err, "close frame not sent");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> StreamSession {
        StreamSession::new(SessionConfig::default(), "token")
    }

    fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item);
        }
        out
    }

    fn observed() -> (StreamSession, mpsc::UnboundedReceiver<TurnProgress>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = session().with_observer(TurnObserver {
            progress: Some(tx),
            ..Default::default()
        });
        (session, rx)
    }

    #[test]
    fn test_settlement_first_write_wins() {
        let mut cell = Settlement::default();
        assert!(cell.settle(Err(TurnError::Cancelled {
            partial: String::new()
        })));
        assert!(!cell.settle(Ok(TurnResult {
            text: "late".into(),
            raw: ResultFrame::default(),
        })));
        assert!(matches!(cell.get(), Some(Err(TurnError::Cancelled { .. }))));
    }

    #[test]
    fn test_payload_folds_status_and_text() {
        let (mut s, mut rx) = observed();
        let payload = concat!(
            r#"{"type":1,"arguments":[{"requestId":"r"}]}"#,
            "\u{1e}",
            r#"{"type":1,"arguments":[{"messages":[{"text":"Searching","messageType":"InternalSearchQuery"}]}]}"#,
            "\u{1e}",
            r#"{"type":1,"arguments":[{"messages":[{"text":"Hi","author":"bot"}]}]}"#,
            "\u{1e}",
        );
        s.handle_payload(payload);

        let updates = drain(&mut rx);
        let statuses: Vec<_> = updates.iter().map(|u| u.status).collect();
        assert_eq!(
            statuses,
            [TurnStatus::Delivered, TurnStatus::Searching, TurnStatus::Writing]
        );
        assert_eq!(updates[2].text, "Hi");
        assert_eq!(s.status(), TurnStatus::Writing);
        assert_eq!(s.text(), "Hi");
        assert!(!s.settlement.is_settled());
    }

    #[test]
    fn test_empty_failure_keeps_partial_text() {
        let (mut s, mut rx) = observed();
        s.handle_payload("{\"type\":1,\"arguments\":[{\"messages\":[{\"text\":\"half an ans\"}]}]}\u{1e}");
        s.handle_payload("{\"type\":7,\"error\":\"\"}\u{1e}");

        let last = drain(&mut rx).pop().expect("progress");
        assert_eq!(last, TurnProgress::new(TurnStatus::Failed, "half an ans"));
        match s.settlement.get() {
            Some(Err(TurnError::Protocol { message, partial })) => {
                assert!(message.is_empty());
                assert_eq!(partial, "half an ans");
            }
            other => panic!("unexpected settlement: {other:?}"),
        }
        assert_eq!(s.state(), SessionState::Failed);
    }

    #[test]
    fn test_failure_message_does_not_replace_partial_text() {
        let (mut s, mut rx) = observed();
        s.handle_payload("{\"type\":1,\"arguments\":[{\"messages\":[{\"text\":\"half answer\"}]}]}\u{1e}");
        s.handle_payload("{\"type\":7,\"error\":\"Rate limited\"}\u{1e}");

        let last = drain(&mut rx).pop().expect("progress");
        assert_eq!(last, TurnProgress::new(TurnStatus::Failed, "Rate limited"));
        assert_eq!(s.text(), "half answer");
        match s.settlement.get() {
            Some(Err(TurnError::Protocol { message, partial })) => {
                assert_eq!(message, "Rate limited");
                assert_eq!(partial, "half answer");
            }
            other => panic!("unexpected settlement: {other:?}"),
        }
    }

    #[test]
    fn test_raw_sink_sees_payloads_verbatim() {
        let (tx, mut raw) = mpsc::unbounded_channel();
        let mut s = session().with_observer(TurnObserver {
            raw: Some(tx),
            ..Default::default()
        });
        let cut_short = concat!(
            r#"{"type":6}"#,
            "\u{1e}",
            r#"{"type":1,"arguments":[{"messages":[{"text":"skipped"}]}]}"#,
            "\u{1e}",
        );
        let with_garbage = concat!(
            r#"{"type":1,"arguments":[{"messages":"#,
            "\u{1e}",
            r#"{"type":1,"arguments":[{"messages":[{"text":"kept"}]}]}"#,
            "\u{1e}",
        );
        s.handle_payload(cut_short);
        s.handle_payload(with_garbage);

        assert_eq!(drain(&mut raw), [cut_short, with_garbage]);
        assert_eq!(s.text(), "kept");
        assert_eq!(s.status(), TurnStatus::Writing);
    }

    #[test]
    fn test_ping_stops_only_current_batch() {
        let (mut s, mut rx) = observed();
        s.handle_payload(concat!(
            r#"{"type":6}"#,
            "\u{1e}",
            r#"{"type":1,"arguments":[{"messages":[{"text":"skipped"}]}]}"#,
            "\u{1e}",
        ));
        assert!(drain(&mut rx).is_empty());
        assert_eq!(s.text(), "");

        s.handle_payload("{\"type\":1,\"arguments\":[{\"messages\":[{\"text\":\"seen\"}]}]}\u{1e}");
        assert_eq!(s.text(), "seen");
    }

    #[test]
    fn test_frames_after_settlement_in_same_batch_are_ignored() {
        let (mut s, mut rx) = observed();
        s.handle_payload(concat!(
            r#"{"type":2,"item":{"messages":[{"text":"done"}],"result":{"value":"Success"}}}"#,
            "\u{1e}",
            r#"{"type":7,"error":"too late"}"#,
            "\u{1e}",
        ));
        let updates = drain(&mut rx);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].status, TurnStatus::Finished);
        assert!(matches!(s.settlement.get(), Some(Ok(r)) if r.text == "done"));
        assert_eq!(s.state(), SessionState::Finished);
    }

    #[test]
    fn test_close_after_settlement_does_not_override() {
        let mut s = session();
        s.handle_payload("{\"type\":7,\"error\":\"Rate limited\"}\u{1e}");
        s.handle_close(None);
        assert!(matches!(
            s.settlement.get(),
            Some(Err(TurnError::Protocol { message, .. })) if message == "Rate limited"
        ));
    }

    #[test]
    fn test_abnormal_close_reports_code() {
        let mut s = session();
        s.handle_close(Some(CloseFrame {
            code: CloseCode::Error,
            reason: "internal".to_string().into(),
        }));
        match s.settlement.get() {
            Some(Err(TurnError::Closed { code, reason, .. })) => {
                assert_eq!(*code, 1011);
                assert_eq!(reason, "internal");
            }
            other => panic!("unexpected settlement: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_to_vanished_peer_is_swallowed() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            drop(ws);
        });

        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        server.await.unwrap();
        let (mut sink, _stream) = ws.split();

        // Keep ticking well past the point where writes start failing.
        for _ in 0..5 {
            time::timeout(Duration::from_secs(1), best_effort_send(&mut sink, PING_FRAME))
                .await
                .unwrap();
            time::sleep(Duration::from_millis(20)).await;
        }
        time::timeout(Duration::from_secs(1), close(&mut sink, CloseCode::Normal, "finished"))
            .await
            .unwrap();
    }
}
