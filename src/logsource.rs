//! Live log subscription
//!
//! Maintains a `logsSubscribe` websocket against the RPC node, mentioning
//! the launchpad program at `processed` commitment. Connection loss is never
//! fatal: the task reconnects with exponential backoff (1s floor) until the
//! shutdown token fires. Frames that carry a transaction error are dropped
//! at this boundary so downstream only ever sees successful transactions.

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

/// One successful transaction's worth of log lines.
#[derive(Debug, Clone)]
pub struct LogFrame {
    pub slot: u64,
    pub signature: String,
    pub logs: Vec<String>,
}

#[derive(Deserialize)]
struct RpcMessage {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    params: Option<RpcParams>,
}

#[derive(Deserialize)]
struct RpcParams {
    result: RpcResult,
}

#[derive(Deserialize)]
struct RpcResult {
    context: RpcContext,
    value: RpcValue,
}

#[derive(Deserialize)]
struct RpcContext {
    slot: u64,
}

#[derive(Deserialize)]
struct RpcValue {
    signature: String,
    err: Option<serde_json::Value>,
    logs: Vec<String>,
}

/// Reconnect pacing: doubles from `initial` up to `max`, reset after a
/// connection that actually delivered frames.
#[derive(Debug)]
pub struct ExponentialBackoff {
    initial_delay: u64,
    max_delay: u64,
    current_attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(initial: u64, max: u64) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max,
            current_attempt: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let exp = self.initial_delay.saturating_mul(1u64 << self.current_attempt.min(16));
        let delay = exp.min(self.max_delay);
        self.current_attempt = self.current_attempt.saturating_add(1);
        Duration::from_secs(delay)
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }
}

/// Run the subscription until cancelled.
///
/// Frames are pushed into `tx`; a full queue applies backpressure to the
/// socket rather than dropping frames.
pub async fn subscribe_logs(
    ws_url: String,
    program: String,
    tx: mpsc::Sender<LogFrame>,
    cancel: CancellationToken,
) {
    let mut backoff = ExponentialBackoff::new(1, 30);

    while !cancel.is_cancelled() {
        match connect_async(&ws_url).await {
            Ok((stream, _)) => {
                log::info!("📡 Connected to log stream, subscribing to {}", program);
                match run_subscription(stream, &program, &tx, &cancel).await {
                    Ok(frames) => {
                        if frames > 0 {
                            backoff.reset();
                        }
                        log::warn!("Log stream closed after {} frames", frames);
                    }
                    Err(e) => log::error!("❌ Log stream error: {}", e),
                }
            }
            Err(e) => log::error!("❌ Failed to connect to {}: {}", ws_url, e),
        }

        let delay = backoff.next_delay();
        log::warn!("⏳ Reconnecting in {}s", delay.as_secs());
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(delay) => {}
        }
    }

    log::info!("Log source stopped");
}

async fn run_subscription(
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    program: &str,
    tx: &mpsc::Sender<LogFrame>,
    cancel: &CancellationToken,
) -> Result<u64, tokio_tungstenite::tungstenite::Error> {
    let (mut sink, mut source) = stream.split();

    let request = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "logsSubscribe",
        "params": [
            {"mentions": [program]},
            {"commitment": "processed"}
        ]
    });
    sink.send(Message::Text(request.to_string())).await?;

    let mut ping_timer = interval(Duration::from_secs(5));
    let mut delivered = 0u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return Ok(delivered);
            }
            _ = ping_timer.tick() => {
                sink.send(Message::Ping(Vec::new())).await?;
            }
            message = source.next() => {
                let message = match message {
                    Some(m) => m?,
                    None => return Ok(delivered),
                };
                match message {
                    Message::Text(text) => {
                        if let Some(frame) = parse_frame(&text) {
                            delivered += 1;
                            if tx.send(frame).await.is_err() {
                                // Dispatcher gone, nothing left to feed.
                                return Ok(delivered);
                            }
                        }
                    }
                    Message::Ping(payload) => {
                        sink.send(Message::Pong(payload)).await?;
                    }
                    Message::Close(_) => return Ok(delivered),
                    _ => {}
                }
            }
        }
    }
}

/// Parse one websocket text message into a frame.
///
/// Returns `None` for the subscription confirmation, malformed messages,
/// and frames whose transaction failed (`err` non-null).
fn parse_frame(text: &str) -> Option<LogFrame> {
    let message: RpcMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            log::debug!("Unparsable log message: {}", e);
            return None;
        }
    };

    if message.result.is_some() {
        log::info!("✅ Log subscription confirmed");
        return None;
    }

    let result = message.params?.result;
    if result.value.err.is_some() {
        return None;
    }

    Some(LogFrame {
        slot: result.context.slot,
        signature: result.value.signature,
        logs: result.value.logs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_notification_frame() {
        let text = r#"{
            "jsonrpc": "2.0",
            "method": "logsNotification",
            "params": {
                "result": {
                    "context": {"slot": 1234},
                    "value": {
                        "signature": "sig111",
                        "err": null,
                        "logs": ["Program log: hi"]
                    }
                },
                "subscription": 7
            }
        }"#;
        let frame = parse_frame(text).unwrap();
        assert_eq!(frame.slot, 1234);
        assert_eq!(frame.signature, "sig111");
        assert_eq!(frame.logs.len(), 1);
    }

    #[test]
    fn test_failed_transactions_are_dropped() {
        let text = r#"{
            "params": {
                "result": {
                    "context": {"slot": 1},
                    "value": {
                        "signature": "sig",
                        "err": {"InstructionError": [0, "Custom"]},
                        "logs": []
                    }
                }
            }
        }"#;
        assert!(parse_frame(text).is_none());
    }

    #[test]
    fn test_subscription_confirmation_is_not_a_frame() {
        assert!(parse_frame(r#"{"jsonrpc":"2.0","result":42,"id":1}"#).is_none());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut backoff = ExponentialBackoff::new(1, 8);
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        assert_eq!(backoff.next_delay(), Duration::from_secs(8));
        assert_eq!(backoff.next_delay(), Duration::from_secs(8));
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }
}
