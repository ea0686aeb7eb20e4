//! Realtime change feed over the Phoenix channel protocol.
//!
//! One WebSocket carries one channel (`realtime:bookmarks-<user_id>`) joined
//! with a `postgres_changes` filter on the owner. The socket is kept alive by
//! heartbeats; a heartbeat or join that goes unanswered ends the channel with
//! [`SubscriptionError::TimedOut`]. Nothing here reconnects on its own.

use super::{Backend, Bookmark, ChangeEvent, OldRecord, Session, SubscriptionStatus};
use futures::{SinkExt, StreamExt};
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// Protocol version sent in the socket URL.
const PROTOCOL_VSN: &str = "1.0.0";

/// Errors that end a channel.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("Could not connect to realtime service: {0}")]
    Connect(String),

    #[error("Subscription rejected: {0}")]
    Rejected(String),

    #[error("Realtime channel timed out")]
    TimedOut,

    #[error("Realtime channel closed by server")]
    Closed,

    #[error("Realtime connection lost: {0}")]
    Disconnected(String),
}

impl SubscriptionError {
    /// Terminal channel status this error corresponds to.
    pub fn status(&self) -> SubscriptionStatus {
        match self {
            SubscriptionError::TimedOut => SubscriptionStatus::TimedOut,
            SubscriptionError::Closed => SubscriptionStatus::Closed,
            other => SubscriptionStatus::ChannelError(other.to_string()),
        }
    }
}

/// What a running channel reports to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Status(SubscriptionStatus),
    Change(ChangeEvent),
}

/// Heartbeat and join deadlines.
#[derive(Debug, Clone, Copy)]
pub struct ChannelTimings {
    pub heartbeat_interval: Duration,
    pub join_timeout: Duration,
}

impl Default for ChannelTimings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(25),
            join_timeout: Duration::from_secs(10),
        }
    }
}

// ============================================================================
// Wire Format
// ============================================================================

#[derive(Debug, Deserialize)]
struct Frame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(rename = "ref", default)]
    reference: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChangeData {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    record: Option<serde_json::Value>,
    #[serde(default)]
    old_record: Option<serde_json::Value>,
}

/// A decoded inbound frame, reduced to what the channel loop acts on.
#[derive(Debug, PartialEq)]
enum Inbound {
    JoinOk,
    JoinRejected(String),
    HeartbeatReply(String),
    Change(ChangeEvent),
    ChannelError(String),
    Closed,
    Ignored,
}

/// Socket URL: the base URL with a `ws`/`wss` scheme and the realtime path.
pub fn websocket_url(base: &Url, api_key: &str) -> Result<Url, SubscriptionError> {
    let mut url = base
        .join("realtime/v1/websocket")
        .map_err(|e| SubscriptionError::Connect(e.to_string()))?;

    let scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(SubscriptionError::Connect(format!(
                "unsupported scheme: {}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| SubscriptionError::Connect("cannot switch to websocket scheme".into()))?;

    url.query_pairs_mut()
        .append_pair("apikey", api_key)
        .append_pair("vsn", PROTOCOL_VSN);
    Ok(url)
}

/// Channel topic for one owner's bookmarks.
pub fn topic_for(user_id: &str) -> String {
    format!("realtime:bookmarks-{}", user_id)
}

fn frame(topic: &str, event: &str, payload: serde_json::Value, reference: &str) -> String {
    serde_json::json!({
        "topic": topic,
        "event": event,
        "payload": payload,
        "ref": reference,
    })
    .to_string()
}

fn join_payload(user_id: &str, access_token: &str) -> serde_json::Value {
    serde_json::json!({
        "config": {
            "broadcast": { "self": true, "ack": false },
            "presence": { "key": "" },
            "postgres_changes": [{
                "event": "*",
                "schema": "public",
                "table": "bookmarks",
                "filter": format!("user_id=eq.{}", user_id),
            }],
            "private": false,
        },
        "access_token": access_token,
    })
}

fn reason_from(payload: &serde_json::Value, fallback: &str) -> String {
    payload
        .pointer("/response/reason")
        .or_else(|| payload.get("message"))
        .or_else(|| payload.get("reason"))
        .and_then(|v| v.as_str())
        .unwrap_or(fallback)
        .to_string()
}

fn decode_change(payload: &serde_json::Value) -> Result<ChangeEvent, String> {
    let data = payload.get("data").cloned().unwrap_or_default();
    let data: ChangeData = serde_json::from_value(data).map_err(|e| e.to_string())?;

    let new_row = |value: Option<serde_json::Value>| -> Result<Bookmark, String> {
        let value = value.ok_or_else(|| "missing record".to_string())?;
        serde_json::from_value(value).map_err(|e| e.to_string())
    };
    let old_row = |value: Option<serde_json::Value>| -> Option<OldRecord> {
        value.and_then(|v| serde_json::from_value(v).ok())
    };

    match data.kind.as_str() {
        "INSERT" => Ok(ChangeEvent::Insert {
            new: new_row(data.record)?,
        }),
        "UPDATE" => Ok(ChangeEvent::Update {
            new: new_row(data.record)?,
            old: old_row(data.old_record),
        }),
        "DELETE" => old_row(data.old_record)
            .map(|old| ChangeEvent::Delete { old })
            .ok_or_else(|| "delete without old record id".to_string()),
        other => Err(format!("unknown change type: {}", other)),
    }
}

fn interpret(text: &str, topic: &str, join_ref: &str) -> Inbound {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!(error = %e, "Ignoring undecodable realtime frame");
            return Inbound::Ignored;
        }
    };

    if frame.topic == "phoenix" {
        return match (frame.event.as_str(), frame.reference) {
            ("phx_reply", Some(reference)) => Inbound::HeartbeatReply(reference),
            _ => Inbound::Ignored,
        };
    }
    if frame.topic != topic {
        return Inbound::Ignored;
    }

    match frame.event.as_str() {
        "phx_reply" if frame.reference.as_deref() == Some(join_ref) => {
            match frame.payload.get("status").and_then(|s| s.as_str()) {
                Some("ok") => Inbound::JoinOk,
                _ => Inbound::JoinRejected(reason_from(&frame.payload, "join refused")),
            }
        }
        "postgres_changes" => match decode_change(&frame.payload) {
            Ok(change) => Inbound::Change(change),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed change event");
                Inbound::Ignored
            }
        },
        "system" if frame.payload.get("status").and_then(|s| s.as_str()) == Some("error") => {
            Inbound::ChannelError(reason_from(&frame.payload, "channel error"))
        }
        "phx_error" => Inbound::ChannelError(reason_from(&frame.payload, "channel error")),
        "phx_close" => Inbound::Closed,
        _ => Inbound::Ignored,
    }
}

// ============================================================================
// Channel Loop
// ============================================================================

/// Join the owner's channel and forward its events until shutdown or failure.
///
/// Each event is passed through `wrap` and sent on `sink`. Returns `Ok(())`
/// when `shutdown` fires (or its sender goes away) or the sink is closed; every
/// other exit is an error describing why the channel ended. The caller decides
/// what final status to report.
pub async fn run_channel<M, F>(
    backend: &Backend,
    session: &Session,
    timings: ChannelTimings,
    sink: &mpsc::Sender<M>,
    wrap: &F,
    mut shutdown: oneshot::Receiver<()>,
) -> Result<(), SubscriptionError>
where
    M: Send,
    F: Fn(ChannelEvent) -> M + Sync,
{
    let emit = |event: ChannelEvent| sink.send(wrap(event));

    let url = websocket_url(backend.base_url(), backend.api_key())?;
    let topic = topic_for(session.user_id());

    if emit(ChannelEvent::Status(SubscriptionStatus::Subscribing)).await.is_err() {
        return Ok(());
    }

    let (socket, _) = tokio::time::timeout(
        timings.join_timeout,
        tokio_tungstenite::connect_async(url.as_str()),
    )
    .await
    .map_err(|_| SubscriptionError::TimedOut)?
    .map_err(|e| SubscriptionError::Connect(e.to_string()))?;

    let (mut write, mut read) = socket.split();
    let mut next_ref: u64 = 0;
    let mut make_ref = || {
        next_ref += 1;
        next_ref.to_string()
    };

    let join_ref = make_ref();
    let join = frame(
        &topic,
        "phx_join",
        join_payload(session.user_id(), session.access_token.expose_secret()),
        &join_ref,
    );
    write
        .send(Message::text(join))
        .await
        .map_err(|e| SubscriptionError::Disconnected(e.to_string()))?;
    tracing::debug!(topic = %topic, "Joining realtime channel");

    let join_deadline = tokio::time::sleep(timings.join_timeout);
    tokio::pin!(join_deadline);
    let mut joined = false;

    let mut heartbeat = interval_at(
        Instant::now() + timings.heartbeat_interval,
        timings.heartbeat_interval,
    );
    let mut pending_heartbeat: Option<String> = None;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                let leave = frame(&topic, "phx_leave", serde_json::json!({}), &make_ref());
                let _ = write.send(Message::text(leave)).await;
                let _ = write.close().await;
                tracing::debug!(topic = %topic, "Left realtime channel");
                return Ok(());
            }

            _ = &mut join_deadline, if !joined => {
                return Err(SubscriptionError::TimedOut);
            }

            _ = heartbeat.tick() => {
                if pending_heartbeat.is_some() {
                    return Err(SubscriptionError::TimedOut);
                }
                let reference = make_ref();
                let beat = frame("phoenix", "heartbeat", serde_json::json!({}), &reference);
                write
                    .send(Message::text(beat))
                    .await
                    .map_err(|e| SubscriptionError::Disconnected(e.to_string()))?;
                pending_heartbeat = Some(reference);
            }

            incoming = read.next() => {
                let message = match incoming {
                    None => return Err(SubscriptionError::Disconnected("socket closed".into())),
                    Some(Err(e)) => return Err(SubscriptionError::Disconnected(e.to_string())),
                    Some(Ok(message)) => message,
                };

                let text = match message {
                    Message::Text(text) => text,
                    Message::Close(_) => {
                        return Err(SubscriptionError::Disconnected("socket closed".into()))
                    }
                    _ => continue,
                };

                match interpret(text.as_str(), &topic, &join_ref) {
                    Inbound::JoinOk => {
                        joined = true;
                        tracing::info!(topic = %topic, "Realtime channel subscribed");
                        if emit(ChannelEvent::Status(SubscriptionStatus::Subscribed)).await.is_err() {
                            return Ok(());
                        }
                    }
                    Inbound::JoinRejected(reason) => {
                        return Err(SubscriptionError::Rejected(reason));
                    }
                    Inbound::HeartbeatReply(reference) => {
                        if pending_heartbeat.as_deref() == Some(reference.as_str()) {
                            pending_heartbeat = None;
                        }
                    }
                    Inbound::Change(change) => {
                        tracing::debug!(
                            kind = change.kind(),
                            bookmark_id = %change.bookmark_id(),
                            "Change event received"
                        );
                        if emit(ChannelEvent::Change(change)).await.is_err() {
                            return Ok(());
                        }
                    }
                    Inbound::ChannelError(reason) => {
                        return Err(SubscriptionError::Rejected(reason));
                    }
                    Inbound::Closed => return Err(SubscriptionError::Closed),
                    Inbound::Ignored => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "realtime:bookmarks-u1";

    #[test]
    fn test_websocket_url_switches_scheme() {
        let base = Url::parse("https://project.example.com/").unwrap();
        let url = websocket_url(&base, "anon").unwrap();
        assert_eq!(
            url.as_str(),
            "wss://project.example.com/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );

        let local = Url::parse("http://127.0.0.1:54321/").unwrap();
        assert_eq!(websocket_url(&local, "k").unwrap().scheme(), "ws");
    }

    #[test]
    fn test_join_reply_ok_and_error() {
        let ok = r#"{"topic":"realtime:bookmarks-u1","event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"1"}"#;
        assert_eq!(interpret(ok, TOPIC, "1"), Inbound::JoinOk);

        let err = r#"{"topic":"realtime:bookmarks-u1","event":"phx_reply","payload":{"status":"error","response":{"reason":"unauthorized"}},"ref":"1"}"#;
        assert_eq!(
            interpret(err, TOPIC, "1"),
            Inbound::JoinRejected("unauthorized".to_string())
        );
    }

    #[test]
    fn test_insert_change_decoded() {
        let text = r#"{
            "topic": "realtime:bookmarks-u1",
            "event": "postgres_changes",
            "payload": {"data": {
                "type": "INSERT",
                "schema": "public",
                "table": "bookmarks",
                "record": {"id": "b1", "user_id": "u1", "title": "Docs", "url": "https://example.com", "created_at": "2024-05-01T00:00:00+00:00"},
                "old_record": null
            }},
            "ref": null
        }"#;
        match interpret(text, TOPIC, "1") {
            Inbound::Change(ChangeEvent::Insert { new }) => assert_eq!(new.id, "b1"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_delete_change_with_key_only() {
        let text = r#"{"topic":"realtime:bookmarks-u1","event":"postgres_changes","payload":{"data":{"type":"DELETE","old_record":{"id":"b1"}}},"ref":null}"#;
        assert_eq!(
            interpret(text, TOPIC, "1"),
            Inbound::Change(ChangeEvent::Delete {
                old: OldRecord {
                    id: "b1".to_string(),
                    user_id: None,
                }
            })
        );
    }

    #[test]
    fn test_system_error_and_close() {
        let system = r#"{"topic":"realtime:bookmarks-u1","event":"system","payload":{"status":"error","message":"bad filter"},"ref":null}"#;
        assert_eq!(
            interpret(system, TOPIC, "1"),
            Inbound::ChannelError("bad filter".to_string())
        );

        let close = r#"{"topic":"realtime:bookmarks-u1","event":"phx_close","payload":{},"ref":"1"}"#;
        assert_eq!(interpret(close, TOPIC, "1"), Inbound::Closed);
    }

    #[test]
    fn test_other_topics_and_garbage_ignored() {
        let other = r#"{"topic":"realtime:bookmarks-u2","event":"phx_close","payload":{},"ref":"1"}"#;
        assert_eq!(interpret(other, TOPIC, "1"), Inbound::Ignored);
        assert_eq!(interpret("not json", TOPIC, "1"), Inbound::Ignored);

        let malformed = r#"{"topic":"realtime:bookmarks-u1","event":"postgres_changes","payload":{"data":{"type":"INSERT","record":{"id":"x"}}},"ref":null}"#;
        assert_eq!(interpret(malformed, TOPIC, "1"), Inbound::Ignored);
    }

    #[test]
    fn test_heartbeat_reply() {
        let text = r#"{"topic":"phoenix","event":"phx_reply","payload":{"status":"ok","response":{}},"ref":"7"}"#;
        assert_eq!(
            interpret(text, TOPIC, "1"),
            Inbound::HeartbeatReply("7".to_string())
        );
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(SubscriptionError::TimedOut.status(), SubscriptionStatus::TimedOut);
        assert_eq!(SubscriptionError::Closed.status(), SubscriptionStatus::Closed);
        assert!(matches!(
            SubscriptionError::Rejected("x".into()).status(),
            SubscriptionStatus::ChannelError(_)
        ));
    }
}
