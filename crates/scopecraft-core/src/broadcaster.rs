use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use scopecraft_types::EventEnvelope;
use tokio::sync::{broadcast, RwLock};

/// Optional read-through replica a publish is mirrored to (spec §6.5). Best
/// effort: a sink failure never blocks or fails a publish.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(&self, envelope: &EventEnvelope);
}

/// Session-keyed publish/subscribe fan-out (C6, spec §4.5). One
/// `broadcast::Sender` per session, created lazily on first subscribe or
/// publish. Delivery within a session is best-effort, non-blocking, and
/// ordered; a subscriber that falls behind the channel's capacity loses the
/// oldest events and is told so via `EventEnvelope.dropped` on its next
/// successful receive, rather than ever blocking the publisher.
#[derive(Clone)]
pub struct EventBroadcaster {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<EventEnvelope>>>>,
    buffer: usize,
    sink: Option<Arc<dyn EventSink>>,
}

impl EventBroadcaster {
    pub fn new(buffer: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            buffer,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    async fn sender_for(&self, session_id: &str) -> broadcast::Sender<EventEnvelope> {
        if let Some(tx) = self.channels.read().await.get(session_id) {
            return tx.clone();
        }
        let mut channels = self.channels.write().await;
        channels
            .entry(session_id.to_string())
            .or_insert_with(|| broadcast::channel(self.buffer).0)
            .clone()
    }

    /// Subscribes to a session's event stream. Multiple subscribers per
    /// session are allowed; each gets every event published from this point
    /// forward, independently.
    pub async fn subscribe(&self, session_id: &str) -> Subscription {
        let tx = self.sender_for(session_id).await;
        Subscription {
            receiver: tx.subscribe(),
            pending_drop: 0,
        }
    }

    /// Publishes one event to every live subscriber of `envelope.session_id`
    /// and no other session (spec P6). A session with zero subscribers
    /// simply drops the event on the floor — `broadcast::send` returning
    /// `Err` because there are no receivers is not a failure here.
    pub async fn publish(&self, envelope: EventEnvelope) {
        if let Some(sink) = &self.sink {
            sink.record(&envelope).await;
        }
        let tx = self.sender_for(&envelope.session_id).await;
        let _ = tx.send(envelope);
    }

    /// Drops the session's channel once no subscribers remain and no more
    /// events are expected (e.g. a completed or failed run past its
    /// retention window). Safe to call even if subscribers are still
    /// attached; they keep their already-cloned receiver.
    pub async fn close_session(&self, session_id: &str) {
        self.channels.write().await.remove(session_id);
    }
}

/// A live subscription to one session's event stream.
pub struct Subscription {
    receiver: broadcast::Receiver<EventEnvelope>,
    pending_drop: u64,
}

impl Subscription {
    /// Receives the next event, annotating it with `dropped: N` if this
    /// subscriber lagged and missed events since its last receive. Returns
    /// `None` once the publisher side has been closed and the buffer is
    /// drained (the stream has ended for good).
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        loop {
            match self.receiver.recv().await {
                Ok(mut envelope) => {
                    if self.pending_drop > 0 {
                        envelope.dropped = Some(self.pending_drop);
                        self.pending_drop = 0;
                    }
                    return Some(envelope);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    self.pending_drop = self.pending_drop.saturating_add(missed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scopecraft_types::EventData;

    fn thinking_envelope(session_id: &str) -> EventEnvelope {
        EventEnvelope::manager_thinking(
            session_id,
            EventData::ManagerThinking {
                thinking_type: "analyzing_input".into(),
                stage: "intake".into(),
                analysis: "test".into(),
                factors: vec![],
                confidence: 1.0,
                reasoning_depth: "shallow".into(),
            },
        )
    }

    #[tokio::test]
    async fn subscribers_receive_in_publish_order() {
        let bus = EventBroadcaster::new(16);
        let mut sub = bus.subscribe("s1").await;
        for i in 0..5 {
            let mut env = thinking_envelope("s1");
            env.event_type = format!("manager_thinking_{i}");
            bus.publish(env).await;
        }
        for i in 0..5 {
            let env = sub.recv().await.expect("event");
            assert_eq!(env.event_type, format!("manager_thinking_{i}"));
        }
    }

    #[tokio::test]
    async fn subscriber_of_one_session_never_sees_another() {
        let bus = EventBroadcaster::new(16);
        let mut sub_a = bus.subscribe("a").await;
        bus.publish(thinking_envelope("b")).await;
        bus.publish(thinking_envelope("a")).await;
        let env = sub_a.recv().await.expect("event");
        assert_eq!(env.session_id, "a");
    }

    #[tokio::test]
    async fn lagging_subscriber_gets_dropped_count_on_next_event() {
        let bus = EventBroadcaster::new(2);
        let mut sub = bus.subscribe("s1").await;
        for _ in 0..5 {
            bus.publish(thinking_envelope("s1")).await;
        }
        let env = sub.recv().await.expect("event");
        assert!(env.dropped.is_some_and(|d| d > 0));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBroadcaster::new(16);
        bus.publish(thinking_envelope("lonely")).await;
    }
}
