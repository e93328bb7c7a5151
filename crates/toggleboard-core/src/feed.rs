//! Change feed subscriptions.

use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::error::ValidationError;
use crate::types::FeedTopic;

/// Receiving end of one change feed topic.
///
/// Backends push raw payloads into the channel; consumers decode them with
/// [`decode_feed_payload`] so malformed messages are rejected individually.
#[derive(Debug)]
pub struct FeedSubscription {
    topic: FeedTopic,
    receiver: mpsc::Receiver<String>,
}

impl FeedSubscription {
    /// Create a subscription and the sender a backend feeds it through.
    pub fn channel(topic: FeedTopic, capacity: usize) -> (mpsc::Sender<String>, Self) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (sender, Self { topic, receiver })
    }

    /// Topic this subscription listens on.
    pub fn topic(&self) -> FeedTopic {
        self.topic
    }

    /// Next raw payload, `None` once the backend side has gone away.
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }
}

/// Decode one feed payload.
pub fn decode_feed_payload<T: DeserializeOwned>(payload: &str) -> Result<T, ValidationError> {
    serde_json::from_str(payload).map_err(|e| ValidationError::MalformedPayload { reason: e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToggleEvent;

    #[tokio::test]
    async fn subscription_yields_payloads_in_order() {
        let (tx, mut sub) = FeedSubscription::channel(FeedTopic::Toggles, 4);
        tx.send("[1,1,10]".to_string()).await.unwrap();
        tx.send("[2,0,11]".to_string()).await.unwrap();
        drop(tx);

        assert_eq!(sub.topic(), FeedTopic::Toggles);
        assert_eq!(sub.recv().await.as_deref(), Some("[1,1,10]"));
        assert_eq!(sub.recv().await.as_deref(), Some("[2,0,11]"));
        assert_eq!(sub.recv().await, None);
    }

    #[test]
    fn malformed_payload_is_a_validation_error() {
        let err = decode_feed_payload::<ToggleEvent>("{\"index\":1}").unwrap_err();
        assert!(matches!(err, ValidationError::MalformedPayload { .. }));
        let ok: ToggleEvent = decode_feed_payload("[3,1,99]").unwrap();
        assert_eq!(ok.index, 3);
    }
}
