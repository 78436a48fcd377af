//! Cross-loop bridge: the chat side hands notifications to the control side
//! without waiting on it.

use crate::types::OperatorId;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A chat line relayed verbatim.
    Relay { operator: OperatorId, text: String },
    /// A reply the relay published to the live chat.
    Published { operator: OperatorId, text: String },
}

impl Notification {
    pub fn operator(&self) -> OperatorId {
        match self {
            Self::Relay { operator, .. } | Self::Published { operator, .. } => *operator,
        }
    }

    pub fn render(&self) -> String {
        match self {
            Self::Relay { text, .. } => text.clone(),
            Self::Published { text, .. } => format!("🤖 Sent to Twitch:\n{}", text),
        }
    }
}

/// Fire-and-forget sender. Submitting never blocks and never fails the caller.
#[derive(Clone)]
pub struct Bridge {
    tx: Option<mpsc::UnboundedSender<Notification>>,
}

pub fn channel() -> (Bridge, mpsc::UnboundedReceiver<Notification>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Bridge { tx: Some(tx) }, rx)
}

impl Bridge {
    /// A bridge with no control side attached yet; every submission is dropped.
    pub fn detached() -> Self {
        Self { tx: None }
    }

    /// Returns whether the notification was handed over.
    pub fn submit(&self, notification: Notification) -> bool {
        let Some(tx) = &self.tx else {
            tracing::warn!("[🌉] Control loop not attached, dropping notification");
            return false;
        };
        match tx.send(notification) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("[🌉] Control loop gone, dropping notification: {:?}", e.0);
                false
            }
        }
    }
}

/// Anything able to deliver text to an operator's private chat.
#[async_trait::async_trait]
pub trait OperatorNotifier: Send + Sync {
    async fn notify(&self, operator: OperatorId, text: &str) -> crate::types::Result<()>;
}

/// Drains the bridge on the control side. Delivery failures are logged and skipped.
pub async fn run_pump<N: OperatorNotifier + ?Sized>(
    mut rx: mpsc::UnboundedReceiver<Notification>,
    notifier: &N,
) {
    tracing::info!("[🌉] Bridge pump started");
    while let Some(notification) = rx.recv().await {
        let operator = notification.operator();
        if let Err(e) = notifier.notify(operator, &notification.render()).await {
            tracing::warn!("[🌉] Failed to notify operator {}: {}", operator, e);
        }
    }
    tracing::info!("[🌉] Bridge pump stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(OperatorId, String)>>,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl OperatorNotifier for Recorder {
        async fn notify(&self, operator: OperatorId, text: &str) -> crate::types::Result<()> {
            if self.fail {
                return Err(crate::types::RelayError::Publish("offline".into()).into());
            }
            if let Ok(mut sent) = self.sent.lock() {
                sent.push((operator, text.to_string()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_detached_bridge_drops() {
        let bridge = Bridge::detached();
        assert!(!bridge.submit(Notification::Relay {
            operator: OperatorId(1),
            text: "a: b".into()
        }));
    }

    #[test]
    fn test_closed_receiver_is_not_fatal() {
        let (bridge, rx) = channel();
        drop(rx);
        assert!(!bridge.submit(Notification::Relay {
            operator: OperatorId(1),
            text: "a: b".into()
        }));
    }

    #[tokio::test]
    async fn test_pump_delivers_in_order() {
        let (bridge, rx) = channel();
        assert!(bridge.submit(Notification::Relay {
            operator: OperatorId(7),
            text: "alice: hi".into()
        }));
        assert!(bridge.submit(Notification::Published {
            operator: OperatorId(7),
            text: "hey".into()
        }));
        drop(bridge);

        let recorder = Recorder::default();
        run_pump(rx, &recorder).await;

        let sent = match recorder.sent.lock() {
            Ok(s) => s.clone(),
            Err(e) => panic!("poisoned: {}", e),
        };
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], (OperatorId(7), "alice: hi".to_string()));
        assert!(sent[1].1.ends_with("hey"));
    }

    #[tokio::test]
    async fn test_pump_survives_delivery_failures() {
        let (bridge, rx) = channel();
        for i in 0..3 {
            bridge.submit(Notification::Relay {
                operator: OperatorId(1),
                text: i.to_string(),
            });
        }
        drop(bridge);
        let recorder = Recorder {
            fail: true,
            ..Default::default()
        };
        // Completes despite every send failing.
        run_pump(rx, &recorder).await;
    }
}
