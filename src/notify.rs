use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use ulid::Ulid;

const CHANNEL_CAPACITY: usize = 256;

/// What a notification is about. Delivery fan-out (in-app, email, push)
/// happens downstream; the engine only names the occasion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NotificationKind {
    BookingConfirmed,
    AppointmentCancelled,
    SessionCompleted,
    PaymentReminder,
    PaymentReceived,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::BookingConfirmed => "booking_confirmed",
            NotificationKind::AppointmentCancelled => "appointment_cancelled",
            NotificationKind::SessionCompleted => "session_completed",
            NotificationKind::PaymentReminder => "payment_reminder",
            NotificationKind::PaymentReceived => "payment_received",
        }
    }
}

/// One message for one recipient.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub recipient: Ulid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub payload: serde_json::Value,
}

/// Broadcast hub, channels keyed by recipient user id. Sends are
/// fire-and-forget: a failure here never fails the triggering mutation.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Notification>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for a user. Creates the channel if needed.
    pub fn subscribe(&self, user_id: Ulid) -> broadcast::Receiver<Notification> {
        let sender = self
            .channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, notification: Notification) {
        if let Some(sender) = self.channels.get(&notification.recipient) {
            let _ = sender.send(notification);
        }
    }

    /// Remove a channel (e.g. when a subscriber disconnects for good).
    #[allow(dead_code)]
    pub fn remove(&self, user_id: &Ulid) {
        self.channels.remove(user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(recipient: Ulid) -> Notification {
        Notification {
            recipient,
            kind: NotificationKind::BookingConfirmed,
            title: "Booking confirmed".into(),
            message: "Your session is scheduled".into(),
            payload: serde_json::json!({ "appointment_id": Ulid::new().to_string() }),
        }
    }

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let uid = Ulid::new();
        let mut rx = hub.subscribe(uid);

        hub.send(sample(uid));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.recipient, uid);
        assert_eq!(received.kind, NotificationKind::BookingConfirmed);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        // No subscriber — should not panic
        hub.send(sample(Ulid::new()));
    }

    #[tokio::test]
    async fn channels_are_per_recipient() {
        let hub = NotifyHub::new();
        let a = Ulid::new();
        let b = Ulid::new();
        let mut rx_a = hub.subscribe(a);
        let _rx_b = hub.subscribe(b);

        hub.send(sample(b));

        // a's channel stays empty
        assert!(rx_a.try_recv().is_err());
    }
}
