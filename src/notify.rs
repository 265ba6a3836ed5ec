use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Created,
    Confirmed,
    Cancelled,
    Modified,
}

/// What the notification collaborator receives for a committed transition.
/// Delivery is fire-and-forget: nothing here feeds back into the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub reservation_id: Ulid,
    pub professional_id: Ulid,
    pub client_id: Ulid,
    pub reason: Option<String>,
}

/// Broadcast hub keyed by professional. Sends with no subscriber are
/// dropped silently; a lagging subscriber loses old notices, never
/// blocks the sender.
pub struct Notifier {
    channels: DashMap<Ulid, broadcast::Sender<Notice>>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notices for one professional. Creates the channel if needed.
    pub fn subscribe(&self, professional_id: Ulid) -> broadcast::Receiver<Notice> {
        let sender = self
            .channels
            .entry(professional_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notice. No-op if nobody is listening.
    pub fn send(&self, notice: Notice) {
        if let Some(sender) = self.channels.get(&notice.professional_id) {
            let _ = sender.send(notice);
        }
    }
}
