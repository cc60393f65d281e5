use tokio::sync::broadcast;

use crate::model::*;

const CHANNEL_CAPACITY: usize = 256;

/// Something the surrounding server may want to announce to players.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    WeddingStarting {
        channel: ChannelKey,
        venue: Venue,
        names: Vec<String>,
    },
    OccupancyTimedOut {
        venue: Venue,
        id: ReservationId,
    },
    DojoExpired {
        identity: SlotIdentity,
    },
}

impl Notice {
    /// Chat line for notices that have one.
    pub fn message(&self) -> Option<String> {
        match self {
            Notice::WeddingStarting {
                channel,
                venue,
                names,
            } => Some(format!(
                "{}'s wedding is going to be started at {venue} on Channel {}.",
                names.join(" and "),
                channel.channel
            )),
            _ => None,
        }
    }
}

/// Broadcast hub for channel notices.
pub struct NotifyHub {
    sender: broadcast::Sender<Notice>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.sender.subscribe()
    }

    /// Send a notice. No-op if nobody is listening.
    pub fn send(&self, notice: Notice) {
        let _ = self.sender.send(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let mut rx = hub.subscribe();

        let notice = Notice::OccupancyTimedOut {
            venue: Venue::Chapel,
            id: 3,
        };
        hub.send(notice.clone());

        assert_eq!(rx.recv().await.unwrap(), notice);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        hub.send(Notice::OccupancyTimedOut {
            venue: Venue::Cathedral,
            id: 1,
        });
    }

    #[test]
    fn wedding_message_names_couple_and_venue() {
        let n = Notice::WeddingStarting {
            channel: ChannelKey::new(0, 2),
            venue: Venue::Cathedral,
            names: vec!["Ayla".into(), "Bren".into()],
        };
        assert_eq!(
            n.message().unwrap(),
            "Ayla and Bren's wedding is going to be started at Cathedral on Channel 2."
        );
    }
}
