use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::notify::{Notice, NotifyHub};
use crate::observability::{WEDDING_RESERVATIONS_TOTAL, WEDDING_TIMEOUTS_TOTAL};
use crate::scheduler::TimerHandle;

use super::{now_ms, Channel, ChannelError, ConflictKind, NotFoundKind, SharedState};

/// Where a reservation stands at one venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationStatus {
    Ongoing,
    /// 1-based queue position, placeholders included.
    Queued(usize),
    NotFound,
}

impl ReservationStatus {
    /// Wire form: 0 ongoing, position when queued, -1 otherwise.
    pub fn code(self) -> i32 {
        match self {
            ReservationStatus::Ongoing => 0,
            ReservationStatus::Queued(pos) => pos as i32,
            ReservationStatus::NotFound => -1,
        }
    }
}

#[derive(Debug)]
struct OngoingOccupancy {
    id: ReservationId,
    premium: bool,
    guests: HashSet<PlayerId>,
    started_at: Ms,
}

/// Point-in-time view of a venue, for debug dumps.
#[derive(Debug, Serialize)]
pub struct VenueSnapshot {
    pub venue: Venue,
    pub queue: Vec<Option<ReservationId>>,
    pub ongoing: Option<ReservationId>,
    pub premium: Option<bool>,
    pub guests: Vec<PlayerId>,
    pub started_at: Option<Ms>,
    pub pending_timeout: bool,
}

/// One venue: FIFO of reservations and placeholders, plus at most one
/// ongoing occupancy. A pending timeout exists only while an occupancy does.
#[derive(Debug)]
pub(crate) struct ReservationQueue {
    venue: Venue,
    entries: VecDeque<ReservationEntry>,
    ongoing: Option<OngoingOccupancy>,
    timeout: Option<TimerHandle>,
}

impl ReservationQueue {
    pub fn new(venue: Venue) -> Self {
        Self {
            venue,
            entries: VecDeque::new(),
            ongoing: None,
            timeout: None,
        }
    }

    pub fn contains(&self, id: ReservationId) -> bool {
        self.entries.contains(&ReservationEntry::Reservation(id))
    }

    pub fn is_ongoing(&self, id: ReservationId) -> bool {
        self.ongoing.as_ref().is_some_and(|o| o.id == id)
    }

    /// Pad with placeholders up to `delay_target - 1`, then append. Returns the new length.
    pub fn push(&mut self, id: ReservationId, delay_target: usize) -> usize {
        let pad = delay_target
            .saturating_sub(1)
            .saturating_sub(self.entries.len());
        self.entries
            .extend(std::iter::repeat_n(ReservationEntry::Placeholder, pad));
        self.entries.push_back(ReservationEntry::Reservation(id));
        self.entries.len()
    }

    pub fn pop_next(&mut self) -> Option<ReservationEntry> {
        self.entries.pop_front()
    }

    /// Turn the reservation's entry into a placeholder so the ones behind it keep their times.
    pub fn cancel(&mut self, id: ReservationId) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|e| **e == ReservationEntry::Reservation(id))
        {
            Some(entry) => {
                *entry = ReservationEntry::Placeholder;
                true
            }
            None => false,
        }
    }

    pub fn status(&self, id: ReservationId) -> ReservationStatus {
        if self.is_ongoing(id) {
            return ReservationStatus::Ongoing;
        }
        self.entries
            .iter()
            .position(|e| *e == ReservationEntry::Reservation(id))
            .map_or(ReservationStatus::NotFound, |i| ReservationStatus::Queued(i + 1))
    }

    pub fn begin(
        &mut self,
        id: ReservationId,
        premium: bool,
        guests: HashSet<PlayerId>,
        now: Ms,
        timeout: TimerHandle,
    ) {
        if let Some(old) = self.timeout.replace(timeout) {
            old.cancel();
        }
        self.ongoing = Some(OngoingOccupancy {
            id,
            premium,
            guests,
            started_at: now,
        });
    }

    /// Cancel the pending timeout. False if there was none.
    pub fn accept(&mut self) -> bool {
        match self.timeout.take() {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    /// Clear the occupancy. Idempotent; returns the id that was ongoing.
    pub fn end(&mut self) -> Option<ReservationId> {
        if let Some(handle) = self.timeout.take() {
            handle.cancel();
        }
        self.ongoing.take().map(|o| o.id)
    }

    pub fn timeout_is(&self, token: Ulid) -> bool {
        self.timeout.as_ref().is_some_and(|h| h.id() == token)
    }

    pub fn ongoing_id(&self) -> Option<ReservationId> {
        self.ongoing.as_ref().map(|o| o.id)
    }

    pub fn ongoing_premium(&self) -> Option<bool> {
        self.ongoing.as_ref().map(|o| o.premium)
    }

    pub fn is_guest(&self, player: PlayerId) -> bool {
        self.ongoing
            .as_ref()
            .is_some_and(|o| o.guests.contains(&player))
    }

    pub fn snapshot(&self) -> VenueSnapshot {
        let mut guests: Vec<PlayerId> = self
            .ongoing
            .as_ref()
            .map(|o| o.guests.iter().copied().collect())
            .unwrap_or_default();
        guests.sort_unstable();
        VenueSnapshot {
            venue: self.venue,
            queue: self.entries.iter().map(|e| e.id()).collect(),
            ongoing: self.ongoing_id(),
            premium: self.ongoing_premium(),
            guests,
            started_at: self.ongoing.as_ref().map(|o| o.started_at),
            pending_timeout: self.timeout.is_some(),
        }
    }
}

/// In this channel's queues or ongoing at either venue.
fn is_held_here(state: &SharedState, id: ReservationId) -> bool {
    Venue::ALL.iter().any(|v| {
        let q = state.venue(*v);
        q.contains(id) || q.is_ongoing(id)
    })
}

/// "H hours, M minutes, S seconds", dropping leading units that are zero.
pub fn format_time_left(ms: Ms) -> String {
    let ms = ms.max(0);
    let hours = ms / 3_600_000;
    let minutes = (ms / 60_000) % 60;
    let seconds = (ms / 1_000) % 60;
    if hours > 0 {
        format!("{hours} hours, {minutes} minutes, {seconds} seconds")
    } else if ms >= 60_000 {
        format!("{minutes} minutes, {seconds} seconds")
    } else {
        format!("{seconds} seconds")
    }
}

impl Channel {
    /// Queued anywhere in the world, or ongoing at either venue here.
    pub async fn wedding_is_reserved(&self, id: ReservationId) -> bool {
        if self.collab.relationships.is_queued(id) {
            return true;
        }
        let guard = self.state.lock().await;
        is_held_here(&guard, id)
    }

    /// Queue a reservation. Returns the queue length after the push; the
    /// reservation starts roughly `length * interval` from the last ceremony start.
    pub async fn wedding_push(
        &self,
        venue: Venue,
        id: ReservationId,
        premium: bool,
        partner_a: PlayerId,
        partner_b: PlayerId,
    ) -> Result<usize, ChannelError> {
        let store = &self.collab.relationships;
        let queued_elsewhere = store.is_queued(id);

        let mut guard = self.state.lock().await;
        guard.ensure_active()?;
        if queued_elsewhere || is_held_here(&guard, id) {
            metrics::counter!(WEDDING_RESERVATIONS_TOTAL, "outcome" => "conflict").increment(1);
            return Err(ChannelError::Conflict(ConflictKind::AlreadyReserved(id)));
        }
        let length = guard
            .venue_mut(venue)
            .push(id, self.config.wedding_reservation_delay);
        drop(guard);

        store.queue_reservation(
            id,
            ReservationMeta {
                venue,
                premium,
                partner_a,
                partner_b,
                guests: Vec::new(),
            },
        );
        metrics::counter!(WEDDING_RESERVATIONS_TOTAL, "outcome" => "ok").increment(1);
        debug!("{}: reservation {id} queued at {venue}, position {length}", self.key);
        Ok(length)
    }

    /// Remove the front entry. A placeholder means nothing is due yet.
    pub async fn wedding_pop_next(&self, venue: Venue) -> Option<ReservationEntry> {
        self.state.lock().await.venue_mut(venue).pop_next()
    }

    /// Pop the front entry and, if it is a real reservation, collect what the
    /// ceremony needs from the relationship store and announce it.
    pub async fn wedding_take_next(&self, venue: Venue) -> Option<UpcomingCeremony> {
        let id = self.wedding_pop_next(venue).await?.id()?;

        let store = &self.collab.relationships;
        let meta = store.take_queued_meta(id);
        if meta.is_none() {
            warn!("{}: reservation {id} left the {venue} queue without stored meta", self.key);
        }
        if let Some((a, b)) = store.couple(id) {
            self.notify.send(Notice::WeddingStarting {
                channel: self.key,
                venue,
                names: store.lookup_names(&[a, b]),
            });
        }

        let (premium, guests) = meta.map_or((false, Vec::new()), |m| (m.premium, m.guests));
        Some(UpcomingCeremony { id, premium, guests })
    }

    pub async fn wedding_status(&self, venue: Venue, id: ReservationId) -> ReservationStatus {
        self.state.lock().await.venue(venue).status(id)
    }

    /// Withdraw a queued reservation.
    pub async fn wedding_cancel(&self, venue: Venue, id: ReservationId) -> Result<(), ChannelError> {
        if !self.state.lock().await.venue_mut(venue).cancel(id) {
            return Err(ChannelError::NotFound(NotFoundKind::Reservation(id)));
        }
        self.collab.relationships.take_queued_meta(id);
        Ok(())
    }

    /// Start an occupancy and arm its acceptance timeout.
    pub async fn wedding_begin(
        &self,
        venue: Venue,
        premium: bool,
        id: ReservationId,
        guests: impl IntoIterator<Item = PlayerId>,
    ) -> Result<(), ChannelError> {
        let mut guard = self.state.lock().await;
        guard.ensure_active()?;

        let weak = Arc::downgrade(&self.state);
        let notify = self.notify.clone();
        let handle = self.scheduler.schedule(
            Duration::from_millis(self.config.reservation_timeout_ms().max(0) as u64),
            move |token| expire_occupancy(weak, notify, venue, token),
        );
        let now = now_ms();
        guard
            .venue_mut(venue)
            .begin(id, premium, guests.into_iter().collect(), now, handle);
        guard.ceremony_clock = now;
        info!("{}: ceremony {id} began at {venue}", self.key);
        Ok(())
    }

    /// The couple showed up: the occupancy is no longer at risk of timing out.
    pub async fn wedding_accept(&self, venue: Venue) -> bool {
        self.state.lock().await.venue_mut(venue).accept()
    }

    pub async fn wedding_end(&self, venue: Venue) -> Option<ReservationId> {
        self.state.lock().await.venue_mut(venue).end()
    }

    pub async fn wedding_ongoing(&self, venue: Venue) -> Option<ReservationId> {
        self.state.lock().await.venue(venue).ongoing_id()
    }

    pub async fn wedding_ongoing_premium(&self, venue: Venue) -> Option<bool> {
        self.state.lock().await.venue(venue).ongoing_premium()
    }

    pub async fn wedding_is_guest(&self, venue: Venue, player: PlayerId) -> bool {
        self.state.lock().await.venue(venue).is_guest(player)
    }

    pub async fn wedding_couple_for_guest(
        &self,
        venue: Venue,
        guest: PlayerId,
    ) -> Option<(PlayerId, PlayerId)> {
        let ongoing = {
            let guard = self.state.lock().await;
            let q = guard.venue(venue);
            if !q.is_guest(guest) {
                return None;
            }
            q.ongoing_id()?
        };
        self.collab.relationships.couple(ongoing)
    }

    /// Offset of queue position `position` from the last ceremony start.
    pub fn wedding_relative_expire_time(&self, position: usize) -> Ms {
        (position as Ms).saturating_mul(self.config.reservation_interval_ms())
    }

    pub async fn wedding_ticket_expire_time(&self, position: usize) -> Ms {
        let clock = self.state.lock().await.ceremony_clock;
        clock.saturating_add(self.wedding_relative_expire_time(position))
    }

    /// Human-readable ETA, cathedral first. `None` if the id is not here.
    pub async fn wedding_time_left(&self, id: ReservationId) -> Option<String> {
        let guard = self.state.lock().await;
        let (venue, status) = Venue::ALL
            .iter()
            .map(|v| (*v, guard.venue(*v).status(id)))
            .find(|(_, s)| *s != ReservationStatus::NotFound)?;

        match status {
            ReservationStatus::Ongoing => Some(format!("{venue} - RIGHT NOW")),
            ReservationStatus::Queued(pos) => {
                let at = guard
                    .ceremony_clock
                    .saturating_add(self.wedding_relative_expire_time(pos));
                Some(format!("{venue} - {} from now", format_time_left(at.saturating_sub(now_ms()))))
            }
            ReservationStatus::NotFound => None,
        }
    }

    pub async fn wedding_snapshot(&self, venue: Venue) -> VenueSnapshot {
        self.state.lock().await.venue(venue).snapshot()
    }

    pub async fn debug_wedding_status(&self) {
        let guard = self.state.lock().await;
        for venue in Venue::ALL {
            let snapshot = guard.venue(venue).snapshot();
            match serde_json::to_string(&snapshot) {
                Ok(json) => debug!("{} {venue}: {json}", self.key),
                Err(e) => warn!("{} {venue}: snapshot not serializable: {e}", self.key),
            }
        }
        debug!("{} ceremony clock: {}", self.key, guard.ceremony_clock);
    }
}

/// Timer body: nobody accepted the occupancy in time.
async fn expire_occupancy(
    state: Weak<Mutex<SharedState>>,
    notify: Arc<NotifyHub>,
    venue: Venue,
    token: Ulid,
) {
    let Some(state) = state.upgrade() else { return };
    let mut guard = state.lock().await;
    if !guard.venue(venue).timeout_is(token) {
        debug!("{venue} occupancy timeout superseded");
        return;
    }
    let ended = guard.venue_mut(venue).end();
    drop(guard);

    metrics::counter!(WEDDING_TIMEOUTS_TOTAL).increment(1);
    if let Some(id) = ended {
        info!("{venue} ceremony {id} timed out");
        notify.send(Notice::OccupancyTimedOut { venue, id });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pads_to_delay_target() {
        let mut q = ReservationQueue::new(Venue::Chapel);
        assert_eq!(q.push(42, 3), 3);
        assert_eq!(q.status(42), ReservationStatus::Queued(3));
        assert_eq!(q.status(42).code(), 3);
        assert_eq!(q.pop_next(), Some(ReservationEntry::Placeholder));
        assert_eq!(q.pop_next(), Some(ReservationEntry::Placeholder));
        assert_eq!(q.pop_next(), Some(ReservationEntry::Reservation(42)));
        assert_eq!(q.pop_next(), None);
    }

    #[test]
    fn long_queue_gets_no_padding() {
        let mut q = ReservationQueue::new(Venue::Cathedral);
        q.push(1, 3);
        assert_eq!(q.push(2, 3), 4);
        assert_eq!(q.push(3, 3), 5);
        assert_eq!(q.status(2), ReservationStatus::Queued(4));
    }

    #[test]
    fn partially_drained_queue_pads_the_gap() {
        let mut q = ReservationQueue::new(Venue::Chapel);
        q.push(1, 4);
        q.pop_next();
        q.pop_next();
        // two entries remain: placeholder + 1
        assert_eq!(q.push(2, 4), 4);
        assert_eq!(q.status(1), ReservationStatus::Queued(2));
    }

    #[test]
    fn zero_target_never_pads() {
        let mut q = ReservationQueue::new(Venue::Chapel);
        assert_eq!(q.push(9, 0), 1);
        assert_eq!(q.status(9), ReservationStatus::Queued(1));
    }

    #[test]
    fn cancel_keeps_following_positions() {
        let mut q = ReservationQueue::new(Venue::Chapel);
        q.push(1, 1);
        q.push(2, 1);
        assert!(q.cancel(1));
        assert!(!q.cancel(1));
        assert_eq!(q.status(1), ReservationStatus::NotFound);
        assert_eq!(q.status(2), ReservationStatus::Queued(2));
    }

    #[test]
    fn end_is_idempotent_on_empty_venue() {
        let mut q = ReservationQueue::new(Venue::Chapel);
        assert_eq!(q.end(), None);
        assert_eq!(q.end(), None);
        assert!(!q.accept());
        assert!(!q.is_guest(1));
    }

    #[test]
    fn unknown_id_is_not_found() {
        let q = ReservationQueue::new(Venue::Chapel);
        assert_eq!(q.status(5).code(), -1);
    }

    #[test]
    fn time_left_formatting() {
        assert_eq!(format_time_left(42_000), "42 seconds");
        assert_eq!(format_time_left(61_000), "1 minutes, 1 seconds");
        assert_eq!(format_time_left(3_600_000 + 120_000 + 5_000), "1 hours, 2 minutes, 5 seconds");
        assert_eq!(format_time_left(-10), "0 seconds");
    }
}
