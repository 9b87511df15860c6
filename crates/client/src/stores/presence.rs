//! Ephemeral presence: who is typing and who is online.
//!
//! Nothing here is persisted. Typing entries expire on their own timers;
//! there is no periodic sweep.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use haven_shared::Participant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::trace;

/// How long a typing indicator lives without a refresh.
pub const DEFAULT_TYPING_TTL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingEntry {
    pub participant_id: String,
    pub display_name: String,
    pub expires_at: Instant,
}

#[derive(Debug)]
struct Slot {
    entry: TypingEntry,
    token: u64,
    expiry: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct TypingState {
    next_token: u64,
    slots: HashMap<String, Slot>,
}

/// Tracks typing indicators of remote participants.
///
/// Cloning shares the same set. Must be used inside a tokio runtime since
/// every entry owns an expiry task.
#[derive(Debug, Clone)]
pub struct TypingTracker {
    inner: Arc<Mutex<TypingState>>,
    summary: Arc<watch::Sender<Option<String>>>,
    ttl: Duration,
}

impl Default for TypingTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TYPING_TTL)
    }
}

impl TypingTracker {
    pub fn new(ttl: Duration) -> Self {
        let (summary, _) = watch::channel(None);
        Self {
            inner: Arc::new(Mutex::new(TypingState::default())),
            summary: Arc::new(summary),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Inserts or refreshes an entry. Expiry is measured from this call; the
    /// previous timeout, if any, is cancelled.
    pub fn start(&self, participant_id: &str, display_name: &str) {
        let expires_at = Instant::now() + self.ttl;
        {
            let Ok(mut state) = self.inner.lock() else {
                return;
            };
            state.next_token += 1;
            let token = state.next_token;

            let expiry = tokio::spawn(expire(
                Arc::downgrade(&self.inner),
                Arc::downgrade(&self.summary),
                participant_id.to_string(),
                token,
                expires_at,
            ));
            let slot = Slot {
                entry: TypingEntry {
                    participant_id: participant_id.to_string(),
                    display_name: display_name.to_string(),
                    expires_at,
                },
                token,
                expiry,
            };
            if let Some(previous) = state.slots.insert(participant_id.to_string(), slot) {
                previous.expiry.abort();
            }
        }
        self.publish();
    }

    /// Removes an entry immediately.
    pub fn stop(&self, participant_id: &str) {
        let removed = match self.inner.lock() {
            Ok(mut state) => state.slots.remove(participant_id),
            Err(_) => None,
        };
        if let Some(slot) = removed {
            slot.expiry.abort();
            self.publish();
        }
    }

    /// Drops every entry, e.g. when the connection goes away.
    pub fn clear(&self) {
        let drained: Vec<Slot> = match self.inner.lock() {
            Ok(mut state) => state.slots.drain().map(|(_, slot)| slot).collect(),
            Err(_) => Vec::new(),
        };
        if drained.is_empty() {
            return;
        }
        for slot in drained {
            slot.expiry.abort();
        }
        self.publish();
    }

    pub fn is_typing(&self, participant_id: &str) -> bool {
        self.inner
            .lock()
            .map(|state| state.slots.contains_key(participant_id))
            .unwrap_or(false)
    }

    /// Current entries, sorted by display name.
    pub fn entries(&self) -> Vec<TypingEntry> {
        let mut entries: Vec<TypingEntry> = match self.inner.lock() {
            Ok(state) => state.slots.values().map(|s| s.entry.clone()).collect(),
            Err(_) => Vec::new(),
        };
        entries.sort_by(|a, b| {
            a.display_name
                .cmp(&b.display_name)
                .then_with(|| a.participant_id.cmp(&b.participant_id))
        });
        entries
    }

    /// "Ana is typing", "Ana and Ben are typing" or
    /// "Ana, Ben and 2 others are typing". `None` when nobody is typing.
    pub fn summary(&self) -> Option<String> {
        let names: Vec<String> = self.entries().into_iter().map(|e| e.display_name).collect();
        summarize(&names)
    }

    /// Receiver that sees the summary change whenever the set changes.
    pub fn watch(&self) -> watch::Receiver<Option<String>> {
        self.summary.subscribe()
    }

    fn publish(&self) {
        self.summary.send_replace(self.summary());
    }
}

async fn expire(
    inner: Weak<Mutex<TypingState>>,
    summary: Weak<watch::Sender<Option<String>>>,
    participant_id: String,
    token: u64,
    expires_at: Instant,
) {
    sleep_until(expires_at).await;

    let (Some(inner), Some(summary)) = (inner.upgrade(), summary.upgrade()) else {
        return;
    };
    let tracker = TypingTracker {
        inner,
        summary,
        ttl: Duration::ZERO,
    };
    let expired = match tracker.inner.lock() {
        Ok(mut state) => {
            // A refresh replaced the slot; that slot owns its own timer.
            if state.slots.get(&participant_id).map(|s| s.token) == Some(token) {
                state.slots.remove(&participant_id);
                true
            } else {
                false
            }
        }
        Err(_) => false,
    };
    if expired {
        trace!(participant_id, "Typing indicator expired");
        tracker.publish();
    }
}

fn summarize(names: &[String]) -> Option<String> {
    match names {
        [] => None,
        [one] => Some(format!("{one} is typing")),
        [first, second] => Some(format!("{first} and {second} are typing")),
        [first, second, rest @ ..] => {
            let others = if rest.len() == 1 { "other" } else { "others" };
            Some(format!(
                "{first}, {second} and {} {others} are typing",
                rest.len()
            ))
        }
    }
}

/// Participants currently present in a room, keyed by id.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OnlineRoster {
    participants: BTreeMap<String, Participant>,
}

impl OnlineRoster {
    /// Returns true if the participant was not already present.
    pub fn join(&mut self, participant: Participant) -> bool {
        self.participants
            .insert(participant.id.clone(), participant)
            .is_none()
    }

    pub fn leave(&mut self, participant_id: &str) -> Option<Participant> {
        self.participants.remove(participant_id)
    }

    pub fn contains(&self, participant_id: &str) -> bool {
        self.participants.contains_key(participant_id)
    }

    /// Participants sorted by name.
    pub fn participants(&self) -> Vec<Participant> {
        let mut list: Vec<Participant> = self.participants.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        list
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{advance, sleep};

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl() {
        let tracker = TypingTracker::new(Duration::from_secs(3));
        tracker.start("u-2", "Ben");
        assert!(tracker.is_typing("u-2"));

        sleep(Duration::from_millis(2900)).await;
        assert!(tracker.is_typing("u-2"));
        sleep(Duration::from_millis(200)).await;
        assert!(!tracker.is_typing("u-2"));
        assert_eq!(tracker.summary(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_measures_expiry_from_latest_start() {
        let tracker = TypingTracker::new(Duration::from_secs(3));
        tracker.start("u-2", "Ben");
        sleep(Duration::from_secs(2)).await;
        tracker.start("u-2", "Ben");

        // The first timer would have fired at 3s.
        sleep(Duration::from_millis(1500)).await;
        assert!(tracker.is_typing("u-2"));

        sleep(Duration::from_millis(1600)).await;
        assert!(!tracker.is_typing("u-2"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_removes_immediately() {
        let tracker = TypingTracker::default();
        tracker.start("u-2", "Ben");
        tracker.stop("u-2");
        assert!(!tracker.is_typing("u-2"));
        advance(Duration::from_secs(5)).await;
        assert!(tracker.entries().is_empty());
    }

    #[tokio::test]
    async fn summary_is_sorted_and_collapsed() {
        let tracker = TypingTracker::default();
        tracker.start("u-3", "Cleo");
        assert_eq!(tracker.summary().as_deref(), Some("Cleo is typing"));
        tracker.start("u-1", "Ana");
        assert_eq!(tracker.summary().as_deref(), Some("Ana and Cleo are typing"));
        tracker.start("u-2", "Ben");
        assert_eq!(
            tracker.summary().as_deref(),
            Some("Ana, Ben and 1 other are typing")
        );
        tracker.start("u-4", "Dev");
        assert_eq!(
            tracker.summary().as_deref(),
            Some("Ana, Ben and 2 others are typing")
        );
        assert_eq!(
            tracker.watch().borrow().as_deref(),
            Some("Ana, Ben and 2 others are typing")
        );
        tracker.clear();
        assert_eq!(*tracker.watch().borrow(), None);
    }

    #[test]
    fn roster_tracks_joins_and_leaves() {
        let mut roster = OnlineRoster::default();
        assert!(roster.join(Participant {
            id: "u-2".into(),
            name: "Ben".into()
        }));
        assert!(roster.join(Participant {
            id: "u-1".into(),
            name: "Ana".into()
        }));
        assert!(!roster.join(Participant {
            id: "u-1".into(),
            name: "Ana".into()
        }));
        let names: Vec<String> = roster.participants().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Ana", "Ben"]);
        assert!(roster.leave("u-2").is_some());
        assert!(!roster.contains("u-2"));
        assert_eq!(roster.len(), 1);
    }
}
