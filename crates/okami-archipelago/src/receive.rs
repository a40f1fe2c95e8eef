//! Buffering items from the server until the game can take them.

use std::mem;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use log::*;

use crate::rewards::{self, GameState};

/// Toggles location checking while items are granted, so items that trip
/// checks don't send them back to the server.
pub type CheckSendingCallback = Box<dyn Fn(bool) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueuedItem {
    id: i64,
    name: String,
}

/// Items received from the server that haven't been granted yet.
///
/// Items can be queued from any thread. They're only granted while the player
/// is in gameplay, between [GameEvent::PlayStart] and
/// [GameEvent::ReturnToMenu].
///
/// [GameEvent::PlayStart]: wolf_runtime::GameEvent::PlayStart
/// [GameEvent::ReturnToMenu]: wolf_runtime::GameEvent::ReturnToMenu
#[derive(Default)]
pub struct ItemQueue {
    pending: Mutex<Vec<QueuedItem>>,

    /// Whether the game is in a state where items can safely be granted.
    safe_to_receive: AtomicBool,

    /// Notifications for items that have been granted, oldest first.
    granted: Mutex<Vec<String>>,

    on_check_sending: Option<CheckSendingCallback>,
}

impl ItemQueue {
    pub fn new() -> Self {
        Default::default()
    }

    /// Creates a queue that calls `callback` with `false` before granting a
    /// batch of items and `true` afterwards.
    pub fn with_check_sending(callback: CheckSendingCallback) -> Self {
        Self {
            on_check_sending: Some(callback),
            ..Default::default()
        }
    }

    /// Queues the Archipelago item `id` to be granted later.
    pub fn receive(&self, id: i64, name: impl Into<String>) {
        let name = name.into();
        debug!("Queued {name} ({id:#x})");
        if let Ok(mut pending) = self.pending.lock() {
            pending.push(QueuedItem { id, name });
        }
    }

    pub fn set_safe_to_receive(&self, safe: bool) {
        self.safe_to_receive.store(safe, Ordering::SeqCst);
    }

    pub fn is_safe_to_receive(&self) -> bool {
        self.safe_to_receive.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.pending.lock().map_or(0, |p| p.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops everything queued and stops granting until the next
    /// [set_safe_to_receive](Self::set_safe_to_receive).
    pub fn reset(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
        self.set_safe_to_receive(false);
    }

    /// Grants every queued item to `state` and empties the queue. Does
    /// nothing while it isn't safe to receive items.
    ///
    /// Returns whether every item was granted. Items that fail are logged and
    /// dropped rather than retried, since a partial grant can't be undone.
    /// Nothing failed when the queue is empty or gated, so both return `true`
    /// and leave the queue as it was.
    pub fn handle(&self, state: &mut impl GameState) -> bool {
        if !self.is_safe_to_receive() {
            return true;
        }
        let batch = match self.pending.lock() {
            Ok(mut pending) if !pending.is_empty() => mem::take(&mut *pending),
            _ => return true,
        };

        if let Some(callback) = &self.on_check_sending {
            callback(false);
        }

        let mut all_succeeded = true;
        for item in batch {
            info!("Granting {} ({:#x})", item.name, item.id);
            match rewards::grant_id(state, item.id) {
                Ok(_) => {
                    if let Ok(mut granted) = self.granted.lock() {
                        granted.push(format!("Received: {}", item.name));
                    }
                }
                Err(err) => {
                    warn!("Failed to grant {} ({:#x}): {err:#}", item.name, item.id);
                    all_succeeded = false;
                }
            }
        }

        if let Some(callback) = &self.on_check_sending {
            callback(true);
        }
        all_succeeded
    }

    /// Returns and clears the notifications for granted items.
    pub fn take_notifications(&self) -> Vec<String> {
        self.granted
            .lock()
            .map(|mut g| mem::take(&mut *g))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::rewards::tests::FakeState;

    #[test]
    fn test_items_wait_for_gameplay() {
        let queue = ItemQueue::new();
        let mut state = FakeState::default();
        queue.receive(0x300, "Progressive Mirror");

        assert!(queue.handle(&mut state));
        assert_eq!(queue.len(), 1);
        assert!(state.given.is_empty());

        queue.set_safe_to_receive(true);
        assert!(queue.handle(&mut state));
        assert!(queue.is_empty());
        assert_eq!(state.given, vec![(0x13, 1)]);
        assert_eq!(queue.take_notifications(), vec!["Received: Progressive Mirror"]);
        assert!(queue.take_notifications().is_empty());
    }

    #[test]
    fn test_unknown_item_reports_failure_and_clears() {
        let queue = ItemQueue::new();
        let mut state = FakeState::default();
        queue.set_safe_to_receive(true);
        queue.receive(0xFFFF, "Mystery");
        queue.receive(0x100, "Sunrise");

        assert!(!queue.handle(&mut state));
        assert!(queue.is_empty());
        assert!(state.brushes.contains(&0));
    }

    #[test]
    fn test_reset_drops_pending_items() {
        let queue = ItemQueue::new();
        queue.set_safe_to_receive(true);
        queue.receive(0x100, "Sunrise");
        queue.reset();
        assert!(queue.is_empty());
        assert!(!queue.is_safe_to_receive());
    }

    #[test]
    fn test_check_sending_toggled_around_batch() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let queue = ItemQueue::with_check_sending(Box::new(move |enabled| {
            sink.lock().unwrap().push(enabled);
        }));
        let mut state = FakeState::default();
        queue.set_safe_to_receive(true);

        queue.handle(&mut state);
        assert!(calls.lock().unwrap().is_empty());

        queue.receive(0x101, "Rejuvenation");
        queue.handle(&mut state);
        assert_eq!(*calls.lock().unwrap(), vec![false, true]);
    }
}
