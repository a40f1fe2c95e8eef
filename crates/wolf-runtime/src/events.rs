use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::*;
use strum::{Display, EnumIter};

use crate::mods::{ModId, run_as};

/// A game event that carries no data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum GameEvent {
    /// Once per frame of the game's main loop.
    GameTick,

    /// The game finished booting.
    GameStart,

    /// The game is shutting down.
    GameStop,

    /// The player loaded into a save and gained control.
    PlayStart,

    /// The player quit back to the title menu.
    ReturnToMenu,
}

pub type EventCallback = Arc<dyn Fn() + Send + Sync>;

/// Called with `(item_id, count)` when the player picks something up.
pub type ItemPickupCallback = Arc<dyn Fn(i32, i32) + Send + Sync>;

/// A callback whose `true` result blocks the game's default handling. Used for
/// blocking item pickups `(item_id, count)` and brush edits
/// `(bit_index, operation)`.
pub type BlockingCallback = Arc<dyn Fn(i32, i32) -> bool + Send + Sync>;

#[derive(Clone)]
struct Registered<C> {
    owner: ModId,
    callback: C,
}

/// Per-event callback lists, each kept in registration order.
#[derive(Default)]
pub struct EventBus {
    game: RwLock<HashMap<GameEvent, Vec<Registered<EventCallback>>>>,
    item_pickup: RwLock<Vec<Registered<ItemPickupCallback>>>,
    item_pickup_blocking: RwLock<Vec<Registered<BlockingCallback>>>,
    brush_edit: RwLock<Vec<Registered<BlockingCallback>>>,
}

/// Copies a callback list out from under its lock so callbacks can freely
/// register more callbacks while they run.
fn snapshot<C: Clone>(list: &RwLock<Vec<Registered<C>>>) -> Vec<Registered<C>> {
    list.read().map(|l| l.clone()).unwrap_or_default()
}

fn push<C>(list: &RwLock<Vec<Registered<C>>>, owner: ModId, callback: C) {
    if let Ok(mut list) = list.write() {
        list.push(Registered { owner, callback });
    }
}

fn retain_others<C>(list: &RwLock<Vec<Registered<C>>>, owner: ModId) {
    if let Ok(mut list) = list.write() {
        list.retain(|r| r.owner != owner);
    }
}

/// Runs every blocking callback and returns whether any of them asked to
/// block. A callback that panics counts as not blocking.
fn dispatch_blocking(
    list: &RwLock<Vec<Registered<BlockingCallback>>>,
    what: &str,
    a: i32,
    b: i32,
) -> bool {
    let mut blocked = false;
    for registered in snapshot(list) {
        let result = run_as(registered.owner, what, || (registered.callback)(a, b));
        blocked |= result.unwrap_or(false);
    }
    blocked
}

impl EventBus {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers `callback` to run whenever `event` fires.
    pub fn on(&self, event: GameEvent, owner: ModId, callback: EventCallback) {
        if let Ok(mut game) = self.game.write() {
            game.entry(event)
                .or_default()
                .push(Registered { owner, callback });
        }
    }

    pub fn on_item_pickup(&self, owner: ModId, callback: ItemPickupCallback) {
        push(&self.item_pickup, owner, callback);
    }

    pub fn on_item_pickup_blocking(&self, owner: ModId, callback: BlockingCallback) {
        push(&self.item_pickup_blocking, owner, callback);
    }

    pub fn on_brush_edit(&self, owner: ModId, callback: BlockingCallback) {
        push(&self.brush_edit, owner, callback);
    }

    /// Fires `event`, running each callback as its owning mod.
    pub fn dispatch(&self, event: GameEvent) {
        let callbacks = self
            .game
            .read()
            .ok()
            .and_then(|game| game.get(&event).cloned())
            .unwrap_or_default();
        if event != GameEvent::GameTick {
            debug!("Dispatching {event} to {} callback(s)", callbacks.len());
        }
        let what = event.to_string();
        for registered in callbacks {
            run_as(registered.owner, &what, || (registered.callback)());
        }
    }

    pub fn dispatch_item_pickup(&self, item_id: i32, count: i32) {
        for registered in snapshot(&self.item_pickup) {
            run_as(registered.owner, "item pickup", || {
                (registered.callback)(item_id, count)
            });
        }
    }

    /// Asks every blocking pickup handler about `item_id`. Returns `true` if
    /// any of them blocked it, and `false` if there are none.
    pub fn dispatch_item_pickup_blocking(&self, item_id: i32, count: i32) -> bool {
        dispatch_blocking(&self.item_pickup_blocking, "item pickup", item_id, count)
    }

    /// Asks every brush handler about an edit. Returns `true` if any of them
    /// blocked it.
    pub fn dispatch_brush_edit(&self, bit_index: i32, operation: i32) -> bool {
        dispatch_blocking(&self.brush_edit, "brush edit", bit_index, operation)
    }

    /// Returns the number of callbacks registered for `event`.
    pub fn count(&self, event: GameEvent) -> usize {
        self.game
            .read()
            .ok()
            .and_then(|game| game.get(&event).map(Vec::len))
            .unwrap_or(0)
    }

    /// Drops every callback `owner` registered.
    pub fn remove_mod(&self, owner: ModId) {
        if let Ok(mut game) = self.game.write() {
            for list in game.values_mut() {
                list.retain(|r| r.owner != owner);
            }
        }
        retain_others(&self.item_pickup, owner);
        retain_others(&self.item_pickup_blocking, owner);
        retain_others(&self.brush_edit, owner);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use strum::IntoEnumIterator;

    use super::*;
    use crate::mods::current_mod_id;

    #[test]
    fn test_dispatch_preserves_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            bus.on(
                GameEvent::PlayStart,
                ModId(1),
                Arc::new(move || order.lock().unwrap().push(i)),
            );
        }
        bus.dispatch(GameEvent::PlayStart);
        bus.dispatch(GameEvent::ReturnToMenu);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_callbacks_run_as_their_owner() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for owner in [ModId(4), ModId(9)] {
            let seen = seen.clone();
            bus.on(
                GameEvent::GameTick,
                owner,
                Arc::new(move || seen.lock().unwrap().push(current_mod_id())),
            );
        }
        bus.dispatch(GameEvent::GameTick);
        assert_eq!(*seen.lock().unwrap(), vec![ModId(4), ModId(9)]);
    }

    #[test]
    fn test_panicking_callback_does_not_stop_others() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        fn bad_mod() {
            panic!("bad mod");
        }
        bus.on(GameEvent::GameStart, ModId(1), Arc::new(bad_mod));
        let counter = hits.clone();
        bus.on(
            GameEvent::GameStart,
            ModId(2),
            Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        bus.dispatch(GameEvent::GameStart);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_blocking_pickup_is_or_of_all_callbacks() {
        let bus = EventBus::new();
        assert!(!bus.dispatch_item_pickup_blocking(0x13, 1));

        let calls = Arc::new(AtomicUsize::new(0));
        let first = calls.clone();
        bus.on_item_pickup_blocking(
            ModId(1),
            Arc::new(move |item, _| {
                first.fetch_add(1, Ordering::SeqCst);
                item == 0x13
            }),
        );
        let second = calls.clone();
        bus.on_item_pickup_blocking(
            ModId(2),
            Arc::new(move |_, _| {
                second.fetch_add(1, Ordering::SeqCst);
                false
            }),
        );

        assert!(bus.dispatch_item_pickup_blocking(0x13, 1));
        assert!(!bus.dispatch_item_pickup_blocking(0x14, 1));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_brush_edit_blocking() {
        let bus = EventBus::new();
        bus.on_brush_edit(ModId(1), Arc::new(|bit, _| bit == 4));
        assert!(bus.dispatch_brush_edit(4, 1));
        assert!(!bus.dispatch_brush_edit(5, 1));
    }

    #[test]
    fn test_remove_mod_drops_its_callbacks() {
        let bus = EventBus::new();
        for event in GameEvent::iter() {
            bus.on(event, ModId(1), Arc::new(|| {}));
            bus.on(event, ModId(2), Arc::new(|| {}));
        }
        bus.on_item_pickup(ModId(1), Arc::new(|_, _| {}));
        bus.on_brush_edit(ModId(1), Arc::new(|_, _| true));

        bus.remove_mod(ModId(1));
        for event in GameEvent::iter() {
            assert_eq!(bus.count(event), 1);
        }
        assert!(!bus.dispatch_brush_edit(0, 0));
    }
}
