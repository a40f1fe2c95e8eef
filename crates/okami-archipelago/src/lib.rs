use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use anyhow::{Result, bail};
use log::*;
use regex_macro::regex;
use wolf_runtime::{GameEvent, ModApi, ModLifecycle, wolf_mod};

pub mod checks;
pub mod config;
pub mod game;
pub mod items;
pub mod receive;
pub mod rewards;

use checks::{CheckTracker, LocationMonitors};
use config::ClientConfig;
use game::GameMemory;
use items::ItemDef;
use receive::ItemQueue;

wolf_mod!(OkamiArchipelago);

/// The client's state once the game has finished loading.
struct Client {
    api: ModApi,
    config: ClientConfig,
    queue: ItemQueue,
    memory: Mutex<GameMemory<ModApi>>,
    monitors: LocationMonitors<ModApi>,

    /// Ticks since items were last granted.
    ticks: AtomicU32,
}

static CLIENT: OnceLock<Client> = OnceLock::new();

/// The Archipelago client mod.
pub struct OkamiArchipelago;

impl ModLifecycle for OkamiArchipelago {
    fn name(&self) -> String {
        "Okami Archipelago".to_string()
    }

    fn version(&self) -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }

    fn late_init(&self) {
        match start() {
            Ok(()) => info!("Archipelago client ready"),
            Err(err) => error!("Archipelago client failed to start: {err:?}"),
        }
    }

    fn shutdown(&self) {
        if let Some(client) = CLIENT.get() {
            client.queue.reset();
            client.monitors.leave_gameplay();
        }
        info!("Archipelago client shut down");
    }
}

/// Resolves the game's memory, starts watching for location checks and
/// registers the client's event handlers and console commands.
fn start() -> Result<()> {
    let Some(api) = wolf_runtime::sdk::api() else {
        bail!("Not connected to the runtime");
    };
    api.set_log_prefix("[APClient]");

    let config = ClientConfig::load(config::CONFIG_FILE_NAME);
    let memory = GameMemory::new(api)?;
    debug!("{} is at {:#x}", game::MAIN_MODULE, memory.base());

    let monitors = LocationMonitors::create(api, Arc::new(CheckTracker::new()));
    info!("Watching {} flag region(s) for location checks", monitors.len());

    let client = Client {
        api,
        config,
        queue: ItemQueue::with_check_sending(Box::new(|enabled| {
            with_client(|c| c.set_check_sending(enabled))
        })),
        memory: Mutex::new(memory),
        monitors,
        ticks: AtomicU32::new(0),
    };
    if CLIENT.set(client).is_err() {
        bail!("The client was already started");
    }

    api.on(GameEvent::PlayStart, || with_client(Client::play_start));
    api.on(GameEvent::ReturnToMenu, || with_client(Client::return_to_menu));
    api.on(GameEvent::GameTick, || with_client(Client::tick));
    api.on_item_pickup(|item_id, quantity| {
        with_client(|c| {
            c.monitors.tracker().on_item_pickup(item_id, quantity);
        })
    });

    api.add_command("ap_give", "Queue an item by id or name: ap_give <id|name>", |args| {
        with_client(|c| c.give_command(args))
    });
    api.add_command("ap_status", "Show the item queue's state", |_| {
        with_client(Client::status_command)
    });
    api.add_command("ap_checks", "Show and flush the location checks found so far", |_| {
        with_client(Client::checks_command)
    });
    Ok(())
}

fn with_client(f: impl FnOnce(&Client)) {
    if let Some(client) = CLIENT.get() {
        f(client);
    }
}

impl Client {
    fn play_start(&self) {
        self.monitors.enter_gameplay();
        self.queue.set_safe_to_receive(true);
    }

    fn return_to_menu(&self) {
        self.monitors.leave_gameplay();
        self.queue.set_safe_to_receive(false);
    }

    fn set_check_sending(&self, enabled: bool) {
        if enabled {
            self.monitors.end_grants();
        } else {
            self.monitors.begin_grants();
        }
    }

    fn tick(&self) {
        self.monitors.poll();

        let ticks = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        if ticks < self.config.grant_interval() || self.queue.is_empty() {
            return;
        }
        self.ticks.store(0, Ordering::Relaxed);

        let Ok(mut memory) = self.memory.lock() else {
            return;
        };
        if !self.queue.handle(&mut *memory) {
            warn!("Some items couldn't be granted");
        }
        for line in self.queue.take_notifications() {
            if self.config.log_grants_to_console {
                self.api.console_print(&line);
            }
        }
    }

    fn checks_command(&self) {
        let tracker = self.monitors.tracker();
        let outbox = tracker.take_outbox();
        self.api.console_print(&format!(
            "{} check(s) found, {} new since last asked",
            tracker.sent_count(),
            outbox.len()
        ));
        for id in outbox {
            let category = checks::CheckCategory::of(id)
                .map_or_else(|| "unknown".to_string(), |c| c.to_string());
            self.api.console_print(&format!("  {id} ({category})"));
        }
    }

    fn give_command(&self, args: &[String]) {
        let query = args.join(" ");
        match parse_item(&query) {
            Some(item) => {
                self.queue.receive(item.id, item.name);
                self.api
                    .console_print(&format!("Queued {} ({:#x})", item.name, item.id));
            }
            None => self.api.console_print(&format!("Unknown item: {query}")),
        }
    }

    fn status_command(&self) {
        self.api.console_print(&format!(
            "{} item(s) queued, {}",
            self.queue.len(),
            if self.queue.is_safe_to_receive() {
                "granting"
            } else {
                "waiting for gameplay"
            }
        ));
    }
}

/// Looks up an item from console input: a `0x` hex id, a decimal id or a
/// name.
fn parse_item(query: &str) -> Option<&'static ItemDef> {
    let query = query.trim();
    if let Some(captures) = regex!(r"^0[xX]([0-9a-fA-F]+)$").captures(query) {
        return i64::from_str_radix(&captures[1], 16)
            .ok()
            .and_then(items::find_item);
    }
    if let Ok(id) = query.parse::<i64>() {
        return items::find_item(id);
    }
    items::find_item_by_name(query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_item() {
        assert_eq!(parse_item("0x300").map(|i| i.name), Some("Progressive Mirror"));
        assert_eq!(parse_item("256").map(|i| i.name), Some("Sunrise"));
        assert_eq!(parse_item(" cherry bomb ").map(|i| i.id), Some(0x103));
        assert!(parse_item("0xFFFF").is_none());
        assert!(parse_item("").is_none());
    }
}
