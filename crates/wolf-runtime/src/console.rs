use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::*;
use regex_macro::regex;

use crate::mods::{ModId, run_as};

/// Called with the command's arguments, not including the command name.
pub type CommandCallback = Arc<dyn Fn(&[String]) + Send + Sync>;

/// The name of the command that lists every other command.
const HELP_COMMAND: &str = "help";

#[derive(Clone)]
struct Command {
    owner: ModId,
    description: String,
    callback: CommandCallback,
}

/// The runtime's developer console: named commands that mods register, and a
/// scrollback of printed lines that whatever UI hosts the console displays.
pub struct Console {
    commands: RwLock<BTreeMap<String, Command>>,

    /// The printed lines, oldest first.
    output: Mutex<VecDeque<String>>,

    /// The maximum number of lines kept in [output](Self::output).
    output_limit: usize,

    visible: AtomicBool,
}

/// Splits a command line into words. Double quotes group words containing
/// spaces and are stripped.
pub fn tokenize(line: &str) -> Vec<String> {
    regex!(r#""([^"]*)"|(\S+)"#)
        .captures_iter(line)
        .filter_map(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().to_string())
        .collect()
}

impl Console {
    pub fn new(output_limit: usize) -> Self {
        Self {
            commands: Default::default(),
            output: Default::default(),
            output_limit: output_limit.max(1),
            visible: AtomicBool::new(false),
        }
    }

    /// Registers `name`. Registering a name again replaces the old command.
    pub fn add_command(
        &self,
        owner: ModId,
        name: impl Into<String>,
        callback: CommandCallback,
        description: impl Into<String>,
    ) {
        let name = name.into();
        let Ok(mut commands) = self.commands.write() else {
            return;
        };
        if let Some(old) = commands.get(&name)
            && old.owner != owner
        {
            warn!("{owner} replaced console command '{name}' from {}", old.owner);
        }
        commands.insert(
            name,
            Command {
                owner,
                description: description.into(),
                callback,
            },
        );
    }

    /// Removes `name` if `owner` registered it.
    pub fn remove_command(&self, owner: ModId, name: &str) -> bool {
        let Ok(mut commands) = self.commands.write() else {
            return false;
        };
        if commands.get(name).is_some_and(|c| c.owner == owner) {
            commands.remove(name);
            true
        } else {
            false
        }
    }

    /// Drops every command `owner` registered.
    pub fn remove_mod(&self, owner: ModId) {
        if let Ok(mut commands) = self.commands.write() {
            commands.retain(|_, c| c.owner != owner);
        }
    }

    /// Parses and runs `line`. Returns whether a command was found.
    pub fn execute(&self, line: &str) -> bool {
        let mut words = tokenize(line);
        if words.is_empty() {
            return false;
        }
        let name = words.remove(0);
        self.print(format!("> {}", line.trim()));

        if name == HELP_COMMAND {
            self.print_help();
            return true;
        }

        let command = self
            .commands
            .read()
            .ok()
            .and_then(|commands| commands.get(&name).cloned());
        match command {
            Some(command) => {
                run_as(command.owner, &name, || (command.callback)(&words));
                true
            }
            None => {
                self.print(format!("Unknown command '{name}'. Type '{HELP_COMMAND}' for a list."));
                false
            }
        }
    }

    fn print_help(&self) {
        let lines = self
            .commands()
            .into_iter()
            .map(|(name, description)| {
                if description.is_empty() {
                    name
                } else {
                    format!("{name} - {description}")
                }
            })
            .collect::<Vec<_>>();
        self.print(format!("{HELP_COMMAND} - Lists every command"));
        for line in lines {
            self.print(line);
        }
    }

    /// Returns every `(name, description)` pair, sorted by name.
    pub fn commands(&self) -> Vec<(String, String)> {
        self.commands
            .read()
            .map(|commands| {
                commands
                    .iter()
                    .map(|(name, c)| (name.clone(), c.description.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Appends a line to the console output, dropping the oldest line once the
    /// limit is reached.
    pub fn print(&self, message: impl Into<String>) {
        let message = message.into();
        info!("[Console] {message}");
        if let Ok(mut output) = self.output.lock() {
            if output.len() >= self.output_limit {
                output.pop_front();
            }
            output.push_back(message);
        }
    }

    /// Returns a copy of the console output, oldest first.
    pub fn output(&self) -> Vec<String> {
        self.output
            .lock()
            .map(|o| o.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Relaxed)
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Relaxed);
    }

    /// Flips visibility and returns the new state.
    pub fn toggle(&self) -> bool {
        !self.visible.fetch_xor(true, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_handles_quotes() {
        assert_eq!(
            tokenize(r#"give  "Golden Peach" 3"#),
            vec!["give", "Golden Peach", "3"]
        );
        assert!(tokenize("   ").is_empty());
    }

    #[test]
    fn test_execute_passes_arguments() {
        let console = Console::new(10);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        console.add_command(
            ModId(1),
            "give",
            Arc::new(move |args: &[String]| sink.lock().unwrap().extend_from_slice(args)),
            "Gives an item",
        );

        assert!(console.execute("give 0x13 1"));
        assert_eq!(*seen.lock().unwrap(), vec!["0x13", "1"]);
        assert!(!console.execute("take 0x13"));
        assert!(!console.execute(""));
    }

    #[test]
    fn test_remove_command_checks_owner() {
        let console = Console::new(10);
        console.add_command(ModId(1), "warp", Arc::new(|_: &[String]| {}), "");
        assert!(!console.remove_command(ModId(2), "warp"));
        assert!(console.remove_command(ModId(1), "warp"));
        assert!(!console.execute("warp"));
    }

    #[test]
    fn test_help_lists_commands() {
        let console = Console::new(50);
        console.add_command(ModId(1), "warp", Arc::new(|_: &[String]| {}), "Warps");
        assert!(console.execute("help"));
        assert!(console.output().iter().any(|line| line == "warp - Warps"));
    }

    #[test]
    fn test_output_is_bounded() {
        let console = Console::new(3);
        for i in 0..5 {
            console.print(i.to_string());
        }
        assert_eq!(console.output(), vec!["2", "3", "4"]);
    }

    #[test]
    fn test_visibility() {
        let console = Console::new(3);
        assert!(!console.is_visible());
        assert!(console.toggle());
        assert!(console.is_visible());
        console.set_visible(false);
        assert!(!console.is_visible());
    }
}
