use std::any::Any;
use std::fs;
use std::panic::{self, Location};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use backtrace::Backtrace;
use chrono::prelude::*;
use log::*;
use simplelog::{ColorChoice, CombinedLogger, SharedLogger, TermLogger, TerminalMode, WriteLogger};

pub mod api;
pub mod bitfield;
pub mod config;
pub mod console;
pub mod error;
pub mod events;
pub mod flags;
pub mod gui;
pub mod hooks;
#[cfg(windows)]
pub mod loader;
pub mod memory;
pub mod mods;
pub mod monitor;
pub mod resources;
pub mod runtime;
pub mod sdk;

pub use config::RuntimeConfig;
pub use error::Error;
pub use events::GameEvent;
pub use mods::{ModId, ModLifecycle, ModLogLevel, VERSION, VERSION_INT};
pub use runtime::Runtime;
pub use sdk::ModApi;

/// The dated log files are named `wolf-<yyyy>-<mm>-<dd>.log`.
pub const LOG_FILE_PREFIX: &str = "wolf";

/// Installs a panic hook that reports any panic in the process, mods
/// included, to the runtime log and to a message box, so players see it even
/// without a console.
pub fn handle_panics() {
    panic::set_hook(Box::new(|info| {
        let report = format!(
            "{}\n{:?}",
            describe_panic(info.payload(), info.location()),
            Backtrace::new()
        );
        error!("{report}");
        message_box(report);
    }));
}

fn describe_panic(payload: &(dyn Any + Send), location: Option<&Location>) -> String {
    let what = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string payload");
    match location {
        Some(location) => format!("Wolf runtime panicked: {what} at {location}"),
        None => format!("Wolf runtime panicked: {what}"),
    }
}

/// Pops up `message` in a blocking message box.
#[cfg(windows)]
fn message_box(message: impl Into<String>) {
    use windows::Win32::UI::WindowsAndMessaging::MessageBoxW;
    use windows::core::{HSTRING, w};

    unsafe {
        MessageBoxW(
            None,
            &HSTRING::from(message.into()),
            w!("Wolf Runtime"),
            Default::default(),
        );
    }
}

#[cfg(not(windows))]
fn message_box(_message: impl Into<String>) {}

/// Returns the directory the runtime's own module was loaded from. Config
/// files, logs and mods are all found relative to it.
#[cfg(windows)]
pub fn runtime_directory() -> Result<PathBuf> {
    use anyhow::bail;
    use windows::Win32::Foundation::HMODULE;
    use windows::Win32::System::LibraryLoader::{
        GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS, GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
        GetModuleFileNameW, GetModuleHandleExW,
    };
    use windows::core::PCWSTR;

    let mut module = HMODULE::default();
    unsafe {
        GetModuleHandleExW(
            GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS | GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
            PCWSTR(runtime_directory as *const () as *const u16),
            &mut module,
        )?;
    }

    let mut buffer = vec![0u16; 1024];
    let len = unsafe { GetModuleFileNameW(Some(module), &mut buffer) } as usize;
    if len == 0 {
        bail!("Couldn't determine the runtime's module path");
    }
    let path = PathBuf::from(String::from_utf16_lossy(&buffer[..len]));
    match path.parent() {
        Some(dir) => Ok(dir.to_path_buf()),
        None => bail!("{} has no parent directory", path.display()),
    }
}

#[cfg(not(windows))]
pub fn runtime_directory() -> Result<PathBuf> {
    Ok(std::env::current_dir()?)
}

/// Starts logging to the terminal and to today's log file in the directory
/// `config` names, resolved against `runtime_dir`. Players attach that file
/// to bug reports.
///
/// A log file that can't be opened is reported through the terminal logger
/// and doesn't stop the runtime.
pub fn start_logger(runtime_dir: impl AsRef<Path>, config: &RuntimeConfig) -> Result<()> {
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        config.terminal_log_level.into(),
        simplelog::Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];

    let log_dir = config.log_directory(runtime_dir);
    let file_error = match open_log_file(&log_dir, Local::now().date_naive()) {
        Ok(file) => {
            loggers.push(WriteLogger::new(
                config.log_level.into(),
                simplelog::Config::default(),
                file,
            ));
            None
        }
        Err(err) => Some(err),
    };
    CombinedLogger::init(loggers)?;

    match file_error {
        None => info!("Wolf runtime {} logging to {}", mods::VERSION, log_dir.display()),
        Some(err) => warn!("No log file in {}: {err:#}", log_dir.display()),
    }
    Ok(())
}

fn log_file_name(date: NaiveDate) -> String {
    format!("{LOG_FILE_PREFIX}-{}.log", date.format("%Y-%m-%d"))
}

/// Opens the log file for `date` in `log_dir` for appending, creating the
/// directory if needed. Every session on the same day shares one file.
fn open_log_file(log_dir: &Path, date: NaiveDate) -> Result<fs::File> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("Creating {}", log_dir.display()))?;
    let path = log_dir.join(log_file_name(date));
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Opening {}", path.display()))
}

/// Brings the runtime up inside the game process: reads `wolf.json`, starts
/// logging, installs the function table and loads every mod in `mods/`.
#[cfg(windows)]
pub fn initialize() -> Result<&'static api::WolfRuntimeApi> {
    let dir = runtime_directory().unwrap_or_else(|_| PathBuf::from("."));
    let config = RuntimeConfig::load(dir.join(config::CONFIG_FILE_NAME));
    start_logger(&dir, &config)?;
    handle_panics();

    let table = api::install(Runtime::for_current_process(config))?;
    let loaded = loader::load_mods(dir.join(loader::MODS_DIRECTORY))?;
    info!("Loaded {loaded} mod(s)");
    Ok(table)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_describe_panic() {
        let location = Location::caller();
        assert_eq!(
            describe_panic(&"boom", Some(location)),
            format!("Wolf runtime panicked: boom at {location}")
        );
        assert_eq!(
            describe_panic(&String::from("owned boom"), None),
            "Wolf runtime panicked: owned boom"
        );
        assert_eq!(describe_panic(&7u32, None), "Wolf runtime panicked: non-string payload");
    }

    #[test]
    fn test_log_file_name() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();
        assert_eq!(log_file_name(date), "wolf-2026-03-09.log");
    }

    #[test]
    fn test_open_log_file_appends_in_configured_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig {
            log_dir: Some(PathBuf::from("nested/logs")),
            ..Default::default()
        };
        let log_dir = config.log_directory(dir.path());
        let date = NaiveDate::from_ymd_opt(2026, 3, 9).unwrap();

        writeln!(open_log_file(&log_dir, date).unwrap(), "first").unwrap();
        writeln!(open_log_file(&log_dir, date).unwrap(), "second").unwrap();

        let content = fs::read_to_string(dir.path().join("nested/logs/wolf-2026-03-09.log")).unwrap();
        assert_eq!(content, "first\nsecond\n");
    }
}
