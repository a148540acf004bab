//! Built-in collectors
//!
//! | Label | Resources | Phases |
//! |---|---|---|
//! | `sysinfo` | `sysinfo://` | list, get_state |
//! | `file` | `file://<path>` | list, get_state |
//! | `conffile` | none | process_state |
//! | `command` | `command://<name>` | list, get_state |
//! | `wtmp` | none | process_diff |

pub mod command;
pub mod conffile;
pub mod file;
pub mod sysinfo;
pub mod wtmp;

pub use command::{CommandCollector, CommandSettings};
pub use conffile::{ConffileCollector, ConffileSettings};
pub use file::{FileCollector, FileSettings, ShortcutRule};
pub use sysinfo::SysinfoCollector;
pub use wtmp::{WtmpCollector, WtmpSettings};

use crate::collector::Collector;
use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};

/// Labels of the built-in collectors in their default order
pub const BUILTIN: [&str; 5] = ["sysinfo", "file", "conffile", "command", "wtmp"];

/// Instantiate the collectors enabled in `config`, in configured order
pub fn build_collectors(config: &MonitorConfig) -> Result<Vec<Box<dyn Collector>>> {
    config
        .monitor
        .collectors
        .iter()
        .map(|name| -> Result<Box<dyn Collector>> {
            let collector: Box<dyn Collector> = match name.as_str() {
                "sysinfo" => Box::new(SysinfoCollector::new()),
                "file" => Box::new(FileCollector::new(config.file.clone())?),
                "conffile" => Box::new(ConffileCollector::new(config.conffile.clone())?),
                "command" => Box::new(CommandCollector::new(config.command.clone())),
                "wtmp" => Box::new(WtmpCollector::new(config.wtmp.clone())),
                other => {
                    return Err(MonitorError::config(format!(
                        "unknown collector '{}', expected one of {}",
                        other,
                        BUILTIN.join(", ")
                    )))
                }
            };
            Ok(collector)
        })
        .collect()
}
