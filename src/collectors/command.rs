//! External command collector (`command://<name>`)
//!
//! Each configured command is run through `sh -c` once per pass. Its
//! standard output, standard error and exit code become the item's fields,
//! so any change in a command's output is reported like a file change.

use crate::collector::{CollectContext, Collector};
use crate::error::CollectorError;
use crate::types::{url_path, url_scheme, FieldMap, FieldValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Settings of the `[command]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSettings {
    /// Seconds a command may run before it is killed
    pub timeout_secs: u64,
    /// Commands keyed by name
    pub commands: BTreeMap<String, String>,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            commands: BTreeMap::new(),
        }
    }
}

/// Runs configured shell commands
#[derive(Debug, Clone)]
pub struct CommandCollector {
    settings: CommandSettings,
}

enum Outcome {
    Finished { code: Option<i32>, stdout: Vec<u8>, stderr: Vec<u8> },
    TimedOut,
}

impl CommandCollector {
    /// Create a collector for the configured commands
    pub fn new(settings: CommandSettings) -> Self {
        Self { settings }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.settings.timeout_secs.max(1))
    }

    /// Run `command` to completion or until the timeout expires
    ///
    /// Each call drives its own current-thread runtime, so the collector can
    /// be used from the synchronous collection pool.
    fn run(&self, command: &str) -> Result<Outcome, CollectorError> {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        runtime.block_on(self.run_async(command))
    }

    async fn run_async(&self, command: &str) -> Result<Outcome, CollectorError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CollectorError::Command(format!("failed to run {:?}: {}", command, e)))?;

        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        // Output is complete only once both pipes hit EOF, which a background
        // child holding them open delays past the timeout as well
        let finished = async {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let read_stdout = async {
                match stdout_pipe.as_mut() {
                    Some(pipe) => pipe.read_to_end(&mut stdout).await.map(|_| ()),
                    None => Ok(()),
                }
            };
            let read_stderr = async {
                match stderr_pipe.as_mut() {
                    Some(pipe) => pipe.read_to_end(&mut stderr).await.map(|_| ()),
                    None => Ok(()),
                }
            };
            let (status, out, err) = tokio::join!(child.wait(), read_stdout, read_stderr);
            out?;
            err?;
            Ok::<_, std::io::Error>((status?, stdout, stderr))
        };

        match tokio::time::timeout(self.timeout(), finished).await {
            Ok(Ok((status, stdout, stderr))) => Ok(Outcome::Finished {
                code: status.code(),
                stdout,
                stderr,
            }),
            Ok(Err(e)) => Err(CollectorError::Io(e)),
            Err(_) => {
                if let Err(e) = child.start_kill() {
                    debug!(command = %command, error = %e, "command already exited");
                }
                Ok(Outcome::TimedOut)
            }
        }
    }
}

impl Collector for CommandCollector {
    fn label(&self) -> &str {
        "command"
    }

    fn list_urls(&self, _ctx: &CollectContext) -> Result<Vec<String>, CollectorError> {
        Ok(self.settings.commands.keys().map(|name| format!("command://{}", name)).collect())
    }

    fn get_state(&self, url: &str, _ctx: &CollectContext) -> Result<FieldMap, CollectorError> {
        let command = match url_scheme(url) {
            Some("command") => self.settings.commands.get(url_path(url)),
            _ => None,
        };
        let Some(command) = command else {
            return Err(CollectorError::Unsupported(url.to_string()));
        };

        debug!(command = %command, "running");
        let mut fields = FieldMap::new();
        match self.run(command)? {
            Outcome::Finished { code, stdout, stderr } => {
                fields.insert("stdout".into(), String::from_utf8_lossy(&stdout).into_owned().into());
                fields.insert("stderr".into(), String::from_utf8_lossy(&stderr).into_owned().into());
                fields.insert("return_code".into(), FieldValue::Integer(code.map_or(-1, i64::from)));
            }
            Outcome::TimedOut => {
                warn!(command = %command, timeout = ?self.timeout(), "command timed out");
                fields.insert("timed_out".into(), FieldValue::Boolean(true));
            }
        }
        Ok(fields)
    }
}
