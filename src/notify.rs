//! Post-recording notification.
//!
//! After a recording is finalized the file is announced to whatever indexes
//! media on the host, e.g. `tracker3 index --file {}` on a GNOME desktop.

use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, warn};

use crate::error::NotifyError;

/// Placeholder replaced by the file URL in a notify command.
pub const URL_PLACEHOLDER: &str = "{}";

/// Announces a finished recording.
pub trait MediaScanner: Send {
    fn notify(&self, path: &Path) -> Result<(), NotifyError>;
}

/// `file://` URL for `path`, made absolute against the current directory.
pub fn file_url(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|dir| dir.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    format!("file://{}", absolute.display())
}

/// Runs an external command with the file URL.
#[derive(Debug, Clone)]
pub struct CommandScanner {
    command: Vec<String>,
    verbose: bool,
}

impl CommandScanner {
    /// `command[0]` is the program. Output is discarded unless `verbose`.
    pub fn new(command: Vec<String>, verbose: bool) -> Self {
        Self { command, verbose }
    }

    /// Program arguments with the URL substituted or appended.
    pub fn arguments(&self, url: &str) -> Vec<String> {
        let mut args: Vec<String> = self.command.iter().skip(1).cloned().collect();
        let mut substituted = false;
        for arg in &mut args {
            if arg.contains(URL_PLACEHOLDER) {
                *arg = arg.replace(URL_PLACEHOLDER, url);
                substituted = true;
            }
        }
        if !substituted {
            args.push(url.to_string());
        }
        args
    }
}

impl MediaScanner for CommandScanner {
    fn notify(&self, path: &Path) -> Result<(), NotifyError> {
        let Some(program) = self.command.first() else {
            debug!("notify: no command configured");
            return Ok(());
        };
        let url = file_url(path);
        let args = self.arguments(&url);
        debug!("notify: {} {}", program, args.join(" "));

        let output = || {
            if self.verbose {
                Stdio::inherit()
            } else {
                Stdio::null()
            }
        };
        let status = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(output())
            .stderr(output())
            .status()
            .map_err(|source| NotifyError::Spawn {
                program: program.clone(),
                source,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(NotifyError::Failed {
                program: program.clone(),
                status,
            })
        }
    }
}

/// Notify, logging instead of failing.
pub fn notify_best_effort(scanner: &dyn MediaScanner, path: &Path) {
    if let Err(e) = scanner.notify(path) {
        warn!("notify: {}", e);
    }
}
