use crate::state::model::*;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt::Display;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// What happened to trigger a hook.
#[derive(Serialize, Copy, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HookEvent {
    /// A focus phase ran to completion.
    Focus,
    /// A short or long break ran to completion.
    Break,
    /// The user committed the time spent so far.
    Commit,
}

impl HookEvent {
    /// The hook for a completed phase of the given kind.
    pub fn completed(kind: PhaseKind) -> Self {
        match kind {
            PhaseKind::Work => Self::Focus,
            PhaseKind::Break => Self::Break,
        }
    }
}

impl Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Focus => write!(f, "focus"),
            Self::Break => write!(f, "break"),
            Self::Commit => write!(f, "commit"),
        }
    }
}

/// The JSON payload a hook script reads from stdin.
#[derive(Serialize)]
pub struct HookArgs {
    pub event: HookEvent,
    /// The record that was just added to the history.
    pub record: SessionRecord,
    /// The stats after the record was added.
    pub stats: Stats,
}

/// Executes user-defined hook scripts on phase completion and commits.
///
/// Hook scripts live under `$XDG_CONFIG_HOME/pomoterm/hooks/` and are named
/// after the [`HookEvent`]: `focus`, `break` or `commit`. A missing hook file
/// is silently ignored.
pub struct Runner {
    path: PathBuf,
}

impl Runner {
    /// Build a [`Runner`] whose hooks directory is resolved from the XDG
    /// config home (typically `~/.config/pomoterm/hooks/`).
    pub fn try_new() -> Result<Self> {
        let path = xdg::BaseDirectories::with_prefix("pomoterm")
            .get_config_home()
            .context("Failed to determine configuration path")?
            .join("hooks");

        Ok(Self { path })
    }

    /// Run the hook script named after `args.event`, if there is one.
    ///
    /// The script gets the JSON-serialized [`HookArgs`] on stdin and is left
    /// running detached.
    pub fn execute(&self, args: &HookArgs) -> Result<()> {
        let path = self.path.join(args.event.to_string());
        if !path.exists() {
            return Ok(());
        }

        let data = serde_json::to_string(args).context("Failed to serialize hook arguments")?;
        let mut process = Command::new(&path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to spawn hook {}", path.display()))?;

        if let Some(mut stdin) = process.stdin.take() {
            stdin
                .write_all(data.as_bytes())
                .context("Failed to write hook arguments")?;
        }
        debug!(event = %args.event, "hook started");
        // Not waited on; stdin is closed when it drops here.
        Ok(())
    }

    /// Like [`Runner::execute`], but only logs a failure.
    pub fn notify(&self, args: &HookArgs) {
        if let Err(err) = self.execute(args) {
            warn!(event = %args.event, error = %format!("{err:#}"), "hook failed");
        }
    }
}
