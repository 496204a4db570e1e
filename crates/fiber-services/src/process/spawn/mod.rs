//! Process spawning capability.
//!
//! Sessions are written once against [`Spawner`]; the platform backend is
//! picked at compile time. Every backend connects stdin and stdout to
//! pipes and discards stderr.

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

#[cfg(unix)]
pub use unix::UnixSpawner;
#[cfg(windows)]
pub use windows::WindowsSpawner;

use std::io;
use std::sync::Arc;

use tokio::process::{Child, ChildStdin, ChildStdout};

/// What to run for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessLaunch {
    pub path: String,
    pub args: Vec<String>,
}

impl ProcessLaunch {
    /// `args` is split on whitespace; no quoting is interpreted.
    pub fn new(path: impl Into<String>, args: &str) -> Self {
        Self {
            path: path.into(),
            args: args.split_whitespace().map(String::from).collect(),
        }
    }
}

/// A running child with its stdio pipes taken out.
#[derive(Debug)]
pub struct SpawnedProcess {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
}

impl SpawnedProcess {
    /// Take the stdio pipes out of a freshly spawned child.
    pub fn from_child(mut child: Child) -> io::Result<Self> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("child stdin was not piped"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("child stdout was not piped"))?;
        Ok(Self { child, stdin, stdout })
    }
}

/// Platform service that starts processes for sessions.
pub trait Spawner: Send + Sync + 'static {
    fn spawn(&self, launch: &ProcessLaunch) -> io::Result<SpawnedProcess>;
}

/// The spawner for the platform this crate was built for.
pub fn platform_spawner() -> Arc<dyn Spawner> {
    #[cfg(unix)]
    {
        Arc::new(UnixSpawner)
    }
    #[cfg(windows)]
    {
        Arc::new(WindowsSpawner)
    }
}
