//! Unix spawner.

use std::io;
use std::process::Stdio;

use tokio::process::Command;

use super::{ProcessLaunch, SpawnedProcess, Spawner};

/// Spawns children in their own process group so terminal signals aimed
/// at the host do not reach them before the session tears them down.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnixSpawner;

impl Spawner for UnixSpawner {
    fn spawn(&self, launch: &ProcessLaunch) -> io::Result<SpawnedProcess> {
        let child = Command::new(&launch.path)
            .args(&launch.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()?;
        SpawnedProcess::from_child(child)
    }
}
