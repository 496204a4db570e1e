//! Windows spawner.

use std::io;
use std::process::Stdio;

use tokio::process::Command;

use super::{ProcessLaunch, SpawnedProcess, Spawner};

/// CREATE_NO_WINDOW: console children must not pop up a window.
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsSpawner;

impl Spawner for WindowsSpawner {
    fn spawn(&self, launch: &ProcessLaunch) -> io::Result<SpawnedProcess> {
        let child = Command::new(&launch.path)
            .args(&launch.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .creation_flags(CREATE_NO_WINDOW)
            .kill_on_drop(true)
            .spawn()?;
        SpawnedProcess::from_child(child)
    }
}
