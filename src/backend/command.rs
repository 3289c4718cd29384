//! Process-spawning executor.
//!
//! `RunCommand` goes through `sh -c`, `SendKey` through a configurable
//! command template and `LaunchTarget` through a launcher program followed
//! by the descriptor's arguments. Each child gets its own process group so a
//! timed-out action takes its whole pipeline down with it.

use std::process::Stdio;

use async_trait::async_trait;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::process::Command;

use crate::dispatch::{ActionExecutor, ExecError};
use crate::model::{Action, LaunchDescriptor, PhysicalKey};

/// Programs used to carry out each action type.
#[derive(Debug, Clone)]
pub struct CommandSettings {
    pub shell: String,
    /// Shell template for `SendKey`; `{key}` is replaced by the key code.
    pub send_key: String,
    /// Program plus leading arguments for `LaunchTarget`.
    pub launcher: String,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            shell: "sh".into(),
            send_key: "input keyevent {key}".into(),
            launcher: "am start".into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandExecutor {
    settings: CommandSettings,
}

impl CommandExecutor {
    pub fn new(settings: CommandSettings) -> Self {
        Self { settings }
    }

    fn shell(&self, script: &str) -> Command {
        let mut cmd = Command::new(&self.settings.shell);
        cmd.arg("-c").arg(script);
        cmd
    }

    fn send_key(&self, key: PhysicalKey) -> Result<Command, ExecError> {
        if self.settings.send_key.trim().is_empty() {
            return Err(ExecError::Unsupported("send-key command not configured"));
        }
        let script = self.settings.send_key.replace("{key}", &key.to_string());
        Ok(self.shell(&script))
    }

    fn launch(&self, target: &LaunchDescriptor) -> Result<Command, ExecError> {
        let args = target
            .to_launch_args()
            .ok_or_else(|| ExecError::InvalidTarget("empty launch descriptor".into()))?;
        let mut launcher = self.settings.launcher.split_whitespace();
        let program = launcher
            .next()
            .ok_or(ExecError::Unsupported("launcher not configured"))?;

        let mut cmd = Command::new(program);
        cmd.args(launcher).args(args);
        Ok(cmd)
    }
}

#[async_trait]
impl ActionExecutor for CommandExecutor {
    async fn execute(&self, action: &Action) -> Result<(), ExecError> {
        let cmd = match action {
            Action::RunCommand { command } => self.shell(command),
            Action::SendKey { key } => self.send_key(*key)?,
            Action::LaunchTarget { target } => self.launch(target)?,
        };
        tracing::debug!(action = action.label(), "spawning");
        run(cmd).await
    }
}

/// Spawn `cmd` in a new process group and wait for it.
///
/// If the returned future is dropped before the child exits, the whole
/// group is sent SIGKILL.
async fn run(mut cmd: Command) -> Result<(), ExecError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .process_group(0);

    let mut child = cmd.spawn().map_err(ExecError::Spawn)?;
    let mut group = child.id().and_then(GroupKill::new);
    let status = child.wait().await.map_err(ExecError::Spawn)?;
    if let Some(group) = group.as_mut() {
        group.disarm();
    }

    match status.code() {
        Some(0) => Ok(()),
        Some(code) => Err(ExecError::NonZeroExit(code)),
        None => Err(ExecError::Signalled),
    }
}

/// Kills a process group on drop unless disarmed.
struct GroupKill {
    pgid: Pid,
    armed: bool,
}

impl GroupKill {
    fn new(pid: u32) -> Option<Self> {
        let raw = i32::try_from(pid).ok()?;
        Some(Self {
            pgid: Pid::from_raw(raw),
            armed: true,
        })
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for GroupKill {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match killpg(self.pgid, Signal::SIGKILL) {
            Ok(()) => tracing::debug!(pgid = %self.pgid, "process group killed"),
            Err(nix::Error::ESRCH) => {}
            Err(e) => tracing::warn!(pgid = %self.pgid, error = %e, "failed to kill process group"),
        }
    }
}
