//! Action backends: how an [`Action`] actually reaches the system.

mod command;

use async_trait::async_trait;

use crate::dispatch::{ActionExecutor, ExecError};
use crate::model::Action;

pub use command::{CommandExecutor, CommandSettings};

/// Logs each action instead of running it.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunExecutor;

#[async_trait]
impl ActionExecutor for DryRunExecutor {
    async fn execute(&self, action: &Action) -> Result<(), ExecError> {
        match action {
            Action::RunCommand { command } => {
                tracing::info!(action = action.label(), command = %command, "dry run");
            }
            Action::SendKey { key } => {
                tracing::info!(action = action.label(), key = %key, "dry run");
            }
            Action::LaunchTarget { target } => {
                let args = target.to_launch_args().unwrap_or_default();
                tracing::info!(action = action.label(), args = ?args, "dry run");
            }
        }
        Ok(())
    }
}
