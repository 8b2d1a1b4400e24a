use crate::util::command::{CommandError, CommandOutcome, CommandWrapper};

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Location and credential of the engine repository, read-only after startup.
///
/// Commands can only be issued through a held [`RepositoryGuard`].
pub struct RepositoryHandle {
    engine: String,
    location: String,
    password: String
}

impl RepositoryHandle {
    pub fn new(engine: &str, location: &str, password: &str) -> RepositoryHandle {
        RepositoryHandle {
            engine: engine.to_string(),
            location: location.to_string(),
            password: password.to_string()
        }
    }

    pub fn location(&self) -> &str {
        self.location.as_str()
    }

    /// Reachability probe, fails if the repository does not exist or can not be opened
    pub fn snapshots(&self) -> Result<CommandOutcome, CommandError> {
        self.get_base_cmd("snapshots", vec![]).run_checked(None)
    }

    pub fn init(&self) -> Result<CommandOutcome, CommandError> {
        self.get_base_cmd("init", vec![]).run_checked(None)
    }

    /// Remove stale locks a crashed engine run may have left behind
    pub fn unlock(&self) -> Result<CommandOutcome, CommandError> {
        self.get_base_cmd("unlock", vec![]).run_checked(None)
    }

    pub fn backup(&self, source: &Path, timeout: Duration) -> Result<CommandOutcome, CommandError> {
        let source = source.to_string_lossy().into_owned();
        self.get_base_cmd("backup", vec![source.as_str()]).run_checked(Some(timeout))
    }

    pub fn forget(&self, snapshot_id: &str, timeout: Duration) -> Result<CommandOutcome, CommandError> {
        self.get_base_cmd("forget", vec![snapshot_id]).run_checked(Some(timeout))
    }

    fn get_base_cmd(&self, operation: &str, operands: Vec<&str>) -> CommandWrapper {
        let mut command = CommandWrapper::new_with_args(self.engine.as_str(), vec![operation]);
        for operand in operands {
            command.arg_str(operand);
        }

        command.arg_str("-r").arg_string(self.location.clone());
        command.env_secret("RESTIC_PASSWORD", self.password.as_str());
        command
    }
}

/**
  * Exclusive access to the repository handle.
  *
  * Every operation touching the repository (initialize, unlock, backup, forget)
  * holds the guard for its whole duration. Waiting callers block without a
  * timeout. Dropping the returned MutexGuard releases it, so it is released
  * on every return path, including errors and panics.
  */
pub struct RepositoryGuard {
    handle: Mutex<RepositoryHandle>
}

impl RepositoryGuard {
    pub fn new(handle: RepositoryHandle) -> RepositoryGuard {
        RepositoryGuard { handle: Mutex::new(handle) }
    }

    pub fn acquire(&self) -> MutexGuard<'_, RepositoryHandle> {
        // A panic in a previous holder does not leave the handle inconsistent, it is never mutated
        self.handle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
