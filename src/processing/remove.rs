use crate::error::TaskError;
use crate::modules::parser::ConfirmationParser;
use crate::modules::repository::RepositoryGuard;
use crate::util::objects::task::{RemoveRequest, RemoveResult};

use std::time::Duration;

/**
  * Forget the snapshot named by the request.
  *
  * Only succeeds if the engine confirms the removal of exactly the requested id.
  */
pub fn remove(guard: &RepositoryGuard, request: &RemoveRequest, timeout: Duration, parser: &dyn ConfirmationParser) -> Result<RemoveResult, TaskError> {
    let repository = guard.acquire();
    debug!("Deleting backup '{}' with data id {}", request.backup_name.as_str(), request.data_id.as_str());

    repository.unlock()?;

    let outcome = repository.forget(request.data_id.as_str(), timeout)?;
    debug!("Engine output: {}", outcome.stdout.trim_end());

    let removed = match parser.extract_snapshot_id(&outcome.stdout) {
        Some(removed) => removed,
        None => {
            warn!("Couldn't find returned id in forget output: {}", outcome.stdout.trim_end());
            return Err(TaskError::ResultNotFound { operation: "remove", output: outcome.combined() });
        }
    };

    if removed != request.data_id {
        error!("Engine removed snapshot {} while {} was requested", removed.as_str(), request.data_id.as_str());
        return Err(TaskError::IdentifierMismatch { requested: request.data_id.clone(), removed });
    }

    info!("Removed snapshot {} of '{}'", request.data_id.as_str(), request.backup_name.as_str());
    return Ok(RemoveResult {});
}
