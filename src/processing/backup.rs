use crate::error::TaskError;
use crate::modules::parser::ConfirmationParser;
use crate::modules::repository::RepositoryGuard;
use crate::util::io::file;
use crate::util::objects::task::{BackupRequest, BackupResult};

use std::path::Path;

/**
  * Create a snapshot of the source directory named by the request.
  *
  * The repository guard is held from the unlock until the result is parsed.
  * The source directory is checked before the engine is started, so a missing
  * directory never costs a (time bounded but possibly long) engine run.
  */
pub fn backup(guard: &RepositoryGuard, source_root: &Path, request: &BackupRequest, parser: &dyn ConfirmationParser) -> Result<BackupResult, TaskError> {
    let repository = guard.acquire();
    info!("Creating backup '{}'", request.backup_name.as_str());

    repository.unlock()?;

    let source_dir = source_root.join(request.backup_name.as_str());
    if !source_dir.is_dir() {
        return Err(TaskError::SourceNotFound(source_dir));
    }

    debug!("Calling engine for '{}' with a timeout of {} seconds", source_dir.display(), request.timeout.as_secs());
    let outcome = repository.backup(&source_dir, request.timeout)?;
    debug!("Engine output: {}", outcome.stdout.trim_end());

    let data_id = match parser.extract_snapshot_id(&outcome.stdout) {
        Some(data_id) => data_id,
        None => {
            warn!("Snapshot not created for '{}', output: {}", request.backup_name.as_str(), outcome.stdout.trim_end());
            return Err(TaskError::ResultNotFound { operation: "backup", output: outcome.combined() });
        }
    };

    let data_size_mb = match file::size_mb(&source_dir) {
        Ok(size) => size,
        Err(err) => {
            warn!("Could not estimate size of '{}', reporting 0 ({})", source_dir.display(), err);
            0
        }
    };

    info!("Backup '{}' finished as snapshot {}", request.backup_name.as_str(), data_id.as_str());
    return Ok(BackupResult { data_id, data_size_mb });
}
