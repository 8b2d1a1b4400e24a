use crate::error::TaskError;
use crate::modules::repository::RepositoryGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryState {
    Uninitialized,
    Ready
}

/**
  * Make sure the repository exists and can be opened before any task is accepted.
  *
  * Probes the repository by listing its snapshots, initializing it if that fails.
  * An error here means the repository is unusable and the worker must not start.
  */
pub fn ensure_ready(guard: &RepositoryGuard) -> Result<RepositoryState, TaskError> {
    let repository = guard.acquire();
    debug!("Checking if repository '{}' was already initialized", repository.location());

    let mut state = RepositoryState::Uninitialized;
    match repository.snapshots() {
        Ok(_) => {
            info!("Repository already exists and is accessible");
            state = RepositoryState::Ready;
        },
        Err(err) => {
            debug!("Couldn't access repository, trying to create it ({})", err);
        }
    }

    if state == RepositoryState::Uninitialized {
        if let Err(err) = repository.init() {
            let err = TaskError::from(err);
            error!("Error creating repository '{}': {}", repository.location(), err);
            return Err(err);
        }

        info!("Repository '{}' created successfully", repository.location());
        state = RepositoryState::Ready;
    }

    return Ok(state);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::FakeEngine;

    #[test]
    fn existing_repository_is_ready() {
        let engine = FakeEngine::new("exit 0");
        let guard = RepositoryGuard::new(engine.handle());

        assert_eq!(ensure_ready(&guard).unwrap(), RepositoryState::Ready);
        assert!(engine.calls_of("init").is_empty());
    }

    #[test]
    fn missing_repository_is_created() {
        let engine = FakeEngine::new(
            "case \"$1\" in snapshots) echo 'Fatal: unable to open config file' >&2; exit 1;; esac"
        );
        let guard = RepositoryGuard::new(engine.handle());

        assert_eq!(ensure_ready(&guard).unwrap(), RepositoryState::Ready);
        assert_eq!(engine.calls_of("init").len(), 1);
    }

    #[test]
    fn unusable_repository_fails() {
        let engine = FakeEngine::new("echo 'Fatal: create repository failed' >&2; exit 1");
        let guard = RepositoryGuard::new(engine.handle());

        match ensure_ready(&guard) {
            Err(TaskError::EngineExecution { output, .. }) => assert!(output.contains("create repository failed")),
            other => panic!("unexpected result: {:?}", other)
        }

        // Released again after the failure
        assert!(guard.acquire().unlock().is_err());
    }
}
