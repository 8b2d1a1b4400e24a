use crate::modules::repository::RepositoryHandle;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const PASSWORD: &str = "secret";

/**
  * Shell script standing in for restic.
  *
  * Rejects any other password than PASSWORD, appends its arguments to a calls
  * file and then runs the given script body ($1 is the verb, $DIR the scratch
  * directory).
  */
pub struct FakeEngine {
    dir: TempDir,
    script: PathBuf
}

impl FakeEngine {
    pub fn new(body: &str) -> FakeEngine {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("restic");
        let content = format!(
            "#!/bin/sh\n\
            DIR='{dir}'\n\
            if [ \"$RESTIC_PASSWORD\" != '{password}' ]; then\n\
              echo 'Fatal: wrong password or no key found' >&2\n\
              exit 1\n\
            fi\n\
            echo \"$*\" >> \"$DIR/calls\"\n\
            {body}\n",
            dir = dir.path().display(),
            password = PASSWORD,
            body = body
        );
        fs::write(&script, content).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        fs::create_dir(dir.path().join("source")).unwrap();

        FakeEngine { dir, script }
    }

    pub fn path(&self) -> &str {
        self.script.to_str().unwrap()
    }

    pub fn handle(&self) -> RepositoryHandle {
        let location = self.dir.path().join("repo");
        RepositoryHandle::new(self.path(), location.to_str().unwrap(), PASSWORD)
    }

    pub fn source_root(&self) -> PathBuf {
        self.dir.path().join("source")
    }

    pub fn add_source(&self, name: &str) -> PathBuf {
        let source = self.source_root().join(name);
        fs::create_dir_all(&source).unwrap();
        source
    }

    /// Every invocation as "verb operands... -r repository"
    pub fn calls(&self) -> Vec<String> {
        read_lines(&self.dir.path().join("calls"))
    }

    /// Invocations of a single verb
    pub fn calls_of(&self, verb: &str) -> Vec<String> {
        self.calls().into_iter().filter(|call| call.split(' ').next() == Some(verb)).collect()
    }

    /// Lines a script body wrote to $DIR/events
    pub fn events(&self) -> Vec<String> {
        read_lines(&self.dir.path().join("events"))
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    match fs::read_to_string(path) {
        Ok(content) => content.lines().map(String::from).collect(),
        Err(_) => vec![]
    }
}
