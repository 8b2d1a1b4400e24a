use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::fmt;
use std::io::{self, Read};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// How often a running command is checked for completion while a deadline is enforced
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Captured result of a finished command. Interpreting it is up to the caller.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub stdout: String,
    pub stderr: String,
    pub status: ExitStatus
}

impl CommandOutcome {
    pub fn exit_succeeded(&self) -> bool {
        self.status.success()
    }

    /// Both output streams for diagnostic messages, stdout first
    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim_end();
        let stderr = self.stderr.trim_end();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, _) => stderr.to_string(),
            (false, true) => stdout.to_string(),
            (false, false) => format!("{}\n{}", stdout, stderr)
        }
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Failed spawning '{command}': {source}")]
    Spawn { command: String, #[source] source: io::Error },

    #[error("Failed waiting for '{command}': {source}")]
    Wait { command: String, #[source] source: io::Error },

    #[error("'{command}' did not finish within {} seconds and was terminated", .timeout.as_secs())]
    Timeout { command: String, timeout: Duration },

    #[error("Exit code indicates failure of '{command}' ({status})")]
    Exit { command: String, status: ExitStatus, outcome: CommandOutcome }
}

impl CommandError {
    pub fn command(&self) -> &str {
        match self {
            CommandError::Spawn { command, .. } => command,
            CommandError::Wait { command, .. } => command,
            CommandError::Timeout { command, .. } => command,
            CommandError::Exit { command, .. } => command
        }
    }
}

pub struct CommandWrapper {
    command: Command,
    base: String,
    args: Vec<String>,
    secret_envs: Vec<String>
}

impl CommandWrapper {
    pub fn new(cmd: &str) -> CommandWrapper {
        CommandWrapper {
            command: Command::new(cmd),
            base: cmd.to_string(),
            args: vec![],
            secret_envs: vec![]
        }
    }

    pub fn new_with_args(cmd: &str, args: Vec<&str>) -> CommandWrapper {
        let mut wrapper = CommandWrapper::new(cmd);
        for arg in args {
            wrapper.arg_str(arg);
        }
        wrapper
    }

    pub fn arg_str(&mut self, arg: &str) -> &mut CommandWrapper {
        self.arg_string(arg.to_string())
    }

    pub fn arg_string(&mut self, option: String) -> &mut CommandWrapper {
        let this = option;
        self.command.arg(&this);
        self.args.push(this);
        self
    }

    /// Set an environment variable whose value must never show up in logs
    pub fn env_secret(&mut self, key: &str, value: &str) -> &mut CommandWrapper {
        self.command.env(key, value);
        self.secret_envs.push(key.to_string());
        self
    }

    /**
      * Run the command and capture its output.
      *
      * The command runs in its own process group. With a timeout the whole group
      * is killed once the deadline has passed and CommandError::Timeout is returned,
      * discarding any output produced so far. The deadline also covers collecting
      * the output, which a leftover background process may keep open.
      * Without a timeout this waits for as long as the process runs.
      */
    pub fn run_get_outcome(&mut self, timeout: Option<Duration>) -> Result<CommandOutcome, CommandError> {
        self.command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        trace!("Running '{}'", self);
        let started = Instant::now();
        let mut child: Child = self.command.spawn()
            .map_err(|source| CommandError::Spawn { command: self.to_string(), source })?;

        // Drain both pipes while waiting, otherwise a full pipe blocks the process
        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        // A deadline too far out to represent is no deadline at all
        let deadline = timeout.and_then(|timeout| started.checked_add(timeout));
        let status = match deadline {
            Some(deadline) => match wait_with_deadline(&mut child, deadline) {
                Ok(Some(status)) => status,
                Ok(None) => return Err(self.timed_out(&mut child, timeout)),
                Err(source) => {
                    terminate(&mut child);
                    return Err(CommandError::Wait { command: self.to_string(), source });
                }
            },
            None => child.wait().map_err(|source| CommandError::Wait { command: self.to_string(), source })?
        };

        let (stdout, stderr) = match deadline {
            Some(deadline) => match (collect_until(&stdout, deadline), collect_until(&stderr, deadline)) {
                (Some(stdout), Some(stderr)) => (stdout, stderr),
                _ => return Err(self.timed_out(&mut child, timeout))
            },
            None => (stdout.recv().unwrap_or_default(), stderr.recv().unwrap_or_default())
        };

        return Ok(CommandOutcome { stdout, stderr, status });
    }

    fn timed_out(&self, child: &mut Child, timeout: Option<Duration>) -> CommandError {
        let timeout = timeout.unwrap_or_default();
        warn!("'{}' did not finish within {} seconds, terminating it", self, timeout.as_secs());
        terminate(child);
        CommandError::Timeout { command: self.to_string(), timeout }
    }

    /// Like run_get_outcome, but a failing exit code is turned into CommandError::Exit
    pub fn run_checked(&mut self, timeout: Option<Duration>) -> Result<CommandOutcome, CommandError> {
        let outcome = self.run_get_outcome(timeout)?;
        if outcome.exit_succeeded() {
            return Ok(outcome);
        }

        let status = outcome.status;
        debug!("'{}' failed, output: {}", self, outcome.combined());
        return Err(CommandError::Exit { command: self.to_string(), status, outcome });
    }
}

impl fmt::Display for CommandWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for key in self.secret_envs.iter() {
            write!(f, "{}=*** ", key)?;
        }
        write!(f, "{}", self.base)?;
        for arg in self.args.iter() {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

fn spawn_reader<R: Read + Send + 'static>(source: Option<R>) -> Receiver<String> {
    let (sender, receiver) = bounded(1);
    if let Some(mut source) = source {
        thread::spawn(move || {
            let mut buffer = vec![];
            if let Err(err) = source.read_to_end(&mut buffer) {
                debug!("Reading command output stopped early ({})", err);
            }
            // The receiver is gone if the command timed out, nothing to do then
            let _ = sender.send(String::from_utf8_lossy(&buffer).into_owned());
        });
    }
    receiver
}

/// Output of a reader thread, None if it is still open at the deadline
fn collect_until(receiver: &Receiver<String>, deadline: Instant) -> Option<String> {
    match receiver.recv_deadline(deadline) {
        Ok(output) => Some(output),
        Err(RecvTimeoutError::Disconnected) => Some(String::new()),
        Err(RecvTimeoutError::Timeout) => None
    }
}

fn wait_with_deadline(child: &mut Child, deadline: Instant) -> io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }

        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

/// Kill the process group of the child, then reap the child itself
fn terminate(child: &mut Child) {
    // The group id equals the pid of the child, it was started with process_group(0)
    let group = child.id() as libc::pid_t;
    if unsafe { libc::killpg(group, libc::SIGKILL) } != 0 {
        // Every member already exited between the last check and now
        debug!("Could not kill process group {} ({})", group, io::Error::last_os_error());
    }
    if let Err(err) = child.wait() {
        error!("Could not reap terminated command ({})", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(script: &str) -> CommandWrapper {
        CommandWrapper::new_with_args("sh", vec!["-c", script])
    }

    #[test]
    fn captures_both_streams() {
        let outcome = shell("echo 'snapshot a1b2c3d saved'; echo 'warning' >&2")
            .run_get_outcome(None)
            .unwrap();

        assert!(outcome.exit_succeeded());
        assert_eq!(outcome.stdout, "snapshot a1b2c3d saved\n");
        assert_eq!(outcome.stderr, "warning\n");
        assert_eq!(outcome.combined(), "snapshot a1b2c3d saved\nwarning");
    }

    #[test]
    fn failing_exit_keeps_output() {
        let result = shell("echo 'Fatal: unable to open config file' >&2; exit 1")
            .run_checked(Some(Duration::from_secs(10)));

        match result {
            Err(CommandError::Exit { outcome, status, .. }) => {
                assert!(!status.success());
                assert!(outcome.stderr.contains("unable to open config file"));
            },
            other => panic!("unexpected result: {:?}", other)
        }
    }

    #[test]
    fn unchecked_run_reports_failure_without_error() {
        let outcome = shell("exit 3").run_get_outcome(None).unwrap();
        assert!(!outcome.exit_succeeded());
        assert_eq!(outcome.status.code(), Some(3));
    }

    #[test]
    fn timeout_terminates_command() {
        let started = Instant::now();
        let result = shell("echo partial; sleep 30").run_checked(Some(Duration::from_millis(300)));

        let elapsed = started.elapsed();
        assert!(matches!(result, Err(CommandError::Timeout { .. })));
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_secs(5), "took {:?}", elapsed);
    }

    #[test]
    fn background_process_holding_output_times_out() {
        let started = Instant::now();
        let result = shell("sleep 6 & echo 'snapshot a1b2c3d saved'").run_checked(Some(Duration::from_secs(1)));

        let elapsed = started.elapsed();
        assert!(matches!(result, Err(CommandError::Timeout { .. })), "unexpected result: {:?}", result);
        assert!(elapsed < Duration::from_secs(4), "took {:?}", elapsed);
    }

    #[test]
    fn timeout_kills_background_processes() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("late");
        let script = format!("(sleep 1; touch '{}') & sleep 30", marker.display());

        let result = shell(script.as_str()).run_checked(Some(Duration::from_millis(300)));
        assert!(matches!(result, Err(CommandError::Timeout { .. })));

        thread::sleep(Duration::from_secs(2));
        assert!(!marker.exists());
    }

    #[test]
    fn unrepresentable_timeout_waits_normally() {
        let outcome = shell("echo done").run_checked(Some(Duration::from_secs(u64::MAX))).unwrap();
        assert_eq!(outcome.stdout, "done\n");
    }

    #[test]
    fn missing_binary_is_spawn_error() {
        let result = CommandWrapper::new("/nonexistent/restic").run_checked(None);
        assert!(matches!(result, Err(CommandError::Spawn { .. })));
    }

    #[test]
    fn display_masks_secrets() {
        let mut command = CommandWrapper::new_with_args("restic", vec!["unlock", "-r", "/backup-repo"]);
        command.env_secret("RESTIC_PASSWORD", "hunter2");

        let rendered = command.to_string();
        assert_eq!(rendered, "RESTIC_PASSWORD=*** restic unlock -r /backup-repo");
        assert!(!rendered.contains("hunter2"));
    }
}
