//! Spawning and supervision of a single worker process.
//!
//! Each worker is driven by its own thread that reads the worker's stdout
//! line by line, classifies every line, and forwards it to the campaign's
//! [`EventSink`] tagged with the worker's instance name. Once the stream is
//! closed, the exit status is collected and reported. Crashed workers are
//! not restarted; afl-fuzz resumes from its output directory if relaunched.

use std::{
    fmt,
    io::{self, BufRead, BufReader, Read},
    os::unix::process::ExitStatusExt,
    process::{Child, Command, ExitStatus, Stdio},
    sync::{mpsc, Arc},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Result};
use nix::sys::signal::Signal;

use crate::{
    classifier::{AflClassifier, Classifier},
    command::WorkerCommand,
    constants::AFL_NO_AFFINITY_ENV,
    error::OrchestratorError,
    events::{EventSink, Severity},
    policy::WorkerSpec,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// The process terminated with the given exit code.
    Code(i32),
    /// The process was killed by the given signal.
    Signalled(i32),
    /// The process could not be started at all.
    SpawnFailed(String),
    /// The process was started, but its exit status could not be collected.
    WaitFailed(String),
}

impl WorkerExit {
    fn from_status(status: ExitStatus) -> WorkerExit {
        match status.code() {
            Some(code) => WorkerExit::Code(code),
            None => WorkerExit::Signalled(status.signal().unwrap_or_default()),
        }
    }

    fn from_wait(status: io::Result<ExitStatus>) -> WorkerExit {
        match status {
            Ok(status) => WorkerExit::from_status(status),
            Err(err) => WorkerExit::WaitFailed(err.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, WorkerExit::Code(0))
    }
}

impl fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerExit::Code(code) => write!(f, "exit code {}", code),
            WorkerExit::Signalled(signo) => match Signal::try_from(*signo) {
                Ok(signal) => write!(f, "signal {} ({})", signo, signal.as_str()),
                Err(_) => write!(f, "signal {}", signo),
            },
            WorkerExit::SpawnFailed(reason) => write!(f, "spawn failure ({})", reason),
            WorkerExit::WaitFailed(reason) => write!(f, "wait failure ({})", reason),
        }
    }
}

/// Outcome of supervising one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisionResult {
    /// Log scope of the process, e.g., `fuzz_03`.
    pub scope: String,
    pub command: WorkerCommand,
    pub exit: WorkerExit,
    /// Set if a fatal startup message was seen on the process' output.
    pub fatal_marker: bool,
}

impl SupervisionResult {
    pub fn exit_code(&self) -> Option<i32> {
        match self.exit {
            WorkerExit::Code(code) => Some(code),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit.is_success()
    }

    /// The failure of this run as an error value, if it failed.
    pub fn failure(&self) -> Option<OrchestratorError> {
        if self.is_success() {
            return None;
        }
        Some(OrchestratorError::WorkerExitFailure {
            instance: self.scope.clone(),
            status: self.exit.to_string(),
            command: self.command.to_string(),
        })
    }
}

/// How the environment of a supervised process is set up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEnv {
    /// Inherit the environment of the orchestrator.
    Inherit,
    /// Start from an empty environment and only set the given variables.
    Controlled(Vec<(String, String)>),
}

/// Spawns a single process and turns its output into classified events.
#[derive(Debug, Clone)]
pub struct ProcessMonitor {
    scope: String,
    /// Human readable name of the tool, used in reports.
    label: &'static str,
    command: WorkerCommand,
    sink: Arc<dyn EventSink>,
}

impl ProcessMonitor {
    pub fn new(
        scope: impl Into<String>,
        label: &'static str,
        command: WorkerCommand,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        ProcessMonitor {
            scope: scope.into(),
            label,
            command,
            sink,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn command(&self) -> &WorkerCommand {
        &self.command
    }

    pub fn emit(&self, severity: Severity, text: &str) {
        self.sink.emit(severity, &self.scope, text);
    }

    /// Spawn the process with its stdout piped. stderr is piped as well if
    /// `capture_stderr` is set, otherwise it is inherited.
    pub fn spawn(&self, env: &ProcessEnv, capture_stderr: bool) -> io::Result<Child> {
        let mut cmd = Command::new(self.command.program());
        cmd.args(self.command.args());
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        if capture_stderr {
            cmd.stderr(Stdio::piped());
        }

        if let ProcessEnv::Controlled(vars) = env {
            cmd.env_clear();
            cmd.envs(vars.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }

        log::debug!(target: &self.scope, "Spawning: {}", self.command);
        cmd.spawn()
    }

    /// Result reported if the process could not be spawned at all.
    pub fn spawn_failed(&self, err: io::Error) -> SupervisionResult {
        self.emit(
            Severity::Critical,
            &format!(
                "Failed to spawn {}: {}. Failed command: {}",
                self.label, err, self.command
            ),
        );
        SupervisionResult {
            scope: self.scope.clone(),
            command: self.command.clone(),
            exit: WorkerExit::SpawnFailed(err.to_string()),
            fatal_marker: false,
        }
    }

    /// Drive `child` to completion. Every stdout line is classified and
    /// emitted in the order it was received. stderr, if piped, is drained on
    /// a helper thread and emitted at debug level.
    pub fn monitor<C: Classifier>(&self, mut child: Child, classifier: &mut C) -> SupervisionResult {
        let stderr_drain = child.stderr.take().map(|stderr| self.drain(stderr));

        if let Some(stdout) = child.stdout.take() {
            if let Err(err) = for_each_line(stdout, |line| {
                let (severity, text) = classifier.classify(line);
                self.emit(severity, text);
            }) {
                log::warn!(target: &self.scope, "Error while reading output: {}", err);
            }
        }

        let status = child.wait();
        if let Err(err) = &status {
            log::error!(target: &self.scope, "Failed to wait for process: {}", err);
        }
        let exit = WorkerExit::from_wait(status);

        if let Some(handle) = stderr_drain {
            if handle.join().is_err() {
                log::warn!(target: &self.scope, "stderr reader panicked");
            }
        }

        let result = SupervisionResult {
            scope: self.scope.clone(),
            command: self.command.clone(),
            exit,
            fatal_marker: classifier.fatal_marker(),
        };
        self.report_exit(&result);
        result
    }

    fn report_exit(&self, result: &SupervisionResult) {
        if result.is_success() {
            self.emit(Severity::Info, &format!("{} terminated", self.label));
        } else {
            self.emit(
                Severity::Critical,
                &format!(
                    "{} returned non-zero exit status: {}. Failed command: {}",
                    self.label, result.exit, result.command
                ),
            );
        }
    }

    fn drain<R: Read + Send + 'static>(&self, stream: R) -> JoinHandle<()> {
        let sink = Arc::clone(&self.sink);
        let scope = self.scope.clone();
        thread::spawn(move || {
            if let Err(err) = for_each_line(stream, |line| sink.emit(Severity::Debug, &scope, line)) {
                log::debug!(target: &scope, "Error while reading stderr: {}", err);
            }
        })
    }
}

/// Call `f` for each line of `stream`. Lines are decoded lossily and
/// stripped of surrounding whitespace.
pub fn for_each_line<R: Read, F: FnMut(&str)>(stream: R, mut f: F) -> io::Result<()> {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&buf);
        f(line.trim());
    }
}

/// Outcome of one worker of a campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerOutcome {
    pub spec: WorkerSpec,
    pub result: SupervisionResult,
}

/// Supervisor of one afl-fuzz worker.
#[derive(Debug)]
pub struct WorkerSupervisor {
    spec: WorkerSpec,
    monitor: ProcessMonitor,
    env: Vec<(String, String)>,
}

impl WorkerSupervisor {
    pub fn new(
        spec: WorkerSpec,
        command: WorkerCommand,
        env: Vec<(String, String)>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let monitor = ProcessMonitor::new(spec.instance_name(), "afl-fuzz instance", command, sink);
        WorkerSupervisor { spec, monitor, env }
    }

    pub fn spec(&self) -> &WorkerSpec {
        &self.spec
    }

    fn environment(&self) -> ProcessEnv {
        let mut vars = self
            .env
            .iter()
            .filter(|(k, _)| k != AFL_NO_AFFINITY_ENV)
            .cloned()
            .collect::<Vec<_>>();
        vars.push((AFL_NO_AFFINITY_ENV.to_owned(), "1".to_owned()));
        ProcessEnv::Controlled(vars)
    }

    /// Run the worker to completion on the calling thread.
    pub fn run(self) -> WorkerOutcome {
        self.monitor.emit(
            Severity::Info,
            &format!(
                "Starting {} afl-fuzz instance on CPU {} (power schedule: {})",
                self.spec.role().name(),
                self.spec.cpu_id(),
                self.spec.schedule()
            ),
        );

        let result = match self.monitor.spawn(&self.environment(), false) {
            Ok(child) => self.monitor.monitor(child, &mut AflClassifier::new()),
            Err(err) => self.monitor.spawn_failed(err),
        };

        WorkerOutcome {
            spec: self.spec,
            result,
        }
    }

    /// Run the worker on a dedicated thread. The outcome is sent through
    /// `results` once the worker terminated.
    pub fn start(self, results: mpsc::Sender<WorkerOutcome>) -> io::Result<WorkerProxy> {
        let name = self.spec.instance_name().to_owned();
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            let outcome = self.run();
            if results.send(outcome).is_err() {
                log::warn!("Result receiver is gone, dropping outcome");
            }
        })?;
        Ok(WorkerProxy::new(name, handle))
    }
}

/// Handle of a thread supervising a worker.
#[derive(Debug)]
pub struct WorkerProxy {
    name: String,
    handle: JoinHandle<()>,
}

impl WorkerProxy {
    pub fn new(name: String, handle: JoinHandle<()>) -> Self {
        WorkerProxy { name, handle }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> Result<()> {
        self.handle
            .join()
            .map_err(|_| anyhow!("Supervisor thread of {} panicked", self.name))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{classifier::CoverageClassifier, events::RecordingSink};

    fn shell(script: &str) -> WorkerCommand {
        WorkerCommand::new(vec!["/bin/sh".to_owned(), "-c".to_owned(), script.to_owned()])
    }

    fn run(script: &str, sink: &Arc<RecordingSink>) -> SupervisionResult {
        let monitor = ProcessMonitor::new("test", "shell", shell(script), sink.clone());
        let child = monitor.spawn(&ProcessEnv::Inherit, true).unwrap();
        monitor.monitor(child, &mut AflClassifier::new())
    }

    #[test]
    fn test_lines_are_decoded_and_trimmed() {
        let input: &[u8] = b"  first \r\nsec\xffond\nlast";
        let mut lines = Vec::new();
        for_each_line(input, |line| lines.push(line.to_owned())).unwrap();
        assert_eq!(lines, vec!["first", "sec\u{fffd}ond", "last"]);
    }

    #[test]
    fn test_exit_code_is_reported() {
        let sink = Arc::new(RecordingSink::new());
        let result = run("echo '[*] Entering queue cycle 1.'; exit 4", &sink);
        assert_eq!(result.exit_code(), Some(4));
        assert!(!result.is_success());
        assert!(matches!(
            result.failure(),
            Some(OrchestratorError::WorkerExitFailure { .. })
        ));

        let events = sink.events_for("test");
        assert_eq!(events[0].severity, Severity::Info);
        let critical = events
            .iter()
            .filter(|e| e.severity == Severity::Critical)
            .collect::<Vec<_>>();
        assert_eq!(critical.len(), 1);
        assert!(critical[0].text.contains("exit code 4"));
        assert!(critical[0].text.contains(&result.command.to_string()));
    }

    #[test]
    fn test_signalled_process() {
        let sink = Arc::new(RecordingSink::new());
        let result = run("kill -9 $$", &sink);
        assert_eq!(result.exit, WorkerExit::Signalled(9));
        assert_eq!(result.exit_code(), None);
        assert!(result.exit.to_string().contains("SIGKILL"));
    }

    #[test]
    fn test_spawn_failure() {
        let sink = Arc::new(RecordingSink::new());
        let monitor = ProcessMonitor::new(
            "test",
            "shell",
            WorkerCommand::new(vec!["/does/not/exist".to_owned()]),
            sink.clone(),
        );
        let err = monitor.spawn(&ProcessEnv::Inherit, false).unwrap_err();
        let result = monitor.spawn_failed(err);
        assert!(matches!(result.exit, WorkerExit::SpawnFailed(_)));
        assert_eq!(sink.events()[0].severity, Severity::Critical);
    }

    #[test]
    fn test_wait_failure_is_not_a_spawn_failure() {
        let exit = WorkerExit::from_wait(Err(io::Error::from_raw_os_error(libc::ECHILD)));
        assert!(matches!(exit, WorkerExit::WaitFailed(_)));
        assert!(!exit.is_success());
        assert!(exit.to_string().starts_with("wait failure ("));
        assert!(!exit.to_string().contains("spawn"));

        let exit = WorkerExit::from_wait(Ok(ExitStatus::from_raw(0)));
        assert_eq!(exit, WorkerExit::Code(0));
    }

    #[test]
    fn test_stderr_is_drained_at_debug() {
        let sink = Arc::new(RecordingSink::new());
        let monitor = ProcessMonitor::new(
            "test",
            "shell",
            shell("echo '[*] progress'; echo oops >&2"),
            sink.clone(),
        );
        let child = monitor.spawn(&ProcessEnv::Controlled(Vec::new()), true).unwrap();
        let result = monitor.monitor(child, &mut CoverageClassifier);
        assert!(result.is_success());

        let events = sink.events();
        assert!(events
            .iter()
            .any(|e| e.text == "progress" && e.severity == Severity::Warning));
        assert!(events
            .iter()
            .any(|e| e.text == "oops" && e.severity == Severity::Debug));
    }

    struct BrokenPipe {
        sent: bool,
    }

    impl Read for BrokenPipe {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.sent {
                return Err(io::Error::from(io::ErrorKind::BrokenPipe));
            }
            self.sent = true;
            buf[..6].copy_from_slice(b"first\n");
            Ok(6)
        }
    }

    #[test]
    fn test_read_error_ends_line_stream() {
        let mut lines = Vec::new();
        let err = for_each_line(BrokenPipe { sent: false }, |line| lines.push(line.to_owned()))
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(lines, vec!["first".to_owned()]);
    }
}
