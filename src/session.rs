//! One conversation: a tracked directory plus a translator/executor pair.
//!
//! A session serves one request at a time. Anything submitted while a request
//! is in flight is rejected with [`SessionError::Busy`], never queued.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::{Credential, OsFamily};
use crate::directory::{DirectoryTracker, Resolution};
use crate::error::{BackendError, SessionError, TranslateError};
use crate::executor::{CommandExecutor, ExecutionResult, ShellSpec};
use crate::history::{CommandHistory, HistoryEntry};
use crate::llm::{CompletionBackend, LlmClient};
use crate::safety::PatternPolicy;
use crate::translator::{TranslationRequest, Translator};

/// Everything a session needs, passed in explicitly at construction.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub credential: Credential,
    pub timeout: Duration,
    pub os_family: OsFamily,
    pub api_url: String,
    pub model: String,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
    pub history_limit: usize,
    pub safety_patterns: Vec<String>,
    pub shell: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Translating,
    Executing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A pure `cd`; nothing was executed.
    DirectoryChanged { from: PathBuf, to: PathBuf },
    Completed(ExecutionResult),
}

impl Outcome {
    pub fn execution(&self) -> Option<&ExecutionResult> {
        match self {
            Outcome::Completed(result) => Some(result),
            Outcome::DirectoryChanged { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub command: String,
    pub outcome: Outcome,
}

pub struct Session {
    config: SessionConfig,
    translator: Translator,
    executor: CommandExecutor,
    tracker: Mutex<DirectoryTracker>,
    history: Mutex<CommandHistory>,
    state: Mutex<SessionState>,
}

impl Session {
    /// Builds a session talking to the HTTP backend described by `config`.
    pub fn new(config: SessionConfig, start: &Path) -> Result<Self> {
        let client = LlmClient::new(
            config.credential.clone(),
            config.api_url.clone(),
            config.model.clone(),
            config.request_timeout,
        )
        .context("creating backend client")?;
        Self::with_backend(config, Arc::new(client), start)
    }

    pub fn with_backend(
        config: SessionConfig,
        backend: Arc<dyn CompletionBackend>,
        start: &Path,
    ) -> Result<Self> {
        let policy = PatternPolicy::new(&config.safety_patterns)
            .context("compiling safety.extra_patterns")?;
        let tracker = DirectoryTracker::new(start)
            .with_context(|| format!("starting directory {}", start.display()))?;
        let shell = match &config.shell {
            Some(program) => ShellSpec::custom(program),
            None => ShellSpec::for_os(config.os_family),
        };

        info!(cwd = %tracker.current().display(), os = %config.os_family, "session started");
        Ok(Self {
            translator: Translator::new(backend, Arc::new(policy)),
            executor: CommandExecutor::new(shell),
            tracker: Mutex::new(tracker),
            history: Mutex::new(CommandHistory::new(config.history_limit)),
            state: Mutex::new(SessionState::Idle),
            config,
        })
    }

    pub fn current_directory(&self) -> PathBuf {
        lock(&self.tracker).current().to_path_buf()
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        lock(&self.history).snapshot()
    }

    pub fn os_family(&self) -> OsFamily {
        self.config.os_family
    }

    /// Turns `text` into a command without running it.
    pub async fn translate(&self, text: &str) -> Result<String, SessionError> {
        let _busy = Busy::enter(&self.state, SessionState::Translating)?;
        self.translate_with_retry(text).await
    }

    /// Runs `command`, or applies it to the tracked directory if it is a pure `cd`.
    pub async fn execute(&self, command: &str) -> Result<Outcome, SessionError> {
        let command = command.trim();
        let (resolution, busy) = self.claim_for_execution(command)?;
        match resolution {
            Resolution::ChangeDirectory { from, to } => Ok(Outcome::DirectoryChanged { from, to }),
            Resolution::Run { working_directory } => {
                let _busy = busy;
                let result = self
                    .executor
                    .execute(command, &working_directory, self.config.timeout)
                    .await?;
                Ok(Outcome::Completed(result))
            }
        }
    }

    /// Translate and execute as one request.
    pub async fn submit(&self, text: &str) -> Result<Submission, SessionError> {
        let busy = Busy::enter(&self.state, SessionState::Translating)?;
        let command = self.translate_with_retry(text).await?;

        let resolution = lock(&self.tracker).resolve(&command)?;
        let outcome = match resolution {
            Resolution::ChangeDirectory { from, to } => Outcome::DirectoryChanged { from, to },
            Resolution::Run { working_directory } => {
                busy.advance(SessionState::Executing);
                let result = self
                    .executor
                    .execute(&command, &working_directory, self.config.timeout)
                    .await?;
                Outcome::Completed(result)
            }
        };
        Ok(Submission { command, outcome })
    }

    async fn translate_with_retry(&self, text: &str) -> Result<String, SessionError> {
        let request = TranslationRequest::new(text, self.current_directory(), self.config.os_family)
            .with_history(self.history());

        let mut attempt = 0;
        loop {
            match self.translator.translate(&request).await {
                Ok(command) => {
                    lock(&self.history).push(HistoryEntry::new(text, &command));
                    return Ok(command);
                }
                Err(TranslateError::BackendUnavailable(ref err))
                    if attempt < self.config.max_retries && !matches!(err, BackendError::Auth(_)) =>
                {
                    attempt += 1;
                    let delay = self.config.retry_backoff * attempt;
                    warn!(error = %err, attempt, delay_ms = delay.as_millis() as u64, "backend unavailable, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Checks the session is idle and resolves `command` against the tracked
    /// directory in one step. Only commands that will actually run claim the
    /// `Executing` state.
    fn claim_for_execution(
        &self,
        command: &str,
    ) -> Result<(Resolution, Option<Busy<'_>>), SessionError> {
        let mut state = lock(&self.state);
        if *state != SessionState::Idle {
            return Err(SessionError::Busy);
        }
        if command.is_empty() {
            return Err(TranslateError::EmptyInput.into());
        }

        let resolution = lock(&self.tracker).resolve(command)?;
        let busy = match resolution {
            Resolution::Run { .. } => {
                *state = SessionState::Executing;
                Some(Busy { state: &self.state })
            }
            Resolution::ChangeDirectory { .. } => None,
        };
        Ok((resolution, busy))
    }
}

/// Marks the session as busy; dropping it returns the session to `Idle`.
struct Busy<'a> {
    state: &'a Mutex<SessionState>,
}

impl<'a> Busy<'a> {
    fn enter(state: &'a Mutex<SessionState>, next: SessionState) -> Result<Self, SessionError> {
        let mut current = lock(state);
        if *current != SessionState::Idle {
            return Err(SessionError::Busy);
        }
        *current = next;
        Ok(Self { state })
    }

    fn advance(&self, next: SessionState) {
        *lock(self.state) = next;
    }
}

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        *lock(self.state) = SessionState::Idle;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::{DirectoryError, ErrorKind, ExecError};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays canned answers in order, then reports a malformed response.
    struct ScriptedBackend {
        answers: Mutex<VecDeque<Result<String, BackendError>>>,
        prompts: Mutex<Vec<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(answers: Vec<Result<&str, BackendError>>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(
                    answers
                        .into_iter()
                        .map(|a| a.map(str::to_string))
                        .collect(),
                ),
                prompts: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        async fn complete(&self, _system: &str, user: &str) -> Result<String, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(user.to_string());
            self.answers
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(BackendError::Malformed("script exhausted".into())))
        }
    }

    fn config() -> SessionConfig {
        SessionConfig {
            credential: Credential::new("test-key"),
            timeout: Duration::from_secs(5),
            os_family: OsFamily::Linux,
            api_url: "http://127.0.0.1:9/v1/messages".into(),
            model: "test-model".into(),
            request_timeout: Duration::from_secs(1),
            max_retries: 1,
            retry_backoff: Duration::from_millis(10),
            history_limit: 10,
            safety_patterns: Vec::new(),
            shell: None,
        }
    }

    fn fixture() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().canonicalize().expect("canonical tempdir");
        fs::create_dir_all(root.join("home/u/project")).expect("create tree");
        (dir, root)
    }

    fn session(
        backend: Arc<ScriptedBackend>,
        config: SessionConfig,
        start: &Path,
    ) -> Session {
        Session::with_backend(config, backend, start).expect("session")
    }

    #[tokio::test]
    async fn list_files_scenario() {
        let (_guard, root) = fixture();
        let home = root.join("home/u");
        fs::write(home.join("notes.txt"), "hi").unwrap();
        let backend = ScriptedBackend::new(vec![Ok("ls")]);
        let s = session(Arc::clone(&backend), config(), &home);

        let command = s.translate("list files here").await.unwrap();
        assert_eq!(command, "ls");
        let outcome = s.execute(&command).await.unwrap();
        let result = outcome.execution().expect("ls runs");
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, vec!["notes.txt", "project"]);
        assert_eq!(result.working_directory, home);
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn parent_folder_scenario_skips_executor() {
        let (_guard, root) = fixture();
        let backend = ScriptedBackend::new(vec![Ok("cd ..")]);
        let s = session(backend, config(), &root.join("home/u/project"));

        let submission = s.submit("go to the parent folder").await.unwrap();
        assert_eq!(submission.command, "cd ..");
        assert_eq!(submission.outcome.execution(), None);
        assert_eq!(
            submission.outcome,
            Outcome::DirectoryChanged {
                from: root.join("home/u/project"),
                to: root.join("home/u"),
            }
        );
        assert_eq!(s.current_directory(), root.join("home/u"));
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn delete_everything_scenario_is_refused() {
        let (_guard, root) = fixture();
        let backend = ScriptedBackend::new(vec![Ok("rm -rf /")]);
        let s = session(backend, config(), &root);

        let err = s.submit("delete everything on the disk").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Translation);
        assert!(matches!(
            err,
            SessionError::Translate(TranslateError::UnsafeCommand { .. })
        ));
        assert!(s.history().is_empty());
        assert_eq!(s.state(), SessionState::Idle);
        assert!(root.join("home/u/project").is_dir());
    }

    #[tokio::test]
    async fn cd_then_pwd_reports_new_directory() {
        let (_guard, root) = fixture();
        let target = root.join("home/u/project");
        let backend = ScriptedBackend::new(vec![]);
        let s = session(backend, config(), &root);

        let outcome = s.execute(&format!("cd {}", target.display())).await.unwrap();
        assert!(matches!(outcome, Outcome::DirectoryChanged { .. }));
        let outcome = s.execute("pwd").await.unwrap();
        assert_eq!(
            outcome.execution().unwrap().stdout,
            vec![target.display().to_string()]
        );
    }

    #[tokio::test]
    async fn directory_change_is_visible_to_next_translation() {
        let (_guard, root) = fixture();
        let backend = ScriptedBackend::new(vec![Ok("cd home"), Ok("ls")]);
        let s = session(Arc::clone(&backend), config(), &root);

        s.submit("enter home").await.unwrap();
        s.translate("list files").await.unwrap();
        let prompts = backend.prompts.lock().unwrap().clone();
        let expected = format!("Current directory: {}", root.join("home").display());
        assert!(prompts[1].contains(&expected));
        assert!(prompts[1].contains("\"enter home\" -> cd home"));
    }

    #[tokio::test]
    async fn missing_directory_leaves_state_alone() {
        let (_guard, root) = fixture();
        let s = session(ScriptedBackend::new(vec![]), config(), &root);
        let err = s.execute("cd nowhere").await.unwrap_err();
        assert_eq!(
            err,
            SessionError::Directory(DirectoryError::DirectoryNotFound(root.join("nowhere")))
        );
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert_eq!(s.current_directory(), root);
    }

    #[tokio::test]
    async fn blank_input_never_contacts_backend() {
        let (_guard, root) = fixture();
        let backend = ScriptedBackend::new(vec![Ok("ls")]);
        let s = session(Arc::clone(&backend), config(), &root);
        assert_eq!(
            s.translate("   ").await,
            Err(SessionError::Translate(TranslateError::EmptyInput))
        );
        assert_eq!(
            s.execute("  ").await,
            Err(SessionError::Translate(TranslateError::EmptyInput))
        );
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn transient_backend_failure_is_retried_once() {
        let (_guard, root) = fixture();
        let backend = ScriptedBackend::new(vec![Err(BackendError::Timeout), Ok("date")]);
        let s = session(Arc::clone(&backend), config(), &root);
        assert_eq!(s.translate("what day is it").await.unwrap(), "date");
        assert_eq!(backend.calls(), 2);

        let backend = ScriptedBackend::new(vec![
            Err(BackendError::RateLimited),
            Err(BackendError::RateLimited),
            Ok("date"),
        ]);
        let s = session(Arc::clone(&backend), config(), &root);
        let err = s.translate("what day is it").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn auth_and_malformed_failures_are_not_retried() {
        let (_guard, root) = fixture();
        let backend = ScriptedBackend::new(vec![Err(BackendError::Auth("bad key".into())), Ok("ls")]);
        let s = session(Arc::clone(&backend), config(), &root);
        assert!(s.translate("list").await.is_err());
        assert_eq!(backend.calls(), 1);

        let backend = ScriptedBackend::new(vec![Ok("ls\npwd"), Ok("ls")]);
        let s = session(Arc::clone(&backend), config(), &root);
        assert!(matches!(
            s.translate("list").await,
            Err(SessionError::Translate(TranslateError::MalformedResponse(_)))
        ));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn timeout_is_reported_and_session_recovers() {
        let (_guard, root) = fixture();
        let mut cfg = config();
        cfg.timeout = Duration::from_millis(300);
        let s = session(ScriptedBackend::new(vec![]), cfg, &root);

        let started = std::time::Instant::now();
        let err = s.execute("sleep 5").await.unwrap_err();
        assert!(matches!(err, SessionError::Exec(ExecError::Timeout { .. })), "{err:?}");
        assert!(started.elapsed() < Duration::from_millis(1500));
        assert_eq!(s.state(), SessionState::Idle);

        let outcome = s.execute("echo again").await.unwrap();
        assert_eq!(outcome.execution().unwrap().stdout, vec!["again"]);
    }

    #[tokio::test]
    async fn second_request_while_executing_is_rejected() {
        let (_guard, root) = fixture();
        let backend = ScriptedBackend::new(vec![Ok("ls")]);
        let s = Arc::new(session(Arc::clone(&backend), config(), &root));

        let running = {
            let s = Arc::clone(&s);
            tokio::spawn(async move { s.execute("sleep 1; echo finished").await })
        };
        while s.state() != SessionState::Executing {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(s.translate("list files").await, Err(SessionError::Busy));
        assert_eq!(s.execute("pwd").await, Err(SessionError::Busy));
        assert_eq!(s.execute("cd home").await, Err(SessionError::Busy));
        assert_eq!(backend.calls(), 0);
        assert_eq!(s.current_directory(), root);

        let outcome = running.await.unwrap().unwrap();
        assert_eq!(outcome.execution().unwrap().stdout, vec!["finished"]);
        assert_eq!(s.state(), SessionState::Idle);
    }
}
