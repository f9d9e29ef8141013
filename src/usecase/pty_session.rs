use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until, timeout_at};
use tracing::Instrument;

use crate::domain::model::{SessionInfo, SessionOptions, SessionRecord};
use crate::domain::primitive::{
    EventSender, ExitStatus, SessionEvent, SessionEventKind, SessionId, SessionState, Signal,
    StrategyKind, TerminalSize,
};
use crate::interface_adapter::port::{ChildControl, SpawnRequest, SpawnStrategy, SpawnedChild};
use crate::shared::config::FlowControlConfig;
use crate::shared::error::SpawnError;

use super::flow_gate::FlowGate;
use super::input_throttler::{InputThrottler, WriteErrorHook};
use super::output_batcher::OutputBatcher;

/// State shared between a session handle and its background tasks.
struct SessionShared {
    id: SessionId,
    record: Mutex<SessionRecord>,
    control: Mutex<Option<Box<dyn ChildControl>>>,
    gate: FlowGate,
    escalation_armed: AtomicBool,
    events: EventSender,
}

impl SessionShared {
    fn emit(&self, kind: SessionEventKind) {
        let _ = self.events.send(SessionEvent {
            id: self.id.clone(),
            kind,
        });
    }

    fn emit_data(&self, batch: Vec<u8>) {
        tracing::trace!(bytes = batch.len(), "output batch");
        self.gate.record_delivered(batch.len());
        self.emit(SessionEventKind::Data(batch));
    }

    fn signal_child(&self, signal: Signal) -> io::Result<()> {
        match self.control.lock().as_mut() {
            Some(control) => control.signal(signal),
            None => Ok(()),
        }
    }

    fn is_running(&self) -> bool {
        self.record.lock().state().is_running()
    }
}

/// One child shell behind a pseudo-terminal, with batched output and paced
/// input.
///
/// All methods return immediately. Output, exit and non-fatal errors arrive
/// on the event channel given at construction. Must be used from within a
/// Tokio runtime.
pub struct PtySession {
    shared: Arc<SessionShared>,
    options: SessionOptions,
    config: FlowControlConfig,
    strategies: Vec<Arc<dyn SpawnStrategy>>,
    throttler: InputThrottler,
}

impl PtySession {
    /// `strategies` are tried in order on [`spawn`](PtySession::spawn).
    pub fn new(
        id: SessionId,
        options: SessionOptions,
        config: FlowControlConfig,
        strategies: Vec<Arc<dyn SpawnStrategy>>,
        events: EventSender,
    ) -> Self {
        let record = SessionRecord::new(
            id.clone(),
            options.resolved_shell(),
            options.resolved_cwd(),
            options.size(),
        );
        Self {
            shared: Arc::new(SessionShared {
                id,
                record: Mutex::new(record),
                control: Mutex::new(None),
                gate: FlowGate::new(config.ack),
                escalation_armed: AtomicBool::new(false),
                events,
            }),
            throttler: InputThrottler::new(config.input),
            options,
            config,
            strategies,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.shared.id
    }

    pub fn state(&self) -> SessionState {
        self.shared.record.lock().state().clone()
    }

    pub fn size(&self) -> TerminalSize {
        self.shared.record.lock().size()
    }

    pub fn pid(&self) -> Option<u32> {
        self.shared.record.lock().pid()
    }

    pub fn strategy(&self) -> Option<StrategyKind> {
        self.shared.record.lock().strategy()
    }

    pub fn info(&self) -> SessionInfo {
        self.shared.record.lock().info()
    }

    /// Start the child, trying each strategy until one succeeds.
    ///
    /// A session gets exactly one attempt; calling this again, even after a
    /// failure, returns [`SpawnError::NotRestartable`].
    pub fn spawn(&self) -> Result<(), SpawnError> {
        if !self.shared.record.lock().begin_spawn() {
            return Err(SpawnError::NotRestartable(self.id().clone()));
        }
        let request = self.spawn_request()?;

        let mut failures = Vec::new();
        for strategy in &self.strategies {
            let kind = strategy.kind();
            match strategy.spawn(&request) {
                Ok(child) => return self.start(kind, child),
                Err(e) => {
                    tracing::warn!(
                        session_id = %self.id(),
                        strategy = %kind,
                        error = %e,
                        "spawn strategy failed"
                    );
                    failures.push(format!("{kind}: {e}"));
                }
            }
        }
        let tried = if failures.is_empty() {
            "no strategy available".to_string()
        } else {
            failures.join("; ")
        };
        Err(SpawnError::NoViableStrategy { tried })
    }

    fn spawn_request(&self) -> Result<SpawnRequest, SpawnError> {
        let (shell, cwd, size) = {
            let record = self.shared.record.lock();
            (
                record.shell().to_string(),
                record.cwd().to_path_buf(),
                record.size(),
            )
        };
        if !cwd.is_dir() {
            return Err(SpawnError::InvalidCwd(cwd));
        }
        let env = self.options.build_environment(inherited_environment(), size);
        let program = resolve_shell(&shell, env.get("PATH").map(String::as_str), &cwd)?;
        Ok(SpawnRequest {
            program,
            args: self.options.args.clone(),
            cwd,
            env,
            size,
        })
    }

    fn start(&self, kind: StrategyKind, child: SpawnedChild) -> Result<(), SpawnError> {
        let SpawnedChild {
            input,
            mut control,
            output,
            exit,
        } = child;
        let pid = control.pid();

        if !self.shared.record.lock().mark_running(kind, pid) {
            // Killed while the child was starting.
            let _ = control.signal(Signal::Kill);
            return Err(SpawnError::NotRestartable(self.id().clone()));
        }
        *self.shared.control.lock() = Some(control);
        self.throttler
            .attach(input, write_error_hook(&self.shared.events, self.id()));

        tracing::info!(session_id = %self.id(), strategy = %kind, pid = ?pid, "session started");
        let span = tracing::info_span!("pty_session", session_id = %self.id());
        tokio::spawn(
            pump_output(
                Arc::clone(&self.shared),
                self.throttler.clone(),
                self.config.clone(),
                output,
                exit,
            )
            .instrument(span),
        );
        Ok(())
    }

    /// Queue `bytes` for the child's stdin. Held until spawn if the child is
    /// not running yet; dropped once it has exited.
    pub fn write(&self, bytes: &[u8]) {
        if self.shared.record.lock().state().is_exited() {
            tracing::debug!(session_id = %self.id(), bytes = bytes.len(), "write after exit dropped");
            return;
        }
        self.throttler.enqueue(bytes);
    }

    pub fn resize(&self, cols: u16, rows: u16) {
        let size = TerminalSize::new(cols, rows);
        let running = {
            let mut record = self.shared.record.lock();
            record.set_size(size);
            record.state().is_running()
        };
        if !running {
            return;
        }
        if let Some(control) = self.shared.control.lock().as_mut()
            && let Err(e) = control.resize(size)
        {
            tracing::debug!(session_id = %self.id(), error = %e, "resize failed");
        }
    }

    /// Signal the child's process group. Safe to call any number of times;
    /// the session still reports exactly one exit.
    pub fn kill(&self, signal: Signal) {
        {
            let mut record = self.shared.record.lock();
            if record.state().is_exited() {
                return;
            }
            if matches!(record.state(), SessionState::Created) {
                let status = ExitStatus::with_signal(signal.name());
                let first = record.mark_exited(status.clone());
                drop(record);
                if first {
                    self.throttler.close();
                    tracing::info!(session_id = %self.id(), %signal, "session killed before spawn");
                    self.shared.emit(SessionEventKind::Exit(status));
                }
                return;
            }
        }

        tracing::debug!(session_id = %self.id(), %signal, "signalling child");
        if let Err(e) = self.shared.signal_child(signal) {
            tracing::warn!(session_id = %self.id(), %signal, error = %e, "kill failed");
            self.shared
                .emit(SessionEventKind::Error(format!("failed to send {signal}: {e}")));
        }

        if signal != Signal::Kill
            && let Some(after) = self.config.kill_timeout()
            && !self.shared.escalation_armed.swap(true, Ordering::SeqCst)
        {
            let span = tracing::info_span!("pty_session", session_id = %self.id());
            tokio::spawn(escalate(Arc::clone(&self.shared), after).instrument(span));
        }
    }

    /// The consumer has processed `bytes` of output.
    pub fn acknowledge(&self, bytes: usize) {
        self.shared.gate.acknowledge(bytes);
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        if self.shared.is_running() {
            tracing::debug!(session_id = %self.id(), "hanging up dropped session");
            if let Err(e) = self.shared.signal_child(Signal::Hup) {
                tracing::debug!(session_id = %self.id(), error = %e, "hangup failed");
            }
        }
        self.throttler.close();
    }
}

fn inherited_environment() -> impl Iterator<Item = (String, String)> {
    utf8_environment(std::env::vars_os())
}

/// Variables that are not valid UTF-8 cannot be carried in the child
/// environment and are skipped.
fn utf8_environment<I>(vars: I) -> impl Iterator<Item = (String, String)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter()
        .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
            (Ok(key), Ok(value)) => Some((key, value)),
            (Ok(key), Err(_)) => {
                tracing::debug!(%key, "skipping environment variable with non-UTF-8 value");
                None
            }
            (Err(key), _) => {
                tracing::debug!(key = %key.to_string_lossy(), "skipping non-UTF-8 environment variable");
                None
            }
        })
}

/// Find `shell` the way the child's own environment would: on the `PATH`
/// it will be given, relative to its working directory.
fn resolve_shell(shell: &str, path: Option<&str>, cwd: &Path) -> Result<PathBuf, SpawnError> {
    which::which_in(shell, path, cwd).map_err(|source| SpawnError::ShellNotFound {
        shell: shell.to_string(),
        source,
    })
}

fn write_error_hook(events: &EventSender, id: &SessionId) -> WriteErrorHook {
    let events = events.clone();
    let id = id.clone();
    Arc::new(move |e: &io::Error| {
        let _ = events.send(SessionEvent {
            id: id.clone(),
            kind: SessionEventKind::Error(format!("write to child failed: {e}")),
        });
    })
}

/// Relay child output until exit, then drain, flush and report the exit.
async fn pump_output(
    shared: Arc<SessionShared>,
    throttler: InputThrottler,
    config: FlowControlConfig,
    mut output: mpsc::Receiver<Vec<u8>>,
    mut exit: oneshot::Receiver<ExitStatus>,
) {
    let mut batcher = OutputBatcher::new(config.output);
    let mut output_open = true;

    let status = loop {
        let paused = shared.gate.is_paused();
        let deadline = batcher.deadline();
        tokio::select! {
            biased;
            chunk = output.recv(), if output_open && !paused => match chunk {
                Some(chunk) => {
                    let now = Instant::now();
                    if let Some(batch) = batcher.push(&chunk, now) {
                        shared.emit_data(batch);
                    } else if batcher.is_due(now)
                        && let Some(batch) = batcher.take()
                    {
                        shared.emit_data(batch);
                    }
                }
                None => output_open = false,
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if let Some(batch) = batcher.take() {
                    shared.emit_data(batch);
                }
            }
            _ = shared.gate.wait_resumed(), if paused => {}
            status = &mut exit => break status.unwrap_or_default(),
        }
    };

    // The child is reaped; its pid may be reused from here on.
    drop(shared.control.lock().take());
    throttler.close();

    // The exit notification can overtake the last reads. Keep relaying until
    // the output closes, but no longer than `exit_drain` after the exit: a
    // descendant may hold the output open indefinitely.
    if output_open {
        let drain_until = Instant::now() + config.exit_drain();
        loop {
            let wake_at = batcher
                .deadline()
                .map_or(drain_until, |deadline| deadline.min(drain_until));
            match timeout_at(wake_at, output.recv()).await {
                Ok(Some(chunk)) => {
                    let now = Instant::now();
                    if let Some(batch) = batcher.push(&chunk, now) {
                        shared.emit_data(batch);
                    } else if batcher.is_due(now)
                        && let Some(batch) = batcher.take()
                    {
                        shared.emit_data(batch);
                    }
                }
                Ok(None) => break,
                Err(_) if wake_at < drain_until => {
                    if let Some(batch) = batcher.take() {
                        shared.emit_data(batch);
                    }
                }
                Err(_) => break,
            }
        }
    }
    if let Some(batch) = batcher.take() {
        shared.emit_data(batch);
    }

    if shared.record.lock().mark_exited(status.clone()) {
        tracing::info!(code = ?status.code, signal = ?status.signal, "session exited");
        shared.emit(SessionEventKind::Exit(status));
    }
}

/// SIGKILL the child if it outlives `after`.
async fn escalate(shared: Arc<SessionShared>, after: Duration) {
    tokio::time::sleep(after).await;
    if !shared.is_running() {
        return;
    }
    tracing::warn!(timeout_ms = after.as_millis() as u64, "child still running, sending SIGKILL");
    if let Err(e) = shared.signal_child(Signal::Kill) {
        shared.emit(SessionEventKind::Error(format!(
            "failed to send {}: {e}",
            Signal::Kill
        )));
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use crate::domain::primitive::{EventReceiver, event_channel};
    use crate::shared::config::{AckWatermarks, OutputBatchConfig};
    use crate::test_support::MockStrategy;

    fn options() -> SessionOptions {
        SessionOptions {
            shell: Some("sh".to_string()),
            cwd: Some(std::env::temp_dir()),
            ..SessionOptions::default()
        }
    }

    fn session_with(
        strategies: Vec<Arc<dyn SpawnStrategy>>,
        options: SessionOptions,
        config: FlowControlConfig,
    ) -> (PtySession, EventReceiver) {
        let (tx, rx) = event_channel();
        let session = PtySession::new(SessionId::new("s1"), options, config, strategies, tx);
        (session, rx)
    }

    fn mock_session(strategy: &MockStrategy) -> (PtySession, EventReceiver) {
        session_with(
            vec![Arc::new(strategy.clone())],
            options(),
            FlowControlConfig::default(),
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    fn drain_events(rx: &mut EventReceiver) -> Vec<SessionEventKind> {
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.id, SessionId::new("s1"));
            kinds.push(event.kind);
        }
        kinds
    }

    fn exits(kinds: &[SessionEventKind]) -> usize {
        kinds
            .iter()
            .filter(|kind| matches!(kind, SessionEventKind::Exit(_)))
            .count()
    }

    fn data(kinds: &[SessionEventKind]) -> Vec<Vec<u8>> {
        kinds
            .iter()
            .filter_map(|kind| match kind {
                SessionEventKind::Data(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    // =========================================================================
    // Tests: spawn
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn spawn_enters_running_with_first_strategy() {
        let strategy = MockStrategy::new(StrategyKind::NativePty);
        let (session, _rx) = mock_session(&strategy);

        session.spawn().unwrap();

        assert!(session.state().is_running());
        assert_eq!(session.pid(), Some(4242));
        assert_eq!(session.strategy(), Some(StrategyKind::NativePty));
    }

    #[tokio::test(start_paused = true)]
    async fn spawn_request_carries_terminal_environment() {
        let strategy = MockStrategy::new(StrategyKind::NativePty);
        let (session, _rx) = mock_session(&strategy);

        session.resize(100, 30);
        session.spawn().unwrap();

        let spawns = strategy.calls.spawns.lock().unwrap();
        let request = &spawns[0];
        assert!(request.program.is_absolute());
        assert_eq!(request.size, TerminalSize::new(100, 30));
        assert_eq!(request.env["TERM"], "xterm-256color");
        assert_eq!(request.env["COLUMNS"], "100");
        assert_eq!(request.env["LINES"], "30");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_strategy_falls_back_to_next() {
        let good = MockStrategy::new(StrategyKind::DirectSpawn);
        let (session, _rx) = session_with(
            vec![
                Arc::new(MockStrategy::failing(StrategyKind::NativePty)),
                Arc::new(good.clone()),
            ],
            options(),
            FlowControlConfig::default(),
        );

        session.spawn().unwrap();

        assert_eq!(session.strategy(), Some(StrategyKind::DirectSpawn));
        assert_eq!(good.calls.spawns.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn every_strategy_failing_is_reported() {
        let (session, _rx) = session_with(
            vec![
                Arc::new(MockStrategy::failing(StrategyKind::NativePty)),
                Arc::new(MockStrategy::failing(StrategyKind::ScriptWrapper)),
            ],
            options(),
            FlowControlConfig::default(),
        );

        let err = session.spawn().unwrap_err();

        match err {
            SpawnError::NoViableStrategy { tried } => {
                assert!(tried.contains("native_pty: mock spawn failure"));
                assert!(tried.contains("script_wrapper: mock spawn failure"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(session.state(), SessionState::Created);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_shell_is_rejected() {
        let strategy = MockStrategy::new(StrategyKind::NativePty);
        let (session, _rx) = session_with(
            vec![Arc::new(strategy.clone())],
            options().with_shell("definitely-not-a-shell-9f3a"),
            FlowControlConfig::default(),
        );

        let err = session.spawn().unwrap_err();

        assert!(matches!(err, SpawnError::ShellNotFound { .. }));
        assert!(strategy.calls.spawns.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_cwd_is_rejected() {
        let strategy = MockStrategy::new(StrategyKind::NativePty);
        let (session, _rx) = session_with(
            vec![Arc::new(strategy)],
            SessionOptions {
                cwd: Some(PathBuf::from("/definitely/not/a/dir")),
                ..options()
            },
            FlowControlConfig::default(),
        );

        assert!(matches!(
            session.spawn().unwrap_err(),
            SpawnError::InvalidCwd(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn session_cannot_be_spawned_twice() {
        let strategy = MockStrategy::new(StrategyKind::NativePty);
        let (session, _rx) = mock_session(&strategy);

        session.spawn().unwrap();

        assert!(matches!(
            session.spawn().unwrap_err(),
            SpawnError::NotRestartable(_)
        ));
        assert_eq!(strategy.calls.spawns.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_spawn_is_not_retried() {
        let (session, _rx) = session_with(
            vec![Arc::new(MockStrategy::failing(StrategyKind::NativePty))],
            options(),
            FlowControlConfig::default(),
        );

        assert!(session.spawn().is_err());
        assert!(matches!(
            session.spawn().unwrap_err(),
            SpawnError::NotRestartable(_)
        ));
    }

    // =========================================================================
    // Tests: kill
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn immediate_kill_emits_one_exit() {
        let strategy = MockStrategy::new(StrategyKind::NativePty);
        let (session, mut rx) = mock_session(&strategy);
        session.spawn().unwrap();

        session.kill(Signal::Term);
        settle().await;

        let kinds = drain_events(&mut rx);
        assert_eq!(exits(&kinds), 1);
        assert_eq!(
            kinds.last(),
            Some(&SessionEventKind::Exit(ExitStatus::with_signal("SIGTERM")))
        );
        assert!(session.state().is_exited());
    }

    #[tokio::test(start_paused = true)]
    async fn double_kill_emits_one_exit() {
        let strategy = MockStrategy::new(StrategyKind::NativePty);
        let (session, mut rx) = mock_session(&strategy);
        session.spawn().unwrap();

        session.kill(Signal::Term);
        session.kill(Signal::Term);
        settle().await;
        session.kill(Signal::Kill);
        settle().await;

        assert_eq!(exits(&drain_events(&mut rx)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn kill_before_spawn_exits_once() {
        let strategy = MockStrategy::new(StrategyKind::NativePty);
        let (session, mut rx) = mock_session(&strategy);

        session.kill(Signal::Hup);
        session.kill(Signal::Hup);

        let kinds = drain_events(&mut rx);
        assert_eq!(
            kinds,
            vec![SessionEventKind::Exit(ExitStatus::with_signal("SIGHUP"))]
        );
        assert!(matches!(
            session.spawn().unwrap_err(),
            SpawnError::NotRestartable(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn ignored_signal_escalates_to_sigkill() {
        let strategy = MockStrategy::new(StrategyKind::NativePty).exiting_on(&[Signal::Kill]);
        let (session, mut rx) = mock_session(&strategy);
        session.spawn().unwrap();

        session.kill(Signal::Term);
        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert_eq!(strategy.calls.signals(), vec![Signal::Term]);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(strategy.calls.signals(), vec![Signal::Term, Signal::Kill]);

        settle().await;
        let kinds = drain_events(&mut rx);
        assert_eq!(
            kinds.last(),
            Some(&SessionEventKind::Exit(ExitStatus::with_signal("SIGKILL")))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn no_escalation_when_child_exits() {
        let strategy = MockStrategy::new(StrategyKind::NativePty);
        let (session, _rx) = mock_session(&strategy);
        session.spawn().unwrap();

        session.kill(Signal::Term);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(strategy.calls.signals(), vec![Signal::Term]);
    }

    #[tokio::test(start_paused = true)]
    async fn escalation_can_be_disabled() {
        let strategy = MockStrategy::new(StrategyKind::NativePty).exiting_on(&[]);
        let config = FlowControlConfig {
            kill_timeout_ms: None,
            ..FlowControlConfig::default()
        };
        let (session, _rx) = session_with(vec![Arc::new(strategy.clone())], options(), config);
        session.spawn().unwrap();

        session.kill(Signal::Term);
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(strategy.calls.signals(), vec![Signal::Term]);
        assert!(session.state().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_running_session_hangs_up() {
        let strategy = MockStrategy::new(StrategyKind::NativePty);
        let (session, _rx) = mock_session(&strategy);
        session.spawn().unwrap();

        drop(session);

        assert_eq!(strategy.calls.signals(), vec![Signal::Hup]);
    }

    // =========================================================================
    // Tests: output
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn burst_of_output_is_coalesced() {
        let strategy = MockStrategy::new(StrategyKind::NativePty);
        let (session, mut rx) = mock_session(&strategy);
        session.spawn().unwrap();

        let mut expected = Vec::new();
        for i in 0..500u32 {
            let chunk = [b'0' + (i % 10) as u8; 10];
            expected.extend_from_slice(&chunk);
            strategy.calls.emit(&chunk).await;
        }
        settle().await;

        let batches = data(&drain_events(&mut rx));
        assert!(batches.len() < 10, "got {} batches", batches.len());
        assert_eq!(batches.concat(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn output_before_exit_is_never_lost() {
        let strategy = MockStrategy::new(StrategyKind::NativePty);
        let (session, mut rx) = mock_session(&strategy);
        session.spawn().unwrap();

        strategy.calls.emit(b"last ").await;
        strategy.calls.emit(b"words").await;
        strategy.calls.exit(ExitStatus::with_code(0));
        settle().await;

        let kinds = drain_events(&mut rx);
        assert_eq!(data(&kinds).concat(), b"last words");
        assert_eq!(
            kinds.last(),
            Some(&SessionEventKind::Exit(ExitStatus::with_code(0)))
        );
        assert_eq!(exits(&kinds), 1);
        assert_eq!(
            session.state().exit_status(),
            Some(&ExitStatus::with_code(0))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn quiet_output_is_flushed_after_quiet_period() {
        let strategy = MockStrategy::new(StrategyKind::NativePty);
        let (session, mut rx) = mock_session(&strategy);
        session.spawn().unwrap();

        strategy.calls.emit(b"prompt$ ").await;
        tokio::task::yield_now().await;
        assert!(drain_events(&mut rx).is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            drain_events(&mut rx),
            vec![SessionEventKind::Data(b"prompt$ ".to_vec())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_output_pauses_reading() {
        let strategy = MockStrategy::new(StrategyKind::NativePty);
        let config = FlowControlConfig {
            output: OutputBatchConfig {
                flush_threshold: 50,
                ..OutputBatchConfig::default()
            },
            ack: Some(AckWatermarks {
                high_watermark: 100,
                low_watermark: 40,
            }),
            ..FlowControlConfig::default()
        };
        let (session, mut rx) = session_with(vec![Arc::new(strategy.clone())], options(), config);
        session.spawn().unwrap();

        for _ in 0..3 {
            strategy.calls.emit(&[b'x'; 50]).await;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        settle().await;
        assert_eq!(data(&drain_events(&mut rx)).concat().len(), 100);

        session.acknowledge(100);
        settle().await;
        assert_eq!(data(&drain_events(&mut rx)).concat().len(), 50);
    }

    #[tokio::test(start_paused = true)]
    async fn exit_is_reported_while_descendant_holds_output() {
        let strategy = MockStrategy::new(StrategyKind::DirectSpawn);
        let (session, mut rx) = mock_session(&strategy);
        session.spawn().unwrap();

        strategy.calls.emit(b"x\n").await;
        strategy
            .calls
            .exit_leaving_output_open(ExitStatus::with_code(0));
        for _ in 0..3 {
            strategy.calls.emit(b"x\n").await;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let kinds = drain_events(&mut rx);
        assert_eq!(data(&kinds).concat(), b"x\nx\nx\nx\n");
        assert_eq!(
            kinds.last(),
            Some(&SessionEventKind::Exit(ExitStatus::with_code(0)))
        );
        assert!(session.state().is_exited());

        for _ in 0..5 {
            strategy.calls.emit(b"x\n").await;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(drain_events(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn kill_after_reap_does_not_signal() {
        let strategy = MockStrategy::new(StrategyKind::NativePty);
        let (session, mut rx) = mock_session(&strategy);
        session.spawn().unwrap();

        strategy
            .calls
            .exit_leaving_output_open(ExitStatus::with_code(0));
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.kill(Signal::Term);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(strategy.calls.signals().is_empty());
        assert_eq!(exits(&drain_events(&mut rx)), 1);
    }

    // =========================================================================
    // Tests: environment
    // =========================================================================

    #[test]
    fn non_utf8_environment_is_skipped() {
        use std::os::unix::ffi::OsStringExt;

        let vars = vec![
            (OsString::from("KEEP"), OsString::from("1")),
            (OsString::from_vec(vec![b'K', 0xff]), OsString::from("2")),
            (OsString::from("BAD_VALUE"), OsString::from_vec(vec![b'v', 0xfe])),
        ];

        let kept: Vec<_> = utf8_environment(vars).collect();

        assert_eq!(kept, vec![("KEEP".to_string(), "1".to_string())]);
    }

    // =========================================================================
    // Tests: input
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn input_before_spawn_is_delivered() {
        let strategy = MockStrategy::new(StrategyKind::NativePty);
        let (session, _rx) = mock_session(&strategy);

        session.write(b"echo hi\n");
        session.spawn().unwrap();
        settle().await;

        assert_eq!(strategy.calls.written(), b"echo hi\n");
    }

    #[tokio::test(start_paused = true)]
    async fn large_write_respects_chunk_limit() {
        let strategy = MockStrategy::new(StrategyKind::NativePty);
        let (session, _rx) = mock_session(&strategy);
        session.spawn().unwrap();

        let payload = vec![b'a'; 10_000];
        session.write(&payload);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(strategy.calls.written(), payload);
        assert!(strategy.calls.write_sizes().iter().all(|&n| n <= 512));
    }

    #[tokio::test(start_paused = true)]
    async fn write_after_exit_is_dropped() {
        let strategy = MockStrategy::new(StrategyKind::NativePty);
        let (session, _rx) = mock_session(&strategy);
        session.spawn().unwrap();
        strategy.calls.exit(ExitStatus::with_code(0));
        settle().await;

        session.write(b"too late");
        settle().await;

        assert!(strategy.calls.written().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn write_failure_is_reported_as_error_event() {
        let strategy = MockStrategy::new(StrategyKind::NativePty);
        let (session, mut rx) = mock_session(&strategy);
        session.spawn().unwrap();
        strategy.calls.fail_writes.store(true, Ordering::SeqCst);

        session.write(&[b'y'; 2000]);
        settle().await;

        let kinds = drain_events(&mut rx);
        let errors: Vec<_> = kinds
            .iter()
            .filter(|kind| matches!(kind, SessionEventKind::Error(_)))
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(session.state().is_running());
    }

    // =========================================================================
    // Tests: resize
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn resize_is_forwarded_while_running() {
        let strategy = MockStrategy::new(StrategyKind::NativePty);
        let (session, _rx) = mock_session(&strategy);

        session.resize(120, 40);
        assert!(strategy.calls.resizes.lock().unwrap().is_empty());

        session.spawn().unwrap();
        session.resize(0, 50);

        assert_eq!(
            *strategy.calls.resizes.lock().unwrap(),
            vec![TerminalSize::new(1, 50)]
        );
        assert_eq!(session.info().cols, 1);
        assert_eq!(session.info().rows, 50);
    }

    // =========================================================================
    // Tests: real shells
    // =========================================================================

    mod real_shell {
        use super::*;
        use crate::infrastructure::pty::{
            DirectSpawnStrategy, NativePtyStrategy, ScriptPtyStrategy, probe_native_pty,
        };
        use crate::interface_adapter::adapter::strategy_factory::{Platform, probe_capabilities};

        fn sh_options(args: &[&str]) -> SessionOptions {
            SessionOptions {
                shell: Some("/bin/sh".to_string()),
                args: args.iter().map(|a| a.to_string()).collect(),
                cwd: Some(std::env::temp_dir()),
                ..SessionOptions::default()
            }
            .with_size(80, 24)
        }

        /// Collect output until `needle` shows up or `limit` passes.
        async fn output_until(rx: &mut EventReceiver, needle: &str, limit: Duration) -> String {
            let mut seen = Vec::new();
            let _ = tokio::time::timeout(limit, async {
                while let Some(event) = rx.recv().await {
                    if let SessionEventKind::Data(bytes) = event.kind {
                        seen.extend_from_slice(&bytes);
                        if String::from_utf8_lossy(&seen).contains(needle) {
                            break;
                        }
                    }
                }
            })
            .await;
            String::from_utf8_lossy(&seen).into_owned()
        }

        async fn next_exit(rx: &mut EventReceiver) -> (Vec<u8>, ExitStatus) {
            let mut data = Vec::new();
            let status = tokio::time::timeout(Duration::from_secs(5), async {
                while let Some(event) = rx.recv().await {
                    match event.kind {
                        SessionEventKind::Data(bytes) => data.extend_from_slice(&bytes),
                        SessionEventKind::Exit(status) => return status,
                        SessionEventKind::Error(_) => {}
                    }
                }
                panic!("event channel closed before exit");
            })
            .await
            .expect("child should exit");
            (data, status)
        }

        async fn echo_round_trip(strategy: Arc<dyn SpawnStrategy>) {
            let (session, mut rx) =
                session_with(vec![strategy], sh_options(&[]), FlowControlConfig::default());
            session.spawn().unwrap();

            // The quotes keep the echoed command line from matching.
            session.write(b"echo h''i\n");
            let output = output_until(&mut rx, "hi", Duration::from_secs(2)).await;
            assert!(output.contains("hi"), "output was {output:?}");

            session.kill(Signal::Kill);
            let (_, status) = next_exit(&mut rx).await;
            assert_eq!(status, ExitStatus::with_signal("SIGKILL"));
            assert!(session.state().is_exited());
        }

        #[tokio::test]
        async fn direct_spawn_echoes_command_output() {
            echo_round_trip(Arc::new(DirectSpawnStrategy)).await;
        }

        #[tokio::test]
        async fn native_pty_echoes_command_output() {
            if !probe_native_pty() {
                return;
            }
            echo_round_trip(Arc::new(NativePtyStrategy)).await;
        }

        #[tokio::test]
        async fn script_wrapper_echoes_command_output() {
            let (Some(script), Some(flavor)) = (
                probe_capabilities().script.clone(),
                Platform::current().script_flavor(),
            ) else {
                return;
            };
            echo_round_trip(Arc::new(ScriptPtyStrategy::new(script, flavor))).await;
        }

        #[tokio::test]
        async fn exit_code_follows_final_output() {
            let (session, mut rx) = session_with(
                vec![Arc::new(DirectSpawnStrategy)],
                sh_options(&["-c", "printf done; exit 3"]),
                FlowControlConfig::default(),
            );
            session.spawn().unwrap();

            let (data, status) = next_exit(&mut rx).await;

            assert_eq!(data, b"done");
            assert_eq!(status, ExitStatus::with_code(3));
        }

        #[tokio::test]
        async fn child_sees_terminal_environment() {
            let (session, mut rx) = session_with(
                vec![Arc::new(DirectSpawnStrategy)],
                sh_options(&["-c", "printf '%s %s %s' \"$TERM\" \"$COLUMNS\" \"$LINES\""]),
                FlowControlConfig::default(),
            );
            session.spawn().unwrap();

            let (data, _) = next_exit(&mut rx).await;

            assert_eq!(String::from_utf8_lossy(&data), "xterm-256color 80 24");
        }
    }
}
