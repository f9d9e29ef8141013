use std::io::{self, Read, Write};
use std::sync::Arc;

use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tokio::sync::mpsc;

use crate::domain::model::SessionOptions;
use crate::domain::primitive::{
    EventReceiver, ExitStatus, SessionEventKind, SessionId, Signal, TerminalSize, event_channel,
};
use crate::interface_adapter::port::SpawnStrategy;
use crate::shared::config::FlowControlConfig;
use crate::usecase::pty_session::PtySession;

const STDIN_BUFFER_SIZE: usize = 4096;

/// Shell exit status as a process exit code, the way shells report it.
pub fn exit_code(status: &ExitStatus) -> i32 {
    match (status.code, status.signal.as_deref()) {
        (Some(code), _) => code,
        (None, Some(signal)) => signal_exit_code(signal).unwrap_or(1),
        (None, None) => 1,
    }
}

#[cfg(unix)]
fn signal_exit_code(name: &str) -> Option<i32> {
    name.parse::<Signal>().ok().map(|signal| 128 + signal.as_raw())
}

#[cfg(not(unix))]
fn signal_exit_code(_name: &str) -> Option<i32> {
    None
}

fn host_size() -> TerminalSize {
    crossterm::terminal::size()
        .map(|(cols, rows)| TerminalSize::new(cols, rows))
        .unwrap_or_default()
}

/// Run one shell on the host terminal until it exits. Returns its exit code.
///
/// Puts the terminal in raw mode for the duration and restores it on the way
/// out, whatever happens.
pub async fn run(
    mut options: SessionOptions,
    config: FlowControlConfig,
    strategies: Vec<Arc<dyn SpawnStrategy>>,
) -> anyhow::Result<i32> {
    let size = host_size();
    options.cols = size.cols;
    options.rows = size.rows;

    let (events_tx, events) = event_channel();
    let session = PtySession::new(
        SessionId::new("host"),
        options,
        config,
        strategies,
        events_tx,
    );
    session.spawn()?;
    tracing::info!(strategy = ?session.strategy(), pid = ?session.pid(), "shell started");

    // === Initialization ===
    enable_raw_mode()?;

    let result = main_loop(&session, events).await;

    // === Cleanup (always runs) ===
    let _ = disable_raw_mode();

    result
}

async fn main_loop(
    session: &PtySession,
    mut events: EventReceiver,
) -> anyhow::Result<i32> {
    let mut input = spawn_stdin_reader()?;
    let mut resizes = ResizeWatcher::new()?;
    let mut stdout = io::stdout();
    let mut input_open = true;

    loop {
        tokio::select! {
            bytes = input.recv(), if input_open => match bytes {
                Some(bytes) => session.write(&bytes),
                None => {
                    input_open = false;
                    session.kill(Signal::Hup);
                }
            },
            () = resizes.changed() => {
                let size = host_size();
                session.resize(size.cols, size.rows);
            }
            event = events.recv() => match event.map(|event| event.kind) {
                Some(SessionEventKind::Data(bytes)) => {
                    stdout.write_all(&bytes)?;
                    stdout.flush()?;
                }
                Some(SessionEventKind::Error(message)) => {
                    tracing::warn!(%message, "session error");
                }
                Some(SessionEventKind::Exit(status)) => {
                    tracing::info!(code = ?status.code, signal = ?status.signal, "shell exited");
                    return Ok(exit_code(&status));
                }
                None => return Ok(1),
            },
        }
    }
}

/// Host stdin is read on its own thread; reads cannot be cancelled, so the
/// thread is simply abandoned when the shell exits.
fn spawn_stdin_reader() -> io::Result<mpsc::UnboundedReceiver<Vec<u8>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("host-stdin".into())
        .spawn(move || {
            let mut stdin = io::stdin().lock();
            let mut buf = [0u8; STDIN_BUFFER_SIZE];
            loop {
                match stdin.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(_) => break,
                }
            }
        })?;
    Ok(rx)
}

#[cfg(unix)]
struct ResizeWatcher {
    signal: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl ResizeWatcher {
    fn new() -> io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self {
            signal: signal(SignalKind::window_change())?,
        })
    }

    async fn changed(&mut self) {
        if self.signal.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

/// Without `SIGWINCH` the initial size is all the shell gets.
#[cfg(not(unix))]
struct ResizeWatcher;

#[cfg(not(unix))]
impl ResizeWatcher {
    fn new() -> io::Result<Self> {
        Ok(Self)
    }

    async fn changed(&mut self) {
        std::future::pending::<()>().await
    }
}
