use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use portable_pty::{native_pty_system, Child, ChildKiller, CommandBuilder, MasterPty, PtySize};
use tokio::sync::{mpsc, oneshot};

use crate::domain::primitive::{ExitStatus, Signal, StrategyKind, TerminalSize};
use crate::interface_adapter::port::{
    ChildControl, ChildInput, SpawnRequest, SpawnStrategy, SpawnedChild,
};

const READ_BUFFER_SIZE: usize = 8192;
pub(crate) const OUTPUT_CHANNEL_CAPACITY: usize = 64;

/// Convert domain `TerminalSize` to portable-pty `PtySize`.
fn to_pty_size(size: TerminalSize) -> PtySize {
    PtySize {
        rows: size.rows,
        cols: size.cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

fn pty_error(e: impl std::fmt::Display) -> io::Error {
    io::Error::other(e.to_string())
}

/// Whether the OS can hand out a pseudo-terminal right now. Opens and closes
/// one pair; does not spawn anything.
pub fn probe_native_pty() -> bool {
    native_pty_system().openpty(PtySize::default()).is_ok()
}

/// Allocates a real pty pair through `portable-pty`.
pub struct NativePtyStrategy;

impl SpawnStrategy for NativePtyStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::NativePty
    }

    fn spawn(&self, request: &SpawnRequest) -> io::Result<SpawnedChild> {
        let pair = native_pty_system()
            .openpty(to_pty_size(request.size))
            .map_err(pty_error)?;

        let mut cmd = CommandBuilder::new(&request.program);
        cmd.args(&request.args);
        cmd.cwd(&request.cwd);
        cmd.env_clear();
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let child = pair.slave.spawn_command(cmd).map_err(pty_error)?;
        // The child holds its own copy of the slave; ours would keep the
        // master from ever seeing EOF.
        drop(pair.slave);

        let pid = child.process_id();
        let killer = child.clone_killer();

        let reader = match pair.master.try_clone_reader() {
            Ok(reader) => reader,
            Err(e) => return Err(abandon(child, pty_error(e))),
        };
        let writer = match pair.master.take_writer() {
            Ok(writer) => writer,
            Err(e) => return Err(abandon(child, pty_error(e))),
        };

        let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        if let Err(e) = spawn_reader(reader, output_tx) {
            return Err(abandon(child, e));
        }

        let (exit_tx, exit_rx) = oneshot::channel();
        spawn_waiter(child, exit_tx)?;

        Ok(SpawnedChild {
            input: Box::new(PtyInput {
                writer: Arc::new(Mutex::new(writer)),
            }),
            control: Box::new(NativePtyControl {
                master: pair.master,
                killer,
                pid,
            }),
            output: output_rx,
            exit: exit_rx,
        })
    }
}

/// Kill and reap a child whose plumbing could not be completed.
fn abandon(mut child: Box<dyn Child + Send + Sync>, error: io::Error) -> io::Error {
    let _ = child.kill();
    let _ = child.wait();
    error
}

fn spawn_reader(
    mut reader: Box<dyn Read + Send>,
    output_tx: mpsc::Sender<Vec<u8>>,
) -> io::Result<()> {
    std::thread::Builder::new()
        .name("pty-reader".into())
        .spawn(move || {
            let mut buf = [0u8; READ_BUFFER_SIZE];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        // Blocks while the session is not consuming, which is
                        // what stalls the child when output is paused.
                        if output_tx.blocking_send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    // EIO once the slave side is gone.
                    Err(_) => break,
                }
            }
        })
        .map(|_| ())
}

fn spawn_waiter(
    mut child: Box<dyn Child + Send + Sync>,
    exit_tx: oneshot::Sender<ExitStatus>,
) -> io::Result<()> {
    std::thread::Builder::new()
        .name("pty-waiter".into())
        .spawn(move || {
            let status = match child.wait() {
                Ok(status) => to_exit_status(&status),
                Err(e) => {
                    tracing::warn!(error = %e, "waiting for pty child failed");
                    ExitStatus::default()
                }
            };
            let _ = exit_tx.send(status);
        })
        .map(|_| ())
}

/// portable-pty reports signals by their `strsignal` description; map the
/// ones a session sends back to their names.
fn to_exit_status(status: &portable_pty::ExitStatus) -> ExitStatus {
    match status.signal() {
        Some(description) => {
            let name = match description {
                "Hangup" => Signal::Hup.name(),
                "Interrupt" => Signal::Int.name(),
                "Quit" => Signal::Quit.name(),
                "Killed" => Signal::Kill.name(),
                "Terminated" => Signal::Term.name(),
                other => other,
            };
            ExitStatus::with_signal(name)
        }
        None => ExitStatus::with_code(status.exit_code() as i32),
    }
}

/// PTY writes can block when the line discipline's buffer is full, so each
/// chunk is written on the blocking pool.
struct PtyInput {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

#[async_trait]
impl ChildInput for PtyInput {
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        let writer = Arc::clone(&self.writer);
        let chunk = chunk.to_vec();
        tokio::task::spawn_blocking(move || {
            let mut writer = writer
                .lock()
                .map_err(|_| io::Error::other("pty writer lock poisoned"))?;
            writer.write_all(&chunk)?;
            writer.flush()
        })
        .await
        .map_err(io::Error::other)?
    }
}

struct NativePtyControl {
    master: Box<dyn MasterPty + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
}

impl ChildControl for NativePtyControl {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn resize(&mut self, size: TerminalSize) -> io::Result<()> {
        self.master.resize(to_pty_size(size)).map_err(pty_error)
    }

    #[cfg(unix)]
    fn signal(&mut self, signal: Signal) -> io::Result<()> {
        match self.pid {
            // The child is a session leader, so its pid is also its group id.
            Some(pid) => super::process_signal::signal_group(pid, signal),
            None => self.killer.kill(),
        }
    }

    #[cfg(not(unix))]
    fn signal(&mut self, _signal: Signal) -> io::Result<()> {
        match self.killer.kill() {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}
