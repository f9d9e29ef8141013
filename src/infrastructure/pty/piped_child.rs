use std::ffi::OsStr;
use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};

use crate::domain::primitive::{ExitStatus, Signal, TerminalSize};
use crate::interface_adapter::port::{ChildControl, ChildInput, SpawnRequest, SpawnedChild};

use super::native_pty_adapter::OUTPUT_CHANNEL_CAPACITY;

const READ_BUFFER_SIZE: usize = 8192;

/// Start `program args` with piped stdio in its own process group, merging
/// stdout and stderr into one output stream.
pub(crate) fn spawn_piped<S: AsRef<OsStr>>(
    program: impl AsRef<OsStr>,
    args: &[S],
    request: &SpawnRequest,
) -> io::Result<SpawnedChild> {
    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(&request.cwd)
        .env_clear()
        .envs(&request.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn()?;
    let pid = child.id();

    let (Some(stdin), Some(stdout), Some(stderr)) =
        (child.stdin.take(), child.stdout.take(), child.stderr.take())
    else {
        return Err(io::Error::other("child stdio was not captured"));
    };

    let (output_tx, output_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
    tokio::spawn(pump_stream(stdout, output_tx.clone()));
    tokio::spawn(pump_stream(stderr, output_tx));

    let (exit_tx, exit_rx) = oneshot::channel();
    let (kill_tx, kill_rx) = mpsc::unbounded_channel();
    tokio::spawn(wait_child(child, exit_tx, kill_rx));

    Ok(SpawnedChild {
        input: Box::new(PipeInput { stdin }),
        control: Box::new(PipedControl { pid, kill_tx }),
        output: output_rx,
        exit: exit_rx,
    })
}

async fn pump_stream<R>(mut stream: R, output_tx: mpsc::Sender<Vec<u8>>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if output_tx.send(buf[..n].to_vec()).await.is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
}

/// Reap the child. Kill requests that cannot be expressed as a signal (no pid,
/// or no signals on this platform) arrive on `kill_rx`.
async fn wait_child(
    mut child: Child,
    exit_tx: oneshot::Sender<ExitStatus>,
    mut kill_rx: mpsc::UnboundedReceiver<()>,
) {
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            Some(()) = kill_rx.recv() => {
                if let Err(e) = child.start_kill() {
                    tracing::debug!(error = %e, "start_kill failed");
                }
            }
        }
    };
    let status = match status {
        Ok(status) => ExitStatus::from(status),
        Err(e) => {
            tracing::warn!(error = %e, "waiting for child failed");
            ExitStatus::default()
        }
    };
    let _ = exit_tx.send(status);
}

struct PipeInput {
    stdin: ChildStdin,
}

#[async_trait]
impl ChildInput for PipeInput {
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.stdin.write_all(chunk).await?;
        self.stdin.flush().await
    }
}

struct PipedControl {
    pid: Option<u32>,
    kill_tx: mpsc::UnboundedSender<()>,
}

impl PipedControl {
    fn request_kill(&self) -> io::Result<()> {
        // A closed channel means the child has already been reaped.
        let _ = self.kill_tx.send(());
        Ok(())
    }
}

impl ChildControl for PipedControl {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// There is no pty to resize on our side; the child (or the `script`
    /// wrapper) is told to re-query its window instead.
    #[cfg(unix)]
    fn resize(&mut self, _size: TerminalSize) -> io::Result<()> {
        match self.pid {
            Some(pid) => super::process_signal::signal_process(pid, Signal::Winch),
            None => Ok(()),
        }
    }

    #[cfg(not(unix))]
    fn resize(&mut self, _size: TerminalSize) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "resize is not supported for piped children on this platform",
        ))
    }

    #[cfg(unix)]
    fn signal(&mut self, signal: Signal) -> io::Result<()> {
        match self.pid {
            Some(pid) => super::process_signal::signal_group(pid, signal),
            None => Ok(()),
        }
    }

    #[cfg(not(unix))]
    fn signal(&mut self, _signal: Signal) -> io::Result<()> {
        self.request_kill()
    }
}

impl Drop for PipedControl {
    fn drop(&mut self) {
        let _ = self.request_kill();
    }
}
