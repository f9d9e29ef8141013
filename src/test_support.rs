//! In-memory child process used by usecase tests.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::domain::primitive::{ExitStatus, Signal, StrategyKind, TerminalSize};
use crate::interface_adapter::port::{
    ChildControl, ChildInput, SpawnRequest, SpawnStrategy, SpawnedChild,
};

/// Everything a mock child saw, shared between the test and the mock.
#[derive(Clone, Default)]
pub struct MockCalls {
    pub spawns: Arc<Mutex<Vec<SpawnRequest>>>,
    pub writes: Arc<Mutex<Vec<(Instant, Vec<u8>)>>>,
    pub resizes: Arc<Mutex<Vec<TerminalSize>>>,
    pub signals: Arc<Mutex<Vec<Signal>>>,
    pub fail_writes: Arc<AtomicBool>,
    children: Arc<Mutex<Vec<MockChild>>>,
}

struct MockChild {
    output: Option<mpsc::Sender<Vec<u8>>>,
    exit: Option<oneshot::Sender<ExitStatus>>,
}

impl MockCalls {
    /// Bytes the child received on stdin, in order.
    pub fn written(&self) -> Vec<u8> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(_, chunk)| chunk.clone())
            .collect()
    }

    pub fn write_sizes(&self) -> Vec<usize> {
        self.writes
            .lock()
            .unwrap()
            .iter()
            .map(|(_, chunk)| chunk.len())
            .collect()
    }

    pub fn signals(&self) -> Vec<Signal> {
        self.signals.lock().unwrap().clone()
    }

    /// The most recently spawned child writes `bytes` to its terminal.
    pub async fn emit(&self, bytes: &[u8]) {
        let sender = self
            .children
            .lock()
            .unwrap()
            .last()
            .and_then(|child| child.output.clone());
        if let Some(sender) = sender {
            let _ = sender.send(bytes.to_vec()).await;
        }
    }

    /// The most recently spawned child exits.
    pub fn exit(&self, status: ExitStatus) {
        let last = self.children.lock().unwrap().len().checked_sub(1);
        if let Some(index) = last {
            self.exit_child(index, status);
        }
    }

    /// The most recently spawned child is reaped while a descendant keeps its
    /// output open; [`emit`](MockCalls::emit) keeps working.
    pub fn exit_leaving_output_open(&self, status: ExitStatus) {
        let mut children = self.children.lock().unwrap();
        if let Some(exit) = children.last_mut().and_then(|child| child.exit.take()) {
            let _ = exit.send(status);
        }
    }

    /// Child `index` exits: its output closes, then it is reaped.
    fn exit_child(&self, index: usize, status: ExitStatus) {
        let mut children = self.children.lock().unwrap();
        if let Some(child) = children.get_mut(index) {
            child.output.take();
            if let Some(exit) = child.exit.take() {
                let _ = exit.send(status);
            }
        }
    }
}

/// Strategy that hands out in-memory children.
#[derive(Clone)]
pub struct MockStrategy {
    kind: StrategyKind,
    fail_spawn: bool,
    /// Signals that make the child exit. Anything else is recorded and ignored.
    exit_on: Vec<Signal>,
    pub calls: MockCalls,
}

impl MockStrategy {
    pub fn new(kind: StrategyKind) -> Self {
        Self {
            kind,
            fail_spawn: false,
            exit_on: vec![Signal::Term, Signal::Kill, Signal::Hup, Signal::Int],
            calls: MockCalls::default(),
        }
    }

    pub fn failing(kind: StrategyKind) -> Self {
        Self {
            fail_spawn: true,
            ..Self::new(kind)
        }
    }

    pub fn exiting_on(mut self, signals: &[Signal]) -> Self {
        self.exit_on = signals.to_vec();
        self
    }
}

impl SpawnStrategy for MockStrategy {
    fn kind(&self) -> StrategyKind {
        self.kind
    }

    fn spawn(&self, request: &SpawnRequest) -> io::Result<SpawnedChild> {
        if self.fail_spawn {
            return Err(io::Error::other("mock spawn failure"));
        }
        self.calls.spawns.lock().unwrap().push(request.clone());

        let (output_tx, output_rx) = mpsc::channel(64);
        let (exit_tx, exit_rx) = oneshot::channel();
        let index = {
            let mut children = self.calls.children.lock().unwrap();
            children.push(MockChild {
                output: Some(output_tx),
                exit: Some(exit_tx),
            });
            children.len() - 1
        };

        Ok(SpawnedChild {
            input: Box::new(MockInput {
                calls: self.calls.clone(),
            }),
            control: Box::new(MockControl {
                calls: self.calls.clone(),
                exit_on: self.exit_on.clone(),
                index,
            }),
            output: output_rx,
            exit: exit_rx,
        })
    }
}

pub struct MockInput {
    pub calls: MockCalls,
}

#[async_trait]
impl ChildInput for MockInput {
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        if self.calls.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock stdin closed"));
        }
        self.calls
            .writes
            .lock()
            .unwrap()
            .push((Instant::now(), chunk.to_vec()));
        Ok(())
    }
}

struct MockControl {
    calls: MockCalls,
    exit_on: Vec<Signal>,
    index: usize,
}

impl ChildControl for MockControl {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    fn resize(&mut self, size: TerminalSize) -> io::Result<()> {
        self.calls.resizes.lock().unwrap().push(size);
        Ok(())
    }

    fn signal(&mut self, signal: Signal) -> io::Result<()> {
        self.calls.signals.lock().unwrap().push(signal);
        if self.exit_on.contains(&signal) {
            self.calls
                .exit_child(self.index, ExitStatus::with_signal(signal.name()));
        }
        Ok(())
    }
}
