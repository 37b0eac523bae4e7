//! Tick sources.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Run,
    Stop,
}

/// Decides when the scheduler runs next.
pub trait TickSource: Send {
    /// Block until the next run is due. Returns [`Tick::Stop`] once
    /// `shutdown` fires or disconnects.
    fn next_tick(&mut self, shutdown: &Receiver<()>) -> Tick;
}

/// Fires immediately, then every `interval`.
#[derive(Debug, Clone)]
pub struct IntervalTicks {
    interval: Duration,
    started: bool,
}

impl IntervalTicks {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            started: false,
        }
    }
}

impl TickSource for IntervalTicks {
    fn next_tick(&mut self, shutdown: &Receiver<()>) -> Tick {
        if !self.started {
            self.started = true;
            return match shutdown.try_recv() {
                Err(TryRecvError::Empty) => Tick::Run,
                _ => Tick::Stop,
            };
        }
        match shutdown.recv_timeout(self.interval) {
            Err(RecvTimeoutError::Timeout) => Tick::Run,
            _ => Tick::Stop,
        }
    }
}

/// Runs only when triggered through its [`ManualTrigger`].
#[derive(Debug)]
pub struct ManualTicks {
    triggers: Receiver<()>,
    poll: Duration,
}

/// Cloneable trigger of a [`ManualTicks`] source.
#[derive(Debug, Clone)]
pub struct ManualTrigger {
    tx: Sender<()>,
}

impl ManualTrigger {
    /// Request one run. Returns `false` when the scheduler is gone.
    pub fn fire(&self) -> bool {
        self.tx.send(()).is_ok()
    }
}

impl ManualTicks {
    pub fn new() -> (Self, ManualTrigger) {
        let (tx, rx) = mpsc::channel();
        (
            Self {
                triggers: rx,
                poll: Duration::from_millis(20),
            },
            ManualTrigger { tx },
        )
    }
}

impl TickSource for ManualTicks {
    fn next_tick(&mut self, shutdown: &Receiver<()>) -> Tick {
        loop {
            match shutdown.try_recv() {
                Err(TryRecvError::Empty) => {}
                _ => return Tick::Stop,
            }
            match self.triggers.recv_timeout(self.poll) {
                Ok(()) => return Tick::Run,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Tick::Stop,
            }
        }
    }
}
