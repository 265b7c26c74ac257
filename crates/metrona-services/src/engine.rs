//! Real-time driver for the transport
//!
//! The transport lives on its own thread. Callers talk to it through a
//! command channel; between commands the thread polls the transport at a
//! frame-like cadence so due pulses are fired.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use metrona_core::{Source, SourceId, Transport, TransportEvent};
use thiserror::Error;
use tracing::{debug, info, warn};

const FRAME_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to spawn clock thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("Clock already running")]
    AlreadyRunning,
    #[error("Clock not running")]
    NotRunning,
    #[error("Clock thread disconnected")]
    Disconnected,
}

type EditFn = Box<dyn FnOnce(&mut Transport) + Send>;

enum EngineCommand {
    /// Replies whether the transport changed state
    Start(Sender<bool>),
    Stop(Sender<bool>),
    SetTempo(f64),
    Register(Source),
    Unregister(SourceId),
    Edit(EditFn),
    Shutdown,
}

/// Handle to the clock thread. Dropping it shuts the thread down.
pub struct ClockEngine {
    tx: Sender<EngineCommand>,
    thread: Option<JoinHandle<()>>,
}

impl ClockEngine {
    pub fn new(transport: Transport) -> Result<Self, EngineError> {
        let (tx, rx) = unbounded();

        let worker = ClockWorker {
            transport,
            rx,
            epoch: Instant::now(),
        };
        let thread = thread::Builder::new()
            .name("metrona-clock".into())
            .spawn(move || worker.run())?;

        info!("Clock engine spawned");
        Ok(Self {
            tx,
            thread: Some(thread),
        })
    }

    pub fn is_playing(&self) -> Result<bool, EngineError> {
        self.query(|transport| transport.is_running())
    }

    /// Start the transport; returns once the clock thread has applied it
    pub fn start(&self) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.send(EngineCommand::Start(reply_tx))?;
        match reply_rx.recv() {
            Ok(true) => Ok(()),
            Ok(false) => Err(EngineError::AlreadyRunning),
            Err(_) => Err(EngineError::Disconnected),
        }
    }

    /// Stop the transport; no pulse is delivered once this returns
    pub fn stop(&self) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.send(EngineCommand::Stop(reply_tx))?;
        match reply_rx.recv() {
            Ok(true) => Ok(()),
            Ok(false) => Err(EngineError::NotRunning),
            Err(_) => Err(EngineError::Disconnected),
        }
    }

    pub fn set_tempo(&self, bpm: f64) -> Result<(), EngineError> {
        self.send(EngineCommand::SetTempo(bpm))
    }

    pub fn register(&self, source: impl Into<Source>) -> Result<(), EngineError> {
        self.send(EngineCommand::Register(source.into()))
    }

    pub fn unregister(&self, id: impl Into<SourceId>) -> Result<(), EngineError> {
        self.send(EngineCommand::Unregister(id.into()))
    }

    /// Run `f` on the clock thread between pulses
    pub fn edit(&self, f: impl FnOnce(&mut Transport) + Send + 'static) -> Result<(), EngineError> {
        self.send(EngineCommand::Edit(Box::new(f)))
    }

    /// Run `f` on the clock thread and wait for its result
    pub fn query<R: Send + 'static>(
        &self,
        f: impl FnOnce(&mut Transport) -> R + Send + 'static,
    ) -> Result<R, EngineError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.edit(move |transport| {
            let _ = reply_tx.send(f(transport));
        })?;
        reply_rx.recv().map_err(|_| EngineError::Disconnected)
    }

    pub fn subscribe(&self) -> Result<Receiver<TransportEvent>, EngineError> {
        self.query(|transport| transport.subscribe())
    }

    /// Stop the clock thread and wait for it to exit
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.tx.send(EngineCommand::Shutdown);
        if thread.join().is_err() {
            warn!("Clock thread panicked");
        }
        info!("Clock engine shut down");
    }

    fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        self.tx.send(command).map_err(|_| EngineError::Disconnected)
    }
}

impl Drop for ClockEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct ClockWorker {
    transport: Transport,
    rx: Receiver<EngineCommand>,
    epoch: Instant,
}

impl ClockWorker {
    fn run(mut self) {
        loop {
            crossbeam_channel::select! {
                recv(self.rx) -> result => {
                    match result {
                        Ok(command) => {
                            if self.handle(command) {
                                break;
                            }
                        }
                        Err(_) => break,
                    }
                }
                default(FRAME_INTERVAL) => {}
            }

            // Apply queued commands before the next pulse
            while let Ok(command) = self.rx.try_recv() {
                if self.handle(command) {
                    self.transport.stop();
                    return;
                }
            }

            let now = self.now_ms();
            self.transport.poll(now);
        }
        self.transport.stop();
        debug!("Clock thread exiting");
    }

    /// Returns true when the loop should exit
    fn handle(&mut self, command: EngineCommand) -> bool {
        match command {
            EngineCommand::Start(reply) => {
                let started = !self.transport.is_running();
                let now = self.now_ms();
                self.transport.start(now);
                let _ = reply.send(started);
            }
            EngineCommand::Stop(reply) => {
                let stopped = self.transport.is_running();
                self.transport.stop();
                let _ = reply.send(stopped);
            }
            EngineCommand::SetTempo(bpm) => self.transport.set_tempo(bpm),
            EngineCommand::Register(source) => self.transport.register_source(source),
            EngineCommand::Unregister(id) => {
                if self.transport.unregister_source(&id).is_none() {
                    warn!("No source registered as {}", id);
                }
            }
            EngineCommand::Edit(f) => f(&mut self.transport),
            EngineCommand::Shutdown => return true,
        }
        false
    }

    fn now_ms(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64() * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    use metrona_core::{Result, SequenceSource, Tempo};

    use super::*;

    struct Counter {
        id: SourceId,
        calls: Arc<AtomicU64>,
    }

    impl SequenceSource for Counter {
        fn id(&self) -> &SourceId {
            &self.id
        }

        fn process_tick(&mut self, _tick: u64) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_engine_runs_pulses() {
        let engine = ClockEngine::new(Transport::new()).unwrap();
        let rx = engine.subscribe().unwrap();
        let calls = Arc::new(AtomicU64::new(0));
        engine
            .register(Source::external(Counter {
                id: "counter".into(),
                calls: calls.clone(),
            }))
            .unwrap();

        engine.set_tempo(300.0).unwrap();
        engine.start().unwrap();
        assert!(matches!(engine.start(), Err(EngineError::AlreadyRunning)));

        // 8.3 ms per pulse at 300 BPM
        let first = rx
            .iter()
            .find(|e| matches!(e, TransportEvent::Tick(_)))
            .unwrap();
        assert_eq!(first, TransportEvent::Tick(1));

        engine.stop().unwrap();
        assert!(matches!(engine.stop(), Err(EngineError::NotRunning)));

        let ticks = engine.query(|t| t.current_tick()).unwrap();
        assert_eq!(ticks, 0);
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn test_no_ticks_after_stop() {
        let engine = ClockEngine::new(Transport::with_tempo(Tempo::new(300.0))).unwrap();
        let rx = engine.subscribe().unwrap();
        engine.start().unwrap();
        rx.iter().find(|e| matches!(e, TransportEvent::Tick(_))).unwrap();

        engine.stop().unwrap();
        assert!(rx.iter().any(|e| e == TransportEvent::Stopped));

        thread::sleep(Duration::from_millis(50));
        assert!(rx.try_iter().all(|e| !matches!(e, TransportEvent::Tick(_))));
    }

    #[test]
    fn test_state_follows_transport() {
        let engine = ClockEngine::new(Transport::new()).unwrap();
        assert!(!engine.is_playing().unwrap());

        engine.edit(|transport| transport.start(0.0)).unwrap();
        assert!(engine.is_playing().unwrap());
        assert!(matches!(engine.start(), Err(EngineError::AlreadyRunning)));

        engine.query(|transport| transport.stop()).unwrap();
        assert!(matches!(engine.stop(), Err(EngineError::NotRunning)));
        engine.start().unwrap();
    }

    #[test]
    fn test_query_and_unregister() {
        let engine = ClockEngine::new(Transport::new()).unwrap();
        engine
            .register(Source::external(Counter {
                id: "a".into(),
                calls: Arc::default(),
            }))
            .unwrap();
        assert_eq!(engine.query(|t| t.source_ids()).unwrap(), vec![SourceId::from("a")]);

        engine.unregister("a").unwrap();
        assert!(engine.query(|t| t.source_ids()).unwrap().is_empty());
    }

    #[test]
    fn test_shutdown_disconnects() {
        let mut engine = ClockEngine::new(Transport::new()).unwrap();
        engine.shutdown();
        assert!(matches!(engine.set_tempo(100.0), Err(EngineError::Disconnected)));
    }
}
