//! Sensor event delivery
//!
//! A producer hands timestamped samples of one sensor type to a registered
//! callback, in chronological order for that sensor. Interleaving between
//! sensor types is unspecified.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::error::{TrackerError, TrackerResult};

pub type SensorCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;

pub trait SensorEventProducer<T>: Send {
    /// Start delivering samples to `callback`, replacing any previous one.
    fn start_sensor_polling(&mut self, callback: SensorCallback<T>) -> TrackerResult<()>;

    /// Stop delivering. Once this returns the callback is not invoked again.
    fn stop_sensor_polling(&mut self);

    fn is_polling(&self) -> bool;
}

/// How long the worker waits for a sample before re-checking the stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Producer fed through a bounded channel by platform glue (JNI, simulation
/// tasks) and drained on a dedicated worker thread.
pub struct ChannelSensorProducer<T> {
    name: &'static str,
    tx: Sender<T>,
    rx: Receiver<T>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    dropped: u64,
}

impl<T: Send + 'static> ChannelSensorProducer<T> {
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let (tx, rx) = channel::bounded(capacity);
        Self {
            name,
            tx,
            rx,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            dropped: 0,
        }
    }

    /// Sender for the platform side. Sends never block; use `try_send`.
    pub fn sender(&self) -> Sender<T> {
        self.tx.clone()
    }

    /// Queue a sample. Returns false if the queue is full and the sample was dropped.
    pub fn push(&mut self, sample: T) -> bool {
        match self.tx.try_send(sample) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped += 1;
                if self.dropped % 100 == 1 {
                    log::warn!("[{}] queue full, {} samples dropped", self.name, self.dropped);
                }
                false
            }
        }
    }
}

impl<T: Send + 'static> SensorEventProducer<T> for ChannelSensorProducer<T> {
    fn start_sensor_polling(&mut self, callback: SensorCallback<T>) -> TrackerResult<()> {
        self.stop_sensor_polling();

        // Samples queued while stopped are stale.
        let stale = self.rx.try_iter().count();
        if stale > 0 {
            log::debug!("[{}] discarded {} stale samples", self.name, stale);
        }

        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);
        let rx = self.rx.clone();
        let name = self.name;

        let worker = thread::Builder::new()
            .name(format!("{}-sensor", name))
            .spawn(move || {
                let mut delivered = 0u64;
                while running.load(Ordering::SeqCst) {
                    match rx.recv_timeout(POLL_INTERVAL) {
                        Ok(sample) => {
                            callback(&sample);
                            delivered += 1;
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::debug!("[{}] polling stopped after {} samples", name, delivered);
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                TrackerError::SensorFailed(format!("{}: {}", name, e))
            })?;

        self.worker = Some(worker);
        Ok(())
    }

    fn stop_sensor_polling(&mut self) {
        self.join_worker();
    }

    fn is_polling(&self) -> bool {
        self.worker.is_some()
    }
}

impl<T> ChannelSensorProducer<T> {
    fn join_worker(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("[{}] sensor worker panicked", self.name);
            }
        }
    }
}

impl<T> Drop for ChannelSensorProducer<T> {
    fn drop(&mut self) {
        self.join_worker();
    }
}

/// Producer that never delivers. For hosts that call the tracker's sensor
/// callbacks themselves.
#[derive(Debug, Default)]
pub struct NullSensorProducer {
    polling: bool,
}

impl<T> SensorEventProducer<T> for NullSensorProducer {
    fn start_sensor_polling(&mut self, _callback: SensorCallback<T>) -> TrackerResult<()> {
        self.polling = true;
        Ok(())
    }

    fn stop_sensor_polling(&mut self) {
        self.polling = false;
    }

    fn is_polling(&self) -> bool {
        self.polling
    }
}
