//! Push→Pull Bridge
//!
//! Adapts a push-style producer (broker callbacks, socket reads) to the
//! pull-style `produce` contract of an origin.
//!
//! ```text
//!  producer thread                         origin (runner thread)
//!  ───────────────                         ──────────────────────
//!  publisher.offer(r) ──▶ bounded(0) ──▶ receive(maxWaitTime)
//!        ▲                                  try_receive() × (max - 1)
//!        │
//!  shutdown signal ◀──── drop(shutdown_tx) ◀── shutdown()
//! ```
//!
//! The hand-off channel is a rendezvous: a record only leaves the producer
//! when the origin is ready to take it. `shutdown` drops the signal sender,
//! joins the producer and only then drops the receiving side, so a send can
//! never race a closed channel.

use std::fmt;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, select, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, error};
use thiserror::Error;

use edgeflow_core::{BatchMaker, Record};

/// Bridge failures
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Producer thread could not be started
    #[error("failed to spawn producer thread '{name}': {source}")]
    Spawn {
        /// Bridge name
        name: String,
        /// OS error
        source: std::io::Error,
    },

    /// Producer thread is gone; no more records will arrive
    #[error("producer of '{0}' has stopped")]
    Disconnected(String),
}

/// Producer-side handle
pub struct RecordPublisher {
    sender: Sender<Record>,
    shutdown: Receiver<()>,
}

impl RecordPublisher {
    /// Hand a record to the origin
    ///
    /// Blocks until the origin takes it or shutdown is signalled. Returns
    /// `false` once shutdown has been observed; the record is dropped then.
    pub fn offer(&self, record: Record) -> bool {
        if self.is_shutdown() {
            return false;
        }
        select! {
            send(self.sender, record) -> result => result.is_ok(),
            recv(self.shutdown) -> _ => false,
        }
    }

    /// Whether the origin has asked the producer to stop
    pub fn is_shutdown(&self) -> bool {
        matches!(self.shutdown.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Wait up to `timeout` for the shutdown signal
    ///
    /// Lets producers sleep between polls without missing a shutdown.
    pub fn wait_shutdown(&self, timeout: Duration) -> bool {
        matches!(self.shutdown.recv_timeout(timeout), Err(RecvTimeoutError::Disconnected))
    }
}

impl fmt::Debug for RecordPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordPublisher")
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

/// Consumer-side handle owned by the origin
pub struct PushPullBridge {
    name: String,
    receiver: Option<Receiver<Record>>,
    shutdown: Option<Sender<()>>,
    producer: Option<JoinHandle<()>>,
}

impl PushPullBridge {
    /// Start `producer` on its own thread
    pub fn spawn<F>(name: &str, producer: F) -> Result<Self, BridgeError>
    where
        F: FnOnce(RecordPublisher) + Send + 'static,
    {
        let (sender, receiver) = bounded(0);
        let (shutdown_tx, shutdown_rx) = bounded(0);
        let publisher = RecordPublisher {
            sender,
            shutdown: shutdown_rx,
        };

        let producer = thread::Builder::new()
            .name(format!("{}-producer", name))
            .spawn(move || producer(publisher))
            .map_err(|source| BridgeError::Spawn {
                name: name.to_string(),
                source,
            })?;
        debug!("bridge '{}' started", name);

        Ok(Self {
            name: name.to_string(),
            receiver: Some(receiver),
            shutdown: Some(shutdown_tx),
            producer: Some(producer),
        })
    }

    /// Bridge name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait up to `timeout` for one record
    ///
    /// `Ok(None)` on timeout. Fails once the producer has ended and every
    /// record it offered has been taken.
    pub fn receive(&self, timeout: Duration) -> Result<Option<Record>, BridgeError> {
        let Some(receiver) = &self.receiver else {
            return Err(BridgeError::Disconnected(self.name.clone()));
        };
        match receiver.recv_timeout(timeout) {
            Ok(record) => Ok(Some(record)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::Disconnected(self.name.clone())),
        }
    }

    /// Take a record only if the producer is already waiting to hand one over
    pub fn try_receive(&self) -> Option<Record> {
        self.receiver.as_ref().and_then(|receiver| receiver.try_recv().ok())
    }

    /// Fill `batch_maker` with up to `max` records
    ///
    /// One blocking receive bounded by `max_wait`, then whatever the
    /// producer has ready. Returns the number of records added.
    pub fn fill(
        &self,
        max_wait: Duration,
        max: usize,
        batch_maker: &mut dyn BatchMaker,
    ) -> Result<usize, BridgeError> {
        if max == 0 {
            return Ok(0);
        }
        let Some(first) = self.receive(max_wait)? else {
            return Ok(0);
        };
        batch_maker.add_record(first);
        let mut count = 1;
        while count < max {
            match self.try_receive() {
                Some(record) => {
                    batch_maker.add_record(record);
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }

    /// Whether `shutdown` has not run yet
    pub fn is_running(&self) -> bool {
        self.shutdown.is_some()
    }

    /// Signal the producer, wait for it to finish, then close the channel
    pub fn shutdown(&mut self) {
        if self.shutdown.take().is_none() {
            return;
        }
        if let Some(producer) = self.producer.take() {
            if producer.join().is_err() {
                error!("producer of bridge '{}' panicked", self.name);
            }
        }
        self.receiver = None;
        debug!("bridge '{}' shut down", self.name);
    }
}

impl Drop for PushPullBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for PushPullBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushPullBridge")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}
