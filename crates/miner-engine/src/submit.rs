//! Hand-off of found shares to the protocol layer.

use std::sync::mpsc::{Sender, SyncSender, TrySendError};

use log::{debug, warn};
use miner_core::Submission;
use parking_lot::Mutex;

const LOG_TARGET: &str = "miner::submit";

/// Receiver of shares. Submission is fire-and-forget: retries and pool
/// acknowledgements belong to the implementor.
pub trait ShareSink: Send {
    fn submit_share(&self, submission: Submission);
}

impl ShareSink for Sender<Submission> {
    fn submit_share(&self, submission: Submission) {
        if self.send(submission).is_err() {
            debug!(target: LOG_TARGET, "Share receiver gone, dropping share");
        }
    }
}

/// Bounded queue; a full queue drops the share rather than stalling a core.
impl ShareSink for SyncSender<Submission> {
    fn submit_share(&self, submission: Submission) {
        match self.try_send(submission) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                warn!(target: LOG_TARGET, "Share queue full, dropping nonce {:08x}", dropped.nonce);
            }
            Err(TrySendError::Disconnected(_)) => {
                debug!(target: LOG_TARGET, "Share receiver gone, dropping share");
            }
        }
    }
}

/// Serializes submissions from both cores into one sink.
pub(crate) struct Submitter {
    sink: Mutex<Box<dyn ShareSink>>,
}

impl Submitter {
    pub(crate) fn new(sink: Box<dyn ShareSink>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    pub(crate) fn submit(&self, submission: Submission) {
        self.sink.lock().submit_share(submission);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn submission(nonce: u32) -> Submission {
        Submission {
            job_id: "1".into(),
            extranonce2: "00000000".into(),
            timestamp: 0,
            nonce,
            flags: 0,
            difficulty: 1.0,
        }
    }

    #[test]
    fn test_channel_sink_delivers() {
        let (tx, rx) = mpsc::channel();
        let submitter = Submitter::new(Box::new(tx));
        submitter.submit(submission(5));
        assert_eq!(rx.recv().unwrap().nonce, 5);
    }

    #[test]
    fn test_bounded_sink_drops_when_full() {
        let (tx, rx) = mpsc::sync_channel(1);
        let submitter = Submitter::new(Box::new(tx));
        submitter.submit(submission(1));
        submitter.submit(submission(2));
        assert_eq!(rx.recv().unwrap().nonce, 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_receiver_is_ignored() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        Submitter::new(Box::new(tx)).submit(submission(9));
    }
}
