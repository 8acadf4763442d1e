//! Fan-in barrier with timeout.
//!
//! Collects replies from a set of responders whose identities are unknown
//! in advance. Completes exactly once: when `expected` replies have been
//! recorded, or when the owner reports the timeout, whichever comes first.
//!
//! The barrier does not own a timer. Its owner arms one for
//! [`Barrier::timeout`] when [`Barrier::open`] returns
//! [`BarrierStart::Armed`], cancels it when [`Barrier::record`] completes,
//! and calls [`Barrier::expire`] when it fires.

use std::time::Duration;

/// How a freshly opened barrier starts.
#[derive(Debug, PartialEq)]
pub enum BarrierStart<T> {
    /// Waiting for replies; arm a timer for the barrier's timeout.
    Armed(Duration),
    /// Nothing to wait for; completed immediately with these replies.
    Completed(Vec<T>),
}

/// Exactly-once fan-in of up to `expected` replies.
#[derive(Debug)]
pub struct Barrier<T> {
    expected: usize,
    timeout: Duration,
    responses: Vec<T>,
    completed: bool,
}

impl<T> Barrier<T> {
    pub fn new(expected: usize, timeout: Duration) -> Self {
        Self {
            expected,
            timeout,
            responses: Vec::with_capacity(expected),
            completed: false,
        }
    }

    /// Start waiting.
    ///
    /// A barrier expecting zero replies completes here with an empty list
    /// instead of waiting for the timeout.
    pub fn open(&mut self) -> BarrierStart<T> {
        if self.expected == 0 {
            match self.complete() {
                Some(responses) => BarrierStart::Completed(responses),
                None => BarrierStart::Completed(Vec::new()),
            }
        } else {
            BarrierStart::Armed(self.timeout)
        }
    }

    /// Record one reply.
    ///
    /// Returns the collected replies if this one completed the barrier.
    /// Replies after completion are discarded.
    pub fn record(&mut self, response: T) -> Option<Vec<T>> {
        if self.completed {
            return None;
        }
        self.responses.push(response);
        if self.responses.len() >= self.expected {
            self.complete()
        } else {
            None
        }
    }

    /// The timeout fired.
    ///
    /// Returns whatever was collected, unless the barrier already completed.
    pub fn expire(&mut self) -> Option<Vec<T>> {
        self.complete()
    }

    fn complete(&mut self) -> Option<Vec<T>> {
        if self.completed {
            return None;
        }
        self.completed = true;
        Some(std::mem::take(&mut self.responses))
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn received(&self) -> usize {
        self.responses.len()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
