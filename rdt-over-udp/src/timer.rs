//! ACK timer and retry budget for the sender.
//!
//! Stop-and-wait needs exactly one timer: it is armed when a frame goes out
//! and fires if no reply arrives within [`TimerConfig::ack_timeout`].  The
//! timeout is fixed; there is no RTT estimation or back-off.
//!
//! [`RetransmitTimer`] also owns the retry ceiling.  With
//! `max_retries: None` the sender retries forever.

use std::time::Duration;

use tokio::time::Instant;

/// Adjustable timeout parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    /// How long to wait for an ACK before resending.
    pub ack_timeout: Duration,
    /// Retransmissions allowed per segment (`None` = unbounded).
    pub max_retries: Option<u32>,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(10),
            max_retries: None,
        }
    }
}

/// The single ACK timer of one sending session.
#[derive(Debug)]
pub struct RetransmitTimer {
    pub config: TimerConfig,
    deadline: Option<Instant>,
}

impl RetransmitTimer {
    pub fn new(config: TimerConfig) -> Self {
        Self {
            config,
            deadline: None,
        }
    }

    /// (Re)start the timer from now and return the new deadline.
    pub fn arm(&mut self) -> Instant {
        let deadline = Instant::now() + self.config.ack_timeout;
        self.deadline = Some(deadline);
        deadline
    }

    pub fn disarm(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether one more retransmission fits the budget, given how many
    /// retransmissions of the current segment have already happened.
    pub fn may_retry(&self, retries_so_far: u32) -> bool {
        self.config
            .max_retries
            .map_or(true, |max| retries_so_far < max)
    }
}
