//! Impairment model for the relay.
//!
//! Real networks drop, delay and corrupt datagrams.  To exercise the
//! retransmission logic without depending on actual network conditions, the
//! relay asks [`classify`] what to do with each frame it forwards:
//!
//! | Effect  | Relay action                                            |
//! |---------|---------------------------------------------------------|
//! | Pass    | Forward immediately.                                    |
//! | Delay   | Forward later, from a separate task.                    |
//! | Corrupt | Overwrite a payload byte, then forward.                 |
//! | Drop    | Discard silently.                                       |
//!
//! # Threshold composition
//!
//! The three percentages are **cumulative thresholds** tested against a
//! single uniform draw in `[0, 100)`:
//!
//! ```text
//!   0          delayed       corrupt        lost          100
//!   |--- Delay ---|-- Corrupt --|--- Drop ---|--- Pass ---|
//! ```
//!
//! so the thresholds must be ascending.  [`ImpairmentConfig::from_shares`]
//! builds ascending thresholds from independent per-effect percentages.
//!
//! The caller supplies the draw, which keeps [`classify`] pure and
//! testable without a random source.

use thiserror::Error;

/// Upper bound (exclusive) of a draw, and upper bound (inclusive) of a
/// threshold.
pub const DRAW_RANGE: u8 = 100;

/// What the relay does with one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Impairment {
    Pass,
    Delay,
    Corrupt,
    Drop,
}

/// Errors for invalid impairment settings.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ImpairmentError {
    #[error("{name} threshold {value} is outside 0..=100")]
    OutOfRange { name: &'static str, value: u8 },

    #[error("thresholds must be ascending (delayed {delayed} <= corrupt {corrupt} <= lost {lost})")]
    NotAscending { delayed: u8, corrupt: u8, lost: u8 },

    #[error("impairment shares add up to {0}%, more than 100%")]
    SharesExceed(u16),
}

/// Cumulative impairment thresholds, each in `0..=100`.
///
/// The default is a transparent relay (every draw passes).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImpairmentConfig {
    /// Draws below this are delayed.
    delayed: u8,
    /// Draws in `delayed..corrupt` are corrupted.
    corrupt: u8,
    /// Draws in `corrupt..lost` are dropped.
    lost: u8,
}

impl ImpairmentConfig {
    /// Build a configuration from cumulative thresholds.
    pub fn new(lost: u8, delayed: u8, corrupt: u8) -> Result<Self, ImpairmentError> {
        for (name, value) in [("lost", lost), ("delayed", delayed), ("corrupt", corrupt)] {
            if value > DRAW_RANGE {
                return Err(ImpairmentError::OutOfRange { name, value });
            }
        }
        if !(delayed <= corrupt && corrupt <= lost) {
            return Err(ImpairmentError::NotAscending {
                delayed,
                corrupt,
                lost,
            });
        }
        Ok(Self {
            delayed,
            corrupt,
            lost,
        })
    }

    /// Build a configuration from independent per-effect percentages.
    ///
    /// `from_shares(10, 20, 5)` delays 20% of frames, corrupts 5% and drops
    /// 10%; the thresholds become `delayed=20, corrupt=25, lost=35`.
    pub fn from_shares(lost: u8, delayed: u8, corrupt: u8) -> Result<Self, ImpairmentError> {
        let total = u16::from(lost) + u16::from(delayed) + u16::from(corrupt);
        if total > u16::from(DRAW_RANGE) {
            return Err(ImpairmentError::SharesExceed(total));
        }
        // total <= 100, so none of these sums overflow a u8.
        Self::new(delayed + corrupt + lost, delayed, delayed + corrupt)
    }

    pub fn delayed(&self) -> u8 {
        self.delayed
    }

    pub fn corrupt(&self) -> u8 {
        self.corrupt
    }

    pub fn lost(&self) -> u8 {
        self.lost
    }
}

/// Map a uniform draw in `[0, 100)` to an [`Impairment`].
pub fn classify(draw: u8, cfg: &ImpairmentConfig) -> Impairment {
    if draw < cfg.delayed {
        Impairment::Delay
    } else if draw < cfg.corrupt {
        Impairment::Corrupt
    } else if draw < cfg.lost {
        Impairment::Drop
    } else {
        Impairment::Pass
    }
}
