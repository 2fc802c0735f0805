//! Signal Extraction
//!
//! Converts raw indicator samples into discrete, debounced Long/Short
//! signals. The remote indicator marks a short entry by plotting `300` and a
//! long entry by plotting `200`; everything else is noise.
//!
//! # State Machine
//!
//! ```text
//!            qualifying sample @ t
//!   Warm ───────────────────────────► Cooling(t)
//!                                        │  ▲
//!     sample @ t' with t' - t < window   │  │ qualifying sample @ t'
//!     (dropped)                          ▼  │ with t' - t >= window
//!                                     Cooling(t)
//! ```
//!
//! The debounce window equals the duration of the session's timeframe, so a
//! session emits at most one burst of signals per bar.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::{Deserialize, Serialize};

use super::error::ConfigurationError;

/// Marker value plotted by the indicator for a short entry.
pub const SHORT_SENTINEL: f64 = 300.0;

/// Marker value plotted by the indicator for a long entry.
pub const LONG_SENTINEL: f64 = 200.0;

// =============================================================================
// Timeframe
// =============================================================================

/// Chart resolution understood by the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Timeframe {
    /// 1 minute.
    Minute1,
    /// 3 minutes.
    Minute3,
    /// 5 minutes.
    Minute5,
    /// 15 minutes.
    Minute15,
    /// 30 minutes.
    Minute30,
    /// 45 minutes.
    Minute45,
    /// 1 hour.
    Hour1,
    /// 2 hours.
    Hour2,
    /// 3 hours.
    Hour3,
    /// 4 hours.
    Hour4,
    /// 1 day.
    Day1,
    /// 1 week.
    Week1,
    /// 1 month (30 days).
    Month1,
    /// 3 months.
    Month3,
    /// 6 months.
    Month6,
    /// 12 months (365 days).
    Month12,
}

impl Timeframe {
    /// Every supported timeframe, shortest first.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Minute1,
            Self::Minute3,
            Self::Minute5,
            Self::Minute15,
            Self::Minute30,
            Self::Minute45,
            Self::Hour1,
            Self::Hour2,
            Self::Hour3,
            Self::Hour4,
            Self::Day1,
            Self::Week1,
            Self::Month1,
            Self::Month3,
            Self::Month6,
            Self::Month12,
        ]
    }

    /// Resolution code sent in `create_series`.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Minute1 => "1",
            Self::Minute3 => "3",
            Self::Minute5 => "5",
            Self::Minute15 => "15",
            Self::Minute30 => "30",
            Self::Minute45 => "45",
            Self::Hour1 => "60",
            Self::Hour2 => "120",
            Self::Hour3 => "180",
            Self::Hour4 => "240",
            Self::Day1 => "1D",
            Self::Week1 => "1W",
            Self::Month1 => "1M",
            Self::Month3 => "3M",
            Self::Month6 => "6M",
            Self::Month12 => "12M",
        }
    }

    /// Bar duration in seconds. Months are 30 days, the 12 month bar is 365.
    #[must_use]
    pub const fn duration_secs(self) -> i64 {
        match self {
            Self::Minute1 => 60,
            Self::Minute3 => 180,
            Self::Minute5 => 300,
            Self::Minute15 => 900,
            Self::Minute30 => 1_800,
            Self::Minute45 => 2_700,
            Self::Hour1 => 3_600,
            Self::Hour2 => 7_200,
            Self::Hour3 => 10_800,
            Self::Hour4 => 14_400,
            Self::Day1 => 86_400,
            Self::Week1 => 604_800,
            Self::Month1 => 2_592_000,
            Self::Month3 => 7_776_000,
            Self::Month6 => 15_552_000,
            Self::Month12 => 31_536_000,
        }
    }

    /// Human readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Minute1 => "1 minute",
            Self::Minute3 => "3 minutes",
            Self::Minute5 => "5 minutes",
            Self::Minute15 => "15 minutes",
            Self::Minute30 => "30 minutes",
            Self::Minute45 => "45 minutes",
            Self::Hour1 => "1 hour",
            Self::Hour2 => "2 hours",
            Self::Hour3 => "3 hours",
            Self::Hour4 => "4 hours",
            Self::Day1 => "1 day",
            Self::Week1 => "1 week",
            Self::Month1 => "1 month",
            Self::Month3 => "3 months",
            Self::Month6 => "6 months",
            Self::Month12 => "12 months",
        }
    }
}

impl FromStr for Timeframe {
    type Err = ConfigurationError;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|tf| tf.code() == code)
            .ok_or_else(|| ConfigurationError::UnknownTimeframe(code.to_string()))
    }
}

impl TryFrom<String> for Timeframe {
    type Error = ConfigurationError;

    fn try_from(code: String) -> Result<Self, Self::Error> {
        code.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.code().to_string()
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

// =============================================================================
// Samples and Signals
// =============================================================================

/// One indicator update for the chart session's study.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorSample {
    /// Short-entry plot value.
    pub short_marker: f64,
    /// Long-entry plot value.
    pub long_marker: f64,
    /// Close price of the bar.
    pub close: f64,
    /// When the update arrived.
    pub received_at: DateTime<Utc>,
}

/// Direction of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    /// Open or flip to a long position.
    Long,
    /// Open or flip to a short position.
    Short,
}

impl SignalKind {
    /// Signal name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Long => "Long",
            Self::Short => "Short",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A debounced trading signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalEvent {
    /// Signal direction.
    pub kind: SignalKind,
    /// Close price of the triggering sample.
    pub price: Decimal,
    /// Arrival time of the triggering sample.
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Extractor
// =============================================================================

/// Debounce state of an extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorState {
    /// Nothing emitted yet.
    Warm,
    /// Last emission happened at `since`.
    Cooling {
        /// Time of the last emission.
        since: DateTime<Utc>,
    },
}

/// Per-session signal state machine.
///
/// Owned by a single session read loop; state is discarded with the session.
#[derive(Debug, Clone)]
pub struct SignalExtractor {
    timeframe: Timeframe,
    state: ExtractorState,
}

impl SignalExtractor {
    /// Create an extractor debouncing on the timeframe's bar duration.
    #[must_use]
    pub const fn new(timeframe: Timeframe) -> Self {
        Self {
            timeframe,
            state: ExtractorState::Warm,
        }
    }

    /// Create an extractor from a raw timeframe code.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::UnknownTimeframe` if the code has no
    /// entry in the timeframe table.
    pub fn for_code(code: &str) -> Result<Self, ConfigurationError> {
        Ok(Self::new(code.parse()?))
    }

    /// Current debounce state.
    #[must_use]
    pub const fn state(&self) -> ExtractorState {
        self.state
    }

    /// Timeframe driving the debounce window.
    #[must_use]
    pub const fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// Feed one sample, returning the signals it produced.
    ///
    /// Short is evaluated before Long. A sample asserting both markers yields
    /// both signals, in that order.
    pub fn on_sample(&mut self, sample: &IndicatorSample) -> Vec<SignalEvent> {
        let now = sample.received_at;

        if let ExtractorState::Cooling { since } = self.state
            && (now - since).num_seconds() < self.timeframe.duration_secs()
        {
            return Vec::new();
        }

        let mut signals = Vec::new();

        #[allow(clippy::float_cmp)]
        let matches = [
            (sample.short_marker == SHORT_SENTINEL, SignalKind::Short),
            (sample.long_marker == LONG_SENTINEL, SignalKind::Long),
        ];

        for (hit, kind) in matches {
            if !hit {
                continue;
            }
            let Some(price) = Decimal::from_f64(sample.close) else {
                tracing::warn!(close = sample.close, "Close price not representable, signal dropped");
                continue;
            };
            self.state = ExtractorState::Cooling { since: now };
            signals.push(SignalEvent {
                kind,
                price,
                timestamp: now,
            });
        }

        signals
    }
}
