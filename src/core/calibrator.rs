//! Running model of per-request cost, refined from completed work.
//!
//! The calibrator owns the derived values: EWMAs of request duration and
//! energy, the fraction of recent time during which the admission predicate
//! was armed, and a learned solar profile per hour of day. All of them are
//! persisted through a [`CalibrationStore`] so estimates survive restarts.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::core::error::SchedulerError;
use crate::core::request::RequestId;
use crate::util::clock::{hour_of_day, ms_to_secs};

/// Weight of a new reading in the hourly solar profile.
const SOLAR_PROFILE_ALPHA: f64 = 0.05;

/// Observed cost of one completed request. Appended once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    /// Request the sample was taken from.
    pub request_id: RequestId,
    /// Duration the calibrator predicted at dispatch, if it had one.
    pub predicted_duration_secs: Option<f64>,
    /// Measured wall-clock duration.
    pub actual_duration_secs: f64,
    /// Measured energy above the idle baseline.
    pub actual_energy_wh: f64,
}

/// Persisted calibrator state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationState {
    /// EWMA of request duration in seconds.
    pub avg_duration_secs: Option<f64>,
    /// EWMA of request energy in watt-hours.
    pub avg_energy_wh: Option<f64>,
    /// Number of samples folded into the averages.
    pub samples_seen: u64,
    /// Last computed duty cycle of the admission predicate.
    pub availability_fraction: f64,
    /// Learned solar input per hour of day.
    #[serde(default)]
    pub solar_profile: SolarProfile,
}

/// Learned average solar input per hour of day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SolarProfile {
    hours: [Option<f64>; 24],
}

impl SolarProfile {
    /// Fold a reading into the average for `hour`.
    pub fn observe(&mut self, hour: u8, watts: f64) {
        let slot = &mut self.hours[usize::from(hour % 24)];
        *slot = Some(ewma(*slot, watts.max(0.0), SOLAR_PROFILE_ALPHA));
    }

    /// Learned average for `hour`, if any reading has been seen.
    pub fn expected(&self, hour: u8) -> Option<f64> {
        self.hours[usize::from(hour % 24)]
    }

    /// Expected solar input for `hours_ahead` consecutive hours starting at
    /// `start_hour`, wrapping past midnight.
    pub fn forecast(&self, start_hour: u8, hours_ahead: usize) -> Vec<HourlySolar> {
        (0..hours_ahead)
            .map(|offset| {
                // offset % 24 < 24, so the cast cannot truncate.
                #[allow(clippy::cast_possible_truncation)]
                let hour = ((usize::from(start_hour) + offset % 24) % 24) as u8;
                HourlySolar {
                    hour,
                    expected_watts: self.expected(hour),
                }
            })
            .collect()
    }
}

/// One hour of a solar forecast.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HourlySolar {
    /// Hour of day (UTC).
    pub hour: u8,
    /// Learned average input, `None` until that hour has been observed.
    pub expected_watts: Option<f64>,
}

/// Pure read of the current averages.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Estimates {
    /// EWMA of request duration in seconds.
    pub avg_duration_secs: Option<f64>,
    /// EWMA of request energy in watt-hours.
    pub avg_energy_wh: Option<f64>,
}

/// Abstraction for calibration persistence backends.
pub trait CalibrationStore: Send + Sync {
    /// Load previously saved state, if any.
    fn load(&mut self) -> Result<Option<CalibrationState>, SchedulerError>;
    /// Durably save the state.
    fn save(&mut self, state: &CalibrationState) -> Result<(), SchedulerError>;
}

/// Fold one observation into an exponentially weighted moving average,
/// seeding it with the first observation.
pub fn ewma(current: Option<f64>, sample: f64, alpha: f64) -> f64 {
    match current {
        Some(avg) => alpha.mul_add(sample, (1.0 - alpha) * avg),
        None => sample,
    }
}

/// Energy in watt-hours above `idle_baseline_watts`, integrated with the
/// trapezoid rule over `(timestamp_ms, watts)` readings in time order.
pub fn integrate_energy_wh(readings: &[(u64, f64)], idle_baseline_watts: f64) -> f64 {
    readings
        .windows(2)
        .map(|pair| {
            let (t0, w0) = pair[0];
            let (t1, w1) = pair[1];
            let above0 = (w0 - idle_baseline_watts).max(0.0);
            let above1 = (w1 - idle_baseline_watts).max(0.0);
            let hours = ms_to_secs(t1.saturating_sub(t0)) / 3600.0;
            (above0 + above1) / 2.0 * hours
        })
        .sum()
}

/// Trailing-window duty cycle of a boolean signal.
///
/// Each observation holds until the next one; the most recent holds until
/// the query time. Spans between retained observations are summed as they
/// arrive, so a query only trims the spans crossing the window start.
#[derive(Debug, Clone)]
pub struct AvailabilityWindow {
    window_ms: u64,
    observations: VecDeque<(u64, bool)>,
    closed_total_ms: u64,
    closed_armed_ms: u64,
}

impl AvailabilityWindow {
    /// Create a window spanning `window_ms`.
    pub const fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            observations: VecDeque::new(),
            closed_total_ms: 0,
            closed_armed_ms: 0,
        }
    }

    /// Record the signal value at `now_ms`.
    pub fn observe(&mut self, now_ms: u64, armed: bool) {
        if let Some(&(last, last_armed)) = self.observations.back() {
            if now_ms < last {
                return;
            }
            let span = now_ms - last;
            self.closed_total_ms += span;
            if last_armed {
                self.closed_armed_ms += span;
            }
        }
        self.observations.push_back((now_ms, armed));
        let start = now_ms.saturating_sub(self.window_ms);
        // Keep one observation at or before the window start; it defines the
        // state at the boundary.
        while self.observations.len() >= 2 && self.observations[1].0 <= start {
            if let Some((ts, was_armed)) = self.observations.pop_front() {
                let span = self.observations.front().map_or(0, |next| next.0 - ts);
                self.closed_total_ms -= span;
                if was_armed {
                    self.closed_armed_ms -= span;
                }
            }
        }
    }

    /// Armed fraction of the covered span, or `None` if no time is covered.
    ///
    /// A query earlier than the latest observation is answered as of that
    /// observation.
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self, now_ms: u64) -> Option<f64> {
        let &(last, last_armed) = self.observations.back()?;
        let now_ms = now_ms.max(last);
        let start = now_ms.saturating_sub(self.window_ms);

        let open = now_ms - last;
        let mut total_ms = self.closed_total_ms + open;
        let mut armed_ms = self.closed_armed_ms + if last_armed { open } else { 0 };

        // Trim whatever lies before the window start.
        for (&(ts, armed), &(next, _)) in self.observations.iter().zip(self.observations.iter().skip(1)) {
            if ts >= start {
                break;
            }
            let cut = next.min(start) - ts;
            total_ms -= cut;
            if armed {
                armed_ms -= cut;
            }
            if next >= start {
                break;
            }
        }
        if last < start {
            let cut = start - last;
            total_ms -= cut;
            if last_armed {
                armed_ms -= cut;
            }
        }
        (total_ms > 0).then(|| armed_ms as f64 / total_ms as f64)
    }
}

/// EWMA calibrator with persisted state.
pub struct Calibrator {
    alpha: f64,
    state: CalibrationState,
    history: VecDeque<CalibrationSample>,
    history_len: usize,
    availability: AvailabilityWindow,
    solar_hour: Option<u8>,
    store: Box<dyn CalibrationStore>,
}

impl Calibrator {
    /// Open a calibrator, restoring any state the store holds.
    pub fn open(
        alpha: f64,
        history_len: usize,
        availability_window_ms: u64,
        mut store: Box<dyn CalibrationStore>,
    ) -> Result<Self, SchedulerError> {
        let state = store.load()?.unwrap_or_default();
        tracing::info!(
            samples = state.samples_seen,
            avg_duration_secs = ?state.avg_duration_secs,
            availability = state.availability_fraction,
            "calibrator restored"
        );
        Ok(Self {
            alpha,
            state,
            history: VecDeque::with_capacity(history_len.min(1024)),
            history_len,
            availability: AvailabilityWindow::new(availability_window_ms),
            solar_hour: None,
            store,
        })
    }

    /// Seed either average before any sample has been recorded. Each seed
    /// applies on its own; `None` leaves that average as it is.
    #[must_use]
    pub fn with_seed(mut self, avg_duration_secs: Option<f64>, avg_energy_wh: Option<f64>) -> Self {
        if self.state.samples_seen == 0 {
            if avg_duration_secs.is_some() {
                self.state.avg_duration_secs = avg_duration_secs;
            }
            if avg_energy_wh.is_some() {
                self.state.avg_energy_wh = avg_energy_wh;
            }
        }
        self
    }

    /// Fold a completed request into the averages and persist them.
    ///
    /// The in-memory update always happens; the returned error only reports
    /// that persisting it failed.
    pub fn record(&mut self, sample: CalibrationSample) -> Result<(), SchedulerError> {
        self.state.avg_duration_secs = Some(ewma(
            self.state.avg_duration_secs,
            sample.actual_duration_secs,
            self.alpha,
        ));
        self.state.avg_energy_wh = Some(ewma(
            self.state.avg_energy_wh,
            sample.actual_energy_wh,
            self.alpha,
        ));
        self.state.samples_seen += 1;
        tracing::debug!(
            request_id = %sample.request_id,
            predicted = ?sample.predicted_duration_secs,
            actual = sample.actual_duration_secs,
            energy_wh = sample.actual_energy_wh,
            avg_duration_secs = ?self.state.avg_duration_secs,
            "calibration sample recorded"
        );
        if self.history.len() >= self.history_len {
            self.history.pop_front();
        }
        if self.history_len > 0 {
            self.history.push_back(sample);
        }
        self.persist()
    }

    /// Current averages.
    pub const fn current_estimates(&self) -> Estimates {
        Estimates {
            avg_duration_secs: self.state.avg_duration_secs,
            avg_energy_wh: self.state.avg_energy_wh,
        }
    }

    /// Record whether the admission predicate was armed at `now_ms`.
    pub fn observe_availability(&mut self, now_ms: u64, armed: bool) {
        self.availability.observe(now_ms, armed);
        if let Some(fraction) = self.availability.fraction(now_ms) {
            self.state.availability_fraction = fraction;
        }
    }

    /// Fold a solar reading taken at `now_ms` into the hourly profile.
    ///
    /// State is persisted each time the reading moves into a new hour, so a
    /// crash loses at most the current hour's refinements.
    pub fn observe_solar(&mut self, now_ms: u64, watts: f64) -> Result<(), SchedulerError> {
        let hour = hour_of_day(now_ms);
        self.state.solar_profile.observe(hour, watts);
        let rolled_over = self.solar_hour.is_some_and(|previous| previous != hour);
        self.solar_hour = Some(hour);
        if rolled_over {
            self.persist()?;
        }
        Ok(())
    }

    /// Learned solar profile.
    pub fn solar_profile(&self) -> &SolarProfile {
        &self.state.solar_profile
    }

    /// Duty cycle of the admission predicate over the trailing window.
    ///
    /// Falls back to the persisted value until the window covers any time.
    pub fn availability_fraction(&self, now_ms: u64) -> f64 {
        self.availability
            .fraction(now_ms)
            .unwrap_or(self.state.availability_fraction)
    }

    /// Recent samples, oldest first.
    pub fn history(&self) -> Vec<CalibrationSample> {
        self.history.iter().cloned().collect()
    }

    /// Snapshot of the persisted state.
    pub fn state(&self) -> CalibrationState {
        self.state.clone()
    }

    /// Write the current state to the store.
    pub fn persist(&mut self) -> Result<(), SchedulerError> {
        self.store.save(&self.state)
    }
}
