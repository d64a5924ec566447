//! Piecewise-constant rate schedule and the model-event sequence.
//!
//! Rate parameters change at discrete times and rho sampling happens at
//! scheduled instants. Both are merged into one time-ordered list of
//! [`ModelEvent`]s; the rates in force between consecutive events are
//! precomputed into a cache indexed by the number of consumed events, which is
//! exactly [`EpidemicState::model_interval_idx`](crate::EpidemicState).

use crate::error::{EpiError, EpiResult};
use crate::event::{ModelEvent, ModelEventKind, RateVariable};

/// Default time-equality tolerance.
pub const DEFAULT_TOLERANCE: f64 = 1e-10;

/// A piecewise-constant parameter.
///
/// `values[0]` applies from the origin; `values[j]` applies after
/// `change_times[j - 1]`. So `change_times.len() == values.len() - 1`.
#[derive(Clone, Debug, PartialEq)]
pub struct RateParameter {
    pub values: Vec<f64>,
    pub change_times: Vec<f64>,
}

impl RateParameter {
    /// A parameter constant over the whole time axis.
    pub fn constant(value: f64) -> Self {
        Self {
            values: vec![value],
            change_times: Vec::new(),
        }
    }

    /// A parameter that changes value at the given times.
    pub fn piecewise(values: Vec<f64>, change_times: Vec<f64>) -> Self {
        Self {
            values,
            change_times,
        }
    }

    /// Check shape, ordering and value ranges.
    ///
    /// Probabilities must lie in [0, 1]; rates must be finite and >= 0.
    pub fn validate(&self, name: &'static str, is_probability: bool) -> EpiResult<()> {
        if self.values.is_empty() || self.change_times.len() + 1 != self.values.len() {
            return Err(EpiError::ChangeTimeMismatch {
                name,
                values: self.values.len(),
                change_times: self.change_times.len(),
                expected: self.values.len().saturating_sub(1),
            });
        }

        for &value in &self.values {
            if is_probability {
                if !(0.0..=1.0).contains(&value) {
                    return Err(EpiError::InvalidProbability { name, value });
                }
            } else if !value.is_finite() || value < 0.0 {
                return Err(EpiError::InvalidRate { name, value });
            }
        }

        check_sorted_times(name, &self.change_times)
    }

    fn initial(&self) -> f64 {
        self.values[0]
    }
}

/// One scheduled rho-sampling instant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RhoSampling {
    pub time: f64,
    pub prob: f64,
}

impl RhoSampling {
    pub fn new(time: f64, prob: f64) -> Self {
        Self { time, prob }
    }
}

/// Rates in force during one interval of the schedule.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rates {
    pub infection: f64,
    pub recovery: f64,
    pub psi_sampling: f64,
    pub removal_prob: f64,
}

impl Rates {
    fn set(&mut self, variable: RateVariable, value: f64) {
        match variable {
            RateVariable::InfectionRate => self.infection = value,
            RateVariable::RecoveryRate => self.recovery = value,
            RateVariable::PsiSamplingRate => self.psi_sampling = value,
            RateVariable::RemovalProb => self.removal_prob = value,
        }
    }
}

/// Time-ordered model events with their per-interval rate cache.
#[derive(Clone, Debug)]
pub struct ModelSchedule {
    events: Vec<ModelEvent>,
    rate_cache: Vec<Rates>,
    tolerance: f64,
}

impl ModelSchedule {
    /// Build the schedule from rate parameters and the rho-sampling schedule.
    ///
    /// Rate variables missing from `parameters` keep their defaults: zero for
    /// rates, one for the removal probability. Events sharing a time are
    /// ordered rho sampling first.
    pub fn build(
        parameters: &[(RateVariable, &RateParameter)],
        rho_sampling: &[RhoSampling],
        tolerance: f64,
    ) -> EpiResult<Self> {
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(EpiError::InvalidRate {
                name: "tolerance",
                value: tolerance,
            });
        }

        let mut initial = Rates {
            infection: 0.0,
            recovery: 0.0,
            psi_sampling: 0.0,
            removal_prob: 1.0,
        };
        let mut events = Vec::new();

        for &(variable, parameter) in parameters {
            parameter.validate(variable.name(), variable == RateVariable::RemovalProb)?;
            initial.set(variable, parameter.initial());
            for (j, &time) in parameter.change_times.iter().enumerate() {
                events.push(ModelEvent::rate_change(time, variable, parameter.values[j + 1]));
            }
        }

        let rho_times: Vec<f64> = rho_sampling.iter().map(|rho| rho.time).collect();
        check_sorted_times("rho_sampling_time", &rho_times)?;
        for rho in rho_sampling {
            if !(0.0..=1.0).contains(&rho.prob) {
                return Err(EpiError::InvalidProbability {
                    name: "rho_sampling_prob",
                    value: rho.prob,
                });
            }
            events.push(ModelEvent::rho_sampling(rho.time, rho.prob));
        }

        // Stable sort keeps per-variable order for identical keys.
        events.sort_by(|a, b| {
            a.time
                .total_cmp(&b.time)
                .then(a.tie_rank().cmp(&b.tie_rank()))
        });

        let mut rate_cache = Vec::with_capacity(events.len() + 1);
        rate_cache.push(initial);
        let mut current = initial;
        for event in &events {
            if let ModelEventKind::RateChange { variable, value } = event.kind {
                current.set(variable, value);
            }
            rate_cache.push(current);
        }

        Ok(Self {
            events,
            rate_cache,
            tolerance,
        })
    }

    /// All model events in time order.
    #[inline]
    pub fn events(&self) -> &[ModelEvent] {
        &self.events
    }

    /// Event that will be consumed next from interval `idx`.
    #[inline]
    pub fn event(&self, idx: usize) -> Option<&ModelEvent> {
        self.events.get(idx)
    }

    /// Time of the next unconsumed event, or infinity.
    #[inline]
    pub fn next_event_time(&self, idx: usize) -> f64 {
        self.event(idx).map_or(f64::INFINITY, |event| event.time)
    }

    /// Rates in force during interval `idx`.
    #[inline]
    pub fn rates(&self, idx: usize) -> &Rates {
        let last = self.rate_cache.len() - 1;
        &self.rate_cache[idx.min(last)]
    }

    /// Number of intervals (events + 1).
    pub fn n_intervals(&self) -> usize {
        self.rate_cache.len()
    }

    #[inline]
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Equality of two times up to the schedule tolerance.
    #[inline]
    pub fn times_equal(&self, a: f64, b: f64) -> bool {
        (a - b).abs() < self.tolerance
    }
}

fn check_sorted_times(name: &'static str, times: &[f64]) -> EpiResult<()> {
    let mut previous = 0.0;
    for &time in times {
        if !time.is_finite() || time < previous {
            return Err(EpiError::UnsortedTimes { name });
        }
        previous = time;
    }
    Ok(())
}
