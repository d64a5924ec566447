//! Forward simulation of epidemic trajectories.
//!
//! Simulates the model's jump process from its initial state:
//! - Exact stochastic simulation (one event per step), or
//! - Tau-leaping (Poisson event counts over fixed steps), falling back to
//!   exact steps whenever the model reports the state as critical
//!
//! Rate changes switch the active rate interval; rho sampling removes a
//! binomially distributed number of infecteds. Trajectories export to the
//! whitespace-separated record format and to `ndarray` matrices.
//!
//! Key feature: parallel trajectory simulation using Rayon.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Binomial, Distribution, Poisson};
use rayon::prelude::*;
use tracing::debug;

use crate::error::{EpiError, EpiResult};
use crate::event::{EpidemicEvent, EpidemicEventType, ModelEventKind};
use crate::model::{EpidemicModel, Propensities};
use crate::state::{Algorithm, EpidemicState};

/// Configuration for trajectory simulation.
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    /// Simulation end time.
    pub t_max: f64,
    /// `Algorithm::Ssa` or `Algorithm::TauLeap`.
    pub algorithm: Algorithm,
    /// Leap length for tau-leaping.
    pub tau: f64,
    /// Criticality margin (in standard deviations) for tau-leaping.
    pub alpha: f64,
    /// Record the state at this many evenly spaced times in [0, t_max].
    /// `None` records the state after every step.
    pub n_checkpoints: Option<usize>,
    /// Upper bound on simulation steps.
    pub max_steps: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            t_max: 10.0,
            algorithm: Algorithm::Ssa,
            tau: 0.01,
            alpha: 3.0,
            n_checkpoints: None,
            max_steps: 1_000_000,
        }
    }
}

impl SimulationConfig {
    fn validate(&self) -> EpiResult<()> {
        if !self.t_max.is_finite() || self.t_max < 0.0 {
            return Err(EpiError::InvalidSimulationConfig(format!(
                "t_max must be finite and >= 0, got {}",
                self.t_max
            )));
        }
        match self.algorithm {
            Algorithm::Ssa => {}
            Algorithm::TauLeap => {
                if !self.tau.is_finite() || self.tau <= 0.0 {
                    return Err(EpiError::InvalidSimulationConfig(format!(
                        "tau must be finite and > 0, got {}",
                        self.tau
                    )));
                }
                if !self.alpha.is_finite() || self.alpha < 0.0 {
                    return Err(EpiError::InvalidSimulationConfig(format!(
                        "alpha must be finite and >= 0, got {}",
                        self.alpha
                    )));
                }
            }
            Algorithm::NotApplicable => {
                return Err(EpiError::InvalidSimulationConfig(
                    "algorithm must be Ssa or TauLeap".to_string(),
                ));
            }
        }
        if self.n_checkpoints == Some(0) {
            return Err(EpiError::InvalidSimulationConfig(
                "n_checkpoints must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Sequence of recorded states.
#[derive(Clone, Debug, Default)]
pub struct Trajectory {
    pub states: Vec<EpidemicState>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Last recorded state.
    pub fn final_state(&self) -> Option<&EpidemicState> {
        self.states.last()
    }

    /// Header plus one record line per checkpoint.
    pub fn to_records(&self) -> String {
        let mut out = String::from(EpidemicState::header());
        out.push('\n');
        for state in &self.states {
            out.push_str(&state.record());
            out.push('\n');
        }
        out
    }

    /// Matrix with columns `t, S, I, R, cumulativeInfections`.
    pub fn to_array(&self) -> Array2<f64> {
        let mut array = Array2::zeros((self.states.len(), 5));
        for (row, state) in self.states.iter().enumerate() {
            array[[row, 0]] = state.time;
            array[[row, 1]] = state.s;
            array[[row, 2]] = state.i;
            array[[row, 3]] = state.r;
            array[[row, 4]] = state.cumulative_infections;
        }
        array
    }
}

/// Records states either at every step or at fixed checkpoint times.
struct Recorder {
    checkpoints: Option<Vec<f64>>,
    next: usize,
    trajectory: Trajectory,
}

impl Recorder {
    fn new(config: &SimulationConfig) -> Self {
        let checkpoints = config.n_checkpoints.map(|n| {
            if n == 1 {
                vec![config.t_max]
            } else {
                (0..n)
                    .map(|j| config.t_max * j as f64 / (n - 1) as f64)
                    .collect()
            }
        });
        Self {
            checkpoints,
            next: 0,
            trajectory: Trajectory::default(),
        }
    }

    /// Called with the state in force up to (excluding) `until`.
    fn advance(&mut self, state: &EpidemicState, until: f64) {
        if let Some(times) = &self.checkpoints {
            while self.next < times.len() && times[self.next] < until {
                let mut snapshot = *state;
                snapshot.time = times[self.next];
                self.trajectory.states.push(snapshot);
                self.next += 1;
            }
        }
    }

    /// Called after each change of state.
    fn step(&mut self, state: &EpidemicState) {
        if self.checkpoints.is_none() {
            self.trajectory.states.push(*state);
        }
    }

    fn finish(mut self, state: &EpidemicState) -> Trajectory {
        self.advance(state, f64::INFINITY);
        self.trajectory
    }
}

/// Forward simulator for an epidemic model.
pub struct TrajectorySimulator<'a, M: EpidemicModel> {
    model: &'a M,
    config: SimulationConfig,
}

impl<'a, M: EpidemicModel> TrajectorySimulator<'a, M> {
    /// Create a new simulator.
    pub fn new(model: &'a M, config: SimulationConfig) -> EpiResult<Self> {
        config.validate()?;
        Ok(Self { model, config })
    }

    /// Run a single trajectory.
    pub fn simulate<R: Rng + ?Sized>(&self, rng: &mut R) -> Trajectory {
        let t_max = self.config.t_max;
        let mut state = self.model.initial_state();
        state.algorithm = self.config.algorithm;

        let mut recorder = Recorder::new(&self.config);
        recorder.step(&state);

        let mut n_steps = 0;
        while state.time < t_max && n_steps < self.config.max_steps {
            if state.i <= 0.0 {
                debug!(time = state.time, "epidemic extinct");
                break;
            }

            let props = self.model.propensities(&state);
            let leap = self.config.algorithm == Algorithm::TauLeap
                && !self
                    .model
                    .is_critical(&state, &props, self.config.alpha, self.config.tau);

            if leap {
                self.leap(&mut state, &props, &mut recorder, rng);
            } else {
                self.exact_step(&mut state, &props, &mut recorder, rng);
            }
            recorder.step(&state);
            n_steps += 1;

            if !state.is_valid() {
                debug!(time = state.time, "trajectory reached invalid state");
                break;
            }
        }

        if n_steps >= self.config.max_steps {
            debug!(n_steps, time = state.time, "step limit reached");
        }

        recorder.finish(&state)
    }

    /// One exact step: the next jump, the next model event, or `t_max`,
    /// whichever comes first.
    fn exact_step<R: Rng + ?Sized>(
        &self,
        state: &mut EpidemicState,
        props: &Propensities,
        recorder: &mut Recorder,
        rng: &mut R,
    ) {
        let total_rate = props.total();
        let dt = if total_rate > 0.0 {
            -(1.0 - rng.gen::<f64>()).ln() / total_rate
        } else {
            f64::INFINITY
        };

        let next_model_event_time = self.model.next_model_event_time(state);
        let horizon = next_model_event_time.min(self.config.t_max);

        if state.time + dt > horizon {
            recorder.advance(state, horizon);
            state.time = horizon;
            if next_model_event_time <= self.config.t_max {
                self.apply_model_event(state, rng);
            }
            return;
        }

        recorder.advance(state, state.time + dt);
        state.time += dt;

        // Sample event type (weighted by propensities)
        let rates = props.as_array();
        let u: f64 = rng.gen::<f64>() * total_rate;
        let mut cumsum = 0.0;
        let mut chosen_idx = rates.len() - 1;
        for (i, &rate) in rates.iter().enumerate() {
            cumsum += rate;
            if u < cumsum {
                chosen_idx = i;
                break;
            }
        }

        let event_type = EVENT_ORDER[chosen_idx];
        self.model.increment_state(state, EpidemicEvent::new(event_type, 1));
    }

    /// One tau-leap, shortened to end exactly at the next model event or `t_max`.
    fn leap<R: Rng + ?Sized>(
        &self,
        state: &mut EpidemicState,
        props: &Propensities,
        recorder: &mut Recorder,
        rng: &mut R,
    ) {
        let next_model_event_time = self.model.next_model_event_time(state);
        let horizon = next_model_event_time.min(self.config.t_max);
        let step = self.config.tau.min(horizon - state.time);

        recorder.advance(state, state.time + step);

        // Removals within one leap cannot exceed the infecteds present at its start.
        let mut removable = state.i.max(0.0).floor() as u32;
        for (&rate, &event_type) in props.as_array().iter().zip(EVENT_ORDER.iter()) {
            let mut count = poisson_count(rate * step, rng);
            if is_removal(event_type) {
                count = count.min(removable);
                removable -= count;
            }
            if count > 0 {
                self.model.increment_state(state, EpidemicEvent::new(event_type, count));
            }
        }
        state.time += step;

        if state.time >= next_model_event_time && next_model_event_time <= self.config.t_max {
            state.time = next_model_event_time;
            self.apply_model_event(state, rng);
        }
    }

    /// Consume the next model event at the current time.
    fn apply_model_event<R: Rng + ?Sized>(&self, state: &mut EpidemicState, rng: &mut R) {
        let Some(event) = self.model.next_model_event(state).copied() else {
            return;
        };

        if let ModelEventKind::RhoSampling { rho } = event.kind {
            let infected = state.i.max(0.0).round() as u64;
            let sampled = match Binomial::new(infected, rho) {
                Ok(dist) => dist.sample(rng),
                Err(_) => 0,
            };
            debug!(time = event.time, infected, sampled, "rho sampling");
            if sampled > 0 {
                self.model
                    .increment_state(state, EpidemicEvent::rho_samples(sampled as u32));
            }
        }
        state.model_interval_idx += 1;
    }
}

/// Event types in propensity order.
const EVENT_ORDER: [EpidemicEventType; 4] = [
    EpidemicEventType::Infection,
    EpidemicEventType::Recovery,
    EpidemicEventType::PsiSampleRemove,
    EpidemicEventType::PsiSampleNoRemove,
];

fn is_removal(event_type: EpidemicEventType) -> bool {
    matches!(
        event_type,
        EpidemicEventType::Recovery | EpidemicEventType::PsiSampleRemove
    )
}

fn poisson_count<R: Rng + ?Sized>(mean: f64, rng: &mut R) -> u32 {
    if !(mean > 0.0) {
        return 0;
    }
    match Poisson::new(mean) {
        Ok(dist) => {
            let draw: f64 = dist.sample(rng);
            draw as u32
        }
        Err(_) => 0,
    }
}

/// Simulate multiple trajectories in parallel.
///
/// # Arguments
/// * `model` - Epidemic model
/// * `config` - Simulation configuration
/// * `n_samples` - Number of trajectories to simulate
/// * `seed` - Base RNG seed (each trajectory gets seed + trajectory_index)
///
/// # Returns
/// * Vector of trajectories, one per sample
pub fn simulate_trajectories_parallel<M: EpidemicModel>(
    model: &M,
    config: &SimulationConfig,
    n_samples: usize,
    seed: u64,
) -> EpiResult<Vec<Trajectory>> {
    let simulator = TrajectorySimulator::new(model, config.clone())?;

    Ok((0..n_samples)
        .into_par_iter()
        .map(|i| {
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(i as u64));
            simulator.simulate(&mut rng)
        })
        .collect())
}
