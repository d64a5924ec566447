//! Python bindings.
//!
//! Event types cross the boundary as integer codes:
//! 0 = coalescence, 1 = leaf, 2 = sampled ancestor.

use numpy::{PyArray1, PyArray2, PyReadonlyArray1};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyDict;
use pyo3::wrap_pyfunction;
use rand::Rng;

use crate::error::EpiError;
use crate::model::{BirthDeathModel, BirthDeathParams, RateParameter, RhoSampling};
use crate::simulate::{simulate_trajectories_parallel, SimulationConfig};
use crate::smc::{SmcConfig, SmcTreeDensity};
use crate::state::Algorithm;
use crate::tree_events::{TreeEvent, TreeEventList, TreeEventType};

impl From<EpiError> for PyErr {
    fn from(err: EpiError) -> PyErr {
        PyErr::new::<PyValueError, _>(err.to_string())
    }
}

#[allow(clippy::too_many_arguments)]
fn build_model(
    infection_rate: f64,
    recovery_rate: f64,
    psi_sampling_rate: Option<f64>,
    removal_prob: f64,
    rho_times: Vec<f64>,
    rho_probs: Vec<f64>,
) -> PyResult<BirthDeathModel> {
    if rho_times.len() != rho_probs.len() {
        return Err(PyErr::new::<PyValueError, _>(
            "rho_times and rho_probs must have same length",
        ));
    }

    let mut params = BirthDeathParams::constant(infection_rate, recovery_rate);
    if let Some(psi) = psi_sampling_rate {
        params.psi_sampling_rate = Some(RateParameter::constant(psi));
    }
    params.removal_prob = RateParameter::constant(removal_prob);
    params.rho_sampling = rho_times
        .into_iter()
        .zip(rho_probs)
        .map(|(time, prob)| RhoSampling::new(time, prob))
        .collect();

    Ok(BirthDeathModel::new(params)?)
}

fn run_smc(
    model: &BirthDeathModel,
    tree_events: &TreeEventList,
    n_particles: usize,
    seed: Option<u64>,
) -> PyResult<f64> {
    let config = SmcConfig {
        n_particles,
        seed: seed.unwrap_or_else(|| rand::thread_rng().gen()),
        ..Default::default()
    };
    let density = SmcTreeDensity::new(model, tree_events, config)?;
    Ok(density.log_likelihood())
}

/// Particle-filter log-likelihood of a tree under a birth-death model.
///
/// # Arguments
/// * `event_times` - Tree event times, measured forward from the origin
/// * `event_types` - Integer event codes (0 coalescence, 1 leaf, 2 sampled ancestor)
/// * `multiplicities` - Simultaneous sample counts per event
/// * `infection_rate`, `recovery_rate` - Birth and death rates
/// * `psi_sampling_rate` - Optional psi-sampling rate
/// * `removal_prob` - Probability that a psi-sampled individual is removed
/// * `rho_times`, `rho_probs` - Rho-sampling instants
/// * `n_particles` - Particle count
/// * `seed` - RNG seed; `None` draws a fresh one, so repeated calls give
///   independent estimates
///
/// # Returns
/// * Log-likelihood estimate (`-inf` when the tree is impossible)
#[pyfunction]
#[pyo3(signature = (event_times, event_types, multiplicities, infection_rate, recovery_rate, psi_sampling_rate=None, removal_prob=1.0, rho_times=Vec::new(), rho_probs=Vec::new(), n_particles=1000, seed=None))]
#[allow(clippy::too_many_arguments)]
fn smc_log_likelihood(
    event_times: PyReadonlyArray1<f64>,
    event_types: PyReadonlyArray1<i32>,
    multiplicities: PyReadonlyArray1<u32>,
    infection_rate: f64,
    recovery_rate: f64,
    psi_sampling_rate: Option<f64>,
    removal_prob: f64,
    rho_times: Vec<f64>,
    rho_probs: Vec<f64>,
    n_particles: usize,
    seed: Option<u64>,
) -> PyResult<f64> {
    let times = event_times.as_array();
    let types = event_types.as_array();
    let mults = multiplicities.as_array();
    if types.len() != times.len() || mults.len() != times.len() {
        return Err(PyErr::new::<PyValueError, _>(
            "event_times, event_types and multiplicities must have same length",
        ));
    }

    let mut events = Vec::with_capacity(times.len());
    for ((&time, &code), &multiplicity) in times.iter().zip(types.iter()).zip(mults.iter()) {
        let event_type = match code {
            0 => TreeEventType::Coalescence,
            1 => TreeEventType::Leaf,
            2 => TreeEventType::SampledAncestor,
            other => {
                return Err(PyErr::new::<PyValueError, _>(format!(
                    "unknown tree event code {}",
                    other
                )))
            }
        };
        events.push(TreeEvent::new(time, event_type, multiplicity));
    }
    let tree_events = TreeEventList::new(events)?;

    let model = build_model(
        infection_rate,
        recovery_rate,
        psi_sampling_rate,
        removal_prob,
        rho_times,
        rho_probs,
    )?;
    run_smc(&model, &tree_events, n_particles, seed)
}

/// Particle-filter log-likelihood of a tree given in parent-index form.
///
/// # Arguments
/// * `parent_indices` - Parent index for each node (-1 for root)
/// * `node_heights` - Node heights before the most recent sample
/// * `origin` - Height of the epidemic origin
///
/// Remaining arguments as for `smc_log_likelihood`.
#[pyfunction]
#[pyo3(signature = (parent_indices, node_heights, origin, infection_rate, recovery_rate, psi_sampling_rate=None, removal_prob=1.0, rho_times=Vec::new(), rho_probs=Vec::new(), n_particles=1000, seed=None))]
#[allow(clippy::too_many_arguments)]
fn smc_log_likelihood_from_tree(
    parent_indices: PyReadonlyArray1<i32>,
    node_heights: PyReadonlyArray1<f64>,
    origin: f64,
    infection_rate: f64,
    recovery_rate: f64,
    psi_sampling_rate: Option<f64>,
    removal_prob: f64,
    rho_times: Vec<f64>,
    rho_probs: Vec<f64>,
    n_particles: usize,
    seed: Option<u64>,
) -> PyResult<f64> {
    let model = build_model(
        infection_rate,
        recovery_rate,
        psi_sampling_rate,
        removal_prob,
        rho_times,
        rho_probs,
    )?;
    let tree_events = TreeEventList::from_structure(
        &parent_indices.as_array().to_vec(),
        &node_heights.as_array().to_vec(),
        origin,
        model.params().tolerance,
    )?;
    run_smc(&model, &tree_events, n_particles, seed)
}

/// Simulate birth-death trajectories in parallel.
///
/// # Returns
/// * List of dicts with `times` (n,) and `states` (n, 4: S, I, R, cumulative) arrays
#[pyfunction]
#[pyo3(signature = (infection_rate, recovery_rate, t_max, n_samples, seed, psi_sampling_rate=None, removal_prob=1.0, rho_times=Vec::new(), rho_probs=Vec::new(), tau_leap=false, tau=0.01, alpha=3.0, n_checkpoints=None))]
#[allow(clippy::too_many_arguments)]
fn simulate_trajectories<'py>(
    py: Python<'py>,
    infection_rate: f64,
    recovery_rate: f64,
    t_max: f64,
    n_samples: usize,
    seed: u64,
    psi_sampling_rate: Option<f64>,
    removal_prob: f64,
    rho_times: Vec<f64>,
    rho_probs: Vec<f64>,
    tau_leap: bool,
    tau: f64,
    alpha: f64,
    n_checkpoints: Option<usize>,
) -> PyResult<Vec<PyObject>> {
    let model = build_model(
        infection_rate,
        recovery_rate,
        psi_sampling_rate,
        removal_prob,
        rho_times,
        rho_probs,
    )?;
    let config = SimulationConfig {
        t_max,
        algorithm: if tau_leap { Algorithm::TauLeap } else { Algorithm::Ssa },
        tau,
        alpha,
        n_checkpoints,
        ..Default::default()
    };

    let trajectories = py.allow_threads(|| {
        simulate_trajectories_parallel(&model, &config, n_samples, seed)
    })?;

    let mut results = Vec::with_capacity(trajectories.len());
    for trajectory in trajectories {
        let array = trajectory.to_array();
        let times = array.column(0).to_vec();
        let states = array.slice(ndarray::s![.., 1..]).to_owned();

        let dict = PyDict::new(py);
        dict.set_item("times", PyArray1::from_vec(py, times))?;
        dict.set_item("states", PyArray2::from_owned_array(py, states))?;
        results.push(dict.into());
    }
    Ok(results)
}

#[pymodule]
fn epi_smc(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(smc_log_likelihood, m)?)?;
    m.add_function(wrap_pyfunction!(smc_log_likelihood_from_tree, m)?)?;
    m.add_function(wrap_pyfunction!(simulate_trajectories, m)?)?;
    Ok(())
}
