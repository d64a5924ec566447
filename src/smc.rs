//! Sequential Monte Carlo estimate of the tree density.
//!
//! An ensemble of epidemic trajectories ("particles") is threaded through the
//! tree events in time order. Between two tree events each particle is
//! simulated conditional on producing no unobserved sample, coalescence or
//! lineage-erasing recovery; the probability of having avoided those events is
//! folded into the particle weight. At every tree event the weights are
//! averaged into the marginal likelihood estimate and the ensemble is
//! resampled with replacement.
//!
//! Key feature: particles are advanced in parallel with Rayon. Each particle
//! draws from its own generator, seeded from the caller's generator before
//! the parallel section, so results do not depend on thread scheduling.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use statrs::distribution::{Binomial, Discrete};
use statrs::function::gamma::ln_gamma;
use tracing::{debug, trace};

use crate::error::{EpiError, EpiResult};
use crate::event::EpidemicEvent;
use crate::model::EpidemicModel;
use crate::resampling::ReplacementSampler;
use crate::state::EpidemicState;
use crate::tree_events::{TreeEvent, TreeEventList, TreeEventType};

/// How a sampled-ancestor observation under psi sampling changes the state.
///
/// Sampling without removal leaves a birth-death state untouched either way;
/// the choice matters for models whose no-removal update does something.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SampledAncestorPolicy {
    /// Do not touch the state.
    #[default]
    LeaveState,
    /// Apply a `PsiSampleNoRemove` event through the model.
    ApplyNoRemoveEvent,
}

/// Configuration for the particle filter.
#[derive(Clone, Debug)]
pub struct SmcConfig {
    /// Number of particles.
    pub n_particles: usize,
    /// Seed used by [`SmcTreeDensity::log_likelihood`].
    pub seed: u64,
    /// Advance particles on the Rayon thread pool.
    pub parallel: bool,
    /// State update applied for sampled ancestors.
    pub sampled_ancestor_policy: SampledAncestorPolicy,
}

impl Default for SmcConfig {
    fn default() -> Self {
        Self {
            n_particles: 1000,
            seed: 42,
            parallel: true,
            sampled_ancestor_policy: SampledAncestorPolicy::default(),
        }
    }
}

/// Outcome of one particle-filter run.
#[derive(Clone, Debug, PartialEq)]
pub struct SmcSummary {
    /// Estimate of log P(tree | model), or `-inf`.
    pub log_likelihood: f64,
    /// log of the mean particle weight at each processed tree event.
    pub log_mean_weights: Vec<f64>,
    /// Effective sample size 1 / Σ w_i² of the normalised weights at each
    /// processed tree event.
    pub effective_sample_sizes: Vec<f64>,
}

impl SmcSummary {
    fn impossible(log_mean_weights: Vec<f64>, effective_sample_sizes: Vec<f64>) -> Self {
        Self {
            log_likelihood: f64::NEG_INFINITY,
            log_mean_weights,
            effective_sample_sizes,
        }
    }

    /// True if the run ended with a zero-probability tree.
    pub fn is_impossible(&self) -> bool {
        self.log_likelihood == f64::NEG_INFINITY
    }
}

/// Particle-filter estimator of the density of a tree given an epidemic model.
pub struct SmcTreeDensity<'a, M: EpidemicModel> {
    model: &'a M,
    tree_events: &'a TreeEventList,
    config: SmcConfig,
}

impl<'a, M: EpidemicModel> SmcTreeDensity<'a, M> {
    /// Create the estimator.
    ///
    /// # Arguments
    /// * `model` - Epidemic model at the current parameter values
    /// * `tree_events` - Observed tree events, times measured from the origin
    /// * `config` - Particle count, seed and execution options
    pub fn new(model: &'a M, tree_events: &'a TreeEventList, config: SmcConfig) -> EpiResult<Self> {
        if config.n_particles == 0 {
            return Err(EpiError::NoParticles);
        }
        Ok(Self {
            model,
            tree_events,
            config,
        })
    }

    pub fn config(&self) -> &SmcConfig {
        &self.config
    }

    /// Log-likelihood estimate using the configured seed.
    ///
    /// Every call re-seeds from `config.seed` and so returns the same
    /// estimate. Samplers that need independent estimates per call should
    /// pass their own random source to [`Self::log_likelihood_with_rng`].
    pub fn log_likelihood(&self) -> f64 {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        self.run(&mut rng).log_likelihood
    }

    /// Log-likelihood estimate drawing randomness from `rng`.
    pub fn log_likelihood_with_rng<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        self.run(rng).log_likelihood
    }

    /// Run the particle filter and keep per-event diagnostics.
    pub fn run<R: Rng + ?Sized>(&self, rng: &mut R) -> SmcSummary {
        let n_particles = self.config.n_particles;
        let mut log_mean_weights = Vec::with_capacity(self.tree_events.len());
        let mut effective_sample_sizes = Vec::with_capacity(self.tree_events.len());

        if self.tree_events.first_time() < 0.0 {
            debug!(
                first_time = self.tree_events.first_time(),
                "first tree event precedes the origin"
            );
            return SmcSummary::impossible(log_mean_weights, effective_sample_sizes);
        }

        let mut particles = vec![self.model.initial_state(); n_particles];
        let mut resampled: Vec<EpidemicState> = Vec::with_capacity(n_particles);
        let mut weights = vec![0.0; n_particles];
        let mut seeds = vec![0u64; n_particles];

        let mut log_likelihood = 0.0;
        let mut lineages: i64 = 1;

        for (event_idx, tree_event) in self.tree_events.iter().enumerate() {
            for seed in seeds.iter_mut() {
                *seed = rng.gen();
            }
            self.update_particles(&mut particles, &mut weights, &seeds, lineages, tree_event);

            let sum_of_weights: f64 = weights.iter().sum();
            if !(sum_of_weights > 0.0) || !sum_of_weights.is_finite() {
                debug!(
                    event_idx,
                    time = tree_event.time,
                    sum_of_weights,
                    "particle weights degenerate, tree impossible under model"
                );
                return SmcSummary::impossible(log_mean_weights, effective_sample_sizes);
            }

            let log_mean_weight = (sum_of_weights / n_particles as f64).ln();
            log_likelihood += log_mean_weight;

            for w in weights.iter_mut() {
                *w /= sum_of_weights;
            }
            let sum_sq: f64 = weights.iter().map(|&w| w * w).sum();
            let ess = if sum_sq > 0.0 { 1.0 / sum_sq } else { 0.0 };

            trace!(event_idx, time = tree_event.time, lineages, log_mean_weight, ess, "tree event processed");
            log_mean_weights.push(log_mean_weight);
            effective_sample_sizes.push(ess);

            let sampler = match ReplacementSampler::new(&weights) {
                Ok(sampler) => sampler,
                Err(err) => {
                    debug!(event_idx, %err, "resampling failed");
                    return SmcSummary::impossible(log_mean_weights, effective_sample_sizes);
                }
            };
            resampled.clear();
            resampled.extend((0..n_particles).map(|_| particles[sampler.next(&mut *rng)]));
            std::mem::swap(&mut particles, &mut resampled);

            match tree_event.event_type {
                TreeEventType::Coalescence => lineages += 1,
                TreeEventType::Leaf => lineages -= i64::from(tree_event.multiplicity),
                TreeEventType::SampledAncestor => {}
            }
        }

        SmcSummary {
            log_likelihood,
            log_mean_weights,
            effective_sample_sizes,
        }
    }

    /// Advance every particle to `tree_event`, writing its conditional weight.
    fn update_particles(
        &self,
        particles: &mut [EpidemicState],
        weights: &mut [f64],
        seeds: &[u64],
        lineages: i64,
        tree_event: &TreeEvent,
    ) {
        let advance = |((state, weight), &seed): ((&mut EpidemicState, &mut f64), &u64)| {
            let mut rng = StdRng::seed_from_u64(seed);
            *weight = self.update_particle(state, lineages, tree_event, &mut rng);
        };

        if self.config.parallel {
            particles
                .par_iter_mut()
                .zip(weights.par_iter_mut())
                .zip(seeds.par_iter())
                .for_each(advance);
        } else {
            particles
                .iter_mut()
                .zip(weights.iter_mut())
                .zip(seeds.iter())
                .for_each(advance);
        }
    }

    /// Simulate one particle up to `final_event` and return the conditional
    /// probability of the tree interval and of the event itself under the
    /// simulated trajectory.
    ///
    /// # Algorithm
    /// 1. Recoveries are only simulated while I exceeds the lineage count k;
    ///    otherwise their rate joins the psi-sampling rates as events that
    ///    must not happen, weighted by their survival probability.
    /// 2. Waiting times are drawn from the allowed rate and clipped at the
    ///    next model event and the tree event.
    /// 3. Infections are accepted with the probability that they do not
    ///    produce an unobserved coalescence, 1 − k(k−1)/(I(I+1)).
    /// 4. The tree event itself contributes its coalescence or sampling
    ///    density.
    fn update_particle(
        &self,
        state: &mut EpidemicState,
        lineages: i64,
        final_event: &TreeEvent,
        rng: &mut StdRng,
    ) -> f64 {
        let model = self.model;
        let k = lineages as f64;
        let mut conditional_p = 1.0;

        loop {
            let props = model.propensities(state);

            let infection_prop = props.infection;
            let (allowed_recov_prop, forbidden_recov_prop) = if state.i > k {
                (props.recovery, 0.0)
            } else {
                (0.0, props.recovery)
            };
            let allowed_prop = infection_prop + allowed_recov_prop;

            // Sample waiting time (exponential)
            let dt = if allowed_prop > 0.0 {
                -(1.0 - rng.gen::<f64>()).ln() / allowed_prop
            } else {
                f64::INFINITY
            };

            let next_model_event_time = model.next_model_event_time(state);

            // Condition against psi sampling and forbidden recovery
            let true_dt = dt
                .min(next_model_event_time.min(final_event.time) - state.time)
                .max(0.0);
            conditional_p *= (-true_dt
                * (props.psi_sample_remove + props.psi_sample_no_remove + forbidden_recov_prop))
                .exp();

            state.time += dt;

            // Model events strictly inside the interval: rate shifts are
            // crossed, rho sampling cannot be skipped silently.
            if next_model_event_time < final_event.time
                && !model.times_equal(next_model_event_time, final_event.time)
                && state.time > next_model_event_time
            {
                let is_rho = model
                    .next_model_event(state)
                    .map_or(false, |event| event.is_rho_sampling());
                if is_rho {
                    return 0.0;
                }
                state.time = next_model_event_time;
                state.model_interval_idx += 1;
                continue;
            }

            if state.time > final_event.time {
                break;
            }

            let event = if allowed_prop * rng.gen::<f64>() < infection_prop {
                let i = state.i;
                conditional_p *= (1.0 - k * (k - 1.0) / (i * (i + 1.0))).max(0.0);
                EpidemicEvent::infection()
            } else {
                EpidemicEvent::recovery()
            };
            model.increment_state(state, event);

            if conditional_p == 0.0 {
                return 0.0;
            }
        }

        state.time = final_event.time;
        state.observed_event_idx += 1;

        conditional_p *= match final_event.event_type {
            TreeEventType::Coalescence => self.coalescence_probability(state),
            TreeEventType::Leaf | TreeEventType::SampledAncestor => {
                self.sampling_probability(state, final_event)
            }
        };

        if !state.is_valid() {
            return 0.0;
        }
        // NaN and negative products collapse to zero weight.
        conditional_p.max(0.0)
    }

    /// Density of a coalescence among the current lineages, applying the
    /// infection that produces it.
    fn coalescence_probability(&self, state: &mut EpidemicState) -> f64 {
        let infection_prop = self.model.propensities(state).infection;
        self.model.increment_state(state, EpidemicEvent::infection());

        if infection_prop > 0.0 {
            2.0 / (state.i * (state.i - 1.0)) * infection_prop
        } else {
            0.0
        }
    }

    /// Probability of the sampling event, applying its state update.
    ///
    /// Rho sampling coinciding with the event takes precedence, then an
    /// explicit psi-sampling process for single samples, otherwise the
    /// samples are not attributed to any modelled process. The result
    /// includes the m! orderings of m simultaneous samples.
    fn sampling_probability(&self, state: &mut EpidemicState, final_event: &TreeEvent) -> f64 {
        let model = self.model;
        let multiplicity = final_event.multiplicity;

        let sample_prob = if let Some(rho_prob) = self.consume_rho_sampling(state, final_event) {
            model.increment_state(state, EpidemicEvent::rho_samples(multiplicity));
            rho_prob
        } else if model.has_psi_sampling() && multiplicity == 1 {
            let props = model.propensities(state);
            match final_event.event_type {
                TreeEventType::Leaf => {
                    model.increment_state(state, EpidemicEvent::psi_sample_remove());
                    props.psi_sample_remove
                }
                _ => {
                    if self.config.sampled_ancestor_policy == SampledAncestorPolicy::ApplyNoRemoveEvent {
                        model.increment_state(state, EpidemicEvent::psi_sample_no_remove());
                    }
                    props.psi_sample_no_remove
                }
            }
        } else {
            model.increment_state(state, EpidemicEvent::other_samples(multiplicity));
            1.0
        };

        sample_prob * ln_gamma(1.0 + multiplicity as f64).exp()
    }

    /// Sum of binomial sampling probabilities over the rho-sampling events
    /// coinciding with `final_event`, or `None` if there are none.
    ///
    /// All model events at that time are consumed.
    fn consume_rho_sampling(&self, state: &mut EpidemicState, final_event: &TreeEvent) -> Option<f64> {
        let model = self.model;
        let pending = model
            .schedule()
            .events()
            .get(state.model_interval_idx..)
            .unwrap_or(&[]);

        let coincident = pending
            .iter()
            .take_while(|event| model.times_equal(event.time, final_event.time))
            .count();
        let rhos: Vec<f64> = pending[..coincident]
            .iter()
            .filter_map(|event| event.rho())
            .collect();
        if rhos.is_empty() {
            return None;
        }

        let infected = state.i.round();
        let samples = u64::from(final_event.multiplicity);
        let prob = rhos
            .iter()
            .map(|&rho| binomial_pmf(infected, samples, rho))
            .sum();

        state.model_interval_idx += coincident;
        Some(prob)
    }
}

/// P(X = k) for X ~ Binomial(n, p); zero for negative or too small n.
fn binomial_pmf(n: f64, k: u64, p: f64) -> f64 {
    if n < 0.0 || (k as f64) > n {
        return 0.0;
    }
    match Binomial::new(p, n as u64) {
        Ok(dist) => dist.pmf(k),
        Err(_) => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BirthDeathModel, BirthDeathParams};

    fn sequential(n_particles: usize) -> SmcConfig {
        SmcConfig {
            n_particles,
            parallel: false,
            ..Default::default()
        }
    }

    fn cherry() -> TreeEventList {
        TreeEventList::new(vec![
            TreeEvent::coalescence(0.5),
            TreeEvent::leaf(0.7, 1),
            TreeEvent::leaf(1.0, 1),
        ])
        .unwrap()
    }

    #[test]
    fn test_zero_particles_rejected() {
        let model = BirthDeathModel::new(BirthDeathParams::constant(2.0, 1.0)).unwrap();
        let tree = cherry();
        let result = SmcTreeDensity::new(&model, &tree, sequential(0));
        assert!(matches!(result, Err(EpiError::NoParticles)));
    }

    #[test]
    fn test_negative_first_time_is_impossible() {
        let model = BirthDeathModel::new(BirthDeathParams::constant(2.0, 1.0)).unwrap();
        let tree =
            TreeEventList::new(vec![TreeEvent::coalescence(-0.1), TreeEvent::leaf(0.5, 2)]).unwrap();
        let density = SmcTreeDensity::new(&model, &tree, sequential(100)).unwrap();

        let summary = density.run(&mut StdRng::seed_from_u64(1));
        assert!(summary.is_impossible());
        assert!(summary.log_mean_weights.is_empty());
    }

    #[test]
    fn test_cherry_likelihood_finite() {
        let model = BirthDeathModel::new(BirthDeathParams::constant(2.0, 1.0)).unwrap();
        let tree = cherry();
        let density = SmcTreeDensity::new(&model, &tree, sequential(500)).unwrap();

        let summary = density.run(&mut StdRng::seed_from_u64(3));
        assert!(summary.log_likelihood.is_finite());
        assert_eq!(summary.log_mean_weights.len(), 3);
        assert!(summary
            .effective_sample_sizes
            .iter()
            .all(|&ess| ess > 0.0 && ess <= 500.0 + 1e-9));
    }

    #[test]
    fn test_all_invalid_final_states_give_neg_infinity() {
        // Three simultaneous samples at the origin, where only one infected exists.
        let model = BirthDeathModel::new(BirthDeathParams::constant(2.0, 1.0)).unwrap();
        let tree = TreeEventList::new(vec![TreeEvent::leaf(0.0, 3)]).unwrap();
        let density = SmcTreeDensity::new(&model, &tree, sequential(50)).unwrap();

        assert_eq!(density.log_likelihood(), f64::NEG_INFINITY);
    }

    #[test]
    fn test_same_seed_same_estimate() {
        let model = BirthDeathModel::new(BirthDeathParams::constant(2.0, 1.0)).unwrap();
        let tree = cherry();
        let density = SmcTreeDensity::new(&model, &tree, sequential(200)).unwrap();

        assert_eq!(density.log_likelihood(), density.log_likelihood());
    }

    #[test]
    fn test_shared_rng_gives_independent_estimates() {
        let model = BirthDeathModel::new(BirthDeathParams::constant(2.0, 1.0)).unwrap();
        let tree = cherry();
        let density = SmcTreeDensity::new(&model, &tree, sequential(50)).unwrap();

        let mut rng = StdRng::seed_from_u64(11);
        let estimates: Vec<f64> = (0..5).map(|_| density.log_likelihood_with_rng(&mut rng)).collect();
        assert!(estimates.iter().all(|v| v.is_finite()));
        assert!(estimates.windows(2).any(|w| w[0] != w[1]), "{:?}", estimates);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let model = BirthDeathModel::new(BirthDeathParams::constant(2.0, 1.0)).unwrap();
        let tree = cherry();
        let seq = SmcTreeDensity::new(&model, &tree, sequential(300)).unwrap();
        let par = SmcTreeDensity::new(
            &model,
            &tree,
            SmcConfig {
                n_particles: 300,
                parallel: true,
                ..Default::default()
            },
        )
        .unwrap();

        let a = seq.log_likelihood_with_rng(&mut StdRng::seed_from_u64(9));
        let b = par.log_likelihood_with_rng(&mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
    }

    #[test]
    fn test_rho_sampling_weight() {
        // No dynamics: the particle only experiences the rho-sampling event.
        let model = BirthDeathModel::new(BirthDeathParams::constant(0.0, 0.0).with_rho_sampling(1.0, 0.5))
            .unwrap();
        let tree = TreeEventList::new(vec![TreeEvent::leaf(1.0, 2)]).unwrap();
        let density = SmcTreeDensity::new(&model, &tree, sequential(1)).unwrap();

        let mut state = model.initial_state();
        state.i = 4.0;
        state.time = 1.0;
        let mut rng = StdRng::seed_from_u64(0);

        let weight = density.update_particle(&mut state, 2, &tree[0], &mut rng);
        // C(4,2) 0.5^2 0.5^2 = 0.375, times 2! orderings.
        assert!((weight - 0.75).abs() < 1e-12, "weight {}", weight);
        assert_eq!(state.i, 2.0);
        // The rho-sampling event has been consumed.
        assert_eq!(state.model_interval_idx, 1);
    }

    #[test]
    fn test_skipped_rho_sampling_kills_particle() {
        let model = BirthDeathModel::new(BirthDeathParams::constant(0.0, 0.0).with_rho_sampling(0.5, 0.5))
            .unwrap();
        let tree = TreeEventList::new(vec![TreeEvent::leaf(1.0, 1)]).unwrap();
        let density = SmcTreeDensity::new(&model, &tree, sequential(10)).unwrap();

        assert_eq!(density.log_likelihood(), f64::NEG_INFINITY);
    }

    #[test]
    fn test_rate_change_is_crossed() {
        let mut params = BirthDeathParams::constant(1.0, 0.0);
        params.infection_rate = crate::model::RateParameter::piecewise(vec![1.0, 3.0], vec![0.25]);
        let model = BirthDeathModel::new(params).unwrap();
        let tree = TreeEventList::new(vec![TreeEvent::leaf(1.0, 1)]).unwrap();
        let density = SmcTreeDensity::new(&model, &tree, sequential(1)).unwrap();

        let mut state = model.initial_state();
        let mut rng = StdRng::seed_from_u64(5);
        let weight = density.update_particle(&mut state, 1, &tree[0], &mut rng);

        assert_eq!(state.model_interval_idx, 1);
        assert_eq!(state.time, 1.0);
        assert_eq!(state.observed_event_idx, 1);
        assert!(weight > 0.0);
    }

    #[test]
    fn test_psi_leaf_weight_without_dynamics() {
        // With only psi sampling, the weight is survival to t times the
        // sampling propensity: exp(-ψ t) ψ.
        let psi = 0.7;
        let model = BirthDeathModel::new(BirthDeathParams::constant(0.0, 0.0).with_psi_sampling(psi, 1.0))
            .unwrap();
        let tree = TreeEventList::new(vec![TreeEvent::leaf(2.0, 1)]).unwrap();
        let density = SmcTreeDensity::new(&model, &tree, sequential(10)).unwrap();

        let expected = (-psi * 2.0_f64).exp() * psi;
        assert!((density.log_likelihood() - expected.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_forbidden_recovery_weight_without_births() {
        // One lineage and one infected: recovery is forbidden throughout, so
        // the weight is the survival probability exp(-γ t).
        let gamma = 0.4;
        let model = BirthDeathModel::new(BirthDeathParams::constant(0.0, gamma)).unwrap();
        let tree = TreeEventList::new(vec![TreeEvent::leaf(1.5, 1)]).unwrap();
        let density = SmcTreeDensity::new(&model, &tree, sequential(10)).unwrap();

        assert!((density.log_likelihood() + gamma * 1.5).abs() < 1e-12);
    }

    // Sampled ancestors under psi sampling: whether the observation should
    // update the state is an open product decision. Both policies are
    // exercised; for birth-death they agree because sampling without removal
    // leaves I untouched.
    #[test]
    fn test_sampled_ancestor_policies_agree_for_birth_death() {
        let model = BirthDeathModel::new(BirthDeathParams::constant(0.0, 0.0).with_psi_sampling(0.5, 0.0))
            .unwrap();
        let tree = TreeEventList::new(vec![TreeEvent::sampled_ancestor(1.0, 1)]).unwrap();

        let mut weights = Vec::new();
        for policy in [SampledAncestorPolicy::LeaveState, SampledAncestorPolicy::ApplyNoRemoveEvent] {
            let config = SmcConfig {
                sampled_ancestor_policy: policy,
                ..sequential(1)
            };
            let density = SmcTreeDensity::new(&model, &tree, config).unwrap();
            let mut state = model.initial_state();
            let w = density.update_particle(&mut state, 1, &tree[0], &mut StdRng::seed_from_u64(2));
            assert_eq!(state.i, 1.0);
            weights.push(w);
        }
        assert_eq!(weights[0], weights[1]);
        assert!((weights[0] - (-0.5f64).exp() * 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_binomial_pmf_edges() {
        assert!((binomial_pmf(4.0, 2, 0.5) - 0.375).abs() < 1e-12);
        assert_eq!(binomial_pmf(1.0, 2, 0.5), 0.0);
        assert_eq!(binomial_pmf(-1.0, 0, 0.5), 0.0);
        assert!((binomial_pmf(3.0, 3, 1.0) - 1.0).abs() < 1e-12);
    }
}
