//! Parallel population evaluation.
//!
//! Scoring a swarm is embarrassingly parallel: every particle runs its own
//! Parratt recursion on a shared, read-only problem. The population itself
//! stays owned by the optimizer thread.

use ndarray::Array1;
use rayon::prelude::*;

use crate::parameters::ParameterBounds;
use crate::problem::{Objective, Scored};

/// Evaluate the fast cost of each point in a population in parallel.
///
/// # Arguments
///
/// * `objective` - The objective to evaluate
/// * `population` - The population to evaluate
///
/// # Returns
///
/// * A vector of costs for each point
pub fn evaluate_population_parallel<O: Objective>(
    objective: &O,
    population: &[Array1<f64>],
) -> Vec<f64> {
    population
        .par_iter()
        .map(|point| objective.fast_cost(point))
        .collect()
}

/// Score the selected members of a population with the accurate evaluator.
///
/// # Arguments
///
/// * `objective` - The objective to evaluate
/// * `population` - The population
/// * `indices` - Members to score
///
/// # Returns
///
/// * One [`Scored`] per index, in the order of `indices`
pub fn score_selected_parallel<O: Objective>(
    objective: &O,
    population: &[Array1<f64>],
    indices: &[usize],
) -> Vec<Scored> {
    indices
        .par_iter()
        .map(|&i| objective.accurate(&population[i]))
        .collect()
}

/// Clip and normalize every point of a population in parallel.
pub fn prepare_population_parallel<O: Objective>(
    objective: &O,
    bounds: &ParameterBounds,
    population: &mut [Array1<f64>],
) {
    population
        .par_iter_mut()
        .for_each(|point| super::prepare(objective, bounds, point));
}
