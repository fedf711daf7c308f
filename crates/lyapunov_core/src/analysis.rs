//! Lyapunov spectrum estimation by the discrete QR method.
//!
//! Each run transports an orthonormal frame through the tangent map, re-orthogonalizes
//! it after every step and accumulates the logarithm of each column's growth. The
//! running averages are the exponent estimates; a run stops once two successive
//! estimates agree within tolerance, after a transient of
//! `floor(max_iterations * min_iteration_fraction)` iterations.

use crate::{
    error::{LyapunovError, LyapunovResult},
    traits::TangentMap,
};
use anyhow::anyhow;
use nalgebra::linalg::QR;
use nalgebra::{DMatrix, DVector};
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Tuning parameters shared by single and batch estimation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorSettings {
    pub tolerance: f64,
    pub max_iterations: usize,
    pub min_iteration_fraction: f64,
}

impl Default for EstimatorSettings {
    fn default() -> Self {
        Self {
            tolerance: 0.01,
            max_iterations: 1000,
            min_iteration_fraction: 0.1,
        }
    }
}

impl EstimatorSettings {
    pub fn validate(&self) -> LyapunovResult<()> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(LyapunovError::InvalidInput(format!(
                "tolerance must be positive and finite (got {}).",
                self.tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(LyapunovError::InvalidInput(
                "max_iterations must be greater than zero.".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_iteration_fraction) {
            return Err(LyapunovError::InvalidInput(format!(
                "min_iteration_fraction must lie in [0, 1] (got {}).",
                self.min_iteration_fraction
            )));
        }
        Ok(())
    }

    /// Transient length; convergence is only tested on iterations past it.
    pub fn min_iterations(&self) -> usize {
        (self.max_iterations as f64 * self.min_iteration_fraction).floor() as usize
    }
}

/// Initial conditions for an estimate: one state, or many whose spectra are averaged.
#[derive(Debug, Clone, Copy)]
pub enum InitialConditions<'a> {
    Single(&'a [f64]),
    Batch(&'a [Vec<f64>]),
}

impl<'a> InitialConditions<'a> {
    /// Builds the request from optional arguments. A batch takes precedence when
    /// both are supplied.
    pub fn from_options(
        single: Option<&'a [f64]>,
        batch: Option<&'a [Vec<f64>]>,
    ) -> LyapunovResult<Self> {
        match (single, batch) {
            (_, Some(batch)) => Ok(Self::Batch(batch)),
            (Some(single), None) => Ok(Self::Single(single)),
            (None, None) => Err(LyapunovError::InvalidInput(
                "Either a single initial condition or a batch of initial conditions must be provided."
                    .into(),
            )),
        }
    }
}

/// Estimates the spectrum for either kind of request.
pub fn estimate<M>(
    map: &M,
    conditions: InitialConditions<'_>,
    settings: &EstimatorSettings,
) -> LyapunovResult<Vec<f64>>
where
    M: TangentMap + Sync + ?Sized,
{
    match conditions {
        InitialConditions::Single(state) => estimate_single(map, state, settings),
        InitialConditions::Batch(states) => estimate_batch(map, states, settings),
    }
}

/// Lyapunov exponents of `map` along the orbit of `initial_state`, sorted ascending.
pub fn estimate_single<M>(
    map: &M,
    initial_state: &[f64],
    settings: &EstimatorSettings,
) -> LyapunovResult<Vec<f64>>
where
    M: TangentMap + ?Sized,
{
    settings.validate()?;
    check_initial_state(map, initial_state)?;
    run(map, initial_state, settings)
}

/// Coordinate-wise mean of the sorted spectra of every initial condition.
///
/// Runs are independent and execute in parallel when the `rayon` feature is
/// enabled. The first failing run fails the whole batch.
pub fn estimate_batch<M>(
    map: &M,
    initial_states: &[Vec<f64>],
    settings: &EstimatorSettings,
) -> LyapunovResult<Vec<f64>>
where
    M: TangentMap + Sync + ?Sized,
{
    settings.validate()?;
    if initial_states.is_empty() {
        return Err(LyapunovError::InvalidInput(
            "Batch of initial conditions is empty.".into(),
        ));
    }
    for state in initial_states {
        check_initial_state(map, state)?;
    }

    debug!(runs = initial_states.len(), "starting batch Lyapunov estimation");

    #[cfg(feature = "rayon")]
    let spectra = initial_states
        .par_iter()
        .map(|state| run(map, state, settings))
        .collect::<LyapunovResult<Vec<_>>>()?;
    #[cfg(not(feature = "rayon"))]
    let spectra = initial_states
        .iter()
        .map(|state| run(map, state, settings))
        .collect::<LyapunovResult<Vec<_>>>()?;

    let mut mean = vec![0.0; map.dimension()];
    for spectrum in &spectra {
        for (acc, value) in mean.iter_mut().zip(spectrum) {
            *acc += value;
        }
    }
    let count = spectra.len() as f64;
    for acc in &mut mean {
        *acc /= count;
    }

    debug!(runs = spectra.len(), exponents = ?mean, "batch Lyapunov estimation finished");
    Ok(mean)
}

fn check_initial_state<M: TangentMap + ?Sized>(map: &M, state: &[f64]) -> LyapunovResult<()> {
    if state.is_empty() {
        return Err(LyapunovError::InvalidInput(
            "Initial state must have positive dimension.".into(),
        ));
    }
    if state.len() != map.dimension() {
        return Err(LyapunovError::InvalidInput(format!(
            "Initial state dimension mismatch. Expected {}, got {}.",
            map.dimension(),
            state.len()
        )));
    }
    if state.iter().any(|v| !v.is_finite()) {
        return Err(LyapunovError::InvalidInput(format!(
            "Initial state must be finite (got {state:?})."
        )));
    }
    Ok(())
}

fn run<M: TangentMap + ?Sized>(
    map: &M,
    initial_state: &[f64],
    settings: &EstimatorSettings,
) -> LyapunovResult<Vec<f64>> {
    let dim = initial_state.len();
    let min_iterations = settings.min_iterations();

    let mut state = DVector::from_column_slice(initial_state);
    let mut frame = DMatrix::<f64>::identity(dim, dim);
    let mut log_growth = DVector::<f64>::zeros(dim);
    let mut previous: Option<DVector<f64>> = None;

    for iteration in 0..settings.max_iterations {
        let image = map.evaluate(&state, &frame)?;
        if image.state.len() != dim || image.tangent.shape() != (dim, dim) {
            return Err(anyhow!(
                "Map evaluator returned state of length {} and tangent of shape {:?}; expected {} and ({dim}, {dim}).",
                image.state.len(),
                image.tangent.shape(),
                dim
            )
            .into());
        }

        let orthogonal = orthogonalize_columns(image.tangent);
        let norms = column_norms(&orthogonal);
        if norms.iter().any(|n| !(n.is_finite() && *n > 0.0)) {
            warn!(iteration, initial_state = ?initial_state, "tangent frame degenerated");
            return Err(LyapunovError::DegenerateFrame {
                iteration,
                initial_condition: initial_state.to_vec(),
            });
        }

        let next_growth = &log_growth + norms.map(f64::ln);
        let estimate = next_growth.unscale((iteration + 1) as f64);

        let converged = iteration > min_iterations
            && previous
                .as_ref()
                .is_some_and(|prev| (&estimate - prev).norm() < settings.tolerance);
        if converged {
            let exponents = sorted_ascending(&estimate);
            debug!(
                iterations = iteration + 1,
                exponents = ?exponents,
                "Lyapunov estimate converged"
            );
            return Ok(exponents);
        }

        frame = normalize_columns(orthogonal);
        state = image.state;
        log_growth = next_growth;
        previous = Some(estimate);
    }

    warn!(
        initial_state = ?initial_state,
        max_iterations = settings.max_iterations,
        "Lyapunov estimate exhausted its iteration budget"
    );
    Err(LyapunovError::NonConvergence {
        initial_condition: initial_state.to_vec(),
        settings: *settings,
    })
}

/// Gram-Schmidt via QR: returns `Q · diag(diag(R))`.
///
/// The columns are mutually orthogonal and column j keeps the length of the
/// component of `a`'s column j orthogonal to the columns before it.
pub fn orthogonalize_columns(a: DMatrix<f64>) -> DMatrix<f64> {
    let (q, r) = QR::new(a).unpack();
    q * DMatrix::from_diagonal(&r.diagonal())
}

pub fn column_norms(a: &DMatrix<f64>) -> DVector<f64> {
    DVector::from_iterator(a.ncols(), a.column_iter().map(|column| column.norm()))
}

pub fn normalize_columns(mut a: DMatrix<f64>) -> DMatrix<f64> {
    for mut column in a.column_iter_mut() {
        let norm = column.norm();
        column.unscale_mut(norm);
    }
    a
}

fn sorted_ascending(values: &DVector<f64>) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().collect();
    sorted.sort_by(f64::total_cmp);
    sorted
}

/// Kaplan-Yorke (Lyapunov) dimension of a spectrum given in any order.
pub fn kaplan_yorke(exponents: &[f64]) -> f64 {
    let mut descending = exponents.to_vec();
    descending.sort_by(|a, b| b.total_cmp(a));

    let mut partial = 0.0;
    for (k, &lambda) in descending.iter().enumerate() {
        if partial + lambda < 0.0 {
            return k as f64 + partial / lambda.abs();
        }
        partial += lambda;
    }
    descending.len() as f64
}
