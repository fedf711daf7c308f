//! Adapters turning a [`DynamicalSystem`] into a [`TangentMap`].
//!
//! Jacobians come from dual-number evaluation of the system, so a system only has
//! to implement `DynamicalSystem<T>` generically over [`Scalar`](crate::traits::Scalar).

use crate::{
    autodiff::{jacobian, Dual, VariationalSystem},
    solvers::{integrate, step_count, Integrator},
    traits::{DynamicalSystem, TangentImage, TangentMap},
};
use anyhow::{bail, Context, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// How a flow is advanced between two evaluations of its time-`horizon` map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowSettings {
    pub horizon: f64,
    pub step_hint: f64,
    pub integrator: Integrator,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            horizon: 1.0,
            step_hint: 0.01,
            integrator: Integrator::Tsit5,
        }
    }
}

impl FlowSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.horizon.is_finite() && self.horizon > 0.0) {
            bail!("Flow horizon must be positive and finite (got {}).", self.horizon);
        }
        step_count(self.horizon, self.step_hint)?;
        Ok(())
    }
}

pub(crate) fn check_shapes(dim: usize, state: &DVector<f64>, tangent: &DMatrix<f64>) -> Result<()> {
    if state.len() != dim {
        bail!(
            "State dimension mismatch. Expected {}, got {}.",
            dim,
            state.len()
        );
    }
    if tangent.nrows() != dim {
        bail!(
            "Tangent matrix must have {} rows, got {}.",
            dim,
            tangent.nrows()
        );
    }
    Ok(())
}

/// A discrete map x_{n+1} = f(x_n).
#[derive(Debug, Clone)]
pub struct IteratedMap<S> {
    pub system: S,
}

impl<S> IteratedMap<S> {
    pub fn new(system: S) -> Self {
        Self { system }
    }
}

impl<S> TangentMap for IteratedMap<S>
where
    S: DynamicalSystem<f64> + DynamicalSystem<Dual>,
{
    fn dimension(&self) -> usize {
        DynamicalSystem::<f64>::dimension(&self.system)
    }

    fn evaluate(&self, state: &DVector<f64>, tangent: &DMatrix<f64>) -> Result<TangentImage> {
        let dim = self.dimension();
        check_shapes(dim, state, tangent)?;

        let mut next = DVector::<f64>::zeros(dim);
        self.system.apply(0.0, state.as_slice(), next.as_mut_slice());
        let jac = jacobian(&self.system, 0.0, state.as_slice());

        Ok(TangentImage {
            state: next,
            tangent: jac * tangent,
        })
    }
}

/// Time-`horizon` map of an autonomous flow x' = f(x).
///
/// The tangent image is obtained by integrating the variational equation
/// Φ' = J(x(t)) Φ alongside the state, starting from Φ(0) = W.
#[derive(Debug, Clone)]
pub struct FlowMap<S> {
    pub system: S,
    settings: FlowSettings,
}

impl<S> FlowMap<S> {
    pub fn new(system: S, settings: FlowSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { system, settings })
    }

    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }
}

impl<S> TangentMap for FlowMap<S>
where
    S: DynamicalSystem<f64> + DynamicalSystem<Dual>,
{
    fn dimension(&self) -> usize {
        DynamicalSystem::<f64>::dimension(&self.system)
    }

    fn evaluate(&self, state: &DVector<f64>, tangent: &DMatrix<f64>) -> Result<TangentImage> {
        let dim = self.dimension();
        check_shapes(dim, state, tangent)?;

        let variational = VariationalSystem::new(&self.system, dim, tangent.ncols());
        let mut packed = VariationalSystem::<S>::pack(state, tangent);
        integrate(
            &variational,
            self.settings.integrator,
            &mut packed,
            0.0,
            self.settings.horizon,
            self.settings.step_hint,
        )
        .with_context(|| format!("Flow map evaluation failed from state {:?}.", state.as_slice()))?;

        let (state, tangent) = variational.unpack(&packed);
        Ok(TangentImage { state, tangent })
    }
}
