use anyhow::Result;
use nalgebra::{DMatrix, DVector};
use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars in our dynamical systems.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// Lifts an `f64` constant (a system coefficient, a tableau weight) into `T`.
pub fn lift<T: Scalar>(value: f64) -> T {
    T::from_f64(value).unwrap_or_else(T::nan)
}

/// Represents a dynamical system (Flow or Map).
pub trait DynamicalSystem<T: Scalar> {
    /// Returns the dimension of the state space.
    fn dimension(&self) -> usize;

    /// Evaluates the vector field (flow) or map function.
    /// x: current state
    /// t: current time
    /// out: buffer to write the result (dx/dt or x_{n+1})
    fn apply(&self, t: T, x: &[T], out: &mut [T]);
}

/// A trait for solvers that can step a system forward.
pub trait Steppable<T: Scalar> {
    /// Performs one step of size dt.
    /// t: current time (updated after step)
    /// state: current state (updated after step)
    /// dt: step size
    fn step(&mut self, system: &impl DynamicalSystem<T>, t: &mut T, state: &mut [T], dt: T);
}

/// Result of one evaluation of a [`TangentMap`].
#[derive(Debug, Clone, PartialEq)]
pub struct TangentImage {
    /// Image of the state under the map.
    pub state: DVector<f64>,
    /// Differential of the map at the input state applied to each input column.
    pub tangent: DMatrix<f64>,
}

/// One forward step of a map together with the action of its differential.
///
/// Implementations must be pure: the same `(state, tangent)` pair always yields the
/// same image, and the columns of `tangent` are transported independently of each
/// other. The tangent matrix is not required to be orthonormal on input.
pub trait TangentMap {
    /// Phase-space dimension n.
    fn dimension(&self) -> usize;

    /// Returns `(f(x), Df(x) · W)` for `x = state`, `W = tangent`.
    fn evaluate(&self, state: &DVector<f64>, tangent: &DMatrix<f64>) -> Result<TangentImage>;
}
