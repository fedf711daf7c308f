//! The `lyapunov_core` crate estimates Lyapunov spectra of maps and flows.
//!
//! Key components:
//! - **Traits**: `Scalar`, `DynamicalSystem` (ODEs/Maps), `Steppable` (Solvers) and
//!   `TangentMap`, the map-plus-differential contract consumed by the estimator.
//! - **Autodiff**: Dual numbers, dual-number Jacobians and the variational system.
//! - **Solvers**: Fixed-step explicit Runge-Kutta integrators (RK4, Tsit5).
//! - **Maps**: `IteratedMap` and `FlowMap`, adapting systems into tangent maps.
//! - **Systems**: The Hénon map and the Lorenz flow.
//! - **Analysis**: The discrete QR estimator, single and batch.
pub mod analysis;
pub mod autodiff;
pub mod error;
pub mod maps;
pub mod solvers;
pub mod systems;
pub mod traits;

pub use analysis::{
    estimate, estimate_batch, estimate_single, kaplan_yorke, EstimatorSettings, InitialConditions,
};
pub use error::{LyapunovError, LyapunovResult};
pub use maps::{FlowMap, FlowSettings, IteratedMap};
pub use systems::{Henon, Lorenz};
pub use traits::{TangentImage, TangentMap};
