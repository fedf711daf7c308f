//! Canonical systems with known Lyapunov spectra.

use crate::{
    maps::{check_shapes, FlowMap, FlowSettings},
    traits::{lift, DynamicalSystem, Scalar, TangentImage, TangentMap},
};
use anyhow::Result;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Hénon map (x, y) ↦ (a − x² + b·y, x).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Henon {
    pub a: f64,
    pub b: f64,
}

impl Default for Henon {
    fn default() -> Self {
        Self { a: 1.4, b: 0.3 }
    }
}

impl Henon {
    /// The Jacobian determinant is −b everywhere, so the exponents sum to ln|b|.
    pub fn area_contraction_rate(&self) -> f64 {
        self.b.abs().ln()
    }

    pub fn jacobian(&self, x: f64) -> DMatrix<f64> {
        DMatrix::from_row_slice(2, 2, &[-2.0 * x, self.b, 1.0, 0.0])
    }
}

impl<T: Scalar> DynamicalSystem<T> for Henon {
    fn dimension(&self) -> usize {
        2
    }

    fn apply(&self, _t: T, x: &[T], out: &mut [T]) {
        let a = lift::<T>(self.a);
        let b = lift::<T>(self.b);
        out[0] = a - x[0] * x[0] + b * x[1];
        out[1] = x[0];
    }
}

impl TangentMap for Henon {
    fn dimension(&self) -> usize {
        2
    }

    fn evaluate(&self, state: &DVector<f64>, tangent: &DMatrix<f64>) -> Result<TangentImage> {
        check_shapes(2, state, tangent)?;
        let (x, y) = (state[0], state[1]);
        Ok(TangentImage {
            state: DVector::from_vec(vec![self.a - x * x + self.b * y, x]),
            tangent: self.jacobian(x) * tangent,
        })
    }
}

/// Lorenz system x' = σ(y − x), y' = x(ρ − z) − y, z' = xy − βz.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Lorenz {
    pub sigma: f64,
    pub rho: f64,
    pub beta: f64,
}

impl Default for Lorenz {
    fn default() -> Self {
        Self {
            sigma: 10.0,
            rho: 28.0,
            beta: 8.0 / 3.0,
        }
    }
}

impl Lorenz {
    /// Divergence of the vector field; constant, so the exponents sum to it.
    pub fn trace(&self) -> f64 {
        -(self.sigma + 1.0 + self.beta)
    }

    /// The map advancing the flow by one unit of time.
    pub fn unit_time_map(self, step_hint: f64) -> Result<FlowMap<Self>> {
        FlowMap::new(
            self,
            FlowSettings {
                horizon: 1.0,
                step_hint,
                ..FlowSettings::default()
            },
        )
    }
}

impl<T: Scalar> DynamicalSystem<T> for Lorenz {
    fn dimension(&self) -> usize {
        3
    }

    fn apply(&self, _t: T, x: &[T], out: &mut [T]) {
        let sigma = lift::<T>(self.sigma);
        let rho = lift::<T>(self.rho);
        let beta = lift::<T>(self.beta);
        out[0] = sigma * (x[1] - x[0]);
        out[1] = x[0] * (rho - x[2]) - x[1];
        out[2] = x[0] * x[1] - beta * x[2];
    }
}

#[cfg(test)]
mod tests {
    use super::{Henon, Lorenz};
    use crate::autodiff::jacobian;
    use crate::maps::IteratedMap;
    use crate::traits::TangentMap;
    use nalgebra::{DMatrix, DVector};

    #[test]
    fn henon_closed_form_agrees_with_dual_jacobian() {
        let henon = Henon::default();
        let generic = IteratedMap::new(henon);
        let state = DVector::from_vec(vec![0.3, -0.7]);
        let tangent = DMatrix::from_row_slice(2, 2, &[0.6, -0.8, 0.8, 0.6]);

        let closed = henon.evaluate(&state, &tangent).expect("closed form");
        let dual = generic.evaluate(&state, &tangent).expect("dual form");
        assert!((&closed.state - &dual.state).amax() < 1e-15);
        assert!((&closed.tangent - &dual.tangent).amax() < 1e-15);
        assert!((closed.state[0] - (1.4 - 0.09 - 0.21)).abs() < 1e-15);
        assert_eq!(closed.state[1], 0.3);
    }

    #[test]
    fn henon_jacobian_determinant_is_constant() {
        let henon = Henon { a: 1.2, b: -0.4 };
        for x in [-1.0, 0.0, 0.5, 2.0] {
            let det = henon.jacobian(x).determinant();
            assert!((det.abs().ln() - henon.area_contraction_rate()).abs() < 1e-12);
        }
    }

    #[test]
    fn lorenz_dual_jacobian_matches_closed_form() {
        let lorenz = Lorenz::default();
        let x = [-5.76, 2.27, 32.82];
        let jac = jacobian(&lorenz, 0.0, &x);
        let expected = DMatrix::from_row_slice(
            3,
            3,
            &[
                -10.0,
                10.0,
                0.0,
                28.0 - x[2],
                -1.0,
                -x[0],
                x[1],
                x[0],
                -8.0 / 3.0,
            ],
        );
        assert!((jac - expected).amax() < 1e-12);
    }

    #[test]
    fn lorenz_unit_time_map_preserves_liouville_volume_rate() {
        let lorenz = Lorenz::default();
        let map = lorenz.unit_time_map(0.01).expect("valid step hint");
        assert_eq!(map.dimension(), 3);

        let state = DVector::from_vec(vec![-5.76, 2.27, 32.82]);
        let image = map
            .evaluate(&state, &DMatrix::identity(3, 3))
            .expect("flow should integrate");
        let log_det = image.tangent.determinant().abs().ln();
        assert!((log_det - lorenz.trace()).abs() < 1e-4);
        assert!(image.state.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn lorenz_unit_time_map_rejects_bad_step_hint() {
        assert!(Lorenz::default().unit_time_map(-1.0).is_err());
    }

    #[test]
    fn parameters_deserialize_with_canonical_defaults() {
        let henon: Henon = serde_json::from_str(r#"{ "a": 1.0 }"#).expect("valid json");
        assert_eq!(henon, Henon { a: 1.0, b: 0.3 });
        let lorenz: Lorenz = serde_json::from_str("{}").expect("valid json");
        assert_eq!(lorenz, Lorenz::default());
    }
}
