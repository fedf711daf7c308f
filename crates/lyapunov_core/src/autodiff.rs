use crate::traits::DynamicalSystem;
use nalgebra::{DMatrix, DVector};
use num_traits::{Float, FromPrimitive, Num, NumCast, One, ToPrimitive, Zero};
use std::f64::consts::{LN_10, LN_2};
use std::ops::{
    Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Rem, RemAssign, Sub, SubAssign,
};

/// Dual number for forward-mode differentiation.
/// val: real part
/// eps: infinitesimal part (directional derivative)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Dual {
    pub val: f64,
    pub eps: f64,
}

impl Dual {
    pub fn new(val: f64, eps: f64) -> Self {
        Self { val, eps }
    }

    pub fn constant(val: f64) -> Self {
        Self::new(val, 0.0)
    }
}

impl Zero for Dual {
    fn zero() -> Self {
        Self::constant(0.0)
    }
    fn is_zero(&self) -> bool {
        self.val == 0.0 && self.eps == 0.0
    }
}

impl One for Dual {
    fn one() -> Self {
        Self::constant(1.0)
    }
}

impl Add for Dual {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.val + rhs.val, self.eps + rhs.eps)
    }
}

impl Sub for Dual {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.val - rhs.val, self.eps - rhs.eps)
    }
}

impl Mul for Dual {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(self.val * rhs.val, self.val * rhs.eps + self.eps * rhs.val)
    }
}

impl Div for Dual {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        Self::new(
            self.val / rhs.val,
            (self.eps * rhs.val - self.val * rhs.eps) / (rhs.val * rhs.val),
        )
    }
}

impl Rem for Dual {
    type Output = Self;
    fn rem(self, rhs: Self) -> Self {
        // a % b = a - b * trunc(a / b); trunc is locally constant.
        let quotient = (self.val / rhs.val).trunc();
        Self::new(self.val % rhs.val, self.eps - rhs.eps * quotient)
    }
}

impl Neg for Dual {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.val, -self.eps)
    }
}

macro_rules! assign_via_binary {
    ($($trait:ident :: $method:ident => $op:tt),* $(,)?) => {
        $(
            impl $trait for Dual {
                fn $method(&mut self, rhs: Self) {
                    *self = *self $op rhs;
                }
            }
        )*
    };
}

assign_via_binary!(
    AddAssign::add_assign => +,
    SubAssign::sub_assign => -,
    MulAssign::mul_assign => *,
    DivAssign::div_assign => /,
    RemAssign::rem_assign => %,
);

impl Num for Dual {
    type FromStrRadixErr = ();
    fn from_str_radix(str: &str, radix: u32) -> Result<Self, Self::FromStrRadixErr> {
        f64::from_str_radix(str, radix)
            .map(Self::constant)
            .map_err(|_| ())
    }
}

impl ToPrimitive for Dual {
    fn to_i64(&self) -> Option<i64> {
        self.val.to_i64()
    }
    fn to_u64(&self) -> Option<u64> {
        self.val.to_u64()
    }
    fn to_f64(&self) -> Option<f64> {
        Some(self.val)
    }
}

impl FromPrimitive for Dual {
    fn from_i64(n: i64) -> Option<Self> {
        Some(Self::constant(n as f64))
    }
    fn from_u64(n: u64) -> Option<Self> {
        Some(Self::constant(n as f64))
    }
    fn from_f64(n: f64) -> Option<Self> {
        Some(Self::constant(n))
    }
}

impl NumCast for Dual {
    fn from<T: ToPrimitive>(n: T) -> Option<Self> {
        n.to_f64().map(Self::constant)
    }
}

/// Unary functions `f` with `f(val) ± eps * f'(val)`; `$d` is `f'` written in terms of `$v`.
macro_rules! chain_rule {
    ($($name:ident => |$v:ident| $d:expr),* $(,)?) => {
        $(
            fn $name(self) -> Self {
                let $v = self.val;
                Self::new($v.$name(), $d * self.eps)
            }
        )*
    };
}

impl Float for Dual {
    fn nan() -> Self {
        Self::constant(f64::NAN)
    }
    fn infinity() -> Self {
        Self::constant(f64::INFINITY)
    }
    fn neg_infinity() -> Self {
        Self::constant(f64::NEG_INFINITY)
    }
    fn neg_zero() -> Self {
        Self::new(-0.0, -0.0)
    }
    fn min_value() -> Self {
        Self::constant(f64::MIN)
    }
    fn min_positive_value() -> Self {
        Self::constant(f64::MIN_POSITIVE)
    }
    fn max_value() -> Self {
        Self::constant(f64::MAX)
    }
    fn is_nan(self) -> bool {
        self.val.is_nan()
    }
    fn is_infinite(self) -> bool {
        self.val.is_infinite()
    }
    fn is_finite(self) -> bool {
        self.val.is_finite()
    }
    fn is_normal(self) -> bool {
        self.val.is_normal()
    }
    fn classify(self) -> std::num::FpCategory {
        self.val.classify()
    }
    fn is_sign_positive(self) -> bool {
        self.val.is_sign_positive()
    }
    fn is_sign_negative(self) -> bool {
        self.val.is_sign_negative()
    }
    fn integer_decode(self) -> (u64, i16, i8) {
        self.val.integer_decode()
    }

    chain_rule!(
        floor => |_v| 0.0,
        ceil => |_v| 0.0,
        round => |_v| 0.0,
        trunc => |_v| 0.0,
        signum => |_v| 0.0,
        fract => |_v| 1.0,
        sqrt => |v| 0.5 / v.sqrt(),
        cbrt => |v| 1.0 / (3.0 * v.cbrt().powi(2)),
        exp => |v| v.exp(),
        exp2 => |v| v.exp2() * LN_2,
        exp_m1 => |v| v.exp(),
        ln => |v| 1.0 / v,
        ln_1p => |v| 1.0 / (1.0 + v),
        log2 => |v| 1.0 / (v * LN_2),
        log10 => |v| 1.0 / (v * LN_10),
        sin => |v| v.cos(),
        cos => |v| -v.sin(),
        tan => |v| 1.0 + v.tan().powi(2),
        asin => |v| 1.0 / (1.0 - v * v).sqrt(),
        acos => |v| -1.0 / (1.0 - v * v).sqrt(),
        atan => |v| 1.0 / (1.0 + v * v),
        sinh => |v| v.cosh(),
        cosh => |v| v.sinh(),
        tanh => |v| 1.0 - v.tanh().powi(2),
        asinh => |v| 1.0 / (v * v + 1.0).sqrt(),
        acosh => |v| 1.0 / (v * v - 1.0).sqrt(),
        atanh => |v| 1.0 / (1.0 - v * v),
    );

    fn abs(self) -> Self {
        if self.val >= 0.0 {
            self
        } else {
            -self
        }
    }

    fn mul_add(self, a: Self, b: Self) -> Self {
        self * a + b
    }

    fn recip(self) -> Self {
        Self::one() / self
    }

    fn powi(self, n: i32) -> Self {
        Self::new(
            self.val.powi(n),
            n as f64 * self.val.powi(n - 1) * self.eps,
        )
    }

    fn powf(self, n: Self) -> Self {
        let value = self.val.powf(n.val);
        if n.eps == 0.0 {
            // Constant exponent: avoid ln(val) so negative bases stay finite.
            return Self::new(value, n.val * self.val.powf(n.val - 1.0) * self.eps);
        }
        Self::new(
            value,
            value * (n.eps * self.val.ln() + n.val * self.eps / self.val),
        )
    }

    fn log(self, base: Self) -> Self {
        self.ln() / base.ln()
    }

    fn max(self, other: Self) -> Self {
        if self.val > other.val {
            self
        } else {
            other
        }
    }

    fn min(self, other: Self) -> Self {
        if self.val < other.val {
            self
        } else {
            other
        }
    }

    fn abs_sub(self, other: Self) -> Self {
        if self.val > other.val {
            self - other
        } else {
            Self::zero()
        }
    }

    fn hypot(self, other: Self) -> Self {
        let h = self.val.hypot(other.val);
        Self::new(h, (self.val * self.eps + other.val * other.eps) / h)
    }

    fn atan2(self, other: Self) -> Self {
        let denom = self.val * self.val + other.val * other.val;
        Self::new(
            self.val.atan2(other.val),
            (other.val * self.eps - self.val * other.eps) / denom,
        )
    }

    fn sin_cos(self) -> (Self, Self) {
        (self.sin(), self.cos())
    }
}

/// Jacobian of `system` at `(t, x)`, one dual evaluation per column.
pub fn jacobian<S>(system: &S, t: f64, x: &[f64]) -> DMatrix<f64>
where
    S: DynamicalSystem<Dual> + ?Sized,
{
    let n = x.len();
    let mut jac = DMatrix::zeros(n, n);
    let mut seeded = vec![Dual::zero(); n];
    let mut out = vec![Dual::zero(); n];
    let t_dual = Dual::constant(t);

    for j in 0..n {
        for (i, (slot, &value)) in seeded.iter_mut().zip(x).enumerate() {
            *slot = Dual::new(value, if i == j { 1.0 } else { 0.0 });
        }
        system.apply(t_dual, &seeded, &mut out);
        for (i, derivative) in out.iter().enumerate() {
            jac[(i, j)] = derivative.eps;
        }
    }
    jac
}

// --- Variational System ---

/// Flow of `x' = f(x)` stacked with `Φ' = J(x) Φ` for an n×k tangent matrix `Φ`.
///
/// Layout of the augmented state: `[x_0 .. x_{n-1}, Φ column-major]`, which is the
/// storage order of `DMatrix`, so packing is a plain slice copy.
pub struct VariationalSystem<'a, S> {
    inner: &'a S,
    dim: usize,
    columns: usize,
}

impl<'a, S> VariationalSystem<'a, S> {
    pub fn new(inner: &'a S, dim: usize, columns: usize) -> Self {
        Self {
            inner,
            dim,
            columns,
        }
    }

    pub fn pack(state: &DVector<f64>, tangent: &DMatrix<f64>) -> Vec<f64> {
        let mut packed = Vec::with_capacity(state.len() + tangent.len());
        packed.extend_from_slice(state.as_slice());
        packed.extend_from_slice(tangent.as_slice());
        packed
    }

    pub fn unpack(&self, packed: &[f64]) -> (DVector<f64>, DMatrix<f64>) {
        let (state, tangent) = packed.split_at(self.dim);
        (
            DVector::from_column_slice(state),
            DMatrix::from_column_slice(self.dim, self.columns, tangent),
        )
    }
}

impl<S> DynamicalSystem<f64> for VariationalSystem<'_, S>
where
    S: DynamicalSystem<f64> + DynamicalSystem<Dual>,
{
    fn dimension(&self) -> usize {
        self.dim + self.dim * self.columns
    }

    fn apply(&self, t: f64, x: &[f64], out: &mut [f64]) {
        let n = self.dim;
        let (state, phi) = x.split_at(n);
        let (state_rate, phi_rate) = out.split_at_mut(n);

        self.inner.apply(t, state, state_rate);

        let jac = jacobian(self.inner, t, state);
        let phi = DMatrix::from_column_slice(n, self.columns, phi);
        let product = jac * phi;
        phi_rate.copy_from_slice(product.as_slice());
    }
}

#[cfg(test)]
mod tests {
    use super::{jacobian, Dual, VariationalSystem};
    use crate::traits::{DynamicalSystem, Scalar};
    use nalgebra::{DMatrix, DVector};
    use num_traits::Float;

    struct Rotor;

    impl<T: Scalar> DynamicalSystem<T> for Rotor {
        fn dimension(&self) -> usize {
            2
        }

        fn apply(&self, _t: T, x: &[T], out: &mut [T]) {
            out[0] = x[0] * x[1];
            out[1] = x[0].sin() + x[1] * x[1];
        }
    }

    #[test]
    fn elementary_derivatives_follow_chain_rule() {
        let x = Dual::new(0.3, 1.0);
        assert!((x.sin().eps - 0.3_f64.cos()).abs() < 1e-15);
        assert!((x.atanh().eps - 1.0 / (1.0 - 0.09)).abs() < 1e-12);
        assert!((x.exp2().eps - 0.3_f64.exp2() * std::f64::consts::LN_2).abs() < 1e-12);

        let quotient = Dual::new(1.0, 1.0) / Dual::new(2.0, 0.0);
        assert_eq!(quotient, Dual::new(0.5, 0.5));

        let y = Dual::new(2.0, 0.0);
        let angle = x.atan2(y);
        assert!((angle.eps - 2.0 / (0.09 + 4.0)).abs() < 1e-12);
    }

    #[test]
    fn powi_scales_derivative_by_exponent() {
        let x = Dual::new(-1.5, 2.0);
        let cube = x.powi(3);
        assert_eq!(cube.val, -3.375);
        assert!((cube.eps - 3.0 * 2.25 * 2.0).abs() < 1e-12);
        let inverse = Dual::new(2.0, 1.0).powi(-1);
        assert!((inverse.eps + 0.25).abs() < 1e-15);
    }

    #[test]
    fn powf_with_constant_exponent_handles_negative_base() {
        let x = Dual::new(-2.0, 1.0);
        let cube = x.powf(Dual::constant(3.0));
        assert_eq!(cube.val, -8.0);
        assert!((cube.eps - 12.0).abs() < 1e-12);
    }

    #[test]
    fn jacobian_matches_hand_derivative() {
        let jac = jacobian(&Rotor, 0.0, &[0.5, 2.0]);
        let expected = DMatrix::from_row_slice(2, 2, &[2.0, 0.5, 0.5_f64.cos(), 4.0]);
        assert!((jac - expected).amax() < 1e-14);
    }

    #[test]
    fn variational_rate_is_jacobian_times_tangent() {
        let variational = VariationalSystem::new(&Rotor, 2, 2);
        assert_eq!(variational.dimension(), 6);

        let state = DVector::from_vec(vec![0.5, 2.0]);
        let tangent = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let packed = VariationalSystem::<Rotor>::pack(&state, &tangent);
        let mut rate = vec![0.0; packed.len()];
        variational.apply(0.0, &packed, &mut rate);

        let (state_rate, tangent_rate) = variational.unpack(&rate);
        assert!((state_rate[0] - 1.0).abs() < 1e-14);
        let expected = jacobian(&Rotor, 0.0, &[0.5, 2.0]) * tangent;
        assert!((tangent_rate - expected).amax() < 1e-14);
    }

    #[test]
    fn pack_then_unpack_preserves_rectangular_tangent() {
        let variational = VariationalSystem::new(&Rotor, 2, 1);
        let state = DVector::from_vec(vec![1.0, -1.0]);
        let tangent = DMatrix::from_column_slice(2, 1, &[0.25, 0.75]);
        let packed = VariationalSystem::<Rotor>::pack(&state, &tangent);
        assert_eq!(packed, vec![1.0, -1.0, 0.25, 0.75]);
        let (s, w) = variational.unpack(&packed);
        assert_eq!(s, state);
        assert_eq!(w, tangent);
    }
}
