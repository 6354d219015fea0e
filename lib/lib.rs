#![allow(non_snake_case)]

//! Contraction routines for matrix product states (MPSs) sandwiching a matrix
//! product operator (MPO).
//!
//! The central object is the *boundary* (or *environment*) tensor, which
//! summarizes every site that has already been folded into a partial
//! contraction of the network
//!
//! ```text
//!   B[0]* ---- B[1]* ---- ... ---- B[n-1]*     <- bra (conjugated)
//!    |          |                   |
//!   W[0] ----- W[1] ----- ... ---- W[n-1]      <- operator
//!    |          |                   |
//!   A[0] ----- A[1] ----- ... ---- A[n-1]      <- ket
//! ```
//!
//! Sweeping a boundary from one end of the chain to the other reduces the
//! whole network to a single number, `⟨χ|W|ψ⟩`. Boundaries stopped partway
//! through the chain are the building blocks of local effective operators for
//! DMRG-style optimization.
//!
//! # Example
//!
//! ```
//! use ndarray as nd;
//! use num_complex::Complex64 as C64;
//! use num_traits::{ One, Zero };
//! use mpo_contract::{ mps::MPS, mpo::MPO, contract::operator_inner_product };
//!
//! // |ψ⟩ = |0⟩ on a single qubit
//! let psi: MPS<C64>
//!     = MPS::from_site_states(vec![vec![C64::one(), C64::zero()]]).unwrap();
//! // Pauli Z as a one-site MPO
//! let mut z: nd::Array4<C64> = nd::Array::zeros((2, 2, 1, 1));
//! z[[0, 0, 0, 0]] = C64::one();
//! z[[1, 1, 0, 0]] = -C64::one();
//! let op: MPO<C64> = MPO::from_tensors(vec![z]).unwrap();
//!
//! let ev = operator_inner_product(&psi, &op, &psi).unwrap();
//! assert!((ev - C64::one()).norm() < 1e-12);
//! ```

use nalgebra as na;
use ndarray as nd;
use num_complex::{ ComplexFloat, Complex };
use num_traits::{ Float, NumCast, Zero };

pub mod tensor;
pub mod mps;
pub mod mpo;
pub mod contract;
pub mod pool;

/// Extension trait for [`ComplexFloat`].
pub trait ComplexFloatExt: ComplexFloat {
    /// Convert from `Self::Real`.
    ///
    /// Should adhere to the usual relationship between ordinary complex and
    /// real numbers, i.e. the result should have imaginary part equal to zero.
    fn from_re(x: Self::Real) -> Self;
}

impl<T> ComplexFloatExt for Complex<T>
where
    Complex<T>: ComplexFloat<Real = T>,
    T: Zero + Float,
{
    fn from_re(x: Self::Real) -> Self {
        Self { re: x, im: <Self::Real as Zero>::zero() }
    }
}

macro_rules! impl_complexfloatext_real {
    ( $( $t:ty ),* $(,)? ) => {
        $(
            impl ComplexFloatExt for $t {
                fn from_re(x: $t) -> Self { x }
            }
        )*
    }
}
impl_complexfloatext_real!(f32, f64);

// NOTE: ComplexFloat and na::ComplexField share many method names (abs, sqrt,
// powi, ...); call these through the trait explicitly to avoid ambiguity

/// Convenience trait to identify real or complex number types that can be used
/// as tensor elements throughout the crate.
///
/// Implemented automatically for `f32`, `f64`, `Complex32`, and `Complex64`.
pub trait ComplexScalar
where
    Self:
        ComplexFloat<Real = Self::Re>
        + ComplexFloatExt
        + na::ComplexField<RealField = Self::Re>
        + nd::LinalgScalar
        + Send
        + Sync
{
    /// Type for associated real values.
    type Re: Float + na::RealField;
}

impl<A> ComplexScalar for A
where
    A:
        ComplexFloat<Real = <A as na::ComplexField>::RealField>
        + ComplexFloatExt
        + na::ComplexField
        + nd::LinalgScalar
        + Send
        + Sync,
    <A as na::ComplexField>::RealField: Float,
{
    type Re = <A as na::ComplexField>::RealField;
}

/// Return `1 / sqrt(n)` as an element of `A`, or `None` if `n` cannot be
/// represented in the real type.
pub(crate) fn inv_sqrt_count<A>(n: usize) -> Option<A>
where A: ComplexScalar
{
    let n: A::Re = <A::Re as NumCast>::from(n)?;
    Some(A::from_re(Float::recip(Float::sqrt(n))))
}
