//! Matrix product states stored as plain chains of rank-3 site tensors.
//!
//! Each site tensor carries axes `[left bond, physical, right bond]`:
//!
//! ```text
//!        .-bond 1-.       .-bond 2-.       .-bond n-1-.
//!        V        V       V        V       V          V
//! --- A[0] ----------- A[1] ----------- ... ---------- A[n-1] ---
//!  ^     |                |                               |     ^
//!  |     | <- physical    | <- physical                   |     |
//! bond 0      index 0          index 1                         bond n
//! ```
//!
//! Unlike a canonical (Γ/Λ) factorization, no gauge is imposed on the site
//! tensors here. Outer bonds 0 and *n* are usually trivial, but this is not
//! enforced at construction; operations that need it say so.

use std::fmt;
use itertools::Itertools;
use ndarray as nd;
use rand::{ Rng, distributions::{ Distribution, Standard } };
use thiserror::Error;
use crate::{ ComplexScalar, inv_sqrt_count, tensor::tensordot };

#[derive(Debug, Error)]
pub enum MPSError {
    /// Returned when neighboring site tensors disagree on the dimension of
    /// their shared bond.
    #[error("error in MPS creation: bond {bond} has dimension {left} on its left site but {right} on its right site")]
    BondMismatch { bond: usize, left: usize, right: usize },

    /// Returned when a site tensor has an axis of zero dimension.
    #[error("error in MPS creation: site {0} has a zero-dimensional axis")]
    ZeroDimAxis(usize),

    /// Returned when a list of bond dimensions has fewer than two entries.
    #[error("error in MPS creation: need at least two bond dimensions")]
    TooFewBonds,

    /// Returned when an operation requiring trivial outer bonds is applied to
    /// an MPS without them.
    #[error("error in MPS conversion: outer bonds must have dimension 1")]
    NontrivialOuterBond,

    /// Returned when converting an empty MPS to a state vector.
    #[error("error in MPS conversion: empty system")]
    EmptySystem,

    /// Returned when a tensor size cannot be represented in the real type.
    #[error("error in MPS creation: {0} is not representable as a real number")]
    RealConversion(usize),

    /// Returned by an internal contraction.
    #[error("contraction error: {0}")]
    Contract(#[from] crate::contract::ContractError),

    /// Returned when an internal reshape fails.
    #[error("array layout error: {0}")]
    Layout(#[from] nd::ShapeError),
}
use MPSError::*;
pub type MPSResult<T> = Result<T, MPSError>;

/// A matrix product (pure) state.
///
/// The state is an immutable, ordered chain of site tensors with validated
/// bond dimensions. Contraction routines in [`contract`][crate::contract]
/// borrow it read-only.
#[derive(Clone, Debug, PartialEq)]
pub struct MPS<A> {
    // Tensors for each particle. Array `k` has axis signature
    //   [ u{k}, s{k}, u{k + 1} ]
    // where `u{j}` is an MPS bond index and `s{j}` is a physical index.
    pub(crate) data: Vec<nd::Array3<A>>,
}

impl<A> MPS<A> {
    /// Create from a list of site tensors.
    ///
    /// Fails if any two neighboring tensors disagree on their shared bond
    /// dimension or if any tensor has a zero-dimensional axis. An empty list is
    /// allowed.
    pub fn from_tensors(data: Vec<nd::Array3<A>>) -> MPSResult<Self> {
        if let Some(k) = data.iter().position(|a| a.shape().contains(&0)) {
            return Err(ZeroDimAxis(k));
        }
        for (k, (l, r)) in data.iter().tuple_windows().enumerate() {
            if l.shape()[2] != r.shape()[0] {
                return Err(BondMismatch {
                    bond: k + 1,
                    left: l.shape()[2],
                    right: r.shape()[0],
                });
            }
        }
        Ok(Self { data })
    }

    /// Return the number of sites.
    #[inline]
    pub fn nsites(&self) -> usize { self.data.len() }

    /// Return all virtual bond dimensions, including the two outer ones.
    ///
    /// Returns an empty list for an empty MPS.
    pub fn bond_dims(&self) -> Vec<usize> {
        match self.data.last() {
            None => Vec::new(),
            Some(last) => {
                self.data.iter()
                    .map(|a| a.shape()[0])
                    .chain(std::iter::once(last.shape()[2]))
                    .collect()
            },
        }
    }

    /// Return the dimension of each physical index.
    pub fn phys_dims(&self) -> Vec<usize> {
        self.data.iter().map(|a| a.shape()[1]).collect()
    }

    /// Return a reference to the `k`-th site tensor.
    ///
    /// *Panics* if `k` is out of bounds.
    #[inline]
    pub fn site(&self, k: usize) -> &nd::Array3<A> { &self.data[k] }

    /// Return an iterator over all site tensors, from left to right.
    #[inline]
    pub fn sites(&self) -> std::slice::Iter<'_, nd::Array3<A>> {
        self.data.iter()
    }

    /// Unwrap `self` into its site tensors.
    #[inline]
    pub fn into_tensors(self) -> Vec<nd::Array3<A>> { self.data }
}

impl<A> MPS<A>
where A: ComplexScalar
{
    /// Create a product state from the local state vector of each site.
    ///
    /// Every site tensor has shape `[1, d, 1]`, where `d` is the length of the
    /// corresponding vector. Vectors are not normalized.
    pub fn from_site_states<I, J>(states: I) -> MPSResult<Self>
    where
        I: IntoIterator<Item = J>,
        J: IntoIterator<Item = A>,
    {
        let data: Vec<nd::Array3<A>>
            = states.into_iter()
            .map(|state| {
                let v: nd::Array1<A> = state.into_iter().collect();
                let d = v.len();
                v.into_shape((1, d, 1))
            })
            .collect::<Result<_, _>>()?;
        Self::from_tensors(data)
    }

    /// Create a state with random entries.
    ///
    /// `bond_dims` lists all `n + 1` virtual bond dimensions of an `n`-site
    /// chain, outer bonds included, and every site has physical dimension `d`.
    /// Entries are drawn from `Standard` and scaled by `1 / sqrt(d D D')` for
    /// neighboring bonds `D` and `D'`.
    pub fn new_random<R>(d: usize, bond_dims: &[usize], rng: &mut R)
        -> MPSResult<Self>
    where
        R: Rng + ?Sized,
        Standard: Distribution<A>,
    {
        if bond_dims.len() < 2 { return Err(TooFewBonds); }
        let data: Vec<nd::Array3<A>>
            = bond_dims.iter().tuple_windows()
            .map(|(&dl, &dr)| -> MPSResult<nd::Array3<A>> {
                let count = d * dl * dr;
                let scale: A
                    = inv_sqrt_count(count).ok_or(RealConversion(count))?;
                Ok(nd::Array3::from_shape_simple_fn(
                    (dl, d, dr), || rng.sample::<A, _>(Standard) * scale))
            })
            .collect::<MPSResult<_>>()?;
        Self::from_tensors(data)
    }

    /// Contract all sites into a single state vector.
    ///
    /// Physical indices are ordered with site 0 most significant, i.e. the
    /// result is the Kronecker product ordering of the sites.
    ///
    /// Fails if the MPS is empty or its outer bonds are not trivial.
    pub fn as_vector(&self) -> MPSResult<nd::Array1<A>> {
        let first = self.data.first().ok_or(EmptySystem)?;
        let bonds = self.bond_dims();
        if bonds[0] != 1 || bonds[bonds.len() - 1] != 1 {
            return Err(NontrivialOuterBond);
        }
        let mut acc: nd::Array3<A> = first.as_standard_layout().into_owned();
        for a in self.data.iter().skip(1) {
            let (l, s, _) = acc.dim();
            let (_, s_next, r) = a.dim();
            // [l, s, s_next, r]
            acc = tensordot(&acc, a, &[2], &[0])?
                .into_shape((l, s * s_next, r))?;
        }
        let len = acc.len();
        Ok(acc.into_shape(len)?)
    }

    /// Compute the squared norm ⟨ψ|ψ⟩ of the state.
    pub fn norm_sqr(&self) -> MPSResult<A::Re> {
        let nrm = crate::contract::overlap(self, self)?;
        Ok(num_complex::ComplexFloat::re(nrm))
    }
}

impl<A> fmt::Display for MPS<A>
where A: fmt::Display
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "MPS {{ nsites: {}, bond_dims: [{}] }}",
            self.nsites(), self.bond_dims().iter().join(", "))?;
        for (k, a) in self.data.iter().enumerate() {
            let sh = a.shape();
            writeln!(f, "A[{}] :: {{ <{}>, s{}<{}>, <{}> }}",
                k, sh[0], k, sh[1], sh[2])?;
            fmt::Display::fmt(a, f)?;
            writeln!(f)?;
        }
        Ok(())
    }
}
