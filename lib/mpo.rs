//! Matrix product operators stored as chains of rank-4 site tensors.
//!
//! Each site tensor carries axes `[physical out, physical in, left bond, right
//! bond]`:
//!
//! ```text
//!         | <- out          | <- out               | <- out
//!  --- W[0] ---------- W[1] ---------- ... ---- W[n-1] ---
//!         | <- in           | <- in                | <- in
//! ```
//!
//! Besides the chain itself, this module provides construction from sums of
//! local operator products ([`MPO::from_opchains`]) and the usual MPO algebra:
//! direct sums ([`MPO::add_scaled`]), composition along the physical dimension
//! ([`MPO::compose`]), conversion to a full matrix ([`MPO::as_matrix`]), and
//! QR-based orthonormalization ([`MPO::orthonormalize`]).

use std::fmt;
use itertools::Itertools;
use log::debug;
use nalgebra as na;
use ndarray as nd;
use num_complex::ComplexFloat;
use num_traits::{ Float, Zero };
use rand::{ Rng, distributions::{ Distribution, Standard } };
use thiserror::Error;
use crate::{
    ComplexScalar,
    contract::ContractError,
    inv_sqrt_count,
    tensor::{ fix_rank, permute_owned, tensordot },
};

#[derive(Debug, Error)]
pub enum MPOError {
    /// Returned when neighboring site tensors disagree on the dimension of
    /// their shared bond.
    #[error("error in MPO creation: bond {bond} has dimension {left} on its left site but {right} on its right site")]
    BondMismatch { bond: usize, left: usize, right: usize },

    /// Returned when a site tensor has an axis of zero dimension.
    #[error("error in MPO creation: site {0} has a zero-dimensional axis")]
    ZeroDimAxis(usize),

    /// Returned when a list of bond dimensions has fewer than two entries.
    #[error("error in MPO creation: need at least two bond dimensions")]
    TooFewBonds,

    /// Returned when combining two MPOs with different numbers of sites.
    #[error("error in MPO algebra: site count mismatch ({0} vs {1})")]
    SiteCountMismatch(usize, usize),

    /// Returned when combining two MPOs whose physical dimensions disagree at
    /// some site.
    #[error("error in MPO algebra: physical dimension mismatch at site {0}")]
    PhysicalMismatch(usize),

    /// Returned when adding two MPOs whose outer bonds disagree.
    #[error("error in MPO algebra: outer bond dimensions must agree")]
    OuterBondMismatch,

    /// Returned when an operation requiring trivial outer bonds is applied to
    /// an MPO without them.
    #[error("error in MPO conversion: outer bonds must have dimension 1")]
    NontrivialOuterBond,

    /// Returned when converting an empty MPO to a matrix.
    #[error("error in MPO conversion: empty system")]
    EmptySystem,

    /// Returned when a tensor size cannot be represented in the real type.
    #[error("error in MPO creation: {0} is not representable as a real number")]
    RealConversion(usize),

    /// Returned when an operator chain extends past the last site.
    #[error("error in MPO creation: operator chain {chain} ends at site {iend}, but there are only {nsites} sites")]
    OpChainBounds { chain: usize, iend: usize, nsites: usize },

    /// Returned when an operator in a chain is not a square matrix of the
    /// physical dimension.
    #[error("error in MPO creation: operator {op} of chain {chain} has the wrong shape")]
    OpChainShape { chain: usize, op: usize },

    /// Returned by an internal contraction.
    #[error("contraction error: {0}")]
    Contract(#[from] ContractError),

    /// Returned when an internal reshape or concatenation fails.
    #[error("array layout error: {0}")]
    Layout(#[from] nd::ShapeError),
}
use MPOError::*;
pub type MPOResult<T> = Result<T, MPOError>;

/// Direction of an orthonormalization sweep.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Orthonormalize {
    /// Sweep from left to right, leaving every site tensor but the last
    /// left-orthonormal.
    Left,
    /// Sweep from right to left, leaving every site tensor but the first
    /// right-orthonormal.
    Right,
}

/// A product of local operators acting on consecutive sites, starting at site
/// `istart`.
///
/// Sums of chains are turned into MPOs by [`MPO::from_opchains`].
#[derive(Clone, Debug, PartialEq)]
pub struct OpChain<A> {
    /// Local `d × d` operators, leftmost first.
    pub oplist: Vec<nd::Array2<A>>,
    /// Site acted on by the first operator.
    pub istart: usize,
}

impl<A> OpChain<A> {
    pub fn new(oplist: Vec<nd::Array2<A>>, istart: usize) -> Self {
        Self { oplist, istart }
    }

    /// Return the number of sites covered by the chain.
    #[inline]
    pub fn len(&self) -> usize { self.oplist.len() }

    #[inline]
    pub fn is_empty(&self) -> bool { self.oplist.is_empty() }

    /// Return one past the last site covered by the chain.
    #[inline]
    pub fn iend(&self) -> usize { self.istart + self.len() }
}

impl<A> OpChain<A>
where A: ComplexScalar
{
    // extend with identities through site `nsites - 1`
    fn pad_identities_right(&mut self, d: usize, nsites: usize) {
        let npad = nsites.saturating_sub(self.iend());
        self.oplist.extend((0..npad).map(|_| nd::Array2::eye(d)));
    }

    // extend with identities back to site 0
    fn pad_identities_left(&mut self, d: usize) {
        let mut oplist: Vec<nd::Array2<A>>
            = (0..self.istart).map(|_| nd::Array2::eye(d)).collect();
        oplist.append(&mut self.oplist);
        self.oplist = oplist;
        self.istart = 0;
    }
}

/// A matrix product operator.
///
/// Like [`MPS`][crate::mps::MPS], this is an ordered chain of site tensors with
/// validated bond dimensions.
#[derive(Clone, Debug, PartialEq)]
pub struct MPO<A> {
    // Tensors for each site. Array `k` has axis signature
    //   [ s{k}, s'{k}, u{k}, u{k + 1} ]
    // where `s{k}`, `s'{k}` are output and input physical indices, and `u{j}`
    // is an MPO bond index.
    pub(crate) data: Vec<nd::Array4<A>>,
}

impl<A> MPO<A> {
    /// Create from a list of site tensors.
    ///
    /// Fails if any two neighboring tensors disagree on their shared bond
    /// dimension or if any tensor has a zero-dimensional axis. An empty list is
    /// allowed.
    pub fn from_tensors(data: Vec<nd::Array4<A>>) -> MPOResult<Self> {
        if let Some(k) = data.iter().position(|w| w.shape().contains(&0)) {
            return Err(ZeroDimAxis(k));
        }
        for (k, (l, r)) in data.iter().tuple_windows().enumerate() {
            if l.shape()[3] != r.shape()[2] {
                return Err(BondMismatch {
                    bond: k + 1,
                    left: l.shape()[3],
                    right: r.shape()[2],
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
    /// Returns an empty list for an empty MPO.
    pub fn bond_dims(&self) -> Vec<usize> {
        match self.data.last() {
            None => Vec::new(),
            Some(last) => {
                self.data.iter()
                    .map(|w| w.shape()[2])
                    .chain(std::iter::once(last.shape()[3]))
                    .collect()
            },
        }
    }

    /// Return a reference to the `k`-th site tensor.
    ///
    /// *Panics* if `k` is out of bounds.
    #[inline]
    pub fn site(&self, k: usize) -> &nd::Array4<A> { &self.data[k] }

    /// Return an iterator over all site tensors, from left to right.
    #[inline]
    pub fn sites(&self) -> std::slice::Iter<'_, nd::Array4<A>> {
        self.data.iter()
    }

    /// Unwrap `self` into its site tensors.
    #[inline]
    pub fn into_tensors(self) -> Vec<nd::Array4<A>> { self.data }

    fn check_compatible(&self, other: &Self) -> MPOResult<()> {
        if self.nsites() != other.nsites() {
            return Err(SiteCountMismatch(self.nsites(), other.nsites()));
        }
        let mismatch
            = self.data.iter().zip(&other.data)
            .position(|(a, b)| a.shape()[..2] != b.shape()[..2]);
        match mismatch {
            Some(k) => Err(PhysicalMismatch(k)),
            None => Ok(()),
        }
    }
}

impl<A> MPO<A>
where A: ComplexScalar
{
    /// Construct the identity operator on `nsites` sites of physical dimension
    /// `d`, multiplied by `scale`.
    ///
    /// All bonds are trivial. The scale is carried by the first site tensor
    /// alone; all others are plain identity matrices.
    pub fn identity(d: usize, nsites: usize, scale: A::Re) -> Self {
        let data: Vec<nd::Array4<A>>
            = (0..nsites)
            .map(|k| {
                let diag: A = if k == 0 { A::from_re(scale) } else { A::one() };
                let mut w: nd::Array4<A> = nd::Array::zeros((d, d, 1, 1));
                (0..d).for_each(|j| { w[[j, j, 0, 0]] = diag; });
                w
            })
            .collect();
        Self { data }
    }

    /// Create an operator with random entries.
    ///
    /// `bond_dims` lists all `n + 1` virtual bond dimensions of an `n`-site
    /// chain, outer bonds included, and every site has physical dimension `d`.
    /// Entries are drawn from `Standard` and scaled by `1 / sqrt(d D D')` for
    /// neighboring bonds `D` and `D'`.
    pub fn new_random<R>(d: usize, bond_dims: &[usize], rng: &mut R)
        -> MPOResult<Self>
    where
        R: Rng + ?Sized,
        Standard: Distribution<A>,
    {
        if bond_dims.len() < 2 { return Err(TooFewBonds); }
        let data: Vec<nd::Array4<A>>
            = bond_dims.iter().tuple_windows()
            .map(|(&dl, &dr)| -> MPOResult<nd::Array4<A>> {
                let count = d * dl * dr;
                let scale: A
                    = inv_sqrt_count(count).ok_or(RealConversion(count))?;
                Ok(nd::Array4::from_shape_simple_fn(
                    (d, d, dl, dr), || rng.sample::<A, _>(Standard) * scale))
            })
            .collect::<MPOResult<_>>()?;
        Self::from_tensors(data)
    }

    /// Construct the MPO representation of a sum of operator chains on
    /// `nsites` sites of physical dimension `d`.
    ///
    /// Each chain gets its own slot on every interior bond it spans. Slot 0 of
    /// the right outer bond collects finished chains, which are continued by
    /// identities up to the last site; slot 0 of the left outer bond starts
    /// every chain, with identities carried up to the chain's first site.
    /// Chains acting on a single site share these slots and are simply added.
    ///
    /// Empty chains are ignored. If no chain remains, the result is the zero
    /// operator with trivial bonds. Fails if a chain extends past the last
    /// site or contains an operator that is not `d × d`; chains are counted in
    /// the order they are given.
    pub fn from_opchains<I>(d: usize, nsites: usize, chains: I)
        -> MPOResult<Self>
    where I: IntoIterator<Item = OpChain<A>>
    {
        let mut chains: Vec<OpChain<A>> = chains.into_iter().collect();
        for (j, c) in chains.iter().enumerate() {
            if c.iend() > nsites {
                return Err(OpChainBounds { chain: j, iend: c.iend(), nsites });
            }
            if let Some(k) = c.oplist.iter().position(|op| op.dim() != (d, d)) {
                return Err(OpChainShape { chain: j, op: k });
            }
        }
        chains.retain(|c| !c.is_empty());
        debug!("from_opchains: {} chains on {nsites} sites", chains.len());
        if chains.is_empty() {
            let data: Vec<nd::Array4<A>>
                = (0..nsites).map(|_| nd::Array::zeros((d, d, 1, 1))).collect();
            return Self::from_tensors(data);
        }

        chains.sort_by_key(|c| c.iend() * nsites + c.len());
        // trailing identities for all chains
        chains[0].pad_identities_right(d, nsites);
        // leading identities for all chains, carried by the first chain with
        // the largest starting site
        let istart_max = chains.iter().map(|c| c.istart).max().unwrap_or(0);
        let lead
            = chains.iter().position(|c| c.istart == istart_max).unwrap_or(0);
        chains[lead].pad_identities_left(d);

        // slot counters for each bond
        let mut nslots: Vec<usize> = vec![0; nsites + 1];
        nslots[0] = 1;
        nslots[nsites] = 1;
        let opslots: Vec<Vec<usize>>
            = chains.iter()
            .map(|c| {
                // the slot after the last operator stays 0
                let mut slots: Vec<usize> = vec![0; c.len()];
                for (i, slot) in slots.iter_mut().take(c.len() - 1).enumerate() {
                    let k = c.istart + i + 1;
                    *slot = nslots[k];
                    nslots[k] += 1;
                }
                slots
            })
            .collect();

        let mut data: Vec<nd::Array4<A>>
            = (0..nsites)
            .map(|k| nd::Array::zeros((d, d, nslots[k], nslots[k + 1])))
            .collect();
        for (c, slots) in chains.iter().zip(&opslots) {
            for (i, op) in c.oplist.iter().enumerate() {
                let left
                    = if i > 0 {
                        slots[i - 1]
                    } else if c.istart == 0 {
                        0
                    } else {
                        opslots[lead][c.istart - 1]
                    };
                // add rather than assign: single-site chains share slots
                let mut w
                    = data[c.istart + i].slice_mut(nd::s![.., .., left, slots[i]]);
                w += op;
            }
        }
        Self::from_tensors(data)
    }

    /// Merge all site tensors into the matrix representation of the operator
    /// on the full Hilbert space.
    ///
    /// Row and column indices are ordered with site 0 most significant.
    ///
    /// Fails if the MPO is empty or its outer bonds are not trivial.
    pub fn as_matrix(&self) -> MPOResult<nd::Array2<A>> {
        let first = self.data.first().ok_or(EmptySystem)?;
        let bonds = self.bond_dims();
        if bonds[0] != 1 || bonds[bonds.len() - 1] != 1 {
            return Err(NontrivialOuterBond);
        }
        let op: nd::Array4<A>
            = self.data.iter().skip(1)
            .try_fold(
                first.as_standard_layout().into_owned(),
                |acc, w| merge_mpo_tensor_pair(&acc, w),
            )?;
        let (dout, din, _, _) = op.dim();
        Ok(op.into_shape((dout, din))?)
    }

    /// Logical addition `self + alpha * other`, formed as a direct sum over
    /// virtual bonds.
    ///
    /// Interior bond dimensions of the result are the sums of the operands'.
    /// Single-site operators are simply added.
    ///
    /// Fails if the operands have different numbers of sites, different
    /// physical dimensions at any site, or different outer bond dimensions.
    pub fn add_scaled(&self, other: &Self, alpha: A) -> MPOResult<Self> {
        self.check_compatible(other)?;
        let n = self.nsites();
        if n == 0 { return Ok(Self { data: Vec::new() }); }
        let (bonds0, bonds1) = (self.bond_dims(), other.bond_dims());
        if bonds0[0] != bonds1[0] || bonds0[n] != bonds1[n] {
            return Err(OuterBondMismatch);
        }
        if n == 1 {
            let w = &self.data[0] + &other.data[0].mapv(|x| x * alpha);
            return Ok(Self { data: vec![w] });
        }

        let mut data: Vec<nd::Array4<A>> = Vec::with_capacity(n);
        // leftmost: concatenate along the right bond
        data.push(
            nd::concatenate(
                nd::Axis(3),
                &[self.data[0].view(), other.data[0].mapv(|x| x * alpha).view()],
            )?
        );
        // interior: block-diagonal in the virtual bonds
        for (w0, w1) in self.data[1..n - 1].iter().zip(&other.data[1..n - 1]) {
            let (d0, d1, l0, r0) = w0.dim();
            let (_, _, l1, r1) = w1.dim();
            let mut w: nd::Array4<A> = nd::Array::zeros((d0, d1, l0 + l1, r0 + r1));
            w.slice_mut(nd::s![.., .., ..l0, ..r0]).assign(w0);
            w.slice_mut(nd::s![.., .., l0.., r0..]).assign(w1);
            data.push(w);
        }
        // rightmost: concatenate along the left bond
        data.push(
            nd::concatenate(
                nd::Axis(2),
                &[self.data[n - 1].view(), other.data[n - 1].view()],
            )?
        );
        Ok(Self { data })
    }

    /// Logical addition `self + other`.
    pub fn sum(&self, other: &Self) -> MPOResult<Self> {
        self.add_scaled(other, A::one())
    }

    /// Logical subtraction `self - other`.
    pub fn difference(&self, other: &Self) -> MPOResult<Self> {
        self.add_scaled(other, -A::one())
    }

    /// Compose two operators along the physical dimension, giving the MPO of
    /// the matrix product `self · other`.
    ///
    /// Bond dimensions of the result are the products of the operands'.
    ///
    /// Fails if the operands have different numbers of sites, or if the input
    /// dimension of `self` does not match the output dimension of `other` at
    /// any site.
    pub fn compose(&self, other: &Self) -> MPOResult<Self> {
        if self.nsites() != other.nsites() {
            return Err(SiteCountMismatch(self.nsites(), other.nsites()));
        }
        let data: Vec<nd::Array4<A>>
            = self.data.iter().zip(&other.data).enumerate()
            .map(|(k, (w0, w1))| -> MPOResult<nd::Array4<A>> {
                if w0.shape()[1] != w1.shape()[0] {
                    return Err(PhysicalMismatch(k));
                }
                let (d0, _, l0, r0) = w0.dim();
                let (_, d1, l1, r1) = w1.dim();
                // [a0, a2, a3, b1, b2, b3]
                let t = tensordot(w0, w1, &[1], &[0])?;
                // [a0, b1, a2, b2, a3, b3]
                let t = permute_owned(t, &[0, 3, 1, 4, 2, 5]);
                Ok(t.into_shape((d0, d1, l0 * l1, r0 * r1))?)
            })
            .collect::<MPOResult<_>>()?;
        Ok(Self { data })
    }

    /// Left- or right-orthonormalize all site tensors with respect to the
    /// Frobenius norm using QR decompositions, returning the norm of the
    /// operator.
    ///
    /// After a left sweep, every site tensor but the last is an isometry from
    /// its left bond and physical indices to its right bond, and the last
    /// tensor has unit Frobenius norm; a right sweep is the mirror image.
    /// Multiplying the resulting MPO by the returned norm reproduces the
    /// original operator.
    ///
    /// Returns zero for an empty MPO.
    pub fn orthonormalize(&mut self, mode: Orthonormalize) -> MPOResult<A::Re> {
        let n = self.nsites();
        debug!("orthonormalize: {mode:?} sweep over {n} sites");
        if n == 0 { return Ok(A::Re::zero()); }
        let boundary = match mode {
            Orthonormalize::Left => {
                for k in 0..n - 1 {
                    let (q, r) = local_orthonormalize_left_qr(&self.data[k])?;
                    self.data[k] = q;
                    // multiply R into the next site from the left
                    // [r0, s, s', u]
                    let next = tensordot(&r, &self.data[k + 1], &[1], &[2])?;
                    self.data[k + 1]
                        = fix_rank(permute_owned(next, &[1, 2, 0, 3]))?;
                }
                n - 1
            },
            Orthonormalize::Right => {
                for k in (1..n).rev() {
                    let (q, r) = local_orthonormalize_right_qr(&self.data[k])?;
                    self.data[k] = q;
                    // multiply R into the previous site from the right
                    let prev = tensordot(&self.data[k - 1], &r, &[3], &[1])?;
                    self.data[k - 1] = fix_rank(prev)?;
                }
                0
            },
        };
        // all other tensors are isometries now, so the norm of the operator
        // is carried entirely by the boundary tensor
        let nrm: A::Re
            = Float::sqrt(
                self.data[boundary].iter()
                    .map(|x| Float::powi(ComplexFloat::abs(*x), 2))
                    .fold(A::Re::zero(), |acc, x| acc + x)
            );
        if nrm > A::Re::zero() {
            let inv = A::from_re(Float::recip(nrm));
            self.data[boundary].mapv_inplace(|x| x * inv);
        }
        Ok(nrm)
    }
}

// QR-decompose `w` as a matrix [s s' u, u'] and return Q, reshaped back into a
// site tensor, and R
fn local_orthonormalize_left_qr<A>(w: &nd::Array4<A>)
    -> MPOResult<(nd::Array4<A>, nd::Array2<A>)>
where A: ComplexScalar
{
    let (d0, d1, l, r) = w.dim();
    let m = d0 * d1 * l;
    let mat = na::DMatrix::from_row_iterator(m, r, w.iter().copied());
    let qr = mat.qr();
    let (q, rr) = (qr.q(), qr.r());
    let k = q.ncols();
    let q: nd::Array4<A>
        = nd::Array2::from_shape_fn((m, k), |(i, j)| q[(i, j)])
        .into_shape((d0, d1, l, k))?;
    let rr: nd::Array2<A> = nd::Array2::from_shape_fn((k, r), |(i, j)| rr[(i, j)]);
    Ok((q, rr))
}

// like `local_orthonormalize_left_qr`, but with the roles of the virtual bonds
// swapped; the returned R acts on the left bond of `w`
fn local_orthonormalize_right_qr<A>(w: &nd::Array4<A>)
    -> MPOResult<(nd::Array4<A>, nd::Array2<A>)>
where A: ComplexScalar
{
    let flipped: nd::Array4<A>
        = fix_rank(permute_owned(w.view(), &[0, 1, 3, 2]))?;
    let (q, r) = local_orthonormalize_left_qr(&flipped)?;
    let q: nd::Array4<A> = fix_rank(permute_owned(q, &[0, 1, 3, 2]))?;
    Ok((q, r))
}

/// Merge two neighboring MPO site tensors into one.
///
/// The physical output (and input) indices of the result are the fused pairs
/// of the operands', with the index of `w0` most significant. Fails if the
/// right bond of `w0` does not match the left bond of `w1`.
pub fn merge_mpo_tensor_pair<A>(w0: &nd::Array4<A>, w1: &nd::Array4<A>)
    -> MPOResult<nd::Array4<A>>
where A: ComplexScalar
{
    let (a0, a1, al, _) = w0.dim();
    let (b0, b1, _, br) = w1.dim();
    // [a0, a1, al, b0, b1, br]
    let t = tensordot(w0, w1, &[3], &[2])?;
    // [a0, b0, a1, b1, al, br]
    let t = permute_owned(t, &[0, 3, 1, 4, 2, 5]);
    Ok(t.into_shape((a0 * b0, a1 * b1, al, br))?)
}

impl<A> fmt::Display for MPO<A>
where A: fmt::Display
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "MPO {{ nsites: {}, bond_dims: [{}] }}",
            self.nsites(), self.bond_dims().iter().join(", "))?;
        for (k, w) in self.data.iter().enumerate() {
            let sh = w.shape();
            writeln!(f, "W[{}] :: {{ s{}<{}>, s{}'<{}>, <{}>, <{}> }}",
                k, k, sh[0], k, sh[1], sh[2], sh[3])?;
            fmt::Display::fmt(w, f)?;
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use num_complex::Complex64 as C64;
    use rand::{ SeedableRng, rngs::StdRng };

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn assert_close(a: &nd::Array2<C64>, b: &nd::Array2<C64>) {
        assert_eq!(a.shape(), b.shape());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).norm() < 1e-10, "{x} != {y}");
        }
    }

    #[test]
    fn rejects_mismatched_bonds() {
        let w0: nd::Array4<C64> = nd::Array::zeros((2, 2, 1, 3));
        let w1: nd::Array4<C64> = nd::Array::zeros((2, 2, 2, 1));
        assert!(matches!(
            MPO::from_tensors(vec![w0, w1]),
            Err(BondMismatch { bond: 1, left: 3, right: 2 })
        ));
        let w: nd::Array4<C64> = nd::Array::zeros((0, 2, 1, 1));
        assert!(matches!(MPO::from_tensors(vec![w]), Err(ZeroDimAxis(0))));
        let mut rng = StdRng::seed_from_u64(10546);
        assert!(matches!(
            MPO::<C64>::new_random(2, &[1], &mut rng),
            Err(TooFewBonds)
        ));
    }

    #[test]
    fn identity_matrix() {
        let op: MPO<C64> = MPO::identity(2, 3, 2.0);
        assert_eq!(op.bond_dims(), vec![1, 1, 1, 1]);
        let mat = op.as_matrix().unwrap();
        let expected: nd::Array2<C64>
            = nd::Array2::eye(8).mapv(|x: C64| x * 2.0);
        assert_close(&mat, &expected);
        // only the first site carries the scale
        assert_eq!(op.site(0)[[1, 1, 0, 0]], C64::new(2.0, 0.0));
        assert_eq!(op.site(1)[[1, 1, 0, 0]], C64::new(1.0, 0.0));
        assert_eq!(op.site(2)[[0, 0, 0, 0]], C64::new(1.0, 0.0));
        assert!(matches!(MPO::<C64>::identity(2, 0, 1.0).as_matrix(), Err(EmptySystem)));
    }

    #[test]
    fn sum_and_difference_match_matrices() {
        init();
        let mut rng = StdRng::seed_from_u64(10546);
        let a: MPO<C64> = MPO::new_random(2, &[1, 2, 3, 1], &mut rng).unwrap();
        let b: MPO<C64> = MPO::new_random(2, &[1, 3, 2, 1], &mut rng).unwrap();
        let (ma, mb) = (a.as_matrix().unwrap(), b.as_matrix().unwrap());

        let s = a.sum(&b).unwrap();
        assert_eq!(s.bond_dims(), vec![1, 5, 5, 1]);
        assert_close(&s.as_matrix().unwrap(), &(&ma + &mb));

        let d = a.difference(&b).unwrap();
        assert_close(&d.as_matrix().unwrap(), &(&ma - &mb));

        let alpha = C64::new(0.3, -1.2);
        let c = a.add_scaled(&b, alpha).unwrap();
        assert_close(&c.as_matrix().unwrap(), &(&ma + &mb.mapv(|x| x * alpha)));
    }

    #[test]
    fn single_site_sum() {
        let a: MPO<C64> = MPO::identity(3, 1, 1.0);
        let b: MPO<C64> = MPO::identity(3, 1, 0.5);
        let s = a.add_scaled(&b, C64::new(2.0, 0.0)).unwrap();
        assert_eq!(s.bond_dims(), vec![1, 1]);
        assert_eq!(s.site(0)[[1, 1, 0, 0]], C64::new(2.0, 0.0));
        assert_eq!(s.site(0)[[0, 1, 0, 0]], C64::new(0.0, 0.0));
    }

    #[test]
    fn algebra_rejects_incompatible_operands() {
        let a: MPO<C64> = MPO::identity(2, 2, 1.0);
        let b: MPO<C64> = MPO::identity(2, 3, 1.0);
        let c: MPO<C64> = MPO::identity(3, 2, 1.0);
        assert!(matches!(a.sum(&b), Err(SiteCountMismatch(2, 3))));
        assert!(matches!(a.sum(&c), Err(PhysicalMismatch(0))));
        assert!(matches!(a.compose(&c), Err(PhysicalMismatch(0))));

        let mut rng = StdRng::seed_from_u64(10546);
        let d: MPO<C64> = MPO::new_random(2, &[2, 2, 1], &mut rng).unwrap();
        assert!(matches!(a.sum(&d), Err(OuterBondMismatch)));
        assert!(matches!(d.as_matrix(), Err(NontrivialOuterBond)));
    }

    #[test]
    fn compose_matches_matrix_product() {
        let mut rng = StdRng::seed_from_u64(10546);
        let a: MPO<C64> = MPO::new_random(2, &[1, 2, 2, 1], &mut rng).unwrap();
        let b: MPO<C64> = MPO::new_random(2, &[1, 3, 2, 1], &mut rng).unwrap();
        let ab = a.compose(&b).unwrap();
        assert_eq!(ab.bond_dims(), vec![1, 6, 4, 1]);
        let expected = a.as_matrix().unwrap().dot(&b.as_matrix().unwrap());
        assert_close(&ab.as_matrix().unwrap(), &expected);
    }

    #[test]
    fn orthonormalize_preserves_operator() {
        init();
        let mut rng = StdRng::seed_from_u64(10546);
        let op: MPO<C64> = MPO::new_random(2, &[1, 3, 5, 2, 1], &mut rng).unwrap();
        let mat = op.as_matrix().unwrap();
        let frob: f64
            = mat.iter().map(|x| x.norm_sqr()).sum::<f64>().sqrt();

        for mode in [Orthonormalize::Left, Orthonormalize::Right] {
            let mut on = op.clone();
            let nrm = on.orthonormalize(mode).unwrap();
            assert_abs_diff_eq!(nrm, frob, epsilon = 1e-10);
            let restored = on.as_matrix().unwrap().mapv(|x| x * nrm);
            assert_close(&restored, &mat);

            // interior tensors are isometries
            let w = match mode {
                Orthonormalize::Left => on.site(0).clone(),
                Orthonormalize::Right => {
                    on.site(3).clone().permuted_axes([0, 1, 3, 2])
                        .as_standard_layout().into_owned()
                },
            };
            let (d0, d1, l, r) = w.dim();
            let q = w.into_shape((d0 * d1 * l, r)).unwrap();
            let qhq = q.t().mapv(|x| x.conj()).dot(&q);
            assert_close(&qhq, &nd::Array2::eye(r));
        }

        let mut empty: MPO<C64> = MPO::identity(2, 0, 1.0);
        assert_eq!(empty.orthonormalize(Orthonormalize::Left).unwrap(), 0.0);
    }

    #[test]
    fn merge_pair_kron() {
        let a: MPO<C64> = MPO::identity(2, 1, 1.0);
        let mut z: nd::Array4<C64> = nd::Array::zeros((2, 2, 1, 1));
        z[[0, 0, 0, 0]] = C64::new(1.0, 0.0);
        z[[1, 1, 0, 0]] = C64::new(-1.0, 0.0);
        let m = merge_mpo_tensor_pair(a.site(0), &z).unwrap();
        assert_eq!(m.shape(), &[4, 4, 1, 1]);
        let diag: Vec<f64> = (0..4).map(|j| m[[j, j, 0, 0]].re).collect();
        assert_eq!(diag, vec![1.0, -1.0, 1.0, -1.0]);
    }

    fn pauli_x() -> nd::Array2<C64> {
        nd::array![[0.0, 1.0], [1.0, 0.0]].mapv(|x| C64::new(x, 0.0))
    }

    fn pauli_z() -> nd::Array2<C64> {
        nd::array![[1.0, 0.0], [0.0, -1.0]].mapv(|x| C64::new(x, 0.0))
    }

    fn kron(a: &nd::Array2<C64>, b: &nd::Array2<C64>) -> nd::Array2<C64> {
        let (p, q) = b.dim();
        nd::Array2::from_shape_fn(
            (a.nrows() * p, a.ncols() * q),
            |(i, j)| a[[i / p, j / q]] * b[[i % p, j % q]],
        )
    }

    fn kron_all(ops: &[nd::Array2<C64>]) -> nd::Array2<C64> {
        ops.iter().skip(1).fold(ops[0].clone(), |acc, op| kron(&acc, op))
    }

    #[test]
    fn opchains_two_site_ising() {
        init();
        let (x, z) = (pauli_x(), pauli_z());
        let id: nd::Array2<C64> = nd::Array2::eye(2);
        let chains = vec![
            OpChain::new(vec![z.clone(), z.clone()], 0),
            OpChain::new(vec![x.clone()], 0),
            OpChain::new(vec![x.clone()], 1),
        ];
        let op: MPO<C64> = MPO::from_opchains(2, 2, chains).unwrap();
        assert_eq!(op.bond_dims(), vec![1, 3, 1]);
        let expected
            = kron(&z, &z) + kron(&x, &id) + kron(&id, &x);
        assert_close(&op.as_matrix().unwrap(), &expected);
    }

    #[test]
    fn opchains_match_explicit_sum() {
        init();
        let (x, z) = (pauli_x(), pauli_z());
        let id: nd::Array2<C64> = nd::Array2::eye(2);
        let y: nd::Array2<C64>
            = nd::array![
                [C64::new(0.0, 0.0), C64::new(0.0, -1.0)],
                [C64::new(0.0, 1.0), C64::new(0.0, 0.0)],
            ];
        let n = 4;
        let mut chains: Vec<OpChain<C64>> = Vec::new();
        let mut expected: nd::Array2<C64> = nd::Array2::zeros((16, 16));
        for k in 0..n {
            let hx = x.mapv(|v| v * 0.7);
            chains.push(OpChain::new(vec![hx.clone()], k));
            let mut ops = vec![id.clone(); n];
            ops[k] = hx;
            expected += &kron_all(&ops);
        }
        for k in 0..n - 1 {
            chains.push(OpChain::new(vec![z.clone(), z.clone()], k));
            let mut ops = vec![id.clone(); n];
            ops[k] = z.clone();
            ops[k + 1] = z.clone();
            expected += &kron_all(&ops);
        }
        // a longer chain with an interior identity, and an empty one
        chains.push(OpChain::new(vec![y.clone(), id.clone(), x.clone()], 1));
        expected += &kron_all(&[id.clone(), y.clone(), id.clone(), x.clone()]);
        chains.push(OpChain::new(Vec::new(), 2));

        let op: MPO<C64> = MPO::from_opchains(2, n, chains).unwrap();
        assert_eq!(op.nsites(), n);
        assert_close(&op.as_matrix().unwrap(), &expected);
    }

    #[test]
    fn opchains_empty_is_zero() {
        let chains: Vec<OpChain<C64>> = vec![OpChain::new(Vec::new(), 0)];
        let op: MPO<C64> = MPO::from_opchains(2, 3, chains).unwrap();
        assert_eq!(op.bond_dims(), vec![1, 1, 1, 1]);
        assert!(op.as_matrix().unwrap().iter().all(|x| *x == C64::new(0.0, 0.0)));
    }

    #[test]
    fn opchains_reject_bad_chains() {
        let x = pauli_x();
        assert!(matches!(
            MPO::from_opchains(2, 2, vec![
                OpChain::new(vec![x.clone()], 0),
                OpChain::new(vec![x.clone(), x.clone()], 1),
            ]),
            Err(OpChainBounds { chain: 1, iend: 3, nsites: 2 })
        ));
        let bad: nd::Array2<C64> = nd::Array2::zeros((2, 3));
        assert!(matches!(
            MPO::from_opchains(2, 2, vec![OpChain::new(vec![x, bad], 0)]),
            Err(OpChainShape { chain: 0, op: 1 })
        ));
    }

    #[test]
    fn display_lists_sites() {
        let op: MPO<f64> = MPO::identity(2, 2, 1.0);
        let s = format!("{op}");
        assert!(s.starts_with("MPO { nsites: 2, bond_dims: [1, 1, 1] }"));
        assert!(s.contains("W[1] :: { s1<2>, s1'<2>, <1>, <1> }"));
    }
}
