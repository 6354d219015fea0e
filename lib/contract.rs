//! Boundary-tensor contractions for ⟨χ|W|ψ⟩-type networks.
//!
//! Every function here is pure: inputs are borrowed read-only and new arrays
//! are returned. Boundary tensors carry axes `[ket, operator, bra]`, matching
//! the bond of the ket MPS, the MPO, and the (conjugated) bra MPS they were
//! cut from.
//!
//! ```text
//!      b0 -- B* -- b2          .-- r2
//!            |                 |
//!            b1 = w0           |
//!            |                 |
//!      w2 -- W --- w3 ====== R-+-- r1
//!            |                 |
//!            w1 = a1           |
//!            |                 |
//!      a0 -- A --- a2 ---------'-- r0
//! ```
//!
//! Folding one site into a right boundary `R` as above yields a new boundary
//! with axes `[a0, w2, b0]`; see [`contract_bra_mpo_ket_site`].

use log::{ debug, trace };
use ndarray as nd;
use num_traits::One;
use thiserror::Error;
use crate::{
    ComplexScalar,
    mpo::MPO,
    mps::MPS,
    tensor::{ conj, fix_rank, permute_owned, tensordot },
};

#[derive(Debug, Error)]
pub enum ContractError {
    /// Returned when two tensors are paired over axes of different dimension.
    #[error("shape mismatch in {context}: {lhs} axis {lhs_axis} has dimension {lhs_dim}, but {rhs} axis {rhs_axis} has dimension {rhs_dim}")]
    ShapeMismatch {
        context: &'static str,
        lhs: &'static str,
        lhs_axis: usize,
        lhs_dim: usize,
        rhs: &'static str,
        rhs_axis: usize,
        rhs_dim: usize,
    },

    /// Returned when a fully folded network does not reduce to a single
    /// number, i.e. its final boundary is not of shape `[1, 1, 1]`.
    #[error("invalid tensor network: final boundary has shape {shape:?}")]
    InvalidTensorNetwork { shape: Vec<usize> },

    /// Returned when the bra, operator, and ket chains have differing numbers
    /// of sites.
    #[error("site count mismatch: chi has {chi}, op has {op}, psi has {psi}")]
    SiteCountMismatch { chi: usize, op: usize, psi: usize },

    /// Like `SiteCountMismatch`, but for a bare bra-ket overlap.
    #[error("site count mismatch: chi has {chi}, psi has {psi}")]
    OverlapSiteCountMismatch { chi: usize, psi: usize },

    /// Returned when the two axis lists passed to
    /// [`tensordot`][crate::tensor::tensordot] have different lengths.
    #[error("error in tensordot: {lhs} axes paired with {rhs} axes")]
    AxisCount { lhs: usize, rhs: usize },

    /// Returned when an axis list contains a duplicate or out-of-range axis.
    #[error("error in tensordot: invalid axes {axes:?} for a rank-{ndim} array")]
    InvalidAxes { ndim: usize, axes: Vec<usize> },

    /// Returned when an intermediate reshape fails.
    #[error("array layout error: {0}")]
    Layout(#[from] nd::ShapeError),
}
use ContractError::*;
pub type ContractResult<T> = Result<T, ContractError>;

// labels for error reporting
const KET: &str = "ket tensor";
const BRA: &str = "bra tensor";
const OP: &str = "operator tensor";
const LEFT: &str = "left boundary";
const RIGHT: &str = "right boundary";
const BOND: &str = "bond tensor";

// check that axis `ka` of `lhs` and `kb` of `rhs` have the same dimension
#[inline]
fn check_dim(
    context: &'static str,
    (lhs, lhs_shape, lhs_axis): (&'static str, &[usize], usize),
    (rhs, rhs_shape, rhs_axis): (&'static str, &[usize], usize),
) -> ContractResult<()>
{
    let lhs_dim = lhs_shape[lhs_axis];
    let rhs_dim = rhs_shape[rhs_axis];
    if lhs_dim == rhs_dim {
        Ok(())
    } else {
        Err(ShapeMismatch {
            context, lhs, lhs_axis, lhs_dim, rhs, rhs_axis, rhs_dim,
        })
    }
}

/// Return the trivial 1×1×1 boundary tensor sitting beyond either end of a
/// chain.
#[inline]
pub fn unit_boundary<T>() -> nd::Array3<T>
where T: Clone + One
{
    nd::Array3::from_elem((1, 1, 1), T::one())
}

/// Fold one site into a right boundary, moving it one site to the left.
///
/// `A` is the ket tensor `[a0, a1, a2]`, `B` the bra tensor `[b0, b1, b2]`
/// (conjugated internally), `W` the operator tensor `[w0, w1, w2, w3]`, and
/// `R` the boundary `[r0, r1, r2]` to the right of the site. Requires
/// `a2 == r0`, `w3 == r1`, `b2 == r2`, `a1 == w1`, and `b1 == w0`. The returned
/// boundary has axes `[a0, w2, b0]`.
///
/// Fails with [`ContractError::ShapeMismatch`] before any arithmetic if any of
/// these dimensions disagree.
pub fn contract_bra_mpo_ket_site<T>(
    A: &nd::Array3<T>,
    B: &nd::Array3<T>,
    W: &nd::Array4<T>,
    R: &nd::Array3<T>,
) -> ContractResult<nd::Array3<T>>
where T: ComplexScalar
{
    const CTX: &str = "contract_bra_mpo_ket_site";
    let (a, b, w, r) = (A.shape(), B.shape(), W.shape(), R.shape());
    check_dim(CTX, (KET, a, 2), (RIGHT, r, 0))?;
    check_dim(CTX, (OP, w, 3), (RIGHT, r, 1))?;
    check_dim(CTX, (BRA, b, 2), (RIGHT, r, 2))?;
    check_dim(CTX, (OP, w, 1), (KET, a, 1))?;
    check_dim(CTX, (OP, w, 0), (BRA, b, 1))?;

    // [a0, a1, r1, r2]
    let t = tensordot(A, R, &[2], &[0])?;
    // [w0, w2, a0, r2]
    let t = tensordot(W, &t, &[1, 3], &[1, 2])?;
    // [a0, w2, w0, r2]
    let t = permute_owned(t, &[2, 1, 0, 3]);
    // [a0, w2, b0]
    let t = tensordot(&t, &conj(B), &[2, 3], &[1, 2])?;
    fix_rank(t)
}

/// Fold one site into a left boundary, moving it one site to the right.
///
/// Mirror image of [`contract_bra_mpo_ket_site`]: `L` has axes `[a0, w2, b0]`
/// and the returned boundary has axes `[a2, w3, b2]`.
pub fn contract_bra_mpo_ket_site_left<T>(
    A: &nd::Array3<T>,
    B: &nd::Array3<T>,
    W: &nd::Array4<T>,
    L: &nd::Array3<T>,
) -> ContractResult<nd::Array3<T>>
where T: ComplexScalar
{
    const CTX: &str = "contract_bra_mpo_ket_site_left";
    let (a, b, w, l) = (A.shape(), B.shape(), W.shape(), L.shape());
    check_dim(CTX, (KET, a, 0), (LEFT, l, 0))?;
    check_dim(CTX, (OP, w, 2), (LEFT, l, 1))?;
    check_dim(CTX, (BRA, b, 0), (LEFT, l, 2))?;
    check_dim(CTX, (OP, w, 1), (KET, a, 1))?;
    check_dim(CTX, (OP, w, 0), (BRA, b, 1))?;

    // [b1, b2, l0, l1]
    let t = tensordot(&conj(B), L, &[0], &[2])?;
    // [w1, w3, b2, l0]
    let t = tensordot(W, &t, &[0, 2], &[0, 3])?;
    // [a2, w3, b2]
    let t = tensordot(A, &t, &[0, 1], &[3, 0])?;
    fix_rank(t)
}

/// Fold one site into a right overlap boundary `R` with axes `[ket, bra]`.
///
/// Requires `a2 == r0`, `b2 == r1`, and `a1 == b1`; returns `[a0, b0]`.
pub fn contract_bra_ket_site<T>(
    A: &nd::Array3<T>,
    B: &nd::Array3<T>,
    R: &nd::Array2<T>,
) -> ContractResult<nd::Array2<T>>
where T: ComplexScalar
{
    const CTX: &str = "contract_bra_ket_site";
    let (a, b, r) = (A.shape(), B.shape(), R.shape());
    check_dim(CTX, (KET, a, 2), (RIGHT, r, 0))?;
    check_dim(CTX, (BRA, b, 2), (RIGHT, r, 1))?;
    check_dim(CTX, (KET, a, 1), (BRA, b, 1))?;

    // [a0, a1, r1]
    let t = tensordot(A, R, &[2], &[0])?;
    // [a0, b0]
    let t = tensordot(&t, &conj(B), &[1, 2], &[1, 2])?;
    fix_rank(t)
}

fn check_site_counts<T>(chi: &MPS<T>, op: &MPO<T>, psi: &MPS<T>)
    -> ContractResult<usize>
where T: ComplexScalar
{
    let (nchi, nop, npsi) = (chi.nsites(), op.nsites(), psi.nsites());
    if nchi != npsi || nop != npsi {
        return Err(SiteCountMismatch { chi: nchi, op: nop, psi: npsi });
    }
    Ok(npsi)
}

/// Compute ⟨χ|W|ψ⟩ for MPSs `chi` and `psi` and MPO `op`.
///
/// The network is folded from the rightmost site to the leftmost, starting
/// from the [unit boundary][unit_boundary]. Returns zero if all three chains
/// are empty.
///
/// Fails if the chains have differing numbers of sites, if any pair of
/// neighboring tensors disagree on a bond dimension, or if the outermost bonds
/// are not all trivial.
pub fn operator_inner_product<T>(chi: &MPS<T>, op: &MPO<T>, psi: &MPS<T>)
    -> ContractResult<T>
where T: ComplexScalar
{
    let n = check_site_counts(chi, op, psi)?;
    debug!("operator_inner_product: folding {n} sites");
    if n == 0 { return Ok(T::zero()); }
    let R: nd::Array3<T>
        = (0..n).rev()
        .try_fold(unit_boundary(), |R, k| {
            trace!("operator_inner_product: site {k}");
            contract_bra_mpo_ket_site(psi.site(k), chi.site(k), op.site(k), &R)
        })?;
    if R.shape() != [1, 1, 1] {
        return Err(InvalidTensorNetwork { shape: R.shape().to_vec() });
    }
    Ok(R[[0, 0, 0]])
}

/// Compute the plain overlap ⟨χ|ψ⟩.
///
/// Returns zero if both chains are empty. Fails under the same conditions as
/// [`operator_inner_product`].
pub fn overlap<T>(chi: &MPS<T>, psi: &MPS<T>) -> ContractResult<T>
where T: ComplexScalar
{
    let (nchi, npsi) = (chi.nsites(), psi.nsites());
    if nchi != npsi {
        return Err(OverlapSiteCountMismatch { chi: nchi, psi: npsi });
    }
    debug!("overlap: folding {npsi} sites");
    if npsi == 0 { return Ok(T::zero()); }
    let R: nd::Array2<T>
        = (0..npsi).rev()
        .try_fold(nd::Array2::from_elem((1, 1), T::one()), |R, k| {
            contract_bra_ket_site(psi.site(k), chi.site(k), &R)
        })?;
    if R.shape() != [1, 1] {
        return Err(InvalidTensorNetwork { shape: R.shape().to_vec() });
    }
    Ok(R[[0, 0]])
}

/// Compute all right boundaries of ⟨χ|W|ψ⟩.
///
/// The returned vector has length `n + 1`. Element `n` is the unit boundary
/// and element `k < n` holds the contraction of sites `k..n`, so that element
/// `0` is the full network (of shape `[1, 1, 1]` for a well-formed network).
pub fn right_environments<T>(chi: &MPS<T>, op: &MPO<T>, psi: &MPS<T>)
    -> ContractResult<Vec<nd::Array3<T>>>
where T: ComplexScalar
{
    let n = check_site_counts(chi, op, psi)?;
    debug!("right_environments: {n} sites");
    let mut envs: Vec<nd::Array3<T>> = Vec::with_capacity(n + 1);
    envs.push(unit_boundary());
    for k in (0..n).rev() {
        let R = contract_bra_mpo_ket_site(
            psi.site(k), chi.site(k), op.site(k), &envs[n - 1 - k])?;
        envs.push(R);
    }
    envs.reverse();
    Ok(envs)
}

/// Compute all left boundaries of ⟨χ|W|ψ⟩.
///
/// The returned vector has length `n + 1`. Element `0` is the unit boundary
/// and element `k > 0` holds the contraction of sites `0..k`.
pub fn left_environments<T>(chi: &MPS<T>, op: &MPO<T>, psi: &MPS<T>)
    -> ContractResult<Vec<nd::Array3<T>>>
where T: ComplexScalar
{
    let n = check_site_counts(chi, op, psi)?;
    debug!("left_environments: {n} sites");
    let mut envs: Vec<nd::Array3<T>> = Vec::with_capacity(n + 1);
    envs.push(unit_boundary());
    for k in 0..n {
        let L = contract_bra_mpo_ket_site_left(
            psi.site(k), chi.site(k), op.site(k), &envs[k])?;
        envs.push(L);
    }
    Ok(envs)
}

/// Assemble the effective single-site operator formed by boundaries `L` and
/// `R` around the operator tensor `W`, passed in that order.
///
/// Requires `l1 == w2` and `r1 == w3`. The result has axes
/// `[w0, l2, r2, w1, l0, r0]`, with elements
/// ```text
/// H[w0, l2, r2, w1, l0, r0] = Σ_{x, y} L[l0, x, l2] W[w0, w1, x, y] R[r0, y, r2]
/// ```
/// so that fusing the first three and last three axes gives a square matrix
/// mapping ket site tensors to bra site tensors. No symmetrization or
/// normalization is applied. Mostly useful for testing; iterative solvers
/// should prefer [`apply_local_hamiltonian`].
pub fn compute_local_hamiltonian<T>(
    L: &nd::Array3<T>,
    R: &nd::Array3<T>,
    W: &nd::Array4<T>,
) -> ContractResult<nd::Array6<T>>
where T: ComplexScalar
{
    const CTX: &str = "compute_local_hamiltonian";
    let (l, w, r) = (L.shape(), W.shape(), R.shape());
    check_dim(CTX, (LEFT, l, 1), (OP, w, 2))?;
    check_dim(CTX, (RIGHT, r, 1), (OP, w, 3))?;

    // [l0, l2, w0, w1, w3]
    let t = tensordot(L, W, &[1], &[2])?;
    // [l0, l2, w0, w1, r0, r2]
    let t = tensordot(&t, R, &[4], &[1])?;
    // [w0, l2, r2, w1, l0, r0]
    let t = permute_owned(t, &[2, 1, 5, 3, 0, 4]);
    fix_rank(t)
}

/// Apply the effective single-site operator of [`compute_local_hamiltonian`]
/// to a ket site tensor `A` with axes `[l0, w1, r0]` without forming the
/// operator explicitly.
///
/// Returns a site tensor with axes `[l2, w0, r2]`.
pub fn apply_local_hamiltonian<T>(
    L: &nd::Array3<T>,
    R: &nd::Array3<T>,
    W: &nd::Array4<T>,
    A: &nd::Array3<T>,
) -> ContractResult<nd::Array3<T>>
where T: ComplexScalar
{
    const CTX: &str = "apply_local_hamiltonian";
    let (l, w, r, a) = (L.shape(), W.shape(), R.shape(), A.shape());
    check_dim(CTX, (LEFT, l, 1), (OP, w, 2))?;
    check_dim(CTX, (RIGHT, r, 1), (OP, w, 3))?;
    check_dim(CTX, (KET, a, 0), (LEFT, l, 0))?;
    check_dim(CTX, (KET, a, 1), (OP, w, 1))?;
    check_dim(CTX, (KET, a, 2), (RIGHT, r, 0))?;

    // [l1, l2, a1, a2]
    let t = tensordot(L, A, &[0], &[0])?;
    // [w0, w3, l2, a2]
    let t = tensordot(W, &t, &[1, 2], &[2, 0])?;
    // [w0, l2, r2]
    let t = tensordot(&t, R, &[1, 3], &[1, 0])?;
    // [l2, w0, r2]
    let t = permute_owned(t, &[1, 0, 2]);
    fix_rank(t)
}

/// Assemble the effective zero-site (bond) operator formed by boundaries `L`
/// and `R`.
///
/// Requires `l1 == r1`. The result has axes `[l2, r2, l0, r0]`.
pub fn compute_local_bond_contraction<T>(
    L: &nd::Array3<T>,
    R: &nd::Array3<T>,
) -> ContractResult<nd::Array4<T>>
where T: ComplexScalar
{
    const CTX: &str = "compute_local_bond_contraction";
    check_dim(CTX, (LEFT, L.shape(), 1), (RIGHT, R.shape(), 1))?;

    // [l0, l2, r0, r2]
    let t = tensordot(L, R, &[1], &[1])?;
    // [l2, r2, l0, r0]
    let t = permute_owned(t, &[1, 3, 0, 2]);
    fix_rank(t)
}

/// Apply the effective bond operator of [`compute_local_bond_contraction`] to
/// a bond matrix `C` with axes `[l0, r0]`, returning `[l2, r2]`.
pub fn apply_local_bond_contraction<T>(
    L: &nd::Array3<T>,
    R: &nd::Array3<T>,
    C: &nd::Array2<T>,
) -> ContractResult<nd::Array2<T>>
where T: ComplexScalar
{
    const CTX: &str = "apply_local_bond_contraction";
    let (l, r, c) = (L.shape(), R.shape(), C.shape());
    check_dim(CTX, (LEFT, l, 1), (RIGHT, r, 1))?;
    check_dim(CTX, (BOND, c, 0), (LEFT, l, 0))?;
    check_dim(CTX, (BOND, c, 1), (RIGHT, r, 0))?;

    // [l1, l2, c1]
    let t = tensordot(L, C, &[0], &[0])?;
    // [l2, r2]
    let t = tensordot(&t, R, &[0, 2], &[1, 0])?;
    fix_rank(t)
}
