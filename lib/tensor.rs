//! Generalized multi-axis contraction over [`ndarray`] arrays.
//!
//! Given two arrays *A* and *B* and a list of axis pairs, [`tensordot`] sums
//! over the paired axes and leaves all others untouched:
//!
//! <blockquote>
//!   <p style="font-size:20px">
//!     <i>C</i><sub>
//!       <i>a</i><sub>1</sub>,...,<i>a</i><sub><i>N</i></sub>,
//!       <i>b</i><sub>1</sub>,...,<i>b</i><sub><i>M</i></sub>
//!     </sub>
//!       = Σ<sub><i>α</i><sub>1</sub>,...,<i>α</i><sub><i>D</i></sub></sub> [
//!         <i>A</i><sub>
//!           <i>a</i><sub>1</sub>,...,<i>a</i><sub><i>N</i></sub>,
//!           <i>α</i><sub>1</sub>,...,<i>α</i><sub><i>D</i></sub>
//!         </sub>
//!         × <i>B</i><sub>
//!           <i>α</i><sub>1</sub>,...,<i>α</i><sub><i>D</i></sub>,
//!           <i>b</i><sub>1</sub>,...,<i>b</i><sub><i>M</i></sub>
//!         </sub>
//!       ]
//!   </p>
//! </blockquote>
//!
//! The free axes of the result are those of *A* followed by those of *B*, each
//! in their original order. Internally both operands are permuted and fused
//! into matrices so that the sum is carried out by a single matrix product.

use ndarray as nd;
use num_complex::ComplexFloat;
use crate::contract::{ ContractError, ContractResult };

/// Contract `a` and `b` over the axis pairs `(axes_a[k], axes_b[k])`.
///
/// Fails if the two axis lists have different lengths, if either list names an
/// axis twice or one out of range, or if a paired set of axes has differing
/// dimensions. All checks are performed before any arithmetic.
pub fn tensordot<A, Sa, Sb, Da, Db>(
    a: &nd::ArrayBase<Sa, Da>,
    b: &nd::ArrayBase<Sb, Db>,
    axes_a: &[usize],
    axes_b: &[usize],
) -> ContractResult<nd::ArrayD<A>>
where
    A: nd::LinalgScalar,
    Sa: nd::Data<Elem = A>,
    Sb: nd::Data<Elem = A>,
    Da: nd::Dimension,
    Db: nd::Dimension,
{
    if axes_a.len() != axes_b.len() {
        return Err(ContractError::AxisCount {
            lhs: axes_a.len(),
            rhs: axes_b.len(),
        });
    }
    check_axes(a.ndim(), axes_a)?;
    check_axes(b.ndim(), axes_b)?;
    for (&ka, &kb) in axes_a.iter().zip(axes_b) {
        if a.shape()[ka] != b.shape()[kb] {
            return Err(ContractError::ShapeMismatch {
                context: "tensordot",
                lhs: "lhs",
                lhs_axis: ka,
                lhs_dim: a.shape()[ka],
                rhs: "rhs",
                rhs_axis: kb,
                rhs_dim: b.shape()[kb],
            });
        }
    }

    let free_a: Vec<usize>
        = (0..a.ndim()).filter(|k| !axes_a.contains(k)).collect();
    let free_b: Vec<usize>
        = (0..b.ndim()).filter(|k| !axes_b.contains(k)).collect();
    let m: usize = free_a.iter().map(|k| a.shape()[*k]).product();
    let s: usize = axes_a.iter().map(|k| a.shape()[*k]).product();
    let n: usize = free_b.iter().map(|k| b.shape()[*k]).product();
    let out_shape: Vec<usize>
        = free_a.iter().map(|k| a.shape()[*k])
        .chain(free_b.iter().map(|k| b.shape()[*k]))
        .collect();

    // fuse (free, contracted) for a and (contracted, free) for b
    let perm_a: Vec<usize>
        = free_a.iter().chain(axes_a).copied().collect();
    let perm_b: Vec<usize>
        = axes_b.iter().chain(&free_b).copied().collect();
    let amat: nd::Array2<A>
        = permute_owned(a.view().into_dyn(), &perm_a)
        .into_shape((m, s))?;
    let bmat: nd::Array2<A>
        = permute_owned(b.view().into_dyn(), &perm_b)
        .into_shape((s, n))?;
    let c = amat.dot(&bmat).into_shape(nd::IxDyn(&out_shape))?;
    Ok(c)
}

/// Permute the axes of `a` and return the result as a new array in standard
/// (row-major) memory layout.
///
/// *Panics* if `perm` is not a permutation of `0..a.ndim()`.
pub fn permute_owned<A, S, D>(a: nd::ArrayBase<S, D>, perm: &[usize])
    -> nd::ArrayD<A>
where
    A: Clone,
    S: nd::Data<Elem = A>,
    D: nd::Dimension,
{
    a.into_dyn()
        .permuted_axes(nd::IxDyn(perm))
        .as_standard_layout()
        .into_owned()
}

/// Return the element-wise complex conjugate of `a`.
pub fn conj<A, S, D>(a: &nd::ArrayBase<S, D>) -> nd::Array<A, D>
where
    A: ComplexFloat,
    S: nd::Data<Elem = A>,
    D: nd::Dimension,
{
    a.mapv(ComplexFloat::conj)
}

/// Convert a dynamic-dimensional array to one of fixed rank.
pub(crate) fn fix_rank<A, D>(a: nd::ArrayD<A>) -> ContractResult<nd::Array<A, D>>
where D: nd::Dimension
{
    Ok(a.into_dimensionality::<D>()?)
}

fn check_axes(ndim: usize, axes: &[usize]) -> ContractResult<()> {
    for (j, k) in axes.iter().enumerate() {
        if *k >= ndim || axes[..j].contains(k) {
            return Err(ContractError::InvalidAxes {
                ndim,
                axes: axes.to_vec(),
            });
        }
    }
    Ok(())
}
