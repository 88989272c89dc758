//! # SIMD Primitives — 16-Lane Kernels and 64-Lane Block Operators
//!
//! Straight-line, branch-free kernels over 16 lanes of `u16`, composed into
//! 64-lane block operators (four 16-lane groups per block). Every kernel is a
//! fixed-length indexed loop with no data-dependent control flow, which is the
//! shape autovectorizers turn into one vector instruction (or a short fixed
//! sequence) per kernel on AVX2, AVX-512, Neon, SVE and the S390 vector
//! facility — no per-ISA intrinsics anywhere.
//!
//! ## The divisibility test
//!
//! For an odd prime p < 2^16 with `inv = p^-1 mod 2^16` and
//! `limit = floor((2^16 - 1) / p)`:
//!
//! ```text
//! p | x  <=>  (x * inv) mod 2^16 <= limit        (any 16-bit x)
//! ```
//!
//! One wrapping multiply plus one unsigned compare per prime. Companion
//! expressions reuse the product u = x·inv:
//!
//! ```text
//! (x + 2)  * inv = u + 2·inv      (twin pair)
//! (2x + 1) * inv = 2·u + inv      (safe-prime pair)
//! ```
//!
//! so `min(u, companion) <= limit` collapses both checks into one compare.
//! The companion forms stay valid because lanes are kept below 2^15 at rest
//! (see [`fold_assign`]), so `2v + 1` cannot leave 16-bit range.
//!
//! ## References
//!
//! - Granlund, Montgomery, "Division by Invariant Integers using
//!   Multiplication", SIGPLAN Notices 29, 1994 (exact division by constants).
//! - Lemire, Kaiser, Kurz, "Faster Remainder by Direct Computation", 2019,
//!   <https://arxiv.org/abs/1902.01961> (single-multiplication divisibility).

/// Lanes per SIMD group; one group fills a 256-bit register.
pub const LANES: usize = 16;

/// Lanes per block: four groups, sized so two 512-bit registers cover a block.
pub const BLOCK: usize = 64;

/// Groups per block.
const GROUPS: usize = BLOCK / LANES;

/// One 16-lane group.
pub type Lane = [u16; LANES];

/// One 64-lane block.
pub type Block = [u16; BLOCK];

/// `res[i] = a[i] * b[i]`, wrapping at 2^16.
#[inline]
pub fn mul(res: &mut Lane, a: &Lane, b: &Lane) {
    for i in 0..LANES {
        res[i] = a[i].wrapping_mul(b[i]);
    }
}

/// `res[i] = 2*v[i] + add[i]`, wrapping.
#[inline]
pub fn shl1_add(res: &mut Lane, v: &Lane, add: &Lane) {
    for i in 0..LANES {
        res[i] = (v[i] << 1).wrapping_add(add[i]);
    }
}

/// `r[i] = min(r[i], other[i])`.
#[inline]
pub fn min_assign(r: &mut Lane, other: &Lane) {
    for i in 0..LANES {
        r[i] = if other[i] < r[i] { other[i] } else { r[i] };
    }
}

/// `res[i] = a[i] | b[i]`.
#[inline]
pub fn or(res: &mut Lane, a: &Lane, b: &Lane) {
    for i in 0..LANES {
        res[i] = a[i] | b[i];
    }
}

/// `v[i] += k`, wrapping.
#[inline]
pub fn add_scalar_assign(v: &mut Lane, k: u16) {
    for i in 0..LANES {
        v[i] = v[i].wrapping_add(k);
    }
}

/// `v[i] += k[i]`, wrapping. Reserved for the vector-increment search; no
/// driver uses it yet.
#[inline]
pub fn add_vector_assign(v: &mut Lane, k: &Lane) {
    for i in 0..LANES {
        v[i] = v[i].wrapping_add(k[i]);
    }
}

/// `r[i] = (r[i] <= lim[i]) ? 0xffff : 0`.
///
/// A set mask means "this prime divides the tested expression", so an all-zero
/// result is the surviving case.
#[inline]
pub fn le_mask_assign(r: &mut Lane, lim: &Lane) {
    for i in 0..LANES {
        r[i] = if r[i] <= lim[i] { 0xffff } else { 0 };
    }
}

/// Fold a lane back into headroom after an advance.
///
/// `fold[i]` holds the two's-complement negation of the largest multiple of
/// `primes[i]` not exceeding 2^15. Adding it to a lane whose high bit is set
/// subtracts that multiple: the lane's residue class is unchanged and the
/// value drops back below 2^15 (every at-rest lane obeys `v < 2^15`, which
/// is also what keeps the safe-prime expression `2v+1` inside 16 bits).
#[inline]
pub fn fold_assign(v: &mut Lane, fold: &Lane) {
    for i in 0..LANES {
        let mask = ((v[i] as i16) >> 15) as u16;
        v[i] = v[i].wrapping_add(fold[i] & mask);
    }
}

/// True iff all 64 lanes are zero: OR the four groups pairwise into one and
/// compare against a known-zero vector, the form that compiles to a packed
/// bit test.
#[inline]
pub fn block_is_zero(v: &Block) -> bool {
    let (g, _) = v.as_chunks::<LANES>();
    let mut acc = [0u16; LANES];
    let mut acc2 = [0u16; LANES];
    or(&mut acc, &g[0], &g[1]);
    or(&mut acc2, &g[2], &g[3]);
    let mut all = [0u16; LANES];
    or(&mut all, &acc, &acc2);
    all == [0u16; LANES]
}

/// Advance all 64 lanes by a scalar step, folding each group back into
/// headroom.
#[inline]
pub fn block_advance(v: &mut Block, adv: u16, fold: &Block) {
    let (groups, _) = v.as_chunks_mut::<LANES>();
    let (f, _) = fold.as_chunks::<LANES>();
    for g in 0..GROUPS {
        add_scalar_assign(&mut groups[g], adv);
        fold_assign(&mut groups[g], &f[g]);
    }
}

/// Does no prime of this block divide the candidate? (`tmp` is scratch and
/// holds candidate-dependent products afterwards; the caller wipes it.)
#[inline]
pub fn block_no_factor(tmp: &mut Block, modn: &Block, inv: &Block, limit: &Block) -> bool {
    {
        let (t, _) = tmp.as_chunks_mut::<LANES>();
        let (m, _) = modn.as_chunks::<LANES>();
        let (iv, _) = inv.as_chunks::<LANES>();
        let (l, _) = limit.as_chunks::<LANES>();
        for g in 0..GROUPS {
            mul(&mut t[g], &m[g], &iv[g]);
        }
        for g in 0..GROUPS {
            le_mask_assign(&mut t[g], &l[g]);
        }
    }
    block_is_zero(tmp)
}

/// Does no prime of this block divide the candidate x or its twin x+2?
///
/// Per group: u = x·inv, then mask `min(u, u + 2·inv) <= limit`. `tmp` and
/// `tm2` are distinct scratch blocks.
#[inline]
pub fn block_no_factor_twin(
    tmp: &mut Block,
    tm2: &mut Block,
    modn: &Block,
    inv: &Block,
    limit: &Block,
) -> bool {
    {
        let (t, _) = tmp.as_chunks_mut::<LANES>();
        let (s, _) = tm2.as_chunks_mut::<LANES>();
        let (m, _) = modn.as_chunks::<LANES>();
        let (iv, _) = inv.as_chunks::<LANES>();
        let (l, _) = limit.as_chunks::<LANES>();
        for g in 0..GROUPS {
            mul(&mut t[g], &m[g], &iv[g]);
        }
        for g in 0..GROUPS {
            shl1_add(&mut s[g], &iv[g], &t[g]);
            min_assign(&mut t[g], &s[g]);
            le_mask_assign(&mut t[g], &l[g]);
        }
    }
    block_is_zero(tmp)
}

/// Does no prime of this block divide the candidate x or the companion 2x+1?
///
/// Same shape as [`block_no_factor_twin`] with the shift-add operands
/// swapped: the companion product is `2·u + inv`.
#[inline]
pub fn block_no_factor_safe(
    tmp: &mut Block,
    tm2: &mut Block,
    modn: &Block,
    inv: &Block,
    limit: &Block,
) -> bool {
    {
        let (t, _) = tmp.as_chunks_mut::<LANES>();
        let (s, _) = tm2.as_chunks_mut::<LANES>();
        let (m, _) = modn.as_chunks::<LANES>();
        let (iv, _) = inv.as_chunks::<LANES>();
        let (l, _) = limit.as_chunks::<LANES>();
        for g in 0..GROUPS {
            mul(&mut t[g], &m[g], &iv[g]);
        }
        for g in 0..GROUPS {
            shl1_add(&mut s[g], &t[g], &iv[g]);
            min_assign(&mut t[g], &s[g]);
            le_mask_assign(&mut t[g], &l[g]);
        }
    }
    block_is_zero(tmp)
}
