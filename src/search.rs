//! # Search — Plain, Twin, and Safe-Prime Drivers
//!
//! Each driver enumerates successive candidates from a [`State`] and reports,
//! in ascending order, those with no factor among the selected tier of small
//! primes. Survivors are meant to be handed to a costlier probable-prime
//! test; the drivers themselves never invoke one.
//!
//! ## Candidate combs
//!
//! * **Plain** walks every 6k+1 / 6k+5 value (strides 4 and 2), testing Q.
//! * **Twin** and **safe** walk 6k+5 values (stride 6): a twin pair (Q, Q+2)
//!   with Q ≥ 5 forces Q ≡ 5 (mod 6), and so does a Sophie-Germain pair
//!   (Q, 2Q+1). Divisibility by 3 never needs testing on these combs, which
//!   is why 3 is absent from the prime table.
//!
//! ## The lead-block fast path
//!
//! The first 64 primes alone reject the overwhelming majority of candidates
//! (around 86% in safe-prime mode, more for twin), so the twin/safe drivers
//! first iterate 6-steps over just that block, accumulating up to 2^14 of
//! skip before settling the scalar mirrors and the remaining blocks in one
//! bulk advance. The budget keeps every lane inside its headroom; when it is
//! exhausted the iteration simply restarts at the current candidate.
//!
//! Remaining blocks are tested only when the lead block survives, with an
//! early exit on the first block reporting a factor. The early exit makes
//! the runtime reveal how many leading blocks are factor-free for each
//! skipped candidate; for key generation this is the usual trade-off, since
//! survivors face many further tests. A constant-time sieve would forgo the
//! exit and the fast path.
//!
//! ## Resumption
//!
//! Drivers always advance past a tested candidate before reporting it, so
//! the state is left at the first untested candidate: re-entering with a
//! fresh buffer continues the scan with no duplicated and no skipped
//! candidates, and the concatenated output stays strictly ascending.

use zeroize::Zeroize;

use crate::simd::{self, Block, BLOCK};
use crate::state::{PrimeType, State};
use crate::tables::{tables, PrimeTables};

/// Fast-skip budget per settle, in candidate distance.
const SKIP_CAP: u32 = 1 << 14;

/// Distance from each residue class mod 6 onto the next 6k+1 / 6k+5 value;
/// classes 1 and 5 are valid starts already.
const PLAIN_MOD6_DELTA: [u16; 6] = [1, 0, 3, 2, 1, 0];

/// Per-call scratch for the block testers; holds candidate-dependent
/// products, wiped when the iterator goes away.
struct Scratch {
    tmp: Block,
    tm2: Block,
}

impl Scratch {
    fn new() -> Self {
        Scratch {
            tmp: [0; BLOCK],
            tm2: [0; BLOCK],
        }
    }
}

/// What a driver tests at each stop: the candidate alone, or the candidate
/// plus a companion expression folded into the same compare.
trait Rule {
    fn block_ok(s: &mut Scratch, modn: &Block, inv: &Block, limit: &Block) -> bool;

    /// Exact-arithmetic companion check for candidates small enough to
    /// collide with the table itself. True when `p` is not a nontrivial
    /// factor of the companion.
    fn companion_free(q: u64, p: u64) -> bool;
}

struct PlainRule;
struct TwinRule;
struct SafeRule;

impl Rule for PlainRule {
    #[inline]
    fn block_ok(s: &mut Scratch, modn: &Block, inv: &Block, limit: &Block) -> bool {
        simd::block_no_factor(&mut s.tmp, modn, inv, limit)
    }

    #[inline]
    fn companion_free(_q: u64, _p: u64) -> bool {
        true
    }
}

impl Rule for TwinRule {
    #[inline]
    fn block_ok(s: &mut Scratch, modn: &Block, inv: &Block, limit: &Block) -> bool {
        simd::block_no_factor_twin(&mut s.tmp, &mut s.tm2, modn, inv, limit)
    }

    #[inline]
    fn companion_free(q: u64, p: u64) -> bool {
        let c = q + 2;
        c % p != 0 || c == p
    }
}

impl Rule for SafeRule {
    #[inline]
    fn block_ok(s: &mut Scratch, modn: &Block, inv: &Block, limit: &Block) -> bool {
        simd::block_no_factor_safe(&mut s.tmp, &mut s.tm2, modn, inv, limit)
    }

    #[inline]
    fn companion_free(q: u64, p: u64) -> bool {
        let c = 2 * q + 1;
        c % p != 0 || c == p
    }
}

/// No prime in `primes` is a nontrivial factor of `q` or its companion.
/// A prime is not a multiple of itself, so a candidate that *is* a table
/// prime survives its own filter.
fn exact_survives<R: Rule>(q: u64, primes: &[u16]) -> bool {
    primes.iter().all(|&p| {
        let p = u64::from(p);
        (q % p != 0 || q == p) && R::companion_free(q, p)
    })
}

/// Iterator over successive sieve survivors. Obtained from
/// [`State::survivors`]; each [`next`](Iterator::next) leaves the state one
/// step past the reported candidate, so iteration is resumable and the
/// buffer-filling [`drive`] is a thin wrapper.
pub struct Survivors<'a> {
    state: &'a mut State,
    scratch: Scratch,
}

impl State {
    /// Iterate survivors of the search selected by this state's mode.
    pub fn survivors(&mut self) -> Survivors<'_> {
        Survivors {
            state: self,
            scratch: Scratch::new(),
        }
    }
}

impl Iterator for Survivors<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        match self.state.mode().prime_type {
            PrimeType::Plain => Some(self.next_plain()),
            PrimeType::Twin => Some(self.next_pair::<TwinRule>()),
            PrimeType::Safe => Some(self.next_pair::<SafeRule>()),
            // Unreachable through construction; refused without side effects.
            PrimeType::Fips186 => None,
        }
    }
}

impl Survivors<'_> {
    /// The exact candidate value when the fast path could confuse "divides"
    /// with "is": only for 63-bit starts still below 2^16.
    fn exact_candidate(&self, pending: u32) -> Option<u64> {
        let q = self.state.lsb().wrapping_add(u64::from(pending));
        (self.state.lsb_is_exact() && q <= u64::from(u16::MAX)).then_some(q)
    }

    /// Verdict of the first 64 primes for the candidate `pending` ahead of
    /// the scalar mirrors (the lead lanes are already advanced there).
    fn lead_ok<R: Rule>(&mut self, t: &PrimeTables, pending: u32) -> bool {
        if let Some(q) = self.exact_candidate(pending) {
            return exact_survives::<R>(q, &t.primes.0[..BLOCK]);
        }
        let (inv, _) = t.inv.0.as_chunks::<BLOCK>();
        let (limit, _) = t.limit.0.as_chunks::<BLOCK>();
        R::block_ok(&mut self.scratch, &self.state.blocks()[0], &inv[0], &limit[0])
    }

    /// Verdict of blocks 1.. of the tier, early-exiting on the first factor.
    fn rest_ok<R: Rule>(&mut self, t: &PrimeTables, n: usize) -> bool {
        if let Some(q) = self.exact_candidate(0) {
            return exact_survives::<R>(q, &t.primes.0[BLOCK..n]);
        }
        let (inv, _) = t.inv.0.as_chunks::<BLOCK>();
        let (limit, _) = t.limit.0.as_chunks::<BLOCK>();
        let blocks = self.state.blocks();
        for b in 1..n / BLOCK {
            if !R::block_ok(&mut self.scratch, &blocks[b], &inv[b], &limit[b]) {
                return false;
            }
        }
        true
    }

    fn verdict_all<R: Rule>(&mut self, t: &PrimeTables, n: usize) -> bool {
        if let Some(q) = self.exact_candidate(0) {
            return exact_survives::<R>(q, &t.primes.0[..n]);
        }
        self.lead_ok::<R>(t, 0) && self.rest_ok::<R>(t, n)
    }

    /// Walk 6k+1 / 6k+5, testing Q alone.
    fn next_plain(&mut self) -> u64 {
        let t = tables();
        let n = self.state.mode().tier.primes();

        let delta = PLAIN_MOD6_DELTA[self.state.mod6() as usize];
        if delta != 0 {
            self.state.advance(delta);
        }
        loop {
            let survives = self.verdict_all::<PlainRule>(t, n);
            let lsb = self.state.lsb();
            // 6k+1 -> 6k+5 -> 6(k+1)+1
            let step = if self.state.mod6() == 5 { 2 } else { 4 };
            self.state.advance(step);
            if survives {
                return lsb;
            }
        }
    }

    /// Walk 6k+5 with the lead-block fast skip, testing Q together with its
    /// companion (Q+2 or 2Q+1 depending on the rule).
    fn next_pair<R: Rule>(&mut self) -> u64 {
        let t = tables();
        let n = self.state.mode().tier.primes();

        let delta = ((11 - self.state.mod6()) % 6) as u16;
        if delta != 0 {
            self.state.advance(delta);
        }
        loop {
            // Skip 6-steps over the lead block only, within the headroom
            // budget; lanes 64.. and the scalar mirrors catch up below.
            let mut skip: u32 = 0;
            while skip < SKIP_CAP && !self.lead_ok::<R>(t, skip) {
                self.state.advance_lead(6);
                skip += 6;
            }
            self.state.advance_scalars(skip);
            if skip > 0 {
                self.state.advance_tail(skip as u16);
            }
            if skip >= SKIP_CAP {
                // Budget exhausted; the current candidate is still untested.
                continue;
            }

            let survives = self.rest_ok::<R>(t, n);
            let lsb = self.state.lsb();
            self.state.advance(6);
            if survives {
                return lsb;
            }
        }
    }
}

impl Drop for Survivors<'_> {
    fn drop(&mut self) {
        self.scratch.tmp.zeroize();
        self.scratch.tm2.zeroize();
    }
}

/// Fill `out` with the next `out.len()` survivor LSBs in ascending order.
///
/// Returns the last LSB written, or 0 when nothing was written. The state is
/// left just past the last tested candidate, so a subsequent call continues
/// the scan seamlessly. No allocation, no I/O.
pub fn drive(state: &mut State, out: &mut [u64]) -> u64 {
    let mut last = 0u64;
    let mut survivors = state.survivors();
    for slot in out.iter_mut() {
        match survivors.next() {
            Some(lsb) => {
                *slot = lsb;
                last = lsb;
            }
            None => break,
        }
    }
    last
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Mode, TableTier};
    use rug::Integer;

    fn state_for(q: &Integer, prime_type: PrimeType, tier: TableTier) -> State {
        State::new(q, Mode::new(prime_type, tier)).unwrap()
    }

    fn collect(state: &mut State, count: usize) -> Vec<u64> {
        let mut out = vec![0u64; count];
        drive(state, &mut out);
        out
    }

    /// Every starting point in a small window lands on the documented next
    /// survivor: 9 is divisible by 3, so the mod-6 fixup skips straight to 11.
    #[test]
    fn plain_skips_multiples_of_three_at_init() {
        let mut st = state_for(&Integer::from(9), PrimeType::Plain, TableTier::S);
        assert_eq!(collect(&mut st, 1), vec![11]);
    }

    #[test]
    fn plain_enumerates_small_primes_in_order() {
        let mut st = state_for(&Integer::from(101), PrimeType::Plain, TableTier::S);
        assert_eq!(collect(&mut st, 3), vec![101, 103, 107]);
        // The state is positioned past 107; the scan continues with 109.
        assert_eq!(collect(&mut st, 2), vec![109, 113]);
    }

    #[test]
    fn twin_enumerates_lower_twin_members() {
        let mut st = state_for(&Integer::from(5), PrimeType::Twin, TableTier::S);
        // (5,7) (11,13) (17,19) (29,31); 23 falls out because 25 = 5*5.
        assert_eq!(collect(&mut st, 4), vec![5, 11, 17, 29]);
    }

    #[test]
    fn safe_enumerates_sophie_germain_members() {
        let mut st = state_for(&Integer::from(11), PrimeType::Safe, TableTier::S);
        // (11,23) (23,47) (29,59); 17 falls out because 2*17+1 = 35 = 5*7.
        assert_eq!(collect(&mut st, 3), vec![11, 23, 29]);
    }

    #[test]
    fn drive_returns_last_written_and_zero_when_empty() {
        let mut st = state_for(&Integer::from(101), PrimeType::Plain, TableTier::S);
        assert_eq!(drive(&mut st, &mut []), 0);
        assert_eq!(st.offset(), 0);

        let mut out = [0u64; 3];
        assert_eq!(drive(&mut st, &mut out), 107);
    }

    #[test]
    fn iterator_interface_matches_buffer_interface() {
        let q = Integer::from(1_000_003);
        let mut a = state_for(&q, PrimeType::Twin, TableTier::M);
        let mut b = a.clone();

        let from_iter: Vec<u64> = a.survivors().take(6).collect();
        let from_drive = collect(&mut b, 6);
        assert_eq!(from_iter, from_drive);
    }

    /// Interrupted and resumed scans concatenate to the uninterrupted scan.
    #[test]
    fn resumption_is_exact() {
        let q = (Integer::from(1) << 128u32) + 7u32;
        for prime_type in [PrimeType::Plain, PrimeType::Twin, PrimeType::Safe] {
            let mut whole = state_for(&q, prime_type, TableTier::S);
            let mut split = whole.clone();

            let all = collect(&mut whole, 8);
            let mut parts = collect(&mut split, 3);
            parts.extend(collect(&mut split, 5));
            assert_eq!(all, parts, "{}", prime_type.name());
        }
    }

    #[test]
    fn survivors_are_strictly_ascending() {
        let q = (Integer::from(1) << 200u32) + 1u32;
        let mut st = state_for(&q, PrimeType::Plain, TableTier::L);
        let out = collect(&mut st, 20);
        for w in out.windows(2) {
            assert!(w[0] < w[1], "{:#x} !< {:#x}", w[0], w[1]);
        }
    }

    /// Reconstructs each survivor from the LSB distance and re-reduces it
    /// with bignum arithmetic: no tier prime may divide it.
    #[test]
    fn wide_plain_survivors_are_coprime_to_the_table() {
        let q = (Integer::from(1) << 256u32) - 189u32;
        let start_lsb = q.to_u64_wrapping();
        let mut st = state_for(&q, PrimeType::Plain, TableTier::L);

        let out = collect(&mut st, 10);
        let t = tables();
        let mut prev = Integer::from(&q - 1u32);
        for lsb in out {
            let qk = Integer::from(&q + lsb.wrapping_sub(start_lsb));
            assert!(qk > prev, "outputs must move strictly upward");
            for &p in &t.primes.0 {
                assert_ne!(qk.mod_u(u32::from(p)), 0, "{p} divides survivor");
            }
            prev = qk;
        }
    }

    /// Safe-prime search on a 2048-bit start: the survivor and its 2Q+1
    /// companion are both coprime to every tier prime.
    #[test]
    fn wide_safe_survivor_and_companion_are_coprime() {
        let q = (Integer::from(1) << 2048u32) + 1u32; // 6k+5 just above 2^2048
        assert_eq!(q.mod_u(6), 5);
        let start_lsb = q.to_u64_wrapping();
        let mut st = state_for(&q, PrimeType::Safe, TableTier::L);

        let out = collect(&mut st, 1);
        let qk = Integer::from(&q + out[0].wrapping_sub(start_lsb));
        let companion = Integer::from(2u32 * &qk) + 1u32;
        for &p in &tables().primes.0 {
            assert_ne!(qk.mod_u(u32::from(p)), 0);
            assert_ne!(companion.mod_u(u32::from(p)), 0);
        }
    }

    /// A stronger filter only removes candidates: every L-tier survivor
    /// appears in the S-tier stream.
    #[test]
    fn tier_filters_are_nested() {
        let q = (Integer::from(1) << 96u32) + 61u32;
        let mut l = state_for(&q, PrimeType::Safe, TableTier::L);
        let mut s = state_for(&q, PrimeType::Safe, TableTier::S);

        let l_out = collect(&mut l, 4);
        let s_out = collect(&mut s, 40);
        for lsb in &l_out {
            assert!(s_out.contains(lsb), "{lsb:#x} missing from the S stream");
        }
    }

    /// The twin fast-skip must not lose candidates around the budget
    /// boundary: compare against a plain-stepped reference for a window.
    #[test]
    fn twin_fast_skip_matches_reference_filter() {
        let q = (Integer::from(1) << 160u32) + 5u32;
        let mut st = state_for(&q, PrimeType::Twin, TableTier::S);
        let got = collect(&mut st, 12);

        // Reference: re-reduce every 6k+5 value in the covered window.
        let t = tables();
        let start_lsb = q.to_u64_wrapping();
        let mut expect = Vec::new();
        let mut cand = q.clone() + (5u32 + 6 - q.mod_u(6)) % 6;
        while expect.len() < 12 {
            let survives = t.primes.0[..576].iter().all(|&p| {
                let p = u32::from(p);
                cand.mod_u(p) != 0 && Integer::from(&cand + 2u32).mod_u(p) != 0
            });
            if survives {
                expect.push(
                    Integer::from(&cand - &q)
                        .to_u64()
                        .unwrap()
                        .wrapping_add(start_lsb),
                );
            }
            cand += 6u32;
        }
        assert_eq!(got, expect);
    }
}
