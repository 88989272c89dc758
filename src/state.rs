//! # State — Residue State, Mode Word, and Advance Operators
//!
//! A [`State`] is the incremental mirror of one candidate Q: the vector of
//! 16-bit remainders `r[i] = Q mod primes[i]`, the low 64 bits of Q, the
//! cumulative advance since initialization, and Q mod 6. Construction
//! reduces the caller's big integer once per prime; afterwards the drivers
//! move the whole vector in lock-step with cheap lane adds, never touching
//! the big number again.
//!
//! The mode word packs the search type and the table tier, mirroring the
//! wire-stable bit assignments:
//!
//! ```text
//! prime type: Plain = 0x01, Twin = 0x02, Safe = 0x04, Fips186 = 0x08
//! table tier: S = 0x0100 (576), M = 0x0200 (1856), L = 0x0300 (3456)
//! ```
//!
//! `Fips186` (the vector-increment search) is recognized but refused at
//! construction; its semantics are reserved. The `mod6_incr` field likewise
//! stays zero until that search exists.
//!
//! Remainders are sensitive for key-generation workloads: a `State` zeroizes
//! its lanes, LSB mirror, and hex mirror when dropped.

use rug::integer::Order;
use rug::Integer;
use thiserror::Error;
use zeroize::Zeroize;

use crate::simd::{self, Block, BLOCK};
use crate::tables::{tables, AlignedLanes, N_MAX};

/// Candidates wider than this are refused.
pub const MAX_Q_BITS: u32 = 8192;

/// Largest scalar advance a single application may carry: the twin/safe
/// skip budget of 2^14, rounded up to a whole 6-step. The lane headroom
/// argument (at-rest lanes < 2^15) depends on this cap.
pub(crate) const MAX_ADVANCE: u16 = (1 << 14) + 2;

/// Search type selected by a state's mode word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum PrimeType {
    /// Every 6k+1 / 6k+5 candidate, testing Q alone.
    Plain = 0x01,
    /// 6k+5 candidates where Q and Q+2 both survive.
    Twin = 0x02,
    /// 6k+5 candidates where Q and 2Q+1 both survive.
    Safe = 0x04,
    /// Incremental search with a big-number stride; reserved, refused at
    /// construction.
    Fips186 = 0x08,
}

impl PrimeType {
    pub fn name(self) -> &'static str {
        match self {
            PrimeType::Plain => "plain",
            PrimeType::Twin => "twin",
            PrimeType::Safe => "safe",
            PrimeType::Fips186 => "fips186",
        }
    }
}

/// Number of small primes trial-divided against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum TableTier {
    /// 576 primes: for environments with fast modular exponentiation.
    S = 0x0100,
    /// 1856 primes: comparable to common software trial-division depth.
    M = 0x0200,
    /// 3456 primes: for slow exponentiation or high bit counts.
    L = 0x0300,
}

impl TableTier {
    /// Prime count of this tier; always a multiple of the block width.
    pub fn primes(self) -> usize {
        match self {
            TableTier::S => 576,
            TableTier::M => 1856,
            TableTier::L => N_MAX,
        }
    }

    pub(crate) fn blocks(self) -> usize {
        self.primes() / BLOCK
    }
}

/// Prime type × table tier, as carried in a state's mode word.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mode {
    pub prime_type: PrimeType,
    pub tier: TableTier,
}

impl Mode {
    pub fn new(prime_type: PrimeType, tier: TableTier) -> Self {
        Mode { prime_type, tier }
    }

    /// The packed wire encoding.
    pub fn bits(self) -> u32 {
        self.prime_type as u32 | self.tier as u32
    }

    /// Decode a packed mode word; anything but exactly one prime type and
    /// one tier is refused.
    pub fn try_from_bits(bits: u32) -> Result<Self, SieveError> {
        let prime_type = match bits & 0xff {
            0x01 => PrimeType::Plain,
            0x02 => PrimeType::Twin,
            0x04 => PrimeType::Safe,
            0x08 => PrimeType::Fips186,
            _ => return Err(SieveError::UnsupportedMode(bits)),
        };
        let tier = match bits & 0xff00 {
            0x0100 => TableTier::S,
            0x0200 => TableTier::M,
            0x0300 => TableTier::L,
            _ => return Err(SieveError::UnsupportedMode(bits)),
        };
        if bits & !0xffff != 0 {
            return Err(SieveError::UnsupportedMode(bits));
        }
        Ok(Mode { prime_type, tier })
    }
}

/// Construction-time failures. Drivers themselves have no I/O and no
/// recoverable errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SieveError {
    /// The starting value is unusable: even, zero, or too wide.
    #[error("invalid candidate: {0}")]
    InvalidInput(&'static str),
    /// The mode word names a search type or tier this build does not run.
    #[error("unsupported search mode {0:#06x}")]
    UnsupportedMode(u32),
}

/// Incremental residue state for one candidate search.
#[derive(Debug)]
pub struct State {
    residues: Box<AlignedLanes>,
    /// Low 64 bits of the candidate. Wraparound at 2^64 is not tracked;
    /// for wider candidates this is a truncating mirror only.
    lsb: u64,
    /// Cumulative advance since initialization.
    offset: u64,
    /// Candidate mod 6; maintained by every advance.
    mod6: u32,
    /// Stride mod 6 for the vector-increment search; reserved, always 0.
    mod6_incr: u32,
    mode: Mode,
    /// True when the starting value fit 63 bits, i.e. `lsb` is the exact
    /// candidate and 2·lsb+1 still fits u64.
    exact_lsb: bool,
    /// Diagnostic mirror of the starting value's hex text.
    q_hex: String,
}

impl State {
    /// Initialize from a big-endian byte string. The authoritative big
    /// number stays with the caller; the state only keeps reductions.
    pub fn from_be_bytes(q: &[u8], mode: Mode) -> Result<Self, SieveError> {
        Self::new(&Integer::from_digits(q, Order::MsfBe), mode)
    }

    /// Initialize from the caller's big integer.
    pub fn new(q: &Integer, mode: Mode) -> Result<Self, SieveError> {
        if q.is_zero() {
            return Err(SieveError::InvalidInput("zero"));
        }
        if q.is_even() {
            return Err(SieveError::InvalidInput("even"));
        }
        if q.significant_bits() > MAX_Q_BITS {
            return Err(SieveError::InvalidInput("wider than the supported bit count"));
        }
        if mode.prime_type == PrimeType::Fips186 {
            return Err(SieveError::UnsupportedMode(mode.bits()));
        }

        let t = tables();
        let mut residues = Box::new(AlignedLanes([0; N_MAX]));
        for (r, &p) in residues.0.iter_mut().zip(t.primes.0.iter()) {
            *r = q.mod_u(u32::from(p)) as u16;
        }

        let state = State {
            residues,
            lsb: q.to_u64_wrapping(),
            offset: 0,
            mod6: q.mod_u(6),
            mod6_incr: 0,
            mode,
            exact_lsb: q.significant_bits() <= 63,
            q_hex: q.to_string_radix(16),
        };
        tracing::debug!(
            bits = q.significant_bits(),
            mode = format_args!("{:#06x}", mode.bits()),
            "sieve state initialized"
        );
        Ok(state)
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Low 64 bits of the current candidate (truncating past 2^64).
    pub fn lsb(&self) -> u64 {
        self.lsb
    }

    /// Total advance applied since initialization.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Current candidate mod 6.
    pub fn mod6(&self) -> u32 {
        self.mod6
    }

    /// Hex text of the starting value (diagnostics only; not advanced).
    pub fn q_hex(&self) -> &str {
        &self.q_hex
    }

    /// Whether [`lsb`](Self::lsb) is the exact candidate value.
    pub fn lsb_is_exact(&self) -> bool {
        self.exact_lsb
    }

    /// The remainder lanes. Lanes are congruent to the candidate mod their
    /// prime but not reduced below it; at rest every lane is below 2^15.
    pub fn residues(&self) -> &[u16] {
        &self.residues.0
    }

    pub(crate) fn blocks(&self) -> &[Block] {
        let (blocks, _) = self.residues.0.as_chunks::<BLOCK>();
        blocks
    }

    fn blocks_mut(&mut self) -> &mut [Block] {
        let (blocks, _) = self.residues.0.as_chunks_mut::<BLOCK>();
        blocks
    }

    /// Advance the whole tier plus the scalar mirrors by `adv`.
    pub(crate) fn advance(&mut self, adv: u16) {
        debug_assert!(adv <= MAX_ADVANCE);
        self.advance_scalars(u32::from(adv));
        let nb = self.mode.tier.blocks();
        let (fold, _) = tables().fold.0.as_chunks::<BLOCK>();
        for (v, f) in self.blocks_mut()[..nb].iter_mut().zip(fold) {
            simd::block_advance(v, adv, f);
        }
    }

    /// Advance only the first 64 lanes; the scalar mirrors and the remaining
    /// blocks are settled later via [`Self::advance_scalars`] and
    /// [`Self::advance_tail`].
    pub(crate) fn advance_lead(&mut self, adv: u16) {
        let (fold, _) = tables().fold.0.as_chunks::<BLOCK>();
        simd::block_advance(&mut self.blocks_mut()[0], adv, &fold[0]);
    }

    /// Advance blocks 1.. of the tier by the accumulated skip.
    pub(crate) fn advance_tail(&mut self, adv: u16) {
        assert!(adv <= MAX_ADVANCE, "lane headroom exceeded: advance {adv}");
        let nb = self.mode.tier.blocks();
        let (fold, _) = tables().fold.0.as_chunks::<BLOCK>();
        for (v, f) in self.blocks_mut()[1..nb].iter_mut().zip(&fold[1..nb]) {
            simd::block_advance(v, adv, f);
        }
    }

    /// Advance the scalar mirrors (LSB, offset, mod 6) without touching
    /// lanes.
    pub(crate) fn advance_scalars(&mut self, adv: u32) {
        self.offset = self.offset.wrapping_add(u64::from(adv));
        self.lsb = self.lsb.wrapping_add(u64::from(adv));
        self.mod6 = (self.mod6 + adv % 6) % 6;
    }
}

impl Clone for State {
    fn clone(&self) -> Self {
        State {
            residues: self.residues.clone(),
            lsb: self.lsb,
            offset: self.offset,
            mod6: self.mod6,
            mod6_incr: self.mod6_incr,
            mode: self.mode,
            exact_lsb: self.exact_lsb,
            q_hex: self.q_hex.clone(),
        }
    }
}

impl Drop for State {
    /// Remainders and the LSB mirror are functions of the candidate being
    /// searched; scrub them on the way out.
    fn drop(&mut self) {
        self.residues.0.zeroize();
        self.lsb.zeroize();
        self.q_hex.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode(prime_type: PrimeType, tier: TableTier) -> Mode {
        Mode::new(prime_type, tier)
    }

    #[test]
    fn rejects_even_zero_and_oversized() {
        let m = mode(PrimeType::Plain, TableTier::S);
        assert_eq!(
            State::new(&Integer::from(0), m).unwrap_err(),
            SieveError::InvalidInput("zero")
        );
        assert_eq!(
            State::new(&Integer::from(100), m).unwrap_err(),
            SieveError::InvalidInput("even")
        );
        let wide = Integer::from(1) << 8200u32;
        let wide = wide + 1u32;
        assert!(matches!(
            State::new(&wide, m).unwrap_err(),
            SieveError::InvalidInput(_)
        ));
    }

    #[test]
    fn rejects_reserved_increment_search() {
        let err = State::new(&Integer::from(11), mode(PrimeType::Fips186, TableTier::L));
        assert_eq!(err.unwrap_err(), SieveError::UnsupportedMode(0x0308));
    }

    #[test]
    fn mode_bits_round_trip() {
        for pt in [PrimeType::Plain, PrimeType::Twin, PrimeType::Safe, PrimeType::Fips186] {
            for tier in [TableTier::S, TableTier::M, TableTier::L] {
                let m = mode(pt, tier);
                assert_eq!(Mode::try_from_bits(m.bits()).unwrap(), m);
            }
        }
        assert!(Mode::try_from_bits(0x0105).is_err()); // two type bits
        assert!(Mode::try_from_bits(0x0401).is_err()); // no such tier
        assert!(Mode::try_from_bits(0x0000).is_err());
        assert!(Mode::try_from_bits(0x1_0201).is_err()); // stray field bits
    }

    #[test]
    fn init_reduces_every_prime() {
        let q = Integer::from_str_radix("123456789abcdef123456789abcdef1", 16).unwrap();
        let st = State::new(&q, mode(PrimeType::Plain, TableTier::L)).unwrap();
        let t = tables();
        for i in [0usize, 1, 63, 64, 575, 576, 1855, 1856, 3455] {
            let p = t.primes.0[i];
            assert_eq!(u32::from(st.residues()[i]), q.mod_u(u32::from(p)), "p={p}");
            assert!(st.residues()[i] < p);
        }
        assert_eq!(st.lsb(), q.to_u64_wrapping());
        assert_eq!(st.mod6(), q.mod_u(6));
        assert_eq!(st.offset(), 0);
        assert!(!st.lsb_is_exact());
        assert_eq!(st.q_hex(), q.to_string_radix(16));
    }

    #[test]
    fn exactness_reflects_width() {
        let m = mode(PrimeType::Plain, TableTier::S);
        assert!(State::new(&Integer::from(101), m).unwrap().lsb_is_exact());
        let wide = (Integer::from(1) << 100u32) + 1u32;
        assert!(!State::new(&wide, m).unwrap().lsb_is_exact());
    }

    #[test]
    fn advance_tracks_congruences_and_mirrors() {
        let q = Integer::from_str_radix("2b8d7c9e1f3a5b7d9e1f3a5b7d9f", 16).unwrap();
        let mut st = State::new(&q, mode(PrimeType::Plain, TableTier::M)).unwrap();
        let t = tables();

        let steps = [1u16, 4, 2, 6, 6, 16386, 2, 4, 6];
        let mut total = 0u64;
        for &s in &steps {
            if s > 6 {
                // split path, as the twin/safe drivers apply it
                st.advance_lead(s);
                st.advance_scalars(u32::from(s));
                st.advance_tail(s);
            } else {
                st.advance(s);
            }
            total += u64::from(s);

            let expect = q.clone() + total;
            assert_eq!(st.offset(), total);
            assert_eq!(st.lsb(), expect.to_u64_wrapping());
            assert_eq!(st.mod6(), expect.mod_u(6));
            for i in [0usize, 5, 63, 64, 1000, 1855] {
                let p = u32::from(t.primes.0[i]);
                assert_eq!(
                    u32::from(st.residues()[i]) % p,
                    expect.mod_u(p),
                    "i={i} after +{total}"
                );
                assert!(st.residues()[i] < 0x8000);
            }
        }
    }

    #[test]
    fn from_be_bytes_matches_integer_init() {
        let q = Integer::from_str_radix("deadbeef00000000000000000000000d", 16).unwrap();
        let bytes = q.to_digits::<u8>(Order::MsfBe);
        let a = State::from_be_bytes(&bytes, mode(PrimeType::Safe, TableTier::S)).unwrap();
        let b = State::new(&q, mode(PrimeType::Safe, TableTier::S)).unwrap();
        assert_eq!(a.lsb(), b.lsb());
        assert_eq!(a.residues(), b.residues());
        assert_eq!(a.mod6(), b.mod6());
    }

    #[test]
    fn clone_is_independent() {
        let q = Integer::from(1000003);
        let mut a = State::new(&q, mode(PrimeType::Twin, TableTier::S)).unwrap();
        let b = a.clone();
        a.advance(6);
        assert_eq!(b.offset(), 0);
        assert_ne!(a.lsb(), b.lsb());
    }
}
