//! Duration model
//!
//! A duration is either *fractional* (numerator/denominator of a whole note
//! plus augmentation dots) or a raw tick count. Fractional durations stay
//! exact through dot and tuplet scaling via rational arithmetic; rounding
//! to integer ticks happens once, at conversion time.

use num_rational::Ratio;
use serde::{Deserialize, Serialize};

/// Legal fractional denominators: whole down to sixty-fourth
pub const LEGAL_DENOMINATORS: [u32; 7] = [1, 2, 4, 8, 16, 32, 64];

/// Maximum number of augmentation dots
pub const MAX_DOTS: u8 = 3;

/// A musical duration
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Duration {
    /// `num`/`den` of a whole note with `dots` augmentation dots
    Fraction { num: u32, den: u32, dots: u8 },
    /// An absolute tick count, independent of PPQ
    Ticks { ticks: u64 },
}

impl Duration {
    /// A fractional duration, validating denominator and dot count
    pub fn fraction(num: u32, den: u32, dots: u8) -> Option<Duration> {
        if num == 0 || dots > MAX_DOTS || !LEGAL_DENOMINATORS.contains(&den) {
            return None;
        }
        Some(Duration::Fraction { num, den, dots })
    }

    /// A tick-based duration; must be positive
    pub fn ticks(ticks: u64) -> Option<Duration> {
        if ticks == 0 {
            None
        } else {
            Some(Duration::Ticks { ticks })
        }
    }

    pub fn quarter() -> Duration {
        Duration::Fraction { num: 1, den: 4, dots: 0 }
    }

    /// The exact length in whole notes, with dots applied
    ///
    /// A duration with k dots is multiplied by `2 - 2^(-k)`,
    /// i.e. `(2^(k+1) - 1) / 2^k`.
    fn whole_notes(num: u32, den: u32, dots: u8) -> Ratio<u64> {
        let base = Ratio::new(num as u64, den as u64);
        let dot_mult = Ratio::new((1u64 << (dots as u32 + 1)) - 1, 1u64 << dots as u32);
        base * dot_mult
    }

    /// Convert to integer ticks under `ppq` and an active tuplet stack
    ///
    /// Each `(actual, normal)` tuplet level scales by `normal/actual`;
    /// levels compose multiplicatively. Rounding is half-up to the nearest
    /// tick. Returns `None` when the result would fall below 1 tick.
    pub fn to_ticks(&self, ppq: u32, tuplets: &[(u32, u32)]) -> Option<u64> {
        let mut exact: Ratio<u64> = match *self {
            Duration::Ticks { ticks } => Ratio::from_integer(ticks),
            Duration::Fraction { num, den, dots } => {
                Self::whole_notes(num, den, dots) * Ratio::from_integer(ppq as u64 * 4)
            }
        };
        for &(actual, normal) in tuplets {
            exact *= Ratio::new(normal as u64, actual as u64);
        }
        let rounded = round_half_up(exact);
        if rounded >= 1 {
            Some(rounded)
        } else {
            None
        }
    }

    /// Add two fractional durations
    ///
    /// The sum is stored dot-free as a reduced fraction (e.g. `q + e` =
    /// 3/8). Tick durations do not participate in addition. Returns `None`
    /// when either side is tick-based or the reduced denominator is not a
    /// legal power of two.
    pub fn add(&self, other: &Duration) -> Option<Duration> {
        let (a, b) = match (self, other) {
            (
                Duration::Fraction { num: n1, den: d1, dots: k1 },
                Duration::Fraction { num: n2, den: d2, dots: k2 },
            ) => (Self::whole_notes(*n1, *d1, *k1), Self::whole_notes(*n2, *d2, *k2)),
            _ => return None,
        };
        Self::from_whole_notes(a + b)
    }

    /// Scale by a positive integer factor
    pub fn scale(&self, factor: i64) -> Option<Duration> {
        if factor <= 0 {
            return None;
        }
        match *self {
            Duration::Ticks { ticks } => Duration::ticks(ticks.checked_mul(factor as u64)?),
            Duration::Fraction { num, den, dots } => {
                Self::from_whole_notes(Self::whole_notes(num, den, dots) * Ratio::from_integer(factor as u64))
            }
        }
    }

    /// Divide by a positive integer factor
    ///
    /// Fails when the result is no longer expressible with a legal
    /// denominator (e.g. a quarter divided by 3).
    pub fn divide(&self, divisor: i64) -> Option<Duration> {
        if divisor <= 0 {
            return None;
        }
        match *self {
            Duration::Ticks { ticks } => Duration::ticks(ticks / divisor as u64),
            Duration::Fraction { num, den, dots } => {
                Self::from_whole_notes(Self::whole_notes(num, den, dots) / Ratio::from_integer(divisor as u64))
            }
        }
    }

    fn from_whole_notes(exact: Ratio<u64>) -> Option<Duration> {
        let num = u32::try_from(*exact.numer()).ok()?;
        let den = u32::try_from(*exact.denom()).ok()?;
        Duration::fraction(num, den, 0)
    }

    pub fn is_fractional(&self) -> bool {
        matches!(self, Duration::Fraction { .. })
    }
}

fn round_half_up(r: Ratio<u64>) -> u64 {
    ((r * Ratio::from_integer(2) + Ratio::from_integer(1)) / Ratio::from_integer(2)).floor().to_integer()
}

impl std::fmt::Display for Duration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Duration::Ticks { ticks } => write!(f, "{}t", ticks),
            Duration::Fraction { num, den, dots } => {
                write!(f, "{}/{}", num, den)?;
                for _ in 0..dots {
                    write!(f, ".")?;
                }
                Ok(())
            }
        }
    }
}
