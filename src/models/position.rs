//! Positions and the meter map
//!
//! A position addresses a point in the song as `(bar, beat, sub)`, where
//! `bar` and `beat` are 1-based and `sub` is a tick offset into the beat.
//! Resolving a position to an absolute tick walks the meter map bar by
//! bar; meter changes only ever take effect at bar boundaries.

use serde::{Deserialize, Serialize};

/// A musical position: bar and beat are 1-based, `sub` is in ticks
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Position {
    pub bar: u32,
    pub beat: u32,
    pub sub: u32,
}

impl Position {
    pub fn new(bar: u32, beat: u32, sub: u32) -> Position {
        Position { bar, beat, sub }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.sub == 0 {
            write!(f, "{}:{}", self.bar, self.beat)
        } else {
            write!(f, "{}:{}+{}", self.bar, self.beat, self.sub)
        }
    }
}

/// Why a position failed to resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositionError {
    /// bar or beat was 0
    ZeroIndex,
    /// beat exceeds the numerator of the meter active at that bar
    BeatOutOfRange { beat: u32, numerator: u32 },
    /// sub is not smaller than the ticks in one beat
    SubOutOfRange { sub: u32, ticks_per_beat: u32 },
}

/// A meter change taking effect at the start of `bar`
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeterEntry {
    pub bar: u32,
    pub numerator: u32,
    pub denominator: u32,
}

/// Sorted list of meter changes, all aligned to bar boundaries
///
/// The map always has an entry for bar 1 (4/4 unless declared otherwise),
/// so every bar has a well-defined meter.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MeterMap {
    ppq: u32,
    entries: Vec<MeterEntry>,
}

impl MeterMap {
    /// A fresh map with the default 4/4 at bar 1
    pub fn new(ppq: u32) -> MeterMap {
        MeterMap {
            ppq,
            entries: vec![MeterEntry { bar: 1, numerator: 4, denominator: 4 }],
        }
    }

    pub fn ppq(&self) -> u32 {
        self.ppq
    }

    /// The same meter entries under a different PPQ
    pub fn clone_with_ppq(&self, ppq: u32) -> MeterMap {
        MeterMap { ppq, entries: self.entries.clone() }
    }

    /// Insert or replace the meter starting at `bar` (last declaration wins)
    pub fn set(&mut self, bar: u32, numerator: u32, denominator: u32) {
        match self.entries.binary_search_by_key(&bar, |e| e.bar) {
            Ok(i) => {
                self.entries[i].numerator = numerator;
                self.entries[i].denominator = denominator;
            }
            Err(i) => {
                self.entries.insert(i, MeterEntry { bar, numerator, denominator });
            }
        }
    }

    /// The meter active at `bar`
    pub fn meter_at(&self, bar: u32) -> MeterEntry {
        let mut active = self.entries[0];
        for e in &self.entries {
            if e.bar <= bar {
                active = *e;
            } else {
                break;
            }
        }
        active
    }

    fn ticks_per_beat(&self, denominator: u32) -> u32 {
        self.ppq * 4 / denominator
    }

    /// Absolute tick of the start of `bar` (1-based)
    pub fn bar_start_tick(&self, bar: u32) -> u64 {
        let mut tick = 0u64;
        let mut current = 1u32;
        while current < bar {
            let m = self.meter_at(current);
            tick += (m.numerator * self.ticks_per_beat(m.denominator)) as u64;
            current += 1;
        }
        tick
    }

    /// Resolve a position to an absolute tick
    ///
    /// Validates that `beat` fits the meter active at `pos.bar` and that
    /// `sub` is smaller than one beat.
    pub fn resolve(&self, pos: Position) -> Result<u64, PositionError> {
        if pos.bar == 0 || pos.beat == 0 {
            return Err(PositionError::ZeroIndex);
        }
        let meter = self.meter_at(pos.bar);
        if pos.beat > meter.numerator {
            return Err(PositionError::BeatOutOfRange {
                beat: pos.beat,
                numerator: meter.numerator,
            });
        }
        let tpb = self.ticks_per_beat(meter.denominator);
        if pos.sub >= tpb {
            return Err(PositionError::SubOutOfRange { sub: pos.sub, ticks_per_beat: tpb });
        }
        Ok(self.bar_start_tick(pos.bar) + ((pos.beat - 1) * tpb + pos.sub) as u64)
    }

    /// All meter changes as `(tick, numerator, denominator)`, sorted
    pub fn changes(&self) -> Vec<(u64, u32, u32)> {
        self.entries
            .iter()
            .map(|e| (self.bar_start_tick(e.bar), e.numerator, e.denominator))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_common_time() {
        let map = MeterMap::new(480);
        assert_eq!(map.resolve(Position::new(1, 1, 0)), Ok(0));
        assert_eq!(map.resolve(Position::new(2, 1, 0)), Ok(1920));
        assert_eq!(map.resolve(Position::new(1, 3, 240)), Ok(1200));
    }

    #[test]
    fn test_meter_change_at_bar_boundary() {
        let mut map = MeterMap::new(480);
        map.set(2, 3, 4);
        // bar 1 is 4/4 (1920 ticks), bar 2 is 3/4 (1440 ticks)
        assert_eq!(map.resolve(Position::new(2, 1, 0)), Ok(1920));
        assert_eq!(map.resolve(Position::new(3, 1, 0)), Ok(1920 + 1440));
    }

    #[test]
    fn test_compound_meter_ticks_per_beat() {
        let mut map = MeterMap::new(480);
        map.set(1, 6, 8);
        // 6/8: beat = eighth = 240 ticks
        assert_eq!(map.resolve(Position::new(1, 4, 0)), Ok(720));
        assert_eq!(map.resolve(Position::new(2, 1, 0)), Ok(1440));
    }

    #[test]
    fn test_beat_out_of_range() {
        let mut map = MeterMap::new(480);
        map.set(1, 3, 4);
        assert_eq!(
            map.resolve(Position::new(1, 4, 0)),
            Err(PositionError::BeatOutOfRange { beat: 4, numerator: 3 })
        );
    }

    #[test]
    fn test_sub_out_of_range() {
        let map = MeterMap::new(480);
        assert_eq!(
            map.resolve(Position::new(1, 1, 480)),
            Err(PositionError::SubOutOfRange { sub: 480, ticks_per_beat: 480 })
        );
        assert!(map.resolve(Position::new(1, 1, 479)).is_ok());
    }

    #[test]
    fn test_zero_index_rejected() {
        let map = MeterMap::new(480);
        assert_eq!(map.resolve(Position::new(0, 1, 0)), Err(PositionError::ZeroIndex));
        assert_eq!(map.resolve(Position::new(1, 0, 0)), Err(PositionError::ZeroIndex));
    }

    #[test]
    fn test_last_declaration_wins() {
        let mut map = MeterMap::new(480);
        map.set(1, 3, 4);
        map.set(1, 4, 4);
        assert_eq!(map.meter_at(1).numerator, 4);
        assert_eq!(map.changes(), vec![(0, 4, 4)]);
    }

    #[test]
    fn test_changes_sorted_by_tick() {
        let mut map = MeterMap::new(480);
        map.set(3, 6, 8);
        map.set(2, 3, 4);
        let changes = map.changes();
        assert_eq!(changes[0], (0, 4, 4));
        assert_eq!(changes[1], (1920, 3, 4));
        assert_eq!(changes[2], (1920 + 1440, 6, 8));
    }
}
