//! Packed outgoing-edge encoding
//!
//! Each node carries a `(first, last)` pair of 32-bit values. Every value lies
//! in one of four disjoint ranges:
//!
//! | Range                     | Meaning                                     |
//! |---------------------------|---------------------------------------------|
//! | `0`                       | absent                                      |
//! | `1 ..= 2^31 - 1`          | direct node index, offset by 1              |
//! | `2^31 ..= 2^32 - 2`       | indirect side-table index, offset by 2^31   |
//! | `2^32 - 1`                | unknown                                     |
//!
//! [`Targets`] is the decoded pair; the raw values only exist in node records.

pub const ABSENT: u32 = 0;
pub const DIRECT_MIN: u32 = 1;
pub const DIRECT_MAX: u32 = 0x7fff_ffff;
pub const INDIRECT_MIN: u32 = 0x8000_0000;
pub const INDIRECT_MAX: u32 = 0xffff_fffe;
pub const UNKNOWN: u32 = 0xffff_ffff;

/// Largest node index a direct target can hold
pub const MAX_DIRECT_IDX: u32 = DIRECT_MAX - DIRECT_MIN;
/// Largest side-table index an indirect target can hold
pub const MAX_INDIRECT_IDX: u32 = INDIRECT_MAX - INDIRECT_MIN;

/// One decoded target slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Absent,
    /// Node array index
    Direct(u32),
    /// Side-table index (target hashes or extra edges)
    Indirect(u32),
    Unknown,
}

impl Target {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            ABSENT => Target::Absent,
            UNKNOWN => Target::Unknown,
            DIRECT_MIN..=DIRECT_MAX => Target::Direct(raw - DIRECT_MIN),
            _ => Target::Indirect(raw - INDIRECT_MIN),
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            Target::Absent => ABSENT,
            Target::Unknown => UNKNOWN,
            Target::Direct(idx) => {
                assert!(idx <= MAX_DIRECT_IDX, "direct index {} out of range", idx);
                idx + DIRECT_MIN
            }
            Target::Indirect(idx) => {
                assert!(idx <= MAX_INDIRECT_IDX, "indirect index {} out of range", idx);
                idx + INDIRECT_MIN
            }
        }
    }
}

/// A node's outgoing edge set, decoded from its target pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Targets {
    /// Outgoing edges are not known
    Unknown,
    /// No outgoing edges
    Absent,
    /// One inline edge (node index)
    One(u32),
    /// Two inline edges (node indexes)
    Two(u32, u32),
    /// Inclusive span of side-table indexes
    Indirect { first: u32, last: u32 },
}

impl Targets {
    /// Decode a raw pair, rejecting every configuration outside the legal set.
    pub fn decode(first: u32, last: u32) -> Option<Self> {
        match (Target::from_raw(first), Target::from_raw(last)) {
            (Target::Unknown, Target::Unknown) => Some(Targets::Unknown),
            (Target::Absent, Target::Absent) => Some(Targets::Absent),
            (Target::Direct(a), Target::Absent) => Some(Targets::One(a)),
            (Target::Direct(a), Target::Direct(b)) => Some(Targets::Two(a, b)),
            (Target::Indirect(a), Target::Indirect(b)) if a <= b => {
                Some(Targets::Indirect { first: a, last: b })
            }
            _ => None,
        }
    }

    pub fn encode(self) -> (u32, u32) {
        let (first, last) = match self {
            Targets::Unknown => (Target::Unknown, Target::Unknown),
            Targets::Absent => (Target::Absent, Target::Absent),
            Targets::One(a) => (Target::Direct(a), Target::Absent),
            Targets::Two(a, b) => (Target::Direct(a), Target::Direct(b)),
            Targets::Indirect { first, last } => {
                debug_assert!(first <= last);
                (Target::Indirect(first), Target::Indirect(last))
            }
        };
        (first.to_raw(), last.to_raw())
    }

    /// Span of side-table indexes `first..last+1` from a first and a
    /// one-past-the-end index; an empty span is `Absent`.
    pub fn span(start: usize, end: usize) -> Self {
        if start == end {
            Targets::Absent
        } else {
            Targets::Indirect { first: start as u32, last: (end - 1) as u32 }
        }
    }

    pub fn is_known(self) -> bool {
        self != Targets::Unknown
    }

    /// Number of outgoing edges; unknown counts as none
    pub fn count(self) -> usize {
        match self {
            Targets::Unknown | Targets::Absent => 0,
            Targets::One(_) => 1,
            Targets::Two(..) => 2,
            Targets::Indirect { first, last } => (last - first) as usize + 1,
        }
    }

    /// Side-table range for indirect targets
    pub fn indirect_range(self) -> Option<std::ops::Range<usize>> {
        match self {
            Targets::Indirect { first, last } => Some(first as usize..last as usize + 1),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_ranges() {
        assert_eq!(Target::from_raw(0), Target::Absent);
        assert_eq!(Target::from_raw(1), Target::Direct(0));
        assert_eq!(Target::from_raw(DIRECT_MAX), Target::Direct(MAX_DIRECT_IDX));
        assert_eq!(Target::from_raw(INDIRECT_MIN), Target::Indirect(0));
        assert_eq!(Target::from_raw(INDIRECT_MAX), Target::Indirect(MAX_INDIRECT_IDX));
        assert_eq!(Target::from_raw(UNKNOWN), Target::Unknown);
        assert_eq!(Target::Direct(7).to_raw(), 8);
        assert_eq!(Target::Indirect(7).to_raw(), INDIRECT_MIN + 7);
    }

    #[test]
    fn test_decode_valid_pairs() {
        assert_eq!(Targets::decode(UNKNOWN, UNKNOWN), Some(Targets::Unknown));
        assert_eq!(Targets::decode(ABSENT, ABSENT), Some(Targets::Absent));
        assert_eq!(Targets::decode(5, ABSENT), Some(Targets::One(4)));
        assert_eq!(Targets::decode(5, 3), Some(Targets::Two(4, 2)));
        assert_eq!(
            Targets::decode(INDIRECT_MIN + 2, INDIRECT_MIN + 4),
            Some(Targets::Indirect { first: 2, last: 4 })
        );
    }

    #[test]
    fn test_decode_rejects_invalid_pairs() {
        assert_eq!(Targets::decode(UNKNOWN, ABSENT), None);
        assert_eq!(Targets::decode(ABSENT, 5), None);
        assert_eq!(Targets::decode(5, UNKNOWN), None);
        assert_eq!(Targets::decode(5, INDIRECT_MIN), None);
        assert_eq!(Targets::decode(INDIRECT_MIN + 4, INDIRECT_MIN + 2), None);
        assert_eq!(Targets::decode(INDIRECT_MIN, ABSENT), None);
    }

    #[test]
    fn test_counts() {
        assert_eq!(Targets::Unknown.count(), 0);
        assert_eq!(Targets::Absent.count(), 0);
        assert_eq!(Targets::One(3).count(), 1);
        assert_eq!(Targets::Two(3, 4).count(), 2);
        assert_eq!(Targets::Indirect { first: 10, last: 14 }.count(), 5);
        assert_eq!(Targets::span(3, 3), Targets::Absent);
        assert_eq!(Targets::span(3, 6), Targets::Indirect { first: 3, last: 5 });
    }

    #[test]
    fn test_encode_decode_pairs_agree() {
        for t in [
            Targets::Unknown,
            Targets::Absent,
            Targets::One(0),
            Targets::Two(1, 9),
            Targets::Indirect { first: 0, last: 0 },
        ] {
            let (first, last) = t.encode();
            assert_eq!(Targets::decode(first, last), Some(t));
        }
    }
}
