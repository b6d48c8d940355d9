//! Realignment of reads against candidate precursor hairpins.
//!
//! Placement is ungapped and semi-global: the read is slid along the precursor
//! and must fit entirely inside it. Runs of mismatching bases at the read ends
//! are trimmed (non-templated additions) instead of being counted as
//! substitutions, up to a configured length per end.

use crate::alignment_record::ReadRecord;
use crate::error::{MiralignError, Result};
use crate::precursor::{Precursor, PrecursorIndex};
use log::debug;
use std::cmp::Ordering;

/// Scoring and filtering parameters for realignment.
#[derive(Debug, Clone)]
pub struct RealignConfig {
    /// Score per matching base.
    /// Default: 1
    pub match_score: i32,

    /// Penalty per internal mismatch.
    /// Default: 3
    pub mismatch_penalty: i32,

    /// Penalty per trimmed terminal base.
    /// Default: 1
    pub trim_penalty: i32,

    /// Maximum internal mismatches for a placement to be kept.
    /// Default: 1
    pub max_mismatches: usize,

    /// Maximum mismatching bases trimmed from the 5' end of the read.
    /// Default: 0
    pub max_trim_5p: usize,

    /// Maximum mismatching bases trimmed from the 3' end of the read.
    /// Default: 3
    pub max_trim_3p: usize,

    /// Placements scoring below this are discarded.
    /// Default: 8
    pub min_score: i32,
}

impl Default for RealignConfig {
    fn default() -> Self {
        RealignConfig {
            match_score: 1,
            mismatch_penalty: 3,
            trim_penalty: 1,
            max_mismatches: 1,
            max_trim_5p: 0,
            max_trim_3p: 3,
            min_score: 8,
        }
    }
}

/// A read base differing from the precursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mismatch {
    /// 0-based position in the read
    pub position: usize,
    pub reference: u8,
    pub read: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealignmentResult {
    pub precursor: String,
    /// 0-based position of the first read base on the precursor
    pub offset: usize,
    pub read_len: usize,
    /// Internal mismatches, ordered by read position
    pub mismatches: Vec<Mismatch>,
    pub trim5: usize,
    pub trim3: usize,
    pub score: i32,
}

impl RealignmentResult {
    pub fn total_trim(&self) -> usize {
        self.trim5 + self.trim3
    }

    /// Aligned span on the precursor, excluding trimmed bases (half-open)
    pub fn aligned_span(&self) -> (usize, usize) {
        (
            self.offset + self.trim5,
            self.offset + self.read_len - self.trim3,
        )
    }

    pub fn is_exact(&self) -> bool {
        self.mismatches.is_empty() && self.total_trim() == 0
    }
}

/// Placement of the read at one offset, before the precursor name is attached
struct Placement {
    offset: usize,
    mismatches: Vec<Mismatch>,
    trim5: usize,
    trim3: usize,
    score: i32,
}

impl Placement {
    /// `Less` means `self` ranks ahead of `other`
    fn rank(&self, other: &Placement) -> Ordering {
        other
            .score
            .cmp(&self.score)
            .then_with(|| self.mismatches.len().cmp(&other.mismatches.len()))
            .then_with(|| (self.trim5 + self.trim3).cmp(&(other.trim5 + other.trim3)))
            .then_with(|| self.offset.cmp(&other.offset))
    }
}

fn normalize_base(base: u8) -> u8 {
    match base.to_ascii_uppercase() {
        b'U' => b'T',
        other => other,
    }
}

/// Case-insensitive, U/T-equivalent comparison. `N` never matches.
pub fn bases_match(read: u8, reference: u8) -> bool {
    let read = normalize_base(read);
    read != b'N' && read == normalize_base(reference)
}

fn score_placement(
    read: &[u8],
    window: &[u8],
    offset: usize,
    config: &RealignConfig,
) -> Option<Placement> {
    let read_len = read.len();
    let matches_at = |i: usize| bases_match(read[i], window[i]);

    let mut trim3 = 0;
    while trim3 < config.max_trim_3p && trim3 < read_len && !matches_at(read_len - 1 - trim3) {
        trim3 += 1;
    }
    let mut trim5 = 0;
    while trim5 < config.max_trim_5p && trim5 + trim3 < read_len && !matches_at(trim5) {
        trim5 += 1;
    }
    if trim5 + trim3 >= read_len {
        return None;
    }

    let mut mismatches = Vec::new();
    for i in trim5..read_len - trim3 {
        if !matches_at(i) {
            if mismatches.len() == config.max_mismatches {
                return None;
            }
            mismatches.push(Mismatch {
                position: i,
                reference: window[i],
                read: read[i],
            });
        }
    }

    let aligned = (read_len - trim3 - trim5) as i32;
    let matched = aligned - mismatches.len() as i32;
    let score = matched * config.match_score
        - mismatches.len() as i32 * config.mismatch_penalty
        - (trim5 + trim3) as i32 * config.trim_penalty;
    if score < config.min_score {
        return None;
    }

    Some(Placement {
        offset,
        mismatches,
        trim5,
        trim3,
        score,
    })
}

/// Best placement of `read` on `precursor`, or `None` when nothing scores above the threshold.
pub fn realign(
    read: &[u8],
    precursor: &Precursor,
    config: &RealignConfig,
) -> Option<RealignmentResult> {
    let read_len = read.len();
    if read_len == 0 || read_len > precursor.len() {
        return None;
    }

    let mut best: Option<Placement> = None;
    for (offset, window) in precursor.sequence.windows(read_len).enumerate() {
        if let Some(placement) = score_placement(read, window, offset, config) {
            let better = best
                .as_ref()
                .map_or(true, |current| placement.rank(current) == Ordering::Less);
            if better {
                best = Some(placement);
            }
        }
    }

    best.map(|placement| RealignmentResult {
        precursor: precursor.name.clone(),
        offset: placement.offset,
        read_len,
        mismatches: placement.mismatches,
        trim5: placement.trim5,
        trim3: placement.trim3,
        score: placement.score,
    })
}

/// Ranking across precursors: score, fewest mismatches, shortest trim, then name.
pub fn compare_results(a: &RealignmentResult, b: &RealignmentResult) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| a.mismatches.len().cmp(&b.mismatches.len()))
        .then_with(|| a.total_trim().cmp(&b.total_trim()))
        .then_with(|| a.precursor.cmp(&b.precursor))
}

/// Realign a read against all of its reported candidate precursors and keep the best.
pub fn realign_hits(
    read: &ReadRecord,
    precursors: &PrecursorIndex,
    config: &RealignConfig,
) -> Result<RealignmentResult> {
    let mut best: Option<RealignmentResult> = None;

    for name in read.candidates() {
        let Some(precursor) = precursors.get(name) else {
            debug!(
                "Read {} reported on '{}', which is not in the precursor reference",
                read.name, name
            );
            continue;
        };
        if let Some(result) = realign(&read.sequence, precursor, config) {
            let better = best
                .as_ref()
                .map_or(true, |current| compare_results(&result, current) == Ordering::Less);
            if better {
                best = Some(result);
            }
        }
    }

    best.ok_or_else(|| MiralignError::Alignment {
        read: read.name.clone(),
    })
}
