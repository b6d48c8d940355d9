//! isomiR classification of realignment results.

use crate::alignment_record::ReadRecord;
use crate::mature::MatureIndex;
use crate::realign::RealignmentResult;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadEnd {
    FivePrime,
    ThreePrime,
}

impl ReadEnd {
    fn tag(self) -> &'static str {
        match self {
            ReadEnd::FivePrime => "5p",
            ReadEnd::ThreePrime => "3p",
        }
    }
}

/// One difference between a read and its reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Variant {
    /// Internal mismatch at a 0-based read position
    Substitution {
        position: usize,
        reference: u8,
        read: u8,
    },
    /// Extra bases at a read end. Templated bases extend past the mature arm
    /// on the precursor; non-templated ones do not match the precursor at all.
    Addition {
        end: ReadEnd,
        bases: String,
        templated: bool,
    },
    /// Bases of the mature arm missing from a read end
    Deletion { end: ReadEnd, length: usize },
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Substitution {
                position,
                reference,
                read,
            } => write!(
                f,
                "sub:{}:{}>{}",
                position,
                reference.to_ascii_uppercase() as char,
                read.to_ascii_uppercase() as char
            ),
            Variant::Addition {
                end,
                bases,
                templated: true,
            } => write!(f, "add{}:{}", end.tag(), bases),
            Variant::Addition {
                end,
                bases,
                templated: false,
            } => write!(f, "nta{}:{}", end.tag(), bases),
            Variant::Deletion { end, length } => write!(f, "del{}:{}", end.tag(), length),
        }
    }
}

/// Final isomiR call for a read
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
    pub read: String,
    pub sequence: String,
    pub precursor: String,
    pub offset: usize,
    pub mature: Option<String>,
    pub score: i32,
    pub mismatches: usize,
    pub trim5: usize,
    pub trim3: usize,
    pub variants: Vec<Variant>,
    /// Position the upstream aligner reported on the chosen precursor
    pub reported_position: Option<i64>,
}

impl Annotation {
    pub fn is_exact(&self) -> bool {
        self.variants.is_empty()
    }

    /// Comma-separated variant list, or `exact`
    pub fn descriptor(&self) -> String {
        if self.variants.is_empty() {
            return "exact".to_string();
        }
        self.variants
            .iter()
            .map(Variant::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn read_bases(sequence: &[u8], start: usize, end: usize) -> String {
    sequence
        .get(start..end)
        .map(|bases| String::from_utf8_lossy(bases).to_ascii_uppercase())
        .unwrap_or_default()
}

/// Classify a realignment into an annotation. Pure; never fails.
pub fn annotate(
    read: &ReadRecord,
    result: &RealignmentResult,
    matures: Option<&MatureIndex>,
) -> Annotation {
    let sequence = &read.sequence;
    let (aligned_start, aligned_end) = result.aligned_span();
    // read coordinates of the aligned span
    let (span_start, span_end) = (result.trim5, result.read_len - result.trim3);

    let mature = matures.and_then(|m| m.best_overlap(&result.precursor, aligned_start, aligned_end));

    let mut five_prime = Vec::new();
    let mut three_prime = Vec::new();

    if let Some(arm) = mature {
        if aligned_start < arm.start {
            let extra = arm.start - aligned_start;
            five_prime.push(Variant::Addition {
                end: ReadEnd::FivePrime,
                bases: read_bases(sequence, span_start, span_start + extra),
                templated: true,
            });
        } else if aligned_start > arm.start {
            five_prime.push(Variant::Deletion {
                end: ReadEnd::FivePrime,
                length: aligned_start - arm.start,
            });
        }

        if aligned_end > arm.end {
            let extra = aligned_end - arm.end;
            three_prime.push(Variant::Addition {
                end: ReadEnd::ThreePrime,
                bases: read_bases(sequence, span_end - extra, span_end),
                templated: true,
            });
        } else if aligned_end < arm.end {
            three_prime.push(Variant::Deletion {
                end: ReadEnd::ThreePrime,
                length: arm.end - aligned_end,
            });
        }
    }

    if result.trim5 > 0 {
        five_prime.push(Variant::Addition {
            end: ReadEnd::FivePrime,
            bases: read_bases(sequence, 0, result.trim5),
            templated: false,
        });
    }
    if result.trim3 > 0 {
        three_prime.push(Variant::Addition {
            end: ReadEnd::ThreePrime,
            bases: read_bases(sequence, span_end, result.read_len),
            templated: false,
        });
    }

    let substitutions = result.mismatches.iter().map(|m| Variant::Substitution {
        position: m.position,
        reference: m.reference,
        read: m.read,
    });

    let variants: Vec<Variant> = five_prime
        .into_iter()
        .chain(substitutions)
        .chain(three_prime)
        .collect();

    Annotation {
        read: read.name.clone(),
        sequence: String::from_utf8_lossy(sequence).into_owned(),
        precursor: result.precursor.clone(),
        offset: result.offset,
        mature: mature.map(|arm| arm.name.clone()),
        score: result.score,
        mismatches: result.mismatches.len(),
        trim5: result.trim5,
        trim3: result.trim3,
        variants,
        reported_position: read.hit_on(&result.precursor).map(|hit| hit.position),
    }
}
