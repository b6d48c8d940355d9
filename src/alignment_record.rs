use crate::error::Result;
use std::path::Path;

/// Strand orientation of a reported alignment
#[derive(Default, PartialEq, Eq, Clone, Copy, Debug)]
#[repr(u8)]
pub enum Strand {
    #[default]
    Forward,
    Reverse,
}

impl Strand {
    pub fn as_char(self) -> char {
        match self {
            Strand::Forward => '+',
            Strand::Reverse => '-',
        }
    }
}

/// One alignment of a read to a candidate precursor, as reported by the upstream aligner
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    pub precursor: String,
    /// 0-based leftmost position on the precursor
    pub position: i64,
    pub strand: Strand,
}

/// A single alignment line, before grouping by read name
#[derive(Debug, Clone, PartialEq)]
pub struct RawHit {
    pub read_name: String,
    /// Sequence as stored in the alignment file; empty when the record stores `*`
    pub sequence: Vec<u8>,
    pub hit: Hit,
}

/// A read and every candidate precursor it was reported against.
///
/// `sequence` is in sequencing orientation: sequences stored reverse-complemented
/// by the aligner are turned back.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRecord {
    pub name: String,
    pub sequence: Vec<u8>,
    pub strand: Strand,
    pub hits: Vec<Hit>,
}

impl ReadRecord {
    /// Distinct candidate precursor names, in first-reported order
    pub fn candidates(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::with_capacity(self.hits.len());
        for hit in &self.hits {
            if !seen.contains(&hit.precursor.as_str()) {
                seen.push(hit.precursor.as_str());
            }
        }
        seen
    }

    /// First reported hit on the given precursor
    pub fn hit_on(&self, precursor: &str) -> Option<&Hit> {
        self.hits.iter().find(|hit| hit.precursor == precursor)
    }
}

pub type ReadRecords = Box<dyn Iterator<Item = Result<ReadRecord>>>;

/// Anything that can stream grouped read records from an alignment file
pub trait AlignmentSource {
    fn open(&self, path: &Path) -> Result<ReadRecords>;
}

/// Groups consecutive raw hits that share a read name.
///
/// Input must be sorted (or at least grouped) by read name.
pub struct ReadGroups<I> {
    inner: I,
    pending: Option<RawHit>,
}

impl<I> ReadGroups<I>
where
    I: Iterator<Item = Result<RawHit>>,
{
    pub fn new(inner: I) -> Self {
        ReadGroups {
            inner,
            pending: None,
        }
    }

    fn start_group(first: RawHit) -> (ReadRecord, bool) {
        let mut record = ReadRecord {
            name: first.read_name,
            sequence: Vec::new(),
            strand: Strand::Forward,
            hits: Vec::new(),
        };
        let has_sequence = Self::absorb(&mut record, first.sequence, first.hit, false);
        (record, has_sequence)
    }

    /// Adds a hit to the record, taking its sequence if none has been seen yet.
    fn absorb(record: &mut ReadRecord, sequence: Vec<u8>, hit: Hit, has_sequence: bool) -> bool {
        let mut has_sequence = has_sequence;
        if !has_sequence && !sequence.is_empty() {
            record.strand = hit.strand;
            record.sequence = match hit.strand {
                Strand::Forward => sequence,
                Strand::Reverse => reverse_complement(&sequence),
            };
            has_sequence = true;
        }
        record.hits.push(hit);
        has_sequence
    }
}

impl<I> Iterator for ReadGroups<I>
where
    I: Iterator<Item = Result<RawHit>>,
{
    type Item = Result<ReadRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = match self.pending.take() {
            Some(hit) => hit,
            None => match self.inner.next()? {
                Ok(hit) => hit,
                Err(e) => return Some(Err(e)),
            },
        };

        let (mut record, mut has_sequence) = Self::start_group(first);
        loop {
            match self.inner.next() {
                Some(Ok(raw)) if raw.read_name == record.name => {
                    has_sequence = Self::absorb(&mut record, raw.sequence, raw.hit, has_sequence);
                }
                Some(Ok(raw)) => {
                    self.pending = Some(raw);
                    break;
                }
                Some(Err(e)) => return Some(Err(e)),
                None => break,
            }
        }
        Some(Ok(record))
    }
}

/// Reverse complement of a nucleotide sequence; `U` complements to `A`.
pub fn reverse_complement(sequence: &[u8]) -> Vec<u8> {
    sequence
        .iter()
        .rev()
        .map(|&base| match base.to_ascii_uppercase() {
            b'A' => b'T',
            b'C' => b'G',
            b'G' => b'C',
            b'T' | b'U' => b'A',
            _ => b'N',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MiralignError;

    fn raw(name: &str, sequence: &str, precursor: &str, position: i64, strand: Strand) -> Result<RawHit> {
        Ok(RawHit {
            read_name: name.to_string(),
            sequence: sequence.as_bytes().to_vec(),
            hit: Hit {
                precursor: precursor.to_string(),
                position,
                strand,
            },
        })
    }

    #[test]
    fn test_grouping_by_name() {
        let hits = vec![
            raw("r1", "ACGT", "mir-1", 3, Strand::Forward),
            raw("r1", "", "mir-2", 7, Strand::Forward),
            raw("r2", "GGCC", "mir-1", 0, Strand::Forward),
        ];
        let records: Vec<ReadRecord> = ReadGroups::new(hits.into_iter())
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name, "r1");
        assert_eq!(records[0].sequence, b"ACGT");
        assert_eq!(records[0].candidates(), vec!["mir-1", "mir-2"]);
        assert_eq!(records[0].hit_on("mir-2").unwrap().position, 7);
        assert_eq!(records[1].hits.len(), 1);
    }

    #[test]
    fn test_sequence_taken_from_first_record_storing_one() {
        let hits = vec![
            raw("r1", "", "mir-2", 1, Strand::Forward),
            raw("r1", "AACG", "mir-1", 2, Strand::Reverse),
        ];
        let records: Vec<ReadRecord> = ReadGroups::new(hits.into_iter())
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(records[0].sequence, b"CGTT");
        assert_eq!(records[0].strand, Strand::Reverse);
    }

    #[test]
    fn test_duplicate_candidates_are_collapsed() {
        let hits = vec![
            raw("r1", "ACGT", "mir-1", 3, Strand::Forward),
            raw("r1", "", "mir-1", 9, Strand::Forward),
        ];
        let record = ReadGroups::new(hits.into_iter()).next().unwrap().unwrap();
        assert_eq!(record.candidates(), vec!["mir-1"]);
        assert_eq!(record.hits.len(), 2);
    }

    #[test]
    fn test_error_is_forwarded() {
        let hits = vec![
            raw("r1", "ACGT", "mir-1", 3, Strand::Forward),
            Err(MiralignError::format("x.bam", "truncated")),
        ];
        let mut groups = ReadGroups::new(hits.into_iter());
        assert!(matches!(groups.next(), Some(Err(MiralignError::Format { .. }))));
    }

    #[test]
    fn test_empty_input() {
        let hits: Vec<Result<RawHit>> = Vec::new();
        assert_eq!(ReadGroups::new(hits.into_iter()).count(), 0);
    }

    #[test]
    fn test_reverse_complement() {
        assert_eq!(reverse_complement(b"ACGTU"), b"AACGT");
        assert_eq!(reverse_complement(b"acgn"), b"NCGT");
        assert_eq!(Strand::Reverse.as_char(), '-');
    }
}
