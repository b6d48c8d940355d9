//! Mature miRNA coordinates within precursors, from miRBase GFF3 annotation.
//!
//! Genomic coordinates of `miRNA` records are projected onto their parent
//! `miRNA_primary_transcript`, which spans exactly the hairpin sequence.

use crate::error::{MiralignError, Result};
use log::{info, warn};
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A mature arm as a 0-based half-open span on its precursor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatureArm {
    pub name: String,
    pub start: usize,
    pub end: usize,
}

impl MatureArm {
    pub fn overlap(&self, start: usize, end: usize) -> usize {
        self.end.min(end).saturating_sub(self.start.max(start))
    }
}

/// Mature arms keyed by precursor name
#[derive(Debug, Default)]
pub struct MatureIndex {
    arms: FxHashMap<String, Vec<MatureArm>>,
}

impl MatureIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an arm; an arm with the same name on the same precursor is ignored
    pub fn add_arm(&mut self, precursor: &str, arm: MatureArm) {
        let arms = self.arms.entry(precursor.to_string()).or_default();
        if arms.iter().any(|a| a.name == arm.name) {
            return;
        }
        arms.push(arm);
        arms.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.name.cmp(&b.name)));
    }

    pub fn arms(&self, precursor: &str) -> &[MatureArm] {
        self.arms.get(precursor).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Arm with the largest overlap with `[start, end)`; ties go to the lower start, then name
    pub fn best_overlap(&self, precursor: &str, start: usize, end: usize) -> Option<&MatureArm> {
        let mut best: Option<(&MatureArm, usize)> = None;
        for arm in self.arms(precursor) {
            let overlap = arm.overlap(start, end);
            if overlap == 0 {
                continue;
            }
            // arms are sorted by (start, name), so only a strictly larger overlap replaces
            if best.map_or(true, |(_, current)| overlap > current) {
                best = Some((arm, overlap));
            }
        }
        best.map(|(arm, _)| arm)
    }

    pub fn precursor_count(&self) -> usize {
        self.arms.len()
    }

    pub fn arm_count(&self) -> usize {
        self.arms.values().map(Vec::len).sum()
    }
}

struct GffFeature {
    feature_type: String,
    start: u64,
    end: u64,
    reverse: bool,
    id: Option<String>,
    name: Option<String>,
    derives_from: Option<String>,
}

fn attribute<'a>(attributes: &'a str, key: &str) -> Option<&'a str> {
    attributes.split(';').find_map(|pair| {
        let (k, v) = pair.trim().split_once('=')?;
        (k == key).then_some(v)
    })
}

fn parse_gff_line(line: &str, path: &Path, line_no: usize) -> Result<GffFeature> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 9 {
        return Err(MiralignError::format(
            path,
            format!("line {line_no}: expected 9 tab-separated fields, found {}", fields.len()),
        ));
    }
    let parse_coord = |value: &str| {
        value.parse::<u64>().map_err(|e| {
            MiralignError::format(path, format!("line {line_no}: invalid coordinate '{value}': {e}"))
        })
    };
    let start = parse_coord(fields[3])?;
    let end = parse_coord(fields[4])?;
    if start == 0 || end < start {
        return Err(MiralignError::format(
            path,
            format!("line {line_no}: invalid interval {start}-{end}"),
        ));
    }
    let attributes = fields[8];
    Ok(GffFeature {
        feature_type: fields[2].to_string(),
        start,
        end,
        reverse: fields[6] == "-",
        id: attribute(attributes, "ID").map(str::to_string),
        name: attribute(attributes, "Name").map(str::to_string),
        derives_from: attribute(attributes, "Derives_from").map(str::to_string),
    })
}

/// Load mature arm coordinates from a miRBase GFF3 file.
pub fn load_mature_arms(path: &Path) -> Result<MatureIndex> {
    let file = File::open(path).map_err(|e| MiralignError::io(path, e))?;
    let index = parse_mature_arms(BufReader::new(file), path)?;
    info!(
        "Loaded {} mature arms on {} precursors from {}",
        index.arm_count(),
        index.precursor_count(),
        path.display()
    );
    Ok(index)
}

fn parse_mature_arms<R: BufRead>(reader: R, path: &Path) -> Result<MatureIndex> {
    let mut primaries: FxHashMap<String, GffFeature> = FxHashMap::default();
    let mut matures: Vec<GffFeature> = Vec::new();

    for (i, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| MiralignError::io(path, e))?;
        let trimmed = line.trim_end();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let feature = parse_gff_line(trimmed, path, i + 1)?;
        match feature.feature_type.as_str() {
            "miRNA_primary_transcript" => {
                if let Some(id) = feature.id.clone() {
                    primaries.insert(id, feature);
                }
            }
            "miRNA" => matures.push(feature),
            _ => {}
        }
    }

    let mut index = MatureIndex::new();
    for mature in matures {
        let (Some(name), Some(parent_id)) = (mature.name.as_deref(), mature.derives_from.as_deref())
        else {
            warn!("Skipping miRNA record without Name or Derives_from in {}", path.display());
            continue;
        };
        let Some(primary) = primaries.get(parent_id) else {
            warn!("Mature {} derives from unknown precursor {}", name, parent_id);
            continue;
        };
        let Some(precursor_name) = primary.name.as_deref() else {
            warn!("Precursor {} has no Name attribute", parent_id);
            continue;
        };
        if mature.start < primary.start || mature.end > primary.end {
            warn!(
                "Mature {} ({}-{}) lies outside precursor {} ({}-{})",
                name, mature.start, mature.end, precursor_name, primary.start, primary.end
            );
            continue;
        }
        let (start, end) = if primary.reverse {
            (primary.end - mature.end, primary.end - mature.start + 1)
        } else {
            (mature.start - primary.start, mature.end - primary.start + 1)
        };
        index.add_arm(
            precursor_name,
            MatureArm {
                name: name.to_string(),
                start: start as usize,
                end: end as usize,
            },
        );
    }

    Ok(index)
}
