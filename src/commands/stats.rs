use crate::error::Result;
use crate::mature::{load_mature_arms, MatureIndex};
use crate::precursor::{load_or_build_precursor_cache, PrecursorIndex};
use std::path::Path;

/// Summary of a loaded precursor reference
#[derive(Debug, PartialEq)]
pub struct ReferenceStats {
    pub precursors: usize,
    pub total_length: usize,
    pub mean_length: f64,
    pub median_length: f64,
    pub shortest: Option<(String, usize)>,
    pub longest: Option<(String, usize)>,
    pub with_mature_arms: usize,
    pub mature_arms: usize,
}

pub fn reference_stats(precursors: &PrecursorIndex, matures: Option<&MatureIndex>) -> ReferenceStats {
    let mut lengths: Vec<usize> = precursors.iter().map(|p| p.len()).collect();
    lengths.sort_unstable();

    let total_length: usize = lengths.iter().sum();
    let mean_length = if lengths.is_empty() {
        0.0
    } else {
        total_length as f64 / lengths.len() as f64
    };
    let median_length = if lengths.is_empty() {
        0.0
    } else if lengths.len() % 2 == 0 {
        let mid = lengths.len() / 2;
        (lengths[mid - 1] + lengths[mid]) as f64 / 2.0
    } else {
        lengths[lengths.len() / 2] as f64
    };

    // First in file order wins among equal lengths
    let mut shortest: Option<(String, usize)> = None;
    let mut longest: Option<(String, usize)> = None;
    for precursor in precursors.iter() {
        let len = precursor.len();
        if shortest.as_ref().map_or(true, |(_, l)| len < *l) {
            shortest = Some((precursor.name.clone(), len));
        }
        if longest.as_ref().map_or(true, |(_, l)| len > *l) {
            longest = Some((precursor.name.clone(), len));
        }
    }

    let (with_mature_arms, mature_arms) = match matures {
        Some(matures) => precursors
            .iter()
            .map(|p| matures.arms(&p.name).len())
            .filter(|&n| n > 0)
            .fold((0, 0), |(with, total), n| (with + 1, total + n)),
        None => (0, 0),
    };

    ReferenceStats {
        precursors: precursors.len(),
        total_length,
        mean_length,
        median_length,
        shortest,
        longest,
        with_mature_arms,
        mature_arms,
    }
}

/// Print reference statistics
pub fn run_stats(
    reference: &Path,
    species: Option<&str>,
    mature_gff: Option<&Path>,
    force_reindex: bool,
) -> Result<()> {
    let precursors = load_or_build_precursor_cache(reference, species, force_reindex)?;
    let matures = mature_gff.map(load_mature_arms).transpose()?;
    let stats = reference_stats(&precursors, matures.as_ref());

    println!("Number of precursors: {}", stats.precursors);
    println!("Total precursor length: {} nt", stats.total_length);
    if stats.precursors > 0 {
        println!("\nMean precursor length: {:.2}", stats.mean_length);
        println!("Median precursor length: {:.2}", stats.median_length);
    }
    if let Some((name, len)) = &stats.shortest {
        println!("Shortest precursor: {} ({} nt)", name, len);
    }
    if let Some((name, len)) = &stats.longest {
        println!("Longest precursor: {} ({} nt)", name, len);
    }
    if matures.is_some() {
        println!(
            "\nPrecursors with mature arms: {} ({} arms)",
            stats.with_mature_arms, stats.mature_arms
        );
    }

    Ok(())
}
