//! End-to-end runs of the realign command on small SAM inputs

use miraligner::commands::realign::{run_realign, AnnotationCounts, RealignOptions};
use miraligner::error::MiralignError;
use miraligner::realign::RealignConfig;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const HAIRPIN: &str = ">hsa-let-7a-1 MI0000060 Homo sapiens let-7a-1 stem-loop
UGGGAUGAGGUAGUAGGUUGUAUAGUUUUAGGGUCACACCCACCACUGGGAGAUAACUAUACAAUCUACUGUCUUUCC
>hsa-mir-2 MI0000002 decoy
GGCUGAGGUAGUAGGUUGUAUGGUUUAGAGUUACACCC
>mmu-let-7a-1 MI0000556 Mus musculus let-7a-1 stem-loop
UUCACUGUGGGAUGAGGUAGUAGGUUGUAUAGUUUUAGGGUCACACCCACCACUGGGAGAUAACUAUACAAUCUACUGUCUUUCCUAACGUG
";

const GFF: &str = "##gff-version 3
chr9\t.\tmiRNA_primary_transcript\t1001\t1078\t.\t+\t.\tID=MI0000060;Alias=MI0000060;Name=hsa-let-7a-1
chr9\t.\tmiRNA\t1006\t1027\t.\t+\t.\tID=MIMAT0000062;Alias=MIMAT0000062;Name=hsa-let-7a-5p;Derives_from=MI0000060
";

const SAM_HEADER: &str = "@HD\tVN:1.6\tSO:coordinate
@SQ\tSN:hsa-let-7a-1\tLN:78
@SQ\tSN:hsa-mir-2\tLN:38
";

fn sam_line(name: &str, flag: u16, target: &str, pos: u32, cigar: &str, seq: &str) -> String {
    format!("{name}\t{flag}\t{target}\t{pos}\t255\t{cigar}\t*\t0\t0\t{seq}\t*\n")
}

fn write_fixture(dir: &Path) -> (PathBuf, PathBuf, PathBuf) {
    let reference = dir.join("hairpin.fa");
    fs::write(&reference, HAIRPIN).unwrap();
    let gff = dir.join("hsa.gff3");
    fs::write(&gff, GFF).unwrap();

    let mut sam = SAM_HEADER.to_string();
    sam.push_str(&sam_line("seq_6", 0, "hsa-mir-2", 4, "22M", "TGAGGTAGTAGGTTGTATAGTT"));
    sam.push_str(&sam_line("seq_3", 0, "hsa-let-7a-1", 7, "21M", "GAGGTAGTAGGTTGTATAGTT"));
    sam.push_str(&sam_line("seq_1", 0, "hsa-let-7a-1", 6, "22M", "TGAGGTAGTAGGTTGTATAGTT"));
    sam.push_str(&sam_line("seq_5", 0, "hsa-let-7a-1", 30, "20M", "CCCCCCCCCCCCCCCCCCCC"));
    sam.push_str(&sam_line("seq_2", 0, "hsa-let-7a-1", 6, "22M2S", "TGAGGTAGTAGGTTGTATAGTTAA"));
    sam.push_str(&sam_line("seq_4", 0, "hsa-let-7a-1", 6, "23M", "TGAGGTAGTAGGTTGTATAGTTT"));
    sam.push_str(&sam_line("seq_6", 256, "hsa-let-7a-1", 6, "22M", "*"));
    let input = dir.join("sample.sam");
    fs::write(&input, sam).unwrap();

    (reference, gff, input)
}

fn options(files: Vec<PathBuf>, reference: PathBuf, gff: Option<PathBuf>, out: &Path) -> RealignOptions {
    RealignOptions {
        files,
        reference,
        species: Some("hsa".to_string()),
        mirbase_version: "22".to_string(),
        mature_gff: gff,
        output_dir: Some(out.to_path_buf()),
        compress: false,
        force_reindex: false,
        batch_size: 2,
        config: RealignConfig::default(),
    }
}

/// Report rows split into fields, without comment and column lines
fn report_rows(path: &Path) -> Vec<Vec<String>> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|line| !line.starts_with("##") && !line.starts_with("read\t"))
        .map(|line| line.split('\t').map(str::to_string).collect())
        .collect()
}

#[test]
fn test_realign_sam_with_mature_annotation() -> std::io::Result<()> {
    let temp_dir = TempDir::new()?;
    let (reference, gff, input) = write_fixture(temp_dir.path());
    let out = temp_dir.path().join("out");
    fs::create_dir_all(&out)?;

    let run = run_realign(&options(vec![input], reference, Some(gff), &out)).unwrap();
    assert!(run.is_success());
    let summaries = run.summaries;
    assert_eq!(summaries.len(), 1);
    let summary = &summaries[0];
    assert_eq!(summary.sorted_bam, out.join("sample_sort.bam"));
    assert!(out.join("sample.bam").exists());
    assert!(summary.sorted_bam.exists());
    assert_eq!(
        summary.counts,
        AnnotationCounts {
            reads: 6,
            annotated: 5,
            unaligned: 1,
            exact: 2,
        }
    );

    let rows = report_rows(&summary.report);
    let calls: Vec<(&str, &str, &str, &str, &str)> = rows
        .iter()
        .map(|r| (r[0].as_str(), r[2].as_str(), r[3].as_str(), r[4].as_str(), r[9].as_str()))
        .collect();
    assert_eq!(
        calls,
        vec![
            ("seq_1", "hsa-let-7a-1", "5", "hsa-let-7a-5p", "exact"),
            ("seq_2", "hsa-let-7a-1", "5", "hsa-let-7a-5p", "nta3p:AA"),
            ("seq_3", "hsa-let-7a-1", "6", "hsa-let-7a-5p", "del5p:1"),
            ("seq_4", "hsa-let-7a-1", "5", "hsa-let-7a-5p", "add3p:T"),
            ("seq_6", "hsa-let-7a-1", "5", "hsa-let-7a-5p", "exact"),
        ]
    );
    // seq_6 was reported against the decoy first; the let-7a hit position is kept
    assert_eq!(rows[4][10], "5");

    Ok(())
}

#[test]
fn test_realign_without_mature_annotation() -> std::io::Result<()> {
    let temp_dir = TempDir::new()?;
    let (reference, _, input) = write_fixture(temp_dir.path());
    let out = temp_dir.path().join("out");
    fs::create_dir_all(&out)?;

    let summaries = run_realign(&options(vec![input], reference, None, &out))
        .unwrap()
        .into_result()
        .unwrap();
    let rows = report_rows(&summaries[0].report);
    let descriptors: Vec<&str> = rows.iter().map(|r| r[9].as_str()).collect();
    // without mature coordinates only non-templated changes are visible
    assert_eq!(descriptors, vec!["exact", "nta3p:AA", "exact", "exact", "exact"]);
    assert!(rows.iter().all(|r| r[4] == "."));
    Ok(())
}

#[test]
fn test_empty_alignment_file() -> std::io::Result<()> {
    let temp_dir = TempDir::new()?;
    let (reference, _, _) = write_fixture(temp_dir.path());
    let input = temp_dir.path().join("empty.sam");
    fs::write(&input, SAM_HEADER)?;

    let summaries = run_realign(&options(vec![input], reference, None, temp_dir.path()))
        .unwrap()
        .into_result()
        .unwrap();
    assert_eq!(summaries[0].counts, AnnotationCounts::default());
    assert!(report_rows(&summaries[0].report).is_empty());
    Ok(())
}

#[test]
fn test_failed_file_does_not_stop_the_batch() -> std::io::Result<()> {
    let temp_dir = TempDir::new()?;
    let (reference, _, input) = write_fixture(temp_dir.path());
    let missing = temp_dir.path().join("missing.bam");
    let out = temp_dir.path().join("out");
    fs::create_dir_all(&out)?;

    let run = run_realign(&options(vec![missing.clone(), input.clone()], reference, None, &out))
        .unwrap();
    assert_eq!(run.summaries.len(), 1);
    assert_eq!(run.summaries[0].input, input);
    assert_eq!(run.summaries[0].counts.reads, 6);
    assert_eq!(run.failures.len(), 1);
    assert_eq!(run.failures[0].0, missing);
    assert!(matches!(run.failures[0].1, MiralignError::Io { .. }));
    assert!(out.join("sample.isomirs.tsv").exists());
    assert!(matches!(run.into_result(), Err(MiralignError::Io { .. })));
    Ok(())
}

#[test]
fn test_inputs_sharing_a_stem_do_not_overwrite_each_other() -> std::io::Result<()> {
    let temp_dir = TempDir::new()?;
    let (reference, _, input) = write_fixture(temp_dir.path());
    let other_dir = temp_dir.path().join("other");
    fs::create_dir_all(&other_dir)?;
    let twin = other_dir.join("sample.sam");
    fs::write(&twin, SAM_HEADER)?;
    let out = temp_dir.path().join("out");
    fs::create_dir_all(&out)?;

    let run = run_realign(&options(vec![input.clone(), twin.clone()], reference, None, &out))
        .unwrap();
    assert_eq!(run.summaries.len(), 1);
    assert_eq!(run.summaries[0].input, input);
    assert_eq!(run.failures.len(), 1);
    assert_eq!(run.failures[0].0, twin);
    assert!(matches!(run.failures[0].1, MiralignError::Io { .. }));
    // the first input's report is intact
    assert_eq!(report_rows(&out.join("sample.isomirs.tsv")).len(), 5);
    Ok(())
}

#[test]
fn test_invalid_reference_is_fatal() -> std::io::Result<()> {
    let temp_dir = TempDir::new()?;
    let (_, _, input) = write_fixture(temp_dir.path());
    let reference = temp_dir.path().join("broken.fa");
    fs::write(&reference, "ACGU\n>mir-1\nACGU\n")?;
    let out = temp_dir.path().join("out");
    fs::create_dir_all(&out)?;

    let result = run_realign(&options(vec![input], reference, None, &out));
    assert!(matches!(result, Err(MiralignError::Parse { line: 1, .. })));
    assert!(!out.join("sample.isomirs.tsv").exists());
    Ok(())
}
