use crate::alignment_record::{AlignmentSource, ReadRecord};
use crate::annotate::{annotate, Annotation};
use crate::bam::{sam_to_bam, sort_by_name, HtslibSource};
use crate::error::{MiralignError, Result};
use crate::mature::{load_mature_arms, MatureIndex};
use crate::precursor::{load_or_build_precursor_cache, PrecursorIndex};
use crate::realign::{realign_hits, RealignConfig};
use crate::report::{ReportHeader, ReportWriter};
use log::{debug, error, info, warn};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::io;
use std::path::{Path, PathBuf};

/// Configuration for the realign command
pub struct RealignOptions {
    pub files: Vec<PathBuf>,
    pub reference: PathBuf,
    pub species: Option<String>,
    pub mirbase_version: String,
    pub mature_gff: Option<PathBuf>,
    /// Where derived files go; defaults to each input's directory
    pub output_dir: Option<PathBuf>,
    pub compress: bool,
    pub force_reindex: bool,
    /// Reads realigned in parallel per batch
    pub batch_size: usize,
    pub config: RealignConfig,
}

/// Per-read outcome counts for one file
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AnnotationCounts {
    pub reads: usize,
    pub annotated: usize,
    pub unaligned: usize,
    pub exact: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileSummary {
    pub input: PathBuf,
    pub sorted_bam: PathBuf,
    pub report: PathBuf,
    pub counts: AnnotationCounts,
}

/// Outcome of a realign run over several files
#[derive(Debug, Default)]
pub struct RealignRun {
    pub summaries: Vec<FileSummary>,
    /// Files that failed, in input order, with their error
    pub failures: Vec<(PathBuf, MiralignError)>,
}

impl RealignRun {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// The summaries, or the first file error if any file failed
    pub fn into_result(self) -> Result<Vec<FileSummary>> {
        match self.failures.into_iter().next() {
            Some((_, e)) => Err(e),
            None => Ok(self.summaries),
        }
    }
}

/// Realign every input file against the precursor reference.
///
/// A reference that cannot be loaded aborts the run. A file that fails is
/// logged, recorded in `failures` and skipped. An input whose derived files
/// would overwrite those of an earlier input is refused.
pub fn run_realign(opts: &RealignOptions) -> Result<RealignRun> {
    info!(
        "Working with miRBase version {} ({})",
        opts.mirbase_version,
        opts.reference.display()
    );
    let precursors = load_or_build_precursor_cache(
        &opts.reference,
        opts.species.as_deref(),
        opts.force_reindex,
    )?;
    if precursors.is_empty() {
        warn!(
            "No precursors loaded from {}; no read will be annotated",
            opts.reference.display()
        );
    }
    let matures = opts
        .mature_gff
        .as_deref()
        .map(load_mature_arms)
        .transpose()?;

    let mut run = RealignRun::default();
    let mut claimed: FxHashMap<PathBuf, PathBuf> = FxHashMap::default();

    for file in &opts.files {
        info!("Reading {}", file.display());
        let report = report_path_for(file, opts.output_dir.as_deref(), opts.compress);
        let outcome = match claimed.get(&report) {
            Some(earlier) => Err(MiralignError::io(
                file,
                io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!(
                        "derived files would overwrite those of {} ({})",
                        earlier.display(),
                        report.display()
                    ),
                ),
            )),
            None => {
                claimed.insert(report, file.clone());
                process_file(file, &HtslibSource, &precursors, matures.as_ref(), opts)
            }
        };

        match outcome {
            Ok(summary) => {
                info!(
                    "{}: {} reads, {} annotated ({} exact), {} without alignment -> {}",
                    file.display(),
                    summary.counts.reads,
                    summary.counts.annotated,
                    summary.counts.exact,
                    summary.counts.unaligned,
                    summary.report.display()
                );
                run.summaries.push(summary);
            }
            Err(e) => {
                error!("{}: {}", file.display(), e);
                run.failures.push((file.clone(), e));
            }
        }
    }

    Ok(run)
}

/// Report path for an input: `<stem>.isomirs.tsv[.gz]`
pub fn report_path_for(input: &Path, out_dir: Option<&Path>, compress: bool) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("reads");
    let dir = out_dir.unwrap_or_else(|| input.parent().unwrap_or_else(|| Path::new(".")));
    let extension = if compress { "isomirs.tsv.gz" } else { "isomirs.tsv" };
    dir.join(format!("{stem}.{extension}"))
}

/// Normalize, sort, realign and annotate one alignment file
pub fn process_file<S: AlignmentSource>(
    input: &Path,
    source: &S,
    precursors: &PrecursorIndex,
    matures: Option<&MatureIndex>,
    opts: &RealignOptions,
) -> Result<FileSummary> {
    let out_dir = opts.output_dir.as_deref();
    let bam = sam_to_bam(input, out_dir)?;
    let sorted_bam = sort_by_name(&bam, out_dir)?;

    let records = source.open(&sorted_bam)?;

    let report = report_path_for(input, out_dir, opts.compress);
    let header = ReportHeader {
        source: input,
        reference: &opts.reference,
        mirbase_version: &opts.mirbase_version,
        species: opts.species.as_deref(),
    };
    let mut writer = ReportWriter::create(&report, &header)?;
    let counts = annotate_records(
        records,
        precursors,
        matures,
        &opts.config,
        opts.batch_size,
        |annotation| writer.write(annotation),
    )?;
    writer.finish()?;

    Ok(FileSummary {
        input: input.to_path_buf(),
        sorted_bam,
        report,
        counts,
    })
}

/// Realign and annotate a stream of reads, emitting annotations in input order.
///
/// Reads without an alignment above threshold are counted and skipped.
pub fn annotate_records<I, F>(
    records: I,
    precursors: &PrecursorIndex,
    matures: Option<&MatureIndex>,
    config: &RealignConfig,
    batch_size: usize,
    mut emit: F,
) -> Result<AnnotationCounts>
where
    I: Iterator<Item = Result<ReadRecord>>,
    F: FnMut(&Annotation) -> Result<()>,
{
    let batch_size = batch_size.max(1);
    let mut counts = AnnotationCounts::default();
    let mut batch: Vec<ReadRecord> = Vec::with_capacity(batch_size);

    for record in records {
        batch.push(record?);
        if batch.len() >= batch_size {
            flush_batch(&mut batch, precursors, matures, config, &mut counts, &mut emit)?;
        }
    }
    flush_batch(&mut batch, precursors, matures, config, &mut counts, &mut emit)?;

    Ok(counts)
}

fn flush_batch<F>(
    batch: &mut Vec<ReadRecord>,
    precursors: &PrecursorIndex,
    matures: Option<&MatureIndex>,
    config: &RealignConfig,
    counts: &mut AnnotationCounts,
    emit: &mut F,
) -> Result<()>
where
    F: FnMut(&Annotation) -> Result<()>,
{
    let results: Vec<Result<Annotation>> = batch
        .par_iter()
        .map(|read| {
            realign_hits(read, precursors, config).map(|result| annotate(read, &result, matures))
        })
        .collect();

    for (read, result) in batch.iter().zip(results) {
        counts.reads += 1;
        match result {
            Ok(annotation) => {
                counts.annotated += 1;
                if annotation.is_exact() {
                    counts.exact += 1;
                }
                emit(&annotation)?;
            }
            Err(e) if e.is_recoverable() => {
                counts.unaligned += 1;
                debug!("Skipping read {}: {}", read.name, e);
            }
            Err(e) => return Err(e),
        }
    }

    batch.clear();
    Ok(())
}
