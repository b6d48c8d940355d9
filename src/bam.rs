//! SAM/BAM normalization (conversion, name sorting) and the htslib-backed record source.

use crate::alignment_record::{
    AlignmentSource, Hit, RawHit, ReadGroups, ReadRecords, Strand,
};
use crate::error::{MiralignError, Result};
use log::{debug, info, warn};
use rust_htslib::bam::{self, HeaderView, Read};
use std::cmp::Ordering;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// File stem without any alignment extension
fn alignment_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("reads")
        .to_string()
}

fn output_dir_for<'a>(input: &'a Path, out_dir: Option<&'a Path>) -> &'a Path {
    out_dir.unwrap_or_else(|| input.parent().unwrap_or_else(|| Path::new(".")))
}

fn is_bam(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("bam"))
}

/// Records held in memory per sorted run before spilling to disk
pub const SORT_CHUNK_RECORDS: usize = 500_000;

/// A directory or a file that cannot be opened is an I/O error, not a format error.
fn ensure_readable(path: &Path) -> Result<()> {
    let file = File::open(path).map_err(|e| MiralignError::io(path, e))?;
    let metadata = file.metadata().map_err(|e| MiralignError::io(path, e))?;
    if metadata.is_dir() {
        return Err(MiralignError::io(
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "is a directory"),
        ));
    }
    Ok(())
}

fn open_reader(path: &Path) -> Result<bam::Reader> {
    ensure_readable(path)?;
    bam::Reader::from_path(path)
        .map_err(|e| MiralignError::format(path, format!("Failed to open alignment file: {e}")))
}

fn create_writer(path: &Path, header: &bam::Header) -> Result<bam::Writer> {
    bam::Writer::from_path(path, header, bam::Format::Bam)
        .map_err(|e| MiralignError::format(path, format!("Failed to create BAM: {e}")))
}

/// Convert an alignment file to BAM. BAM inputs are returned unchanged.
pub fn sam_to_bam(input: &Path, out_dir: Option<&Path>) -> Result<PathBuf> {
    if is_bam(input) {
        ensure_readable(input)?;
        return Ok(input.to_path_buf());
    }

    let output = output_dir_for(input, out_dir).join(format!("{}.bam", alignment_stem(input)));
    let mut reader = open_reader(input)?;
    if output.exists() {
        warn!("Overwriting existing {}", output.display());
    }
    let header = bam::Header::from_template(reader.header());
    let mut writer = create_writer(&output, &header)?;

    let mut count = 0usize;
    for result in reader.records() {
        let record = result.map_err(|e| MiralignError::format(input, e.to_string()))?;
        writer
            .write(&record)
            .map_err(|e| MiralignError::format(&output, e.to_string()))?;
        count += 1;
    }
    info!(
        "Converted {} ({} records) to {}",
        input.display(),
        count,
        output.display()
    );
    Ok(output)
}

/// Order records by natural read-name order, then reference id, then position.
fn compare_by_name(a: &bam::Record, b: &bam::Record) -> Ordering {
    let name_a = String::from_utf8_lossy(a.qname());
    let name_b = String::from_utf8_lossy(b.qname());
    natord::compare(&name_a, &name_b)
        .then_with(|| a.qname().cmp(b.qname()))
        .then_with(|| a.tid().cmp(&b.tid()))
        .then_with(|| a.pos().cmp(&b.pos()))
}

/// Header text with the `@HD` sort order set to `queryname`
fn queryname_header_text(header: &HeaderView) -> String {
    let text = String::from_utf8_lossy(header.as_bytes());
    let mut out = String::with_capacity(text.len() + 32);
    let mut has_hd = false;

    for line in text.lines() {
        if line.starts_with("@HD") {
            has_hd = true;
            let fields: Vec<&str> = line
                .split('\t')
                .filter(|field| !field.starts_with("SO:"))
                .collect();
            out.push_str(&fields.join("\t"));
            out.push_str("\tSO:queryname\n");
        } else if !line.is_empty() {
            out.push_str(line);
            out.push('\n');
        }
    }

    if has_hd {
        out
    } else {
        format!("@HD\tVN:1.6\tSO:queryname\n{out}")
    }
}

/// Sort a BAM file by read name into `<stem>_sort.bam`.
pub fn sort_by_name(bam_path: &Path, out_dir: Option<&Path>) -> Result<PathBuf> {
    sort_by_name_in_chunks(bam_path, out_dir, SORT_CHUNK_RECORDS)
}

/// Sort a BAM file by read name, holding at most `chunk_records` records in memory.
///
/// Inputs larger than one chunk are sorted into temporary runs next to the
/// output (`<stem>_sort.runN.bam`), merged, and the runs removed.
pub fn sort_by_name_in_chunks(
    bam_path: &Path,
    out_dir: Option<&Path>,
    chunk_records: usize,
) -> Result<PathBuf> {
    let chunk_records = chunk_records.max(1);
    let output =
        output_dir_for(bam_path, out_dir).join(format!("{}_sort.bam", alignment_stem(bam_path)));

    let mut reader = open_reader(bam_path)?;
    let header_view = HeaderView::from_bytes(queryname_header_text(reader.header()).as_bytes());
    let header = bam::Header::from_template(&header_view);

    let mut runs: Vec<PathBuf> = Vec::new();
    let sorted = spill_sorted_runs(&mut reader, bam_path, &output, &header, chunk_records, &mut runs)
        .and_then(|total| {
            if !runs.is_empty() {
                merge_runs(&runs, &output, &header)?;
            }
            Ok(total)
        });
    for run in &runs {
        if let Err(e) = fs::remove_file(run) {
            warn!("Failed to remove sort run {}: {}", run.display(), e);
        }
    }
    let total = sorted?;

    debug!(
        "Sorted {} records by name into {} ({} runs)",
        total,
        output.display(),
        runs.len().max(1)
    );
    Ok(output)
}

/// Sort chunks and write them out. A single chunk goes straight to `output`;
/// otherwise each chunk becomes a run whose path is pushed onto `runs`.
fn spill_sorted_runs(
    reader: &mut bam::Reader,
    bam_path: &Path,
    output: &Path,
    header: &bam::Header,
    chunk_records: usize,
    runs: &mut Vec<PathBuf>,
) -> Result<usize> {
    let mut chunk: Vec<bam::Record> = Vec::with_capacity(chunk_records.min(SORT_CHUNK_RECORDS));
    let mut total = 0usize;

    for result in reader.records() {
        chunk.push(result.map_err(|e| MiralignError::format(bam_path, e.to_string()))?);
        total += 1;
        if chunk.len() == chunk_records {
            let run = output.with_extension(format!("run{}.bam", runs.len()));
            runs.push(run.clone());
            write_sorted(&mut chunk, &run, header)?;
        }
    }

    if runs.is_empty() {
        write_sorted(&mut chunk, output, header)?;
    } else if !chunk.is_empty() {
        let run = output.with_extension(format!("run{}.bam", runs.len()));
        runs.push(run.clone());
        write_sorted(&mut chunk, &run, header)?;
    }
    Ok(total)
}

fn write_sorted(chunk: &mut Vec<bam::Record>, path: &Path, header: &bam::Header) -> Result<()> {
    chunk.sort_by(compare_by_name);
    let mut writer = create_writer(path, header)?;
    for record in chunk.iter() {
        writer
            .write(record)
            .map_err(|e| MiralignError::format(path, e.to_string()))?;
    }
    chunk.clear();
    Ok(())
}

fn next_record(reader: &mut bam::Reader, path: &Path) -> Result<Option<bam::Record>> {
    let mut record = bam::Record::new();
    match reader.read(&mut record) {
        None => Ok(None),
        Some(Ok(())) => Ok(Some(record)),
        Some(Err(e)) => Err(MiralignError::format(path, e.to_string())),
    }
}

/// K-way merge of sorted runs; on equal keys the earlier run wins.
fn merge_runs(runs: &[PathBuf], output: &Path, header: &bam::Header) -> Result<()> {
    let mut readers = runs
        .iter()
        .map(|run| open_reader(run))
        .collect::<Result<Vec<_>>>()?;
    let mut heads = readers
        .iter_mut()
        .zip(runs)
        .map(|(reader, run)| next_record(reader, run))
        .collect::<Result<Vec<_>>>()?;

    let mut writer = create_writer(output, header)?;
    loop {
        let next = heads
            .iter()
            .enumerate()
            .filter_map(|(i, head)| head.as_ref().map(|record| (i, record)))
            .min_by(|(_, a), (_, b)| compare_by_name(a, b))
            .map(|(i, _)| i);
        let Some(i) = next else {
            break;
        };
        if let Some(record) = heads[i].take() {
            writer
                .write(&record)
                .map_err(|e| MiralignError::format(output, e.to_string()))?;
        }
        heads[i] = next_record(&mut readers[i], &runs[i])?;
    }
    Ok(())
}

/// Streams raw hits out of a SAM/BAM file, skipping unmapped records
struct HtslibHits {
    path: PathBuf,
    reader: bam::Reader,
    target_names: Vec<String>,
    record: bam::Record,
}

impl HtslibHits {
    fn open(path: &Path) -> Result<Self> {
        let reader = open_reader(path)?;
        let header = reader.header();
        let target_names = (0..header.target_count())
            .map(|tid| String::from_utf8_lossy(header.tid2name(tid)).into_owned())
            .collect();
        Ok(HtslibHits {
            path: path.to_path_buf(),
            reader,
            target_names,
            record: bam::Record::new(),
        })
    }

    fn to_raw_hit(&self) -> Result<RawHit> {
        let record = &self.record;
        let precursor = usize::try_from(record.tid())
            .ok()
            .and_then(|tid| self.target_names.get(tid))
            .ok_or_else(|| {
                MiralignError::format(
                    &self.path,
                    format!(
                        "record '{}' references unknown target id {}",
                        String::from_utf8_lossy(record.qname()),
                        record.tid()
                    ),
                )
            })?;
        let strand = if record.is_reverse() {
            Strand::Reverse
        } else {
            Strand::Forward
        };
        Ok(RawHit {
            read_name: String::from_utf8_lossy(record.qname()).into_owned(),
            sequence: record.seq().as_bytes(),
            hit: Hit {
                precursor: precursor.clone(),
                position: record.pos(),
                strand,
            },
        })
    }
}

impl Iterator for HtslibHits {
    type Item = Result<RawHit>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.reader.read(&mut self.record)? {
                Ok(()) => {
                    if self.record.is_unmapped() {
                        continue;
                    }
                    return Some(self.to_raw_hit());
                }
                Err(e) => return Some(Err(MiralignError::format(&self.path, e.to_string()))),
            }
        }
    }
}

/// `AlignmentSource` over rust-htslib; the file should already be sorted by name
#[derive(Debug, Default, Clone, Copy)]
pub struct HtslibSource;

impl AlignmentSource for HtslibSource {
    fn open(&self, path: &Path) -> Result<ReadRecords> {
        let hits = HtslibHits::open(path)?;
        Ok(Box::new(ReadGroups::new(hits)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result as MiralignResult;
    use std::fs;

    const SAM: &str = "@HD\tVN:1.6\tSO:coordinate\n\
@SQ\tSN:mir-1\tLN:20\n\
@SQ\tSN:mir-2\tLN:20\n\
read10\t0\tmir-1\t3\t255\t4M\t*\t0\t0\tACGT\t*\n\
read2\t0\tmir-2\t1\t255\t4M\t*\t0\t0\tGGCC\t*\n\
read10\t256\tmir-2\t5\t255\t4M\t*\t0\t0\t*\t*\n\
read3\t4\t*\t0\t0\t*\t*\t0\t0\tTTTT\t*\n";

    #[test]
    fn test_queryname_header_rewrites_sort_order() {
        let view = HeaderView::from_bytes(b"@HD\tVN:1.6\tSO:coordinate\n@SQ\tSN:mir-1\tLN:20\n");
        let text = queryname_header_text(&view);
        assert!(text.starts_with("@HD\tVN:1.6\tSO:queryname\n"));
        assert!(text.contains("@SQ\tSN:mir-1\tLN:20"));
        assert!(!text.contains("coordinate"));
    }

    #[test]
    fn test_queryname_header_adds_missing_hd() {
        let view = HeaderView::from_bytes(b"@SQ\tSN:mir-1\tLN:20\n");
        let text = queryname_header_text(&view);
        assert!(text.starts_with("@HD\tVN:1.6\tSO:queryname\n@SQ"));
    }

    #[test]
    fn test_convert_sort_and_stream() {
        let dir = tempfile::tempdir().unwrap();
        let sam = dir.path().join("sample.sam");
        fs::write(&sam, SAM).unwrap();

        let bam_path = sam_to_bam(&sam, None).unwrap();
        assert_eq!(bam_path, dir.path().join("sample.bam"));
        assert!(bam_path.exists());
        // BAM input is passed through
        assert_eq!(sam_to_bam(&bam_path, None).unwrap(), bam_path);

        let sorted = sort_by_name(&bam_path, None).unwrap();
        assert_eq!(sorted, dir.path().join("sample_sort.bam"));

        let records: Vec<_> = HtslibSource
            .open(&sorted)
            .unwrap()
            .collect::<MiralignResult<Vec<_>>>()
            .unwrap();
        // natural order: read2 before read10; the unmapped read3 is skipped
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["read2", "read10"]);
        assert_eq!(records[1].candidates(), vec!["mir-1", "mir-2"]);
        assert_eq!(records[1].sequence, b"ACGT");
        assert_eq!(records[1].hit_on("mir-1").unwrap().position, 2);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = sort_by_name(Path::new("/nonexistent/reads.bam"), None);
        assert!(matches!(result, Err(MiralignError::Io { .. })));
        let result = HtslibSource.open(Path::new("/nonexistent/reads.bam"));
        assert!(matches!(result, Err(MiralignError::Io { .. })));
    }

    fn record_names(path: &Path) -> Vec<String> {
        let mut reader = bam::Reader::from_path(path).unwrap();
        reader
            .records()
            .map(|r| String::from_utf8_lossy(r.unwrap().qname()).into_owned())
            .collect()
    }

    #[test]
    fn test_chunked_sort_merges_runs() {
        let dir = tempfile::tempdir().unwrap();
        let sam = dir.path().join("sample.sam");
        fs::write(&sam, SAM).unwrap();
        let bam_path = sam_to_bam(&sam, None).unwrap();

        for chunk_records in [1, 3, 100] {
            let sorted = sort_by_name_in_chunks(&bam_path, None, chunk_records).unwrap();
            assert_eq!(
                record_names(&sorted),
                vec!["read2", "read3", "read10", "read10"],
                "chunk size {chunk_records}"
            );
        }

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.contains(".run"))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[test]
    fn test_directory_input_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let as_bam = dir.path().join("reads.bam");
        let as_sam = dir.path().join("reads.sam");
        fs::create_dir(&as_bam).unwrap();
        fs::create_dir(&as_sam).unwrap();

        assert!(matches!(
            sort_by_name(dir.path(), None),
            Err(MiralignError::Io { .. })
        ));
        assert!(matches!(
            sam_to_bam(&as_bam, None),
            Err(MiralignError::Io { .. })
        ));
        assert!(matches!(
            sam_to_bam(&as_sam, None),
            Err(MiralignError::Io { .. })
        ));
        assert!(matches!(
            HtslibSource.open(&as_bam),
            Err(MiralignError::Io { .. })
        ));
    }

    #[test]
    fn test_invalid_alignment_file_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.bam");
        fs::write(&bad, b"this is not a bam file").unwrap();
        let result = sort_by_name(&bad, None);
        assert!(matches!(result, Err(MiralignError::Format { .. })));
    }
}
