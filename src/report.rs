//! Tab-separated annotation report, optionally BGZF-compressed.

use crate::annotate::Annotation;
use crate::error::{MiralignError, Result};
use noodles::bgzf;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

pub const COLUMNS: [&str; 11] = [
    "read",
    "sequence",
    "precursor",
    "offset",
    "mature",
    "score",
    "mismatches",
    "trim5",
    "trim3",
    "variant",
    "reported_pos",
];

/// Provenance written as comment lines at the top of the report
pub struct ReportHeader<'a> {
    pub source: &'a Path,
    pub reference: &'a Path,
    pub mirbase_version: &'a str,
    pub species: Option<&'a str>,
}

enum ReportSink {
    Plain(BufWriter<File>),
    Compressed(bgzf::io::Writer<File>),
}

impl Write for ReportSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            ReportSink::Plain(w) => w.write(buf),
            ReportSink::Compressed(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            ReportSink::Plain(w) => w.flush(),
            ReportSink::Compressed(w) => w.flush(),
        }
    }
}

pub struct ReportWriter {
    sink: ReportSink,
    path: PathBuf,
    written: usize,
}

fn is_compressed(path: &Path) -> bool {
    [".gz", ".bgz"]
        .iter()
        .any(|extension| path.to_string_lossy().ends_with(extension))
}

impl ReportWriter {
    /// Create the report and write its header. `.gz`/`.bgz` paths are BGZF-compressed.
    pub fn create(path: &Path, header: &ReportHeader) -> Result<Self> {
        let file = File::create(path).map_err(|e| MiralignError::io(path, e))?;
        let sink = if is_compressed(path) {
            ReportSink::Compressed(bgzf::io::Writer::new(file))
        } else {
            ReportSink::Plain(BufWriter::new(file))
        };
        let mut writer = ReportWriter {
            sink,
            path: path.to_path_buf(),
            written: 0,
        };
        writer.write_header(header)?;
        Ok(writer)
    }

    fn write_header(&mut self, header: &ReportHeader) -> Result<()> {
        let text = format!(
            "## miraligner {}\n## source: {}\n## reference: {}\n## mirbase_version: {}\n## species: {}\n{}\n",
            env!("CARGO_PKG_VERSION"),
            header.source.display(),
            header.reference.display(),
            header.mirbase_version,
            header.species.unwrap_or("all"),
            COLUMNS.join("\t"),
        );
        self.sink
            .write_all(text.as_bytes())
            .map_err(|e| MiralignError::io(&self.path, e))
    }

    pub fn write(&mut self, annotation: &Annotation) -> Result<()> {
        let mut line = format_annotation(annotation);
        line.push('\n');
        self.sink
            .write_all(line.as_bytes())
            .map_err(|e| MiralignError::io(&self.path, e))?;
        self.written += 1;
        Ok(())
    }

    /// Flush and close the report, returning the number of annotations written
    pub fn finish(self) -> Result<usize> {
        let path = self.path;
        match self.sink {
            ReportSink::Plain(mut w) => w.flush().map_err(|e| MiralignError::io(&path, e))?,
            ReportSink::Compressed(w) => {
                w.finish().map_err(|e| MiralignError::io(&path, e))?;
            }
        }
        Ok(self.written)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// One report row, without the trailing newline
pub fn format_annotation(annotation: &Annotation) -> String {
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
        annotation.read,
        annotation.sequence,
        annotation.precursor,
        annotation.offset,
        annotation.mature.as_deref().unwrap_or("."),
        annotation.score,
        annotation.mismatches,
        annotation.trim5,
        annotation.trim3,
        annotation.descriptor(),
        annotation
            .reported_position
            .map(|p| p.to_string())
            .unwrap_or_else(|| ".".to_string()),
    )
}
