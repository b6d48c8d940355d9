//! Precursor hairpin reference (miRBase `hairpin.fa`) loading and caching.

use crate::error::{MiralignError, Result};
use log::{debug, info, warn};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

/// A named precursor hairpin sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Precursor {
    pub name: String,
    pub sequence: Vec<u8>,
}

impl Precursor {
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }
}

/// Keyed, insertion-ordered container of precursors.
///
/// Names are unique: `try_insert` refuses a name that is already present.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PrecursorIndex {
    name_to_id: FxHashMap<String, u32>,
    precursors: Vec<Precursor>,
}

impl PrecursorIndex {
    pub fn new() -> Self {
        PrecursorIndex {
            name_to_id: FxHashMap::default(),
            precursors: Vec::new(),
        }
    }

    /// Insert a precursor, returning its id, or `None` if the name is taken.
    pub fn try_insert(&mut self, name: String, sequence: Vec<u8>) -> Option<u32> {
        if self.name_to_id.contains_key(&name) {
            return None;
        }
        let id = self.precursors.len() as u32;
        self.name_to_id.insert(name.clone(), id);
        self.precursors.push(Precursor { name, sequence });
        Some(id)
    }

    pub fn get_id(&self, name: &str) -> Option<u32> {
        self.name_to_id.get(name).copied()
    }

    pub fn get(&self, name: &str) -> Option<&Precursor> {
        self.get_id(name).and_then(|id| self.get_by_id(id))
    }

    pub fn get_by_id(&self, id: u32) -> Option<&Precursor> {
        self.precursors.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.precursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.precursors.is_empty()
    }

    /// Precursors in file order
    pub fn iter(&self) -> impl Iterator<Item = &Precursor> {
        self.precursors.iter()
    }

    pub fn total_length(&self) -> usize {
        self.precursors.iter().map(Precursor::len).sum()
    }
}

/// Load precursors from a FASTA-like file, keeping only `<species>-` names when a species is given.
pub fn load_precursors(path: &Path, species: Option<&str>) -> Result<PrecursorIndex> {
    let file = File::open(path).map_err(|e| MiralignError::io(path, e))?;
    let index = parse_precursors(BufReader::new(file), path, species)?;
    info!(
        "Loaded {} precursors from {}{}",
        index.len(),
        path.display(),
        species.map(|s| format!(" (species {s})")).unwrap_or_default()
    );
    Ok(index)
}

struct PendingRecord {
    name: String,
    header_line: usize,
    keep: bool,
    sequence: Vec<u8>,
}

fn parse_precursors<R: BufRead>(
    reader: R,
    path: &Path,
    species: Option<&str>,
) -> Result<PrecursorIndex> {
    let prefix = species.map(|s| format!("{s}-"));
    let mut index = PrecursorIndex::new();
    let mut pending: Option<PendingRecord> = None;

    for (i, line) in reader.lines().enumerate() {
        let line_no = i + 1;
        let line = line.map_err(|e| MiralignError::io(path, e))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(header) = line.strip_prefix('>') {
            if let Some(record) = pending.take() {
                finish_record(&mut index, record, path)?;
            }
            let name = header
                .split_whitespace()
                .next()
                .ok_or_else(|| MiralignError::parse(path, line_no, "header without a name"))?;
            let keep = prefix
                .as_deref()
                .map_or(true, |prefix| name.starts_with(prefix));
            pending = Some(PendingRecord {
                name: name.to_string(),
                header_line: line_no,
                keep,
                sequence: Vec::new(),
            });
        } else {
            let record = pending.as_mut().ok_or_else(|| {
                MiralignError::parse(path, line_no, "sequence line before any header")
            })?;
            if record.keep {
                record
                    .sequence
                    .extend(line.bytes().map(|b| b.to_ascii_uppercase()));
            }
        }
    }

    if let Some(record) = pending.take() {
        finish_record(&mut index, record, path)?;
    }

    Ok(index)
}

fn finish_record(index: &mut PrecursorIndex, record: PendingRecord, path: &Path) -> Result<()> {
    if !record.keep {
        return Ok(());
    }
    if record.sequence.is_empty() {
        return Err(MiralignError::parse(
            path,
            record.header_line,
            format!("precursor '{}' has no sequence", record.name),
        ));
    }
    let name = record.name;
    if index.try_insert(name.clone(), record.sequence).is_none() {
        return Err(MiralignError::parse(
            path,
            record.header_line,
            format!("duplicate precursor name '{name}'"),
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Binary cache
// ---------------------------------------------------------------------------

const CACHE_MAGIC: &[u8; 8] = b"MIRPREC1";
const CACHE_VERSION: u32 = 1;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct SourceManifest {
    size: u64,
    mtime_secs: u64,
}

#[derive(Serialize)]
struct PrecursorCacheRef<'a> {
    version: u32,
    species: Option<&'a str>,
    manifest: &'a SourceManifest,
    index: &'a PrecursorIndex,
}

#[derive(Deserialize)]
struct PrecursorCache {
    version: u32,
    species: Option<String>,
    manifest: SourceManifest,
    index: PrecursorIndex,
}

/// Path of the cache file for a reference and species filter
pub fn cache_path(reference: &Path, species: Option<&str>) -> PathBuf {
    let mut name = reference.as_os_str().to_os_string();
    name.push(format!(".{}.mpc", species.unwrap_or("all")));
    PathBuf::from(name)
}

/// Load precursors through the binary cache, rebuilding it when it is missing or stale.
pub fn load_or_build_precursor_cache(
    reference: &Path,
    species: Option<&str>,
    force_rebuild: bool,
) -> Result<PrecursorIndex> {
    let manifest = source_manifest(reference).map_err(|e| MiralignError::io(reference, e))?;
    let cache_file = cache_path(reference, species);

    if !force_rebuild && cache_file.exists() {
        match read_cache(&cache_file) {
            Ok(cache)
                if cache.version == CACHE_VERSION
                    && cache.manifest == manifest
                    && cache.species.as_deref() == species =>
            {
                info!(
                    "Loaded {} precursors from cache {}",
                    cache.index.len(),
                    cache_file.display()
                );
                return Ok(cache.index);
            }
            Ok(_) => {
                info!(
                    "Precursor cache {} is out of date, rebuilding",
                    cache_file.display()
                );
            }
            Err(e) => {
                warn!(
                    "Unable to read precursor cache {}: {}; rebuilding",
                    cache_file.display(),
                    e
                );
            }
        }
    }

    let index = load_precursors(reference, species)?;
    match write_cache(&cache_file, species, &manifest, &index) {
        Ok(()) => debug!("Wrote precursor cache {}", cache_file.display()),
        Err(e) => warn!(
            "Unable to write precursor cache {}: {}",
            cache_file.display(),
            e
        ),
    }
    Ok(index)
}

fn source_manifest(path: &Path) -> io::Result<SourceManifest> {
    let metadata = std::fs::metadata(path)?;
    let mtime_secs = metadata
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Ok(SourceManifest {
        size: metadata.len(),
        mtime_secs,
    })
}

fn read_cache(path: &Path) -> io::Result<PrecursorCache> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != CACHE_MAGIC {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Invalid magic bytes in {:?}", path),
        ));
    }

    bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard()).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Failed to decode precursor cache: {e}"),
        )
    })
}

fn write_cache(
    path: &Path,
    species: Option<&str>,
    manifest: &SourceManifest,
    index: &PrecursorIndex,
) -> io::Result<()> {
    let cache = PrecursorCacheRef {
        version: CACHE_VERSION,
        species,
        manifest,
        index,
    };

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(CACHE_MAGIC)?;
    bincode::serde::encode_into_std_write(&cache, &mut writer, bincode::config::standard())
        .map_err(io::Error::other)?;
    writer.flush()
}
