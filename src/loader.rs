//! Multi-source loader.
//!
//! Every source is read fully into memory (gunzipped when its name ends in
//! `.gz`) and then handed to each [`SourceFormat`] in turn until one decodes
//! it. A source nothing can decode is reported and skipped; the remaining
//! sources still load. Bare batches carry no device name, so they take the
//! source's file name without extensions.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use tracing::{debug, info, warn};

use crate::error::ShowError;
use crate::model::UnifiedRecord;
use crate::unified_format::SourceFormat;

/// Read a source fully, decompressing `.gz` files.
pub fn read_source(path: &Path) -> Result<Vec<u8>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);

    let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
    let mut bytes = Vec::new();
    if name.ends_with(".gz") {
        GzDecoder::new(reader)
            .read_to_end(&mut bytes)
            .with_context(|| format!("Failed to decompress {}", path.display()))?;
    } else {
        reader
            .read_to_end(&mut bytes)
            .with_context(|| format!("Failed to read {}", path.display()))?;
    }
    Ok(bytes)
}

/// Try every source format in order over the same bytes. On failure the
/// error lists why each attempt was rejected.
pub fn decode_source(
    bytes: &[u8],
) -> std::result::Result<(SourceFormat, Vec<UnifiedRecord>), String> {
    let mut reasons = Vec::new();
    for format in SourceFormat::ATTEMPTS {
        match format.decode(bytes) {
            Ok(records) => return Ok((format, records)),
            Err(e) => reasons.push(format!("{}: {}", format.name(), e)),
        }
    }
    Err(reasons.join("; "))
}

/// Device name for records that do not carry one: `data/npu0.bin.gz`
/// becomes `npu0`.
pub fn device_from_path(path: &Path) -> String {
    let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
    let name = name.strip_suffix(".gz").unwrap_or(name);
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
        .to_string()
}

/// Load one source.
pub fn load_source(path: &Path) -> std::result::Result<Vec<UnifiedRecord>, ShowError> {
    let unreadable = |reason: String| ShowError::SourceUnreadable {
        path: path.display().to_string(),
        reason,
    };
    let bytes = read_source(path).map_err(|e| unreadable(format!("{e:#}")))?;
    let (format, mut records) = decode_source(&bytes).map_err(unreadable)?;
    if format == SourceFormat::BareBatch {
        let device = device_from_path(path);
        for record in &mut records {
            record.device_name = device.clone();
        }
    }
    debug!(
        "Decoded {} as {} ({} records)",
        path.display(),
        format.name(),
        records.len()
    );
    Ok(records)
}

/// Load every source and concatenate the records, source order first, then
/// record order within a source. Unreadable sources are logged and skipped.
pub fn load(paths: &[PathBuf]) -> Vec<UnifiedRecord> {
    let mut records = Vec::new();
    for path in paths {
        match load_source(path) {
            Ok(mut loaded) => {
                info!("Loaded {} records from {}", loaded.len(), path.display());
                records.append(&mut loaded);
            }
            Err(e) => warn!("Skipping source: {}", e),
        }
    }
    records
}
