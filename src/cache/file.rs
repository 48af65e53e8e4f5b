//! Cache table format.
//!
//! One record per line, single-space separated, no header:
//!
//! ```text
//! entity_id normalized_id tp tn fp fn sc nc shr hsr oca
//! ```
//!
//! Percentages are written with the digits the stats command printed, minus
//! the `%` sign, so reading the table back yields identical records.

use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use super::CacheError;
use crate::model::{Counters, Percent, Record};

const FIELD_COUNT: usize = 11;

/// Formats one record as a cache line (without the trailing newline).
pub fn format_line(record: &Record) -> String {
    let c = &record.counters;
    format!(
        "{} {} {} {} {} {} {} {} {} {} {}",
        record.entity_id,
        record.normalized_id,
        c.tp,
        c.tn,
        c.fp,
        c.fn_,
        c.sc,
        c.nc,
        record.shr,
        record.hsr,
        record.oca
    )
}

/// Parses one cache line back into a record.
pub fn parse_line(line: &str) -> Result<Record, String> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != FIELD_COUNT {
        return Err(format!(
            "expected {} fields, got {}",
            FIELD_COUNT,
            fields.len()
        ));
    }

    let int = |idx: usize| -> Result<u64, String> {
        fields[idx]
            .parse()
            .map_err(|_| format!("invalid counter '{}'", fields[idx]))
    };
    let pct = |idx: usize| -> Result<Percent, String> {
        fields[idx]
            .parse()
            .map_err(|_| format!("invalid percentage '{}'", fields[idx]))
    };

    Ok(Record {
        entity_id: fields[0].to_string(),
        normalized_id: fields[1].to_string(),
        counters: Counters {
            tp: int(2)?,
            tn: int(3)?,
            fp: int(4)?,
            fn_: int(5)?,
            sc: int(6)?,
            nc: int(7)?,
        },
        shr: pct(8)?,
        hsr: pct(9)?,
        oca: pct(10)?,
    })
}

/// Writes `records` to a temporary file next to `path`, then renames it over
/// `path`. Readers see either the old table or the new one, never a mix.
pub fn write_cache_atomic(path: &Path, records: &[Record]) -> Result<(), CacheError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let io_err = |source: std::io::Error| CacheError::Io {
        path: path.to_path_buf(),
        source,
    };

    let tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        for record in records {
            writeln!(writer, "{}", format_line(record)).map_err(io_err)?;
        }
        writer.flush().map_err(io_err)?;
    }
    tmp.as_file().sync_all().map_err(io_err)?;

    let tmp_path = tmp.path().to_path_buf();
    tmp.persist(path).map_err(|e| io_err(e.error))?;

    debug!(
        cache_path = %path.display(),
        tmp_path = %tmp_path.display(),
        records = records.len(),
        "cache replaced"
    );
    Ok(())
}

/// Reads every record from the cache at `path`.
pub fn read_cache(path: &Path) -> Result<Vec<Record>, CacheError> {
    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => CacheError::ResourceMissing(path.to_path_buf()),
        _ => CacheError::ResourceUnreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        },
    })?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            parse_line(line).map_err(|message| CacheError::Corrupt {
                path: path.to_path_buf(),
                line: idx + 1,
                message,
            })
        })
        .collect()
}
