//! Parsing of `objdump -WL` output into source mappings.
//!
//! The decoded line table lists, for every compilation unit, a header naming
//! the source file followed by one row per line-table entry:
//!
//! ```text
//! /home/dev/Arduino/blink/blink.ino:
//! File name                            Line number    Starting address    View    Stmt
//! blink.ino                                     12               0x100               x
//! blink.ino                                     13               0x104               x
//! ```
//!
//! Each row becomes a [`BreakpointRecord`] attributed to the most recent
//! header. Rows seen before any header are dropped.

use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// A mapping from a code address to a line of the sketch source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakpointRecord {
    /// Source file named by the enclosing header.
    #[serde(rename = "file")]
    pub source_file: String,
    /// 1-based line number in `source_file`.
    #[serde(rename = "lineNumber")]
    pub line_number: u32,
    /// Raw address column, as printed by the disassembler.
    #[serde(rename = "addr")]
    pub address: String,
    /// Text of the referenced line, empty when it could not be read.
    #[serde(rename = "lineSource")]
    pub source_line: String,
}

impl BreakpointRecord {
    /// Returns true if the record's file ends with `.<extension>`.
    pub fn has_extension(&self, extension: &str) -> bool {
        self.source_file
            .strip_suffix(extension)
            .is_some_and(|stem| stem.ends_with('.'))
    }
}

fn header_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(.*\.\S{1,3}):").expect("header pattern is valid"))
}

fn row_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(\w*\.\S{1,3})\s*(\d+)\s*(0.*)").expect("row pattern is valid")
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// SourceMapper
// ─────────────────────────────────────────────────────────────────────────────

/// Turns disassembler line tables into resolved [`BreakpointRecord`]s.
#[derive(Debug, Clone, Default)]
pub struct SourceMapper {
    /// Base directory for relative file names. `None` uses the working directory.
    source_root: Option<PathBuf>,
}

impl SourceMapper {
    /// Creates a mapper resolving relative paths against the working directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mapper resolving relative paths against `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: Some(root.into()),
        }
    }

    /// Parses a dump and fills in the source text of every record.
    ///
    /// Unreadable files and out-of-range line numbers leave `source_line`
    /// empty; they never fail the whole pass.
    pub fn parse(&self, dump: &str) -> Vec<BreakpointRecord> {
        let mut records = parse_records(dump);
        self.resolve_source_lines(&mut records);
        records
    }

    /// Fills `source_line` for each record, reading each file once per run of
    /// consecutive records that share it.
    pub fn resolve_source_lines(&self, records: &mut [BreakpointRecord]) {
        let mut loaded: Option<(String, Option<Vec<String>>)> = None;

        for record in records.iter_mut() {
            let is_current = matches!(&loaded, Some((file, _)) if *file == record.source_file);
            if !is_current {
                let lines = self.read_lines(&record.source_file);
                loaded = Some((record.source_file.clone(), lines));
            }

            let Some((_, Some(lines))) = &loaded else {
                continue;
            };

            let Some(index) = (record.line_number as usize).checked_sub(1) else {
                continue;
            };
            match lines.get(index) {
                Some(line) => record.source_line = line.clone(),
                None => debug!(
                    "Line {} out of range for {} ({} lines)",
                    record.line_number,
                    record.source_file,
                    lines.len()
                ),
            }
        }
    }

    fn resolve_path(&self, file: &str) -> PathBuf {
        let path = Path::new(file);
        match &self.source_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn read_lines(&self, file: &str) -> Option<Vec<String>> {
        let path = self.resolve_path(file);
        match fs::read_to_string(&path) {
            Ok(source) => Some(source.lines().map(str::to_string).collect()),
            Err(e) => {
                debug!("Cannot read source {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Extracts records from a dump without touching the filesystem.
///
/// Header lines update the current file and are never records themselves.
/// Rows before the first header, and rows whose line number is zero or out of
/// range for `u32`, produce nothing.
pub fn parse_records(dump: &str) -> Vec<BreakpointRecord> {
    let mut records = Vec::new();
    let mut current_file: Option<&str> = None;

    for line in dump.lines() {
        if let Some(caps) = header_pattern().captures(line) {
            current_file = caps.get(1).map(|m| m.as_str());
            continue;
        }

        let Some(caps) = row_pattern().captures(line) else {
            continue;
        };
        let Some(file) = current_file else {
            continue;
        };

        let line_number = match caps[2].parse::<u32>() {
            Ok(n) if n > 0 => n,
            _ => continue,
        };

        records.push(BreakpointRecord {
            source_file: file.to_string(),
            line_number,
            address: caps[3].trim_end().to_string(),
            source_line: String::new(),
        });
    }

    records
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
