//! Build metadata written by the Arduino builder.
//!
//! Every build directory carries a `build.options.json` describing how the
//! sketch was compiled. Two things are read from it: the sketch location
//! (where `websim.json` and the `.ino` sources live) and the AVR toolchain
//! root, which is buried inside a comma-separated property string and is
//! therefore matched against the raw text rather than the parsed JSON.

use crate::error::{Result, SymbolError};
use regex::Regex;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

/// File name of the metadata file inside a build directory.
pub const BUILD_OPTIONS_FILE: &str = "build.options.json";

fn toolchain_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"runtime\.tools\.avr-gcc\.path=(.*?),").expect("toolchain pattern is valid")
    })
}

/// Contents of a build directory's `build.options.json`.
#[derive(Debug, Clone, Default)]
pub struct BuildMetadata {
    raw: String,
    values: Map<String, Value>,
}

impl BuildMetadata {
    /// Wraps already-loaded metadata text.
    ///
    /// Text that is not a JSON object keeps its raw form but exposes no keys.
    pub fn from_text(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let values = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        Self { raw, values }
    }

    /// Reads the metadata file of `build_dir`, failing if it is unreadable.
    pub fn load(build_dir: &Path) -> Result<Self> {
        let path = build_dir.join(BUILD_OPTIONS_FILE);
        let raw = fs::read_to_string(&path).map_err(|e| SymbolError::metadata(&path, e))?;
        Ok(Self::from_text(raw))
    }

    /// Returns true when nothing was loaded.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Looks up a top-level string value.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Directory holding the user's sketch, if recorded and non-empty.
    pub fn sketch_location(&self) -> Option<PathBuf> {
        self.get_str("sketchLocation")
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
    }

    /// Root directory of the AVR toolchain.
    pub fn toolchain_path(&self) -> Option<PathBuf> {
        toolchain_pattern()
            .captures(&self.raw)
            .and_then(|caps| caps.get(1))
            .map(|m| PathBuf::from(m.as_str()))
    }
}

/// Reads the build metadata next to a build artifact.
///
/// Absence, read failures and malformed JSON all produce an empty value; the
/// callers treat "no sketch location" as a normal skip condition.
pub fn read_build_metadata(build_dir: &Path) -> BuildMetadata {
    match BuildMetadata::load(build_dir) {
        Ok(metadata) => metadata,
        Err(e) => {
            debug!("No build metadata: {}", e);
            BuildMetadata::default()
        }
    }
}
