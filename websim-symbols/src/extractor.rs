//! Breakpoint extraction from a compiled sketch.
//!
//! Given the `.hex` produced by an Arduino build, the extractor finds the
//! toolchain through the build metadata, disassembles the `.elf` sibling with
//! line information and keeps only the mappings that point into the sketch
//! itself. Everything from the core libraries is dropped, since the simulator
//! can only place breakpoints on lines the user wrote.

use crate::error::{Result, SymbolError};
use crate::metadata::{BuildMetadata, BUILD_OPTIONS_FILE};
use crate::source_map::{parse_records, BreakpointRecord, SourceMapper};
use crate::toolchain::{AvrObjdump, Disassembler};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extension of the top-level sketch file.
pub const SKETCH_EXTENSION: &str = "ino";

/// Keeps only records that belong to a sketch file.
///
/// Applying it twice yields the same sequence as applying it once.
pub fn retain_sketch_sources(records: Vec<BreakpointRecord>) -> Vec<BreakpointRecord> {
    records
        .into_iter()
        .filter(|r| r.has_extension(SKETCH_EXTENSION))
        .collect()
}

/// Path of the `.elf` that produced `artifact`.
///
/// Only a `.hex` extension is swapped; any other artifact is assumed to be
/// the ELF already.
pub fn elf_path(artifact: &Path) -> PathBuf {
    match artifact.extension().and_then(|e| e.to_str()) {
        Some("hex") => artifact.with_extension("elf"),
        _ => artifact.to_path_buf(),
    }
}

/// Recovers sketch breakpoints from build artifacts.
#[derive(Debug, Clone, Default)]
pub struct BreakpointExtractor<D = AvrObjdump> {
    disassembler: D,
}

impl BreakpointExtractor {
    /// Creates an extractor that runs the toolchain's `avr-objdump`.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<D: Disassembler> BreakpointExtractor<D> {
    /// Creates an extractor around a custom disassembler.
    pub fn with_disassembler(disassembler: D) -> Self {
        Self { disassembler }
    }

    /// Extracts the sketch breakpoints for a `.hex` (or `.elf`) artifact.
    ///
    /// # Errors
    ///
    /// Returns [`SymbolError::MetadataUnreadable`] if `build.options.json` is
    /// missing, [`SymbolError::ToolchainNotFound`] if it names no toolchain,
    /// and [`SymbolError::DisassembleFailed`] if the disassembler cannot run.
    /// An empty result is not an error.
    pub fn extract(&self, artifact: &Path) -> Result<Vec<BreakpointRecord>> {
        let build_dir = artifact.parent().unwrap_or_else(|| Path::new("."));
        let metadata = BuildMetadata::load(build_dir)?;

        let toolchain = metadata
            .toolchain_path()
            .ok_or_else(|| SymbolError::ToolchainNotFound(build_dir.join(BUILD_OPTIONS_FILE)))?;
        debug!("Toolchain: {}", toolchain.display());

        let elf = elf_path(artifact);
        let dump = self.disassembler.dump_with_lines(&toolchain, &elf)?;

        let mapper = match metadata.sketch_location() {
            Some(root) => SourceMapper::with_root(root),
            None => SourceMapper::new(),
        };
        let records = parse_records(&dump);
        let total = records.len();

        // Only sketch files are opened; core sources are filtered out first.
        let mut breakpoints = retain_sketch_sources(records);
        mapper.resolve_source_lines(&mut breakpoints);
        info!(
            "Extracted {} sketch breakpoints ({} line-table rows)",
            breakpoints.len(),
            total
        );

        Ok(breakpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::fs;
    use tempfile::tempdir;

    /// Returns canned output and remembers what it was asked to dump.
    struct CannedDump {
        output: String,
        calls: RefCell<Vec<(PathBuf, PathBuf)>>,
    }

    impl CannedDump {
        fn new(output: &str) -> Self {
            Self {
                output: output.to_string(),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl Disassembler for &CannedDump {
        fn dump_with_lines(&self, toolchain: &Path, elf: &Path) -> Result<String> {
            self.calls
                .borrow_mut()
                .push((toolchain.to_path_buf(), elf.to_path_buf()));
            Ok(self.output.clone())
        }
    }

    fn write_build(dir: &Path, sketch: &Path) {
        let options = serde_json::json!({
            "customBuildProperties": "runtime.tools.avr-gcc.path=/opt/avr-gcc,runtime.tools.avrdude.path=/opt/avrdude",
            "sketchLocation": sketch.to_string_lossy(),
        });
        fs::write(dir.join(BUILD_OPTIONS_FILE), options.to_string()).unwrap();
    }

    #[test]
    fn test_elf_path() {
        assert_eq!(
            elf_path(Path::new("/build/blink.ino.hex")),
            PathBuf::from("/build/blink.ino.elf")
        );
        assert_eq!(
            elf_path(Path::new("/build/blink.ino.elf")),
            PathBuf::from("/build/blink.ino.elf")
        );
    }

    #[test]
    fn test_extract_filters_to_sketch() {
        let build = tempdir().unwrap();
        let sketch = tempdir().unwrap();
        write_build(build.path(), sketch.path());
        fs::write(
            sketch.path().join("blink.ino"),
            "void setup() {\n  pinMode(13, OUTPUT);\n}\n",
        )
        .unwrap();

        let dump = "\
/tmp/arduino/core/wiring.c:
wiring.c                                     10               0x200               x
blink.ino:
blink.ino                                     2               0x100               x
blink.ino                                     3               0x104
";
        let canned = CannedDump::new(dump);
        let extractor = BreakpointExtractor::with_disassembler(&canned);
        let artifact = build.path().join("blink.ino.hex");

        let breakpoints = extractor.extract(&artifact).unwrap();

        assert_eq!(breakpoints.len(), 2);
        assert_eq!(breakpoints[0].source_line, "  pinMode(13, OUTPUT);");
        assert_eq!(breakpoints[0].address, "0x100               x");
        assert_eq!(breakpoints[1].source_line, "}");

        let calls = canned.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, PathBuf::from("/opt/avr-gcc"));
        assert_eq!(calls[0].1, build.path().join("blink.ino.elf"));
    }

    #[test]
    fn test_extract_skips_unreadable_core_sources() {
        let build = tempdir().unwrap();
        let sketch = tempdir().unwrap();
        write_build(build.path(), sketch.path());
        fs::write(sketch.path().join("blink.ino"), "void loop() {}\n").unwrap();

        // Relative core names resolve against the sketch folder, where they
        // do not exist.
        let dump = "\
wiring.c:
wiring.c                                     10               0x200
HardwareSerial.cpp:
HardwareSerial.cpp                           42               0x220
blink.ino:
blink.ino                                     1               0x100
";
        let canned = CannedDump::new(dump);
        let extractor = BreakpointExtractor::with_disassembler(&canned);

        let breakpoints = extractor
            .extract(&build.path().join("blink.ino.hex"))
            .unwrap();

        assert_eq!(breakpoints.len(), 1);
        assert_eq!(breakpoints[0].source_file, "blink.ino");
        assert_eq!(breakpoints[0].source_line, "void loop() {}");
    }

    #[test]
    fn test_extract_without_sketch_rows_is_empty() {
        let build = tempdir().unwrap();
        write_build(build.path(), build.path());

        let canned = CannedDump::new("main.cpp:\nmain.cpp  5  0x10\n");
        let extractor = BreakpointExtractor::with_disassembler(&canned);

        let breakpoints = extractor
            .extract(&build.path().join("blink.ino.hex"))
            .unwrap();
        assert!(breakpoints.is_empty());
    }

    #[test]
    fn test_extract_missing_metadata() {
        let build = tempdir().unwrap();
        let canned = CannedDump::new("");
        let extractor = BreakpointExtractor::with_disassembler(&canned);

        let err = extractor
            .extract(&build.path().join("blink.ino.hex"))
            .unwrap_err();
        assert!(matches!(err, SymbolError::MetadataUnreadable { .. }));
        assert!(canned.calls.borrow().is_empty());
    }

    #[test]
    fn test_extract_toolchain_not_found() {
        let build = tempdir().unwrap();
        fs::write(
            build.path().join(BUILD_OPTIONS_FILE),
            r#"{"fqbn": "arduino:avr:uno"}"#,
        )
        .unwrap();

        let canned = CannedDump::new("");
        let extractor = BreakpointExtractor::with_disassembler(&canned);

        let err = extractor
            .extract(&build.path().join("blink.ino.hex"))
            .unwrap_err();
        assert!(matches!(err, SymbolError::ToolchainNotFound(_)));
    }

    #[test]
    fn test_filter_is_idempotent() {
        let records = vec![
            BreakpointRecord {
                source_file: "a.ino".into(),
                line_number: 1,
                address: "0x0".into(),
                source_line: String::new(),
            },
            BreakpointRecord {
                source_file: "a.ino.cpp".into(),
                line_number: 2,
                address: "0x2".into(),
                source_line: String::new(),
            },
            BreakpointRecord {
                source_file: "b.ino".into(),
                line_number: 3,
                address: "0x4".into(),
                source_line: String::new(),
            },
        ];

        let once = retain_sketch_sources(records);
        let twice = retain_sketch_sources(once.clone());
        assert_eq!(once.len(), 2);
        assert_eq!(once, twice);
    }
}
