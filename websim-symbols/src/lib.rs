//! WebSIM Symbols - Breakpoint extraction for AVR builds
//!
//! This crate recovers, from a compiled Arduino sketch, which code addresses
//! correspond to which lines of the user's `.ino` file. The browser simulator
//! uses these mappings to offer line breakpoints.
//!
//! The pipeline:
//! - Read `build.options.json` from the build directory
//! - Locate the AVR toolchain and run `avr-objdump -WL` on the `.elf`
//! - Parse the decoded line table into [`BreakpointRecord`]s
//! - Keep only records in the sketch and attach each line's source text
//!
//! # Example
//!
//! ```no_run
//! use websim_symbols::BreakpointExtractor;
//! use std::path::Path;
//!
//! let extractor = BreakpointExtractor::new();
//! let breakpoints = extractor.extract(Path::new("/tmp/build/blink.ino.hex"))?;
//! for bp in &breakpoints {
//!     println!("{}:{} @ {}", bp.source_file, bp.line_number, bp.address);
//! }
//! # Ok::<(), websim_symbols::SymbolError>(())
//! ```

mod error;
pub mod extractor;
pub mod metadata;
pub mod source_map;
pub mod toolchain;

pub use error::{Result, SymbolError};
pub use extractor::{elf_path, retain_sketch_sources, BreakpointExtractor, SKETCH_EXTENSION};
pub use metadata::{read_build_metadata, BuildMetadata, BUILD_OPTIONS_FILE};
pub use source_map::{parse_records, BreakpointRecord, SourceMapper};
pub use toolchain::{AvrObjdump, Disassembler};
