//! External disassembler invocation.

use crate::error::{Result, SymbolError};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;

/// Produces a decoded line-table dump for an ELF file.
pub trait Disassembler {
    /// Returns the `-WL` ("with lines") dump of `elf` using the toolchain
    /// installed under `toolchain`.
    fn dump_with_lines(&self, toolchain: &Path, elf: &Path) -> Result<String>;
}

/// `avr-objdump` from an Arduino AVR toolchain.
#[derive(Debug, Clone, Copy, Default)]
pub struct AvrObjdump;

impl AvrObjdump {
    /// Location of the objdump binary inside a toolchain root.
    pub fn program(toolchain: &Path) -> PathBuf {
        #[cfg(target_os = "windows")]
        let name = "avr-objdump.exe";
        #[cfg(not(target_os = "windows"))]
        let name = "avr-objdump";

        toolchain.join("bin").join(name)
    }

    /// Builds the command line; Windows goes through `cmd /c`.
    pub fn command(toolchain: &Path, elf: &Path) -> Command {
        let program = Self::program(toolchain);

        #[cfg(target_os = "windows")]
        let cmd = {
            let mut cmd = Command::new("cmd");
            cmd.arg("/c").arg(&program);
            cmd
        };
        #[cfg(not(target_os = "windows"))]
        let cmd = Command::new(&program);

        let mut cmd = cmd;
        cmd.arg("-WL").arg(elf);
        cmd
    }
}

impl Disassembler for AvrObjdump {
    fn dump_with_lines(&self, toolchain: &Path, elf: &Path) -> Result<String> {
        let program = Self::program(toolchain);
        let mut cmd = Self::command(toolchain, elf);

        info!("Running: {} -WL {}", program.display(), elf.display());

        let output = cmd
            .output()
            .map_err(|e| SymbolError::disassemble(&program, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SymbolError::disassemble(
                &program,
                format!("{} {}", output.status, stderr.trim()),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
