//! Table codecs: moving [`Table`] values to and from disk.
//!
//! The engine never reads table files itself. [`Nwn2daCodec`] shells out to
//! the `nwn-2da` tool for the real 2DA format; [`YamlCodec`] keeps tables as
//! plain YAML, which is also the format `nwn-2da` converts from.

use std::env;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::LoadError;
use crate::loader::write_file;
use crate::table::Table;

/// Environment variable naming the `nwn-2da` executable.
pub const NWN_2DA_ENV: &str = "NWN_2DA_BIN";

const DEFAULT_NWN_2DA: &str = "nwn-2da";

/// Reads and writes tables in one on-disk format.
pub trait TableCodec {
    /// File extension of tables in this format, without the dot.
    fn extension(&self) -> &'static str;

    fn write_table(&self, table: &Table, path: &Path) -> Result<(), LoadError>;

    fn read_table(&self, path: &Path) -> Result<Table, LoadError>;
}

fn table_yaml(table: &Table, path: &Path) -> Result<String, LoadError> {
    serde_yaml::to_string(table).map_err(|e| LoadError::yaml(path, e))
}

/// Tables as YAML documents (`columns` plus `rows`).
#[derive(Debug, Clone, Copy, Default)]
pub struct YamlCodec;

impl TableCodec for YamlCodec {
    fn extension(&self) -> &'static str {
        "yml"
    }

    fn write_table(&self, table: &Table, path: &Path) -> Result<(), LoadError> {
        write_file(path, &table_yaml(table, path)?)
    }

    fn read_table(&self, path: &Path) -> Result<Table, LoadError> {
        let content = fs::read_to_string(path).map_err(|e| LoadError::io(path, e))?;
        serde_yaml::from_str(&content).map_err(|e| LoadError::yaml(path, e))
    }
}

/// 2DA files, converted by the external `nwn-2da` tool.
#[derive(Debug, Clone)]
pub struct Nwn2daCodec {
    program: PathBuf,
}

impl Nwn2daCodec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Use `$NWN_2DA_BIN`, or `nwn-2da` from the `PATH`.
    pub fn from_env() -> Self {
        Self::new(env::var_os(NWN_2DA_ENV).unwrap_or_else(|| DEFAULT_NWN_2DA.into()))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn run(&self, path: &Path, args: &[&OsStr]) -> Result<Vec<u8>, LoadError> {
        tracing::debug!("Running {} {:?}", self.program.display(), args);
        let output = Command::new(&self.program)
            .args(args)
            .output()
            .map_err(|e| LoadError::Codec {
                path: path.to_path_buf(),
                detail: format!("failed to start {}: {}", self.program.display(), e),
            })?;

        if !output.status.success() {
            return Err(LoadError::Codec {
                path: path.to_path_buf(),
                detail: format!(
                    "{} exited with {}: {}",
                    self.program.display(),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(output.stdout)
    }
}

impl TableCodec for Nwn2daCodec {
    fn extension(&self) -> &'static str {
        "2da"
    }

    /// Writes the YAML form to `path`, then converts it in place.
    fn write_table(&self, table: &Table, path: &Path) -> Result<(), LoadError> {
        write_file(path, &table_yaml(table, path)?)?;
        let target = path.as_os_str();
        let args = [
            OsStr::new("-o"),
            target,
            OsStr::new("-O"),
            OsStr::new("2da"),
            OsStr::new("-I"),
            OsStr::new("yaml"),
            target,
        ];
        self.run(path, &args)?;
        Ok(())
    }

    fn read_table(&self, path: &Path) -> Result<Table, LoadError> {
        let stdout = self.run(path, &[OsStr::new("-O"), OsStr::new("yaml"), path.as_os_str()])?;
        serde_yaml::from_slice(&stdout).map_err(|e| LoadError::yaml(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_program_is_codec_error() {
        let codec = Nwn2daCodec::new("/nonexistent/nwn-2da");
        let result = codec.read_table(Path::new("feats.2da"));
        assert!(matches!(result, Err(LoadError::Codec { .. })));
    }

    #[test]
    fn test_extensions() {
        assert_eq!(YamlCodec.extension(), "yml");
        assert_eq!(Nwn2daCodec::new("nwn-2da").extension(), "2da");
        assert_eq!(Nwn2daCodec::new("tool").program(), Path::new("tool"));
    }
}
