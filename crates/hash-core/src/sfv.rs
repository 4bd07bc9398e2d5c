//! Per-directory SFV (`.sfv`) checksum manifest parsing.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::crc32::Crc32Filter;
use crate::error::CoreError;

/// SFV manifests larger than this are rejected as "not a proper sfv file".
const MAX_SFV_FILE_SIZE: u64 = 1024 * 1024;

/// Parses every `*.sfv` manifest in a directory into a `name -> CRC-32` map.
///
/// Missing or empty SFV content is legal: it simply means no CRC is
/// expected for any file in that directory.
#[derive(Debug, Default)]
pub struct DirSfvReader {
    dir: PathBuf,
    content: HashMap<String, u32>,
    failed_files: Vec<PathBuf>,
}

impl DirSfvReader {
    /// An empty reader with no loaded manifests.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `dir` for `*.sfv` files and (re)load their contents, replacing
    /// any previously loaded state. Parse failures are recorded in
    /// [`Self::failed_files`] and logged, not propagated — a directory
    /// with no (or broken) SFV manifests simply yields no expected CRCs.
    pub fn load_path(&mut self, dir: impl Into<PathBuf>) {
        self.content.clear();
        self.failed_files.clear();
        self.dir = dir.into();

        let entries = match glob_sfv_files(&self.dir) {
            Ok(paths) => paths,
            Err(err) => {
                tracing::debug!(dir = %self.dir.display(), %err, "sfv reader: failed to list directory");
                return;
            }
        };

        for path in entries {
            if let Err(err) = self.load_file(&path) {
                tracing::warn!(path = %path.display(), %err, "sfv manifest rejected");
                self.failed_files.push(path);
            }
        }
    }

    fn load_file(&mut self, path: &Path) -> Result<(), CoreError> {
        let meta = fs::metadata(path).map_err(|source| CoreError::SfvRead {
            path: path.to_owned(),
            source,
        })?;
        if meta.len() > MAX_SFV_FILE_SIZE {
            return Err(CoreError::SfvTooLarge {
                path: path.to_owned(),
                size: meta.len(),
            });
        }

        let text = fs::read_to_string(path).map_err(|source| CoreError::SfvRead {
            path: path.to_owned(),
            source,
        })?;
        let had_valid_line = parse_sfv(&text, &mut self.content);
        if !had_valid_line {
            return Err(CoreError::SfvRead {
                path: path.to_owned(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidData, "no valid lines in sfv manifest"),
            });
        }
        Ok(())
    }

    /// Manifests that failed to parse during the last [`Self::load_path`].
    #[must_use]
    pub fn failed_files(&self) -> &[PathBuf] {
        &self.failed_files
    }

    /// Look up the expected CRC-32 for a lowercased file name.
    #[must_use]
    pub fn has_file(&self, name_lower: &str) -> Option<u32> {
        self.content.get(name_lower).copied()
    }

    /// Stream the real file from disk and compare its CRC-32 against the
    /// manifest's expectation. Returns `true` if there is no expectation
    /// for this file (nothing to verify).
    #[must_use]
    pub fn is_crc_valid(&self, name_lower: &str) -> bool {
        let Some(expected) = self.has_file(name_lower) else {
            return true;
        };

        let path = self.dir.join(name_lower);
        let Ok(bytes) = fs::read(path) else {
            return false;
        };

        let mut crc = Crc32Filter::new();
        crc.update(&bytes);
        crc.finalize() == expected
    }
}

fn glob_sfv_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    // Ensure the directory actually exists/is readable before handing a
    // pattern to `glob` — `glob::glob` itself never fails on a missing
    // directory, it just yields zero matches, which would silently mask
    // the "directory doesn't exist" case callers rely on to short-circuit.
    fs::metadata(dir)?;

    let pattern = dir.join("*.[sS][fF][vV]");
    let pattern = pattern.to_string_lossy().into_owned();

    let matches = glob::glob(&pattern).map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?;
    let out = matches.flatten().filter(|path| path.is_file()).collect();
    Ok(out)
}

/// Parse SFV text, merging `name -> crc` pairs into `out`. Returns whether
/// at least one valid line was found.
fn parse_sfv(text: &str, out: &mut HashMap<String, u32>) -> bool {
    let mut had_valid_line = false;

    for raw_line in text.lines() {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(';') {
            continue;
        }

        // Sub-path entries aren't supported; a line mentioning one still
        // counts as "the manifest is valid", it's just skipped.
        if line.contains('\\') {
            had_valid_line = true;
            continue;
        }

        let Some(pos) = line.rfind(' ') else {
            continue;
        };
        let (name_part, crc_part) = (&line[..pos], line[pos + 1..].trim());
        if crc_part.len() != 8 || !crc_part.chars().all(|c| c.is_ascii_hexdigit()) {
            continue;
        }
        let Ok(crc) = u32::from_str_radix(crc_part, 16) else {
            continue;
        };

        let mut name = name_part.trim().to_lowercase();
        if name.len() >= 2 && name.starts_with('"') && name.ends_with('"') {
            name = name[1..name.len() - 1].to_owned();
        }
        if name.is_empty() {
            continue;
        }

        out.insert(name, crc);
        had_valid_line = true;
    }

    had_valid_line
}
