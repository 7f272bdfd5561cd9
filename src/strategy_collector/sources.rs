use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use tracing::{info, instrument, warn};

/// Supplies strategy source texts as `(id, text)` pairs.
pub trait StrategySource {
    /// Every source text, in a stable order.
    fn sources(&self) -> anyhow::Result<Vec<(String, String)>>;
}

/// Reads every file with a given extension from a directory.
///
/// Files are read in file-name order and each one is identified by its file stem, so
/// `tit_for_tat.py` becomes `tit_for_tat`.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    directory: PathBuf,
    extension: String,
}

impl DirectorySource {
    /// Source reading `.py` files from `directory`.
    pub fn new(directory: impl AsRef<Path>) -> Self {
        Self {
            directory: directory.as_ref().to_path_buf(),
            extension: "py".to_string(),
        }
    }

    /// Reads files ending in `.{extension}` instead.
    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }
}

impl StrategySource for DirectorySource {
    #[instrument(skip(self), fields(directory = ?self.directory))]
    fn sources(&self) -> anyhow::Result<Vec<(String, String)>> {
        let directory = &self.directory;
        if !directory.is_dir() {
            bail!("'{directory:?}' is not a valid directory");
        }

        let mut paths = vec![];
        for entry in std::fs::read_dir(directory)
            .with_context(|| format!("could not read directory '{directory:?}'"))?
        {
            let path = entry
                .with_context(|| format!("could not read an entry of '{directory:?}'"))?
                .path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == self.extension.as_str())
            {
                paths.push(path);
            }
        }
        paths.sort();
        info!(files = paths.len(), "strategy files found");

        let mut sources = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(id) = path.file_stem().map(|stem| stem.to_string_lossy().into_owned()) else {
                warn!(?path, "skipping file without a name");
                continue;
            };
            let bytes =
                std::fs::read(&path).with_context(|| format!("could not read '{path:?}'"))?;
            // invalid UTF-8 is left for the parser to reject
            sources.push((id, String::from_utf8_lossy(&bytes).into_owned()));
        }
        Ok(sources)
    }
}

/// Strategy sources held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    entries: Vec<(String, String)>,
}

impl MemorySource {
    /// Source yielding `entries` in the given order.
    pub fn new(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Adds one source text.
    pub fn with(mut self, id: impl Into<String>, text: impl Into<String>) -> Self {
        self.entries.push((id.into(), text.into()));
        self
    }
}

impl StrategySource for MemorySource {
    fn sources(&self) -> anyhow::Result<Vec<(String, String)>> {
        Ok(self.entries.clone())
    }
}
