//! External tool discovery.
//!
//! Resolution order for each tool, first match wins:
//! 1. the explicit path from the environment (used verbatim);
//! 2. `<working dir>/bin/<tool>`;
//! 3. the directory holding the running executable;
//! 4. every entry of `PATH`;
//! 5. the bare tool name, left for the OS to resolve at spawn time.

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::model::{ToolCommand, ToolSource};

/// External tools the service depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    /// Media retrieval tool.
    Retrieval,
    /// Audio encoder.
    Encoder,
}

impl ToolKind {
    /// Conventional binary name without platform suffix.
    #[must_use]
    pub const fn binary_name(self) -> &'static str {
        match self {
            Self::Retrieval => "yt-dlp",
            Self::Encoder => "ffmpeg",
        }
    }

    fn file_name(self) -> String {
        format!("{}{}", self.binary_name(), env::consts::EXE_SUFFIX)
    }
}

/// Filesystem context used to probe for tools.
#[derive(Debug, Clone, Default)]
pub struct ToolProbe {
    working_dir: Option<PathBuf>,
    exe_dir: Option<PathBuf>,
    search_path: Option<OsString>,
}

impl ToolProbe {
    /// Probe context for the running process.
    #[must_use]
    pub fn current() -> Self {
        Self {
            working_dir: env::current_dir().ok(),
            exe_dir: env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(Path::to_path_buf)),
            search_path: env::var_os("PATH"),
        }
    }

    /// Probe context built from explicit locations.
    #[must_use]
    pub const fn new(
        working_dir: Option<PathBuf>,
        exe_dir: Option<PathBuf>,
        search_path: Option<OsString>,
    ) -> Self {
        Self {
            working_dir,
            exe_dir,
            search_path,
        }
    }

    /// Candidate locations for `kind`, in probing order.
    #[must_use]
    pub fn candidates(&self, kind: ToolKind) -> Vec<PathBuf> {
        let file_name = kind.file_name();
        let mut candidates = Vec::new();
        if let Some(dir) = &self.working_dir {
            candidates.push(dir.join("bin").join(&file_name));
        }
        if let Some(dir) = &self.exe_dir {
            candidates.push(dir.join(&file_name));
        }
        if let Some(path) = &self.search_path {
            candidates.extend(env::split_paths(path).map(|dir| dir.join(&file_name)));
        }
        candidates
    }

    /// Resolve the program path for `kind`.
    #[must_use]
    pub fn resolve(&self, kind: ToolKind, explicit: Option<&str>) -> PathBuf {
        self.locate(kind, explicit).program
    }

    /// Resolve `kind` into a command that remembers how its path was chosen.
    #[must_use]
    pub fn locate(&self, kind: ToolKind, explicit: Option<&str>) -> ToolCommand {
        if let Some(explicit) = explicit.map(str::trim).filter(|value| !value.is_empty()) {
            return ToolCommand::new(explicit).with_source(ToolSource::Configured);
        }
        self.candidates(kind)
            .into_iter()
            .find(|candidate| candidate.is_file())
            .map_or_else(
                || ToolCommand::new(kind.file_name()).with_source(ToolSource::Unresolved),
                |found| ToolCommand::new(found).with_source(ToolSource::Probed),
            )
    }
}
