// Installation lookup
// Where the bootstrap program and the standard pattern library live.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use tracing::{debug, error};

use crate::error::{Result, RosieError};

pub const ENV_HOME: &str = "ROSIE_HOME";
pub const ENV_LIBPATH: &str = "ROSIE_LIBPATH";
pub const RCFILE_NAME: &str = ".rosierc";

/// How the library path got its current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibpathSource {
    Default,
    Environment,
    Api,
    RcFile,
}

impl LibpathSource {
    pub fn as_str(self) -> &'static str {
        match self {
            LibpathSource::Default => "default",
            LibpathSource::Environment => "environment",
            LibpathSource::Api => "API",
            LibpathSource::RcFile => "rcfile",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "default" => Some(LibpathSource::Default),
            "environment" => Some(LibpathSource::Environment),
            "API" => Some(LibpathSource::Api),
            "rcfile" => Some(LibpathSource::RcFile),
            _ => None,
        }
    }
}

impl fmt::Display for LibpathSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved rosie installation. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installation {
    home: PathBuf,
    bootscript: PathBuf,
    libpath: String,
    libpath_source: LibpathSource,
    rcfile: PathBuf,
}

/// `$HOME/.rosierc`, or `./.rosierc` when there is no home directory.
fn default_rcfile() -> PathBuf {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(RCFILE_NAME)
}

impl Installation {
    /// Use the installation rooted at `home`. The library path still
    /// honours `ROSIE_LIBPATH`.
    pub fn at(home: impl Into<PathBuf>) -> Result<Self> {
        let home = home.into();
        let bootscript = home.join("lib").join("boot.lua");
        if !bootscript.is_file() {
            return Err(RosieError::NoInstallation(format!(
                "{} not found",
                bootscript.display()
            )));
        }
        let (libpath, libpath_source) = match std::env::var(ENV_LIBPATH) {
            Ok(path) if !path.is_empty() => (path, LibpathSource::Environment),
            _ => (
                home.join("rpl").to_string_lossy().into_owned(),
                LibpathSource::Default,
            ),
        };
        Ok(Installation {
            home,
            bootscript,
            libpath,
            libpath_source,
            rcfile: default_rcfile(),
        })
    }

    /// The process-wide installation, resolved on first use. A failed
    /// resolution is remembered; later calls fail the same way.
    pub fn global() -> Result<&'static Installation> {
        static INSTALLATION: OnceLock<Result<Installation>> = OnceLock::new();
        INSTALLATION
            .get_or_init(|| {
                let home = std::env::var_os(ENV_HOME)
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")));
                let resolved = Installation::at(&home);
                match &resolved {
                    Ok(_) => debug!("rosie home is {}", home.display()),
                    Err(e) => error!("{}", e),
                }
                resolved
            })
            .as_ref()
            .map_err(Clone::clone)
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn bootscript(&self) -> &Path {
        &self.bootscript
    }

    pub fn libpath(&self) -> &str {
        &self.libpath
    }

    pub fn libpath_source(&self) -> LibpathSource {
        self.libpath_source
    }

    /// The rc-file read when no file name is given.
    pub fn rcfile(&self) -> &Path {
        &self.rcfile
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_bootscript() {
        let dir = tempfile::tempdir().unwrap();
        let err = Installation::at(dir.path()).unwrap_err();
        assert_eq!(err.code(), crate::error::ERR_NO_FILE);
    }

    #[test]
    fn test_crate_dir_is_an_installation() {
        let inst = Installation::at(env!("CARGO_MANIFEST_DIR")).unwrap();
        assert!(inst.bootscript().ends_with("lib/boot.lua"));
    }

    #[test]
    fn test_default_rcfile() {
        let inst = Installation::at(env!("CARGO_MANIFEST_DIR")).unwrap();
        assert_eq!(inst.rcfile().file_name().unwrap(), RCFILE_NAME);
        if let Some(home) = std::env::var_os("HOME").filter(|h| !h.is_empty()) {
            assert_eq!(inst.rcfile().parent().unwrap(), Path::new(&home));
        }
    }

    #[test]
    fn test_source_names() {
        for source in [
            LibpathSource::Default,
            LibpathSource::Environment,
            LibpathSource::Api,
            LibpathSource::RcFile,
        ] {
            assert_eq!(LibpathSource::from_name(source.as_str()), Some(source));
        }
    }
}
