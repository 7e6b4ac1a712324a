//! Platform dependent lookup of the database executable
use std::path::{Path, PathBuf};
use std::{env, fs, io};

use tracing::{debug, info};

/// Database executable and the JS directory shipped with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installation {
    pub arangod: PathBuf,
    pub js_dir: PathBuf,
}

impl Installation {
    pub const DEFAULT_ARANGOD: &'static str = "/usr/sbin/arangod";
    pub const DEFAULT_JS_DIR: &'static str = "/usr/share/arangodb3/js";

    /// Relative location of a development build
    const BUILD_ARANGOD: &'static str = "build/bin/arangod";
}

impl Default for Installation {
    fn default() -> Self {
        Self {
            arangod: PathBuf::from(Self::DEFAULT_ARANGOD),
            js_dir: PathBuf::from(Self::DEFAULT_JS_DIR),
        }
    }
}

/// Find the installation, falling back to the default locations
pub fn find_installation() -> Installation {
    match find_installation_among(&candidates()) {
        Some(installation) => {
            info!(
                arangod = %installation.arangod.display(),
                js_dir = %installation.js_dir.display(),
                "Found database executable"
            );
            installation
        }
        None => Installation::default(),
    }
}

fn candidates() -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from(Installation::BUILD_ARANGOD)];
    if cfg!(target_os = "linux") {
        candidates.push(PathBuf::from("/usr/sbin/arangod"));
    } else if cfg!(target_os = "macos") {
        candidates.push(PathBuf::from(
            "/Applications/ArangoDB3-CLI.app/Contents/MacOS/usr/sbin/arangod",
        ));
        candidates.push(PathBuf::from("/usr/local/opt/arangodb/sbin/arangod"));
    } else if cfg!(target_os = "windows") {
        candidates.extend(windows_candidates(Path::new(WINDOWS_PROGRAM_FILES)));
    }
    candidates
}

const WINDOWS_PROGRAM_FILES: &str = "C:/Program Files";
const WINDOWS_INSTALL_PREFIX: &str = "ArangoDB3 ";

/// Installed versions under `program_files`, newest first
///
/// Installations are named `ArangoDB3 <version>`, so the highest name wins.
fn windows_candidates(program_files: &Path) -> Vec<PathBuf> {
    let entries = match fs::read_dir(program_files) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(path = %program_files.display(), error = %e, "Cannot list installations");
            return vec![];
        }
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with(WINDOWS_INSTALL_PREFIX))
        .collect();
    names.sort_unstable_by(|a, b| b.cmp(a));

    names
        .into_iter()
        .map(|name| program_files.join(name).join("usr/bin/arangod.exe"))
        .collect()
}

/// First candidate that exists
///
/// A development build keeps its JS files in `./js`, an installed
/// executable in `<prefix>/share/arangodb3/js`.
pub fn find_installation_among(candidates: &[PathBuf]) -> Option<Installation> {
    for candidate in candidates {
        if !candidate.exists() {
            debug!(path = %candidate.display(), "Not found");
            continue;
        }
        let Ok(arangod) = absolute(candidate) else {
            continue;
        };
        let js_dir = if candidate == Path::new(Installation::BUILD_ARANGOD) {
            absolute(Path::new("js")).ok()?
        } else {
            arangod
                .parent()
                .unwrap_or(Path::new("/"))
                .join("../share/arangodb3/js")
        };
        return Some(Installation { arangod, js_dir });
    }
    None
}

fn absolute(path: &Path) -> io::Result<PathBuf> {
    Ok(if path.is_absolute() {
        path.to_owned()
    } else {
        env::current_dir()?.join(path)
    })
}
