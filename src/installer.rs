//! Installer - resolved chainlink 바이너리를 사용자 PATH 디렉토리에 복사합니다.
//!
//! Candidates are tried in order and are never created. When none exists, a
//! single fallback directory (`~/.chainlink/bin`) is created and the caller gets
//! a one-time notice describing the PATH change the user has to make.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{BridgeError, Result};
use crate::utils::home_dir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallTargets {
    /// User-level executable directories, in preference order.
    pub candidates: Vec<PathBuf>,
    /// The only directory the installer may create.
    pub fallback: PathBuf,
}

impl InstallTargets {
    /// Targets for the running platform, rooted at the user's home directory.
    pub fn for_current_platform() -> Option<Self> {
        home_dir().map(|home| Self::under_home(&home))
    }

    pub fn under_home(home: &Path) -> Self {
        #[cfg(target_os = "windows")]
        let candidates = vec![
            home.join(".cargo").join("bin"),
            home.join(".local").join("bin"),
            home.join("bin"),
        ];
        #[cfg(not(target_os = "windows"))]
        let candidates = vec![
            home.join(".local").join("bin"),
            home.join(".cargo").join("bin"),
            home.join("bin"),
        ];

        Self {
            candidates,
            fallback: home.join(".chainlink").join("bin"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOutcome {
    pub installed_path: PathBuf,
    /// Set only when the fallback directory had to be created.
    pub notice: Option<String>,
}

pub struct Installer {
    targets: InstallTargets,
    file_name: String,
}

impl Installer {
    pub fn new(targets: InstallTargets) -> Self {
        let file_name = if cfg!(target_os = "windows") { "chainlink.exe" } else { "chainlink" };
        Self {
            targets,
            file_name: file_name.to_string(),
        }
    }

    pub fn targets(&self) -> &InstallTargets {
        &self.targets
    }

    pub fn install(&self, source: &Path) -> Result<InstallOutcome> {
        if !source.is_file() {
            return Err(BridgeError::Install(format!("{} is not a file", source.display())));
        }

        for dir in &self.targets.candidates {
            if !dir.is_dir() {
                tracing::debug!("Install candidate {} does not exist, skipping", dir.display());
                continue;
            }
            match self.copy_into(source, dir) {
                Ok(path) => {
                    tracing::info!("Installed chainlink to {}", path.display());
                    return Ok(InstallOutcome { installed_path: path, notice: None });
                }
                Err(e) => {
                    tracing::warn!("Failed to install into {}: {}", dir.display(), e);
                }
            }
        }

        let fallback = &self.targets.fallback;
        let created = !fallback.is_dir();
        if created {
            fs::create_dir_all(fallback).map_err(|e| {
                BridgeError::Install(format!("cannot create {}: {}", fallback.display(), e))
            })?;
        }
        let path = self.copy_into(source, fallback).map_err(|e| {
            BridgeError::Install(format!("cannot write into {}: {}", fallback.display(), e))
        })?;
        tracing::info!("Installed chainlink to fallback {}", path.display());

        let notice = created.then(|| path_notice(fallback));
        Ok(InstallOutcome { installed_path: path, notice })
    }

    /// Copy through a temp file and rename so a running copy is replaced atomically.
    fn copy_into(&self, source: &Path, dir: &Path) -> std::io::Result<PathBuf> {
        let target = dir.join(&self.file_name);
        if same_file(source, &target) {
            return Ok(target);
        }

        let staging = dir.join(format!(".{}.{}.tmp", self.file_name, std::process::id()));
        let result = fs::copy(source, &staging)
            .and_then(|_| set_executable(&staging))
            .and_then(|_| fs::rename(&staging, &target));
        if result.is_err() {
            let _ = fs::remove_file(&staging);
        }
        result.map(|_| target)
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(unix)]
fn set_executable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

fn path_notice(dir: &Path) -> String {
    if cfg!(target_os = "windows") {
        format!(
            "chainlink was installed to {0}. Add it to your PATH (System Properties > Environment Variables) to use chainlink from any terminal.",
            dir.display()
        )
    } else {
        format!(
            "chainlink was installed to {0}. Add `export PATH=\"{0}:$PATH\"` to your shell profile to use chainlink from any terminal.",
            dir.display()
        )
    }
}
