//! Binary resolver - 현재 OS/아키텍처에 맞는 chainlink 실행 파일을 찾습니다.
//!
//! Lookup order:
//! 1. an explicit override path, if it exists
//! 2. the bundled artifact `<root>/bin/chainlink-<platform>-<arch>[.exe]`
//!
//! Resolution never executes the candidate.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{BridgeError, Result};

/// Directory under the extension root holding the per-platform artifacts.
pub const BUNDLED_DIR: &str = "bin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Darwin,
    Win32,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Linux, Platform::Darwin, Platform::Win32];

    pub fn current() -> Option<Self> {
        match std::env::consts::OS {
            "linux" => Some(Self::Linux),
            "macos" => Some(Self::Darwin),
            "windows" => Some(Self::Win32),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Darwin => "darwin",
            Self::Win32 => "win32",
        }
    }

    pub fn exe_suffix(self) -> &'static str {
        match self {
            Self::Win32 => ".exe",
            _ => "",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    X64,
    Arm64,
}

impl Arch {
    pub const ALL: [Arch; 2] = [Arch::X64, Arch::Arm64];

    pub fn current() -> Option<Self> {
        match std::env::consts::ARCH {
            "x86_64" => Some(Self::X64),
            "aarch64" => Some(Self::Arm64),
            _ => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Self::X64 => "x64",
            Self::Arm64 => "arm64",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Bundled,
    Override,
}

/// A resolved executable. Immutable for the lifetime of an activation; a new one
/// is produced only by explicit reconfiguration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BinaryDescriptor {
    pub platform: Platform,
    pub arch: Arch,
    pub resolved_path: PathBuf,
    pub source_kind: SourceKind,
}

impl fmt::Display for BinaryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:?}, {}-{})",
            self.resolved_path.display(),
            self.source_kind,
            self.platform.tag(),
            self.arch.tag()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Validation {
    pub valid: bool,
    pub error: Option<String>,
}

/// File name of the bundled artifact for a target.
pub fn bundled_name(platform: Platform, arch: Arch) -> String {
    format!("chainlink-{}-{}{}", platform.tag(), arch.tag(), platform.exe_suffix())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryResolver {
    platform: Platform,
    arch: Arch,
}

impl BinaryResolver {
    /// Resolver for the running OS and CPU.
    pub fn new() -> Result<Self> {
        let platform = Platform::current().ok_or_else(|| {
            BridgeError::BinaryNotFound(format!("unsupported platform '{}'", std::env::consts::OS))
        })?;
        let arch = Arch::current().ok_or_else(|| {
            BridgeError::BinaryNotFound(format!("unsupported architecture '{}'", std::env::consts::ARCH))
        })?;
        Ok(Self { platform, arch })
    }

    pub fn for_target(platform: Platform, arch: Arch) -> Self {
        Self { platform, arch }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn bundled_path(&self, root: &Path) -> PathBuf {
        root.join(BUNDLED_DIR).join(bundled_name(self.platform, self.arch))
    }

    /// Resolve the executable. An existing override wins; a missing one is
    /// logged and the bundled artifact is used instead.
    pub fn resolve(&self, root: &Path, override_path: Option<&Path>) -> Result<BinaryDescriptor> {
        if let Some(path) = override_path.filter(|p| !p.as_os_str().is_empty()) {
            if path.is_file() {
                tracing::debug!("Using override binary {}", path.display());
                return Ok(self.descriptor(path.to_path_buf(), SourceKind::Override));
            }
            tracing::warn!(
                "Configured binary path {} does not exist, falling back to bundled binary",
                path.display()
            );
        }

        let bundled = self.bundled_path(root);
        if bundled.is_file() {
            return Ok(self.descriptor(bundled, SourceKind::Bundled));
        }

        Err(BridgeError::BinaryNotFound(format!(
            "no binary for {}-{} at {} and no usable override; set the chainlink binary path in settings",
            self.platform.tag(),
            self.arch.tag(),
            bundled.display()
        )))
    }

    /// Cheap existence/permission check of whatever `resolve` would pick.
    pub fn validate(&self, root: &Path, override_path: Option<&Path>) -> Validation {
        let descriptor = match self.resolve(root, override_path) {
            Ok(d) => d,
            Err(e) => return Validation { valid: false, error: Some(e.to_string()) },
        };
        match check_executable(&descriptor.resolved_path) {
            Ok(()) => Validation { valid: true, error: None },
            Err(reason) => Validation { valid: false, error: Some(reason) },
        }
    }

    fn descriptor(&self, resolved_path: PathBuf, source_kind: SourceKind) -> BinaryDescriptor {
        BinaryDescriptor {
            platform: self.platform,
            arch: self.arch,
            resolved_path,
            source_kind,
        }
    }
}

#[cfg(unix)]
fn check_executable(path: &Path) -> std::result::Result<(), String> {
    use std::os::unix::fs::PermissionsExt;

    let meta = std::fs::metadata(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    if meta.permissions().mode() & 0o111 == 0 {
        return Err(format!("{} is not executable", path.display()));
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_executable(path: &Path) -> std::result::Result<(), String> {
    std::fs::metadata(path)
        .map(|_| ())
        .map_err(|e| format!("{}: {}", path.display(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"#!/bin/sh\n").unwrap();
    }

    #[test]
    fn bundled_names_follow_platform_convention() {
        for platform in Platform::ALL {
            for arch in Arch::ALL {
                let name = bundled_name(platform, arch);
                assert!(name.starts_with("chainlink-"));
                assert!(name.contains(platform.tag()) && name.contains(arch.tag()));
                assert_eq!(name.ends_with(".exe"), platform == Platform::Win32, "{}", name);
            }
        }
    }

    #[test]
    fn resolve_picks_bundled_artifact() {
        let dir = tempfile::tempdir().unwrap();
        for platform in Platform::ALL {
            for arch in Arch::ALL {
                let resolver = BinaryResolver::for_target(platform, arch);
                touch(&resolver.bundled_path(dir.path()));
                let d = resolver.resolve(dir.path(), None).unwrap();
                assert_eq!(d.source_kind, SourceKind::Bundled);
                assert_eq!(
                    d.resolved_path.file_name().unwrap().to_str().unwrap(),
                    bundled_name(platform, arch)
                );
            }
        }
    }

    #[test]
    fn existing_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = BinaryResolver::for_target(Platform::Linux, Arch::X64);
        touch(&resolver.bundled_path(dir.path()));
        let custom = dir.path().join("custom").join("chainlink");
        touch(&custom);

        let d = resolver.resolve(dir.path(), Some(&custom)).unwrap();
        assert_eq!(d.source_kind, SourceKind::Override);
        assert_eq!(d.resolved_path, custom);
    }

    #[test]
    fn missing_override_falls_back_to_bundled() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = BinaryResolver::for_target(Platform::Darwin, Arch::Arm64);
        touch(&resolver.bundled_path(dir.path()));

        let d = resolver.resolve(dir.path(), Some(Path::new("/nonexistent/chainlink"))).unwrap();
        assert_eq!(d.source_kind, SourceKind::Bundled);
    }

    #[test]
    fn empty_override_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = BinaryResolver::for_target(Platform::Linux, Arch::Arm64);
        touch(&resolver.bundled_path(dir.path()));
        let d = resolver.resolve(dir.path(), Some(Path::new(""))).unwrap();
        assert_eq!(d.source_kind, SourceKind::Bundled);
    }

    #[test]
    fn nothing_found_is_binary_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = BinaryResolver::for_target(Platform::Win32, Arch::X64);
        let err = resolver.resolve(dir.path(), None).unwrap_err();
        assert!(matches!(err, BridgeError::BinaryNotFound(_)));

        let v = resolver.validate(dir.path(), None);
        assert!(!v.valid);
        assert!(v.error.is_some());
    }

    #[cfg(unix)]
    #[test]
    fn validate_checks_exec_bit_without_running() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let resolver = BinaryResolver::for_target(Platform::Linux, Arch::X64);
        let path = resolver.bundled_path(dir.path());
        // 실행되면 마커 파일을 남기는 스크립트. validate는 실행하지 않아야 함
        let marker = dir.path().join("ran");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, format!("#!/bin/sh\ntouch {}\n", marker.display())).unwrap();

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(!resolver.validate(dir.path(), None).valid);

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert!(resolver.validate(dir.path(), None).valid);
        assert!(!marker.exists());
    }
}
