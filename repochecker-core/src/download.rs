//! Binary download and provenance verification.
//!
//! Binaries of a package's good repository are fetched into
//! `<work_dir>/<group>/<target package>/`. Every RPM must carry a DISTURL
//! whose last path segment starts with the package's source revision; any
//! other artifact means the repository holds binaries of different sources.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, error, warn};

use crate::config::{ArchPair, ReviewSettings};
use crate::error::DownloadError;
use crate::model::{BinaryLocation, CheckRepoPackage};
use crate::obs::BuildService;

/// name-version-release.arch.rpm
static BINARY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(.*)-([^-]*)-([^-]*)\.([^-.]+)\.rpm$").expect("binary file name regex")
});

const RPMLINT_LOG: &str = "rpmlint.log";

/// A build artifact worth looking at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryFile {
    pub file: String,
    /// Package name; empty for the rpmlint log.
    pub name: String,
    /// Architecture embedded in the file name; empty for the rpmlint log.
    pub arch: String,
}

/// Parse a binary file name, dropping debug info, debug sources, source
/// RPMs and anything that is neither an RPM nor the rpmlint log.
pub fn parse_binary(file: &str) -> Option<BinaryFile> {
    let Some(caps) = BINARY_RE.captures(file) else {
        return (file == RPMLINT_LOG).then(|| BinaryFile {
            file: file.to_string(),
            name: String::new(),
            arch: String::new(),
        });
    };

    let name = &caps[1];
    let arch = &caps[4];
    if name.ends_with("-debuginfo")
        || name.ends_with("-debuginfo-32bit")
        || name.ends_with("-debugsource")
        || arch == "src"
    {
        return None;
    }

    Some(BinaryFile {
        file: file.to_string(),
        name: name.to_string(),
        arch: arch.to_string(),
    })
}

/// True if the last segment of `disturl` starts with `rev`. An empty
/// revision matches nothing.
pub fn matches_revision(disturl: &str, rev: &str) -> bool {
    !rev.is_empty()
        && disturl
            .rsplit('/')
            .next()
            .is_some_and(|basename| basename.starts_with(rev))
}

/// Reads the source provenance embedded in a binary artifact.
#[async_trait]
pub trait ProvenanceReader: Send + Sync {
    async fn disturl(&self, artifact: &Path) -> Result<String, DownloadError>;
}

/// Queries `DISTURL` with the rpm tool.
#[derive(Debug, Clone)]
pub struct RpmProvenance {
    program: String,
}

impl Default for RpmProvenance {
    fn default() -> Self {
        Self {
            program: "rpm".to_string(),
        }
    }
}

impl RpmProvenance {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl ProvenanceReader for RpmProvenance {
    async fn disturl(&self, artifact: &Path) -> Result<String, DownloadError> {
        let query_failed = |detail: String| DownloadError::ProvenanceQuery {
            path: artifact.to_path_buf(),
            detail,
        };

        let output = Command::new(&self.program)
            .args(["--nosignature", "--queryformat", "%{DISTURL}", "-qp"])
            .arg(artifact)
            .output()
            .await
            .map_err(|e| query_failed(format!("cannot run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(query_failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| query_failed("no DISTURL in output".to_string()))
    }
}

/// Files fetched for a group and names the checker may skip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Downloads {
    pub files: Vec<PathBuf>,
    /// Binary names already shipped in the target's released repository.
    pub ignore: Vec<String>,
}

impl Downloads {
    pub fn extend(&mut self, other: Downloads) {
        self.files.extend(other.files);
        self.ignore.extend(other.ignore);
    }
}

/// Fetches and verifies the binaries of one package at a time.
pub struct Downloader<'a> {
    service: &'a dyn BuildService,
    provenance: &'a dyn ProvenanceReader,
    settings: &'a ReviewSettings,
}

impl<'a> Downloader<'a> {
    pub fn new(
        service: &'a dyn BuildService,
        provenance: &'a dyn ProvenanceReader,
        settings: &'a ReviewSettings,
    ) -> Self {
        Self {
            service,
            provenance,
            settings,
        }
    }

    /// Download a package's binaries from its good repository into
    /// `group_dir` and verify their provenance.
    ///
    /// Files already on disk are not fetched again but are still verified.
    /// Build-excluded packages download nothing.
    pub async fn download(
        &self,
        package: &mut CheckRepoPackage,
        group_dir: &Path,
    ) -> Result<Downloads, DownloadError> {
        if package.build_excluded {
            debug!("{} is build excluded, nothing to download", package);
            return Ok(Downloads::default());
        }
        let Some(repository) = package.good_repo.clone() else {
            warn!("{} has no good repository, nothing to download", package);
            return Ok(Downloads::default());
        };

        let dest = group_dir.join(&package.target_package);
        tokio::fs::create_dir_all(&dest)
            .await
            .map_err(|e| DownloadError::io(&dest, e))?;
        package.dest_dir = Some(dest.clone());

        let listing = cross_arch_listing(
            self.service,
            &self.settings.archs,
            &package.source_project,
            &repository,
            &package.source_package,
            true,
        )
        .await;

        let mut files = Vec::with_capacity(listing.len());
        for (arch, binary) in listing {
            let target = dest.join(&binary.file);
            let present = tokio::fs::try_exists(&target)
                .await
                .map_err(|e| DownloadError::io(&target, e))?;
            if !present {
                let location = BinaryLocation::new(
                    &package.source_project,
                    &repository,
                    &arch,
                    &package.source_package,
                );
                self.service
                    .fetch_binary(&location, &binary.file, &target)
                    .await?;
            }
            files.push(target.clone());

            if binary.file.ends_with(".rpm") {
                let disturl = self.provenance.disturl(&target).await?;
                if !matches_revision(&disturl, &package.rev) {
                    return Err(DownloadError::ProvenanceMismatch {
                        disturl,
                        rev: package.rev.clone(),
                    });
                }
            }
        }

        let ignore = self.released_names(package).await;
        Ok(Downloads { files, ignore })
    }

    /// Names of the target package's binaries already in the released
    /// repository. Lookup failures yield an empty list.
    async fn released_names(&self, package: &CheckRepoPackage) -> Vec<String> {
        cross_arch_listing(
            self.service,
            &self.settings.archs,
            &package.target_project,
            &self.settings.released_repository,
            &package.target_package,
            false,
        )
        .await
        .into_iter()
        .map(|(_, binary)| binary.name)
        .filter(|name| !name.is_empty())
        .collect()
    }
}

/// Binaries of the primary architecture plus the secondary architecture's
/// binaries built for the primary one, each paired with the architecture of
/// the listing it came from.
async fn cross_arch_listing(
    service: &dyn BuildService,
    archs: &ArchPair,
    project: &str,
    repository: &str,
    package: &str,
    report_errors: bool,
) -> Vec<(String, BinaryFile)> {
    let mut listing = Vec::new();
    for arch in archs.both() {
        let location = BinaryLocation::new(project, repository, arch, package);
        let files = match service.binaries(&location).await {
            Ok(files) => files,
            Err(e) => {
                if report_errors {
                    error!(
                        "Binary listing for {}/{}/{}/{} failed: {}",
                        project, repository, arch, package, e
                    );
                } else {
                    debug!(
                        "No binaries for {}/{}/{}/{}: {}",
                        project, repository, arch, package, e
                    );
                }
                continue;
            }
        };

        listing.extend(
            files
                .iter()
                .filter_map(|file| parse_binary(file))
                .filter(|binary| arch == archs.primary || binary.arch == archs.primary)
                .map(|binary| (arch.to_string(), binary)),
        );
    }
    listing
}

/// Delete every file under `dir` that is not in `keep`, then remove
/// directories left empty. `dir` itself stays.
pub async fn prune_group_dir(dir: &Path, keep: &[PathBuf]) -> io::Result<()> {
    let dir = dir.to_path_buf();
    let keep: HashSet<PathBuf> = keep.iter().cloned().collect();
    tokio::task::spawn_blocking(move || prune_blocking(&dir, &keep, true).map(|_| ()))
        .await
        .map_err(io::Error::other)?
}

/// Returns whether `dir` is empty afterwards.
fn prune_blocking(dir: &Path, keep: &HashSet<PathBuf>, is_root: bool) -> io::Result<bool> {
    let mut remaining = 0usize;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        // Symlinks are removed as files, never followed.
        if entry.file_type()?.is_dir() {
            if !prune_blocking(&path, keep, false)? {
                remaining += 1;
            }
        } else if keep.contains(&path) {
            remaining += 1;
        } else {
            debug!("Pruning stale {}", path.display());
            std::fs::remove_file(&path)?;
        }
    }

    if remaining == 0 && !is_root {
        std::fs::remove_dir(dir)?;
        return Ok(true);
    }
    Ok(remaining == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_binary_rpm() {
        let b = parse_binary("make-4.4-1.1.x86_64.rpm").unwrap();
        assert_eq!(b.name, "make");
        assert_eq!(b.arch, "x86_64");

        let b = parse_binary("libfoo1-32bit-1.0-2.3.x86_64.rpm").unwrap();
        assert_eq!(b.name, "libfoo1-32bit");
    }

    #[test]
    fn test_parse_binary_filters_debug_and_source() {
        assert!(parse_binary("make-debuginfo-4.4-1.1.x86_64.rpm").is_none());
        assert!(parse_binary("make-debuginfo-32bit-4.4-1.1.x86_64.rpm").is_none());
        assert!(parse_binary("make-debugsource-4.4-1.1.x86_64.rpm").is_none());
        assert!(parse_binary("make-4.4-1.1.src.rpm").is_none());
        assert!(parse_binary("_statistics").is_none());
        assert!(parse_binary("make.changes").is_none());
    }

    #[test]
    fn test_parse_binary_keeps_rpmlint_log() {
        let b = parse_binary("rpmlint.log").unwrap();
        assert_eq!(b.name, "");
        assert_eq!(b.arch, "");
    }

    #[test]
    fn test_matches_revision_uses_basename_prefix() {
        let disturl = "obs://build.opensuse.org/devel:tools/standard/0123abcd-make";
        assert!(matches_revision(disturl, "0123abcd"));
        assert!(matches_revision(disturl, "0123"));
        assert!(!matches_revision(disturl, "ffff"));
        assert!(!matches_revision(disturl, "devel"));
    }

    #[test]
    fn test_empty_revision_matches_nothing() {
        let disturl = "obs://build.opensuse.org/devel:tools/standard/0123abcd-make";
        assert!(!matches_revision(disturl, ""));
        assert!(!matches_revision("", ""));
    }

    #[tokio::test]
    async fn test_prune_keeps_downloads_and_drops_the_rest() {
        let root = tempfile::tempdir().unwrap();
        let pkg = root.path().join("make");
        let stale = root.path().join("gone");
        std::fs::create_dir_all(&pkg).unwrap();
        std::fs::create_dir_all(stale.join("nested")).unwrap();

        let kept = pkg.join("make-4.4-1.1.x86_64.rpm");
        let old = pkg.join("make-4.3-1.1.x86_64.rpm");
        std::fs::write(&kept, b"new").unwrap();
        std::fs::write(&old, b"old").unwrap();
        std::fs::write(stale.join("nested").join("x.rpm"), b"x").unwrap();

        prune_group_dir(root.path(), &[kept.clone()]).await.unwrap();

        assert!(kept.exists());
        assert!(!old.exists());
        assert!(!stale.exists());
        assert!(root.path().exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_prune_does_not_follow_directory_symlinks() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let precious = outside.path().join("keep.rpm");
        std::fs::write(&precious, b"keep").unwrap();
        let link = root.path().join("linked");
        std::os::unix::fs::symlink(outside.path(), &link).unwrap();

        prune_group_dir(root.path(), &[]).await.unwrap();

        assert!(precious.exists());
        assert!(std::fs::symlink_metadata(&link).is_err());
    }

    #[tokio::test]
    async fn test_prune_empty_root_survives() {
        let root = tempfile::tempdir().unwrap();
        prune_group_dir(root.path(), &[]).await.unwrap();
        assert!(root.path().exists());
    }
}
