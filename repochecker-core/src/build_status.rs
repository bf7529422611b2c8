//! Build success evaluation.
//!
//! Classification of a last-success build status document is a pure function
//! (`classify`); `evaluate` wraps it with the memoized status lookup and the
//! "missing but never produced" filter, which both need the build service.

use std::collections::BTreeSet;

use tracing::{debug, error};

use crate::cache::MemoCache;
use crate::config::ArchPair;
use crate::error::ServiceResult;
use crate::model::{BinaryLocation, BuildResult, BuildStatus, CheckRepoPackage};
use crate::obs::{BuildService, BuildStatusQuery};
use crate::review::Finding;

/// Cache name of the memoized build status lookup.
pub const LAST_BUILD_SUCCESS: &str = "last_build_success";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Every required architecture succeeded or was excluded in `repository`.
    Good { repository: String },
    /// No repository is good but nothing argues against the package either.
    NoClearSignal,
    /// The package must not proceed; the finding says why.
    Rejected(Finding),
}

impl BuildOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, BuildOutcome::Rejected(_))
    }
}

/// A binary name a build reported as missing, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingCandidate {
    pub repository: String,
    pub arch: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub outcome: BuildOutcome,
    pub build_excluded: bool,
    /// Unfiltered, in document order. Empty when the scan stopped early.
    pub missing: Vec<MissingCandidate>,
}

impl Classification {
    fn rejected(finding: Finding) -> Self {
        Self {
            outcome: BuildOutcome::Rejected(finding),
            build_excluded: false,
            missing: Vec::new(),
        }
    }
}

/// Classify a build status document for one package.
///
/// Only repositories carrying both required architectures are looked at.
/// `outdated` on any required architecture ends the scan at once, so it wins
/// over every aggregate signal. A good repository wins over disabled,
/// building and failed signals from other repositories.
pub fn classify(
    status: &BuildStatus,
    archs: &ArchPair,
    package: &str,
    target_project: &str,
) -> Classification {
    let eligible: Vec<_> = status
        .repositories
        .iter()
        .filter(|repo| {
            let has = |name: &str| repo.archs.iter().any(|a| a.arch == name);
            has(&archs.primary) && has(&archs.secondary)
        })
        .collect();

    if eligible.is_empty() {
        return Classification::rejected(Finding::MissingArchitectures {
            primary: archs.primary.clone(),
            secondary: archs.secondary.clone(),
        });
    }

    let mut good_repo = None;
    let mut all_disabled = true;
    let mut building = None;
    let mut failed = None;
    let mut build_excluded = false;
    let mut missing = Vec::new();

    for repo in eligible {
        let mut is_good = true;
        let mut found_disabled = false;

        for arch in repo.archs.iter().filter(|a| archs.contains(&a.arch)) {
            missing.extend(arch.missing.iter().map(|name| MissingCandidate {
                repository: repo.name.clone(),
                arch: arch.arch.clone(),
                name: name.clone(),
            }));

            match arch.result {
                BuildResult::Succeeded => {}
                BuildResult::Excluded => {
                    if arch.arch == archs.secondary {
                        build_excluded = true;
                    }
                }
                BuildResult::Disabled => {
                    is_good = false;
                    found_disabled = true;
                }
                BuildResult::Failed => {
                    is_good = false;
                    failed = Some(repo.name.clone());
                }
                BuildResult::Building => {
                    is_good = false;
                    building = Some(repo.name.clone());
                }
                BuildResult::Outdated => {
                    return Classification::rejected(Finding::Outdated {
                        package: package.to_string(),
                    });
                }
                BuildResult::Unknown => is_good = false,
            }
        }

        if !found_disabled {
            all_disabled = false;
        }
        if is_good {
            good_repo = Some(repo.name.clone());
        }
    }

    let outcome = if let Some(repository) = good_repo {
        BuildOutcome::Good { repository }
    } else if all_disabled {
        BuildOutcome::Rejected(Finding::Disabled {
            package: package.to_string(),
            target_project: target_project.to_string(),
        })
    } else if let Some(repository) = building {
        BuildOutcome::Rejected(Finding::Building {
            package: package.to_string(),
            repository,
        })
    } else if let Some(repository) = failed {
        BuildOutcome::Rejected(Finding::Failed {
            package: package.to_string(),
            repository,
        })
    } else {
        BuildOutcome::NoClearSignal
    };

    Classification {
        outcome,
        build_excluded,
        missing,
    }
}

/// Evaluate a package's build state and record the result on it.
///
/// Sets `good_repo`, `build_excluded` and `missing`. An error means the
/// status could not be obtained; the caller must not classify the package.
pub async fn evaluate(
    service: &dyn BuildService,
    cache: &MemoCache,
    archs: &ArchPair,
    package: &mut CheckRepoPackage,
) -> ServiceResult<BuildOutcome> {
    let query = BuildStatusQuery {
        source_project: package.source_project.clone(),
        target_project: package.target_project.clone(),
        source_package: package.source_package.clone(),
        rev: package.rev.clone(),
    };

    let status = cache
        .get_or_compute(LAST_BUILD_SUCCESS, &query, || service.build_status(&query))
        .await?;

    let classification = classify(
        &status,
        archs,
        &package.source_package,
        &package.target_project,
    );
    debug!("{} build outcome: {:?}", package, classification.outcome);

    let mut missing = BTreeSet::new();
    for candidate in &classification.missing {
        if missing.contains(&candidate.name) {
            continue;
        }
        let location = BinaryLocation::new(
            &package.source_project,
            &candidate.repository,
            &candidate.arch,
            &candidate.name,
        );
        if !produced_nowhere(service, &location).await {
            missing.insert(candidate.name.clone());
        }
    }

    package.build_excluded = classification.build_excluded;
    package.missing = missing.into_iter().collect();
    package.good_repo = match &classification.outcome {
        BuildOutcome::Good { repository } => Some(repository.clone()),
        _ => None,
    };

    Ok(classification.outcome)
}

/// True when the named package has no binaries at all in that repository,
/// meaning the missing entry refers to something that is never built there.
/// Lookup errors count as "produced", so the name stays on the missing list.
async fn produced_nowhere(service: &dyn BuildService, location: &BinaryLocation) -> bool {
    match service.binaries(location).await {
        Ok(files) => files.is_empty(),
        Err(e) => {
            error!(
                "Binary listing for {}/{}/{}/{} failed: {}",
                location.project, location.repository, location.arch, location.package, e
            );
            false
        }
    }
}
