//! Dependency cross-checks.
//!
//! Two checks run once a group's binaries are in place: packages from the
//! base project may only build against base binaries (reported, never
//! blocking), and every binary a build reported missing must either be part
//! of this pass or be on its way in through the same group.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;
use tracing::{error, warn};

use crate::config::{ArchPair, ReviewSettings};
use crate::error::ServiceResult;
use crate::group::GroupRegistry;
use crate::model::{BinaryLocation, CheckRepoPackage, RequestId};
use crate::obs::{BuildService, RequestQuery};
use crate::review::{Blockers, Finding};

/// Binaries and source packages of the base project.
#[derive(Debug, Clone, Default)]
pub struct BaseSet {
    binaries: HashMap<String, HashSet<String>>,
    sources: HashSet<String>,
}

impl BaseSet {
    pub fn new(binaries: HashMap<String, HashSet<String>>, sources: HashSet<String>) -> Self {
        Self { binaries, sources }
    }

    pub async fn load(
        service: &dyn BuildService,
        settings: &ReviewSettings,
    ) -> ServiceResult<Self> {
        let mut binaries = HashMap::new();
        for arch in settings.archs.both() {
            let files = service
                .repository_binaries(&settings.base_project, &settings.base_repository, arch)
                .await?;
            let names = files
                .iter()
                .map(|file| file.strip_suffix(".rpm").unwrap_or(file).to_string())
                .collect();
            binaries.insert(arch.to_string(), names);
        }

        let sources = service
            .project_packages(&settings.base_project)
            .await?
            .into_iter()
            .collect();

        Ok(Self { binaries, sources })
    }

    pub fn has_source(&self, package: &str) -> bool {
        self.sources.contains(package)
    }

    /// Dependencies not among the base binaries of `arch`, sorted.
    pub fn outliers<'d>(&self, arch: &str, deps: &'d [String]) -> Vec<&'d str> {
        let known = self.binaries.get(arch);
        let outliers: BTreeSet<&str> = deps
            .iter()
            .map(String::as_str)
            .filter(|dep| !known.is_some_and(|set| set.contains(*dep)))
            .collect();
        outliers.into_iter().collect()
    }
}

/// Build dependencies of a base package that leak outside the base set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outlier {
    pub package: String,
    pub arch: String,
    pub dependencies: Vec<String>,
}

/// Compare build dependencies of base packages against the base binaries.
/// Lookup failures are logged and the affected package/arch skipped.
pub async fn base_outliers(
    service: &dyn BuildService,
    base: &BaseSet,
    archs: &ArchPair,
    packages: &[CheckRepoPackage],
) -> Vec<Outlier> {
    let mut found = Vec::new();
    for package in packages {
        if !base.has_source(&package.source_package) {
            continue;
        }
        let Some(repository) = &package.good_repo else {
            continue;
        };

        for arch in archs.both() {
            let location = BinaryLocation::new(
                &package.source_project,
                repository,
                arch,
                &package.source_package,
            );
            let deps = match service.build_dependencies(&location).await {
                Ok(deps) => deps,
                Err(e) => {
                    error!("Build dependencies of {} on {} failed: {}", package, arch, e);
                    continue;
                }
            };

            let outliers = base.outliers(arch, &deps);
            if !outliers.is_empty() {
                warn!("OUTLIERS ({}) for {}: {}", arch, package, outliers.join(", "));
                found.push(Outlier {
                    package: package.source_package.clone(),
                    arch: arch.to_string(),
                    dependencies: outliers.into_iter().map(str::to_string).collect(),
                });
            }
        }
    }
    found
}

/// Open submit request for `package` in `project`, if any. Search failures
/// are logged and count as "none".
async fn find_submit_request(
    service: &dyn BuildService,
    project: &str,
    package: &str,
) -> Option<RequestId> {
    let query = RequestQuery::SubmitsTo {
        project: project.to_string(),
        package: package.to_string(),
    };
    match service.search_requests(&query).await {
        Ok(found) => found.first().map(|request| request.id),
        Err(e) => {
            error!("Searching submit requests for {}/{} failed: {}", project, package, e);
            None
        }
    }
}

/// Check every package's missing binaries.
///
/// A missing name is satisfied when it is the target package of anything in
/// `in_pass`, or when an open submit request for it belongs to the same
/// group. Everything else blocks; the result lists blockers per package.
pub async fn unmet_dependencies(
    service: &dyn BuildService,
    registry: &GroupRegistry,
    packages: &[CheckRepoPackage],
    in_pass: &[CheckRepoPackage],
) -> Option<Finding> {
    let accepted: HashSet<&str> = in_pass
        .iter()
        .map(|p| p.target_package.as_str())
        .collect();

    let mut target_project = None;
    let mut blockers = Vec::new();
    for package in packages {
        let mut missing = Vec::new();
        for name in &package.missing {
            if accepted.contains(name.as_str()) {
                continue;
            }
            match find_submit_request(service, &package.target_project, name).await {
                Some(request) if registry.is_member(package.group, request) => continue,
                Some(request) => missing.push(format!("{}(rq{})", name, request)),
                None => missing.push(name.clone()),
            }
        }

        if !missing.is_empty() {
            target_project.get_or_insert_with(|| package.target_project.clone());
            blockers.push(Blockers {
                package: package.source_package.clone(),
                missing,
            });
        }
    }

    target_project.map(|target_project| Finding::UnmetDependencies {
        target_project,
        blockers,
    })
}
