//! The review engine.
//!
//! One pass fetches the requests to review, expands them into package
//! records, groups them and takes every group through the stages in order:
//!
//! 1. build success evaluation of every member
//! 2. download and provenance verification (plus group completion)
//! 3. dependency cross-checks
//! 4. the external consistency checker
//! 5. acceptance
//!
//! A stage that fails ends the pass for that group only. Decisions are data
//! (`Finding`); `Pass::transition` is the only place that posts them, and it
//! posts at most one review state change per request per pass.

mod finding;
mod request;

pub use finding::{Blockers, Finding, Transition, GROUP_WORKFLOW_URL};

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::build_status::{self, BuildOutcome};
use crate::cache::MemoCache;
use crate::checker::ConsistencyChecker;
use crate::config::ReviewSettings;
use crate::deps::{self, BaseSet, Outlier};
use crate::download::{self, Downloader, Downloads, ProvenanceReader};
use crate::error::{DownloadError, ReviewError};
use crate::group::GroupRegistry;
use crate::model::{CheckRepoPackage, RequestId, ReviewStateChange, SubmitRequest};
use crate::obs::{BuildService, RequestQuery};

/// What a pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Review state changes posted, in order.
    pub transitions: Vec<Transition>,
    /// Base packages with build dependencies outside the base set.
    pub outliers: Vec<Outlier>,
}

impl PassReport {
    pub fn transitions_for(&self, request: RequestId) -> Vec<&Transition> {
        self.transitions
            .iter()
            .filter(|t| t.request == request)
            .collect()
    }
}

pub struct ReviewEngine {
    service: Arc<dyn BuildService>,
    cache: MemoCache,
    provenance: Arc<dyn ProvenanceReader>,
    checker: Arc<dyn ConsistencyChecker>,
    settings: ReviewSettings,
}

impl ReviewEngine {
    pub fn new(
        service: Arc<dyn BuildService>,
        cache: MemoCache,
        provenance: Arc<dyn ProvenanceReader>,
        checker: Arc<dyn ConsistencyChecker>,
        settings: ReviewSettings,
    ) -> Self {
        Self {
            service,
            cache,
            provenance,
            checker,
            settings,
        }
    }

    pub fn settings(&self) -> &ReviewSettings {
        &self.settings
    }

    /// Run one review pass over `ids`, or over every request waiting for
    /// this reviewer when `ids` is empty.
    ///
    /// Only a checker that cannot be started or an unusable work directory
    /// fail the pass; everything else is answered through review state
    /// changes or logged.
    pub async fn run(&self, ids: &[RequestId]) -> Result<PassReport, ReviewError> {
        let span = info_span!("review_pass", pass_id = %Uuid::new_v4());
        async {
            let mut pass = Pass::new(self);
            let requests = pass.fetch_requests(ids).await;

            let mut packages = Vec::new();
            for request in &requests {
                packages.extend(pass.expand(request).await);
            }

            for (group, members) in group_packages(packages) {
                pass.check_group(group, members).await?;
            }

            info!(
                "Pass finished with {} review state changes",
                pass.report.transitions.len()
            );
            Ok::<_, ReviewError>(pass.report)
        }
        .instrument(span)
        .await
    }

    /// Accept the given requests without looking at them.
    pub async fn skip(&self, ids: &[RequestId]) -> PassReport {
        let span = info_span!("skip_review", pass_id = %Uuid::new_v4());
        async {
            let mut pass = Pass::new(self);
            for id in ids {
                pass.transition(*id, &Finding::SkipReview).await;
            }
            pass.report
        }
        .instrument(span)
        .await
    }
}

/// Split package records by group, keeping first-seen order.
fn group_packages(packages: Vec<CheckRepoPackage>) -> Vec<(RequestId, Vec<CheckRepoPackage>)> {
    let mut groups: Vec<(RequestId, Vec<CheckRepoPackage>)> = Vec::new();
    for package in packages {
        match groups.iter_mut().find(|(group, _)| *group == package.group) {
            Some((_, members)) => members.push(package),
            None => groups.push((package.group, vec![package])),
        }
    }
    groups
}

/// State of a single pass: group memberships learned so far and the
/// requests already answered.
struct Pass<'a> {
    engine: &'a ReviewEngine,
    registry: GroupRegistry,
    transitioned: HashSet<RequestId>,
    report: PassReport,
}

impl<'a> Pass<'a> {
    fn new(engine: &'a ReviewEngine) -> Self {
        Self {
            engine,
            registry: GroupRegistry::new(),
            transitioned: HashSet::new(),
            report: PassReport::default(),
        }
    }

    fn service(&self) -> &'a dyn BuildService {
        self.engine.service.as_ref()
    }

    fn settings(&self) -> &'a ReviewSettings {
        &self.engine.settings
    }

    fn is_updated(&self, package: &CheckRepoPackage) -> bool {
        package.updated || self.transitioned.contains(&package.request)
    }

    async fn fetch_requests(&self, ids: &[RequestId]) -> Vec<SubmitRequest> {
        if ids.is_empty() {
            let query = RequestQuery::PendingReviews {
                reviewer: self.settings().reviewer.clone(),
            };
            return match self.service().search_requests(&query).await {
                Ok(requests) => {
                    info!("{} requests waiting for review", requests.len());
                    requests
                }
                Err(e) => {
                    error!("Searching pending reviews failed: {}", e);
                    Vec::new()
                }
            };
        }

        let mut requests = Vec::with_capacity(ids.len());
        for id in ids {
            match self.service().request(*id).await {
                Ok(request) => requests.push(request),
                Err(e) => error!("Fetching request {} failed: {}", id, e),
            }
        }
        requests
    }

    /// Post a review state change unless the request was already answered
    /// this pass. A failed post still counts as the answer.
    async fn transition(&mut self, request: RequestId, finding: &Finding) {
        if !self.transitioned.insert(request) {
            debug!(
                "Request {} already answered this pass, not posting {}",
                request,
                finding.verdict()
            );
            return;
        }

        let change = ReviewStateChange {
            request,
            new_state: finding.verdict(),
            message: finding.message(),
            by_user: self.settings().reviewer.clone(),
            superseded_by: None,
        };
        match self.service().change_review_state(&change).await {
            Ok(code) => {
                info!(
                    "Request {} -> {} ({}): {}",
                    request, change.new_state, code, change.message
                );
                self.report.transitions.push(Transition {
                    request,
                    verdict: change.new_state,
                    message: change.message,
                });
            }
            Err(e) => error!(
                "Changing review state of {} to {} failed: {}",
                request, change.new_state, e
            ),
        }
    }

    /// `transition` for a package record; marks it updated.
    async fn issue(&mut self, package: &mut CheckRepoPackage, finding: &Finding) {
        if package.updated {
            debug!("{} already updated", package);
            return;
        }
        self.transition(package.request, finding).await;
        package.updated = true;
    }

    async fn check_group(
        &mut self,
        group: RequestId,
        mut packages: Vec<CheckRepoPackage>,
    ) -> Result<(), ReviewError> {
        info!("Checking group {} ({} packages)", group, packages.len());

        if !self.evaluate_builds(&mut packages).await {
            return Ok(());
        }

        let group_dir = self.settings().work_dir.join(group.to_string());
        tokio::fs::create_dir_all(&group_dir)
            .await
            .map_err(|source| ReviewError::WorkDir {
                path: group_dir.clone(),
                source,
            })?;

        let Some(mut downloads) = self.download_members(&mut packages, &group_dir).await else {
            return Ok(());
        };
        let completion = self
            .complete_group(group, &packages, &group_dir, &mut downloads)
            .await;

        self.report_outliers(&packages).await;

        let mut in_pass = packages.clone();
        in_pass.extend(completion);
        if let Some(finding) =
            deps::unmet_dependencies(self.service(), &self.registry, &packages, &in_pass).await
        {
            for package in packages.iter_mut() {
                self.issue(package, &finding).await;
            }
            return Ok(());
        }

        download::prune_group_dir(&group_dir, &downloads.files)
            .await
            .map_err(|source| ReviewError::WorkDir {
                path: group_dir.clone(),
                source,
            })?;

        let outcome = self
            .engine
            .checker
            .check(&group_dir, &downloads.ignore)
            .await?;

        if !outcome.success {
            let finding = Finding::Inconsistent {
                output: outcome.output,
            };
            for package in packages.iter_mut() {
                self.issue(package, &finding).await;
            }
            return Ok(());
        }

        for package in packages.iter_mut() {
            if self.is_updated(package) {
                continue;
            }
            let Some(repository) = package.good_repo.clone() else {
                continue;
            };
            self.issue(package, &Finding::Accepted { repository }).await;
        }

        tokio::fs::remove_dir_all(&group_dir)
            .await
            .map_err(|source| ReviewError::WorkDir {
                path: group_dir.clone(),
                source,
            })
    }

    /// Stage 1. True if every member has a good repository.
    async fn evaluate_builds(&mut self, packages: &mut [CheckRepoPackage]) -> bool {
        let service = self.service();
        let engine = self.engine;
        for package in packages.iter_mut() {
            let outcome = match build_status::evaluate(
                service,
                &engine.cache,
                &engine.settings.archs,
                package,
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Cannot classify {}: {}", package, e);
                    return false;
                }
            };

            match outcome {
                BuildOutcome::Good { repository } => {
                    debug!("{} builds in {}", package, repository);
                }
                BuildOutcome::NoClearSignal => {
                    info!("{} has no good repository yet, leaving the group for now", package);
                    return false;
                }
                BuildOutcome::Rejected(finding) => {
                    self.issue(package, &finding).await;
                    return false;
                }
            }
        }
        true
    }

    /// Stage 2. Download every member; `None` if any member failed.
    async fn download_members(
        &mut self,
        packages: &mut [CheckRepoPackage],
        group_dir: &Path,
    ) -> Option<Downloads> {
        let engine = self.engine;
        let downloader = Downloader::new(
            engine.service.as_ref(),
            engine.provenance.as_ref(),
            &engine.settings,
        );

        let mut downloads = Downloads::default();
        for package in packages.iter_mut() {
            match downloader.download(package, group_dir).await {
                Ok(fetched) => downloads.extend(fetched),
                Err(e) => {
                    package.error = Some(e.to_string());
                    if let DownloadError::ProvenanceMismatch { .. } = e {
                        let finding = Finding::ProvenanceMismatch {
                            detail: e.to_string(),
                        };
                        self.issue(package, &finding).await;
                    } else {
                        error!("Download for {} failed: {}", package, e);
                    }
                    return None;
                }
            }
        }
        Some(downloads)
    }

    /// Pull in group members that were not part of this pass so the checker
    /// sees the whole group. Their failures mean they were already accepted.
    async fn complete_group(
        &mut self,
        group: RequestId,
        packages: &[CheckRepoPackage],
        group_dir: &Path,
        downloads: &mut Downloads,
    ) -> Vec<CheckRepoPackage> {
        let seen: HashSet<RequestId> = packages.iter().map(|p| p.request).collect();
        let absent: Vec<RequestId> = self
            .registry
            .members(group)
            .iter()
            .copied()
            .filter(|id| !seen.contains(id))
            .collect();
        if absent.is_empty() {
            return Vec::new();
        }

        let good_repo = packages.iter().rev().find_map(|p| p.good_repo.clone());
        let mut extra = Vec::new();
        for id in absent {
            match self.service().request(id).await {
                Ok(request) => extra.extend(self.expand(&request).await),
                Err(e) => error!("Fetching group member {} failed: {}", id, e),
            }
        }

        let engine = self.engine;
        let downloader = Downloader::new(
            engine.service.as_ref(),
            engine.provenance.as_ref(),
            &engine.settings,
        );
        for package in extra.iter_mut() {
            package.good_repo = good_repo.clone();
            match downloader.download(package, group_dir).await {
                Ok(fetched) => downloads.extend(fetched),
                Err(e) => {
                    info!("ALREADY ACCEPTED: {}: {}", package, e);
                    package.error = Some(e.to_string());
                    package.updated = true;
                }
            }
        }
        extra
    }

    async fn report_outliers(&mut self, packages: &[CheckRepoPackage]) {
        let base = match BaseSet::load(self.service(), self.settings()).await {
            Ok(base) => base,
            Err(e) => {
                error!("Loading {} failed: {}", self.settings().base_project, e);
                return;
            }
        };
        let outliers =
            deps::base_outliers(self.service(), &base, &self.settings().archs, packages).await;
        self.report.outliers.extend(outliers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn package(request: u64, group: u64, name: &str) -> CheckRepoPackage {
        CheckRepoPackage::new(
            RequestId(request),
            RequestId(group),
            ("devel:tools", name),
            ("openSUSE:Factory", name),
            "abc",
        )
    }

    #[test]
    fn test_group_packages_keeps_first_seen_order() {
        let groups = group_packages(vec![
            package(5, 9, "a"),
            package(1, 1, "b"),
            package(6, 9, "c"),
        ]);
        let summary: Vec<(u64, Vec<&str>)> = groups
            .iter()
            .map(|(g, members)| {
                (
                    g.0,
                    members.iter().map(|p| p.source_package.as_str()).collect(),
                )
            })
            .collect();
        assert_eq!(summary, vec![(9, vec!["a", "c"]), (1, vec!["b"])]);
    }

    #[test]
    fn test_report_filters_by_request() {
        let report = PassReport {
            transitions: vec![
                Transition {
                    request: RequestId(1),
                    verdict: crate::model::ReviewVerdict::Accepted,
                    message: "a".to_string(),
                },
                Transition {
                    request: RequestId(2),
                    verdict: crate::model::ReviewVerdict::New,
                    message: "b".to_string(),
                },
            ],
            outliers: Vec::new(),
        };
        assert_eq!(report.transitions_for(RequestId(2)).len(), 1);
        assert!(report.transitions_for(RequestId(3)).is_empty());
    }
}
