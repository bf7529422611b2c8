//! In-memory collaborators for exercising the review engine.
//!
//! `FakeBuildService` answers from maps filled by the test and records every
//! review state change it is asked to post. Fetched binaries are written to
//! disk with their DISTURL as content, which `FakeProvenance` reads back.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::checker::{CheckOutcome, ConsistencyChecker};
use crate::download::ProvenanceReader;
use crate::error::{CheckerError, DownloadError, ServiceError, ServiceResult};
use crate::model::{
    ArchStatus, BinaryLocation, BuildResult, BuildStatus, LinkInfo, RepositoryStatus,
    RequestAction, RequestId, RequestState, ReviewStateChange, SourceDiff, SourceInfo, SourceRef,
    SubmitRequest, TargetRef,
};
use crate::obs::{BuildService, BuildStatusQuery, RequestQuery};

type LocationKey = (String, String, String, String);

fn location_key(location: &BinaryLocation) -> LocationKey {
    (
        location.project.clone(),
        location.repository.clone(),
        location.arch.clone(),
        location.package.clone(),
    )
}

fn unavailable(what: &str) -> ServiceError {
    ServiceError::Transport {
        url: format!("fake://{}", what),
        detail: "configured to fail".to_string(),
    }
}

#[derive(Default)]
struct FakeState {
    requests: HashMap<RequestId, SubmitRequest>,
    pending: Vec<RequestId>,
    sources: HashMap<(String, String), SourceInfo>,
    statuses: HashMap<(String, String), BuildStatus>,
    failing_statuses: Vec<(String, String)>,
    binaries: HashMap<LocationKey, Vec<String>>,
    repositories: HashMap<(String, String, String), Vec<String>>,
    packages: HashMap<String, Vec<String>>,
    build_deps: HashMap<LocationKey, Vec<String>>,
    disturls: HashMap<String, String>,
    diffs: HashMap<String, SourceDiff>,
    fail_searches: bool,
    fail_review_changes: bool,
    review_changes: Vec<ReviewStateChange>,
    calls: Vec<&'static str>,
}

/// Build service backed by in-memory maps.
#[derive(Default)]
pub struct FakeBuildService {
    state: Mutex<FakeState>,
}

impl FakeBuildService {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut state = self.state.lock().expect("mutex poisoned");
        f(&mut state)
    }

    fn record(&self, call: &'static str) {
        self.with_state(|s| s.calls.push(call));
    }

    pub fn add_request(&self, id: RequestId, actions: Vec<RequestAction>) {
        self.with_state(|s| {
            s.requests.insert(
                id,
                SubmitRequest {
                    id,
                    state: RequestState::Review,
                    actions,
                },
            )
        });
    }

    /// A request with one submit action at source revision "1".
    pub fn add_submit(&self, id: RequestId, source: (&str, &str), target: (&str, &str)) {
        self.add_request(
            id,
            vec![RequestAction::submit(
                SourceRef {
                    project: source.0.to_string(),
                    package: source.1.to_string(),
                    rev: Some("1".to_string()),
                },
                TargetRef {
                    project: target.0.to_string(),
                    package: target.1.to_string(),
                },
            )],
        );
    }

    /// Requests returned by the pending-reviews search.
    pub fn set_pending(&self, ids: Vec<RequestId>) {
        self.with_state(|s| s.pending = ids);
    }

    /// Source listing with `<package>.spec` plus one spec per extra name.
    pub fn add_source(&self, project: &str, package: &str, srcmd5: &str, extra_specs: &[&str]) {
        let mut entries = vec![format!("{}.spec", package), format!("{}.changes", package)];
        entries.extend(extra_specs.iter().map(|spec| format!("{}.spec", spec)));
        self.set_source(
            project,
            package,
            SourceInfo {
                srcmd5: srcmd5.to_string(),
                entries,
                link: None,
            },
        );
    }

    /// Source listing of a package linking to `link_project/link_package`.
    pub fn add_link(
        &self,
        project: &str,
        package: &str,
        srcmd5: &str,
        link: (&str, &str, &str),
    ) {
        self.set_source(
            project,
            package,
            SourceInfo {
                srcmd5: srcmd5.to_string(),
                entries: vec![format!("{}.spec", package)],
                link: Some(LinkInfo {
                    project: link.0.to_string(),
                    package: link.1.to_string(),
                    srcmd5: link.2.to_string(),
                }),
            },
        );
    }

    pub fn set_source(&self, project: &str, package: &str, info: SourceInfo) {
        self.with_state(|s| {
            s.sources
                .insert((project.to_string(), package.to_string()), info)
        });
    }

    pub fn set_build_status(&self, project: &str, package: &str, status: BuildStatus) {
        self.with_state(|s| {
            s.statuses
                .insert((project.to_string(), package.to_string()), status)
        });
    }

    pub fn fail_build_status(&self, project: &str, package: &str) {
        self.with_state(|s| {
            s.failing_statuses
                .push((project.to_string(), package.to_string()))
        });
    }

    pub fn set_binaries(&self, location: BinaryLocation, files: &[&str]) {
        self.with_state(|s| {
            s.binaries.insert(
                location_key(&location),
                files.iter().map(|f| f.to_string()).collect(),
            )
        });
    }

    pub fn set_repository_binaries(
        &self,
        project: &str,
        repository: &str,
        arch: &str,
        files: &[&str],
    ) {
        self.with_state(|s| {
            s.repositories.insert(
                (project.to_string(), repository.to_string(), arch.to_string()),
                files.iter().map(|f| f.to_string()).collect(),
            )
        });
    }

    pub fn set_project_packages(&self, project: &str, packages: &[&str]) {
        self.with_state(|s| {
            s.packages.insert(
                project.to_string(),
                packages.iter().map(|p| p.to_string()).collect(),
            )
        });
    }

    pub fn set_build_dependencies(&self, location: BinaryLocation, deps: &[&str]) {
        self.with_state(|s| {
            s.build_deps.insert(
                location_key(&location),
                deps.iter().map(|d| d.to_string()).collect(),
            )
        });
    }

    /// Override the DISTURL written into a fetched file.
    pub fn set_disturl(&self, file: &str, disturl: &str) {
        self.with_state(|s| s.disturls.insert(file.to_string(), disturl.to_string()));
    }

    pub fn set_diff(&self, package: &str, diff: SourceDiff) {
        self.with_state(|s| s.diffs.insert(package.to_string(), diff));
    }

    pub fn fail_searches(&self) {
        self.with_state(|s| s.fail_searches = true);
    }

    pub fn fail_review_changes(&self) {
        self.with_state(|s| s.fail_review_changes = true);
    }

    /// Every review state change posted so far, in order.
    pub fn review_changes(&self) -> Vec<ReviewStateChange> {
        self.with_state(|s| s.review_changes.clone())
    }

    pub fn changes_for(&self, id: RequestId) -> Vec<ReviewStateChange> {
        self.review_changes()
            .into_iter()
            .filter(|c| c.request == id)
            .collect()
    }

    /// Number of calls made to the named operation.
    pub fn call_count(&self, call: &str) -> usize {
        self.with_state(|s| s.calls.iter().filter(|c| **c == call).count())
    }

    pub fn search_count(&self) -> usize {
        self.call_count("search_requests")
    }
}

#[async_trait]
impl BuildService for FakeBuildService {
    async fn request(&self, id: RequestId) -> ServiceResult<SubmitRequest> {
        self.record("request");
        self.with_state(|s| s.requests.get(&id).cloned())
            .ok_or_else(|| ServiceError::NotFound(format!("request {}", id)))
    }

    async fn search_requests(&self, query: &RequestQuery) -> ServiceResult<Vec<SubmitRequest>> {
        self.record("search_requests");
        self.with_state(|s| {
            if s.fail_searches {
                return Err(unavailable("search"));
            }
            let mut found: Vec<SubmitRequest> = match query {
                RequestQuery::PendingReviews { .. } => s
                    .pending
                    .iter()
                    .filter_map(|id| s.requests.get(id).cloned())
                    .collect(),
                RequestQuery::GroupContaining { member } => s
                    .requests
                    .values()
                    .filter(|r| r.actions.iter().any(|a| a.grouped.contains(member)))
                    .cloned()
                    .collect(),
                RequestQuery::SubmitsTo { project, package } => s
                    .requests
                    .values()
                    .filter(|r| {
                        r.actions.iter().any(|a| {
                            a.target
                                .as_ref()
                                .is_some_and(|t| &t.project == project && &t.package == package)
                        })
                    })
                    .cloned()
                    .collect(),
            };
            if !matches!(query, RequestQuery::PendingReviews { .. }) {
                found.sort_by_key(|r| r.id);
            }
            Ok(found)
        })
    }

    async fn source_info(
        &self,
        project: &str,
        package: &str,
        _rev: Option<&str>,
    ) -> ServiceResult<SourceInfo> {
        self.record("source_info");
        self.with_state(|s| {
            s.sources
                .get(&(project.to_string(), package.to_string()))
                .cloned()
        })
        .ok_or_else(|| ServiceError::NotFound(format!("source {}/{}", project, package)))
    }

    async fn build_status(&self, query: &BuildStatusQuery) -> ServiceResult<BuildStatus> {
        self.record("build_status");
        let key = (query.source_project.clone(), query.source_package.clone());
        self.with_state(|s| {
            if s.failing_statuses.contains(&key) {
                return Err(unavailable("build_status"));
            }
            s.statuses.get(&key).cloned().ok_or_else(|| {
                ServiceError::NotFound(format!("build status {}/{}", key.0, key.1))
            })
        })
    }

    async fn binaries(&self, location: &BinaryLocation) -> ServiceResult<Vec<String>> {
        self.record("binaries");
        Ok(self.with_state(|s| {
            s.binaries
                .get(&location_key(location))
                .cloned()
                .unwrap_or_default()
        }))
    }

    async fn repository_binaries(
        &self,
        project: &str,
        repository: &str,
        arch: &str,
    ) -> ServiceResult<Vec<String>> {
        self.record("repository_binaries");
        Ok(self.with_state(|s| {
            s.repositories
                .get(&(project.to_string(), repository.to_string(), arch.to_string()))
                .cloned()
                .unwrap_or_default()
        }))
    }

    async fn project_packages(&self, project: &str) -> ServiceResult<Vec<String>> {
        self.record("project_packages");
        Ok(self.with_state(|s| s.packages.get(project).cloned().unwrap_or_default()))
    }

    async fn build_dependencies(&self, location: &BinaryLocation) -> ServiceResult<Vec<String>> {
        self.record("build_dependencies");
        Ok(self.with_state(|s| {
            s.build_deps
                .get(&location_key(location))
                .cloned()
                .unwrap_or_default()
        }))
    }

    async fn fetch_binary(
        &self,
        location: &BinaryLocation,
        file: &str,
        target: &Path,
    ) -> ServiceResult<()> {
        self.record("fetch_binary");
        let disturl = self.with_state(|s| {
            s.disturls.get(file).cloned().unwrap_or_else(|| {
                let srcmd5 = s
                    .sources
                    .get(&(location.project.clone(), location.package.clone()))
                    .map(|info| info.srcmd5.clone())
                    .unwrap_or_default();
                format!(
                    "obs://build.example.org/{}/{}/{}-{}",
                    location.project, location.repository, srcmd5, location.package
                )
            })
        });
        tokio::fs::write(target, disturl)
            .await
            .map_err(|e| ServiceError::Transport {
                url: format!("fake://{}", file),
                detail: e.to_string(),
            })
    }

    async fn change_review_state(&self, change: &ReviewStateChange) -> ServiceResult<String> {
        self.record("change_review_state");
        self.with_state(|s| {
            if s.fail_review_changes {
                return Err(unavailable("changereviewstate"));
            }
            s.review_changes.push(change.clone());
            Ok("ok".to_string())
        })
    }

    async fn source_diff(
        &self,
        old_project: &str,
        new_project: &str,
        package: &str,
    ) -> ServiceResult<SourceDiff> {
        self.record("source_diff");
        self.with_state(|s| s.diffs.get(package).cloned())
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "diff {}/{} vs {}/{}",
                    old_project, package, new_project, package
                ))
            })
    }
}

/// Reads back the DISTURL `FakeBuildService` wrote into a fetched file.
#[derive(Debug, Default)]
pub struct FakeProvenance;

#[async_trait]
impl ProvenanceReader for FakeProvenance {
    async fn disturl(&self, artifact: &Path) -> Result<String, DownloadError> {
        let content = tokio::fs::read_to_string(artifact)
            .await
            .map_err(|e| DownloadError::io(artifact, e))?;
        Ok(content.trim().to_string())
    }
}

/// A checker invocation as seen by `FakeChecker`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckerCall {
    pub dir: PathBuf,
    pub ignore: Vec<String>,
    /// File names present under `dir` at the time of the call, sorted.
    pub files: Vec<String>,
}

/// Consistency checker with a canned answer.
pub struct FakeChecker {
    outcome: Option<CheckOutcome>,
    calls: Mutex<Vec<CheckerCall>>,
}

impl FakeChecker {
    pub fn passing() -> Self {
        Self::answering(true, "")
    }

    pub fn failing(output: &str) -> Self {
        Self::answering(false, output)
    }

    fn answering(success: bool, output: &str) -> Self {
        Self {
            outcome: Some(CheckOutcome {
                success,
                output: output.to_string(),
            }),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A checker whose program cannot be started.
    pub fn unspawnable() -> Self {
        Self {
            outcome: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<CheckerCall> {
        self.calls.lock().expect("mutex poisoned").clone()
    }
}

fn list_files(dir: &Path, out: &mut Vec<String>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            list_files(&path, out);
        } else if let Some(name) = path.file_name() {
            out.push(name.to_string_lossy().into_owned());
        }
    }
}

#[async_trait]
impl ConsistencyChecker for FakeChecker {
    async fn check(&self, dir: &Path, ignore: &[String]) -> Result<CheckOutcome, CheckerError> {
        let mut files = Vec::new();
        list_files(dir, &mut files);
        files.sort();
        self.calls
            .lock()
            .expect("mutex poisoned")
            .push(CheckerCall {
                dir: dir.to_path_buf(),
                ignore: ignore.to_vec(),
                files,
            });

        self.outcome.clone().ok_or_else(|| CheckerError::Spawn {
            program: "fake-checker".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such program"),
        })
    }
}

/// A build status with one repository and the given per-arch results.
pub fn build_status(repository: &str, archs: &[(&str, BuildResult)]) -> BuildStatus {
    BuildStatus {
        repositories: vec![RepositoryStatus {
            name: repository.to_string(),
            archs: archs
                .iter()
                .map(|(arch, result)| ArchStatus {
                    arch: arch.to_string(),
                    result: result.clone(),
                    missing: Vec::new(),
                })
                .collect(),
        }],
    }
}

/// Both default architectures succeeded in `repository`.
pub fn succeeded(repository: &str) -> BuildStatus {
    build_status(
        repository,
        &[
            ("x86_64", BuildResult::Succeeded),
            ("i586", BuildResult::Succeeded),
        ],
    )
}
