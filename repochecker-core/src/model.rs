//! Data model for requests under review.
//!
//! Requests, groups and package records are rebuilt from the build service on
//! every pass; nothing here is persisted.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Newtype for a submit request id, so ids don't get mixed with revisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Server-side state of a request or a review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestState {
    New,
    Review,
    Accepted,
    Declined,
    Other(String),
}

impl RequestState {
    pub fn parse(name: &str) -> Self {
        match name {
            "new" => Self::New,
            "review" => Self::Review,
            "accepted" => Self::Accepted,
            "declined" => Self::Declined,
            other => Self::Other(other.to_string()),
        }
    }
}

/// The review states this checker is allowed to issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReviewVerdict {
    /// Put back into the queue; the request is looked at again next pass.
    New,
    Accepted,
    Declined,
}

impl ReviewVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
        }
    }
}

impl fmt::Display for ReviewVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Submit,
    Group,
    Other(String),
}

impl ActionKind {
    pub fn parse(kind: &str) -> Self {
        match kind {
            "submit" => Self::Submit,
            "group" => Self::Group,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Submit => "submit",
            Self::Group => "group",
            Self::Other(s) => s,
        }
    }
}

/// Source side of a submit action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub project: String,
    pub package: String,
    pub rev: Option<String>,
}

/// Target side of a submit action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRef {
    pub project: String,
    pub package: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestAction {
    pub kind: ActionKind,
    pub source: Option<SourceRef>,
    pub target: Option<TargetRef>,
    /// Member ids, only present on group actions.
    pub grouped: Vec<RequestId>,
}

impl RequestAction {
    pub fn submit(source: SourceRef, target: TargetRef) -> Self {
        Self {
            kind: ActionKind::Submit,
            source: Some(source),
            target: Some(target),
            grouped: Vec::new(),
        }
    }

    pub fn group(members: Vec<RequestId>) -> Self {
        Self {
            kind: ActionKind::Group,
            source: None,
            target: None,
            grouped: members,
        }
    }
}

/// A request as returned by the build service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub id: RequestId,
    pub state: RequestState,
    pub actions: Vec<RequestAction>,
}

/// One source/target package pair under review.
///
/// A request produces one record for its primary package plus one per
/// secondary spec file found in the same source tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRepoPackage {
    pub request: RequestId,
    pub group: RequestId,
    pub source_project: String,
    pub source_package: String,
    pub target_project: String,
    pub target_package: String,
    /// Content hash of the expanded source tree.
    pub rev: String,
    pub good_repo: Option<String>,
    /// Secondary architecture intentionally excluded; nothing to download.
    pub build_excluded: bool,
    /// Sorted, de-duplicated.
    pub missing: Vec<String>,
    pub dest_dir: Option<PathBuf>,
    pub error: Option<String>,
    /// A review state transition was already issued for this record this pass.
    pub updated: bool,
}

impl CheckRepoPackage {
    pub fn new(
        request: RequestId,
        group: RequestId,
        source: (&str, &str),
        target: (&str, &str),
        rev: impl Into<String>,
    ) -> Self {
        Self {
            request,
            group,
            source_project: source.0.to_string(),
            source_package: source.1.to_string(),
            target_project: target.0.to_string(),
            target_package: target.1.to_string(),
            rev: rev.into(),
            good_repo: None,
            build_excluded: false,
            missing: Vec::new(),
            dest_dir: None,
            error: None,
            updated: false,
        }
    }
}

impl fmt::Display for CheckRepoPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}:{}/{}]",
            self.request, self.source_project, self.source_package
        )
    }
}

/// Expanded source listing of a package.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceInfo {
    pub srcmd5: String,
    pub entries: Vec<String>,
    pub link: Option<LinkInfo>,
}

impl SourceInfo {
    /// Spec file names without the `.spec` suffix.
    pub fn spec_names(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter_map(|name| name.strip_suffix(".spec"))
            .map(|s| s.to_string())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinkInfo {
    pub project: String,
    pub package: String,
    pub srcmd5: String,
}

/// Per-architecture build outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildResult {
    Succeeded,
    Excluded,
    Disabled,
    Failed,
    Building,
    Outdated,
    #[serde(other)]
    Unknown,
}

impl BuildResult {
    pub fn parse(result: &str) -> Self {
        match result {
            "succeeded" => Self::Succeeded,
            "excluded" => Self::Excluded,
            "disabled" => Self::Disabled,
            "failed" => Self::Failed,
            "building" => Self::Building,
            "outdated" => Self::Outdated,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchStatus {
    pub arch: String,
    pub result: BuildResult,
    #[serde(default)]
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryStatus {
    pub name: String,
    pub archs: Vec<ArchStatus>,
}

/// Last-success build status for a (project, package, revision) against a
/// target project.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BuildStatus {
    pub repositories: Vec<RepositoryStatus>,
}

/// Location of a package's build output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryLocation {
    pub project: String,
    pub repository: String,
    pub arch: String,
    pub package: String,
}

impl BinaryLocation {
    pub fn new(project: &str, repository: &str, arch: &str, package: &str) -> Self {
        Self {
            project: project.to_string(),
            repository: repository.to_string(),
            arch: arch.to_string(),
            package: package.to_string(),
        }
    }
}

/// A review state change to post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewStateChange {
    pub request: RequestId,
    pub new_state: ReviewVerdict,
    pub message: String,
    pub by_user: String,
    pub superseded_by: Option<RequestId>,
}

/// Result of diffing one package between two projects.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceDiff {
    pub old_srcmd5: String,
    pub new_srcmd5: String,
    pub has_file_diffs: bool,
    /// The raw diff document, kept for verbose output.
    pub raw: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_names_strips_suffix() {
        let info = SourceInfo {
            srcmd5: "abc".to_string(),
            entries: vec![
                "foo.spec".to_string(),
                "foo-doc.spec".to_string(),
                "foo.changes".to_string(),
                "foo-1.0.tar.gz".to_string(),
            ],
            link: None,
        };
        assert_eq!(info.spec_names(), vec!["foo", "foo-doc"]);
    }

    #[test]
    fn test_build_result_parse_unknown() {
        assert_eq!(BuildResult::parse("succeeded"), BuildResult::Succeeded);
        assert_eq!(BuildResult::parse("blocked"), BuildResult::Unknown);
    }

    #[test]
    fn test_build_result_serde_unknown_variant() {
        let parsed: BuildResult = serde_json::from_str("\"scheduled\"").unwrap();
        assert_eq!(parsed, BuildResult::Unknown);
        let parsed: BuildResult = serde_json::from_str("\"outdated\"").unwrap();
        assert_eq!(parsed, BuildResult::Outdated);
    }

    #[test]
    fn test_package_display() {
        let p = CheckRepoPackage::new(
            RequestId(42),
            RequestId(42),
            ("devel:tools", "make"),
            ("openSUSE:Factory", "make"),
            "abc",
        );
        assert_eq!(p.to_string(), "[42:devel:tools/make]");
    }

    #[test]
    fn test_verdict_strings() {
        assert_eq!(ReviewVerdict::New.as_str(), "new");
        assert_eq!(ReviewVerdict::Accepted.to_string(), "accepted");
        assert_eq!(ReviewVerdict::Declined.as_str(), "declined");
    }
}
