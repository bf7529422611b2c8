//! Build service boundary.
//!
//! `BuildService` is the typed contract the review engine consumes. The
//! production implementation is `ObsClient`, which speaks the build service's
//! XML REST API; tests use `testing::FakeBuildService`.

mod client;
mod middleware;
mod xml;

pub use client::{create_http_client, ObsClient};
pub use middleware::LoggingMiddleware;

use std::path::Path;

use async_trait::async_trait;

use crate::error::ServiceResult;
use crate::model::{
    BinaryLocation, BuildStatus, RequestId, ReviewStateChange, SourceDiff, SourceInfo,
    SubmitRequest,
};

/// Structured request searches the engine needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestQuery {
    /// Requests in review with an open review by `reviewer`.
    PendingReviews { reviewer: String },
    /// The group request listing `member` among its grouped ids.
    GroupContaining { member: RequestId },
    /// Open (new/review/accepted) submit requests targeting a package.
    SubmitsTo { project: String, package: String },
}

impl RequestQuery {
    /// The search expression understood by the build service.
    pub fn to_xpath(&self) -> String {
        match self {
            Self::PendingReviews { reviewer } => format!(
                "state/@name='review' and review[@by_user='{}' and @state='new']",
                reviewer
            ),
            Self::GroupContaining { member } => format!("action/grouped/@id={}", member),
            Self::SubmitsTo { project, package } => format!(
                "(action/target/@project='{}' and action/target/@package='{}' and \
                 action/@type='submit' and (state/@name='new' or state/@name='review' or \
                 state/@name='accepted'))",
                project, package
            ),
        }
    }
}

/// Arguments of a last-success build status lookup. Serializable so it can
/// double as a cache key.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct BuildStatusQuery {
    pub source_project: String,
    pub target_project: String,
    pub source_package: String,
    pub rev: String,
}

#[async_trait]
pub trait BuildService: Send + Sync {
    async fn request(&self, id: RequestId) -> ServiceResult<SubmitRequest>;

    async fn search_requests(&self, query: &RequestQuery) -> ServiceResult<Vec<SubmitRequest>>;

    /// Expanded source listing; `rev` of `None` means the current revision.
    async fn source_info(
        &self,
        project: &str,
        package: &str,
        rev: Option<&str>,
    ) -> ServiceResult<SourceInfo>;

    async fn build_status(&self, query: &BuildStatusQuery) -> ServiceResult<BuildStatus>;

    /// File names of a package's build output.
    async fn binaries(&self, location: &BinaryLocation) -> ServiceResult<Vec<String>>;

    /// File names of every binary in a repository.
    async fn repository_binaries(
        &self,
        project: &str,
        repository: &str,
        arch: &str,
    ) -> ServiceResult<Vec<String>>;

    async fn project_packages(&self, project: &str) -> ServiceResult<Vec<String>>;

    async fn build_dependencies(&self, location: &BinaryLocation) -> ServiceResult<Vec<String>>;

    /// Write one build artifact to `target`.
    async fn fetch_binary(
        &self,
        location: &BinaryLocation,
        file: &str,
        target: &Path,
    ) -> ServiceResult<()>;

    /// Post a review state change; returns the status code the service
    /// reported.
    async fn change_review_state(&self, change: &ReviewStateChange) -> ServiceResult<String>;

    async fn source_diff(
        &self,
        old_project: &str,
        new_project: &str,
        package: &str,
    ) -> ServiceResult<SourceDiff>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_reviews_xpath() {
        let q = RequestQuery::PendingReviews {
            reviewer: "factory-repo-checker".to_string(),
        };
        assert_eq!(
            q.to_xpath(),
            "state/@name='review' and review[@by_user='factory-repo-checker' and @state='new']"
        );
    }

    #[test]
    fn test_group_containing_xpath() {
        let q = RequestQuery::GroupContaining {
            member: RequestId(123),
        };
        assert_eq!(q.to_xpath(), "action/grouped/@id=123");
    }

    #[test]
    fn test_submits_to_xpath_mentions_target() {
        let q = RequestQuery::SubmitsTo {
            project: "openSUSE:Factory".to_string(),
            package: "libfoo".to_string(),
        };
        let xpath = q.to_xpath();
        assert!(xpath.contains("action/target/@project='openSUSE:Factory'"));
        assert!(xpath.contains("action/target/@package='libfoo'"));
        assert!(xpath.contains("state/@name='accepted'"));
    }
}
