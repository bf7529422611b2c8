//! Review findings as data.
//!
//! Every stage of the engine reports what it found as a `Finding`; the
//! verdict and the message posted to the build service are derived here and
//! nowhere else. This keeps the decision table testable without a service.

use crate::model::{RequestId, ReviewVerdict};

pub const GROUP_WORKFLOW_URL: &str =
    "https://github.com/SUSE/hackweek/wiki/Improved-Factory-devel-project-submission-workflow";

/// Blocking dependencies of one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blockers {
    pub package: String,
    /// Missing package names, annotated `name(rqN)` when a request for them
    /// is known.
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    MultipleActions,
    UncheckedType {
        kind: String,
    },
    /// A secondary spec does not link back to the primary package.
    WrongLink {
        project: String,
        spec: String,
        package: String,
    },
    /// A secondary spec links correctly but at another revision.
    ChecksumMismatch {
        project: String,
        spec: String,
        package: String,
    },
    MissingArchitectures {
        primary: String,
        secondary: String,
    },
    Outdated {
        package: String,
    },
    Disabled {
        package: String,
        target_project: String,
    },
    Building {
        package: String,
        repository: String,
    },
    Failed {
        package: String,
        repository: String,
    },
    ProvenanceMismatch {
        detail: String,
    },
    UnmetDependencies {
        target_project: String,
        blockers: Vec<Blockers>,
    },
    /// Raw output of the consistency checker.
    Inconsistent {
        output: String,
    },
    Accepted {
        repository: String,
    },
    SkipReview,
}

impl Finding {
    pub fn verdict(&self) -> ReviewVerdict {
        match self {
            Finding::MultipleActions | Finding::WrongLink { .. } | Finding::Disabled { .. } => {
                ReviewVerdict::Declined
            }
            Finding::UncheckedType { .. } | Finding::Accepted { .. } | Finding::SkipReview => {
                ReviewVerdict::Accepted
            }
            Finding::ChecksumMismatch { .. }
            | Finding::MissingArchitectures { .. }
            | Finding::Outdated { .. }
            | Finding::Building { .. }
            | Finding::Failed { .. }
            | Finding::ProvenanceMismatch { .. }
            | Finding::UnmetDependencies { .. }
            | Finding::Inconsistent { .. } => ReviewVerdict::New,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Finding::MultipleActions => format!(
                "only one action per request is supported - create a group instead: {}",
                GROUP_WORKFLOW_URL
            ),
            Finding::UncheckedType { kind } => format!("Unchecked request type {}", kind),
            Finding::WrongLink {
                project,
                spec,
                package,
            } => format!("{0}/{1} should _link to {0}/{2}", project, spec, package),
            Finding::ChecksumMismatch {
                project,
                spec,
                package,
            } => format!(
                "{}/{} is a link but has a different md5sum than {}?",
                project, spec, package
            ),
            Finding::MissingArchitectures { primary, secondary } => {
                format!("Missing {} and {} in the repo list", secondary, primary)
            }
            Finding::Outdated { package } => format!(
                "{}'s sources were changed after submissions and the old sources never built. \
                 Please resubmit",
                package
            ),
            Finding::Disabled {
                package,
                target_project,
            } => format!(
                "{} is disabled or does not build against {}. Please fix and resubmit",
                package, target_project
            ),
            Finding::Building {
                package,
                repository,
            } => format!("{} is still building for repository {}", package, repository),
            Finding::Failed {
                package,
                repository,
            } => format!(
                "{} failed to build in repository {} - not accepting",
                package, repository
            ),
            Finding::ProvenanceMismatch { detail } => detail.clone(),
            Finding::UnmetDependencies {
                target_project,
                blockers,
            } => {
                let listed: Vec<String> = blockers
                    .iter()
                    .map(|b| format!("{}: {}", b.package, b.missing.join(", ")))
                    .collect();
                format!(
                    "please make sure to wait before these dependencies are in {}: {}",
                    target_project,
                    listed.join("; ")
                )
            }
            Finding::Inconsistent { output } => output.clone(),
            Finding::Accepted { repository } => format!("Builds for repo {}", repository),
            Finding::SkipReview => "skip review".to_string(),
        }
    }
}

/// One review state change issued during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub request: RequestId,
    pub verdict: ReviewVerdict,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiple_actions_declines_with_workflow_link() {
        let f = Finding::MultipleActions;
        assert_eq!(f.verdict(), ReviewVerdict::Declined);
        assert!(f.message().starts_with("only one action per request is supported"));
        assert!(f.message().ends_with(GROUP_WORKFLOW_URL));
    }

    #[test]
    fn test_link_findings() {
        let wrong = Finding::WrongLink {
            project: "devel:libs".to_string(),
            spec: "foo-doc".to_string(),
            package: "foo".to_string(),
        };
        assert_eq!(wrong.verdict(), ReviewVerdict::Declined);
        assert_eq!(wrong.message(), "devel:libs/foo-doc should _link to devel:libs/foo");

        let md5 = Finding::ChecksumMismatch {
            project: "devel:libs".to_string(),
            spec: "foo-doc".to_string(),
            package: "foo".to_string(),
        };
        assert_eq!(md5.verdict(), ReviewVerdict::New);
        assert_eq!(
            md5.message(),
            "devel:libs/foo-doc is a link but has a different md5sum than foo?"
        );
    }

    #[test]
    fn test_build_findings() {
        let outdated = Finding::Outdated {
            package: "make".to_string(),
        };
        assert_eq!(outdated.verdict(), ReviewVerdict::New);
        assert!(outdated.message().starts_with("make's sources were changed"));
        assert!(outdated.message().ends_with("Please resubmit"));

        let disabled = Finding::Disabled {
            package: "make".to_string(),
            target_project: "openSUSE:Factory".to_string(),
        };
        assert_eq!(disabled.verdict(), ReviewVerdict::Declined);

        let failed = Finding::Failed {
            package: "make".to_string(),
            repository: "standard".to_string(),
        };
        assert_eq!(
            failed.message(),
            "make failed to build in repository standard - not accepting"
        );

        let missing = Finding::MissingArchitectures {
            primary: "x86_64".to_string(),
            secondary: "i586".to_string(),
        };
        assert_eq!(missing.message(), "Missing i586 and x86_64 in the repo list");
    }

    #[test]
    fn test_unmet_dependencies_lists_per_package() {
        let f = Finding::UnmetDependencies {
            target_project: "openSUSE:Factory".to_string(),
            blockers: vec![
                Blockers {
                    package: "foo".to_string(),
                    missing: vec!["libbar".to_string(), "libbaz(rq77)".to_string()],
                },
                Blockers {
                    package: "foo-doc".to_string(),
                    missing: vec!["texlive".to_string()],
                },
            ],
        };
        assert_eq!(f.verdict(), ReviewVerdict::New);
        assert_eq!(
            f.message(),
            "please make sure to wait before these dependencies are in openSUSE:Factory: \
             foo: libbar, libbaz(rq77); foo-doc: texlive"
        );
    }

    #[test]
    fn test_checker_output_is_verbatim() {
        let f = Finding::Inconsistent {
            output: "X".to_string(),
        };
        assert_eq!(f.verdict(), ReviewVerdict::New);
        assert_eq!(f.message(), "X");
    }

    #[test]
    fn test_acceptance_names_repo() {
        let f = Finding::Accepted {
            repository: "openSUSE_Factory".to_string(),
        };
        assert_eq!(f.verdict(), ReviewVerdict::Accepted);
        assert_eq!(f.message(), "Builds for repo openSUSE_Factory");
        assert_eq!(Finding::SkipReview.message(), "skip review");
    }
}
