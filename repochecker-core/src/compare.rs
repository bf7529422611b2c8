//! Source package comparison between two projects.

use std::collections::HashSet;
use std::fmt;

use tracing::{debug, error, info};

use crate::error::ServiceResult;
use crate::obs::BuildService;

pub const DEFAULT_OLD_PROJECT: &str = "SUSE:SLE-15:GA";
pub const DEFAULT_NEW_PROJECT: &str = "openSUSE:Leap:15.0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareOptions {
    pub old_project: String,
    pub new_project: String,
    /// Attach the raw diff to every differing package.
    pub verbose: bool,
    /// Only report packages missing from the new project.
    pub new_only: bool,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            old_project: DEFAULT_OLD_PROJECT.to_string(),
            new_project: DEFAULT_NEW_PROJECT.to_string(),
            verbose: false,
            new_only: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompareEntry {
    /// In the old project only.
    NewPackage { package: String },
    /// In both, with different sources.
    DifferentSource {
        package: String,
        diff: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareReport {
    pub new_project: String,
    pub entries: Vec<CompareEntry>,
}

impl fmt::Display for CompareReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            match entry {
                CompareEntry::NewPackage { package } => {
                    writeln!(f, "New package than {:<8} - {}", self.new_project, package)?;
                }
                CompareEntry::DifferentSource { package, diff } => {
                    writeln!(f, "Different source in {:<8} - {}", self.new_project, package)?;
                    if let Some(diff) = diff {
                        writeln!(f, "=== Diff ===\n{}", diff)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Compare the source packages of two projects.
///
/// Failing to list either project is an error; failures for a single
/// package are logged and the package left out.
pub async fn compare_projects(
    service: &dyn BuildService,
    options: &CompareOptions,
) -> ServiceResult<CompareReport> {
    info!("Gathering the package list from {}", options.old_project);
    let old = service.project_packages(&options.old_project).await?;
    info!("Gathering the package list from {}", options.new_project);
    let new: HashSet<String> = service
        .project_packages(&options.new_project)
        .await?
        .into_iter()
        .collect();

    let mut entries = Vec::new();
    for package in old {
        if package.starts_with("000") {
            continue;
        }

        if !new.contains(&package) {
            match service.source_info(&options.old_project, &package, None).await {
                Ok(info) if info.link.is_some() => {
                    debug!("{} is a linked package, skipping", package);
                }
                Ok(_) => entries.push(CompareEntry::NewPackage { package }),
                Err(e) => error!(
                    "Source listing of {}/{} failed: {}",
                    options.old_project, package, e
                ),
            }
        } else if !options.new_only {
            debug!("checking {} ...", package);
            let diff = match service
                .source_diff(&options.old_project, &options.new_project, &package)
                .await
            {
                Ok(diff) => diff,
                Err(e) => {
                    error!("Diff of {} failed: {}", package, e);
                    continue;
                }
            };
            debug!(
                "{} old srcmd5 {} new srcmd5 {}",
                package, diff.old_srcmd5, diff.new_srcmd5
            );
            if diff.old_srcmd5 != diff.new_srcmd5 && diff.has_file_diffs {
                entries.push(CompareEntry::DifferentSource {
                    package,
                    diff: options.verbose.then_some(diff.raw),
                });
            }
        }
    }

    Ok(CompareReport {
        new_project: options.new_project.clone(),
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceDiff;
    use crate::testing::FakeBuildService;

    fn service() -> FakeBuildService {
        let service = FakeBuildService::new();
        service.set_project_packages(
            DEFAULT_OLD_PROJECT,
            &["000product", "bash", "vim", "vim-small", "zsh"],
        );
        service.set_project_packages(DEFAULT_NEW_PROJECT, &["bash", "vim"]);
        service.add_source(DEFAULT_OLD_PROJECT, "zsh", "z1", &[]);
        service.add_link(
            DEFAULT_OLD_PROJECT,
            "vim-small",
            "v2",
            (DEFAULT_OLD_PROJECT, "vim", "v1"),
        );
        service.set_diff(
            "bash",
            SourceDiff {
                old_srcmd5: "b1".to_string(),
                new_srcmd5: "b2".to_string(),
                has_file_diffs: true,
                raw: "<sourcediff/>".to_string(),
            },
        );
        service.set_diff(
            "vim",
            SourceDiff {
                old_srcmd5: "v1".to_string(),
                new_srcmd5: "v1".to_string(),
                has_file_diffs: false,
                raw: String::new(),
            },
        );
        service
    }

    #[tokio::test]
    async fn test_compare_reports_new_and_different() {
        let service = service();
        let report = compare_projects(&service, &CompareOptions::default())
            .await
            .unwrap();

        assert_eq!(
            report.entries,
            vec![
                CompareEntry::DifferentSource {
                    package: "bash".to_string(),
                    diff: None,
                },
                CompareEntry::NewPackage {
                    package: "zsh".to_string()
                },
            ]
        );
        assert_eq!(
            report.to_string(),
            "Different source in openSUSE:Leap:15.0 - bash\n\
             New package than openSUSE:Leap:15.0 - zsh\n"
        );
    }

    #[tokio::test]
    async fn test_verbose_appends_diff() {
        let service = service();
        let options = CompareOptions {
            verbose: true,
            ..CompareOptions::default()
        };
        let report = compare_projects(&service, &options).await.unwrap();
        assert!(report
            .to_string()
            .contains("bash\n=== Diff ===\n<sourcediff/>\n"));
    }

    #[tokio::test]
    async fn test_new_only_skips_diffs() {
        let service = service();
        let options = CompareOptions {
            new_only: true,
            ..CompareOptions::default()
        };
        let report = compare_projects(&service, &options).await.unwrap();
        assert_eq!(
            report.entries,
            vec![CompareEntry::NewPackage {
                package: "zsh".to_string()
            }]
        );
        assert_eq!(service.call_count("source_diff"), 0);
    }

    #[test]
    fn test_short_project_names_are_padded() {
        let report = CompareReport {
            new_project: "A".to_string(),
            entries: vec![CompareEntry::NewPackage {
                package: "x".to_string(),
            }],
        };
        assert_eq!(report.to_string(), "New package than A        - x\n");
    }
}
