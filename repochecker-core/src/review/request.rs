//! Turning a submit request into package records.

use tracing::{debug, error, info, warn};

use super::{Finding, Pass};
use crate::model::{ActionKind, CheckRepoPackage, SubmitRequest};

impl Pass<'_> {
    /// Expand a request into its primary package plus one record per
    /// secondary spec file.
    ///
    /// Requests that cannot be checked at all are answered here and yield no
    /// records. Link problems of secondary specs are answered too, but the
    /// records are still returned so the rest of the group is evaluated.
    pub(super) async fn expand(&mut self, request: &SubmitRequest) -> Vec<CheckRepoPackage> {
        let id = request.id;
        if request.actions.len() > 1 {
            self.transition(id, &Finding::MultipleActions).await;
            return Vec::new();
        }
        let Some(action) = request.actions.first() else {
            warn!("Request {} has no actions", id);
            return Vec::new();
        };
        if action.kind != ActionKind::Submit {
            let finding = Finding::UncheckedType {
                kind: action.kind.as_str().to_string(),
            };
            self.transition(id, &finding).await;
            return Vec::new();
        }
        let (Some(source), Some(target)) = (&action.source, &action.target) else {
            warn!("Submit request {} lacks source or target", id);
            return Vec::new();
        };

        info!(
            "SUBMIT({}): {}/{} -> {}/{}",
            id, source.project, source.package, target.project, target.package
        );

        let service = self.service();
        let group = match self.registry.resolve(service, id).await {
            Ok(group) => group,
            Err(e) => {
                error!("Group lookup for {} failed: {}", id, e);
                return Vec::new();
            }
        };

        let info = match service
            .source_info(&source.project, &source.package, source.rev.as_deref())
            .await
        {
            Ok(info) => info,
            Err(e) => {
                error!(
                    "Source listing of {}/{} failed: {}",
                    source.project, source.package, e
                );
                return Vec::new();
            }
        };
        if info.srcmd5.is_empty() {
            error!(
                "Source listing of {}/{} carries no srcmd5, cannot check {}",
                source.project, source.package, id
            );
            return Vec::new();
        }

        let mut primary = CheckRepoPackage::new(
            id,
            group,
            (source.project.as_str(), source.package.as_str()),
            (target.project.as_str(), target.package.as_str()),
            info.srcmd5.clone(),
        );

        let specs: Vec<String> = info
            .spec_names()
            .into_iter()
            .filter(|spec| spec != &target.package)
            .collect();

        let mut secondaries = Vec::with_capacity(specs.len());
        for spec in specs {
            let (link, srcmd5) = match service.source_info(&source.project, &spec, None).await {
                Ok(linked) => (linked.link.unwrap_or_default(), linked.srcmd5),
                Err(e) => {
                    debug!("Source listing of {}/{} failed: {}", source.project, spec, e);
                    (Default::default(), primary.rev.clone())
                }
            };

            if link.project != source.project || link.package != source.package {
                let finding = Finding::WrongLink {
                    project: source.project.clone(),
                    spec: spec.clone(),
                    package: source.package.clone(),
                };
                self.issue(&mut primary, &finding).await;
            } else if link.srcmd5 != primary.rev {
                let finding = Finding::ChecksumMismatch {
                    project: source.project.clone(),
                    spec: spec.clone(),
                    package: source.package.clone(),
                };
                self.issue(&mut primary, &finding).await;
            }

            secondaries.push(CheckRepoPackage::new(
                id,
                group,
                (source.project.as_str(), spec.as_str()),
                (target.project.as_str(), spec.as_str()),
                srcmd5,
            ));
        }

        for secondary in &mut secondaries {
            secondary.updated = primary.updated;
        }
        let mut packages = Vec::with_capacity(1 + secondaries.len());
        packages.push(primary);
        packages.extend(secondaries);
        packages
    }
}
