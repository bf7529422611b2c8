//! XML documents returned by the build service, and their conversion into
//! the engine's model types.

use serde::Deserialize;

use crate::error::{ServiceError, ServiceResult};
use crate::model::{
    ActionKind, ArchStatus, BuildResult, BuildStatus, LinkInfo, RepositoryStatus, RequestAction,
    RequestId, RequestState, SourceDiff, SourceInfo, SourceRef, SubmitRequest, TargetRef,
};

#[derive(Debug, Deserialize)]
pub(crate) struct CollectionXml {
    #[serde(rename = "request", default)]
    pub requests: Vec<RequestXml>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RequestXml {
    #[serde(rename = "@id")]
    pub id: u64,
    #[serde(rename = "action", default)]
    pub actions: Vec<ActionXml>,
    #[serde(default)]
    pub state: Option<StateXml>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ActionXml {
    #[serde(rename = "@type")]
    pub kind: String,
    #[serde(default)]
    pub source: Option<SourceXml>,
    #[serde(default)]
    pub target: Option<TargetXml>,
    #[serde(default)]
    pub grouped: Vec<GroupedXml>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SourceXml {
    #[serde(rename = "@project")]
    pub project: String,
    #[serde(rename = "@package", default)]
    pub package: Option<String>,
    #[serde(rename = "@rev", default)]
    pub rev: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TargetXml {
    #[serde(rename = "@project")]
    pub project: String,
    #[serde(rename = "@package", default)]
    pub package: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GroupedXml {
    #[serde(rename = "@id")]
    pub id: u64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StateXml {
    #[serde(rename = "@name")]
    pub name: String,
}

impl From<RequestXml> for SubmitRequest {
    fn from(xml: RequestXml) -> Self {
        let actions = xml
            .actions
            .into_iter()
            .map(|action| {
                let source = action.source.map(|s| SourceRef {
                    project: s.project,
                    package: s.package.unwrap_or_default(),
                    rev: s.rev,
                });
                let target = action.target.map(|t| TargetRef {
                    package: t
                        .package
                        .or_else(|| source.as_ref().map(|s| s.package.clone()))
                        .unwrap_or_default(),
                    project: t.project,
                });
                RequestAction {
                    kind: ActionKind::parse(&action.kind),
                    source,
                    target,
                    grouped: action.grouped.into_iter().map(|g| RequestId(g.id)).collect(),
                }
            })
            .collect();

        SubmitRequest {
            id: RequestId(xml.id),
            state: xml
                .state
                .map(|s| RequestState::parse(&s.name))
                .unwrap_or(RequestState::New),
            actions,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct DirectoryXml {
    #[serde(rename = "@srcmd5", default)]
    pub srcmd5: Option<String>,
    #[serde(default)]
    pub linkinfo: Option<LinkInfoXml>,
    #[serde(rename = "entry", default)]
    pub entries: Vec<EntryXml>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LinkInfoXml {
    #[serde(rename = "@project", default)]
    pub project: Option<String>,
    #[serde(rename = "@package", default)]
    pub package: Option<String>,
    #[serde(rename = "@srcmd5", default)]
    pub srcmd5: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EntryXml {
    #[serde(rename = "@name")]
    pub name: String,
}

impl DirectoryXml {
    /// A package listing. Without a source checksum there is no revision to
    /// verify binaries against, so the listing is unusable.
    pub fn into_source_info(self, url: &str) -> ServiceResult<SourceInfo> {
        let srcmd5 = self
            .srcmd5
            .filter(|md5| !md5.is_empty())
            .ok_or_else(|| ServiceError::Malformed {
                url: url.to_string(),
                detail: "source listing without srcmd5".to_string(),
            })?;
        Ok(SourceInfo {
            srcmd5,
            entries: self.entries.into_iter().map(|e| e.name).collect(),
            link: self.linkinfo.map(|l| LinkInfo {
                project: l.project.unwrap_or_default(),
                package: l.package.unwrap_or_default(),
                srcmd5: l.srcmd5.unwrap_or_default(),
            }),
        })
    }
}

/// Last-success result document. An error reply carries a `code` attribute
/// instead of repositories.
#[derive(Debug, Deserialize)]
pub(crate) struct BuildStatusXml {
    #[serde(rename = "@code", default)]
    pub code: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(rename = "repository", default)]
    pub repositories: Vec<RepositoryXml>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RepositoryXml {
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "arch", default)]
    pub archs: Vec<ArchXml>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ArchXml {
    #[serde(rename = "@arch")]
    pub arch: String,
    #[serde(rename = "@result", default)]
    pub result: Option<String>,
    #[serde(rename = "@missing", default)]
    pub missing: Option<String>,
}

impl From<BuildStatusXml> for BuildStatus {
    fn from(xml: BuildStatusXml) -> Self {
        BuildStatus {
            repositories: xml
                .repositories
                .into_iter()
                .map(|repo| RepositoryStatus {
                    name: repo.name,
                    archs: repo
                        .archs
                        .into_iter()
                        .map(|arch| ArchStatus {
                            arch: arch.arch,
                            result: BuildResult::parse(arch.result.as_deref().unwrap_or("")),
                            missing: arch
                                .missing
                                .as_deref()
                                .map(split_missing)
                                .unwrap_or_default(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

fn split_missing(missing: &str) -> Vec<String> {
    missing
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize)]
pub(crate) struct BinaryListXml {
    #[serde(rename = "binary", default)]
    pub binaries: Vec<BinaryXml>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BinaryXml {
    #[serde(rename = "@filename")]
    pub filename: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BuildInfoXml {
    #[serde(rename = "bdep", default)]
    pub bdeps: Vec<BuildDepXml>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BuildDepXml {
    #[serde(rename = "@name")]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StatusXml {
    #[serde(rename = "@code")]
    pub code: String,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SourceDiffXml {
    #[serde(default)]
    pub old: Option<DiffEndpointXml>,
    #[serde(default)]
    pub new: Option<DiffEndpointXml>,
    #[serde(default)]
    pub files: Option<DiffFilesXml>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DiffEndpointXml {
    #[serde(rename = "@srcmd5", default)]
    pub srcmd5: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DiffFilesXml {
    #[serde(rename = "file", default)]
    pub files: Vec<DiffFileXml>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DiffFileXml {
    #[serde(default)]
    pub diff: Option<DiffBodyXml>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DiffBodyXml {
    #[serde(rename = "@lines", default)]
    pub lines: Option<String>,
    #[serde(rename = "$text", default)]
    pub text: Option<String>,
}

impl SourceDiffXml {
    pub fn into_diff(self, raw: String) -> SourceDiff {
        SourceDiff {
            old_srcmd5: self.old.and_then(|o| o.srcmd5).unwrap_or_default(),
            new_srcmd5: self.new.and_then(|n| n.srcmd5).unwrap_or_default(),
            has_file_diffs: self
                .files
                .map(|f| f.files.iter().any(|file| file.diff.is_some()))
                .unwrap_or(false),
            raw,
        }
    }
}
