use std::path::Path;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, StatusCode, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

use super::xml::{
    BinaryListXml, BuildInfoXml, BuildStatusXml, CollectionXml, DirectoryXml, RequestXml,
    SourceDiffXml, StatusXml,
};
use super::{BuildService, BuildStatusQuery, LoggingMiddleware, RequestQuery};
use crate::error::{ServiceError, ServiceResult};
use crate::model::{
    BinaryLocation, BuildStatus, RequestId, ReviewStateChange, SourceDiff, SourceInfo,
    SubmitRequest,
};

/// Longest error body quoted back in a `ServiceError`.
const MAX_ERROR_DETAIL: usize = 500;

/// Build service REST client.
#[derive(Clone)]
pub struct ObsClient {
    client: ClientWithMiddleware,
    api_url: Url,
    credentials: Option<(String, String)>,
}

impl ObsClient {
    pub fn new(api_url: &str, credentials: Option<(String, String)>) -> ServiceResult<Self> {
        let api_url = Url::parse(api_url).map_err(|e| ServiceError::Malformed {
            url: api_url.to_string(),
            detail: format!("invalid API URL: {}", e),
        })?;
        if api_url.cannot_be_a_base() {
            return Err(ServiceError::Malformed {
                url: api_url.to_string(),
                detail: "API URL cannot carry a path".to_string(),
            });
        }

        Ok(Self {
            client: create_http_client()?,
            api_url,
            credentials,
        })
    }

    /// Build `<api>/<segments...>`, escaping each segment.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.api_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some((user, password)) => builder.basic_auth(user, Some(password)),
            None => builder,
        }
    }

    async fn get_text(&self, url: Url) -> ServiceResult<String> {
        let request = self.authorize(self.client.get(url.clone()));
        self.send(url, request).await
    }

    async fn post_text(&self, url: Url, body: String) -> ServiceResult<String> {
        let request = self.authorize(self.client.post(url.clone()).body(body));
        self.send(url, request).await
    }

    async fn send(&self, url: Url, request: RequestBuilder) -> ServiceResult<String> {
        let response = request.send().await.map_err(|e| {
            error!("ERROR in URL {} [{}]", url, e);
            ServiceError::Transport {
                url: url.to_string(),
                detail: e.to_string(),
            }
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| ServiceError::Transport {
            url: url.to_string(),
            detail: format!("failed to read response body: {}", e),
        })?;

        check_status(&url, status, &body)?;
        Ok(body)
    }

    async fn get_xml<T: DeserializeOwned>(&self, url: Url) -> ServiceResult<T> {
        let body = self.get_text(url.clone()).await?;
        decode(&url, &body)
    }
}

fn check_status(url: &Url, status: StatusCode, body: &str) -> ServiceResult<()> {
    if status.is_success() {
        return Ok(());
    }
    Err(status_error(url, status, body))
}

fn status_error(url: &Url, status: StatusCode, body: &str) -> ServiceError {
    error!("ERROR in URL {} [{}]", url, status);
    if status == StatusCode::NOT_FOUND {
        return ServiceError::NotFound(url.to_string());
    }
    ServiceError::Status {
        url: url.to_string(),
        code: status.as_u16().to_string(),
        detail: truncate(body, MAX_ERROR_DETAIL),
    }
}

fn decode<T: DeserializeOwned>(url: &Url, body: &str) -> ServiceResult<T> {
    quick_xml::de::from_str(body).map_err(|e| ServiceError::Malformed {
        url: url.to_string(),
        detail: e.to_string(),
    })
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

#[async_trait]
impl BuildService for ObsClient {
    async fn request(&self, id: RequestId) -> ServiceResult<SubmitRequest> {
        let url = self.url(&["request", &id.to_string()]);
        let request: RequestXml = self.get_xml(url).await?;
        Ok(request.into())
    }

    async fn search_requests(&self, query: &RequestQuery) -> ServiceResult<Vec<SubmitRequest>> {
        let mut url = self.url(&["search", "request"]);
        url.query_pairs_mut().append_pair("match", &query.to_xpath());
        let collection: CollectionXml = self.get_xml(url).await?;
        Ok(collection.requests.into_iter().map(Into::into).collect())
    }

    async fn source_info(
        &self,
        project: &str,
        package: &str,
        rev: Option<&str>,
    ) -> ServiceResult<SourceInfo> {
        let mut url = self.url(&["source", project, package]);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("expand", "1");
            if let Some(rev) = rev {
                query.append_pair("rev", rev);
            }
        }
        let directory: DirectoryXml = self.get_xml(url.clone()).await?;
        directory.into_source_info(url.as_str())
    }

    async fn build_status(&self, query: &BuildStatusQuery) -> ServiceResult<BuildStatus> {
        let mut url = self.url(&["build", &query.source_project, "_result"]);
        url.query_pairs_mut()
            .append_key_only("lastsuccess")
            .append_pair("package", &query.source_package)
            .append_pair("pathproject", &query.target_project)
            .append_pair("srcmd5", &query.rev);

        let document: BuildStatusXml = self.get_xml(url.clone()).await?;
        if let Some(code) = document.code {
            return Err(ServiceError::Status {
                url: url.to_string(),
                code,
                detail: document.summary.unwrap_or_default(),
            });
        }
        Ok(document.into())
    }

    async fn binaries(&self, location: &BinaryLocation) -> ServiceResult<Vec<String>> {
        let url = self.url(&[
            "build",
            &location.project,
            &location.repository,
            &location.arch,
            &location.package,
        ]);
        let list: BinaryListXml = self.get_xml(url).await?;
        Ok(list.binaries.into_iter().map(|b| b.filename).collect())
    }

    async fn repository_binaries(
        &self,
        project: &str,
        repository: &str,
        arch: &str,
    ) -> ServiceResult<Vec<String>> {
        let url = self.url(&["build", project, repository, arch, "_repository"]);
        let list: BinaryListXml = self.get_xml(url).await?;
        Ok(list.binaries.into_iter().map(|b| b.filename).collect())
    }

    async fn project_packages(&self, project: &str) -> ServiceResult<Vec<String>> {
        let mut url = self.url(&["source", project]);
        url.query_pairs_mut().append_pair("expand", "1");
        let directory: DirectoryXml = self.get_xml(url).await?;
        Ok(directory.entries.into_iter().map(|e| e.name).collect())
    }

    async fn build_dependencies(&self, location: &BinaryLocation) -> ServiceResult<Vec<String>> {
        let url = self.url(&[
            "build",
            &location.project,
            &location.repository,
            &location.arch,
            &location.package,
            "_buildinfo",
        ]);
        let info: BuildInfoXml = self.get_xml(url).await?;
        Ok(info.bdeps.into_iter().map(|d| d.name).collect())
    }

    async fn fetch_binary(
        &self,
        location: &BinaryLocation,
        file: &str,
        target: &Path,
    ) -> ServiceResult<()> {
        let url = self.url(&[
            "build",
            &location.project,
            &location.repository,
            &location.arch,
            &location.package,
            file,
        ]);
        let io_error = |e: std::io::Error| ServiceError::Transport {
            url: url.to_string(),
            detail: format!("writing {}: {}", target.display(), e),
        };

        let response = self
            .authorize(self.client.get(url.clone()))
            .send()
            .await
            .map_err(|e| ServiceError::Transport {
                url: url.to_string(),
                detail: e.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(&url, status, &body));
        }

        // Write to a side file so an interrupted download never looks complete.
        let partial = target.with_file_name(format!("{}.part", file));
        let mut out = tokio::fs::File::create(&partial).await.map_err(io_error)?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ServiceError::Transport {
                url: url.to_string(),
                detail: e.to_string(),
            })?;
            out.write_all(&chunk).await.map_err(io_error)?;
        }
        out.flush().await.map_err(io_error)?;
        drop(out);
        tokio::fs::rename(&partial, target).await.map_err(io_error)?;

        info!("Fetched {} to {}", file, target.display());
        Ok(())
    }

    async fn change_review_state(&self, change: &ReviewStateChange) -> ServiceResult<String> {
        let mut url = self.url(&["request", &change.request.to_string()]);
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("cmd", "changereviewstate")
                .append_pair("newstate", change.new_state.as_str())
                .append_pair("by_user", &change.by_user);
            if let Some(superseded_by) = change.superseded_by {
                query.append_pair("superseded_by", &superseded_by.to_string());
            }
        }

        let body = self.post_text(url.clone(), change.message.clone()).await?;
        let status: StatusXml = decode(&url, &body)?;
        Ok(status.code)
    }

    async fn source_diff(
        &self,
        old_project: &str,
        new_project: &str,
        package: &str,
    ) -> ServiceResult<SourceDiff> {
        let mut url = self.url(&["source", new_project, package]);
        url.query_pairs_mut()
            .append_pair("cmd", "diff")
            .append_pair("view", "xml")
            .append_pair("oproject", old_project)
            .append_pair("opackage", package);

        let body = self.post_text(url.clone(), String::new()).await?;
        let document: SourceDiffXml = decode(&url, &body)?;
        Ok(document.into_diff(body))
    }
}

pub fn create_http_client() -> ServiceResult<ClientWithMiddleware> {
    let client = Client::builder()
        .user_agent(concat!("repochecker/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ServiceError::Transport {
            url: String::new(),
            detail: format!("failed to create HTTP client: {}", e),
        })?;

    Ok(ClientBuilder::new(client).with(LoggingMiddleware).build())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ObsClient {
        ObsClient::new("https://api.example.org", None).unwrap()
    }

    #[test]
    fn test_url_escapes_segments() {
        let url = client().url(&["source", "openSUSE:Factory", "c++ tools"]);
        assert_eq!(
            url.as_str(),
            "https://api.example.org/source/openSUSE:Factory/c++%20tools"
        );
    }

    #[test]
    fn test_url_with_base_path() {
        let client = ObsClient::new("https://example.org/obs/", None).unwrap();
        let url = client.url(&["request", "42"]);
        assert_eq!(url.as_str(), "https://example.org/obs/request/42");
    }

    #[test]
    fn test_rejects_invalid_api_url() {
        assert!(ObsClient::new("not a url", None).is_err());
        assert!(ObsClient::new("mailto:someone@example.org", None).is_err());
    }

    #[test]
    fn test_check_status_maps_not_found() {
        let url = Url::parse("https://api.example.org/request/1").unwrap();
        let err = check_status(&url, StatusCode::NOT_FOUND, "").unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        let err = check_status(&url, StatusCode::BAD_GATEWAY, "upstream").unwrap_err();
        match err {
            ServiceError::Status { code, detail, .. } => {
                assert_eq!(code, "502");
                assert_eq!(detail, "upstream");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_decode_reports_malformed() {
        let url = Url::parse("https://api.example.org/request/1").unwrap();
        let result: ServiceResult<StatusXml> = decode(&url, "<status");
        assert!(matches!(result, Err(ServiceError::Malformed { .. })));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééé", 3), "é...");
    }
}
