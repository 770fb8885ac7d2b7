//! Serves one repository to peers over the git smart HTTP routes.
//!
//! Routes under `/{repo_name}/`:
//! - `GET info/refs?service=git-upload-pack` - ref advertisement
//! - `POST git-upload-pack` - side-band pack response
//! - any other `GET` - raw file from the git directory
//!
//! Requests outside the repository answer `pong`.

use async_trait::async_trait;
use greams_git::{advertise_refs, upload_pack, PackSource, UPLOAD_PACK};
use greams_p2p::{Body, BoxError, HandlerResponse, InboundRequest, RequestHandler};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

use crate::store::FileStore;
use crate::NodeError;

/// Request handler for one served repository.
pub struct RepoService {
    repo_name: String,
    source: Arc<dyn PackSource>,
    files: Arc<dyn FileStore>,
}

impl RepoService {
    /// Serves `source` as `/{repo_name}`, with raw files read from `files`.
    pub fn new(
        repo_name: impl Into<String>,
        source: Arc<dyn PackSource>,
        files: Arc<dyn FileStore>,
    ) -> Self {
        Self {
            repo_name: repo_name.into(),
            source,
            files,
        }
    }

    /// Name under which the repository is served.
    pub fn repo_name(&self) -> &str {
        &self.repo_name
    }

    async fn info_refs(&self) -> Result<HandlerResponse, BoxError> {
        let refs = self.source.advertise_refs().await?;
        debug!(refs = refs.len(), "Advertising refs");
        Ok(HandlerResponse::ok(advertise_refs(UPLOAD_PACK, &refs)?)
            .with_header("content-type", "application/x-git-upload-pack-advertisement")
            .with_header("cache-control", "no-cache"))
    }

    async fn upload_pack(&self, body: &[u8]) -> Result<HandlerResponse, BoxError> {
        let output = upload_pack(body, self.source.as_ref()).await?;
        Ok(HandlerResponse::ok(Body::from_stream(output))
            .with_header("content-type", "application/x-git-upload-pack-result"))
    }

    async fn raw_file(&self, path: &str) -> Result<HandlerResponse, BoxError> {
        match self.files.read(path).await {
            Ok(contents) => Ok(HandlerResponse::ok(contents)),
            Err(NodeError::NotFound(_)) | Err(NodeError::InvalidPath(_)) => {
                Ok(HandlerResponse::status(404, "Not Found"))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for RepoService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepoService")
            .field("repo_name", &self.repo_name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RequestHandler for RepoService {
    async fn handle(&self, request: InboundRequest) -> Result<HandlerResponse, BoxError> {
        let url = Url::parse(&request.url)?;
        let segments: Vec<&str> = url
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        let Some((first, rest)) = segments.split_first() else {
            return Ok(HandlerResponse::ok("pong"));
        };
        if *first != self.repo_name {
            return Ok(HandlerResponse::ok("pong"));
        }

        let git_path = rest.join("/");
        let service = url
            .query_pairs()
            .find(|(key, _)| key == "service")
            .map(|(_, value)| value.into_owned());

        info!(
            peer = %request.src.short_id(),
            method = %request.method,
            path = %git_path,
            "Serving repository request"
        );

        match (request.method.as_str(), git_path.as_str()) {
            ("GET", "info/refs") if service.as_deref() == Some(UPLOAD_PACK) => {
                self.info_refs().await
            }
            ("GET", "info/refs") => Ok(HandlerResponse::status(403, "Forbidden")),
            ("POST", "git-upload-pack") => {
                self.upload_pack(&request.body.unwrap_or_default()).await
            }
            ("GET", path) => self.raw_file(path).await,
            _ => Ok(HandlerResponse::status(405, "Method Not Allowed")),
        }
    }
}
