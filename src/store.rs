//! Object store client.
//!
//! [`ObjectStore`] is the capability the upload transport needs: put a
//! local file at a path, with dedup on the primary content hash.
//! [`HatracStore`] implements it against the Hatrac HTTP API.
//!
//! # Workflow of a put
//!
//! 1. `HEAD` the object. If it exists with the same primary hash, its
//!    location is returned and no bytes are sent. If it exists with other
//!    content the put fails unless versioning is allowed.
//! 2. `HEAD` the parent namespace. A missing parent is created only when
//!    `create_parents` is set.
//! 3. Transfer: files larger than `chunk_size` go through an upload job
//!    (`POST <object>;upload`, `PUT <job>/<n>` per chunk, `POST <job>`),
//!    reading one chunk at a time from disk. Smaller files go out in a
//!    single `PUT` whose body is streamed from disk frame by frame.

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_LOCATION, CONTENT_TYPE, LOCATION};
use reqwest::Method;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;

use crate::catalog::error_for_status;
use crate::checksum::Checksum;
use crate::error::TransportError;

const NAMESPACE_CONTENT_TYPE: &str = "application/x-hatrac-namespace";

/// Read size for streamed single-request bodies.
const STREAM_FRAME: usize = 64 * 1024;

/// Default transfer chunk: 25 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 25 * 1024 * 1024;

/// Explicit transfer options. Parent creation and versioning are off
/// unless asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOptions {
    pub chunked: bool,
    pub chunk_size: u64,
    pub create_parents: bool,
    pub allow_versioning: bool,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            chunked: true,
            chunk_size: DEFAULT_CHUNK_SIZE,
            create_parents: false,
            allow_versioning: false,
        }
    }
}

/// One object to put.
#[derive(Debug, Clone, Copy)]
pub struct PutRequest<'a> {
    /// Store path, e.g. `/hatrac/Zf/S1/Bhv001.m4v`, already percent-encoded.
    pub path: &'a str,
    pub file: &'a Path,
    pub content_type: &'a str,
    /// Primary hash; decides whether an existing object is the same content.
    pub hash: &'a Checksum,
    /// All computed hashes, sent along as integrity headers.
    pub checksums: &'a [Checksum],
    pub options: &'a PutOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub sent: u64,
    pub total: u64,
}

/// Invoked synchronously as bytes go out. Must not call back into the
/// catalog or store.
pub type ProgressCallback<'a> = &'a (dyn Fn(TransferProgress) + Send + Sync);

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `request.file` to `request.path` and return the object's URL.
    async fn put(
        &self,
        request: PutRequest<'_>,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<String, TransportError>;

    /// Verify the store answers for `namespace`.
    async fn check(&self, _namespace: &str) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Hatrac object store reached over HTTP(S).
pub struct HatracStore {
    client: reqwest::Client,
    base_url: String,
    cookie: Option<String>,
}

impl HatracStore {
    /// `base_url` is `protocol://host`; object paths start with `/hatrac`.
    pub fn new(client: reqwest::Client, base_url: &str, cookie: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            cookie,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        let req = self.client.request(method, url);
        match &self.cookie {
            Some(cookie) => req.header(reqwest::header::COOKIE, cookie),
            None => req,
        }
    }

    /// Strip our own base URL so stored locations are server-relative paths.
    fn relative(&self, location: &str) -> String {
        location
            .strip_prefix(&self.base_url)
            .unwrap_or(location)
            .to_string()
    }

    /// `Some(headers)` when the resource exists, `None` on 404.
    async fn head(&self, path: &str) -> Result<Option<HeaderMap>, TransportError> {
        let url = self.url(path);
        let resp = self
            .request(Method::HEAD, &url)
            .send()
            .await
            .map_err(|e| TransportError::request(&url, e))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = error_for_status("HEAD", &url, resp).await?;
        Ok(Some(resp.headers().clone()))
    }

    async fn ensure_parent(&self, path: &str, create_parents: bool) -> Result<(), TransportError> {
        let Some((parent, _)) = path.rsplit_once('/') else {
            return Ok(());
        };
        if parent.is_empty() || self.head(parent).await?.is_some() {
            return Ok(());
        }
        if !create_parents {
            return Err(TransportError::MissingParent {
                namespace: parent.to_string(),
            });
        }

        let url = format!("{}?parents=true", self.url(parent));
        let resp = self
            .request(Method::PUT, &url)
            .header(CONTENT_TYPE, NAMESPACE_CONTENT_TYPE)
            .send()
            .await
            .map_err(|e| TransportError::request(&url, e))?;
        // 409: created concurrently by someone else.
        if resp.status() == reqwest::StatusCode::CONFLICT {
            return Ok(());
        }
        error_for_status("PUT", &url, resp).await?;
        tracing::debug!(namespace = parent, "created namespace");
        Ok(())
    }

    async fn put_single(
        &self,
        request: &PutRequest<'_>,
        size: u64,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<String, TransportError> {
        let file = tokio::fs::File::open(request.file)
            .await
            .map_err(|source| TransportError::Io {
                path: request.file.to_path_buf(),
                source,
            })?;

        // The body stream is 'static, so frame sizes travel back over a
        // channel and the callback runs here.
        let (frames_tx, mut frames_rx) = tokio::sync::mpsc::unbounded_channel::<u64>();
        let stream = ReaderStream::with_capacity(file, STREAM_FRAME).inspect_ok(move |frame| {
            let _ = frames_tx.send(frame.len() as u64);
        });

        let url = self.url(request.path);
        let mut req = self
            .request(Method::PUT, &url)
            .header(CONTENT_TYPE, request.content_type)
            .header(CONTENT_LENGTH, size);
        for sum in request.checksums {
            req = req.header(sum.kind.header(), sum.base64());
        }
        let send = req.body(reqwest::Body::wrap_stream(stream)).send();
        tokio::pin!(send);

        let mut sent = 0u64;
        let mut report = |n: u64| {
            sent += n;
            if let Some(cb) = progress {
                cb(TransferProgress { sent, total: size });
            }
        };
        let result = loop {
            tokio::select! {
                Some(n) = frames_rx.recv() => report(n),
                result = &mut send => break result,
            }
        };
        while let Ok(n) = frames_rx.try_recv() {
            report(n);
        }

        let resp = result.map_err(|e| TransportError::request(&url, e))?;
        let resp = error_for_status("PUT", &url, resp).await?;
        let location = response_location(&url, resp).await?;
        Ok(self.relative(&location))
    }

    async fn put_chunked(
        &self,
        request: &PutRequest<'_>,
        size: u64,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<String, TransportError> {
        let chunk_size = request.options.chunk_size;
        let url = format!("{};upload", self.url(request.path));

        let mut job = serde_json::Map::new();
        job.insert("chunk-length".into(), chunk_size.into());
        job.insert("content-length".into(), size.into());
        job.insert("content-type".into(), request.content_type.into());
        for sum in request.checksums {
            job.insert(sum.kind.header().into(), sum.base64().into());
        }

        let resp = self
            .request(Method::POST, &url)
            .json(&job)
            .send()
            .await
            .map_err(|e| TransportError::request(&url, e))?;
        let resp = error_for_status("POST", &url, resp).await?;
        let job_path = self.relative(&response_location(&url, resp).await?);
        let job_url = self.url(&job_path);
        tracing::debug!(job = %job_path, size, chunk_size, "opened upload job");

        match self
            .send_chunks(request, &job_url, size, chunk_size, progress)
            .await
        {
            Ok(()) => {}
            Err(e) => {
                if let Err(cancel) = self.request(Method::DELETE, &job_url).send().await {
                    tracing::warn!(job = %job_path, error = %cancel, "failed to cancel upload job");
                }
                return Err(e);
            }
        }

        let resp = self
            .request(Method::POST, &job_url)
            .send()
            .await
            .map_err(|e| TransportError::request(&job_url, e))?;
        let resp = error_for_status("POST", &job_url, resp).await?;
        Ok(self.relative(&response_location(&job_url, resp).await?))
    }

    async fn send_chunks(
        &self,
        request: &PutRequest<'_>,
        job_url: &str,
        size: u64,
        chunk_size: u64,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<(), TransportError> {
        let io_err = |source| TransportError::Io {
            path: request.file.to_path_buf(),
            source,
        };
        let mut file = tokio::fs::File::open(request.file).await.map_err(io_err)?;
        let mut sent = 0u64;
        let mut index = 0u64;
        while sent < size {
            let len = chunk_size.min(size - sent);
            let mut buf = vec![0u8; len as usize];
            file.read_exact(&mut buf).await.map_err(io_err)?;

            let url = format!("{}/{}", job_url, index);
            let resp = self
                .request(Method::PUT, &url)
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(buf)
                .send()
                .await
                .map_err(|e| TransportError::request(&url, e))?;
            error_for_status("PUT", &url, resp).await?;

            sent += len;
            index += 1;
            if let Some(cb) = progress {
                cb(TransferProgress { sent, total: size });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for HatracStore {
    async fn put(
        &self,
        request: PutRequest<'_>,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<String, TransportError> {
        if let Some(headers) = self.head(request.path).await? {
            let existing = headers
                .get(request.hash.kind.header())
                .and_then(|v| v.to_str().ok());
            if existing == Some(request.hash.base64().as_str()) {
                // Hatrac names the current version in Content-Location; the
                // catalog must only ever record versioned URLs.
                let location = headers
                    .get(CONTENT_LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(|l| self.relative(l))
                    .ok_or_else(|| {
                        TransportError::protocol(
                            &self.url(request.path),
                            "existing object carried no Content-Location",
                        )
                    })?;
                tracing::debug!(path = request.path, %location, "identical object already stored");
                return Ok(location);
            }
            if !request.options.allow_versioning {
                return Err(TransportError::ObjectExists {
                    path: request.path.to_string(),
                });
            }
        }

        self.ensure_parent(request.path, request.options.create_parents)
            .await?;

        let size = tokio::fs::metadata(request.file)
            .await
            .map_err(|source| TransportError::Io {
                path: request.file.to_path_buf(),
                source,
            })?
            .len();

        if request.options.chunked && size > request.options.chunk_size {
            self.put_chunked(&request, size, progress).await
        } else {
            self.put_single(&request, size, progress).await
        }
    }

    async fn check(&self, namespace: &str) -> Result<(), TransportError> {
        // A missing namespace is fine; it may be created on first upload.
        self.head(namespace).await.map(|_| ())
    }
}

/// `Location` header if present, otherwise the trimmed response body.
async fn response_location(url: &str, resp: reqwest::Response) -> Result<String, TransportError> {
    let header = resp
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if let Some(location) = header.filter(|l| !l.is_empty()) {
        return Ok(location);
    }
    let body = resp
        .text()
        .await
        .map_err(|e| TransportError::request(url, e))?;
    let body = body.trim();
    if body.is_empty() {
        return Err(TransportError::protocol(url, "response carried no location"));
    }
    Ok(body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let opts = PutOptions::default();
        assert!(opts.chunked);
        assert!(!opts.create_parents);
        assert!(!opts.allow_versioning);
        assert_eq!(opts.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn locations_are_made_relative() {
        let store = HatracStore::new(reqwest::Client::new(), "https://h.org/", None);
        assert_eq!(
            store.relative("https://h.org/hatrac/Zf/S1/a.m4v:V1"),
            "/hatrac/Zf/S1/a.m4v:V1"
        );
        assert_eq!(store.relative("/hatrac/x:1"), "/hatrac/x:1");
    }
}
