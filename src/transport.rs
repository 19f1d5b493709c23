//! Upload transport: turns a resolved file into a stored object URL.
//!
//! The object path is `<object_root>/<namespace value>/<file name>`, where the
//! namespace value comes from the accession record (the `Subject` column by
//! default). Content hashes are computed with the rule's algorithms and the
//! first one is handed to the store for dedup.

use std::path::Path;

use crate::catalog::urlquote;
use crate::checksum::{checksum_file, Checksum};
use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::mapping::AssetMapping;
use crate::models::AccessionRecord;
use crate::store::{ObjectStore, ProgressCallback, PutOptions, PutRequest};

pub struct UploadTransport<'a> {
    store: &'a dyn ObjectStore,
    options: PutOptions,
    object_root: String,
    namespace_column: String,
}

impl<'a> UploadTransport<'a> {
    pub fn new(store: &'a dyn ObjectStore, config: &UploadConfig) -> Self {
        Self {
            store,
            options: PutOptions {
                chunked: config.chunked,
                chunk_size: config.chunk_size,
                create_parents: config.create_parents,
                allow_versioning: config.allow_versioning,
            },
            object_root: config.object_root.trim_end_matches('/').to_string(),
            namespace_column: config.namespace_column.clone(),
        }
    }

    pub fn options(&self) -> &PutOptions {
        &self.options
    }

    /// Store path for `file_name` under the record's namespace.
    pub fn object_path(
        &self,
        record: &AccessionRecord,
        file_name: &str,
    ) -> Result<String, UploadError> {
        let namespace =
            record
                .text(&self.namespace_column)
                .ok_or_else(|| UploadError::MalformedRecord {
                    file_name: file_name.to_string(),
                    detail: format!(
                        "accession {} has no {} value",
                        record.id_display(),
                        self.namespace_column
                    ),
                })?;
        Ok(format!(
            "{}/{}/{}",
            self.object_root,
            urlquote(&namespace),
            urlquote(file_name)
        ))
    }

    /// Hash and upload a file for an accession, returning the object URL.
    pub async fn upload_for_record(
        &self,
        file_path: &Path,
        file_name: &str,
        record: &AccessionRecord,
        rule: &AssetMapping,
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<String, UploadError> {
        let object_path = self.object_path(record, file_name)?;
        let content_type = guess_content_type(file_name);
        let checksums = checksum_file(file_path, rule.checksum_types()).await?;
        self.upload(&object_path, file_path, content_type, &checksums, progress)
            .await
    }

    /// Put `file_path` at `object_path`. `checksums[0]` is the dedup hash.
    pub async fn upload(
        &self,
        object_path: &str,
        file_path: &Path,
        content_type: &str,
        checksums: &[Checksum],
        progress: Option<ProgressCallback<'_>>,
    ) -> Result<String, UploadError> {
        let hash = checksums.first().ok_or_else(|| UploadError::Io {
            path: file_path.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "no checksum computed for upload",
            ),
        })?;
        tracing::debug!(
            object_path,
            content_type,
            hash = %hash.hex(),
            algorithm = %hash.kind,
            "uploading"
        );
        let request = PutRequest {
            path: object_path,
            file: file_path,
            content_type,
            hash,
            checksums,
            options: &self.options,
        };
        Ok(self.store.put(request, progress).await?)
    }
}

/// MIME type from the file extension.
pub fn guess_content_type(file_name: &str) -> &'static str {
    let lower = file_name.to_ascii_lowercase();
    match lower.rsplit('.').next() {
        Some("m4v") => "video/x-m4v",
        Some("mp4") => "video/mp4",
        Some("tif" | "tiff") => "image/tiff",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::store::TransferProgress;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        seen: Mutex<Vec<(String, String, String, PutOptions)>>,
    }

    #[async_trait]
    impl ObjectStore for RecordingStore {
        async fn put(
            &self,
            request: PutRequest<'_>,
            progress: Option<ProgressCallback<'_>>,
        ) -> Result<String, TransportError> {
            self.seen.lock().unwrap().push((
                request.path.to_string(),
                request.content_type.to_string(),
                request.hash.hex(),
                request.options.clone(),
            ));
            if let Some(cb) = progress {
                cb(TransferProgress { sent: 3, total: 3 });
            }
            Ok(format!("{}:V1", request.path))
        }
    }

    fn record(v: serde_json::Value) -> AccessionRecord {
        AccessionRecord::from_row("Bhv001.m4v", v.as_object().cloned().unwrap()).unwrap()
    }

    #[test]
    fn object_path_is_namespaced_by_subject() {
        let store = RecordingStore::default();
        let transport = UploadTransport::new(&store, &UploadConfig::default());
        let rec = record(json!({"ID": "Bhv001", "Subject": "S1"}));
        assert_eq!(
            transport.object_path(&rec, "Bhv001.m4v").unwrap(),
            "/hatrac/Zf/S1/Bhv001.m4v"
        );

        let rec = record(json!({"ID": "Bhv001", "Subject": null}));
        let err = transport.object_path(&rec, "Bhv001.m4v").unwrap_err();
        assert_eq!(err.kind(), "malformed_record");
    }

    #[test]
    fn content_types() {
        assert_eq!(guess_content_type("Bhv001.m4v"), "video/x-m4v");
        assert_eq!(guess_content_type("Img1.OME.TIFF"), "image/tiff");
        assert_eq!(guess_content_type("Roi1_synapses.csv"), "text/csv");
        assert_eq!(guess_content_type("blob"), "application/octet-stream");
    }

    #[tokio::test]
    async fn upload_passes_primary_hash_and_explicit_options() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("Bhv001.m4v");
        std::fs::write(&file, b"abc").unwrap();

        let store = RecordingStore::default();
        let transport = UploadTransport::new(&store, &UploadConfig::default());
        let rule = crate::config::default_config().unwrap().rules().unwrap().remove(0);
        let rec = record(json!({"ID": "Bhv001", "Subject": "S1"}));

        let calls = Mutex::new(0u32);
        let count = |_p: TransferProgress| *calls.lock().unwrap() += 1;
        let cb: ProgressCallback<'_> = &count;
        let url = transport
            .upload_for_record(&file, "Bhv001.m4v", &rec, &rule, Some(cb))
            .await
            .unwrap();

        assert_eq!(url, "/hatrac/Zf/S1/Bhv001.m4v:V1");
        assert_eq!(*calls.lock().unwrap(), 1);
        let seen = store.seen.lock().unwrap();
        assert_eq!(seen[0].1, "video/x-m4v");
        assert_eq!(seen[0].2, "900150983cd24fb0d6963f7d28e17f72");
        assert!(!seen[0].3.allow_versioning);
        assert!(!seen[0].3.create_parents);
    }
}
