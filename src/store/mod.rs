//! C1: the content-addressable store.
//!
//! Persists blobs and manifests under the layout documented in spec.md §4.1:
//!
//! ```text
//! blobs/<owner>/<repository>/<digest>
//! manifests/<owner>/<repository>/<digest>
//! tags/<owner>/<repository>/<tag>
//! referrers/<owner>/<repository>/<subject-digest>
//! ```
//!
//! Every write goes through write-to-temp + rename so a concurrent reader
//! never observes a partial file (spec.md §5).

mod referrers;

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::digest::Digest;
use crate::error::{OciErrorCode, RegistryError, Result};

pub use referrers::ReferrerDescriptor;

const BLOBS_DIR: &str = "blobs";
const MANIFESTS_DIR: &str = "manifests";
const TAGS_DIR: &str = "tags";
const REFERRERS_DIR: &str = "referrers";

const DEFAULT_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// Result of resolving a manifest reference: its bytes plus the digest it
/// was ultimately stored under.
pub struct ManifestContent {
    pub bytes: Vec<u8>,
    pub digest: Digest,
}

/// A repository name is a two-segment `owner/repository` namespace key.
///
/// Rejects anything that could escape the store root via `..` or an
/// absolute path — the filesystem layout trusts this to be pre-validated
/// before it ever reaches a `Path::join`.
pub fn validate_repo_name(name: &str) -> Result<()> {
    let segments: Vec<&str> = name.split('/').collect();
    if segments.len() != 2 || segments.iter().any(|s| s.is_empty() || *s == "." || *s == "..") {
        return Err(RegistryError::new(
            OciErrorCode::NameInvalid,
            "repository name must be of the form owner/repository",
        ));
    }
    Ok(())
}

fn validate_path_component(component: &str, what: &str) -> Result<()> {
    if component.is_empty() || component.contains('/') || component == "." || component == ".." {
        return Err(RegistryError::new(
            OciErrorCode::NameInvalid,
            format!("invalid {what}"),
        ));
    }
    Ok(())
}

#[derive(Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn blob_dir(&self, repo: &str) -> PathBuf {
        self.root.join(BLOBS_DIR).join(repo)
    }

    fn blob_path(&self, repo: &str, digest: &Digest) -> PathBuf {
        self.blob_dir(repo).join(digest.as_str())
    }

    fn manifest_dir(&self, repo: &str) -> PathBuf {
        self.root.join(MANIFESTS_DIR).join(repo)
    }

    fn manifest_path(&self, repo: &str, digest: &Digest) -> PathBuf {
        self.manifest_dir(repo).join(digest.as_str())
    }

    fn tag_dir(&self, repo: &str) -> PathBuf {
        self.root.join(TAGS_DIR).join(repo)
    }

    fn tag_path(&self, repo: &str, tag: &str) -> PathBuf {
        self.tag_dir(repo).join(tag)
    }

    fn referrer_dir(&self, repo: &str) -> PathBuf {
        self.root.join(REFERRERS_DIR).join(repo)
    }

    fn referrer_path(&self, repo: &str, subject: &Digest) -> PathBuf {
        self.referrer_dir(repo).join(subject.as_str())
    }

    pub fn upload_dir(&self, repo: &str) -> PathBuf {
        self.root.join("uploads").join(repo)
    }

    /// Exposes the final blob path so the upload coordinator can rename a
    /// staging file directly into place on completion without duplicating
    /// the layout logic.
    pub fn blob_path_for(&self, repo: &str, digest: &Digest) -> PathBuf {
        self.blob_path(repo, digest)
    }

    // ---------------------------------------------------------------- blobs

    pub async fn has_blob(&self, repo: &str, digest: &Digest) -> Result<(bool, u64)> {
        match fs::metadata(self.blob_path(repo, digest)).await {
            Ok(meta) => Ok((true, meta.len())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok((false, 0)),
            Err(e) => Err(crate::error::io_error(OciErrorCode::BlobUnknown, e)),
        }
    }

    pub async fn get_blob(&self, repo: &str, digest: &Digest) -> Result<(fs::File, u64)> {
        let path = self.blob_path(repo, digest);
        let file = fs::File::open(&path)
            .await
            .map_err(|_| RegistryError::blob_unknown("blob not found"))?;
        let meta = file
            .metadata()
            .await
            .map_err(|e| crate::error::io_error(OciErrorCode::BlobUnknown, e))?;
        Ok((file, meta.len()))
    }

    /// Streams `reader` through a SHA-256 hasher into a temp file beside the
    /// final path, then renames atomically. Fails with `DigestInvalid` and
    /// removes the temp file if the computed digest doesn't match `digest`.
    pub async fn put_blob(
        &self,
        repo: &str,
        digest: &Digest,
        reader: impl AsyncRead + Unpin,
    ) -> Result<()> {
        let dir = self.blob_dir(repo);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| crate::error::io_error(OciErrorCode::BlobUploadInvalid, e))?;

        let temp_path = dir.join(format!("temp-blob-{}", uuid::Uuid::new_v4()));
        let actual = hash_stream_to_file(reader, &temp_path).await;
        let actual = match actual {
            Ok(actual) => actual,
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                return Err(e);
            }
        };

        if &actual != digest {
            let _ = fs::remove_file(&temp_path).await;
            return Err(RegistryError::digest_invalid(format!(
                "digest mismatch: expected {digest}, got {actual}"
            )));
        }

        fs::rename(&temp_path, self.blob_path(repo, digest))
            .await
            .map_err(|e| crate::error::io_error(OciErrorCode::BlobUploadInvalid, e))?;
        Ok(())
    }

    pub async fn delete_blob(&self, repo: &str, digest: &Digest) -> Result<()> {
        fs::remove_file(self.blob_path(repo, digest))
            .await
            .map_err(|_| RegistryError::blob_unknown("blob not found"))
    }

    /// Hard-links `digest` from `from_repo` into `to_repo`, falling back to a
    /// byte copy when the link fails (e.g. cross-device); the partial
    /// destination is removed on copy failure.
    pub async fn mount_blob(&self, from_repo: &str, to_repo: &str, digest: &Digest) -> Result<()> {
        let source = self.blob_path(from_repo, digest);
        if fs::metadata(&source).await.is_err() {
            return Err(RegistryError::blob_unknown("source blob not found"));
        }

        let dest_dir = self.blob_dir(to_repo);
        fs::create_dir_all(&dest_dir)
            .await
            .map_err(|e| crate::error::io_error(OciErrorCode::BlobUploadInvalid, e))?;
        let dest = self.blob_path(to_repo, digest);

        if fs::metadata(&dest).await.is_ok() {
            return Ok(());
        }

        if fs::hard_link(&source, &dest).await.is_ok() {
            return Ok(());
        }

        if let Err(e) = fs::copy(&source, &dest).await {
            let _ = fs::remove_file(&dest).await;
            return Err(crate::error::io_error(OciErrorCode::BlobUploadInvalid, e));
        }
        Ok(())
    }

    // ----------------------------------------------------------- manifests

    /// Resolves `reference` to a digest: direct if it's already `sha256:...`,
    /// otherwise by reading the tag file.
    async fn resolve_reference(&self, repo: &str, reference: &str) -> Result<Digest> {
        if Digest::looks_like_digest(reference) {
            return Digest::parse(reference);
        }
        validate_path_component(reference, "tag")?;
        let raw = fs::read_to_string(self.tag_path(repo, reference))
            .await
            .map_err(|_| RegistryError::manifest_unknown("tag not found"))?;
        Digest::parse(raw.trim())
    }

    /// Returns `(exists, size, resolved_digest)`. `resolved_digest` is `None`
    /// only when `reference` is a tag name that doesn't exist at all.
    pub async fn has_manifest(
        &self,
        repo: &str,
        reference: &str,
    ) -> Result<(bool, u64, Option<Digest>)> {
        let digest = if Digest::looks_like_digest(reference) {
            Digest::parse(reference)?
        } else {
            validate_path_component(reference, "tag")?;
            match fs::read_to_string(self.tag_path(repo, reference)).await {
                Ok(raw) => Digest::parse(raw.trim())?,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((false, 0, None)),
                Err(e) => return Err(crate::error::io_error(OciErrorCode::ManifestUnknown, e)),
            }
        };

        match fs::metadata(self.manifest_path(repo, &digest)).await {
            Ok(meta) => Ok((true, meta.len(), Some(digest))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok((false, 0, Some(digest))),
            Err(e) => Err(crate::error::io_error(OciErrorCode::ManifestUnknown, e)),
        }
    }

    /// Fetches a manifest by tag or digest.
    ///
    /// For a `sha256:...` reference whose manifest file is missing by that
    /// name, falls back to walking `manifests/<repo>/` and hashing each
    /// candidate file — a pragmatic recovery path for operators who seed
    /// manifests out-of-band (spec.md §4.1, §9 Open Question). This walk is
    /// O(N) and is accepted as a best-effort, possibly-stale read.
    pub async fn get_manifest(&self, repo: &str, reference: &str) -> Result<ManifestContent> {
        if Digest::looks_like_digest(reference) {
            let digest = Digest::parse(reference)?;
            let path = self.manifest_path(repo, &digest);
            match fs::read(&path).await {
                Ok(bytes) => return Ok(ManifestContent { bytes, digest }),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return self.find_manifest_by_walk(repo, &digest).await;
                }
                Err(e) => return Err(crate::error::io_error(OciErrorCode::ManifestUnknown, e)),
            }
        }

        let digest = self.resolve_reference(repo, reference).await?;
        let path = self.manifest_path(repo, &digest);
        let bytes = fs::read(&path)
            .await
            .map_err(|_| RegistryError::manifest_unknown("manifest not found"))?;
        Ok(ManifestContent { bytes, digest })
    }

    async fn find_manifest_by_walk(&self, repo: &str, want: &Digest) -> Result<ManifestContent> {
        let dir = self.manifest_dir(repo);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(_) => return Err(RegistryError::manifest_unknown("manifest not found")),
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            if !entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            if let Ok(bytes) = fs::read(entry.path()).await {
                if &Digest::of(&bytes) == want {
                    return Ok(ManifestContent {
                        bytes,
                        digest: want.clone(),
                    });
                }
            }
        }

        Err(RegistryError::manifest_unknown("manifest not found"))
    }

    /// Hashes `bytes`, writes them under `manifests/<repo>/<digest>`, and —
    /// if `reference` isn't itself a digest — (re)writes the tag file to
    /// point at the new digest.
    pub async fn put_manifest(&self, repo: &str, reference: &str, bytes: &[u8]) -> Result<Digest> {
        let digest = Digest::of(bytes);

        let manifest_dir = self.manifest_dir(repo);
        fs::create_dir_all(&manifest_dir)
            .await
            .map_err(|e| crate::error::io_error(OciErrorCode::ManifestInvalid, e))?;

        write_atomic(&self.manifest_path(repo, &digest), bytes)
            .await
            .map_err(|e| crate::error::io_error(OciErrorCode::ManifestInvalid, e))?;

        if !Digest::looks_like_digest(reference) {
            validate_path_component(reference, "tag")?;
            let tag_dir = self.tag_dir(repo);
            fs::create_dir_all(&tag_dir)
                .await
                .map_err(|e| crate::error::io_error(OciErrorCode::ManifestInvalid, e))?;
            write_atomic(&self.tag_path(repo, reference), digest.as_str().as_bytes())
                .await
                .map_err(|e| crate::error::io_error(OciErrorCode::ManifestInvalid, e))?;
        }

        Ok(digest)
    }

    /// Digest path: removes the manifest and every tag that pointed at it
    /// (best-effort; scan failures are logged, not fatal). Tag path: removes
    /// only the tag, leaving the manifest untouched.
    pub async fn delete_manifest(&self, repo: &str, reference: &str) -> Result<()> {
        if Digest::looks_like_digest(reference) {
            let digest = Digest::parse(reference)?;
            fs::remove_file(self.manifest_path(repo, &digest))
                .await
                .map_err(|_| RegistryError::manifest_unknown("manifest not found"))?;

            if let Err(e) = self.remove_tags_pointing_at(repo, &digest).await {
                tracing::warn!(error = %e, repo, digest = %digest, "failed to clean up tags for deleted manifest");
            }
            return Ok(());
        }

        validate_path_component(reference, "tag")?;
        fs::remove_file(self.tag_path(repo, reference))
            .await
            .map_err(|_| RegistryError::manifest_unknown("tag not found"))
    }

    async fn remove_tags_pointing_at(&self, repo: &str, digest: &Digest) -> std::io::Result<()> {
        let dir = self.tag_dir(repo);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Ok(contents) = fs::read_to_string(entry.path()).await {
                if contents.trim() == digest.as_str() {
                    fs::remove_file(entry.path()).await?;
                }
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------- tags

    /// Lists every tag in `repo`, unsorted — ordering/pagination is the
    /// protocol layer's job (spec.md §4.1).
    pub async fn list_tags(&self, repo: &str) -> Result<Vec<String>> {
        let dir = self.tag_dir(repo);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(crate::error::io_error(OciErrorCode::NameUnknown, e)),
        };

        let mut tags = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| crate::error::io_error(OciErrorCode::NameUnknown, e))?
        {
            if entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
                if let Some(name) = entry.file_name().to_str() {
                    tags.push(name.to_string());
                }
            }
        }
        Ok(tags)
    }

    // ----------------------------------------------------------- referrers

    pub async fn get_referrers(
        &self,
        repo: &str,
        subject: &Digest,
        artifact_type_filter: Option<&str>,
    ) -> Result<Vec<u8>> {
        referrers::get_referrers(self, repo, subject, artifact_type_filter).await
    }

    pub async fn update_referrers(&self, repo: &str, manifest_bytes: &[u8]) -> Result<()> {
        referrers::update_referrers(self, repo, manifest_bytes).await
    }

    pub async fn remove_referrer(
        &self,
        repo: &str,
        subject: &Digest,
        manifest_digest: &Digest,
    ) -> Result<()> {
        referrers::remove_referrer(self, repo, subject, manifest_digest).await
    }

    pub(crate) fn referrer_dir_path(&self, repo: &str) -> PathBuf {
        self.referrer_dir(repo)
    }

    pub(crate) fn referrer_file_path(&self, repo: &str, subject: &Digest) -> PathBuf {
        self.referrer_path(repo, subject)
    }

    pub(crate) fn manifest_dir_path(&self, repo: &str) -> PathBuf {
        self.manifest_dir(repo)
    }
}

async fn hash_stream_to_file(mut reader: impl AsyncRead + Unpin, path: &Path) -> Result<Digest> {
    use sha2::{Digest as _, Sha256};

    let mut file = fs::File::create(path)
        .await
        .map_err(|e| crate::error::io_error(OciErrorCode::BlobUploadInvalid, e))?;

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| crate::error::io_error(OciErrorCode::BlobUploadInvalid, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        file.write_all(&buf[..n])
            .await
            .map_err(|e| crate::error::io_error(OciErrorCode::BlobUploadInvalid, e))?;
    }
    file.flush()
        .await
        .map_err(|e| crate::error::io_error(OciErrorCode::BlobUploadInvalid, e))?;

    Ok(Digest::from_raw(format!(
        "sha256:{}",
        hex::encode(hasher.finalize())
    )))
}

/// Write-to-temp + rename, same pattern as blob ingest, used for manifests
/// and tag pointers so a reader never observes a half-written file.
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().expect("path has a parent");
    let temp_path = dir.join(format!("temp-{}", uuid::Uuid::new_v4()));
    fs::write(&temp_path, bytes).await?;
    fs::rename(&temp_path, path).await
}

/// Extracts `mediaType` from a manifest JSON document, falling back to the
/// OCI image-manifest default (spec.md §3).
pub fn manifest_media_type(bytes: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(bytes)
        .ok()
        .and_then(|v| v.get("mediaType").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| DEFAULT_MANIFEST_MEDIA_TYPE.to_string())
}

/// Extracts `subject.digest` from a manifest JSON document, if present.
pub fn manifest_subject(bytes: &[u8]) -> Option<String> {
    let v: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    v.get("subject")?
        .get("digest")?
        .as_str()
        .map(str::to_string)
}

