//! Referrer index maintenance: the reverse map from a subject digest to the
//! manifests that declare it via `subject.digest` (spec.md §3, §4.1).

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::digest::Digest;
use crate::error::{OciErrorCode, Result};

use super::{manifest_media_type, manifest_subject, ContentStore};

const INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferrerDescriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub size: u64,
    pub digest: String,
    #[serde(rename = "artifactType", skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<std::collections::BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ReferrerIndex {
    #[serde(rename = "schemaVersion")]
    schema_version: u32,
    #[serde(rename = "mediaType")]
    media_type: String,
    manifests: Vec<ReferrerDescriptor>,
}

impl Default for ReferrerIndex {
    fn default() -> Self {
        Self {
            schema_version: 2,
            media_type: INDEX_MEDIA_TYPE.to_string(),
            manifests: Vec::new(),
        }
    }
}

fn descriptor_for(manifest_bytes: &[u8]) -> ReferrerDescriptor {
    let value: serde_json::Value =
        serde_json::from_slice(manifest_bytes).unwrap_or(serde_json::Value::Null);

    let artifact_type = value
        .get("artifactType")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .or_else(|| {
            value
                .get("config")
                .and_then(|c| c.get("mediaType"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        });

    let annotations = value.get("annotations").and_then(|a| a.as_object()).map(|obj| {
        obj.iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect::<std::collections::BTreeMap<_, _>>()
    });
    let annotations = annotations.filter(|m| !m.is_empty());

    ReferrerDescriptor {
        media_type: manifest_media_type(manifest_bytes),
        size: manifest_bytes.len() as u64,
        digest: Digest::of(manifest_bytes).into_string(),
        artifact_type,
        annotations,
    }
}

async fn load_index(path: &std::path::Path) -> Option<ReferrerIndex> {
    let bytes = fs::read(path).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

async fn save_index(path: &std::path::Path, index: &ReferrerIndex) -> Result<()> {
    let bytes = serde_json::to_vec(index).expect("referrer index always serializes");
    fs::write(path, bytes)
        .await
        .map_err(|e| crate::error::io_error(OciErrorCode::ManifestUnknown, e))
}

/// Reads the cached index if present; otherwise builds it by walking
/// `manifests/<repo>/`, hashing and parsing each candidate (spec.md §4.1,
/// §9: "O(N) and may race with concurrent writes... accept stale reads").
/// The built index is cached to disk. If `artifact_type_filter` is set, the
/// *returned* bytes are filtered to matching descriptors without touching
/// the cached file.
pub async fn get_referrers(
    store: &ContentStore,
    repo: &str,
    subject: &Digest,
    artifact_type_filter: Option<&str>,
) -> Result<Vec<u8>> {
    fs::create_dir_all(store.referrer_dir_path(repo))
        .await
        .map_err(|e| crate::error::io_error(OciErrorCode::ManifestUnknown, e))?;

    let cache_path = store.referrer_file_path(repo, subject);

    let index = match load_index(&cache_path).await {
        Some(index) => index,
        None => {
            let built = build_index_by_walk(store, repo, subject).await?;
            if let Err(e) = save_index(&cache_path, &built).await {
                tracing::warn!(error = %e, repo, subject = %subject, "failed to cache referrer index");
            }
            built
        }
    };

    let filtered = match artifact_type_filter {
        Some(at) if !at.is_empty() => ReferrerIndex {
            manifests: index
                .manifests
                .into_iter()
                .filter(|d| d.artifact_type.as_deref() == Some(at))
                .collect(),
            ..index
        },
        _ => index,
    };

    Ok(serde_json::to_vec(&filtered).expect("referrer index always serializes"))
}

async fn build_index_by_walk(
    store: &ContentStore,
    repo: &str,
    subject: &Digest,
) -> Result<ReferrerIndex> {
    let dir = store.manifest_dir_path(repo);
    let mut index = ReferrerIndex::default();

    let mut entries = match fs::read_dir(&dir).await {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(index),
        Err(e) => return Err(crate::error::io_error(OciErrorCode::ManifestUnknown, e)),
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        if !entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }
        let Ok(bytes) = fs::read(entry.path()).await else {
            continue;
        };
        if manifest_subject(&bytes).as_deref() == Some(subject.as_str()) {
            index.manifests.push(descriptor_for(&bytes));
        }
    }

    Ok(index)
}

/// Upserts a descriptor for `manifest_bytes` into its subject's cached
/// index, keyed by the manifest's own digest. A no-op if the manifest
/// carries no `subject`.
pub async fn update_referrers(
    store: &ContentStore,
    repo: &str,
    manifest_bytes: &[u8],
) -> Result<()> {
    let Some(subject_str) = manifest_subject(manifest_bytes) else {
        return Ok(());
    };
    let subject = Digest::parse(&subject_str)?;

    fs::create_dir_all(store.referrer_dir_path(repo))
        .await
        .map_err(|e| crate::error::io_error(OciErrorCode::ManifestUnknown, e))?;

    let cache_path = store.referrer_file_path(repo, &subject);
    let mut index = load_index(&cache_path).await.unwrap_or_default();

    let descriptor = descriptor_for(manifest_bytes);
    match index.manifests.iter_mut().find(|d| d.digest == descriptor.digest) {
        Some(existing) => *existing = descriptor,
        None => index.manifests.push(descriptor),
    }

    save_index(&cache_path, &index).await
}

/// Removes the descriptor for `manifest_digest` from `subject`'s cached
/// index. A missing index file is not an error.
pub async fn remove_referrer(
    store: &ContentStore,
    repo: &str,
    subject: &Digest,
    manifest_digest: &Digest,
) -> Result<()> {
    let cache_path = store.referrer_file_path(repo, subject);
    let Some(mut index) = load_index(&cache_path).await else {
        return Ok(());
    };

    index.manifests.retain(|d| d.digest != manifest_digest.as_str());
    save_index(&cache_path, &index).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_falls_back_to_config_media_type_for_artifact_type() {
        let manifest = br#"{"mediaType":"application/vnd.oci.image.manifest.v1+json","config":{"mediaType":"application/vnd.example.config.v1+json"}}"#;
        let d = descriptor_for(manifest);
        assert_eq!(d.artifact_type.as_deref(), Some("application/vnd.example.config.v1+json"));
    }

    #[test]
    fn descriptor_prefers_explicit_artifact_type() {
        let manifest = br#"{"artifactType":"application/vnd.example.sig.v1","config":{"mediaType":"ignored"}}"#;
        let d = descriptor_for(manifest);
        assert_eq!(d.artifact_type.as_deref(), Some("application/vnd.example.sig.v1"));
    }

    #[test]
    fn empty_annotations_are_dropped() {
        let manifest = br#"{"annotations":{}}"#;
        let d = descriptor_for(manifest);
        assert!(d.annotations.is_none());
    }
}
