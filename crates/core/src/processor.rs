//! The Processor (C5): resolves a resource URL to bytes on disk, then
//! dispatches to the classifier registry or metadata extractor registry
//! as appropriate, short-circuiting on an existing cache hit.

use crate::cache::{derive_hash, ArtifactCache};
use crate::classifier::ClassifierRegistry;
use crate::catalog::CatalogStore;
use crate::error::{CatalogError, Result};
use crate::metadata::MetadataExtractorRegistry;
use crate::types::{infer_media_type, Artifact, MediaType};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEFAULT_TIMELINE_FRAMES: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceUrl {
    File(PathBuf),
    Http(String),
    SynthesisNodes(String),
    SynthesisMetadata(String),
}

/// Parse the resource URL schemes named in the external interface: `file://`,
/// `http(s)://`, a bare path (treated as `file://`), and the two synthetic
/// schemes used by the classifier fallback chain. Any other `scheme://`
/// shape is rejected rather than silently treated as a file path.
pub fn parse_resource_url(raw: &str) -> Result<ResourceUrl> {
    if raw.is_empty() {
        return Err(CatalogError::invalid("empty resource URL"));
    }
    if let Some(rest) = raw.strip_prefix("file://") {
        return Ok(ResourceUrl::File(PathBuf::from(rest)));
    }
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Ok(ResourceUrl::Http(raw.to_string()));
    }
    if let Some(rest) = raw.strip_prefix("synthesis://nodes/") {
        return Ok(ResourceUrl::SynthesisNodes(rest.to_string()));
    }
    if let Some(rest) = raw.strip_prefix("synthesis://metadata/") {
        return Ok(ResourceUrl::SynthesisMetadata(rest.to_string()));
    }
    if let Some((scheme, _)) = raw.split_once("://") {
        return Err(CatalogError::invalid(format!("unknown resource URL scheme '{scheme}://'")));
    }
    Ok(ResourceUrl::File(PathBuf::from(raw)))
}

/// Stable identity string for a resource: the hash derivation input and the
/// artifact's recorded `source_path`. Distinct from the on-disk location
/// bytes are actually read from (`ResolvedResource::path`), which for
/// `http(s)://` resources is a throwaway temp file that differs every fetch.
fn resource_identity(url: &ResourceUrl) -> String {
    match url {
        ResourceUrl::File(p) => p.to_string_lossy().to_string(),
        ResourceUrl::Http(u) => u.clone(),
        ResourceUrl::SynthesisNodes(p) => format!("synthesis://nodes/{p}"),
        ResourceUrl::SynthesisMetadata(h) => format!("synthesis://metadata/{h}"),
    }
}

/// A resource resolved to bytes on disk. `_temp` keeps a downloaded file's
/// `NamedTempFile` alive for the duration of processing; dropping it removes
/// the file, including on every early-return failure path.
struct ResolvedResource {
    path: PathBuf,
    _temp: Option<tempfile::NamedTempFile>,
}

fn infer_any_media_type(identity: &str, resolved_path: &Path) -> Option<MediaType> {
    infer_media_type(identity).or_else(|| infer_media_type(&resolved_path.to_string_lossy()))
}

/// Default artifact types per media kind, applied when a caller of
/// `process_resource` doesn't specify `artifact_types` explicitly.
pub fn default_artifact_types(media_type: Option<MediaType>) -> Vec<String> {
    match media_type {
        Some(MediaType::Image) => vec!["thumbnail".to_string(), "metadata".to_string()],
        Some(MediaType::Video) => vec!["thumbnail".to_string(), "timeline".to_string(), "metadata".to_string()],
        _ => vec!["metadata".to_string()],
    }
}

pub struct ProcessOutcome {
    pub artifacts: Vec<Artifact>,
    pub errors: Vec<String>,
}

/// Request for the unified `process_resource` entry point the Batch Runner
/// and `catalog.process_resource` tool both drive.
pub struct ProcessResourceRequest {
    pub resource: String,
    pub mtime: i64,
    pub artifact_types: Option<Vec<String>>,
    pub timeline_duration_seconds: Option<f64>,
    pub timeline_frame_count: Option<usize>,
}

pub struct Processor {
    store: Arc<CatalogStore>,
    cache: Arc<ArtifactCache>,
    classifiers: Arc<ClassifierRegistry>,
    extractors: Arc<MetadataExtractorRegistry>,
}

impl Processor {
    pub fn new(
        store: Arc<CatalogStore>,
        cache: Arc<ArtifactCache>,
        classifiers: Arc<ClassifierRegistry>,
        extractors: Arc<MetadataExtractorRegistry>,
    ) -> Self {
        Self { store, cache, classifiers, extractors }
    }

    /// Resolve a parsed resource URL to bytes reachable by path: `file://`
    /// is used directly, `http(s)://` is fetched to a temp file, and the two
    /// `synthesis://` schemes resolve through the local filesystem or catalog.
    fn resolve(&self, url: &ResourceUrl) -> Result<ResolvedResource> {
        match url {
            ResourceUrl::File(p) => Ok(ResolvedResource { path: p.clone(), _temp: None }),
            ResourceUrl::Http(raw) => {
                let temp = download_to_tempfile(raw)?;
                let path = temp.path().to_path_buf();
                Ok(ResolvedResource { path, _temp: Some(temp) })
            }
            ResourceUrl::SynthesisNodes(rest) => {
                let path = PathBuf::from(rest);
                if !path.exists() {
                    return Err(CatalogError::not_found(format!("synthesis node path '{rest}' does not exist")));
                }
                Ok(ResolvedResource { path, _temp: None })
            }
            ResourceUrl::SynthesisMetadata(hash) => {
                let artifact = self
                    .store
                    .get_artifact(hash)?
                    .ok_or_else(|| CatalogError::not_found(format!("no artifact for synthesis metadata hash '{hash}'")))?;
                Ok(ResolvedResource { path: PathBuf::from(artifact.source_path), _temp: None })
            }
        }
    }

    /// Generate (or fetch from cache) the thumbnail artifact for one resource.
    pub fn process_thumbnail(&self, resource: &str, mtime: i64) -> Result<Artifact> {
        let url = parse_resource_url(resource)?;
        let identity = resource_identity(&url);
        let resolved = self.resolve(&url)?;
        let media_type = infer_any_media_type(&identity, &resolved.path)
            .ok_or_else(|| CatalogError::invalid(format!("could not infer media type for '{identity}'")))?;

        let hash = derive_hash(&identity, mtime);
        let filename = "thumb.jpg";

        if let Some(existing) = self.store.get_artifact(&hash)? {
            if self.cache.exists(&hash, filename)? {
                return Ok(existing);
            }
        }

        let generated = self.classifiers.generate_thumbnail(&resolved.path, media_type)?;
        let cache_path = self.cache.write(&hash, filename, &generated.bytes)?;
        let file_size = generated.bytes.len() as u64;

        let artifact = Artifact {
            hash: hash.clone(),
            source_path: identity,
            artifact_type: "thumbnail".to_string(),
            mime_type: generated.mime_type,
            cache_path: cache_path.to_string_lossy().to_string(),
            file_size,
            metadata_json: serde_json::json!({}),
            generator: generated.generator,
            created_at: now(),
        };
        self.store.upsert_artifact(&artifact)?;
        Ok(artifact)
    }

    /// Generate evenly-spaced timeline frames, keyed `<hash>-frame-<i>`.
    pub fn process_timeline(&self, resource: &str, mtime: i64, duration_seconds: f64, frame_count: Option<usize>) -> Result<ProcessOutcome> {
        let url = parse_resource_url(resource)?;
        let identity = resource_identity(&url);
        let resolved = self.resolve(&url)?;
        let media_type = infer_any_media_type(&identity, &resolved.path)
            .ok_or_else(|| CatalogError::invalid(format!("could not infer media type for '{identity}'")))?;

        let n = frame_count.unwrap_or(DEFAULT_TIMELINE_FRAMES).max(1);
        let base_hash = derive_hash(&identity, mtime);

        let mut artifacts = Vec::new();
        let mut errors = Vec::new();

        for i in 0..n {
            let offset = if n == 1 { 0.0 } else { duration_seconds * (i as f64) / ((n - 1) as f64) };
            let key = format!("{base_hash}-frame-{i}");
            let filename = "frame.jpg";

            let result = (|| -> Result<Artifact> {
                if let Some(existing) = self.store.get_artifact(&key)? {
                    if self.cache.exists(&key, filename)? {
                        return Ok(existing);
                    }
                }
                let generated = self.classifiers.generate_timeline_frame(&resolved.path, media_type, offset)?;
                let cache_path = self.cache.write(&key, filename, &generated.bytes)?;
                let artifact = Artifact {
                    hash: key.clone(),
                    source_path: identity.clone(),
                    artifact_type: "timeline_frame".to_string(),
                    mime_type: generated.mime_type,
                    cache_path: cache_path.to_string_lossy().to_string(),
                    file_size: generated.bytes.len() as u64,
                    metadata_json: serde_json::json!({ "offset_seconds": offset, "index": i }),
                    generator: generated.generator,
                    created_at: now(),
                };
                self.store.upsert_artifact(&artifact)?;
                Ok(artifact)
            })();

            match result {
                Ok(a) => artifacts.push(a),
                Err(e) => errors.push(format!("frame {i} at {offset:.2}s: {e}")),
            }
        }

        Ok(ProcessOutcome { artifacts, errors })
    }

    /// Extract lightweight metadata (text stats, audio tags) for a resource.
    pub fn process_metadata(&self, resource: &str, mtime: i64) -> Result<Option<Artifact>> {
        let url = parse_resource_url(resource)?;
        let identity = resource_identity(&url);
        let resolved = self.resolve(&url)?;
        let Some(media_type) = infer_any_media_type(&identity, &resolved.path) else {
            return Ok(None);
        };
        let hash = derive_hash(&identity, mtime);

        if let Some(existing) = self.store.get_artifact(&hash)? {
            if existing.artifact_type == "metadata" {
                return Ok(Some(existing));
            }
        }

        let Some(extracted) = self.extractors.extract(&resolved.path, media_type)? else {
            return Ok(None);
        };

        let size = resolved.path.metadata().map(|m| m.len()).unwrap_or(0);
        let artifact = Artifact {
            hash: hash.clone(),
            source_path: identity.clone(),
            artifact_type: "metadata".to_string(),
            mime_type: "application/json".to_string(),
            // Pure-metadata artifacts have no cache blob of their own; per
            // the artifact invariant, cache_path mirrors source_path.
            cache_path: identity,
            file_size: size,
            metadata_json: extracted,
            generator: "none".to_string(),
            created_at: now(),
        };
        self.store.upsert_artifact(&artifact)?;
        Ok(Some(artifact))
    }

    /// Unified entry point: resolve `request.resource` once, apply the
    /// per-media-kind default artifact-type set unless the caller overrides
    /// it, and run each requested type. The request as a whole only fails if
    /// the resource can't be resolved at all; per-type failures are collected
    /// in `ProcessOutcome::errors` instead of aborting the rest.
    pub fn process_resource(&self, request: ProcessResourceRequest) -> Result<ProcessOutcome> {
        let url = parse_resource_url(&request.resource)?;
        let identity = resource_identity(&url);
        let resolved = self.resolve(&url)?;
        let media_type = infer_any_media_type(&identity, &resolved.path);

        let types = request.artifact_types.unwrap_or_else(|| default_artifact_types(media_type));

        let mut artifacts = Vec::new();
        let mut errors = Vec::new();

        for artifact_type in &types {
            match artifact_type.as_str() {
                "thumbnail" => match self.process_thumbnail(&request.resource, request.mtime) {
                    Ok(a) => artifacts.push(a),
                    Err(e) => errors.push(format!("thumbnail: {e}")),
                },
                "timeline" => {
                    let duration = request.timeline_duration_seconds.unwrap_or(0.0);
                    match self.process_timeline(&request.resource, request.mtime, duration, request.timeline_frame_count) {
                        Ok(outcome) => {
                            artifacts.extend(outcome.artifacts);
                            errors.extend(outcome.errors);
                        }
                        Err(e) => errors.push(format!("timeline: {e}")),
                    }
                }
                "metadata" => match self.process_metadata(&request.resource, request.mtime) {
                    Ok(Some(a)) => artifacts.push(a),
                    Ok(None) => {}
                    Err(e) => errors.push(format!("metadata: {e}")),
                },
                other => errors.push(format!("unknown artifact type '{other}'")),
            }
        }

        Ok(ProcessOutcome { artifacts, errors })
    }
}

/// Download an `http(s)://` resource into a `NamedTempFile`. The temp file
/// is removed automatically (via `Drop`) on every early return below, and by
/// the caller once processing finishes, since it is never `persist`ed.
fn download_to_tempfile(url: &str) -> Result<tempfile::NamedTempFile> {
    let mut temp = tempfile::NamedTempFile::new()?;
    let response = reqwest::blocking::get(url).map_err(|e| CatalogError::unavailable(format!("http fetch of '{url}' failed: {e}")))?;
    if !response.status().is_success() {
        return Err(CatalogError::unavailable(format!("http fetch of '{url}' failed: status {}", response.status())));
    }
    let bytes = response.bytes().map_err(|e| CatalogError::unavailable(format!("http read of '{url}' failed: {e}")))?;
    temp.write_all(&bytes)?;
    temp.flush()?;
    Ok(temp)
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_resource_url_schemes() {
        assert_eq!(parse_resource_url("file:///a/b.jpg").unwrap(), ResourceUrl::File(PathBuf::from("/a/b.jpg")));
        assert_eq!(parse_resource_url("/bare/path.jpg").unwrap(), ResourceUrl::File(PathBuf::from("/bare/path.jpg")));
        assert!(matches!(parse_resource_url("https://example.com/x.jpg").unwrap(), ResourceUrl::Http(_)));
        assert_eq!(
            parse_resource_url("synthesis://nodes/abc").unwrap(),
            ResourceUrl::SynthesisNodes("abc".to_string())
        );
        assert!(parse_resource_url("").is_err());
    }

    #[test]
    fn rejects_unknown_scheme() {
        let err = parse_resource_url("ftp://host/x").unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::InvalidArgument);
    }

    #[test]
    fn timeline_default_frame_count_is_five() {
        assert_eq!(DEFAULT_TIMELINE_FRAMES, 5);
    }

    #[test]
    fn default_artifact_types_per_media_kind() {
        assert_eq!(default_artifact_types(Some(MediaType::Image)), vec!["thumbnail", "metadata"]);
        assert_eq!(default_artifact_types(Some(MediaType::Video)), vec!["thumbnail", "timeline", "metadata"]);
        assert_eq!(default_artifact_types(Some(MediaType::Audio)), vec!["metadata"]);
        assert_eq!(default_artifact_types(None), vec!["metadata"]);
    }

    #[test]
    fn metadata_artifact_cache_path_equals_source_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "hello world").unwrap();
        let store = Arc::new(CatalogStore::open_in_memory().unwrap());
        let cache = Arc::new(ArtifactCache::new(dir.path().join("cache")));
        let classifiers = Arc::new(ClassifierRegistry::new());
        let extractors = Arc::new(MetadataExtractorRegistry::new());
        let processor = Processor::new(store, cache, classifiers, extractors);
        let artifact = processor.process_metadata(&path.to_string_lossy(), 0).unwrap().unwrap();
        assert_eq!(artifact.cache_path, artifact.source_path);
    }

    #[test]
    fn synthesis_nodes_resolves_to_local_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "hello").unwrap();
        let store = Arc::new(CatalogStore::open_in_memory().unwrap());
        let cache = Arc::new(ArtifactCache::new(dir.path().join("cache")));
        let classifiers = Arc::new(ClassifierRegistry::new());
        let extractors = Arc::new(MetadataExtractorRegistry::new());
        let processor = Processor::new(store, cache, classifiers, extractors);
        let resource = format!("synthesis://nodes/{}", path.display());
        let artifact = processor.process_metadata(&resource, 0).unwrap().unwrap();
        assert_eq!(artifact.source_path, resource);
    }
}
