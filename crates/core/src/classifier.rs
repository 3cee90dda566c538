//! The Classifier Registry (C3): a generator trait with a primary
//! external-process implementation and an always-available in-process
//! fallback, following the teacher's primary/fallback feature-gating
//! pattern (semantic search falls back to grep relevance in codescope).

use crate::error::{CatalogError, Result};
use std::io::Cursor;
use std::path::Path;
use std::process::Command;

/// Characters rejected at the shell boundary before a path reaches
/// `Command::arg`. `Command` never invokes a shell itself, but generators
/// that might later format a command line (or hand the path to a tool
/// that does) must not see these.
const SHELL_METACHARACTERS: &[char] = &[';', '|', '&', '$', '`', '<', '>', '!'];

pub fn reject_shell_metacharacters(path: &str) -> Result<()> {
    if let Some(c) = path.chars().find(|c| SHELL_METACHARACTERS.contains(c)) {
        return Err(CatalogError::invalid(format!("path contains rejected shell metacharacter '{c}'")));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct GeneratedArtifact {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub generator: String,
}

pub trait Generator: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this generator claims to handle the given media type / extension.
    fn can_handle(&self, media_type: crate::types::MediaType) -> bool;

    /// Whether the generator's runtime dependency (an external binary, typically)
    /// is actually present. Checked once at registry construction and cached.
    fn is_available(&self) -> bool;

    fn generate_thumbnail(&self, source_path: &Path) -> Result<GeneratedArtifact>;

    fn generate_timeline_frame(&self, source_path: &Path, offset_seconds: f64) -> Result<GeneratedArtifact>;
}

/// Shells out to `ffmpeg` for thumbnails and timeline frames of video/audio.
pub struct FfmpegGenerator {
    available: bool,
}

impl FfmpegGenerator {
    pub fn probe() -> Self {
        let available = Command::new("ffmpeg")
            .arg("-version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        Self { available }
    }

    fn run_extract(&self, source_path: &Path, seek: Option<f64>) -> Result<GeneratedArtifact> {
        let path_str = source_path.to_string_lossy();
        reject_shell_metacharacters(&path_str)?;

        let tmp = tempfile::Builder::new().suffix(".jpg").tempfile()?;
        let tmp_path = tmp.path().to_path_buf();

        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-y");
        if let Some(s) = seek {
            cmd.arg("-ss").arg(format!("{s}"));
        }
        cmd.arg("-i").arg(source_path);
        cmd.args(["-frames:v", "1", "-q:v", "3"]);
        cmd.arg(&tmp_path);

        let output = cmd.output().map_err(|e| CatalogError::unavailable(format!("ffmpeg spawn failed: {e}")))?;
        if !output.status.success() {
            return Err(CatalogError::internal(format!(
                "ffmpeg exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        let bytes = std::fs::read(&tmp_path)?;
        Ok(GeneratedArtifact { bytes, mime_type: "image/jpeg".to_string(), generator: self.name().to_string() })
    }
}

impl Generator for FfmpegGenerator {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn can_handle(&self, media_type: crate::types::MediaType) -> bool {
        matches!(media_type, crate::types::MediaType::Video | crate::types::MediaType::Image)
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn generate_thumbnail(&self, source_path: &Path) -> Result<GeneratedArtifact> {
        self.run_extract(source_path, Some(0.0))
    }

    fn generate_timeline_frame(&self, source_path: &Path, offset_seconds: f64) -> Result<GeneratedArtifact> {
        self.run_extract(source_path, Some(offset_seconds))
    }
}

/// In-process fallback built on the `image` crate. Always available; used
/// when no external generator can handle the media type, or claims
/// availability but fails at runtime.
pub struct ImageRsGenerator;

const PLACEHOLDER_COLOR: [u8; 3] = [128, 128, 128];

impl ImageRsGenerator {
    fn decode_and_thumbnail(&self, source_path: &Path) -> Result<GeneratedArtifact> {
        let bytes = std::fs::read(source_path)?;
        let decoded = image::load_from_memory(&bytes);
        let rgb = match decoded {
            Ok(img) => img.thumbnail(256, 256).to_rgb8(),
            Err(_) => {
                let mut buf = image::RgbImage::new(256, 256);
                for px in buf.pixels_mut() {
                    *px = image::Rgb(PLACEHOLDER_COLOR);
                }
                buf
            }
        };
        let mut out = Cursor::new(Vec::new());
        rgb.write_to(&mut out, image::ImageFormat::Jpeg)
            .map_err(|e| CatalogError::internal(format!("jpeg encode failed: {e}")))?;
        Ok(GeneratedArtifact { bytes: out.into_inner(), mime_type: "image/jpeg".to_string(), generator: self.name().to_string() })
    }
}

impl Generator for ImageRsGenerator {
    fn name(&self) -> &str {
        "image-rs"
    }

    /// The terminal fallback: claims every media type so `candidates()`
    /// never comes up empty, even when the source is video/audio/document
    /// and `ffmpeg` is unavailable. `decode_and_thumbnail` degrades to a
    /// placeholder when it can't actually decode the bytes.
    fn can_handle(&self, _media_type: crate::types::MediaType) -> bool {
        true
    }

    fn is_available(&self) -> bool {
        true
    }

    fn generate_thumbnail(&self, source_path: &Path) -> Result<GeneratedArtifact> {
        self.decode_and_thumbnail(source_path)
    }

    /// Still images have no timeline; produce the same thumbnail regardless of offset.
    fn generate_timeline_frame(&self, source_path: &Path, _offset_seconds: f64) -> Result<GeneratedArtifact> {
        self.decode_and_thumbnail(source_path)
    }
}

/// Ordered list of candidate generators for a media type; the first
/// available one wins, falling through to the next on runtime failure.
pub struct ClassifierRegistry {
    generators: Vec<Box<dyn Generator>>,
}

impl ClassifierRegistry {
    pub fn new() -> Self {
        Self { generators: vec![Box::new(FfmpegGenerator::probe()), Box::new(ImageRsGenerator)] }
    }

    pub fn with_generators(generators: Vec<Box<dyn Generator>>) -> Self {
        Self { generators }
    }

    fn candidates(&self, media_type: crate::types::MediaType) -> impl Iterator<Item = &Box<dyn Generator>> {
        self.generators.iter().filter(move |g| g.can_handle(media_type) && g.is_available())
    }

    pub fn generate_thumbnail(
        &self,
        source_path: &Path,
        media_type: crate::types::MediaType,
    ) -> Result<GeneratedArtifact> {
        let mut last_err = None;
        for gen in self.candidates(media_type) {
            match gen.generate_thumbnail(source_path) {
                Ok(artifact) => return Ok(artifact),
                Err(e) => {
                    tracing::warn!(generator = gen.name(), error = %e, "thumbnail generator failed, trying next");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| CatalogError::unavailable(format!("no generator available for {:?}", media_type))))
    }

    pub fn generate_timeline_frame(
        &self,
        source_path: &Path,
        media_type: crate::types::MediaType,
        offset_seconds: f64,
    ) -> Result<GeneratedArtifact> {
        let mut last_err = None;
        for gen in self.candidates(media_type) {
            match gen.generate_timeline_frame(source_path, offset_seconds) {
                Ok(artifact) => return Ok(artifact),
                Err(e) => {
                    tracing::warn!(generator = gen.name(), error = %e, "frame generator failed, trying next");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| CatalogError::unavailable(format!("no generator available for {:?}", media_type))))
    }
}

impl Default for ClassifierRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MediaType;

    struct AlwaysFails;
    impl Generator for AlwaysFails {
        fn name(&self) -> &str {
            "always-fails"
        }
        fn can_handle(&self, _m: MediaType) -> bool {
            true
        }
        fn is_available(&self) -> bool {
            true
        }
        fn generate_thumbnail(&self, _p: &Path) -> Result<GeneratedArtifact> {
            Err(CatalogError::internal("boom"))
        }
        fn generate_timeline_frame(&self, _p: &Path, _o: f64) -> Result<GeneratedArtifact> {
            Err(CatalogError::internal("boom"))
        }
    }

    #[test]
    fn falls_back_to_next_generator_on_failure() {
        let registry = ClassifierRegistry::with_generators(vec![Box::new(AlwaysFails), Box::new(ImageRsGenerator)]);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-an-image.bin");
        std::fs::write(&path, b"not a real image").unwrap();
        let artifact = registry.generate_thumbnail(&path, MediaType::Image).unwrap();
        assert_eq!(artifact.generator, "image-rs");
    }

    #[test]
    fn rejects_shell_metacharacters() {
        assert!(reject_shell_metacharacters("/tmp/evil; rm -rf /").is_err());
        assert!(reject_shell_metacharacters("/tmp/fine-name.jpg").is_ok());
    }

    #[test]
    fn unavailable_media_type_surfaces_error() {
        let registry = ClassifierRegistry::with_generators(vec![]);
        let err = registry.generate_thumbnail(Path::new("/x"), MediaType::Audio).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Unavailable);
    }
}
