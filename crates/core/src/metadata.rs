//! The Metadata Extractor Registry (C4): per-media-type extraction of
//! lightweight, inline-storable metadata (as distinct from the Artifact
//! Cache's larger generated blobs).

use crate::error::Result;
use serde_json::json;
use std::path::Path;

const TEXT_READ_CAP: usize = 1024 * 1024;
const TEXT_PREVIEW_THRESHOLD: usize = 10 * 1024;
const LYRICS_PREVIEW_CHARS: usize = 500;

pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;
    fn can_handle(&self, media_type: crate::types::MediaType) -> bool;
    fn extract(&self, source_path: &Path) -> Result<serde_json::Value>;
}

/// Text statistics and a bounded preview. Caps the read at [`TEXT_READ_CAP`]
/// bytes so a multi-gigabyte log file doesn't get fully buffered.
pub struct TextExtractor;

impl Extractor for TextExtractor {
    fn name(&self) -> &str {
        "text"
    }

    fn can_handle(&self, media_type: crate::types::MediaType) -> bool {
        matches!(media_type, crate::types::MediaType::Document)
    }

    fn extract(&self, source_path: &Path) -> Result<serde_json::Value> {
        let file_size = source_path.metadata().map(|m| m.len()).unwrap_or(0);
        let bytes = read_capped(source_path, TEXT_READ_CAP)?;
        let truncated = bytes.len() >= TEXT_READ_CAP;
        let (text, is_utf8) = match std::str::from_utf8(&bytes) {
            Ok(s) => (s.to_string(), true),
            Err(e) => (String::from_utf8_lossy(&bytes[..e.valid_up_to()]).into_owned(), false),
        };
        let encoding = if is_utf8 { "utf-8" } else { "utf-8 (lossy)" };

        let line_count = text.lines().count();
        let char_count = text.chars().count();
        let word_count = text.split_whitespace().count();

        // First TEXT_PREVIEW_THRESHOLD bytes, cut back to a char boundary.
        let mut cut = text.len().min(TEXT_PREVIEW_THRESHOLD);
        while cut > 0 && !text.is_char_boundary(cut) {
            cut -= 1;
        }
        let has_full_content = cut >= text.len();

        let mut fields = json!({
            "is_utf8": is_utf8,
            "encoding": encoding,
            "truncated": truncated,
            "line_count": line_count,
            "char_count": char_count,
            "word_count": word_count,
            "file_size": file_size,
            "has_full_content": has_full_content,
        });
        if has_full_content {
            fields["content"] = json!(text);
        } else {
            fields["preview"] = json!(&text[..cut]);
        }
        Ok(fields)
    }
}

/// Tag/artwork-presence extraction via `lofty`. Never embeds artwork bytes
/// in the returned JSON, only whether a picture is present.
pub struct AudioExtractor;

impl Extractor for AudioExtractor {
    fn name(&self) -> &str {
        "audio"
    }

    fn can_handle(&self, media_type: crate::types::MediaType) -> bool {
        matches!(media_type, crate::types::MediaType::Audio)
    }

    fn extract(&self, source_path: &Path) -> Result<serde_json::Value> {
        use lofty::file::TaggedFileExt;
        use lofty::prelude::*;
        use lofty::probe::Probe;

        let tagged = Probe::open(source_path)
            .map_err(|e| crate::error::CatalogError::internal(format!("lofty probe failed: {e}")))?
            .read()
            .map_err(|e| crate::error::CatalogError::internal(format!("lofty read failed: {e}")))?;

        let properties = tagged.properties();
        let duration_secs = properties.duration().as_secs_f64();
        let bitrate = properties.audio_bitrate();
        let sample_rate = properties.sample_rate();
        let channels = properties.channels();

        let tag = tagged.primary_tag().or_else(|| tagged.first_tag());
        let empty = AudioTagFields::default();
        let fields = tag.map(AudioTagFields::from_tag).unwrap_or(empty);

        Ok(json!({
            "duration_seconds": duration_secs,
            "bitrate_kbps": bitrate,
            "sample_rate_hz": sample_rate,
            "channels": channels,
            "title": fields.title,
            "artist": fields.artist,
            "album": fields.album,
            "album_artist": fields.album_artist,
            "composer": fields.composer,
            "genre": fields.genre,
            "year": fields.year,
            "track_number": fields.track_number,
            "disc_number": fields.disc_number,
            "comment": fields.comment,
            "has_artwork": fields.has_artwork,
            "artwork_mime_type": fields.artwork_mime_type,
            "artwork_size_bytes": fields.artwork_size_bytes,
            "lyrics_preview": fields.lyrics_preview,
            "has_full_lyrics": fields.has_full_lyrics,
        }))
    }
}

#[derive(Default)]
struct AudioTagFields {
    title: Option<String>,
    artist: Option<String>,
    album: Option<String>,
    album_artist: Option<String>,
    composer: Option<String>,
    genre: Option<String>,
    year: Option<u32>,
    track_number: Option<u32>,
    disc_number: Option<u32>,
    comment: Option<String>,
    has_artwork: bool,
    artwork_mime_type: Option<String>,
    artwork_size_bytes: Option<u64>,
    lyrics_preview: Option<String>,
    has_full_lyrics: bool,
}

impl AudioTagFields {
    fn from_tag(t: &lofty::tag::Tag) -> Self {
        use lofty::prelude::*;

        let lyrics = t.get_string(&ItemKey::Lyrics);
        let (lyrics_preview, has_full_lyrics) = match lyrics {
            Some(s) if s.chars().count() > LYRICS_PREVIEW_CHARS => {
                let cut = s.char_indices().nth(LYRICS_PREVIEW_CHARS).map(|(i, _)| i).unwrap_or(s.len());
                (Some(format!("{}…", &s[..cut])), true)
            }
            Some(s) => (Some(s.to_string()), false),
            None => (None, false),
        };

        let artwork = t.pictures().first();

        Self {
            title: t.title().map(|s| s.to_string()),
            artist: t.artist().map(|s| s.to_string()),
            album: t.album().map(|s| s.to_string()),
            album_artist: t.get_string(&ItemKey::AlbumArtist).map(|s| s.to_string()),
            composer: t.get_string(&ItemKey::Composer).map(|s| s.to_string()),
            genre: t.genre().map(|s| s.to_string()),
            year: t.year(),
            track_number: t.track(),
            disc_number: t.disk(),
            comment: t.comment().map(|s| s.to_string()),
            has_artwork: artwork.is_some(),
            artwork_mime_type: artwork.and_then(|p| p.mime_type()).map(|m| m.to_string()),
            artwork_size_bytes: artwork.map(|p| p.data().len() as u64),
            lyrics_preview,
            has_full_lyrics,
        }
    }
}

fn read_capped(path: &Path, cap: usize) -> Result<Vec<u8>> {
    use std::io::Read;
    let mut f = std::fs::File::open(path)?;
    let mut buf = vec![0u8; cap];
    let mut total = 0;
    loop {
        let n = f.read(&mut buf[total..])?;
        if n == 0 {
            break;
        }
        total += n;
        if total == cap {
            break;
        }
    }
    buf.truncate(total);
    Ok(buf)
}

pub struct MetadataExtractorRegistry {
    extractors: Vec<Box<dyn Extractor>>,
}

impl MetadataExtractorRegistry {
    pub fn new() -> Self {
        Self { extractors: vec![Box::new(TextExtractor), Box::new(AudioExtractor)] }
    }

    pub fn extract(&self, source_path: &Path, media_type: crate::types::MediaType) -> Result<Option<serde_json::Value>> {
        for ext in &self.extractors {
            if ext.can_handle(media_type) {
                return Ok(Some(ext.extract(source_path)?));
            }
        }
        Ok(None)
    }
}

impl Default for MetadataExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MediaType;

    #[test]
    fn text_extractor_counts_lines_and_words() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "hello world\nsecond line\n").unwrap();
        let extractor = TextExtractor;
        let v = extractor.extract(&path).unwrap();
        assert_eq!(v["line_count"], 2);
        assert_eq!(v["word_count"], 4);
        assert_eq!(v["is_utf8"], true);
        assert_eq!(v["has_full_content"], true);
        assert_eq!(v["content"], "hello world\nsecond line\n");
        assert!(v.get("preview").is_none());
    }

    #[test]
    fn text_extractor_caps_large_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.txt");
        let data = vec![b'x'; TEXT_READ_CAP + 10];
        std::fs::write(&path, &data).unwrap();
        let v = TextExtractor.extract(&path).unwrap();
        assert_eq!(v["truncated"], true);
        assert_eq!(v["file_size"], (TEXT_READ_CAP + 10) as u64);
        assert_eq!(v["has_full_content"], false);
        assert_eq!(v["preview"].as_str().unwrap().len(), TEXT_PREVIEW_THRESHOLD);
    }

    #[test]
    fn registry_has_no_extractor_for_image() {
        let registry = MetadataExtractorRegistry::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jpg");
        std::fs::write(&path, b"\xff\xd8\xff").unwrap();
        let v = registry.extract(&path, MediaType::Image).unwrap();
        assert!(v.is_none());
    }
}
