//! Variation Pool
//!
//! Interchangeable message texts and media items for one dispatch job. Each
//! recipient gets a randomly chosen text (and media, in media mode) so that a
//! campaign does not send byte-identical content to every number.

use crate::error::ConfigurationError;
use once_cell::sync::Lazy;
use rand::Rng;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Upper bound on media variants per job.
pub const MAX_MEDIA_VARIANTS: usize = 10;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([^{}]+)\}").expect("placeholder pattern is valid"));

/// A media attachment sent with an optional caption.
#[derive(Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub file_name: String,
}

impl fmt::Debug for MediaItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaItem")
            .field("file_name", &self.file_name)
            .field("mime_type", &self.mime_type)
            .field("len", &self.data.len())
            .finish()
    }
}

impl MediaItem {
    pub fn new(data: Vec<u8>, mime_type: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            data,
            mime_type: mime_type.into(),
            file_name: file_name.into(),
        }
    }

    /// Read a file from disk, inferring the MIME type from its extension.
    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let data = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "attachment".to_string());
        let mime_type = mime_from_extension(path).to_string();
        tracing::debug!(
            "Loaded media {} ({} bytes, {})",
            file_name,
            data.len(),
            mime_type
        );
        Ok(Self::new(data, mime_type, file_name))
    }
}

/// Best-effort MIME type for common WhatsApp attachment extensions.
pub fn mime_from_extension(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "3gp" => "video/3gpp",
        "mp3" => "audio/mpeg",
        "ogg" | "opus" => "audio/ogg",
        "m4a" => "audio/mp4",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "txt" => "text/plain",
        "csv" => "text/csv",
        _ => "application/octet-stream",
    }
}

/// Replace every `{key}` whose key is bound in `substitutions`.
///
/// Unknown placeholders are left verbatim. Substituted values are not scanned
/// again, so a value that itself looks like a placeholder is inserted as-is.
pub fn render(template: &str, substitutions: &BTreeMap<String, String>) -> String {
    if substitutions.is_empty() {
        return template.to_string();
    }
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match substitutions.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

#[derive(Debug, Clone)]
pub struct VariationPool {
    text_variants: Vec<String>,
    media_variants: Vec<MediaItem>,
    use_variations: bool,
    use_media: bool,
}

impl VariationPool {
    pub fn builder() -> VariationPoolBuilder {
        VariationPoolBuilder::default()
    }

    /// One fixed message, no media.
    pub fn single(text: impl Into<String>) -> Result<Self, ConfigurationError> {
        Self::builder().text(text).build()
    }

    /// Uniformly random text variant and its index.
    pub fn pick_text<R: Rng + ?Sized>(&self, rng: &mut R) -> (usize, &str) {
        let index = if self.text_variants.len() > 1 {
            rng.random_range(0..self.text_variants.len())
        } else {
            0
        };
        (index, self.text_variants[index].as_str())
    }

    /// Uniformly random media variant, or `None` outside media mode.
    pub fn pick_media<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<(usize, &MediaItem)> {
        if !self.use_media || self.media_variants.is_empty() {
            return None;
        }
        let index = rng.random_range(0..self.media_variants.len());
        Some((index, &self.media_variants[index]))
    }

    pub fn text_variants(&self) -> &[String] {
        &self.text_variants
    }

    pub fn media_variants(&self) -> &[MediaItem] {
        &self.media_variants
    }

    pub fn uses_variations(&self) -> bool {
        self.use_variations
    }

    pub fn uses_media(&self) -> bool {
        self.use_media
    }
}

#[derive(Debug, Clone, Default)]
pub struct VariationPoolBuilder {
    texts: Vec<String>,
    media: Vec<MediaItem>,
    use_variations: bool,
    use_media: bool,
}

impl VariationPoolBuilder {
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.texts.push(text.into());
        self
    }

    pub fn texts<I, S>(mut self, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.texts.extend(texts.into_iter().map(Into::into));
        self
    }

    pub fn media(mut self, item: MediaItem) -> Self {
        self.media.push(item);
        self
    }

    pub fn media_items(mut self, items: impl IntoIterator<Item = MediaItem>) -> Self {
        self.media.extend(items);
        self
    }

    pub fn use_variations(mut self, enabled: bool) -> Self {
        self.use_variations = enabled;
        self
    }

    pub fn use_media(mut self, enabled: bool) -> Self {
        self.use_media = enabled;
        self
    }

    pub fn build(self) -> Result<VariationPool, ConfigurationError> {
        let text_variants = if self.use_variations {
            let non_blank: Vec<String> = self
                .texts
                .into_iter()
                .filter(|t| !t.trim().is_empty())
                .collect();
            if non_blank.is_empty() {
                return Err(ConfigurationError::NoTextVariants);
            }
            non_blank
        } else {
            if self.texts.len() != 1 {
                return Err(ConfigurationError::SingleVariantRequired {
                    count: self.texts.len(),
                });
            }
            self.texts
        };

        let media_variants = if self.use_media {
            if self.media.is_empty() {
                return Err(ConfigurationError::NoMediaVariants);
            }
            if self.media.len() > MAX_MEDIA_VARIANTS {
                return Err(ConfigurationError::TooManyMediaVariants {
                    count: self.media.len(),
                    max: MAX_MEDIA_VARIANTS,
                });
            }
            if let Some(empty) = self.media.iter().find(|m| m.data.is_empty()) {
                return Err(ConfigurationError::EmptyMedia {
                    file_name: empty.file_name.clone(),
                });
            }
            self.media
        } else {
            Vec::new()
        };

        // A blank single text is only acceptable as an absent media caption
        if !self.use_media && text_variants.iter().all(|t| t.trim().is_empty()) {
            return Err(ConfigurationError::EmptyMessage);
        }

        Ok(VariationPool {
            text_variants,
            media_variants,
            use_variations: self.use_variations,
            use_media: self.use_media,
        })
    }
}
