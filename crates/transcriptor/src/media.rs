//! Media kinds, transcription languages and the upload allowlists.

use serde::{Deserialize, Serialize};

const AUDIO_EXTENSIONS: &[&str] = &[
    "aac", "mid", "mp3", "m4a", "ogg", "flac", "amr", "aiff", "mpeg", "wav",
];

const VIDEO_EXTENSIONS: &[&str] = &[
    "3gp", "mp4", "m4v", "mkv", "webm", "mov", "avi", "wmv", "mpg", "flv",
];

const AUDIO_MIME_TYPES: &[&str] = &[
    "audio/aac",
    "audio/midi",
    "audio/mpeg",
    "audio/mp4",
    "audio/ogg",
    "audio/x-flac",
    "audio/flac",
    "audio/x-wav",
    "audio/wav",
    "audio/amr",
    "audio/x-aiff",
];

const VIDEO_MIME_TYPES: &[&str] = &[
    "video/3gpp",
    "video/mp4",
    "video/x-m4v",
    "video/x-matroska",
    "video/webm",
    "video/quicktime",
    "video/x-msvideo",
    "video/x-ms-wmv",
    "video/mpeg",
    "video/x-flv",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "audio" => Some(MediaKind::Audio),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }

    /// Kind implied by a MIME type, if it is on the allowlist.
    pub fn from_mime_type(content_type: &str) -> Option<Self> {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if AUDIO_MIME_TYPES.contains(&essence.as_str()) {
            Some(MediaKind::Audio)
        } else if VIDEO_MIME_TYPES.contains(&essence.as_str()) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }

    pub fn allows_extension(&self, extension: &str) -> bool {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        match self {
            MediaKind::Audio => AUDIO_EXTENSIONS.contains(&ext.as_str()),
            MediaKind::Video => VIDEO_EXTENSIONS.contains(&ext.as_str()),
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns true if the extension belongs to any supported media kind.
pub fn is_supported_extension(extension: &str) -> bool {
    MediaKind::Audio.allows_extension(extension) || MediaKind::Video.allows_extension(extension)
}

/// Language the worker transcribes into.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    #[default]
    English,
    German,
    French,
    Spanish,
    Italian,
    Portuguese,
    Dutch,
    Japanese,
    Chinese,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::English => "english",
            Language::German => "german",
            Language::French => "french",
            Language::Spanish => "spanish",
            Language::Italian => "italian",
            Language::Portuguese => "portuguese",
            Language::Dutch => "dutch",
            Language::Japanese => "japanese",
            Language::Chinese => "chinese",
        }
    }

    /// ISO 639-1 code handed to the worker.
    pub fn code(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::German => "de",
            Language::French => "fr",
            Language::Spanish => "es",
            Language::Italian => "it",
            Language::Portuguese => "pt",
            Language::Dutch => "nl",
            Language::Japanese => "ja",
            Language::Chinese => "zh",
        }
    }

    /// Accepts either the stored name or the ISO code.
    pub fn parse(s: &str) -> Option<Self> {
        const ALL: &[Language] = &[
            Language::English,
            Language::German,
            Language::French,
            Language::Spanish,
            Language::Italian,
            Language::Portuguese,
            Language::Dutch,
            Language::Japanese,
            Language::Chinese,
        ];
        let needle = s.trim().to_ascii_lowercase();
        ALL.iter()
            .copied()
            .find(|l| l.as_str() == needle || l.code() == needle)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the client claims about an upload.
#[derive(Debug, Clone, Default)]
pub struct DeclaredMedia {
    /// Declared MIME type, e.g. `audio/mpeg`.
    pub content_type: String,
    /// Original filename, used for the extension and for listings.
    pub filename: Option<String>,
}

impl DeclaredMedia {
    pub fn new(content_type: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            filename: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// Resolves the kind and the extension to store the source under.
    ///
    /// The kind comes from the MIME type. The extension comes from the
    /// filename when it matches that kind, otherwise from the extensions
    /// registered for the MIME type.
    pub fn resolve(&self) -> Option<(MediaKind, String)> {
        let kind = MediaKind::from_mime_type(&self.content_type)?;

        let from_name = self
            .filename
            .as_deref()
            .and_then(|name| std::path::Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .filter(|ext| kind.allows_extension(ext));

        if let Some(ext) = from_name {
            return Some((kind, ext));
        }

        let essence = self.content_type.split(';').next().unwrap_or_default().trim();
        mime_guess::get_mime_extensions_str(essence)
            .into_iter()
            .flatten()
            .find(|ext| kind.allows_extension(ext))
            .map(|ext| (kind, ext.to_string()))
    }
}
