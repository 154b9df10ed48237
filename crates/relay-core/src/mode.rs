use std::fmt;

use serde::{Deserialize, Serialize};

/// Operation kind of an inbound request, derived once from its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayMode {
    Unknown,
    ChatCompletions,
    Completions,
    Embeddings,
    Moderations,
    ImagesGenerations,
    Edits,
    AudioSpeech,
    AudioTranscription,
    AudioTranslation,
}

/// Handler family a mode is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerGroup {
    Text,
    Image,
    Audio,
}

const PREFIX_TABLE: &[(&str, RelayMode)] = &[
    ("/v1/chat/completions", RelayMode::ChatCompletions),
    ("/v1/completions", RelayMode::Completions),
    ("/v1/embeddings", RelayMode::Embeddings),
];

const TAIL_PREFIX_TABLE: &[(&str, RelayMode)] = &[
    ("/v1/moderations", RelayMode::Moderations),
    ("/v1/images/generations", RelayMode::ImagesGenerations),
    ("/v1/edits", RelayMode::Edits),
    ("/v1/audio/speech", RelayMode::AudioSpeech),
    ("/v1/audio/transcriptions", RelayMode::AudioTranscription),
    ("/v1/audio/translations", RelayMode::AudioTranslation),
];

impl RelayMode {
    /// Maps a request path to its mode. Unmatched paths are `Unknown`.
    ///
    /// Order matters: the `embeddings` suffix rule (engine-scoped routes such as
    /// `/v1/engines/{model}/embeddings`) is checked before the remaining prefixes.
    pub fn from_path(path: &str) -> Self {
        if let Some(mode) = match_prefix(PREFIX_TABLE, path) {
            return mode;
        }
        if path.ends_with("embeddings") {
            return RelayMode::Embeddings;
        }
        match_prefix(TAIL_PREFIX_TABLE, path).unwrap_or(RelayMode::Unknown)
    }

    pub fn group(self) -> HandlerGroup {
        match self {
            RelayMode::ImagesGenerations => HandlerGroup::Image,
            RelayMode::AudioSpeech
            | RelayMode::AudioTranslation
            | RelayMode::AudioTranscription => HandlerGroup::Audio,
            _ => HandlerGroup::Text,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RelayMode::Unknown => "unknown",
            RelayMode::ChatCompletions => "chat_completions",
            RelayMode::Completions => "completions",
            RelayMode::Embeddings => "embeddings",
            RelayMode::Moderations => "moderations",
            RelayMode::ImagesGenerations => "images_generations",
            RelayMode::Edits => "edits",
            RelayMode::AudioSpeech => "audio_speech",
            RelayMode::AudioTranscription => "audio_transcription",
            RelayMode::AudioTranslation => "audio_translation",
        }
    }
}

impl fmt::Display for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn match_prefix(table: &[(&str, RelayMode)], path: &str) -> Option<RelayMode> {
    table
        .iter()
        .find(|(prefix, _)| path.starts_with(prefix))
        .map(|(_, mode)| *mode)
}
