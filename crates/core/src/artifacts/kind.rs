use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Kind of artifact produced for a manuscript.
///
/// Serialized as its wire name (`line-editing`, `human-edit:{chapter}`, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ArtifactKind {
    Developmental,
    LineEditing,
    CopyEditing,
    BookDescription,
    Keywords,
    Categories,
    AuthorBio,
    BackMatter,
    AudiobookNarration,
    AudiobookPronunciation,
    AudiobookTiming,
    AudiobookSamples,
    AudiobookMetadata,
    /// Author-supplied revision of one chapter.
    HumanEdit(String),
}

/// Editorial chain, in execution order.
pub const EDITORIAL_KINDS: [ArtifactKind; 3] = [
    ArtifactKind::Developmental,
    ArtifactKind::LineEditing,
    ArtifactKind::CopyEditing,
];

/// Marketing assets (batch A of the assets pipeline).
pub const MARKETING_KINDS: [ArtifactKind; 5] = [
    ArtifactKind::BookDescription,
    ArtifactKind::Keywords,
    ArtifactKind::Categories,
    ArtifactKind::AuthorBio,
    ArtifactKind::BackMatter,
];

/// Audiobook production kit (batch B of the assets pipeline).
pub const AUDIOBOOK_KINDS: [ArtifactKind; 5] = [
    ArtifactKind::AudiobookNarration,
    ArtifactKind::AudiobookPronunciation,
    ArtifactKind::AudiobookTiming,
    ArtifactKind::AudiobookSamples,
    ArtifactKind::AudiobookMetadata,
];

const HUMAN_EDIT_PREFIX: &str = "human-edit:";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown artifact kind: {0}")]
pub struct UnknownKind(pub String);

impl ArtifactKind {
    pub fn as_str(&self) -> std::borrow::Cow<'static, str> {
        use std::borrow::Cow;
        let name = match self {
            Self::Developmental => "developmental",
            Self::LineEditing => "line-editing",
            Self::CopyEditing => "copy-editing",
            Self::BookDescription => "book-description",
            Self::Keywords => "keywords",
            Self::Categories => "categories",
            Self::AuthorBio => "author-bio",
            Self::BackMatter => "back-matter",
            Self::AudiobookNarration => "audiobook-narration",
            Self::AudiobookPronunciation => "audiobook-pronunciation",
            Self::AudiobookTiming => "audiobook-timing",
            Self::AudiobookSamples => "audiobook-samples",
            Self::AudiobookMetadata => "audiobook-metadata",
            Self::HumanEdit(chapter) => return Cow::Owned(format!("{HUMAN_EDIT_PREFIX}{chapter}")),
        };
        Cow::Borrowed(name)
    }

    /// Human-edit artifact for `chapter`. Chapters are short url-safe labels.
    pub fn human_edit(chapter: &str) -> Result<Self, UnknownKind> {
        let valid = !chapter.is_empty()
            && chapter.len() <= 64
            && chapter
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
        if valid {
            Ok(Self::HumanEdit(chapter.to_string()))
        } else {
            Err(UnknownKind(format!("{HUMAN_EDIT_PREFIX}{chapter}")))
        }
    }

    pub fn is_editorial(&self) -> bool {
        EDITORIAL_KINDS.contains(self)
    }

    pub fn is_marketing(&self) -> bool {
        MARKETING_KINDS.contains(self)
    }

    pub fn is_audiobook(&self) -> bool {
        AUDIOBOOK_KINDS.contains(self)
    }

    /// Whether an agent produces this kind (everything except human edits).
    pub fn is_generated(&self) -> bool {
        !matches!(self, Self::HumanEdit(_))
    }

    /// Suffix used in the artifact object key. `:` is not key-safe.
    pub fn key_suffix(&self) -> String {
        self.as_str().replace(':', "-")
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

impl FromStr for ArtifactKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(chapter) = s.strip_prefix(HUMAN_EDIT_PREFIX) {
            return Self::human_edit(chapter);
        }
        EDITORIAL_KINDS
            .iter()
            .chain(MARKETING_KINDS.iter())
            .chain(AUDIOBOOK_KINDS.iter())
            .find(|k| k.as_str() == s)
            .cloned()
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

impl Serialize for ArtifactKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_str())
    }
}

impl<'de> Deserialize<'de> for ArtifactKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
