use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

use crate::books;

/// A single verse. Location fields are `None` only in text-only results.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Verse {
    pub book: Option<u32>,
    pub chapter: Option<u32>,
    pub verse: Option<u32>,
    pub text: String,
}

impl Verse {
    pub fn new(book: u32, chapter: u32, verse: u32, text: impl Into<String>) -> Self {
        Self {
            book: Some(book),
            chapter: Some(chapter),
            verse: Some(verse),
            text: text.into(),
        }
    }

    /// Same verse with the location fields dropped.
    pub fn text_only(&self) -> Self {
        Self {
            book: None,
            chapter: None,
            verse: None,
            text: self.text.clone(),
        }
    }

    /// Human readable citation, e.g. `John 3:16`.
    pub fn reference(&self) -> Option<String> {
        let (book, chapter, verse) = (self.book?, self.chapter?, self.verse?);
        let name = books::book_name(book).unwrap_or("Unknown");
        Some(format!("{name} {chapter}:{verse}"))
    }
}

/// One corpus row: a verse plus both of its embeddings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerseEmbeddings {
    pub book: u32,
    pub chapter: u32,
    pub verse: u32,
    pub text: String,
    pub remote_embedding: Vec<f32>,
    pub local_embedding: Vec<f32>,
}

impl VerseEmbeddings {
    pub fn verse(&self) -> Verse {
        Verse::new(self.book, self.chapter, self.verse, self.text.clone())
    }

    pub fn embedding(&self, embedding_type: EmbeddingType) -> &[f32] {
        match embedding_type {
            EmbeddingType::Remote => &self.remote_embedding,
            EmbeddingType::Local => &self.local_embedding,
        }
    }
}

/// Which embedding backend (and corpus column) a query goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingType {
    /// Remote embedding API (OpenAI ada-002 by default).
    Remote,
    /// Locally-run sentence embedding model.
    Local,
}

impl EmbeddingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingType::Remote => "remote",
            EmbeddingType::Local => "local",
        }
    }
}

impl Display for EmbeddingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("no such embedding: {0:?}")]
pub struct UnknownEmbeddingType(pub String);

impl FromStr for EmbeddingType {
    type Err = UnknownEmbeddingType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "remote" | "ada" | "openai" => Ok(EmbeddingType::Remote),
            "local" | "minilm" | "st" => Ok(EmbeddingType::Local),
            _ => Err(UnknownEmbeddingType(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_embedding_aliases() {
        assert_eq!("ada".parse::<EmbeddingType>().unwrap(), EmbeddingType::Remote);
        assert_eq!("MiniLM".parse::<EmbeddingType>().unwrap(), EmbeddingType::Local);
        assert_eq!(" local ".parse::<EmbeddingType>().unwrap(), EmbeddingType::Local);
    }

    #[test]
    fn unknown_embedding_type_is_rejected() {
        let err = "mpnet".parse::<EmbeddingType>().unwrap_err();
        assert_eq!(err.0, "mpnet");
    }

    #[test]
    fn text_only_drops_location() {
        let verse = Verse::new(43, 3, 16, "For God so loved the world");
        let projected = verse.text_only();
        assert_eq!(projected.book, None);
        assert_eq!(projected.chapter, None);
        assert_eq!(projected.verse, None);
        assert_eq!(projected.text, verse.text);
        assert_eq!(projected.reference(), None);
    }

    #[test]
    fn reference_uses_book_names() {
        assert_eq!(
            Verse::new(43, 3, 16, "").reference().as_deref(),
            Some("John 3:16")
        );
        assert_eq!(Verse::new(99, 1, 1, "").reference().as_deref(), Some("Unknown 1:1"));
    }
}
