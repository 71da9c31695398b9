use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::config::IdScheme;
use crate::verse::Verse;

/// Stable id for a verse location: first 16 bytes of the SHA256 of
/// `book:chapter:verse`, hex encoded.
pub fn location_id(book: u32, chapter: u32, verse: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{book}:{chapter}:{verse}").as_bytes());
    let digest = hasher.finalize();

    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}

/// Maps vector ids to row offsets in a verse table and back.
#[derive(Debug, Clone)]
pub enum IdResolver {
    Offset,
    Location(HashMap<String, usize>),
}

impl IdResolver {
    pub fn new<'a>(scheme: IdScheme, verses: impl Iterator<Item = &'a Verse>) -> Self {
        match scheme {
            IdScheme::Offset => IdResolver::Offset,
            IdScheme::Location => IdResolver::Location(
                verses
                    .enumerate()
                    .filter_map(|(offset, v)| {
                        Some((location_id(v.book?, v.chapter?, v.verse?), offset))
                    })
                    .collect(),
            ),
        }
    }

    /// Id for the row at `offset`.
    pub fn id_for(scheme: IdScheme, offset: usize, verse: &Verse) -> Option<String> {
        match scheme {
            IdScheme::Offset => Some(offset.to_string()),
            IdScheme::Location => Some(location_id(verse.book?, verse.chapter?, verse.verse?)),
        }
    }

    pub fn resolve(&self, id: &str) -> Option<usize> {
        match self {
            IdResolver::Offset => id.parse().ok(),
            IdResolver::Location(ids) => ids.get(id).copied(),
        }
    }
}
