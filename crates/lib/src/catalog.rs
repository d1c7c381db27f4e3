//! Static property catalog and lexical matching against reply text.
//!
//! A listing matches a text when enough distinct significant words of its title and
//! address occur in that text. Significant: alphanumeric runs of at least three
//! characters, not a stopword, and longer than three characters when counted.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

/// Photos attached from one listing at most.
pub const MAX_PHOTOS: usize = 4;

/// Minimum score for a listing to be a candidate at all.
pub const MIN_MATCH_SCORE: usize = 2;

/// Score from which a candidate counts as a strong match.
pub const STRONG_MATCH_SCORE: usize = 3;

const STOPWORDS: &[&str] = &[
    "en", "de", "la", "el", "y", "o", "con", "por", "para", "un", "una", "del", "las", "los",
];

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("could not read catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid catalog {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// One catalog entry, as produced by the listings scraper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyListing {
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub price: Option<String>,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub photos: Vec<String>,
    #[serde(default)]
    pub agent_name: Option<String>,
    #[serde(default)]
    pub agent_phone: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub features: serde_json::Value,
}

impl PropertyListing {
    /// Photos to attach, in stored order, capped at `MAX_PHOTOS`.
    pub fn attachable_photos(&self) -> Vec<String> {
        self.photos.iter().take(MAX_PHOTOS).cloned().collect()
    }

    /// Distinct significant words of title and address, in first-seen order.
    pub fn keywords(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for text in [&self.title, &self.address] {
            for word in significant_words(text) {
                if seen.insert(word.clone()) {
                    out.push(word);
                }
            }
        }
        out
    }

    /// Number of keywords contained in `text` (case-insensitive substring test).
    pub fn score(&self, text: &str) -> usize {
        let haystack = text.to_lowercase();
        self.keywords()
            .iter()
            .filter(|w| haystack.contains(w.as_str()))
            .count()
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

fn significant_words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| w.chars().count() > 3 && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// A candidate listing with its score against some text.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyMatch<'a> {
    pub listing: &'a PropertyListing,
    pub score: usize,
}

impl PropertyMatch<'_> {
    pub fn is_strong(&self) -> bool {
        self.score >= STRONG_MATCH_SCORE
    }
}

/// Read-only catalog shared by all requests.
#[derive(Debug, Clone, Default)]
pub struct PropertyCatalog {
    listings: Vec<PropertyListing>,
}

impl PropertyCatalog {
    pub fn from_listings(listings: Vec<PropertyListing>) -> Self {
        Self { listings }
    }

    /// Load the listings JSON array at `path`.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let listings: Vec<PropertyListing> =
            serde_json::from_str(&raw).map_err(|source| CatalogError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        log::info!("catalog: loaded {} listings from {}", listings.len(), path.display());
        Ok(Self { listings })
    }

    /// Load when a path is configured; a missing or unreadable catalog is logged and
    /// yields an empty one (photos and listing details are then never attached).
    pub fn load_or_empty(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            log::warn!("catalog: no property catalog configured, photos disabled");
            return Self::default();
        };
        match Self::load(path) {
            Ok(catalog) => catalog,
            Err(e) => {
                log::warn!("catalog: {}, photos disabled", e);
                Self::default()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }

    pub fn listings(&self) -> &[PropertyListing] {
        &self.listings
    }

    /// Candidates (score >= `MIN_MATCH_SCORE`) for `text`, best first; ties keep catalog order.
    pub fn matches(&self, text: &str) -> Vec<PropertyMatch<'_>> {
        let mut out: Vec<PropertyMatch<'_>> = self
            .listings
            .iter()
            .map(|listing| PropertyMatch {
                listing,
                score: listing.score(text),
            })
            .filter(|m| m.score >= MIN_MATCH_SCORE)
            .collect();
        out.sort_by(|a, b| b.score.cmp(&a.score));
        out
    }

    pub fn best_match(&self, text: &str) -> Option<PropertyMatch<'_>> {
        self.matches(text).into_iter().next()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn listing(title: &str, address: &str, photos: usize) -> PropertyListing {
        PropertyListing {
            title: title.to_string(),
            price: Some("$4,500,000 MXN".to_string()),
            address: address.to_string(),
            photos: (0..photos)
                .map(|i| format!("https://cdn.example.com/{}/{}.jpg", title.len(), i))
                .collect(),
            agent_name: Some("Laura Méndez".to_string()),
            agent_phone: Some("+529981234567".to_string()),
            ..Default::default()
        }
    }

    pub(crate) fn sample_catalog() -> PropertyCatalog {
        PropertyCatalog::from_listings(vec![
            listing("Casa en Residencial Lagos del Sol", "Calle Cormoranes, Cancún", 6),
            listing("Departamento Puerto Cancún", "Avenida Bonampak, Cancún", 3),
            listing("Oficina en Plaza Mayor", "Centro, Mérida", 2),
        ])
    }

    #[test]
    fn keywords_skip_stopwords_and_short_words() {
        let l = listing("Casa en Residencial Lagos del Sol", "Calle Sol", 0);
        assert_eq!(
            l.keywords(),
            vec!["casa", "residencial", "lagos", "calle"]
        );
    }

    #[test]
    fn single_keyword_is_not_a_candidate() {
        let catalog = sample_catalog();
        assert!(catalog.matches("Tenemos una casa muy bonita").is_empty());
    }

    #[test]
    fn strong_match_ranks_first() {
        let catalog = sample_catalog();
        let reply = "Te recomiendo la casa en Residencial Lagos del Sol, sobre la calle Cormoranes.";
        let found = catalog.matches(reply);
        assert_eq!(found[0].listing.title, "Casa en Residencial Lagos del Sol");
        assert!(found[0].is_strong());
    }

    #[test]
    fn photos_are_capped_in_stored_order() {
        let l = listing("Casa", "Calle", 6);
        let photos = l.attachable_photos();
        assert_eq!(photos.len(), MAX_PHOTOS);
        assert_eq!(photos[0], l.photos[0]);
        assert_eq!(photos[3], l.photos[3]);
    }

    #[test]
    fn price_accepts_string_or_number() {
        let listings: Vec<PropertyListing> = serde_json::from_str(
            r#"[{"title":"A","price":"$1,000"},{"title":"B","price":2500000},{"title":"C"}]"#,
        )
        .unwrap();
        assert_eq!(listings[0].price.as_deref(), Some("$1,000"));
        assert_eq!(listings[1].price.as_deref(), Some("2500000"));
        assert_eq!(listings[2].price, None);
    }

    #[test]
    fn missing_catalog_is_empty() {
        let catalog = PropertyCatalog::load_or_empty(Some(Path::new("/nonexistent/catalog.json")));
        assert!(catalog.is_empty());
    }
}
