//! Core data models for the paper store.
//!
//! This module contains the logical record (`Paper`), the shapes returned to
//! readers (`PaperSummary`, `PaperDetail`), and the physical unit written to the
//! key-value table (`Item`) together with its tagged payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical paper record as produced by ingestion.
///
/// A paper is immutable once projected: any change goes through a full
/// re-projection and delete-then-reinsert of its item set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Paper {
    /// Stable external identifier (e.g. an arXiv id such as `2301.01234v1`)
    pub id: String,

    /// Paper title
    pub title: String,

    /// Authors in publication order (must not be empty)
    pub authors: Vec<String>,

    /// Subject categories such as `cs.LG` (must not be empty)
    pub categories: Vec<String>,

    /// Publication timestamp (UTC)
    pub published: DateTime<Utc>,

    /// Abstract text, possibly empty
    #[serde(default)]
    pub abstract_text: String,
}

impl Paper {
    /// Build the detail view of this paper with its derived keywords.
    pub fn to_detail(&self, keywords: Vec<String>) -> PaperDetail {
        PaperDetail {
            id: self.id.clone(),
            title: self.title.clone(),
            authors: self.authors.clone(),
            categories: self.categories.clone(),
            published: self.published,
            abstract_text: self.abstract_text.clone(),
            keywords,
        }
    }

    /// Build the summary view of this paper.
    pub fn to_summary(&self) -> PaperSummary {
        PaperSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            authors: self.authors.clone(),
            categories: self.categories.clone(),
            published: self.published,
        }
    }
}

/// Summary returned by list-style queries (category, author, keyword).
///
/// Carries enough data to render a result row without a second lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaperSummary {
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub categories: Vec<String>,
    pub published: DateTime<Utc>,
}

/// Full paper view returned by a point lookup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaperDetail {
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    pub categories: Vec<String>,
    pub published: DateTime<Utc>,
    pub abstract_text: String,

    /// Keywords derived from the abstract at projection time
    pub keywords: Vec<String>,
}

impl PaperDetail {
    /// Project the detail down to its summary fields.
    pub fn to_summary(&self) -> PaperSummary {
        PaperSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            authors: self.authors.clone(),
            categories: self.categories.clone(),
            published: self.published,
        }
    }
}

/// Access pattern an item was written for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemKind {
    Category,
    Author,
    Keyword,
    Canonical,
}

impl ItemKind {
    /// Tag as stored in the table.
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Category => "CATEGORY",
            ItemKind::Author => "AUTHOR",
            ItemKind::Keyword => "KEYWORD",
            ItemKind::Canonical => "CANONICAL",
        }
    }

    /// Parse a stored tag.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "CATEGORY" => Some(ItemKind::Category),
            "AUTHOR" => Some(ItemKind::Author),
            "KEYWORD" => Some(ItemKind::Keyword),
            "CANONICAL" => Some(ItemKind::Canonical),
            _ => None,
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of a single item: its keys plus the access pattern it serves.
///
/// Used as the canonical item's back-reference list and in write reports.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyRef {
    pub pk: String,
    pub sk: String,
    pub kind: ItemKind,
}

impl std::fmt::Display for KeyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} / {}", self.kind, self.pk, self.sk)
    }
}

/// Payload of the `CANONICAL` item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalPayload {
    /// Full paper body
    pub paper: PaperDetail,

    /// Every denormalized item written for this paper
    pub index_keys: Vec<KeyRef>,
}

/// Item payload, tagged by shape rather than stored as an untyped blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ItemPayload {
    Canonical(CanonicalPayload),
    Summary(PaperSummary),
}

/// Physical unit stored in the key-value table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    /// Partition key (namespaced by access pattern)
    pub pk: String,

    /// Sort key (`{date}#{id}` for index items, `PAPER#{id}` for canonical)
    pub sk: String,

    /// Access pattern this item serves
    pub kind: ItemKind,

    /// Id of the paper the item belongs to, present on every item
    pub paper_id: String,

    pub payload: ItemPayload,
}

impl Item {
    /// Address of this item.
    pub fn key_ref(&self) -> KeyRef {
        KeyRef {
            pk: self.pk.clone(),
            sk: self.sk.clone(),
            kind: self.kind,
        }
    }

    /// Summary view regardless of payload shape.
    pub fn summary(&self) -> PaperSummary {
        match &self.payload {
            ItemPayload::Summary(summary) => summary.clone(),
            ItemPayload::Canonical(canonical) => canonical.paper.to_summary(),
        }
    }

    /// Canonical payload, if this is the canonical item.
    pub fn canonical(&self) -> Option<&CanonicalPayload> {
        match &self.payload {
            ItemPayload::Canonical(canonical) => Some(canonical),
            ItemPayload::Summary(_) => None,
        }
    }
}
