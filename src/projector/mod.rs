//! Item projection.
//!
//! Turns one [`Paper`] into the complete set of items that represent it in the
//! table: one per category, one per distinct author, one per extracted
//! keyword, and a single canonical item carrying the full record plus a
//! back-reference to every other item. Projection is pure and deterministic;
//! nothing here touches the store.

use std::collections::HashSet;

use crate::keys::{self, ValidationError};
use crate::keywords::{KeywordExtractor, StopwordExtractor};
use crate::models::{CanonicalPayload, Item, ItemKind, ItemPayload, KeyRef, Paper};

/// Every item derived from one paper, canonical item last.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedItems {
    pub paper_id: String,

    /// Category, author and keyword items in that order, then the canonical item
    pub items: Vec<Item>,
}

impl ProjectedItems {
    /// The canonical item.
    pub fn canonical(&self) -> &Item {
        // Constructed only by ItemProjector, which always pushes the canonical item last
        &self.items[self.items.len() - 1]
    }

    /// All denormalized items (everything but the canonical item).
    pub fn index_items(&self) -> &[Item] {
        &self.items[..self.items.len() - 1]
    }

    /// Keys of the denormalized items, as stored in the canonical back-reference.
    pub fn index_keys(&self) -> Vec<KeyRef> {
        self.index_items().iter().map(Item::key_ref).collect()
    }

    /// Number of items of one kind.
    pub fn count(&self, kind: ItemKind) -> usize {
        self.items.iter().filter(|item| item.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Projects papers onto their item set.
#[derive(Debug, Clone)]
pub struct ItemProjector<K: KeywordExtractor = StopwordExtractor> {
    extractor: K,
}

impl Default for ItemProjector<StopwordExtractor> {
    fn default() -> Self {
        Self::new(StopwordExtractor::default())
    }
}

impl<K: KeywordExtractor> ItemProjector<K> {
    pub fn new(extractor: K) -> Self {
        Self { extractor }
    }

    /// Project a paper onto its items.
    ///
    /// Categories are de-duplicated as given, authors by normalized name, so
    /// one paper never writes two items into the same partition. The id is
    /// trimmed and the publication time truncated to whole seconds before
    /// anything is built, so keys and payloads always agree.
    ///
    /// # Arguments
    /// * `paper` - The paper to project
    ///
    /// # Returns
    /// `|categories| + |distinct authors| + |keywords| + 1` items, canonical last
    ///
    /// # Errors
    /// Returns `ValidationError` when the id is blank, when authors or
    /// categories are empty or contain blank entries, or when the publication
    /// date cannot be rendered in the sort key format.
    pub fn project(&self, paper: &Paper) -> Result<ProjectedItems, ValidationError> {
        let id = paper.id.trim();
        if id.is_empty() {
            return Err(ValidationError::EmptyField("id"));
        }
        if paper.authors.is_empty() {
            return Err(ValidationError::MissingAuthors(id.to_string()));
        }
        if paper.categories.is_empty() {
            return Err(ValidationError::MissingCategories(id.to_string()));
        }

        let paper = Paper {
            id: id.to_string(),
            published: keys::truncate_to_seconds(&paper.published),
            ..paper.clone()
        };
        let id = paper.id.as_str();

        let summary = paper.to_summary();
        let summary_item = |kind: ItemKind, key: keys::KeyPair| Item {
            pk: key.pk,
            sk: key.sk,
            kind,
            paper_id: id.to_string(),
            payload: ItemPayload::Summary(summary.clone()),
        };

        let mut items = Vec::new();

        let mut seen_categories = HashSet::new();
        for category in &paper.categories {
            let key = keys::category_key(category, &paper.published, id)?;
            if seen_categories.insert(key.pk.clone()) {
                items.push(summary_item(ItemKind::Category, key));
            }
        }

        let mut seen_authors = HashSet::new();
        for author in &paper.authors {
            let key = keys::author_key(author, &paper.published, id)?;
            if seen_authors.insert(key.pk.clone()) {
                items.push(summary_item(ItemKind::Author, key));
            }
        }

        let mut keywords = Vec::new();
        for keyword in self.extractor.extract(&paper.abstract_text) {
            let keyword = keys::normalize_text(&keyword);
            if keyword.is_empty() || keywords.contains(&keyword) {
                continue;
            }
            let key = keys::keyword_key(&keyword, &paper.published, id)?;
            items.push(summary_item(ItemKind::Keyword, key));
            keywords.push(keyword);
        }

        let index_keys = items.iter().map(Item::key_ref).collect();
        let canonical = keys::canonical_key(id)?;
        items.push(Item {
            pk: canonical.pk,
            sk: canonical.sk,
            kind: ItemKind::Canonical,
            paper_id: id.to_string(),
            payload: ItemPayload::Canonical(CanonicalPayload {
                paper: paper.to_detail(keywords),
                index_keys,
            }),
        });

        Ok(ProjectedItems {
            paper_id: id.to_string(),
            items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    /// Extractor with a fixed answer, independent of the abstract.
    struct FixedKeywords(Vec<&'static str>);

    impl KeywordExtractor for FixedKeywords {
        fn extract(&self, _text: &str) -> Vec<String> {
            self.0.iter().map(|k| k.to_string()).collect()
        }
    }

    fn paper(id: &str) -> Paper {
        Paper {
            id: id.to_string(),
            title: "Sparse Transformers".to_string(),
            authors: vec!["Ada Lovelace".to_string(), "Alan Turing".to_string()],
            categories: vec!["cs.LG".to_string(), "cs.AI".to_string()],
            published: Utc.with_ymd_and_hms(2023, 1, 15, 9, 0, 0).unwrap(),
            abstract_text: "Sparse attention makes transformers cheaper.".to_string(),
        }
    }

    #[test]
    fn test_item_counts_match_paper_shape() {
        let projector = ItemProjector::new(FixedKeywords(vec!["sparse", "attention", "transformer"]));
        let projected = projector.project(&paper("2301.00001")).unwrap();

        assert_eq!(projected.count(ItemKind::Category), 2);
        assert_eq!(projected.count(ItemKind::Author), 2);
        assert_eq!(projected.count(ItemKind::Keyword), 3);
        assert_eq!(projected.count(ItemKind::Canonical), 1);
        assert_eq!(projected.len(), 2 + 2 + 3 + 1);
    }

    #[test]
    fn test_canonical_is_last_and_references_every_other_item() {
        let projector = ItemProjector::new(FixedKeywords(vec!["sparse"]));
        let projected = projector.project(&paper("2301.00001")).unwrap();

        let canonical = projected.canonical();
        assert_eq!(canonical.kind, ItemKind::Canonical);
        assert_eq!(canonical.pk, "PAPER#2301.00001");

        let payload = canonical.canonical().unwrap();
        assert_eq!(payload.index_keys, projected.index_keys());
        assert_eq!(payload.index_keys.len(), projected.len() - 1);
        assert_eq!(payload.paper.keywords, vec!["sparse"]);
    }

    #[test]
    fn test_every_item_carries_paper_id_and_date_sort_key() {
        let projector = ItemProjector::new(FixedKeywords(vec!["sparse"]));
        let projected = projector.project(&paper("2301.00001")).unwrap();

        for item in projected.index_items() {
            assert_eq!(item.paper_id, "2301.00001");
            assert_eq!(item.sk, "2023-01-15T09:00:00Z#2301.00001");
            assert_eq!(item.summary().title, "Sparse Transformers");
        }
    }

    #[test]
    fn test_duplicate_authors_and_categories_collapse() {
        let mut p = paper("2301.00002");
        p.authors = vec!["Ada Lovelace".into(), "ada  LOVELACE".into()];
        p.categories = vec!["cs.LG".into(), "cs.LG".into()];

        let projector = ItemProjector::new(FixedKeywords(vec![]));
        let projected = projector.project(&p).unwrap();

        assert_eq!(projected.count(ItemKind::Author), 1);
        assert_eq!(projected.count(ItemKind::Category), 1);
        assert_eq!(projected.len(), 3);
    }

    #[test]
    fn test_empty_abstract_projects_no_keyword_items() {
        let mut p = paper("2301.00003");
        p.abstract_text = String::new();

        let projected = ItemProjector::default().project(&p).unwrap();
        assert_eq!(projected.count(ItemKind::Keyword), 0);
        assert!(projected.canonical().canonical().unwrap().paper.keywords.is_empty());
    }

    #[test]
    fn test_missing_required_fields_rejected() {
        let projector = ItemProjector::default();

        let mut no_authors = paper("a");
        no_authors.authors.clear();
        assert_eq!(
            projector.project(&no_authors),
            Err(ValidationError::MissingAuthors("a".into()))
        );

        let mut no_categories = paper("b");
        no_categories.categories.clear();
        assert_eq!(
            projector.project(&no_categories),
            Err(ValidationError::MissingCategories("b".into()))
        );

        assert_eq!(
            projector.project(&paper("  ")),
            Err(ValidationError::EmptyField("id"))
        );

        let mut blank_author = paper("c");
        blank_author.authors.push(" ".into());
        assert_eq!(
            projector.project(&blank_author),
            Err(ValidationError::EmptyField("author"))
        );
    }

    #[test]
    fn test_payloads_match_their_keys() {
        let mut p = paper("  2301.00005 ");
        p.published = Utc.with_ymd_and_hms(2023, 1, 15, 9, 0, 0).unwrap()
            + chrono::Duration::milliseconds(900);

        let projected = ItemProjector::new(FixedKeywords(vec!["sparse"])).project(&p).unwrap();
        let expected_published = Utc.with_ymd_and_hms(2023, 1, 15, 9, 0, 0).unwrap();

        assert_eq!(projected.paper_id, "2301.00005");
        let detail = &projected.canonical().canonical().unwrap().paper;
        assert_eq!(detail.id, "2301.00005");
        assert_eq!(detail.published, expected_published);
        for item in projected.index_items() {
            assert_eq!(item.sk, "2023-01-15T09:00:00Z#2301.00005");
            assert_eq!(item.summary().id, "2301.00005");
            assert_eq!(item.summary().published, expected_published);
        }
    }

    #[test]
    fn test_projection_is_deterministic() {
        let projector = ItemProjector::default();
        let p = paper("2301.00004");
        assert_eq!(projector.project(&p).unwrap(), projector.project(&p).unwrap());
    }

    #[test]
    fn test_ten_papers_produce_fifty_items() {
        // 2 categories + 1 author + 1 keyword + canonical = 5 items each
        let projector = ItemProjector::new(FixedKeywords(vec!["graphs"]));
        let total: usize = (0..10)
            .map(|i| {
                let mut p = paper(&format!("2301.1000{}", i));
                p.authors = vec!["Grace Hopper".into()];
                projector.project(&p).unwrap().len()
            })
            .sum();
        assert_eq!(total, 50);
    }
}
