//! Group assignment for search results
//!
//! Decides which groups a search item is published under (per-infohash
//! overrides, country labels, remapped categories), whether it is published
//! at all, and in which order the resulting blocks appear.

use std::collections::HashMap;
use std::str::FromStr;

use crate::models::{PlaylistEntry, SearchItem};
use crate::services::locale;

/// Several upstream categories published under one label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryRemap {
    pub label: String,
    pub sources: Vec<String>,
}

/// Label forced onto specific infohashes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfohashOverride {
    pub label: String,
    pub infohashes: Vec<String>,
}

/// Order of search-derived blocks in the document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupOrder {
    /// Upstream page order
    #[default]
    Source,
    /// Remapped categories, then countries, then everything else
    Grouped,
}

impl FromStr for GroupOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "source" | "upstream" => Ok(Self::Source),
            "grouped" | "group" => Ok(Self::Grouped),
            other => Err(format!("unknown group order '{}'", other)),
        }
    }
}

/// `Label=a|b;Other=c` pairs, blanks removed
pub fn parse_label_map(raw: &str) -> Vec<(String, Vec<String>)> {
    raw.split(';')
        .filter_map(|pair| {
            let (label, values) = pair.split_once('=')?;
            let label = label.trim();
            let values: Vec<String> = values
                .split('|')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect();
            (!label.is_empty() && !values.is_empty()).then(|| (label.to_string(), values))
        })
        .collect()
}

pub fn default_category_remap() -> Vec<CategoryRemap> {
    locale::CATEGORY_LABELS
        .iter()
        .map(|(source, label)| CategoryRemap {
            label: label.to_string(),
            sources: vec![source.to_string()],
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct GroupingRules {
    pub category_remap: Vec<CategoryRemap>,
    pub category_overrides: Vec<InfohashOverride>,
    pub country_overrides: Vec<InfohashOverride>,
    /// Drop items matching no known country, remapped category or override
    pub known_only: bool,
    pub order: GroupOrder,
}

impl Default for GroupingRules {
    fn default() -> Self {
        Self {
            category_remap: default_category_remap(),
            category_overrides: Vec::new(),
            country_overrides: Vec::new(),
            known_only: false,
            order: GroupOrder::Source,
        }
    }
}

impl GroupingRules {
    fn remapped(&self, category: &str) -> Option<&str> {
        let category = category.trim();
        self.category_remap
            .iter()
            .find(|r| r.sources.iter().any(|s| s.eq_ignore_ascii_case(category)))
            .map(|r| r.label.as_str())
    }

    /// Group labels for one item, or `None` when the item is filtered out
    ///
    /// Labels may repeat; callers deduplicate.
    pub fn labels_for(&self, item: &SearchItem, infohash: &str) -> Option<Vec<String>> {
        let mut labels: Vec<String> = self
            .category_overrides
            .iter()
            .chain(&self.country_overrides)
            .filter(|o| o.infohashes.iter().any(|h| h.eq_ignore_ascii_case(infohash)))
            .map(|o| o.label.clone())
            .collect();
        let overridden = !labels.is_empty();

        let mut known = false;
        for code in item.countries.iter().filter(|c| !c.trim().is_empty()) {
            match locale::country_label(code) {
                Some(label) => {
                    known = true;
                    labels.push(label.to_string());
                }
                None if !self.known_only => labels.push(code.trim().to_uppercase()),
                None => {}
            }
        }

        for category in &item.categories {
            if let Some(label) = self.remapped(category) {
                known = true;
                labels.push(label.to_string());
            }
        }

        if self.known_only && !known && !overridden {
            return None;
        }
        Some(labels)
    }

    /// Reorder entries per [`GroupOrder`]
    ///
    /// Grouped order splits multi-group entries into one entry per group so
    /// every block lands with its group. The sort is stable: within a group,
    /// upstream order is kept.
    pub fn order(&self, entries: Vec<PlaylistEntry>) -> Vec<PlaylistEntry> {
        if self.order == GroupOrder::Source {
            return entries;
        }

        let mut leftovers: HashMap<String, usize> = HashMap::new();
        let mut ranked: Vec<((u8, usize), PlaylistEntry)> = Vec::new();

        for entry in entries {
            for group in &entry.groups {
                let remap = self.category_remap.iter().position(|r| &r.label == group);
                let country = locale::COUNTRY_LABELS
                    .iter()
                    .position(|(_, label)| *label == group.as_str());
                let rank = match (remap, country) {
                    (Some(i), _) => (0, i),
                    (None, Some(i)) => (1, i),
                    (None, None) => {
                        let next = leftovers.len();
                        (2, *leftovers.entry(group.clone()).or_insert(next))
                    }
                };

                let single = PlaylistEntry {
                    groups: vec![group.clone()],
                    ..entry.clone()
                };
                ranked.push((rank, single));
            }
        }

        ranked.sort_by_key(|(rank, _)| *rank);
        ranked.into_iter().map(|(_, entry)| entry).collect()
    }
}
