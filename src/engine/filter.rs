//! Eligibility filter.
//!
//! Runs once per scanned item before any pricing. A name-mapping pass first
//! rewrites display names (so downstream lookups use market names), then the
//! blacklist / whitelist / map gate decides between `Rejected` and `Unpriced`.

use tracing::debug;

use crate::config::{FilterConfig, NameMapping};
use crate::types::{ItemKind, ItemSnapshot, ValuationState};

/// Why the filter rejected an item, recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterVerdict {
    Accept,
    Blacklisted(String),
    /// Map buying disabled or tier below the configured minimum.
    MapGate { tier: u32 },
}

impl FilterVerdict {
    pub fn state(&self) -> ValuationState {
        match self {
            FilterVerdict::Accept => ValuationState::Unpriced,
            _ => ValuationState::Rejected,
        }
    }

    pub fn reason(&self) -> Option<String> {
        match self {
            FilterVerdict::Accept => None,
            FilterVerdict::Blacklisted(pattern) => Some(format!("Blacklisted: {pattern}")),
            FilterVerdict::MapGate { tier } => Some(format!("Map tier {tier} not wanted")),
        }
    }
}

pub struct EligibilityFilter {
    config: FilterConfig,
    influenced_map_name: Option<String>,
}

impl EligibilityFilter {
    pub fn new(config: FilterConfig, influenced_map_name: Option<String>) -> Self {
        Self {
            config,
            influenced_map_name,
        }
    }

    /// Rewrite the display name by every matching mapping (later mappings
    /// win), then give influenced maps the shared influenced name.
    pub fn apply_mappings(&self, item: &mut ItemSnapshot) {
        for mapping in &self.config.mappings {
            if mapping_matches(mapping, item) {
                debug!(from = %item.name, to = %mapping.name, "Item renamed by mapping");
                item.name = mapping.name.clone();
            }
        }
        if let (ItemKind::Map { is_influenced: true, .. }, Some(name)) =
            (&item.kind, &self.influenced_map_name)
        {
            item.name = name.clone();
        }
    }

    /// Blacklist, then whitelist, then the map gate. First match wins.
    pub fn verdict(&self, item: &ItemSnapshot) -> FilterVerdict {
        if let Some(pattern) = self.first_hit(&self.config.blacklist, item) {
            return FilterVerdict::Blacklisted(pattern.to_string());
        }
        if self.first_hit(&self.config.whitelist, item).is_some() {
            return FilterVerdict::Accept;
        }
        if let ItemKind::Map {
            tier,
            is_unique,
            is_influenced,
        } = item.kind
        {
            let unwanted = !self.config.maps_enabled || tier < self.config.min_map_tier;
            if unwanted && !is_unique && !is_influenced {
                return FilterVerdict::MapGate { tier };
            }
        }
        FilterVerdict::Accept
    }

    /// `Rejected` or `Unpriced`.
    pub fn classify(&self, item: &ItemSnapshot) -> ValuationState {
        self.verdict(item).state()
    }

    fn first_hit<'a>(&self, patterns: &'a [String], item: &ItemSnapshot) -> Option<&'a str> {
        patterns
            .iter()
            .filter(|p| !p.is_empty())
            .find(|p| {
                self.contains(&item.name, p) || self.contains(&item.item_type, p)
            })
            .map(String::as_str)
    }

    fn contains(&self, haystack: &str, needle: &str) -> bool {
        if self.config.case_sensitive {
            haystack.contains(needle)
        } else {
            haystack.to_lowercase().contains(&needle.to_lowercase())
        }
    }
}

fn mapping_matches(mapping: &NameMapping, item: &ItemSnapshot) -> bool {
    !mapping.contains.is_empty()
        && mapping
            .contains
            .iter()
            .all(|part| item.name.contains(part.as_str()) || item.item_type.contains(part.as_str()))
}
