//! Item classifier, matcher and pricer.
//!
//! Matching picks one price entry for a scanned item from the group sharing
//! its name, using kind-specific rules and first-match-wins over the group's
//! source order. Pricing then compares the asking cost against the matched
//! market value.

use tracing::debug;

use crate::config::ArtifactsConfig;
use crate::market::PriceTable;
use crate::types::{ArtifactCost, HaggleError, ItemKind, ItemSnapshot, PriceAttributes, PriceEntry};

/// Gems and cluster jewels at or below this price are treated as noise.
const MIN_ATTRIBUTED_VALUE: f64 = 10.0;

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// First entry in `group` satisfying the rule for the item's kind.
pub fn find_match<'a>(group: &'a [PriceEntry], item: &ItemSnapshot) -> Option<&'a PriceEntry> {
    match &item.kind {
        ItemKind::Generic => group.iter().find(|e| e.chaos_value > 0.0),
        ItemKind::Map {
            tier, is_unique, ..
        } => group.iter().find(|e| {
            matches!(e.attributes, PriceAttributes::Map { tier: t, is_unique: u }
                if t == *tier && u == *is_unique)
        }),
        ItemKind::Gem {
            level,
            quality,
            corrupted,
        } => group.iter().find(|e| match e.attributes {
            PriceAttributes::Gem {
                level: l,
                quality: q,
                corrupted: c,
                is_special_support: special,
            } => {
                e.chaos_value > MIN_ATTRIBUTED_VALUE
                    && l == *level
                    && c == *corrupted
                    && (*level > 1 || special)
                    && (q == *quality || special)
            }
            _ => false,
        }),
        ItemKind::ClusterJewel {
            item_level,
            passive_skill_count,
            ..
        } => group.iter().find(|e| match &e.attributes {
            PriceAttributes::ClusterJewel {
                item_level: il,
                passive_skill_count: p,
                ..
            } => e.chaos_value > MIN_ATTRIBUTED_VALUE && il == item_level && p == passive_skill_count,
            _ => false,
        }),
    }
}

/// Matched entry and the value of the whole stack.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub entry: PriceEntry,
    /// `entry.chaos_value * amount`
    pub value: f64,
}

pub struct ItemMatcher {
    influenced_map_name: Option<String>,
}

impl ItemMatcher {
    pub fn new(influenced_map_name: Option<String>) -> Self {
        Self {
            influenced_map_name,
        }
    }

    /// Match an item against the table.
    ///
    /// Influenced maps with no tier match fall back to the shared influenced
    /// name. No match is a pricing error: the item must not be bought.
    pub fn match_item(
        &self,
        table: &PriceTable,
        item: &ItemSnapshot,
    ) -> Result<MatchOutcome, HaggleError> {
        let Some(group) = table.get(&item.name) else {
            return Err(HaggleError::Pricing {
                item: item.name.clone(),
                reason: "no market entry".into(),
            });
        };

        let mut found = find_match(group, item);

        if found.is_none() {
            if let (ItemKind::Map { is_influenced: true, .. }, Some(alt)) =
                (&item.kind, &self.influenced_map_name)
            {
                found = table
                    .get(alt)
                    .and_then(|g| g.iter().find(|e| e.chaos_value > 0.0));
            }
        }

        let Some(entry) = found else {
            return Err(HaggleError::Pricing {
                item: item.name.clone(),
                reason: format!("no entry matches [{}]", item.kind.details()),
            });
        };

        let value = entry.chaos_value * item.amount as f64;
        debug!(item = %item.name, entry = %entry, value, "Matched market entry");
        Ok(MatchOutcome {
            entry: entry.clone(),
            value,
        })
    }
}

// ---------------------------------------------------------------------------
// Pricing
// ---------------------------------------------------------------------------

/// Buy decision for a matched item.
#[derive(Debug, Clone, PartialEq)]
pub enum PricingDecision {
    Priced,
    TooExpensive(String),
}

pub struct Pricer {
    artifacts: ArtifactsConfig,
}

impl Pricer {
    pub fn new(artifacts: ArtifactsConfig) -> Self {
        Self { artifacts }
    }

    pub fn artifacts(&self) -> &ArtifactsConfig {
        &self.artifacts
    }

    /// `TooExpensive` when the asking tier's unit value exceeds that tier's
    /// max cost, or the scaled asking value reaches the market value.
    pub fn decide(&self, asking: &ArtifactCost, value: f64) -> PricingDecision {
        let unit = self.artifacts.unit_value(asking.kind);
        if let Some(max_cost) = self.artifacts.max_cost(asking.kind) {
            if unit > max_cost {
                return PricingDecision::TooExpensive(format!(
                    "{} unit value {unit:.2} above max cost {max_cost:.2}",
                    asking.kind
                ));
            }
        }

        let cost = asking.total_value(&self.artifacts) * self.artifacts.item_price_multiplier;
        if cost >= value {
            return PricingDecision::TooExpensive(format!(
                "asking {cost:.2}c >= value {value:.2}c"
            ));
        }
        PricingDecision::Priced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::group_entries;
    use crate::types::ArtifactKind;

    fn snapshot(name: &str, amount: u32, kind: ItemKind) -> ItemSnapshot {
        ItemSnapshot {
            address: 9,
            name: name.into(),
            item_type: "Test".into(),
            amount,
            slot: 0,
            kind,
        }
    }

    #[test]
    fn test_generic_skips_zero_priced() {
        let group = vec![PriceEntry::plain("Orb", 0.0), PriceEntry::plain("Orb", 4.0)];
        let item = snapshot("Orb", 1, ItemKind::Generic);
        assert_eq!(find_match(&group, &item).unwrap().chaos_value, 4.0);
    }

    #[test]
    fn test_map_matches_tier_and_uniqueness() {
        let group = vec![
            PriceEntry::map("Strand Map", 1.0, 10, false),
            PriceEntry::map("Strand Map", 8.0, 16, true),
            PriceEntry::map("Strand Map", 3.0, 16, false),
        ];
        let item = snapshot("Strand Map", 1, ItemKind::Map { tier: 16, is_unique: false, is_influenced: false });
        assert_eq!(find_match(&group, &item).unwrap().chaos_value, 3.0);

        let missing = snapshot("Strand Map", 1, ItemKind::Map { tier: 5, is_unique: false, is_influenced: false });
        assert!(find_match(&group, &missing).is_none());
    }

    #[test]
    fn test_gem_disambiguation() {
        let group = vec![
            PriceEntry::gem("Anomalous X", 50.0, 20, 20, false, false),
            PriceEntry::gem("Anomalous X", 80.0, 21, 23, false, true),
        ];
        let item = snapshot("Anomalous X", 1, ItemKind::Gem { level: 21, quality: 20, corrupted: false });
        let found = find_match(&group, &item).unwrap();
        assert_eq!(found, &group[1]);
    }

    #[test]
    fn test_gem_level_one_requires_special_support() {
        let group = vec![PriceEntry::gem("Awakened Y", 50.0, 1, 20, false, false)];
        let item = snapshot("Awakened Y", 1, ItemKind::Gem { level: 1, quality: 20, corrupted: false });
        assert!(find_match(&group, &item).is_none());

        let group = vec![PriceEntry::gem("Enlighten Support", 900.0, 1, 0, false, true)];
        let item = snapshot("Enlighten Support", 1, ItemKind::Gem { level: 1, quality: 7, corrupted: false });
        assert!(find_match(&group, &item).is_some());
    }

    #[test]
    fn test_gem_cheap_entries_ignored() {
        let group = vec![PriceEntry::gem("Vaal Z", 10.0, 20, 20, true, false)];
        let item = snapshot("Vaal Z", 1, ItemKind::Gem { level: 20, quality: 20, corrupted: true });
        assert!(find_match(&group, &item).is_none());
    }

    #[test]
    fn test_cluster_jewel_rules() {
        let group = vec![
            PriceEntry::cluster_jewel("Minion Damage", 5.0, 84, 8, "Large Cluster Jewel"),
            PriceEntry::cluster_jewel("Minion Damage", 60.0, 84, 8, "Large Cluster Jewel"),
        ];
        let item = snapshot(
            "Minion Damage",
            1,
            ItemKind::ClusterJewel { item_level: 84, passive_skill_count: 8, base_type: "Large Cluster Jewel".into() },
        );
        assert_eq!(find_match(&group, &item).unwrap().chaos_value, 60.0);
    }

    #[test]
    fn test_match_is_deterministic() {
        let table = group_entries(vec![
            PriceEntry::plain("Orb", 2.0),
            PriceEntry::plain("Orb", 3.0),
        ]);
        let matcher = ItemMatcher::new(None);
        let item = snapshot("Orb", 3, ItemKind::Generic);
        let first = matcher.match_item(&table, &item).unwrap();
        for _ in 0..10 {
            assert_eq!(matcher.match_item(&table, &item).unwrap(), first);
        }
        assert_eq!(first.value, 6.0);
    }

    #[test]
    fn test_influenced_fallback() {
        let table = group_entries(vec![
            PriceEntry::map("Influenced Map", 0.0, 16, false),
            PriceEntry::plain("Influenced Map", 4.0),
        ]);
        let item = snapshot("Influenced Map", 1, ItemKind::Map { tier: 14, is_unique: false, is_influenced: true });

        let without = ItemMatcher::new(None);
        assert!(without.match_item(&table, &item).is_err());

        let with = ItemMatcher::new(Some("Influenced Map".into()));
        assert_eq!(with.match_item(&table, &item).unwrap().value, 4.0);
    }

    #[test]
    fn test_unknown_name_is_pricing_error() {
        let matcher = ItemMatcher::new(None);
        let err = matcher
            .match_item(&PriceTable::new(), &snapshot("Nothing", 1, ItemKind::Generic))
            .unwrap_err();
        assert!(matches!(err, HaggleError::Pricing { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_profitable_item_priced() {
        let pricer = Pricer::new(ArtifactsConfig {
            greater_value: 0.5,
            greater_max_cost: 0.8,
            ..ArtifactsConfig::default()
        });
        let asking = ArtifactCost::new(ArtifactKind::Greater, 2);
        assert_eq!(pricer.decide(&asking, 50.0), PricingDecision::Priced);
    }

    #[test]
    fn test_asking_at_value_too_expensive() {
        let pricer = Pricer::new(ArtifactsConfig {
            greater_value: 0.5,
            ..ArtifactsConfig::default()
        });
        let asking = ArtifactCost::new(ArtifactKind::Greater, 100);
        assert!(matches!(pricer.decide(&asking, 50.0), PricingDecision::TooExpensive(_)));
        assert!(matches!(pricer.decide(&asking, 49.0), PricingDecision::TooExpensive(_)));
        assert_eq!(pricer.decide(&asking, 50.5), PricingDecision::Priced);
    }

    #[test]
    fn test_tier_above_max_cost_too_expensive() {
        let pricer = Pricer::new(ArtifactsConfig {
            exceptional_value: 1.2,
            exceptional_max_cost: 0.8,
            ..ArtifactsConfig::default()
        });
        let asking = ArtifactCost::new(ArtifactKind::Exceptional, 1);
        match pricer.decide(&asking, 500.0) {
            PricingDecision::TooExpensive(reason) => assert!(reason.contains("Exceptional")),
            other => panic!("expected TooExpensive, got {other:?}"),
        }
    }

    #[test]
    fn test_price_multiplier_scales_cost() {
        let pricer = Pricer::new(ArtifactsConfig {
            lesser_value: 0.1,
            item_price_multiplier: 2.0,
            ..ArtifactsConfig::default()
        });
        let asking = ArtifactCost::new(ArtifactKind::Lesser, 10);
        assert!(matches!(pricer.decide(&asking, 1.5), PricingDecision::TooExpensive(_)));
        assert_eq!(pricer.decide(&asking, 2.5), PricingDecision::Priced);
    }
}
