// Runtime feature toggles.
use parking_lot::RwLock;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Bound the number of concurrent streams per client via connection slots.
    LimitConsumersNumber,
}

impl Feature {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "limit_consumers_number" => Some(Feature::LimitConsumersNumber),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Feature::LimitConsumersNumber => "limit_consumers_number",
        }
    }
}

#[derive(Debug, Default)]
pub struct FeatureToggles {
    enabled: RwLock<HashSet<Feature>>,
}

impl FeatureToggles {
    pub fn new(enabled: impl IntoIterator<Item = Feature>) -> Self {
        Self {
            enabled: RwLock::new(enabled.into_iter().collect()),
        }
    }

    /// Parse feature names from configuration; unknown names are logged and
    /// skipped so a typo cannot take the gateway down.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut enabled = HashSet::new();
        for name in names {
            match Feature::from_name(name) {
                Some(feature) => {
                    enabled.insert(feature);
                }
                None => tracing::warn!(feature = name, "ignoring unknown feature toggle"),
            }
        }
        Self {
            enabled: RwLock::new(enabled),
        }
    }

    pub fn is_enabled(&self, feature: Feature) -> bool {
        self.enabled.read().contains(&feature)
    }

    pub fn set(&self, feature: Feature, on: bool) {
        let mut enabled = self.enabled.write();
        if on {
            enabled.insert(feature);
        } else {
            enabled.remove(&feature);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggles_flip_at_runtime() {
        let features = FeatureToggles::new([]);
        assert!(!features.is_enabled(Feature::LimitConsumersNumber));
        features.set(Feature::LimitConsumersNumber, true);
        assert!(features.is_enabled(Feature::LimitConsumersNumber));
        features.set(Feature::LimitConsumersNumber, false);
        assert!(!features.is_enabled(Feature::LimitConsumersNumber));
    }

    #[test]
    fn unknown_names_are_skipped() {
        let features = FeatureToggles::from_names(["limit_consumers_number", "warp_drive"]);
        assert!(features.is_enabled(Feature::LimitConsumersNumber));
    }
}
