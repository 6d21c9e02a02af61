//! Entity filters for local listing.

use mirrorsync_protocol::Entity;
use serde_json::Value;

/// A conjunction of optional predicates over entities.
///
/// An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityFilter {
    /// Only entities owned by this user.
    pub owner: Option<String>,
    /// Only entities whose `needs_sync` flag equals this value.
    pub needs_sync: Option<bool>,
    /// Case-insensitive substring over all string fields.
    pub text: Option<String>,
    /// Field equality constraints.
    pub equals: Vec<(String, Value)>,
}

impl EntityFilter {
    /// Creates a filter matching everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts to one owner.
    #[must_use]
    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Restricts by `needs_sync`.
    #[must_use]
    pub fn needs_sync(mut self, value: bool) -> Self {
        self.needs_sync = Some(value);
        self
    }

    /// Restricts to entities with a string field containing `text`.
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into().to_lowercase());
        self
    }

    /// Requires `field == value`.
    #[must_use]
    pub fn field_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.equals.push((field.into(), value.into()));
        self
    }

    /// Returns true if `entity` satisfies every predicate.
    #[must_use]
    pub fn matches(&self, entity: &Entity) -> bool {
        if let Some(owner) = &self.owner {
            if entity.owner.as_deref() != Some(owner.as_str()) {
                return false;
            }
        }
        if let Some(flag) = self.needs_sync {
            if entity.needs_sync != flag {
                return false;
            }
        }
        if let Some(text) = &self.text {
            let hit = entity.fields.values().any(|value| match value {
                Value::String(s) => s.to_lowercase().contains(text.as_str()),
                _ => false,
            });
            if !hit {
                return false;
            }
        }
        self.equals
            .iter()
            .all(|(field, expected)| entity.field(field) == Some(expected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn portal() -> Entity {
        Entity::synced("g1", 1, Default::default())
            .with_owner("u1")
            .with_field("name", "Portal 2")
            .with_field("isCracked", false)
    }

    #[test]
    fn empty_filter_matches_all() {
        assert!(EntityFilter::new().matches(&portal()));
    }

    #[test]
    fn owner_and_flag() {
        assert!(EntityFilter::new().owner("u1").matches(&portal()));
        assert!(!EntityFilter::new().owner("u2").matches(&portal()));
        assert!(!EntityFilter::new().needs_sync(true).matches(&portal()));
    }

    #[test]
    fn text_is_case_insensitive() {
        assert!(EntityFilter::new().text("PORTAL").matches(&portal()));
        assert!(!EntityFilter::new().text("doom").matches(&portal()));
    }

    #[test]
    fn field_equality() {
        assert!(EntityFilter::new().field_eq("isCracked", false).matches(&portal()));
        assert!(!EntityFilter::new().field_eq("isCracked", true).matches(&portal()));
        assert!(!EntityFilter::new().field_eq("price", 10).matches(&portal()));
    }
}
