use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope for a definition exchanged between instances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item<T> {
    pub id: String,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub definition: T,
}

impl<T> Item<T> {
    pub fn new<S: Into<String>>(id: S, definition: T) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created: now,
            last_modified: now,
            definition,
        }
    }

    /// Envelope with a generated id
    pub fn generate(definition: T) -> Self {
        Self::new(Uuid::new_v4().to_string(), definition)
    }

    /// Replace the definition and bump `last_modified`; `id` and `created` stay.
    pub fn update(&mut self, definition: T) {
        self.definition = definition;
        self.last_modified = Utc::now().max(self.created);
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Item<U> {
        Item {
            id: self.id,
            created: self.created,
            last_modified: self.last_modified,
            definition: f(self.definition),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::State;

    #[test]
    fn test_field_names() {
        let item = Item::new("state-1", State::new("TempState"));
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["id"], "state-1");
        assert!(json.get("lastModified").is_some());
        assert_eq!(json["definition"]["name"], "TempState");
    }

    #[test]
    fn test_update_keeps_identity() {
        let mut item = Item::new("x", 1);
        let created = item.created;
        item.update(2);
        assert_eq!(item.id, "x");
        assert_eq!(item.created, created);
        assert!(item.last_modified >= created);
        assert_eq!(item.definition, 2);
    }
}
