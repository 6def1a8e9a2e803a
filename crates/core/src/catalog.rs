//! Read-only registry of the models the relay serves.

use std::collections::BTreeMap;

use tracing::warn;

use crate::error::{RelayError, Result};
use crate::types::Model;

#[derive(Clone, Debug, Default)]
pub struct ModelCatalog {
    models: BTreeMap<String, Model>,
}

impl ModelCatalog {
    pub fn new<I: IntoIterator<Item = Model>>(models: I) -> Self {
        let mut map = BTreeMap::new();
        for m in models {
            if let Some(prev) = map.insert(m.id.clone(), m) {
                warn!(target: "relay::catalog", "duplicate model id={}, keeping last definition", prev.id);
            }
        }
        Self { models: map }
    }

    /// All models, ordered by id.
    pub fn list_models(&self) -> Vec<Model> {
        self.models.values().cloned().collect()
    }

    pub fn get_model(&self, id: &str) -> Result<&Model> {
        self.models
            .get(id)
            .ok_or_else(|| RelayError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.models.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_in_id_order() {
        let c = ModelCatalog::new(vec![Model::new("zeta"), Model::new("alpha"), Model::new("mid")]);
        let ids: Vec<String> = c.list_models().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn empty_catalog_lists_nothing() {
        let c = ModelCatalog::default();
        assert!(c.list_models().is_empty());
        assert!(c.is_empty());
    }

    #[test]
    fn get_model_misses_with_not_found() {
        let c = ModelCatalog::new(vec![Model::new("default")]);
        assert_eq!(c.get_model("default").unwrap().id, "default");
        assert_eq!(
            c.get_model("nope").unwrap_err(),
            RelayError::NotFound("nope".into())
        );
    }

    #[test]
    fn duplicate_ids_keep_last() {
        let c = ModelCatalog::new(vec![
            Model::new("default").with_upstream("a"),
            Model::new("default").with_upstream("b"),
        ]);
        assert_eq!(c.len(), 1);
        assert_eq!(c.get_model("default").unwrap().upstream_name(), "b");
    }
}
