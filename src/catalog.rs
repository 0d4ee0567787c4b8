//! The curated few-shot catalog (spec §3, §4.4).
//!
//! Loaded once at startup — either the bundled catalog baked in with
//! `include_str!`, the same idiom the teacher uses for its default OCR
//! prompt in `queues/ocr.rs`, or an override file on disk — and treated as
//! immutable, process-wide, shared read-only state for the rest of the run.

use crate::{model::FewShotExample, prelude::*};

const BUNDLED_CATALOG: &str = include_str!("catalog_data.json");

/// The loaded set of curated few-shot exemplars.
#[derive(Debug, Clone)]
pub struct Catalog {
    examples: Vec<FewShotExample>,
}

impl Catalog {
    /// Load the bundled catalog.
    pub fn load_bundled() -> Result<Self> {
        let examples: Vec<FewShotExample> = serde_json::from_str(BUNDLED_CATALOG)
            .context("failed to parse bundled few-shot catalog")?;
        Self::from_examples(examples)
    }

    /// Load a catalog from an override file on disk, replacing the bundled
    /// set entirely.
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read catalog file {:?}", path))?;
        let examples: Vec<FewShotExample> = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse catalog file {:?}", path))?;
        Self::from_examples(examples)
    }

    fn from_examples(examples: Vec<FewShotExample>) -> Result<Self> {
        if examples.is_empty() {
            return Err(anyhow!("few-shot catalog is empty"));
        }
        let mut seen = std::collections::HashSet::new();
        for example in &examples {
            if !seen.insert(example.id.clone()) {
                return Err(anyhow!("duplicate catalog example id: {}", example.id));
            }
        }
        info!(count = examples.len(), "loaded few-shot catalog");
        Ok(Self { examples })
    }

    pub fn examples(&self) -> &[FewShotExample] {
        &self.examples
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_catalog_loads_and_is_nonempty() {
        let catalog = Catalog::load_bundled().expect("bundled catalog should parse");
        assert!(!catalog.is_empty());
    }

    #[test]
    fn test_bundled_catalog_ids_are_unique() {
        let catalog = Catalog::load_bundled().unwrap();
        let mut ids = std::collections::HashSet::new();
        for example in catalog.examples() {
            assert!(ids.insert(&example.id), "duplicate id {}", example.id);
        }
    }

    #[test]
    fn test_bundled_catalog_has_refactor_examples_with_expected_output() {
        let catalog = Catalog::load_bundled().unwrap();
        assert!(
            catalog
                .examples()
                .iter()
                .any(|e| e.intent == crate::model::Intent::Refactor && e.has_expected_output)
        );
    }
}
