use std::collections::{HashMap, HashSet};

/// Query-time synonym expansion, registered per index.
///
/// Expansion is symmetric: registering `fast → [quick]` makes each of the
/// two reach the other at query time.
#[derive(Debug, Default, Clone)]
pub struct SynonymEngine {
    groups: HashMap<String, HashSet<String>>,
}

impl SynonymEngine {
    pub fn new() -> Self {
        SynonymEngine::default()
    }

    pub fn register(&mut self, term: &str, synonyms: &[String]) {
        let term = term.to_lowercase();
        for synonym in synonyms {
            let synonym = synonym.to_lowercase();
            if synonym == term {
                continue;
            }
            self.groups
                .entry(term.clone())
                .or_default()
                .insert(synonym.clone());
            self.groups.entry(synonym).or_default().insert(term.clone());
        }
    }

    pub fn remove(&mut self, term: &str) {
        let term = term.to_lowercase();
        if let Some(synonyms) = self.groups.remove(&term) {
            for synonym in synonyms {
                if let Some(back) = self.groups.get_mut(&synonym) {
                    back.remove(&term);
                    if back.is_empty() {
                        self.groups.remove(&synonym);
                    }
                }
            }
        }
    }

    /// Synonyms of `term`, sorted for deterministic expansion order.
    pub fn expand(&self, term: &str) -> Vec<String> {
        let mut expansions: Vec<String> = self
            .groups
            .get(&term.to_lowercase())
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        expansions.sort();
        expansions
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn terms(&self) -> impl Iterator<Item = &String> {
        self.groups.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symmetric_expansion() {
        let mut engine = SynonymEngine::new();
        engine.register("fast", &["quick".to_string(), "rapid".to_string()]);
        assert_eq!(engine.expand("fast"), vec!["quick", "rapid"]);
        assert_eq!(engine.expand("quick"), vec!["fast"]);
        assert!(engine.expand("slow").is_empty());
    }

    #[test]
    fn test_remove_cleans_back_references() {
        let mut engine = SynonymEngine::new();
        engine.register("fast", &["quick".to_string()]);
        engine.remove("fast");
        assert!(engine.expand("quick").is_empty());
        assert!(engine.is_empty());
    }
}
