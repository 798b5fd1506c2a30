use parking_lot::RwLock;
use rust_stemmers::Algorithm;
use std::collections::HashMap;
use std::sync::Arc;

use crate::analysis::filter::TokenFilter;
use crate::analysis::filters::lowercase::LowercaseFilter;
use crate::analysis::filters::stemmer::StemmerFilter;
use crate::analysis::filters::stopword::StopWordFilter;
use crate::analysis::token::Token;
use crate::analysis::tokenizer::{
    EmailTokenizer, KeywordTokenizer, PhoneTokenizer, StandardTokenizer, Tokenizer, UrlTokenizer,
};
use crate::schema::field_type::FieldType;

/// Knobs the analyzers take from the engine configuration.
#[derive(Debug, Clone, Default)]
pub struct AnalysisOptions {
    pub stopwords: Vec<String>,
    pub lowercase_keywords: bool,
    pub enable_stemming: bool,
}

/// Text analysis pipeline: one tokenizer plus ordered filters.
pub struct Analyzer {
    pub name: String,
    tokenizer: Box<dyn Tokenizer>,
    filters: Vec<Box<dyn TokenFilter>>,
}

impl Analyzer {
    pub fn new(name: impl Into<String>, tokenizer: Box<dyn Tokenizer>) -> Self {
        Analyzer {
            name: name.into(),
            tokenizer,
            filters: Vec::new(),
        }
    }

    pub fn add_filter(mut self, filter: Box<dyn TokenFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn analyze(&self, text: &str) -> Vec<Token> {
        let mut tokens = self.tokenizer.tokenize(text);
        for filter in &self.filters {
            tokens = filter.filter(tokens);
        }
        tokens
    }

    pub fn standard(options: &AnalysisOptions) -> Self {
        let mut analyzer = Analyzer::new("standard", Box::new(StandardTokenizer::default()))
            .add_filter(Box::new(LowercaseFilter));
        if !options.stopwords.is_empty() {
            analyzer = analyzer.add_filter(Box::new(StopWordFilter::new(
                options.stopwords.iter().cloned(),
            )));
        }
        if options.enable_stemming {
            analyzer = analyzer.add_filter(Box::new(StemmerFilter::new(Algorithm::English)));
        }
        analyzer
    }

    pub fn keyword(options: &AnalysisOptions) -> Self {
        let analyzer = Analyzer::new("keyword", Box::new(KeywordTokenizer));
        if options.lowercase_keywords {
            analyzer.add_filter(Box::new(LowercaseFilter))
        } else {
            analyzer
        }
    }

    pub fn email() -> Self {
        Analyzer::new("email", Box::new(EmailTokenizer)).add_filter(Box::new(LowercaseFilter))
    }

    pub fn url() -> Self {
        Analyzer::new("url", Box::new(UrlTokenizer)).add_filter(Box::new(LowercaseFilter))
    }

    pub fn phone() -> Self {
        Analyzer::new("phone", Box::new(PhoneTokenizer))
    }
}

/// Analyzer name used for a field type; a query value is always analyzed
/// with the same analyzer as the field it targets.
pub fn analyzer_name(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::Text => "standard",
        FieldType::Email => "email",
        FieldType::Url => "url",
        FieldType::Phone => "phone",
        _ => "keyword",
    }
}

/// Registry of shared analyzers, keyed by name.
pub struct AnalyzerRegistry {
    analyzers: RwLock<HashMap<String, Arc<Analyzer>>>,
    fallback: Arc<Analyzer>,
}

impl AnalyzerRegistry {
    pub fn new(options: &AnalysisOptions) -> Self {
        let registry = AnalyzerRegistry {
            analyzers: RwLock::new(HashMap::new()),
            fallback: Arc::new(Analyzer::standard(options)),
        };
        registry.register(Analyzer::standard(options));
        registry.register(Analyzer::keyword(options));
        registry.register(Analyzer::email());
        registry.register(Analyzer::url());
        registry.register(Analyzer::phone());
        registry
    }

    pub fn register(&self, analyzer: Analyzer) {
        self.analyzers
            .write()
            .insert(analyzer.name.clone(), Arc::new(analyzer));
    }

    pub fn get(&self, name: &str) -> Arc<Analyzer> {
        self.analyzers
            .read()
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    pub fn for_field_type(&self, field_type: FieldType) -> Arc<Analyzer> {
        self.get(analyzer_name(field_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_lowercases() {
        let analyzer = Analyzer::standard(&AnalysisOptions::default());
        let tokens = analyzer.analyze("Hello World");
        assert_eq!(tokens[0].text, "hello");
        assert_eq!(tokens[1].text, "world");
    }

    #[test]
    fn test_standard_is_idempotent_and_empty_safe() {
        let analyzer = Analyzer::standard(&AnalysisOptions::default());
        let once: Vec<String> = analyzer.analyze("Brave New World").iter().map(|t| t.text.clone()).collect();
        let twice: Vec<String> = analyzer
            .analyze(&once.join(" "))
            .iter()
            .map(|t| t.text.clone())
            .collect();
        assert_eq!(once, twice);
        assert!(analyzer.analyze("").is_empty());
    }

    #[test]
    fn test_stopwords_keep_positions() {
        let options = AnalysisOptions {
            stopwords: vec!["the".to_string()],
            ..Default::default()
        };
        let analyzer = Analyzer::standard(&options);
        let tokens = analyzer.analyze("hello the world");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].text, "world");
        assert_eq!(tokens[1].position, 2);
    }

    #[test]
    fn test_keyword_preserves_case_by_default() {
        let analyzer = Analyzer::keyword(&AnalysisOptions::default());
        assert_eq!(analyzer.analyze("Alive")[0].text, "Alive");

        let lowered = Analyzer::keyword(&AnalysisOptions {
            lowercase_keywords: true,
            ..Default::default()
        });
        assert_eq!(lowered.analyze("Alive")[0].text, "alive");
    }

    #[test]
    fn test_registry_selects_by_field_type() {
        let registry = AnalyzerRegistry::new(&AnalysisOptions::default());
        assert_eq!(registry.for_field_type(FieldType::Text).name, "standard");
        assert_eq!(registry.for_field_type(FieldType::Keyword).name, "keyword");
        assert_eq!(registry.for_field_type(FieldType::Email).name, "email");
        assert_eq!(registry.for_field_type(FieldType::Boolean).name, "keyword");
    }
}
