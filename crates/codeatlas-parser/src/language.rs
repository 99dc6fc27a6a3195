// ABOUTME: Maps supported languages to their tree-sitter grammars.
// ABOUTME: Hands out configured parsers; unsupported languages yield a parse error.

use codeatlas_core::{CodeAtlasError, Language, Result};
use std::collections::HashMap;
use std::path::Path;
use tree_sitter::Parser;

pub struct LanguageRegistry {
    grammars: HashMap<Language, tree_sitter::Language>,
}

impl LanguageRegistry {
    pub fn new() -> Self {
        let mut grammars = HashMap::new();
        grammars.insert(Language::Rust, tree_sitter_rust::LANGUAGE.into());
        grammars.insert(
            Language::TypeScript,
            tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        );
        grammars.insert(Language::Tsx, tree_sitter_typescript::LANGUAGE_TSX.into());
        grammars.insert(Language::JavaScript, tree_sitter_javascript::LANGUAGE.into());
        grammars.insert(Language::Python, tree_sitter_python::LANGUAGE.into());
        grammars.insert(Language::Go, tree_sitter_go::LANGUAGE.into());
        Self { grammars }
    }

    pub fn supports(&self, language: &Language) -> bool {
        self.grammars.contains_key(language)
    }

    /// Supported language of `path`, judged by its extension.
    pub fn detect(&self, path: &Path) -> Option<Language> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Language::from_extension)
            .filter(|language| self.supports(language))
    }

    pub fn create_parser(&self, language: &Language) -> Result<Parser> {
        let grammar = self
            .grammars
            .get(language)
            .ok_or_else(|| CodeAtlasError::Parse(format!("Unsupported language: {}", language)))?;
        let mut parser = Parser::new();
        parser
            .set_language(grammar)
            .map_err(|e| CodeAtlasError::Parse(format!("Failed to load {} grammar: {}", language, e)))?;
        Ok(parser)
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_registered_grammar_loads() {
        let registry = LanguageRegistry::new();
        for language in [
            Language::Rust,
            Language::TypeScript,
            Language::Tsx,
            Language::JavaScript,
            Language::Python,
            Language::Go,
        ] {
            assert!(registry.create_parser(&language).is_ok(), "{}", language);
        }
        assert!(registry
            .create_parser(&Language::Other("cobol".into()))
            .is_err());
    }

    #[test]
    fn test_detect_by_extension() {
        let registry = LanguageRegistry::new();
        assert_eq!(registry.detect(Path::new("src/app.tsx")), Some(Language::Tsx));
        assert_eq!(registry.detect(Path::new("main.go")), Some(Language::Go));
        assert_eq!(registry.detect(Path::new("README.md")), None);
    }
}
