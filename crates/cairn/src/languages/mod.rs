//! Language-specific entity and relationship extraction.
//!
//! Each supported language implements the `LanguageExtractor` trait, which turns
//! a tree-sitter syntax tree into an [`Extraction`]. The free function
//! [`extract`] is the single entry point: it picks the extractor, parses, and
//! rejects files whose syntax tree contains errors.
//!
//! ## Adding a New Language
//!
//! 1. Add the variant to `Language` enum in `types.rs`
//! 2. Create a new module (e.g., `go.rs`)
//! 3. Implement `LanguageExtractor`
//! 4. Register in `extractor_for()`
//!
//! Downstream components only see `Extraction`, so nothing else changes.

pub mod common;
pub mod csharp;
pub mod python;
pub mod rust;
pub mod tree_sitter_utils;

use std::path::{Path, PathBuf};

pub use common::{EdgeTarget, ExtractedEntity, ExtractedRelationship, Extraction, FILE_ENTITY};

use crate::error::{IndexError, IndexErrorKind};
use crate::types::Language;

/// Trait for language-specific extraction.
///
/// Implementations are stateless; one parser is created per call.
pub trait LanguageExtractor: Send + Sync {
    /// Language handled by this extractor.
    fn language(&self) -> Language;

    /// Get the tree-sitter language for parsing.
    fn tree_sitter_language(&self) -> tree_sitter::Language;

    /// Turn an error-free syntax tree into entities and relationships.
    fn extract_tree(&self, tree: &tree_sitter::Tree, source: &str, path: &Path) -> Extraction;
}

/// Get the extractor for a language.
#[must_use]
pub fn extractor_for(language: Language) -> &'static dyn LanguageExtractor {
    match language {
        Language::Rust => &rust::RustExtractor,
        Language::CSharp => &csharp::CSharpExtractor,
        Language::Python => &python::PythonExtractor,
    }
}

/// Why a file could not be extracted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    /// The syntax tree contains errors
    #[error("syntax error at line {line}, column {column}")]
    Syntax {
        /// 1-indexed line of the first error
        line: u32,
        /// 1-indexed column of the first error
        column: u32,
    },

    /// Content is not valid UTF-8
    #[error("file is not valid UTF-8")]
    Encoding,

    /// The parser could not be set up or gave up
    #[error("parser failure: {0}")]
    Parser(String),
}

impl ExtractError {
    /// Convert into a per-file index error.
    #[must_use]
    pub fn into_index_error(self, path: PathBuf) -> IndexError {
        let kind = match self {
            Self::Syntax { .. } | Self::Parser(_) => IndexErrorKind::ParseFailed,
            Self::Encoding => IndexErrorKind::EncodingError,
        };
        IndexError::new(path, kind, self.to_string())
    }
}

/// Extract entities and relationships from one file's text.
///
/// Pure: the result depends only on the arguments.
pub fn extract(source: &str, path: &Path, language: Language) -> Result<Extraction, ExtractError> {
    let extractor = extractor_for(language);
    let mut parser = tree_sitter::Parser::new();
    parser
        .set_language(&extractor.tree_sitter_language())
        .map_err(|e| ExtractError::Parser(e.to_string()))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| ExtractError::Parser("parser returned no tree".to_string()))?;

    if let Some((line, column)) = tree_sitter_utils::first_error(tree.root_node()) {
        tracing::debug!(path = %path.display(), line, column, "Syntax error, skipping file");
        return Err(ExtractError::Syntax { line, column });
    }

    let extraction = extractor.extract_tree(&tree, source, path);
    tracing::trace!(
        path = %path.display(),
        entities = extraction.entities.len(),
        relationships = extraction.relationships.len(),
        "Extracted file"
    );
    Ok(extraction)
}

/// Extract from raw file bytes, rejecting non-UTF-8 content.
pub fn extract_bytes(
    bytes: &[u8],
    path: &Path,
    language: Language,
) -> Result<Extraction, ExtractError> {
    let source = std::str::from_utf8(bytes).map_err(|_| ExtractError::Encoding)?;
    extract(source, path, language)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Language::Rust)]
    #[case(Language::CSharp)]
    #[case(Language::Python)]
    fn extractor_matches_language(#[case] language: Language) {
        assert_eq!(extractor_for(language).language(), language);
    }

    #[rstest]
    #[case(Language::Rust, "fn broken( {")]
    #[case(Language::CSharp, "class Foo { void M( }")]
    #[case(Language::Python, "def f(:\n    pass\n")]
    fn syntax_errors_are_reported(#[case] language: Language, #[case] code: &str) {
        let err = extract(code, Path::new("bad"), language).expect_err("should fail");
        assert!(matches!(err, ExtractError::Syntax { .. }), "got {err:?}");
    }

    #[test]
    fn invalid_utf8_is_an_encoding_error() {
        let err = extract_bytes(&[0x66, 0x6e, 0xff, 0xfe], Path::new("x.rs"), Language::Rust)
            .expect_err("should fail");
        assert_eq!(err, ExtractError::Encoding);

        let index_error = err.into_index_error(PathBuf::from("x.rs"));
        assert_eq!(index_error.kind, IndexErrorKind::EncodingError);
    }

    #[test]
    fn syntax_error_maps_to_parse_failed() {
        let err = ExtractError::Syntax { line: 3, column: 1 };
        let index_error = err.into_index_error(PathBuf::from("a.py"));
        assert_eq!(index_error.kind, IndexErrorKind::ParseFailed);
        assert!(index_error.message.contains("line 3"));
    }

    #[test]
    fn empty_file_yields_only_file_entity() {
        let ex = extract("", Path::new("empty.py"), Language::Python).expect("empty parses");
        assert_eq!(ex.entities.len(), 1);
        assert!(ex.relationships.is_empty());
    }

    #[test]
    fn extraction_is_deterministic() {
        let code = "class A:\n    def f(self):\n        g()\n";
        let a = extract(code, Path::new("a.py"), Language::Python).expect("parse");
        let b = extract(code, Path::new("a.py"), Language::Python).expect("parse");
        assert_eq!(a.entities, b.entities);
        assert_eq!(a.relationships, b.relationships);
    }
}
