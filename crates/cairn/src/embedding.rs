//! Embedding providers and the text fed to them.
//!
//! The embedding service is an external collaborator behind [`Embedder`].
//! Cairn ships [`HashingEmbedder`], a deterministic feature-hashing model that
//! needs no network or model files, so semantic search works offline and in
//! tests. Other providers plug in through the same trait.

use std::fmt::Write as _;

use xxhash_rust::xxh3::xxh3_64;

use crate::error::Result;
use crate::types::{EntityKind, RelationshipKind};

/// Trait for pluggable embedding providers.
pub trait Embedder: Send + Sync {
    /// Embedding vector dimensions.
    fn dimensions(&self) -> usize;

    /// Embed a single text string.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts (default: sequential).
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Provider name for display.
    fn name(&self) -> &str;
}

/// Feature-hashing embedder over identifier sub-tokens.
///
/// `OrderService.placeOrder` contributes `order`, `service`, `place`, and the
/// whole lowercase identifiers. Each token lands in one signed bucket; the
/// vector is L2-normalized so cosine similarity is a dot product.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    /// Create an embedder producing vectors of `dimensions` floats.
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }
}

impl Embedder for HashingEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    // Bucket index is reduced modulo `dimensions`, which is a usize.
    #[allow(clippy::cast_possible_truncation)]
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0_f32; self.dimensions];
        for token in tokenize(text) {
            let hash = xxh3_64(token.as_bytes());
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        normalize(&mut vector);
        Ok(vector)
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

/// Split text into lowercase identifier tokens and their camel/snake sub-tokens.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
        let word = word.trim_matches('_');
        if word.is_empty() {
            continue;
        }
        let lower = word.to_lowercase();
        let parts = split_identifier(word);
        if parts.len() > 1 {
            tokens.extend(parts);
        }
        tokens.push(lower);
    }
    tokens
}

/// `parseHTTPRequest_fast` → `parse`, `http`, `request`, `fast`.
fn split_identifier(word: &str) -> Vec<String> {
    let chars: Vec<char> = word.chars().collect();
    let mut parts = Vec::new();
    let mut current = String::new();
    for (i, &c) in chars.iter().enumerate() {
        if c == '_' {
            if !current.is_empty() {
                parts.push(std::mem::take(&mut current).to_lowercase());
            }
            continue;
        }
        let boundary = c.is_uppercase()
            && !current.is_empty()
            && (chars[i - 1].is_lowercase()
                || chars[i - 1].is_ascii_digit()
                || chars.get(i + 1).is_some_and(|n| n.is_lowercase()));
        if boundary {
            parts.push(std::mem::take(&mut current).to_lowercase());
        }
        current.push(c);
    }
    if !current.is_empty() {
        parts.push(current.to_lowercase());
    }
    parts
}

/// Scale a vector to unit length. Zero vectors stay zero.
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Cosine similarity; zero when either vector is zero or lengths differ.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let nb = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

/// Inputs for one entity's embedding text.
#[derive(Debug, Clone)]
pub struct EmbeddingInput<'a> {
    /// Entity variant
    pub kind: EntityKind,
    /// Qualified name
    pub name: &'a str,
    /// Declaration signature
    pub signature: Option<&'a str>,
    /// Documentation text
    pub docstring: Option<&'a str>,
    /// Owning file path
    pub file_path: &'a str,
    /// Outgoing relationships as (kind, target name)
    pub outgoing: Vec<(RelationshipKind, &'a str)>,
}

/// Maximum targets listed per relationship kind in embedding text.
const MAX_TARGETS_PER_KIND: usize = 8;

/// Build the text embedded for an entity.
///
/// Combines kind, name, signature, docs, location, and a summary of outgoing
/// relationships (`calls: save, load; implements: IRepository`).
#[must_use]
pub fn embedding_text(input: &EmbeddingInput<'_>) -> String {
    let mut text = format!("{} {}", input.kind.as_str(), input.name);
    if let Some(signature) = input.signature {
        let _ = write!(text, "\n{signature}");
    }
    if let Some(doc) = input.docstring {
        let _ = write!(text, "\n{doc}");
    }
    let _ = write!(text, "\nin {}", input.file_path);

    let mut kinds: Vec<RelationshipKind> = input
        .outgoing
        .iter()
        .map(|(k, _)| *k)
        .filter(|k| *k != RelationshipKind::Defines)
        .collect();
    kinds.sort();
    kinds.dedup();
    let summary: Vec<String> = kinds
        .into_iter()
        .map(|kind| {
            let targets: Vec<&str> = input
                .outgoing
                .iter()
                .filter(|(k, _)| *k == kind)
                .map(|(_, t)| *t)
                .take(MAX_TARGETS_PER_KIND)
                .collect();
            format!("{}: {}", kind.as_str().replace('_', " "), targets.join(", "))
        })
        .collect();
    if !summary.is_empty() {
        let _ = write!(text, "\n{}", summary.join("; "));
    }
    text
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::Error;
    use rstest::rstest;

    /// Embedder that fails for every text containing a marker.
    pub(crate) struct FailingEmbedder {
        pub marker: &'static str,
        pub inner: HashingEmbedder,
    }

    impl Embedder for FailingEmbedder {
        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.contains(self.marker) {
                Err(Error::Embedding(format!("refused to embed '{}'", self.marker)))
            } else {
                self.inner.embed(text)
            }
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[rstest]
    #[case("OrderService", vec!["order", "service", "orderservice"])]
    #[case("parse_http_request", vec!["parse", "http", "request", "parse_http_request"])]
    #[case("parseHTTPRequest", vec!["parse", "http", "request", "parsehttprequest"])]
    #[case("save", vec!["save"])]
    fn tokenizes_identifiers(#[case] text: &str, #[case] expected: Vec<&str>) {
        assert_eq!(tokenize(text), expected);
    }

    #[test]
    fn embeddings_are_normalized_and_deterministic() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("OrderService.placeOrder").expect("embed");
        let b = embedder.embed("OrderService.placeOrder").expect("embed");

        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn related_text_scores_higher() {
        let embedder = HashingEmbedder::new(256);
        let query = embedder.embed("order repository").expect("embed");
        let close = embedder.embed("class OrderRepository saves orders").expect("embed");
        let far = embedder.embed("fn render_widget paints pixels").expect("embed");

        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
    }

    #[test]
    fn empty_text_gives_zero_vector() {
        let v = HashingEmbedder::new(8).embed("   ").expect("embed");
        assert!(v.iter().all(|x| *x == 0.0));
        assert!(cosine_similarity(&v, &v).abs() < f32::EPSILON);
    }

    #[test]
    fn embedding_text_summarizes_relationships() {
        let input = EmbeddingInput {
            kind: EntityKind::Method,
            name: "OrderService.Place",
            signature: Some("public void Place(Order order)"),
            docstring: Some("Places an order."),
            file_path: "Services/OrderService.cs",
            outgoing: vec![
                (RelationshipKind::Calls, "Save"),
                (RelationshipKind::UsesType, "Order"),
                (RelationshipKind::Calls, "Notify"),
                (RelationshipKind::Defines, "ignored"),
            ],
        };

        let text = embedding_text(&input);

        assert!(text.starts_with("method OrderService.Place"));
        assert!(text.contains("Places an order."));
        assert!(text.contains("in Services/OrderService.cs"));
        assert!(text.contains("calls: Save, Notify"));
        assert!(text.contains("uses type: Order"));
        assert!(!text.contains("ignored"));
    }
}
