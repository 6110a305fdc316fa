//! Text and vector similarity scoring shared by the FAQ index and the
//! flood detector. Both scorers return a value in [0, 1] so callers can
//! apply the same threshold semantics regardless of backend.

/// Cosine similarity between two embedding vectors.
///
/// Returns 0.0 for empty, mismatched, or zero-magnitude vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Lexical similarity via the overlap coefficient over normalized tokens:
/// |A ∩ B| / min(|A|, |B|).
///
/// Chosen over Jaccard so that a short stored question ("WiFi password?")
/// still scores 1.0 against a longer phrasing of the same question.
pub fn lexical_similarity(a: &str, b: &str) -> f64 {
    let tokens_a = tokenize(a);
    let tokens_b = tokenize(b);

    if tokens_a.is_empty() || tokens_b.is_empty() {
        return 0.0;
    }

    let set_a: std::collections::HashSet<&str> =
        tokens_a.iter().map(String::as_str).collect();
    let set_b: std::collections::HashSet<&str> =
        tokens_b.iter().map(String::as_str).collect();

    let intersection = set_a.intersection(&set_b).count();
    let min_len = set_a.len().min(set_b.len());

    intersection as f64 / min_len as f64
}

/// Lowercase alphanumeric tokens; any punctuation acts as a separator.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical_and_orthogonal() {
        let a = vec![1.0, 0.0, 2.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);

        let x = vec![1.0, 0.0];
        let y = vec![0.0, 1.0];
        assert!(cosine_similarity(&x, &y).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    fn test_lexical_overlap() {
        // Full containment of the shorter question scores 1.0.
        let score = lexical_similarity("what's the wifi password", "WiFi password?");
        assert!((score - 1.0).abs() < 1e-9);

        // Disjoint texts score 0.
        assert_eq!(lexical_similarity("submission deadline", "wifi password"), 0.0);

        // Partial overlap lands strictly between.
        let partial = lexical_similarity("when is lunch served", "when is dinner");
        assert!(partial > 0.0 && partial < 1.0);
    }

    #[test]
    fn test_lexical_empty_inputs() {
        assert_eq!(lexical_similarity("", "wifi"), 0.0);
        assert_eq!(lexical_similarity("   ", "wifi"), 0.0);
        assert_eq!(lexical_similarity("?!.", "wifi"), 0.0);
    }

    #[test]
    fn test_tokenize_strips_punctuation() {
        assert_eq!(tokenize("What's the WiFi?"), vec!["what", "s", "the", "wifi"]);
        assert!(tokenize("...").is_empty());
    }
}
