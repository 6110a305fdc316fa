use crate::db::{Database, FaqRow};
use crate::llm::LlmClient;
use crate::similarity::{cosine_similarity, lexical_similarity};
use std::sync::Arc;
use tracing::{debug, info};

/// A successful FAQ lookup: the matched entry and its similarity score.
#[derive(Debug, Clone)]
pub struct FaqMatch {
    pub entry: FaqRow,
    pub similarity: f64,
}

/// Per-community FAQ storage with similarity search.
///
/// Questions are scored against the query with cosine similarity over
/// embeddings when an embedding backend is configured; otherwise a lexical
/// keyword-overlap scorer with the same [0, 1] contract is used. Callers
/// see only the score and the threshold semantics.
pub struct FaqIndex {
    db: Database,
    embedder: Option<Arc<LlmClient>>,
}

impl FaqIndex {
    pub fn new(db: Database, embedder: Option<Arc<LlmClient>>) -> Self {
        Self { db, embedder }
    }

    /// Adds a single entry. Returns the new entry id.
    pub async fn upsert_faq(
        &self,
        community_id: &str,
        question: &str,
        answer: &str,
    ) -> anyhow::Result<i64> {
        let embedding = self.embed(question).await;

        let db = self.db.clone();
        let community_id = community_id.to_string();
        let question = question.to_string();
        let answer = answer.to_string();
        let id = tokio::task::spawn_blocking(move || {
            db.insert_faq(&community_id, &question, &answer, embedding.as_deref())
        })
        .await??;
        Ok(id)
    }

    /// Replaces all entries for a community atomically. Syncing an empty
    /// list clears the community's FAQ set; it is not an error.
    pub async fn sync(
        &self,
        community_id: &str,
        entries: Vec<(String, String)>,
    ) -> anyhow::Result<usize> {
        let mut rows = Vec::with_capacity(entries.len());
        for (question, answer) in entries {
            let embedding = self.embed(&question).await;
            rows.push((question, answer, embedding));
        }

        let db = self.db.clone();
        let community_id_owned = community_id.to_string();
        let count =
            tokio::task::spawn_blocking(move || db.replace_faqs(&community_id_owned, &rows))
                .await??;
        info!(
            "FAQ index: synced {} entries for community {}",
            count, community_id
        );
        Ok(count)
    }

    /// Finds the best-scoring entry for the query, if any scores at least
    /// `threshold`. Ties are broken towards the lowest entry id, so a
    /// resynced index answers deterministically.
    pub async fn find_match(
        &self,
        community_id: &str,
        query: &str,
        threshold: f64,
    ) -> anyhow::Result<Option<FaqMatch>> {
        let db = self.db.clone();
        let community_id_owned = community_id.to_string();
        let entries =
            tokio::task::spawn_blocking(move || db.list_faqs(&community_id_owned)).await??;

        if entries.is_empty() {
            return Ok(None);
        }

        let query_embedding = self.embed(query).await;

        let mut best: Option<FaqMatch> = None;
        for entry in entries {
            let score = score_entry(&entry, query, query_embedding.as_deref());
            if score < threshold {
                continue;
            }
            // list_faqs returns entries ordered by id, so strictly-greater
            // keeps the lowest id on ties.
            let better = match &best {
                Some(current) => score > current.similarity,
                None => true,
            };
            if better {
                best = Some(FaqMatch {
                    entry,
                    similarity: score,
                });
            }
        }

        if let Some(found) = &best {
            debug!(
                "FAQ index: matched entry {} with similarity {:.3}",
                found.entry.id, found.similarity
            );
        }
        Ok(best)
    }

    /// Best-effort embedding: backend failures degrade to lexical scoring
    /// rather than failing the caller.
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embedder.get_embeddings(text).await {
            Ok(embedding) => Some(embedding),
            Err(e) => {
                debug!("FAQ index: embedding failed, using lexical scorer: {}", e);
                None
            }
        }
    }
}

fn score_entry(entry: &FaqRow, query: &str, query_embedding: Option<&[f32]>) -> f64 {
    match (entry.embedding.as_deref(), query_embedding) {
        (Some(entry_vec), Some(query_vec)) => {
            f64::from(cosine_similarity(entry_vec, query_vec)).clamp(0.0, 1.0)
        }
        _ => lexical_similarity(&entry.question, query),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> FaqIndex {
        let db = Database::new(":memory:").unwrap();
        db.execute_init().unwrap();
        FaqIndex::new(db, None)
    }

    #[tokio::test]
    async fn test_wifi_password_lookup() {
        let index = index();
        index
            .sync(
                "hack-1",
                vec![
                    ("WiFi password?".to_string(), "hack2024".to_string()),
                    (
                        "How do I submit my project?".to_string(),
                        "Via the platform by Sunday 11:59 PM".to_string(),
                    ),
                ],
            )
            .await
            .unwrap();

        let found = index
            .find_match("hack-1", "what's the wifi password", 0.78)
            .await
            .unwrap()
            .expect("should match the WiFi entry");
        assert_eq!(found.entry.answer, "hack2024");
        assert!(found.similarity >= 0.78);
    }

    #[tokio::test]
    async fn test_threshold_gates_matches() {
        let index = index();
        index
            .sync(
                "hack-1",
                vec![("When is lunch served?".to_string(), "12:30".to_string())],
            )
            .await
            .unwrap();

        // Partial overlap: a strict threshold rejects it...
        let query = "when is the final demo";
        assert!(index
            .find_match("hack-1", query, 0.9)
            .await
            .unwrap()
            .is_none());

        // ...and lowering the threshold can only add matches (monotonicity)
        let mut last_matched = false;
        for threshold in [0.9, 0.6, 0.3, 0.0] {
            let matched = index
                .find_match("hack-1", query, threshold)
                .await
                .unwrap()
                .is_some();
            assert!(
                matched || !last_matched,
                "a match at a higher threshold must persist at a lower one"
            );
            last_matched = matched;
        }
        assert!(last_matched, "threshold 0 accepts any scored entry");
    }

    #[tokio::test]
    async fn test_tie_breaks_to_lowest_id() {
        let index = index();
        index
            .sync(
                "hack-1",
                vec![
                    ("wifi password".to_string(), "first".to_string()),
                    ("wifi password".to_string(), "second".to_string()),
                ],
            )
            .await
            .unwrap();

        let found = index
            .find_match("hack-1", "wifi password", 0.5)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.entry.answer, "first");
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let index = index();
        let entries = vec![
            ("WiFi password?".to_string(), "hack2024".to_string()),
            ("When is food?".to_string(), "12:30".to_string()),
        ];

        index.sync("hack-1", entries.clone()).await.unwrap();
        let first = index
            .find_match("hack-1", "wifi password", 0.5)
            .await
            .unwrap()
            .unwrap();

        index.sync("hack-1", entries).await.unwrap();
        let second = index
            .find_match("hack-1", "wifi password", 0.5)
            .await
            .unwrap()
            .unwrap();

        // Same observable state: same question, answer, and score
        assert_eq!(first.entry.question, second.entry.question);
        assert_eq!(first.entry.answer, second.entry.answer);
        assert_eq!(first.similarity, second.similarity);
    }

    #[tokio::test]
    async fn test_empty_sync_clears() {
        let index = index();
        index
            .sync(
                "hack-1",
                vec![("WiFi password?".to_string(), "hack2024".to_string())],
            )
            .await
            .unwrap();

        let count = index.sync("hack-1", vec![]).await.unwrap();
        assert_eq!(count, 0);
        assert!(index
            .find_match("hack-1", "wifi password", 0.0)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_communities_are_isolated() {
        let index = index();
        index
            .sync(
                "hack-1",
                vec![("WiFi password?".to_string(), "hack2024".to_string())],
            )
            .await
            .unwrap();

        assert!(index
            .find_match("hack-2", "wifi password", 0.0)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_upsert_adds_entry() {
        let index = index();
        let id = index
            .upsert_faq("hack-1", "Where is the help desk?", "Main lobby")
            .await
            .unwrap();
        assert!(id > 0);

        let found = index
            .find_match("hack-1", "where is the help desk", 0.78)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.entry.answer, "Main lobby");
    }
}
