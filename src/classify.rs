use crate::error::PipelineError;
use crate::llm::LlmClient;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Discrete message category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Faq,
    Complaint,
    Social,
    Spam,
    Unknown,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Faq => "faq",
            Category::Complaint => "complaint",
            Category::Social => "social",
            Category::Spam => "spam",
            Category::Unknown => "unknown",
        }
    }
}

/// Result of analyzing one message. Sentiment is in [-1, 1], urgency in
/// [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub sentiment: f64,
    pub urgency: f64,
    pub category: Category,
}

impl Analysis {
    fn empty() -> Self {
        Self {
            sentiment: 0.0,
            urgency: 0.0,
            category: Category::Unknown,
        }
    }
}

/// Scores a message for sentiment, urgency, and category. Implementations
/// must never fail: the AI-backed variant degrades to the heuristic one.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn analyze(&self, text: &str) -> Analysis;
}

const NEGATIVE_WORDS: &[&str] = &[
    "bad", "terrible", "awful", "broken", "fail", "problem", "issue", "bug",
];
const POSITIVE_WORDS: &[&str] = &[
    "good", "great", "awesome", "works", "thanks", "love", "perfect",
];
const URGENT_WORDS: &[&str] = &[
    "urgent", "emergency", "asap", "immediately", "help", "broken", "crash",
];
const QUESTION_WORDS: &[&str] = &[
    "how", "what", "when", "where", "why", "can", "could", "should",
];
const COMPLAINT_WORDS: &[&str] = &["broken", "bug", "error", "problem", "issue", "wrong"];

/// Deterministic keyword-based scorer. Used directly when no AI backend is
/// configured, and as the fallback when the backend errors.
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    fn score(&self, text: &str) -> Analysis {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Analysis::empty();
        }

        let lowered = trimmed.to_lowercase();
        let word_count = lowered.split_whitespace().count().max(1);

        let negative = NEGATIVE_WORDS.iter().filter(|w| lowered.contains(*w)).count() as f64;
        let positive = POSITIVE_WORDS.iter().filter(|w| lowered.contains(*w)).count() as f64;
        let sentiment = ((positive - negative) / word_count as f64).clamp(-1.0, 1.0);

        let urgent_hits = URGENT_WORDS.iter().filter(|w| lowered.contains(*w)).count();
        let urgency = (urgent_hits as f64 * 0.3).min(1.0);

        let category = if COMPLAINT_WORDS.iter().any(|w| lowered.contains(w)) {
            Category::Complaint
        } else if QUESTION_WORDS.iter().any(|w| lowered.contains(w)) || trimmed.contains('?') {
            Category::Faq
        } else if trimmed.len() < 10 {
            Category::Social
        } else {
            Category::Unknown
        };

        Analysis {
            sentiment,
            urgency,
            category,
        }
    }
}

#[async_trait]
impl Classifier for HeuristicClassifier {
    async fn analyze(&self, text: &str) -> Analysis {
        self.score(text)
    }
}

#[derive(Deserialize)]
struct AiAnalysisResponse {
    sentiment_score: f64,
    urgency_score: f64,
    category: String,
}

/// AI-backed scorer: one chat completion returning a small JSON document.
/// Any backend or parse failure falls back to the heuristic scorer and is
/// logged as degraded mode.
pub struct AiClassifier {
    llm: Arc<LlmClient>,
    fallback: HeuristicClassifier,
}

impl AiClassifier {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self {
            llm,
            fallback: HeuristicClassifier,
        }
    }

    async fn analyze_remote(&self, text: &str) -> anyhow::Result<Analysis> {
        let prompt = format!(
            "Analyze the following Discord message from a hackathon participant and provide:\n\
             1. Sentiment score (-1.0 to 1.0, where -1 is very negative, 0 is neutral, 1 is very positive)\n\
             2. Urgency score (0.0 to 1.0, where 0 is not urgent, 1 is very urgent)\n\
             3. Category (one of: \"faq\", \"complaint\", \"social\", \"spam\", \"unknown\")\n\n\
             Message: \"{}\"\n\n\
             Respond with valid JSON only:\n\
             {{\"sentiment_score\": 0.0, \"urgency_score\": 0.0, \"category\": \"unknown\"}}",
            text
        );

        let raw = self.llm.completion(&prompt).await?;
        let parsed: AiAnalysisResponse = serde_json::from_str(raw.trim())?;

        let category = match parsed.category.as_str() {
            "faq" => Category::Faq,
            "complaint" => Category::Complaint,
            "social" => Category::Social,
            "spam" => Category::Spam,
            _ => Category::Unknown,
        };

        Ok(Analysis {
            sentiment: parsed.sentiment_score.clamp(-1.0, 1.0),
            urgency: parsed.urgency_score.clamp(0.0, 1.0),
            category,
        })
    }
}

#[async_trait]
impl Classifier for AiClassifier {
    async fn analyze(&self, text: &str) -> Analysis {
        if text.trim().is_empty() {
            return Analysis::empty();
        }

        match self.analyze_remote(text).await {
            Ok(analysis) => analysis,
            Err(e) => {
                let degraded = PipelineError::ClassifierUnavailable(e.to_string());
                warn!("{}, using heuristic fallback", degraded);
                self.fallback.score(text)
            }
        }
    }
}
