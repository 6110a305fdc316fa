use crate::llm::LlmClient;
use crate::similarity::tokenize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const ESCALATION_PREVIEW_CHARS: usize = 100;

/// Produces short human-readable summaries for flood incidents and
/// escalations. Uses the language model when one is configured and always
/// falls back to a deterministic summary, so moderators never see an empty
/// notice.
#[derive(Clone)]
pub struct Summarizer {
    llm: Option<Arc<LlmClient>>,
}

impl Summarizer {
    pub fn new(llm: Option<Arc<LlmClient>>) -> Self {
        Self { llm }
    }

    /// One-liner describing a burst of near-duplicate messages.
    pub async fn flood_summary(&self, messages: &[String]) -> String {
        if let Some(llm) = &self.llm {
            let prompt = format!(
                "Multiple participants posted variations of the same question. \
                 Summarize the underlying issue in one sentence.\n\n{}",
                messages.join("\n")
            );
            match llm.completion(&prompt).await {
                Ok(summary) if !summary.trim().is_empty() => return summary.trim().to_string(),
                Ok(_) => {}
                Err(e) => debug!("flood summary model call failed, using fallback: {}", e),
            }
        }
        fallback_flood_summary(messages)
    }

    /// Short blurb for an escalation notice.
    pub async fn escalation_summary(&self, content: &str) -> String {
        if let Some(llm) = &self.llm {
            let prompt = format!(
                "Summarize this participant message for a moderator in one short \
                 sentence:\n\n{content}"
            );
            match llm.completion(&prompt).await {
                Ok(summary) if !summary.trim().is_empty() => return summary.trim().to_string(),
                Ok(_) => {}
                Err(e) => debug!("escalation summary model call failed, using fallback: {}", e),
            }
        }
        fallback_escalation_summary(content)
    }
}

fn fallback_flood_summary(messages: &[String]) -> String {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for message in messages {
        for token in tokenize(message) {
            if token.len() > 3 {
                *counts.entry(token).or_default() += 1;
            }
        }
    }
    let topic = counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        .map(|(word, _)| word);
    match topic {
        Some(word) => format!(
            "{} participants are asking about \"{}\"",
            messages.len(),
            word
        ),
        None => format!("{} participants posted similar messages", messages.len()),
    }
}

fn fallback_escalation_summary(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.chars().count() <= ESCALATION_PREVIEW_CHARS {
        return trimmed.to_string();
    }
    let preview: String = trimmed.chars().take(ESCALATION_PREVIEW_CHARS).collect();
    format!("{preview}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_flood_fallback_names_the_topic() {
        let summarizer = Summarizer::new(None);
        let messages = vec![
            "the wifi is down".to_string(),
            "wifi down again".to_string(),
            "is the wifi broken?".to_string(),
        ];
        let summary = summarizer.flood_summary(&messages).await;
        assert!(summary.contains("wifi"));
        assert!(summary.contains('3'));
    }

    #[tokio::test]
    async fn test_flood_fallback_handles_empty_group() {
        let summarizer = Summarizer::new(None);
        let summary = summarizer.flood_summary(&[]).await;
        assert!(!summary.is_empty());
    }

    #[tokio::test]
    async fn test_escalation_fallback_truncates() {
        let summarizer = Summarizer::new(None);
        let long = "x".repeat(250);
        let summary = summarizer.escalation_summary(&long).await;
        assert_eq!(summary.chars().count(), ESCALATION_PREVIEW_CHARS + 3);
        assert!(summary.ends_with("..."));
    }

    #[tokio::test]
    async fn test_escalation_fallback_keeps_short_messages() {
        let summarizer = Summarizer::new(None);
        let summary = summarizer.escalation_summary("the judges portal is broken").await;
        assert_eq!(summary, "the judges portal is broken");
    }
}
