use crate::classify::{Analysis, Category};
use crate::faq::FaqMatch;
use crate::flood::FloodResult;
use crate::store::CommunityConfig;

/// Sentiment at or below this escalates regardless of urgency.
const NEGATIVE_SENTIMENT_BOUND: f64 = -0.5;

/// What the bot should do about one message. A message can produce zero,
/// one, or several actions.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    AutoReply { answer: String },
    Pin,
    Escalate { reason: Category, severity: f64 },
    SummarizeFlood { messages: Vec<String> },
}

/// Pure decision policy: config toggles plus analysis in, actions out.
///
/// A flood replaces any auto-reply for the same message, so one incident
/// gets one summary instead of N identical answers. Escalation stacks on
/// top of either.
pub fn decide(
    config: &CommunityConfig,
    analysis: &Analysis,
    flood: &FloodResult,
    faq: Option<&FaqMatch>,
    repeat_trigger: usize,
) -> Vec<Action> {
    let mut actions = Vec::new();

    if config.features.faq_autoreply {
        if let Some(found) = faq {
            actions.push(Action::AutoReply {
                answer: found.entry.answer.clone(),
            });
            if config.features.pin_auto_answers {
                actions.push(Action::Pin);
            }
        }
    }

    if config.features.flood_detection && flood.similar_count >= repeat_trigger {
        actions.retain(|a| !matches!(a, Action::AutoReply { .. } | Action::Pin));
        actions.push(Action::SummarizeFlood {
            messages: flood
                .members
                .iter()
                .map(|m| m.content.clone())
                .collect(),
        });
    }

    if config.features.escalation
        && (analysis.urgency >= config.escalation_threshold
            || analysis.sentiment <= NEGATIVE_SENTIMENT_BOUND)
    {
        actions.push(Action::Escalate {
            reason: analysis.category,
            severity: analysis.urgency,
        });
    }

    actions
}
