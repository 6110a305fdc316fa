use crate::similarity::lexical_similarity;
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Two messages count as near-duplicates at or above this lexical score.
const REPEAT_THRESHOLD: f64 = 0.6;

/// A message as seen by the flood window.
#[derive(Debug, Clone)]
pub struct FloodMessage {
    pub message_id: String,
    pub author_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of observing one message against its channel window.
#[derive(Debug, Clone)]
pub struct FloodResult {
    /// True when at least one other message in the window is a near-duplicate.
    pub is_repeat: bool,
    /// How many messages in the window (the new one included) form the
    /// repeat group.
    pub similar_count: usize,
    /// The repeat group itself, oldest first.
    pub members: Vec<FloodMessage>,
}

/// Sliding per-channel windows of recent messages.
///
/// Each channel holds its own window behind its own lock, so a burst in one
/// channel never blocks observation in another. Expired entries are evicted
/// using the observed message's timestamp before comparison, which keeps
/// the detector deterministic under test.
pub struct FloodDetector {
    window: Duration,
    channels: Mutex<HashMap<String, Arc<Mutex<VecDeque<FloodMessage>>>>>,
}

impl FloodDetector {
    pub fn new(window_secs: u64) -> Self {
        Self {
            window: Duration::seconds(window_secs as i64),
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Records a message and reports its repeat group within the channel's
    /// window. A zero-length window disables detection entirely: nothing is
    /// stored and the message only ever matches itself.
    pub fn observe(&self, channel_id: &str, message: FloodMessage) -> FloodResult {
        if self.window <= Duration::zero() {
            return FloodResult {
                is_repeat: false,
                similar_count: 1,
                members: vec![message],
            };
        }

        let cutoff = message.timestamp - self.window;
        let window = {
            let mut channels = self.channels.lock().unwrap();
            // Channels quiet for a full window are dropped rather than kept
            // as empty husks. A strong count above one means a concurrent
            // observe still holds the entry, so it stays.
            channels.retain(|_, window| {
                Arc::strong_count(window) > 1
                    || window
                        .lock()
                        .unwrap()
                        .back()
                        .is_some_and(|last| last.timestamp > cutoff)
            });
            channels
                .entry(channel_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(VecDeque::new())))
                .clone()
        };
        let mut window = window.lock().unwrap();

        while window
            .front()
            .is_some_and(|front| front.timestamp <= cutoff)
        {
            window.pop_front();
        }

        let mut members: Vec<FloodMessage> = window
            .iter()
            .filter(|prior| lexical_similarity(&prior.content, &message.content) >= REPEAT_THRESHOLD)
            .cloned()
            .collect();
        members.push(message.clone());
        window.push_back(message);

        FloodResult {
            is_repeat: members.len() > 1,
            similar_count: members.len(),
            members,
        }
    }

    #[cfg(test)]
    fn channel_count(&self) -> usize {
        self.channels.lock().unwrap().len()
    }
}
