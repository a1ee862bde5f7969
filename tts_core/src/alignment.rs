//! Character alignment from the synthesis provider, aggregated into words.

use serde::Deserialize;
use tracing::warn;

use crate::provider::WordTiming;

/// Character-level alignment attached to an audio chunk.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alignment {
    #[serde(default)]
    pub chars: Vec<String>,
    #[serde(default)]
    pub char_start_times_ms: Vec<u64>,
    #[serde(default)]
    pub chars_durations_ms: Vec<u64>,
}

impl Alignment {
    fn is_consistent(&self) -> bool {
        self.chars.len() == self.char_start_times_ms.len()
            && self.chars.len() == self.chars_durations_ms.len()
    }

    /// Group consecutive non-whitespace characters into timed words.
    pub fn words(&self) -> Vec<WordTiming> {
        if !self.is_consistent() {
            warn!(
                chars = self.chars.len(),
                starts = self.char_start_times_ms.len(),
                durations = self.chars_durations_ms.len(),
                "alignment array length mismatch, dropping timing"
            );
            return Vec::new();
        }

        let mut words = Vec::new();
        let mut current: Option<WordTiming> = None;

        for ((ch, &start), &duration) in self
            .chars
            .iter()
            .zip(&self.char_start_times_ms)
            .zip(&self.chars_durations_ms)
        {
            if ch.trim().is_empty() {
                words.extend(current.take());
                continue;
            }
            let end = start + duration;
            match current.as_mut() {
                Some(word) => {
                    word.text.push_str(ch);
                    word.end_ms = word.end_ms.max(end);
                }
                None => {
                    current = Some(WordTiming {
                        text: ch.clone(),
                        start_ms: start,
                        end_ms: end,
                    })
                }
            }
        }
        words.extend(current);
        words
    }
}
