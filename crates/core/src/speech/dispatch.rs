use std::time::Duration;
use tokio::time::Instant;

const SENTENCE_TERMINATORS: [char; 4] = ['.', '!', ';', '?'];

/// Accumulates streamed text and decides when a piece of it is ready to be
/// spoken.
///
/// Flush rules, in order:
/// 1. complete sentences are released, the unfinished tail stays buffered;
/// 2. a tail longer than `max_chars` is released whole;
/// 3. a forced flush (terminal event, or `idle_flush` elapsed since the last
///    flush) releases everything.
#[derive(Debug)]
pub struct SpeechBuffer {
    pending: String,
    last_flush: Instant,
    max_chars: usize,
    idle_flush: Duration,
}

impl SpeechBuffer {
    pub fn new(now: Instant) -> Self {
        Self::with_limits(now, 100, Duration::from_millis(800))
    }

    pub fn with_limits(now: Instant, max_chars: usize, idle_flush: Duration) -> Self {
        Self {
            pending: String::new(),
            last_flush: now,
            max_chars,
            idle_flush,
        }
    }

    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Appends an increment and returns the units that became speakable.
    pub fn push(&mut self, text: &str, now: Instant) -> Vec<String> {
        if text.is_empty() {
            return Vec::new();
        }
        self.pending.push_str(text);

        let mut units = Vec::new();
        if let Some(end) = complete_sentences_end(&self.pending) {
            let rest = self.pending.split_off(end);
            let sentences = std::mem::replace(&mut self.pending, rest.trim_start().to_string());
            let sentences = sentences.trim();
            if !sentences.is_empty() {
                units.push(sentences.to_string());
            }
        }
        if self.pending.chars().count() > self.max_chars {
            units.extend(self.take_all());
        }
        if !units.is_empty() {
            self.last_flush = now;
        }
        units
    }

    /// Releases the whole buffer if nothing has been flushed for `idle_flush`.
    pub fn flush_if_stale(&mut self, now: Instant) -> Option<String> {
        if self.pending.trim().is_empty() || now.duration_since(self.last_flush) <= self.idle_flush {
            return None;
        }
        self.force_flush(now)
    }

    /// Releases whatever is buffered, regardless of sentence boundaries.
    pub fn force_flush(&mut self, now: Instant) -> Option<String> {
        let unit = self.take_all();
        if unit.is_some() {
            self.last_flush = now;
        }
        unit
    }

    fn take_all(&mut self) -> Option<String> {
        let text = std::mem::take(&mut self.pending);
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

/// Byte offset just past the last sentence terminator run, if any.
fn complete_sentences_end(text: &str) -> Option<usize> {
    let (idx, ch) = text
        .char_indices()
        .rev()
        .find(|(_, c)| SENTENCE_TERMINATORS.contains(c))?;
    Some(idx + ch.len_utf8())
}
