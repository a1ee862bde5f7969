//! Sentence segmentation over a growing text buffer.
//!
//! Generation deltas carry no sentence alignment. [`SentenceBuffer`]
//! accumulates them and releases only complete sentences, keeping at most one
//! trailing fragment that may still grow.

use std::ops::Range;

const TERMINALS: [char; 4] = ['.', '!', '?', '…'];
const CLOSERS: [char; 6] = ['"', '\'', ')', ']', '”', '’'];

const ABBREVIATIONS: [&str; 16] = [
    "Dr.", "Mr.", "Mrs.", "Ms.", "Prof.", "St.", "Jr.", "Sr.", "etc.", "vs.", "e.g.", "i.e.",
    "a.m.", "p.m.", "Inc.", "Ltd.",
];

/// Pluggable sentence tokenizer.
pub trait Segmenter: Send + Sync {
    /// Ordered candidate sentence spans (byte ranges, whitespace excluded).
    /// The last span may be an unfinished sentence.
    fn segment(&self, text: &str) -> Vec<Range<usize>>;

    /// Whether a detected sentence is complete and can be released.
    fn is_terminal(&self, sentence: &str) -> bool {
        sentence
            .trim_end()
            .trim_end_matches(CLOSERS)
            .ends_with(TERMINALS)
    }
}

/// Punctuation based splitter with abbreviation and decimal awareness.
#[derive(Debug, Clone, Default)]
pub struct PunctuationSegmenter;

impl PunctuationSegmenter {
    fn is_abbreviation(text: &str, end: usize) -> bool {
        let head = &text[..end];
        ABBREVIATIONS.iter().any(|abbr| {
            head.ends_with(abbr)
                && head[..head.len() - abbr.len()]
                    .chars()
                    .next_back()
                    .map_or(true, |c| !c.is_alphanumeric())
        })
    }
}

impl Segmenter for PunctuationSegmenter {
    fn segment(&self, text: &str) -> Vec<Range<usize>> {
        let mut spans = Vec::new();
        let mut start: Option<usize> = None;
        let mut chars = text.char_indices().peekable();

        while let Some((i, c)) = chars.next() {
            if start.is_none() {
                if c.is_whitespace() {
                    continue;
                }
                start = Some(i);
            }
            if !TERMINALS.contains(&c) {
                continue;
            }

            // Swallow the rest of the punctuation run and any closing quotes.
            let mut end = i + c.len_utf8();
            let mut single_period = c == '.';
            while let Some(&(j, next)) = chars.peek() {
                if TERMINALS.contains(&next) || CLOSERS.contains(&next) {
                    if TERMINALS.contains(&next) {
                        single_period = false;
                    }
                    end = j + next.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }

            let rest = &text[end..];
            let boundary = match rest.chars().next() {
                // A run at the end of the buffer may still grow: "3." into
                // "3.5", "Wait." into "Wait...".
                None => false,
                Some(next) if next.is_whitespace() => {
                    let continues_lowercase = rest
                        .trim_start()
                        .chars()
                        .next()
                        .is_some_and(|n| n.is_lowercase());
                    !continues_lowercase
                }
                // "3.14", "e.g" or "word.word" stay inside the sentence.
                Some(_) => false,
            };

            if boundary && !(single_period && Self::is_abbreviation(text, end)) {
                if let Some(s) = start.take() {
                    spans.push(s..end);
                }
            }
        }

        if let Some(s) = start {
            let tail = text[s..].trim_end();
            if !tail.is_empty() {
                spans.push(s..s + tail.len());
            }
        }
        spans
    }

    fn is_terminal(&self, sentence: &str) -> bool {
        let trimmed = sentence.trim_end();
        let bare = trimmed.trim_end_matches(CLOSERS);
        if !bare.ends_with(TERMINALS) {
            return false;
        }
        if bare.ends_with('.') && !bare.ends_with("..") {
            let head = &bare[..bare.len() - 1];
            return !(Self::is_abbreviation(bare, bare.len()) || ends_with_digit(head));
        }
        true
    }
}

fn ends_with_digit(text: &str) -> bool {
    text.chars().next_back().is_some_and(|c| c.is_ascii_digit())
}

/// Collapse runs of terminal punctuation to their first mark ("..." → ".",
/// "?!" → "?"). An ellipsis character counts as a period.
pub fn collapse_terminal_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_run = false;
    for c in text.chars() {
        if TERMINALS.contains(&c) {
            if !in_run {
                out.push(if c == '…' { '.' } else { c });
            }
            in_run = true;
        } else {
            out.push(c);
            in_run = false;
        }
    }
    out
}

/// Accumulates deltas and emits complete sentences in order.
#[derive(Debug, Default)]
pub struct SentenceBuffer<S: Segmenter = PunctuationSegmenter> {
    buf: String,
    segmenter: S,
}

impl SentenceBuffer<PunctuationSegmenter> {
    pub fn new() -> Self {
        Self::with_segmenter(PunctuationSegmenter)
    }
}

impl<S: Segmenter> SentenceBuffer<S> {
    pub fn with_segmenter(segmenter: S) -> Self {
        Self {
            buf: String::new(),
            segmenter,
        }
    }

    /// Append a delta and return every sentence it completed, oldest first.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buf.push_str(delta);

        let spans = self.segmenter.segment(&self.buf);
        let Some(last) = spans.last() else {
            return Vec::new();
        };

        // A span touching the end of the buffer is never complete yet.
        let open_ended = last.end == self.buf.len();
        let release = if !open_ended && self.segmenter.is_terminal(&self.buf[last.clone()]) {
            spans.len()
        } else {
            spans.len() - 1
        };
        if release == 0 {
            return Vec::new();
        }

        let units = spans[..release]
            .iter()
            .filter_map(|span| normalize(&self.buf[span.clone()]))
            .collect();
        let consumed = spans[release - 1].end;
        self.buf.drain(..consumed);
        units
    }

    /// Release whatever remains, punctuated or not.
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        normalize(&rest)
    }

    pub fn is_empty(&self) -> bool {
        self.buf.trim().is_empty()
    }
}

fn normalize(span: &str) -> Option<String> {
    let trimmed = span.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(collapse_terminal_runs(trimmed))
    }
}
