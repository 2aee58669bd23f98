// Location: src/reasoning/classifier.rs

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::markers::{extends_past, find_earliest, partial_marker_start, MarkerPair};
use crate::config::ReasoningConfig;

/// Receives visible text as soon as it is known not to be part of a marker
pub type VisibleSink = Box<dyn FnMut(&str) + Send>;

/// Incremental splitter of a live token stream into visible and reasoning text.
///
/// One instance per in-flight generation, fed in arrival order. Markers
/// split across fragments are held back until they can be classified, so
/// marker syntax never reaches the visible sink.
pub struct StreamClassifier {
    markers: Vec<MarkerPair>,
    max_consecutive_errors: u32,
    state: ReasoningState,
    on_visible: Option<VisibleSink>,
}

#[derive(Debug, Default)]
struct ReasoningState {
    visible: String,
    reasoning: String,
    in_reasoning: bool,
    pending: Option<String>,
    started_at: Option<Instant>,
    ended_at: Option<Instant>,
    consecutive_errors: u32,
}

/// Final classification of a turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedOutput {
    pub visible: String,
    /// Reasoning text with its markers intact
    pub reasoning: String,
    /// Length in chars of the reasoning text without markers
    pub reasoning_chars: usize,
    /// First span open to last span close; `None` if no span closed or one is still open
    pub reasoning_duration: Option<Duration>,
}

impl ClassifiedOutput {
    pub fn reasoning_duration_ms(&self) -> Option<u64> {
        self.reasoning_duration.map(|d| d.as_millis() as u64)
    }
}

/// Mid-stream view of the classifier buffers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierSnapshot {
    pub visible: String,
    pub reasoning: String,
    pub reasoning_chars: usize,
    pub in_reasoning: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanFault {
    /// A configured marker matched with zero width and would never advance
    EmptyMarker,
    /// A computed offset fell inside a UTF-8 sequence
    Boundary,
}

impl fmt::Display for ScanFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanFault::EmptyMarker => write!(f, "zero-width marker match"),
            ScanFault::Boundary => write!(f, "offset outside char boundary"),
        }
    }
}

impl StreamClassifier {
    pub fn new(config: &ReasoningConfig) -> Self {
        Self {
            markers: config.markers.clone(),
            max_consecutive_errors: config.max_consecutive_errors.max(1),
            state: ReasoningState::default(),
            on_visible: None,
        }
    }

    pub fn with_markers(markers: Vec<MarkerPair>) -> Self {
        Self::new(&ReasoningConfig {
            markers,
            ..Default::default()
        })
    }

    pub fn with_visible_callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.on_visible = Some(Box::new(callback));
        self
    }

    pub fn is_in_reasoning(&self) -> bool {
        self.state.in_reasoning
    }

    /// Consume the next fragment of the stream
    pub fn handle(&mut self, fragment: &str) {
        let input = match self.state.pending.take() {
            Some(mut held) => {
                held.push_str(fragment);
                held
            }
            None => fragment.to_string(),
        };
        self.feed(&input, true);
    }

    /// Scan `input` to the end. With `hold` unset nothing is held back for
    /// the next fragment, which is how the final flush classifies leftovers.
    fn feed(&mut self, input: &str, hold: bool) {
        let mut rest = input;
        while !rest.is_empty() {
            let fault = match self.scan_step(rest, hold) {
                Ok(consumed) => match rest.get(consumed..) {
                    Some(remaining) => {
                        self.state.consecutive_errors = 0;
                        rest = remaining;
                        continue;
                    }
                    None => ScanFault::Boundary,
                },
                Err(fault) => fault,
            };

            self.state.consecutive_errors += 1;
            debug!(
                %fault,
                consecutive = self.state.consecutive_errors,
                "Reasoning scan fault, skipping one char"
            );
            if self.state.consecutive_errors >= self.max_consecutive_errors {
                warn!(
                    consecutive = self.state.consecutive_errors,
                    remaining_bytes = rest.len(),
                    "Reasoning parser degraded to pass-through for this fragment"
                );
                self.degrade(rest);
                break;
            }

            let step = rest.chars().next().map(char::len_utf8).unwrap_or(rest.len());
            let (head, tail) = rest.split_at(step);
            self.append_active(head);
            rest = tail;
        }
    }

    /// Flush held text and return the final classification
    pub fn result(&mut self) -> ClassifiedOutput {
        if let Some(held) = self.state.pending.take() {
            self.feed(&held, false);
        }

        let reasoning_duration = match (self.state.started_at, self.state.ended_at) {
            (Some(start), Some(end)) if !self.state.in_reasoning => Some(end.saturating_duration_since(start)),
            _ => None,
        };

        ClassifiedOutput {
            visible: self.state.visible.clone(),
            reasoning: self.state.reasoning.clone(),
            reasoning_chars: self.stripped_reasoning_chars(),
            reasoning_duration,
        }
    }

    /// Current buffers without flushing held marker text
    pub fn snapshot(&self) -> ClassifierSnapshot {
        ClassifierSnapshot {
            visible: self.state.visible.clone(),
            reasoning: self.state.reasoning.clone(),
            reasoning_chars: self.stripped_reasoning_chars(),
            in_reasoning: self.state.in_reasoning,
        }
    }

    pub fn reset(&mut self) {
        self.state = ReasoningState::default();
    }

    /// Classify the head of `text`, returning how many bytes were consumed
    fn scan_step(&mut self, text: &str, hold: bool) -> Result<usize, ScanFault> {
        let candidates: Vec<&str> = self
            .markers
            .iter()
            .map(|m| if self.state.in_reasoning { m.end.as_str() } else { m.start.as_str() })
            .collect();

        if let Some((pos, marker)) = find_earliest(text, &candidates) {
            if marker.is_empty() {
                return Err(ScanFault::EmptyMarker);
            }
            let end = pos + marker.len();
            let head = text.get(..pos).ok_or(ScanFault::Boundary)?;
            let marker_text = text.get(pos..end).ok_or(ScanFault::Boundary)?;

            // A longer marker may still complete with the next fragment
            let from_marker = text.get(pos..).ok_or(ScanFault::Boundary)?;
            if hold && extends_past(from_marker, &candidates) {
                self.append_active(head);
                self.state.pending = Some(from_marker.to_string());
                return Ok(text.len());
            }

            if self.state.in_reasoning {
                self.state.reasoning.push_str(head);
                self.state.reasoning.push_str(marker_text);
                self.close_span();
            } else {
                self.emit_visible(head);
                self.state.reasoning.push_str(marker_text);
                self.open_span();
            }
            return Ok(end);
        }

        if let Some(hold_at) = partial_marker_start(text, &candidates).filter(|_| hold) {
            let head = text.get(..hold_at).ok_or(ScanFault::Boundary)?;
            let tail = text.get(hold_at..).ok_or(ScanFault::Boundary)?;
            self.append_active(head);
            self.state.pending = Some(tail.to_string());
            return Ok(text.len());
        }

        self.append_active(text);
        Ok(text.len())
    }

    fn open_span(&mut self) {
        self.state.in_reasoning = true;
        if self.state.started_at.is_none() {
            self.state.started_at = Some(Instant::now());
        }
        trace!("Reasoning span opened");
    }

    fn close_span(&mut self) {
        self.state.in_reasoning = false;
        self.state.ended_at = Some(Instant::now());
        trace!("Reasoning span closed");
    }

    fn degrade(&mut self, rest: &str) {
        self.state.in_reasoning = false;
        self.state.pending = None;
        self.state.consecutive_errors = 0;
        self.emit_visible(rest);
    }

    fn append_active(&mut self, text: &str) {
        if self.state.in_reasoning {
            self.state.reasoning.push_str(text);
        } else {
            self.emit_visible(text);
        }
    }

    fn emit_visible(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.state.visible.push_str(text);
        if let Some(sink) = self.on_visible.as_mut() {
            sink(text);
        }
    }

    fn stripped_reasoning_chars(&self) -> usize {
        let mut markers: Vec<&str> = self
            .markers
            .iter()
            .flat_map(|m| [m.start.as_str(), m.end.as_str()])
            .filter(|m| !m.is_empty())
            .collect();
        markers.sort_by_key(|m| std::cmp::Reverse(m.len()));

        let mut stripped = self.state.reasoning.clone();
        for marker in markers {
            stripped = stripped.replace(marker, "");
        }
        stripped.chars().count()
    }
}

impl Default for StreamClassifier {
    fn default() -> Self {
        Self::new(&ReasoningConfig::default())
    }
}

impl fmt::Debug for StreamClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamClassifier")
            .field("markers", &self.markers)
            .field("state", &self.state)
            .finish()
    }
}
