use serde::{Deserialize, Serialize};

/// A start/end delimiter pair surrounding a reasoning span
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MarkerPair {
    pub start: String,
    pub end: String,
}

impl MarkerPair {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Marker pairs emitted by common reasoning model families
    pub fn defaults() -> Vec<MarkerPair> {
        vec![
            MarkerPair::new("<think>", "</think>"),
            MarkerPair::new("<thinking>", "</thinking>"),
            MarkerPair::new("<reasoning>", "</reasoning>"),
            MarkerPair::new("[THINK]", "[/THINK]"),
        ]
    }
}

/// Earliest occurrence of any marker in `text`; ties go to the longest marker.
pub(crate) fn find_earliest<'m>(text: &str, markers: &[&'m str]) -> Option<(usize, &'m str)> {
    let mut best: Option<(usize, &'m str)> = None;
    for &marker in markers {
        if let Some(pos) = text.find(marker) {
            best = match best {
                Some((best_pos, best_marker))
                    if best_pos < pos || (best_pos == pos && best_marker.len() >= marker.len()) =>
                {
                    Some((best_pos, best_marker))
                }
                _ => Some((pos, marker)),
            };
        }
    }
    best
}

/// Whether some marker is strictly longer than `text` and starts with it
pub(crate) fn extends_past(text: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| m.len() > text.len() && m.starts_with(text))
}

/// Byte offset of the longest suffix of `text` that is a proper prefix of some marker
pub(crate) fn partial_marker_start(text: &str, markers: &[&str]) -> Option<usize> {
    let longest = markers.iter().map(|m| m.len()).max().unwrap_or(0);
    if longest < 2 {
        return None;
    }
    let window = text.len().saturating_sub(longest - 1);
    text.char_indices()
        .map(|(idx, _)| idx)
        .filter(|&idx| idx >= window)
        .find(|&idx| {
            let suffix = &text[idx..];
            markers
                .iter()
                .any(|m| suffix.len() < m.len() && m.starts_with(suffix))
        })
}
