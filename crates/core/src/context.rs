use std::fmt::Write as _;

use crate::session::Turn;

pub const DEFAULT_CONTEXT_WINDOW: usize = 5;

/// Compresses recent session history into a structured prompt fragment.
///
/// Rendering is strictly recency-ordered (oldest first within the window, so
/// the newest turn reads last) and deterministic: the same turns always
/// produce a byte-identical fragment.
#[derive(Clone, Debug)]
pub struct ContextBuilder {
    window: usize,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_WINDOW)
    }
}

impl ContextBuilder {
    pub fn new(window: usize) -> Self {
        Self { window }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Render the prompt fragment for up to the last `window` turns. Returns
    /// an empty string when there is no history.
    pub fn build(&self, turns: &[Turn]) -> String {
        let skip = turns.len().saturating_sub(self.window);
        let windowed = &turns[skip..];
        if windowed.is_empty() {
            return String::new();
        }

        let mut fragment = String::from("Previous conversation (oldest first):\n");
        for (index, turn) in windowed.iter().enumerate() {
            let _ = writeln!(fragment, "{}. Question: \"{}\"", index + 1, turn.raw_query);
            let _ = writeln!(fragment, "   Interpreted as: \"{}\"", turn.resolved_query);
            if !turn.extracted_filters.is_empty() {
                // BTreeMap keeps filter order stable across renders.
                let filters = turn
                    .extracted_filters
                    .iter()
                    .map(|(dimension, value)| format!("{dimension}={value}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                let _ = writeln!(fragment, "   Filters: {filters}");
            }
            match (turn.success, turn.row_count) {
                (true, Some(rows)) => {
                    let _ = writeln!(fragment, "   Result: {rows} rows");
                }
                (false, _) => {
                    let _ = writeln!(fragment, "   Result: failed");
                }
                (true, None) => {}
            }
        }
        fragment
    }
}
