//! Tab-completion candidates and the manager that applies them.
//!
//! The completion callback hands the editor a list of candidates; the
//! manager tracks the current selection across repeated tab presses, computes
//! the common-prefix completion, and describes each application as an edit
//! (a region to remove, text to insert, a style to attach) that the editor
//! carries out against its buffer.

use crate::style::Style;

/// A single completion candidate.
///
/// `text` is the full candidate token (including the part the user already
/// typed); `trailing_trivia` is appended after the token when the candidate
/// is applied, typically a space or a path separator.
#[derive(Debug, Clone, Default)]
pub struct CompletionSuggestion {
    pub text: Vec<char>,
    pub trailing_trivia: Vec<char>,
    pub style: Style,
    /// Code-point offset where the completed token starts in the buffer.
    /// Filled in by the manager when the suggestion is applied.
    pub start_index: usize,
}

impl CompletionSuggestion {
    pub fn new(text: impl AsRef<str>) -> Self {
        Self {
            text: text.as_ref().chars().collect(),
            ..Self::default()
        }
    }

    pub fn with_trailing_trivia(text: impl AsRef<str>, trivia: impl AsRef<str>) -> Self {
        Self {
            text: text.as_ref().chars().collect(),
            trailing_trivia: trivia.as_ref().chars().collect(),
            ..Self::default()
        }
    }

    pub fn with_style(mut self, style: Style) -> Self {
        self.style = style;
        self
    }

    pub fn text_string(&self) -> String {
        self.text.iter().collect()
    }
}

/// What a tab press should do, determined by the press count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    DontComplete,
    /// First press: insert the longest common prefix of all candidates.
    CompletePrefix,
    /// Second press: render the candidate list.
    ShowSuggestions,
    /// Third press onwards: replace the completed region with the next
    /// candidate.
    CycleSuggestions,
}

/// The edit a completion attempt asks the editor to perform.
///
/// The editor first moves the cursor by `new_cursor_offset`, removes
/// `offset_region_to_remove` code points forward from there, then inserts
/// each string of `insert` and optionally applies `style_to_apply` as an
/// anchored span over the completed token.
#[derive(Debug, Clone)]
pub struct CompletionAttemptResult {
    pub new_completion_mode: CompletionMode,
    pub new_cursor_offset: isize,
    /// Half-open code-point range, measured from the adjusted cursor.
    pub offset_region_to_remove: (usize, usize),
    pub insert: Vec<String>,
    pub style_to_apply: Option<Style>,
}

impl CompletionAttemptResult {
    fn noop(mode: CompletionMode) -> Self {
        Self {
            new_completion_mode: mode,
            new_cursor_offset: 0,
            offset_region_to_remove: (0, 0),
            insert: Vec::new(),
            style_to_apply: None,
        }
    }
}

/// Holds the candidate list and the cycling state between tab presses.
///
/// `next_index` names the candidate the next cycle press will apply; the
/// editor advances it after each application, so a direction flip has to
/// step twice to land on the neighbour of the candidate currently shown.
#[derive(Debug, Default)]
pub struct SuggestionManager {
    suggestions: Vec<CompletionSuggestion>,
    next_index: usize,
    selected_index: usize,
    invariant_offset: usize,
    static_offset: usize,
    common_prefix_length: usize,
    /// Code points inserted past the invariant region by previous attempts;
    /// the region the next application replaces.
    inserted_length: usize,
}

impl SuggestionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a fresh candidate list, resetting the cycling state.
    pub fn set_suggestions(&mut self, suggestions: Vec<CompletionSuggestion>) {
        self.suggestions = suggestions;
        self.next_index = 0;
        self.selected_index = 0;
        self.inserted_length = 0;
        self.common_prefix_length = self.compute_common_prefix();
    }

    /// Record the invariant/static split of the current token, as declared by
    /// the completion callback, and preselect a candidate.
    pub fn set_suggestion_variants(
        &mut self,
        static_offset: usize,
        invariant_offset: usize,
        selected_index: usize,
    ) {
        self.static_offset = static_offset;
        self.invariant_offset = invariant_offset;
        self.next_index = selected_index;
    }

    pub fn count(&self) -> usize {
        self.suggestions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suggestions.is_empty()
    }

    pub fn suggestions(&self) -> &[CompletionSuggestion] {
        &self.suggestions
    }

    /// Index of the candidate shown by the most recent application.
    pub fn selected_index(&self) -> usize {
        self.selected_index
    }

    /// The candidate most recently applied to the buffer.
    pub fn current_suggestion(&self) -> Option<&CompletionSuggestion> {
        self.suggestions.get(self.selected_index)
    }

    pub fn next(&mut self) {
        if !self.suggestions.is_empty() {
            self.next_index = (self.next_index + 1) % self.suggestions.len();
        }
    }

    pub fn previous(&mut self) {
        if !self.suggestions.is_empty() {
            let count = self.suggestions.len();
            self.next_index = (self.next_index + count - 1) % count;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Describe the edit for one tab press. `initiation_start_index` is the
    /// cursor position (code points) at the time of the press.
    pub fn attempt_completion(
        &mut self,
        mode: CompletionMode,
        initiation_start_index: usize,
    ) -> CompletionAttemptResult {
        if self.suggestions.is_empty() || self.next_index >= self.suggestions.len() {
            return CompletionAttemptResult::noop(CompletionMode::DontComplete);
        }

        match mode {
            CompletionMode::DontComplete | CompletionMode::ShowSuggestions => {
                CompletionAttemptResult::noop(mode)
            }
            CompletionMode::CompletePrefix => {
                if self.invariant_offset > self.common_prefix_length {
                    // Nothing shared beyond what the user typed; fall through
                    // to showing the list.
                    return CompletionAttemptResult::noop(CompletionMode::ShowSuggestions);
                }
                let prefix: String = self.suggestions[0].text
                    [self.invariant_offset..self.common_prefix_length]
                    .iter()
                    .collect();
                self.inserted_length = self.common_prefix_length - self.invariant_offset;
                self.selected_index = 0;
                self.suggestions[0].start_index = initiation_start_index
                    .saturating_sub(self.invariant_offset + self.static_offset);

                let mut result = CompletionAttemptResult::noop(CompletionMode::CompletePrefix);
                result.insert.push(prefix);
                result
            }
            CompletionMode::CycleSuggestions => {
                let index = self.next_index;
                self.selected_index = index;

                let removed = self.inserted_length;
                let mut result = CompletionAttemptResult::noop(CompletionMode::CycleSuggestions);
                result.offset_region_to_remove = (0, removed);
                result.new_cursor_offset = -(removed as isize);

                let invariant = self.invariant_offset.min(self.suggestions[index].text.len());
                let tail: String = self.suggestions[index].text[invariant..].iter().collect();
                let trivia: String = self.suggestions[index].trailing_trivia.iter().collect();
                self.inserted_length = self.suggestions[index].text.len() - invariant
                    + self.suggestions[index].trailing_trivia.len();
                self.suggestions[index].start_index = initiation_start_index
                    .saturating_sub(removed + self.invariant_offset + self.static_offset);

                result.insert.push(tail);
                if !trivia.is_empty() {
                    result.insert.push(trivia);
                }
                result.style_to_apply = Some(self.suggestions[index].style.clone());
                result
            }
        }
    }

    fn compute_common_prefix(&self) -> usize {
        let Some(first) = self.suggestions.first() else {
            return 0;
        };
        let mut length = first.text.len();
        for suggestion in &self.suggestions[1..] {
            let mut i = 0;
            while i < length && i < suggestion.text.len() && suggestion.text[i] == first.text[i] {
                i += 1;
            }
            length = i;
            if length == 0 {
                break;
            }
        }
        length
    }
}
