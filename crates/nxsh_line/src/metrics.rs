//! Visual extent of rendered strings.
//!
//! Prompts and buffer contents may contain VT escape sequences, carriage
//! returns and newlines; the metrics here count only the code points that
//! actually occupy columns, split per line, so the display logic can compute
//! how many terminal rows a rendering occupies once wrapping is applied.

/// Per-line printable lengths of a rendered string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringMetrics {
    /// Printable code points on each rendered line.
    pub line_lengths: Vec<usize>,
    /// Printable code points over the whole string.
    pub total_length: usize,
    /// The longest single line.
    pub max_line_length: usize,
}

impl StringMetrics {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Number of terminal rows `self` followed immediately by `offset`
    /// occupies when wrapped at `column_width`. The last line of `self` and
    /// the first line of `offset` share a row.
    pub fn lines_with_addition(&self, offset: &StringMetrics, column_width: usize) -> usize {
        let own = Self::non_empty(&self.line_lengths);
        let other = Self::non_empty(&offset.line_lengths);
        let column_width = column_width.max(1);

        let mut lines = 0;
        for length in &own[..own.len() - 1] {
            lines += (length + column_width) / column_width;
        }

        let joined = own[own.len() - 1] + other[0];
        lines += (joined + column_width) / column_width;

        for length in &other[1..] {
            lines += (length + column_width) / column_width;
        }

        lines
    }

    /// Column offset (0-based) of the end of `self` followed by `offset`,
    /// after wrapping at `column_width`.
    pub fn offset_with_addition(&self, offset: &StringMetrics, column_width: usize) -> usize {
        let own = Self::non_empty(&self.line_lengths);
        let other = Self::non_empty(&offset.line_lengths);
        let column_width = column_width.max(1);

        if other.len() > 1 {
            return other[other.len() - 1] % column_width;
        }
        (own[own.len() - 1] + other[0]) % column_width
    }

    fn non_empty(lengths: &[usize]) -> std::borrow::Cow<'_, [usize]> {
        if lengths.is_empty() {
            std::borrow::Cow::Owned(vec![0])
        } else {
            std::borrow::Cow::Borrowed(lengths)
        }
    }
}

/// Recognizer states for the embedded VT sequences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VtState {
    Free,
    Escape,
    Bracket,
    BracketArgsSemi,
    Title,
}

/// Metrics of a rendered string, stripping recognized VT escapes.
pub fn rendered_string_metrics(string: &str) -> StringMetrics {
    let mut chars = string.chars().peekable();
    let mut metrics = StringMetrics::default();
    let mut length = 0usize;
    let mut state = VtState::Free;

    while let Some(c) = chars.next() {
        let next_c = chars.peek().copied().unwrap_or('\0');
        state = metrics_step(&mut metrics, &mut length, c, next_c, state);
    }

    finish_metrics(&mut metrics, length);
    metrics
}

/// Metrics of a buffer slice (code points, no UTF-8 decoding needed).
pub fn rendered_code_point_metrics(code_points: &[char]) -> StringMetrics {
    let mut metrics = StringMetrics::default();
    let mut length = 0usize;
    let mut state = VtState::Free;

    for (i, &c) in code_points.iter().enumerate() {
        let next_c = code_points.get(i + 1).copied().unwrap_or('\0');
        state = metrics_step(&mut metrics, &mut length, c, next_c, state);
    }

    finish_metrics(&mut metrics, length);
    metrics
}

fn finish_metrics(metrics: &mut StringMetrics, length: usize) {
    metrics.line_lengths.push(length);
    metrics.max_line_length = metrics.line_lengths.iter().copied().max().unwrap_or(0);
}

fn metrics_step(
    metrics: &mut StringMetrics,
    length: &mut usize,
    c: char,
    next_c: char,
    state: VtState,
) -> VtState {
    match state {
        VtState::Free => {
            if c == '\x1b' {
                return VtState::Escape;
            }
            if c == '\r' {
                *length = 0;
                if let Some(last) = metrics.line_lengths.last_mut() {
                    *last = 0;
                }
                return state;
            }
            if c == '\n' {
                metrics.line_lengths.push(*length);
                *length = 0;
                return state;
            }
            *length += 1;
            metrics.total_length += 1;
            state
        }
        VtState::Escape => {
            if c == ']' {
                if next_c == '0' {
                    return VtState::Title;
                }
                return state;
            }
            if c == '[' {
                return VtState::Bracket;
            }
            state
        }
        VtState::Bracket => {
            if c.is_ascii_digit() {
                return VtState::BracketArgsSemi;
            }
            state
        }
        VtState::BracketArgsSemi => {
            if c == ';' {
                return VtState::Bracket;
            }
            if !c.is_ascii_digit() {
                return VtState::Free;
            }
            state
        }
        VtState::Title => {
            if c == '\x07' {
                return VtState::Free;
            }
            state
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_counts_code_points() {
        let metrics = rendered_string_metrics("hello");
        assert_eq!(metrics.total_length, 5);
        assert_eq!(metrics.line_lengths, vec![5]);
        assert_eq!(metrics.max_line_length, 5);
    }

    #[test]
    fn multibyte_counts_one_per_code_point() {
        let metrics = rendered_string_metrics("héllo ☃");
        assert_eq!(metrics.total_length, 7);
    }

    #[test]
    fn csi_sequences_are_invisible() {
        let metrics = rendered_string_metrics("\x1b[31mred\x1b[0m");
        assert_eq!(metrics.total_length, 3);
        assert_eq!(metrics.line_lengths, vec![3]);
    }

    #[test]
    fn osc_title_is_invisible() {
        let metrics = rendered_string_metrics("\x1b]0;window title\x07abc");
        assert_eq!(metrics.total_length, 3);
    }

    #[test]
    fn newline_splits_and_carriage_return_resets() {
        let metrics = rendered_string_metrics("ab\ncdef");
        assert_eq!(metrics.line_lengths, vec![2, 4]);

        let metrics = rendered_string_metrics("abcd\rxy");
        assert_eq!(metrics.line_lengths, vec![2]);
        // `\r` only rewinds the column; every printable still counted.
        assert_eq!(metrics.total_length, 6);
    }

    #[test]
    fn lines_with_addition_wraps() {
        // Prompt "abc" followed by buffer "defgh" on a 4-column terminal:
        // "abcd" / "efgh" -> 8 printables over a 4-wide screen is 3 rows
        // by the (len + width) / width convention.
        let prompt = rendered_string_metrics("abc");
        let buffer = rendered_string_metrics("defgh");
        assert_eq!(prompt.lines_with_addition(&buffer, 4), 3);

        // A short prompt and short buffer share a single row.
        let prompt = rendered_string_metrics("> ");
        let buffer = rendered_string_metrics("x");
        assert_eq!(prompt.lines_with_addition(&buffer, 80), 1);
    }

    #[test]
    fn lines_with_addition_multi_line_prompt() {
        let prompt = rendered_string_metrics("line one\n> ");
        let buffer = rendered_string_metrics("cmd");
        assert_eq!(prompt.lines_with_addition(&buffer, 80), 2);
    }

    #[test]
    fn offset_with_addition_tracks_column() {
        let prompt = rendered_string_metrics("> ");
        let buffer = rendered_string_metrics("abc");
        assert_eq!(prompt.offset_with_addition(&buffer, 80), 5);

        // Buffer with its own newline: only its last line matters.
        let buffer = rendered_string_metrics("ab\ncd");
        assert_eq!(prompt.offset_with_addition(&buffer, 80), 2);
    }

    #[test]
    fn empty_metrics_behave_like_a_zero_line() {
        let empty = StringMetrics::default();
        let buffer = rendered_string_metrics("abc");
        assert_eq!(empty.lines_with_addition(&buffer, 80), 1);
        assert_eq!(empty.offset_with_addition(&buffer, 80), 3);
    }
}
