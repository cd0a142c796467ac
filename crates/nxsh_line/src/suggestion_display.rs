//! On-screen rendering of the completion candidate list.
//!
//! Candidates are laid out below the editing line in columns sized to the
//! terminal, paginated when they would not fit, with the current selection
//! shown in reverse video. The display reports its origin row back to the
//! editor, since drawing past the bottom of the screen scrolls everything
//! up.

use crate::suggestion::SuggestionManager;
use crate::vt;
use std::io::{self, Write};
use unicode_width::UnicodeWidthStr;

#[derive(Debug)]
pub struct XtermSuggestionDisplay {
    num_lines: usize,
    num_columns: usize,
    origin_row: usize,
    origin_column: usize,
    prompt_lines_at_initiation: usize,
    lines_used_for_last_suggestions: usize,
}

impl XtermSuggestionDisplay {
    pub fn new(num_lines: usize, num_columns: usize) -> Self {
        Self {
            num_lines: num_lines.max(1),
            num_columns: num_columns.max(1),
            origin_row: 1,
            origin_column: 1,
            prompt_lines_at_initiation: 1,
            lines_used_for_last_suggestions: 0,
        }
    }

    pub fn set_terminal_size(&mut self, num_lines: usize, num_columns: usize) {
        self.num_lines = num_lines.max(1);
        self.num_columns = num_columns.max(1);
    }

    pub fn set_origin(&mut self, row: usize, column: usize) {
        self.origin_row = row.max(1);
        self.origin_column = column.max(1);
    }

    /// Where the editing region begins after any scrolling this display
    /// caused.
    pub fn origin_row(&self) -> usize {
        self.origin_row
    }

    pub fn origin_column(&self) -> usize {
        self.origin_column
    }

    /// Rows the prompt and buffer occupied when completion started; the
    /// candidate list is drawn below them.
    pub fn set_initial_prompt_lines(&mut self, lines: usize) {
        self.prompt_lines_at_initiation = lines.max(1);
    }

    /// Render the candidate list. The caller is expected to have cleaned up
    /// any previous rendering first.
    pub fn display(&mut self, out: &mut dyn Write, manager: &SuggestionManager) -> io::Result<()> {
        if manager.is_empty() {
            return Ok(());
        }

        let labels: Vec<String> = manager
            .suggestions()
            .iter()
            .map(|s| s.text_string())
            .collect();
        let longest = labels
            .iter()
            .map(|label| UnicodeWidthStr::width(label.as_str()))
            .max()
            .unwrap_or(1);

        let spans_entire_line = longest + 2 >= self.num_columns;
        let column_width = if spans_entire_line {
            self.num_columns
        } else {
            longest + 2
        };
        let per_row = (self.num_columns / column_width).max(1);

        let total_rows = labels.len().div_ceil(per_row);
        // Leave one row for the page indicator when paginating.
        let max_rows = self
            .num_lines
            .saturating_sub(self.prompt_lines_at_initiation + 1)
            .max(1);
        let paginated = total_rows > max_rows;
        let rows_per_page = if paginated { max_rows } else { total_rows };
        let per_page = rows_per_page * per_row;
        let page = manager.selected_index() / per_page;
        let page_count = labels.len().div_ceil(per_page);
        let start = page * per_page;
        let shown = per_page.min(labels.len() - start);
        let rows_drawn = shown.div_ceil(per_row) + usize::from(paginated);

        let start_row = self.origin_row + self.prompt_lines_at_initiation;
        vt::move_absolute(out, start_row.min(self.num_lines), 1)?;
        if start_row > self.num_lines {
            out.write_all(b"\r\n")?;
        }

        for row in 0..rows_drawn - usize::from(paginated) {
            if row > 0 {
                out.write_all(b"\r\n")?;
            }
            for col in 0..per_row {
                let index = start + row * per_row + col;
                if index >= start + shown {
                    break;
                }
                let label = &labels[index];
                let selected = index == manager.selected_index();
                let style = &manager.suggestions()[index].style;

                vt::apply_style(out, style, true)?;
                if selected {
                    out.write_all(b"\x1b[7m")?;
                }
                out.write_all(label.as_bytes())?;
                vt::apply_style(out, style, false)?;
                vt::reset_style(out)?;

                if !spans_entire_line {
                    let padding = column_width - UnicodeWidthStr::width(label.as_str());
                    write!(out, "{:padding$}", "")?;
                }
            }
            vt::clear_to_end_of_line(out)?;
        }

        if paginated {
            let indicator = format!("[page {} of {}]", page + 1, page_count);
            let padding = self
                .num_columns
                .saturating_sub(UnicodeWidthStr::width(indicator.as_str()));
            write!(out, "\r\n{:padding$}{indicator}", "")?;
            vt::clear_to_end_of_line(out)?;
        }

        // Drawing past the bottom scrolled the screen; the editing region
        // moved up with it.
        let bottom_needed = start_row + rows_drawn - 1;
        let overflow = bottom_needed.saturating_sub(self.num_lines);
        self.origin_row = self.origin_row.saturating_sub(overflow).max(1);

        self.lines_used_for_last_suggestions = rows_drawn;
        out.flush()
    }

    /// Erase the previously drawn candidate area. Returns whether anything
    /// was drawn.
    pub fn cleanup(&mut self, out: &mut dyn Write) -> io::Result<bool> {
        if self.lines_used_for_last_suggestions == 0 {
            return Ok(false);
        }
        vt::save_cursor(out)?;
        vt::clear_lines(out, 0, self.lines_used_for_last_suggestions)?;
        vt::restore_cursor(out)?;
        out.flush()?;
        self.lines_used_for_last_suggestions = 0;
        Ok(true)
    }

    /// Completion ended; forget any leftover display state.
    pub fn finish(&mut self) {
        self.lines_used_for_last_suggestions = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suggestion::CompletionSuggestion;

    fn manager_with(candidates: &[&str]) -> SuggestionManager {
        let mut manager = SuggestionManager::new();
        manager.set_suggestions(candidates.iter().map(CompletionSuggestion::new).collect());
        manager
    }

    #[test]
    fn renders_all_candidates() {
        let mut display = XtermSuggestionDisplay::new(25, 80);
        display.set_origin(1, 1);
        display.set_initial_prompt_lines(1);
        let manager = manager_with(&["commit", "commute"]);

        let mut sink = Vec::new();
        display.display(&mut sink, &manager).expect("display");
        let rendered = String::from_utf8(sink).expect("utf8");
        assert!(rendered.contains("commit"));
        assert!(rendered.contains("commute"));
        // The selected candidate is shown in reverse video.
        assert!(rendered.contains("\x1b[7m"));
    }

    #[test]
    fn cleanup_reports_whether_it_drew() {
        let mut display = XtermSuggestionDisplay::new(25, 80);
        let manager = manager_with(&["one"]);
        let mut sink = Vec::new();

        assert!(!display.cleanup(&mut sink).expect("cleanup"));
        display.display(&mut sink, &manager).expect("display");
        assert!(display.cleanup(&mut sink).expect("cleanup"));
        assert!(!display.cleanup(&mut sink).expect("cleanup"));
    }

    #[test]
    fn long_lists_paginate() {
        let mut display = XtermSuggestionDisplay::new(6, 20);
        display.set_origin(1, 1);
        display.set_initial_prompt_lines(1);
        let names: Vec<String> = (0..40).map(|i| format!("candidate-{i:02}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let manager = manager_with(&refs);

        let mut sink = Vec::new();
        display.display(&mut sink, &manager).expect("display");
        let rendered = String::from_utf8(sink).expect("utf8");
        assert!(rendered.contains("[page 1 of"));
        // Only the first page is drawn.
        assert!(rendered.contains("candidate-00"));
        assert!(!rendered.contains("candidate-39"));
    }

    #[test]
    fn drawing_past_the_bottom_lifts_the_origin() {
        let mut display = XtermSuggestionDisplay::new(5, 80);
        display.set_origin(5, 1);
        display.set_initial_prompt_lines(1);
        let manager = manager_with(&["alpha", "beta"]);

        let mut sink = Vec::new();
        display.display(&mut sink, &manager).expect("display");
        assert!(display.origin_row() < 5);
    }
}
