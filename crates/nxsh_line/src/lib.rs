//! Line editing engine for NexusShell-style prompts
//!
//! This crate reads one logical line from an ANSI/VT-100 terminal with
//! inline editing: UTF-8 input, multi-line prompt handling, bounded history
//! with recall and incremental search (Ctrl-R), programmable tab completion
//! with a columned suggestion pane, and per-range text styling whose
//! anchored spans follow the text across edits.
//!
//! The editor owns its line discipline: during a session canonical mode and
//! echo are disabled and restored on every exit path. It runs single
//! threaded; a consuming shell calls [`Editor::get_line`], supplies the
//! completion callback via [`Editor::set_on_tab_complete`], and reports
//! signals through the [`InterruptHandle`].
//!
//! ```no_run
//! use nxsh_line::{Editor, EditorError};
//!
//! let mut editor = Editor::new();
//! editor.add_to_history("ls /tmp");
//! match editor.get_line("$ ") {
//!     Ok(line) => println!("got: {line}"),
//!     Err(EditorError::Eof) => println!("eof"),
//!     Err(err) => eprintln!("error: {err}"),
//! }
//! ```

pub mod config;
pub mod editor;
pub mod error;
pub mod history;
pub mod metrics;
pub mod style;
pub mod suggestion;
pub mod suggestion_display;
pub mod terminal;
pub mod vt;

pub use config::{EditorConfig, OperationMode, RefreshBehaviour};
pub use editor::{Editor, InterruptHandle};
pub use error::EditorError;
pub use history::History;
pub use metrics::{rendered_string_metrics, StringMetrics};
pub use style::{Color, Span, SpanMode, Style, XtermColor};
pub use suggestion::{
    CompletionAttemptResult, CompletionMode, CompletionSuggestion, SuggestionManager,
};
pub use suggestion_display::XtermSuggestionDisplay;
