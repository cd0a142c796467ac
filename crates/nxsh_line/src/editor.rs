//! The interactive line editor.
//!
//! `Editor` reads one logical line from the terminal with inline editing:
//! UTF-8 input mixed with CSI escape sequences is decoded by a small state
//! machine, edits mutate a code-point buffer with styled spans that follow
//! the text, and a refresh pass reconciles the screen with the model. The
//! editor supplies its own line discipline; during a session ICANON and ECHO
//! are cleared and the original attributes are restored on every exit path.

use crate::config::{EditorConfig, OperationMode, RefreshBehaviour};
use crate::error::EditorError;
use crate::history::History;
use crate::metrics::{self, StringMetrics};
use crate::style::{Span, SpanMode, Style};
use crate::suggestion::{CompletionMode, CompletionSuggestion, SuggestionManager};
use crate::suggestion_display::XtermSuggestionDisplay;
use crate::terminal::{self, ControlCharacters};
use crate::vt;
use log::{debug, warn};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::io::{self, BufRead, Write};
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The control-key code point for a letter: `ctrl('A')` is `0x01`.
pub(crate) const fn ctrl(c: char) -> char {
    ((c as u32) & 0x3f) as u8 as char
}

/// Decoder states for input mixing CSI sequences with plain code points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputState {
    Free,
    GotEscape,
    GotEscapeFollowedByLeftBracket,
    ExpectTerminator,
}

/// How a buffer edit affects anchored spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModificationKind {
    Insertion,
    Removal,
    /// Drop any anchored span straddling the hint index; used when a
    /// completion replaces the token under a span so stale highlighting does
    /// not survive.
    ForcedOverlapRemoval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TabDirection {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Amount {
    Character,
    Word,
}

#[derive(Debug, Default)]
struct InterruptFlags {
    interrupted: AtomicBool,
    resized: AtomicBool,
}

/// Cloneable handle for the consuming shell's signal handlers. Setting a
/// flag wakes nothing by itself; the signal's EINTR interrupts the blocking
/// read and the editor observes the flag on its next loop iteration.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    flags: Arc<InterruptFlags>,
}

impl InterruptHandle {
    /// Note a SIGINT-equivalent. The editor prints `^C`, clears the buffer
    /// and keeps editing.
    pub fn interrupt(&self) {
        self.flags.interrupted.store(true, Ordering::SeqCst);
    }

    /// Note a window-size change, observed at the next refresh.
    pub fn resize(&self) {
        self.flags.resized.store(true, Ordering::SeqCst);
    }
}

/// Shared state between the outer editor and the callbacks wired into the
/// nested incremental-search editor.
#[derive(Debug)]
struct SearchSession {
    search_offset: usize,
    reset_buffer_on_search_end: bool,
    clear_screen_requested: bool,
}

impl SearchSession {
    fn take_clear_screen(&mut self) -> bool {
        std::mem::take(&mut self.clear_screen_requested)
    }
}

type KeyCallback = Box<dyn FnMut(&mut Editor) -> bool>;
type RefreshHook = Box<dyn FnMut(&mut Editor)>;
type TabCompleteHook = Box<dyn FnMut(&mut Editor) -> Vec<CompletionSuggestion>>;
type PlainHook = Box<dyn FnMut()>;

type SpanMap = BTreeMap<usize, BTreeMap<usize, Style>>;

/// An interactive single-line editor over an ANSI/VT-100 terminal.
pub struct Editor {
    // Buffer model. The buffer is a sequence of code points; the cursor is a
    // code-point offset in `[0, buffer.len()]`.
    buffer: Vec<char>,
    cursor: usize,
    drawn_cursor: usize,
    inline_search_cursor: usize,
    chars_inserted_in_the_middle: usize,

    // Bytes queued for the append-only refresh path, and bytes read but not
    // yet forming a complete UTF-8 sequence.
    pending_chars: Vec<u8>,
    incomplete_data: Vec<u8>,

    // Prompt and display bookkeeping.
    prompt: String,
    cached_prompt_metrics: StringMetrics,
    old_prompt_metrics: StringMetrics,
    cached_prompt_valid: bool,
    cached_buffer_metrics: StringMetrics,
    origin_row: usize,
    origin_column: usize,
    num_columns: usize,
    num_lines: usize,
    previous_num_columns: usize,
    extra_forward_lines: usize,
    was_resized: bool,
    refresh_needed: bool,
    always_refresh: bool,

    // Session state.
    finish: bool,
    is_editing: bool,
    initialized: bool,
    input_error: Option<EditorError>,
    default_termios: Option<libc::termios>,
    control_characters: ControlCharacters,
    state: InputState,
    input_fd: RawFd,
    out: Box<dyn Write>,
    interrupt_flags: Arc<InterruptFlags>,

    // History and recall.
    history: History,
    history_cursor: usize,
    search_offset: usize,
    searching_backwards: bool,
    is_searching: bool,
    pre_search_buffer: Vec<char>,
    pre_search_cursor: usize,

    // Completion.
    suggestion_manager: SuggestionManager,
    suggestion_display: XtermSuggestionDisplay,
    times_tab_pressed: usize,
    tab_direction: TabDirection,
    prompt_lines_at_suggestion_initiation: usize,

    // Styled spans, each collection keyed both by start and by end offset.
    spans_starting: SpanMap,
    spans_ending: SpanMap,
    anchored_spans_starting: SpanMap,
    anchored_spans_ending: SpanMap,

    // Hooks.
    key_callbacks: HashMap<char, KeyCallback>,
    on_display_refresh: Option<RefreshHook>,
    on_tab_complete: Option<TabCompleteHook>,
    on_interrupt_handled: Option<PlainHook>,
    on_exit: Option<PlainHook>,

    config: EditorConfig,
}

impl Default for Editor {
    fn default() -> Self {
        Self::new()
    }
}

impl Editor {
    pub fn new() -> Self {
        Self::with_config(EditorConfig::default())
    }

    pub fn with_config(config: EditorConfig) -> Self {
        let always_refresh = config.refresh_behaviour == RefreshBehaviour::Eager;
        Self {
            buffer: Vec::new(),
            cursor: 0,
            drawn_cursor: 0,
            inline_search_cursor: 0,
            chars_inserted_in_the_middle: 0,
            pending_chars: Vec::new(),
            incomplete_data: Vec::new(),
            prompt: String::new(),
            cached_prompt_metrics: StringMetrics::default(),
            old_prompt_metrics: StringMetrics::default(),
            cached_prompt_valid: false,
            cached_buffer_metrics: StringMetrics::default(),
            origin_row: 0,
            origin_column: 0,
            num_columns: 80,
            num_lines: 25,
            previous_num_columns: 0,
            extra_forward_lines: 0,
            was_resized: false,
            refresh_needed: false,
            always_refresh,
            finish: false,
            is_editing: false,
            initialized: false,
            input_error: None,
            default_termios: None,
            control_characters: ControlCharacters::default(),
            state: InputState::Free,
            input_fd: libc::STDIN_FILENO,
            out: Box::new(io::stderr()),
            interrupt_flags: Arc::new(InterruptFlags::default()),
            history: History::new(config.history_capacity),
            history_cursor: 0,
            search_offset: 0,
            searching_backwards: false,
            is_searching: false,
            pre_search_buffer: Vec::new(),
            pre_search_cursor: 0,
            suggestion_manager: SuggestionManager::new(),
            suggestion_display: XtermSuggestionDisplay::new(25, 80),
            times_tab_pressed: 0,
            tab_direction: TabDirection::Forward,
            prompt_lines_at_suggestion_initiation: 0,
            spans_starting: SpanMap::new(),
            spans_ending: SpanMap::new(),
            anchored_spans_starting: SpanMap::new(),
            anchored_spans_ending: SpanMap::new(),
            key_callbacks: HashMap::new(),
            on_display_refresh: None,
            on_tab_complete: None,
            on_interrupt_handled: None,
            on_exit: None,
            config,
        }
    }

    /// The buffer contents as a string.
    pub fn line(&self) -> String {
        self.line_up_to(self.buffer.len())
    }

    /// The buffer contents up to a code-point offset.
    pub fn line_up_to(&self, up_to_index: usize) -> String {
        self.buffer[..up_to_index.min(self.buffer.len())]
            .iter()
            .collect()
    }

    /// The raw code-point buffer.
    pub fn buffer(&self) -> &[char] {
        &self.buffer
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_editing(&self) -> bool {
        self.is_editing
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    /// Handle for signal handlers to report interrupts and window resizes.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            flags: Arc::clone(&self.interrupt_flags),
        }
    }

    /// Append a submitted line to history, dropping the oldest entry when
    /// the capacity is exceeded. Empty lines are ignored.
    pub fn add_to_history(&mut self, line: impl Into<String>) {
        self.history.add(line);
    }

    /// Attach a per-code-point handler. The handler runs before default
    /// processing and returns whether the default should still proceed.
    pub fn register_character_input_callback(
        &mut self,
        code_point: char,
        callback: impl FnMut(&mut Editor) -> bool + 'static,
    ) {
        if self.key_callbacks.contains_key(&code_point) {
            warn!("key callback registered twice for {code_point:?}; replacing");
        }
        self.key_callbacks.insert(code_point, Box::new(callback));
    }

    /// Hook invoked on every display refresh that repaints.
    pub fn set_on_display_refresh(&mut self, hook: impl FnMut(&mut Editor) + 'static) {
        self.on_display_refresh = Some(Box::new(hook));
    }

    /// Completion callback: given the editor, produce candidates for the
    /// token at the cursor. The callback is expected to call [`Editor::suggest`]
    /// to declare the invariant/static split of the token.
    pub fn set_on_tab_complete(
        &mut self,
        hook: impl FnMut(&mut Editor) -> Vec<CompletionSuggestion> + 'static,
    ) {
        self.on_tab_complete = Some(Box::new(hook));
    }

    pub fn set_on_interrupt_handled(&mut self, hook: impl FnMut() + 'static) {
        self.on_interrupt_handled = Some(Box::new(hook));
    }

    /// Hook invoked when a session ends, on every exit path.
    pub fn set_on_exit(&mut self, hook: impl FnMut() + 'static) {
        self.on_exit = Some(Box::new(hook));
    }

    /// Declare, from within the completion callback, how many code points
    /// before the cursor are invariant (shared by every candidate and never
    /// rewritten) and how many further fixed code points precede them.
    pub fn suggest(&mut self, invariant_offset: usize, static_offset: usize, mode: SpanMode) {
        let (static_offset, invariant_offset) = if mode == SpanMode::ByteOriented {
            let range = self.byte_offset_range_to_code_point_offset_range(
                static_offset,
                invariant_offset + static_offset,
                self.cursor.saturating_sub(1),
                true,
            );
            (range.0, range.1 - range.0)
        } else {
            (static_offset, invariant_offset)
        };
        self.suggestion_manager
            .set_suggestion_variants(static_offset, invariant_offset, 0);
    }

    /// Record a style span over the buffer. Byte-oriented spans are
    /// converted to code points on entry; anchored styles follow the text
    /// across subsequent edits.
    pub fn stylize(&mut self, span: Span, style: Style) {
        if style.is_empty() {
            return;
        }

        let (start, end) = if span.mode == SpanMode::ByteOriented {
            self.byte_offset_range_to_code_point_offset_range(span.start, span.end, 0, false)
        } else {
            (span.start, span.end)
        };
        if start >= end {
            return;
        }

        let changed = if style.is_anchored() {
            Self::insert_span(
                &mut self.anchored_spans_starting,
                &mut self.anchored_spans_ending,
                start,
                end,
                style,
            )
        } else {
            Self::insert_span(
                &mut self.spans_starting,
                &mut self.spans_ending,
                start,
                end,
                style,
            )
        };
        if changed {
            self.refresh_needed = true;
        }
    }

    /// Clear style spans; anchored spans only when asked.
    pub fn strip_styles(&mut self, strip_anchored: bool) {
        self.spans_starting.clear();
        self.spans_ending.clear();
        if strip_anchored {
            self.anchored_spans_starting.clear();
            self.anchored_spans_ending.clear();
        }
        self.refresh_needed = true;
    }

    /// Insert a code point at the cursor, shifting anchored spans.
    pub fn insert(&mut self, code_point: char) {
        let mut utf8 = [0u8; 4];
        self.pending_chars
            .extend_from_slice(code_point.encode_utf8(&mut utf8).as_bytes());

        self.readjust_anchored_styles(self.cursor, ModificationKind::Insertion);

        if self.cursor == self.buffer.len() {
            self.buffer.push(code_point);
            self.cursor = self.buffer.len();
            self.inline_search_cursor = self.cursor;
            return;
        }

        self.buffer.insert(self.cursor, code_point);
        self.chars_inserted_in_the_middle += 1;
        self.cursor += 1;
        self.inline_search_cursor = self.cursor;
    }

    /// Insert every code point of a string at the cursor.
    pub fn insert_str(&mut self, string: &str) {
        for code_point in string.chars() {
            self.insert(code_point);
        }
    }

    /// Erase the current line on screen and in the model.
    pub fn clear_line(&mut self) -> io::Result<()> {
        for _ in 0..self.cursor {
            self.out.write_all(b"\x08")?;
        }
        vt::clear_to_end_of_line(&mut *self.out)?;
        self.buffer.clear();
        self.cursor = 0;
        self.inline_search_cursor = 0;
        Ok(())
    }

    /// Latch the end of the session; teardown happens once the current input
    /// batch has been processed and the display refreshed.
    pub fn finish(&mut self) {
        self.finish = true;
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Read one line from the terminal.
    ///
    /// In `NoEscapeSequences` and `NonInteractive` modes this is a plain
    /// buffered line read with no editing. Otherwise the terminal is put in
    /// the editor's own line discipline for the duration of the call and
    /// restored on every exit path.
    pub fn get_line(&mut self, prompt: &str) -> Result<String, EditorError> {
        self.initialize()?;
        self.is_editing = true;

        if matches!(
            self.config.operation_mode,
            OperationMode::NoEscapeSequences | OperationMode::NonInteractive
        ) {
            return self.read_line_without_editing(prompt);
        }

        self.set_prompt(prompt);
        self.reset();
        self.strip_styles(true);
        self.set_origin()?;
        self.history_cursor = self.history.len();
        self.refresh_display()?;

        while !self.finish {
            if self.interrupt_flags.interrupted.swap(false, Ordering::SeqCst) {
                self.handle_interrupt_event()?;
            }
            if self.interrupt_flags.resized.swap(false, Ordering::SeqCst) {
                self.note_resize();
            }

            match self.handle_read_event() {
                Ok(()) => {}
                Err(EditorError::ReadFailure(err))
                    if err.kind() == io::ErrorKind::Interrupted =>
                {
                    // A signal woke the read; its flag is handled at the top
                    // of the loop. A bare EINTR ends the session.
                    if self.interrupt_flags.interrupted.load(Ordering::SeqCst)
                        || self.interrupt_flags.resized.load(Ordering::SeqCst)
                    {
                        continue;
                    }
                    self.finish();
                }
                Err(err) => {
                    self.input_error = Some(err);
                    self.finish();
                }
            }

            if self.always_refresh {
                self.refresh_needed = true;
            }
            self.refresh_display()?;
        }

        self.finish_session()
    }

    fn finish_session(&mut self) -> Result<String, EditorError> {
        self.finish = false;
        self.reposition_cursor(true)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;

        let line = self.line();
        self.buffer.clear();
        self.is_editing = false;
        self.restore();

        if let Some(mut hook) = self.on_exit.take() {
            hook();
            self.on_exit = Some(hook);
        }

        match self.input_error.take() {
            Some(error) => Err(error),
            None => Ok(line),
        }
    }

    /// Capture terminal attributes, resolve the operation mode and switch to
    /// the editor's line discipline. Idempotent until [`Editor::restore`].
    pub fn initialize(&mut self) -> Result<(), EditorError> {
        if self.initialized {
            return Ok(());
        }

        let termios = terminal::get_attributes(self.input_fd).ok();
        if let Some(t) = &termios {
            self.control_characters = ControlCharacters::from_termios(t);
        }
        self.default_termios = termios;

        let (columns, lines) = terminal::window_size(libc::STDERR_FILENO);
        self.num_columns = columns;
        self.num_lines = lines;
        self.suggestion_display.set_terminal_size(lines, columns);

        if self.config.operation_mode == OperationMode::Unset {
            let interactive =
                terminal::is_tty(self.input_fd) && terminal::is_tty(libc::STDERR_FILENO);
            self.config.operation_mode = if !interactive {
                OperationMode::NonInteractive
            } else {
                match std::env::var("TERM") {
                    Ok(term) if term.starts_with("xterm") => OperationMode::Full,
                    _ => OperationMode::NoEscapeSequences,
                }
            };
        }

        // The editor echoes for itself, so canonical mode and echo go away.
        if self.config.operation_mode == OperationMode::Full {
            if let Some(t) = self.default_termios {
                let mut raw = t;
                terminal::make_raw_input(&mut raw);
                terminal::set_attributes(self.input_fd, &raw)?;
            }
        }

        self.initialized = true;
        Ok(())
    }

    /// Write the pre-session terminal attributes back.
    pub fn restore(&mut self) {
        if !self.initialized {
            return;
        }
        if let Some(t) = &self.default_termios {
            if let Err(err) = terminal::set_attributes(self.input_fd, t) {
                warn!("failed to restore terminal attributes: {err}");
            }
        }
        self.initialized = false;
    }

    fn read_line_without_editing(&mut self, prompt: &str) -> Result<String, EditorError> {
        if self.config.operation_mode != OperationMode::NonInteractive {
            self.out.write_all(prompt.as_bytes())?;
            self.out.flush()?;
        }

        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line);
        self.is_editing = false;
        self.restore();

        match read {
            Ok(0) => Err(EditorError::Eof),
            Ok(_) => {
                if line.ends_with('\n') {
                    line.pop();
                }
                Ok(line)
            }
            Err(err) => Err(EditorError::ReadFailure(err)),
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
        self.drawn_cursor = 0;
        self.inline_search_cursor = 0;
        self.chars_inserted_in_the_middle = 0;
        self.pending_chars.clear();
        self.cached_buffer_metrics.reset();
        self.old_prompt_metrics = self.cached_prompt_metrics.clone();
        self.origin_row = 0;
        self.origin_column = 0;
        self.extra_forward_lines = 0;
        self.refresh_needed = true;
        self.input_error = None;
        self.state = InputState::Free;
        self.search_offset = 0;
        self.searching_backwards = false;
        self.times_tab_pressed = 0;
        self.prompt_lines_at_suggestion_initiation = 0;
        self.history_cursor = self.history.len();
    }

    fn set_prompt(&mut self, prompt: &str) {
        if self.cached_prompt_valid {
            self.old_prompt_metrics = self.cached_prompt_metrics.clone();
        }
        self.cached_prompt_valid = false;
        let prompt = if self.config.operation_mode == OperationMode::NoEscapeSequences {
            prompt.replace('\x1b', "")
        } else {
            prompt.to_string()
        };
        self.cached_prompt_metrics = metrics::rendered_string_metrics(&prompt);
        self.prompt = prompt;
    }

    fn note_resize(&mut self) {
        self.previous_num_columns = self.num_columns;
        let (columns, lines) = terminal::window_size(libc::STDERR_FILENO);
        self.num_columns = columns;
        self.num_lines = lines;
        self.suggestion_display.set_terminal_size(lines, columns);
        self.was_resized = true;
    }

    fn handle_interrupt_event(&mut self) -> Result<(), EditorError> {
        if !self.buffer.is_empty() {
            self.out.write_all(b"^C")?;
        }
        self.buffer.clear();
        self.cursor = 0;

        if let Some(mut hook) = self.on_interrupt_handled.take() {
            hook();
            self.on_interrupt_handled = Some(hook);
        }

        self.refresh_needed = true;
        self.refresh_display()?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Input
    // ------------------------------------------------------------------

    fn handle_read_event(&mut self) -> Result<(), EditorError> {
        if !self.incomplete_data.is_empty() {
            let consumed = self.process_pending_input()?;
            if consumed > 0 || self.finish {
                return Ok(());
            }
        }

        let mut keybuf = [0u8; 16];
        let nread = terminal::read_bytes(self.input_fd, &mut keybuf)?;
        if nread == 0 {
            self.input_error = Some(EditorError::Empty);
            self.finish();
            return Ok(());
        }
        self.incomplete_data.extend_from_slice(&keybuf[..nread]);
        self.process_pending_input()?;
        Ok(())
    }

    /// Decode and dispatch whatever sits in the incomplete-input buffer.
    /// Leading bytes that cannot start a UTF-8 sequence are discarded; a
    /// trailing incomplete sequence is retained for the next read. Returns
    /// the number of bytes consumed.
    fn process_pending_input(&mut self) -> Result<usize, EditorError> {
        let mut dropped = 0usize;
        let valid_len = loop {
            match std::str::from_utf8(&self.incomplete_data) {
                Ok(s) => break s.len(),
                Err(e) => {
                    if e.valid_up_to() > 0 {
                        break e.valid_up_to();
                    }
                    match e.error_len() {
                        Some(n) => {
                            self.incomplete_data.drain(..n);
                            dropped += n;
                        }
                        // An incomplete first sequence; wait for more bytes.
                        None => return Ok(dropped),
                    }
                }
            }
        };
        if valid_len == 0 {
            return Ok(dropped);
        }

        let decoded: String =
            String::from_utf8(self.incomplete_data[..valid_len].to_vec()).expect("validated utf-8");

        let mut consumed = 0usize;
        let mut reverse_tab = false;
        let mut ctrl_held = false;
        for code_point in decoded.chars() {
            if self.finish {
                break;
            }
            consumed += code_point.len_utf8();
            if code_point == '\0' {
                continue;
            }
            self.process_code_point(code_point, &mut reverse_tab, &mut ctrl_held)?;
        }

        self.incomplete_data.drain(..consumed);
        Ok(dropped + consumed)
    }

    fn process_code_point(
        &mut self,
        code_point: char,
        reverse_tab: &mut bool,
        ctrl_held: &mut bool,
    ) -> Result<(), EditorError> {
        match self.state {
            InputState::GotEscape => return self.handle_escaped_key(code_point),
            InputState::GotEscapeFollowedByLeftBracket => {
                match code_point {
                    'O' => {
                        *ctrl_held = true;
                        return Ok(());
                    }
                    'A' => {
                        self.do_search_backwards();
                        self.state = InputState::Free;
                        *ctrl_held = false;
                        return Ok(());
                    }
                    'B' => {
                        self.do_search_forwards();
                        self.state = InputState::Free;
                        *ctrl_held = false;
                        return Ok(());
                    }
                    'D' => {
                        let amount = if *ctrl_held { Amount::Word } else { Amount::Character };
                        self.do_cursor_left(amount);
                        self.state = InputState::Free;
                        *ctrl_held = false;
                        return Ok(());
                    }
                    'C' => {
                        let amount = if *ctrl_held { Amount::Word } else { Amount::Character };
                        self.do_cursor_right(amount);
                        self.state = InputState::Free;
                        *ctrl_held = false;
                        return Ok(());
                    }
                    'H' => {
                        self.cursor = 0;
                        self.inline_search_cursor = 0;
                        self.search_offset = 0;
                        self.state = InputState::Free;
                        *ctrl_held = false;
                        return Ok(());
                    }
                    'F' => {
                        self.cursor = self.buffer.len();
                        self.inline_search_cursor = self.cursor;
                        self.search_offset = 0;
                        self.state = InputState::Free;
                        *ctrl_held = false;
                        return Ok(());
                    }
                    'Z' => {
                        // Shift-tab: fall through to the completion handling
                        // below with the direction reversed.
                        *reverse_tab = true;
                        self.state = InputState::Free;
                        *ctrl_held = false;
                    }
                    '3' => {
                        self.do_delete()?;
                        self.search_offset = 0;
                        self.state = InputState::ExpectTerminator;
                        *ctrl_held = false;
                        return Ok(());
                    }
                    other => {
                        debug!("unhandled CSI final: {:#04x}", other as u32);
                        self.state = InputState::Free;
                        *ctrl_held = false;
                        return Ok(());
                    }
                }
            }
            InputState::ExpectTerminator => {
                // Swallow parameter bytes so modified forms like `ESC[3;5~`
                // are consumed whole.
                if !(code_point.is_ascii_digit() || code_point == ';') {
                    self.state = InputState::Free;
                }
                return Ok(());
            }
            InputState::Free => {
                if code_point == '\x1b' {
                    self.state = InputState::GotEscape;
                    return Ok(());
                }
            }
        }

        self.handle_key_in_free_state(code_point, reverse_tab)
    }

    fn handle_escaped_key(&mut self, code_point: char) -> Result<(), EditorError> {
        self.state = InputState::Free;
        match code_point {
            '[' => {
                self.state = InputState::GotEscapeFollowedByLeftBracket;
            }
            // alt-.: insert the last word of the newest history entry
            '.' => {
                if let Some(entry) = self.history.last() {
                    if let Some(word) = entry.split(' ').filter(|w| !w.is_empty()).last() {
                        let word = word.to_string();
                        self.insert_str(&word);
                    }
                }
            }
            'b' => self.do_cursor_left(Amount::Word),
            'f' => self.do_cursor_right(Amount::Word),
            // alt-backspace: delete the alnum word left of the cursor
            '\x08' => {
                let mut has_seen_alnum = false;
                while self.cursor > 0 {
                    if !self.buffer[self.cursor - 1].is_alphanumeric() {
                        if has_seen_alnum {
                            break;
                        }
                    } else {
                        has_seen_alnum = true;
                    }
                    self.do_backspace()?;
                }
            }
            // alt-d: delete the alnum word right of the cursor
            'd' => {
                let mut has_seen_alnum = false;
                while self.cursor < self.buffer.len() {
                    if !self.buffer[self.cursor].is_alphanumeric() {
                        if has_seen_alnum {
                            break;
                        }
                    } else {
                        has_seen_alnum = true;
                    }
                    self.do_delete()?;
                }
            }
            // alt-c / alt-l / alt-u: capitalize / lowercase / uppercase the
            // next alnum word
            'c' | 'l' | 'u' => {
                while self.cursor < self.buffer.len()
                    && !self.buffer[self.cursor].is_alphanumeric()
                {
                    self.cursor += 1;
                }
                let word_start = self.cursor;
                while self.cursor < self.buffer.len() && self.buffer[self.cursor].is_alphanumeric()
                {
                    let c = self.buffer[self.cursor];
                    let uppercase = code_point == 'u' || (code_point == 'c' && self.cursor == word_start);
                    self.buffer[self.cursor] = if uppercase {
                        c.to_uppercase().next().unwrap_or(c)
                    } else {
                        c.to_lowercase().next().unwrap_or(c)
                    };
                    self.cursor += 1;
                    self.refresh_needed = true;
                }
            }
            't' => self.transpose_words(),
            other => {
                debug!("unhandled escaped key: {:#04x}", other as u32);
            }
        }
        Ok(())
    }

    fn handle_key_in_free_state(
        &mut self,
        code_point: char,
        reverse_tab: &mut bool,
    ) -> Result<(), EditorError> {
        if let Some(mut callback) = self.key_callbacks.remove(&code_point) {
            let proceed = callback(self);
            self.key_callbacks.entry(code_point).or_insert(callback);
            if !proceed {
                return Ok(());
            }
        }

        if code_point == ctrl('N') {
            self.do_search_forwards();
            return Ok(());
        }
        if code_point == ctrl('P') {
            self.do_search_backwards();
            return Ok(());
        }

        // Any other key resets the recall offset.
        self.search_offset = 0;

        if code_point == '\t' || *reverse_tab {
            return self.handle_tab_press(reverse_tab);
        }

        if self.times_tab_pressed > 0 {
            // The user moved on; commit the shown suggestion's styling and
            // drop the candidate list.
            self.finish_suggestion_application()?;
        }
        self.times_tab_pressed = 0;

        if code_point == self.control_characters.word_erase {
            // A VWERASE word is space-delimited: `foo=bar baz` is two words.
            let mut has_seen_nonspace = false;
            while self.cursor > 0 {
                if self.buffer[self.cursor - 1].is_whitespace() {
                    if has_seen_nonspace {
                        break;
                    }
                } else {
                    has_seen_nonspace = true;
                }
                self.do_backspace()?;
            }
            return Ok(());
        }
        if code_point == self.control_characters.kill {
            for _ in 0..self.cursor {
                self.remove_at_index(0);
            }
            self.cursor = 0;
            self.inline_search_cursor = 0;
            self.refresh_needed = true;
            return Ok(());
        }
        // VEOF ends the session only on an empty buffer; otherwise the
        // editing shortcuts below get their turn.
        if code_point == self.control_characters.end_of_file && self.buffer.is_empty() {
            self.out.write_all(b"<EOF>\n")?;
            self.out.flush()?;
            if !self.always_refresh {
                self.input_error = Some(EditorError::Eof);
                self.finish();
            }
            return Ok(());
        }

        if code_point == ctrl('A') {
            self.cursor = 0;
            return Ok(());
        }
        if code_point == ctrl('B') {
            self.do_cursor_left(Amount::Character);
            return Ok(());
        }
        if code_point == ctrl('D') {
            self.do_delete()?;
            return Ok(());
        }
        if code_point == ctrl('E') {
            self.cursor = self.buffer.len();
            return Ok(());
        }
        if code_point == ctrl('F') {
            self.do_cursor_right(Amount::Character);
            return Ok(());
        }
        if code_point == '\x08' || code_point == self.control_characters.erase {
            self.do_backspace()?;
            return Ok(());
        }
        if code_point == ctrl('K') {
            while self.cursor < self.buffer.len() {
                self.do_delete()?;
            }
            return Ok(());
        }
        if code_point == ctrl('L') {
            vt::clear_screen(&mut *self.out)?;
            vt::move_absolute(&mut *self.out, 1, 1)?;
            self.set_origin_to(1, 1);
            self.refresh_needed = true;
            return Ok(());
        }
        if code_point == ctrl('R') {
            return self.enter_incremental_search();
        }
        if code_point == ctrl('T') {
            if self.cursor > 0 && self.buffer.len() >= 2 {
                if self.cursor < self.buffer.len() {
                    self.cursor += 1;
                }
                self.buffer.swap(self.cursor - 1, self.cursor - 2);
                // The text under any anchored span just reordered; stale
                // styling would mislabel, so overlapping spans are dropped.
                self.drop_anchored_spans_intersecting(self.cursor - 2, self.cursor);
                self.refresh_needed = true;
            }
            return Ok(());
        }
        if code_point == '\n' {
            self.finish();
            return Ok(());
        }

        self.insert(code_point);
        Ok(())
    }

    fn do_cursor_left(&mut self, amount: Amount) {
        if self.cursor > 0 {
            if amount == Amount::Word {
                // Skip the separators behind the cursor, then the whole
                // alnum run.
                while self.cursor > 0 && !self.buffer[self.cursor - 1].is_alphanumeric() {
                    self.cursor -= 1;
                }
                while self.cursor > 0 && self.buffer[self.cursor - 1].is_alphanumeric() {
                    self.cursor -= 1;
                }
            } else {
                self.cursor -= 1;
            }
        }
        self.inline_search_cursor = self.cursor;
    }

    fn do_cursor_right(&mut self, amount: Amount) {
        if self.cursor < self.buffer.len() {
            if amount == Amount::Word {
                while self.cursor < self.buffer.len()
                    && !self.buffer[self.cursor].is_alphanumeric()
                {
                    self.cursor += 1;
                }
                while self.cursor < self.buffer.len()
                    && self.buffer[self.cursor].is_alphanumeric()
                {
                    self.cursor += 1;
                }
            } else {
                self.cursor += 1;
            }
        }
        self.inline_search_cursor = self.cursor;
        self.search_offset = 0;
    }

    fn do_backspace(&mut self) -> io::Result<()> {
        if self.is_searching {
            return Ok(());
        }
        if self.cursor == 0 {
            return vt::bell(&mut *self.out);
        }
        self.remove_at_index(self.cursor - 1);
        self.cursor -= 1;
        self.inline_search_cursor = self.cursor;
        self.refresh_needed = true;
        Ok(())
    }

    fn do_delete(&mut self) -> io::Result<()> {
        if self.cursor == self.buffer.len() {
            return vt::bell(&mut *self.out);
        }
        self.remove_at_index(self.cursor);
        self.refresh_needed = true;
        Ok(())
    }

    /// Transpose the two alnum words around the cursor: each sub-range is
    /// reversed individually, then the whole range, which swaps the words
    /// while keeping the separator in place.
    fn transpose_words(&mut self) {
        let alnum = |c: char| c.is_alphanumeric();

        // Find the end of the word under (or after) the cursor.
        let mut cursor = self.cursor;
        while cursor < self.buffer.len() && !alnum(self.buffer[cursor]) {
            cursor += 1;
        }
        while cursor < self.buffer.len() && alnum(self.buffer[cursor]) {
            cursor += 1;
        }

        let end = cursor;
        let mut start = cursor;
        while start > 0 && !alnum(self.buffer[start - 1]) {
            start -= 1;
        }
        while start > 0 && alnum(self.buffer[start - 1]) {
            start -= 1;
        }
        let start_second_word = start;

        while start > 0 && !alnum(self.buffer[start - 1]) {
            start -= 1;
        }
        let start_gap = start;

        while start > 0 && alnum(self.buffer[start - 1]) {
            start -= 1;
        }

        if start != start_gap {
            let swap_range = |buffer: &mut Vec<char>, from: usize, to: usize| {
                for i in 0..(to - from) / 2 {
                    buffer.swap(from + i, to - 1 - i);
                }
            };
            swap_range(&mut self.buffer, start, start_gap);
            swap_range(&mut self.buffer, start_gap, start_second_word);
            swap_range(&mut self.buffer, start_second_word, end);
            swap_range(&mut self.buffer, start, end);
            self.cursor = cursor;
            self.drop_anchored_spans_intersecting(start, end);
            self.refresh_needed = true;
        }
    }

    // ------------------------------------------------------------------
    // History recall
    // ------------------------------------------------------------------

    /// Scan history from newest to oldest for the `search_offset`-th entry
    /// matching `phrase` (prefix match when `from_beginning`). On a hit the
    /// buffer is replaced with the entry; on a miss the terminal bell rings.
    /// The buffer is cleared either way.
    pub fn search(&mut self, phrase: &str, allow_empty: bool, from_beginning: bool) -> bool {
        let mut last_matching_offset = None;

        if allow_empty || !phrase.is_empty() {
            let mut search_offset = self.search_offset;
            for i in (1..=self.history_cursor.min(self.history.len())).rev() {
                let entry = self.history.get(i - 1).expect("history index in range");
                let matches = if from_beginning {
                    entry.starts_with(phrase)
                } else {
                    entry.contains(phrase)
                };
                if matches {
                    last_matching_offset = Some(i - 1);
                    if search_offset == 0 {
                        break;
                    }
                    search_offset -= 1;
                }
            }

            if last_matching_offset.is_none() {
                let _ = vt::bell(&mut *self.out);
            }
        }

        self.buffer.clear();
        self.cursor = 0;
        if let Some(index) = last_matching_offset {
            let entry = self
                .history
                .get(index)
                .expect("history index in range")
                .to_string();
            self.insert_str(&entry);
        }
        // Always needed, the buffer was cleared above.
        self.refresh_needed = true;
        last_matching_offset.is_some()
    }

    fn do_search_backwards(&mut self) {
        self.searching_backwards = true;
        let inline_search_cursor = self.inline_search_cursor;
        let phrase = self.line_up_to(inline_search_cursor);
        if self.search(&phrase, true, true) {
            self.search_offset += 1;
        } else {
            self.insert_str(&phrase);
        }
        self.inline_search_cursor = inline_search_cursor;
    }

    fn do_search_forwards(&mut self) {
        let inline_search_cursor = self.inline_search_cursor;
        let phrase = self.line_up_to(inline_search_cursor);
        let search_changed_directions = self.searching_backwards;
        self.searching_backwards = false;

        let step = 1 + usize::from(search_changed_directions);
        if self.search_offset >= step {
            self.search_offset -= step;
            if !self.search(&phrase, true, true) {
                self.insert_str(&phrase);
            }
        } else {
            // Walked past the newest match: restore the pre-recall input.
            self.search_offset = 0;
            self.cursor = 0;
            self.buffer.clear();
            self.insert_str(&phrase);
            self.refresh_needed = true;
        }
        self.inline_search_cursor = inline_search_cursor;
    }

    // ------------------------------------------------------------------
    // Nested incremental search (Ctrl-R)
    // ------------------------------------------------------------------

    fn enter_incremental_search(&mut self) -> Result<(), EditorError> {
        if self.is_searching {
            // The nested editor intercepts its own Ctrl-R; a second level
            // cannot happen.
            return Ok(());
        }

        self.is_searching = true;
        self.search_offset = 0;
        self.pre_search_buffer = self.buffer.clone();
        self.pre_search_cursor = self.cursor;

        let session = Rc::new(RefCell::new(SearchSession {
            search_offset: 0,
            reset_buffer_on_search_end: true,
            clear_screen_requested: false,
        }));

        let mut search_editor = Editor::with_config(EditorConfig {
            operation_mode: OperationMode::Full,
            refresh_behaviour: RefreshBehaviour::Eager,
            history_capacity: self.config.history_capacity,
        });
        // The terminal is already in this session's line discipline; the
        // child must not capture or restore attributes of its own.
        search_editor.initialized = true;
        search_editor.default_termios = None;
        search_editor.input_fd = self.input_fd;
        search_editor.control_characters = self.control_characters;
        search_editor.num_columns = self.num_columns;
        search_editor.num_lines = self.num_lines;

        {
            let session = Rc::clone(&session);
            search_editor.register_character_input_callback(ctrl('R'), move |editor| {
                session.borrow_mut().search_offset += 1;
                editor.refresh_needed = true;
                false
            });
        }
        {
            let session = Rc::clone(&session);
            search_editor.register_character_input_callback(
                self.control_characters.erase,
                move |editor| {
                    let mut session = session.borrow_mut();
                    if session.search_offset > 0 {
                        session.search_offset -= 1;
                        editor.refresh_needed = true;
                        return false;
                    }
                    true
                },
            );
        }
        {
            let session = Rc::clone(&session);
            search_editor.register_character_input_callback(ctrl('L'), move |editor| {
                let _ = vt::clear_screen(&mut *editor.out);
                // The outer prompt redraws at the top; ours moves below it.
                session.borrow_mut().clear_screen_requested = true;
                editor.set_origin_to(2, 1);
                editor.refresh_needed = true;
                false
            });
        }
        {
            let session = Rc::clone(&session);
            search_editor.register_character_input_callback('\t', move |editor| {
                editor.finish();
                session.borrow_mut().reset_buffer_on_search_end = false;
                false
            });
        }

        self.out.write_all(b"\n")?;
        self.out.flush()?;

        let search_prompt = "\x1b[32msearch:\x1b[0m ";
        let search_result = self.drive_search_editor(&mut search_editor, search_prompt, &session);

        self.is_searching = false;
        self.search_offset = 0;

        match search_result {
            Err(error) => {
                self.input_error = Some(error);
                self.finish();
                Ok(())
            }
            Ok(search_string) => {
                // Erase the search prompt line manually.
                self.reposition_cursor(false)?;
                let search_metrics = metrics::rendered_string_metrics(&search_string);
                let prompt_metrics = metrics::rendered_string_metrics(search_prompt);
                vt::clear_lines(
                    &mut *self.out,
                    0,
                    prompt_metrics.lines_with_addition(&search_metrics, self.num_columns),
                )?;
                self.reposition_cursor(false)?;

                let reset_buffer = session.borrow().reset_buffer_on_search_end;
                if !reset_buffer || search_metrics.total_length == 0 {
                    // Empty entry or tab-accepted: stay editing.
                    self.end_search(reset_buffer);
                } else {
                    // Submit the current match as the final line.
                    self.finish();
                }
                Ok(())
            }
        }
    }

    /// Run the child editor's read cycle with the parent in scope: after
    /// each batch of input the parent re-runs the incremental match against
    /// its own history and repaints its line before the child repaints the
    /// search prompt below it. Exactly one editor reads the TTY at a time.
    fn drive_search_editor(
        &mut self,
        search_editor: &mut Editor,
        prompt: &str,
        session: &Rc<RefCell<SearchSession>>,
    ) -> Result<String, EditorError> {
        search_editor.is_editing = true;
        search_editor.set_prompt(prompt);
        search_editor.reset();
        search_editor.strip_styles(true);
        search_editor.set_origin()?;
        search_editor.refresh_display()?;

        loop {
            match search_editor.handle_read_event() {
                Ok(()) => {}
                Err(EditorError::ReadFailure(err))
                    if err.kind() == io::ErrorKind::Interrupted =>
                {
                    search_editor.finish();
                }
                Err(error) => {
                    search_editor.input_error = Some(error);
                    search_editor.finish();
                }
            }

            if session.borrow_mut().take_clear_screen() {
                self.set_origin_to(1, 1);
                self.refresh_needed = true;
                self.refresh_display()?;
            }

            self.search_offset = session.borrow().search_offset;
            let phrase = search_editor.line();
            self.search(&phrase, false, false);
            self.refresh_display()?;

            search_editor.refresh_needed = true;
            search_editor.refresh_display()?;

            if search_editor.finish {
                break search_editor.finish_session();
            }
        }
    }

    fn end_search(&mut self, reset_buffer: bool) {
        self.is_searching = false;
        self.search_offset = 0;
        self.refresh_needed = true;
        if reset_buffer {
            self.buffer = self.pre_search_buffer.clone();
            self.cursor = self.pre_search_cursor;
        }
    }

    // ------------------------------------------------------------------
    // Tab completion
    // ------------------------------------------------------------------

    fn handle_tab_press(&mut self, reverse_tab: &mut bool) -> Result<(), EditorError> {
        if self.on_tab_complete.is_none() {
            *reverse_tab = false;
            return Ok(());
        }

        // Reverse tab counts as a regular tab here.
        self.times_tab_pressed += 1;
        let token_start = self.cursor;

        // The callback runs only on the first press; further presses walk
        // the cached candidates.
        if self.times_tab_pressed == 1 {
            let mut hook = self.on_tab_complete.take().expect("checked above");
            let suggestions = hook(self);
            self.on_tab_complete = Some(hook);
            self.suggestion_manager.set_suggestions(suggestions);
            self.prompt_lines_at_suggestion_initiation = self.num_display_lines();
            if self.suggestion_manager.count() == 0 {
                vt::bell(&mut *self.out)?;
            }
        }

        // A direction flip must step twice to neutralize the advance already
        // applied after the previous application.
        if *reverse_tab && self.tab_direction != TabDirection::Backward {
            self.suggestion_manager.previous();
            self.suggestion_manager.previous();
            self.tab_direction = TabDirection::Backward;
        }
        if !*reverse_tab && self.tab_direction != TabDirection::Forward {
            self.suggestion_manager.next();
            self.suggestion_manager.next();
            self.tab_direction = TabDirection::Forward;
        }
        *reverse_tab = false;

        let completion_mode = match self.times_tab_pressed {
            1 => CompletionMode::CompletePrefix,
            2 => CompletionMode::ShowSuggestions,
            _ => CompletionMode::CycleSuggestions,
        };

        let result = self
            .suggestion_manager
            .attempt_completion(completion_mode, token_start);

        let new_cursor = self
            .cursor
            .saturating_add_signed(result.new_cursor_offset);
        for _ in result.offset_region_to_remove.0..result.offset_region_to_remove.1 {
            self.remove_at_index(new_cursor);
        }
        self.cursor = new_cursor;
        self.inline_search_cursor = new_cursor;
        self.refresh_needed = true;

        for text in &result.insert {
            self.insert_str(text);
        }

        if let Some(style) = result.style_to_apply {
            if let Some(start_index) = self
                .suggestion_manager
                .current_suggestion()
                .map(|s| s.start_index)
            {
                self.readjust_anchored_styles(start_index, ModificationKind::ForcedOverlapRemoval);
                self.stylize(
                    Span::code_points(start_index, self.cursor),
                    style.anchored(),
                );
            }
        }

        match result.new_completion_mode {
            CompletionMode::DontComplete => self.times_tab_pressed = 0,
            // Nothing shared to insert on the first press: skip straight to
            // showing the list.
            CompletionMode::ShowSuggestions
                if completion_mode == CompletionMode::CompletePrefix =>
            {
                self.times_tab_pressed += 1;
            }
            CompletionMode::CompletePrefix | CompletionMode::ShowSuggestions => {}
            CompletionMode::CycleSuggestions => self.times_tab_pressed += 1,
        }

        if self.times_tab_pressed > 1 && self.suggestion_manager.count() > 0 {
            if self.suggestion_display.cleanup(&mut *self.out)? {
                self.reposition_cursor(false)?;
            }
            self.suggestion_display
                .set_initial_prompt_lines(self.prompt_lines_at_suggestion_initiation);
            self.suggestion_display
                .set_terminal_size(self.num_lines, self.num_columns);
            self.suggestion_display
                .set_origin(self.origin_row.max(1), self.origin_column.max(1));
            self.suggestion_display
                .display(&mut *self.out, &self.suggestion_manager)?;
            self.origin_row = self.suggestion_display.origin_row();
        }

        // Pre-advance the selection for the next cycle press.
        if self.times_tab_pressed > 2 {
            if self.tab_direction == TabDirection::Forward {
                self.suggestion_manager.next();
            } else {
                self.suggestion_manager.previous();
            }
        }

        if self.suggestion_manager.count() < 2 {
            // Zero or one candidate: commit it and continue as if it had
            // been auto-completed.
            self.suggest(0, 0, SpanMode::CodePointOriented);
            self.times_tab_pressed = 0;
            self.suggestion_manager.reset();
            self.suggestion_display.finish();
        }
        Ok(())
    }

    /// A non-tab key arrived while suggestions were live: keep the shown
    /// candidate's styling as an anchored span and drop the list.
    fn finish_suggestion_application(&mut self) -> Result<(), EditorError> {
        let current = self
            .suggestion_manager
            .current_suggestion()
            .map(|s| (s.start_index, s.style.clone()));
        if let Some((start_index, style)) = current {
            self.readjust_anchored_styles(start_index, ModificationKind::ForcedOverlapRemoval);
            if !style.is_empty() {
                self.stylize(
                    Span::code_points(start_index, self.cursor),
                    style.anchored(),
                );
            }
        }
        if self.suggestion_display.cleanup(&mut *self.out)? {
            self.reposition_cursor(false)?;
            self.refresh_needed = true;
        }
        self.suggestion_manager.reset();
        self.suggest(0, 0, SpanMode::CodePointOriented);
        self.suggestion_display.finish();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Spans
    // ------------------------------------------------------------------

    fn insert_span(
        starting: &mut SpanMap,
        ending: &mut SpanMap,
        start: usize,
        end: usize,
        style: Style,
    ) -> bool {
        let mut changed = false;
        if starting
            .entry(start)
            .or_default()
            .insert(end, style.clone())
            .is_none()
        {
            changed = true;
        }
        if ending.entry(end).or_default().insert(start, style).is_none() {
            changed = true;
        }
        changed
    }

    /// Relocate anchored spans after a buffer edit at `hint_index`: spans
    /// starting at or after the edit shift whole, spans covering it shift
    /// their end, and a span collapsing to nothing is dropped. The forced
    /// variant only drops spans straddling the hint.
    fn readjust_anchored_styles(&mut self, hint_index: usize, modification: ModificationKind) {
        if self.anchored_spans_starting.is_empty() {
            return;
        }

        let mut relocated: Vec<(usize, usize, Style)> = Vec::new();
        for (&start, ends) in &self.anchored_spans_starting {
            for (&end, style) in ends {
                match modification {
                    ModificationKind::ForcedOverlapRemoval => {
                        if start <= hint_index && end > hint_index {
                            continue;
                        }
                        relocated.push((start, end, style.clone()));
                    }
                    ModificationKind::Insertion => {
                        if start >= hint_index {
                            relocated.push((start + 1, end + 1, style.clone()));
                        } else if end > hint_index {
                            relocated.push((start, end + 1, style.clone()));
                        } else {
                            relocated.push((start, end, style.clone()));
                        }
                    }
                    ModificationKind::Removal => {
                        if start >= hint_index {
                            // The span's entire text was wiped; drop it.
                            if start == hint_index && end == hint_index + 1 {
                                continue;
                            }
                            relocated.push((start.saturating_sub(1), end - 1, style.clone()));
                        } else if end > hint_index {
                            relocated.push((start, end - 1, style.clone()));
                        } else {
                            relocated.push((start, end, style.clone()));
                        }
                    }
                }
            }
        }

        self.anchored_spans_starting.clear();
        self.anchored_spans_ending.clear();
        for (start, end, style) in relocated {
            if start < end {
                self.stylize(Span::code_points(start, end), style);
            }
        }
    }

    fn drop_anchored_spans_intersecting(&mut self, from: usize, to: usize) {
        if self.anchored_spans_starting.is_empty() {
            return;
        }
        let mut kept: Vec<(usize, usize, Style)> = Vec::new();
        for (&start, ends) in &self.anchored_spans_starting {
            for (&end, style) in ends {
                if start < to && end > from {
                    continue;
                }
                kept.push((start, end, style.clone()));
            }
        }
        self.anchored_spans_starting.clear();
        self.anchored_spans_ending.clear();
        for (start, end, style) in kept {
            self.stylize(Span::code_points(start, end), style);
        }
    }

    /// Merged style of every span that covers `offset` without starting or
    /// ending exactly there, used to reapply overlaps after a span closes.
    fn find_applicable_style(&self, offset: usize) -> Style {
        let mut style = Style::reset_style();
        for map in [&self.spans_starting, &self.anchored_spans_starting] {
            for (&start, ends) in map {
                if start >= offset {
                    continue;
                }
                for (&end, span_style) in ends {
                    if end <= offset {
                        continue;
                    }
                    style.unify_with(span_style, true);
                }
            }
        }
        style
    }

    fn remove_at_index(&mut self, index: usize) {
        self.readjust_anchored_styles(index, ModificationKind::Removal);
        let code_point = self.buffer.remove(index);
        if code_point == '\n' {
            self.extra_forward_lines += 1;
        }
    }

    /// Convert a byte range to a code-point range by walking the buffer from
    /// `scan_code_point_offset` (backwards when `reverse`) and summing
    /// per-code-point UTF-8 lengths. Offsets inside a code point clamp to
    /// its boundary.
    fn byte_offset_range_to_code_point_offset_range(
        &self,
        start_byte_offset: usize,
        end_byte_offset: usize,
        scan_code_point_offset: usize,
        reverse: bool,
    ) -> (usize, usize) {
        let mut byte_offset = 0usize;
        let mut code_point_offset = scan_code_point_offset + usize::from(reverse);
        let (mut start, mut end) = (0usize, 0usize);

        loop {
            if !reverse {
                if code_point_offset >= self.buffer.len() {
                    break;
                }
            } else if code_point_offset == 0 {
                break;
            }

            if byte_offset > end_byte_offset {
                break;
            }
            if byte_offset < start_byte_offset {
                start += 1;
            }
            if byte_offset < end_byte_offset {
                end += 1;
            }

            let code_point = if reverse {
                code_point_offset -= 1;
                self.buffer[code_point_offset]
            } else {
                let c = self.buffer[code_point_offset];
                code_point_offset += 1;
                c
            };
            byte_offset += code_point.len_utf8();
        }

        (start, end)
    }

    // ------------------------------------------------------------------
    // Display
    // ------------------------------------------------------------------

    /// Reconcile the screen with the model. Pure cursor motion repositions
    /// only; appending at the end of the line flushes the pending bytes;
    /// anything else erases the previous rendering and repaints the prompt
    /// and buffer with style escapes emitted as spans open and close.
    pub fn refresh_display(&mut self) -> io::Result<()> {
        let mut has_cleaned_up = false;

        if self.was_resized {
            if self.previous_num_columns != self.num_columns {
                // The prompt may wrap differently now; erase with the old
                // width, repaint with the new.
                self.cached_prompt_valid = false;
                self.refresh_needed = true;
                std::mem::swap(&mut self.previous_num_columns, &mut self.num_columns);
                self.recalculate_origin();
                self.cleanup()?;
                std::mem::swap(&mut self.previous_num_columns, &mut self.num_columns);
                has_cleaned_up = true;
            }
            self.was_resized = false;
        }

        // Pure cursor movement needs no repaint.
        if self.cached_prompt_valid && !self.refresh_needed && self.pending_chars.is_empty() {
            self.reposition_cursor(false)?;
            self.cached_buffer_metrics = metrics::rendered_code_point_metrics(&self.buffer);
            return Ok(());
        }

        // Drawing past the last line scrolls the terminal; pull the origin
        // up so the rendering stays addressable.
        let current_num_lines = self.num_display_lines();
        if self.origin_row + current_num_lines > self.num_lines + 1 {
            if current_num_lines > self.num_lines {
                self.origin_row = 0;
            } else {
                self.origin_row = self.num_lines - current_num_lines + 1;
            }
        }

        if let Some(mut hook) = self.on_display_refresh.take() {
            hook(self);
            self.on_display_refresh = Some(hook);
        }

        if self.cached_prompt_valid && !self.refresh_needed && self.cursor == self.buffer.len() {
            // Append-only: write the pending bytes and carry on.
            self.out.write_all(&self.pending_chars)?;
            self.pending_chars.clear();
            self.drawn_cursor = self.cursor;
            self.cached_buffer_metrics = metrics::rendered_code_point_metrics(&self.buffer);
            self.out.flush()?;
            return Ok(());
        }

        // Full reflow.
        if !has_cleaned_up {
            self.cleanup()?;
        }
        vt::move_absolute(&mut *self.out, self.origin_row.max(1), self.origin_column.max(1))?;
        self.out.write_all(self.prompt.as_bytes())?;
        vt::clear_to_end_of_line(&mut *self.out)?;

        for i in 0..self.buffer.len() {
            let ending_style = self.merged_span_style_at(i, true);
            if let Some(style) = ending_style {
                // Close the span (terminating any hyperlink), then reapply
                // whatever overlapping spans still cover this offset.
                vt::apply_style(&mut *self.out, &style, false)?;
                vt::reset_style(&mut *self.out)?;
                let reapply = self.find_applicable_style(i);
                vt::apply_style(&mut *self.out, &reapply, true)?;
            }
            let starting_style = self.merged_span_style_at(i, false);
            if let Some(style) = starting_style {
                vt::apply_style(&mut *self.out, &style, true)?;
            }

            let mut utf8 = [0u8; 4];
            self.out
                .write_all(self.buffer[i].encode_utf8(&mut utf8).as_bytes())?;
        }

        // Don't bleed styles past the end of the line.
        vt::reset_style(&mut *self.out)?;

        self.pending_chars.clear();
        self.refresh_needed = false;
        self.cached_buffer_metrics = metrics::rendered_code_point_metrics(&self.buffer);
        self.chars_inserted_in_the_middle = 0;
        self.cached_prompt_valid = true;

        self.reposition_cursor(false)?;
        self.out.flush()
    }

    /// Unify every unanchored and anchored span ending (or starting) at the
    /// offset.
    fn merged_span_style_at(&self, offset: usize, ending: bool) -> Option<Style> {
        let (plain, anchored) = if ending {
            (&self.spans_ending, &self.anchored_spans_ending)
        } else {
            (&self.spans_starting, &self.anchored_spans_starting)
        };

        let mut style = Style::reset_style();
        let mut any = false;
        for map in [plain, anchored] {
            if let Some(entries) = map.get(&offset) {
                for span_style in entries.values() {
                    style.unify_with(span_style, false);
                    any = true;
                }
            }
        }
        any.then_some(style)
    }

    /// Erase the previous rendering: walk up over the lines it occupied and
    /// clear them, leaving the cursor at the origin.
    fn cleanup(&mut self) -> io::Result<()> {
        let current_buffer_metrics = metrics::rendered_code_point_metrics(&self.buffer);
        let new_lines = self
            .current_prompt_metrics()
            .lines_with_addition(&current_buffer_metrics, self.num_columns);
        let shown_lines = self.num_display_lines();
        if new_lines < shown_lines {
            self.extra_forward_lines = (shown_lines - new_lines).max(self.extra_forward_lines);
        }

        let pending = self.pending_chars.len() as isize
            - self.chars_inserted_in_the_middle as isize;
        vt::move_relative(&mut *self.out, -(self.extra_forward_lines as isize), pending)?;

        let mut current_line = self.cursor_line();
        // A prompt starting with a newline owns its blank first row; leave it.
        if self
            .current_prompt_metrics()
            .line_lengths
            .first()
            .copied()
            .unwrap_or(0)
            == 0
            && current_line > 1
        {
            current_line -= 1;
        }
        let lines_below =
            self.num_display_lines().saturating_sub(current_line) + self.extra_forward_lines;
        vt::clear_lines(&mut *self.out, current_line.saturating_sub(1), lines_below)?;
        self.extra_forward_lines = 0;
        self.reposition_cursor(false)
    }

    /// Move the terminal cursor to where the model cursor (or line end)
    /// renders, relative to the origin.
    fn reposition_cursor(&mut self, to_end: bool) -> io::Result<()> {
        let saved_cursor = self.cursor;
        if to_end {
            self.cursor = self.buffer.len();
        }
        self.drawn_cursor = self.cursor;

        let line = self.cursor_line().saturating_sub(1);
        let column = self.offset_in_line();
        vt::move_absolute(
            &mut *self.out,
            (line + self.origin_row).max(1),
            (column + self.origin_column).max(1),
        )?;

        self.cursor = saved_cursor;
        Ok(())
    }

    /// A narrower terminal makes the prompt wrap onto more rows, which
    /// pushes the origin down the screen.
    fn recalculate_origin(&mut self) {
        if self.cached_prompt_metrics.max_line_length >= self.num_columns {
            let added_lines =
                (self.cached_prompt_metrics.max_line_length + 1) / self.num_columns.max(1) - 1;
            self.origin_row += added_lines;
        }
    }

    fn current_prompt_metrics(&self) -> &StringMetrics {
        if self.cached_prompt_valid {
            &self.cached_prompt_metrics
        } else {
            &self.old_prompt_metrics
        }
    }

    fn num_display_lines(&self) -> usize {
        self.current_prompt_metrics()
            .lines_with_addition(&self.cached_buffer_metrics, self.num_columns)
    }

    fn cursor_line(&self) -> usize {
        let cursor = self.drawn_cursor.min(self.cursor);
        let metrics = metrics::rendered_code_point_metrics(&self.buffer[..cursor]);
        self.current_prompt_metrics()
            .lines_with_addition(&metrics, self.num_columns)
    }

    fn offset_in_line(&self) -> usize {
        let cursor = self.drawn_cursor.min(self.cursor);
        let metrics = metrics::rendered_code_point_metrics(&self.buffer[..cursor]);
        self.current_prompt_metrics()
            .offset_with_addition(&metrics, self.num_columns)
    }

    fn set_origin_to(&mut self, row: usize, column: usize) {
        self.origin_row = row;
        self.origin_column = column;
    }

    /// Probe the cursor position to learn where the prompt begins.
    fn set_origin(&mut self) -> Result<(), EditorError> {
        match self.vt_dsr() {
            Ok((row, column)) => {
                self.set_origin_to(row, column);
                Ok(())
            }
            Err(error) => {
                self.input_error = Some(error);
                self.finish();
                Ok(())
            }
        }
    }

    /// Device status report: drain any pending input into the incomplete
    /// buffer, emit `ESC[6n` and parse the `ESC[row;colR` answer.
    fn vt_dsr(&mut self) -> Result<(usize, usize), EditorError> {
        // Whatever junk is already buffered gets replayed as user input.
        loop {
            if !terminal::poll_readable_now(self.input_fd)? {
                break;
            }
            let mut junk = [0u8; 16];
            let nread = terminal::read_bytes(self.input_fd, &mut junk)?;
            if nread == 0 {
                break;
            }
            self.incomplete_data.extend_from_slice(&junk[..nread]);
        }

        self.out.write_all(b"\x1b[6n")?;
        self.out.flush()?;

        let mut response = [0u8; 16];
        let mut length = 0usize;
        loop {
            let nread = match terminal::read_bytes(self.input_fd, &mut response[length..]) {
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!("error while reading DSR: {err}");
                    return Err(EditorError::ReadFailure(err));
                }
            };
            if nread == 0 {
                warn!("terminal DSR issue; received no response");
                return Err(EditorError::Empty);
            }
            length += nread;
            if response[length - 1] == b'R' || length >= response.len() {
                break;
            }
        }

        let (mut row, mut column) = (1usize, 1usize);
        if length >= 6 && response[0] == 0x1b && response[1] == b'[' {
            let body = &response[2..length - 1];
            let mut parts = body.split(|&b| b == b';');
            match parts
                .next()
                .and_then(|p| std::str::from_utf8(p).ok())
                .and_then(|p| p.parse::<usize>().ok())
            {
                Some(value) => row = value,
                None => warn!("terminal DSR issue; received garbage row"),
            }
            match parts
                .next()
                .and_then(|p| std::str::from_utf8(p).ok())
                .and_then(|p| p.parse::<usize>().ok())
            {
                Some(value) => column = value,
                None => warn!("terminal DSR issue; received garbage col"),
            }
        }
        Ok((row, column))
    }
}

impl Drop for Editor {
    fn drop(&mut self) {
        self.restore();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::{Color, XtermColor};

    fn test_editor() -> Editor {
        let mut editor = Editor::new();
        editor.out = Box::new(Vec::<u8>::new());
        editor.history_cursor = 0;
        editor
    }

    /// Output sink the test can read back after handing it to the editor.
    #[derive(Clone, Default)]
    struct SharedSink(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedSink {
        fn take(&self) -> Vec<u8> {
            std::mem::take(&mut *self.0.borrow_mut())
        }
    }

    fn test_editor_with_sink() -> (Editor, SharedSink) {
        let mut editor = Editor::new();
        let sink = SharedSink::default();
        editor.out = Box::new(sink.clone());
        editor.history_cursor = 0;
        (editor, sink)
    }

    fn feed(editor: &mut Editor, bytes: &[u8]) {
        editor.incomplete_data.extend_from_slice(bytes);
        editor.process_pending_input().expect("process input");
    }

    fn anchored_spans(editor: &Editor) -> Vec<(usize, usize)> {
        let mut spans = Vec::new();
        for (&start, ends) in &editor.anchored_spans_starting {
            for &end in ends.keys() {
                spans.push((start, end));
            }
        }
        spans
    }

    #[test]
    fn backspace_deletes_the_previous_code_point() {
        let mut editor = test_editor();
        feed(&mut editor, b"hi\x7f\n");
        assert!(editor.finish);
        assert_eq!(editor.line(), "h");
        assert!(editor.input_error.is_none());
    }

    #[test]
    fn right_arrow_moves_the_cursor() {
        let mut editor = test_editor();
        editor.insert_str("ab");
        editor.cursor = 0;
        feed(&mut editor, b"\x1b[C");
        assert_eq!(editor.cursor, 1);
        feed(&mut editor, b"\n");
        assert_eq!(editor.line(), "ab");
    }

    #[test]
    fn cursor_motion_keeps_the_invariant() {
        let mut editor = test_editor();
        for bytes in [
            b"abc".as_slice(),
            b"\x1b[D",
            b"\x1b[D",
            b"\x1b[D",
            b"\x1b[D", // past the start
            b"xy",
            b"\x1b[C",
            b"\x7f",
            b"\x1b[F",
            b"\x1b[H",
        ] {
            feed(&mut editor, bytes);
            assert!(editor.cursor <= editor.buffer.len());
        }
    }

    #[test]
    fn home_end_and_ctrl_shortcuts() {
        let mut editor = test_editor();
        feed(&mut editor, b"hello world");
        feed(&mut editor, b"\x01"); // ^A
        assert_eq!(editor.cursor, 0);
        feed(&mut editor, b"\x05"); // ^E
        assert_eq!(editor.cursor, 11);
        feed(&mut editor, b"\x02"); // ^B
        assert_eq!(editor.cursor, 10);
        feed(&mut editor, b"\x06"); // ^F
        assert_eq!(editor.cursor, 11);
    }

    #[test]
    fn ctrl_k_deletes_to_end_of_line() {
        let mut editor = test_editor();
        feed(&mut editor, b"hello world");
        editor.cursor = 5;
        feed(&mut editor, b"\x0b"); // ^K
        assert_eq!(editor.line(), "hello");
    }

    #[test]
    fn kill_erases_to_start_of_line() {
        let mut editor = test_editor();
        feed(&mut editor, b"hello world");
        feed(&mut editor, b"\x15"); // VKILL
        assert_eq!(editor.line(), "");
        assert_eq!(editor.cursor, 0);
    }

    #[test]
    fn word_erase_is_space_delimited() {
        let mut editor = test_editor();
        feed(&mut editor, b"foo=bar baz");
        feed(&mut editor, b"\x17"); // VWERASE
        assert_eq!(editor.line(), "foo=bar ");
        feed(&mut editor, b"\x17");
        assert_eq!(editor.line(), "");
    }

    #[test]
    fn alt_backspace_is_alnum_delimited() {
        let mut editor = test_editor();
        feed(&mut editor, b"foo=bar baz");
        feed(&mut editor, b"\x1b\x08");
        assert_eq!(editor.line(), "foo=bar ");
        feed(&mut editor, b"\x1b\x08");
        assert_eq!(editor.line(), "foo=");
        feed(&mut editor, b"\x1b\x08");
        assert_eq!(editor.line(), "");
    }

    #[test]
    fn alt_d_deletes_the_word_to_the_right() {
        let mut editor = test_editor();
        feed(&mut editor, b"foo bar");
        editor.cursor = 0;
        feed(&mut editor, b"\x1bd");
        assert_eq!(editor.line(), " bar");
    }

    #[test]
    fn word_motion_skips_leading_non_alnums() {
        let mut editor = test_editor();
        feed(&mut editor, b"foo   bar");
        feed(&mut editor, b"\x1bb"); // alt-b
        assert_eq!(editor.cursor, 6);
        feed(&mut editor, b"\x1bb");
        assert_eq!(editor.cursor, 0);
        feed(&mut editor, b"\x1bf"); // alt-f
        assert_eq!(editor.cursor, 3);
        feed(&mut editor, b"\x1bf");
        assert_eq!(editor.cursor, 9);
    }

    #[test]
    fn prefix_exhausted_on_first_tab_shows_the_list() {
        let mut editor = test_editor();
        editor.set_on_tab_complete(|editor| {
            editor.suggest(2, 0, SpanMode::CodePointOriented);
            vec![
                CompletionSuggestion::new("cat"),
                CompletionSuggestion::new("cd"),
            ]
        });

        // "ca" already extends past the shared "c"; the first press cannot
        // complete anything, so the list comes up right away.
        feed(&mut editor, b"ca\t");
        assert_eq!(editor.line(), "ca");
        assert_eq!(editor.times_tab_pressed, 2);

        // The next press starts cycling from the first candidate.
        feed(&mut editor, b"\t");
        assert_eq!(editor.line(), "cat");
    }

    #[test]
    fn eof_on_empty_buffer_errors_out() {
        let mut editor = test_editor();
        feed(&mut editor, b"\x04"); // VEOF
        assert!(editor.finish);
        assert!(matches!(editor.input_error, Some(EditorError::Eof)));
    }

    #[test]
    fn eof_on_non_empty_buffer_forward_deletes() {
        let mut editor = test_editor();
        feed(&mut editor, b"ab");
        editor.cursor = 0;
        feed(&mut editor, b"\x04");
        assert_eq!(editor.line(), "b");
        assert!(!editor.finish);
    }

    #[test]
    fn ctrl_t_transposes_characters() {
        let mut editor = test_editor();
        feed(&mut editor, b"ab\x14"); // ^T at end
        assert_eq!(editor.line(), "ba");
        assert_eq!(editor.cursor, 2);

        let mut editor = test_editor();
        feed(&mut editor, b"abcd");
        editor.cursor = 2;
        feed(&mut editor, b"\x14");
        assert_eq!(editor.line(), "acbd");
        assert_eq!(editor.cursor, 3);
    }

    #[test]
    fn alt_t_transposes_words() {
        let mut editor = test_editor();
        feed(&mut editor, b"abcd,.:efg");
        feed(&mut editor, b"\x1bt");
        assert_eq!(editor.line(), "efg,.:abcd");
    }

    #[test]
    fn alt_case_conversions() {
        let mut editor = test_editor();
        feed(&mut editor, b"  hello");
        editor.cursor = 0;
        feed(&mut editor, b"\x1bu");
        assert_eq!(editor.line(), "  HELLO");

        let mut editor = test_editor();
        feed(&mut editor, b"hello");
        editor.cursor = 0;
        feed(&mut editor, b"\x1bc");
        assert_eq!(editor.line(), "Hello");
    }

    #[test]
    fn alt_dot_inserts_the_last_word_of_the_last_entry() {
        let mut editor = test_editor();
        editor.add_to_history("echo hello world");
        feed(&mut editor, b"\x1b.");
        assert_eq!(editor.line(), "world");
    }

    #[test]
    fn history_recall_walks_backwards() {
        let mut editor = test_editor();
        editor.add_to_history("ls /");
        editor.add_to_history("echo hi");
        editor.history_cursor = editor.history.len();

        feed(&mut editor, b"\x1b[A");
        assert_eq!(editor.line(), "echo hi");
        feed(&mut editor, b"\x1b[A");
        assert_eq!(editor.line(), "ls /");
        feed(&mut editor, b"\n");
        assert!(editor.finish);
        assert_eq!(editor.line_up_to(usize::MAX), "ls /");
    }

    #[test]
    fn history_recall_down_restores_the_original_input() {
        let mut editor = test_editor();
        editor.add_to_history("ls /");
        editor.add_to_history("echo hi");
        editor.history_cursor = editor.history.len();

        feed(&mut editor, b"\x1b[A");
        assert_eq!(editor.line(), "echo hi");
        feed(&mut editor, b"\x1b[B");
        assert_eq!(editor.line(), "");
        feed(&mut editor, b"\n");
        assert_eq!(editor.line_up_to(usize::MAX), "");
    }

    #[test]
    fn history_recall_up_up_down_lands_on_the_newest() {
        let mut editor = test_editor();
        editor.add_to_history("ls /");
        editor.add_to_history("echo hi");
        editor.history_cursor = editor.history.len();

        feed(&mut editor, b"\x1b[A\x1b[A");
        assert_eq!(editor.line(), "ls /");
        feed(&mut editor, b"\x1b[B");
        assert_eq!(editor.line(), "echo hi");
    }

    #[test]
    fn recall_uses_the_typed_prefix() {
        let mut editor = test_editor();
        editor.add_to_history("ls /");
        editor.add_to_history("echo hi");
        editor.history_cursor = editor.history.len();

        feed(&mut editor, b"ls");
        feed(&mut editor, b"\x1b[A");
        assert_eq!(editor.line(), "ls /");
    }

    #[test]
    fn ctrl_n_and_ctrl_p_mirror_the_arrows() {
        let mut editor = test_editor();
        editor.add_to_history("alpha");
        editor.add_to_history("beta");
        editor.history_cursor = editor.history.len();

        feed(&mut editor, b"\x10"); // ^P
        assert_eq!(editor.line(), "beta");
        feed(&mut editor, b"\x10");
        assert_eq!(editor.line(), "alpha");
        feed(&mut editor, b"\x0e"); // ^N
        assert_eq!(editor.line(), "beta");
    }

    #[test]
    fn completion_follows_the_press_count() {
        let mut editor = test_editor();
        editor.set_on_tab_complete(|editor| {
            editor.suggest(2, 0, SpanMode::CodePointOriented);
            vec![
                CompletionSuggestion::new("commit"),
                CompletionSuggestion::new("commute"),
            ]
        });

        feed(&mut editor, b"co\t");
        assert_eq!(editor.line(), "comm");
        assert_eq!(editor.cursor, 4);

        feed(&mut editor, b"\t");
        assert_eq!(editor.line(), "comm");

        feed(&mut editor, b"\t");
        assert_eq!(editor.line(), "commit");

        feed(&mut editor, b"\t");
        assert_eq!(editor.line(), "commute");

        feed(&mut editor, b"\t");
        assert_eq!(editor.line(), "commit");
    }

    #[test]
    fn single_candidate_commits_immediately() {
        let mut editor = test_editor();
        editor.set_on_tab_complete(|editor| {
            editor.suggest(1, 0, SpanMode::CodePointOriented);
            vec![CompletionSuggestion::with_trailing_trivia("ls", " ")]
        });

        feed(&mut editor, b"l\t");
        assert_eq!(editor.line(), "ls");
        assert_eq!(editor.times_tab_pressed, 0);
        assert_eq!(editor.suggestion_manager.count(), 0);
    }

    #[test]
    fn empty_candidate_list_is_a_noop() {
        let mut editor = test_editor();
        editor.set_on_tab_complete(|_| Vec::new());
        feed(&mut editor, b"xyz\t");
        assert_eq!(editor.line(), "xyz");
    }

    #[test]
    fn cycled_candidate_styles_the_token() {
        let mut editor = test_editor();
        editor.set_on_tab_complete(|editor| {
            editor.suggest(2, 0, SpanMode::CodePointOriented);
            vec![
                CompletionSuggestion::new("commit").with_style(Style {
                    foreground: Color::Xterm(XtermColor::Green),
                    ..Style::default()
                }),
                CompletionSuggestion::new("commute"),
            ]
        });

        feed(&mut editor, b"co\t\t\t");
        assert_eq!(editor.line(), "commit");
        assert_eq!(anchored_spans(&editor), vec![(0, 6)]);
    }

    #[test]
    fn anchored_span_shifts_with_edits() {
        let mut editor = test_editor();
        editor.insert_str("abcdefg");
        editor.stylize(
            Span::code_points(2, 5),
            Style {
                underline: true,
                ..Style::default()
            }
            .anchored(),
        );

        // Deleting before the span shifts it whole.
        editor.remove_at_index(0);
        assert_eq!(anchored_spans(&editor), vec![(1, 4)]);

        // Inserting inside the span extends its end only.
        editor.cursor = 3;
        editor.insert('x');
        assert_eq!(anchored_spans(&editor), vec![(1, 5)]);
    }

    #[test]
    fn anchored_span_collapsing_to_nothing_is_dropped() {
        let mut editor = test_editor();
        editor.insert_str("abc");
        editor.stylize(
            Span::code_points(1, 2),
            Style {
                bold: true,
                ..Style::default()
            }
            .anchored(),
        );
        editor.remove_at_index(1);
        assert!(anchored_spans(&editor).is_empty());
    }

    #[test]
    fn forced_overlap_removal_only_drops_straddling_spans() {
        let mut editor = test_editor();
        editor.insert_str("abcdefgh");
        let style = Style {
            bold: true,
            ..Style::default()
        };
        editor.stylize(Span::code_points(0, 3), style.clone().anchored());
        editor.stylize(Span::code_points(5, 7), style.anchored());

        editor.readjust_anchored_styles(1, ModificationKind::ForcedOverlapRemoval);
        assert_eq!(anchored_spans(&editor), vec![(5, 7)]);
    }

    #[test]
    fn byte_oriented_spans_convert_to_code_points() {
        let mut editor = test_editor();
        // "héllo": the 'é' is two bytes, so byte range [0, 3) covers "hé".
        editor.insert_str("héllo");
        editor.stylize(
            Span::bytes(0, 3),
            Style {
                bold: true,
                ..Style::default()
            }
            .anchored(),
        );
        assert_eq!(anchored_spans(&editor), vec![(0, 2)]);
    }

    #[test]
    fn strip_styles_keeps_anchored_unless_asked() {
        let mut editor = test_editor();
        editor.insert_str("abc");
        let style = Style {
            bold: true,
            ..Style::default()
        };
        editor.stylize(Span::code_points(0, 1), style.clone());
        editor.stylize(Span::code_points(1, 2), style.anchored());

        editor.strip_styles(false);
        assert!(editor.spans_starting.is_empty());
        assert_eq!(anchored_spans(&editor).len(), 1);

        editor.strip_styles(true);
        assert!(anchored_spans(&editor).is_empty());
    }

    #[test]
    fn incremental_utf8_input_is_reassembled() {
        let mut editor = test_editor();
        let bytes = "é".as_bytes();
        feed(&mut editor, &bytes[..1]);
        assert_eq!(editor.line(), "");
        feed(&mut editor, &bytes[1..]);
        assert_eq!(editor.line(), "é");
    }

    #[test]
    fn invalid_leading_bytes_are_discarded() {
        let mut editor = test_editor();
        feed(&mut editor, b"\xff\xfeok");
        assert_eq!(editor.line(), "ok");
    }

    #[test]
    fn unknown_csi_final_resets_the_state_machine() {
        let mut editor = test_editor();
        feed(&mut editor, b"\x1b[Qab");
        assert_eq!(editor.line(), "ab");
    }

    #[test]
    fn delete_terminator_accepts_modified_forms() {
        let mut editor = test_editor();
        feed(&mut editor, b"abc");
        editor.cursor = 0;
        feed(&mut editor, b"\x1b[3~");
        assert_eq!(editor.line(), "bc");
        feed(&mut editor, b"\x1b[3;5~");
        assert_eq!(editor.line(), "c");
    }

    #[test]
    fn key_callback_can_suppress_default_processing() {
        let mut editor = test_editor();
        let hits = Rc::new(RefCell::new(0));
        {
            let hits = Rc::clone(&hits);
            editor.register_character_input_callback('q', move |_| {
                *hits.borrow_mut() += 1;
                false
            });
        }
        feed(&mut editor, b"aqb");
        assert_eq!(editor.line(), "ab");
        assert_eq!(*hits.borrow(), 1);
    }

    #[test]
    fn interrupt_clears_the_buffer_and_keeps_editing() {
        let mut editor = test_editor();
        editor.cached_prompt_valid = true;
        feed(&mut editor, b"abc");
        let called = Rc::new(RefCell::new(false));
        {
            let called = Rc::clone(&called);
            editor.set_on_interrupt_handled(move || *called.borrow_mut() = true);
        }
        editor.handle_interrupt_event().expect("interrupt");
        assert_eq!(editor.line(), "");
        assert_eq!(editor.cursor, 0);
        assert!(*called.borrow());
        assert!(!editor.finish);
    }

    #[test]
    fn finishing_mid_batch_leaves_the_rest_buffered() {
        let mut editor = test_editor();
        feed(&mut editor, b"ab\ncd");
        assert!(editor.finish);
        assert_eq!(editor.line(), "ab");
        // The bytes after the newline wait for the next session.
        assert_eq!(editor.incomplete_data, b"cd");
    }

    #[test]
    fn refresh_is_idempotent_without_input() {
        let (mut editor, sink) = test_editor_with_sink();
        editor.insert_str("ab");
        editor.refresh_display().expect("refresh");
        sink.take();

        editor.refresh_display().expect("refresh");
        let second = sink.take();
        editor.refresh_display().expect("refresh");
        let third = sink.take();

        assert_eq!(second, third);
        // A pure reposition repaints nothing.
        assert!(!String::from_utf8_lossy(&second).contains('a'));
    }

    #[test]
    fn stripping_styles_renders_the_same_visible_text() {
        let (mut editor, sink) = test_editor_with_sink();
        editor.insert_str("ab");
        editor.stylize(
            Span::code_points(0, 2),
            Style {
                underline: true,
                ..Style::default()
            },
        );
        editor.refresh_display().expect("refresh");
        let styled = String::from_utf8_lossy(&sink.take()).into_owned();
        assert!(styled.contains("\x1b[22;4;23m"));

        editor.strip_styles(true);
        editor.refresh_display().expect("refresh");
        let plain = String::from_utf8_lossy(&sink.take()).into_owned();
        assert!(plain.contains("ab"));
        assert!(!plain.contains("\x1b[22;4;23m"));
    }

    #[test]
    fn appending_at_the_end_flushes_pending_bytes_only() {
        let (mut editor, sink) = test_editor_with_sink();
        editor.insert_str("ab");
        editor.refresh_display().expect("refresh");
        sink.take();

        editor.insert('c');
        editor.refresh_display().expect("refresh");
        assert_eq!(sink.take(), b"c");
    }

    #[test]
    fn clear_line_resets_model_and_cursor() {
        let mut editor = test_editor();
        feed(&mut editor, b"abc");
        editor.clear_line().expect("clear");
        assert_eq!(editor.line(), "");
        assert_eq!(editor.cursor, 0);
    }
}
