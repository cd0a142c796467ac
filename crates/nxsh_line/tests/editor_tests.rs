//! Public-surface tests for the line editing engine.

use nxsh_line::{
    rendered_string_metrics, Color, CompletionMode, CompletionSuggestion, Editor, EditorConfig,
    OperationMode, RefreshBehaviour, Span, Style, SuggestionManager, XtermColor,
};

#[test]
fn editor_buffer_round_trip() {
    let mut editor = Editor::new();
    editor.insert_str("echo héllo");
    assert_eq!(editor.line(), "echo héllo");
    assert_eq!(editor.cursor(), 10);
    assert_eq!(editor.buffer().len(), 10);
    assert_eq!(editor.line_up_to(4), "echo");
}

#[test]
fn history_is_bounded_and_ordered() {
    let mut editor = Editor::with_config(EditorConfig {
        history_capacity: 2,
        ..EditorConfig::default()
    });
    editor.add_to_history("one");
    editor.add_to_history("two");
    editor.add_to_history("three");
    editor.add_to_history("");

    let entries: Vec<&str> = editor.history().iter().collect();
    assert_eq!(entries, vec!["two", "three"]);
}

#[test]
fn stylize_accepts_byte_and_code_point_spans() {
    let mut editor = Editor::new();
    editor.insert_str("écho");

    let mut style = Style::default();
    style.foreground = Color::Xterm(XtermColor::Red);
    editor.stylize(Span::code_points(0, 2), style.clone());
    editor.stylize(Span::bytes(0, 2), style.clone().anchored());
    editor.strip_styles(true);
    // Empty styles are ignored outright.
    editor.stylize(Span::code_points(0, 1), Style::default());
}

#[test]
fn interrupt_handle_is_cloneable_and_sendable() {
    let editor = Editor::new();
    let handle = editor.interrupt_handle();
    let clone = handle.clone();
    let thread = std::thread::spawn(move || {
        clone.interrupt();
        clone.resize();
    });
    thread.join().expect("join");
    handle.interrupt();
}

#[test]
fn config_defaults_detect_lazily() {
    let config = EditorConfig::default();
    assert_eq!(config.operation_mode, OperationMode::Unset);
    assert_eq!(config.refresh_behaviour, RefreshBehaviour::Lazy);

    let eager = EditorConfig::eager();
    assert_eq!(eager.refresh_behaviour, RefreshBehaviour::Eager);
}

#[test]
fn metrics_count_printables_only() {
    let metrics = rendered_string_metrics("\x1b[32msearch:\x1b[0m ");
    assert_eq!(metrics.total_length, 8);

    let metrics = rendered_string_metrics("top\nbottom> ");
    assert_eq!(metrics.line_lengths, vec![3, 8]);
    assert_eq!(metrics.max_line_length, 8);
}

#[test]
fn suggestion_manager_full_cycle() {
    let mut manager = SuggestionManager::new();
    manager.set_suggestions(vec![
        CompletionSuggestion::new("commit"),
        CompletionSuggestion::new("commute"),
    ]);
    manager.set_suggestion_variants(0, 2, 0);

    let result = manager.attempt_completion(CompletionMode::CompletePrefix, 2);
    assert_eq!(result.insert, vec!["mm".to_string()]);

    let result = manager.attempt_completion(CompletionMode::ShowSuggestions, 4);
    assert!(result.insert.is_empty());

    let result = manager.attempt_completion(CompletionMode::CycleSuggestions, 4);
    assert_eq!(result.insert, vec!["mmit".to_string()]);
    assert_eq!(manager.selected_index(), 0);
}

#[test]
fn unify_is_biased_by_preference_only_on_conflict() {
    let mut ours = Style::default();
    ours.foreground = Color::Xterm(XtermColor::Green);
    ours.bold = true;
    let mut theirs = Style::default();
    theirs.foreground = Color::Xterm(XtermColor::Red);
    theirs.underline = true;

    let mut merged = ours.clone();
    merged.unify_with(&theirs, false);
    assert_eq!(merged.foreground, Color::Xterm(XtermColor::Green));
    assert!(merged.bold && merged.underline);

    ours.unify_with(&theirs, true);
    assert_eq!(ours.foreground, Color::Xterm(XtermColor::Red));
}
