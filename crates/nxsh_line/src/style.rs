//! Graphic-rendition styles and the spans they are applied to.
//!
//! A [`Style`] is a set of SGR attributes (colors, bold/italic/underline,
//! optional hyperlink) that serializes to VT escape strings. A [`Span`] is a
//! half-open range over the edit buffer, byte- or code-point-oriented, that
//! a style gets attached to.

/// The classic 8-color xterm palette.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XtermColor {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
}

impl XtermColor {
    fn index(self) -> u8 {
        match self {
            XtermColor::Black => 0,
            XtermColor::Red => 1,
            XtermColor::Green => 2,
            XtermColor::Yellow => 3,
            XtermColor::Blue => 4,
            XtermColor::Magenta => 5,
            XtermColor::Cyan => 6,
            XtermColor::White => 7,
        }
    }
}

/// A foreground or background color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Color {
    /// The terminal's configured default.
    #[default]
    Default,
    /// One of the 8 palette colors.
    Xterm(XtermColor),
    /// 24-bit true color.
    Rgb(u8, u8, u8),
}

impl Color {
    pub fn is_default(&self) -> bool {
        matches!(self, Color::Default)
    }

    /// SGR escape selecting this color as the foreground, empty for default.
    pub fn foreground_escape(&self) -> String {
        match self {
            Color::Default => String::new(),
            Color::Xterm(c) => format!("\x1b[{}m", 30 + c.index()),
            Color::Rgb(r, g, b) => format!("\x1b[38;2;{r};{g};{b}m"),
        }
    }

    /// SGR escape selecting this color as the background, empty for default.
    pub fn background_escape(&self) -> String {
        match self {
            Color::Default => String::new(),
            Color::Xterm(c) => format!("\x1b[{}m", 40 + c.index()),
            Color::Rgb(r, g, b) => format!("\x1b[48;2;{r};{g};{b}m"),
        }
    }
}

/// How a [`Span`]'s offsets are to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanMode {
    /// Offsets count UTF-8 bytes and are converted on entry.
    ByteOriented,
    /// Offsets count code points.
    CodePointOriented,
}

/// A half-open range `[start, end)` over the edit buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub mode: SpanMode,
}

impl Span {
    /// A code-point-oriented span.
    pub fn code_points(start: usize, end: usize) -> Self {
        Self {
            start,
            end,
            mode: SpanMode::CodePointOriented,
        }
    }

    /// A byte-oriented span.
    pub fn bytes(start: usize, end: usize) -> Self {
        Self {
            start,
            end,
            mode: SpanMode::ByteOriented,
        }
    }
}

/// A set of graphic-rendition attributes.
///
/// An *anchored* style tracks edits: the span it was applied to shifts with
/// insertions and removals so the styling follows the text it covers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Style {
    pub foreground: Color,
    pub background: Color,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub hyperlink: Option<String>,
    pub(crate) anchored: bool,
}

impl Style {
    /// The style that resets every attribute.
    pub fn reset_style() -> Self {
        Self::default()
    }

    /// Mark this style as anchored so its span follows the text across edits.
    pub fn anchored(mut self) -> Self {
        self.anchored = true;
        self
    }

    pub fn is_anchored(&self) -> bool {
        self.anchored
    }

    /// A style with no visible effect.
    pub fn is_empty(&self) -> bool {
        self.foreground.is_default()
            && self.background.is_default()
            && !self.bold
            && !self.italic
            && !self.underline
            && self.hyperlink.is_none()
    }

    /// Merge `other` into `self`. Boolean renditions are or'ed together;
    /// colors and hyperlinks are taken from `other` when ours is default, or
    /// unconditionally when `prefer_other` is set.
    pub fn unify_with(&mut self, other: &Style, prefer_other: bool) {
        if prefer_other || self.background.is_default() {
            self.background = other.background;
        }
        if prefer_other || self.foreground.is_default() {
            self.foreground = other.foreground;
        }

        if other.bold {
            self.bold = true;
        }
        if other.italic {
            self.italic = true;
        }
        if other.underline {
            self.underline = true;
        }

        if prefer_other || self.hyperlink.is_none() {
            self.hyperlink.clone_from(&other.hyperlink);
        }
    }

    /// OSC 8 hyperlink escape; `starting` opens the link, otherwise closes it.
    /// Empty when the style carries no link.
    pub fn hyperlink_escape(&self, starting: bool) -> String {
        match &self.hyperlink {
            None => String::new(),
            Some(link) => {
                if starting {
                    format!("\x1b]8;;{link}\x1b\\")
                } else {
                    "\x1b]8;;\x1b\\".to_string()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_escapes() {
        assert_eq!(Color::Xterm(XtermColor::Red).foreground_escape(), "\x1b[31m");
        assert_eq!(Color::Xterm(XtermColor::Blue).background_escape(), "\x1b[44m");
        assert_eq!(
            Color::Rgb(1, 2, 3).foreground_escape(),
            "\x1b[38;2;1;2;3m"
        );
        assert_eq!(Color::Default.foreground_escape(), "");
    }

    #[test]
    fn unify_keeps_own_color_unless_preferring_other() {
        let mut a = Style {
            foreground: Color::Xterm(XtermColor::Green),
            ..Style::default()
        };
        let b = Style {
            foreground: Color::Xterm(XtermColor::Red),
            bold: true,
            ..Style::default()
        };

        a.unify_with(&b, false);
        assert_eq!(a.foreground, Color::Xterm(XtermColor::Green));
        assert!(a.bold);

        a.unify_with(&b, true);
        assert_eq!(a.foreground, Color::Xterm(XtermColor::Red));
    }

    #[test]
    fn unify_fills_default_sides() {
        let mut a = Style::default();
        let b = Style {
            background: Color::Rgb(9, 9, 9),
            hyperlink: Some("https://example.com".into()),
            ..Style::default()
        };
        a.unify_with(&b, false);
        assert_eq!(a.background, Color::Rgb(9, 9, 9));
        assert_eq!(a.hyperlink.as_deref(), Some("https://example.com"));
    }

    #[test]
    fn hyperlink_escape_opens_and_closes() {
        let style = Style {
            hyperlink: Some("https://example.com".into()),
            ..Style::default()
        };
        assert_eq!(
            style.hyperlink_escape(true),
            "\x1b]8;;https://example.com\x1b\\"
        );
        assert_eq!(style.hyperlink_escape(false), "\x1b]8;;\x1b\\");
        assert_eq!(Style::default().hyperlink_escape(true), "");
    }

    #[test]
    fn anchored_is_a_marker_not_a_rendition() {
        let style = Style::default().anchored();
        assert!(style.is_anchored());
        assert!(style.is_empty());
    }
}
