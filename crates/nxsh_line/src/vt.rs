//! VT-100 escape emitters.
//!
//! Stateless helpers that write cursor-motion, clearing and style escapes to
//! the output sink. Everything here is byte-oriented; flushing is left to the
//! caller except where a sequence must reach the terminal immediately.

use crate::style::Style;
use std::io::{self, Write};

/// Move the cursor to an absolute (row, column), both 1-based.
pub fn move_absolute(out: &mut dyn Write, row: usize, col: usize) -> io::Result<()> {
    write!(out, "\x1b[{row};{col}H")?;
    out.flush()
}

/// Move the cursor relatively; negative rows go up, negative columns left.
pub fn move_relative(out: &mut dyn Write, row: isize, col: isize) -> io::Result<()> {
    let (row_op, rows) = if row > 0 { ('B', row) } else { ('A', -row) };
    let (col_op, cols) = if col > 0 { ('C', col) } else { ('D', -col) };

    if rows > 0 {
        write!(out, "\x1b[{rows}{row_op}")?;
    }
    if cols > 0 {
        write!(out, "\x1b[{cols}{col_op}")?;
    }
    Ok(())
}

/// Clear whole lines around the cursor: go down `count_below` lines, then
/// clear each line moving back up through `count_above` lines above the
/// starting row.
pub fn clear_lines(out: &mut dyn Write, count_above: usize, count_below: usize) -> io::Result<()> {
    if count_below > 0 {
        write!(out, "\x1b[{count_below}B")?;
    }
    let mut remaining = count_below + count_above;
    while remaining > 0 {
        if remaining == 1 {
            out.write_all(b"\x1b[2K")?;
        } else {
            out.write_all(b"\x1b[2K\x1b[A")?;
        }
        remaining -= 1;
    }
    Ok(())
}

pub fn clear_to_end_of_line(out: &mut dyn Write) -> io::Result<()> {
    out.write_all(b"\x1b[K")?;
    out.flush()
}

/// `ESC[3J ESC[H ESC[2J`: wipe the scrollback, home the cursor, clear screen.
pub fn clear_screen(out: &mut dyn Write) -> io::Result<()> {
    out.write_all(b"\x1b[3J\x1b[H\x1b[2J")?;
    out.flush()
}

pub fn save_cursor(out: &mut dyn Write) -> io::Result<()> {
    out.write_all(b"\x1b[s")?;
    out.flush()
}

pub fn restore_cursor(out: &mut dyn Write) -> io::Result<()> {
    out.write_all(b"\x1b[u")?;
    out.flush()
}

pub fn bell(out: &mut dyn Write) -> io::Result<()> {
    out.write_all(b"\x07")?;
    out.flush()
}

/// Emit the escapes for `style`. A starting application writes the boolean
/// renditions (on or off), the colors and the hyperlink opener; a
/// non-starting application only terminates the hyperlink, with the SGR
/// reset handled by the caller so overlapping spans can be reapplied.
pub fn apply_style(out: &mut dyn Write, style: &Style, starting: bool) -> io::Result<()> {
    if starting {
        write!(
            out,
            "\x1b[{};{};{}m{}{}{}",
            if style.bold { 1 } else { 22 },
            if style.underline { 4 } else { 24 },
            if style.italic { 3 } else { 23 },
            style.background.background_escape(),
            style.foreground.foreground_escape(),
            style.hyperlink_escape(true),
        )
    } else {
        write!(out, "{}", style.hyperlink_escape(false))
    }
}

/// Reset every graphic rendition.
pub fn reset_style(out: &mut dyn Write) -> io::Result<()> {
    out.write_all(b"\x1b[0m")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::{Color, XtermColor};

    fn captured(f: impl FnOnce(&mut Vec<u8>) -> io::Result<()>) -> String {
        let mut sink = Vec::new();
        f(&mut sink).expect("write to Vec");
        String::from_utf8(sink).expect("utf8")
    }

    #[test]
    fn absolute_and_relative_moves() {
        assert_eq!(captured(|o| move_absolute(o, 3, 7)), "\x1b[3;7H");
        assert_eq!(captured(|o| move_relative(o, -2, 4)), "\x1b[2A\x1b[4C");
        assert_eq!(captured(|o| move_relative(o, 1, -1)), "\x1b[1B\x1b[1D");
        assert_eq!(captured(|o| move_relative(o, 0, 0)), "");
    }

    #[test]
    fn clear_lines_walks_down_then_up() {
        assert_eq!(
            captured(|o| clear_lines(o, 1, 1)),
            "\x1b[1B\x1b[2K\x1b[A\x1b[2K"
        );
        assert_eq!(captured(|o| clear_lines(o, 0, 0)), "");
    }

    #[test]
    fn style_application_emits_sgr() {
        let style = Style {
            foreground: Color::Xterm(XtermColor::Cyan),
            bold: true,
            ..Style::default()
        };
        assert_eq!(
            captured(|o| apply_style(o, &style, true)),
            "\x1b[1;24;23m\x1b[36m"
        );
        assert_eq!(captured(|o| apply_style(o, &style, false)), "");
    }
}
