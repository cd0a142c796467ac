//! Error type surfaced by editing sessions.

/// Ways a `get_line` session can end without producing a line.
#[derive(Debug, thiserror::Error)]
pub enum EditorError {
    /// End of input: Ctrl-D on an empty buffer, or EOF in non-interactive mode.
    #[error("end of input")]
    Eof,

    /// A read produced zero bytes with nothing pending, or the terminal never
    /// answered a cursor-position query.
    #[error("no input available")]
    Empty,

    /// A read or write against the terminal failed. The original error is
    /// preserved so callers can log the errno.
    #[error("terminal read failed: {0}")]
    ReadFailure(#[from] std::io::Error),
}

impl EditorError {
    /// Whether this error means the peer simply closed the input stream.
    pub fn is_eof(&self) -> bool {
        matches!(self, EditorError::Eof)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_failure_preserves_errno() {
        let io = std::io::Error::from_raw_os_error(libc::EBADF);
        let err = EditorError::from(io);
        match err {
            EditorError::ReadFailure(inner) => {
                assert_eq!(inner.raw_os_error(), Some(libc::EBADF));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn eof_is_eof() {
        assert!(EditorError::Eof.is_eof());
        assert!(!EditorError::Empty.is_eof());
    }
}
