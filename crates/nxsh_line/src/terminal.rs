//! Thin safe wrappers over the terminal syscalls the editor needs.
//!
//! All `unsafe` in the crate lives here: termios get/set, the window-size
//! ioctl, `read(2)`, `select(2)` readiness polling and `isatty(3)`. The
//! editor treats the modified termios as a process-wide resource; the
//! original attributes are captured once per session and written back on
//! every exit path.

use std::io;
use std::mem::MaybeUninit;
use std::os::unix::io::RawFd;

/// Control characters the line discipline would normally interpret, lifted
/// out of the captured termios so the input state machine can honor
/// `stty`-style remapping.
#[derive(Debug, Clone, Copy)]
pub struct ControlCharacters {
    pub erase: char,
    pub word_erase: char,
    pub kill: char,
    pub end_of_file: char,
}

impl Default for ControlCharacters {
    fn default() -> Self {
        // The usual defaults when no termios is available: DEL, ^W, ^U, ^D.
        Self {
            erase: '\x7f',
            word_erase: '\x17',
            kill: '\x15',
            end_of_file: '\x04',
        }
    }
}

impl ControlCharacters {
    pub fn from_termios(termios: &libc::termios) -> Self {
        let cc = |index: usize| termios.c_cc[index] as char;
        Self {
            erase: cc(libc::VERASE),
            word_erase: cc(libc::VWERASE),
            kill: cc(libc::VKILL),
            end_of_file: cc(libc::VEOF),
        }
    }
}

/// Capture the current terminal attributes of `fd`.
pub fn get_attributes(fd: RawFd) -> io::Result<libc::termios> {
    let mut termios = MaybeUninit::<libc::termios>::uninit();
    if unsafe { libc::tcgetattr(fd, termios.as_mut_ptr()) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { termios.assume_init() })
}

/// Apply attributes to `fd` immediately.
pub fn set_attributes(fd: RawFd, termios: &libc::termios) -> io::Result<()> {
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, termios) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Disable canonical mode and echo; the editor supplies its own line
/// discipline including echoing.
pub fn make_raw_input(termios: &mut libc::termios) {
    termios.c_lflag &= !(libc::ECHO | libc::ICANON);
}

pub fn is_tty(fd: RawFd) -> bool {
    unsafe { libc::isatty(fd) == 1 }
}

/// Current terminal size as (columns, rows), with an 80x25 fallback when the
/// ioctl is unavailable (pipes, CI).
pub fn window_size(fd: RawFd) -> (usize, usize) {
    let mut ws = MaybeUninit::<libc::winsize>::uninit();
    if unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, ws.as_mut_ptr()) } < 0 {
        return (80, 25);
    }
    let ws = unsafe { ws.assume_init() };
    if ws.ws_col == 0 || ws.ws_row == 0 {
        return (80, 25);
    }
    (ws.ws_col as usize, ws.ws_row as usize)
}

/// Blocking read. An interrupted read surfaces as
/// `io::ErrorKind::Interrupted` so the caller can consult its signal flags.
pub fn read_bytes(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

/// Non-blocking readiness check: is there input to read right now?
pub fn poll_readable_now(fd: RawFd) -> io::Result<bool> {
    let mut readfds = MaybeUninit::<libc::fd_set>::uninit();
    unsafe {
        libc::FD_ZERO(readfds.as_mut_ptr());
        libc::FD_SET(fd, readfds.as_mut_ptr());
    }
    let mut timeout = libc::timeval {
        tv_sec: 0,
        tv_usec: 0,
    };
    let rc = unsafe {
        libc::select(
            fd + 1,
            readfds.as_mut_ptr(),
            std::ptr::null_mut(),
            std::ptr::null_mut(),
            &mut timeout,
        )
    };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(unsafe { libc::FD_ISSET(fd, readfds.as_mut_ptr()) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_size_falls_back_on_non_tty() {
        // /dev/null is never a terminal; the ioctl must fail cleanly.
        let file = std::fs::File::open("/dev/null").expect("open /dev/null");
        use std::os::unix::io::AsRawFd;
        let (cols, rows) = window_size(file.as_raw_fd());
        assert_eq!((cols, rows), (80, 25));
        assert!(!is_tty(file.as_raw_fd()));
    }

    #[test]
    fn default_control_characters() {
        let cc = ControlCharacters::default();
        assert_eq!(cc.erase, '\x7f');
        assert_eq!(cc.word_erase, '\x17');
        assert_eq!(cc.kill, '\x15');
        assert_eq!(cc.end_of_file, '\x04');
    }
}
