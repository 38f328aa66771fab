//! Raw, non-blocking terminal keyboard input.
//!
//! `Keyboard::enable` switches stdin out of canonical mode with echo off and
//! O_NONBLOCK on; dropping the guard restores the saved state. `poll` reads
//! at most one byte per call.

use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCode {
    Q,
    Enter,
    Space,
    Up,
    Down,
    Left,
    Right,
    M,
    Comma,
    Period,
    Slash,
    Backslash,
}

fn map_byte(c: u8) -> Option<KeyCode> {
    match c {
        10 => Some(KeyCode::Enter),
        32 => Some(KeyCode::Space),
        65 => Some(KeyCode::Up),
        66 => Some(KeyCode::Down),
        67 => Some(KeyCode::Right),
        68 => Some(KeyCode::Left),
        113 => Some(KeyCode::Q),
        109 => Some(KeyCode::M),
        44 => Some(KeyCode::Comma),
        46 => Some(KeyCode::Period),
        47 => Some(KeyCode::Slash),
        92 => Some(KeyCode::Backslash),
        _ => None,
    }
}

/// Guard over the terminal state. Keep it alive for the whole queue run.
pub struct Keyboard {
    saved_termios: libc::termios,
    saved_flags: i32,
    restored: bool,
}

impl Keyboard {
    pub fn enable() -> io::Result<Keyboard> {
        // SAFETY: plain POSIX calls on the stdin fd with a zeroed termios
        // to be filled by tcgetattr.
        unsafe {
            let mut term: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(libc::STDIN_FILENO, &mut term) != 0 {
                return Err(io::Error::last_os_error());
            }
            let saved_termios = term;
            let saved_flags = libc::fcntl(libc::STDIN_FILENO, libc::F_GETFL, 0);
            if saved_flags < 0 {
                return Err(io::Error::last_os_error());
            }

            term.c_lflag &= !(libc::ICANON | libc::ECHO);
            if libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &term) != 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::fcntl(
                libc::STDIN_FILENO,
                libc::F_SETFL,
                saved_flags | libc::O_NONBLOCK,
            ) < 0
            {
                return Err(io::Error::last_os_error());
            }

            Ok(Keyboard {
                saved_termios,
                saved_flags,
                restored: false,
            })
        }
    }

    /// Restore canonical mode and blocking reads.
    pub fn restore(&mut self) {
        if self.restored {
            return;
        }
        // SAFETY: restores the exact state captured in enable().
        unsafe {
            libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &self.saved_termios);
            libc::fcntl(libc::STDIN_FILENO, libc::F_SETFL, self.saved_flags);
        }
        self.restored = true;
    }

    /// Non-blocking read of one key, `None` when no byte is pending.
    pub fn poll() -> Option<KeyCode> {
        let mut byte = 0u8;
        // SAFETY: single-byte read on stdin; O_NONBLOCK makes it return
        // immediately with EAGAIN when nothing is buffered.
        let n = unsafe { libc::read(libc::STDIN_FILENO, &mut byte as *mut u8 as *mut _, 1) };
        if n == 1 {
            map_byte(byte)
        } else {
            None
        }
    }
}

impl Drop for Keyboard {
    fn drop(&mut self) {
        self.restore();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_mapping_matches_the_dispatch_table() {
        assert_eq!(map_byte(10), Some(KeyCode::Enter));
        assert_eq!(map_byte(32), Some(KeyCode::Space));
        assert_eq!(map_byte(65), Some(KeyCode::Up));
        assert_eq!(map_byte(66), Some(KeyCode::Down));
        assert_eq!(map_byte(67), Some(KeyCode::Right));
        assert_eq!(map_byte(68), Some(KeyCode::Left));
        assert_eq!(map_byte(113), Some(KeyCode::Q));
        assert_eq!(map_byte(109), Some(KeyCode::M));
        assert_eq!(map_byte(44), Some(KeyCode::Comma));
        assert_eq!(map_byte(46), Some(KeyCode::Period));
        assert_eq!(map_byte(47), Some(KeyCode::Slash));
        assert_eq!(map_byte(92), Some(KeyCode::Backslash));
        assert_eq!(map_byte(0), None);
        assert_eq!(map_byte(97), None);
    }
}
