//! Wire protocol shared by the rendezvous server and the player client.
//!
//! Two layers, both deliberately tiny:
//! - Handshake: line-terminated text. The client sends its desired player
//!   name; the server answers with one token per attempt.
//! - Per-tick commands: raw keypress bytes. Arrow keys arrive as 3-byte ANSI
//!   escapes, secondary commands as single ASCII letters. Only the most
//!   recent bytes of a read are inspected; stale bytes are ignored.

/// Server -> client: name accepted, quorum met, game is (or will be) running.
pub const TOKEN_READY: &str = "READY";
/// Server -> client: name accepted, waiting for more players.
pub const TOKEN_WAIT: &str = "WAIT";
/// Server -> client: name invalid or already bound; retry on the same
/// connection.
pub const TOKEN_TAKEN: &str = "TAKEN";

/// A grid/paddle direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn opposite(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }
}

/// One decoded player command for a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Plain directional step (arrow key).
    Move(Direction),
    /// Dash a fixed distance in the given direction (`z`/`s`/`q`/`d`).
    Boost(Direction),
}

/// Decodes the most recent keypress out of a raw read.
///
/// Malformed or partial bytes yield `None`, never an error: an absent or
/// garbled command simply means "no command this tick".
pub fn decode_command(raw: &[u8]) -> Option<Command> {
    // Cooked terminals append CR/LF after the keypress; strip it.
    let mut end = raw.len();
    while end > 0 && (raw[end - 1] == b'\n' || raw[end - 1] == b'\r') {
        end -= 1;
    }
    let raw = &raw[..end];

    if raw.len() >= 3 {
        if let &[0x1b, b'[', code] = &raw[raw.len() - 3..] {
            return match code {
                b'A' => Some(Command::Move(Direction::Up)),
                b'B' => Some(Command::Move(Direction::Down)),
                b'C' => Some(Command::Move(Direction::Right)),
                b'D' => Some(Command::Move(Direction::Left)),
                _ => None,
            };
        }
    }

    match raw.last() {
        Some(b'z') => Some(Command::Boost(Direction::Up)),
        Some(b's') => Some(Command::Boost(Direction::Down)),
        Some(b'q') => Some(Command::Boost(Direction::Left)),
        Some(b'd') => Some(Command::Boost(Direction::Right)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_arrow_escapes() {
        assert_eq!(
            decode_command(b"\x1b[A"),
            Some(Command::Move(Direction::Up))
        );
        assert_eq!(
            decode_command(b"\x1b[B\n"),
            Some(Command::Move(Direction::Down))
        );
        assert_eq!(
            decode_command(b"\x1b[C"),
            Some(Command::Move(Direction::Right))
        );
        assert_eq!(
            decode_command(b"\x1b[D"),
            Some(Command::Move(Direction::Left))
        );
    }

    #[test]
    fn most_recent_keypress_wins() {
        assert_eq!(
            decode_command(b"\x1b[A\x1b[B"),
            Some(Command::Move(Direction::Down))
        );
    }

    #[test]
    fn decodes_boost_letters() {
        assert_eq!(decode_command(b"z"), Some(Command::Boost(Direction::Up)));
        assert_eq!(decode_command(b"s"), Some(Command::Boost(Direction::Down)));
        assert_eq!(decode_command(b"q"), Some(Command::Boost(Direction::Left)));
        assert_eq!(decode_command(b"d"), Some(Command::Boost(Direction::Right)));
    }

    #[test]
    fn garbage_is_no_command() {
        assert_eq!(decode_command(b""), None);
        assert_eq!(decode_command(b"\x1b["), None);
        assert_eq!(decode_command(b"hello"), None);
        assert_eq!(decode_command(b"\x1b[Z"), None);
    }

    #[test]
    fn reversal_helper() {
        assert_eq!(Direction::Up.opposite(), Direction::Down);
        assert_eq!(Direction::Left.opposite(), Direction::Right);
    }
}
