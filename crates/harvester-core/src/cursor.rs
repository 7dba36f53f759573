//! Forward-only pagination cursor

use std::cmp::Ordering;

/// Server-supplied position in a paginated listing.
///
/// Positions of different kinds are unordered: a server that switches from
/// offsets to tokens mid-listing never counts as advancing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Position {
    Offset(u64),
    Token(String),
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Offset(a), Self::Offset(b)) => Some(a.cmp(b)),
            (Self::Token(a), Self::Token(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Offset(n) => write!(f, "{n}"),
            Self::Token(t) => f.write_str(t),
        }
    }
}

/// Position marker for one partition. `start()` precedes every position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cursor {
    position: Option<Position>,
}

impl Cursor {
    pub const fn start() -> Self {
        Self { position: None }
    }

    pub fn at(position: Position) -> Self {
        Self {
            position: Some(position),
        }
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    /// True iff `self` strictly orders after `previous`.
    pub fn advances_past(&self, previous: &Cursor) -> bool {
        match (&previous.position, &self.position) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(prev), Some(next)) => next.partial_cmp(prev) == Some(Ordering::Greater),
        }
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.position {
            Some(p) => write!(f, "{p}"),
            None => f.write_str("start"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_is_before_everything() {
        assert!(Cursor::at(Position::Offset(0)).advances_past(&Cursor::start()));
        assert!(Cursor::at(Position::Token(String::new())).advances_past(&Cursor::start()));
    }

    #[test]
    fn start_never_advances() {
        assert!(!Cursor::start().advances_past(&Cursor::start()));
        assert!(!Cursor::start().advances_past(&Cursor::at(Position::Offset(3))));
    }

    #[test]
    fn offsets_must_strictly_increase() {
        let prev = Cursor::at(Position::Offset(100));
        assert!(Cursor::at(Position::Offset(101)).advances_past(&prev));
        assert!(!Cursor::at(Position::Offset(100)).advances_past(&prev));
        assert!(!Cursor::at(Position::Offset(99)).advances_past(&prev));
    }

    #[test]
    fn tokens_compare_lexically() {
        let prev = Cursor::at(Position::Token("000120".into()));
        assert!(Cursor::at(Position::Token("000121".into())).advances_past(&prev));
        assert!(!Cursor::at(Position::Token("000119".into())).advances_past(&prev));
    }

    #[test]
    fn mixed_kinds_do_not_advance() {
        let prev = Cursor::at(Position::Offset(5));
        assert!(!Cursor::at(Position::Token("6".into())).advances_past(&prev));
    }

    #[test]
    fn display() {
        assert_eq!(Cursor::start().to_string(), "start");
        assert_eq!(Cursor::at(Position::Offset(42)).to_string(), "42");
    }
}
