//! Hashboard status derivation

use std::fmt;

/// Status a healthy hashboard reports
pub const NOMINAL_STATUS: &str = "Alive";

/// Status assumed for a board that reports no status at all
pub const UNKNOWN_STATUS: &str = "Unknown";

/// Physical hashboard position, in the fixed order used for status derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoardPosition {
    Left,
    Center,
    Right,
}

impl BoardPosition {
    pub const ALL: [BoardPosition; 3] = [
        BoardPosition::Left,
        BoardPosition::Center,
        BoardPosition::Right,
    ];

    /// Index into the slot-ordered board list
    pub fn index(self) -> usize {
        match self {
            BoardPosition::Left => 0,
            BoardPosition::Center => 1,
            BoardPosition::Right => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BoardPosition::Left => "left",
            BoardPosition::Center => "center",
            BoardPosition::Right => "right",
        }
    }
}

impl fmt::Display for BoardPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall device status from per-board statuses in board order.
///
/// Returns [`NOMINAL_STATUS`] when every board is nominal, otherwise the
/// first non-nominal status. A board without a status counts as
/// [`UNKNOWN_STATUS`]. Returns `None` when there are no boards.
pub fn composite_status<'a, I>(statuses: I) -> Option<&'a str>
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut seen = false;
    for status in statuses {
        seen = true;
        let status = status.unwrap_or(UNKNOWN_STATUS);
        if status != NOMINAL_STATUS {
            return Some(status);
        }
    }
    seen.then_some(NOMINAL_STATUS)
}

/// True only if there is at least one board and every board reports a
/// completed frequency upgrade. Absent flags count as incomplete.
pub fn upgrade_complete<I>(flags: I) -> bool
where
    I: IntoIterator<Item = Option<bool>>,
{
    let mut seen = false;
    for flag in flags {
        if flag != Some(true) {
            return false;
        }
        seen = true;
    }
    seen
}
