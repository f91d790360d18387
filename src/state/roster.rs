use std::fmt;

use crate::error::SessionError;

/// Number of player positions on the machine.
pub const SLOT_COUNT: usize = 4;

/// Validated player position, 1 through 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotPosition(u8);

impl SlotPosition {
    /// Every position in display order.
    pub const ALL: [SlotPosition; SLOT_COUNT] = [
        SlotPosition(1),
        SlotPosition(2),
        SlotPosition(3),
        SlotPosition(4),
    ];

    /// Build a position, returning `None` outside 1..=4.
    pub fn new(position: i64) -> Option<Self> {
        match position {
            1..=4 => Some(Self(position as u8)),
            _ => None,
        }
    }

    /// One-based position number.
    pub fn get(self) -> u8 {
        self.0
    }

    /// Zero-based index into slot arrays.
    pub fn index(self) -> usize {
        usize::from(self.0 - 1)
    }
}

impl TryFrom<i64> for SlotPosition {
    type Error = SessionError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(SessionError::InvalidPosition(value))
    }
}

impl fmt::Display for SlotPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One player position and whoever is logged in there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSlot {
    /// Position on the machine.
    pub position: SlotPosition,
    /// Display name; empty when nobody is logged in.
    pub name: String,
}

impl PlayerSlot {
    fn empty(position: SlotPosition) -> Self {
        Self {
            position,
            name: String::new(),
        }
    }

    /// Whether a player occupies this slot.
    pub fn is_occupied(&self) -> bool {
        !self.name.is_empty()
    }
}

/// Fixed four-slot roster of logged-in players.
///
/// `occupied()` always equals the number of slots with a non-empty name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    slots: [PlayerSlot; SLOT_COUNT],
    occupied: usize,
}

impl Default for Roster {
    fn default() -> Self {
        Self {
            slots: SlotPosition::ALL.map(PlayerSlot::empty),
            occupied: 0,
        }
    }
}

impl Roster {
    /// Create an empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a player is logged in at `position`.
    pub fn is_occupied(&self, position: SlotPosition) -> bool {
        self.slots[position.index()].is_occupied()
    }

    /// Name of the player at `position`, if any.
    pub fn name(&self, position: SlotPosition) -> Option<&str> {
        let slot = &self.slots[position.index()];
        slot.is_occupied().then_some(slot.name.as_str())
    }

    /// Seat `name` at `position`.
    ///
    /// Returns `false` without touching the roster when the slot is already taken or the
    /// name is empty.
    pub fn occupy(&mut self, position: SlotPosition, name: impl Into<String>) -> bool {
        let name = name.into();
        let slot = &mut self.slots[position.index()];
        if slot.is_occupied() || name.is_empty() {
            return false;
        }
        slot.name = name;
        self.occupied += 1;
        true
    }

    /// Clear `position`, returning the name that was there.
    pub fn vacate(&mut self, position: SlotPosition) -> Option<String> {
        let slot = &mut self.slots[position.index()];
        if !slot.is_occupied() {
            return None;
        }
        self.occupied -= 1;
        Some(std::mem::take(&mut slot.name))
    }

    /// Clear every slot.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.name.clear();
        }
        self.occupied = 0;
    }

    /// Number of occupied slots.
    pub fn occupied(&self) -> usize {
        self.occupied
    }

    /// Iterate over all four slots in position order.
    pub fn slots(&self) -> impl Iterator<Item = &PlayerSlot> {
        self.slots.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(n: i64) -> SlotPosition {
        SlotPosition::new(n).unwrap()
    }

    #[test]
    fn positions_outside_one_to_four_are_rejected() {
        assert!(SlotPosition::new(0).is_none());
        assert!(SlotPosition::new(5).is_none());
        assert!(SlotPosition::new(-1).is_none());
        assert_eq!(pos(1).index(), 0);
        assert_eq!(pos(4).index(), 3);
        assert!(matches!(
            SlotPosition::try_from(7),
            Err(SessionError::InvalidPosition(7))
        ));
    }

    #[test]
    fn occupy_counts_and_refuses_taken_slots() {
        let mut roster = Roster::new();
        assert!(roster.occupy(pos(2), "ghost42"));
        assert!(!roster.occupy(pos(2), "intruder"));
        assert_eq!(roster.name(pos(2)), Some("ghost42"));
        assert_eq!(roster.occupied(), 1);
    }

    #[test]
    fn empty_names_never_occupy() {
        let mut roster = Roster::new();
        assert!(!roster.occupy(pos(1), ""));
        assert_eq!(roster.occupied(), 0);
        assert!(!roster.is_occupied(pos(1)));
    }

    #[test]
    fn vacate_is_noop_on_empty_slot() {
        let mut roster = Roster::new();
        roster.occupy(pos(3), "boo");
        assert_eq!(roster.vacate(pos(3)).as_deref(), Some("boo"));
        assert_eq!(roster.vacate(pos(3)), None);
        assert_eq!(roster.occupied(), 0);
    }

    #[test]
    fn reset_clears_everything() {
        let mut roster = Roster::new();
        for (i, position) in SlotPosition::ALL.into_iter().enumerate() {
            roster.occupy(position, format!("p{i}"));
        }
        assert_eq!(roster.occupied(), 4);

        roster.reset();
        assert_eq!(roster.occupied(), 0);
        assert!(roster.slots().all(|slot| !slot.is_occupied()));
    }
}
