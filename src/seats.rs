//! Seat occupancy and observers.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::board::Side;
use crate::error::SeatError;
use crate::protocol::PlayerId;

/// Where a table's game is played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableType {
    /// Offline game on this device, optionally against the engine.
    #[default]
    Local,
    /// Game hosted by the server.
    Networked,
}

/// Who sits at the two colour seats and who is watching.
///
/// A player holds at most one role: a seat or a place among the observers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeatTracker {
    table_type: TableType,
    red: Option<PlayerId>,
    black: Option<PlayerId>,
    observers: Vec<PlayerId>,
}

impl SeatTracker {
    pub fn new(table_type: TableType) -> Self {
        Self {
            table_type,
            ..Self::default()
        }
    }

    /// Clear every seat and observer.
    pub fn reset(&mut self, table_type: TableType) {
        *self = Self::new(table_type);
    }

    pub fn table_type(&self) -> TableType {
        self.table_type
    }

    fn slot(&mut self, side: Side) -> &mut Option<PlayerId> {
        match side {
            Side::Red => &mut self.red,
            Side::Black => &mut self.black,
        }
    }

    /// Seat `player` as `side`.
    ///
    /// Re-seating a player in their own seat does nothing. A player moving
    /// from the other seat or from the observers gives up that role.
    ///
    /// # Errors
    ///
    /// [`SeatError::Occupied`] if another player holds the seat.
    pub fn assign_seat(&mut self, player: &str, side: Side) -> Result<(), SeatError> {
        match self.player_at(side) {
            Some(current) if current == player => return Ok(()),
            Some(current) => {
                return Err(SeatError::Occupied {
                    side,
                    occupant: current.to_owned(),
                })
            }
            None => {}
        }
        self.remove_player(player);
        *self.slot(side) = Some(player.to_owned());
        debug!(player, %side, "seat assigned");
        Ok(())
    }

    /// Empty `side`'s seat. Returns who sat there.
    pub fn vacate_seat(&mut self, side: Side) -> Option<PlayerId> {
        let previous = self.slot(side).take();
        if let Some(player) = &previous {
            debug!(player = %player, %side, "seat vacated");
        }
        previous
    }

    /// Add `player` to the observers, giving up any seat they held.
    pub fn add_observer(&mut self, player: &str) {
        if self.observers.iter().any(|o| o == player) {
            return;
        }
        self.remove_player(player);
        self.observers.push(player.to_owned());
    }

    /// Drop `player` from any seat and from the observers.
    ///
    /// Returns whether the player was at the table.
    pub fn remove_player(&mut self, player: &str) -> bool {
        let mut found = false;
        for side in Side::ALL {
            if self.player_at(side) == Some(player) {
                *self.slot(side) = None;
                found = true;
            }
        }
        let before = self.observers.len();
        self.observers.retain(|o| o != player);
        found || self.observers.len() != before
    }

    pub fn player_at(&self, side: Side) -> Option<&str> {
        match side {
            Side::Red => self.red.as_deref(),
            Side::Black => self.black.as_deref(),
        }
    }

    /// The seat `player` holds, if any.
    pub fn seat_of(&self, player: &str) -> Option<Side> {
        Side::ALL
            .into_iter()
            .find(|&side| self.player_at(side) == Some(player))
    }

    pub fn observers(&self) -> &[PlayerId] {
        &self.observers
    }

    pub fn is_full(&self) -> bool {
        self.red.is_some() && self.black.is_some()
    }

    /// Replace the whole occupancy, as from a table snapshot.
    ///
    /// A player named for both seats keeps only Red.
    pub fn restore(
        &mut self,
        table_type: TableType,
        red: Option<PlayerId>,
        black: Option<PlayerId>,
        observers: Vec<PlayerId>,
    ) {
        let black = match black {
            Some(player) if red.as_ref() == Some(&player) => {
                warn!(%player, "player named for both seats, keeping red only");
                None
            }
            other => other,
        };
        self.table_type = table_type;
        self.observers = observers
            .into_iter()
            .filter(|o| red.as_ref() != Some(o) && black.as_ref() != Some(o))
            .collect();
        self.red = red;
        self.black = black;
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn occupied_seat_rejects_another_player() {
        let mut seats = SeatTracker::new(TableType::Networked);
        seats.assign_seat("alice", Side::Red).unwrap();
        assert_eq!(
            seats.assign_seat("bob", Side::Red),
            Err(SeatError::Occupied {
                side: Side::Red,
                occupant: "alice".to_owned()
            })
        );
        assert_eq!(seats.player_at(Side::Red), Some("alice"));
    }

    #[test]
    fn reassigning_same_player_is_a_no_op() {
        let mut seats = SeatTracker::default();
        seats.assign_seat("alice", Side::Black).unwrap();
        let before = seats.clone();
        seats.assign_seat("alice", Side::Black).unwrap();
        assert_eq!(seats, before);
    }

    #[test]
    fn moving_between_roles_keeps_one_role() {
        let mut seats = SeatTracker::new(TableType::Networked);
        seats.add_observer("carol");
        seats.assign_seat("carol", Side::Red).unwrap();
        assert!(seats.observers().is_empty());

        seats.assign_seat("carol", Side::Black).unwrap();
        assert_eq!(seats.player_at(Side::Red), None);
        assert_eq!(seats.seat_of("carol"), Some(Side::Black));

        seats.add_observer("carol");
        assert_eq!(seats.seat_of("carol"), None);
        assert_eq!(seats.observers(), ["carol".to_owned()]);
    }

    #[test]
    fn vacate_and_remove() {
        let mut seats = SeatTracker::new(TableType::Networked);
        seats.assign_seat("alice", Side::Red).unwrap();
        seats.assign_seat("bob", Side::Black).unwrap();
        assert!(seats.is_full());

        assert_eq!(seats.vacate_seat(Side::Red).as_deref(), Some("alice"));
        assert_eq!(seats.vacate_seat(Side::Red), None);
        assert!(seats.remove_player("bob"));
        assert!(!seats.remove_player("bob"));
        assert_eq!(seats.table_type(), TableType::Networked);
    }

    #[test]
    fn restore_drops_seated_players_from_observers() {
        let mut seats = SeatTracker::default();
        seats.restore(
            TableType::Networked,
            Some("alice".into()),
            None,
            vec!["alice".into(), "dave".into()],
        );
        assert_eq!(seats.observers(), ["dave".to_owned()]);
        assert_eq!(seats.seat_of("alice"), Some(Side::Red));

        seats.reset(TableType::Local);
        assert_eq!(seats, SeatTracker::new(TableType::Local));
    }

    #[test]
    fn restore_never_seats_one_player_twice() {
        let mut seats = SeatTracker::default();
        seats.restore(
            TableType::Networked,
            Some("alice".into()),
            Some("alice".into()),
            vec!["alice".into()],
        );
        assert_eq!(seats.player_at(Side::Red), Some("alice"));
        assert_eq!(seats.player_at(Side::Black), None);
        assert!(seats.observers().is_empty());
        assert!(!seats.is_full());
    }
}
