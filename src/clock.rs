//! Per-seat countdown clocks.
//!
//! The tracker never reads the wall clock to decide how much time passed;
//! callers report elapsed time through [`ClockTracker::tick`] and the server
//! corrects it through [`ClockTracker::reconcile`].

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::board::Side;
use crate::error::ClockError;

/// Base time and per-move increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeControl {
    pub initial: Duration,
    /// Added to a seat each time it completes a move.
    pub increment: Duration,
}

impl TimeControl {
    pub const fn new(initial: Duration, increment: Duration) -> Self {
        Self { initial, increment }
    }
}

impl Default for TimeControl {
    fn default() -> Self {
        Self::new(Duration::from_secs(15 * 60), Duration::ZERO)
    }
}

/// Phase of a single seat clock. `Expired` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockPhase {
    #[default]
    Stopped,
    Running,
    Expired,
}

/// The clock of one seat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeatClock {
    remaining: Duration,
    phase: ClockPhase,
    last_update: Option<Instant>,
}

impl SeatClock {
    fn new(remaining: Duration) -> Self {
        Self {
            remaining,
            phase: ClockPhase::Stopped,
            last_update: None,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.remaining
    }

    pub fn phase(&self) -> ClockPhase {
        self.phase
    }

    /// When the remaining time was last changed.
    pub fn last_update(&self) -> Option<Instant> {
        self.last_update
    }

    fn touch(&mut self) {
        self.last_update = Some(Instant::now());
    }
}

/// Tracks both seat clocks. At most one seat runs at a time: the side to move.
#[derive(Debug, Clone)]
pub struct ClockTracker {
    red: SeatClock,
    black: SeatClock,
    control: TimeControl,
    side_to_move: Side,
}

impl Default for ClockTracker {
    fn default() -> Self {
        Self::new(TimeControl::default())
    }
}

impl ClockTracker {
    /// Both seats stopped with the full initial time, Red to move.
    pub fn new(control: TimeControl) -> Self {
        Self {
            red: SeatClock::new(control.initial),
            black: SeatClock::new(control.initial),
            control,
            side_to_move: Side::Red,
        }
    }

    /// Put both seats back to the initial time, stopped.
    pub fn reset(&mut self) {
        *self = Self::new(self.control);
    }

    pub fn time_control(&self) -> TimeControl {
        self.control
    }

    pub fn side_to_move(&self) -> Side {
        self.side_to_move
    }

    pub fn seat(&self, side: Side) -> &SeatClock {
        match side {
            Side::Red => &self.red,
            Side::Black => &self.black,
        }
    }

    fn seat_mut(&mut self, side: Side) -> &mut SeatClock {
        match side {
            Side::Red => &mut self.red,
            Side::Black => &mut self.black,
        }
    }

    pub fn remaining(&self, side: Side) -> Duration {
        self.seat(side).remaining
    }

    pub fn phase(&self, side: Side) -> ClockPhase {
        self.seat(side).phase
    }

    /// The seat whose clock is running, if any.
    pub fn running_side(&self) -> Option<Side> {
        Side::ALL
            .into_iter()
            .find(|&side| self.phase(side) == ClockPhase::Running)
    }

    /// Start `side`'s clock.
    ///
    /// # Errors
    ///
    /// [`ClockError::Expired`] if the seat already ran out,
    /// [`ClockError::NotOnMove`] if `side` is not the side to move.
    pub fn start(&mut self, side: Side) -> Result<(), ClockError> {
        let seat = self.seat_mut(side);
        if seat.phase == ClockPhase::Expired {
            return Err(ClockError::Expired { side });
        }
        if side != self.side_to_move {
            return Err(ClockError::NotOnMove { side });
        }
        let seat = self.seat_mut(side);
        if seat.phase != ClockPhase::Running {
            seat.phase = ClockPhase::Running;
            seat.touch();
        }
        Ok(())
    }

    /// Stop `side`'s clock. Expired seats stay expired.
    pub fn stop(&mut self, side: Side) {
        let seat = self.seat_mut(side);
        if seat.phase == ClockPhase::Running {
            seat.phase = ClockPhase::Stopped;
            seat.touch();
        }
    }

    /// Stop every running clock.
    pub fn stop_all(&mut self) {
        for side in Side::ALL {
            self.stop(side);
        }
    }

    /// Hand the move to `side`: stop the other seat, credit it the increment
    /// and start `side`'s clock.
    ///
    /// # Errors
    ///
    /// [`ClockError::Expired`] if `side`'s clock has already run out.
    pub fn switch_to(&mut self, side: Side) -> Result<(), ClockError> {
        let previous = side.opponent();
        let increment = self.control.increment;
        let seat = self.seat_mut(previous);
        if seat.phase == ClockPhase::Running {
            seat.phase = ClockPhase::Stopped;
            seat.remaining = seat.remaining.saturating_add(increment);
            seat.touch();
        }
        self.side_to_move = side;
        self.start(side)
    }

    /// Subtract `elapsed` from the running seat.
    ///
    /// Returns the side whose clock ran out during this tick.
    pub fn tick(&mut self, elapsed: Duration) -> Option<Side> {
        let side = self.running_side()?;
        let seat = self.seat_mut(side);
        seat.remaining = seat.remaining.saturating_sub(elapsed);
        seat.touch();
        if seat.remaining.is_zero() {
            seat.phase = ClockPhase::Expired;
            info!(%side, "clock expired");
            return Some(side);
        }
        None
    }

    /// Replace `side`'s remaining time with the server's value.
    ///
    /// Has no effect on an expired seat.
    pub fn reconcile(&mut self, side: Side, server_remaining: Duration) {
        let seat = self.seat_mut(side);
        if seat.phase == ClockPhase::Expired {
            debug!(%side, "ignoring clock correction for expired seat");
            return;
        }
        seat.remaining = server_remaining;
        seat.touch();
    }

    /// Replace both clocks wholesale, as from a table snapshot.
    ///
    /// A seat with no time left comes back expired. When `running` is set the
    /// side to move is started.
    pub fn restore(&mut self, red: Duration, black: Duration, side_to_move: Side, running: bool) {
        self.side_to_move = side_to_move;
        for (side, remaining) in [(Side::Red, red), (Side::Black, black)] {
            let phase = if remaining.is_zero() {
                ClockPhase::Expired
            } else if running && side == side_to_move {
                ClockPhase::Running
            } else {
                ClockPhase::Stopped
            };
            let seat = self.seat_mut(side);
            seat.remaining = remaining;
            seat.phase = phase;
            seat.touch();
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

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

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn tracker(initial: u64) -> ClockTracker {
        ClockTracker::new(TimeControl::new(secs(initial), Duration::ZERO))
    }

    #[test]
    fn default_time_control_is_fifteen_minutes() {
        let clocks = ClockTracker::default();
        assert_eq!(clocks.remaining(Side::Red), secs(900));
        assert_eq!(clocks.remaining(Side::Black), secs(900));
        assert_eq!(clocks.running_side(), None);
    }

    #[test]
    fn only_side_to_move_can_start() {
        let mut clocks = tracker(60);
        assert_eq!(
            clocks.start(Side::Black),
            Err(ClockError::NotOnMove { side: Side::Black })
        );
        clocks.start(Side::Red).unwrap();
        assert_eq!(clocks.phase(Side::Red), ClockPhase::Running);
        assert_eq!(clocks.running_side(), Some(Side::Red));
    }

    #[test]
    fn tick_saturates_at_zero_and_expires() {
        let mut clocks = tracker(10);
        clocks.start(Side::Red).unwrap();
        assert_eq!(clocks.tick(secs(4)), None);
        assert_eq!(clocks.remaining(Side::Red), secs(6));
        assert_eq!(clocks.tick(secs(30)), Some(Side::Red));
        assert_eq!(clocks.remaining(Side::Red), Duration::ZERO);
        assert_eq!(clocks.phase(Side::Red), ClockPhase::Expired);

        // Expired is absorbing.
        assert_eq!(clocks.tick(secs(1)), None);
        assert_eq!(
            clocks.start(Side::Red),
            Err(ClockError::Expired { side: Side::Red })
        );
        assert_eq!(clocks.phase(Side::Red), ClockPhase::Expired);
    }

    #[test]
    fn tick_only_touches_the_running_seat() {
        let mut clocks = tracker(10);
        assert_eq!(clocks.tick(secs(3)), None);
        assert_eq!(clocks.remaining(Side::Red), secs(10));

        clocks.start(Side::Red).unwrap();
        clocks.tick(secs(3));
        assert_eq!(clocks.remaining(Side::Black), secs(10));
    }

    #[test]
    fn reconcile_is_exact_unless_expired() {
        let mut clocks = tracker(10);
        clocks.reconcile(Side::Black, Duration::from_millis(12_345));
        assert_eq!(clocks.remaining(Side::Black), Duration::from_millis(12_345));

        clocks.start(Side::Red).unwrap();
        clocks.tick(secs(10));
        clocks.reconcile(Side::Red, secs(100));
        assert_eq!(clocks.remaining(Side::Red), Duration::ZERO);
        assert_eq!(clocks.phase(Side::Red), ClockPhase::Expired);
    }

    #[test]
    fn switch_hands_over_and_adds_increment() {
        let mut clocks = ClockTracker::new(TimeControl::new(secs(60), secs(5)));
        clocks.start(Side::Red).unwrap();
        clocks.tick(secs(10));
        clocks.switch_to(Side::Black).unwrap();

        assert_eq!(clocks.remaining(Side::Red), secs(55));
        assert_eq!(clocks.phase(Side::Red), ClockPhase::Stopped);
        assert_eq!(clocks.running_side(), Some(Side::Black));
        assert_eq!(clocks.side_to_move(), Side::Black);
    }

    #[test]
    fn stop_all_leaves_expired_seats_expired() {
        let mut clocks = tracker(1);
        clocks.start(Side::Red).unwrap();
        clocks.tick(secs(2));
        clocks.stop_all();
        assert_eq!(clocks.phase(Side::Red), ClockPhase::Expired);
        assert_eq!(clocks.phase(Side::Black), ClockPhase::Stopped);
    }

    #[test]
    fn restore_replaces_both_seats() {
        let mut clocks = tracker(60);
        clocks.start(Side::Red).unwrap();
        clocks.restore(secs(30), Duration::ZERO, Side::Red, true);
        assert_eq!(clocks.remaining(Side::Red), secs(30));
        assert_eq!(clocks.phase(Side::Red), ClockPhase::Running);
        assert_eq!(clocks.phase(Side::Black), ClockPhase::Expired);

        clocks.restore(secs(30), secs(40), Side::Black, false);
        assert_eq!(clocks.running_side(), None);
        assert_eq!(clocks.phase(Side::Black), ClockPhase::Stopped);
        assert!(clocks.seat(Side::Black).last_update().is_some());
    }
}
