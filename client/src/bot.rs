//! Headless input driver.
//!
//! Stands in for real input capture when running the client without a
//! window: wanders in a random heading for a while, occasionally sprinting
//! or jumping, and emits sequenced move intents at the send rate.

use rand::Rng;
use shared::MoveInput;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub struct WanderBot {
    next_sequence: u32,
    ticks_until_turn: u32,
    forward: bool,
    backward: bool,
    left: bool,
    right: bool,
    sprint: bool,
}

impl WanderBot {
    pub fn new() -> Self {
        WanderBot {
            next_sequence: 1,
            ticks_until_turn: 0,
            forward: true,
            backward: false,
            left: false,
            right: false,
            sprint: false,
        }
    }

    /// Produces the next move intent for `source`, re-rolling the heading
    /// every couple of seconds.
    pub fn next_input(&mut self, source: u64) -> MoveInput {
        let mut rng = rand::thread_rng();

        if self.ticks_until_turn == 0 {
            self.ticks_until_turn = rng.gen_range(30..90);

            let heading = rng.gen_range(0u8..4);
            self.forward = heading == 0;
            self.backward = heading == 1;
            self.left = heading == 2;
            self.right = heading == 3;
            self.sprint = rng.gen_bool(0.25);
        }
        self.ticks_until_turn -= 1;

        let input = MoveInput {
            sequence: self.next_sequence,
            timestamp: Self::timestamp(),
            source,
            forward: self.forward,
            backward: self.backward,
            left: self.left,
            right: self.right,
            up: rng.gen_bool(0.02),
            down: false,
            sprint: self.sprint,
        };
        self.next_sequence += 1;
        input
    }

    fn timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_millis() as u64
    }
}

impl Default for WanderBot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequences_are_monotonic() {
        let mut bot = WanderBot::new();
        let a = bot.next_input(1);
        let b = bot.next_input(1);
        let c = bot.next_input(1);
        assert!(a.sequence < b.sequence);
        assert!(b.sequence < c.sequence);
    }

    #[test]
    fn test_source_is_stamped() {
        let mut bot = WanderBot::new();
        assert_eq!(bot.next_input(7).source, 7);
    }

    #[test]
    fn test_exactly_one_heading_at_a_time() {
        let mut bot = WanderBot::new();
        for _ in 0..200 {
            let input = bot.next_input(1);
            let headings = [input.forward, input.backward, input.left, input.right]
                .iter()
                .filter(|&&f| f)
                .count();
            assert!(headings <= 1);
        }
    }
}
