//! Scripted input source for the headless bot

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::InputMask;

/// Directions the script picks from; the empty mask means standing still.
const MOVES: [InputMask; 9] = [
    InputMask::empty(),
    InputMask::UP,
    InputMask::DOWN,
    InputMask::LEFT,
    InputMask::RIGHT,
    InputMask::from_bits(InputMask::UP.bits() | InputMask::LEFT.bits()),
    InputMask::from_bits(InputMask::UP.bits() | InputMask::RIGHT.bits()),
    InputMask::from_bits(InputMask::DOWN.bits() | InputMask::LEFT.bits()),
    InputMask::from_bits(InputMask::DOWN.bits() | InputMask::RIGHT.bits()),
];

/// Produces one input mask per tick: a random direction held for a random
/// number of ticks, with the occasional shot.
///
/// Like a real player's input layer it only reports a mask when it changed,
/// or every `keep_alive_ticks` so the server keeps the session alive.
pub struct InputScript<R: Rng = StdRng> {
    rng: R,
    current: InputMask,
    hold_ticks_left: u32,
    ticks_since_sent: u32,
    min_hold: u32,
    max_hold: u32,
    shoot_chance: f64,
    keep_alive_ticks: u32,
}

impl InputScript<StdRng> {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Same seed, same sequence of inputs.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> InputScript<R> {
    pub fn with_rng(rng: R) -> Self {
        Self {
            rng,
            current: InputMask::empty(),
            hold_ticks_left: 0,
            ticks_since_sent: 0,
            min_hold: 5,
            max_hold: 30,
            shoot_chance: 0.1,
            keep_alive_ticks: 30,
        }
    }

    pub fn with_keep_alive(mut self, ticks: u32) -> Self {
        self.keep_alive_ticks = ticks.max(1);
        self
    }

    pub fn with_shoot_chance(mut self, chance: f64) -> Self {
        self.shoot_chance = chance.clamp(0.0, 1.0);
        self
    }

    pub fn current(&self) -> InputMask {
        self.current
    }

    /// Advances one tick. Returns the mask to send, if any.
    pub fn update(&mut self) -> Option<InputMask> {
        let previous = self.current;

        if self.hold_ticks_left == 0 {
            self.current = MOVES[self.rng.gen_range(0..MOVES.len())];
            self.hold_ticks_left = self.rng.gen_range(self.min_hold..=self.max_hold);
        }
        self.hold_ticks_left -= 1;

        self.current.remove(InputMask::SHOOT);
        if self.rng.gen_bool(self.shoot_chance) {
            self.current.insert(InputMask::SHOOT);
        }

        self.ticks_since_sent += 1;
        if self.current != previous || self.ticks_since_sent >= self.keep_alive_ticks {
            self.ticks_since_sent = 0;
            Some(self.current)
        } else {
            None
        }
    }
}

impl Default for InputScript<StdRng> {
    fn default() -> Self {
        Self::new()
    }
}
