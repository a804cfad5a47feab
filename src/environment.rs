use crate::model::Position;
use anyhow::{Result, bail};
use rand::prelude::*;
use serde::{Deserialize, Serialize};

/// Number of candidates drawn before giving up on finding a legal location.
const MAX_LOCATION_ATTEMPTS: usize = 1000;

/// Space the agents live in.
pub trait Environment {
    /// Whether `pos` is a legal agent location.
    fn check_position(&self, pos: Position) -> bool;

    /// Draw a candidate location, not necessarily legal.
    fn sample_location<R: Rng>(&self, rng: &mut R) -> Position;

    /// Draw a legal location.
    ///
    /// # Errors
    /// Returns an error if no legal candidate is found within a fixed number of attempts.
    fn get_random_location<R: Rng>(&self, rng: &mut R) -> Result<Position> {
        for _ in 0..MAX_LOCATION_ATTEMPTS {
            let pos = self.sample_location(rng);
            if self.check_position(pos) {
                return Ok(pos);
            }
        }
        bail!("no legal location found after {MAX_LOCATION_ATTEMPTS} attempts");
    }
}

/// Bounded rectangular grid of `width x height` cells.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct Grid {
    width: usize,
    height: usize,
}

impl Grid {
    pub fn new(width: usize, height: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            bail!("grid shape must be non-empty, but is {width}x{height}");
        }
        Ok(Self { width, height })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }
}

impl Environment for Grid {
    fn check_position(&self, pos: Position) -> bool {
        pos.x >= 0.0 && pos.y >= 0.0 && pos.x < self.width as f64 && pos.y < self.height as f64
    }

    fn sample_location<R: Rng>(&self, rng: &mut R) -> Position {
        let x = rng.random_range(0..self.width);
        let y = rng.random_range(0..self.height);
        Position::new(x as f64, y as f64)
    }
}
