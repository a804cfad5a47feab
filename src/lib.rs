//! Stochastic agent-based simulation of a pathogen spreading through a fish
//! population on a bounded grid.
//!
//! [`simulation::run`] is the in-memory entry point; [`manager::Manager`]
//! drives persistent runs stored in a simulation directory.

pub mod analysis;
pub mod config;
pub mod engine;
pub mod environment;
pub mod manager;
pub mod model;
pub mod simulation;
pub mod stats;
