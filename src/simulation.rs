use crate::analysis::Snapshot;
use crate::environment::Environment;
use crate::model::{Agent, Fish};
use anyhow::{Context, Result};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Number of iterations between progress messages.
const PROGRESS_INTERVAL: usize = 100;

/// When pathogens shed during an update pass join the population.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    /// After the pass: shed pathogens are first updated in the next iteration.
    #[default]
    Buffered,
    /// Right after their parent is updated: later agents of the same pass see
    /// them, and they are updated themselves before the pass ends.
    Immediate,
}

/// Exposed and infected fish, counting every dead fish as both.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Tally {
    pub exposed: usize,
    pub infected: usize,
    pub dead_fish: usize,
}

/// Outcome of [`run`].
#[derive(Debug)]
pub struct Run {
    pub record: Vec<Snapshot>,
    pub tally: Tally,
    pub elapsed: Duration,
}

/// Population of live agents and the bookkeeping carried across iterations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Simulation {
    agents: Vec<Agent>,
    dead_fish: usize,
    iteration: usize,
    admission: Admission,
}

impl Simulation {
    pub fn new(agents: Vec<Agent>, admission: Admission) -> Self {
        Self {
            agents,
            dead_fish: 0,
            iteration: 0,
            admission,
        }
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    /// Number of iterations performed so far.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn fish(&self) -> impl Iterator<Item = &Fish> {
        self.agents.iter().filter_map(Agent::as_fish)
    }

    pub fn tally(&self) -> Tally {
        let mut tally = Tally {
            exposed: self.dead_fish,
            infected: self.dead_fish,
            dead_fish: self.dead_fish,
        };
        for fish in self.fish() {
            if fish.exposed() {
                tally.exposed += 1;
            }
            if fish.infected() {
                tally.infected += 1;
            }
        }
        tally
    }

    /// Perform up to `max_iterations` iterations, recording a snapshot after each.
    ///
    /// With `early_stop` the run ends as soon as the population is empty.
    pub fn run<E: Environment, R: Rng>(
        &mut self,
        env: &E,
        max_iterations: usize,
        early_stop: bool,
        rng: &mut R,
    ) -> Result<Run> {
        let start = Instant::now();
        let mut record = Vec::new();

        for _ in 0..max_iterations {
            let snapshot = self
                .step(env, rng)
                .with_context(|| format!("failed to perform iteration {}", self.iteration))?;
            record.push(snapshot);

            if self.iteration % PROGRESS_INTERVAL == 0 {
                log::info!("completed iteration {:5}", self.iteration);
            }

            if early_stop && self.agents.is_empty() {
                log::info!("no agents left after iteration {}", self.iteration);
                break;
            }
        }

        let tally = self.tally();
        let elapsed = start.elapsed();
        log::info!(
            "exposed fish: {}; infected fish: {}",
            tally.exposed,
            tally.infected
        );
        log::info!("runtime took {:.3} seconds", elapsed.as_secs_f64());

        Ok(Run {
            record,
            tally,
            elapsed,
        })
    }

    /// Perform one iteration: death pass, update pass, admission of shed pathogens.
    pub fn step<E: Environment, R: Rng>(&mut self, env: &E, rng: &mut R) -> Result<Snapshot> {
        let n_fish_before = self.fish().count();
        self.agents.retain(|agt| !agt.die());
        let n_dead = n_fish_before - self.fish().count();
        self.dead_fish += n_dead;

        let n_shed = match self.admission {
            Admission::Buffered => self.update_buffered(env, rng)?,
            Admission::Immediate => self.update_immediate(env, rng)?,
        };

        self.iteration += 1;
        log::debug!(
            "iteration {}: {n_dead} fish died, {n_shed} pathogens shed, {} agents alive",
            self.iteration,
            self.agents.len()
        );

        Ok(Snapshot::from_agents(&self.agents))
    }

    fn update_buffered<E: Environment, R: Rng>(&mut self, env: &E, rng: &mut R) -> Result<usize> {
        let mut shed_vec = Vec::new();
        for i_agt in 0..self.agents.len() {
            if let Some(shed) = self.update_agent(i_agt, env, rng)? {
                shed_vec.push(shed);
            }
        }
        let n_shed = shed_vec.len();
        self.agents.append(&mut shed_vec);
        Ok(n_shed)
    }

    fn update_immediate<E: Environment, R: Rng>(&mut self, env: &E, rng: &mut R) -> Result<usize> {
        let mut n_shed = 0;
        let mut i_agt = 0;
        while i_agt < self.agents.len() {
            if let Some(shed) = self.update_agent(i_agt, env, rng)? {
                self.agents.push(shed);
                n_shed += 1;
            }
            i_agt += 1;
        }
        Ok(n_shed)
    }

    fn update_agent<E: Environment, R: Rng>(
        &mut self,
        i_agt: usize,
        env: &E,
        rng: &mut R,
    ) -> Result<Option<Agent>> {
        if let Agent::Fish(fish) = &mut self.agents[i_agt] {
            fish.progress_infection();
        }
        let shed = self.agents[i_agt]
            .move_within(env, rng)
            .context("failed to move agent")?;

        let exposure = self.agents[i_agt].nearby_pathogen(&self.agents);
        self.agents[i_agt]
            .check_infected(exposure, rng)
            .context("failed to check infection")?;

        Ok(shed)
    }
}

/// Run a simulation of `agents` in `env` and return its record.
pub fn run<E: Environment, R: Rng>(
    env: &E,
    agents: Vec<Agent>,
    max_iterations: usize,
    early_stop: bool,
    admission: Admission,
    rng: &mut R,
) -> Result<Run> {
    Simulation::new(agents, admission).run(env, max_iterations, early_stop, rng)
}
