//! Agents of the simulation.
//!
//! Fish wander the environment and move through a
//! `Susceptible -> Infected -> Immune -> Susceptible` cycle. Pathogens are
//! stationary, short-lived sources of infection shed by infected fish.

use crate::analysis::SummaryRow;
use crate::config::check_num;
use crate::environment::Environment;
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_distr::{Bernoulli, Normal, Uniform};
use serde::{Deserialize, Serialize};
use std::{
    f64::consts::TAU,
    ops::Bound::{Excluded, Unbounded},
};

/// Location of an agent.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }

    pub fn dist_sqr(self, other: Self) -> f64 {
        (self.x - other.x).powi(2) + (self.y - other.y).powi(2)
    }
}

/// Kind of an agent, as recorded in snapshots.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum AgentKind {
    Pathogen,
    Fish,
}

impl AgentKind {
    pub fn flag(self) -> u8 {
        match self {
            Self::Pathogen => 0,
            Self::Fish => 1,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum InfectionStatus {
    Susceptible,
    Infected,
    Immune,
}

/// Fish parameters.
///
/// Every fish owns its own copy.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FishParams {
    /// Tiles moved per iteration.
    pub speed: f64,
    /// Maximum distance at which a pathogen exposes the fish.
    pub infection_radius: f64,
    /// Shedding threshold, compared against a uniform draw in `[0, 100]`.
    pub shedding_rate: f64,
    /// Mean of the infection duration distribution.
    pub mean_infection_timesteps: f64,
    /// Standard deviation of the infection duration distribution.
    pub std_dev_infection_timesteps: f64,
    /// Duration of the immune phase.
    pub immune_timesteps: u32,
}

impl Default for FishParams {
    fn default() -> Self {
        Self {
            speed: 2.5,
            infection_radius: 5.0,
            shedding_rate: 0.75,
            mean_infection_timesteps: 20.0,
            std_dev_infection_timesteps: 5.0,
            immune_timesteps: 10,
        }
    }
}

impl FishParams {
    pub fn validate(&self) -> Result<()> {
        check_num(self.speed, (Excluded(0.0), Unbounded)).context("invalid speed")?;
        check_num(self.infection_radius, (Excluded(0.0), Unbounded))
            .context("invalid infection radius")?;
        check_num(self.shedding_rate, 0.0..=1.0).context("invalid shedding rate")?;
        check_num(self.mean_infection_timesteps, 0.0..1e6)
            .context("invalid mean infection timesteps")?;
        check_num(self.std_dev_infection_timesteps, 0.0..1e6)
            .context("invalid infection timesteps standard deviation")?;
        Ok(())
    }
}

/// Pathogen parameters.
///
/// Copied into every pathogen, and into every fish it infects so that
/// the pathogens the fish sheds carry the same strain.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PathogenParams {
    /// Infection probability at zero distance.
    pub infection_rate: f64,
    /// Probability that an infection is fatal.
    pub mortality_rate: f64,
    /// Number of update passes before the pathogen dies.
    pub lifespan: u32,
}

impl Default for PathogenParams {
    fn default() -> Self {
        Self {
            infection_rate: 0.4,
            mortality_rate: 0.35,
            lifespan: 10,
        }
    }
}

impl PathogenParams {
    pub fn validate(&self) -> Result<()> {
        check_num(self.infection_rate, 0.0..=1.0).context("invalid infection rate")?;
        check_num(self.mortality_rate, 0.0..=1.0).context("invalid mortality rate")?;
        check_num(self.lifespan, 1..).context("invalid lifespan")?;
        Ok(())
    }
}

/// Nearest living pathogen within the infection radius of a fish.
#[derive(Debug, Clone, Copy)]
pub struct Exposure {
    pub distance: f64,
    pub pathogen: PathogenParams,
}

/// Mobile agent with an infection state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fish {
    position: Position,
    speed: f64,
    params: FishParams,
    strain: PathogenParams,

    infection_status: InfectionStatus,
    infection_timesteps: u32,
    infection_death_timesteps: u32,
    immune_timesteps: u32,

    exposed: bool,
    infected: bool,
}

impl Fish {
    /// Create a susceptible fish.
    pub fn new(position: Position, params: FishParams) -> Result<Self> {
        params.validate().context("invalid fish parameters")?;
        Ok(Self {
            position,
            speed: params.speed,
            params,
            strain: PathogenParams::default(),
            infection_status: InfectionStatus::Susceptible,
            infection_timesteps: 0,
            infection_death_timesteps: 0,
            immune_timesteps: 0,
            exposed: false,
            infected: false,
        })
    }

    /// Create a fish already infected by the given strain.
    pub fn new_infected<R: Rng>(
        position: Position,
        params: FishParams,
        strain: PathogenParams,
        rng: &mut R,
    ) -> Result<Self> {
        strain.validate().context("invalid pathogen parameters")?;
        let mut fish = Self::new(position, params)?;
        fish.set_infection_length(&strain, rng)?;
        Ok(fish)
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn status(&self) -> InfectionStatus {
        self.infection_status
    }

    pub fn infection_timesteps(&self) -> u32 {
        self.infection_timesteps
    }

    pub fn infection_death_timesteps(&self) -> u32 {
        self.infection_death_timesteps
    }

    pub fn immune_timesteps(&self) -> u32 {
        self.immune_timesteps
    }

    pub fn exposed(&self) -> bool {
        self.exposed
    }

    pub fn infected(&self) -> bool {
        self.infected
    }

    /// Advance the infection and immunity countdowns by one iteration.
    pub fn progress_infection(&mut self) {
        if self.infection_timesteps > 0 {
            self.infection_timesteps -= 1;
        } else if self.infection_status == InfectionStatus::Infected {
            self.infection_status = InfectionStatus::Immune;
            self.immune_timesteps = self.params.immune_timesteps;
        }

        if self.infection_status == InfectionStatus::Immune {
            if self.immune_timesteps > 0 {
                self.immune_timesteps -= 1;
            } else {
                self.infection_status = InfectionStatus::Susceptible;
            }
        }
    }

    /// Take a random step, possibly shedding a pathogen at the old position.
    ///
    /// Shedding happens when a uniform draw in `[0, 100]` exceeds
    /// `100 * shedding_rate`, so its probability is roughly `1 - shedding_rate`.
    pub fn move_within<E: Environment, R: Rng>(
        &mut self,
        env: &E,
        rng: &mut R,
    ) -> Result<Option<Pathogen>> {
        let mut shed = None;
        if self.infection_status == InfectionStatus::Infected {
            let shed_draw: u32 = rng.random_range(0..=100);
            if self.params.shedding_rate * 100.0 < f64::from(shed_draw) {
                shed = Some(Pathogen::new(self.position, self.strain));
            }
        }

        let dir = Uniform::new(0.0, TAU)?.sample(rng);
        let dx = (dir.cos() * self.speed).round_ties_even();
        let dy = (dir.sin() * self.speed).round_ties_even();
        self.try_move(self.position.offset(dx, dy), env);

        Ok(shed)
    }

    /// Move to `new_position` if the environment allows it, else stay put.
    pub fn try_move<E: Environment>(&mut self, new_position: Position, env: &E) {
        if env.check_position(new_position) {
            self.position = new_position;
        }
    }

    /// Find the nearest living pathogen within the infection radius.
    pub fn nearby_pathogen(&self, agents: &[Agent]) -> Option<Exposure> {
        let (pathogen, dist_sqr) = agents
            .iter()
            .filter_map(|agt| match agt {
                Agent::Pathogen(pathogen) if !pathogen.die() => Some(pathogen),
                _ => None,
            })
            .map(|pathogen| (pathogen, pathogen.position.dist_sqr(self.position)))
            .min_by(|a, b| a.1.total_cmp(&b.1))?;

        if dist_sqr < self.params.infection_radius.powi(2) {
            Some(Exposure {
                distance: dist_sqr.sqrt(),
                pathogen: *pathogen.params(),
            })
        } else {
            None
        }
    }

    /// Register an exposure and, if susceptible, run the infection trial.
    pub fn check_infected<R: Rng>(
        &mut self,
        exposure: Option<Exposure>,
        rng: &mut R,
    ) -> Result<()> {
        let Some(exposure) = exposure else {
            return Ok(());
        };
        self.exposed = true;

        if self.infection_status != InfectionStatus::Susceptible {
            return Ok(());
        }
        let infection_chance = exposure.pathogen.infection_rate / (exposure.distance + 1.0);
        if Bernoulli::new(infection_chance)?.sample(rng) {
            self.set_infection_length(&exposure.pathogen, rng)?;
        }
        Ok(())
    }

    /// Start an infection, sampling its duration and possibly a death timestep.
    pub fn set_infection_length<R: Rng>(
        &mut self,
        pathogen: &PathogenParams,
        rng: &mut R,
    ) -> Result<()> {
        self.infected = true;
        self.infection_status = InfectionStatus::Infected;
        self.strain = *pathogen;

        let duration_dist = Normal::new(
            self.params.mean_infection_timesteps,
            self.params.std_dev_infection_timesteps,
        )?;
        // At least one timestep, so that a death timestep can always be scheduled.
        self.infection_timesteps = duration_dist.sample(rng).round_ties_even().max(1.0) as u32;

        self.infection_death_timesteps = 0;
        if Bernoulli::new(pathogen.mortality_rate)?.sample(rng) {
            let frac: f64 = rng.random();
            self.infection_death_timesteps = death_timestep(frac, self.infection_timesteps);
        }
        Ok(())
    }

    /// Whether the countdown has reached the scheduled death timestep.
    pub fn die(&self) -> bool {
        self.infection_death_timesteps > 0
            && self.infection_death_timesteps == self.infection_timesteps
    }

    #[cfg(test)]
    pub(crate) fn with_infection(mut self, timesteps: u32, death_timesteps: u32) -> Self {
        self.infected = true;
        self.infection_status = InfectionStatus::Infected;
        self.infection_timesteps = timesteps;
        self.infection_death_timesteps = death_timesteps;
        self
    }
}

/// Map a uniform fraction onto a death timestep in `[1, duration]`.
fn death_timestep(frac: f64, duration: u32) -> u32 {
    let step = (frac * f64::from(duration)).round_ties_even() as u32;
    step.clamp(1, duration)
}

/// Stationary, short-lived source of infection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pathogen {
    position: Position,
    params: PathogenParams,
    // Never incremented: the pathogen dies once `lifespan` has counted down to zero.
    age: i64,
    lifespan: i64,
}

impl Pathogen {
    pub fn new(position: Position, params: PathogenParams) -> Self {
        Self {
            position,
            params,
            age: 0,
            lifespan: i64::from(params.lifespan),
        }
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn params(&self) -> &PathogenParams {
        &self.params
    }

    pub fn lifespan(&self) -> i64 {
        self.lifespan
    }

    /// Count the remaining lifespan down by one.
    pub fn check_infected(&mut self) {
        self.lifespan -= 1;
    }

    pub fn die(&self) -> bool {
        self.age >= self.lifespan
    }
}

/// Any simulated entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Agent {
    Fish(Fish),
    Pathogen(Pathogen),
}

impl Agent {
    pub fn kind(&self) -> AgentKind {
        match self {
            Self::Fish(_) => AgentKind::Fish,
            Self::Pathogen(_) => AgentKind::Pathogen,
        }
    }

    pub fn position(&self) -> Position {
        match self {
            Self::Fish(fish) => fish.position,
            Self::Pathogen(pathogen) => pathogen.position,
        }
    }

    pub fn as_fish(&self) -> Option<&Fish> {
        match self {
            Self::Fish(fish) => Some(fish),
            Self::Pathogen(_) => None,
        }
    }

    /// Move the agent, returning any agent it spawned.
    pub fn move_within<E: Environment, R: Rng>(
        &mut self,
        env: &E,
        rng: &mut R,
    ) -> Result<Option<Agent>> {
        match self {
            Self::Fish(fish) => Ok(fish.move_within(env, rng)?.map(Agent::Pathogen)),
            Self::Pathogen(_) => Ok(None),
        }
    }

    pub fn die(&self) -> bool {
        match self {
            Self::Fish(fish) => fish.die(),
            Self::Pathogen(pathogen) => pathogen.die(),
        }
    }

    /// Exposure this agent is subject to within `agents`.
    pub fn nearby_pathogen(&self, agents: &[Agent]) -> Option<Exposure> {
        match self {
            Self::Fish(fish) => fish.nearby_pathogen(agents),
            Self::Pathogen(_) => None,
        }
    }

    pub fn check_infected<R: Rng>(
        &mut self,
        exposure: Option<Exposure>,
        rng: &mut R,
    ) -> Result<()> {
        match self {
            Self::Fish(fish) => fish.check_infected(exposure, rng),
            Self::Pathogen(pathogen) => {
                pathogen.check_infected();
                Ok(())
            }
        }
    }

    pub fn summary_vector(&self) -> SummaryRow {
        let pos = self.position();
        SummaryRow {
            x: pos.x,
            y: pos.y,
            kind_flag: self.kind().flag(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Grid;
    use rand_chacha::ChaCha12Rng;

    fn fish_at(x: f64, y: f64) -> Fish {
        Fish::new(Position::new(x, y), FishParams::default()).unwrap()
    }

    fn pathogen_at(x: f64, y: f64) -> Agent {
        Agent::Pathogen(Pathogen::new(
            Position::new(x, y),
            PathogenParams::default(),
        ))
    }

    #[test]
    fn rejects_invalid_parameters() {
        let pos = Position::new(0.0, 0.0);
        let params = FishParams {
            speed: 0.0,
            ..FishParams::default()
        };
        assert!(Fish::new(pos, params).is_err());
        let params = FishParams {
            speed: -1.0,
            ..FishParams::default()
        };
        assert!(Fish::new(pos, params).is_err());
        let params = FishParams {
            infection_radius: 0.0,
            ..FishParams::default()
        };
        assert!(Fish::new(pos, params).is_err());

        let mut rng = ChaCha12Rng::seed_from_u64(0);
        let strain = PathogenParams {
            mortality_rate: 1.5,
            ..PathogenParams::default()
        };
        assert!(Fish::new_infected(pos, FishParams::default(), strain, &mut rng).is_err());
    }

    #[test]
    fn death_timestep_is_clamped() {
        assert_eq!(death_timestep(0.0, 20), 1);
        assert_eq!(death_timestep(0.01, 20), 1);
        assert_eq!(death_timestep(1.0, 20), 20);
        assert_eq!(death_timestep(0.5, 20), 10);
        assert_eq!(death_timestep(0.0, 1), 1);
    }

    #[test]
    fn infection_cycle() {
        let params = FishParams {
            immune_timesteps: 2,
            ..FishParams::default()
        };
        let mut fish = Fish::new(Position::new(0.0, 0.0), params)
            .unwrap()
            .with_infection(1, 0);

        fish.progress_infection();
        assert_eq!(fish.status(), InfectionStatus::Infected);
        assert_eq!(fish.infection_timesteps(), 0);

        // Entering immunity consumes one immune timestep straight away.
        fish.progress_infection();
        assert_eq!(fish.status(), InfectionStatus::Immune);
        assert_eq!(fish.immune_timesteps(), 1);

        fish.progress_infection();
        assert_eq!(fish.status(), InfectionStatus::Immune);
        assert_eq!(fish.immune_timesteps(), 0);

        fish.progress_infection();
        assert_eq!(fish.status(), InfectionStatus::Susceptible);
        assert_eq!(fish.immune_timesteps(), 0);
        assert!(fish.infected());
    }

    #[test]
    fn death_fires_once_at_scheduled_timestep() {
        let mut fish = fish_at(0.0, 0.0).with_infection(5, 3);
        let mut deaths = Vec::new();
        for _ in 0..20 {
            deaths.push(fish.die());
            fish.progress_infection();
        }
        let n_deaths = deaths.iter().filter(|&&d| d).count();
        assert_eq!(n_deaths, 1);
        assert!(deaths[2]);
    }

    #[test]
    fn onset_respects_invariants() {
        let mut rng = ChaCha12Rng::seed_from_u64(42);
        let strain = PathogenParams {
            mortality_rate: 0.5,
            ..PathogenParams::default()
        };
        let pos = Position::new(0.0, 0.0);
        for _ in 0..1000 {
            let fish = Fish::new_infected(pos, FishParams::default(), strain, &mut rng).unwrap();
            let duration = fish.infection_timesteps();
            let death = fish.infection_death_timesteps();
            assert!(fish.infected());
            assert_eq!(fish.status(), InfectionStatus::Infected);
            assert!(duration >= 1);
            assert!(death == 0 || (1..=duration).contains(&death));
        }
    }

    #[test]
    fn mortality_trial_outcomes() {
        let mut rng = ChaCha12Rng::seed_from_u64(3);
        let pos = Position::new(0.0, 0.0);

        let lethal = PathogenParams {
            mortality_rate: 1.0,
            ..PathogenParams::default()
        };
        let fish = Fish::new_infected(pos, FishParams::default(), lethal, &mut rng).unwrap();
        assert!(fish.infection_death_timesteps() >= 1);

        let harmless = PathogenParams {
            mortality_rate: 0.0,
            ..PathogenParams::default()
        };
        let fish = Fish::new_infected(pos, FishParams::default(), harmless, &mut rng).unwrap();
        assert_eq!(fish.infection_death_timesteps(), 0);
        assert!(!fish.die());
    }

    #[test]
    fn nearest_living_pathogen_is_selected() {
        let fish = fish_at(10.0, 10.0);
        let mut dead = Pathogen::new(Position::new(10.0, 10.0), PathogenParams::default());
        for _ in 0..PathogenParams::default().lifespan {
            dead.check_infected();
        }
        assert!(dead.die());

        let agents = vec![
            Agent::Fish(fish_at(10.0, 10.0)),
            Agent::Pathogen(dead),
            pathogen_at(13.0, 10.0),
            pathogen_at(11.0, 11.0),
        ];
        let exposure = fish.nearby_pathogen(&agents).unwrap();
        assert!((exposure.distance - 2.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn pathogen_outside_radius_is_ignored() {
        let fish = fish_at(0.0, 0.0);
        let agents = vec![pathogen_at(5.0, 0.0), pathogen_at(3.0, 4.0)];
        assert!(fish.nearby_pathogen(&agents).is_none());
        assert!(fish.nearby_pathogen(&[]).is_none());
    }

    #[test]
    fn exposure_is_sticky_and_spares_immune_fish() {
        let mut rng = ChaCha12Rng::seed_from_u64(9);
        let mut fish = fish_at(0.0, 0.0).with_infection(0, 0);
        fish.progress_infection();
        assert_eq!(fish.status(), InfectionStatus::Immune);

        let exposure = Exposure {
            distance: 0.0,
            pathogen: PathogenParams {
                infection_rate: 1.0,
                ..PathogenParams::default()
            },
        };
        fish.check_infected(Some(exposure), &mut rng).unwrap();
        assert!(fish.exposed());
        assert_eq!(fish.status(), InfectionStatus::Immune);

        fish.check_infected(None, &mut rng).unwrap();
        assert!(fish.exposed());
    }

    #[test]
    fn certain_exposure_infects_susceptible_fish() {
        let mut rng = ChaCha12Rng::seed_from_u64(9);
        let mut fish = fish_at(0.0, 0.0);
        let strain = PathogenParams {
            infection_rate: 1.0,
            mortality_rate: 0.0,
            lifespan: 3,
        };
        let exposure = Exposure {
            distance: 0.0,
            pathogen: strain,
        };
        fish.check_infected(Some(exposure), &mut rng).unwrap();
        assert_eq!(fish.status(), InfectionStatus::Infected);
        assert!(fish.infected());
        assert_eq!(fish.strain, strain);
    }

    #[test]
    fn pathogen_lives_for_its_lifespan() {
        let mut pathogen = Pathogen::new(Position::new(1.0, 1.0), PathogenParams::default());
        for _ in 0..10 {
            assert!(!pathogen.die());
            pathogen.check_infected();
        }
        assert!(pathogen.die());
        assert_eq!(pathogen.lifespan(), 0);
    }

    #[test]
    fn pathogens_never_move() {
        let grid = Grid::new(20, 20).unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(0);
        let mut agent = pathogen_at(4.0, 4.0);
        assert!(agent.move_within(&grid, &mut rng).unwrap().is_none());
        assert_eq!(agent.position(), Position::new(4.0, 4.0));
    }

    #[test]
    fn fish_moves_at_most_speed_and_stays_in_bounds() {
        let grid = Grid::new(5, 5).unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(5);
        let mut fish = fish_at(2.0, 2.0);
        for _ in 0..200 {
            let before = fish.position();
            fish.move_within(&grid, &mut rng).unwrap();
            let after = fish.position();
            assert!(grid.check_position(after));
            assert!(before.dist_sqr(after) <= 2.0 * 3.0_f64.powi(2));
            assert_eq!(after.x, after.x.round());
        }
    }

    #[test]
    fn blocked_move_stays_put() {
        let grid = Grid::new(5, 5).unwrap();
        let mut fish = fish_at(0.0, 0.0);
        fish.try_move(Position::new(-2.0, 0.0), &grid);
        assert_eq!(fish.position(), Position::new(0.0, 0.0));
        fish.try_move(Position::new(3.0, 1.0), &grid);
        assert_eq!(fish.position(), Position::new(3.0, 1.0));
    }

    #[test]
    fn shedding_happens_above_threshold() {
        let grid = Grid::new(100, 100).unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(11);
        let n_trials = 4000;
        let mut n_shed = 0;
        for _ in 0..n_trials {
            let mut fish = fish_at(50.0, 50.0).with_infection(5, 0);
            if let Some(pathogen) = fish.move_within(&grid, &mut rng).unwrap() {
                assert_eq!(pathogen.position(), Position::new(50.0, 50.0));
                n_shed += 1;
            }
        }
        // Draws 76..=100 shed: 25 of 101 outcomes.
        let frac = n_shed as f64 / n_trials as f64;
        assert!((frac - 25.0 / 101.0).abs() < 0.03, "shed fraction {frac}");
    }

    #[test]
    fn healthy_fish_never_shed() {
        let grid = Grid::new(100, 100).unwrap();
        let mut rng = ChaCha12Rng::seed_from_u64(11);
        let mut fish = fish_at(50.0, 50.0);
        for _ in 0..100 {
            assert!(fish.move_within(&grid, &mut rng).unwrap().is_none());
        }
    }

    #[test]
    fn summary_vector_flags_kind() {
        let fish = Agent::Fish(fish_at(1.0, 2.0));
        let row = fish.summary_vector();
        assert_eq!((row.x, row.y, row.kind_flag), (1.0, 2.0, 1));
        let row = pathogen_at(3.0, 4.0).summary_vector();
        assert_eq!((row.x, row.y, row.kind_flag), (3.0, 4.0, 0));
    }
}
