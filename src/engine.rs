use crate::config::Config;
use crate::environment::{Environment, Grid};
use crate::model::{Agent, Fish, Pathogen};
use crate::simulation::{Simulation, Tally};
use anyhow::{Context, Result};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Simulation engine.
///
/// Holds the configuration, environment, population, and random number generator,
/// and provides methods to initialize, run, save, and load simulations.
#[derive(Serialize, Deserialize)]
pub struct Engine {
    cfg: Config,
    env: Grid,
    sim: Simulation,
    rng: ChaCha12Rng,
}

impl Engine {
    /// Create a new `Engine` with the given configuration and a random initial population.
    pub fn generate_initial_condition(cfg: Config) -> Result<Self> {
        let mut rng = match cfg.run.seed {
            Some(seed) => ChaCha12Rng::seed_from_u64(seed),
            None => ChaCha12Rng::try_from_os_rng()?,
        };

        let env = Grid::new(cfg.env.width, cfg.env.height).context("failed to construct env")?;

        let n_agt = cfg.init.n_fish + cfg.init.n_fish_infected + cfg.init.n_pathogen;
        let mut agt_vec = Vec::with_capacity(n_agt);
        for _ in 0..cfg.init.n_fish {
            let pos = env.get_random_location(&mut rng)?;
            agt_vec.push(Agent::Fish(Fish::new(pos, cfg.fish)?));
        }
        for _ in 0..cfg.init.n_fish_infected {
            let pos = env.get_random_location(&mut rng)?;
            let fish = Fish::new_infected(pos, cfg.fish, cfg.pathogen, &mut rng)?;
            agt_vec.push(Agent::Fish(fish));
        }
        for _ in 0..cfg.init.n_pathogen {
            let pos = env.get_random_location(&mut rng)?;
            agt_vec.push(Agent::Pathogen(Pathogen::new(pos, cfg.pathogen)));
        }
        log::info!("placed {n_agt} agents on a {:?} grid", env.shape());

        let sim = Simulation::new(agt_vec, cfg.run.admission);

        Ok(Self { cfg, env, sim, rng })
    }

    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    pub fn sim(&self) -> &Simulation {
        &self.sim
    }

    /// Perform the simulation and save the resulting record to a binary file.
    pub fn perform_simulation<P: AsRef<Path>>(&mut self, file: P) -> Result<Tally> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        log::info!("starting at iteration {}", self.sim.iteration());
        let run = self
            .sim
            .run(
                &self.env,
                self.cfg.run.n_iterations,
                self.cfg.run.early_stop,
                &mut self.rng,
            )
            .context("failed to run simulation")?;

        encode::write(&mut writer, &run.record).context("failed to serialize record")?;
        writer.flush().context("failed to flush writer stream")?;

        Ok(run.tally)
    }

    /// Save a checkpoint of the entire engine state.
    ///
    /// Can be used to resume the simulation later.
    pub fn save_checkpoint<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, &self).context("failed to serialize engine")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }

    /// Load a previously saved engine checkpoint.
    pub fn load_checkpoint<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let engine = decode::from_read(&mut reader).context("failed to deserialize engine")?;
        Ok(engine)
    }
}
