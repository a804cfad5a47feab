use crate::model::{FishParams, PathogenParams};
use crate::simulation::Admission;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Simulation configuration parameters.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Environment shape.
    pub env: EnvConfig,

    /// Parameters shared by every fish.
    #[serde(default)]
    pub fish: FishParams,
    /// Parameters of the initial strain.
    #[serde(default)]
    pub pathogen: PathogenParams,

    /// Initial population.
    pub init: InitConfig,

    /// Iteration budget and loop options.
    pub run: RunConfig,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct EnvConfig {
    pub width: usize,
    pub height: usize,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct InitConfig {
    /// Number of susceptible fish.
    pub n_fish: usize,
    /// Number of infected fish.
    pub n_fish_infected: usize,
    /// Number of free pathogens.
    #[serde(default)]
    pub n_pathogen: usize,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of iterations performed by each `create` or `resume`.
    pub n_iterations: usize,
    /// Stop as soon as no agents are left.
    #[serde(default = "default_early_stop")]
    pub early_stop: bool,
    /// Admission policy for shed pathogens.
    #[serde(default)]
    pub admission: Admission,
    /// Seed of the random number generator (drawn from the OS if absent).
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_early_stop() -> bool {
    true
}

impl Config {
    /// Load a [`Config`] from a file.
    ///
    /// The file must be a TOML document describing a [`Config`].
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        check_num(self.env.width, 1..100_000).context("invalid environment width")?;
        check_num(self.env.height, 1..100_000).context("invalid environment height")?;

        self.fish.validate().context("invalid fish parameters")?;
        self.pathogen
            .validate()
            .context("invalid pathogen parameters")?;

        check_num(self.init.n_fish, 0..1_000_000).context("invalid number of fish")?;
        check_num(self.init.n_fish_infected, 0..1_000_000)
            .context("invalid number of infected fish")?;
        check_num(self.init.n_pathogen, 0..1_000_000).context("invalid number of pathogens")?;

        check_num(self.run.n_iterations, 1..10_000_000).context("invalid number of iterations")?;

        Ok(())
    }
}

pub(crate) fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}
