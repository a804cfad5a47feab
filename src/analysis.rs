use crate::model::{Agent, AgentKind};
use crate::simulation::Tally;
use crate::stats::{Accumulator, AccumulatorReport};
use anyhow::{Context, Result};
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Recorded location and kind of one agent.
#[derive(Debug, PartialEq, Clone, Copy, Serialize, Deserialize)]
pub struct SummaryRow {
    pub x: f64,
    pub y: f64,
    /// `0` for a pathogen, `1` for a fish.
    pub kind_flag: u8,
}

/// Rows of every live agent at the end of one iteration.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot(Vec<SummaryRow>);

impl Snapshot {
    pub fn from_agents(agents: &[Agent]) -> Self {
        Self(agents.iter().map(Agent::summary_vector).collect())
    }

    pub fn rows(&self) -> &[SummaryRow] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Number of agents of each kind at one iteration.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Counts {
    pub fish: usize,
    pub pathogen: usize,
}

/// Reduce a record to per-iteration agent counts.
pub fn aggregate_counts(record: &[Snapshot]) -> Vec<Counts> {
    record
        .iter()
        .map(|snapshot| {
            let count = |kind: AgentKind| {
                snapshot
                    .rows()
                    .iter()
                    .filter(|row| row.kind_flag == kind.flag())
                    .count()
            };
            Counts {
                fish: count(AgentKind::Fish),
                pathogen: count(AgentKind::Pathogen),
            }
        })
        .collect()
}

/// Results of a single run.
#[derive(Debug, Serialize, Deserialize)]
pub struct RunResults {
    pub counts: Vec<Counts>,
    /// Iteration index and size of the largest pathogen population.
    pub peak_pathogen: Option<(usize, usize)>,
    pub tally: Tally,
}

/// Collects the trajectory of one run.
pub struct Analyzer {
    record: Vec<Snapshot>,
}

impl Analyzer {
    pub fn new() -> Self {
        Self { record: Vec::new() }
    }

    /// Append the record stored in a trajectory file.
    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let mut record: Vec<Snapshot> =
            decode::from_read(&mut reader).context("failed to deserialize record")?;
        self.record.append(&mut record);
        Ok(())
    }

    pub fn results(&self, tally: Tally) -> RunResults {
        let counts = aggregate_counts(&self.record);
        let peak_pathogen = counts
            .iter()
            .enumerate()
            .filter(|(_, c)| c.pathogen > 0)
            .max_by_key(|&(i_iter, c)| (c.pathogen, std::cmp::Reverse(i_iter)))
            .map(|(i_iter, c)| (i_iter, c.pathogen));
        RunResults {
            counts,
            peak_pathogen,
            tally,
        }
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P, tally: Tally) -> Result<RunResults> {
        let results = self.results(tally);
        write_msgpack(file, &results).context("failed to write results")?;
        Ok(results)
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary of the final tallies over all runs.
#[derive(Debug, Serialize, Deserialize)]
pub struct EnsembleReport {
    pub n_runs: usize,
    pub exposed: AccumulatorReport,
    pub infected: AccumulatorReport,
    pub dead_fish: AccumulatorReport,
}

/// Accumulates the final tallies of several runs.
pub struct Ensemble {
    n_runs: usize,
    exposed: Accumulator,
    infected: Accumulator,
    dead_fish: Accumulator,
}

impl Ensemble {
    pub fn new() -> Self {
        Self {
            n_runs: 0,
            exposed: Accumulator::new(),
            infected: Accumulator::new(),
            dead_fish: Accumulator::new(),
        }
    }

    pub fn add(&mut self, tally: &Tally) {
        self.n_runs += 1;
        self.exposed.add(tally.exposed as f64);
        self.infected.add(tally.infected as f64);
        self.dead_fish.add(tally.dead_fish as f64);
    }

    pub fn report(&self) -> EnsembleReport {
        EnsembleReport {
            n_runs: self.n_runs,
            exposed: self.exposed.report(),
            infected: self.infected.report(),
            dead_fish: self.dead_fish.report(),
        }
    }

    pub fn save_report<P: AsRef<Path>>(&self, file: P) -> Result<EnsembleReport> {
        let report = self.report();
        write_msgpack(file, &report).context("failed to write ensemble report")?;
        Ok(report)
    }
}

impl Default for Ensemble {
    fn default() -> Self {
        Self::new()
    }
}

fn write_msgpack<P: AsRef<Path>, T: Serialize>(file: P, value: &T) -> Result<()> {
    let file = file.as_ref();
    let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
    let mut writer = BufWriter::new(file);
    encode::write(&mut writer, value).context("failed to serialize value")?;
    writer.flush().context("failed to flush writer stream")?;
    Ok(())
}
