//! MCMC driver.
//!
//! Each iteration resamples every episode once, then rebuilds every
//! parameter block's sufficient statistics from the committed graph and
//! redraws the block. Rows are written only after burn-in.

use std::io::Write;

use chrono::{DateTime, Utc};
use ht_common::Result;
use ht_config::RunSettings;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span};

use crate::event::Event;
use crate::history::HistoryGraph;
use crate::logging::{event_names, generate_run_id, Stage};
use crate::model::{accumulate, log_likelihood, log_prior, Model};
use crate::output::TsvWriter;
use crate::random::RandomSource;
use crate::sampler::{Sampler, SweepSummary};

/// One finished iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct Iteration {
    /// Zero-based, burn-in included.
    pub index: u64,
    pub values: Vec<f64>,
    pub loglike: f64,
    /// `loglike` plus the parameter priors.
    pub logpost: f64,
    pub sweep: SweepSummary,
}

/// What a call to [`Runner::run`] did.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub iterations: u64,
    pub rows_written: u64,
    pub final_loglike: Option<f64>,
    pub final_logpost: Option<f64>,
}

pub struct Runner<M: Model> {
    graph: HistoryGraph,
    model: M,
    sampler: Sampler,
    settings: RunSettings,
    rng: StdRng,
    run_id: String,
    completed: u64,
}

impl<M: Model> Runner<M> {
    /// Driver over an already built graph, seeded from `settings.seed`.
    pub fn new(graph: HistoryGraph, model: M, settings: RunSettings) -> Self {
        Runner {
            sampler: Sampler::new(&settings),
            rng: StdRng::seed_from_u64(settings.seed),
            run_id: generate_run_id(),
            graph,
            model,
            settings,
            completed: 0,
        }
    }

    /// Build the history graph from sorted-or-not input events.
    pub fn build(events: Vec<Event>, model: M, settings: RunSettings) -> Result<Self> {
        let graph = HistoryGraph::build(events, &model)?;
        Ok(Runner::new(graph, model, settings))
    }

    pub fn graph(&self) -> &HistoryGraph {
        &self.graph
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Iterations completed so far, burn-in included.
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Column names of every parameter block in output order.
    pub fn header(&self) -> Vec<String> {
        self.model
            .parameters()
            .iter()
            .flat_map(|p| p.header())
            .collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.model
            .parameters()
            .iter()
            .flat_map(|p| p.values())
            .collect()
    }

    /// Writer for this run's parameter table.
    pub fn tsv<W: Write>(&self, out: W) -> Result<TsvWriter<W>> {
        TsvWriter::new(out, self.header())
    }

    /// One sweep, one round of parameter updates, one likelihood.
    pub fn step(&mut self) -> Result<Iteration> {
        let sweep = self
            .sampler
            .sweep(&mut self.graph, &self.model, &mut self.rng)?;

        let maximize = self.settings.max_mode;
        let rng: &mut dyn RandomSource = &mut self.rng;
        for block in self.model.parameters_mut() {
            accumulate(&self.graph, &mut *block);
            block.update(rng, maximize)?;
        }
        let loglike = log_likelihood(&self.graph, &self.model);
        let logpost = loglike + log_prior(&self.model);
        let values = self.values();
        debug!(
            event = event_names::PARAMETERS_UPDATED,
            stage = %Stage::Update,
            iteration = self.completed,
            loglike,
            logpost,
            committed = sweep.committed,
            "parameters updated"
        );

        let index = self.completed;
        self.completed += 1;
        Ok(Iteration {
            index,
            values,
            loglike,
            logpost,
            sweep,
        })
    }

    /// Run whatever burn-in remains, then `iterations` recorded iterations.
    pub fn run<W: Write>(&mut self, iterations: u32, out: &mut TsvWriter<W>) -> Result<RunReport> {
        let span = info_span!("run", run_id = %self.run_id);
        let _guard = span.enter();
        let started_at = Utc::now();
        let burn_in = u64::from(self.settings.burn_in).saturating_sub(self.completed);
        info!(
            event = event_names::RUN_STARTED,
            stage = %Stage::Sample,
            burn_in,
            iterations,
            episodes = self.graph.episodes().len(),
            maximize = self.settings.max_mode,
            "run started"
        );

        let mut rows = 0;
        let mut final_loglike = None;
        let mut final_logpost = None;
        let total = burn_in + u64::from(iterations);
        for i in 0..total {
            let it = self.step()?;
            final_loglike = Some(it.loglike);
            final_logpost = Some(it.logpost);
            if i < burn_in {
                continue;
            }
            out.write_row(&it.values, it.loglike)?;
            rows += 1;
            info!(
                event = event_names::ITERATION_WRITTEN,
                stage = %Stage::Output,
                iteration = it.index,
                loglike = it.loglike,
                logpost = it.logpost,
                jumps = it.sweep.jumps,
                "iteration written"
            );
        }
        out.flush()?;

        let report = RunReport {
            run_id: self.run_id.clone(),
            started_at,
            finished_at: Utc::now(),
            iterations: total,
            rows_written: rows,
            final_loglike,
            final_logpost,
        };
        info!(
            event = event_names::RUN_FINISHED,
            stage = %Stage::Output,
            rows,
            "run finished"
        );
        Ok(report)
    }

    /// [`Runner::run`] with the configured iteration count.
    pub fn run_configured<W: Write>(&mut self, out: &mut TsvWriter<W>) -> Result<RunReport> {
        self.run(self.settings.iterations, out)
    }

    pub fn into_parts(self) -> (HistoryGraph, M) {
        (self.graph, self.model)
    }
}
