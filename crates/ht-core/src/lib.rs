//! Hospital transmission inference core.
//!
//! This library provides:
//! - Event records, input parsing and entity registries
//! - Per-scope state that absorbs and reverts event effects
//! - The event-history graph and episode splicing
//! - A CTMC forward-backward engine for endpoint-conditioned paths
//! - The episode sampler, a reference model and the MCMC runner
//! - Forward simulation and event dumps

pub mod entity;
pub mod episode;
pub mod event;
pub mod history;
pub mod logging;
pub mod markov;
pub mod model;
pub mod output;
pub mod parse;
pub mod random;
pub mod runner;
pub mod sampler;
pub mod simulate;
pub mod state;

pub use episode::{Episode, EpisodeId};
pub use event::{Event, EventType, TestKind};
pub use history::{Chain, HistoryGraph, LinkId, Scope};
pub use markov::{Checkpoint, Markov, MarkovError, Path};
pub use model::{BasicModel, Model, Neighborhood, Parameters};
pub use parse::{parse_events, parse_str, Diagnostic, ParseOutput};
pub use random::RandomSource;
pub use runner::{RunReport, Runner};
pub use sampler::Sampler;
pub use simulate::{simulate, Simulation};
