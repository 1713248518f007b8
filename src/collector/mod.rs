pub mod runner;

pub use runner::{
    Collector, CollectorSettings, RunSummary, WindowError, WindowFailure, WindowOutcome,
};
