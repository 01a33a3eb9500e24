pub mod error;
pub mod config;
pub mod source;
pub mod synthetic;
pub mod context;
pub mod pipeline;
pub mod result;

// parallel execution and reduction
pub mod parallel {
    pub mod partition;
    pub mod partial;
    pub mod progress;
    pub mod spill;
    pub mod aggregator;
}

pub use config::ProcessingConfig;
pub use error::{ProcessingError, Result};
pub use parallel::aggregator::{run_parallel, run_sequential};
pub use result::RunResult;
pub use source::{InMemorySource, WaveformSource};
pub use synthetic::SyntheticSource;
