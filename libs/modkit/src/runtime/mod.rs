mod runner;

pub use runner::{run, DbOptions, HttpOptions, RunOptions, ShutdownOptions};
