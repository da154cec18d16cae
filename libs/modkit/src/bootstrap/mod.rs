//! Bootstrap entrypoint for running the engine from a specification file.

pub mod run;

pub use run::{
    BootstrapError, DatabaseSpec, HttpSpec, ModuleSpec, RunOverrides, SpecDocument, format_issues, load_spec,
    run_server, validate_spec,
};
