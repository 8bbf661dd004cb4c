pub mod env;
pub mod tracing_init;

pub use env::{
    parse_var_or, AppConfig, SchedulerConfig, MAX_BACKFILL_DAYS, MAX_OVERLAP_MINUTES,
    MAX_RUN_INTERVAL_SECS,
};
pub use tracing_init::init_tracing;
