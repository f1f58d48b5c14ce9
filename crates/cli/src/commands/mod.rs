// CLI subcommands

pub mod activity;
pub mod jobs;
