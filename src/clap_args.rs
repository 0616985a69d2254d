use crate::launch_plan::Profile;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Verbose mode (-v, --verbose)
    #[arg(short, long)]
    pub verbose: bool,

    /// Path to the settings file
    #[arg(short, long, default_value = "cloudbench.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Launch a benchmark fleet and print its bench id
    Start {
        /// Predefined set of machines to use in each cluster
        #[arg(long, value_enum)]
        profile: Profile,

        /// The number of trials to run per git rev
        #[arg(short = 'n', long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        trials: u32,

        /// Comma-separated list of git revs to benchmark
        #[arg(long, default_value = "HEAD", value_delimiter = ',')]
        revs: Vec<String>,

        /// Benchmark entry module (and optional arguments)
        #[arg(trailing_var_arg = true, required = true)]
        bench_script: Vec<String>,
    },

    /// Wait for a benchmark run to finish and print the merged results
    Check {
        /// Bench id printed by `start`
        bench_id: String,
    },
}

pub fn parse() -> Args {
    Args::parse()
}
