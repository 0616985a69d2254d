use anyhow::Context;
use chrono::{Duration as ChronoDuration, Utc};
use cloudbench::{
    clap_args::{self, Commands},
    config::Config,
    launcher, provision::Ec2Provisioner, revisions::GitResolver, store::S3Store, StartOptions,
};
use colored::Colorize;
use std::{path::Path, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = clap_args::parse();
    let config = Config::try_from_path(&args.config)?;

    tracing::subscriber::set_global_default(
        tracing_subscriber::fmt()
            .with_max_level(config.log_level(args.verbose))
            .finish(),
    )
    .context("Failed to set global default subscriber")?;

    // a user interrupt exits the poll loop cleanly; nothing needs rolling back
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.cancel()).context("Failed to install ctrl-c handler")?;
    }

    match args.command {
        Commands::Start {
            profile,
            trials,
            revs,
            bench_script,
        } => {
            let launch = config.launch.resolve()?;
            let store = S3Store::from_env();
            let provisioner = Ec2Provisioner::from_env(launch.clone());

            let opts = StartOptions {
                profile,
                trials,
                rev_specs: &revs,
                bench_script: &bench_script,
                bucket: &config.store.bucket,
                owner: &launch.owner,
                expiry: Utc::now() + ChronoDuration::hours(launch.expiry_hours),
                driver_dir: Path::new(&config.launch.driver_dir),
            };
            let (bench_id, launched) =
                cloudbench::start(&store, &provisioner, &GitResolver, &opts).await?;
            info!("launched {} instances", launched.len());

            println!("{}", "Launched instances:".green());
            println!("{}", launcher::render_instance_table(&launched));
            println!("Launched cloud bench with id {}.", bench_id);
            println!("To wait for results, run: cloudbench check {}", bench_id);
        }

        Commands::Check { bench_id } => {
            let store = S3Store::from_env();
            cloudbench::check(
                &store,
                &config.store.bucket,
                &bench_id,
                Duration::from_secs(config.settings.poll_interval_secs),
                &cancel,
                std::io::stdout().lock(),
            )
            .await?;
        }
    }

    Ok(())
}
