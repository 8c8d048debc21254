use anyhow::Context;
use clap::Parser;
use trending_etl::config::JobConfig;
use trending_etl::job::{Job, JobServices};
use trending_etl::logging;

#[derive(Parser, Debug)]
#[command(
    name = "trending-etl",
    version,
    about = "Cleanse raw video-trending statistics into region-partitioned Parquet"
)]
struct Cli {
    /// Job name; also names the bookmark file
    #[arg(long = "JOB_NAME", value_name = "NAME")]
    job_name: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = JobConfig::load(None).context("load configuration")?;
    logging::init(&config.log_level, config.log_format);

    let services = JobServices::local(&config).context("set up job services")?;
    let summary = Job::execute(&cli.job_name, config, services)
        .with_context(|| format!("job {} failed", cli.job_name))?;

    tracing::info!(
        run_id = %summary.run_id,
        files = summary.sink.files.len(),
        rows = summary.sink.rows_written,
        "done"
    );
    Ok(())
}
