use std::io::Read;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use kala_jobs_client::JobId;
use kala_jobs_client::JobsClient;
use serde_json::Value;

/// Manage jobs on the scheduler.
///
/// `enable`, `disable`, `run` and `delete` are fire-and-forget: they report
/// failures in the log only and always exit successfully.
#[derive(Debug, clap::Parser)]
pub struct JobsCli {
    #[command(subcommand)]
    pub subcommand: JobsSubcommand,
}

#[derive(Debug, clap::Subcommand)]
pub enum JobsSubcommand {
    /// List every job.
    List(ListArgs),

    /// Show one job as JSON.
    Get(JobArgs),

    /// Create a job from a JSON definition and print its id.
    Create(CreateArgs),

    /// Enable a job.
    Enable(JobArgs),

    /// Disable a job.
    Disable(JobArgs),

    /// Start a job now.
    Run(JobArgs),

    /// Delete a job.
    Delete(JobArgs),

    /// Print the scheduler's run statistics for a job.
    Stats(JobArgs),
}

#[derive(Debug, clap::Parser)]
pub struct ListArgs {
    /// Output the listing as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, clap::Parser)]
pub struct JobArgs {
    /// Job id.
    pub id: JobId,
}

#[derive(Debug, clap::Parser)]
pub struct CreateArgs {
    /// File holding the job definition, or `-` for stdin.
    #[arg(value_name = "FILE")]
    pub definition: PathBuf,
}

impl JobsCli {
    pub async fn run(self, client: &JobsClient) -> Result<()> {
        match self.subcommand {
            JobsSubcommand::List(args) => run_list(client, args).await?,
            JobsSubcommand::Get(JobArgs { id }) => {
                let job = client.get_job(&id).await?;
                println!("{}", serde_json::to_string_pretty(&job)?);
            }
            JobsSubcommand::Create(args) => {
                let definition = read_definition(&args.definition)?;
                let id = client.create_job(&definition).await?;
                println!("{id}");
            }
            JobsSubcommand::Enable(JobArgs { id }) => client.enable_job(&id).await,
            JobsSubcommand::Disable(JobArgs { id }) => client.disable_job(&id).await,
            JobsSubcommand::Run(JobArgs { id }) => client.run_job(&id).await,
            JobsSubcommand::Delete(JobArgs { id }) => client.delete_job(&id).await,
            JobsSubcommand::Stats(JobArgs { id }) => {
                let response = client
                    .job_stats(&id)
                    .await
                    .ok_or_else(|| anyhow!("failed to fetch stats for job {id}"))?;
                let body = response.text().await?;
                println!("{body}");
            }
        }
        Ok(())
    }
}

async fn run_list(client: &JobsClient, args: ListArgs) -> Result<()> {
    let listing = client
        .list_jobs()
        .await
        .ok_or_else(|| anyhow!("failed to list jobs"))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    if listing.jobs.is_empty() {
        println!("No jobs.");
        return Ok(());
    }
    for (id, job) in &listing.jobs {
        let state = if job.disabled { "disabled" } else { "enabled" };
        println!("{id}\t{state}\t{}\t{}", job.schedule, job.name);
    }
    Ok(())
}

fn read_definition(path: &Path) -> Result<Value> {
    let contents = if path.as_os_str() == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read job definition from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?
    };
    serde_json::from_str(&contents).context("job definition is not valid JSON")
}
