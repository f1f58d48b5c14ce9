// Background job commands

use std::time::Duration;

use crate::output::{
    format_time, print_field, print_mode, print_table_header, print_table_row, OutputFormat,
};
use anyhow::{Context, Result};
use clap::Subcommand;
use pressluft_stream::{
    ApiClient, ClientConfig, CreateJobRequest, Job, JobEvent, JobStatus, JobWatchOptions,
    JobWatcher,
};
use tokio::sync::mpsc;

/// Polled progress events are numbered with millisecond timestamps
const SEQ_WIDTH: usize = 13;

#[derive(Subcommand)]
pub enum JobsCommand {
    /// Enqueue a new job
    Create {
        /// Job kind (e.g. backup, deploy_site)
        #[arg(long, short)]
        kind: String,

        /// Target server
        #[arg(long, short)]
        server: Option<i64>,

        /// Watch the job until it finishes
        #[arg(long, short)]
        watch: bool,

        /// Max wait time in seconds when watching
        #[arg(long, default_value = "600")]
        timeout: u64,
    },

    /// Show the current job snapshot
    Get {
        /// Job ID
        id: i64,
    },

    /// Follow a job's progress until it finishes
    Watch {
        /// Job ID
        id: i64,

        /// Resume after this event sequence
        #[arg(long)]
        since_seq: Option<i64>,

        /// Max wait time in seconds
        #[arg(long, default_value = "600")]
        timeout: u64,
    },

    /// Print the recorded events of a job
    History {
        /// Job ID
        id: i64,
    },
}

pub async fn run(
    command: JobsCommand,
    client: ApiClient,
    config: &ClientConfig,
    output: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let watcher = JobWatcher::new(client, config);

    match command {
        JobsCommand::Create {
            kind,
            server,
            watch: follow,
            timeout,
        } => {
            let request = CreateJobRequest {
                kind: Some(kind),
                server_id: server,
            };
            let job = watcher.create_job(&request).await?;
            if follow {
                if output.is_text() && !quiet {
                    println!("Created job: {}", job.id);
                }
                watch(&watcher, output, quiet, job.id, None, timeout).await
            } else {
                print_job(output, quiet, &job)
            }
        }
        JobsCommand::Get { id } => {
            let job = watcher
                .fetch_job(id)
                .await
                .with_context(|| format!("Failed to load job {}", id))?;
            print_job(output, quiet, &job)
        }
        JobsCommand::Watch {
            id,
            since_seq,
            timeout,
        } => watch(&watcher, output, quiet, id, since_seq, timeout).await,
        JobsCommand::History { id } => history(&watcher, output, id).await,
    }
}

async fn watch(
    watcher: &JobWatcher,
    output: OutputFormat,
    quiet: bool,
    job_id: i64,
    since_seq: Option<i64>,
    timeout_secs: u64,
) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<JobEvent>();

    let mut options = JobWatchOptions::new().on_event(move |event| {
        let _ = tx.send(event.clone());
    });
    if let Some(since_seq) = since_seq {
        options = options.since_seq(since_seq);
    }
    if !quiet {
        options = options.on_mode(print_mode);
    }

    let session = watcher.watch(job_id, options);
    if output.is_text() {
        print_event_header();
    }
    let deadline = tokio::time::sleep(Duration::from_secs(timeout_secs));
    tokio::pin!(deadline);

    let mut timed_out = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = &mut deadline => {
                timed_out = true;
                break;
            }
            _ = session.disconnected() => break,
            Some(event) = rx.recv() => print_event(output, &event)?,
        }
    }
    session.dispose();

    // Events delivered just before the session closed
    while let Ok(event) = rx.try_recv() {
        print_event(output, &event)?;
    }

    if timed_out {
        anyhow::bail!("Timeout waiting for job {} to finish", job_id);
    }

    let job = match watcher.active_job().filter(|job| job.id == job_id) {
        Some(job) => job,
        None => watcher.fetch_job(job_id).await?,
    };
    if output.is_text() && !quiet {
        println!();
        println!("Job {} {}", job.id, job.status);
        if let Some(error) = &job.last_error {
            print_field("Error", error);
        }
    }

    match job.status {
        JobStatus::Failed | JobStatus::Cancelled | JobStatus::TimedOut => {
            anyhow::bail!("Job {} ended with status {}", job.id, job.status)
        }
        _ => Ok(()),
    }
}

async fn history(watcher: &JobWatcher, output: OutputFormat, job_id: i64) -> Result<()> {
    let events = watcher.load_history(job_id).await?;

    if !output.is_text() {
        return output.print_value(&events);
    }

    if events.is_empty() {
        println!("No events recorded for job {}", job_id);
        return Ok(());
    }
    print_event_header();
    for event in &events {
        print_event(output, event)?;
    }
    Ok(())
}

fn print_job(output: OutputFormat, quiet: bool, job: &Job) -> Result<()> {
    if !output.is_text() {
        return output.print_value(job);
    }
    if quiet {
        println!("{}", job.id);
        return Ok(());
    }

    print_field("ID", &job.id.to_string());
    print_field("Kind", &job.kind);
    print_field("Status", &job.status.to_string());
    if let Some(server_id) = job.server_id {
        print_field("Server", &server_id.to_string());
    }
    if !job.current_step.is_empty() {
        print_field("Step", &job.current_step);
    }
    if job.retry_count > 0 {
        print_field("Retries", &job.retry_count.to_string());
    }
    if let Some(error) = &job.last_error {
        print_field("Error", error);
    }
    print_field("Created", &format_time(&job.created_at));
    print_field("Updated", &format_time(&job.updated_at));
    Ok(())
}

fn print_event(output: OutputFormat, event: &JobEvent) -> Result<()> {
    if !output.is_text() {
        return output.print_event(event);
    }

    let step = event.step_key.as_deref().unwrap_or("-");
    print_table_row(&[
        (&event.seq.to_string(), SEQ_WIDTH),
        (&format_time(&event.occurred_at), 19),
        (&event.level.to_string(), 8),
        (step, 20),
        (&event.message, 60),
    ]);
    Ok(())
}

fn print_event_header() {
    print_table_header(&[
        ("SEQ", SEQ_WIDTH),
        ("TIME", 19),
        ("LEVEL", 8),
        ("STEP", 20),
        ("MESSAGE", 60),
    ]);
}
