// Activity feed commands

use crate::output::{
    format_time, print_field, print_mode, print_table_header, print_table_row, OutputFormat,
};
use anyhow::Result;
use clap::{Args, Subcommand};
use pressluft_stream::{
    Activity, ActivityFeed, ActivityFilter, ActivityStreamOptions, ApiClient, ClientConfig,
    PageRequest,
};
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Subcommand)]
pub enum ActivityCommand {
    /// List one page of activity, newest first
    List {
        #[command(flatten)]
        filter: FilterArgs,

        /// Only activity of this server
        #[arg(long, conflicts_with = "category")]
        server: Option<i64>,

        /// Page size
        #[arg(long, short, default_value = "25")]
        limit: u32,

        /// Continue after this cursor
        #[arg(long)]
        cursor: Option<String>,
    },

    /// Follow new activity as it happens
    Watch {
        #[command(flatten)]
        filter: FilterArgs,

        /// Resume after this activity id instead of starting from now
        #[arg(long)]
        since_id: Option<i64>,

        /// Exit after this many records
        #[arg(long, short)]
        count: Option<usize>,
    },

    /// Mark one activity as read
    MarkRead {
        /// Activity ID
        id: i64,
    },

    /// Mark every matching activity as read
    MarkAllRead {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Show the number of unread activities
    Unread {
        #[command(flatten)]
        filter: FilterArgs,
    },
}

#[derive(Args, Clone, Default)]
pub struct FilterArgs {
    /// Category (e.g. deployment, backup)
    #[arg(long)]
    category: Option<String>,

    /// Resource type, combined with --resource-id
    #[arg(long, requires = "resource_id")]
    resource_type: Option<String>,

    /// Resource id, combined with --resource-type
    #[arg(long, requires = "resource_type")]
    resource_id: Option<i64>,

    /// Only records that require attention
    #[arg(long)]
    attention: bool,

    /// Only unread records
    #[arg(long)]
    unread: bool,
}

impl FilterArgs {
    fn to_filter(&self) -> ActivityFilter {
        let mut filter = ActivityFilter::new();
        if let Some(category) = &self.category {
            filter = filter.with_category(category.as_str());
        }
        if let (Some(resource_type), Some(resource_id)) = (&self.resource_type, self.resource_id) {
            filter = filter.with_resource(resource_type.as_str(), resource_id);
        }
        if self.attention {
            filter = filter.with_requires_attention(true);
        }
        if self.unread {
            filter = filter.unread_only();
        }
        filter
    }
}

#[derive(Serialize)]
struct UnreadOutput {
    count: u64,
}

pub async fn run(
    command: ActivityCommand,
    client: ApiClient,
    config: &ClientConfig,
    output: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let feed = ActivityFeed::new(client, config);

    match command {
        ActivityCommand::List {
            filter,
            server,
            limit,
            cursor,
        } => list(&feed, output, filter.to_filter(), server, limit, cursor).await,
        ActivityCommand::Watch {
            filter,
            since_id,
            count,
        } => watch(&feed, output, quiet, filter.to_filter(), since_id, count).await,
        ActivityCommand::MarkRead { id } => mark_read(&feed, output, quiet, id).await,
        ActivityCommand::MarkAllRead { filter } => {
            mark_all_read(&feed, output, quiet, filter.to_filter()).await
        }
        ActivityCommand::Unread { filter } => unread(&feed, output, filter.to_filter()).await,
    }
}

async fn list(
    feed: &ActivityFeed,
    output: OutputFormat,
    filter: ActivityFilter,
    server: Option<i64>,
    limit: u32,
    cursor: Option<String>,
) -> Result<()> {
    let request = match cursor {
        Some(cursor) => PageRequest::after(cursor),
        None => PageRequest::first(),
    }
    .with_limit(limit);

    let page = match server {
        Some(server_id) => feed.list_server(server_id, &request).await?,
        None => feed.list(&filter, &request).await?,
    };

    if !output.is_text() {
        return output.print_value(&page);
    }

    if page.data.is_empty() {
        println!("No activity found");
        return Ok(());
    }

    print_activity_header();
    for activity in &page.data {
        print_activity_row(activity);
    }
    if let Some(cursor) = page.cursor() {
        println!();
        println!("More available: --cursor {}", cursor);
    }

    Ok(())
}

async fn watch(
    feed: &ActivityFeed,
    output: OutputFormat,
    quiet: bool,
    filter: ActivityFilter,
    since_id: Option<i64>,
    count: Option<usize>,
) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Activity>();

    let mut options = ActivityStreamOptions::new()
        .filter(move |activity| filter.matches(activity))
        .on_event(move |activity| {
            let _ = tx.send(activity.clone());
        });
    if let Some(since_id) = since_id {
        options = options.since_id(since_id);
    }
    if !quiet {
        options = options.on_mode(print_mode);
    }

    let session = feed.stream(options);

    if output.is_text() {
        if !quiet {
            eprintln!("Watching activity (Ctrl+C to stop)...");
        }
        print_activity_header();
    }

    let mut seen = 0;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            received = rx.recv() => {
                let Some(activity) = received else { break };
                if output.is_text() {
                    print_activity_row(&activity);
                } else {
                    output.print_event(&activity)?;
                }
                seen += 1;
                if count.is_some_and(|limit| seen >= limit) {
                    break;
                }
            }
        }
    }

    session.dispose();
    Ok(())
}

async fn mark_read(feed: &ActivityFeed, output: OutputFormat, quiet: bool, id: i64) -> Result<()> {
    let activity = feed.mark_read(id).await?;

    if !output.is_text() {
        return output.print_value(&activity);
    }
    if quiet {
        println!("{}", activity.id);
        return Ok(());
    }

    println!("Marked activity {} as read", activity.id);
    print_field("Title", &activity.title);
    if let Some(read_at) = &activity.read_at {
        print_field("Read", &format_time(read_at));
    }
    Ok(())
}

async fn mark_all_read(
    feed: &ActivityFeed,
    output: OutputFormat,
    quiet: bool,
    filter: ActivityFilter,
) -> Result<()> {
    feed.mark_all_read(&filter).await?;
    let count = feed.unread_count();

    if !output.is_text() {
        return output.print_value(&UnreadOutput { count });
    }
    if !quiet {
        println!("Marked all matching activity as read ({} unread left)", count);
    }
    Ok(())
}

async fn unread(feed: &ActivityFeed, output: OutputFormat, filter: ActivityFilter) -> Result<()> {
    let count = feed.fetch_unread_count(&filter).await?;

    if output.is_text() {
        println!("{}", count);
        Ok(())
    } else {
        output.print_value(&UnreadOutput { count })
    }
}

fn print_activity_header() {
    print_table_header(&[
        ("ID", 8),
        ("CREATED", 19),
        ("LEVEL", 8),
        ("CATEGORY", 12),
        ("TITLE", 40),
    ]);
}

fn print_activity_row(activity: &Activity) {
    let marker = if activity.requires_attention { "!" } else { "" };
    let title = format!("{}{}", marker, activity.title);
    print_table_row(&[
        (&activity.id.to_string(), 8),
        (&format_time(&activity.created_at), 19),
        (&activity.level.to_string(), 8),
        (&activity.category, 12),
        (&title, 40),
    ]);
}
