use clap::{Parser, Subcommand};
use flowgate::assets::HttpAssetStore;
use flowgate::config::{load_config_from_yaml, ClientConfig};
use flowgate::coordinator::Coordinator;
use flowgate::events::{EventHub, EventKind, RedisEventSource};
use flowgate::queue::{HttpQueueClient, QueueApi};
use flowgate::workflow::{download_outputs, Workflow};
use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{anyhow, bail, Context, Result};
use futures::StreamExt;
use serde_json::json;
use tracing::{error, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML client config
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Service base URL (overrides the config file)
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[arg(long, global = true)]
    queue_id: Option<String>,

    /// Redis relay carrying queue events
    #[arg(long, global = true)]
    redis: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the inputs a workflow exposes, in index order
    Inspect {
        file: PathBuf,
    },

    /// Submit a workflow, wait for it and print its outputs
    Run {
        file: PathBuf,

        /// Input assignments (index=json or label=json)
        #[arg(long = "set", short = 's', value_parser = parse_key_val)]
        sets: Vec<(String, serde_json::Value)>,

        #[arg(long, default_value_t = 1)]
        runs: u32,

        /// Follow progress through the event relay instead of polling
        #[arg(long)]
        watch: bool,

        /// Give up waiting after this many seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Download the produced images into this directory
        #[arg(long)]
        download: Option<PathBuf>,
    },

    /// Cancel a queue item
    Cancel {
        item_id: i64,
    },
}

fn parse_key_val(s: &str) -> Result<(String, serde_json::Value), String> {
    let pos = s.find('=').ok_or_else(|| format!("invalid KEY=value: no `=` found in `{}`", s))?;
    let key = s[..pos].to_string();
    let val_str = &s[pos + 1..];
    // Not JSON: take it as a plain string
    let val = serde_json::from_str(val_str).unwrap_or_else(|_| serde_json::Value::String(val_str.to_string()));
    Ok((key, val))
}

fn resolve_config(cli: &Cli) -> Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_from_yaml(path)?,
        None => ClientConfig::default(),
    };
    if let Some(url) = &cli.base_url {
        config = config.with_base_url(url.clone());
    }
    if let Some(queue_id) = &cli.queue_id {
        config = config.with_queue_id(queue_id.clone());
    }
    if let Some(redis) = &cli.redis {
        config = config.with_redis_url(redis.clone());
    }
    Ok(config)
}

fn inspect(file: &PathBuf) -> Result<()> {
    let workflow = Workflow::from_file(file)
        .with_context(|| format!("Failed to load workflow from {}", file.display()))?;
    for input in workflow.inputs.iter() {
        println!(
            "[{}] {} ({}.{}) {:?} = {}",
            input.input_index,
            input.label,
            input.node_label,
            input.field_name,
            input.kind(),
            input.field().value()
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    match cli.command {
        Commands::Inspect { file } => inspect(&file)?,
        Commands::Run { file, sets, runs, watch, timeout, download } => {
            let mut workflow = Workflow::from_file(&file)
                .with_context(|| format!("Failed to load workflow from {}", file.display()))?;

            for (key, value) in sets {
                let index = match key.parse::<usize>() {
                    Ok(index) => index,
                    Err(_) => workflow.inputs.find(&key)?,
                };
                workflow
                    .inputs
                    .set_value(index, value)
                    .with_context(|| format!("Failed to set input '{}'", key))?;
            }

            let problems = workflow.inputs.validate_all();
            if !problems.is_empty() {
                for problem in &problems {
                    error!("{}", problem);
                }
                bail!("{} validation error(s), not submitting", problems.len());
            }

            let queue: Arc<dyn QueueApi> = Arc::new(HttpQueueClient::new(config.clone())?);
            let mut coordinator = Coordinator::new(queue, &config);
            if watch {
                let url = config
                    .redis_url
                    .as_deref()
                    .ok_or_else(|| anyhow!("--watch needs a Redis event relay (--redis)"))?;
                let source = RedisEventSource::open(url, config.event_channel_prefix.clone())?;
                coordinator = coordinator.with_events(EventHub::start(Arc::new(source)));
            }

            let job = coordinator.submit(workflow.document(), &workflow.inputs, runs).await?;
            info!("Batch {} enqueued, items {:?}", job.batch_id, job.item_ids);

            if watch {
                let mut events = coordinator.events(&job).await?;
                while let Some(event) = events.next().await {
                    match event.kind {
                        EventKind::Started => info!("Started {}", event.node_id.as_deref().unwrap_or("?")),
                        EventKind::Complete => info!("Completed {}", event.node_id.as_deref().unwrap_or("?")),
                        EventKind::Error => error!("Node {} failed: {}", event.node_id.as_deref().unwrap_or("?"), event.data),
                        EventKind::StatusChanged => info!("Item {:?} is now {:?}", event.item_id, event.status),
                        EventKind::Progress => {}
                    }
                }
            } else {
                let limit = timeout.map(std::time::Duration::from_secs).or(config.wait_timeout());
                let outcome = coordinator.wait_with_timeout(&job, limit).await?;
                info!("Job {} after {:?}", outcome.status, outcome.elapsed);
            }

            let correlated = coordinator.correlate(&job).await?;
            let store = HttpAssetStore::new(config.clone())?;
            for item in &correlated {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "item_id": item.item.item_id,
                        "status": item.item.status,
                        "error": item.item.error_message,
                        "outputs": item.outputs,
                    }))?
                );
                if let Some(dir) = &download {
                    let written = download_outputs(&store, &item.outputs, dir).await?;
                    info!("Downloaded {} file(s) to {}", written.len(), dir.display());
                }
            }
        }
        Commands::Cancel { item_id } => {
            let queue = HttpQueueClient::new(config)?;
            let item = queue.cancel_queue_item(item_id).await?;
            println!("Item {} is {}", item.item_id, item.status);
        }
    }

    Ok(())
}
