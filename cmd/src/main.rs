//! IPFIX collector daemon.
//!
//! Binds a TCP or UDP endpoint, decodes incoming IPFIX messages, and logs
//! them as they arrive. Stops cleanly on SIGINT.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use ipfix_collector::{BindAddress, CollectingProcess, Message, Set};
use tokio::sync::mpsc;
use tracing::{debug, info};

mod config;
mod logging;

use config::FileConfig;

/// IPFIX collecting process
#[derive(Parser, Debug)]
#[command(name = "ipfix-collectord", version, about = "IPFIX collecting process")]
struct Args {
    /// Listen endpoint, e.g. tcp://0.0.0.0:4739 or udp://0.0.0.0:4739
    #[arg(long)]
    listen: Option<BindAddress>,

    /// Largest acceptable message in bytes
    #[arg(long)]
    max_buffer_size: Option<usize>,

    /// Template lifetime for UDP exporters, e.g. 300s; 0s disables expiry
    #[arg(long)]
    template_ttl: Option<humantime::Duration>,

    /// Fail messages declaring unregistered elements instead of decoding
    /// them as opaque octets
    #[arg(long)]
    strict_elements: bool,

    /// Path to a YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log every decoded record's fields
    #[arg(long)]
    print_records: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logging::init(&args.log_level);

    let file = match &args.config {
        Some(path) => FileConfig::load(path),
        None => FileConfig::default(),
    };
    let collector_config = file.resolve(
        args.listen,
        args.max_buffer_size,
        args.template_ttl.map(|ttl| *ttl),
        args.strict_elements,
    )?;

    let registry = ipfix_registry::global();
    debug!("information element registry holds {} elements", registry.len());

    info!("starting ipfix collector on {}", collector_config.bind);
    let process = Arc::new(CollectingProcess::new(collector_config)?);
    let messages = process
        .message_channel()
        .context("message channel already taken")?;

    let consumer = tokio::spawn(consume(messages, args.print_records));

    let runner = process.clone();
    let server = tokio::spawn(async move { runner.start().await });

    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for SIGINT")?;
    info!("shutting down");

    process.stop().await;
    server.await??;
    consumer.await?;
    Ok(())
}

/// Drain the message channel until the process closes it.
async fn consume(mut messages: mpsc::Receiver<Message>, print_records: bool) {
    while let Some(message) = messages.recv().await {
        info!(
            "message: domain {} seq {} export time {}, {} sets, {} records",
            message.header.observation_domain_id,
            message.header.sequence_number,
            message.header.export_time,
            message.sets.len(),
            message.record_count(),
        );

        if print_records {
            for set in &message.sets {
                if let Set::Data {
                    template_id,
                    records,
                } = set
                {
                    for record in records {
                        for field in &record.fields {
                            info!(
                                "  [template {}] {} = {}",
                                template_id, field.element.name, field.value
                            );
                        }
                    }
                }
            }
        }
    }
    debug!("message channel closed");
}
