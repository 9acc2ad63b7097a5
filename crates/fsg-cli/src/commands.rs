use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use colored::Colorize;
use fsg_dag::DirEntry;
use fsg_node::{ExperimentalFeatures, Node, NodeConfig, ShutdownHandle};
use fsg_routing::RoutingMode;
use fsg_types::{parse_cid_path, Cid, IdentityCredential};
use indicatif::{HumanBytes, ProgressBar};
use serde_json::json;

use crate::cli::{Cli, OutputFormat};

const USAGE: &str = "Use -f <path> to share a file or directory, or -c <cid> to download one:\n  fsg -f example.jpg\n  fsg -c <cid>";

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    match (&cli.file, &cli.cid) {
        (Some(path), _) => cmd_publish(&cli, path).await,
        (None, Some(cid)) => cmd_fetch(&cli, cid).await,
        (None, None) => {
            println!("{USAGE}");
            Ok(())
        }
    }
}

fn node_config(cli: &Cli) -> anyhow::Result<NodeConfig> {
    let mut config = match &cli.config {
        Some(path) => NodeConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => NodeConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen = listen;
    } else if cli.config.is_none() && cli.cid.is_some() {
        // a fetch-only node needs no fixed port
        config.listen.set_port(0);
    }
    config.bootstrap.extend(cli.peers.iter().copied());
    if cli.experimental {
        config.experimental = ExperimentalFeatures::all();
    }
    if cli.dht_client {
        config.router.mode = RoutingMode::Client;
    }
    Ok(config)
}

async fn start_node(cli: &Cli) -> anyhow::Result<Node> {
    let config = node_config(cli)?;
    if cli.format == OutputFormat::Text {
        println!("-- Getting an fsg node running --");
    }
    let node = Node::spawn(config, IdentityCredential::generate())
        .await
        .context("starting node")?;
    if cli.format == OutputFormat::Text {
        println!(
            "Node {} is running on {}",
            node.info().id.to_string().cyan(),
            node.info().addr.to_string().bold()
        );
    }
    Ok(node)
}

fn entry_label(entry: &DirEntry, root: &Cid) -> String {
    if entry.name.is_empty() {
        root.to_string()
    } else {
        entry.name.clone()
    }
}

fn print_entries(entries: &[DirEntry], root: &Cid) {
    for (i, entry) in entries.iter().enumerate() {
        println!("{} file name: {}", i + 1, entry_label(entry, root));
    }
}

fn entries_json(entries: &[DirEntry], root: &Cid) -> serde_json::Value {
    entries
        .iter()
        .map(|e| json!({ "name": entry_label(e, root), "cid": e.cid.to_string(), "size": e.size }))
        .collect()
}

async fn cmd_publish(cli: &Cli, path: &Path) -> anyhow::Result<()> {
    let node = start_node(cli).await?;
    let published = node
        .publish(path, cli.wrap)
        .await
        .with_context(|| format!("publishing {}", path.display()));
    let report = match published {
        Ok(report) => report,
        Err(e) => {
            node.shutdown().await;
            return Err(e);
        }
    };
    let entries = node.list(&report.root).unwrap_or_default();

    match cli.format {
        OutputFormat::Text => {
            println!("Added file. Now share this CID with your friend:");
            println!("{}", report.root.to_string().yellow().bold());
            print_entries(&entries, &report.root);
            println!("Seeding size: {}", HumanBytes(report.size));
            println!("{}", "Seeding until interrupted (Ctrl+C)".dimmed());
        }
        OutputFormat::Json => {
            let out = json!({
                "cid": report.root.to_string(),
                "size": report.size,
                "blocks": report.blocks,
                "peer": node.info().id.to_hex(),
                "addr": node.info().addr.to_string(),
                "entries": entries_json(&entries, &report.root),
            });
            println!("{out}");
        }
    }

    let waited = wait_for_signal(node.shutdown_handle()).await;
    node.shutdown().await;
    waited?;
    if cli.format == OutputFormat::Text {
        println!("\nAdios!");
    }
    Ok(())
}

async fn cmd_fetch(cli: &Cli, input: &str) -> anyhow::Result<()> {
    let cid = parse_cid_path(input).with_context(|| format!("invalid CID {input:?}"))?;
    let node = start_node(cli).await?;
    if cli.format == OutputFormat::Text {
        println!("Fetching a file from the network with CID {}", cid.to_string().yellow());
    }

    let spinner = (cli.format == OutputFormat::Text).then(|| {
        let bar = ProgressBar::new_spinner();
        bar.set_message("resolving blocks");
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    });
    let deadline = Duration::from_secs(cli.timeout);
    let fetched = tokio::select! {
        result = node.fetch_to(cid, &cli.output_dir, deadline) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };
    if let Some(bar) = spinner {
        bar.finish_and_clear();
    }

    let outcome = match fetched {
        Some(Ok(dest)) => {
            let entries = node.list(&cid).unwrap_or_default();
            match cli.format {
                OutputFormat::Text => {
                    print_entries(&entries, &cid);
                    println!("Wrote the files to {}", dest.display().to_string().green());
                }
                OutputFormat::Json => {
                    let out = json!({
                        "cid": cid.to_string(),
                        "path": dest.display().to_string(),
                        "entries": entries_json(&entries, &cid),
                    });
                    println!("{out}");
                }
            }
            Ok(())
        }
        Some(Err(e)) => Err(anyhow::Error::new(e).context(format!("fetching {cid}"))),
        None => Err(anyhow::anyhow!("fetching {cid}: interrupted")),
    };
    node.shutdown().await;
    outcome
}

async fn wait_for_signal(handle: ShutdownHandle) -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("waiting for Ctrl+C")?,
            _ = terminate.recv() => tracing::info!("SIGTERM received"),
            _ = handle.wait() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("waiting for Ctrl+C")?,
            _ = handle.wait() => {}
        }
    }
    Ok(())
}
