// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! `loom-ff` operator binary.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use loom_ff_core::{EvaluationContext, FlagSnapshot};
use loom_ff_runtime::{FlagRuntime, DEFAULT_ROLLOUT_STEP};
use loom_ff_store::{read_snapshot_file, write_snapshot_file};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Loom feature flag runtime operator tool.
#[derive(Parser, Debug)]
#[command(name = "loom-ff", about = "Inspect and operate Loom feature flags", version)]
struct Args {
	/// TOML config file; defaults to /etc/loom/ff.toml when present.
	#[arg(long, global = true, env = "LOOM_FF_CONFIG")]
	config: Option<PathBuf>,

	/// Recorded as the actor on audited mutations.
	#[arg(long, global = true)]
	actor: Option<String>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Evaluate one flag for a context
	Eval {
		key: String,
		#[arg(long, default_value = "anon")]
		stable_id: String,
		#[arg(long)]
		user: Option<String>,
		#[arg(long)]
		namespace: Option<String>,
		#[arg(long = "tag")]
		tags: Vec<String>,
	},
	/// Export or restore the whole store
	Snapshot {
		#[command(subcommand)]
		command: SnapshotCommand,
	},
	/// Staged rollout operations
	Rollout {
		#[command(subcommand)]
		command: RolloutCommand,
	},
	/// Self-hosted metrics
	Metrics {
		#[command(subcommand)]
		command: MetricsCommand,
	},
}

#[derive(Subcommand, Debug)]
enum SnapshotCommand {
	/// Write the snapshot to a file, or print it with its id
	Export {
		#[arg(long)]
		out: Option<PathBuf>,
	},
	/// Replace the store with a snapshot file
	Restore { file: PathBuf },
}

#[derive(Subcommand, Debug)]
enum RolloutCommand {
	/// Move a flag's rollout percent
	Step {
		key: String,
		#[arg(long, default_value_t = DEFAULT_ROLLOUT_STEP, allow_negative_numbers = true)]
		step: i32,
	},
}

#[derive(Subcommand, Debug)]
enum MetricsCommand {
	/// Summaries per snapshot id
	Summary {
		#[arg(long)]
		snapshot: Option<String>,
	},
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	let config = match &args.config {
		Some(path) => loom_ff_config::load_config_with_file(path),
		None => loom_ff_config::load_config(),
	}
	.context("loading flag runtime configuration")?;

	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| config.logging.level.clone().into()),
		)
		.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
		.init();

	let runtime = FlagRuntime::from_config(config).await?;
	let actor = args.actor.as_deref();

	match args.command {
		Command::Eval {
			key,
			stable_id,
			user,
			namespace,
			tags,
		} => {
			let mut ctx = EvaluationContext::new(stable_id).with_tags(tags);
			if let Some(user) = user {
				ctx = ctx.with_user(user);
			}
			if let Some(namespace) = namespace {
				ctx = ctx.with_namespace(namespace);
			}
			match runtime.evaluate(&key, &ctx, None).await {
				Some(result) => println!("{}", serde_json::to_string_pretty(&result)?),
				None => anyhow::bail!("flag {key} is missing or disabled"),
			}
		}
		Command::Snapshot { command } => match command {
			SnapshotCommand::Export { out: Some(path) } => {
				let snapshot = runtime.snapshot().await?;
				write_snapshot_file(&path, &snapshot.data).await?;
				println!("{}", snapshot.id);
			}
			SnapshotCommand::Export { out: None } => {
				let snapshot = runtime.snapshot().await?;
				println!("{}", serde_json::to_string_pretty(&snapshot)?);
			}
			SnapshotCommand::Restore { file } => {
				let snapshot: FlagSnapshot = read_snapshot_file(&file)
					.await
					.with_context(|| format!("reading {}", file.display()))?;
				runtime.restore(snapshot, actor).await?;
				println!("{}", runtime.snapshot().await?.id);
			}
		},
		Command::Rollout {
			command: RolloutCommand::Step { key, step },
		} => {
			let outcome = runtime.step_rollout(&key, step, actor).await?;
			println!("{}", serde_json::to_string_pretty(&outcome)?);
		}
		Command::Metrics {
			command: MetricsCommand::Summary { snapshot },
		} => {
			let summaries = runtime.metrics().summarize(snapshot.as_deref()).await?;
			println!("{}", serde_json::to_string_pretty(&summaries)?);
		}
	}

	for sink in [runtime.audit().sink(), runtime.telemetry().sink()]
		.into_iter()
		.flatten()
	{
		if let Err(e) = sink.flush().await {
			tracing::warn!(path = %sink.path().display(), error = %e, "sink flush failed");
		}
	}
	Ok(())
}
