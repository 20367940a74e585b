//! strikeq CLI: run a queue against a hook executable, inspect and repair it.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde_json::Value;
use strikeq::store::{Query, SqliteStore, Store};
use strikeq::telemetry::{TelemetryConfig, init_telemetry};
use strikeq::{Failure, Queue, QueueConfig, Status, Task, TaskId, Worker};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "strikeq", about = "Durable ordered work queue")]
struct Cli {
    /// Queue config file (TOML). Falls back to STRIKEQ_* environment variables.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process the queue with a hook executable until Ctrl-C
    Serve {
        /// Executable run once per attempt; task input arrives on stdin
        #[arg(long)]
        hook: PathBuf,
        /// JSON Lines file whose entries are pushed at startup
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// List tasks
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
    },
    /// Show a task
    Show {
        /// Task id
        id: TaskId,
    },
    /// Skip a task in the active window (clears a block)
    Skip {
        /// Task id
        id: TaskId,
    },
    /// Delete a task
    Delete {
        /// Task id
        id: TaskId,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => QueueConfig::from_file(path)?,
        None => QueueConfig::from_env()?,
    };

    match cli.command {
        Command::Serve { hook, input } => cmd_serve(config, hook, input).await,
        Command::List { status } => cmd_list(&config, status).await,
        Command::Show { id } => cmd_show(&config, id).await,
        Command::Skip { id } => cmd_repair(config, id, Repair::Skip).await,
        Command::Delete { id } => cmd_repair(config, id, Repair::Delete).await,
    }
}

// ---------------------------------------------------------------------------
// Hook worker
// ---------------------------------------------------------------------------

/// Runs an executable per attempt.
///
/// The task input is written to stdin as JSON. Exit 0 is success and
/// stdout is the result: parsed as JSON when possible, otherwise kept as a
/// string, `null` when empty. Any other exit is a failed attempt.
struct HookWorker {
    command: PathBuf,
}

#[async_trait]
impl Worker for HookWorker {
    async fn run(&self, task: Task) -> Result<Value, Failure> {
        debug!(
            id = %task.id,
            command = %self.command.display(),
            "running hook"
        );

        let mut child = tokio::process::Command::new(&self.command)
            .env("STRIKEQ_TASK_ID", task.id.to_string())
            .env("STRIKEQ_ATTEMPT", (task.fail_count + 1).to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Feed stdin alongside draining stdout and stderr so a hook that
        // writes before reading cannot fill a pipe and stall.
        let input = serde_json::to_vec(&task.input)?;
        let feeder = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                stdin.write_all(&input).await?;
                stdin.shutdown().await
            })
        });

        let output = child.wait_with_output().await?;
        if let Some(feeder) = feeder {
            match feeder.await {
                Ok(Err(e)) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e.into()),
                Err(join) => return Err(Failure::new(format!("stdin writer failed: {join}"))),
                _ => {}
            }
        }
        if !output.status.success() {
            let code = output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let mut failure = Failure::new(format!("hook exited with status {code}"))
                .with_name("HookFailed")
                .with_code(code);
            if !stderr.is_empty() {
                failure = failure.with_argument(Value::String(stderr));
            }
            return Err(failure);
        }

        Ok(parse_hook_output(&output.stdout))
    }
}

fn parse_hook_output(stdout: &[u8]) -> Value {
    let text = String::from_utf8_lossy(stdout);
    let text = text.trim();
    if text.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_serve(config: QueueConfig, hook: PathBuf, input: Option<PathBuf>) -> anyhow::Result<()> {
    let _guard = init_telemetry(TelemetryConfig::from_env("strikeq").with_queue(&config))?;

    let queue = Queue::open(config, HookWorker { command: hook }).await?;
    let mut events = queue.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!("unprintable event: {e}"),
            }
        }
    });

    if let Some(path) = input {
        let pushed = push_lines(&queue, &path).await?;
        info!(pushed, file = %path.display(), "input loaded");
    }

    info!(
        path = %queue.config().path.display(),
        window = queue.len().await?,
        count = queue.count().await?,
        "serving, Ctrl-C to stop"
    );
    tokio::signal::ctrl_c().await.ok();

    queue.close().await?;
    Ok(())
}

async fn push_lines(queue: &Queue, path: &Path) -> anyhow::Result<usize> {
    let content = tokio::fs::read_to_string(path).await?;
    let mut pushed = 0;
    for (n, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(line)
            .map_err(|e| anyhow::anyhow!("{}:{}: {e}", path.display(), n + 1))?;
        queue.push(value).await?;
        pushed += 1;
    }
    Ok(pushed)
}

async fn cmd_list(config: &QueueConfig, status: Option<String>) -> anyhow::Result<()> {
    let query = match status {
        Some(s) => Query::Status(s.parse::<Status>()?),
        None => Query::All,
    };

    let store = SqliteStore::connect(&config.path).await?;
    let tasks = store.query(&query).await?;
    store.close().await?;

    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }

    println!(
        "{:<8}  {:<10}  {:<6}  {:<40}  UPDATED",
        "ID", "STATUS", "FAILS", "INPUT"
    );
    println!("{}", "-".repeat(90));

    for task in &tasks {
        let input = task.input.to_string();
        let input_display: String = if input.chars().count() > 40 {
            input.chars().take(37).chain("...".chars()).collect()
        } else {
            input
        };
        println!(
            "{:<8}  {:<10}  {:<6}  {:<40}  {}",
            task.id,
            task.status,
            task.fail_count,
            input_display,
            task.updated_at.format("%Y-%m-%d %H:%M")
        );
    }

    println!("\n{} task(s)", tasks.len());
    Ok(())
}

async fn cmd_show(config: &QueueConfig, id: TaskId) -> anyhow::Result<()> {
    let store = SqliteStore::connect(&config.path).await?;
    let task = store.get(id).await;
    store.close().await?;
    let task = task?;

    println!("ID:         {}", task.id);
    println!("Status:     {}", task.status);
    println!("Failures:   {}", task.fail_count);
    println!("Input:      {}", serde_json::to_string_pretty(&task.input)?);
    if let Some(ref result) = task.result {
        println!("Result:     {}", serde_json::to_string_pretty(result)?);
    }
    println!("Created:    {}", task.created_at);
    println!("Updated:    {}", task.updated_at);
    for (attempt, error) in task.errors.iter().enumerate() {
        println!("---");
        println!("Attempt {}:  {error}", attempt + 1);
        for argument in &error.arguments {
            println!("            {argument}");
        }
    }

    Ok(())
}

enum Repair {
    Skip,
    Delete,
}

/// Open the queue without starting the scheduler, apply one repair, close.
async fn cmd_repair(config: QueueConfig, id: TaskId, repair: Repair) -> anyhow::Result<()> {
    let idle = |_task: Task| async { Err::<Value, _>(Failure::new("queue is not serving")) };
    let queue = Queue::open(config.autostart(false), idle).await?;

    let result = match repair {
        Repair::Skip => queue.skip(id).await.map(|_| "skipped"),
        Repair::Delete => queue.delete(id).await.map(|_| "deleted"),
    };
    queue.close().await?;

    println!("Task {id} {}", result?);
    Ok(())
}
