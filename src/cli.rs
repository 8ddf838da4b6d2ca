//! Command-line entry point: boots the runtime, runs the boot-time sweep,
//! then accepts one-shot goals for local testing. Front-end wiring
//! (Telegram, etc.) and tool subcommands are out of scope; this is the
//! "a binary exists and boots" scaffolding.

use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;

use agentcore::adapters::{InboundEvent, ReplySink};
use agentcore::config::Config;
use agentcore::runtime::AgentRuntime;
use agentcore::transport::mock::MockTransport;
use agentcore::transport::BoxedTransport;

/// Prints replies to stdout, used for one-shot CLI goals which have no
/// front-end to deliver a reply back to.
struct PrintReplySink;

#[async_trait]
impl ReplySink for PrintReplySink {
    async fn reply(&self, _chat_id: i64, text: String) {
        println!("{text}");
    }
}

#[derive(Parser, Debug)]
#[command(name = "agentcore", version, about = "Conversational agent runtime core")]
pub struct Cli {
    /// Enable debug-level logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// A one-shot goal to run against chat id 0 and print the result of.
    /// With no goal, boots the runtime, runs the resumable-task sweep, and
    /// exits.
    pub goal: Option<String>,

    /// Override the database path from the environment/config default.
    #[arg(long)]
    pub db_path: Option<String>,
}

fn build_transport() -> BoxedTransport {
    // No real LLM transport ships with the core (see the transport trait's
    // doc comment); the CLI drives the mock so the loop is exercisable
    // end-to-end without external services.
    Arc::new(MockTransport::new())
}

pub fn run(cli: Cli) {
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(error) => {
            eprintln!("error: failed to start async runtime: {error}");
            std::process::exit(1);
        }
    };

    rt.block_on(async move {
        let mut config = Config::from_env();
        if let Some(db_path) = cli.db_path {
            config.db_path = db_path;
        }

        let runtime = match AgentRuntime::new(build_transport(), config, Arc::new(PrintReplySink)).await {
            Ok(runtime) => runtime,
            Err(error) => {
                eprintln!("error: failed to start runtime: {error}");
                std::process::exit(1);
            }
        };

        match runtime.sweep_resumable_tasks().await {
            Ok(0) => tracing::debug!("no resumable tasks to sweep"),
            Ok(n) => tracing::info!(resumed = n, "resumed interrupted tasks"),
            Err(error) => tracing::error!(%error, "resumable task sweep failed"),
        }

        if let Some(goal) = cli.goal {
            runtime.dispatch(InboundEvent::new(0, goal)).await;
            // CLI-originated events have nowhere to deliver a reply to
            // asynchronously; give the single dispatched task a moment to
            // finish before the process exits.
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    });
}
