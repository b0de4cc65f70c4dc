//! example - a tiny CLI that can serve itself over MCP
//!
//! Usage:
//!   example hello --name Ada
//!   example add --first 2 --second 3
//!   example mcp
//!
//! `example mcp` speaks JSON-RPC 2.0 on stdio and exposes `example_hello`
//! and `example_add` as tools.

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cli_mcp::{cli, mcp_command, Command, Flag};

fn app() -> Command {
    Command::new("example")
        .usage("example")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand(
            Command::new("hello")
                .usage("say hello")
                .flag(Flag::string("name", "World").usage("the name to say hello to"))
                .action(|ctx| async move {
                    println!("Hello, {}", ctx.string("name").unwrap_or_default());
                    Ok(())
                }),
        )
        .subcommand(
            Command::new("add")
                .usage("Calculate the sum of two numbers")
                .flag(Flag::int("first", 0i64).usage("the first number to add"))
                .flag(Flag::int("second", 0i64).usage("the second number to add"))
                .action(|ctx| async move {
                    let first = ctx.int("first").unwrap_or(0);
                    let second = ctx.int("second").unwrap_or(0);
                    let sum = first
                        .checked_add(second)
                        .with_context(|| format!("{} + {} overflows", first, second))?;
                    println!("{} + {} = {}", first, second, sum);
                    Ok(())
                }),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging to stderr (stdout is for MCP protocol)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let app = app();
    let mcp = mcp_command(&app, Vec::<String>::new());
    let app = app.subcommand(mcp);

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, shutting down");
            on_signal.cancel();
        }
    });

    cli::run_until(&app, std::env::args_os(), shutdown).await
}
