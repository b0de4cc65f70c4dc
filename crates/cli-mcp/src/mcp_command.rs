//! The `mcp` sub-command

use anyhow::Context as _;
use tracing::debug;

use crate::bridge::BridgeConfig;
use crate::command::{Command, MCP_NAME};
use crate::registry::register;
use crate::server::McpServer;

/// Build a command that serves `root` as an MCP server on stdio.
///
/// Whether `root` is callable is read here, before the returned command is
/// attached to it; build this command first and attach it afterwards. `root`
/// is cloned and never mutated. `prefix` is placed before the command path of
/// every forwarded call, for trees that are reached through leading arguments.
pub fn mcp_command<I, S>(root: &Command, prefix: I) -> Command
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let root_has_action = root.is_callable();
    let root = root.clone();
    let prefix: Vec<String> = prefix.into_iter().map(Into::into).collect();

    Command::new(MCP_NAME)
        .usage("Serve commands as MCP server on stdio")
        .action(move |ctx| {
            let root = root.clone();
            let prefix = prefix.clone();
            async move {
                debug!(app = %root.name, "building MCP server");
                let config = BridgeConfig::current_exe()?.with_prefix(prefix);
                let registry = register(&root, root_has_action, config)
                    .context("Failed to build MCP tool registry")?;

                debug!(tools = registry.len(), "serving MCP server");
                McpServer::new(registry)
                    .run(ctx.shutdown().clone())
                    .await
            }
        })
}
