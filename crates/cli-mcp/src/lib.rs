//! cli-mcp
//!
//! Exposes a command tree to AI assistants as Model Context Protocol (MCP)
//! tools. Every callable command becomes a tool; calling it re-executes the
//! current binary with the equivalent command line and returns its output.
//!
//! ```ignore
//! use cli_mcp::{cli, mcp_command, Command, Flag};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let app = Command::new("example").subcommand(
//!         Command::new("hello")
//!             .flag(Flag::string("name", "World"))
//!             .action(|ctx| async move {
//!                 println!("Hello, {}", ctx.string("name").unwrap_or_default());
//!                 Ok(())
//!             }),
//!     );
//!     let mcp = mcp_command(&app, Vec::<String>::new());
//!     let app = app.subcommand(mcp);
//!     cli::run(&app, std::env::args_os()).await
//! }
//! ```

pub mod bridge;
pub mod cli;
pub mod command;
pub mod error;
pub mod mcp_command;
pub mod protocol;
pub mod registry;
pub mod schema;
pub mod server;

#[cfg(test)]
mod test_support;

pub use bridge::{BridgeConfig, InvocationBridge};
pub use command::{Action, Command, Flag, FlagValue};
pub use error::{BridgeError, RegisterError, RegistryError, SchemaError};
pub use mcp_command::mcp_command;
pub use registry::{
    register, CallContext, ToolDescriptor, ToolHandler, ToolRegistry, TOOL_DELIMITER,
};
pub use schema::{translate, ParamType, ParameterSchema};
pub use server::McpServer;
