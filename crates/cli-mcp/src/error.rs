//! Error types for building and calling the tool registry

use thiserror::Error;

/// A flag could not be expressed as a tool parameter
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("unsupported flag type for --{flag}: {kind}")]
    UnsupportedFlagType { flag: String, kind: &'static str },
}

/// The registry refused a tool
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("tool already registered: {0}")]
    DuplicateTool(String),

    #[error("invalid tool descriptor: {0}")]
    InvalidDescriptor(String),
}

/// Walking a command tree into a registry failed
#[derive(Error, Debug)]
pub enum RegisterError {
    #[error("failed to convert flags to tools [{location}]: {source}")]
    Schema {
        location: String,
        #[source]
        source: SchemaError,
    },

    #[error("command name at [{location}] contains the tool delimiter '{delimiter}'")]
    InvalidCommandName {
        location: String,
        delimiter: &'static str,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// A tool call failed before producing a tool result
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("cannot invoke mcp from within mcp")]
    Recursion,

    #[error("tool call cancelled")]
    Cancelled,

    #[error("unknown tool: {0}")]
    UnknownTool(String),
}
