//! Invocation Bridge
//!
//! Turns a tool call back into a command line and runs it as a child of the
//! current executable. No shell is involved; every argument reaches the child
//! exactly as built here.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::command::MCP_NAME;
use crate::error::BridgeError;
use crate::protocol::ToolResult;
use crate::registry::{CallContext, ToolHandler, TOOL_DELIMITER};

/// Fixed inputs of a bridge, captured once at construction
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// Program to re-execute for every call
    pub executable: PathBuf,
    /// Arguments placed before the command path
    pub prefix: Vec<String>,
    /// Kill the child after this long
    pub timeout: Option<Duration>,
}

impl BridgeConfig {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            prefix: Vec::new(),
            timeout: None,
        }
    }

    /// Config targeting the executable of the running process
    pub fn current_exe() -> Result<Self> {
        let executable = match std::env::current_exe() {
            Ok(path) => path,
            Err(e) => {
                warn!("current_exe unavailable ({}), falling back to argv[0]", e);
                std::env::args_os()
                    .next()
                    .map(PathBuf::from)
                    .context("Cannot determine the path of the running executable")?
            }
        };
        Ok(Self::new(executable))
    }

    pub fn with_prefix<I, S>(mut self, prefix: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prefix = prefix.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Handler shared by every tool of a registry
#[derive(Debug, Clone)]
pub struct InvocationBridge {
    config: BridgeConfig,
}

impl InvocationBridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Build the child argv for a call.
    ///
    /// The first segment of the tool name is the root command and is dropped;
    /// the configured prefix goes first. Argument order follows the map.
    pub fn build_args(
        &self,
        tool_name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<Vec<String>, BridgeError> {
        let mut args = self.config.prefix.clone();
        args.extend(tool_name.split(TOOL_DELIMITER).skip(1).map(str::to_string));

        if args.iter().any(|a| a == MCP_NAME) {
            return Err(BridgeError::Recursion);
        }

        for (key, value) in arguments {
            match render_value(value) {
                Some(v) => args.extend([format!("--{}", key), v]),
                None => warn!(arg = %key, value = %value, "ignoring non-scalar argument"),
            }
        }

        Ok(args)
    }

    /// Run one tool call to completion
    pub async fn invoke(
        &self,
        ctx: &CallContext,
        tool_name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<ToolResult, BridgeError> {
        let args = self.build_args(tool_name, arguments)?;

        info!(
            cmd = %self.config.executable.display(),
            args = ?args,
            "forking"
        );

        let mut cmd = Command::new(&self.config.executable);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("Failed to start {}: {}", self.config.executable.display(), e);
                return Ok(ToolResult::error(String::new()));
            }
        };

        let timeout = self.config.timeout;
        let deadline = async move {
            match timeout {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        };

        // Dropping the wait future drops the child, which kills it
        let output = tokio::select! {
            _ = ctx.cancelled() => {
                debug!("Call to {} cancelled, killing child", tool_name);
                return Err(BridgeError::Cancelled);
            }
            _ = deadline => {
                let d = timeout.unwrap_or_default();
                warn!("Call to {} timed out after {:?}", tool_name, d);
                return Ok(ToolResult::error(format!("Command timed out after {:?}", d)));
            }
            output = child.wait_with_output() => output,
        };

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                warn!("Failed waiting for {}: {}", tool_name, e);
                return Ok(ToolResult::error(String::new()));
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        debug!(status = %output.status, stderr = %stderr, "invoked tool");

        if output.status.success() {
            Ok(ToolResult::success(
                String::from_utf8_lossy(&output.stdout).to_string(),
            ))
        } else {
            Ok(ToolResult::error(stderr))
        }
    }
}

#[async_trait]
impl ToolHandler for InvocationBridge {
    async fn call(
        &self,
        ctx: CallContext,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolResult, BridgeError> {
        self.invoke(&ctx, name, &arguments).await
    }
}

/// Flag value text for a scalar argument; `None` for anything else
fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => n.as_f64().map(|f| f.to_string()),
        _ => None,
    }
}
