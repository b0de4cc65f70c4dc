//! Command Tree
//!
//! The in-memory description of a hierarchical CLI: named commands with typed
//! flags, optional actions and nested sub-commands. The bridge only ever reads
//! a tree; nothing in this crate mutates one after it has been built.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::cli::Context;

/// Name of the generated help command and flag
pub const HELP_NAME: &str = "help";

/// Name of the sub-command that serves a tree over MCP
pub const MCP_NAME: &str = "mcp";

/// Boxed future returned by an [`Action`]
pub type ActionFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Executable body of a command
#[derive(Clone)]
pub struct Action(Arc<dyn Fn(Context) -> ActionFuture + Send + Sync>);

impl Action {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self(Arc::new(move |ctx| Box::pin(f(ctx))))
    }

    pub async fn call(&self, ctx: Context) -> anyhow::Result<()> {
        (self.0)(ctx).await
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Action(..)")
    }
}

/// Typed value of a flag, doubling as its default
///
/// Every signed integer width is stored as `Int`, every unsigned width as
/// `Uint` and both float widths as `Float`.
#[derive(Debug, Clone, PartialEq)]
pub enum FlagValue {
    String(String),
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    StringSlice(Vec<String>),
}

impl FlagValue {
    /// Human readable name of the flag kind
    pub fn kind(&self) -> &'static str {
        match self {
            FlagValue::String(_) => "string",
            FlagValue::Bool(_) => "bool",
            FlagValue::Int(_) => "int",
            FlagValue::Uint(_) => "uint",
            FlagValue::Float(_) => "float",
            FlagValue::StringSlice(_) => "string slice",
        }
    }
}

/// A typed, named parameter accepted by a command
#[derive(Debug, Clone, PartialEq)]
pub struct Flag {
    pub name: String,
    pub usage: String,
    pub required: bool,
    pub value: FlagValue,
}

impl Flag {
    fn with_value(name: impl Into<String>, value: FlagValue) -> Self {
        Self {
            name: name.into(),
            usage: String::new(),
            required: false,
            value,
        }
    }

    pub fn string(name: impl Into<String>, default: impl Into<String>) -> Self {
        Self::with_value(name, FlagValue::String(default.into()))
    }

    pub fn bool(name: impl Into<String>, default: bool) -> Self {
        Self::with_value(name, FlagValue::Bool(default))
    }

    pub fn int(name: impl Into<String>, default: impl Into<i64>) -> Self {
        Self::with_value(name, FlagValue::Int(default.into()))
    }

    pub fn uint(name: impl Into<String>, default: impl Into<u64>) -> Self {
        Self::with_value(name, FlagValue::Uint(default.into()))
    }

    pub fn float(name: impl Into<String>, default: impl Into<f64>) -> Self {
        Self::with_value(name, FlagValue::Float(default.into()))
    }

    pub fn string_slice(name: impl Into<String>) -> Self {
        Self::with_value(name, FlagValue::StringSlice(Vec::new()))
    }

    pub fn usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = usage.into();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// One node of a command tree
#[derive(Debug, Clone, Default)]
pub struct Command {
    pub name: String,
    pub usage: String,
    pub description: String,
    pub version: String,
    pub flags: Vec<Flag>,
    pub commands: Vec<Command>,
    pub action: Option<Action>,
    pub hidden: bool,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = usage.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn flag(mut self, flag: Flag) -> Self {
        self.flags.push(flag);
        self
    }

    pub fn subcommand(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn action<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.action = Some(Action::new(f));
        self
    }

    /// Whether invoking this command runs an action
    pub fn is_callable(&self) -> bool {
        self.action.is_some()
    }

    /// Direct child with the given name
    pub fn find(&self, name: &str) -> Option<&Command> {
        self.commands.iter().find(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let cmd = Command::new("test")
            .usage("do a test")
            .version("1.0.0")
            .flag(Flag::int("target", 688).usage("submarine to target").required())
            .subcommand(Command::new("sub").hidden(true));

        assert_eq!(cmd.name, "test");
        assert_eq!(cmd.usage, "do a test");
        assert!(cmd.description.is_empty());
        assert_eq!(cmd.flags.len(), 1);
        assert!(cmd.flags[0].required);
        assert_eq!(cmd.flags[0].value, FlagValue::Int(688));
        assert!(cmd.find("sub").unwrap().hidden);
        assert!(cmd.find("missing").is_none());
    }

    #[test]
    fn test_is_callable() {
        let cmd = Command::new("test");
        assert!(!cmd.is_callable());

        let cmd = cmd.action(|_| async { Ok(()) });
        assert!(cmd.is_callable());
    }

    #[test]
    fn test_numeric_widths_collapse() {
        assert_eq!(Flag::int("a", 7i8).value, FlagValue::Int(7));
        assert_eq!(Flag::int("b", -7i32).value, FlagValue::Int(-7));
        assert_eq!(Flag::uint("c", 7u16).value, FlagValue::Uint(7));
        assert_eq!(Flag::float("d", 1.5f32).value, FlagValue::Float(1.5));
    }

    #[test]
    fn test_flag_kind() {
        assert_eq!(Flag::string("a", "").value.kind(), "string");
        assert_eq!(Flag::string_slice("b").value.kind(), "string slice");
    }
}
