//! Tool Registry
//!
//! Flattens a command tree into MCP tools. Every callable, visible command
//! becomes one tool named by its path from the root, joined with
//! [`TOOL_DELIMITER`]. All tools share a single handler.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bridge::{BridgeConfig, InvocationBridge};
use crate::command::{Command, HELP_NAME, MCP_NAME};
use crate::error::{BridgeError, RegisterError, RegistryError};
use crate::protocol::{InputSchema, Tool, ToolResult};
use crate::schema::{translate, ParameterSchema};

/// Separator between command names in a tool name
pub const TOOL_DELIMITER: &str = "_";

/// Per-call state handed to a [`ToolHandler`]
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the call has been cancelled
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// Something that can answer a tool call
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(
        &self,
        ctx: CallContext,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolResult, BridgeError>;
}

/// Schema of one callable tool
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub params: Vec<ParameterSchema>,
}

impl ToolDescriptor {
    pub fn input_schema(&self) -> InputSchema {
        InputSchema {
            schema_type: "object".to_string(),
            properties: self
                .params
                .iter()
                .map(|p| (p.name.clone(), p.property()))
                .collect(),
            required: self
                .params
                .iter()
                .filter(|p| p.required)
                .map(|p| p.name.clone())
                .collect(),
        }
    }

    /// MCP tool definition for `tools/list`
    pub fn to_tool(&self) -> Tool {
        Tool {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema(),
        }
    }
}

struct Entry {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

/// Immutable-after-startup set of tools, in registration order
pub struct ToolRegistry {
    name: String,
    version: String,
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn add_tool(
        &mut self,
        descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), RegistryError> {
        if descriptor.name.is_empty() {
            return Err(RegistryError::InvalidDescriptor(
                "tool name is empty".to_string(),
            ));
        }
        if self.index.contains_key(&descriptor.name) {
            return Err(RegistryError::DuplicateTool(descriptor.name));
        }

        self.index.insert(descriptor.name.clone(), self.entries.len());
        self.entries.push(Entry {
            descriptor,
            handler,
        });
        Ok(())
    }

    pub fn tools(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.entries.iter().map(|e| &e.descriptor)
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&i| &self.entries[i].descriptor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Dispatch a call to the handler registered for `name`
    pub async fn call(
        &self,
        ctx: CallContext,
        name: &str,
        arguments: Map<String, Value>,
    ) -> Result<ToolResult, BridgeError> {
        let entry = self
            .index
            .get(name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| BridgeError::UnknownTool(name.to_string()))?;

        entry.handler.call(ctx, name, arguments).await
    }
}

/// Build a registry whose tools re-execute `config.executable`.
///
/// `root_has_action` must be captured before the caller attaches anything to
/// `root`: the root command itself only becomes a tool when it was callable to
/// begin with.
pub fn register(
    root: &Command,
    root_has_action: bool,
    config: BridgeConfig,
) -> Result<ToolRegistry, RegisterError> {
    let handler: Arc<dyn ToolHandler> = Arc::new(InvocationBridge::new(config));
    register_with(root, root_has_action, handler)
}

/// Like [`register`], with any handler shared by all tools
pub fn register_with(
    root: &Command,
    root_has_action: bool,
    handler: Arc<dyn ToolHandler>,
) -> Result<ToolRegistry, RegisterError> {
    let mut registry = ToolRegistry::new(root.name.clone(), root.version.clone());
    register_node(&mut registry, &handler, root, &[], root_has_action)?;
    Ok(registry)
}

fn register_node(
    registry: &mut ToolRegistry,
    handler: &Arc<dyn ToolHandler>,
    cmd: &Command,
    parent: &[String],
    root_has_action: bool,
) -> Result<(), RegisterError> {
    // Skipping a node skips its whole subtree
    if cmd.name == MCP_NAME || cmd.name == HELP_NAME || cmd.hidden {
        return Ok(());
    }

    let mut loc = parent.to_vec();
    loc.push(cmd.name.clone());

    if cmd.name.contains(TOOL_DELIMITER) {
        return Err(RegisterError::InvalidCommandName {
            location: loc.join(" "),
            delimiter: TOOL_DELIMITER,
        });
    }

    if cmd.is_callable() && (!parent.is_empty() || root_has_action) {
        debug!(loc = ?loc, "registering command");

        let params = translate(&cmd.flags).map_err(|source| RegisterError::Schema {
            location: loc.join(" "),
            source,
        })?;

        let description = if cmd.description.is_empty() {
            cmd.usage.clone()
        } else {
            cmd.description.clone()
        };

        registry.add_tool(
            ToolDescriptor {
                name: loc.join(TOOL_DELIMITER),
                description,
                params,
            },
            Arc::clone(handler),
        )?;
    }

    for sub in &cmd.commands {
        register_node(registry, handler, sub, &loc, root_has_action)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Flag;
    use crate::schema::ParamType;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers every call with the tool name, counting calls
    #[derive(Default)]
    struct NameHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ToolHandler for NameHandler {
        async fn call(
            &self,
            _ctx: CallContext,
            name: &str,
            _arguments: Map<String, Value>,
        ) -> Result<ToolResult, BridgeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ToolResult::success(name))
        }
    }

    fn noop(cmd: Command) -> Command {
        cmd.action(|_| async { Ok(()) })
    }

    fn names(registry: &ToolRegistry) -> Vec<&str> {
        registry.tools().map(|t| t.name.as_str()).collect()
    }

    fn echo() -> BridgeConfig {
        BridgeConfig::new("/bin/echo")
    }

    #[test]
    fn test_register_tree() {
        let root = noop(Command::new("test").usage("do a test").version("1.0.0")).subcommand(
            noop(Command::new("sub").description("do a sub test"))
                .flag(
                    Flag::int("target", 688i64)
                        .usage("submarine to target")
                        .required(),
                )
                .flag(Flag::bool("help", false)),
        );

        let registry = register(&root, true, echo()).unwrap();

        assert_eq!(registry.name(), "test");
        assert_eq!(registry.version(), "1.0.0");
        assert_eq!(names(&registry), vec!["test", "test_sub"]);

        let root_tool = registry.get("test").unwrap().to_tool();
        assert_eq!(root_tool.description, "do a test");
        assert!(root_tool.input_schema.properties.is_empty());
        assert!(root_tool.input_schema.required.is_empty());

        let sub = registry.get("test_sub").unwrap();
        assert_eq!(sub.description, "do a sub test");
        assert_eq!(sub.params.len(), 1);
        assert_eq!(sub.params[0].param_type, ParamType::Number);

        let schema = sub.input_schema();
        assert_eq!(
            schema.properties["target"],
            json!({
                "type": "number",
                "description": "submarine to target",
                "default": 688.0,
            })
        );
        assert_eq!(schema.required, vec!["target"]);
    }

    #[test]
    fn test_root_without_action_is_skipped() {
        let root = noop(Command::new("test")).subcommand(noop(Command::new("sub")));

        let registry = register(&root, false, echo()).unwrap();
        assert_eq!(names(&registry), vec!["test_sub"]);
    }

    #[test]
    fn test_non_callable_nodes_are_traversed() {
        let root = Command::new("test")
            .subcommand(Command::new("group").subcommand(noop(Command::new("leaf"))));

        let registry = register(&root, false, echo()).unwrap();
        assert_eq!(names(&registry), vec!["test_group_leaf"]);
    }

    #[test]
    fn test_excluded_commands() {
        let children = || {
            vec![
                noop(Command::new("visible-sub").usage("a visible subcommand")),
                noop(Command::new("mcp")),
                noop(Command::new("hidden").usage("hidden subcommand")).hidden(true),
                noop(Command::new("help").usage("hidden subcommand")),
            ]
        };

        let mut parent = noop(Command::new("parent").usage("parent with hidden subcommands"));
        parent.commands = children();

        let mut root = noop(Command::new("test"));
        root.commands = vec![
            noop(Command::new("visible").usage("a visible command")),
            noop(Command::new("mcp").usage("should be hidden"))
                .subcommand(noop(Command::new("inner"))),
            noop(Command::new("hidden").usage("should be hidden")).hidden(true),
            noop(Command::new("help").usage("should be hidden")),
            parent,
        ];

        let registry = register(&root, true, echo()).unwrap();
        assert_eq!(
            names(&registry),
            vec!["test", "test_visible", "test_parent", "test_parent_visible-sub"]
        );
    }

    #[test]
    fn test_hidden_parent_hides_children() {
        let root = Command::new("test").subcommand(
            noop(Command::new("secret"))
                .hidden(true)
                .subcommand(noop(Command::new("visible"))),
        );

        let registry = register(&root, false, echo()).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_preorder_sibling_order() {
        let root = Command::new("r")
            .subcommand(noop(Command::new("b")).subcommand(noop(Command::new("z"))))
            .subcommand(noop(Command::new("a")));

        let registry = register(&root, false, echo()).unwrap();
        assert_eq!(names(&registry), vec!["r_b", "r_b_z", "r_a"]);
    }

    #[test]
    fn test_description_prefers_description() {
        let root = Command::new("r")
            .subcommand(noop(Command::new("a").usage("usage").description("long")))
            .subcommand(noop(Command::new("b").usage("usage")));

        let registry = register(&root, false, echo()).unwrap();
        assert_eq!(registry.get("r_a").unwrap().description, "long");
        assert_eq!(registry.get("r_b").unwrap().description, "usage");
    }

    #[test]
    fn test_unsupported_flag_aborts() {
        let root = Command::new("test")
            .subcommand(noop(Command::new("ok")))
            .subcommand(noop(Command::new("bad")).flag(Flag::string_slice("tags")));

        let err = register(&root, false, echo()).err().unwrap();
        match &err {
            RegisterError::Schema { location, .. } => assert_eq!(location, "test bad"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("[test bad]"));
    }

    #[test]
    fn test_unsupported_flag_on_skipped_node_is_ignored() {
        let root = Command::new("test")
            .subcommand(noop(Command::new("bad")).hidden(true).flag(Flag::string_slice("tags")))
            .flag(Flag::string_slice("tags"));

        let registry = register(&root, false, echo()).unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_delimiter_in_name_rejected() {
        let root = Command::new("test").subcommand(noop(Command::new("do_thing")));

        let err = register(&root, false, echo()).err().unwrap();
        assert!(matches!(err, RegisterError::InvalidCommandName { .. }));
    }

    #[test]
    fn test_registry_rejects_bad_descriptors() {
        let handler: Arc<dyn ToolHandler> = Arc::new(NameHandler::default());
        let mut registry = ToolRegistry::new("test", "");
        let descriptor = |name: &str| ToolDescriptor {
            name: name.to_string(),
            description: String::new(),
            params: Vec::new(),
        };

        registry
            .add_tool(descriptor("a"), Arc::clone(&handler))
            .unwrap();
        assert!(matches!(
            registry.add_tool(descriptor("a"), Arc::clone(&handler)),
            Err(RegistryError::DuplicateTool(_))
        ));
        assert!(matches!(
            registry.add_tool(descriptor(""), handler),
            Err(RegistryError::InvalidDescriptor(_))
        ));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_shared_handler_dispatch() {
        let handler = Arc::new(NameHandler::default());
        let root = noop(Command::new("test")).subcommand(noop(Command::new("sub")));

        let registry = register_with(&root, true, handler.clone()).unwrap();

        let result = registry
            .call(CallContext::new(), "test_sub", Map::new())
            .await
            .unwrap();
        assert_eq!(result.text(), "test_sub");

        let result = registry
            .call(CallContext::new(), "test", Map::new())
            .await
            .unwrap();
        assert_eq!(result.text(), "test");
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);

        let err = registry
            .call(CallContext::new(), "test_missing", Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn test_end_to_end_with_prefix() {
        let root = Command::new("test").subcommand(noop(Command::new("sub")));
        let registry = register(&root, false, echo().with_prefix(["foo", "bar"])).unwrap();

        let result = registry
            .call(CallContext::new(), "test_sub", Map::new())
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.text(), "foo bar sub\n");
    }
}
