//! Command-line execution of a command tree
//!
//! Parsing is delegated to clap: the tree is converted into a `clap::Command`,
//! argv is matched against it and the action of the selected node is awaited.

use std::ffi::OsString;

use anyhow::{Context as _, Result};
use clap::error::ErrorKind;
use clap::{value_parser, Arg, ArgAction, ArgMatches};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::command::{Command, Flag, FlagValue, HELP_NAME};

/// What an action gets to see about its invocation
#[derive(Debug, Clone)]
pub struct Context {
    path: Vec<String>,
    matches: ArgMatches,
    shutdown: CancellationToken,
}

impl Context {
    /// Names from the root to the invoked command
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Fires when the application is asked to stop
    pub fn shutdown(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn string(&self, name: &str) -> Option<String> {
        self.matches.try_get_one::<String>(name).ok().flatten().cloned()
    }

    pub fn bool(&self, name: &str) -> bool {
        self.matches
            .try_get_one::<bool>(name)
            .ok()
            .flatten()
            .copied()
            .unwrap_or(false)
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.matches.try_get_one::<i64>(name).ok().flatten().copied()
    }

    pub fn uint(&self, name: &str) -> Option<u64> {
        self.matches.try_get_one::<u64>(name).ok().flatten().copied()
    }

    pub fn float(&self, name: &str) -> Option<f64> {
        self.matches.try_get_one::<f64>(name).ok().flatten().copied()
    }

    pub fn strings(&self, name: &str) -> Vec<String> {
        self.matches
            .try_get_many::<String>(name)
            .ok()
            .flatten()
            .map(|values| values.cloned().collect())
            .unwrap_or_default()
    }
}

/// Build the clap definition for a command and its visible descendants
pub fn to_clap(cmd: &Command) -> clap::Command {
    let mut app = clap::Command::new(cmd.name.clone()).hide(cmd.hidden);

    if !cmd.usage.is_empty() {
        app = app.about(cmd.usage.clone());
    }
    if !cmd.description.is_empty() {
        app = app.long_about(cmd.description.clone());
    }
    if !cmd.version.is_empty() {
        app = app.version(cmd.version.clone());
    }

    // clap generates its own help flag and help sub-command
    for flag in cmd.flags.iter().filter(|f| f.name != HELP_NAME) {
        app = app.arg(flag_arg(flag));
    }
    for sub in cmd.commands.iter().filter(|c| c.name != HELP_NAME) {
        app = app.subcommand(to_clap(sub));
    }

    app
}

fn flag_arg(flag: &Flag) -> Arg {
    let mut arg = Arg::new(flag.name.clone())
        .long(flag.name.clone())
        .required(flag.required);

    if !flag.usage.is_empty() {
        arg = arg.help(flag.usage.clone());
    }

    let defaults: Vec<String> = match &flag.value {
        FlagValue::String(default) => {
            arg = arg
                .value_parser(value_parser!(String))
                .action(ArgAction::Set)
                .allow_hyphen_values(true);
            if default.is_empty() {
                Vec::new()
            } else {
                vec![default.clone()]
            }
        }
        // Accepts both `--flag` and `--flag false`
        FlagValue::Bool(default) => {
            arg = arg
                .value_parser(value_parser!(bool))
                .action(ArgAction::Set)
                .num_args(0..=1)
                .default_missing_value("true");
            vec![default.to_string()]
        }
        FlagValue::Int(default) => {
            arg = arg
                .value_parser(value_parser!(i64))
                .action(ArgAction::Set)
                .allow_negative_numbers(true);
            vec![default.to_string()]
        }
        FlagValue::Uint(default) => {
            arg = arg.value_parser(value_parser!(u64)).action(ArgAction::Set);
            vec![default.to_string()]
        }
        FlagValue::Float(default) => {
            arg = arg
                .value_parser(value_parser!(f64))
                .action(ArgAction::Set)
                .allow_negative_numbers(true);
            vec![default.to_string()]
        }
        FlagValue::StringSlice(defaults) => {
            arg = arg
                .value_parser(value_parser!(String))
                .action(ArgAction::Append)
                .allow_hyphen_values(true);
            defaults.clone()
        }
    };

    // clap refuses defaults on required arguments
    if !flag.required && !defaults.is_empty() {
        arg = arg.default_values(defaults);
    }
    arg
}

/// Parse `args` (including the program name) and run the selected action
pub async fn run<I, T>(root: &Command, args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    run_until(root, args, CancellationToken::new()).await
}

/// Like [`run`], with a token actions can watch to stop early
pub async fn run_until<I, T>(root: &Command, args: I, shutdown: CancellationToken) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let mut app = to_clap(root);
    let matches = match app.try_get_matches_from_mut(args) {
        Ok(m) => m,
        Err(e)
            if matches!(
                e.kind(),
                ErrorKind::DisplayHelp
                    | ErrorKind::DisplayVersion
                    | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
            ) =>
        {
            e.print()?;
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let mut node = root;
    let mut matches = &matches;
    let mut path = vec![root.name.clone()];
    while let Some((name, sub)) = matches.subcommand() {
        node = node
            .find(name)
            .with_context(|| format!("No command named {} under {}", name, path.join(" ")))?;
        path.push(name.to_string());
        matches = sub;
    }

    match &node.action {
        Some(action) => {
            debug!(path = ?path, "running command");
            let ctx = Context {
                path,
                matches: matches.clone(),
                shutdown,
            };
            action.call(ctx).await
        }
        None => {
            to_clap(node).print_help()?;
            Ok(())
        }
    }
}
