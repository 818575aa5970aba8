use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::datastore::Theme;
use crate::sort::{SortKey, SortOrder};
use crate::task::{DEFAULT_PRIORITY, TaskId};

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

/// `name` or `name:#rrggbb` for a group created on the fly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGroupArg {
    pub name: String,
    pub color: Option<String>,
}

impl std::str::FromStr for NewGroupArg {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, color) = match s.rsplit_once(':') {
            Some((name, color)) if color.trim().starts_with('#') => {
                (name, Some(color.trim().to_string()))
            }
            _ => (s, None),
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(anyhow!("group name cannot be empty"));
        }
        Ok(Self {
            name: name.to_string(),
            color,
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "kadai",
    version,
    about = "Kadai: a local task list with due-date reminders",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "rc-file", global = true)]
    pub rc_file: Option<PathBuf>,

    #[arg(long = "data", global = true)]
    pub data: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Add a task.
    Add(AddArgs),
    /// Change fields of an existing task.
    Edit(EditArgs),
    /// Toggle completion.
    Done { id: TaskId },
    Delete { id: TaskId },
    /// Show one task in detail.
    Info { id: TaskId },
    /// List tasks in the current order (the default command).
    List(ListArgs),
    /// Move a task to a 1-based position of the manual order.
    Move { id: TaskId, position: usize },
    #[command(subcommand)]
    Group(GroupCommand),
    /// Show or set the theme preference.
    Theme {
        #[arg(value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<Theme>()))]
        theme: Option<Theme>,
    },
    /// Run one due-date scan and exit.
    Scan,
    /// Keep scanning for due tasks until interrupted.
    Watch,
}

#[derive(Args, Debug, Clone)]
pub struct AddArgs {
    #[arg(required_unless_present = "images")]
    pub text: Vec<String>,

    /// Due date: RFC3339, YYYY-MM-DD[ HH:MM], HH:MM, today, tomorrow, +2h.
    #[arg(long)]
    pub due: Option<String>,

    #[arg(short, long, default_value_t = DEFAULT_PRIORITY)]
    pub priority: u8,

    #[arg(short, long, conflicts_with = "new_group")]
    pub group: Option<String>,

    #[arg(
        long = "new-group",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<NewGroupArg>())
    )]
    pub new_group: Option<NewGroupArg>,

    #[arg(long = "image", action = ArgAction::Append)]
    pub images: Vec<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct EditArgs {
    pub id: TaskId,

    #[arg(long)]
    pub text: Option<String>,

    #[arg(long, conflicts_with = "clear_due")]
    pub due: Option<String>,

    #[arg(long)]
    pub clear_due: bool,

    #[arg(short, long)]
    pub priority: Option<u8>,

    #[arg(short, long, conflicts_with_all = ["new_group", "no_group"])]
    pub group: Option<String>,

    #[arg(long, conflicts_with = "new_group")]
    pub no_group: bool,

    #[arg(
        long = "new-group",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<NewGroupArg>())
    )]
    pub new_group: Option<NewGroupArg>,

    /// Replaces the image list.
    #[arg(long = "image", action = ArgAction::Append)]
    pub images: Vec<PathBuf>,

    #[arg(long, conflicts_with = "images")]
    pub clear_images: bool,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ListArgs {
    /// all, active, completed, or a group id.
    #[arg(long)]
    pub tab: Option<String>,

    #[arg(
        long,
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<SortKey>())
    )]
    pub sort: Option<SortKey>,

    #[arg(
        long,
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<SortOrder>())
    )]
    pub order: Option<SortOrder>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum GroupCommand {
    Add {
        name: String,
        #[arg(long)]
        color: Option<String>,
    },
    /// Delete a group; its tasks become ungrouped.
    Delete { id: String },
    List,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.key=value` (or `rc.key:value`) overrides out of
/// the argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = if let Some((k, v)) = rest.split_once('=') {
                Some((format!("rc.{k}"), v.to_string()))
            } else {
                rest.split_once(':')
                    .map(|(k, v)| (format!("rc.{k}"), v.to_string()))
            };

            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}
