use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use loam_core::EntityKind;

#[derive(Parser)]
#[command(name = "loam")]
#[command(about = "Local-first notes, lists and tasks that sync when you are online")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// CLI profile name for account and sync configuration
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new entity
    #[command(alias = "new")]
    Add {
        /// Entity kind
        #[arg(short, long, value_enum, default_value_t = KindArg::Note)]
        kind: KindArg,
        /// Container ID or unique ID prefix to group the entity under
        #[arg(short, long, value_name = "ID")]
        container: Option<String>,
        /// Text content (stdin or $EDITOR when omitted)
        content: Vec<String>,
    },
    /// List entities of the current owner
    List {
        /// Number of entities to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Only show one kind
        #[arg(short, long, value_enum)]
        kind: Option<KindArg>,
        /// Only show entities inside this container
        #[arg(short, long, value_name = "ID")]
        container: Option<String>,
        /// Include soft-deleted entities
        #[arg(long)]
        deleted: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit an existing entity
    Edit {
        /// Entity ID or unique ID prefix
        id: String,
        /// New content ($EDITOR when omitted)
        #[arg(short = 'm', long)]
        content: Option<String>,
    },
    /// Delete an existing entity
    Delete {
        /// Entity ID or unique ID prefix
        id: String,
    },
    /// Push local changes and pull remote ones
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
    },
    /// Upload data created before sign-in to the profile's account
    Migrate {
        /// Owner the data was created under
        #[arg(long, value_name = "OWNER")]
        from: Option<String>,
        /// Stop after the first failed upload instead of retrying
        #[arg(long)]
        once: bool,
    },
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum KindArg {
    Note,
    List,
    TaskContainer,
}

impl From<KindArg> for EntityKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Note => Self::Note,
            KindArg::List => Self::List,
            KindArg::TaskContainer => Self::TaskContainer,
        }
    }
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Show queue counts, checkpoint and status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Keep syncing in the background until Ctrl-C
    Run,
    /// List changes the remote rejected or that exhausted their retries
    DeadLetters {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Move a dead-lettered change back into the queue
    Retry {
        /// Queue entry ID
        entry_id: i64,
    },
    /// List recently resolved sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update profile config
    Init {
        /// Profile name to initialize
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
        /// Remote API base URL
        #[arg(long, value_name = "URL")]
        api_base_url: Option<String>,
        /// Account owner ID the profile syncs as
        #[arg(long, value_name = "OWNER")]
        owner_id: Option<String>,
        /// Token refresh endpoint
        #[arg(long, value_name = "URL")]
        refresh_endpoint: Option<String>,
        /// Keep current active profile instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
    /// Print the resolved profile
    Show,
}
