//! CLI module for offtune

use clap::{Parser, Subcommand, ValueEnum};
use offtune::offline::CollectionKind;

pub mod auth;
pub mod commands;

pub use auth::AuthManager;

#[derive(Parser, Debug)]
#[command(name = "offtune", about = "Keep Subsonic albums and playlists available offline")]
#[command(version, author)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Collection kind as typed on the command line
#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum KindArg {
    Album,
    Playlist,
}

impl From<KindArg> for CollectionKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Album => CollectionKind::Album,
            KindArg::Playlist => CollectionKind::Playlist,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Configure Subsonic server credentials
    Auth {
        /// Subsonic server URL
        #[arg(long, env = "SUBSONIC_URL")]
        url: Option<String>,

        /// Username
        #[arg(short, long, env = "SUBSONIC_USER")]
        username: Option<String>,

        /// Password
        #[arg(short, long, env = "SUBSONIC_PASS")]
        password: Option<String>,

        /// Force re-authentication (ignore stored credentials)
        #[arg(long)]
        force: bool,
    },

    /// Make an album or playlist available offline
    Download {
        #[arg(value_enum)]
        kind: KindArg,

        /// Album or playlist id
        id: String,

        /// Stay until every song finished downloading
        #[arg(short, long)]
        wait: bool,
    },

    /// Remove an offline album or playlist, keeping songs other collections use
    Remove {
        #[arg(value_enum)]
        kind: KindArg,

        /// Album or playlist id
        id: String,
    },

    /// Show offline collections and their download state
    Status,

    /// Manage the favourites playlist
    Favourites {
        #[command(subcommand)]
        command: FavouritesCommand,
    },

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum FavouritesCommand {
    /// Bring the favourites playlist in line with starred songs
    Sync,

    /// Star a song (or unstar it with --off) and update the playlist
    Set {
        song_id: String,

        /// Remove the favourite flag instead
        #[arg(long)]
        off: bool,
    },
}
