//! CLI command handlers

use anyhow::{Context, Result};
use clap_complete::generate;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

use offtune::Error;
use offtune::cache::LocalDownloadEngine;
use offtune::config::AppConfig;
use offtune::offline::completion::{completion_map, downloaded_songs};
use offtune::offline::engine::request_id_for;
use offtune::offline::{
    CollectionKind, DownloadEngine, JsonFileStore, LibraryOptions, OfflineLibrary, RequestState,
};

use super::AuthManager;

/// Everything a command needs, opened from config and keyring
struct Session {
    config: AppConfig,
    engine: Arc<LocalDownloadEngine>,
    library: OfflineLibrary,
}

async fn open_session() -> Result<Session> {
    let creds = AuthManager::load().map_err(|_| {
        Error::NotInitialized("No credentials found. Run 'offtune auth' first to configure.".to_string())
    })?;
    let config = AppConfig::load()?;

    let client = Arc::new(creds.client()?);
    let engine = Arc::new(
        LocalDownloadEngine::open(&config.cache_dir, config.parallel_downloads)
            .await
            .with_context(|| format!("Failed to open cache at {:?}", config.cache_dir))?,
    );
    let kv = Arc::new(JsonFileStore::open(config.metadata_path()).await?);

    let library = OfflineLibrary::start(
        client,
        engine.clone(),
        kv,
        LibraryOptions {
            page_size: config.page_size,
            favourites_name: config.favourites_playlist.clone(),
        },
    )
    .await?;

    Ok(Session {
        config,
        engine,
        library,
    })
}

/// Handle the `auth` command
pub async fn auth(
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    force: bool,
) -> Result<()> {
    println!("{}", "Configuring Subsonic credentials...".cyan());

    let creds = AuthManager::authenticate(url, username, password, force).await?;

    println!();
    println!("{}", "Authentication successful!".green().bold());
    println!("  Server: {}", creds.url);
    println!("  User: {}", creds.username);
    println!();
    println!("Credentials stored securely in system keyring.");

    Ok(())
}

/// Handle the `download` command
pub async fn download(kind: CollectionKind, id: &str, wait: bool) -> Result<()> {
    let session = open_session().await?;

    println!("{}", format!("Fetching {} {}...", kind, id).cyan());
    let outcome = session.library.download_collection(kind, id).await?;

    println!(
        "{} {} {} ({} songs)",
        "Saved".green().bold(),
        kind,
        outcome.collection_id,
        outcome.songs
    );
    println!("  Queued: {}", outcome.enqueued.len());
    println!("  Already on device: {}", outcome.already_present);
    if !outcome.skipped.is_empty() {
        println!(
            "  {}",
            format!("Skipped {} song(s) without a playable stream", outcome.skipped.len()).yellow()
        );
    }
    if !outcome.released.is_empty() {
        println!("  Released {} song(s) no longer in this {}", outcome.released.len(), kind);
    }

    if !wait {
        println!();
        println!(
            "Downloads continue the next time offtune runs. Use {} to stay until they finish.",
            "--wait".cyan()
        );
        return Ok(());
    }

    let members = session.library.collections(kind).await?.remove(id).unwrap_or_default();
    let (done, failed) = wait_for_downloads(&session.engine, &members).await?;

    println!();
    if failed == 0 {
        println!("{}", format!("All {} songs downloaded!", done).green().bold());
    } else {
        println!(
            "{}",
            format!("{} downloaded, {} failed. Run the download again to retry.", done, failed)
                .yellow()
        );
    }

    Ok(())
}

/// Follow engine events until every member reached a terminal state
async fn wait_for_downloads(
    engine: &LocalDownloadEngine,
    members: &BTreeSet<String>,
) -> Result<(usize, usize)> {
    let mut events = engine.subscribe();

    let progress = ProgressBar::new(members.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    loop {
        let mut done = 0;
        let mut failed = 0;
        for song in members {
            match engine.state(&request_id_for(song)).await? {
                Some(RequestState::Completed) => done += 1,
                Some(RequestState::Failed) => failed += 1,
                _ => {}
            }
        }

        progress.set_position(done as u64);
        if failed > 0 {
            progress.set_message(format!("{} failed", failed));
        }
        if done + failed >= members.len() {
            progress.finish_with_message("Downloads complete");
            return Ok((done, failed));
        }

        match events.recv().await {
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => anyhow::bail!("Download engine stopped"),
        }
    }
}

/// Handle the `remove` command
pub async fn remove(kind: CollectionKind, id: &str) -> Result<()> {
    let session = open_session().await?;

    let outcome = session.library.remove_collection_download(kind, id).await?;

    println!("{} {} {}", "Removed".green().bold(), kind, outcome.collection_id);
    println!("  Songs deleted: {}", outcome.released.len());
    if outcome.retained > 0 {
        println!("  Kept for other collections: {}", outcome.retained);
    }

    Ok(())
}

/// Handle the `status` command
pub async fn status() -> Result<()> {
    let session = open_session().await?;

    let requests = session.engine.list_requests().await?;
    let downloaded = downloaded_songs(&requests);
    let pending = requests
        .iter()
        .filter(|(_, s)| matches!(s, RequestState::Queued | RequestState::Downloading))
        .count();
    let failed = requests
        .iter()
        .filter(|(_, s)| *s == RequestState::Failed)
        .count();

    println!("Cache: {}", session.config.cache_dir.display());
    println!(
        "  {} songs, {:.1} MB",
        downloaded.len(),
        session.engine.total_bytes().await as f64 / 1_048_576.0
    );
    if pending > 0 {
        println!("  {}", format!("{} waiting to download", pending).cyan());
    }
    if failed > 0 {
        println!("  {}", format!("{} failed", failed).red());
    }
    println!();

    for kind in CollectionKind::ALL {
        let memberships = session.library.collections(kind).await?;
        let completion = completion_map(&memberships, &downloaded);

        println!("{}", format!("Offline {}s: {}", kind, memberships.len()).green().bold());
        for (id, members) in &memberships {
            let have = members.intersection(&downloaded).count();
            let marker = if completion.get(id).copied().unwrap_or(false) {
                "done".green()
            } else {
                format!("{}/{}", have, members.len()).yellow()
            };
            println!("  {} [{}]", id, marker);
        }
        println!();
    }

    Ok(())
}

/// Handle the `favourites sync` command
pub async fn sync_favourites() -> Result<()> {
    let session = open_session().await?;

    println!("{}", "Syncing favourites playlist...".cyan());
    let report = session.library.sync_favourites().await?;

    if report.is_noop() {
        println!("{}", "Favourites playlist is up to date.".green());
    } else {
        println!("{}", "Favourites playlist updated!".green().bold());
        println!("  Added: {}", report.added.len());
        println!("  Removed: {}", report.removed.len());
    }
    println!("  Playlist: {}", report.playlist_id);

    Ok(())
}

/// Handle the `favourites set` command
pub async fn set_favourite(song_id: &str, favourite: bool) -> Result<()> {
    let session = open_session().await?;

    let report = session.library.set_favourite(song_id, favourite).await?;

    let verb = if favourite { "Starred" } else { "Unstarred" };
    println!("{} {}", verb.green().bold(), song_id);
    println!(
        "  Favourites playlist: +{} -{}",
        report.added.len(),
        report.removed.len()
    );

    Ok(())
}

/// Handle the `completion` command
pub fn completion(shell: clap_complete::Shell) {
    let mut cmd = super::Cli::command();
    generate(shell, &mut cmd, "offtune", &mut io::stdout());
}

impl super::Cli {
    fn command() -> clap::Command {
        <Self as clap::CommandFactory>::command()
    }
}
