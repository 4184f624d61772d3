// Offline Core - Offline downloads for a mobile music client
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use offline_core::api::models::SongResponse;
use offline_core::download::ProgressCallback;
use offline_core::logging::{init_logging, LogFormat, LoggingConfig};
use offline_core::{DownloadManager, OfflineConfig, StoreBackend};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "offline-cli")]
#[command(about = "Offline Core CLI - Desktop testing tool", long_about = None)]
struct Cli {
    /// JSON config file (OfflineConfig)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Documents directory; used when no config file is given
    #[arg(short, long, global = true, default_value = ".")]
    documents: PathBuf,

    /// Log level for offline_core
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Song,
    Playlist,
    Album,
}

#[derive(Subcommand)]
enum Commands {
    /// Download one song from its manifest URL
    Song {
        /// Song id
        #[arg(long)]
        id: String,
        /// Song name (used in the local file name)
        #[arg(long)]
        name: String,
        /// Remote manifest URL
        #[arg(long)]
        url: String,
        /// Cover image URL
        #[arg(long)]
        image: Option<String>,
    },
    /// Show the download status of an item
    Status {
        #[arg(value_enum)]
        kind: Kind,
        id: String,
    },
    /// Delete a download and its files
    Delete {
        #[arg(value_enum)]
        kind: Kind,
        id: String,
    },
    /// List every stored download
    List,
}

fn load_config(cli: &Cli) -> anyhow::Result<OfflineConfig> {
    let config = match &cli.config {
        Some(path) => OfflineConfig::from_json_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => OfflineConfig::for_documents_dir(&cli.documents),
    };
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_logging(LoggingConfig::default().with_format(format).with_level(&cli.log_level))?;

    let config = load_config(&cli)?;
    if config.store == StoreBackend::Memory {
        println!("⚠️  Store backend is memory; nothing will be remembered after exit");
    }
    let manager = DownloadManager::from_config(config).await?;

    match cli.command {
        Commands::Song {
            id,
            name,
            url,
            image,
        } => {
            let mut song = SongResponse::new(id, name, url);
            song.image = image;

            let on_progress: ProgressCallback = Arc::new(|p| {
                println!(
                    "  {:>3}% ({}/{} files)",
                    p.progress_percent, p.completed_units, p.total_units
                );
            });

            match manager.download_song(&song, Some(on_progress)).await {
                Some(path) => println!("✅ Saved {}", path.display()),
                None => {
                    manager.shutdown().await?;
                    bail!("download of {} did not complete", song.id);
                }
            }
        }
        Commands::Status { kind, id } => {
            let (downloaded, downloading, progress) = match kind {
                Kind::Song => (
                    manager.is_downloaded(&id),
                    manager.is_downloading(&id),
                    manager.get_progress(&id),
                ),
                Kind::Playlist => (
                    manager.is_playlist_downloaded(&id),
                    manager.is_playlist_downloading(&id),
                    manager.get_playlist_progress(&id),
                ),
                Kind::Album => (
                    manager.is_album_downloaded(&id),
                    manager.is_album_downloading(&id),
                    manager.get_album_progress(&id),
                ),
            };
            println!("downloaded:  {}", downloaded);
            println!("downloading: {}", downloading);
            println!("progress:    {}%", progress);
            if let Kind::Song = kind {
                if let Some(url) = manager.playback_url(&id) {
                    println!("playback:    {}", url);
                }
            }
        }
        Commands::Delete { kind, id } => {
            let deleted = match kind {
                Kind::Song => manager.delete_download(&id).await?,
                Kind::Playlist => manager.delete_playlist_download(&id).await?,
                Kind::Album => manager.delete_album_download(&id).await?,
            };
            if deleted {
                println!("🗑  Deleted {}", id);
            } else {
                println!("Nothing stored for {}", id);
            }
        }
        Commands::List => {
            let snapshot = manager.store().snapshot();
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
    }

    manager.shutdown().await?;
    Ok(())
}
