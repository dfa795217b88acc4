// audiofeed-core - Audiobook chapter rendering for podcast feeds
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


use anyhow::{Context, Result};
use audiofeed_core::audio::{resolve_paths, FfprobeProber, FileProber};
use audiofeed_core::logging::init_logging;
use audiofeed_core::{RenderConfig, RenderEntry, RenderMode, RenderOrchestrator, RenderState};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "audiofeed-render")]
#[command(about = "Audiofeed render tool - probe, chapter and render audiobooks", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter (overridden by RUST_LOG)
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the probed metadata of one file as JSON
    Probe {
        /// Audio file
        file: PathBuf,
    },
    /// Print the resolved chapters of an ordered file list
    Chapters {
        /// Audio files in playback order
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Do not synthesize one chapter per file when none are embedded
        #[arg(long)]
        no_fallback: bool,
    },
    /// Render one audiobook directory and wait for the result
    Render {
        /// Directory holding the audiobook's audio files
        dir: PathBuf,
        /// SINGLEFILE, CHAPTERS or SEGMENTED
        #[arg(short, long, default_value = "CHAPTERS")]
        mode: RenderMode,
        /// Entry id (defaults to the directory name)
        #[arg(long)]
        id: Option<String>,
        /// Book title used for chapter file names
        #[arg(long)]
        title: Option<String>,
        /// Partial hash seed
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log.as_deref());

    let config = match &cli.config {
        Some(path) => RenderConfig::load(path)
            .await
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RenderConfig::default(),
    };

    match cli.command {
        Commands::Probe { file } => {
            let prober = FfprobeProber::new(&config.ffprobe_path);
            let info = prober
                .probe(&file)
                .await
                .with_context(|| format!("probing {}", file.display()))?;
            println!("{}", serde_json::to_string_pretty(&info.to_json_value())?);
        }
        Commands::Chapters { files, no_fallback } => {
            let prober = FfprobeProber::new(&config.ffprobe_path);
            let chapters = resolve_paths(&prober, &files, !no_fallback).await?;
            for (path, chapter) in chapters {
                println!(
                    "{:>4}  {:>10.3}  {:>10.3}  {}  ({})",
                    chapter.num,
                    chapter.start_time,
                    chapter.end_time,
                    chapter.title.as_deref().unwrap_or("-"),
                    path.display()
                );
            }
        }
        Commands::Render {
            dir,
            mode,
            id,
            title,
            seed,
        } => {
            let dir = dir
                .canonicalize()
                .with_context(|| format!("resolving {}", dir.display()))?;
            let id = match id {
                Some(id) => id,
                None => dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .context("directory has no name, pass --id")?,
            };
            let entry = RenderEntry {
                id,
                path: dir,
                title,
                hash_seed: seed,
                ..RenderEntry::default()
            };

            let orchestrator = RenderOrchestrator::from_config(config);
            let out_dir = orchestrator.output_dir(&entry, mode);
            match orchestrator.trigger(&entry, mode).await? {
                RenderState::Rendering => {
                    println!("Rendering into {}", out_dir.display());
                    orchestrator.wait_idle(&entry, mode).await?;
                }
                state => println!("Nothing to render ({:?})", state),
            }

            match orchestrator.state(&entry, mode).await {
                RenderState::Complete => println!("Complete: {}", out_dir.display()),
                RenderState::Default => println!("Default: originals are served as-is"),
                state => anyhow::bail!("render did not complete ({:?}), see log", state),
            }
        }
    }

    Ok(())
}
