use std::ops::Deref;

use anyhow::Context;
use clap::Parser;
use cli::Args;
use futures_util::StreamExt as _;
use pmvdl::download::HttpFetcher;
use pmvdl::extractors::{self, ExtractFrom};
use pmvdl::playlists::{self, PlaylistEntry, PlaylistResult};

pub(crate) mod cli;
pub(crate) mod logger;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Parse arguments
    let args = cli::Args::parse();
    let url = args.url.deref();

    // Set up logger
    let logger = logger::default_logger(args.debug, args.quiet);
    let max_level = logger.filter();
    if log::set_boxed_logger(Box::new(logger)).is_ok() {
        log::set_max_level(max_level);
    }

    let result = if args.source.is_none() && playlists::exists_playlist_for_url(url) {
        extract_playlist(&args).await
    } else if extractors::exists_extractor_for_url(url) {
        extract_video(&args).await
    } else {
        log::error!("Failed to find an extractor for the url: {}", url);
        std::process::exit(1);
    };

    if let Err(err) = result {
        log::error!("{:#}", err);
        std::process::exit(1);
    }
}

async fn extract_video(args: &Args) -> Result<(), anyhow::Error> {
    let url = args.url.deref();

    let from = match &args.source {
        Some(path) => {
            let extractor_name = extractors::extractor_name_for_url(url).context("no extractor for the url")?;
            if !extractors::extractor_supports_source(extractor_name).unwrap_or(false) {
                anyhow::bail!("The extractor \"{}\" does not support page source", extractor_name);
            }

            let source = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read page source from {}", path.display()))?;

            ExtractFrom::Source {
                url: url.to_owned(),
                source,
            }
        }
        None => ExtractFrom::Url {
            url: url.to_owned(),
            user_agent: args.user_agent.clone(),
            referer: None,
        },
    };

    let info = match extractors::extract_video(from).await {
        Some(result) => result.context("Failed to extract video")?,
        None => anyhow::bail!("Failed to find an extractor for the url: {}", url),
    };

    log::info!("Extracted video {} with {} format(s)", info.id, info.formats.len());
    print_json(&serde_json::to_value(&info)?, args.dump_single_json)
}

async fn extract_playlist(args: &Args) -> Result<(), anyhow::Error> {
    let url = args.url.deref();
    let fetcher = HttpFetcher::new(args.user_agent.clone());

    let PlaylistResult { id, title, entries } = match playlists::extract_playlist(url, fetcher).await {
        Some(result) => result.context("Failed to get playlist")?,
        None => anyhow::bail!("Failed to find a playlist extractor for the url: {}", url),
    };

    log::info!("Playlist {}: {}", id, title);

    let mut entries = match args.playlist_end.inner() {
        Some(end) => entries.take(end.get()).boxed_local(),
        None => entries,
    };

    let mut collected = Vec::new();
    let mut count = 0usize;

    while let Some(entry) = entries.next().await {
        let entry = entry.context("Failed to get playlist entries")?;
        count += 1;

        let value = if args.flat_playlist {
            serde_json::to_value(&entry)?
        } else {
            resolve_entry(entry, args.user_agent.clone()).await?
        };

        if args.dump_single_json {
            collected.push(value);
        } else {
            print_json(&value, false)?;
        }
    }

    log::info!("Playlist {} has {} entries", id, count);

    if args.dump_single_json {
        let playlist = serde_json::json!({
            "_type": "playlist",
            "id": id,
            "title": title,
            "entries": collected,
        });
        print_json(&playlist, true)?;
    }

    Ok(())
}

/// Extracts the video behind a playlist entry. If that fails the entry is
/// returned as it is.
async fn resolve_entry(entry: PlaylistEntry, user_agent: Option<String>) -> Result<serde_json::Value, anyhow::Error> {
    log::debug!("Resolving video {}", entry.id);

    let from = ExtractFrom::Url {
        url: entry.url.clone(),
        user_agent,
        referer: None,
    };

    let value = match extractors::extract_video(from).await {
        Some(Ok(mut info)) => {
            entry.merge_into(&mut info);
            serde_json::to_value(info)?
        }
        Some(Err(err)) => {
            log::warn!("Failed to resolve video {}: {:#}", entry.url, err);
            serde_json::to_value(entry)?
        }
        None => {
            log::warn!("Failed to find an extractor for the url: {}", entry.url);
            serde_json::to_value(entry)?
        }
    };

    Ok(value)
}

fn print_json(value: &serde_json::Value, pretty: bool) -> Result<(), anyhow::Error> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };

    println!("{}", json);
    Ok(())
}
