use futures_util::stream::LocalBoxStream;
use serde::Serialize;

use self::pmvhaven::PmvHavenUser;
use crate::download::Fetch;
use crate::extractors::{Thumbnail, VideoInfo};

pub mod pmvhaven;

macro_rules! playlist_name_for_url {
    ($url:expr, $pl:ty $(, $tail:ty)* $(,)?) => {
        if <$pl>::supports_url($url) {
            Some(<$pl>::DISPLAY_NAME)
        } else {
            playlist_name_for_url!($url, $($tail),*)
        }
    };
    ($url:expr $(,)?) => {
        None
    };
}

macro_rules! extract_playlist {
    ($url:expr, $fetcher:expr, $pl:ty $(, $tail:ty)* $(,)?) => {
        if <$pl>::supports_url($url) {
            Some(<$pl>::extract_playlist($url, $fetcher).await)
        } else {
            extract_playlist!($url, $fetcher, $($tail),*)
        }
    };
    ($url:expr, $fetcher:expr $(,)?) => {
        None
    };
}

macro_rules! create_functions_for_playlists {
    ($( $pl:ty ),* $(,)?) => {
        pub fn playlist_name_for_url(url: &str) -> Option<&'static str> {
            playlist_name_for_url!(url, $($pl),*)
        }

        pub fn exists_playlist_for_url(url: &str) -> bool {
            playlist_name_for_url(url).is_some()
        }

        pub async fn extract_playlist<F: Fetch + Clone + 'static>(
            url: &str,
            fetcher: F,
        ) -> Option<Result<PlaylistResult, anyhow::Error>> {
            extract_playlist!(url, fetcher, $($pl),*)
        }
    };
    () => {};
}

create_functions_for_playlists! {
    PmvHavenUser,
}

/// Deferred reference to a video found while enumerating a playlist. The
/// video page itself has not been fetched.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "_type", rename = "url")]
pub struct PlaylistEntry {
    /// Display name of the extractor that resolves [Self::url].
    pub ie_key: &'static str,
    pub url: String,
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub thumbnails: Vec<Thumbnail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
}

impl PlaylistEntry {
    pub fn new(ie_key: &'static str, url: String, id: String, title: String) -> Self {
        Self {
            ie_key,
            url,
            id,
            title,
            thumbnails: Vec::new(),
            timestamp: None,
            uploader: None,
            view_count: None,
        }
    }

    /// Fills the gaps of a resolved video with what the playlist already knew.
    /// Fields present in `info` are never overwritten.
    pub fn merge_into(self, info: &mut VideoInfo) {
        info.title = info.title.take().or(Some(self.title));
        info.uploader = info.uploader.take().or(self.uploader);
        info.view_count = info.view_count.or(self.view_count);
        info.timestamp = info.timestamp.or(self.timestamp);

        if info.thumbnails.is_empty() {
            info.thumbnails = self.thumbnails;
        }
    }
}

pub struct PlaylistResult {
    pub id: String,
    pub title: String,
    /// Entries in site order, pages are fetched as the stream is polled.
    pub entries: LocalBoxStream<'static, Result<PlaylistEntry, anyhow::Error>>,
}

impl std::fmt::Debug for PlaylistResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaylistResult")
            .field("id", &self.id)
            .field("title", &self.title)
            .finish_non_exhaustive()
    }
}

pub trait PlaylistExtractor {
    const DISPLAY_NAME: &'static str;

    fn supports_url(url: &str) -> bool;

    async fn extract_playlist<F: Fetch + Clone + 'static>(
        url: &str,
        fetcher: F,
    ) -> Result<PlaylistResult, anyhow::Error>;
}
