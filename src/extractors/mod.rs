use std::collections::BTreeMap;

use bitmask_enum::bitmask;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::download::{Fetch, HttpFetcher};
use crate::extractors::pmvhaven::PmvHaven;

pub(crate) mod meta;
pub mod pmvhaven;

macro_rules! extractor_name_for_url {
    ($url:expr, $ext:ty $(, $tail:ty)* $(,)?) => {
        if <$ext>::supports_url($url) {
            Some(<$ext>::DISPLAY_NAME)
        } else {
            extractor_name_for_url!($url, $($tail),*)
        }
    };
    ($url:expr $(,)?) => {
        None
    };
}

macro_rules! extractor_supports_source {
    ($extractor:expr, $ext:ty $(, $tail:ty)* $(,)?) => {
        if <$ext>::NAMES.iter().any(|name| $extractor.eq_ignore_ascii_case(name)) {
            Some(<$ext>::supported_from().contains(SupportedFrom::Source))
        } else {
            extractor_supports_source!($extractor, $($tail),*)
        }
    };
    ($extractor:expr $(,)?) => {
        None
    };
}

macro_rules! extract_video {
    ($from:expr, $ext:ty $(, $tail:ty)* $(,)?) => {
        if <$ext>::supports_url($from.url()) {
            Some(<$ext>::extract_video($from).await)
        } else {
            extract_video!($from, $($tail),*)
        }
    };
    ($from:expr $(,)?) => {
        None
    };
}

macro_rules! create_functions_for_extractors {
    ($( $ext:ty ),* $(,)?) => {
        pub fn extractor_name_for_url(url: &str) -> Option<&'static str> {
            extractor_name_for_url!(url, $($ext),*)
        }

        pub fn exists_extractor_for_url(url: &str) -> bool {
            extractor_name_for_url(url).is_some()
        }

        pub fn extractor_supports_source(extractor: &str) -> Option<bool> {
            extractor_supports_source!(extractor, $($ext),*)
        }

        pub async fn extract_video(from: ExtractFrom) -> Option<Result<VideoInfo, anyhow::Error>> {
            extract_video!(from, $($ext),*)
        }
    };
    () => {};
}

create_functions_for_extractors! {
    PmvHaven,
}

#[derive(Debug, Clone)]
pub enum ExtractFrom {
    Url {
        url: String,
        user_agent: Option<String>,
        referer: Option<String>,
    },
    /// Page markup that was already obtained, together with the url it came
    /// from.
    Source { url: String, source: String },
}

impl ExtractFrom {
    pub fn url(&self) -> &str {
        match self {
            ExtractFrom::Url { url, .. } => url,
            ExtractFrom::Source { url, .. } => url,
        }
    }

    /// Returns the page url and its markup, fetching it if needed.
    pub async fn get_source(self) -> Result<(String, String), anyhow::Error> {
        match self {
            ExtractFrom::Url {
                url,
                user_agent,
                referer,
            } => {
                let source = HttpFetcher::new(user_agent)
                    .fetch_text(&url, referer.as_deref())
                    .await?;
                Ok((url, source))
            }
            ExtractFrom::Source { url, source } => Ok((url, source)),
        }
    }
}

#[bitmask]
pub enum SupportedFrom {
    Url,
    Source,
}

/// Normalized metadata of a single video.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoInfo {
    pub id: String,
    pub title: Option<String>,
    pub age_limit: u8,
    pub uploader: Option<String>,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub music: Vec<String>,
    pub creator: Option<String>,
    pub stars: Vec<String>,
    pub description: Option<String>,
    pub duration: Option<u64>,
    pub view_count: Option<u64>,
    pub upload_date: Option<String>,
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub thumbnails: Vec<Thumbnail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    pub formats: Vec<Format>,
    #[serde(flatten)]
    pub dimensions: Option<Dimensions>,
}

impl VideoInfo {
    pub const AGE_LIMIT: u8 = 18;

    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            age_limit: Self::AGE_LIMIT,
            uploader: None,
            categories: Vec::new(),
            tags: Vec::new(),
            music: Vec::new(),
            creator: None,
            stars: Vec::new(),
            description: None,
            duration: None,
            view_count: None,
            upload_date: None,
            thumbnail: None,
            thumbnails: Vec::new(),
            timestamp: None,
            formats: Vec::new(),
            dimensions: None,
        }
    }
}

/// Width and height of a video, always known together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

impl Serialize for Dimensions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Dimensions", 3)?;
        state.serialize_field("width", &self.width)?;
        state.serialize_field("height", &self.height)?;
        state.serialize_field("resolution", &self.resolution())?;
        state.end()
    }
}

/// A directly playable media url.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Format {
    pub url: String,
    pub ext: &'static str,
    pub http_headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Thumbnail {
    pub url: String,
}

pub trait Extractor {
    const DISPLAY_NAME: &'static str;
    const NAMES: &'static [&'static str];

    fn supported_from() -> SupportedFrom;

    fn supports_url(url: &str) -> bool;

    async fn extract_video(from: ExtractFrom) -> Result<VideoInfo, anyhow::Error>;
}

pub mod utils {
    use once_cell::sync::Lazy;
    use regex::Regex;
    use url::Url;

    /// Checks for an `http(s)` url on `host` without credentials or port and
    /// with a non-empty path.
    pub fn is_url_host_and_has_path(url: &str, host: &str, allow_http: bool, allow_www: bool) -> bool {
        let Ok(url) = Url::parse(url) else {
            return false;
        };

        let scheme = url.scheme();
        let is_correct_scheme = scheme == "https" || (allow_http && scheme == "http");
        let no_credentials = url.username().is_empty() && url.password().is_none();

        let is_same_host = url.host_str().is_some_and(|url_host| {
            let url_host = if allow_www {
                url_host.strip_prefix("www.").unwrap_or(url_host)
            } else {
                url_host
            };

            host.eq_ignore_ascii_case(url_host)
        });

        let path = url.path();
        let has_path = !path.strip_prefix('/').unwrap_or(path).is_empty();

        is_correct_scheme && no_credentials && url.port().is_none() && is_same_host && has_path
    }

    /// Makes a scraped media url absolute and percent-encodes its path. Query
    /// and fragment are kept as they are.
    pub fn normalize_media_url(raw: &str) -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }

        let has_scheme = ["https://", "http://"].iter().any(|scheme| {
            trimmed
                .get(..scheme.len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
        });

        let absolute = if has_scheme {
            trimmed.to_string()
        } else {
            format!("https://{}", trimmed.trim_start_matches('/'))
        };

        let split_at = absolute.find(['?', '#']).unwrap_or(absolute.len());
        let (base, rest) = absolute.split_at(split_at);

        match Url::parse(base) {
            Ok(parsed) => Some(format!("{}{}", parsed.as_str(), rest)),
            Err(_) => Some(absolute),
        }
    }

    /// Height in pixels from a `<digits>p` token in the url path, e.g.
    /// `/1080p/` or `_720p.mp4`.
    pub fn height_from_url(url: &str) -> Option<u32> {
        static HEIGHT_REGEX: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"(?:^|[^0-9A-Za-z])([0-9]{3,4})p(?:[^0-9A-Za-z]|$)").unwrap());

        let path = url.split(['?', '#']).next().unwrap_or(url);
        HEIGHT_REGEX
            .captures(path)
            .and_then(|captures| captures.get(1))
            .and_then(|height| height.as_str().parse::<u32>().ok())
            .filter(|height| *height > 0)
    }

}

#[cfg(test)]
mod tests {
    use super::{Dimensions, VideoInfo};

    #[test]
    fn test_serialize_without_dimensions() {
        let info = VideoInfo::new("abc");
        let json = serde_json::to_value(&info).unwrap();

        assert_eq!(json["id"], "abc");
        assert_eq!(json["age_limit"], 18);
        assert!(json["title"].is_null());
        assert_eq!(json["tags"], serde_json::json!([]));
        assert!(json.get("width").is_none());
        assert!(json.get("height").is_none());
        assert!(json.get("resolution").is_none());
        assert!(json.get("thumbnails").is_none());
    }

    #[test]
    fn test_serialize_with_dimensions() {
        let mut info = VideoInfo::new("abc");
        info.dimensions = Some(Dimensions::new(1920, 1080));
        let json = serde_json::to_value(&info).unwrap();

        assert_eq!(json["width"], 1920);
        assert_eq!(json["height"], 1080);
        assert_eq!(json["resolution"], "1920x1080");
    }
}
