use std::collections::{BTreeMap, HashSet};

use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use super::meta::{meta_name, meta_properties, meta_property, non_empty};
use super::utils::{height_from_url, is_url_host_and_has_path, normalize_media_url};
use super::{Dimensions, ExtractFrom, Extractor, Format, SupportedFrom, VideoInfo};

pub(crate) const HOST: &str = "pmvhaven.com";
pub(crate) const BASE_URL: &str = "https://pmvhaven.com";

const LEGACY_STORAGE_HOST: &str = r"storage\.pmvhaven\.com";
const VIDEO_DELIVERY_HOST: &str = r"video\.pmvhaven\.com";
const PREVIEW_MARKERS: [&str; 2] = ["/videoPreview/", "/preview/"];

const PROFILE_PICTURE_MARKER: &str = "/profilePictures/";
const SITE_LOGO_ALT: &str = "PMVHaven";
const THUMBNAIL_ALT_PREFIX: &str = "thumbnail at";

const MEDIA_EXT: &str = "mp4";

pub struct PmvHaven;

impl Extractor for PmvHaven {
    const DISPLAY_NAME: &'static str = "PMVHaven";
    const NAMES: &'static [&'static str] = &["PMVHaven", "pmvhaven:video"];

    fn supported_from() -> SupportedFrom {
        SupportedFrom::all()
    }

    fn supports_url(url: &str) -> bool {
        video_id(url).is_some()
    }

    async fn extract_video(from: ExtractFrom) -> Result<VideoInfo, anyhow::Error> {
        let id = video_id(from.url()).with_context(|| format!("PMVHaven: not a video url: {}", from.url()))?;
        let (url, source) = from
            .get_source()
            .await
            .context("PMVHaven: failed to get video page")?;

        Ok(parse_video_page(&url, id, &source))
    }
}

/// Id of a video page url, the part after the last underscore of
/// `/video/<title>_<id>`.
pub fn video_id(url: &str) -> Option<String> {
    static VIDEO_PATH_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/video/[^/]+_([A-Za-z0-9]+)/?$").unwrap());

    if !is_url_host_and_has_path(url, HOST, true, true) {
        return None;
    }

    let parsed_url = Url::parse(url).ok()?;
    VIDEO_PATH_REGEX
        .captures(parsed_url.path())
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str().to_string())
}

/// Permalink of a video that is only known by its id.
pub(crate) fn video_url(id: &str) -> String {
    format!("{}/video/video_{}", BASE_URL, id)
}

pub(crate) fn parse_video_page(url: &str, id: String, source: &str) -> VideoInfo {
    let document = Html::parse_document(source);
    let dimensions = extract_dimensions(&document);

    let mut info = VideoInfo::new(id);
    info.title = extract_title(&document);
    info.description = extract_description(&document);
    info.tags = extract_tags(&document);
    info.duration = extract_duration(&document);
    info.thumbnail = extract_thumbnail(&document);
    info.creator = extract_creator(&document);
    info.formats = extract_formats(&document, source, url, dimensions.as_ref());
    info.dimensions = dimensions;

    log::debug!(
        "PMVHaven: video {} has {} format(s), title: {:?}",
        info.id,
        info.formats.len(),
        info.title
    );

    info
}

fn extract_title(document: &Html) -> Option<String> {
    meta_property(document, "og:title")
        .or_else(|| meta_name(document, "twitter:title"))
        .map(str::to_string)
}

fn extract_description(document: &Html) -> Option<String> {
    meta_name(document, "description")
        .or_else(|| meta_property(document, "og:description"))
        .map(str::to_string)
}

fn extract_tags(document: &Html) -> Vec<String> {
    fn split_tags<'a>(contents: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        contents
            .into_iter()
            .flat_map(|content| content.split(", "))
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(str::to_string)
            .collect()
    }

    let tags = split_tags(meta_properties(document, "og:video:tag"));
    if !tags.is_empty() {
        return tags;
    }

    split_tags(meta_name(document, "keywords"))
}

fn extract_duration(document: &Html) -> Option<u64> {
    let content = meta_property(document, "og:video:duration")?;

    content.parse::<u64>().ok().or_else(|| {
        content
            .parse::<f64>()
            .ok()
            .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
            .map(|seconds| seconds.round() as u64)
    })
}

fn extract_thumbnail(document: &Html) -> Option<String> {
    meta_property(document, "og:image")
        .or_else(|| meta_name(document, "twitter:image"))
        .map(str::to_string)
}

fn extract_dimensions(document: &Html) -> Option<Dimensions> {
    fn pair(width: Option<&str>, height: Option<&str>) -> Option<Dimensions> {
        let width = width?.parse::<u32>().ok()?;
        let height = height?.parse::<u32>().ok()?;
        Some(Dimensions::new(width, height))
    }

    pair(
        meta_property(document, "og:video:width"),
        meta_property(document, "og:video:height"),
    )
    .or_else(|| {
        pair(
            meta_name(document, "twitter:player:width"),
            meta_name(document, "twitter:player:height"),
        )
    })
}

fn extract_creator(document: &Html) -> Option<String> {
    static IMG_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("img").unwrap());

    let from_profile_picture = || {
        document
            .select(&IMG_SELECTOR)
            .find(|img| {
                img.value()
                    .attr("src")
                    .is_some_and(|src| src.contains(PROFILE_PICTURE_MARKER))
            })
            .and_then(|img| non_empty(img.value().attr("alt")))
    };

    let from_any_alt = || {
        document
            .select(&IMG_SELECTOR)
            .filter_map(|img| non_empty(img.value().attr("alt")))
            .find(|alt| {
                !alt.eq_ignore_ascii_case(SITE_LOGO_ALT)
                    && !alt.to_ascii_lowercase().starts_with(THUMBNAIL_ALT_PREFIX)
            })
    };

    from_profile_picture().or_else(from_any_alt).map(str::to_string)
}

fn extract_formats(document: &Html, source: &str, page_url: &str, dimensions: Option<&Dimensions>) -> Vec<Format> {
    let resolution = dimensions.map(Dimensions::resolution);
    let from_meta = meta_property(document, "og:video:secure_url").or_else(|| meta_name(document, "twitter:player"));
    let mut seen = HashSet::new();

    from_meta
        .into_iter()
        .chain(scan_media_urls(source))
        .filter_map(normalize_media_url)
        .filter(|url| seen.insert(url.clone()))
        .map(|url| Format {
            height: height_from_url(&url),
            resolution: resolution.clone(),
            ext: MEDIA_EXT,
            http_headers: BTreeMap::from([("Referer".to_string(), page_url.to_string())]),
            url,
        })
        .collect()
}

/// Media urls on the storage and delivery hosts found anywhere in the
/// markup, previews only if nothing else was found.
fn scan_media_urls(source: &str) -> Vec<&str> {
    static MEDIA_URL_REGEX: Lazy<Regex> = Lazy::new(|| {
        Regex::new(&format!(
            r#"(?:https?:)?(?://)?\b(?:{}|{})/[^"'<>\s]*?\.mp4"#,
            LEGACY_STORAGE_HOST, VIDEO_DELIVERY_HOST
        ))
        .unwrap()
    });

    fn is_preview(url: &str) -> bool {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        PREVIEW_MARKERS.iter().any(|marker| path.contains(marker))
    }

    let hits = MEDIA_URL_REGEX
        .find_iter(source)
        .map(|hit| hit.as_str())
        .collect::<Vec<_>>();
    let full_videos = hits.iter().copied().filter(|hit| !is_preview(hit)).collect::<Vec<_>>();

    if full_videos.is_empty() {
        if !hits.is_empty() {
            log::debug!("PMVHaven: only preview urls found in page, keeping them");
        }
        hits
    } else {
        full_videos
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{parse_video_page, scan_media_urls, video_id, PmvHaven};
    use crate::extractors::{Dimensions, ExtractFrom, Extractor};

    const PAGE_URL: &str = "https://pmvhaven.com/video/Test-PMV_66b1f2a3c4d5e6f708192a3b";

    #[test]
    fn test_video_id() {
        assert_eq!(video_id(PAGE_URL).as_deref(), Some("66b1f2a3c4d5e6f708192a3b"));
        assert_eq!(
            video_id("http://www.pmvhaven.com/video/video_abc123/").as_deref(),
            Some("abc123")
        );
        assert_eq!(
            video_id("https://pmvhaven.com/video/some_title_with_parts_xyz789?t=10").as_deref(),
            Some("xyz789")
        );
        assert_eq!(video_id("https://pmvhaven.com/video/no-underscore"), None);
        assert_eq!(video_id("https://pmvhaven.com/video/_abc"), None);
        assert_eq!(video_id("https://pmvhaven.com/profile/someone"), None);
        assert_eq!(video_id("https://example.com/video/a_b"), None);

        assert!(PmvHaven::supports_url(PAGE_URL));
        assert!(!PmvHaven::supports_url("https://pmvhaven.com/profile/someone"));
    }

    #[tokio::test]
    async fn test_pmvhaven_meta_tags() {
        let source = r#"<html><head>
            <meta property="og:title" content="Test PMV">
            <meta name="twitter:title" content="Other Title">
            <meta name="description" content="A test video by someone">
            <meta property="og:video:duration" content="120">
            <meta property="og:video:secure_url" content="https://video.pmvhaven.com/videos/x.mp4">
            <meta property="og:image" content="https://video.pmvhaven.com/thumbnails/x.jpg">
            <meta property="og:video:tag" content="music, edit, compilation">
            </head><body></body></html>"#;

        let extracted = PmvHaven::extract_video(ExtractFrom::Source {
            url: PAGE_URL.to_string(),
            source: source.to_string(),
        })
        .await
        .unwrap();

        assert_eq!(extracted.id, "66b1f2a3c4d5e6f708192a3b");
        assert_eq!(extracted.title.as_deref(), Some("Test PMV"));
        assert_eq!(extracted.description.as_deref(), Some("A test video by someone"));
        assert_eq!(extracted.duration, Some(120));
        assert_eq!(extracted.tags, vec!["music", "edit", "compilation"]);
        assert_eq!(
            extracted.thumbnail.as_deref(),
            Some("https://video.pmvhaven.com/thumbnails/x.jpg")
        );
        assert_eq!(extracted.age_limit, 18);
        assert_eq!(extracted.dimensions, None);

        assert_eq!(extracted.formats.len(), 1);
        let format = &extracted.formats[0];
        assert_eq!(format.url, "https://video.pmvhaven.com/videos/x.mp4");
        assert_eq!(format.ext, "mp4");
        assert_eq!(
            format.http_headers.get("Referer").map(String::as_str),
            Some(PAGE_URL)
        );
        assert_eq!(format.resolution, None);
        assert_eq!(format.height, None);
    }

    #[tokio::test]
    async fn test_pmvhaven_rejects_foreign_url() {
        let extracted = PmvHaven::extract_video(ExtractFrom::Source {
            url: "https://pmvhaven.com/profile/someone".to_string(),
            source: String::new(),
        })
        .await;
        assert!(extracted.is_err());
    }

    #[test]
    fn test_fallback_meta_tags() {
        let source = r#"<html><head>
            <meta name="twitter:title" content="Twitter Title">
            <meta property="og:description" content="From og">
            <meta name="keywords" content="one, two">
            <meta name="twitter:image" content="https://video.pmvhaven.com/t.jpg">
            <meta name="twitter:player" content="//video.pmvhaven.com/videos/720p/y.mp4">
            <meta name="twitter:player:width" content="1280">
            <meta name="twitter:player:height" content="720">
            <meta property="og:video:width" content="1920">
            </head></html>"#;

        let info = parse_video_page(PAGE_URL, "id".to_string(), source);

        assert_eq!(info.title.as_deref(), Some("Twitter Title"));
        assert_eq!(info.description.as_deref(), Some("From og"));
        assert_eq!(info.tags, vec!["one", "two"]);
        assert_eq!(info.thumbnail.as_deref(), Some("https://video.pmvhaven.com/t.jpg"));
        // og pair is incomplete, the twitter pair wins as a whole
        assert_eq!(info.dimensions, Some(Dimensions::new(1280, 720)));

        assert_eq!(info.formats.len(), 1);
        assert_eq!(info.formats[0].url, "https://video.pmvhaven.com/videos/720p/y.mp4");
        assert_eq!(info.formats[0].height, Some(720));
        assert_eq!(info.formats[0].resolution.as_deref(), Some("1280x720"));
    }

    #[test]
    fn test_missing_everything() {
        let info = parse_video_page(PAGE_URL, "id".to_string(), "<html><body><p>nothing</p></body></html>");

        assert_eq!(info.title, None);
        assert_eq!(info.description, None);
        assert!(info.tags.is_empty());
        assert_eq!(info.duration, None);
        assert_eq!(info.thumbnail, None);
        assert_eq!(info.dimensions, None);
        assert_eq!(info.creator, None);
        assert!(info.formats.is_empty());
        assert_eq!(info.uploader, None);
        assert!(info.categories.is_empty());
    }

    #[test]
    fn test_unparsable_duration_is_absent() {
        let source = r#"<meta property="og:video:duration" content="two minutes">"#;
        assert_eq!(parse_video_page(PAGE_URL, "id".to_string(), source).duration, None);

        let source = r#"<meta property="og:video:duration" content="90.4">"#;
        assert_eq!(parse_video_page(PAGE_URL, "id".to_string(), source).duration, Some(90));
    }

    #[test]
    fn test_preview_urls_are_skipped() {
        let source = r#"<video src="storage.pmvhaven.com/videoPreview/a.mp4"></video>
            <script>var file = "storage.pmvhaven.com/a.mp4";</script>"#;

        let info = parse_video_page(PAGE_URL, "id".to_string(), source);
        let urls = info.formats.iter().map(|format| format.url.as_str()).collect::<Vec<_>>();
        assert_eq!(urls, vec!["https://storage.pmvhaven.com/a.mp4"]);
    }

    #[test]
    fn test_only_preview_urls_are_kept() {
        let source = r#"<video src="https://storage.pmvhaven.com/videoPreview/a.mp4"></video>
            <img src="https://video.pmvhaven.com/preview/b.mp4">"#;

        assert_eq!(
            scan_media_urls(source),
            vec![
                "https://storage.pmvhaven.com/videoPreview/a.mp4",
                "https://video.pmvhaven.com/preview/b.mp4",
            ]
        );
    }

    #[test]
    fn test_scan_ignores_other_hosts() {
        let source = r#"<a href="https://cdnvideo.pmvhaven.com/a.mp4">x</a>
            <a href="https://example.com/b.mp4">y</a>
            <a href="https://video.pmvhaven.com/c.webm">z</a>"#;

        assert!(scan_media_urls(source).is_empty());
    }

    #[test]
    fn test_formats_are_deduplicated() {
        let source = r#"<html><head>
            <meta property="og:video:secure_url" content="https://video.pmvhaven.com/videos/1080p/x.mp4">
            <meta property="og:video:width" content="1920">
            <meta property="og:video:height" content="1080">
            </head><body>
            <video><source src="https://video.pmvhaven.com/videos/1080p/x.mp4"></video>
            <script>
                const a = "//video.pmvhaven.com/videos/1080p/x.mp4";
                const b = 'https://storage.pmvhaven.com/old/x.mp4';
                const c = "https://storage.pmvhaven.com/old/x.mp4";
            </script>
            </body></html>"#;

        let info = parse_video_page(PAGE_URL, "id".to_string(), source);
        let urls = info.formats.iter().map(|format| format.url.as_str()).collect::<Vec<_>>();
        assert_eq!(
            urls,
            vec![
                "https://video.pmvhaven.com/videos/1080p/x.mp4",
                "https://storage.pmvhaven.com/old/x.mp4",
            ]
        );

        let unique = info.formats.iter().map(|format| &format.url).collect::<HashSet<_>>();
        assert_eq!(unique.len(), info.formats.len());

        assert_eq!(info.formats[0].height, Some(1080));
        assert_eq!(info.formats[1].height, None);
        assert!(info
            .formats
            .iter()
            .all(|format| format.resolution.as_deref() == Some("1920x1080")));
    }

    #[test]
    fn test_creator_from_profile_picture() {
        let source = r#"<body>
            <img src="/logo.png" alt="PMVHaven">
            <img src="/thumb.jpg" alt="Someone Else">
            <img src="https://storage.pmvhaven.com/profilePictures/abc.png" alt="Uploader Name">
            </body>"#;

        let info = parse_video_page(PAGE_URL, "id".to_string(), source);
        assert_eq!(info.creator.as_deref(), Some("Uploader Name"));
    }

    #[test]
    fn test_creator_from_alt_texts() {
        let source = r#"<body>
            <img src="/logo.png" alt="PMVHaven">
            <img src="/a.jpg" alt="">
            <img src="/b.jpg" alt="Thumbnail at 00:10">
            <img src="/c.jpg">
            <img src="/d.jpg" alt=" Creator ">
            <img src="/e.jpg" alt="Later">
            </body>"#;

        let info = parse_video_page(PAGE_URL, "id".to_string(), source);
        assert_eq!(info.creator.as_deref(), Some("Creator"));
    }
}
