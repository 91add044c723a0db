use std::collections::HashSet;

use anyhow::Context;
use futures_util::{stream, StreamExt as _, TryStreamExt as _};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use url::Url;

use super::{PlaylistEntry, PlaylistExtractor, PlaylistResult};
use crate::download::Fetch;
use crate::extractors::meta::{collapse_whitespace, meta_property, non_empty, page_title};
use crate::extractors::pmvhaven::{video_url, PmvHaven, BASE_URL, HOST};
use crate::extractors::utils::is_url_host_and_has_path;
use crate::extractors::{Extractor, Thumbnail};

const VIDEOS_API_URL: &str = "https://pmvhaven.com/api/videos";
const PAGE_SIZE: u32 = 20;

const PROFILE_TITLE_SUFFIXES: [&str; 2] = ["'s Profile", "\u{2019}s Profile"];

pub struct PmvHavenUser;

impl PlaylistExtractor for PmvHavenUser {
    const DISPLAY_NAME: &'static str = "PMVHaven User";

    fn supports_url(url: &str) -> bool {
        profile_slug(url).is_some()
    }

    async fn extract_playlist<F: Fetch + Clone + 'static>(
        url: &str,
        fetcher: F,
    ) -> Result<PlaylistResult, anyhow::Error> {
        let slug = profile_slug(url).with_context(|| format!("PMVHaven User: not a profile url: {}", url))?;
        let source = fetcher
            .fetch_text(url, None)
            .await
            .context("PMVHaven User: failed to get profile page")?;
        let profile = ProfilePage::parse(url, &slug, &source);

        log::debug!(
            "PMVHaven User: profile {} has uploader id {} and title {:?}",
            slug,
            profile.uploader_id,
            profile.title
        );

        let mut pager = VideoPager::new(fetcher, &profile.uploader_id, &profile.title, url);
        // pages whose videos were all skipped do not decide the strategy yet
        let first_page = loop {
            match pager.next_page().await? {
                Some(entries) if entries.is_empty() => continue,
                first_page => break first_page,
            }
        };

        let entries = match first_page {
            Some(first_page) => {
                let next_pages = stream::try_unfold(pager, |mut pager| async move {
                    Ok::<_, anyhow::Error>(pager.next_page().await?.map(|entries| (entries, pager)))
                });

                stream::iter([Ok::<_, anyhow::Error>(first_page)])
                    .chain(next_pages)
                    .map_ok(|entries| stream::iter(entries.into_iter().map(Ok)))
                    .try_flatten()
                    .boxed_local()
            }
            None => {
                log::info!(
                    "PMVHaven User: no videos from api for {}, using {} video link(s) of the profile page",
                    slug,
                    profile.linked_entries.len()
                );
                stream::iter(profile.linked_entries.into_iter().map(Ok)).boxed_local()
            }
        };

        Ok(PlaylistResult {
            id: profile.uploader_id,
            title: profile.title,
            entries,
        })
    }
}

/// Slug of a profile url, `/profile/<slug>`.
pub fn profile_slug(url: &str) -> Option<String> {
    static PROFILE_PATH_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^/profile/([\w.-]+)/?$").unwrap());

    if !is_url_host_and_has_path(url, HOST, true, true) {
        return None;
    }

    let parsed_url = Url::parse(url).ok()?;
    PROFILE_PATH_REGEX
        .captures(parsed_url.path())
        .and_then(|captures| captures.get(1))
        .map(|slug| slug.as_str().to_string())
}

struct ProfilePage {
    uploader_id: String,
    title: String,
    /// Video links of the page itself, used when the api has nothing.
    linked_entries: Vec<PlaylistEntry>,
}

impl ProfilePage {
    fn parse(url: &str, slug: &str, source: &str) -> Self {
        let document = Html::parse_document(source);

        Self {
            uploader_id: banner_uploader_id(source).unwrap_or_else(|| slug.to_string()),
            title: profile_title(&document).unwrap_or_else(|| slug.to_string()),
            linked_entries: linked_entries(url, &document),
        }
    }
}

/// The backend id of the uploader, taken from the url of the profile banner.
fn banner_uploader_id(source: &str) -> Option<String> {
    static BANNER_URL_REGEX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r#"[^"'<>\s()]*(?i:banner)[^"'<>\s()]*"#).unwrap());

    BANNER_URL_REGEX
        .find_iter(source)
        .find_map(|banner_url| object_id(banner_url.as_str()))
}

fn object_id(text: &str) -> Option<String> {
    static OBJECT_ID_REGEX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"(?:^|[^0-9a-fA-F])([0-9a-fA-F]{24})(?:[^0-9a-fA-F]|$)").unwrap());

    OBJECT_ID_REGEX
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str().to_string())
}

fn profile_title(document: &Html) -> Option<String> {
    meta_property(document, "og:title")
        .map(|title| {
            PROFILE_TITLE_SUFFIXES
                .iter()
                .find_map(|suffix| title.strip_suffix(suffix))
                .unwrap_or(title)
                .trim()
        })
        .filter(|title| !title.is_empty())
        .map(str::to_string)
        .or_else(|| page_title(document))
}

fn linked_entries(url: &str, document: &Html) -> Vec<PlaylistEntry> {
    static ANCHOR_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());
    static LINKED_ID_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"_([0-9a-fA-F]{24})/?$").unwrap());

    let Ok(base_url) = Url::parse(url).or_else(|_| Url::parse(BASE_URL)) else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for anchor in document.select(&ANCHOR_SELECTOR) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };

        if !href.contains("/video/") {
            continue;
        }

        let Ok(video_url) = base_url.join(href.trim()) else {
            log::trace!("PMVHaven User: skipping unparsable link: {}", href);
            continue;
        };

        if !is_url_host_and_has_path(video_url.as_str(), HOST, true, true) {
            log::trace!("PMVHaven User: skipping foreign link: {}", href);
            continue;
        }

        let Some(id) = LINKED_ID_REGEX
            .captures(video_url.path())
            .and_then(|captures| captures.get(1))
            .map(|id| id.as_str().to_string())
        else {
            log::trace!("PMVHaven User: skipping link without video id: {}", href);
            continue;
        };

        if !seen.insert(id.clone()) {
            continue;
        }

        let title = non_empty(anchor.value().attr("title"))
            .or_else(|| non_empty(anchor.value().attr("aria-label")))
            .map(str::to_string)
            .or_else(|| Some(collapse_whitespace(&anchor.text().collect::<String>())).filter(|text| !text.is_empty()))
            .unwrap_or_else(|| id.clone());

        entries.push(PlaylistEntry::new(PmvHaven::DISPLAY_NAME, video_url.into(), id, title));
    }

    entries
}

/// Walks the paginated videos api of one uploader.
struct VideoPager<F> {
    fetcher: F,
    uploader_id: String,
    uploader_name: String,
    referer: String,
    page: u32,
    total_pages: Option<u32>,
    total_pages_read: bool,
    finished: bool,
    seen: HashSet<String>,
}

impl<F: Fetch> VideoPager<F> {
    fn new(fetcher: F, uploader_id: &str, uploader_name: &str, referer: &str) -> Self {
        Self {
            fetcher,
            uploader_id: uploader_id.to_string(),
            uploader_name: uploader_name.to_string(),
            referer: referer.to_string(),
            page: 1,
            total_pages: None,
            total_pages_read: false,
            finished: false,
            seen: HashSet::new(),
        }
    }

    /// Entries of the next page, `None` once the api is exhausted. A page can
    /// yield no entries when all its videos were skipped.
    async fn next_page(&mut self) -> Result<Option<Vec<PlaylistEntry>>, anyhow::Error> {
        if self.finished {
            return Ok(None);
        }

        if self.total_pages.is_some_and(|total_pages| self.page > total_pages) {
            log::debug!("PMVHaven User: reached last page {}", self.page - 1);
            self.finished = true;
            return Ok(None);
        }

        let page_url = videos_page_url(&self.uploader_id, self.page);
        let json = self
            .fetcher
            .fetch_json(&page_url, Some(&self.referer))
            .await
            .with_context(|| format!("PMVHaven User: failed to get videos page {}", self.page))?;

        let videos = page_videos(&json);
        if videos.is_empty() {
            log::debug!("PMVHaven User: page {} is empty", self.page);
            self.finished = true;
            return Ok(None);
        }

        if !self.total_pages_read {
            self.total_pages = page_count(&json);
            self.total_pages_read = true;
        }

        log::trace!(
            "PMVHaven User: page {} has {} video(s), total pages: {:?}",
            self.page,
            videos.len(),
            self.total_pages
        );
        self.page += 1;

        let entries = videos
            .iter()
            .filter_map(|video| api_entry(video, &self.uploader_name))
            .filter(|entry| self.seen.insert(entry.id.clone()))
            .collect();

        Ok(Some(entries))
    }
}

fn videos_page_url(uploader_id: &str, page: u32) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("uploader", uploader_id)
        .append_pair("limit", &PAGE_SIZE.to_string())
        .append_pair("page", &page.to_string())
        .finish();

    format!("{}?{}", VIDEOS_API_URL, query)
}

fn page_videos(json: &Value) -> &[Value] {
    json.get("videos")
        .or_else(|| json.get("data"))
        .and_then(|videos| videos.as_array().or_else(|| videos.get("videos")?.as_array()))
        .or_else(|| json.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn page_count(json: &Value) -> Option<u32> {
    json.get("totalPages")
        .or_else(|| json.pointer("/pagination/totalPages"))
        .and_then(value_as_u64)
        .and_then(|total_pages| u32::try_from(total_pages).ok())
}

fn api_entry(video: &Value, uploader_name: &str) -> Option<PlaylistEntry> {
    let id = ["_id", "id"]
        .iter()
        .find_map(|key| value_as_string(video.get(key)?))?;
    let title = video
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| id.clone());

    let mut entry = PlaylistEntry::new(PmvHaven::DISPLAY_NAME, video_url(&id), id, title);
    entry.timestamp = ["isoDate", "createdAt"]
        .iter()
        .find_map(|key| value_as_timestamp(video.get(key)?));
    entry.thumbnails = api_thumbnails(video);
    entry.view_count = video.get("views").and_then(value_as_u64);
    entry.uploader = Some(uploader_name.to_string());

    Some(entry)
}

fn api_thumbnails(video: &Value) -> Vec<Thumbnail> {
    let from_list = video
        .get("thumbnails")
        .and_then(Value::as_array)
        .map(|thumbnails| {
            thumbnails
                .iter()
                .filter_map(|thumbnail| thumbnail.as_str().or_else(|| thumbnail.get("url")?.as_str()))
                .filter_map(|thumbnail| non_empty(Some(thumbnail)))
                .map(|url| Thumbnail { url: url.to_string() })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if !from_list.is_empty() {
        return from_list;
    }

    video
        .get("thumbnail")
        .and_then(Value::as_str)
        .and_then(|thumbnail| non_empty(Some(thumbnail)))
        .map(|url| vec![Thumbnail { url: url.to_string() }])
        .unwrap_or_default()
}

fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(string) => non_empty(Some(string)).map(str::to_string),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(string) => string.trim().parse().ok(),
        _ => None,
    }
}

/// Unix timestamp from an RFC 3339 date, an ISO 8601 date without offset
/// (read as UTC), or a number of seconds or milliseconds.
fn value_as_timestamp(value: &Value) -> Option<i64> {
    const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

    match value {
        Value::String(date) => {
            let date = date.trim();
            chrono::DateTime::parse_from_rfc3339(date)
                .map(|date| date.timestamp())
                .ok()
                .or_else(|| {
                    NAIVE_FORMATS.iter().find_map(|format| {
                        chrono::NaiveDateTime::parse_from_str(date, format)
                            .ok()
                            .map(|date| date.and_utc().timestamp())
                    })
                })
        }
        Value::Number(number) => number
            .as_i64()
            .map(|number| if number > 100_000_000_000 { number / 1000 } else { number }),
        _ => None,
    }
}
