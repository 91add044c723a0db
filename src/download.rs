use std::ops::Deref;
use std::time::Duration;

use anyhow::Context;
use once_cell::sync::Lazy;
use reqwest::header::HeaderName;
use reqwest::redirect::Policy;
use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::policies::ExponentialBackoffBuilder;
use reqwest_retry::RetryTransientMiddleware;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/116.0.0.0 Safari/537.36";

const MAX_REDIRECTS: u32 = 10;

static DEFAULT_RETRY_CLIENT_NO_REDIRECT: Lazy<ClientWithMiddleware> = Lazy::new(|| {
    let client = reqwest::Client::builder()
        .user_agent(DEFAULT_USER_AGENT)
        .connect_timeout(Duration::from_secs(20))
        .redirect(Policy::none()) // redirects handled in get_response
        .build()
        .unwrap();

    reqwest_middleware::ClientBuilder::new(client)
        .with(RetryTransientMiddleware::new_with_policy(
            ExponentialBackoffBuilder::default()
                .retry_bounds(Duration::from_secs(1), Duration::from_secs(10))
                .build_with_max_retries(5),
        ))
        .build()
});

/// Source of pages for the adapters.
///
/// [HttpFetcher] goes to the network, tests substitute canned responses.
pub trait Fetch {
    async fn fetch_text(&self, url: &str, referer: Option<&str>) -> Result<String, anyhow::Error>;

    async fn fetch_json(&self, url: &str, referer: Option<&str>) -> Result<serde_json::Value, anyhow::Error>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    user_agent: Option<String>,
}

impl HttpFetcher {
    pub fn new(user_agent: Option<String>) -> Self {
        Self { user_agent }
    }
}

impl Fetch for HttpFetcher {
    async fn fetch_text(&self, url: &str, referer: Option<&str>) -> Result<String, anyhow::Error> {
        log::debug!("Fetching page: {}", url);
        get_page_text(url, self.user_agent.as_deref(), referer, None).await
    }

    async fn fetch_json(&self, url: &str, referer: Option<&str>) -> Result<serde_json::Value, anyhow::Error> {
        log::debug!("Fetching json: {}", url);
        let extra_headers = [(reqwest::header::ACCEPT, "application/json, text/plain, */*")];
        get_page_json(url, self.user_agent.as_deref(), referer, Some(&extra_headers[..])).await
    }
}

pub(crate) async fn get_response(
    client: Option<&ClientWithMiddleware>,
    url: &str,
    user_agent: Option<&str>,
    referer: Option<&str>,
    extra_headers: Option<&[(HeaderName, &str)]>,
) -> Result<reqwest::Response, anyhow::Error> {
    // We need to handle redirects ourself, because reqwest changes the Referer
    // header on redirection
    let client = client.unwrap_or(DEFAULT_RETRY_CLIENT_NO_REDIRECT.deref());
    let mut last_url = url.to_string();
    let mut redirect_count = 0u32;

    loop {
        let mut request = client.get(&last_url);

        if let Some(user_agent) = user_agent {
            request = request.header(reqwest::header::USER_AGENT, user_agent);
        }

        request = request.header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.5");

        if let Some(referer) = referer {
            request = request.header(reqwest::header::REFERER, referer);
        }

        if let Some(extra_headers) = extra_headers {
            for (header, value) in extra_headers {
                request = request.header(header, *value);
            }
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("failed to request url: {}", last_url))?;

        let is_redirect_code = [301, 308, 302, 303, 307].contains(&response.status().as_u16());
        let location_header = response.headers().get(reqwest::header::LOCATION);

        match (is_redirect_code, location_header) {
            (true, Some(redirect_url)) => {
                if redirect_count >= MAX_REDIRECTS {
                    anyhow::bail!("more than {} redirects", MAX_REDIRECTS);
                }

                redirect_count += 1;
                let redirect_url = redirect_url
                    .to_str()
                    .context("redirect url could not be converted to string")?;

                // Location may be relative to the current url
                last_url = url::Url::parse(&last_url)
                    .and_then(|base| base.join(redirect_url))
                    .map(String::from)
                    .unwrap_or_else(|_| redirect_url.to_string());
                log::trace!("Following redirect to: {}", last_url);
            }
            _ => {
                return response
                    .error_for_status()
                    .with_context(|| format!("server returned an error for url: {}", last_url))
            }
        }
    }
}

pub(crate) async fn get_page_text(
    url: &str,
    user_agent: Option<&str>,
    referer: Option<&str>,
    extra_headers: Option<&[(HeaderName, &str)]>,
) -> Result<String, anyhow::Error> {
    get_response(None, url, user_agent, referer, extra_headers)
        .await?
        .text()
        .await
        .context("failed to parse response body as text")
}

pub(crate) async fn get_page_json(
    url: &str,
    user_agent: Option<&str>,
    referer: Option<&str>,
    extra_headers: Option<&[(HeaderName, &str)]>,
) -> Result<serde_json::Value, anyhow::Error> {
    get_response(None, url, user_agent, referer, extra_headers)
        .await?
        .json()
        .await
        .context("failed to parse response body as json")
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    use super::Fetch;

    /// In-memory [Fetch] that serves registered bodies and records every
    /// requested url.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct StaticFetcher {
        pages: Rc<HashMap<String, String>>,
        requested: Rc<RefCell<Vec<String>>>,
    }

    impl StaticFetcher {
        pub(crate) fn new<I, K, V>(pages: I) -> Self
        where
            I: IntoIterator<Item = (K, V)>,
            K: Into<String>,
            V: Into<String>,
        {
            Self {
                pages: Rc::new(pages.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
                requested: Rc::default(),
            }
        }

        pub(crate) fn requested(&self) -> Vec<String> {
            self.requested.borrow().clone()
        }
    }

    impl Fetch for StaticFetcher {
        async fn fetch_text(&self, url: &str, _referer: Option<&str>) -> Result<String, anyhow::Error> {
            self.requested.borrow_mut().push(url.to_string());
            match self.pages.get(url) {
                Some(body) => Ok(body.clone()),
                None => anyhow::bail!("404 for url: {}", url),
            }
        }

        async fn fetch_json(&self, url: &str, referer: Option<&str>) -> Result<serde_json::Value, anyhow::Error> {
            let text = self.fetch_text(url, referer).await?;
            Ok(serde_json::from_str(&text)?)
        }
    }
}
