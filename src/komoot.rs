use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{Error, Result};

const USER_AGENT_VALUE: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";
const BASE_URL: &str = "https://www.komoot.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Deserialize)]
pub struct TourSummary {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    /// ISO 8601 start time, e.g. `2024-05-01T08:12:00.000+02:00`.
    pub date: String,
    /// Metres.
    #[serde(default)]
    pub distance: f64,
    /// Seconds.
    #[serde(default)]
    pub duration: f64,
}

#[derive(Debug, Default, Deserialize)]
struct Embedded {
    #[serde(default)]
    tours: Vec<TourSummary>,
}

#[derive(Debug, Default, Deserialize)]
struct ToursPage {
    #[serde(default, rename = "_embedded")]
    embedded: Embedded,
}

/// Accepts either the bare cookie value or a pasted `komoot_session=...; other=...` string.
pub fn normalize_session_cookie(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let value = match raw.split_once("komoot_session=") {
        Some((_, rest)) => rest.split(';').next().unwrap_or_default(),
        None => raw,
    };
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Komoot API client bound to one user and session cookie.
pub struct KomootClient {
    http: reqwest::Client,
    user_id: String,
    base_url: String,
}

impl KomootClient {
    pub fn new(user_id: &str, session_cookie: &str) -> Result<Self> {
        Self::with_base_url(user_id, session_cookie, BASE_URL)
    }

    pub fn with_base_url(user_id: &str, session_cookie: &str, base_url: &str) -> Result<Self> {
        let cookie = normalize_session_cookie(session_cookie)
            .ok_or_else(|| Error::Config("KOMOOT_SESSION_COOKIE is empty".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            HeaderValue::from_static("fr-FR,fr;q=0.9,en-US;q=0.8,en;q=0.7"),
        );
        headers.insert(header::ORIGIN, HeaderValue::from_static(BASE_URL));
        headers.insert(header::DNT, HeaderValue::from_static("1"));
        headers.insert("sec-fetch-dest", HeaderValue::from_static("empty"));
        headers.insert("sec-fetch-mode", HeaderValue::from_static("cors"));
        headers.insert("sec-fetch-site", HeaderValue::from_static("same-origin"));
        headers.insert(
            header::REFERER,
            HeaderValue::from_str(&format!("{BASE_URL}/user/{user_id}/tours"))
                .map_err(|e| Error::Config(format!("invalid KOMOOT_USER_ID: {e}")))?,
        );
        let mut cookie_value = HeaderValue::from_str(&format!("komoot_session={cookie}"))
            .map_err(|e| Error::Config(format!("invalid KOMOOT_SESSION_COOKIE: {e}")))?;
        cookie_value.set_sensitive(true);
        headers.insert(header::COOKIE, cookie_value);

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT_VALUE)
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            user_id: user_id.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn tours_url(&self) -> String {
        format!("{}/api/v007/users/{}/tours/", self.base_url, self.user_id)
    }

    /// Probe the tours endpoint until the session is accepted.
    ///
    /// 401 fails immediately; 403, other statuses and network errors are
    /// retried with a pause of `3 + attempt` seconds.
    pub async fn validate_session(&self, max_retries: u32) -> Result<()> {
        for attempt in 0..max_retries {
            info!(attempt = attempt + 1, max_retries, "checking Komoot session");

            match self
                .http
                .get(self.tours_url())
                .query(&[("limit", "1")])
                .send()
                .await
            {
                Ok(resp) => match resp.status() {
                    StatusCode::OK => {
                        info!("session accepted");
                        return Ok(());
                    }
                    StatusCode::UNAUTHORIZED => return Err(Error::SessionRejected),
                    StatusCode::FORBIDDEN => warn!(
                        "403 Forbidden, Komoot is blocking the request; is the cookie expired?"
                    ),
                    status => warn!(%status, "unexpected status while checking session"),
                },
                Err(e) => warn!(error = %e, "network error while checking session"),
            }

            if attempt + 1 < max_retries {
                tokio::time::sleep(Duration::from_secs(3 + attempt as u64)).await;
            }
        }

        Err(Error::SessionUnavailable {
            attempts: max_retries,
        })
    }

    /// Most recent recorded tours, newest first.
    pub async fn recorded_tours(&self, limit: u32) -> Result<Vec<TourSummary>> {
        let resp = self
            .http
            .get(self.tours_url())
            .query(&[
                ("type", "tour_recorded"),
                ("sort_field", "date"),
                ("sort_direction", "desc"),
            ])
            .query(&[("limit", limit)])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Status {
                context: "tour list request failed".to_string(),
                status,
                body,
            });
        }

        let page: ToursPage = resp.json().await?;
        Ok(page.embedded.tours)
    }

    /// Raw GPX export of one tour.
    pub async fn tour_gpx(&self, tour_id: u64) -> Result<String> {
        let resp = self
            .http
            .get(format!("{}/api/v1/tours/{}.gpx", self.base_url, tour_id))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Status {
                context: format!("GPX download failed for tour {tour_id}"),
                status,
                body,
            });
        }

        Ok(resp.text().await?)
    }
}
