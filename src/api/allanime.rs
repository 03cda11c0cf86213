//! AllAnime catalog client
//!
//! Talks to the AllAnime GraphQL API with plain GET requests (query and
//! variables URL-encoded). Episode sources come back as obfuscated paths:
//! a `--` prefix followed by hex bytes XOR'd with 56. Decoded paths point at
//! a `clock.json` endpoint listing the actual links per resolution.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use super::provider::Provider;
use crate::models::{Episode, Language, StreamDescriptor, Title};

const DEFAULT_API_URL: &str = "https://api.allanime.day";
const DEFAULT_EMBED_URL: &str = "https://allanime.day";
/// Referer the API expects on every request
const API_REFERER: &str = "https://allmanga.to";
const SEARCH_LIMIT: u32 = 40;
/// Key the source paths are XOR'd with
const SOURCE_KEY: u8 = 56;

const SEARCH_GQL: &str = "query( $search: SearchInput $limit: Int $page: Int $translationType: VaildTranslationTypeEnumType $countryOrigin: VaildCountryOriginEnumType ) { shows( search: $search limit: $limit page: $page translationType: $translationType countryOrigin: $countryOrigin ) { edges { _id name availableEpisodes __typename } }}";
const SHOW_GQL: &str =
    "query ($showId: String!) { show( _id: $showId ) { _id name availableEpisodes availableEpisodesDetail }}";
const EPISODE_GQL: &str = "query ($showId: String!, $translationType: VaildTranslationTypeEnumType!, $episodeString: String!) { episode( showId: $showId translationType: $translationType episodeString: $episodeString ) { episodeString sourceUrls }}";

/// Errors from the AllAnime API
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("AllAnime returned HTTP {0}")]
    Http(u16),
    #[error("Unexpected response: {0}")]
    InvalidResponse(String),
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SearchData {
    shows: ShowConnection,
}

#[derive(Debug, Deserialize)]
struct ShowConnection {
    #[serde(default)]
    edges: Vec<ShowEdge>,
}

#[derive(Debug, Deserialize)]
struct ShowEdge {
    #[serde(rename = "_id")]
    id: String,
    name: String,
    #[serde(rename = "availableEpisodes", default)]
    available_episodes: Option<AvailableEpisodes>,
}

#[derive(Debug, Default, Deserialize)]
struct AvailableEpisodes {
    #[serde(default)]
    sub: Option<u32>,
    #[serde(default)]
    dub: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ShowData {
    show: Option<ShowDetail>,
}

#[derive(Debug, Deserialize)]
struct ShowDetail {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "availableEpisodes", default)]
    available_episodes: Option<AvailableEpisodes>,
    #[serde(rename = "availableEpisodesDetail", default)]
    episodes_detail: Option<EpisodesDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct EpisodesDetail {
    #[serde(default)]
    sub: Vec<String>,
    #[serde(default)]
    dub: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EpisodeData {
    episode: Option<EpisodeSources>,
}

#[derive(Debug, Deserialize)]
struct EpisodeSources {
    #[serde(rename = "sourceUrls", default)]
    source_urls: Vec<SourceUrl>,
}

#[derive(Debug, Deserialize)]
struct SourceUrl {
    #[serde(rename = "sourceUrl")]
    source_url: String,
    #[serde(rename = "sourceName", default)]
    source_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClockResponse {
    #[serde(default)]
    links: Vec<ClockLink>,
}

#[derive(Debug, Deserialize)]
struct ClockLink {
    link: String,
    #[serde(rename = "resolutionStr", default)]
    resolution_str: Option<String>,
}

impl ShowEdge {
    fn into_title(self) -> Title {
        let counts = self.available_episodes.unwrap_or_default();
        Title {
            id: self.id,
            name: self.name,
            sub_episodes: counts.sub,
            dub_episodes: counts.dub,
        }
    }
}

// =============================================================================
// Decoding helpers
// =============================================================================

/// Decode an obfuscated `--<hex>` source path; None if it is not one
pub fn decode_source_path(encoded: &str) -> Option<String> {
    let hex = encoded.strip_prefix("--")?;
    if !hex.is_ascii() || hex.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok().map(|b| b ^ SOURCE_KEY))
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

/// Vertical resolution from a label like `1080p`; 0 when there is none
pub fn parse_resolution(label: &str) -> u32 {
    let Some(re) = regex::Regex::new(r"(\d{3,4})p").ok() else {
        return 0;
    };
    re.captures(label)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Referrer the CDN behind `url` expects
pub fn referrer_for_url(url: &str) -> &'static str {
    if url.contains("fast4speed") {
        "https://allanime.day"
    } else if url.contains("sunshinerays") {
        "https://allanime.to"
    } else {
        "https://allanime.day"
    }
}

// =============================================================================
// Client
// =============================================================================

/// AllAnime GraphQL client
pub struct AllAnimeClient {
    api_url: String,
    embed_url: String,
    client: reqwest::Client,
}

impl AllAnimeClient {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_API_URL, DEFAULT_EMBED_URL)
    }

    /// Client against custom API and embed hosts (for testing)
    pub fn with_base_url(api_url: impl Into<String>, embed_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            embed_url: embed_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::REFERER, API_REFERER)
            .header(reqwest::header::USER_AGENT, crate::stream::USER_AGENT)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Http(status.as_u16()));
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }

    async fn graphql<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T, ProviderError> {
        let url = format!("{}/api", self.api_url);
        let response: GraphQlResponse<T> = self
            .get_json(
                &url,
                &[
                    ("variables", variables.to_string()),
                    ("query", query.to_string()),
                ],
            )
            .await?;
        response
            .data
            .ok_or_else(|| ProviderError::InvalidResponse("missing data".to_string()))
    }

    /// Search titles by name
    pub async fn search_titles(
        &self,
        query: &str,
        language: Language,
    ) -> Result<Vec<Title>, ProviderError> {
        let variables = json!({
            "search": {"allowAdult": false, "allowUnknown": false, "query": query},
            "limit": SEARCH_LIMIT,
            "page": 1,
            "translationType": language.as_str(),
            "countryOrigin": "ALL",
        });
        let data: SearchData = self.graphql(SEARCH_GQL, variables).await?;
        Ok(data
            .shows
            .edges
            .into_iter()
            .filter(|e| !e.id.trim().is_empty() && !e.name.trim().is_empty())
            .map(ShowEdge::into_title)
            .collect())
    }

    async fn show(&self, id: &str) -> Result<Option<ShowDetail>, ProviderError> {
        let data: ShowData = self.graphql(SHOW_GQL, json!({ "showId": id })).await?;
        Ok(data.show)
    }

    /// Look up one title by id
    pub async fn fetch_title(&self, id: &str) -> Result<Option<Title>, ProviderError> {
        let Some(show) = self.show(id).await? else {
            return Ok(None);
        };
        let Some(name) = show.name.filter(|n| !n.trim().is_empty()) else {
            return Ok(None);
        };
        let counts = show.available_episodes.unwrap_or_default();
        Ok(Some(Title {
            id: show.id,
            name,
            sub_episodes: counts.sub,
            dub_episodes: counts.dub,
        }))
    }

    /// Episode numbers for a title, ascending
    pub async fn fetch_episodes(
        &self,
        id: &str,
        language: Language,
    ) -> Result<Vec<Episode>, ProviderError> {
        let Some(show) = self.show(id).await? else {
            return Ok(Vec::new());
        };
        let detail = show.episodes_detail.unwrap_or_default();
        let labels = match language {
            Language::Sub => detail.sub,
            Language::Dub => detail.dub,
        };

        let mut episodes: Vec<Episode> = labels
            .iter()
            .filter_map(|label| label.parse().ok())
            .collect();
        episodes.sort_by(|a, b| a.number().total_cmp(&b.number()));
        episodes.dedup();
        Ok(episodes)
    }

    /// Every stream the provider offers for one episode
    pub async fn fetch_streams(
        &self,
        id: &str,
        episode: Episode,
        language: Language,
    ) -> Result<Vec<StreamDescriptor>, ProviderError> {
        let variables = json!({
            "showId": id,
            "translationType": language.as_str(),
            "episodeString": episode.to_string(),
        });
        let data: EpisodeData = self.graphql(EPISODE_GQL, variables).await?;
        let sources = data.episode.map(|e| e.source_urls).unwrap_or_default();

        let mut streams = Vec::new();
        for source in sources {
            let Some(path) = decode_source_path(&source.source_url) else {
                debug!(source = ?source.source_name, "skipping source without encoded path");
                continue;
            };
            match self.resolve_links(&path).await {
                Ok(found) => streams.extend(found),
                Err(e) => {
                    debug!(source = ?source.source_name, error = %e, "source unavailable");
                }
            }
        }
        Ok(streams)
    }

    /// Follow a decoded source path to its list of links
    async fn resolve_links(&self, path: &str) -> Result<Vec<StreamDescriptor>, ProviderError> {
        let path = path.replacen("/clock?", "/clock.json?", 1);
        let url = if path.starts_with("http") {
            path
        } else {
            format!("{}{}", self.embed_url, path)
        };

        let clock: ClockResponse = self.get_json(&url, &[]).await?;
        Ok(clock
            .links
            .into_iter()
            .map(|link| {
                let resolution = link
                    .resolution_str
                    .as_deref()
                    .map(parse_resolution)
                    .unwrap_or(0);
                let referrer = referrer_for_url(&link.link);
                StreamDescriptor::new(link.link, resolution).with_referrer(referrer)
            })
            .collect())
    }
}

impl Default for AllAnimeClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Provider for AllAnimeClient {
    async fn search(&self, query: &str) -> Vec<Title> {
        match self.search_titles(query, Language::Sub).await {
            Ok(titles) => titles,
            Err(e) => {
                warn!(query = %query, error = %e, "search failed");
                Vec::new()
            }
        }
    }

    async fn title(&self, id: &str) -> Option<Title> {
        self.fetch_title(id).await.unwrap_or_else(|e| {
            warn!(title = %id, error = %e, "title lookup failed");
            None
        })
    }

    async fn episodes(&self, title: &Title, language: Language) -> Vec<Episode> {
        self.fetch_episodes(&title.id, language)
            .await
            .unwrap_or_else(|e| {
                warn!(title = %title.id, error = %e, "episode list failed");
                Vec::new()
            })
    }

    async fn streams(
        &self,
        title: &Title,
        episode: Episode,
        language: Language,
        _quality: u32,
    ) -> Vec<StreamDescriptor> {
        self.fetch_streams(&title.id, episode, language)
            .await
            .unwrap_or_else(|e| {
                warn!(title = %title.id, episode = %episode, error = %e, "stream lookup failed");
                Vec::new()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(path: &str) -> String {
        let hex: String = path
            .bytes()
            .map(|b| format!("{:02x}", b ^ SOURCE_KEY))
            .collect();
        format!("--{}", hex)
    }

    #[test]
    fn test_decode_source_path() {
        let path = "/apivtwo/clock?id=abc123";
        assert_eq!(decode_source_path(&encode(path)).as_deref(), Some(path));
    }

    #[test]
    fn test_decode_known_bytes() {
        // 0x79 ^ 56 = 'A', 0x7a ^ 56 = 'B'
        assert_eq!(decode_source_path("--797a").as_deref(), Some("AB"));
    }

    #[test]
    fn test_decode_rejects_plain_and_malformed() {
        assert_eq!(decode_source_path("https://example.com/v.mp4"), None);
        assert_eq!(decode_source_path("--7"), None);
        assert_eq!(decode_source_path("--zz"), None);
        assert_eq!(decode_source_path("--aé1"), None);
    }

    #[test]
    fn test_parse_resolution() {
        assert_eq!(parse_resolution("1080p"), 1080);
        assert_eq!(parse_resolution("Mp4-720p"), 720);
        assert_eq!(parse_resolution("hls"), 0);
        assert_eq!(parse_resolution(""), 0);
    }

    #[test]
    fn test_referrer_for_url() {
        assert_eq!(
            referrer_for_url("https://fast4speed.rsvp/video.mp4"),
            "https://allanime.day"
        );
        assert_eq!(
            referrer_for_url("https://sunshinerays93.live/x.m3u8"),
            "https://allanime.to"
        );
        assert_eq!(
            referrer_for_url("https://cdn.example/x.m3u8"),
            "https://allanime.day"
        );
    }
}
