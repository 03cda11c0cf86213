//! Data structures and types for Kitsunari
//!
//! Contains all shared models used across the application organized by domain:
//! - **Catalog**: titles, episodes, and audio language from the provider
//! - **Streams**: playable stream descriptors
//! - **Progress**: persisted watch-progress records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Catalog Models
// =============================================================================

/// Audio track flavour offered by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Original audio with subtitles
    #[default]
    Sub,
    /// Dubbed audio
    Dub,
}

impl Language {
    /// Provider-facing translation type string
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Sub => "sub",
            Language::Dub => "dub",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sub" => Ok(Language::Sub),
            "dub" => Ok(Language::Dub),
            other => Err(format!("Unknown language '{}' (expected sub or dub)", other)),
        }
    }
}

/// A searchable title from the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Title {
    /// Stable provider identifier, used as the progress key
    pub id: String,
    pub name: String,
    /// Episode counts per language, when the provider reports them
    #[serde(default)]
    pub sub_episodes: Option<u32>,
    #[serde(default)]
    pub dub_episodes: Option<u32>,
}

impl Title {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            sub_episodes: None,
            dub_episodes: None,
        }
    }

    /// Number of episodes available for a language, if known
    pub fn episode_count(&self, language: Language) -> Option<u32> {
        match language {
            Language::Sub => self.sub_episodes,
            Language::Dub => self.dub_episodes,
        }
    }
}

impl fmt::Display for Title {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.sub_episodes {
            Some(count) => write!(f, "{} ({} eps)", self.name, count),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Episode number: whole for regular episodes, fractional for specials (e.g. 6.5)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Episode(f64);

impl Episode {
    pub fn new(number: f64) -> Self {
        Self(number)
    }

    pub fn number(&self) -> f64 {
        self.0
    }

    /// True for regular (non-special) episodes
    pub fn is_whole(&self) -> bool {
        self.0.fract() == 0.0
    }
}

impl From<u32> for Episode {
    fn from(n: u32) -> Self {
        Self(n as f64)
    }
}

impl fmt::Display for Episode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_whole() {
            write!(f, "{}", self.0 as i64)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl FromStr for Episode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() && n >= 0.0 => Ok(Episode(n)),
            _ => Err(format!("Invalid episode number '{}'", trimmed)),
        }
    }
}

impl Serialize for Episode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.is_whole() {
            serializer.serialize_i64(self.0 as i64)
        } else {
            serializer.serialize_f64(self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Episode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Ok(Episode(n)),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

// =============================================================================
// Stream Models
// =============================================================================

/// A playable stream for one episode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub url: String,
    /// Vertical resolution (or an equivalent quality rank)
    pub resolution: u32,
    pub referrer: Option<String>,
}

impl StreamDescriptor {
    pub fn new(url: impl Into<String>, resolution: u32) -> Self {
        Self {
            url: url.into(),
            resolution,
            referrer: None,
        }
    }

    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = Some(referrer.into());
        self
    }
}

impl fmt::Display for StreamDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}p] {}", self.resolution, self.url)
    }
}

// =============================================================================
// Progress Models
// =============================================================================

/// Percent of an episode watched, rounded to one decimal (ties to even) and
/// clamped to [0, 100]
pub fn percent_complete(position_seconds: u64, duration_seconds: u64) -> f64 {
    if duration_seconds == 0 {
        return 0.0;
    }
    let raw = position_seconds as f64 / duration_seconds as f64 * 100.0;
    ((raw * 10.0).round_ties_even() / 10.0).clamp(0.0, 100.0)
}

/// Resumable watch progress for one title (latest episode only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub title_id: String,
    pub title_name: String,
    pub episode: Episode,
    pub position_seconds: u64,
    pub duration_seconds: u64,
    pub last_watched: DateTime<Utc>,
    pub percent_complete: f64,
}

impl ProgressRecord {
    /// Build a record, deriving `percent_complete` from position and duration
    pub fn new(
        title_id: impl Into<String>,
        title_name: impl Into<String>,
        episode: Episode,
        position_seconds: u64,
        duration_seconds: u64,
        last_watched: DateTime<Utc>,
    ) -> Self {
        Self {
            title_id: title_id.into(),
            title_name: title_name.into(),
            episode,
            position_seconds,
            duration_seconds,
            last_watched,
            percent_complete: percent_complete(position_seconds, duration_seconds),
        }
    }

    /// Meaningfully started but not finished
    pub fn is_resumable(&self) -> bool {
        self.position_seconds > 5
            && (self.position_seconds as f64) < self.duration_seconds as f64 * 0.95
    }

    /// Format the saved position as `MM:SS` or `H:MM:SS`
    pub fn format_position(&self) -> String {
        format_seconds(self.position_seconds)
    }
}

impl fmt::Display for ProgressRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} EP{} ({}%) at {}",
            self.title_name,
            self.episode,
            self.percent_complete,
            self.format_position()
        )
    }
}

/// Format seconds as `MM:SS` or `H:MM:SS`
pub fn format_seconds(total: u64) -> String {
    let hours = total / 3600;
    let mins = (total % 3600) / 60;
    let secs = total % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{:02}:{:02}", mins, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_complete() {
        assert_eq!(percent_complete(50, 100), 50.0);
        assert_eq!(percent_complete(1, 3), 33.3);
        assert_eq!(percent_complete(2, 3), 66.7);
        assert_eq!(percent_complete(10, 0), 0.0);
        assert_eq!(percent_complete(0, 1440), 0.0);
        assert_eq!(percent_complete(500, 100), 100.0);
        // Exact ties go to the even digit
        assert_eq!(percent_complete(1, 16), 6.2);
        assert_eq!(percent_complete(3, 16), 18.8);
        assert_eq!(percent_complete(5, 16), 31.2);
    }

    #[test]
    fn test_episode_display() {
        assert_eq!(Episode::from(3).to_string(), "3");
        assert_eq!(Episode::new(6.5).to_string(), "6.5");
    }

    #[test]
    fn test_episode_serializes_whole_numbers_as_integers() {
        assert_eq!(serde_json::to_string(&Episode::from(3)).unwrap(), "3");
        assert_eq!(serde_json::to_string(&Episode::new(6.5)).unwrap(), "6.5");
    }

    #[test]
    fn test_episode_deserializes_numbers_and_strings() {
        let e: Episode = serde_json::from_str("12").unwrap();
        assert_eq!(e, Episode::from(12));
        let e: Episode = serde_json::from_str("\"6.5\"").unwrap();
        assert_eq!(e, Episode::new(6.5));
        assert!(serde_json::from_str::<Episode>("\"abc\"").is_err());
    }

    #[test]
    fn test_episode_parse_rejects_negative() {
        assert!("-1".parse::<Episode>().is_err());
        assert!("NaN".parse::<Episode>().is_err());
        assert_eq!(" 7 ".parse::<Episode>().unwrap(), Episode::from(7));
    }

    #[test]
    fn test_language_parse() {
        assert_eq!("SUB".parse::<Language>().unwrap(), Language::Sub);
        assert_eq!("dub".parse::<Language>().unwrap(), Language::Dub);
        assert!("raw".parse::<Language>().is_err());
    }

    #[test]
    fn test_record_resumable_window() {
        let now = Utc::now();
        let make = |pos| ProgressRecord::new("a", "A", Episode::from(1), pos, 100, now);
        assert!(!make(4).is_resumable());
        assert!(!make(5).is_resumable());
        assert!(make(6).is_resumable());
        assert!(make(50).is_resumable());
        assert!(!make(95).is_resumable());
        assert!(!make(96).is_resumable());
    }

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(65), "01:05");
        assert_eq!(format_seconds(3725), "1:02:05");
    }
}
