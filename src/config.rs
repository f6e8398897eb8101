use crate::error::{PipelineError, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Jurisdiction names recognised in detected text, in match priority order.
pub const JURISDICTIONS: &[&str] = &[
    "CALIFORNIA",
    "NEW YORK",
    "TEXAS",
    "FLORIDA",
    "MICHIGAN",
    "ILLINOIS",
    "GEORGIA",
    "OREGON",
];

pub const FAST_LANE_QUEUE: &str = "fast-lane";
pub const PERSISTENCE_QUEUE: &str = "persistence";

/// Process-wide settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: PathBuf,
    pub webhook_port: u16,
    pub home_jurisdiction: String,
    pub ocr_url: Url,
    pub images_url: Url,
    pub notify_url: Url,
    pub access_token: Option<String>,
    pub notify_topic: String,
    pub dmv_json_path: PathBuf,
    pub dmv_xml_path: PathBuf,
    pub poll: PollSettings,
    pub visibility_timeout: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    /// Longest a single receive blocks waiting for a message.
    pub wait: Duration,
    /// Sleep between empty receives.
    pub backoff: Duration,
}

impl Config {
    pub fn from_env() -> Result<Config> {
        Config::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let or_default =
            |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        Ok(Config {
            database_path: or_default("DATABASE_PATH", "/data/violations.db").into(),
            webhook_port: parse_number(&lookup, "WEBHOOK_PORT", 8402)?,
            home_jurisdiction: or_default("HOME_JURISDICTION", "CALIFORNIA").to_ascii_uppercase(),
            ocr_url: required_url(&lookup, "OCR_URL")?,
            images_url: required_url(&lookup, "IMAGES_URL")?,
            notify_url: required_url(&lookup, "NOTIFY_URL")?,
            access_token: lookup("ACCESS_TOKEN").filter(|t| !t.is_empty()),
            notify_topic: or_default("NOTIFY_TOPIC", "TrafficViolationEmails"),
            dmv_json_path: or_default("DMV_JSON_PATH", "/data/DMVDatabase.json").into(),
            dmv_xml_path: or_default("DMV_XML_PATH", "/data/DMVDatabase.xml").into(),
            poll: PollSettings {
                wait: Duration::from_secs(parse_number(&lookup, "POLL_WAIT_SECS", 10)?),
                backoff: Duration::from_secs(parse_number(&lookup, "POLL_BACKOFF_SECS", 5)?),
            },
            visibility_timeout: Duration::from_secs(parse_number(
                &lookup,
                "VISIBILITY_TIMEOUT_SECS",
                30,
            )?),
        })
    }
}

fn required_url<F>(lookup: &F, key: &str) -> Result<Url>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| PipelineError::Config(format!("{} environment variable unset", key)))?;
    Url::parse(&raw)
        .map_err(|e| PipelineError::Config(format!("{} is not a valid URL ({}): {}", key, raw, e)).into())
}

fn parse_number<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| PipelineError::Config(format!("{} must be a number, got '{}'", key, raw)).into()),
    }
}
