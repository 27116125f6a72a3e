use std::str::FromStr;
use std::time;

use envconfig::Envconfig;

#[derive(Envconfig, Clone)]
pub struct Config {
    /// JSON array of raw messages dumped from the mailbox.
    #[envconfig(from = "MAILBOX_PATH")]
    pub mailbox_path: String,

    #[envconfig(from = "PROCESSED_PATH", default = "processed.json")]
    pub processed_path: String,

    #[envconfig(from = "OFFSET_PATH", default = "offset")]
    pub offset_path: String,

    /// Webhook delivery is enabled only when both the URL and the API key
    /// are configured.
    #[envconfig(from = "WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    #[envconfig(from = "WEBHOOK_API_KEY")]
    pub webhook_api_key: Option<NonEmptyString>,

    #[envconfig(default = "5000")]
    pub request_timeout: EnvMsDuration,

    #[envconfig(default = "50")]
    pub webhook_chunk_size: usize,

    #[envconfig(default = "1000")]
    pub chunk_pace: EnvMsDuration,

    #[envconfig(default = "500")]
    pub max_fetch: usize,

    /// Only look at messages from the last N hours; unset means the whole
    /// mailbox dump.
    #[envconfig(from = "LOOKBACK_HOURS")]
    pub lookback_hours: Option<i64>,

    #[envconfig(default = "gmail")]
    pub source_label: NonEmptyString,
}

#[derive(Debug, Clone, Copy)]
pub struct EnvMsDuration(pub time::Duration);

#[derive(Debug, PartialEq, Eq)]
pub struct ParseEnvMsDurationError;

impl FromStr for EnvMsDuration {
    type Err = ParseEnvMsDurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ms = s.parse::<u64>().map_err(|_| ParseEnvMsDurationError)?;

        Ok(EnvMsDuration(time::Duration::from_millis(ms)))
    }
}

#[derive(Debug, Clone)]
pub struct NonEmptyString(pub String);

impl NonEmptyString {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct StringIsEmptyError;

impl FromStr for NonEmptyString {
    type Err = StringIsEmptyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            Err(StringIsEmptyError)
        } else {
            Ok(NonEmptyString(s.to_owned()))
        }
    }
}
