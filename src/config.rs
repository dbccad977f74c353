use anyhow::{anyhow, bail, Context, Result};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::keywords::Keywords;

/// Only variables with this prefix are read, from both `.env` and the environment.
pub const ENV_PREFIX: &str = "CRUSH_";

pub const DOTENV_FILE: &str = ".env";

/// A raw configuration value. Values containing a space are stored as lists,
/// keeping the original text for string reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Str(String),
    List { raw: String, items: Vec<String> },
}

/// `CRUSH_ALT_KEYWORDS` -> `alt.keywords`. Keys without the prefix are rejected.
pub fn transform_key(raw: &str) -> Option<String> {
    let key = raw.strip_prefix(ENV_PREFIX)?;
    if key.is_empty() {
        return None;
    }
    Some(key.to_lowercase().replace('_', "."))
}

/// `"foo bar"` -> `["foo", "bar"]`, `"foo"` -> `"foo"`.
pub fn transform_value(raw: &str) -> Value {
    if raw.contains(' ') {
        Value::List {
            raw: raw.to_string(),
            items: raw.split_whitespace().map(str::to_string).collect(),
        }
    } else {
        Value::Str(raw.to_string())
    }
}

/// Flat dotted-key configuration map, built from one or more layers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    values: BTreeMap<String, Value>,
}

impl Settings {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let values = pairs
            .into_iter()
            .filter_map(|(k, v)| Some((transform_key(k.as_ref())?, transform_value(v.as_ref()))))
            .collect();
        Self { values }
    }

    /// Entries of `other` replace entries of `self` with the same key.
    pub fn merge(&mut self, other: Settings) {
        self.values.extend(other.values);
    }

    /// `.env` layer (optional) overridden by the process environment.
    pub fn load(dotenv_path: &Path) -> Result<Self> {
        let mut settings = Self::from_dotenv(dotenv_path)?.unwrap_or_default();
        settings.merge(Self::from_env()?);
        Ok(settings)
    }

    /// Returns `Ok(None)` when the file cannot be opened; a malformed file is an error.
    fn from_dotenv(path: &Path) -> Result<Option<Self>> {
        let iter = match dotenvy::from_path_iter(path) {
            Ok(iter) => iter,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                return Ok(None);
            }
        };

        let pairs = iter
            .collect::<std::result::Result<Vec<_>, _>>()
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        debug!("Read {} entries from {}", pairs.len(), path.display());
        Ok(Some(Self::from_pairs(pairs)))
    }

    fn from_env() -> Result<Self> {
        let mut pairs = Vec::new();
        for (key, value) in std::env::vars_os() {
            let Some(key) = key.to_str() else {
                continue;
            };
            if !key.starts_with(ENV_PREFIX) {
                continue;
            }
            let value = value
                .into_string()
                .map_err(|_| anyhow!("Environment variable {} is not valid UTF-8", key))?;
            pairs.push((key.to_string(), value));
        }
        Ok(Self::from_pairs(pairs))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// A list value reads back as the text it was split from.
    pub fn string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::Str(s) | Value::List { raw: s, .. } => Some(s.clone()),
        }
    }

    /// A string value reads back split on whitespace.
    pub fn strings(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::List { items, .. }) => items.clone(),
            Some(Value::Str(s)) => s.split_whitespace().map(str::to_string).collect(),
            None => Vec::new(),
        }
    }

    pub fn parsed<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        self.string(key)
            .map(|raw| {
                raw.trim()
                    .parse::<T>()
                    .with_context(|| format!("Invalid value for {}: {:?}", key, raw))
            })
            .transpose()
    }

    pub fn int64(&self, key: &str) -> Result<Option<i64>> {
        self.parsed(key)
    }

    pub fn boolean(&self, key: &str) -> Result<Option<bool>> {
        let Some(raw) = self.string(key) else {
            return Ok(None);
        };
        match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => bail!("Invalid boolean for {}: {:?}", key, raw),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Polling,
    Webhook,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Polling => write!(f, "polling"),
            TransportKind::Webhook => write!(f, "webhook"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "polling" | "poll" => Ok(TransportKind::Polling),
            "webhook" => Ok(TransportKind::Webhook),
            other => bail!("Unknown transport {:?} (expected \"polling\" or \"webhook\")", other),
        }
    }
}

/// When the incoming text is echoed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoMode {
    /// Every text message, in every chat.
    Always,
    /// Never.
    Off,
    /// Everywhere except target-chat messages without a keyword.
    Keyword,
}

impl std::fmt::Display for EchoMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EchoMode::Always => write!(f, "always"),
            EchoMode::Off => write!(f, "off"),
            EchoMode::Keyword => write!(f, "keyword"),
        }
    }
}

impl FromStr for EchoMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "always" | "1" | "true" | "yes" | "on" => Ok(EchoMode::Always),
            "off" | "0" | "false" | "no" | "never" => Ok(EchoMode::Off),
            "keyword" => Ok(EchoMode::Keyword),
            other => bail!(
                "Unknown echo mode {:?} (expected \"always\", \"off\" or \"keyword\")",
                other
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    /// Chat titles must start with this to count as the target chat.
    pub chat_title: String,
    pub chat_id: Option<i64>,
    pub sticker_file_id: Option<String>,
    pub keywords: Keywords,
    /// Name of the environment variable holding the public webhook URL.
    pub webhook_url_env_key: Option<String>,
    pub transport: TransportKind,
    pub listen_addr: SocketAddr,
    pub polling_timeout: Duration,
    pub echo: EchoMode,
    pub keepalive: bool,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 10000))
}

fn default_polling_timeout() -> Duration {
    Duration::from_secs(60)
}

impl Config {
    pub fn load() -> Result<Self> {
        let settings = Settings::load(Path::new(DOTENV_FILE))?;
        Self::from_settings(&settings)
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let token = settings
            .string("token")
            .filter(|t| !t.trim().is_empty())
            .with_context(|| format!("{}TOKEN is required", ENV_PREFIX))?;

        let webhook_url_env_key = settings
            .string("webhook.url.env.key")
            .filter(|k| !k.trim().is_empty());

        let transport = match settings.string("transport") {
            Some(raw) => raw.parse()?,
            None if webhook_url_env_key.is_some() => TransportKind::Webhook,
            None => TransportKind::Polling,
        };
        if transport == TransportKind::Webhook && webhook_url_env_key.is_none() {
            bail!(
                "Webhook transport requires {}WEBHOOK_URL_ENV_KEY",
                ENV_PREFIX
            );
        }

        let polling_timeout = settings
            .parsed::<u64>("polling.timeout")?
            .map(Duration::from_secs)
            .unwrap_or_else(default_polling_timeout);

        Ok(Config {
            token,
            chat_title: settings.string("chat.title").unwrap_or_default(),
            chat_id: settings.int64("chat.id")?,
            sticker_file_id: settings.string("alt.file.id").filter(|id| !id.is_empty()),
            keywords: Keywords::new(settings.strings("alt.keywords")),
            webhook_url_env_key,
            transport,
            listen_addr: settings
                .parsed("listen.addr")?
                .unwrap_or_else(default_listen_addr),
            polling_timeout,
            echo: settings
                .string("echo")
                .map(|raw| raw.parse::<EchoMode>())
                .transpose()?
                .unwrap_or(EchoMode::Keyword),
            keepalive: settings.boolean("keepalive")?.unwrap_or(true),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> Settings {
        Settings::from_pairs(pairs.iter().copied())
    }

    #[test]
    fn test_transform_key() {
        assert_eq!(
            transform_key("CRUSH_ALT_KEYWORDS").as_deref(),
            Some("alt.keywords")
        );
        assert_eq!(
            transform_key("CRUSH_WEBHOOK_URL_ENV_KEY").as_deref(),
            Some("webhook.url.env.key")
        );
        assert_eq!(transform_key("CRUSH_"), None);
        assert_eq!(transform_key("HOME"), None);
        assert_eq!(transform_key("crush_token"), None);
    }

    #[test]
    fn test_transform_value() {
        assert_eq!(
            transform_value("foo bar"),
            Value::List {
                raw: "foo bar".to_string(),
                items: vec!["foo".to_string(), "bar".to_string()],
            }
        );
        assert_eq!(transform_value("foo"), Value::Str("foo".to_string()));
    }

    #[test]
    fn test_unprefixed_pairs_are_dropped() {
        let s = settings(&[("PATH", "/bin"), ("CRUSH_TOKEN", "abc")]);
        assert_eq!(s.string("token").as_deref(), Some("abc"));
        assert!(s.get("path").is_none());
    }

    #[test]
    fn test_merge_overrides_per_key() {
        let mut base = settings(&[("CRUSH_TOKEN", "from-file"), ("CRUSH_CHAT_ID", "-100")]);
        base.merge(settings(&[("CRUSH_TOKEN", "from-env")]));
        assert_eq!(base.string("token").as_deref(), Some("from-env"));
        assert_eq!(base.int64("chat.id").unwrap(), Some(-100));
    }

    #[test]
    fn test_strings_and_string_accessors() {
        let s = settings(&[("CRUSH_ALT_KEYWORDS", "forgo skip"), ("CRUSH_ONE", "forgo")]);
        assert_eq!(s.strings("alt.keywords"), vec!["forgo", "skip"]);
        assert_eq!(s.string("alt.keywords").as_deref(), Some("forgo skip"));
        assert_eq!(s.strings("one"), vec!["forgo"]);
        assert!(s.strings("missing").is_empty());
    }

    #[test]
    fn test_string_keeps_spacing_of_list_values() {
        let s = settings(&[("CRUSH_CHAT_TITLE", "Book  Club "), ("CRUSH_ALT_KEYWORDS", " forgo  skip")]);
        assert_eq!(s.string("chat.title").as_deref(), Some("Book  Club "));
        assert_eq!(s.strings("chat.title"), vec!["Book", "Club"]);
        assert_eq!(s.string("alt.keywords").as_deref(), Some(" forgo  skip"));
        assert_eq!(s.strings("alt.keywords"), vec!["forgo", "skip"]);

        let config = Config::from_settings(&settings(&[
            ("CRUSH_TOKEN", "t"),
            ("CRUSH_CHAT_TITLE", "Book  Club "),
        ]))
        .unwrap();
        assert_eq!(config.chat_title, "Book  Club ");
    }

    #[test]
    fn test_echo_mode_values() {
        let echo = |raw: &str| {
            Config::from_settings(&settings(&[("CRUSH_TOKEN", "t"), ("CRUSH_ECHO", raw)]))
                .map(|c| c.echo)
        };
        assert_eq!(echo("always").unwrap(), EchoMode::Always);
        assert_eq!(echo("true").unwrap(), EchoMode::Always);
        assert_eq!(echo("Off").unwrap(), EchoMode::Off);
        assert_eq!(echo("keyword").unwrap(), EchoMode::Keyword);
        assert!(echo("sometimes").is_err());
        assert_eq!(EchoMode::Keyword.to_string(), "keyword");
    }

    #[test]
    fn test_boolean_accessor() {
        let s = settings(&[("CRUSH_ECHO", "off"), ("CRUSH_KEEPALIVE", "Yes"), ("CRUSH_BAD", "maybe")]);
        assert_eq!(s.boolean("echo").unwrap(), Some(false));
        assert_eq!(s.boolean("keepalive").unwrap(), Some(true));
        assert_eq!(s.boolean("missing").unwrap(), None);
        assert!(s.boolean("bad").is_err());
    }

    #[test]
    fn test_config_defaults() {
        let config = Config::from_settings(&settings(&[("CRUSH_TOKEN", "123:abc")])).unwrap();
        assert_eq!(config.token, "123:abc");
        assert_eq!(config.chat_title, "");
        assert_eq!(config.chat_id, None);
        assert_eq!(config.sticker_file_id, None);
        assert!(config.keywords.is_empty());
        assert_eq!(config.transport, TransportKind::Polling);
        assert_eq!(config.listen_addr, "0.0.0.0:10000".parse().unwrap());
        assert_eq!(config.polling_timeout, Duration::from_secs(60));
        assert_eq!(config.echo, EchoMode::Keyword);
        assert!(config.keepalive);
    }

    #[test]
    fn test_config_full() {
        let config = Config::from_settings(&settings(&[
            ("CRUSH_TOKEN", "123:abc"),
            ("CRUSH_CHAT_TITLE", "Book Club"),
            ("CRUSH_CHAT_ID", "-1001234"),
            ("CRUSH_ALT_FILE_ID", "CAACAgIAAxkBAAE"),
            ("CRUSH_ALT_KEYWORDS", "forgo skip"),
            ("CRUSH_WEBHOOK_URL_ENV_KEY", "RENDER_EXTERNAL_URL"),
            ("CRUSH_LISTEN_ADDR", "127.0.0.1:8080"),
            ("CRUSH_POLLING_TIMEOUT", "30"),
            ("CRUSH_ECHO", "false"),
        ]))
        .unwrap();
        assert_eq!(config.chat_title, "Book Club");
        assert_eq!(config.chat_id, Some(-1001234));
        assert_eq!(config.sticker_file_id.as_deref(), Some("CAACAgIAAxkBAAE"));
        assert_eq!(config.keywords, Keywords::new(["forgo", "skip"]));
        assert_eq!(config.webhook_url_env_key.as_deref(), Some("RENDER_EXTERNAL_URL"));
        assert_eq!(config.transport, TransportKind::Webhook);
        assert_eq!(config.listen_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.polling_timeout, Duration::from_secs(30));
        assert_eq!(config.echo, EchoMode::Off);
    }

    #[test]
    fn test_single_keyword_is_a_string_value() {
        let config = Config::from_settings(&settings(&[
            ("CRUSH_TOKEN", "t"),
            ("CRUSH_ALT_KEYWORDS", "forgo"),
        ]))
        .unwrap();
        assert_eq!(config.keywords, Keywords::new(["forgo"]));
    }

    #[test]
    fn test_missing_token_is_an_error() {
        let err = Config::from_settings(&settings(&[("CRUSH_CHAT_ID", "1")])).unwrap_err();
        assert!(err.to_string().contains("CRUSH_TOKEN"));
    }

    #[test]
    fn test_invalid_chat_id_is_an_error() {
        let err = Config::from_settings(&settings(&[
            ("CRUSH_TOKEN", "t"),
            ("CRUSH_CHAT_ID", "not-a-number"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("chat.id"));
    }

    #[test]
    fn test_explicit_transport_overrides_default() {
        let config = Config::from_settings(&settings(&[
            ("CRUSH_TOKEN", "t"),
            ("CRUSH_WEBHOOK_URL_ENV_KEY", "PUBLIC_URL"),
            ("CRUSH_TRANSPORT", "Polling"),
        ]))
        .unwrap();
        assert_eq!(config.transport, TransportKind::Polling);
    }

    #[test]
    fn test_webhook_transport_requires_url_key() {
        let err = Config::from_settings(&settings(&[
            ("CRUSH_TOKEN", "t"),
            ("CRUSH_TRANSPORT", "webhook"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("WEBHOOK_URL_ENV_KEY"));
    }

    #[test]
    fn test_unknown_transport_is_an_error() {
        assert!("carrier-pigeon".parse::<TransportKind>().is_err());
        assert_eq!(TransportKind::Webhook.to_string(), "webhook");
    }

    #[test]
    fn test_dotenv_file_layer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "# bot settings\nCRUSH_TOKEN=123:abc\nCRUSH_ALT_KEYWORDS=\"forgo skip\"\nOTHER=ignored\n",
        )
        .unwrap();

        let s = Settings::from_dotenv(&path).unwrap().unwrap();
        assert_eq!(s.string("token").as_deref(), Some("123:abc"));
        assert_eq!(s.strings("alt.keywords"), vec!["forgo", "skip"]);
        assert!(s.get("other").is_none());
    }

    #[test]
    fn test_missing_dotenv_file_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let s = Settings::from_dotenv(&dir.path().join(".env")).unwrap();
        assert!(s.is_none());
    }
}
