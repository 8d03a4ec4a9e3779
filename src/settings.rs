use serde::Deserialize;

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::str::FromStr;
use log::{error, LevelFilter};

use crate::error::ConfigError;

const IMPLICIT_TLS_PORT: u16 = 465;

// Main configuration struct, built once in main and passed down by reference
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Settings {
    pub smtp: SmtpSettings,
    pub imap: ImapSettings,
    pub pop3: Pop3Settings,
    pub email: EmailSettings,
    pub log_level: String,
    pub debug: bool,
    pub http_bind: Option<String>,
}

/// How the submission connection is secured.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SmtpSecurity {
    /// TLS from the first byte (conventionally port 465).
    ImplicitTls,
    /// Plain connect followed by a mandatory STARTTLS before authenticating.
    #[serde(alias = "starttls")]
    OpportunisticUpgrade,
    Plaintext,
}

impl FromStr for SmtpSecurity {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "implicit-tls" | "implicit" | "tls" | "ssl" => Ok(SmtpSecurity::ImplicitTls),
            "opportunistic-upgrade" | "starttls" | "upgrade" => {
                Ok(SmtpSecurity::OpportunisticUpgrade)
            }
            "plaintext" | "plain" | "none" => Ok(SmtpSecurity::Plaintext),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SmtpSettings {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: Secret,
    pub use_tls: bool,
    pub security: Option<SmtpSecurity>,
}

impl SmtpSettings {
    /// Explicit `security` wins; otherwise 465 means implicit TLS and any
    /// other port upgrades when `use_tls` is set.
    pub fn security(&self) -> SmtpSecurity {
        match self.security {
            Some(security) => security,
            None if self.port == IMPLICIT_TLS_PORT => SmtpSecurity::ImplicitTls,
            None if self.use_tls => SmtpSecurity::OpportunisticUpgrade,
            None => SmtpSecurity::Plaintext,
        }
    }

    pub fn missing_credentials(&self) -> bool {
        self.username.is_empty() || self.password.is_empty()
    }
}

impl Default for SmtpSettings {
    fn default() -> Self {
        Self {
            server: "smtp.gmail.com".to_string(),
            port: 587,
            username: String::new(),
            password: Secret::default(),
            use_tls: true,
            security: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ImapSettings {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: Secret,
    pub use_tls: bool,
}

impl Default for ImapSettings {
    fn default() -> Self {
        Self {
            server: "imap.gmail.com".to_string(),
            port: 993,
            username: String::new(),
            password: Secret::default(),
            use_tls: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Pop3Settings {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: Secret,
    pub use_tls: bool,
}

impl Default for Pop3Settings {
    fn default() -> Self {
        Self {
            server: "pop.gmail.com".to_string(),
            port: 995,
            username: String::new(),
            password: Secret::default(),
            use_tls: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmailSettings {
    pub default_from_email: String,
    pub default_from_name: String,
    pub max_attachment_size_mb: u64,
}

impl EmailSettings {
    pub fn max_attachment_bytes(&self) -> u64 {
        self.max_attachment_size_mb.saturating_mul(1024 * 1024)
    }
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            default_from_email: String::new(),
            default_from_name: "MCP Email Server".to_string(),
            max_attachment_size_mb: 25,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            smtp: SmtpSettings::default(),
            imap: ImapSettings::default(),
            pop3: Pop3Settings::default(),
            email: EmailSettings::default(),
            log_level: "info".to_string(),
            debug: false,
            http_bind: None,
        }
    }
}

/// A credential that never shows up in `Debug` output or logs.
#[derive(Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Secret(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("Secret(\"\")")
        } else {
            f.write_str("Secret(***)")
        }
    }
}

impl Settings {
    /// Defaults, then the optional YAML file, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Settings, ConfigError> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    pub fn load_with_env<F>(path: Option<&Path>, env: F) -> Result<Settings, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Settings::default(),
        };
        settings.apply_env(&env)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Settings, ConfigError> {
        let file = File::open(path).map_err(|source| {
            error!("Cannot open settings file {}: {}", path.display(), source);
            ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }
        })?;

        let reader = BufReader::new(file);

        // Parse the YAML file into the Settings struct
        let settings: Settings = serde_yaml::from_reader(reader).map_err(|err| {
            error!("Cannot deserialize settings: {}", err);
            ConfigError::Parse(err)
        })?;
        Ok(settings)
    }

    fn apply_env<F>(&mut self, env: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let smtp = &mut self.smtp;
        override_string(env, "SMTP_SERVER", &mut smtp.server);
        override_port(env, "SMTP_PORT", &mut smtp.port)?;
        override_string(env, "SMTP_USERNAME", &mut smtp.username);
        override_secret(env, "SMTP_PASSWORD", &mut smtp.password);
        override_bool(env, "SMTP_USE_TLS", &mut smtp.use_tls)?;
        if let Some(value) = env("SMTP_SECURITY") {
            let security = value.parse().map_err(|value| ConfigError::InvalidValue {
                key: "SMTP_SECURITY".to_string(),
                value,
            })?;
            smtp.security = Some(security);
        }

        let imap = &mut self.imap;
        override_string(env, "IMAP_SERVER", &mut imap.server);
        override_port(env, "IMAP_PORT", &mut imap.port)?;
        override_string(env, "IMAP_USERNAME", &mut imap.username);
        override_secret(env, "IMAP_PASSWORD", &mut imap.password);
        override_bool(env, "IMAP_USE_SSL", &mut imap.use_tls)?;

        let pop3 = &mut self.pop3;
        override_string(env, "POP3_SERVER", &mut pop3.server);
        override_port(env, "POP3_PORT", &mut pop3.port)?;
        override_string(env, "POP3_USERNAME", &mut pop3.username);
        override_secret(env, "POP3_PASSWORD", &mut pop3.password);
        override_bool(env, "POP3_USE_SSL", &mut pop3.use_tls)?;

        let email = &mut self.email;
        override_string(env, "DEFAULT_FROM_EMAIL", &mut email.default_from_email);
        override_string(env, "DEFAULT_FROM_NAME", &mut email.default_from_name);
        if let Some(value) = env("MAX_ATTACHMENT_SIZE_MB") {
            email.max_attachment_size_mb =
                value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    key: "MAX_ATTACHMENT_SIZE_MB".to_string(),
                    value,
                })?;
        }

        override_string(env, "LOG_LEVEL", &mut self.log_level);
        override_bool(env, "DEBUG", &mut self.debug)?;
        if let Some(bind) = env("HTTP_BIND").filter(|bind| !bind.trim().is_empty()) {
            self.http_bind = Some(bind);
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (key, port) in [
            ("smtp.port", self.smtp.port),
            ("imap.port", self.imap.port),
            ("pop3.port", self.pop3.port),
        ] {
            if port == 0 {
                return Err(ConfigError::InvalidPort {
                    key: key.to_string(),
                    value: port.to_string(),
                });
            }
        }
        self.log_level
            .parse::<LevelFilter>()
            .map_err(|_| ConfigError::InvalidValue {
                key: "log_level".to_string(),
                value: self.log_level.clone(),
            })?;
        Ok(())
    }

    pub fn log_level(&self) -> LevelFilter {
        if self.debug {
            return LevelFilter::Debug;
        }
        self.log_level.parse().unwrap_or(LevelFilter::Info)
    }
}

fn override_string<F>(env: &F, key: &str, target: &mut String)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = env(key) {
        *target = value;
    }
}

fn override_secret<F>(env: &F, key: &str, target: &mut Secret)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = env(key) {
        *target = Secret::new(value);
    }
}

fn override_port<F>(env: &F, key: &str, target: &mut u16) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = env(key) {
        *target = parse_port(key, &value)?;
    }
    Ok(())
}

fn override_bool<F>(env: &F, key: &str, target: &mut bool) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = env(key) {
        *target = parse_bool(&value).ok_or_else(|| ConfigError::InvalidValue {
            key: key.to_string(),
            value,
        })?;
    }
    Ok(())
}

fn parse_port(key: &str, value: &str) -> Result<u16, ConfigError> {
    let invalid = || ConfigError::InvalidPort {
        key: key.to_string(),
        value: value.to_string(),
    };
    let port: i64 = value.trim().parse().map_err(|_| invalid())?;
    if !(1..=65535).contains(&port) {
        return Err(invalid());
    }
    u16::try_from(port).map_err(|_| invalid())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn load(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::load_with_env(None, |key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_match_documented_values() {
        let settings = load(&[]).unwrap();
        assert_eq!(settings.smtp.port, 587);
        assert_eq!(settings.imap.port, 993);
        assert_eq!(settings.pop3.port, 995);
        assert!(settings.smtp.use_tls);
        assert!(settings.imap.use_tls);
        assert_eq!(settings.email.max_attachment_size_mb, 25);
        assert_eq!(settings.email.default_from_name, "MCP Email Server");
        assert_eq!(settings.log_level(), LevelFilter::Info);
    }

    #[test]
    fn environment_overrides_defaults() {
        let settings = load(&[
            ("SMTP_SERVER", "mail.example.com"),
            ("SMTP_PORT", "2525"),
            ("SMTP_PASSWORD", "hunter2"),
            ("POP3_USE_SSL", "false"),
            ("MAX_ATTACHMENT_SIZE_MB", "5"),
        ])
        .unwrap();
        assert_eq!(settings.smtp.server, "mail.example.com");
        assert_eq!(settings.smtp.port, 2525);
        assert_eq!(settings.smtp.password.expose(), "hunter2");
        assert!(!settings.pop3.use_tls);
        assert_eq!(settings.email.max_attachment_bytes(), 5 * 1024 * 1024);
    }

    #[test]
    fn out_of_range_ports_are_rejected() {
        for bad in ["0", "65536", "99999", "-1", "smtp"] {
            let err = load(&[("SMTP_PORT", bad)]).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidPort { .. }), "{bad}");
        }
        assert!(load(&[("IMAP_PORT", "65535")]).is_ok());
        assert!(load(&[("POP3_PORT", "1")]).is_ok());
    }

    #[test]
    fn security_follows_port_unless_set() {
        let mut smtp = SmtpSettings::default();
        assert_eq!(smtp.security(), SmtpSecurity::OpportunisticUpgrade);

        smtp.port = 465;
        assert_eq!(smtp.security(), SmtpSecurity::ImplicitTls);

        smtp.port = 25;
        smtp.use_tls = false;
        assert_eq!(smtp.security(), SmtpSecurity::Plaintext);

        smtp.security = Some(SmtpSecurity::ImplicitTls);
        assert_eq!(smtp.security(), SmtpSecurity::ImplicitTls);
    }

    #[test]
    fn security_can_be_chosen_from_environment() {
        let settings = load(&[("SMTP_SECURITY", "starttls"), ("SMTP_PORT", "465")]).unwrap();
        assert_eq!(settings.smtp.security(), SmtpSecurity::OpportunisticUpgrade);

        assert!(load(&[("SMTP_SECURITY", "carrier-pigeon")]).is_err());
    }

    #[test]
    fn yaml_file_is_layered_under_environment() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "smtp:\n  server: relay.example.org\n  port: 465\nemail:\n  default_from_email: bot@example.org\n"
        )
        .unwrap();

        let settings =
            Settings::load_with_env(Some(file.path()), |key| {
                (key == "SMTP_SERVER").then(|| "override.example.org".to_string())
            })
            .unwrap();
        assert_eq!(settings.smtp.server, "override.example.org");
        assert_eq!(settings.smtp.port, 465);
        assert_eq!(settings.smtp.security(), SmtpSecurity::ImplicitTls);
        assert_eq!(settings.email.default_from_email, "bot@example.org");
        assert_eq!(settings.imap.server, "imap.gmail.com");
    }

    #[test]
    fn yaml_rejects_out_of_range_ports() {
        for yaml in ["imap:\n  port: 0\n", "imap:\n  port: 70000\n"] {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            file.write_all(yaml.as_bytes()).unwrap();
            assert!(Settings::load_with_env(Some(file.path()), |_| None).is_err(), "{yaml}");
        }
    }

    #[test]
    fn passwords_are_redacted_in_debug_output() {
        let settings = load(&[("IMAP_PASSWORD", "s3cret")]).unwrap();
        let debug = format!("{:?}", settings);
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("Secret(***)"));
    }

    #[test]
    fn debug_flag_raises_log_level() {
        let settings = load(&[("DEBUG", "yes"), ("LOG_LEVEL", "warn")]).unwrap();
        assert_eq!(settings.log_level(), LevelFilter::Debug);
        assert!(load(&[("LOG_LEVEL", "chatty")]).is_err());
    }
}
