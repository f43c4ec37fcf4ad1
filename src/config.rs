//! TOML configuration for the logdog daemon

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use logdog_engine::{Dog, Handler, Scheduler};
use logdog_handlers::{CommandHandler, Detached, MailHandler, PrintHandler, WebhookHandler};

/// Default polling interval in seconds
const DEFAULT_INTERVAL_SECS: f64 = 5.0;

/// Default log level when neither `RUST_LOG` nor the config sets one
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Daemon configuration file
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Seconds between ticks, fractional allowed
    #[serde(default = "default_interval")]
    pub interval: f64,

    pub log_level: Option<String>,

    /// Append diagnostics here instead of stderr
    pub log_file: Option<PathBuf>,

    pub pid_file: Option<PathBuf>,

    #[serde(default)]
    pub dogs: BTreeMap<String, DogConfig>,
}

/// One watch rule
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DogConfig {
    pub paths: Vec<String>,

    #[serde(default)]
    pub includes: Vec<String>,

    #[serde(default)]
    pub excludes: Vec<String>,

    #[serde(default)]
    pub ignore_case: bool,

    #[serde(default)]
    pub handler: HandlerConfig,
}

/// Which built-in handler a dog uses
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandlerConfig {
    Print {
        #[serde(default)]
        show_path: bool,
    },
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        /// Run on a worker thread instead of blocking the tick
        #[serde(default)]
        detach: bool,
    },
    Webhook {
        url: String,
    },
    Mail {
        server: String,
        /// 465 with ssl, 25 without
        port: Option<u16>,
        #[serde(default = "default_ssl")]
        ssl: bool,
        user: Option<String>,
        password: Option<String>,
        /// Sender address, `user` when unset
        from: Option<String>,
        to: Vec<String>,
        #[serde(default)]
        detach: bool,
    },
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self::Print { show_path: false }
    }
}

fn default_ssl() -> bool {
    true
}

fn default_interval() -> f64 {
    DEFAULT_INTERVAL_SECS
}

impl Config {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        Scheduler::from_secs_f64(self.interval)?;

        if self.dogs.is_empty() {
            bail!("no dogs configured");
        }
        for (name, dog) in &self.dogs {
            if dog.paths.is_empty() {
                bail!("dog '{}' has no paths", name);
            }
        }
        Ok(())
    }

    /// Log level to use, normalised for `EnvFilter`
    pub fn log_level(&self) -> String {
        normalize_level(self.log_level.as_deref().unwrap_or(DEFAULT_LOG_LEVEL))
    }

    pub fn scheduler(&self) -> Result<Scheduler> {
        Ok(Scheduler::from_secs_f64(self.interval)?)
    }

    /// Compile every dog. Webhook handlers need a running tokio runtime.
    pub fn build_dogs(&self) -> Result<Vec<Dog>> {
        self.dogs
            .iter()
            .map(|(name, dog)| {
                let handler = build_handler(name, &dog.handler)
                    .with_context(|| format!("Failed to create handler for dog '{}'", name))?;
                let built = Dog::builder(name.as_str())
                    .paths(dog.paths.iter().cloned())
                    .includes(dog.includes.iter().cloned())
                    .excludes(dog.excludes.iter().cloned())
                    .case_insensitive(dog.ignore_case)
                    .handler(handler)
                    .build()?;
                Ok(built)
            })
            .collect()
    }
}

fn build_handler(dog: &str, config: &HandlerConfig) -> Result<Arc<dyn Handler>> {
    let handler: Arc<dyn Handler> = match config {
        HandlerConfig::Print { show_path } => Arc::new(PrintHandler::new().with_path(*show_path)),
        HandlerConfig::Command {
            program,
            args,
            detach,
        } => {
            let command = CommandHandler::new(program.as_str())
                .args(args.iter().cloned())
                .dog(dog);
            if *detach {
                Arc::new(Detached::new(command)?)
            } else {
                Arc::new(command)
            }
        }
        HandlerConfig::Webhook { url } => Arc::new(WebhookHandler::spawn(url.as_str(), dog)?),
        HandlerConfig::Mail {
            server,
            port,
            ssl,
            user,
            password,
            from,
            to,
            detach,
        } => {
            let mut builder = MailHandler::builder(server.as_str())
                .ssl(*ssl)
                .to(to.iter().cloned());
            if let Some(port) = port {
                builder = builder.port(*port);
            }
            match (user, password) {
                (Some(user), Some(password)) => {
                    builder = builder.credentials(user.as_str(), password.as_str());
                }
                (None, None) => {}
                _ => bail!("mail handler needs both user and password"),
            }
            if let Some(from) = from {
                builder = builder.from(from.as_str());
            }

            let mail = builder.build()?;
            if *detach {
                Arc::new(Detached::new(mail)?)
            } else {
                Arc::new(mail)
            }
        }
    };
    Ok(handler)
}

/// Accept Python-style level names ("WARNING") as well as tracing ones
pub fn normalize_level(level: &str) -> String {
    match level.to_ascii_lowercase().as_str() {
        "warning" => "warn".to_string(),
        "critical" | "fatal" => "error".to_string(),
        other => other.to_string(),
    }
}
