use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::config::{SyncConfig, SyncConfigBuilder};
use crate::error::ConfigError;

#[derive(Parser, Debug)]
#[command(name = "codeshare-sync")]
#[command(version)]
#[command(about = "Create, join and publish live CodeShare sessions from the terminal")]
pub struct Args {
    /// TOML config file; flags below override its values
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Document store base URL (e.g. http://localhost:5000/api)
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Live channel base URL (e.g. ws://localhost:5000/ws)
    #[arg(long, global = true)]
    pub ws_url: Option<String>,

    /// Base URL of printed share links
    #[arg(long, global = true)]
    pub share_url: Option<String>,

    /// Log filter (e.g. debug, codeshare_sync=trace); defaults to RUST_LOG, then info
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Start a new session and follow it until Ctrl-C
    Create {
        /// Initial content; empty when omitted
        #[arg(long, short)]
        file: Option<PathBuf>,

        /// Language tag of the content
        #[arg(long, short)]
        language: Option<String>,
    },

    /// Join an existing session and stream its content until Ctrl-C
    Join {
        /// Session code, e.g. AB12CD
        id: String,
    },

    /// Overwrite a session's stored content and exit
    Publish {
        /// Session code, e.g. AB12CD
        id: String,

        /// Content to publish; read from stdin when omitted
        #[arg(long, short)]
        file: Option<PathBuf>,

        /// Language tag; keeps the session's current one when omitted
        #[arg(long, short)]
        language: Option<String>,
    },

    /// Print shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Args {
    /// Config file (or defaults) with command-line overrides applied.
    pub fn resolve_config(&self) -> Result<SyncConfig, ConfigError> {
        let base = match &self.config {
            Some(path) => SyncConfig::from_file(path)?,
            None => SyncConfig::default(),
        };
        let mut builder = SyncConfigBuilder::from_config(base);
        if let Some(url) = &self.api_url {
            builder = builder.api_base_url(url.as_str());
        }
        if let Some(url) = &self.ws_url {
            builder = builder.ws_base_url(url.as_str());
        }
        if let Some(url) = &self.share_url {
            builder = builder.share_base_url(url.as_str());
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_args_parse_join() {
        let args = Args::parse_from(["codeshare-sync", "join", "AB12CD"]);
        assert_eq!(args.command, Command::Join { id: "AB12CD".into() });
        assert!(args.config.is_none());
        assert!(args.log_level.is_none());
    }

    #[test]
    fn test_args_parse_create_with_file_and_language() {
        let args = Args::parse_from([
            "codeshare-sync",
            "create",
            "--file",
            "main.rs",
            "-l",
            "rust",
        ]);
        assert_eq!(
            args.command,
            Command::Create {
                file: Some(PathBuf::from("main.rs")),
                language: Some("rust".into()),
            }
        );
    }

    #[test]
    fn test_args_parse_global_flags_after_subcommand() {
        let args = Args::parse_from([
            "codeshare-sync",
            "publish",
            "AB12CD",
            "--api-url",
            "http://api.test",
            "--log-level",
            "debug",
        ]);
        assert_eq!(args.api_url.as_deref(), Some("http://api.test"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(matches!(args.command, Command::Publish { file: None, .. }));
    }

    #[test]
    fn test_args_parse_completions() {
        let args = Args::parse_from(["codeshare-sync", "completions", "bash"]);
        assert_eq!(args.command, Command::Completions { shell: Shell::Bash });
    }

    #[test]
    fn test_args_missing_subcommand_is_error() {
        assert!(Args::try_parse_from(["codeshare-sync"]).is_err());
    }

    #[test]
    fn test_resolve_config_flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "api_base_url = \"http://from-file\"\ndebounce_ms = 200").unwrap();
        let path = file.path().to_string_lossy().into_owned();

        let args = Args::parse_from([
            "codeshare-sync",
            "--config",
            path.as_str(),
            "--ws-url",
            "ws://from-flag",
            "join",
            "AB12CD",
        ]);
        let config = args.resolve_config().unwrap();
        assert_eq!(config.api_base_url, "http://from-file");
        assert_eq!(config.ws_base_url, "ws://from-flag");
        assert_eq!(config.debounce_ms, 200);
    }

    #[test]
    fn test_resolve_config_defaults_without_file() {
        let args = Args::parse_from(["codeshare-sync", "join", "AB12CD"]);
        assert_eq!(args.resolve_config().unwrap(), SyncConfig::default());
    }
}
