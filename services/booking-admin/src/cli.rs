//! Argument parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::Value;

use crate::error::Error;

/// Admin client for the expert-booking API.
#[derive(Debug, Parser)]
#[command(name = "booking-admin", version, about)]
pub struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Print session counters in Prometheus text format to stderr on exit.
    #[arg(long, global = true)]
    pub metrics: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, PartialEq, Subcommand)]
pub enum Command {
    /// Log in; the password is read from BOOKING_ADMIN_PASSWORD.
    Login { email: String },
    /// End the session locally and notify the backend.
    Logout,
    /// Show the saved session.
    Whoami,
    Get {
        path: String,
    },
    Post {
        path: String,
        #[arg(value_parser = parse_json)]
        body: Value,
    },
    Put {
        path: String,
        #[arg(value_parser = parse_json)]
        body: Value,
    },
    Patch {
        path: String,
        #[arg(value_parser = parse_json)]
        body: Value,
    },
    Delete {
        path: String,
    },
    /// Send a file as multipart form data.
    Upload {
        path: String,
        /// Form field name.
        field: String,
        file: PathBuf,
    },
}

fn parse_json(raw: &str) -> Result<Value, Error> {
    serde_json::from_str(raw).map_err(|e| Error::InvalidBody(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use clap::error::ErrorKind;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("booking-admin").chain(args.iter().copied()))
            .unwrap_or_else(|e| panic!("parse failed: {e}"))
    }

    fn parse_err(args: &[&str]) -> clap::Error {
        Cli::try_parse_from(std::iter::once("booking-admin").chain(args.iter().copied()))
            .unwrap_err()
    }

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_login() {
        let cli = parse(&["login", "expert@example.com"]);
        assert_eq!(cli.config, None);
        assert!(!cli.metrics);
        assert_eq!(
            cli.command,
            Command::Login {
                email: "expert@example.com".into()
            }
        );
    }

    #[test]
    fn global_flags_may_follow_the_subcommand() {
        let cli = parse(&["get", "/events", "--config", "/etc/ba.toml", "--metrics"]);
        assert_eq!(cli.config.as_deref(), Some("/etc/ba.toml"));
        assert!(cli.metrics);
        assert_eq!(
            cli.command,
            Command::Get {
                path: "/events".into()
            }
        );
    }

    #[test]
    fn flag_like_values_pass_after_separator() {
        let cli = parse(&["get", "--", "--metrics"]);
        assert!(!cli.metrics);
        assert_eq!(
            cli.command,
            Command::Get {
                path: "--metrics".into()
            }
        );
    }

    #[test]
    fn parses_json_bodies() {
        let cli = parse(&["patch", "/profile", r#"{"bio":"hi"}"#]);
        assert_eq!(
            cli.command,
            Command::Patch {
                path: "/profile".into(),
                body: serde_json::json!({ "bio": "hi" })
            }
        );
    }

    #[test]
    fn invalid_json_body_is_rejected() {
        let err = parse_err(&["post", "/coupons", "{not json"]);
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
        assert!(err.to_string().contains("request body is not valid JSON"));
    }

    #[test]
    fn parses_upload() {
        let cli = parse(&["upload", "/profile/avatar", "avatar", "./me.png"]);
        assert_eq!(
            cli.command,
            Command::Upload {
                path: "/profile/avatar".into(),
                field: "avatar".into(),
                file: PathBuf::from("./me.png"),
            }
        );
    }

    #[test]
    fn wrong_arity_and_unknown_commands_are_rejected() {
        assert_eq!(parse_err(&["get"]).kind(), ErrorKind::MissingRequiredArgument);
        assert_eq!(parse_err(&["logout", "now"]).kind(), ErrorKind::UnknownArgument);
        assert_eq!(parse_err(&["frobnicate"]).kind(), ErrorKind::InvalidSubcommand);
        assert!(Cli::try_parse_from(["booking-admin"]).is_err());
    }

    #[test]
    fn help_is_a_display_request() {
        assert_eq!(parse_err(&["--help"]).kind(), ErrorKind::DisplayHelp);
    }

    #[test]
    fn config_flag_requires_value() {
        let err = parse_err(&["whoami", "--config"]);
        assert_eq!(err.kind(), ErrorKind::InvalidValue);
    }
}
