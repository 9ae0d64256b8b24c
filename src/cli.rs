//! Command line interface built on clap.
//!
//! [`Cli`] carries the global flags (who is acting, which sensor to replay)
//! and a [`Command`] per lifecycle operation.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::lifecycle::{Caller, Role};
use crate::location::RawReading;

/// fieldvisit: field-service visits gated on GPS evidence.
#[derive(Debug, Parser)]
#[command(name = "fieldvisit", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// User id to act as.
    #[arg(long = "as", global = true, default_value = "local")]
    pub user: String,

    /// Role of the acting user.
    #[arg(long, global = true, value_enum, default_value_t = RoleArg::Technician)]
    pub role: RoleArg,

    /// Answer every sensor read with this fix: LAT,LON,ACCURACY.
    #[arg(
        long,
        global = true,
        value_parser = parse_fix,
        allow_hyphen_values = true,
        conflicts_with = "fixes"
    )]
    pub fix: Option<RawReading>,

    /// JSON file with a scripted list of sensor responses.
    #[arg(long, global = true)]
    pub fixes: Option<PathBuf>,

    /// Browser user-agent to tune acquisition for. Overrides the config file.
    #[arg(long, global = true)]
    pub user_agent: Option<String>,

    /// Enable verbose output.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

impl Cli {
    pub fn caller(&self) -> Caller {
        Caller {
            id: self.user.clone(),
            role: self.role.into(),
        }
    }
}

/// Role argument accepted by the CLI, mapped to [`Role`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RoleArg {
    Admin,
    Technician,
}

impl From<RoleArg> for Role {
    fn from(arg: RoleArg) -> Self {
        match arg {
            RoleArg::Admin => Role::Admin,
            RoleArg::Technician => Role::Technician,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Register a new service visit.
    Create {
        id: String,
        #[arg(long)]
        client: Option<String>,
        #[arg(long)]
        address: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Assign right away.
        #[arg(long)]
        technician: Option<String>,
    },

    /// Assign a technician to a pending visit.
    Assign { id: String, technician: String },

    /// Remove the technician from a pending visit.
    Unassign { id: String },

    /// Check in on site.
    Start { id: String },

    /// Close the visit with proof of completion.
    Finish {
        id: String,
        /// Photo of the finished work.
        #[arg(long)]
        photo: PathBuf,
        #[arg(long)]
        client_signature: Option<PathBuf>,
        #[arg(long)]
        technician_signature: Option<PathBuf>,
    },

    /// Cancel the visit.
    Cancel {
        id: String,
        #[arg(long)]
        reason: String,
    },

    /// Show one visit.
    Show { id: String },

    /// List all visits.
    List,

    /// Acquire the current position.
    Locate {
        /// Use escalating multi-attempt acquisition.
        #[arg(long)]
        precise: bool,
    },

    /// Report and request location permission.
    Permission,

    /// Show delivered notifications, optionally for one user or `role:admin`.
    Inbox { target: Option<String> },
}

fn parse_fix(value: &str) -> Result<RawReading, String> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    let &[lat, lon, acc] = parts.as_slice() else {
        return Err("expected LAT,LON,ACCURACY".to_string());
    };
    let number = |s: &str| {
        s.parse::<f64>()
            .map_err(|e| format!("invalid number {s:?}: {e}"))
    };
    Ok(RawReading::new(number(lat)?, number(lon)?, number(acc)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_start_subcommand() {
        let cli = Cli::parse_from(["fieldvisit", "start", "S001"]);
        assert_eq!(cli.caller(), Caller::technician("local"));
        match cli.command {
            Command::Start { id } => assert_eq!(id, "S001"),
            _ => panic!("expected Start command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "fieldvisit",
            "--as",
            "root",
            "--role",
            "admin",
            "--fix",
            "-23.55,-46.63,8",
            "--verbose",
            "list",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.caller(), Caller::admin("root"));
        let fix = cli.fix.unwrap();
        assert_eq!(fix.latitude, -23.55);
        assert_eq!(fix.accuracy, 8.0);
    }

    #[test]
    fn cli_parses_finish_with_proof() {
        let cli = Cli::parse_from([
            "fieldvisit",
            "finish",
            "S003",
            "--photo",
            "work.jpg",
            "--client-signature",
            "client.png",
        ]);
        match cli.command {
            Command::Finish {
                id,
                photo,
                client_signature,
                technician_signature,
            } => {
                assert_eq!(id, "S003");
                assert_eq!(photo, PathBuf::from("work.jpg"));
                assert_eq!(client_signature, Some(PathBuf::from("client.png")));
                assert!(technician_signature.is_none());
            }
            _ => panic!("expected Finish command"),
        }
    }

    #[test]
    fn cancel_requires_reason() {
        assert!(Cli::try_parse_from(["fieldvisit", "cancel", "S001"]).is_err());
    }

    #[test]
    fn malformed_fix_is_rejected() {
        assert!(parse_fix("1,2").is_err());
        assert!(parse_fix("a,b,c").is_err());
        assert!(Cli::try_parse_from(["fieldvisit", "--fix", "1;2;3", "list"]).is_err());
    }

    #[test]
    fn fix_and_fixes_conflict() {
        let parsed = Cli::try_parse_from([
            "fieldvisit",
            "--fix",
            "1,2,3",
            "--fixes",
            "steps.json",
            "list",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
