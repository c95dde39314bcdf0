use clap::{Parser, Subcommand, ValueEnum};

use gatekeeper::models::{DocsLocation, UiMode, UserSettings};

/// Gatekeeper: multi-party approval workflow for privileged access
#[derive(Parser)]
#[command(name = "gatekeeper", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to bind (defaults to GATEKEEPER_PORT, then 8080)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Apply database migrations and exit
    Migrate,

    /// Request, grant and list approvals
    Approval {
        #[command(subcommand)]
        command: ApprovalCommands,
    },

    /// Read and write user settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommands,
    },
}

#[derive(Subcommand)]
pub enum ApprovalCommands {
    /// File a new approval request
    Request {
        /// Subject kind: endpoint (client), job (hunt) or scheduled_job (cron)
        #[arg(long)]
        kind: String,
        #[arg(long)]
        subject: String,
        /// Requesting identity
        #[arg(long = "as")]
        requestor: String,
        #[arg(long)]
        reason: String,
        /// Comma-separated identities asked to review
        #[arg(long, value_delimiter = ',')]
        approvers: Vec<String>,
    },
    /// Grant the latest request a requestor filed for a subject
    Grant {
        #[arg(long)]
        kind: String,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        requestor: String,
        /// Granting identity
        #[arg(long = "as")]
        approver: String,
        #[arg(long)]
        justification: Option<String>,
    },
    /// List an identity's approvals of one kind, newest first
    List {
        #[arg(long)]
        kind: String,
        #[arg(long = "as")]
        requestor: String,
        #[arg(long, default_value = "0")]
        offset: usize,
        #[arg(long)]
        count: Option<usize>,
    },
}

#[derive(Subcommand)]
pub enum SettingsCommands {
    /// Print an identity's settings as JSON
    Get {
        #[arg(long = "as")]
        identity: String,
    },
    /// Replace an identity's settings
    Set {
        /// Acting identity
        #[arg(long = "as")]
        caller: String,
        /// Identity whose settings are written (defaults to the caller)
        #[arg(long)]
        user: Option<String>,
        #[arg(long, value_enum, default_value = "basic")]
        mode: ModeArg,
        #[arg(long, default_value_t = false)]
        canary_mode: bool,
        #[arg(long, value_enum, default_value = "local")]
        docs_location: DocsArg,
    },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Basic,
    Advanced,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum DocsArg {
    Local,
    Remote,
}

/// Build the full settings record from `settings set` flags.
pub fn settings_from_args(mode: ModeArg, canary_mode: bool, docs_location: DocsArg) -> UserSettings {
    UserSettings {
        mode: match mode {
            ModeArg::Basic => UiMode::Basic,
            ModeArg::Advanced => UiMode::Advanced,
        },
        canary_mode,
        docs_location: match docs_location {
            DocsArg::Local => DocsLocation::Local,
            DocsArg::Remote => DocsLocation::Remote,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_grant() {
        let cli = Cli::try_parse_from([
            "gatekeeper", "approval", "grant", "--kind", "client", "--subject", "c1",
            "--requestor", "u1", "--as", "approver",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Approval {
                command: ApprovalCommands::Grant { requestor, approver, justification, .. },
            }) => {
                assert_eq!(requestor, "u1");
                assert_eq!(approver, "approver");
                assert!(justification.is_none());
            }
            _ => panic!("expected approval grant"),
        }
    }

    #[test]
    fn test_settings_flags() {
        let settings = settings_from_args(ModeArg::Advanced, true, DocsArg::Remote);
        assert_eq!(settings.mode, UiMode::Advanced);
        assert!(settings.canary_mode);
        assert_eq!(settings.docs_location, DocsLocation::Remote);
    }
}
