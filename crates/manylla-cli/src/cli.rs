//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use manylla_sync::RecipientType;

#[derive(Parser, Debug)]
#[command(name = "manylla")]
#[command(version, about = "Manylla encrypted sync", long_about = None)]
pub struct Cli {
    /// Settings file layered over the global one
    #[arg(long, global = true, env = "MANYLLA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory for credentials and the invite table
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Blob server API root
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a new sync group and print its recovery phrase
    Enable {
        /// Snapshot JSON to upload as the group's first state
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    /// Join a group with a recovery phrase, invite code or invite URL
    Join {
        input: String,
        /// Write the downloaded snapshot here
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Upload a snapshot, replacing the group's current one
    Push { file: PathBuf },
    /// Download the group's snapshot
    Pull {
        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Show whether sync is on and whether the server answers
    Status,
    /// Create a 24-hour invite for another device
    Invite,
    /// Create an encrypted share link for one profile
    Share(ShareArgs),
    /// Decrypt a share payload with the key from its link
    OpenShare {
        url: String,
        /// Encrypted payload, raw or as the server's JSON response
        #[arg(long)]
        data: PathBuf,
    },
    /// Pull in the background and report changes until Ctrl-C
    Watch {
        /// Seconds between pulls (defaults to the configured interval)
        #[arg(long)]
        interval: Option<u64>,
        /// Rewrite this file on every pulled snapshot
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Turn sync off on this device
    Disable {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Args, Debug)]
pub struct ShareArgs {
    /// Snapshot JSON holding the profile
    #[arg(long)]
    pub snapshot: PathBuf,
    /// Profile id (defaults to the first profile)
    #[arg(long)]
    pub profile: Option<String>,
    /// Category to include; repeat for several
    #[arg(long = "category", required = true)]
    pub categories: Vec<String>,
    #[arg(long)]
    pub include_photo: bool,
    /// Days until the link expires
    #[arg(long)]
    pub days: Option<u32>,
    #[arg(long, default_value_t = RecipientType::Custom)]
    pub recipient: RecipientType,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn share_collects_repeated_categories() {
        let cli = Cli::try_parse_from([
            "manylla",
            "share",
            "--snapshot",
            "data.json",
            "--category",
            "medical",
            "--category",
            "education",
            "--recipient",
            "medical",
            "--days",
            "30",
        ])
        .unwrap();
        let Command::Share(args) = cli.command else {
            panic!("expected share");
        };
        assert_eq!(args.categories, ["medical", "education"]);
        assert_eq!(args.recipient, RecipientType::Medical);
        assert_eq!(args.days, Some(30));
        assert!(!args.include_photo);
    }

    #[test]
    fn share_requires_a_category() {
        assert!(Cli::try_parse_from(["manylla", "share", "--snapshot", "data.json"]).is_err());
    }

    #[test]
    fn unknown_recipient_is_rejected() {
        assert!(
            Cli::try_parse_from([
                "manylla",
                "share",
                "--snapshot",
                "d.json",
                "--category",
                "medical",
                "--recipient",
                "doctor",
            ])
            .is_err()
        );
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "manylla",
            "status",
            "--api-url",
            "http://localhost:8080",
            "--log-json",
        ])
        .unwrap();
        assert_eq!(cli.api_url.as_deref(), Some("http://localhost:8080"));
        assert!(cli.log_json);
        assert!(matches!(cli.command, Command::Status));
    }

    #[test]
    fn join_takes_positional_input() {
        let cli = Cli::try_parse_from(["manylla", "join", "ABCD-2345"]).unwrap();
        assert!(matches!(cli.command, Command::Join { input, out: None } if input == "ABCD-2345"));
    }
}
