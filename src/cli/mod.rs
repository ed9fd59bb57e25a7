use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "autoscribe",
    about = "Autoscribe - Transcribe YouTube videos through pluggable audio backends and speech-to-text providers",
    version,
    long_about = "Extracts audio for YouTube videos through a prioritized chain of backends, submits it to a speech-to-text provider, polls the job to completion and records every step in a video store. Finished transcripts can trigger blog generation."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./config.yaml or the user config directory)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Transcribe one or more videos
    Transcribe {
        /// Video ids or YouTube URLs
        #[arg(value_name = "VIDEO", required = true)]
        videos: Vec<String>,

        /// Speech-to-text provider (defaults to the transcription_provider setting)
        #[arg(short, long)]
        provider: Option<String>,

        /// Language code for transcription (auto-detect if not specified)
        #[arg(short, long, value_name = "LANG")]
        language: Option<String>,

        /// Provider API key (defaults to the variable named by transcription.api_key_env)
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Extract audio for a video without transcribing it
    ExtractAudio {
        /// Video id or YouTube URL
        #[arg(value_name = "VIDEO")]
        video: String,
    },

    /// Register a newly discovered video, transcribing it when auto_transcribe is on
    Ingest {
        /// Video id or YouTube URL
        #[arg(value_name = "VIDEO")]
        video: String,

        /// Video title, passed on to blog generation
        #[arg(short, long)]
        title: Option<String>,

        /// Provider API key (defaults to the variable named by transcription.api_key_env)
        #[arg(long)]
        api_key: Option<String>,
    },

    /// Show the stored state of a video
    Status {
        /// Video id or YouTube URL
        #[arg(value_name = "VIDEO")]
        video: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Fail records left in processing by an interrupted run
    Reconcile {
        /// Only reset records untouched for this many minutes
        #[arg(long, value_name = "MINUTES")]
        older_than_minutes: Option<u64>,
    },

    /// Show or initialise the configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },

    /// List supported transcription providers and configured audio backends
    Providers,
}

#[derive(ValueEnum, Clone, Debug)]
pub enum OutputFormat {
    /// Human readable summary
    Text,
    /// The stored record as JSON
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_transcribe_accepts_several_videos() {
        let cli = Cli::parse_from([
            "autoscribe",
            "transcribe",
            "V1",
            "https://youtu.be/V2",
            "--provider",
            "audio-processor",
        ]);
        match cli.command {
            Commands::Transcribe {
                videos, provider, ..
            } => {
                assert_eq!(videos, vec!["V1", "https://youtu.be/V2"]);
                assert_eq!(provider.as_deref(), Some("audio-processor"));
            }
            _ => panic!("expected transcribe"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["autoscribe", "status", "V1", "--format", "json", "-v", "--config", "c.yaml"]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("c.yaml")));
        assert!(matches!(
            cli.command,
            Commands::Status {
                format: OutputFormat::Json,
                ..
            }
        ));
    }
}
