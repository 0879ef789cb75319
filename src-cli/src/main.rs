//! Panorec Command-Line Interface
//!
//! Drives a capture session against a synthetic scene, merges audio into
//! finished videos and manages the persisted configuration.

mod colors;
mod commands;
mod exit_codes;
mod logging;

use clap::{Parser, Subcommand};
use exit_codes::ExitCode;
use std::path::PathBuf;

/// Panorec - 2D and 360° capture CLI
#[derive(Parser, Debug)]
#[command(name = "panorec")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format for scripting
    #[arg(long, global = true)]
    json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture the built-in test scene to a file or stream
    Record(RecordOptions),
    /// Merge an audio track into a finished video
    Merge {
        /// Video file (mp4)
        video: PathBuf,
        /// Audio file (wav)
        audio: PathBuf,
        /// Directory for the merged file (defaults to the output directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Give up waiting for the merged file after this many seconds
        #[arg(long, default_value_t = 50)]
        timeout: u64,
    },
    /// Show or change the persisted configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the current configuration
    Show,
    /// Print the configuration file location
    Path,
    /// Set the output directory (empty string restores the default)
    SetOutput { directory: String },
    /// Set the encoder executable (empty string restores lookup on PATH)
    SetEncoder { path: String },
}

#[derive(Parser, Debug, Clone, Default)]
pub struct RecordOptions {
    /// Seconds of scene time to capture
    #[arg(short, long, default_value_t = 5.0)]
    duration: f64,

    /// Host render rate in frames per second
    #[arg(long, default_value_t = 60)]
    render_fps: u32,

    /// Capture format: normal, panorama
    #[arg(short, long)]
    format: Option<String>,

    /// Panorama projection: cubemap, equirectangular
    #[arg(long)]
    projection: Option<String>,

    /// Output frame size, e.g. 1920x1080
    #[arg(long)]
    size: Option<String>,

    /// Cubemap face size: 512, 1024, 2048
    #[arg(long)]
    cube_size: Option<u32>,

    /// Output framerate: 18, 24, 30, 45, 60
    #[arg(long)]
    fps: Option<u32>,

    /// Encode quality: low, medium, high
    #[arg(long)]
    quality: Option<String>,

    /// Anti-aliasing samples: 1, 2, 4, 8
    #[arg(long)]
    antialiasing: Option<u32>,

    /// Stream to this rtmp:// address instead of writing a file
    #[arg(long)]
    stream: Option<String>,

    /// Output directory (overrides the configured one)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Render as fast as possible with fixed frame steps
    #[arg(long)]
    offline: bool,

    /// Capture the presented surface instead of a dedicated target
    #[arg(long)]
    shared: bool,

    /// Save a PNG of the last captured frame
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Record a test tone and merge it into the video
    #[arg(long)]
    tone: bool,
}

fn main() {
    let cli = Cli::parse();
    let log_guard = logging::init_logging(cli.verbose, cli.quiet);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to create Tokio runtime");

    let exit_code = runtime.block_on(run(cli));
    drop(runtime);
    drop(log_guard);
    std::process::exit(exit_code.as_i32());
}

async fn run(cli: Cli) -> ExitCode {
    match cli.command {
        Commands::Record(options) => commands::record(options, cli.json, cli.quiet).await,
        Commands::Merge {
            video,
            audio,
            output,
            timeout,
        } => commands::merge(video, audio, output, timeout, cli.json, cli.quiet).await,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(cli.json),
            ConfigAction::Path => commands::config_path(cli.json),
            ConfigAction::SetOutput { directory } => {
                commands::config_set_output(directory, cli.json, cli.quiet)
            }
            ConfigAction::SetEncoder { path } => {
                commands::config_set_encoder(path, cli.json, cli.quiet)
            }
        },
        Commands::Version => {
            commands::version(cli.json);
            ExitCode::Success
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    /// Verify the CLI definition is valid
    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_record_defaults() {
        let cli = Cli::try_parse_from(["panorec", "record"]).unwrap();
        assert!(!cli.json);
        assert!(!cli.quiet);
        let Commands::Record(options) = cli.command else {
            panic!("expected record command");
        };
        assert_eq!(options.duration, 5.0);
        assert_eq!(options.render_fps, 60);
        assert!(options.format.is_none());
        assert!(!options.offline);
        assert!(!options.tone);
    }

    #[test]
    fn parse_record_panorama() {
        let cli = Cli::try_parse_from([
            "panorec",
            "--json",
            "record",
            "--format",
            "panorama",
            "--projection",
            "equirect",
            "--size",
            "1920x1080",
            "--fps",
            "24",
            "--offline",
            "-d",
            "2.5",
        ])
        .unwrap();
        assert!(cli.json);
        let Commands::Record(options) = cli.command else {
            panic!("expected record command");
        };
        assert_eq!(options.format.as_deref(), Some("panorama"));
        assert_eq!(options.projection.as_deref(), Some("equirect"));
        assert_eq!(options.size.as_deref(), Some("1920x1080"));
        assert_eq!(options.fps, Some(24));
        assert_eq!(options.duration, 2.5);
        assert!(options.offline);
    }

    #[test]
    fn parse_merge() {
        let cli = Cli::try_parse_from(["panorec", "merge", "a.mp4", "b.wav", "--timeout", "5"])
            .unwrap();
        match cli.command {
            Commands::Merge {
                video,
                audio,
                output,
                timeout,
            } => {
                assert_eq!(video, PathBuf::from("a.mp4"));
                assert_eq!(audio, PathBuf::from("b.wav"));
                assert!(output.is_none());
                assert_eq!(timeout, 5);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn parse_config_set_output() {
        let cli = Cli::try_parse_from(["panorec", "config", "set-output", "/tmp/out"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigAction::SetOutput { ref directory }
            } if directory == "/tmp/out"
        ));
    }

    #[test]
    fn parse_merge_requires_both_inputs() {
        assert!(Cli::try_parse_from(["panorec", "merge", "a.mp4"]).is_err());
    }

    #[test]
    fn parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["panorec", "version", "--json", "-q"]).unwrap();
        assert!(cli.json);
        assert!(cli.quiet);
        assert!(matches!(cli.command, Commands::Version));
    }
}
