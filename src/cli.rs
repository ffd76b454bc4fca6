use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "classcast")]
#[command(author, version, about = "ABR HLS transcoding and live ingest for course video")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the ingest and conversion server
    Start {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Probe a media file and display its geometry
    Probe {
        /// File to probe
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the rendition ladder and transcoder command for a file
    Plan {
        /// File to plan
        #[arg(required = true)]
        file: PathBuf,

        /// Plan a live transcode instead of VOD
        #[arg(long)]
        live: bool,
    },

    /// Convert the classes of a course into HLS
    Convert {
        /// Course id
        #[arg(long)]
        course: String,

        /// Classes as CLASS_ID=SOURCE_PATH, in catalog order
        #[arg(required = true, value_parser = parse_class_arg)]
        classes: Vec<(String, PathBuf)>,
    },

    /// Detect hardware acceleration on this host
    DetectAccel,

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}

fn parse_class_arg(arg: &str) -> Result<(String, PathBuf), String> {
    match arg.split_once('=') {
        Some((class, path)) if !class.is_empty() && !path.is_empty() => {
            Ok((class.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected CLASS_ID=SOURCE_PATH, got '{arg}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_args() {
        assert_eq!(
            parse_class_arg("3=/up/lesson.mp4").unwrap(),
            ("3".to_string(), PathBuf::from("/up/lesson.mp4"))
        );
        assert!(parse_class_arg("3").is_err());
        assert!(parse_class_arg("=/x.mp4").is_err());
    }

    #[test]
    fn convert_command_parses() {
        let cli = Cli::try_parse_from(["classcast", "convert", "--course", "7", "1=/a.mp4", "2=/b.mp4"]).unwrap();
        match cli.command {
            Commands::Convert { course, classes } => {
                assert_eq!(course, "7");
                assert_eq!(classes.len(), 2);
            }
            _ => panic!("expected convert"),
        }
    }
}
