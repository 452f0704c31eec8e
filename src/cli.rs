use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{Config, GapFill, TargetLanguage, VoiceGender};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Dub one transcript (and optionally mux it into its video)
    Process {
        /// Transcript file (.json or .srt)
        #[arg(short, long)]
        input: PathBuf,

        /// Original video to mux the dubbed track into
        #[arg(long)]
        video: Option<PathBuf>,

        /// Target language: en, fr or de
        #[arg(short = 'l', long, default_value = "en")]
        target_lang: TargetLanguage,

        /// Output directory for processed files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        #[command(flatten)]
        options: JobOptions,
    },

    /// Dub every video in a directory that has a transcript beside it
    Batch {
        /// Input directory containing videos and transcripts
        #[arg(short, long)]
        input_dir: PathBuf,

        /// Target language: en, fr or de
        #[arg(short = 'l', long, default_value = "en")]
        target_lang: TargetLanguage,

        /// Output directory for processed files
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        #[command(flatten)]
        options: JobOptions,
    },

    /// Align a transcript against measured clip durations and print the timeline
    Align {
        /// Transcript file (.json or .srt)
        #[arg(short, long)]
        input: PathBuf,

        /// JSON array of clip durations in ms, one per segment (null = failed)
        #[arg(short, long)]
        durations: PathBuf,

        /// Write the timeline here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        policy: PolicyOptions,
    },

    /// Mux a dubbed track and subtitles into a video
    Mux {
        /// Original video file
        #[arg(long)]
        video: PathBuf,

        /// Dubbed audio track
        #[arg(short, long)]
        audio: PathBuf,

        /// Subtitle file
        #[arg(short, long)]
        subtitles: Option<PathBuf>,

        /// Output video file
        #[arg(short, long)]
        output: PathBuf,

        /// Language tag for the new streams
        #[arg(short = 'l', long, default_value = "en")]
        target_lang: TargetLanguage,
    },

    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Write the default configuration
    Init {
        /// Destination file
        #[arg(default_value = "dubline.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Alignment knobs that override the configuration file
#[derive(clap::Args, Debug, Default)]
pub struct PolicyOptions {
    /// Largest rendered/original duration ratio before a clip is cut
    #[arg(long)]
    pub max_stretch_ratio: Option<f64>,

    /// Drift in ms that triggers a hard resync
    #[arg(long)]
    pub max_drift_ms: Option<u64>,

    /// Failed segment handling: silence or compress-next
    #[arg(long)]
    pub gap_fill: Option<GapFill>,
}

impl PolicyOptions {
    pub fn apply(&self, config: &mut Config) {
        if let Some(ratio) = self.max_stretch_ratio {
            config.alignment.max_stretch_ratio = ratio;
        }
        if let Some(drift) = self.max_drift_ms {
            config.alignment.max_drift_ms = drift;
        }
        if let Some(gap_fill) = self.gap_fill {
            config.alignment.gap_fill = gap_fill;
        }
    }
}

/// Job-level overrides shared by `process` and `batch`
#[derive(clap::Args, Debug, Default)]
pub struct JobOptions {
    /// Voice gender used to pick the default voice
    #[arg(long)]
    pub voice_gender: Option<VoiceGender>,

    /// Explicit synthesizer voice
    #[arg(long)]
    pub voice: Option<String>,

    /// Concurrent translation/synthesis calls
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Failed segment fraction above which a job is abandoned
    #[arg(long)]
    pub max_failed_ratio: Option<f64>,

    /// Skip the translator and ffmpeg availability checks
    #[arg(long)]
    pub skip_checks: bool,

    #[command(flatten)]
    pub policy: PolicyOptions,
}

impl JobOptions {
    pub fn apply(&self, config: &mut Config) {
        if let Some(gender) = self.voice_gender {
            config.synthesis.voice_gender = gender;
        }
        if let Some(voice) = &self.voice {
            config.synthesis.voice = Some(voice.clone());
        }
        if let Some(workers) = self.workers {
            config.pipeline.workers = workers;
        }
        if let Some(ratio) = self.max_failed_ratio {
            config.pipeline.max_failed_ratio = ratio;
        }
        self.policy.apply(config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_arguments_override_config() {
        let args = Args::parse_from([
            "dubline",
            "process",
            "--input",
            "talk.json",
            "-l",
            "fr",
            "--workers",
            "8",
            "--gap-fill",
            "compress-next",
            "--max-drift-ms",
            "1500",
        ]);

        let Commands::Process { target_lang, options, video, .. } = args.command else {
            panic!("expected process command");
        };
        assert_eq!(target_lang, TargetLanguage::French);
        assert!(video.is_none());

        let mut config = Config::default();
        options.apply(&mut config);
        assert_eq!(config.pipeline.workers, 8);
        assert_eq!(config.alignment.gap_fill, GapFill::CompressNext);
        assert_eq!(config.alignment.max_drift_ms, 1_500);
        assert_eq!(config.alignment.max_stretch_ratio, 1.5);
    }

    #[test]
    fn test_unknown_language_is_rejected() {
        let result = Args::try_parse_from(["dubline", "process", "--input", "a.srt", "-l", "ja"]);
        assert!(result.is_err());
    }
}
