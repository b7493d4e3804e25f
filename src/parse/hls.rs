use crate::error::{Result, StreamError};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_PLAYLIST_NAME: &str = "index.m3u8";
pub const DEFAULT_SEGMENT_PATTERN: &str = "segment_%06d.ts";
pub const DEFAULT_SEGMENT_DURATION_SECS: i32 = 6;
pub const DEFAULT_LIST_SIZE: i32 = 6;
pub const DEFAULT_CODEC: &str = "copy";

/// How one stream is re-encoded into an HLS playlist.
#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct HlsConfig {
    pub input: String,
    pub output_dir: String,
    pub playlist_name: String,
    pub segment_pattern: String,
    pub segment_duration_secs: i32,
    /// Segments kept in the live playlist.
    pub list_size: i32,
    pub loop_input: bool,
    pub delete_segments: bool,
    pub video_codec: String,
    pub audio_codec: String,
    /// Appended to the encoder invocation as-is, right before the playlist path.
    pub extra_args: Vec<String>,
}

impl HlsConfig {
    pub fn new(input: impl Into<String>, output_dir: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output_dir: output_dir.into(),
            ..Default::default()
        }
    }

    pub fn playlist_path(&self) -> String {
        join(&self.output_dir, &self.playlist_name)
    }

    pub fn segment_path_pattern(&self) -> String {
        join(&self.output_dir, &self.segment_pattern)
    }
}

fn join(dir: &str, file: &str) -> String {
    Path::new(dir).join(file).to_string_lossy().into_owned()
}

fn trimmed_or(value: &str, default: &str) -> String {
    match value.trim() {
        "" => default.to_string(),
        v => v.to_string(),
    }
}

/*
    @@@
    @normalize_config();
    . Trims every string field and rejects a blank input or output directory.
    . Rejects a negative list size; zero list size and non-positive segment duration fall back to 6.
    . Fills playlist name, segment pattern and both codecs with their defaults when blank.
    . Never touches the caller's value; running it on its own output returns the same config.
*/
pub fn normalize_config(cfg: &HlsConfig) -> Result<HlsConfig> {
    let input = cfg.input.trim();
    if input.is_empty() {
        return Err(StreamError::validation("input path is required"));
    }
    let output_dir = cfg.output_dir.trim();
    if output_dir.is_empty() {
        return Err(StreamError::validation("output dir is required"));
    }
    if cfg.list_size < 0 {
        return Err(StreamError::validation("list size must be non-negative"));
    }

    Ok(HlsConfig {
        input: input.to_string(),
        output_dir: output_dir.to_string(),
        playlist_name: trimmed_or(&cfg.playlist_name, DEFAULT_PLAYLIST_NAME),
        segment_pattern: trimmed_or(&cfg.segment_pattern, DEFAULT_SEGMENT_PATTERN),
        segment_duration_secs: if cfg.segment_duration_secs > 0 {
            cfg.segment_duration_secs
        } else {
            DEFAULT_SEGMENT_DURATION_SECS
        },
        list_size: if cfg.list_size == 0 {
            DEFAULT_LIST_SIZE
        } else {
            cfg.list_size
        },
        loop_input: cfg.loop_input,
        delete_segments: cfg.delete_segments,
        video_codec: trimmed_or(&cfg.video_codec, DEFAULT_CODEC),
        audio_codec: trimmed_or(&cfg.audio_codec, DEFAULT_CODEC),
        extra_args: cfg.extra_args.clone(),
    })
}

/// Encoder arguments for an already normalized config.
pub fn build_hls_args(cfg: &HlsConfig) -> Vec<String> {
    let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-loglevel", "error"]
        .into_iter()
        .map(String::from)
        .collect();

    if cfg.loop_input {
        args.extend(["-stream_loop".to_string(), "-1".to_string()]);
    }

    args.extend([
        "-i".to_string(),
        cfg.input.clone(),
        "-c:v".to_string(),
        cfg.video_codec.clone(),
        "-c:a".to_string(),
        cfg.audio_codec.clone(),
        "-f".to_string(),
        "hls".to_string(),
        "-hls_time".to_string(),
        cfg.segment_duration_secs.to_string(),
        "-hls_list_size".to_string(),
        cfg.list_size.to_string(),
    ]);

    let mut flags = vec!["independent_segments"];
    if cfg.delete_segments {
        flags.push("delete_segments");
    }
    args.extend(["-hls_flags".to_string(), flags.join("+")]);
    args.extend(["-hls_segment_filename".to_string(), cfg.segment_path_pattern()]);

    args.extend(cfg.extra_args.iter().cloned());
    args.push(cfg.playlist_path());
    args
}
