use crate::error::{Error, Result};

use std::fmt;
use std::path::Path;

use serde::Deserialize;

pub const SUPPORTED_FORMATS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v", "mpeg", "mpg", "3gp",
];

pub fn container_extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(std::ffi::OsStr::to_str)
        .map(str::to_lowercase)
}

pub fn is_supported_container(path: &Path) -> bool {
    container_extension(path)
        .map(|ext| SUPPORTED_FORMATS.contains(&ext.as_str()))
        .unwrap_or(false)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameRate {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameRate {
    pub fn new(numerator: u32, denominator: u32) -> Option<Self> {
        (numerator > 0 && denominator > 0).then_some(Self { numerator, denominator })
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.split_once('/') {
            Some((num, den)) => Self::new(num.trim().parse().ok()?, den.trim().parse().ok()?),
            None => {
                let fps: f64 = value.trim().parse().ok()?;
                if !fps.is_finite() || fps <= 0.0 {
                    return None;
                }
                Self::new((fps * 1000.0).round() as u32, 1000)
            }
        }
    }

    pub fn as_f64(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct VideoMetadata {
    pub frame_rate: FrameRate,
    pub frame_count: u64,
    pub has_audio: bool,
    pub width: u32,
    pub height: u32,
    pub duration: Option<f64>,
    pub codec: String,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

impl VideoMetadata {
    /// Reads the JSON document printed by `ffprobe -print_format json -show_format -show_streams`.
    pub fn from_probe_json(json: &str) -> Result<Self> {
        let probe: ProbeOutput = serde_json::from_str(json)
            .map_err(|e| Error::probe_failed(format!("unreadable ffprobe output: {}", e), String::new()))?;

        let has_audio = probe.streams.iter().any(|s| s.codec_type.as_deref() == Some("audio"));
        let video = probe.streams.iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
            .ok_or_else(|| Self::invalid("no video stream found in file"))?;

        let (width, height) = match (video.width, video.height) {
            (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
            _ => return Err(Self::invalid("could not determine video dimensions")),
        };

        let frame_rate = [&video.r_frame_rate, &video.avg_frame_rate].into_iter()
            .flatten()
            .find_map(|value| FrameRate::parse(value))
            .ok_or_else(|| Self::invalid("could not determine frame rate"))?;

        let duration = video.duration.as_deref()
            .or_else(|| probe.format.as_ref().and_then(|f| f.duration.as_deref()))
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|value| value.is_finite() && *value > 0.0);

        let frame_count = video.nb_frames.as_deref()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|count| *count > 0)
            .or_else(|| duration.map(|seconds| (seconds * frame_rate.as_f64()).round() as u64))
            .filter(|count| *count > 0)
            .ok_or_else(|| Self::invalid("could not determine frame count"))?;

        Ok(Self {
            frame_rate,
            frame_count,
            has_audio,
            width,
            height,
            duration,
            codec: video.codec_name.clone().unwrap_or_else(|| String::from("unknown")),
        })
    }

    fn invalid(reason: &str) -> Error {
        Error::probe_failed(reason.to_string(), String::new())
    }
}
