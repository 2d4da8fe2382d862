use crate::error::{Error, Result};
use crate::ffmpeg;
use crate::frame::{FrameNaming, FrameSet};
use crate::process::{CommandArgs, ProcessEvent, ProcessRunner};
use crate::progress::{ProgressSink, Stage};
use crate::video::VideoMetadata;

use std::fs;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AudioTrack {
    pub path: PathBuf,
}

/// Parses ffprobe's JSON report, attaching the tool's stderr when it is unusable.
pub fn parse_probe_output(stdout: &str, stderr: &str) -> Result<VideoMetadata> {
    VideoMetadata::from_probe_json(stdout).map_err(|error| match error {
        Error::ProbeFailed { reason, .. } => Error::probe_failed(reason, Error::excerpt(stderr)),
        other => other,
    })
}

pub struct FrameExtractor<'a> {
    runner: &'a ProcessRunner,
    ffprobe: &'a Path,
    ffmpeg: &'a Path,
}

impl<'a> FrameExtractor<'a> {
    const MIN_FRAME_TOLERANCE: u64 = 2;
    const FRAME_TOLERANCE_DIVISOR: u64 = 100;

    pub fn new(runner: &'a ProcessRunner, ffprobe: &'a Path, ffmpeg: &'a Path) -> Self {
        Self { runner, ffprobe, ffmpeg }
    }

    pub fn probe(&self, input: &Path) -> Result<VideoMetadata> {
        let args = CommandArgs::new()
            .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(input);
        let output = self.runner
            .run(self.ffprobe, args.as_slice(), |_| {})
            .map_err(|e| Error::from_process(e, Error::probe_failed))?;

        let metadata = parse_probe_output(&output.stdout, &output.stderr)?;
        tracing::info!(
            input = %input.display(),
            frames = metadata.frame_count,
            fps = %metadata.frame_rate,
            width = metadata.width,
            height = metadata.height,
            codec = %metadata.codec,
            duration = ?metadata.duration,
            has_audio = metadata.has_audio,
            "probed source video"
        );
        Ok(metadata)
    }

    pub fn extract(
        &self,
        input: &Path,
        metadata: &VideoMetadata,
        frame_dir: &Path,
        audio_path: &Path,
        sink: &mut ProgressSink,
    ) -> Result<(FrameSet, Option<AudioTrack>)> {
        fs::create_dir_all(frame_dir).map_err(Error::file_system(Stage::Extracting, frame_dir))?;
        let naming = FrameNaming::for_count(metadata.frame_count);
        let total = metadata.frame_count;

        let args = ffmpeg::base_args()
            .arg("-i")
            .arg(input)
            .args(["-map", "0:v:0", "-pix_fmt", "rgb24"])
            .args(ffmpeg::progress_args().as_slice())
            .arg(frame_dir.join(naming.pattern()));

        let output = self.runner
            .run(self.ffmpeg, args.as_slice(), |event| {
                if let ProcessEvent::Stdout(line) = event {
                    if let Some(frame) = ffmpeg::parse_progress_line(line) {
                        sink.update(frame, format!("Extracting frame {}/{}", frame.min(total), total));
                    }
                }
            })
            .map_err(|e| Error::from_process(e, Error::extraction_failed))?;

        let frames = FrameSet::scan(frame_dir, naming)
            .map_err(Error::file_system(Stage::Extracting, frame_dir))?;
        Self::verify_count(frames.len() as u64, total)
            .map_err(|reason| Error::extraction_failed(reason, Error::excerpt(&output.stderr)))?;

        let audio = if metadata.has_audio {
            sink.update(total, "Extracting audio track");
            Some(self.extract_audio(input, audio_path)?)
        } else {
            tracing::info!("source has no audio stream, output will be video only");
            None
        };

        Ok((frames, audio))
    }

    fn extract_audio(&self, input: &Path, audio_path: &Path) -> Result<AudioTrack> {
        let args = ffmpeg::base_args()
            .arg("-i")
            .arg(input)
            .args(["-map", "0:a:0", "-vn", "-c:a", "copy"])
            .arg(audio_path);

        let output = self.runner
            .run(self.ffmpeg, args.as_slice(), |_| {})
            .map_err(|e| Error::from_process(e, Error::extraction_failed))?;

        match fs::metadata(audio_path) {
            Ok(meta) if meta.len() > 0 => Ok(AudioTrack { path: audio_path.to_path_buf() }),
            _ => Err(Error::extraction_failed(
                format!("audio track was not written to {}", audio_path.display()),
                Error::excerpt(&output.stderr),
            )),
        }
    }

    fn verify_count(extracted: u64, expected: u64) -> std::result::Result<(), String> {
        if extracted == 0 {
            return Err(String::from("no frames were extracted, the video may be corrupted or empty"));
        }
        let tolerance = (expected / Self::FRAME_TOLERANCE_DIVISOR).max(Self::MIN_FRAME_TOLERANCE);
        if extracted.abs_diff(expected) > tolerance {
            return Err(format!("extracted {} frames but the video reports {}", extracted, expected));
        }
        Ok(())
    }
}
