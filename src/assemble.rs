use crate::error::{Error, Result};
use crate::extract::AudioTrack;
use crate::ffmpeg::{self, EncodeOptions};
use crate::frame::FrameSet;
use crate::process::{CommandArgs, ProcessEvent, ProcessRunner};
use crate::progress::{ProgressSink, Stage};
use crate::video::FrameRate;

use std::fs;
use std::path::Path;
use std::time::SystemTime;

pub struct VideoAssembler<'a> {
    runner: &'a ProcessRunner,
    ffmpeg: &'a Path,
    encoding: &'a EncodeOptions,
}

impl<'a> VideoAssembler<'a> {
    pub fn new(runner: &'a ProcessRunner, ffmpeg: &'a Path, encoding: &'a EncodeOptions) -> Self {
        Self { runner, ffmpeg, encoding }
    }

    pub fn assemble(
        &self,
        frames: &FrameSet,
        audio: Option<&AudioTrack>,
        frame_rate: FrameRate,
        output: &Path,
        sink: &mut ProgressSink,
    ) -> Result<()> {
        if frames.is_empty() {
            return Err(Error::assembly_failed(
                format!("no upscaled frames found in {}", frames.dir().display()),
                String::new(),
            ));
        }
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(Error::file_system(Stage::Assembling, parent))?;
        }
        let previous = Self::fingerprint(output);
        if previous.is_some() {
            tracing::info!(output = %output.display(), "output file exists and will be overwritten");
        }

        let total = frames.len() as u64;
        let args = self.build_args(frames, audio, frame_rate, output);
        tracing::info!(
            frames = total,
            fps = %frame_rate,
            audio = audio.is_some(),
            output = %output.display(),
            "assembling output video"
        );

        let result = self.runner.run(self.ffmpeg, args.as_slice(), |event| {
            if let ProcessEvent::Stdout(line) = event {
                if let Some(frame) = ffmpeg::parse_progress_line(line) {
                    sink.update(frame, format!("Encoding frame {}/{}", frame.min(total), total));
                }
            }
        });
        let output_log = match result {
            Ok(output_log) => output_log,
            Err(error) => {
                if Self::fingerprint(output) != previous {
                    Self::discard_partial_output(output);
                }
                return Err(Error::from_process(error, Error::assembly_failed));
            }
        };

        match fs::metadata(output) {
            Ok(meta) if meta.len() > 0 => {
                tracing::info!(output = %output.display(), bytes = meta.len(), "output video written");
                Ok(())
            }
            Ok(_) => Err(Error::assembly_failed(
                format!("output file {} is empty", output.display()),
                Error::excerpt(&output_log.stderr),
            )),
            Err(_) => Err(Error::assembly_failed(
                format!("output file {} was not created", output.display()),
                Error::excerpt(&output_log.stderr),
            )),
        }
    }

    /// Size and mtime, enough to tell whether the muxer has written to `path`.
    fn fingerprint(path: &Path) -> Option<(u64, Option<SystemTime>)> {
        fs::metadata(path).ok().map(|meta| (meta.len(), meta.modified().ok()))
    }

    fn discard_partial_output(output: &Path) {
        match fs::remove_file(output) {
            Ok(()) => tracing::info!(output = %output.display(), "removed partially written output"),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => tracing::warn!(output = %output.display(), %error, "could not remove partial output"),
        }
    }

    fn build_args(
        &self,
        frames: &FrameSet,
        audio: Option<&AudioTrack>,
        frame_rate: FrameRate,
        output: &Path,
    ) -> CommandArgs {
        let start_number = frames.first_index().unwrap_or(1).to_string();
        let mut args = ffmpeg::base_args()
            .arg("-framerate")
            .arg(frame_rate.to_string())
            .arg("-start_number")
            .arg(start_number)
            .arg("-i")
            .arg(frames.pattern_path());

        args = match audio {
            Some(track) => args
                .arg("-i")
                .arg(&track.path)
                .args(["-map", "0:v:0", "-map", "1:a:0", "-c:a", "copy"]),
            None => args.args(["-map", "0:v:0", "-an"]),
        };

        args.args(self.encoding.video_codec_args(output).as_slice())
            .args(["-pix_fmt", "yuv420p"])
            .args(ffmpeg::progress_args().as_slice())
            .arg(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancellationToken;
    use crate::frame::FrameNaming;

    fn frame_set(count: u64) -> (tempfile::TempDir, FrameSet) {
        let dir = tempfile::tempdir().unwrap();
        let naming = FrameNaming::for_count(count);
        for index in 1..=count {
            fs::write(dir.path().join(naming.file_name(index)), b"png").unwrap();
        }
        let set = FrameSet::scan(dir.path(), naming).unwrap();
        (dir, set)
    }

    fn rendered(args: &CommandArgs) -> Vec<String> {
        args.as_slice().iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[cfg(unix)]
    #[test]
    fn existing_output_survives_a_muxer_that_never_ran() {
        let (dir, frames) = frame_set(2);
        let output = dir.path().join("keep.mp4");
        fs::write(&output, b"previous render").unwrap();
        let encoding = EncodeOptions::default();
        let fps = FrameRate::new(24, 1).unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let cancelled = ProcessRunner::new(token);
        let shell = Path::new("/bin/sh");
        let (mut sink, _events) = ProgressSink::channel();
        let result = VideoAssembler::new(&cancelled, shell, &encoding).assemble(&frames, None, fps, &output, &mut sink);
        assert!(matches!(result, Err(Error::Cancelled)));

        let runner = ProcessRunner::new(CancellationToken::new());
        let missing = dir.path().join("no-ffmpeg");
        let result = VideoAssembler::new(&runner, &missing, &encoding).assemble(&frames, None, fps, &output, &mut sink);
        assert!(matches!(result, Err(Error::AssemblyFailed { .. })));

        assert_eq!(fs::read(&output).unwrap(), b"previous render");
    }

    #[test]
    fn audio_track_is_stream_copied() {
        let (_dir, frames) = frame_set(3);
        let runner = ProcessRunner::new(CancellationToken::new());
        let encoding = EncodeOptions::default();
        let assembler = VideoAssembler::new(&runner, Path::new("ffmpeg"), &encoding);
        let audio = AudioTrack { path: "/tmp/job/audio.mka".into() };
        let fps = FrameRate::new(30000, 1001).unwrap();

        let args = assembler.build_args(&frames, Some(&audio), fps, Path::new("out.mp4"));
        let args = rendered(&args);
        let framerate = args.iter().position(|a| a == "-framerate").unwrap();
        assert_eq!(args[framerate + 1], "30000/1001");
        assert!(args.windows(2).any(|w| w == ["-map", "1:a:0"]));
        assert!(args.windows(2).any(|w| w == ["-c:a", "copy"]));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[test]
    fn missing_audio_produces_a_video_only_mux() {
        let (_dir, frames) = frame_set(3);
        let runner = ProcessRunner::new(CancellationToken::new());
        let encoding = EncodeOptions::default();
        let assembler = VideoAssembler::new(&runner, Path::new("ffmpeg"), &encoding);
        let fps = FrameRate::new(24, 1).unwrap();

        let args = rendered(&assembler.build_args(&frames, None, fps, Path::new("out.webm")));
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 1);
        assert!(args.contains(&String::from("-an")));
        assert!(args.contains(&String::from("libvpx-vp9")));
    }
}
