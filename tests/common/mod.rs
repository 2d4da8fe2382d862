#![allow(dead_code)]

use ai_video_upscaler::model::Model;
use ai_video_upscaler::toolchain::{Tool, Toolchain};
use ai_video_upscaler::{Job, JobOutcome, ProgressEvent, ScaleFactor, VideoProcessor};

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;

pub const AUDIO_BYTES: &str = "AUDIO-TRACK-BYTES";

/// Spells an absolute path relative to the test's working directory.
pub fn relative_to_cwd(path: &Path) -> PathBuf {
    let cwd = std::env::current_dir().unwrap();
    let mut relative: PathBuf = cwd.components().skip(1).map(|_| "..").collect();
    relative.push(path.strip_prefix("/").unwrap());
    relative
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Engine {
    Copy,
    DropLast,
    OutOfMemory,
    Hang,
}

#[derive(Clone, Debug)]
pub struct Stubs {
    pub frames: u64,
    /// Frames the demuxer actually writes, when it disagrees with the probe.
    pub extracted: Option<u64>,
    pub audio: bool,
    pub engine: Engine,
    pub hang_extract: bool,
    pub hang_mux: bool,
}

impl Default for Stubs {
    fn default() -> Self {
        Self {
            frames: 12,
            extracted: None,
            audio: true,
            engine: Engine::Copy,
            hang_extract: false,
            hang_mux: false,
        }
    }
}

pub struct Sandbox {
    pub root: TempDir,
    pub tools: PathBuf,
    pub models: PathBuf,
    pub temp: PathBuf,
    pub input: PathBuf,
    pub output: PathBuf,
    log: PathBuf,
}

impl Sandbox {
    pub fn new(stubs: &Stubs) -> Self {
        let root = tempfile::tempdir().unwrap();
        let tools = root.path().join("tools");
        let models = root.path().join("models");
        let temp = root.path().join("temp");
        let input = root.path().join("sample_1080p.mp4");
        let output = root.path().join("out").join("sample_1080p_upscaled.mp4");
        let log = root.path().join("invocations.log");
        fs::create_dir_all(&tools).unwrap();
        fs::create_dir_all(&models).unwrap();
        fs::write(&input, b"source video").unwrap();

        let sandbox = Self { root, tools, models, temp, input, output, log };
        sandbox.write_tool(Tool::Probe, &sandbox.ffprobe_script(stubs));
        sandbox.write_tool(Tool::Ffmpeg, &sandbox.ffmpeg_script(stubs));
        sandbox.write_tool(Tool::Upscaler, &sandbox.engine_script(stubs));
        for scale in ScaleFactor::ALL {
            let (weights, params) = Model::for_scale(scale).files(&sandbox.models);
            fs::write(weights, b"weights").unwrap();
            fs::write(params, b"7767517").unwrap();
        }
        sandbox
    }

    pub fn toolchain(&self) -> Toolchain {
        Toolchain::new(&self.tools, &self.models, &self.temp)
    }

    pub fn processor(&self) -> VideoProcessor {
        self.processor_with(self.toolchain())
    }

    pub fn processor_with(&self, toolchain: Toolchain) -> VideoProcessor {
        VideoProcessor::new(toolchain)
            .tick(Duration::from_millis(20))
            .kill_grace(Duration::from_millis(500))
    }

    pub fn job(&self, scale: ScaleFactor) -> Job {
        Job::new(&self.input, &self.output, scale)
    }

    pub fn run(&self, scale: ScaleFactor) -> (JobOutcome, Vec<ProgressEvent>) {
        let handle = self.processor().start(self.job(scale)).unwrap();
        let mut events = Vec::new();
        let outcome = handle.wait(|event| events.push(event.clone()));
        (outcome, events)
    }

    pub fn remove_tool(&self, tool: Tool) {
        fs::remove_file(self.toolchain().path(tool)).unwrap();
    }

    pub fn remove_model(&self, scale: ScaleFactor) {
        let (weights, params) = Model::for_scale(scale).files(&self.models);
        fs::remove_file(weights).unwrap();
        fs::remove_file(params).unwrap();
    }

    /// One line per stub invocation: the tool name followed by its arguments.
    pub fn invocations(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .map(|log| log.lines().map(str::to_owned).collect())
            .unwrap_or_default()
    }

    pub fn invocations_of(&self, tool: &str) -> Vec<String> {
        self.invocations()
            .into_iter()
            .filter(|line| line.split_whitespace().next() == Some(tool))
            .collect()
    }

    pub fn leftover_workspaces(&self) -> usize {
        fs::read_dir(&self.temp).map(|entries| entries.count()).unwrap_or(0)
    }

    fn write_tool(&self, tool: Tool, body: &str) {
        let path = self.toolchain().path(tool).to_path_buf();
        fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn log_line(&self, name: &str) -> String {
        format!("echo \"{} $*\" >> '{}'\n", name, self.log.display())
    }

    fn ffprobe_script(&self, stubs: &Stubs) -> String {
        let audio = if stubs.audio {
            r#",
    {"index": 1, "codec_type": "audio", "codec_name": "aac"}"#
        } else {
            ""
        };
        format!(
            r#"{log}cat <<'JSON'
{{
  "streams": [
    {{"index": 0, "codec_type": "video", "codec_name": "h264", "width": 64, "height": 36,
     "r_frame_rate": "30/1", "avg_frame_rate": "30/1", "nb_frames": "{frames}"}}{audio}
  ],
  "format": {{"duration": "{duration}"}}
}}
JSON
"#,
            log = self.log_line("ffprobe"),
            frames = stubs.frames,
            audio = audio,
            duration = stubs.frames as f64 / 30.0,
        )
    }

    fn ffmpeg_script(&self, stubs: &Stubs) -> String {
        let extracted = stubs.extracted.unwrap_or(stubs.frames);
        let hang_extract = if stubs.hang_extract { "exec sleep 30" } else { ":" };
        let hang_mux = if stubs.hang_mux { "exec sleep 30" } else { ":" };
        format!(
            r#"{log}mode=extract
inputs=0
prev=
for arg in "$@"; do
  case "$arg" in
    -framerate) mode=mux ;;
    -vn) mode=audio ;;
  esac
  if [ "$prev" = "-i" ]; then
    inputs=$((inputs + 1))
    if [ "$inputs" -eq 1 ]; then frames_in="$arg"; else audio_in="$arg"; fi
  fi
  prev="$arg"
  out="$arg"
done
case "$mode" in
  extract)
    i=1
    while [ "$i" -le {extracted} ]; do
      printf 'frame-%d' "$i" > "$(printf "$out" "$i")"
      echo "frame=$i"
      i=$((i + 1))
    done
    echo "progress=end"
    {hang_extract}
    ;;
  audio)
    printf '{audio}' > "$out"
    ;;
  mux)
    count=$(ls "$(dirname "$frames_in")" | grep -c '^frame_.*\.png$')
    : > "$out"
    if [ -n "$audio_in" ]; then cat "$audio_in" >> "$out"; fi
    printf '|video:%s' "$count" >> "$out"
    echo "frame=$count"
    echo "progress=end"
    {hang_mux}
    ;;
esac
"#,
            log = self.log_line("ffmpeg"),
            extracted = extracted,
            audio = AUDIO_BYTES,
            hang_extract = hang_extract,
            hang_mux = hang_mux,
        )
    }

    fn engine_script(&self, stubs: &Stubs) -> String {
        let work = match stubs.engine {
            Engine::Copy => "cp \"$in_dir\"/frame_*.png \"$out_dir\"/",
            Engine::DropLast => {
                "cp \"$in_dir\"/frame_*.png \"$out_dir\"/\nrm \"$(ls \"$out_dir\"/frame_*.png | tail -n 1)\""
            }
            Engine::OutOfMemory => {
                "echo '[0 Stub GPU]  queueC=2[8]  queueG=0[16]' >&2\necho 'vkAllocateMemory failed -2' >&2\nexit 255"
            }
            Engine::Hang => "cp \"$in_dir\"/frame_*.png \"$out_dir\"/\nexec sleep 30",
        };
        format!(
            r#"{log}while [ "$#" -gt 0 ]; do
  case "$1" in
    -i) in_dir="$2"; shift ;;
    -o) out_dir="$2"; shift ;;
  esac
  shift
done
{work}
"#,
            log = self.log_line("realesrgan"),
            work = work,
        )
    }
}
