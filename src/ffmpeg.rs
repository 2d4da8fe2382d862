use crate::process::CommandArgs;
use crate::video::container_extension;

use std::path::Path;

/// Reads the frame counter out of one line of `-progress pipe:1` output.
pub fn parse_progress_line(line: &str) -> Option<u64> {
    let (key, value) = line.trim().split_once('=')?;
    match key.trim() {
        "frame" => value.trim().parse().ok(),
        _ => None,
    }
}

/// Options common to every invocation: quiet banner, no stdin, machine-readable progress.
pub fn base_args() -> CommandArgs {
    CommandArgs::new().args(["-hide_banner", "-nostdin", "-y"])
}

pub fn progress_args() -> CommandArgs {
    CommandArgs::new().args(["-progress", "pipe:1", "-nostats"])
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodeOptions {
    pub crf: u8,
    pub preset: String,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self { crf: 18, preset: String::from("slow") }
    }
}

impl EncodeOptions {
    /// Video codec settings picked from the output container.
    pub fn video_codec_args(&self, output: &Path) -> CommandArgs {
        let extension = container_extension(output).unwrap_or_default();
        let crf = self.crf.to_string();
        match extension.as_str() {
            "webm" => CommandArgs::new()
                .args(["-c:v", "libvpx-vp9", "-crf", crf.as_str(), "-b:v", "0"]),
            "mp4" | "m4v" | "mov" => CommandArgs::new()
                .args(["-c:v", "libx264", "-crf", crf.as_str(), "-preset", self.preset.as_str()])
                .args(["-movflags", "+faststart"]),
            _ => CommandArgs::new()
                .args(["-c:v", "libx264", "-crf", crf.as_str(), "-preset", self.preset.as_str()]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_frame_counter_out_of_progress_blocks() {
        let block = "frame=120\nfps=29.8\nstream_0_0_q=-0.0\nout_time=00:00:04.000000\nprogress=continue";
        let frames: Vec<u64> = block.lines().filter_map(parse_progress_line).collect();
        assert_eq!(frames, vec![120]);
        assert_eq!(parse_progress_line("  frame= 7 "), Some(7));
        assert_eq!(parse_progress_line("frame=N/A"), None);
        assert_eq!(parse_progress_line("progress=end"), None);
    }

    #[test]
    fn codec_follows_the_output_container() {
        let options = EncodeOptions::default();
        let webm = options.video_codec_args(Path::new("out.webm"));
        assert!(webm.contains("libvpx-vp9"));

        let mp4 = options.video_codec_args(Path::new("out.MP4"));
        assert!(mp4.contains("libx264"));
        assert!(mp4.contains("+faststart"));

        let mkv = options.video_codec_args(Path::new("out.mkv"));
        assert!(mkv.contains("libx264"));
        assert!(!mkv.contains("+faststart"));
        assert!(mkv.contains("18"));
    }
}
