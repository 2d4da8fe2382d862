use ai_video_upscaler::ffmpeg::EncodeOptions;
use ai_video_upscaler::{Job, Result, ScaleFactor, Toolchain};

use std::path::{Path, PathBuf};

use clap::Parser;

/// Upscale a video with Real-ESRGAN using external ffmpeg/ffprobe tools
#[derive(Parser, Debug)]
#[command(name = "ai-video-upscaler")]
#[command(version)]
pub struct Arguments {
    /// Input video file
    #[arg(short, long, env = "UPSCALER_INPUT")]
    pub input: PathBuf,

    /// Output video file (default: <name>_<scale>x_upscaled.<ext> next to the input)
    #[arg(short, long, env = "UPSCALER_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Scale factor: 2, 3 or 4
    #[arg(short, long, default_value = "2", env = "UPSCALER_SCALE")]
    pub scale: ScaleFactor,

    /// Constant rate factor used when encoding the output
    #[arg(long, default_value_t = 18, value_parser = clap::value_parser!(u8).range(0..=51), env = "UPSCALER_CRF")]
    pub crf: u8,

    /// x264 preset used when encoding the output
    #[arg(long, default_value = "slow", env = "UPSCALER_PRESET")]
    pub preset: String,

    /// Directory holding ffmpeg, ffprobe and realesrgan-ncnn-vulkan (default: next to this program)
    #[arg(long, env = "UPSCALER_TOOLS_DIR")]
    pub tools_dir: Option<PathBuf>,

    /// Directory holding the realesr-animevideov3 model files (default: <tools dir>/models)
    #[arg(long, env = "UPSCALER_MODELS_DIR")]
    pub models_dir: Option<PathBuf>,

    /// Directory for per-job scratch space (default: <tools dir>/temp)
    #[arg(long, env = "UPSCALER_TEMP_DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Arguments {
    pub fn toolchain(&self) -> Result<Toolchain> {
        let tools_dir = match &self.tools_dir {
            Some(dir) => dir.clone(),
            None => Toolchain::app_dir()?,
        };
        let bundled = Toolchain::bundled(&tools_dir);
        let models_dir = self.models_dir.clone().unwrap_or(bundled.models_dir);
        let temp_root = self.temp_dir.clone().unwrap_or(bundled.temp_root);
        Ok(Toolchain::new(&tools_dir, &models_dir, &temp_root))
    }

    pub fn job(&self) -> Job {
        let output = self.output.clone()
            .unwrap_or_else(|| default_output(&self.input, self.scale));
        Job {
            input: self.input.clone(),
            output,
            scale: self.scale,
            encoding: EncodeOptions { crf: self.crf, preset: self.preset.clone() },
        }
    }

    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }
    }
}

pub fn default_output(input: &Path, scale: ScaleFactor) -> PathBuf {
    let stem = input.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| String::from("output"));
    let mut file_name = format!("{}_{}_upscaled", stem, scale);
    if let Some(extension) = input.extension() {
        file_name.push('.');
        file_name.push_str(&extension.to_string_lossy());
    }
    input.parent().unwrap_or_else(|| Path::new("")).join(file_name)
}
