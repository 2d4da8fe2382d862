use crate::error::{Error, MissingItem, Result};

use std::env;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tool {
    Probe,
    Ffmpeg,
    Upscaler,
}

impl Tool {
    pub const ALL: [Tool; 3] = [Tool::Probe, Tool::Ffmpeg, Tool::Upscaler];

    pub fn executable_name(self) -> String {
        let stem = match self {
            Tool::Probe => "ffprobe",
            Tool::Ffmpeg => "ffmpeg",
            Tool::Upscaler => "realesrgan-ncnn-vulkan",
        };
        format!("{}{}", stem, env::consts::EXE_SUFFIX)
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tool::Probe => "FFprobe",
            Tool::Ffmpeg => "FFmpeg",
            Tool::Upscaler => "Real-ESRGAN",
        };
        f.write_str(name)
    }
}

/// Anchors a relative path at the current directory. Tools run with the job workspace as
/// their working directory, so every path handed to them must be absolute.
pub fn absolute(path: &Path) -> io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(env::current_dir()?.join(path))
    }
}

/// Where the external engines, model files and scratch space live.
#[derive(Clone, Debug)]
pub struct Toolchain {
    pub ffprobe: PathBuf,
    pub ffmpeg: PathBuf,
    pub realesrgan: PathBuf,
    pub models_dir: PathBuf,
    pub temp_root: PathBuf,
}

impl Toolchain {
    /// Lays everything out next to the application the way the bundled release ships it.
    pub fn bundled(app_dir: &Path) -> Self {
        Self::new(app_dir, &app_dir.join("models"), &app_dir.join("temp"))
    }

    pub fn new(tools_dir: &Path, models_dir: &Path, temp_root: &Path) -> Self {
        Self {
            ffprobe: tools_dir.join(Tool::Probe.executable_name()),
            ffmpeg: tools_dir.join(Tool::Ffmpeg.executable_name()),
            realesrgan: tools_dir.join(Tool::Upscaler.executable_name()),
            models_dir: models_dir.to_path_buf(),
            temp_root: temp_root.to_path_buf(),
        }
    }

    pub fn app_dir() -> Result<PathBuf> {
        let executable = env::current_exe()?;
        Ok(executable.parent().map(Path::to_path_buf).unwrap_or_default())
    }

    pub fn absolute(&self) -> io::Result<Self> {
        Ok(Self {
            ffprobe: absolute(&self.ffprobe)?,
            ffmpeg: absolute(&self.ffmpeg)?,
            realesrgan: absolute(&self.realesrgan)?,
            models_dir: absolute(&self.models_dir)?,
            temp_root: absolute(&self.temp_root)?,
        })
    }

    pub fn path(&self, tool: Tool) -> &Path {
        match tool {
            Tool::Probe => &self.ffprobe,
            Tool::Ffmpeg => &self.ffmpeg,
            Tool::Upscaler => &self.realesrgan,
        }
    }

    pub fn ensure_executables(&self) -> Result<()> {
        for tool in Tool::ALL {
            let path = self.path(tool);
            if !path.is_file() {
                return Err(Error::Validation {
                    missing_item: MissingItem::Executable { tool, path: path.to_path_buf() },
                });
            }
        }
        Ok(())
    }
}
