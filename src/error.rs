use crate::model::ScaleFactor;
use crate::progress::Stage;
use crate::toolchain::Tool;
use crate::upscale::GpuFailure;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingItem {
    InputFile(PathBuf),
    Executable { tool: Tool, path: PathBuf },
}

impl fmt::Display for MissingItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingItem::InputFile(path) => write!(f, "input video {}", path.display()),
            MissingItem::Executable { tool, path } => write!(f, "{} executable {}", tool, path.display()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("executable not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error("failed to launch {}: {source}", .path.display())]
    Spawn { path: PathBuf, source: std::io::Error },
    #[error("process exited with {}", exit_description(.exit_code))]
    Failed { exit_code: Option<i32>, stderr: String },
    #[error("process was cancelled")]
    Cancelled,
    #[error("I/O error while supervising process: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_description(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("code {}", code),
        None => String::from("a signal"),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Missing {missing_item}")]
    Validation { missing_item: MissingItem },
    #[error("Unsupported video format {extension:?} for {}", .path.display())]
    UnsupportedFormat { path: PathBuf, extension: String },
    #[error("Output path must differ from the input path: {}", .0.display())]
    OutputIsInput(PathBuf),
    #[error("Failed to read video metadata: {reason}")]
    ProbeFailed { reason: String, stderr: String },
    #[error("Frame extraction failed: {reason}")]
    ExtractionFailed { reason: String, stderr: String },
    #[error("Model files for {scale} upscaling not found: {}", display_paths(.missing))]
    ModelNotFound { scale: ScaleFactor, missing: Vec<PathBuf> },
    #[error("GPU failure during upscaling: {failure}")]
    GpuError { failure: GpuFailure, stderr: String },
    #[error("AI upscaling failed: {reason}")]
    UpscaleFailed { reason: String, stderr: String },
    #[error("Video assembly failed: {reason}")]
    AssemblyFailed { reason: String, stderr: String },
    #[error("{stage} failed on {}: {source}", .path.display())]
    FileSystem { stage: Stage, path: PathBuf, source: io::Error },
    #[error("Processing was cancelled")]
    Cancelled,
    #[error("I/O operation failed: {0}")]
    Io(#[from] io::Error),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths.iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    const STDERR_EXCERPT_LINES: usize = 20;

    pub fn probe_failed(reason: String, stderr: String) -> Self {
        Error::ProbeFailed { reason, stderr }
    }

    pub fn extraction_failed(reason: String, stderr: String) -> Self {
        Error::ExtractionFailed { reason, stderr }
    }

    pub fn upscale_failed(reason: String, stderr: String) -> Self {
        Error::UpscaleFailed { reason, stderr }
    }

    pub fn assembly_failed(reason: String, stderr: String) -> Self {
        Error::AssemblyFailed { reason, stderr }
    }

    /// Tags a filesystem failure with the stage and the path it happened on.
    pub fn file_system(stage: Stage, path: &Path) -> impl FnOnce(io::Error) -> Error + '_ {
        move |source| Error::FileSystem { stage, path: path.to_path_buf(), source }
    }

    /// Maps a subprocess failure onto the error of the stage that ran it.
    pub fn from_process(error: ProcessError, wrap: fn(String, String) -> Error) -> Self {
        match error {
            ProcessError::Cancelled => Error::Cancelled,
            ProcessError::Failed { exit_code, stderr } => wrap(
                format!("process exited with {}", exit_description(&exit_code)),
                Self::excerpt(&stderr),
            ),
            other => wrap(other.to_string(), String::new()),
        }
    }

    /// Keeps the tail of a tool's stderr, which is where the actual failure is reported.
    pub fn excerpt(stderr: &str) -> String {
        let lines: Vec<&str> = stderr.lines().filter(|line| !line.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(Self::STDERR_EXCERPT_LINES);
        lines[start..].join("\n")
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Validation { .. }
            | Error::UnsupportedFormat { .. }
            | Error::OutputIsInput(_)
            | Error::ModelNotFound { .. } => Some(Stage::Validating),
            Error::ProbeFailed { .. } | Error::ExtractionFailed { .. } => Some(Stage::Extracting),
            Error::GpuError { .. } | Error::UpscaleFailed { .. } => Some(Stage::Upscaling),
            Error::AssemblyFailed { .. } => Some(Stage::Assembling),
            Error::FileSystem { stage, .. } => Some(*stage),
            Error::Cancelled | Error::Io(_) => None,
        }
    }

    pub fn stderr(&self) -> Option<&str> {
        match self {
            Error::ProbeFailed { stderr, .. }
            | Error::ExtractionFailed { stderr, .. }
            | Error::GpuError { stderr, .. }
            | Error::UpscaleFailed { stderr, .. }
            | Error::AssemblyFailed { stderr, .. } if !stderr.is_empty() => Some(stderr.as_str()),
            _ => None,
        }
    }

    pub fn advice(&self) -> &'static str {
        match self {
            Error::Validation { missing_item: MissingItem::Executable { .. } } =>
                "Place ffmpeg, ffprobe and realesrgan-ncnn-vulkan in the tools directory or pass --tools-dir.",
            Error::Validation { .. } => "Check that the path exists and is readable.",
            Error::UnsupportedFormat { .. } =>
                "Convert the video to one of: mp4, mkv, avi, mov, wmv, flv, webm, m4v, mpeg, mpg, 3gp.",
            Error::OutputIsInput(_) => "Choose a different output file.",
            Error::ModelNotFound { .. } =>
                "Download the Real-ESRGAN models and place the .bin and .param files in the models directory.",
            Error::GpuError { failure: GpuFailure::OutOfMemory, .. } =>
                "Try a lower scale factor or close other GPU-intensive applications.",
            Error::GpuError { .. } =>
                "Make sure your GPU supports Vulkan and its drivers are up to date, or try a lower scale factor.",
            Error::ProbeFailed { .. } | Error::ExtractionFailed { .. } =>
                "The video may be corrupted or use a codec ffmpeg cannot decode.",
            Error::UpscaleFailed { .. } => "Inspect the upscaler output below for details.",
            Error::AssemblyFailed { .. } =>
                "Check free disk space and that the output location is writable.",
            Error::Cancelled => "",
            Error::FileSystem { .. } | Error::Io(_) => "Check file permissions and free disk space.",
        }
    }
}
