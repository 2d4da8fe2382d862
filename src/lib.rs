pub mod assemble;
pub mod cancel;
pub mod error;
pub mod extract;
pub mod ffmpeg;
pub mod frame;
pub mod model;
pub mod process;
pub mod processor;
pub mod progress;
pub mod toolchain;
pub mod upscale;
pub mod video;

pub use cancel::CancellationToken;
pub use error::{Error, Result};
pub use model::ScaleFactor;
pub use processor::{Job, JobOutcome, ProcessorHandle, VideoProcessor};
pub use progress::{PipelineEvent, ProgressEvent, Stage};
pub use toolchain::Toolchain;
