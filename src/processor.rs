use crate::assemble::VideoAssembler;
use crate::cancel::CancellationToken;
use crate::error::{Error, MissingItem, Result};
use crate::extract::FrameExtractor;
use crate::ffmpeg::EncodeOptions;
use crate::frame::FrameSet;
use crate::model::{Model, ScaleFactor};
use crate::process::ProcessRunner;
use crate::progress::{PipelineEvent, ProgressEvent, ProgressSink, Stage};
use crate::toolchain::{self, Toolchain};
use crate::upscale::Upscaler;
use crate::video::{container_extension, is_supported_container, VideoMetadata};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Receiver;
use tempfile::TempDir;

#[derive(Clone, Debug)]
pub struct Job {
    pub input: PathBuf,
    pub output: PathBuf,
    pub scale: ScaleFactor,
    pub encoding: EncodeOptions,
}

impl Job {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>, scale: ScaleFactor) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            scale,
            encoding: EncodeOptions::default(),
        }
    }

    pub fn absolute(&self) -> io::Result<Self> {
        Ok(Self {
            input: toolchain::absolute(&self.input)?,
            output: toolchain::absolute(&self.output)?,
            ..self.clone()
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessingState {
    Idle,
    Validating,
    Extracting,
    Upscaling,
    Assembling,
    CleaningUp,
    Completed,
    Failed,
    Cancelled,
}

impl ProcessingState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessingState::Completed | ProcessingState::Failed | ProcessingState::Cancelled)
    }

    /// Stages only move forward; any running stage may bail out to cleanup, and only cleanup ends a job.
    pub fn can_transition_to(self, next: ProcessingState) -> bool {
        use ProcessingState::*;
        match (self, next) {
            (Idle, Validating) => true,
            (Validating, Extracting) | (Extracting, Upscaling) | (Upscaling, Assembling) => true,
            (Validating | Extracting | Upscaling | Assembling, CleaningUp) => true,
            (CleaningUp, Completed | Failed | Cancelled) => true,
            _ => false,
        }
    }

    fn advance(&mut self, next: ProcessingState) {
        debug_assert!(self.can_transition_to(next), "invalid transition {:?} -> {:?}", self, next);
        tracing::debug!(from = ?self, to = ?next, "job state changed");
        *self = next;
    }
}

impl From<Stage> for ProcessingState {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Validating => ProcessingState::Validating,
            Stage::Extracting => ProcessingState::Extracting,
            Stage::Upscaling => ProcessingState::Upscaling,
            Stage::Assembling => ProcessingState::Assembling,
            Stage::CleaningUp => ProcessingState::CleaningUp,
        }
    }
}

#[derive(Debug)]
pub enum JobOutcome {
    Completed { output: PathBuf },
    Failed(Error),
    Cancelled,
}

impl JobOutcome {
    pub fn state(&self) -> ProcessingState {
        match self {
            JobOutcome::Completed { .. } => ProcessingState::Completed,
            JobOutcome::Failed(_) => ProcessingState::Failed,
            JobOutcome::Cancelled => ProcessingState::Cancelled,
        }
    }

    fn from_result(result: Result<PathBuf>) -> Self {
        match result {
            Ok(output) => JobOutcome::Completed { output },
            Err(Error::Cancelled) => JobOutcome::Cancelled,
            Err(error) => JobOutcome::Failed(error),
        }
    }
}

/// Scratch directory of one job; removed when the job leaves the pipeline.
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    const PREFIX: &'static str = "job_";
    const RAW_FRAMES: &'static str = "raw";
    const UPSCALED_FRAMES: &'static str = "upscaled";
    const AUDIO: &'static str = "audio.mka";

    fn create(temp_root: &Path) -> Result<Self> {
        fs::create_dir_all(temp_root).map_err(Error::file_system(Stage::Extracting, temp_root))?;
        let dir = tempfile::Builder::new()
            .prefix(Self::PREFIX)
            .tempdir_in(temp_root)
            .map_err(Error::file_system(Stage::Extracting, temp_root))?;
        tracing::debug!(dir = %dir.path().display(), "created job workspace");
        Ok(Self { dir })
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn raw_frames(&self) -> PathBuf {
        self.path().join(Self::RAW_FRAMES)
    }

    fn upscaled_frames(&self) -> PathBuf {
        self.path().join(Self::UPSCALED_FRAMES)
    }

    fn audio(&self) -> PathBuf {
        self.path().join(Self::AUDIO)
    }

    fn remove(self) {
        let path = self.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => tracing::debug!(dir = %path.display(), "removed job workspace"),
            Err(error) => tracing::warn!(dir = %path.display(), %error, "failed to remove job workspace"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct VideoProcessor {
    toolchain: Toolchain,
    tick: Duration,
    kill_grace: Duration,
}

impl VideoProcessor {
    pub fn new(toolchain: Toolchain) -> Self {
        Self {
            toolchain,
            tick: ProcessRunner::TICK,
            kill_grace: ProcessRunner::KILL_GRACE,
        }
    }

    pub fn tick(mut self, interval: Duration) -> Self {
        self.tick = interval;
        self
    }

    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Runs the job on a dedicated worker thread and hands back the event stream.
    pub fn start(&self, job: Job) -> Result<ProcessorHandle> {
        let (mut sink, events) = ProgressSink::channel();
        let token = CancellationToken::new();
        let processor = self.clone();
        let worker_token = token.clone();
        let worker = thread::Builder::new()
            .name(String::from("video-processor"))
            .spawn(move || {
                let outcome = processor.process(&job, &worker_token, &mut sink);
                sink.finish(outcome);
            })?;
        Ok(ProcessorHandle { events, token, worker })
    }

    /// Runs the whole pipeline on the calling thread.
    pub fn process(&self, job: &Job, token: &CancellationToken, sink: &mut ProgressSink) -> JobOutcome {
        let mut state = ProcessingState::Idle;
        let mut workspace = None;
        let result = self.run_stages(job, token, sink, &mut state, &mut workspace);

        state.advance(ProcessingState::CleaningUp);
        sink.begin(Stage::CleaningUp, 1, "Removing temporary files");
        if let Some(workspace) = workspace {
            workspace.remove();
        }
        sink.complete("Temporary files removed");

        let outcome = JobOutcome::from_result(result);
        match &outcome {
            JobOutcome::Completed { output } => tracing::info!(output = %output.display(), "job completed"),
            JobOutcome::Cancelled => tracing::info!("job cancelled"),
            JobOutcome::Failed(error) => tracing::error!(stage = ?error.stage(), %error, "job failed"),
        }
        state.advance(outcome.state());
        outcome
    }

    fn run_stages(
        &self,
        job: &Job,
        token: &CancellationToken,
        sink: &mut ProgressSink,
        state: &mut ProcessingState,
        workspace: &mut Option<Workspace>,
    ) -> Result<PathBuf> {
        state.advance(ProcessingState::Validating);
        sink.begin(Stage::Validating, 1, "Checking input, tools and models");
        let (job, toolchain) = self.resolve(job)?;
        Self::check(&job, &toolchain)?;
        sink.complete("Job is ready");
        Self::checkpoint(token)?;

        state.advance(ProcessingState::Extracting);
        sink.begin(Stage::Extracting, 0, "Reading video metadata");
        let workspace = workspace.insert(Workspace::create(&toolchain.temp_root)?);
        let runner = ProcessRunner::new(token.clone())
            .working_dir(workspace.path())
            .tick(self.tick)
            .kill_grace(self.kill_grace);
        let extractor = FrameExtractor::new(&runner, &toolchain.ffprobe, &toolchain.ffmpeg);
        let metadata = extractor.probe(&job.input)?;
        sink.set_total(metadata.frame_count, format!("Extracting {} frames", metadata.frame_count));
        let (frames, audio) = extractor.extract(
            &job.input,
            &metadata,
            &workspace.raw_frames(),
            &workspace.audio(),
            sink,
        )?;
        sink.complete(format!("Extracted {} frames", frames.len()));
        Self::checkpoint(token)?;

        state.advance(ProcessingState::Upscaling);
        sink.begin(Stage::Upscaling, frames.len() as u64, format!("Upscaling {} frames {}", frames.len(), job.scale));
        let upscaler = Upscaler::new(&runner, &toolchain.realesrgan, &toolchain.models_dir);
        let upscaled = upscaler.upscale(&frames, &workspace.upscaled_frames(), job.scale, sink)?;
        Self::check_dimensions(&metadata, job.scale, &upscaled);
        sink.complete(format!("Upscaled {} frames", upscaled.len()));
        Self::checkpoint(token)?;

        state.advance(ProcessingState::Assembling);
        sink.begin(Stage::Assembling, upscaled.len() as u64, "Encoding output video");
        let assembler = VideoAssembler::new(&runner, &toolchain.ffmpeg, &job.encoding);
        assembler.assemble(&upscaled, audio.as_ref(), metadata.frame_rate, &job.output, sink)?;
        sink.complete(format!("Saved {}", job.output.display()));

        Ok(job.output)
    }

    /// Pre-flight checks; touches nothing and spawns nothing.
    pub fn validate(&self, job: &Job) -> Result<()> {
        let (job, toolchain) = self.resolve(job)?;
        Self::check(&job, &toolchain)
    }

    fn resolve(&self, job: &Job) -> Result<(Job, Toolchain)> {
        let resolve = || -> io::Result<(Job, Toolchain)> {
            Ok((job.absolute()?, self.toolchain.absolute()?))
        };
        resolve().map_err(Error::file_system(Stage::Validating, Path::new(".")))
    }

    fn check(job: &Job, toolchain: &Toolchain) -> Result<()> {
        if !job.input.is_file() {
            return Err(Error::Validation { missing_item: MissingItem::InputFile(job.input.clone()) });
        }
        for path in [&job.input, &job.output] {
            if !is_supported_container(path) {
                return Err(Error::UnsupportedFormat {
                    path: path.clone(),
                    extension: container_extension(path).unwrap_or_default(),
                });
            }
        }
        if Self::same_file(&job.input, &job.output) {
            return Err(Error::OutputIsInput(job.output.clone()));
        }
        toolchain.ensure_executables()?;
        Model::for_scale(job.scale).ensure_present(&toolchain.models_dir)?;
        tracing::info!(
            input = %job.input.display(),
            output = %job.output.display(),
            scale = %job.scale,
            "job validated"
        );
        Ok(())
    }

    fn same_file(input: &Path, output: &Path) -> bool {
        if input == output {
            return true;
        }
        match (fs::canonicalize(input), fs::canonicalize(output)) {
            (Ok(input), Ok(output)) => input == output,
            _ => false,
        }
    }

    fn checkpoint(token: &CancellationToken) -> Result<()> {
        if token.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    fn expected_dimensions(metadata: &VideoMetadata, scale: ScaleFactor) -> (u64, u64) {
        let factor = u64::from(scale.factor());
        (u64::from(metadata.width) * factor, u64::from(metadata.height) * factor)
    }

    fn check_dimensions(metadata: &VideoMetadata, scale: ScaleFactor, upscaled: &FrameSet) {
        let expected = Self::expected_dimensions(metadata, scale);
        let actual = upscaled.dimensions().map(|(width, height)| (u64::from(width), u64::from(height)));
        match actual {
            Some(actual) if actual != expected => tracing::warn!(
                expected = ?expected,
                actual = ?actual,
                "upscaled frames do not have the expected resolution"
            ),
            Some(actual) => tracing::debug!(?actual, "upscaled frame resolution verified"),
            None => {}
        }
    }
}

pub struct ProcessorHandle {
    events: Receiver<PipelineEvent>,
    token: CancellationToken,
    worker: JoinHandle<()>,
}

impl ProcessorHandle {
    pub fn cancel(&self) {
        tracing::info!("cancellation requested");
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Drains progress until the job reports its outcome, then joins the worker.
    pub fn wait<F>(self, mut on_progress: F) -> JobOutcome
    where
        F: FnMut(&ProgressEvent),
    {
        let mut outcome = None;
        for event in self.events.iter() {
            match event {
                PipelineEvent::Progress(progress) => on_progress(&progress),
                PipelineEvent::Finished(finished) => {
                    outcome = Some(finished);
                    break;
                }
            }
        }
        if self.worker.join().is_err() {
            tracing::error!("processing thread panicked");
        }
        outcome.unwrap_or_else(|| {
            JobOutcome::Failed(Error::Io(io::Error::new(
                io::ErrorKind::Other,
                "processing stopped without reporting an outcome",
            )))
        })
    }
}
