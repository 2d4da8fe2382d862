use crate::error::{Error, ProcessError, Result};
use crate::frame::FrameSet;
use crate::model::{Model, ScaleFactor};
use crate::process::{CommandArgs, ProcessEvent, ProcessRunner};
use crate::progress::{ProgressSink, Stage};

use std::fmt;
use std::fs;
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GpuFailure {
    VulkanUnavailable,
    OutOfMemory,
    DeviceLost,
}

impl fmt::Display for GpuFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            GpuFailure::VulkanUnavailable => "Vulkan GPU initialization failed",
            GpuFailure::OutOfMemory => "GPU ran out of memory",
            GpuFailure::DeviceLost => "GPU device was lost",
        };
        f.write_str(message)
    }
}

const OUT_OF_MEMORY_SIGNATURES: &[&str] = &[
    "vk_error_out_of_device_memory",
    "vk_error_out_of_host_memory",
    "vkallocatememory failed",
    "out of memory",
];

const DEVICE_LOST_SIGNATURES: &[&str] = &[
    "vk_error_device_lost",
    "vkqueuesubmit failed",
];

const VULKAN_INIT_SIGNATURES: &[&str] = &[
    "vkcreateinstance failed",
    "vkcreatedevice failed",
    "vkenumeratephysicaldevices failed",
    "invalid gpu device",
    "vk_error_initialization_failed",
    "vk_error_incompatible_driver",
];

/// Matches the engine's stderr against known Vulkan/GPU failure messages.
pub fn classify_gpu_failure(stderr: &str) -> Option<GpuFailure> {
    let stderr = stderr.to_lowercase();
    let matches = |signatures: &[&str]| signatures.iter().any(|s| stderr.contains(s));
    if matches(OUT_OF_MEMORY_SIGNATURES) {
        Some(GpuFailure::OutOfMemory)
    } else if matches(DEVICE_LOST_SIGNATURES) {
        Some(GpuFailure::DeviceLost)
    } else if matches(VULKAN_INIT_SIGNATURES) {
        Some(GpuFailure::VulkanUnavailable)
    } else {
        None
    }
}

pub struct Upscaler<'a> {
    runner: &'a ProcessRunner,
    realesrgan: &'a Path,
    models_dir: &'a Path,
}

impl<'a> Upscaler<'a> {
    pub fn new(runner: &'a ProcessRunner, realesrgan: &'a Path, models_dir: &'a Path) -> Self {
        Self { runner, realesrgan, models_dir }
    }

    pub fn upscale(
        &self,
        frames: &FrameSet,
        output_dir: &Path,
        scale: ScaleFactor,
        sink: &mut ProgressSink,
    ) -> Result<FrameSet> {
        let model = Model::for_scale(scale);
        model.ensure_present(self.models_dir)?;
        if frames.is_empty() {
            return Err(Error::upscale_failed(
                format!("no frames found in {}", frames.dir().display()),
                String::new(),
            ));
        }
        fs::create_dir_all(output_dir).map_err(Error::file_system(Stage::Upscaling, output_dir))?;

        let total = frames.len() as u64;
        let naming = frames.naming();
        let args = Self::build_args(frames.dir(), output_dir, model, self.models_dir);
        tracing::info!(%model, frames = total, "starting AI upscaling");

        let result = self.runner.run(self.realesrgan, args.as_slice(), |event| {
            if event == ProcessEvent::Tick {
                let done = FrameSet::count_in(output_dir, naming);
                sink.update(done, format!("Upscaling frame {}/{}", done.min(total), total));
            }
        });

        let stderr = match result {
            Ok(output) => output.stderr,
            Err(ProcessError::Failed { exit_code, stderr }) => {
                if let Some(failure) = classify_gpu_failure(&stderr) {
                    return Err(Error::GpuError { failure, stderr: Error::excerpt(&stderr) });
                }
                let failed = ProcessError::Failed { exit_code, stderr };
                return Err(Error::from_process(failed, Error::upscale_failed));
            }
            Err(other) => return Err(Error::from_process(other, Error::upscale_failed)),
        };

        let upscaled = FrameSet::scan(output_dir, naming)
            .map_err(Error::file_system(Stage::Upscaling, output_dir))?;
        if !frames.matches(&upscaled) {
            if let Some(failure) = classify_gpu_failure(&stderr) {
                return Err(Error::GpuError { failure, stderr: Error::excerpt(&stderr) });
            }
            let (missing, extra) = frames.difference(&upscaled);
            return Err(Error::upscale_failed(
                format!(
                    "upscaled {} of {} frames ({} missing, {} unexpected)",
                    upscaled.len(),
                    frames.len(),
                    missing.len(),
                    extra.len()
                ),
                Error::excerpt(&stderr),
            ));
        }

        sink.update(total, format!("Upscaled {} frames", total));
        Ok(upscaled)
    }

    fn build_args(input_dir: &Path, output_dir: &Path, model: Model, models_dir: &Path) -> CommandArgs {
        CommandArgs::new()
            .arg("-i")
            .arg(input_dir)
            .arg("-o")
            .arg(output_dir)
            .arg("-n")
            .arg(model.engine_name())
            .arg("-s")
            .arg(model.scale.factor().to_string())
            .args(["-f", "png"])
            .arg("-m")
            .arg(models_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_gpu_failure_signatures() {
        assert_eq!(
            classify_gpu_failure("[0 NVIDIA]  queueC=2[8]\nvkAllocateMemory failed -2\n"),
            Some(GpuFailure::OutOfMemory)
        );
        assert_eq!(classify_gpu_failure("vkCreateInstance failed -9"), Some(GpuFailure::VulkanUnavailable));
        assert_eq!(classify_gpu_failure("invalid gpu device"), Some(GpuFailure::VulkanUnavailable));
        assert_eq!(classify_gpu_failure("vkQueueSubmit failed -4"), Some(GpuFailure::DeviceLost));
        assert_eq!(classify_gpu_failure("decode image frame_000001.png failed"), None);
    }

    #[test]
    fn memory_exhaustion_wins_over_generic_vulkan_errors() {
        let stderr = "vkCreateDevice failed\nVK_ERROR_OUT_OF_DEVICE_MEMORY";
        assert_eq!(classify_gpu_failure(stderr), Some(GpuFailure::OutOfMemory));
    }

    #[test]
    fn engine_arguments_select_model_and_scale() {
        let args = Upscaler::build_args(
            Path::new("/tmp/in"),
            Path::new("/tmp/out"),
            Model::for_scale(ScaleFactor::X3),
            Path::new("/opt/models"),
        );
        let rendered: Vec<String> = args.as_slice().iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            rendered,
            ["-i", "/tmp/in", "-o", "/tmp/out", "-n", "realesr-animevideov3", "-s", "3", "-f", "png", "-m", "/opt/models"]
        );
    }
}
