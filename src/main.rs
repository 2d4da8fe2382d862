mod arguments;

use arguments::Arguments;

use ai_video_upscaler::{CancellationToken, Error, Job, JobOutcome, ProgressEvent, Result, Stage, VideoProcessor};

use std::fmt::Write;
use std::process::ExitCode;
use std::thread;

use clap::Parser;
use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use tracing_subscriber::EnvFilter;

const CANCELLED_EXIT_CODE: u8 = 130;

#[derive(Default)]
struct StageBars {
    current: Option<(Stage, ProgressBar)>,
}

impl StageBars {
    fn create_progress_bar(stage: Stage, total: u64) -> ProgressBar {
        let progress_bar = ProgressBar::new(total);
        let progress_template = "{prefix:>12} [{elapsed_precise}] [{eta}] [{wide_bar:.white/green}] {pos}/{len} {percent} {msg}";
        let progress_style = ProgressStyle::default_bar()
            .template(progress_template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░-")
            .with_key("eta", |state: &ProgressState, w: &mut dyn Write| {
                let _ = write!(w, "{:.1}s", state.eta().as_secs_f64());
            })
            .with_key("percent", |state: &ProgressState, w: &mut dyn Write| {
                let _ = write!(w, "({:.0}%)", state.fraction() * 100.0);
            });
        progress_bar.set_style(progress_style);
        progress_bar.set_prefix(stage.to_string());
        progress_bar
    }

    fn show(&mut self, event: &ProgressEvent) {
        let same_stage = matches!(&self.current, Some((stage, _)) if *stage == event.stage);
        if !same_stage {
            self.finish();
            self.current = Some((event.stage, Self::create_progress_bar(event.stage, event.total)));
        }
        if let Some((_, bar)) = &self.current {
            if bar.length() != Some(event.total) {
                bar.set_length(event.total);
            }
            bar.set_position(event.current);
            bar.set_message(event.message.clone());
        }
    }

    fn finish(&mut self) {
        if let Some((_, bar)) = self.current.take() {
            if bar.length().is_some_and(|length| bar.position() >= length) {
                bar.finish();
            } else {
                bar.abandon();
            }
        }
    }
}

fn init_tracing(arguments: &Arguments) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(arguments.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn listen_for_ctrl_c(token: CancellationToken) {
    let listener = thread::Builder::new()
        .name(String::from("ctrl-c"))
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(error) => {
                    tracing::warn!(%error, "could not start the Ctrl-C listener");
                    return;
                }
            };
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        eprintln!("\nCancelling, waiting for the running tool to stop...");
                        token.cancel();
                    }
                    Err(error) => tracing::warn!(%error, "could not listen for Ctrl-C"),
                }
            });
        });
    if let Err(error) = listener {
        tracing::warn!(%error, "could not spawn the Ctrl-C listener");
    }
}

fn print_job(job: &Job) {
    println!("{} -> {}", job.input.display(), job.output.display());
    println!(
        "[scale: {}] [crf: {}] [preset: {}]",
        job.scale, job.encoding.crf, job.encoding.preset
    );
}

fn report(error: &Error) {
    eprintln!("Error: {}", error);
    if let Some(stage) = error.stage() {
        eprintln!("Stage: {}", stage);
    }
    let advice = error.advice();
    if !advice.is_empty() {
        eprintln!("Hint: {}", advice);
    }
    if let Some(stderr) = error.stderr() {
        eprintln!("Tool output:");
        for line in stderr.lines() {
            eprintln!("  {}", line);
        }
    }
}

fn run(arguments: &Arguments) -> Result<JobOutcome> {
    let toolchain = arguments.toolchain()?;
    let job = arguments.job();
    print_job(&job);

    let handle = VideoProcessor::new(toolchain).start(job)?;
    listen_for_ctrl_c(handle.token().clone());

    let mut bars = StageBars::default();
    let outcome = handle.wait(|event| bars.show(event));
    bars.finish();
    Ok(outcome)
}

fn main() -> ExitCode {
    let arguments = Arguments::parse();
    init_tracing(&arguments);

    match run(&arguments) {
        Ok(JobOutcome::Completed { output }) => {
            println!("Completed! Saved to {}", output.display());
            ExitCode::SUCCESS
        }
        Ok(JobOutcome::Cancelled) => {
            eprintln!("Cancelled.");
            ExitCode::from(CANCELLED_EXIT_CODE)
        }
        Ok(JobOutcome::Failed(error)) | Err(error) => {
            report(&error);
            ExitCode::FAILURE
        }
    }
}
