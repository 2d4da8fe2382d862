use crate::cancel::CancellationToken;
use crate::error::ProcessError;

use std::ffi::{OsStr, OsString};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{select, tick, unbounded, Sender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessEvent<'a> {
    Stdout(&'a str),
    Stderr(&'a str),
    /// Fired on a fixed interval whether or not the tool prints anything.
    Tick,
}

#[derive(Debug, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Argument vector for one tool invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandArgs(Vec<OsString>);

impl CommandArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arg(mut self, value: impl AsRef<OsStr>) -> Self {
        self.0.push(value.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.0.extend(values.into_iter().map(|v| v.as_ref().to_os_string()));
        self
    }

    pub fn as_slice(&self) -> &[OsString] {
        &self.0
    }

    pub fn contains(&self, value: &str) -> bool {
        self.0.iter().any(|arg| arg == value)
    }
}

enum OutputLine {
    Stdout(String),
    Stderr(String),
}

impl OutputLine {
    fn text(&self) -> &str {
        match self {
            OutputLine::Stdout(text) | OutputLine::Stderr(text) => text,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProcessRunner {
    token: CancellationToken,
    working_dir: Option<PathBuf>,
    tick: Duration,
    kill_grace: Duration,
}

impl ProcessRunner {
    pub const TICK: Duration = Duration::from_millis(250);
    pub const KILL_GRACE: Duration = Duration::from_secs(2);
    const EXIT_POLL: Duration = Duration::from_millis(25);

    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            working_dir: None,
            tick: Self::TICK,
            kill_grace: Self::KILL_GRACE,
        }
    }

    pub fn working_dir(mut self, dir: &Path) -> Self {
        self.working_dir = Some(dir.to_path_buf());
        self
    }

    pub fn tick(mut self, interval: Duration) -> Self {
        self.tick = interval;
        self
    }

    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn run<F>(&self, executable: &Path, args: &[OsString], mut on_event: F) -> Result<ProcessOutput, ProcessError>
    where
        F: FnMut(ProcessEvent<'_>),
    {
        if !executable.is_file() {
            return Err(ProcessError::NotFound(executable.to_path_buf()));
        }
        if self.token.is_cancelled() {
            return Err(ProcessError::Cancelled);
        }

        let mut child = self.spawn(executable, args)?;
        let (sender, lines) = unbounded();
        if let Some(stdout) = child.stdout.take() {
            Self::forward_lines(stdout, sender.clone(), OutputLine::Stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            Self::forward_lines(stderr, sender, OutputLine::Stderr);
        }

        let ticker = tick(self.tick);
        let mut output = ProcessOutput::default();
        let mut streams_open = true;
        let mut exited: Option<ExitStatus> = None;

        let status = loop {
            if self.token.is_cancelled() {
                tracing::info!(executable = %executable.display(), "cancellation requested, stopping process");
                self.terminate(&mut child);
                return Err(ProcessError::Cancelled);
            }

            if !streams_open {
                if let Some(status) = self.poll_exit(&mut child)? {
                    break status;
                }
                let _ = ticker.recv();
                on_event(ProcessEvent::Tick);
                continue;
            }

            select! {
                recv(lines) -> message => match message {
                    Ok(line) => Self::record(line, &mut output, &mut on_event),
                    Err(_) => streams_open = false,
                },
                recv(ticker) -> _ => {
                    on_event(ProcessEvent::Tick);
                    // A descendant may keep the pipes open after the tool itself has exited.
                    if let Some(status) = exited.take() {
                        for line in lines.try_iter() {
                            Self::record(line, &mut output, &mut on_event);
                        }
                        break status;
                    }
                    exited = self.poll_exit(&mut child)?;
                },
            }
        };

        tracing::debug!(executable = %executable.display(), ?status, "process exited");
        if status.success() {
            Ok(output)
        } else {
            Err(ProcessError::Failed { exit_code: status.code(), stderr: output.stderr })
        }
    }

    /// A child whose exit status cannot be read is stopped before the error is returned.
    fn poll_exit(&self, child: &mut Child) -> Result<Option<ExitStatus>, ProcessError> {
        match child.try_wait() {
            Ok(status) => Ok(status),
            Err(error) => {
                tracing::warn!(pid = child.id(), %error, "could not read process status, stopping it");
                self.terminate(child);
                Err(ProcessError::Io(error))
            }
        }
    }

    fn record<F>(line: OutputLine, output: &mut ProcessOutput, on_event: &mut F)
    where
        F: FnMut(ProcessEvent<'_>),
    {
        tracing::trace!(target: "tool_output", "{}", line.text());
        let buffer = match &line {
            OutputLine::Stdout(text) => {
                on_event(ProcessEvent::Stdout(text.as_str()));
                &mut output.stdout
            }
            OutputLine::Stderr(text) => {
                on_event(ProcessEvent::Stderr(text.as_str()));
                &mut output.stderr
            }
        };
        buffer.push_str(line.text());
        buffer.push('\n');
    }

    fn spawn(&self, executable: &Path, args: &[OsString]) -> Result<Child, ProcessError> {
        tracing::debug!(executable = %executable.display(), ?args, "launching process");
        let mut command = Command::new(executable);
        command.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command.spawn().map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => ProcessError::NotFound(executable.to_path_buf()),
            _ => ProcessError::Spawn { path: executable.to_path_buf(), source },
        })
    }

    fn forward_lines<R>(stream: R, sender: Sender<OutputLine>, wrap: fn(String) -> OutputLine)
    where
        R: Read + Send + 'static,
    {
        thread::spawn(move || {
            let mut reader = BufReader::new(stream);
            let mut buffer = Vec::new();
            loop {
                buffer.clear();
                match reader.read_until(b'\n', &mut buffer) {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buffer);
                        let line = line.trim_end_matches(['\r', '\n']).to_owned();
                        if sender.send(wrap(line)).is_err() {
                            break;
                        }
                    }
                }
            }
        });
    }

    fn terminate(&self, child: &mut Child) {
        if request_graceful_stop(child) {
            let deadline = Instant::now() + self.kill_grace;
            while Instant::now() < deadline {
                match child.try_wait() {
                    Ok(Some(_)) => return,
                    Ok(None) => thread::sleep(Self::EXIT_POLL),
                    Err(_) => break,
                }
            }
            tracing::warn!(pid = child.id(), "process ignored the stop request, killing it");
        }
        if let Err(error) = child.kill() {
            tracing::warn!(pid = child.id(), %error, "failed to kill process");
        }
        let _ = child.wait();
    }
}

#[cfg(unix)]
fn request_graceful_stop(child: &Child) -> bool {
    let Ok(pid) = libc::pid_t::try_from(child.id()) else {
        return false;
    };
    // SAFETY: the pid belongs to a child we spawned and have not reaped yet.
    unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn request_graceful_stop(_child: &Child) -> bool {
    false
}
