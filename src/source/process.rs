//! Alignment streams read from the standard output of an external program.

use super::buffers::DEFAULT_INPUT_BUFFER;
use super::lines::LineSource;
use super::{RawRecord, RecordSource};
use crate::alignment::RecordFormat;
use crate::error::{GnodeError, Result};
use log::{debug, warn};
use std::io::BufReader;
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};

/// Runs a decoder process and reads its stdout as JSON lines.
///
/// The stream only ends cleanly if the process exits with status 0; any other
/// exit means the output may be truncated and is reported as a source error.
pub struct ProcessSource {
    child: Child,
    lines: LineSource<BufReader<ChildStdout>>,
    label: String,
    finished: bool,
}

impl ProcessSource {
    /// Spawn `command` and stream its standard output.
    pub fn spawn(mut command: Command, label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| GnodeError::Source(format!("cannot start `{}`: {}", label, e)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GnodeError::Source(format!("`{}` has no stdout", label)))?;
        debug!("Started `{}` (pid {})", label, child.id());

        Ok(Self {
            child,
            lines: LineSource::new(
                BufReader::with_capacity(DEFAULT_INPUT_BUFFER, stdout),
                label.clone(),
            ),
            label,
            finished: false,
        })
    }

    /// Run a shell command line through `sh -c`.
    pub fn shell(command_line: &str) -> Result<Self> {
        let mut command = Command::new("sh");
        command.arg("-c").arg(command_line);
        Self::spawn(command, command_line)
    }

    /// Decode a GAM file with `<vg> view -a <gam>`.
    pub fn vg_view<P: AsRef<Path>>(vg: &str, gam: P) -> Result<Self> {
        let gam = gam.as_ref();
        let mut command = Command::new(vg);
        command.arg("view").arg("-a").arg(gam);
        Self::spawn(command, format!("{} view -a {}", vg, gam.display()))
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        let status = self
            .child
            .wait()
            .map_err(|e| GnodeError::Source(format!("waiting for `{}`: {}", self.label, e)))?;
        if status.success() {
            debug!("`{}` exited cleanly", self.label);
            Ok(())
        } else {
            Err(GnodeError::Source(format!(
                "`{}` {}; its output may be truncated",
                self.label, status
            )))
        }
    }

    fn abort(&mut self) {
        self.finished = true;
        if let Err(e) = self.child.kill() {
            debug!("kill `{}`: {}", self.label, e);
        }
        let _ = self.child.wait();
    }
}

impl RecordSource for ProcessSource {
    fn format(&self) -> RecordFormat {
        RecordFormat::Json
    }

    fn describe(&self) -> String {
        self.label.clone()
    }

    fn next_raw(&mut self) -> Result<Option<RawRecord>> {
        if self.finished {
            return Ok(None);
        }
        match self.lines.next_raw() {
            Ok(Some(raw)) => Ok(Some(raw)),
            Ok(None) => self.finish().map(|()| None),
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }
}

impl Drop for ProcessSource {
    fn drop(&mut self) {
        if !self.finished {
            warn!("Stopping `{}` before end of stream", self.label);
            self.abort();
        }
    }
}
