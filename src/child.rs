use std::ffi::OsString;
use std::io::{self, BufRead, BufReader};
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ChildStdout, Command, ExitStatus, Stdio};

use log::debug;

use crate::error::{HarnessError, Result};

/// Sentinels the child can print to delimit the region of interest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
	Start,
	End,
}

/// Finds ROI sentinels anywhere inside an output line
#[derive(Debug, Clone)]
pub struct MarkerScanner {
	start: Vec<u8>,
	end: Vec<u8>,
}

impl MarkerScanner {
	pub fn new(start: &str, end: &str) -> Self {
		Self {
			start: start.as_bytes().to_vec(),
			end: end.as_bytes().to_vec(),
		}
	}

	/// A line holding both sentinels counts as a start
	pub fn scan(&self, line: &[u8]) -> Option<Marker> {
		if contains(line, &self.start) {
			Some(Marker::Start)
		} else if contains(line, &self.end) {
			Some(Marker::End)
		} else {
			None
		}
	}
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
	!needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}

/// Sends SIGKILL to a child that is still waiting to be reaped
#[derive(Debug, Clone, Copy)]
pub struct ChildKiller {
	pid: libc::pid_t,
}

impl ChildKiller {
	pub fn kill(&self) {
		// SAFETY: plain syscall on a pid we spawned and have not reaped yet.
		let rc = unsafe { libc::kill(self.pid, libc::SIGKILL) };
		if rc != 0 {
			debug!("kill({}) failed: {}", self.pid, io::Error::last_os_error());
		}
	}
}

/// The monitored command, with its stdout captured line by line
#[derive(Debug)]
pub struct ChildProcess {
	child: Child,
	stdout: Option<BufReader<ChildStdout>>,
}

impl ChildProcess {
	/// Starts `command[0]` with the remaining elements as arguments
	///
	/// stdin and stderr are inherited; stdout is piped back to the harness.
	pub fn spawn(command: &[OsString]) -> Result<Self> {
		let (program, args) = command
			.split_first()
			.ok_or_else(|| HarnessError::Usage("no command given".to_string()))?;

		let mut child = Command::new(program)
			.args(args)
			.stdin(Stdio::inherit())
			.stdout(Stdio::piped())
			.stderr(Stdio::inherit())
			.spawn()
			.map_err(|source| HarnessError::Spawn {
				program: program.to_string_lossy().into_owned(),
				source,
			})?;
		debug!("Started {:?} as pid {}", program, child.id());

		let stdout = child.stdout.take().map(BufReader::new);
		Ok(Self { child, stdout })
	}

	pub fn killer(&self) -> ChildKiller {
		ChildKiller {
			pid: self.child.id() as libc::pid_t,
		}
	}

	/// Raw output lines, newline included, until the child closes its stdout
	pub fn lines(&mut self) -> OutputLines<'_> {
		OutputLines {
			reader: self.stdout.as_mut(),
		}
	}

	/// Closes our end of the pipe and reaps the child
	pub fn wait(mut self) -> Result<ExitStatus> {
		self.stdout.take();
		Ok(self.child.wait()?)
	}
}

pub struct OutputLines<'a> {
	reader: Option<&'a mut BufReader<ChildStdout>>,
}

impl Iterator for OutputLines<'_> {
	type Item = io::Result<Vec<u8>>;

	fn next(&mut self) -> Option<Self::Item> {
		let reader = self.reader.as_mut()?;
		let mut line = Vec::new();
		match reader.read_until(b'\n', &mut line) {
			Ok(0) => {
				self.reader = None;
				None
			},
			Ok(_) => Some(Ok(line)),
			Err(e) => {
				self.reader = None;
				Some(Err(e))
			},
		}
	}
}

/// Exit code to forward for a finished child; signals map to 128 + signal number
pub fn exit_code(status: ExitStatus) -> i32 {
	match (status.code(), status.signal()) {
		(Some(code), _) => code,
		(None, Some(signal)) => 128 + signal,
		(None, None) => 1,
	}
}
