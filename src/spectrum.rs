//! Audio spectrum input.
//!
//! An external analyser (cava in raw 8-bit mode) writes one byte per bar per
//! frame to stdout.  We read exactly one frame per main-loop tick.

use std::io::{ErrorKind, Read};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use crate::config::SpectrumConfig;
use crate::error::{DecodeError, StartupError};

/// One magnitude byte per bar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpectrumFrame {
    bars: Vec<u8>,
}

impl SpectrumFrame {
    pub fn new(bars: Vec<u8>) -> Self {
        Self { bars }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bars
    }

    /// First and second half of the bars (left/right channel in cava's
    /// stereo layout).
    pub fn split_channels(&self) -> (&[u8], &[u8]) {
        self.bars.split_at(self.bars.len() / 2)
    }
}

/// Reads fixed-size frames from a byte stream.
pub struct FrameReader<R> {
    reader: R,
    bars: usize,
    exhausted: bool,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R, bars: usize) -> Self {
        Self {
            reader,
            bars,
            exhausted: false,
        }
    }

    /// Block until a full frame is available.
    ///
    /// `Ok(None)` once the stream has ended; a frame cut short by the end of
    /// the stream is a [`DecodeError::ShortFrame`].
    pub fn read_frame(&mut self) -> Result<Option<SpectrumFrame>, DecodeError> {
        if self.exhausted {
            return Ok(None);
        }
        let mut buf = vec![0u8; self.bars];
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(DecodeError::Io(e)),
            }
        }

        if filled == buf.len() {
            return Ok(Some(SpectrumFrame::new(buf)));
        }
        self.exhausted = true;
        if filled == 0 {
            Ok(None)
        } else {
            Err(DecodeError::ShortFrame {
                got: filled,
                expected: self.bars,
            })
        }
    }

    #[cfg(test)]
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

/// The running analyser subprocess.
pub struct SpectrumProcess {
    child: Child,
    frames: FrameReader<ChildStdout>,
}

impl SpectrumProcess {
    pub fn spawn(config: &SpectrumConfig) -> Result<Self, StartupError> {
        let spawn_err = |error| StartupError::Spectrum {
            command: config.command.clone(),
            error,
        };
        let mut child = Command::new(&config.command)
            .args(&config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(spawn_err)?;
        let stdout = child.stdout.take().ok_or_else(|| {
            spawn_err(std::io::Error::new(ErrorKind::BrokenPipe, "no stdout pipe"))
        })?;
        log::info!("Spectrum process `{}` started (pid {})", config.command, child.id());
        Ok(Self {
            child,
            frames: FrameReader::new(stdout, config.bars),
        })
    }

    pub fn read_frame(&mut self) -> Result<Option<SpectrumFrame>, DecodeError> {
        self.frames.read_frame()
    }

    /// SIGTERM, then SIGKILL if it has not exited within a second.
    pub fn terminate(mut self) {
        let pid = self.child.id() as libc::pid_t;
        // SAFETY: plain syscall on a pid we spawned and have not reaped.
        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }
        let deadline = Instant::now() + Duration::from_secs(1);
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    log::info!("Spectrum process exited ({status})");
                    return;
                }
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(20));
                }
                Ok(None) => break,
                Err(e) => {
                    log::error!("Failed to wait for spectrum process: {e}");
                    break;
                }
            }
        }
        if let Err(e) = self.child.kill() {
            log::error!("Failed to kill spectrum process: {e}");
        }
        let _ = self.child.wait();
    }
}
