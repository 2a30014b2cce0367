//! Raw non-blocking serial link to the radio.
//!
//! The radio does its own framing ("packet mode"): each received frame
//! arrives as one contiguous burst of bytes, and each outgoing frame must go
//! down the port as one contiguous write. This module only moves bytes; all
//! frame-level sanity lives in the parser.

use std::{
    fs::{File, OpenOptions},
    io::{self, Read, Write},
    os::fd::AsFd,
    thread,
    time::Duration,
};

use anyhow::Context;
use nix::{
    fcntl::{fcntl, FcntlArg, OFlag},
    sys::termios::{self, BaudRate, ControlFlags, SetArg},
};

const READ_CHUNK: usize = 512;

/// An open radio serial port, raw 8-N-1, non-blocking.
#[derive(Debug)]
pub struct SerialLink {
    file: File,
    chunk: Box<[u8; READ_CHUNK]>,
}

impl SerialLink {
    /// Opens and configures the port. Failures here are fatal to startup.
    pub fn open(path: &str) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("opening {path}"))?;

        let mut tio =
            termios::tcgetattr(file.as_fd()).context("reading terminal attributes")?;
        termios::cfmakeraw(&mut tio);
        termios::cfsetspeed(&mut tio, BaudRate::B115200).context("setting baud rate")?;
        // raw mode already gives us 8 data bits and no parity; one stop bit
        // and an active receiver make it 8-N-1
        tio.control_flags &= !ControlFlags::CSTOPB;
        tio.control_flags |= ControlFlags::CLOCAL | ControlFlags::CREAD;
        termios::tcsetattr(file.as_fd(), SetArg::TCSANOW, &tio)
            .context("writing terminal attributes")?;

        fcntl(file.as_fd(), FcntlArg::F_SETFL(OFlag::O_NONBLOCK))
            .context("setting O_NONBLOCK")?;

        Ok(Self {
            file,
            chunk: Box::new([0; READ_CHUNK]),
        })
    }

    /// Drains whatever the radio has delivered, returning it as one inbound
    /// frame. Returns `None` when the port had nothing for us.
    pub fn poll_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut frame = Vec::new();
        loop {
            match self.file.read(&mut self.chunk[..]) {
                Ok(0) => break,
                Ok(n) => frame.extend_from_slice(&self.chunk[..n]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok((!frame.is_empty()).then_some(frame))
    }

    /// Writes one complete frame as a contiguous write.
    ///
    /// The port is non-blocking; if its output buffer is momentarily full we
    /// retry briefly rather than tear half a frame.
    pub fn send_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let mut written = 0;
        let mut stalls = 0;
        while written < frame.len() {
            match self.file.write(&frame[written..]) {
                Ok(n) => {
                    written += n;
                    stalls = 0;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    stalls += 1;
                    if stalls > 50 {
                        return Err(err);
                    }
                    thread::sleep(Duration::from_millis(2));
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}
