//! Serial-port line transport (raw mode, non-blocking reads).

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::sys::termios::{self, BaudRate, ControlFlags, SetArg};
use tetra_traits::LineTransport;

use crate::error::{HwError, Result};

fn baud_rate(baud: u32) -> Result<BaudRate> {
    Ok(match baud {
        1200 => BaudRate::B1200,
        2400 => BaudRate::B2400,
        4800 => BaudRate::B4800,
        9600 => BaudRate::B9600,
        19200 => BaudRate::B19200,
        38400 => BaudRate::B38400,
        57600 => BaudRate::B57600,
        115_200 => BaudRate::B115200,
        230_400 => BaudRate::B230400,
        other => return Err(HwError::Serial(format!("unsupported baud rate {other}"))),
    })
}

fn open_port(path: &Path, baud: u32) -> Result<File> {
    let rate = baud_rate(baud)?;
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
        .open(path)?;

    let mut t = termios::tcgetattr(&file)
        .map_err(|e| HwError::Serial(format!("tcgetattr {}: {e}", path.display())))?;
    termios::cfmakeraw(&mut t);
    t.control_flags.insert(ControlFlags::CLOCAL | ControlFlags::CREAD);
    termios::cfsetspeed(&mut t, rate)
        .map_err(|e| HwError::Serial(format!("cfsetspeed {baud}: {e}")))?;
    termios::tcsetattr(&file, SetArg::TCSANOW, &t)
        .map_err(|e| HwError::Serial(format!("tcsetattr {}: {e}", path.display())))?;
    Ok(file)
}

pub struct SerialTransport {
    path: PathBuf,
    baud: u32,
    file: Option<File>,
}

impl SerialTransport {
    pub fn open(path: impl AsRef<Path>, baud: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = open_port(&path, baud)?;
        tracing::info!(port = %path.display(), baud, "serial port opened");
        Ok(Self {
            path,
            baud,
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or(HwError::Disconnected)
    }
}

impl LineTransport for SerialTransport {
    fn read_available(
        &mut self,
        buf: &mut [u8],
    ) -> std::result::Result<usize, Box<dyn std::error::Error + Send + Sync>> {
        match self.file()?.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(0),
            Err(e) => Err(Box::new(HwError::Io(e))),
        }
    }

    fn write_line(
        &mut self,
        line: &str,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut framed = Vec::with_capacity(line.len() + 1);
        framed.extend_from_slice(line.as_bytes());
        framed.push(b'\n');
        let file = self.file()?;
        file.write_all(&framed).map_err(HwError::Io)?;
        file.flush().map_err(HwError::Io)?;
        Ok(())
    }

    fn reopen(&mut self) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.file = None;
        let file = open_port(&self.path, self.baud)?;
        self.file = Some(file);
        tracing::info!(port = %self.path.display(), "serial port reopened");
        Ok(())
    }
}
