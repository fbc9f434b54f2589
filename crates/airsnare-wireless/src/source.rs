//! Frame sources
//!
//! A [`FrameSource`] yields raw radiotap-framed packets either from a live
//! monitor mode interface or from a pcap replay file. Reads are blocking
//! and bounded by a receive timeout so the reader can observe cancellation.

use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use nix::errno::Errno;
use nix::libc::{self, c_int, c_void, sockaddr_ll, AF_PACKET, SOCK_RAW};
use nix::sys::socket::{recv, MsgFlags};
use nix::unistd::close;

use crate::error::{Result, WirelessError};
use crate::pcap::PcapReader;

/// Maximum capture buffer size
const CAPTURE_BUFFER_SIZE: usize = 65536;

/// Receive timeout of live capture sockets
pub const LIVE_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// One captured packet, radiotap header included
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub timestamp: SystemTime,
}

impl RawFrame {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            timestamp: SystemTime::now(),
        }
    }
}

/// Result of a single blocking read
#[derive(Debug)]
pub enum ReadOutcome {
    Frame(RawFrame),
    /// Nothing arrived within the receive timeout
    Timeout,
    /// The source is exhausted (replay files only)
    Eof,
}

/// Blocking producer of captured frames
pub trait FrameSource: Send {
    /// Read the next frame, waiting at most the source's receive timeout
    fn read_frame(&mut self) -> Result<ReadOutcome>;

    /// Release the underlying handle. Called exactly once by the reader.
    fn close(&mut self);
}

/// Open a raw `AF_PACKET` socket bound to `ifindex`
pub(crate) fn open_packet_socket(ifindex: i32, recv_timeout: Option<Duration>) -> Result<RawFd> {
    if !crate::check_privileges() {
        return Err(WirelessError::Permission(
            "Root privileges required for raw socket".into(),
        ));
    }

    let fd = unsafe {
        libc::socket(
            AF_PACKET,
            SOCK_RAW,
            (libc::ETH_P_ALL as u16).to_be() as c_int,
        )
    };
    if fd < 0 {
        let err = Errno::last();
        tracing::debug!("Failed to create raw socket: {}", err);
        return Err(err.into());
    }

    let mut addr: sockaddr_ll = unsafe { mem::zeroed() };
    addr.sll_family = AF_PACKET as u16;
    addr.sll_ifindex = ifindex;
    addr.sll_protocol = (libc::ETH_P_ALL as u16).to_be();

    let bind_result = unsafe {
        libc::bind(
            fd,
            &addr as *const sockaddr_ll as *const libc::sockaddr,
            mem::size_of::<sockaddr_ll>() as libc::socklen_t,
        )
    };
    if bind_result < 0 {
        let err = Errno::last();
        let _ = close(fd);
        tracing::debug!(ifindex, "Failed to bind raw socket: {}", err);
        return Err(err.into());
    }

    if let Some(timeout) = recv_timeout {
        let tv = libc::timeval {
            tv_sec: timeout.as_secs() as libc::time_t,
            tv_usec: timeout.subsec_micros() as libc::suseconds_t,
        };
        let rc = unsafe {
            libc::setsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                &tv as *const _ as *const c_void,
                mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            let err = Errno::last();
            let _ = close(fd);
            return Err(WirelessError::Socket(format!(
                "Failed to set receive timeout: {}",
                err
            )));
        }
    }

    Ok(fd)
}

/// Live capture from a monitor mode interface
pub struct LiveSource {
    fd: RawFd,
    interface: String,
    buffer: Vec<u8>,
}

impl LiveSource {
    pub fn open(interface: &str, ifindex: i32) -> Result<Self> {
        let fd = open_packet_socket(ifindex, Some(LIVE_READ_TIMEOUT))?;
        tracing::debug!(interface, ifindex, "Opened capture socket");
        Ok(Self {
            fd,
            interface: interface.to_string(),
            buffer: vec![0u8; CAPTURE_BUFFER_SIZE],
        })
    }
}

impl FrameSource for LiveSource {
    fn read_frame(&mut self) -> Result<ReadOutcome> {
        if self.fd < 0 {
            return Ok(ReadOutcome::Eof);
        }

        let received = match recv(self.fd, &mut self.buffer, MsgFlags::empty()) {
            Ok(0) => return Ok(ReadOutcome::Timeout),
            Ok(n) => n,
            Err(Errno::EAGAIN | Errno::ETIMEDOUT | Errno::EINTR) => return Ok(ReadOutcome::Timeout),
            Err(e) => {
                return Err(WirelessError::Capture(format!(
                    "Receive on {} failed: {}",
                    self.interface, e
                )))
            }
        };

        Ok(ReadOutcome::Frame(RawFrame::new(
            self.buffer[..received].to_vec(),
        )))
    }

    fn close(&mut self) {
        if self.fd >= 0 {
            let _ = close(self.fd);
            tracing::debug!(interface = %self.interface, "Closed capture socket");
            self.fd = -1;
        }
    }
}

impl Drop for LiveSource {
    fn drop(&mut self) {
        self.close();
    }
}

impl AsRawFd for LiveSource {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

/// Offline playback of a radiotap pcap file
pub struct ReplaySource {
    path: PathBuf,
    reader: Option<PcapReader<std::io::BufReader<std::fs::File>>>,
}

impl ReplaySource {
    pub fn open(path: &Path) -> Result<Self> {
        let reader = PcapReader::open(path).map_err(|e| {
            WirelessError::SourceFile(format!("{}: {}", path.display(), e))
        })?;
        tracing::info!(path = %path.display(), "Replaying capture file");
        Ok(Self {
            path: path.to_path_buf(),
            reader: Some(reader),
        })
    }
}

impl FrameSource for ReplaySource {
    fn read_frame(&mut self) -> Result<ReadOutcome> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(ReadOutcome::Eof);
        };
        match reader.next_record() {
            Ok(Some(record)) => Ok(ReadOutcome::Frame(RawFrame {
                data: record.data,
                timestamp: record.timestamp,
            })),
            Ok(None) => Ok(ReadOutcome::Eof),
            Err(e) => {
                // A truncated tail ends the replay like a clean end of file
                tracing::warn!(path = %self.path.display(), "Replay stopped: {}", e);
                Ok(ReadOutcome::Eof)
            }
        }
    }

    fn close(&mut self) {
        self.reader = None;
    }
}
