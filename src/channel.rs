//! Frame decoder – connect, read and validate frames from the tracker channel.
//!
//! ## State machine
//!
//! ```text
//!              try_connect() ok
//!   Disconnected ──────────────► Connected ──┐ read() ok / UnsupportedVersion
//!        ▲   │ try_connect() err      │  ▲   │
//!        │   └─────(Connecting)──┘    │  └───┘
//!        └─── disconnect() ◄──────────┘ Disconnected / MalformedFrame
//! ```
//!
//! A short header or a broken stream means the producer went away. A short
//! body means the stream lost alignment. Both require a fresh connection;
//! mid-stream resynchronization is not attempted.
//!
//! Opening never blocks and reads are async, so a caller can abandon a pending
//! [`FrameDecoder::read`] (e.g. inside `tokio::select!`) and then
//! [`disconnect`](FrameDecoder::disconnect) to release the channel.

use std::io::{self, ErrorKind};
#[cfg(unix)]
use std::path::PathBuf;

use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ChannelError, WireError};
use crate::protocol::{decode_frame, frame_len, FrameHeader, HEADER_LEN, PROTOCOL_VERSION};
use crate::types::{ChannelHealth, ChannelState, PipelineConfig, PoseSample};

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

/// Opens the byte stream frames arrive on.
pub trait Transport: Send {
    type Stream: AsyncRead + Unpin + Send;

    /// Open the channel without waiting for the producer. `Err` when the
    /// producer has not published it yet is the normal case, not a failure.
    ///
    /// Called from within a tokio runtime.
    fn open(&mut self) -> io::Result<Self::Stream>;

    fn name(&self) -> &str;
}

/// A named pipe client on Windows, a FIFO receiver on Unix.
///
/// A missing pipe fails with `NotFound`. On Linux the FIFO is opened
/// read-write, so a FIFO with no writer yet connects and simply stays silent
/// instead of reporting end of stream; a tracker restart is then also seen as
/// silence. Other Unix systems report a writer-less FIFO as end of stream and
/// go through the reconnect path.
#[derive(Debug, Clone)]
pub struct NamedPipe {
    name: String,
    #[cfg(unix)]
    path: PathBuf,
}

impl NamedPipe {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            #[cfg(unix)]
            path: PathBuf::from(&name),
            name,
        }
    }
}

impl Transport for NamedPipe {
    #[cfg(unix)]
    type Stream = tokio::net::unix::pipe::Receiver;
    #[cfg(windows)]
    type Stream = tokio::net::windows::named_pipe::NamedPipeClient;

    #[cfg(unix)]
    fn open(&mut self) -> io::Result<Self::Stream> {
        let mut options = tokio::net::unix::pipe::OpenOptions::new();
        #[cfg(target_os = "linux")]
        options.read_write(true);
        options.open_receiver(&self.path)
    }

    #[cfg(windows)]
    fn open(&mut self) -> io::Result<Self::Stream> {
        // ERROR_PIPE_BUSY and a missing server are both transient.
        tokio::net::windows::named_pipe::ClientOptions::new()
            .write(false)
            .open(&self.name)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

pub struct FrameDecoder<T: Transport> {
    transport: T,
    stream: Option<T::Stream>,
    state: ChannelState,
    expected_version: u32,
    log_every: u64,
    /// Failed attempts since the last successful connect.
    failed_attempts: u64,
    connect_attempts: u64,
    norm_warnings: u64,
    mismatch_logged: Option<u32>,
}

impl<T: Transport> FrameDecoder<T> {
    pub fn new(transport: T, config: &PipelineConfig) -> Self {
        Self {
            transport,
            stream: None,
            state: ChannelState::Disconnected,
            expected_version: config.expected_version,
            log_every: config.reconnect_log_every.max(1),
            failed_attempts: 0,
            connect_attempts: 0,
            norm_warnings: 0,
            mismatch_logged: None,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ChannelState::Connected
    }

    /// Total connect attempts, successful or not.
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Try once to open the channel. Failures are logged on the first attempt
    /// and every `reconnect_log_every`th after that.
    pub fn try_connect(&mut self) -> bool {
        self.state = ChannelState::Connecting;
        self.connect_attempts += 1;

        match self.transport.open() {
            Ok(stream) => {
                info!(
                    "connected to '{}' after {} attempt(s)",
                    self.transport.name(),
                    self.failed_attempts + 1
                );
                self.stream = Some(stream);
                self.state = ChannelState::Connected;
                self.failed_attempts = 0;
                self.mismatch_logged = None;
                true
            }
            Err(err) => {
                self.failed_attempts += 1;
                if self.failed_attempts == 1 || self.failed_attempts % self.log_every == 0 {
                    info!(
                        "waiting for tracker on '{}' (attempt {}): {}",
                        self.transport.name(),
                        self.failed_attempts,
                        err
                    );
                }
                self.state = ChannelState::Disconnected;
                false
            }
        }
    }

    /// Close the channel. Safe to call when already disconnected.
    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            debug!("disconnected from '{}'", self.transport.name());
        }
        self.state = ChannelState::Disconnected;
    }

    /// Wait for one complete frame.
    ///
    /// Dropping the future mid-frame leaves the stream misaligned; follow it
    /// with [`disconnect`](Self::disconnect).
    pub async fn read(&mut self) -> Result<PoseSample, ChannelError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(ChannelError::Disconnected);
        };

        let mut header = [0u8; HEADER_LEN];
        let got = read_full(stream, &mut header).await;
        if got < HEADER_LEN {
            debug!("short header ({got} of {HEADER_LEN} bytes)");
            self.disconnect();
            return Err(ChannelError::Disconnected);
        }
        let parsed = FrameHeader::parse(header);

        let frame_size = match parsed.frame_len() {
            Ok(len) => len,
            Err(WireError::UnsupportedVersion(version)) => {
                return self.drain_unsupported(parsed, version).await;
            }
            Err(err) => {
                warn!("{err}");
                self.disconnect();
                return Err(ChannelError::Disconnected);
            }
        };

        let mut frame = vec![0u8; frame_size];
        frame[..HEADER_LEN].copy_from_slice(&header);
        let body_len = frame_size - HEADER_LEN;
        let got = read_full(stream, &mut frame[HEADER_LEN..]).await;
        if got < body_len {
            warn!("frame body cut short ({got} of {body_len} bytes); reconnecting");
            self.disconnect();
            return Err(ChannelError::MalformedFrame {
                expected: body_len,
                received: got,
            });
        }

        let sample = match decode_frame(&frame) {
            Ok(sample) => sample,
            Err(WireError::UnsupportedVersion(version)) => {
                return Err(ChannelError::UnsupportedVersion(version))
            }
            Err(WireError::Truncated { expected, actual }) => {
                self.disconnect();
                return Err(ChannelError::MalformedFrame {
                    expected,
                    received: actual,
                });
            }
        };

        self.check_version(sample.version);
        self.check_norms(&sample);
        Ok(sample)
    }

    /// Health implied by a successfully decoded sample.
    pub fn classify(&self, sample: &PoseSample) -> ChannelHealth {
        if sample.version == self.expected_version {
            ChannelHealth::Connected
        } else {
            ChannelHealth::VersionMismatch
        }
    }

    async fn drain_unsupported(
        &mut self,
        header: FrameHeader,
        version: u32,
    ) -> Result<PoseSample, ChannelError> {
        // Assume the current layout so the next header lands on a boundary.
        let body_len = frame_len(PROTOCOL_VERSION, header.flags)
            .map(|len| len - HEADER_LEN)
            .unwrap_or(0);
        let mut scratch = vec![0u8; body_len];
        let got = match self.stream.as_mut() {
            Some(stream) => read_full(stream, &mut scratch).await,
            None => 0,
        };
        if got < body_len {
            self.disconnect();
            return Err(ChannelError::MalformedFrame {
                expected: body_len,
                received: got,
            });
        }
        if self.mismatch_logged != Some(version) {
            warn!("dropping frame with unsupported version {version}");
            self.mismatch_logged = Some(version);
        }
        Err(ChannelError::UnsupportedVersion(version))
    }

    fn check_version(&mut self, version: u32) {
        if version != self.expected_version && self.mismatch_logged != Some(version) {
            warn!(
                "protocol version {} (expected {}); decoding best-effort",
                version, self.expected_version
            );
            self.mismatch_logged = Some(version);
        }
    }

    fn check_norms(&mut self, sample: &PoseSample) {
        if let Some((device, norm)) = sample.norm_violation() {
            self.norm_warnings += 1;
            if self.norm_warnings == 1 || self.norm_warnings % self.log_every == 0 {
                warn!(
                    "{device} quaternion norm {norm:.3} out of range ({} so far)",
                    self.norm_warnings
                );
            }
        }
    }
}

/// Read until `buf` is full, the stream ends, or it fails. Returns the number
/// of bytes read.
async fn read_full<R: AsyncRead + Unpin>(stream: &mut R, buf: &mut [u8]) -> usize {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                debug!("channel read failed: {err}");
                break;
            }
        }
    }
    filled
}
