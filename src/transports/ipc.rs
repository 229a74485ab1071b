//! Unix domain socket transport to the local desktop client.
//!
//! The peer listens on `discord-ipc-{0..9}` inside the first of
//! `$XDG_RUNTIME_DIR`, `$TMPDIR`, `$TMP` and `$TEMP` that is set, falling back
//! to `/tmp`. Every message is framed by an 8-byte little-endian header:
//!
//! ```text
//! +----------------+----------------+---------------------+
//! | opcode: u32 LE | length: u32 LE | payload (JSON)      |
//! +----------------+----------------+---------------------+
//! ```
//!
//! Opening sends a handshake frame carrying the application id and completes
//! once the peer dispatches `READY`. Pings are answered inside [`read`], and a
//! close frame surfaces as a [`TransportError`] with the peer's code and
//! message.
//!
//! [`read`]: crate::transport::Transport::read

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::TransportError;
use crate::error_codes::ErrorCode;
use crate::protocol::InboundMessage;
use crate::transport::{OpenStatus, Transport};

/// Size of the frame header in bytes.
pub const HEADER_LEN: usize = 8;

/// Largest payload accepted in either direction.
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Handshake protocol version.
const RPC_VERSION: u32 = 1;

const SOCKET_DIR_VARS: [&str; 4] = ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"];
const SOCKET_SLOTS: u32 = 10;
const READ_CHUNK: usize = 4096;

/// Frame opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Opcode {
    Handshake = 0,
    Frame = 1,
    Close = 2,
    Ping = 3,
    Pong = 4,
}

impl Opcode {
    fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Handshake),
            1 => Some(Self::Frame),
            2 => Some(Self::Close),
            3 => Some(Self::Ping),
            4 => Some(Self::Pong),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct Handshake<'a> {
    v: u32,
    client_id: &'a str,
}

#[derive(Deserialize)]
struct ClosePayload {
    #[serde(default)]
    code: Option<i32>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Handshaking,
    Open,
}

/// [`Transport`] over the desktop client's unix socket.
///
/// # Example
///
/// ```rust,no_run
/// use rich_presence_client::transports::IpcTransport;
/// use rich_presence_client::{EventHandlers, RpcClient, RpcConfig};
///
/// # fn main() -> rich_presence_client::Result<()> {
/// let transport = IpcTransport::new("345229890980937739")
///     .with_socket_path("/run/user/1000/discord-ipc-0");
/// let client = RpcClient::start(
///     transport,
///     RpcConfig::new("345229890980937739"),
///     EventHandlers::new(),
/// )?;
/// # Ok(())
/// # }
/// ```
pub struct IpcTransport {
    application_id: String,
    socket_path: Option<PathBuf>,
    stream: Option<UnixStream>,
    state: State,
    /// Raw bytes received but not yet framed.
    read_buf: Vec<u8>,
    /// Payload of the most recent frame.
    frame: Vec<u8>,
    write_buf: Vec<u8>,
}

impl IpcTransport {
    /// Create a closed transport that will identify as `application_id`.
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            socket_path: None,
            stream: None,
            state: State::Closed,
            read_buf: Vec::with_capacity(HEADER_LEN + MAX_FRAME_SIZE + READ_CHUNK),
            frame: Vec::with_capacity(MAX_FRAME_SIZE),
            write_buf: Vec::with_capacity(HEADER_LEN + MAX_FRAME_SIZE),
        }
    }

    /// Connect to `path` instead of discovering the socket.
    #[must_use]
    pub fn with_socket_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.socket_path = Some(path.into());
        self
    }

    fn candidate_paths(&self) -> Vec<PathBuf> {
        if let Some(path) = &self.socket_path {
            return vec![path.clone()];
        }
        let dir = SOCKET_DIR_VARS
            .iter()
            .find_map(std::env::var_os)
            .map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
        (0..SOCKET_SLOTS)
            .map(|slot| dir.join(format!("discord-ipc-{slot}")))
            .collect()
    }

    /// Connect to the first socket that accepts and send the handshake.
    fn begin_handshake(&mut self) -> Result<(), TransportError> {
        let mut last_error = None;
        for path in self.candidate_paths() {
            match UnixStream::connect(&path) {
                Ok(stream) => {
                    debug!(path = %path.display(), "connected to IPC socket");
                    self.stream = Some(stream);
                    last_error = None;
                    break;
                }
                Err(e) => {
                    trace!(path = %path.display(), "IPC socket unavailable: {e}");
                    last_error = Some(e);
                }
            }
        }
        if let Some(e) = last_error {
            return Err(TransportError::new(
                ErrorCode::PipeClosed.code(),
                format!("no IPC socket accepted the connection: {e}"),
            ));
        }

        let handshake = serde_json::to_vec(&Handshake {
            v: RPC_VERSION,
            client_id: &self.application_id,
        })
        .map_err(|e| TransportError::new(ErrorCode::InvalidEncoding.code(), e.to_string()))?;

        let Some(stream) = self.stream.as_mut() else {
            return Err(TransportError::pipe_closed());
        };
        // Still blocking here, so the handshake is written in full.
        write_frame(&mut self.write_buf, stream, Opcode::Handshake, &handshake)?;
        stream.set_nonblocking(true)?;
        self.state = State::Handshaking;
        Ok(())
    }

    /// Consume frames until the peer dispatches `READY`.
    fn poll_handshake(&mut self) -> Result<OpenStatus, TransportError> {
        loop {
            match self.next_frame()? {
                None => return Ok(OpenStatus::Pending),
                Some(Opcode::Frame) => {
                    let ready = InboundMessage::parse(&self.frame)
                        .map(|m| m.cmd() == Some("DISPATCH") && m.evt() == Some("READY"))
                        .unwrap_or(false);
                    if ready {
                        debug!("IPC handshake complete");
                        self.state = State::Open;
                        return Ok(OpenStatus::Connected);
                    }
                    trace!("ignoring frame received during handshake");
                }
                Some(opcode) => self.handle_control(opcode)?,
            }
        }
    }

    /// Frame the next complete message out of the socket, reading more bytes
    /// if needed. Returns `None` when the socket has nothing buffered.
    fn next_frame(&mut self) -> Result<Option<Opcode>, TransportError> {
        loop {
            if let Some(opcode) = self.take_buffered_frame()? {
                return Ok(Some(opcode));
            }
            let Some(stream) = self.stream.as_mut() else {
                return Err(TransportError::pipe_closed());
            };
            let mut chunk = [0u8; READ_CHUNK];
            match stream.read(&mut chunk) {
                Ok(0) => return Err(TransportError::pipe_closed()),
                Ok(n) => self.read_buf.extend_from_slice(chunk.get(..n).unwrap_or_default()),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn take_buffered_frame(&mut self) -> Result<Option<Opcode>, TransportError> {
        let (Some(raw_opcode), Some(len)) = (read_u32_le(&self.read_buf, 0), read_u32_le(&self.read_buf, 4))
        else {
            return Ok(None);
        };
        let len = len as usize;
        if len > MAX_FRAME_SIZE {
            return Err(TransportError::read_corrupt(format!(
                "frame of {len} bytes exceeds the {MAX_FRAME_SIZE} byte limit"
            )));
        }
        let opcode = Opcode::from_u32(raw_opcode)
            .ok_or_else(|| TransportError::read_corrupt(format!("unknown opcode {raw_opcode}")))?;
        let Some(payload) = self.read_buf.get(HEADER_LEN..HEADER_LEN + len) else {
            return Ok(None);
        };
        self.frame.clear();
        self.frame.extend_from_slice(payload);
        self.read_buf.drain(..HEADER_LEN + len);
        Ok(Some(opcode))
    }

    /// Handle a non-data frame.
    fn handle_control(&mut self, opcode: Opcode) -> Result<(), TransportError> {
        match opcode {
            Opcode::Ping => {
                trace!("answering ping");
                let Some(stream) = self.stream.as_mut() else {
                    return Err(TransportError::pipe_closed());
                };
                write_frame(&mut self.write_buf, stream, Opcode::Pong, &self.frame)
            }
            Opcode::Pong => Ok(()),
            Opcode::Close => {
                let close: Option<ClosePayload> = serde_json::from_slice(&self.frame).ok();
                let code = close
                    .as_ref()
                    .and_then(|c| c.code)
                    .unwrap_or(ErrorCode::AbnormalClose.code());
                let message = close
                    .and_then(|c| c.message)
                    .unwrap_or_else(|| "connection closed by peer".to_owned());
                debug!(code, "peer closed the IPC connection: {message}");
                Err(TransportError::new(code, message))
            }
            Opcode::Handshake | Opcode::Frame => {
                Err(TransportError::read_corrupt(format!("unexpected {opcode:?} frame")))
            }
        }
    }

    fn fail<T>(&mut self, err: TransportError) -> Result<T, TransportError> {
        self.close();
        Err(err)
    }
}

impl Transport for IpcTransport {
    fn open(&mut self) -> Result<OpenStatus, TransportError> {
        let result = match self.state {
            State::Open => return Ok(OpenStatus::Connected),
            State::Closed => self.begin_handshake().and_then(|()| self.poll_handshake()),
            State::Handshaking => self.poll_handshake(),
        };
        match result {
            Ok(status) => Ok(status),
            Err(e) => self.fail(e),
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            debug!("closing IPC socket");
            if let Err(e) = stream.shutdown(std::net::Shutdown::Both) {
                trace!("socket shutdown: {e}");
            }
        }
        self.state = State::Closed;
        self.read_buf.clear();
        self.frame.clear();
    }

    fn is_open(&self) -> bool {
        self.state == State::Open && self.stream.is_some()
    }

    fn read(&mut self) -> Result<Option<&[u8]>, TransportError> {
        if self.state != State::Open {
            return Ok(None);
        }
        loop {
            let opcode = match self.next_frame() {
                Ok(Some(opcode)) => opcode,
                Ok(None) => return Ok(None),
                Err(e) => return self.fail(e),
            };
            if opcode == Opcode::Frame {
                return Ok(Some(&self.frame));
            }
            if let Err(e) = self.handle_control(opcode) {
                return self.fail(e);
            }
        }
    }

    fn write(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let Some(stream) = self.stream.as_mut().filter(|_| self.state == State::Open) else {
            return Err(TransportError::pipe_closed());
        };
        if let Err(e) = write_frame(&mut self.write_buf, stream, Opcode::Frame, payload) {
            warn!(code = e.code, "IPC write failed: {}", e.message);
            return self.fail(e);
        }
        Ok(())
    }
}

impl std::fmt::Debug for IpcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcTransport")
            .field("application_id", &self.application_id)
            .field("socket_path", &self.socket_path)
            .field("state", &self.state)
            .finish()
    }
}

fn read_u32_le(bytes: &[u8], at: usize) -> Option<u32> {
    let word: [u8; 4] = bytes.get(at..at + 4)?.try_into().ok()?;
    Some(u32::from_le_bytes(word))
}

/// Frame `payload` into `buf` and write it in one call.
///
/// A socket that cannot take the whole frame without blocking counts as a
/// failure.
fn write_frame(
    buf: &mut Vec<u8>,
    stream: &mut UnixStream,
    opcode: Opcode,
    payload: &[u8],
) -> Result<(), TransportError> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|_| payload.len() <= MAX_FRAME_SIZE)
        .ok_or_else(|| {
            TransportError::new(
                ErrorCode::PipeClosed.code(),
                format!("payload of {} bytes exceeds the frame limit", payload.len()),
            )
        })?;
    buf.clear();
    buf.extend_from_slice(&(opcode as u32).to_le_bytes());
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(payload);
    stream.write_all(buf)?;
    Ok(())
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread::JoinHandle;
    use std::time::{Duration, Instant};

    static SOCKET_COUNTER: AtomicUsize = AtomicUsize::new(0);

    fn socket_path() -> PathBuf {
        let n = SOCKET_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!("rpc-ipc-test-{}-{n}", std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    fn send(stream: &mut UnixStream, opcode: Opcode, json: &serde_json::Value) {
        let payload = serde_json::to_vec(json).unwrap();
        let mut frame = Vec::new();
        frame.extend_from_slice(&(opcode as u32).to_le_bytes());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&payload);
        stream.write_all(&frame).unwrap();
    }

    fn recv(stream: &mut UnixStream) -> (u32, Vec<u8>) {
        let mut header = [0u8; HEADER_LEN];
        stream.read_exact(&mut header).unwrap();
        let opcode = read_u32_le(&header, 0).unwrap();
        let len = read_u32_le(&header, 4).unwrap() as usize;
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).unwrap();
        (opcode, payload)
    }

    fn ready() -> serde_json::Value {
        serde_json::json!({"cmd": "DISPATCH", "evt": "READY", "data": {"v": 1}})
    }

    /// Spawn a fake peer that accepts one connection and runs `script`.
    fn peer(
        path: &std::path::Path,
        script: impl FnOnce(UnixStream) + Send + 'static,
    ) -> JoinHandle<()> {
        let listener = UnixListener::bind(path).unwrap();
        std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            script(stream);
        })
    }

    fn open_until_connected(transport: &mut IpcTransport) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match transport.open().unwrap() {
                OpenStatus::Connected => return,
                OpenStatus::Pending => {
                    assert!(Instant::now() < deadline, "handshake timed out");
                    std::thread::sleep(Duration::from_millis(5));
                }
            }
        }
    }

    fn read_until_some(transport: &mut IpcTransport) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(payload) = transport.read()? {
                return Ok(payload.to_vec());
            }
            assert!(Instant::now() < deadline, "read timed out");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn handshake_completes_on_ready() {
        let path = socket_path();
        let server = peer(&path, |mut stream| {
            let (opcode, payload) = recv(&mut stream);
            assert_eq!(opcode, Opcode::Handshake as u32);
            let hello: serde_json::Value = serde_json::from_slice(&payload).unwrap();
            assert_eq!(hello, serde_json::json!({"v": 1, "client_id": "1234"}));
            send(&mut stream, Opcode::Frame, &ready());
            // Hold the socket until the client hangs up.
            let _ = stream.read(&mut [0u8; 1]);
        });

        let mut transport = IpcTransport::new("1234").with_socket_path(&path);
        assert!(!transport.is_open());
        open_until_connected(&mut transport);
        assert!(transport.is_open());

        transport.close();
        assert!(!transport.is_open());
        server.join().unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn frames_are_exchanged_and_pings_answered() {
        let path = socket_path();
        let server = peer(&path, |mut stream| {
            recv(&mut stream);
            send(&mut stream, Opcode::Frame, &ready());
            send(&mut stream, Opcode::Ping, &serde_json::json!({"n": 7}));
            send(
                &mut stream,
                Opcode::Frame,
                &serde_json::json!({"evt": "JOIN_GAME", "data": {"secret": "abc123"}}),
            );

            let (opcode, payload) = recv(&mut stream);
            assert_eq!(opcode, Opcode::Pong as u32);
            assert_eq!(payload, br#"{"n":7}"#);

            let (opcode, payload) = recv(&mut stream);
            assert_eq!(opcode, Opcode::Frame as u32);
            assert_eq!(payload, br#"{"cmd":"SUBSCRIBE"}"#);
        });

        let mut transport = IpcTransport::new("1234").with_socket_path(&path);
        open_until_connected(&mut transport);

        let payload = read_until_some(&mut transport).unwrap();
        let message = InboundMessage::parse(&payload).unwrap();
        assert_eq!(message.evt(), Some("JOIN_GAME"));

        transport.write(br#"{"cmd":"SUBSCRIBE"}"#).unwrap();
        server.join().unwrap();
        transport.close();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn close_frame_reports_peer_code() {
        let path = socket_path();
        let server = peer(&path, |mut stream| {
            recv(&mut stream);
            send(&mut stream, Opcode::Frame, &ready());
            send(
                &mut stream,
                Opcode::Close,
                &serde_json::json!({"code": 4000, "message": "Invalid Client ID"}),
            );
        });

        let mut transport = IpcTransport::new("1234").with_socket_path(&path);
        open_until_connected(&mut transport);
        server.join().unwrap();

        let err = read_until_some(&mut transport).unwrap_err();
        assert_eq!(err, TransportError::new(4000, "Invalid Client ID"));
        assert!(!transport.is_open());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn close_during_handshake_fails_open() {
        let path = socket_path();
        let server = peer(&path, |mut stream| {
            recv(&mut stream);
            send(
                &mut stream,
                Opcode::Close,
                &serde_json::json!({"code": 4004, "message": "Invalid version"}),
            );
        });

        let mut transport = IpcTransport::new("1234").with_socket_path(&path);
        let deadline = Instant::now() + Duration::from_secs(5);
        let err = loop {
            match transport.open() {
                Ok(OpenStatus::Pending) => {
                    assert!(Instant::now() < deadline, "handshake timed out");
                    std::thread::sleep(Duration::from_millis(5));
                }
                Ok(OpenStatus::Connected) => panic!("handshake should fail"),
                Err(e) => break e,
            }
        };
        server.join().unwrap();
        assert_eq!(err.error_code(), Some(ErrorCode::InvalidVersion));
        assert!(!transport.is_open());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn oversized_frame_is_corrupt() {
        let path = socket_path();
        let server = peer(&path, |mut stream| {
            recv(&mut stream);
            send(&mut stream, Opcode::Frame, &ready());
            let mut header = Vec::new();
            header.extend_from_slice(&(Opcode::Frame as u32).to_le_bytes());
            header.extend_from_slice(&((MAX_FRAME_SIZE + 1) as u32).to_le_bytes());
            stream.write_all(&header).unwrap();
        });

        let mut transport = IpcTransport::new("1234").with_socket_path(&path);
        open_until_connected(&mut transport);
        server.join().unwrap();

        let err = read_until_some(&mut transport).unwrap_err();
        assert_eq!(err.error_code(), Some(ErrorCode::ReadCorrupt));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_socket_fails_open() {
        let mut transport = IpcTransport::new("1234").with_socket_path(socket_path());
        let err = transport.open().unwrap_err();
        assert_eq!(err.error_code(), Some(ErrorCode::PipeClosed));
        assert!(!transport.is_open());
    }

    #[test]
    fn write_when_closed_is_pipe_closed() {
        let mut transport = IpcTransport::new("1234");
        assert_eq!(transport.write(b"{}"), Err(TransportError::pipe_closed()));
        assert_eq!(transport.read().unwrap(), None);
    }
}
