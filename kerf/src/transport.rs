//! `transport`
//!
//! Delivers a command stream to the cutter over a serial port, or to a file.

use std::{
    collections::HashMap,
    fs::File,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::hpgl::CommandStream;

/// The baud rate the cutter listens at.
pub const DEFAULT_BAUD_RATE: u32 = 19200;

/// How long a single write to the serial port may block before giving up.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a job's command stream is sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportTarget {
    /// A cutter attached to a serial port, 8-N-1 with no flow control.
    SerialPort {
        /// The port to open, e.g. `/dev/ttyUSB0` or `COM1`.
        /// `None` uses the first port the system reports.
        #[serde(default)]
        port: Option<String>,
        /// The baud rate to open the port at.
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
    /// A plot file, created or truncated for every job.
    File {
        /// The path to write the stream to.
        path: PathBuf,
    },
}

/// Serde default for [`TransportTarget::SerialPort::baud_rate`].
fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

impl Default for TransportTarget {
    fn default() -> Self {
        TransportTarget::SerialPort {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

impl std::fmt::Display for TransportTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportTarget::SerialPort {
                port: Some(port),
                baud_rate,
            } => write!(f, "serial port {port} at {baud_rate} baud"),
            TransportTarget::SerialPort {
                port: None,
                baud_rate,
            } => write!(f, "first serial port at {baud_rate} baud"),
            TransportTarget::File { path } => write!(f, "file {}", path.display()),
        }
    }
}

/// Errors that can occur when sending a stream.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open or write to the serial port.
    #[error("failed to send to the serial port: {0}")]
    SerialFailure(#[source] io::Error),
    /// Failed to open or write to the output file.
    #[error("failed to write the plot file: {0}")]
    FileFailure(#[source] io::Error),
}

/// Opens the sinks a stream can be written to.
///
/// Whatever is returned is closed when it is dropped.
pub trait Connector: Send + Sync {
    /// Opens a serial port for writing.
    ///
    /// # Arguments
    /// * `port`: The port name, or `None` for the first port available.
    /// * `baud_rate`: The baud rate to open the port at.
    ///
    /// # Errors
    /// Any error raised while finding or opening the port.
    fn open_serial(&self, port: Option<&str>, baud_rate: u32) -> io::Result<Box<dyn Write + Send>>;

    /// Opens a file for writing, creating it or truncating it.
    ///
    /// # Arguments
    /// * `path`: The file to open.
    ///
    /// # Errors
    /// Any error raised while opening the file.
    fn open_file(&self, path: &Path) -> io::Result<Box<dyn Write + Send>>;

    /// Finds the port used when a serial target names none.
    ///
    /// # Errors
    /// If the ports cannot be listed or there are none.
    fn first_serial_port(&self) -> io::Result<String>;
}

/// Opens real serial ports and files.
#[derive(Debug, Clone)]
pub struct SystemConnector {
    /// Timeout for each write to a serial port.
    write_timeout: Duration,
}

impl Default for SystemConnector {
    fn default() -> Self {
        SystemConnector::new(DEFAULT_WRITE_TIMEOUT)
    }
}

impl SystemConnector {
    /// Creates a new [`SystemConnector`].
    ///
    /// # Arguments
    /// * `write_timeout`: How long a single serial write may block.
    #[must_use]
    pub fn new(write_timeout: Duration) -> Self {
        SystemConnector { write_timeout }
    }
}

impl Connector for SystemConnector {
    fn open_serial(&self, port: Option<&str>, baud_rate: u32) -> io::Result<Box<dyn Write + Send>> {
        let name = match port {
            Some(name) => name.to_string(),
            None => self.first_serial_port()?,
        };

        log::debug!("Opening serial port {name} at {baud_rate} baud");
        let port = serialport::new(&name, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(self.write_timeout)
            .open()?;

        Ok(Box::new(port))
    }

    fn open_file(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        log::debug!("Opening {} for writing", path.display());
        Ok(Box::new(File::create(path)?))
    }

    fn first_serial_port(&self) -> io::Result<String> {
        let ports = serialport::available_ports()?;
        ports
            .into_iter()
            .next()
            .map(|port| port.port_name)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no serial ports available"))
    }
}

/// Writes every byte to a sink, then flushes and closes it.
///
/// The sink is consumed so it is closed on every path out of here.
///
/// # Arguments
/// * `sink`: Where to write.
/// * `bytes`: What to write.
///
/// # Errors
/// The first write or flush error.
fn write_and_close(mut sink: Box<dyn Write + Send>, bytes: &[u8]) -> io::Result<()> {
    sink.write_all(bytes)?;
    sink.flush()
}

/// Sends a stream to a target using the given connector.
///
/// A single attempt is made, retrying is up to the caller.
///
/// # Arguments
/// * `connector`: Opens the serial port or file.
/// * `stream`: The stream to send.
/// * `target`: Where to send it.
///
/// # Errors
/// [`TransportError::SerialFailure`] or [`TransportError::FileFailure`] if the target
/// could not be opened or the stream could not be written in full.
pub fn send_with<C: Connector + ?Sized>(
    connector: &C,
    stream: &CommandStream,
    target: &TransportTarget,
) -> Result<(), TransportError> {
    let bytes = stream.to_bytes();
    log::info!("Sending {} bytes to {target}", bytes.len());

    match target {
        TransportTarget::SerialPort { port, baud_rate } => {
            let sink = connector
                .open_serial(port.as_deref(), *baud_rate)
                .map_err(TransportError::SerialFailure)?;
            write_and_close(sink, &bytes).map_err(TransportError::SerialFailure)
        }
        TransportTarget::File { path } => {
            let sink = connector
                .open_file(path)
                .map_err(TransportError::FileFailure)?;
            write_and_close(sink, &bytes).map_err(TransportError::FileFailure)
        }
    }
}

/// Names the serial port a target will use, so that it can be locked before sending.
///
/// # Arguments
/// * `connector`: Knows which serial port is the first one.
/// * `target`: The target as configured.
///
/// # Returns
/// The target with its serial port filled in, file targets are returned unchanged.
///
/// # Errors
/// [`TransportError::SerialFailure`] if no port is named and none can be found.
pub fn resolve_target<C: Connector + ?Sized>(
    connector: &C,
    target: &TransportTarget,
) -> Result<TransportTarget, TransportError> {
    match target {
        TransportTarget::SerialPort {
            port: None,
            baud_rate,
        } => {
            let port = connector
                .first_serial_port()
                .map_err(TransportError::SerialFailure)?;
            log::debug!("Using first serial port {port}");
            Ok(TransportTarget::SerialPort {
                port: Some(port),
                baud_rate: *baud_rate,
            })
        }
        _ => Ok(target.clone()),
    }
}

/// Sends a stream to a target, opening real serial ports and files.
///
/// # Arguments
/// * `stream`: The stream to send.
/// * `target`: Where to send it.
///
/// # Errors
/// See [`send_with`].
pub fn send(stream: &CommandStream, target: &TransportTarget) -> Result<(), TransportError> {
    send_with(&SystemConnector::default(), stream, target)
}

/// The physical thing a target writes to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Device {
    /// A serial port by name, whatever the baud rate. `None` is the unresolved first port.
    Serial(Option<String>),
    /// A file by canonical path.
    File(PathBuf),
}

impl Device {
    /// Works out which device a target writes to.
    ///
    /// # Arguments
    /// * `target`: The target to look at.
    fn of(target: &TransportTarget) -> Self {
        match target {
            TransportTarget::SerialPort { port, .. } => Device::Serial(port.clone()),
            TransportTarget::File { path } => Device::File(canonical_file(path)),
        }
    }
}

/// Canonicalises a file path that may not exist yet.
///
/// # Arguments
/// * `path`: The path to canonicalise.
///
/// # Returns
/// The canonical path if the file or its directory exists, `path` unchanged otherwise.
fn canonical_file(path: &Path) -> PathBuf {
    if let Ok(path) = path.canonicalize() {
        return path;
    }

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    match (parent.canonicalize(), path.file_name()) {
        (Ok(parent), Some(name)) => parent.join(name),
        _ => path.to_path_buf(),
    }
}

/// One lock per device, so that at most one stream is in flight to each of them.
///
/// Serial targets are told apart by port name only. Resolve them with
/// [`resolve_target`] first so that the first port and its name share a lock.
#[derive(Debug, Default)]
pub struct TargetLocks {
    /// The lock for each device seen so far.
    locks: Mutex<HashMap<Device, Arc<Mutex<()>>>>,
}

impl TargetLocks {
    /// Gets the lock guarding a target's device, creating it on first use.
    ///
    /// # Arguments
    /// * `target`: The target to be locked.
    ///
    /// # Returns
    /// The lock, shared with every other caller writing to the same device.
    #[must_use]
    pub fn lock_for(&self, target: &TransportTarget) -> Arc<Mutex<()>> {
        let device = Device::of(target);
        // The map and the guarded unit hold no invariants a panic could break.
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(device).or_default().clone()
    }

    /// Runs `f` while holding the lock for `target`.
    ///
    /// # Arguments
    /// * `target`: The target to lock.
    /// * `f`: The work to do while holding the lock.
    ///
    /// # Returns
    /// Whatever `f` returns.
    pub fn with_lock<T>(&self, target: &TransportTarget, f: impl FnOnce() -> T) -> T {
        let lock = self.lock_for(target);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::{
        geometry::Point2D,
        hpgl::JobEncoder,
        tool::{JobParameters, ToolId},
    };

    fn stream() -> CommandStream {
        JobEncoder::default().encode(
            &[vec![Point2D::new(0.0, 0.0), Point2D::new(10.0, 0.0)]],
            &JobParameters {
                tool: ToolId::Tool1,
                depth_mm: 1.0,
                speed_mm_per_sec: 30,
            },
        )
    }

    /// A sink that records what was written and whether it was closed.
    struct MockSink {
        written: Arc<Mutex<Vec<u8>>>,
        released: Arc<AtomicBool>,
        fail_after: Option<usize>,
        chunk: usize,
    }

    impl Write for MockSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut written = self.written.lock().expect("mock sink poisoned");
            if self.fail_after.is_some_and(|limit| written.len() >= limit) {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "cable pulled"));
            }
            let n = buf.len().min(self.chunk);
            written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Drop for MockSink {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct MockConnector {
        written: Arc<Mutex<Vec<u8>>>,
        released: Arc<AtomicBool>,
        fail_open: bool,
        fail_after: Option<usize>,
        opened: AtomicUsize,
    }

    impl MockConnector {
        fn sink(&self) -> io::Result<Box<dyn Write + Send>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            if self.fail_open {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such port"));
            }
            Ok(Box::new(MockSink {
                written: self.written.clone(),
                released: self.released.clone(),
                fail_after: self.fail_after,
                chunk: 7,
            }))
        }
    }

    impl Connector for MockConnector {
        fn open_serial(&self, _: Option<&str>, _: u32) -> io::Result<Box<dyn Write + Send>> {
            self.sink()
        }

        fn open_file(&self, _: &Path) -> io::Result<Box<dyn Write + Send>> {
            self.sink()
        }

        fn first_serial_port(&self) -> io::Result<String> {
            Ok("/dev/ttyMOCK0".to_string())
        }
    }

    #[test]
    fn test_serial_writes_whole_stream() {
        let connector = MockConnector::default();
        let stream = stream();

        send_with(&connector, &stream, &TransportTarget::default()).expect("send failed");

        assert_eq!(
            *connector.written.lock().expect("poisoned"),
            stream.to_bytes(),
            "short writes must not truncate the stream"
        );
        assert!(connector.released.load(Ordering::SeqCst), "port not closed");
    }

    #[test]
    fn test_serial_write_failure_is_reported_and_port_released() {
        let connector = MockConnector {
            fail_after: Some(20),
            ..Default::default()
        };

        let result = send_with(&connector, &stream(), &TransportTarget::default());

        assert!(
            matches!(result, Err(TransportError::SerialFailure(ref err)) if err.kind() == io::ErrorKind::BrokenPipe),
            "expected a serial failure, got {result:?}"
        );
        assert!(connector.released.load(Ordering::SeqCst), "port not closed");
        assert_eq!(connector.opened.load(Ordering::SeqCst), 1, "no retries");
    }

    #[test]
    fn test_serial_open_failure_is_reported() {
        let connector = MockConnector {
            fail_open: true,
            ..Default::default()
        };

        let result = send_with(&connector, &stream(), &TransportTarget::default());
        assert!(matches!(result, Err(TransportError::SerialFailure(_))));
    }

    #[test]
    fn test_file_write_failure_is_reported() {
        let connector = MockConnector {
            fail_after: Some(0),
            ..Default::default()
        };
        let target = TransportTarget::File {
            path: PathBuf::from("dump.plt"),
        };

        let result = send_with(&connector, &stream(), &target);

        assert!(matches!(result, Err(TransportError::FileFailure(_))));
        assert!(connector.released.load(Ordering::SeqCst), "file not closed");
    }

    #[test]
    fn test_missing_serial_port() {
        let target = TransportTarget::SerialPort {
            port: Some("/dev/kerf-no-such-port".to_string()),
            baud_rate: DEFAULT_BAUD_RATE,
        };

        assert!(matches!(
            send(&stream(), &target),
            Err(TransportError::SerialFailure(_))
        ));
    }

    #[test]
    fn test_file_target() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = dir.path().join("dump.plt");
        std::fs::write(&path, "old contents that are longer than nothing at all")
            .expect("failed to seed file");
        let target = TransportTarget::File { path: path.clone() };
        let stream = stream();

        send(&stream, &target).expect("send failed");

        let written = std::fs::read(&path).expect("failed to read back");
        assert_eq!(written, stream.to_bytes(), "file is truncated then rewritten");
    }

    #[test]
    fn test_file_in_missing_directory() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let target = TransportTarget::File {
            path: dir.path().join("missing").join("dump.plt"),
        };

        assert!(matches!(
            send(&stream(), &target),
            Err(TransportError::FileFailure(_))
        ));
    }

    #[test]
    fn test_target_from_config() {
        let target: TransportTarget =
            serde_json::from_str(r#"{"kind": "serial_port"}"#).expect("failed to parse");
        assert_eq!(target, TransportTarget::default());

        let target: TransportTarget =
            serde_json::from_str(r#"{"kind": "file", "path": "/tmp/dump.plt"}"#)
                .expect("failed to parse");
        assert_eq!(
            target,
            TransportTarget::File {
                path: PathBuf::from("/tmp/dump.plt")
            }
        );
    }

    #[test]
    fn test_target_locks_are_shared_per_target() {
        let locks = TargetLocks::default();
        let serial = TransportTarget::default();
        let file = TransportTarget::File {
            path: PathBuf::from("a.plt"),
        };

        assert!(Arc::ptr_eq(&locks.lock_for(&serial), &locks.lock_for(&serial)));
        assert!(!Arc::ptr_eq(&locks.lock_for(&serial), &locks.lock_for(&file)));
    }

    fn serial(port: Option<&str>, baud_rate: u32) -> TransportTarget {
        TransportTarget::SerialPort {
            port: port.map(str::to_string),
            baud_rate,
        }
    }

    #[test]
    fn test_target_locks_ignore_baud_rate() {
        let locks = TargetLocks::default();

        assert!(Arc::ptr_eq(
            &locks.lock_for(&serial(Some("/dev/ttyUSB0"), 19200)),
            &locks.lock_for(&serial(Some("/dev/ttyUSB0"), 9600)),
        ));
        assert!(!Arc::ptr_eq(
            &locks.lock_for(&serial(Some("/dev/ttyUSB0"), 19200)),
            &locks.lock_for(&serial(Some("/dev/ttyUSB1"), 19200)),
        ));
    }

    #[test]
    fn test_resolved_first_port_shares_lock_with_its_name() {
        let locks = TargetLocks::default();
        let connector = MockConnector::default();

        let resolved = resolve_target(&connector, &serial(None, 19200)).expect("no port");

        assert_eq!(resolved, serial(Some("/dev/ttyMOCK0"), 19200));
        assert!(Arc::ptr_eq(
            &locks.lock_for(&resolved),
            &locks.lock_for(&serial(Some("/dev/ttyMOCK0"), 115_200)),
        ));
    }

    #[test]
    fn test_target_locks_use_canonical_file_paths() {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let locks = TargetLocks::default();
        let plain = TransportTarget::File {
            path: dir.path().join("dump.plt"),
        };
        let dotted = TransportTarget::File {
            path: dir.path().join(".").join("dump.plt"),
        };

        assert!(Arc::ptr_eq(&locks.lock_for(&plain), &locks.lock_for(&dotted)));
    }

    #[test]
    fn test_target_locks_serialise_sends() {
        let locks = Arc::new(TargetLocks::default());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let overlapped = Arc::new(AtomicBool::new(false));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let in_flight = in_flight.clone();
                let overlapped = overlapped.clone();
                std::thread::spawn(move || {
                    locks.with_lock(&TransportTarget::default(), || {
                        if in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlapped.store(true, Ordering::SeqCst);
                        }
                        std::thread::sleep(Duration::from_millis(5));
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    });
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("sender thread panicked");
        }

        assert!(!overlapped.load(Ordering::SeqCst), "two sends were in flight at once");
    }
}
