//! Serial Collector - reads the joystick's line protocol from a serial port
//!
//! Runs on a blocking thread and forwards [`SourceEvent`]s to the engine. Read
//! timeouts are not errors; any other I/O error ends the connection, the engine
//! releases all keys, and the collector searches for the port again.
//!
//! ```text
//! Searching ──open ok──► Streaming ──I/O error──► Searching
//!     ▲   │                                          │
//!     │   └─open failed── wait reconnect_delay ◄─────┘
//! ```

use crate::controller::line_decoder::RawLine;
use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use statum::{machine, state};
use std::io::{ErrorKind, Read};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// USB-serial chips commonly found on Arduino boards and clones
pub const PREFERRED_PORT_KEYWORDS: [&str; 4] = ["arduino", "ch340", "cp210", "ftdi"];

/// Longest line kept before the buffer is flushed without a newline
const MAX_LINE_BYTES: usize = 1024;

// Event delivered to the mapping engine
#[derive(Debug, Clone)]
pub enum SourceEvent {
    Connected(String),
    Line(RawLine),
    /// Port lost, the collector will reconnect
    Disconnected(String),
    /// A finite source reached its end
    Finished(String),
}

// Collector settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectorSettings {
    pub port: Option<String>,
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub reconnect_delay: Duration,
    /// Boards reset when the port opens; lines before this are boot noise
    pub settle_delay: Duration,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115_200,
            read_timeout: Duration::from_millis(100),
            reconnect_delay: Duration::from_secs(2),
            settle_delay: Duration::from_secs(2),
        }
    }
}

// Collector errors
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("No serial port found")]
    NoPortFound,

    #[error("Failed to enumerate serial ports: {0}")]
    EnumerationError(String),

    #[error("Failed to open {port}: {reason}")]
    OpenError { port: String, reason: String },

    #[error("Read error on {port}: {reason}")]
    ReadError { port: String, reason: String },

    #[error("Engine channel closed")]
    ChannelClosed,
}

/// Serial port as shown by `--list-ports`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCandidate {
    pub name: String,
    pub description: String,
    pub preferred: bool,
}

impl PortCandidate {
    fn from_info(info: &SerialPortInfo) -> Self {
        let description = match &info.port_type {
            SerialPortType::UsbPort(usb) => format!(
                "USB {:04x}:{:04x} {} {}",
                usb.vid,
                usb.pid,
                usb.manufacturer.as_deref().unwrap_or(""),
                usb.product.as_deref().unwrap_or("")
            )
            .trim()
            .to_string(),
            SerialPortType::PciPort => "PCI".to_string(),
            SerialPortType::BluetoothPort => "Bluetooth".to_string(),
            SerialPortType::Unknown => "unknown".to_string(),
        };
        let preferred = matches!(info.port_type, SerialPortType::UsbPort(_))
            && is_preferred(&description);

        Self {
            name: info.port_name.clone(),
            description,
            preferred,
        }
    }
}

fn is_preferred(description: &str) -> bool {
    let lowered = description.to_ascii_lowercase();
    PREFERRED_PORT_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
}

/// Preferred ports first, otherwise listing order
pub fn rank_ports(mut candidates: Vec<PortCandidate>) -> Vec<PortCandidate> {
    candidates.sort_by_key(|candidate| !candidate.preferred);
    candidates
}

/// Lists the serial ports of this machine, best candidates first
pub fn list_ports() -> Result<Vec<PortCandidate>, CollectorError> {
    let ports = serialport::available_ports()
        .map_err(|e| CollectorError::EnumerationError(e.to_string()))?;
    Ok(rank_ports(ports.iter().map(PortCandidate::from_info).collect()))
}

/// Splits complete lines off the front of `buffer`
pub fn drain_lines(buffer: &mut Vec<u8>) -> Vec<RawLine> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = buffer.drain(..=pos).collect();
        lines.push(RawLine::from_bytes(&line[..line.len() - 1]));
    }
    if buffer.len() > MAX_LINE_BYTES {
        warn!("Discarding {} bytes without line break", buffer.len());
        buffer.clear();
    }
    lines
}

#[state]
#[derive(Debug, Clone)]
pub enum CollectionState {
    Searching,
    Streaming,
}

#[machine]
pub struct SerialCollector<S: CollectionState> {
    settings: CollectorSettings,
    event_sender: mpsc::Sender<SourceEvent>,
    shutdown: CancellationToken,
    port: Option<Box<dyn SerialPort>>,
    port_name: String,
    buffer: Vec<u8>,
}

impl<S: CollectionState> SerialCollector<S> {
    pub fn settings(&self) -> &CollectorSettings {
        &self.settings
    }

    fn send(&self, event: SourceEvent) -> Result<(), CollectorError> {
        self.event_sender
            .blocking_send(event)
            .map_err(|_| CollectorError::ChannelClosed)
    }

    /// Sleeps in short steps so cancellation is noticed; false if cancelled
    fn wait(&self, total: Duration) -> bool {
        let step = Duration::from_millis(50);
        let mut waited = Duration::ZERO;
        while waited < total {
            if self.shutdown.is_cancelled() {
                return false;
            }
            std::thread::sleep(step);
            waited += step;
        }
        !self.shutdown.is_cancelled()
    }
}

impl SerialCollector<Searching> {
    pub fn create(
        settings: CollectorSettings,
        event_sender: mpsc::Sender<SourceEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        debug!("Creating serial collector with settings: {:?}", settings);
        Self::new(
            settings,
            event_sender,
            shutdown,
            None,
            String::new(),
            Vec::with_capacity(MAX_LINE_BYTES),
        )
    }

    fn select_port(&self) -> Result<String, CollectorError> {
        if let Some(port) = &self.settings.port {
            return Ok(port.clone());
        }

        let candidates = list_ports()?;
        for candidate in &candidates {
            debug!(
                "Found port {} ({}){}",
                candidate.name,
                candidate.description,
                if candidate.preferred { " *" } else { "" }
            );
        }
        candidates
            .into_iter()
            .next()
            .map(|candidate| candidate.name)
            .ok_or(CollectorError::NoPortFound)
    }

    /// Opens the configured or best detected port
    pub fn try_open(&mut self) -> Result<(), CollectorError> {
        let name = self.select_port()?;
        info!("Opening {} at {} baud", name, self.settings.baud_rate);

        let port = serialport::new(&name, self.settings.baud_rate)
            .timeout(self.settings.read_timeout)
            .open()
            .map_err(|e| CollectorError::OpenError {
                port: name.clone(),
                reason: e.to_string(),
            })?;

        self.port = Some(port);
        self.port_name = name;
        self.buffer.clear();
        Ok(())
    }

    /// Waits for the board to settle and announces the connection
    pub fn stream(self) -> Result<SerialCollector<Streaming>, CollectorError> {
        debug!("Waiting {:?} for the board to reset", self.settings.settle_delay);
        self.wait(self.settings.settle_delay);

        if let Some(port) = &self.port {
            if let Err(e) = port.clear(serialport::ClearBuffer::Input) {
                debug!("Could not clear input buffer: {}", e);
            }
        }

        info!("Streaming from {}", self.port_name);
        self.send(SourceEvent::Connected(self.port_name.clone()))?;
        Ok(self.transition())
    }
}

impl SerialCollector<Streaming> {
    /// Reads what is available; a read timeout yields no lines
    pub fn read_lines(&mut self) -> Result<Vec<RawLine>, CollectorError> {
        let port_name = self.port_name.clone();
        let port = self.port.as_mut().ok_or_else(|| CollectorError::ReadError {
            port: port_name.clone(),
            reason: "port not open".to_string(),
        })?;

        let mut chunk = [0u8; 256];
        match port.read(&mut chunk) {
            Ok(0) => Err(CollectorError::ReadError {
                port: port_name,
                reason: "end of stream".to_string(),
            }),
            Ok(n) => {
                self.buffer.extend_from_slice(&chunk[..n]);
                Ok(drain_lines(&mut self.buffer))
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::Interrupted => {
                Ok(Vec::new())
            }
            Err(e) => Err(CollectorError::ReadError {
                port: port_name,
                reason: e.to_string(),
            }),
        }
    }

    /// Closes the port and goes back to searching
    pub fn disconnect(mut self, reason: &str) -> SerialCollector<Searching> {
        info!("Closing {}: {}", self.port_name, reason);
        self.port = None;
        self.buffer.clear();
        if self.send(SourceEvent::Disconnected(reason.to_string())).is_err() {
            debug!("Engine gone while disconnecting");
        }
        self.transition()
    }

    /// Streams until an I/O error or shutdown; `Err` only if the engine is gone
    fn pump(&mut self) -> Result<Option<String>, CollectorError> {
        while !self.shutdown.is_cancelled() {
            match self.read_lines() {
                Ok(lines) => {
                    for line in lines {
                        self.send(SourceEvent::Line(line))?;
                    }
                }
                Err(e) => {
                    warn!("{}", e);
                    return Ok(Some(e.to_string()));
                }
            }
        }
        Ok(None)
    }
}

/// Collector main loop: search, stream, reconnect until cancelled
pub fn run_collector(
    settings: CollectorSettings,
    event_sender: mpsc::Sender<SourceEvent>,
    shutdown: CancellationToken,
) -> Result<(), CollectorError> {
    info!("Starting serial collector");
    let mut searching = SerialCollector::create(settings, event_sender, shutdown.clone());

    while !shutdown.is_cancelled() {
        if let Err(e) = searching.try_open() {
            warn!("{}, retrying in {:?}", e, searching.settings().reconnect_delay);
            let delay = searching.settings().reconnect_delay;
            if !searching.wait(delay) {
                break;
            }
            continue;
        }

        let mut streaming = searching.stream()?;
        match streaming.pump() {
            Ok(Some(reason)) => {
                searching = streaming.disconnect(&reason);
                let delay = searching.settings().reconnect_delay;
                if !searching.wait(delay) {
                    break;
                }
            }
            Ok(None) => {
                let _ = streaming.disconnect("shutdown");
                break;
            }
            Err(e) => {
                error!("Stopping collector: {}", e);
                return Err(e);
            }
        }
    }

    info!("Serial collector stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, description: &str, preferred: bool) -> PortCandidate {
        PortCandidate {
            name: name.to_string(),
            description: description.to_string(),
            preferred,
        }
    }

    #[test]
    fn keyword_match_is_case_insensitive() {
        assert!(is_preferred("USB 2341:0043 Arduino (www.arduino.cc) Arduino Uno"));
        assert!(is_preferred("USB 1a86:7523 QinHeng USB2.0-Serial CH340"));
        assert!(!is_preferred("USB 0403:6010 Some JTAG adapter"));
    }

    #[test]
    fn preferred_ports_come_first_in_listing_order() {
        let ranked = rank_ports(vec![
            candidate("/dev/ttyS0", "PCI", false),
            candidate("/dev/ttyUSB0", "USB ch340", true),
            candidate("/dev/ttyS1", "PCI", false),
            candidate("/dev/ttyACM0", "USB Arduino", true),
        ]);
        let names: Vec<&str> = ranked.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["/dev/ttyUSB0", "/dev/ttyACM0", "/dev/ttyS0", "/dev/ttyS1"]
        );
    }

    #[test]
    fn lines_are_split_and_partial_tail_is_kept() {
        let mut buffer = b"Joystick Up\r\nE Button Cli".to_vec();
        let lines = drain_lines(&mut buffer);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text, "Joystick Up\r");
        assert_eq!(buffer, b"E Button Cli");

        buffer.extend_from_slice(b"cked\n");
        let lines = drain_lines(&mut buffer);
        assert_eq!(lines[0].text, "E Button Clicked");
        assert!(buffer.is_empty());
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let mut buffer = vec![b'X', b':', b' ', 0xff, b'1', b'\n'];
        let lines = drain_lines(&mut buffer);
        assert_eq!(lines[0].text, "X: \u{fffd}1");
    }

    #[test]
    fn runaway_line_is_discarded() {
        let mut buffer = vec![b'a'; MAX_LINE_BYTES + 1];
        assert!(drain_lines(&mut buffer).is_empty());
        assert!(buffer.is_empty());
    }

    #[test]
    fn cancelled_collector_stops_without_opening() {
        let (tx, _rx) = mpsc::channel(4);
        let token = CancellationToken::new();
        token.cancel();
        let settings = CollectorSettings {
            port: Some("/dev/does-not-exist".to_string()),
            ..Default::default()
        };
        assert!(run_collector(settings, tx, token).is_ok());
    }
}
