//! MIDI input port controller
//!
//! Owns the single open hardware input. Opening always closes first, so at
//! most one connection exists at any time.

use anyhow::{anyhow, Context, Result};
use midir::{Ignore, MidiInput, MidiInputConnection};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Receives `(delta_us, bytes)` for every message on the open port
pub type SampleSink = Arc<dyn Fn(u64, &[u8]) + Send + Sync>;

#[derive(Debug, Error)]
pub enum PortError {
    #[error("no MIDI input matches name {name:?} or index {index:?} (available: {available:?})")]
    NotFound {
        name: Option<String>,
        index: Option<usize>,
        available: Vec<String>,
    },
    #[error("MIDI driver error: {0}")]
    Driver(String),
}

impl From<anyhow::Error> for PortError {
    fn from(e: anyhow::Error) -> Self {
        PortError::Driver(format!("{:#}", e))
    }
}

/// Driver primitives needed by the port controller
///
/// Dropping a connection closes it.
pub trait PortBackend {
    type Connection;

    /// Input port names in driver order
    fn port_names(&self) -> Result<Vec<String>>;

    /// Open the port at `index` and deliver every message to `sink`
    fn connect(&self, index: usize, sink: SampleSink) -> Result<Self::Connection>;
}

/// Resolve the port to open: exact name first, then the numeric index
pub fn select_port(ports: &[String], name: Option<&str>, index: Option<usize>) -> Option<usize> {
    name.and_then(|name| ports.iter().position(|p| p == name))
        .or_else(|| index.filter(|&i| i < ports.len()))
}

pub struct InputPort<B: PortBackend> {
    backend: B,
    port_name: Option<String>,
    port_index: Option<usize>,
    connection: Option<B::Connection>,
    opened_name: Option<String>,
}

impl<B: PortBackend> InputPort<B> {
    /// Closed controller for the port named `port_name`, or at `port_index`
    /// when no port carries that name
    pub fn new(backend: B, port_name: Option<String>, port_index: Option<usize>) -> Self {
        Self {
            backend,
            port_name,
            port_index,
            connection: None,
            opened_name: None,
        }
    }

    /// Input port names currently offered by the driver
    pub fn enumerate_ports(&self) -> Result<Vec<String>> {
        self.backend.port_names()
    }

    /// Name of the port `open` would pick right now
    pub fn resolve_name(&self) -> Option<String> {
        let ports = self.backend.port_names().ok()?;
        select_port(&ports, self.port_name.as_deref(), self.port_index).map(|i| ports[i].clone())
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// Name of the currently open port
    pub fn opened_name(&self) -> Option<&str> {
        self.opened_name.as_deref()
    }

    /// (Re)open the configured port with `sink` as message receiver
    ///
    /// On failure the port stays closed.
    pub fn open(&mut self, sink: SampleSink) -> Result<String, PortError> {
        self.close();

        let ports = self.backend.port_names()?;
        info!("Total MIDI input ports: {}", ports.len());
        debug!(
            "MIDI ports: {}",
            ports
                .iter()
                .enumerate()
                .map(|(i, p)| format!("{}: {}", i, p))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let index = select_port(&ports, self.port_name.as_deref(), self.port_index).ok_or_else(|| {
            PortError::NotFound {
                name: self.port_name.clone(),
                index: self.port_index,
                available: ports.clone(),
            }
        })?;
        let name = ports[index].clone();

        info!("Opening MIDI input {}: '{}'", index, name);
        let connection = self.backend.connect(index, sink)?;

        self.connection = Some(connection);
        self.opened_name = Some(name.clone());
        Ok(name)
    }

    /// Drop the open connection, if any
    pub fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            drop(connection);
            info!(
                "Closed MIDI input '{}'",
                self.opened_name.take().unwrap_or_default()
            );
        }
    }
}

impl<B: PortBackend> Drop for InputPort<B> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Hardware backend on top of midir
#[derive(Debug, Clone)]
pub struct MidirBackend {
    client_name: String,
}

impl MidirBackend {
    /// Backend registering with the driver as `client_name`
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }
}

impl Default for MidirBackend {
    fn default() -> Self {
        Self::new("midi-hotkeys")
    }
}

impl PortBackend for MidirBackend {
    type Connection = MidiInputConnection<()>;

    fn port_names(&self) -> Result<Vec<String>> {
        let midi_in = MidiInput::new(&format!("{}-scanner", self.client_name))
            .context("Failed to create MIDI input")?;

        // Unreadable names keep their slot so indices stay aligned
        Ok(midi_in
            .ports()
            .iter()
            .map(|port| {
                midi_in
                    .port_name(port)
                    .unwrap_or_else(|_| "<unknown>".to_string())
            })
            .collect())
    }

    fn connect(&self, index: usize, sink: SampleSink) -> Result<Self::Connection> {
        let mut midi_in =
            MidiInput::new(&self.client_name).context("Failed to create MIDI input")?;

        // Timing, active sensing and SysEx all reach the classifier
        midi_in.ignore(Ignore::None);

        let ports = midi_in.ports();
        let port = ports
            .get(index)
            .ok_or_else(|| anyhow!("MIDI input {} disappeared", index))?;

        let mut last_stamp: Option<u64> = None;
        midi_in
            .connect(
                port,
                &self.client_name,
                move |stamp, data, _| {
                    let delta = last_stamp.map_or(0, |last| stamp.saturating_sub(last));
                    last_stamp = Some(stamp);
                    sink(delta, data);
                },
                (),
            )
            .map_err(|e| anyhow!("Failed to connect to input port: {}", e))
    }
}

/// In-memory backend for tests and dry runs
///
/// Ports are plain names; `inject` delivers bytes to every open connection.
#[derive(Clone, Default)]
pub struct VirtualBackend {
    state: Arc<Mutex<VirtualState>>,
}

#[derive(Default)]
struct VirtualState {
    ports: Vec<String>,
    next_id: u64,
    open: Vec<(u64, SampleSink)>,
    open_calls: usize,
    close_calls: usize,
    max_simultaneous: usize,
}

impl VirtualBackend {
    /// Backend offering `ports`, none of them open
    pub fn new<S: Into<String>>(ports: impl IntoIterator<Item = S>) -> Self {
        let backend = Self::default();
        backend.set_ports(ports);
        backend
    }

    /// Replace the offered ports; open connections are left alone
    pub fn set_ports<S: Into<String>>(&self, ports: impl IntoIterator<Item = S>) {
        self.state.lock().ports = ports.into_iter().map(Into::into).collect();
    }

    /// Deliver `data` to every open connection; false if none is open
    pub fn inject(&self, data: &[u8]) -> bool {
        let sinks: Vec<SampleSink> = self
            .state
            .lock()
            .open
            .iter()
            .map(|(_, sink)| sink.clone())
            .collect();
        for sink in &sinks {
            sink(0, data);
        }
        !sinks.is_empty()
    }

    /// Connections open right now
    pub fn open_count(&self) -> usize {
        self.state.lock().open.len()
    }

    /// Successful `connect` calls so far
    pub fn open_calls(&self) -> usize {
        self.state.lock().open_calls
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }

    /// Highest number of connections that were ever open at once
    pub fn max_simultaneous(&self) -> usize {
        self.state.lock().max_simultaneous
    }
}

pub struct VirtualConnection {
    id: u64,
    state: Arc<Mutex<VirtualState>>,
}

impl Drop for VirtualConnection {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.open.retain(|(id, _)| *id != self.id);
        state.close_calls += 1;
    }
}

impl PortBackend for VirtualBackend {
    type Connection = VirtualConnection;

    fn port_names(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().ports.clone())
    }

    fn connect(&self, index: usize, sink: SampleSink) -> Result<Self::Connection> {
        let mut state = self.state.lock();
        if index >= state.ports.len() {
            warn!("Virtual MIDI input {} does not exist", index);
            return Err(anyhow!("MIDI input {} disappeared", index));
        }

        state.next_id += 1;
        let id = state.next_id;
        state.open.push((id, sink));
        state.open_calls += 1;
        state.max_simultaneous = state.max_simultaneous.max(state.open.len());

        Ok(VirtualConnection {
            id,
            state: self.state.clone(),
        })
    }
}

/// Print discovered input ports
pub fn print_ports<B: PortBackend>(backend: &B) -> Result<()> {
    use colored::*;

    let ports = backend.port_names()?;
    println!("\n{}", "=== MIDI Input Ports ===".bold().cyan());
    if ports.is_empty() {
        println!("  {}", "(none)".yellow());
    }
    for (i, name) in ports.iter().enumerate() {
        println!("  {}: {}", i.to_string().green(), name);
    }
    println!();
    Ok(())
}
