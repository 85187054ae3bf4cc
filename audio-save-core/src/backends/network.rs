use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use crate::backends::controls::SinkControls;
use crate::models::audio_format::AudioFormat;
use crate::models::error::SaveError;
use crate::traits::backend_sink::BackendSink;
use crate::traits::settings_store::SettingsStore;

/// Port the stream server listens on unless told otherwise.
pub const DEFAULT_LISTEN_PORT: u16 = 40007;

/// Size of one transport send.
pub const DEFAULT_SEND_BUFFER_SIZE: usize = 4096;

/// Where the stream goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    /// Serve the stream to every client that connects to this address.
    Listen(SocketAddr),
    /// Push the stream to a single remote listener.
    Connect(SocketAddr),
}

impl NetworkMode {
    /// `0.0.0.0:40007`.
    pub fn default_listen() -> Self {
        Self::Listen(SocketAddr::from(([0, 0, 0, 0], DEFAULT_LISTEN_PORT)))
    }
}

struct Peer {
    addr: SocketAddr,
    stream: TcpStream,
}

/// Streams raw PCM over TCP.
///
/// Each `write` is cut into send-buffer sized slices and every slice is
/// sent to every peer with one blocking send. A peer whose send fails is
/// shut down and forgotten; the other peers keep receiving. Sockets carry a
/// write timeout so a stalled client cannot hold the flush worker forever.
pub struct NetworkBackend {
    name: String,
    mode: NetworkMode,
    send_buffer_size: usize,
    write_timeout: Duration,
    connect_timeout: Duration,
    initialized: bool,
    listener: Option<TcpListener>,
    peers: Vec<Peer>,
    format: Option<AudioFormat>,
    enabled: bool,
    open: bool,
    controls: SinkControls,
}

impl NetworkBackend {
    pub fn new(mode: NetworkMode) -> Self {
        Self {
            name: "network".to_string(),
            mode,
            send_buffer_size: DEFAULT_SEND_BUFFER_SIZE,
            write_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(2),
            initialized: false,
            listener: None,
            peers: Vec::new(),
            format: None,
            enabled: true,
            open: false,
            controls: SinkControls::new("network"),
        }
    }

    pub fn listen(addr: SocketAddr) -> Self {
        Self::new(NetworkMode::Listen(addr))
    }

    pub fn connect(addr: SocketAddr) -> Self {
        Self::new(NetworkMode::Connect(addr))
    }

    pub fn with_send_buffer_size(mut self, size: usize) -> Self {
        self.send_buffer_size = size.max(1);
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_settings(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.controls.set_store(store);
        self
    }

    pub fn mode(&self) -> NetworkMode {
        self.mode
    }

    /// Bound address of the stream server, if it is running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn format(&self) -> Option<AudioFormat> {
        self.format
    }

    fn start_server(&mut self, addr: SocketAddr) -> Result<(), SaveError> {
        if self.listener.is_some() {
            return Ok(());
        }
        let listener = TcpListener::bind(addr).map_err(|e| SaveError::io(&self.name, format!("bind {}: {}", addr, e)))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| SaveError::io(&self.name, e))?;
        log::info!("{}: serving stream on {}", self.name, addr);
        self.listener = Some(listener);
        Ok(())
    }

    fn stop_server(&mut self) {
        self.drop_peers();
        if self.listener.take().is_some() {
            log::info!("{}: stream server stopped", self.name);
        }
    }

    fn drop_peers(&mut self) {
        for peer in self.peers.drain(..) {
            let _ = peer.stream.shutdown(Shutdown::Both);
        }
    }

    /// Take every client waiting in the accept queue without blocking.
    fn accept_pending(&mut self) {
        let Some(listener) = self.listener.as_ref() else {
            return;
        };
        loop {
            match listener.accept() {
                Ok((stream, addr)) => match configure_stream(&stream, self.write_timeout) {
                    Ok(()) => {
                        log::info!("{}: client {} connected", self.name, addr);
                        self.peers.push(Peer { addr, stream });
                    }
                    Err(e) => log::warn!("{}: rejecting client {}: {}", self.name, addr, e),
                },
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("{}: accept failed: {}", self.name, e);
                    break;
                }
            }
        }
    }

    fn connect_peer(&mut self, addr: SocketAddr) -> Result<(), SaveError> {
        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout)
            .map_err(|e| SaveError::io(&self.name, format!("connect {}: {}", addr, e)))?;
        configure_stream(&stream, self.write_timeout).map_err(|e| SaveError::io(&self.name, e))?;
        log::info!("{}: connected to {}", self.name, addr);
        self.peers.push(Peer { addr, stream });
        Ok(())
    }
}

fn configure_stream(stream: &TcpStream, write_timeout: Duration) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_write_timeout(Some(write_timeout))
}

impl BackendSink for NetworkBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn initialize(&mut self, _stream_id: u32, _is_capture: bool) -> Result<(), SaveError> {
        self.initialized = true;
        if let NetworkMode::Listen(addr) = self.mode {
            self.start_server(addr).map_err(|e| SaveError::BackendInit {
                backend: self.name.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    fn set_format(&mut self, format: &AudioFormat) -> Result<(), SaveError> {
        self.format = Some(*format);
        Ok(())
    }

    /// Disabling stops the server and hangs up on every client.
    fn disable(&mut self, disabled: bool) -> Result<(), SaveError> {
        self.enabled = !disabled;
        if disabled {
            self.stop_server();
            self.open = false;
        }
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn is_open(&self) -> bool {
        match self.mode {
            NetworkMode::Listen(_) => self.open && self.listener.is_some(),
            NetworkMode::Connect(_) => !self.peers.is_empty(),
        }
    }

    fn open(&mut self, _overwrite: bool) -> Result<(), SaveError> {
        if !self.initialized {
            return Err(SaveError::io(&self.name, "backend used before initialize"));
        }
        match self.mode {
            NetworkMode::Listen(addr) => {
                self.start_server(addr)?;
                self.accept_pending();
            }
            NetworkMode::Connect(addr) => {
                if self.peers.is_empty() {
                    self.connect_peer(addr)?;
                }
            }
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.stop_server();
        self.open = false;
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), SaveError> {
        if !self.initialized {
            return Err(SaveError::io(&self.name, "backend used before initialize"));
        }
        if matches!(self.mode, NetworkMode::Listen(_)) {
            self.accept_pending();
        } else if self.peers.is_empty() {
            return Err(SaveError::NotOpen(self.name.clone()));
        }

        let name = &self.name;
        let mut failure = None;
        for slice in bytes.chunks(self.send_buffer_size) {
            self.peers.retain_mut(|peer| match peer.stream.write_all(slice) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("{}: dropping peer {}: {}", name, peer.addr, e);
                    let _ = peer.stream.shutdown(Shutdown::Both);
                    failure = Some(SaveError::io(name, format!("peer {}: {}", peer.addr, e)));
                    false
                }
            });
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn controls(&mut self) -> &mut SinkControls {
        &mut self.controls
    }
}
