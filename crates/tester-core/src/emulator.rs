//! Emulator lifecycle
//!
//! An [`Emulator`] owns everything that outlives a connection: the shared
//! stores, the ECU registry and the configuration. Each connection gets a
//! fresh [`Session`] running on its own worker thread. Only one connection is
//! serviced at a time.

use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{info, warn};

use crate::config::SimConfig;
use crate::error::{EmulatorError, Result, TransportError};
use crate::events::{EventSink, TracingSink};
use crate::link::{run_link, LinkEnd, StopHandle};
use crate::persist::PersistError;
use crate::registry::EcuRegistry;
use crate::session::Session;
use crate::state::TesterState;

pub struct Emulator {
    state: Arc<TesterState>,
    registry: Arc<EcuRegistry>,
    config: Arc<SimConfig>,
    sink: Arc<dyn EventSink>,
    active: Arc<AtomicBool>,
}

impl Emulator {
    /// Emulator with empty stores, narrating through `tracing`. An empty
    /// `ecus` list in the configuration selects the built-in registry.
    pub fn new(config: SimConfig) -> Self {
        Self {
            state: Arc::new(TesterState::new()),
            registry: Arc::new(EcuRegistry::from_defs(&config.ecus)),
            config: Arc::new(config),
            sink: Arc::new(TracingSink),
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_state(mut self, state: Arc<TesterState>) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> &Arc<TesterState> {
        &self.state
    }

    pub fn registry(&self) -> &EcuRegistry {
        &self.registry
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Connect to the PC side listening on `path`.
    pub fn connect(path: impl AsRef<Path>) -> Result<UnixStream> {
        let path = path.as_ref();
        UnixStream::connect(path).map_err(|source| EmulatorError::Connect {
            path: path.display().to_string(),
            source,
        })
    }

    /// Save the filesystem, reporting failures through the event sink.
    pub fn save_state(&self, path: &Path) -> std::result::Result<(), PersistError> {
        self.state.save_state(path).inspect_err(|e| {
            self.sink
                .warning(&format!("could not save state to {}: {e}", path.display()));
        })
    }

    /// Load the filesystem, reporting failures through the event sink.
    pub fn load_state(&self, path: &Path) -> std::result::Result<(), PersistError> {
        self.state.load_state(path).inspect_err(|e| {
            self.sink
                .warning(&format!("could not load state from {}: {e}", path.display()));
        })
    }

    /// Service `stream` on a new worker thread.
    pub fn start(&self, stream: UnixStream) -> Result<SessionHandle> {
        let guard = ActiveGuard::acquire(&self.active)?;
        let stop = StopHandle::for_unix_stream(&stream)?;
        let mut session = self.session();
        let reply_delay = self.config.timing.reply_delay();
        let link_stop = stop.clone();
        let state = Arc::clone(&self.state);
        state.reset_session();

        let thread = std::thread::Builder::new()
            .name("tester-link".to_string())
            .spawn(move || {
                let _guard = guard;
                let mut stream = stream;
                let end = run_link(&mut stream, &mut session, reply_delay, &link_stop);
                state.reset_session();
                log_end(&end);
                end
            })?;

        info!("Session started");
        Ok(SessionHandle { stop, thread })
    }

    /// Service `stream` on the calling thread until the link ends.
    pub fn serve(&self, stream: UnixStream) -> Result<LinkEnd> {
        let _guard = ActiveGuard::acquire(&self.active)?;
        let stop = StopHandle::for_unix_stream(&stream)?;
        let mut session = self.session();
        let mut stream = stream;
        self.state.reset_session();

        info!("Session started");
        let end = run_link(
            &mut stream,
            &mut session,
            self.config.timing.reply_delay(),
            &stop,
        );
        self.state.reset_session();
        log_end(&end);
        Ok(end?)
    }

    fn session(&self) -> Session {
        Session::new(
            Arc::clone(&self.state),
            Arc::clone(&self.registry),
            Arc::clone(&self.config),
            Arc::clone(&self.sink),
        )
    }
}

fn log_end(end: &std::result::Result<LinkEnd, TransportError>) {
    match end {
        Ok(LinkEnd::Closed) => info!("Session ended: connection closed"),
        Ok(LinkEnd::Stopped) => info!("Session ended: stopped"),
        Err(e) => warn!(error = %e, "Session ended: link failed"),
    }
}

/// Marks the emulator busy until dropped.
struct ActiveGuard(Arc<AtomicBool>);

impl ActiveGuard {
    fn acquire(active: &Arc<AtomicBool>) -> Result<Self> {
        active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| EmulatorError::SessionActive)?;
        Ok(Self(Arc::clone(active)))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A session running on its worker thread.
#[derive(Debug)]
pub struct SessionHandle {
    stop: StopHandle,
    thread: JoinHandle<std::result::Result<LinkEnd, TransportError>>,
}

impl SessionHandle {
    /// Ask the loop to end. Returns immediately; use [`join`](Self::join) to
    /// wait for it.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the worker thread and return how the link ended.
    pub fn join(self) -> Result<LinkEnd> {
        let end = self
            .thread
            .join()
            .map_err(|_| EmulatorError::LinkPanicked)?;
        Ok(end?)
    }
}
