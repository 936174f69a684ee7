//! Tester simulator core
//!
//! Emulates the firmware of a handheld diagnostic Tester as seen from the PC
//! over its serial link: packet framing, the opcode table, ECU protocol
//! decoders backed by simulated memory, and the Tester's flash filesystem.
//!
//! # Example
//! ```no_run
//! use tester_core::{Emulator, SimConfig};
//!
//! let emulator = Emulator::new(SimConfig::default());
//! let stream = Emulator::connect("/tmp/tester-sim.sock")?;
//! let handle = emulator.start(stream)?;
//! emulator.state().poke_ram(0x1234, 0x56);
//! handle.stop();
//! handle.join()?;
//! # Ok::<(), tester_core::EmulatorError>(())
//! ```

pub mod checksum;
pub mod config;
pub mod dispatch;
pub mod emulator;
pub mod error;
pub mod events;
pub mod link;
pub mod memory;
pub mod packet;
pub mod persist;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod state;
pub mod vfs;

pub use config::{CompatConfig, ConfigError, EcuDef, IdentityConfig, SimConfig, TimingConfig};
pub use dispatch::{Opcode, Response};
pub use emulator::{Emulator, SessionHandle};
pub use error::{DispatchError, EmulatorError, Result, TransportError};
pub use events::{EventSink, LogBuffer, TracingSink};
pub use link::{run_link, LinkEnd, StopHandle};
pub use packet::{Packet, PacketError, Reply};
pub use persist::PersistError;
pub use registry::{EcuProfile, EcuRegistry, ProtocolType};
pub use session::Session;
pub use state::TesterState;
pub use vfs::{FileTree, FsError, VirtualFs};
