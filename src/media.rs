pub mod bluetooth;
pub mod mpd;
pub mod poller;
pub mod types;

pub use bluetooth::BluetoothSource;
pub use mpd::MpdSource;
pub use poller::{PollTiming, PollerHandle, spawn_poller};
pub use types::{MediaSnapshot, MediaSource, MediaValue, SourceKind};
