pub mod message;
pub mod slot;
pub mod stream;

pub use message::{Lsn, PrimaryKeepAlive, ReplicationMessage, StandbyStatusUpdate, XLogData};
pub use slot::{connect_replication, create_slot, drop_slot, export_snapshot, identify_system, slot_exists};
pub use stream::{LogicalReplicationStream, StreamEvent};
