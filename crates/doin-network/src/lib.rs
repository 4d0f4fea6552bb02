pub mod envelope;
pub mod flood;
pub mod messages;
pub mod peers;
pub mod sync;

pub use envelope::{Envelope, WIRE_VERSION};
pub use flood::{FloodConfig, FloodDisposition, FloodManager};
pub use messages::{
    BlockAnnouncementPayload, BlockRequestPayload, BlockResponsePayload, ChainStatusPayload,
    CommitPayload, MessageType, Payload, PeerDiscoveryPayload, RevealPayload, TaskClaimedPayload,
    TaskCompletedPayload, TaskCreatedPayload, VotePayload,
};
pub use peers::{PeerInfo, PeerTable};
pub use sync::{SyncManager, SyncState};
