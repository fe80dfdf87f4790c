pub use self::room::{MemberHandle, RoomBroadcast, RoomSnapshot};
pub use self::room_registry::{JoinRoomError, RoomJoin, RoomRegistry, SeekOutcome};

mod room;
#[allow(clippy::module_inception)]
mod room_registry;
