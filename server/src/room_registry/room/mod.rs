mod member_handle;
mod room_session;

pub use self::member_handle::{MemberHandle, RoomBroadcast};
pub use self::room_session::{RoomSession, RoomSnapshot};
