use serde::{Deserialize, Serialize};

/// User Command for joining a room, creating it if no room with that id exists yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinRoomCommand {
    // The room to join.
    #[serde(rename = "r")]
    pub room: String,
    // The shared passcode guarding the room.
    #[serde(rename = "p")]
    pub passcode: String,
}

/// User Command reporting the local play/pause state and playback cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackStateCommand {
    // Whether playback is currently running on the reporting client.
    #[serde(rename = "pl")]
    pub is_playing: bool,
    // The playback cursor in seconds.
    #[serde(rename = "ts")]
    pub timestamp: f64,
}

/// User Command proposing a new playback position for the whole room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeekCommand {
    // The proposed playback cursor in seconds.
    #[serde(rename = "ts")]
    pub timestamp: f64,
    // Whether playback should run after the seek.
    #[serde(rename = "sp")]
    pub should_play: bool,
}

/// User Command for quitting the whole sync session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuitCommand;

/// A user command which can be sent to the server by a single connection.
/// All commands are processed in the context of the room the connection has joined, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_ct", rename_all = "snake_case")]
pub enum UserCommand {
    JoinRoom(JoinRoomCommand),
    PlaybackState(PlaybackStateCommand),
    Seek(SeekCommand),
    Quit(QuitCommand),
}

#[cfg(test)]
mod tests {
    use super::*;

    // given a command enum, and an expect string, asserts that command is serialized / deserialized appropiately
    fn assert_command_serialization(command: &UserCommand, expected: &str) {
        let serialized = serde_json::to_string(&command).unwrap();
        assert_eq!(serialized, expected);
        let deserialized: UserCommand = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, *command);
    }

    #[test]
    fn test_join_command() {
        let command = UserCommand::JoinRoom(JoinRoomCommand {
            room: "movie-night".to_string(),
            passcode: "hunter2".to_string(),
        });

        assert_command_serialization(
            &command,
            r#"{"_ct":"join_room","r":"movie-night","p":"hunter2"}"#,
        );
    }

    #[test]
    fn test_playback_state_command() {
        let command = UserCommand::PlaybackState(PlaybackStateCommand {
            is_playing: true,
            timestamp: 42.5,
        });

        assert_command_serialization(&command, r#"{"_ct":"playback_state","pl":true,"ts":42.5}"#);
    }

    #[test]
    fn test_seek_command() {
        let command = UserCommand::Seek(SeekCommand {
            timestamp: 120.0,
            should_play: true,
        });

        assert_command_serialization(&command, r#"{"_ct":"seek","ts":120.0,"sp":true}"#);
    }

    #[test]
    fn test_quit_command() {
        let command = UserCommand::Quit(QuitCommand);

        assert_command_serialization(&command, r#"{"_ct":"quit"}"#);
    }
}
