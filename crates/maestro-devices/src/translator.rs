/*!
 * Command translation.
 *
 * Maps a logical [`DeviceCommand`] onto the request a given adapter kind puts
 * on the wire. The tables are static; an unmapped combination is reported as
 * [`DeviceError::UnsupportedCommand`] and never dropped.
 */
use serde_json::json;

use crate::device::{CommandPayload, CommandType, ConnectionType, DeviceCommand, DeviceError, Result};

/// A protocol-specific request produced by the translator
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolOperation {
    /// ADB shell command line, run through a `shell:` stream
    AdbShell(String),
    /// One or more HTTP POSTs against the device, in order
    HttpPost {
        /// Request paths, each starting with `/`
        paths: Vec<String>,
    },
    /// webOS SSAP request
    SsapRequest {
        /// `ssap://` URI
        uri: String,
        /// Request payload
        payload: serde_json::Value,
    },
    /// A single HID usage press
    HidUsage {
        /// Usage page (0x07 keyboard, 0x0C consumer)
        page: u16,
        /// Usage id within the page
        usage: u16,
    },
    /// Typed text sent as HID keyboard reports
    HidText(String),
    /// Apple media remote command
    RemoteCommand {
        /// Command name
        name: String,
        /// Optional argument such as a bundle id or text
        argument: Option<String>,
    },
}

const ADB_KEYCODES: &[(CommandType, u16)] = &[
    (CommandType::Power, 26),
    (CommandType::PowerOn, 224),
    (CommandType::PowerOff, 223),
    (CommandType::VolumeUp, 24),
    (CommandType::VolumeDown, 25),
    (CommandType::Mute, 164),
    (CommandType::ChannelUp, 166),
    (CommandType::ChannelDown, 167),
    (CommandType::Up, 19),
    (CommandType::Down, 20),
    (CommandType::Left, 21),
    (CommandType::Right, 22),
    (CommandType::Select, 23),
    (CommandType::Back, 4),
    (CommandType::Home, 3),
    (CommandType::Menu, 82),
    (CommandType::Play, 126),
    (CommandType::Pause, 127),
    (CommandType::PlayPause, 85),
    (CommandType::Stop, 86),
];

const ADB_INPUTS: &[(&str, u16)] = &[
    ("hdmi1", 243),
    ("hdmi2", 244),
    ("hdmi3", 245),
    ("hdmi4", 246),
    ("tv", 170),
];

const ADB_APPS: &[(&str, &str)] = &[
    ("netflix", "com.netflix.ninja"),
    ("youtube", "com.google.android.youtube.tv"),
    ("prime video", "com.amazon.amazonvideo.livingroom"),
    ("disney+", "com.disney.disneyplus"),
    ("plex", "com.plexapp.android"),
    ("kodi", "org.xbmc.kodi"),
    ("spotify", "com.spotify.tv.android"),
];

const ROKU_KEYS: &[(CommandType, &str)] = &[
    (CommandType::Power, "Power"),
    (CommandType::PowerOn, "PowerOn"),
    (CommandType::PowerOff, "PowerOff"),
    (CommandType::VolumeUp, "VolumeUp"),
    (CommandType::VolumeDown, "VolumeDown"),
    (CommandType::Mute, "VolumeMute"),
    (CommandType::ChannelUp, "ChannelUp"),
    (CommandType::ChannelDown, "ChannelDown"),
    (CommandType::Up, "Up"),
    (CommandType::Down, "Down"),
    (CommandType::Left, "Left"),
    (CommandType::Right, "Right"),
    (CommandType::Select, "Select"),
    (CommandType::Back, "Back"),
    (CommandType::Home, "Home"),
    (CommandType::Menu, "Info"),
    (CommandType::Play, "Play"),
    (CommandType::Pause, "Play"),
    (CommandType::PlayPause, "Play"),
];

const ROKU_APPS: &[(&str, &str)] = &[
    ("netflix", "12"),
    ("prime video", "13"),
    ("youtube", "837"),
    ("plex", "13535"),
    ("spotify", "22297"),
    ("disney+", "291097"),
];

const WEBOS_URIS: &[(CommandType, &str)] = &[
    (CommandType::Power, "ssap://system/turnOff"),
    (CommandType::PowerOff, "ssap://system/turnOff"),
    (CommandType::VolumeUp, "ssap://audio/volumeUp"),
    (CommandType::VolumeDown, "ssap://audio/volumeDown"),
    (CommandType::ChannelUp, "ssap://tv/channelUp"),
    (CommandType::ChannelDown, "ssap://tv/channelDown"),
    (CommandType::Play, "ssap://media.controls/play"),
    (CommandType::Pause, "ssap://media.controls/pause"),
    (CommandType::Stop, "ssap://media.controls/stop"),
];

const HID_CONSUMER: u16 = 0x0C;
const HID_KEYBOARD: u16 = 0x07;

const HID_USAGES: &[(CommandType, u16, u16)] = &[
    (CommandType::Power, HID_CONSUMER, 0x30),
    (CommandType::VolumeUp, HID_CONSUMER, 0xE9),
    (CommandType::VolumeDown, HID_CONSUMER, 0xEA),
    (CommandType::Mute, HID_CONSUMER, 0xE2),
    (CommandType::ChannelUp, HID_CONSUMER, 0x9C),
    (CommandType::ChannelDown, HID_CONSUMER, 0x9D),
    (CommandType::Play, HID_CONSUMER, 0xB0),
    (CommandType::Pause, HID_CONSUMER, 0xB1),
    (CommandType::Stop, HID_CONSUMER, 0xB7),
    (CommandType::PlayPause, HID_CONSUMER, 0xCD),
    (CommandType::Menu, HID_CONSUMER, 0x40),
    (CommandType::Home, HID_CONSUMER, 0x223),
    (CommandType::Back, HID_CONSUMER, 0x224),
    (CommandType::Up, HID_KEYBOARD, 0x52),
    (CommandType::Down, HID_KEYBOARD, 0x51),
    (CommandType::Left, HID_KEYBOARD, 0x50),
    (CommandType::Right, HID_KEYBOARD, 0x4F),
    (CommandType::Select, HID_KEYBOARD, 0x28),
];

const APPLE_COMMANDS: &[(CommandType, &str)] = &[
    (CommandType::Power, "suspend"),
    (CommandType::PowerOn, "wakeup"),
    (CommandType::PowerOff, "suspend"),
    (CommandType::VolumeUp, "volume_up"),
    (CommandType::VolumeDown, "volume_down"),
    (CommandType::Up, "up"),
    (CommandType::Down, "down"),
    (CommandType::Left, "left"),
    (CommandType::Right, "right"),
    (CommandType::Select, "select"),
    (CommandType::Back, "menu"),
    (CommandType::Menu, "menu"),
    (CommandType::Home, "home"),
    (CommandType::Play, "play"),
    (CommandType::Pause, "pause"),
    (CommandType::PlayPause, "play_pause"),
    (CommandType::Stop, "stop"),
];

fn lookup<K: PartialEq + Copy, V: Copy>(table: &[(K, V)], key: K) -> Option<V> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

fn lookup_name<'a>(table: &[(&str, &'a str)], name: &str) -> Option<&'a str> {
    let wanted = name.trim().to_ascii_lowercase();
    table.iter().find(|(k, _)| *k == wanted).map(|(_, v)| *v)
}

/// Normalise an input name: "HDMI 1", "hdmi-1" and "HDMI1" are the same input
fn normalize_input(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Translates logical commands into protocol operations
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandTranslator;

impl CommandTranslator {
    /// Create a translator
    pub fn new() -> Self {
        Self
    }

    /// Translate `command` for an adapter of kind `kind`
    pub fn translate(&self, kind: ConnectionType, command: &DeviceCommand) -> Result<ProtocolOperation> {
        let operation = match kind {
            ConnectionType::Adb => Self::translate_adb(command)?,
            ConnectionType::Roku => Self::translate_roku(command)?,
            ConnectionType::WebOs => Self::translate_webos(command)?,
            ConnectionType::BluetoothHid => Self::translate_hid(command)?,
            ConnectionType::AppleRemote => Self::translate_apple(command)?,
        };

        operation.ok_or(DeviceError::UnsupportedCommand {
            command: command.action,
            kind,
        })
    }

    /// Whether a translation exists, ignoring payload problems
    pub fn supports(&self, kind: ConnectionType, command: &DeviceCommand) -> bool {
        !matches!(
            self.translate(kind, command),
            Err(DeviceError::UnsupportedCommand { .. })
        )
    }

    fn translate_adb(command: &DeviceCommand) -> Result<Option<ProtocolOperation>> {
        if let Some(code) = lookup(ADB_KEYCODES, command.action) {
            return Ok(Some(ProtocolOperation::AdbShell(format!("input keyevent {}", code))));
        }

        let shell = match command.action {
            CommandType::Input => {
                let input = normalize_input(require_text(command)?);
                lookup_input_code(&input).map(|code| format!("input keyevent {}", code))
            }
            CommandType::AppLaunch => {
                let app = require_text(command)?;
                let package = lookup_name(ADB_APPS, app).unwrap_or(app.trim());
                if !is_package_name(package) {
                    return Err(DeviceError::Configuration(format!(
                        "'{}' is neither a known app nor an Android package name",
                        app
                    )));
                }
                Some(format!(
                    "monkey -p {} -c android.intent.category.LEANBACK_LAUNCHER 1",
                    package
                ))
            }
            CommandType::Text => Some(format!("input text {}", shell_quote(&require_text(command)?.replace(' ', "%s")))),
            CommandType::Tap => {
                let (x, y) = require_coordinates(command)?;
                Some(format!("input tap {} {}", x, y))
            }
            CommandType::Custom => Some(require_code(command)?.to_string()),
            _ => None,
        };

        Ok(shell.map(ProtocolOperation::AdbShell))
    }

    fn translate_roku(command: &DeviceCommand) -> Result<Option<ProtocolOperation>> {
        let paths = if let Some(key) = lookup(ROKU_KEYS, command.action) {
            vec![format!("/keypress/{}", key)]
        } else {
            match command.action {
                CommandType::Input => {
                    let input = normalize_input(require_text(command)?);
                    let key = match input.as_str() {
                        "hdmi1" => "InputHDMI1",
                        "hdmi2" => "InputHDMI2",
                        "hdmi3" => "InputHDMI3",
                        "hdmi4" => "InputHDMI4",
                        "av" | "av1" => "InputAV1",
                        "tv" | "tuner" => "InputTuner",
                        _ => return Ok(None),
                    };
                    vec![format!("/keypress/{}", key)]
                }
                CommandType::AppLaunch => {
                    let app = require_text(command)?;
                    let channel = lookup_name(ROKU_APPS, app).unwrap_or(app.trim());
                    if channel.is_empty() || !channel.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                        return Err(DeviceError::Configuration(format!(
                            "'{}' is neither a known app nor a Roku channel id",
                            app
                        )));
                    }
                    vec![format!("/launch/{}", channel)]
                }
                CommandType::Text => require_text(command)?
                    .chars()
                    .map(|c| format!("/keypress/Lit_{}", percent_encode(c)))
                    .collect(),
                CommandType::Custom => vec![format!("/keypress/{}", require_code(command)?)],
                _ => return Ok(None),
            }
        };

        Ok(Some(ProtocolOperation::HttpPost { paths }))
    }

    fn translate_webos(command: &DeviceCommand) -> Result<Option<ProtocolOperation>> {
        if let Some(uri) = lookup(WEBOS_URIS, command.action) {
            return Ok(Some(ProtocolOperation::SsapRequest {
                uri: uri.to_string(),
                payload: json!({}),
            }));
        }

        let (uri, payload) = match command.action {
            CommandType::Mute => ("ssap://audio/setMute", json!({ "mute": true })),
            CommandType::Input => {
                let input = normalize_input(require_text(command)?);
                let id = match input.strip_prefix("hdmi") {
                    Some(n) if !n.is_empty() => format!("HDMI_{}", n),
                    _ => input.to_ascii_uppercase(),
                };
                ("ssap://tv/switchInput", json!({ "inputId": id }))
            }
            CommandType::AppLaunch => {
                let app = require_text(command)?.trim().to_ascii_lowercase();
                ("ssap://system.launcher/launch", json!({ "id": app }))
            }
            CommandType::Text => (
                "ssap://com.webos.service.ime/insertText",
                json!({ "text": require_text(command)?, "replace": 0 }),
            ),
            CommandType::Custom => {
                return Ok(Some(ProtocolOperation::SsapRequest {
                    uri: require_code(command)?.to_string(),
                    payload: json!({}),
                }))
            }
            _ => return Ok(None),
        };

        Ok(Some(ProtocolOperation::SsapRequest {
            uri: uri.to_string(),
            payload,
        }))
    }

    fn translate_hid(command: &DeviceCommand) -> Result<Option<ProtocolOperation>> {
        if let Some((_, page, usage)) = HID_USAGES.iter().find(|(c, _, _)| *c == command.action) {
            return Ok(Some(ProtocolOperation::HidUsage {
                page: *page,
                usage: *usage,
            }));
        }

        match command.action {
            CommandType::Text => Ok(Some(ProtocolOperation::HidText(require_text(command)?.to_string()))),
            CommandType::Custom => {
                let code = require_code(command)?;
                let (page, usage) = parse_hid_code(code).ok_or_else(|| {
                    DeviceError::Configuration(format!(
                        "HID code '{}' must look like 0x0C:0xE9",
                        code
                    ))
                })?;
                Ok(Some(ProtocolOperation::HidUsage { page, usage }))
            }
            _ => Ok(None),
        }
    }

    fn translate_apple(command: &DeviceCommand) -> Result<Option<ProtocolOperation>> {
        if let Some(name) = lookup(APPLE_COMMANDS, command.action) {
            return Ok(Some(ProtocolOperation::RemoteCommand {
                name: name.to_string(),
                argument: None,
            }));
        }

        let (name, argument) = match command.action {
            CommandType::AppLaunch => ("launch_app", require_text(command)?.trim().to_string()),
            CommandType::Text => ("text_set", require_text(command)?.to_string()),
            CommandType::Custom => {
                return Ok(Some(ProtocolOperation::RemoteCommand {
                    name: require_code(command)?.to_string(),
                    argument: None,
                }))
            }
            _ => return Ok(None),
        };

        Ok(Some(ProtocolOperation::RemoteCommand {
            name: name.to_string(),
            argument: Some(argument),
        }))
    }
}

fn lookup_input_code(key: &str) -> Option<u16> {
    ADB_INPUTS.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

fn require_text(command: &DeviceCommand) -> Result<&str> {
    command
        .text()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| DeviceError::Configuration(format!("{} requires a text payload", command.action)))
}

fn require_code(command: &DeviceCommand) -> Result<&str> {
    match &command.payload {
        Some(CommandPayload::Code(code)) if !code.trim().is_empty() => Ok(code.trim()),
        _ => Err(DeviceError::Configuration(format!(
            "{} requires a code payload",
            command.action
        ))),
    }
}

fn require_coordinates(command: &DeviceCommand) -> Result<(i32, i32)> {
    match command.payload {
        Some(CommandPayload::Coordinates { x, y }) if x >= 0 && y >= 0 => Ok((x, y)),
        _ => Err(DeviceError::Configuration(format!(
            "{} requires non-negative coordinates",
            command.action
        ))),
    }
}

fn is_package_name(s: &str) -> bool {
    s.contains('.')
        && s.split('.').all(|part| {
            !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// Single-quote a string for the device shell
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

fn percent_encode(c: char) -> String {
    if c.is_ascii_alphanumeric() {
        return c.to_string();
    }
    let mut buf = [0u8; 4];
    c.encode_utf8(&mut buf)
        .bytes()
        .map(|b| format!("%{:02X}", b))
        .collect()
}

fn parse_hid_code(code: &str) -> Option<(u16, u16)> {
    let (page, usage) = code.split_once(':')?;
    let parse = |s: &str| {
        let s = s.trim();
        let hex = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
        u16::from_str_radix(hex, 16).ok()
    };
    Some((parse(page)?, parse(usage)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adb(command: DeviceCommand) -> Result<ProtocolOperation> {
        CommandTranslator::new().translate(ConnectionType::Adb, &command)
    }

    #[test]
    fn test_adb_keyevents() {
        assert_eq!(
            adb(DeviceCommand::new(CommandType::Power)).unwrap(),
            ProtocolOperation::AdbShell("input keyevent 26".to_string())
        );
        assert_eq!(
            adb(DeviceCommand::with_text(CommandType::Input, "HDMI 2")).unwrap(),
            ProtocolOperation::AdbShell("input keyevent 244".to_string())
        );
    }

    #[test]
    fn test_adb_app_launch_uses_known_packages() {
        assert_eq!(
            adb(DeviceCommand::with_text(CommandType::AppLaunch, "Netflix")).unwrap(),
            ProtocolOperation::AdbShell(
                "monkey -p com.netflix.ninja -c android.intent.category.LEANBACK_LAUNCHER 1".to_string()
            )
        );
        assert!(matches!(
            adb(DeviceCommand::with_text(CommandType::AppLaunch, "org.example.player")).unwrap(),
            ProtocolOperation::AdbShell(cmd) if cmd.contains("-p org.example.player ")
        ));
        assert!(matches!(
            adb(DeviceCommand::with_text(CommandType::AppLaunch, "rm -rf; x")),
            Err(DeviceError::Configuration(_))
        ));
    }

    #[test]
    fn test_adb_text_and_tap() {
        assert_eq!(
            adb(DeviceCommand::with_text(CommandType::Text, "it's on")).unwrap(),
            ProtocolOperation::AdbShell(r"input text 'it'\''s%son'".to_string())
        );
        assert_eq!(
            adb(DeviceCommand::new(CommandType::Tap).payload(CommandPayload::Coordinates { x: 10, y: 20 }))
                .unwrap(),
            ProtocolOperation::AdbShell("input tap 10 20".to_string())
        );
    }

    #[test]
    fn test_unknown_input_is_unsupported() {
        let err = adb(DeviceCommand::with_text(CommandType::Input, "SCART")).unwrap_err();
        assert!(matches!(
            err,
            DeviceError::UnsupportedCommand {
                command: CommandType::Input,
                kind: ConnectionType::Adb
            }
        ));
    }

    #[test]
    fn test_roku_paths() {
        let translator = CommandTranslator::new();
        assert_eq!(
            translator
                .translate(ConnectionType::Roku, &DeviceCommand::with_text(CommandType::AppLaunch, "netflix"))
                .unwrap(),
            ProtocolOperation::HttpPost {
                paths: vec!["/launch/12".to_string()]
            }
        );
        assert_eq!(
            translator
                .translate(ConnectionType::Roku, &DeviceCommand::with_text(CommandType::Text, "a b"))
                .unwrap(),
            ProtocolOperation::HttpPost {
                paths: vec![
                    "/keypress/Lit_a".to_string(),
                    "/keypress/Lit_%20".to_string(),
                    "/keypress/Lit_b".to_string()
                ]
            }
        );
        assert!(!translator.supports(ConnectionType::Roku, &DeviceCommand::new(CommandType::Stop)));
    }

    #[test]
    fn test_webos_and_apple_tables() {
        let translator = CommandTranslator::new();
        assert_eq!(
            translator
                .translate(ConnectionType::WebOs, &DeviceCommand::with_text(CommandType::Input, "HDMI1"))
                .unwrap(),
            ProtocolOperation::SsapRequest {
                uri: "ssap://tv/switchInput".to_string(),
                payload: json!({ "inputId": "HDMI_1" })
            }
        );
        assert!(!translator.supports(ConnectionType::WebOs, &DeviceCommand::new(CommandType::PowerOn)));

        assert_eq!(
            translator
                .translate(ConnectionType::AppleRemote, &DeviceCommand::new(CommandType::PowerOn))
                .unwrap(),
            ProtocolOperation::RemoteCommand {
                name: "wakeup".to_string(),
                argument: None
            }
        );
    }

    #[test]
    fn test_hid_custom_codes() {
        let translator = CommandTranslator::new();
        assert_eq!(
            translator
                .translate(ConnectionType::BluetoothHid, &DeviceCommand::custom("0x0C:0xE9"))
                .unwrap(),
            ProtocolOperation::HidUsage { page: 0x0C, usage: 0xE9 }
        );
        assert!(matches!(
            translator.translate(ConnectionType::BluetoothHid, &DeviceCommand::custom("volume")),
            Err(DeviceError::Configuration(_))
        ));
        assert!(matches!(
            translator.translate(ConnectionType::BluetoothHid, &DeviceCommand::new(CommandType::Tap)),
            Err(DeviceError::UnsupportedCommand { .. })
        ));
    }

    #[test]
    fn test_missing_payload_is_configuration_error() {
        assert!(matches!(
            adb(DeviceCommand::new(CommandType::AppLaunch)),
            Err(DeviceError::Configuration(_))
        ));
        assert!(matches!(
            adb(DeviceCommand::new(CommandType::Custom)),
            Err(DeviceError::Configuration(_))
        ));
    }
}
