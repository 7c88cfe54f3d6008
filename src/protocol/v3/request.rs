use crate::protocol::GpsdJsonRequest;

use super::types::*;

/// Commands a client can send to GPSD
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Devices,
    Watch(Option<Watch>),
    Device(Option<DeviceConfig>),
    Poll,
    Version,
}

impl GpsdJsonRequest for Message {
    /// Converts a request message into a GPSD command string
    ///
    /// - Simple commands: `?COMMAND;`
    /// - Commands with parameters: `?COMMAND={"json":"params"};`
    fn to_command(&self) -> serde_json::Result<String> {
        Ok(match self {
            Message::Devices => "?DEVICES;".into(),
            Message::Watch(Some(watch)) => format!("?WATCH={};", serde_json::to_string(watch)?),
            Message::Watch(None) => "?WATCH;".into(),
            Message::Device(Some(device)) => {
                format!("?DEVICE={};", serde_json::to_string(device)?)
            }
            Message::Device(None) => "?DEVICE;".into(),
            Message::Poll => "?POLL;".into(),
            Message::Version => "?VERSION;".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_commands() {
        assert_eq!(Message::Version.to_command().unwrap(), "?VERSION;");
        assert_eq!(Message::Devices.to_command().unwrap(), "?DEVICES;");
        assert_eq!(Message::Watch(None).to_command().unwrap(), "?WATCH;");
    }

    #[test]
    fn watch_command_carries_policy() {
        let cmd = Message::Watch(Some(Watch::json())).to_command().unwrap();
        assert_eq!(cmd, r#"?WATCH={"enable":true,"json":true};"#);
    }
}
