use crate::channel::Channel;
use crate::link::{LinkError, LinkHealth, LinkWriter};
use serde::Deserialize;
use std::sync::Arc;

/// Subsystems that accept commands but are not data channels.
const COMMAND_ONLY_TARGETS: &[&str] = &["pump", "pump a", "pump b", "valve"];

/// Operator command. `pump`/`valve`/`command` are the keys older dashboards send.
#[derive(Debug, Clone, Deserialize)]
pub struct Command {
    #[serde(default, alias = "pump", alias = "valve")]
    pub target: Option<String>,
    #[serde(default, alias = "command")]
    pub opcode: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("command opcode is required")]
    EmptyOpcode,
    #[error("device link is down: {0}")]
    LinkDown(String),
    #[error(transparent)]
    Write(#[from] LinkError),
}

#[derive(Clone)]
pub struct CommandDispatcher {
    link: LinkWriter,
    health: Arc<LinkHealth>,
}

impl CommandDispatcher {
    pub fn new(link: LinkWriter, health: Arc<LinkHealth>) -> Self {
        Self { link, health }
    }

    /// Writes the opcode to the device as-is. Success means the bytes left on the link, not that
    /// the device acted on them.
    pub fn send(&self, command: &Command) -> Result<(), DispatchError> {
        let opcode = command
            .opcode
            .as_deref()
            .filter(|opcode| !opcode.trim().is_empty())
            .ok_or(DispatchError::EmptyOpcode)?;
        let target = command.target.as_deref().unwrap_or("").trim();

        if self.health.is_failed() {
            let reason = self
                .health
                .last_error()
                .unwrap_or_else(|| "link failed".to_string());
            return Err(DispatchError::LinkDown(reason));
        }

        if !target.is_empty() && !is_known_target(target) {
            tracing::warn!(command_target = %target, opcode = %opcode, "command for unknown target; forwarding anyway");
        }

        tracing::info!(command_target = %target, opcode = %opcode, "sending command to device");
        self.link.write_bytes(opcode.as_bytes())?;
        Ok(())
    }
}

fn is_known_target(target: &str) -> bool {
    Channel::from_name(target).is_some()
        || COMMAND_ONLY_TARGETS
            .iter()
            .any(|known| known.eq_ignore_ascii_case(target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::from_io;
    use crate::test_support::RecordingWriter;
    use std::io::{self, Write};

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"))
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn command(target: &str, opcode: &str) -> Command {
        Command {
            target: Some(target.to_string()),
            opcode: Some(opcode.to_string()),
        }
    }

    fn dispatcher(writer: impl Write + Send + 'static) -> (CommandDispatcher, Arc<LinkHealth>) {
        let (_, link) = from_io(io::empty(), writer);
        let health = Arc::new(LinkHealth::default());
        (CommandDispatcher::new(link, health.clone()), health)
    }

    #[test]
    fn empty_opcode_is_rejected_before_any_write() {
        let recorder = RecordingWriter::default();
        let (dispatcher, _) = dispatcher(recorder.clone());

        for bad in [command("TankA", ""), command("TankA", "  ")] {
            assert!(matches!(dispatcher.send(&bad), Err(DispatchError::EmptyOpcode)));
        }
        let missing = Command {
            target: Some("TankA".to_string()),
            opcode: None,
        };
        assert!(matches!(dispatcher.send(&missing), Err(DispatchError::EmptyOpcode)));
        assert!(recorder.written().is_empty());
    }

    #[test]
    fn opcode_is_written_verbatim() {
        let recorder = RecordingWriter::default();
        let (dispatcher, _) = dispatcher(recorder.clone());
        dispatcher.send(&command("Pump A", "T")).unwrap();
        dispatcher.send(&command("RainwaterInlet", "A")).unwrap();
        dispatcher.send(&command("somewhere", "Z")).unwrap();
        assert_eq!(recorder.written(), b"TAZ");
    }

    #[test]
    fn known_targets_cover_channels_and_actuators() {
        for target in ["TankA", "tank2", "Borewell", "RAINWATERINLET", "Pump A", "pump b", "Valve"] {
            assert!(is_known_target(target), "{target}");
        }
        for target in ["Pump C", "somewhere", "tank3"] {
            assert!(!is_known_target(target), "{target}");
        }
    }

    #[test]
    fn failed_link_reports_per_attempt() {
        let (dispatcher, health) = dispatcher(Broken);
        assert!(matches!(
            dispatcher.send(&command("Borewell", "U")),
            Err(DispatchError::Write(LinkError::Write(_)))
        ));

        health.mark_failed("device link closed");
        assert!(matches!(
            dispatcher.send(&command("Borewell", "U")),
            Err(DispatchError::LinkDown(reason)) if reason == "device link closed"
        ));
    }

    #[test]
    fn legacy_body_keys_are_accepted() {
        let parsed: Command = serde_json::from_str(r#"{"pump": "Pump B", "command": "C"}"#).unwrap();
        assert_eq!(parsed.target.as_deref(), Some("Pump B"));
        assert_eq!(parsed.opcode.as_deref(), Some("C"));
        let parsed: Command = serde_json::from_str(r#"{"valve": "borewell", "command": "W"}"#).unwrap();
        assert_eq!(parsed.target.as_deref(), Some("borewell"));
    }

    #[test]
    fn concurrent_sends_do_not_interleave() {
        let recorder = RecordingWriter::default();
        let (dispatcher, _) = dispatcher(recorder.clone());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dispatcher = dispatcher.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        dispatcher.send(&command("TankA", "ABCD")).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let written = recorder.written();
        assert_eq!(written.len(), 8 * 25 * 4);
        assert!(written.chunks(4).all(|chunk| chunk == b"ABCD"));
    }
}
