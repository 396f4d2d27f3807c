//! Dry-run backend that logs commands instead of driving hardware.

use std::collections::BTreeSet;

use super::{DispatchError, StreamSpec, StreamingBackend};
use crate::session::SessionId;
use crate::topology::LeafTarget;

fn leaves_summary(leaves: &[LeafTarget]) -> String {
    leaves
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Default)]
pub struct LogBackend {
    running: BTreeSet<SessionId>,
}

impl LogBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn running(&self) -> impl Iterator<Item = &SessionId> {
        self.running.iter()
    }
}

impl StreamingBackend for LogBackend {
    fn start_stream(&mut self, spec: &StreamSpec) -> Result<(), DispatchError> {
        self.running.insert(spec.session_id);
        log_indented!(
            "[log] start {} {} @ {}fps, {:.0}% -> {}",
            spec.session_id,
            spec.program.describe(),
            spec.fps,
            spec.brightness * 100.0,
            leaves_summary(&spec.leaves)
        );
        Ok(())
    }

    fn update_stream(&mut self, session_id: SessionId, leaves: &[LeafTarget]) -> Result<(), DispatchError> {
        if !self.running.contains(&session_id) {
            return Err(DispatchError::Permanent(format!("stream {session_id} is not running")));
        }
        log_indented!("[log] update {session_id} -> {}", leaves_summary(leaves));
        Ok(())
    }

    fn set_brightness(&mut self, session_id: SessionId, level: f64) -> Result<(), DispatchError> {
        log_indented!("[log] brightness {session_id} {:.0}%", level * 100.0);
        Ok(())
    }

    fn stop_stream(&mut self, session_id: SessionId) -> Result<(), DispatchError> {
        if self.running.remove(&session_id) {
            log_indented!("[log] stop {session_id}");
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preset::EffectProgram;
    use serde_json::json;

    #[test]
    fn test_tracks_running_streams() {
        let mut backend = LogBackend::new();
        let spec = StreamSpec {
            session_id: SessionId(3),
            leaves: vec![LeafTarget::whole("porch")],
            program: EffectProgram::Effect(json!({"type": "solid"})),
            fps: 30,
            brightness: 1.0,
        };
        backend.start_stream(&spec).unwrap();
        assert_eq!(backend.running().count(), 1);
        assert!(backend.update_stream(SessionId(3), &[]).is_ok());
        assert!(matches!(
            backend.update_stream(SessionId(4), &[]),
            Err(DispatchError::Permanent(_))
        ));
        backend.stop_stream(SessionId(3)).unwrap();
        backend.stop_stream(SessionId(3)).unwrap();
        assert_eq!(backend.running().count(), 0);
    }
}
