//! Recording doubles for the peripheral ports.
//!
//! These are plain hand-written fakes that count calls and retain payloads,
//! so unit and integration tests can assert on side effects without any OS
//! peripheral behind them.

use std::sync::Mutex;

use async_trait::async_trait;

use super::{CaptureError, EdgeDetector, InputGrabber, LocalClipboard, ScreensaverInhibitor};

/// Grabber that records start/stop calls and can be told to fail.
#[derive(Default)]
pub struct RecordingGrabber {
    pub starts: Mutex<u32>,
    pub stops: Mutex<u32>,
    pub fail_start: bool,
}

impl RecordingGrabber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_count(&self) -> u32 {
        *self.starts.lock().unwrap()
    }

    pub fn stop_count(&self) -> u32 {
        *self.stops.lock().unwrap()
    }
}

impl InputGrabber for RecordingGrabber {
    fn start(&self) -> Result<(), CaptureError> {
        if self.fail_start {
            return Err(CaptureError::GrabFailed {
                device: self.device_name().to_string(),
                reason: "injected failure".to_string(),
            });
        }
        *self.starts.lock().unwrap() += 1;
        Ok(())
    }

    fn stop(&self) {
        *self.stops.lock().unwrap() += 1;
    }

    fn device_name(&self) -> &str {
        "recording-grabber"
    }
}

/// Edge detector that records every call with its arguments.
#[derive(Default)]
pub struct RecordingEdgeDetector {
    pub detection_starts: Mutex<u32>,
    pub detection_stops: Mutex<u32>,
    pub cursor_hides: Mutex<u32>,
    pub flow_backs: Mutex<Vec<(u16, u16)>>,
}

impl RecordingEdgeDetector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EdgeDetector for RecordingEdgeDetector {
    fn start_edge_detection(&self) {
        *self.detection_starts.lock().unwrap() += 1;
    }

    fn stop_edge_detection(&self) {
        *self.detection_stops.lock().unwrap() += 1;
    }

    fn hide_cursor(&self) {
        *self.cursor_hides.lock().unwrap() += 1;
    }

    fn flow_back(&self, x: u16, y: u16) {
        self.flow_backs.lock().unwrap().push((x, y));
    }
}

/// Inhibitor that counts inhibit/uninhibit and can be told to fail.
#[derive(Default)]
pub struct RecordingInhibitor {
    pub inhibits: Mutex<u32>,
    pub uninhibits: Mutex<u32>,
    pub fail: bool,
}

impl RecordingInhibitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

impl ScreensaverInhibitor for RecordingInhibitor {
    fn inhibit(&self) -> Result<(), CaptureError> {
        if self.fail {
            return Err(CaptureError::InhibitUnavailable(
                "injected failure".to_string(),
            ));
        }
        *self.inhibits.lock().unwrap() += 1;
        Ok(())
    }

    fn uninhibit(&self) {
        *self.uninhibits.lock().unwrap() += 1;
    }
}

/// In-memory clipboard that stores writes and serves configured reads.
#[derive(Default)]
pub struct MemoryClipboard {
    pub announced: Mutex<Vec<(String, Vec<String>)>>,
    pub written: Mutex<Vec<(String, Vec<u8>)>>,
    pub contents: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preloads content that `read_target` will serve.
    pub fn set_content(&self, target: &str, data: Vec<u8>) {
        self.contents.lock().unwrap().push((target.to_string(), data));
    }
}

#[async_trait]
impl LocalClipboard for MemoryClipboard {
    async fn announce_owner_targets(&self, owner_uuid: &str, targets: &[String]) {
        self.announced
            .lock()
            .unwrap()
            .push((owner_uuid.to_string(), targets.to_vec()));
    }

    async fn read_target(&self, target: &str) -> Option<Vec<u8>> {
        self.contents
            .lock()
            .unwrap()
            .iter()
            .find(|(t, _)| t == target)
            .map(|(_, data)| data.clone())
    }

    async fn write_target(&self, target: &str, data: Vec<u8>) {
        self.written
            .lock()
            .unwrap()
            .push((target.to_string(), data));
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_grabber_counts_calls() {
        let grabber = RecordingGrabber::new();
        grabber.start().unwrap();
        grabber.start().unwrap();
        grabber.stop();
        assert_eq!(grabber.start_count(), 2);
        assert_eq!(grabber.stop_count(), 1);
    }

    #[test]
    fn test_failing_grabber_reports_error() {
        let grabber = RecordingGrabber {
            fail_start: true,
            ..Default::default()
        };
        assert!(matches!(
            grabber.start(),
            Err(CaptureError::GrabFailed { .. })
        ));
        assert_eq!(grabber.start_count(), 0);
    }

    #[tokio::test]
    async fn test_memory_clipboard_round_trip() {
        let clipboard = MemoryClipboard::new();
        clipboard.set_content("text/plain", b"hello".to_vec());

        assert_eq!(
            clipboard.read_target("text/plain").await,
            Some(b"hello".to_vec())
        );
        assert_eq!(clipboard.read_target("image/png").await, None);

        clipboard.write_target("text/plain", b"from peer".to_vec()).await;
        assert_eq!(
            clipboard.written.lock().unwrap()[0],
            ("text/plain".to_string(), b"from peer".to_vec())
        );
    }
}
