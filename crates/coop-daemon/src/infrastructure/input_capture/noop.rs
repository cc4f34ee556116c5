//! No-op peripheral backends.
//!
//! The daemon runs the full protocol — discovery, pairing, sessions,
//! clipboard ownership — with these in place; edge crossings and grabs are
//! logged instead of performed.  A platform backend (evdev grabbing, an X11
//! or portal edge detector, a real clipboard) replaces them by implementing
//! the same traits.

use async_trait::async_trait;
use tracing::debug;

use super::{CaptureError, EdgeDetector, InputGrabber, LocalClipboard, ScreensaverInhibitor};

#[derive(Default)]
pub struct NoopGrabber;

impl InputGrabber for NoopGrabber {
    fn start(&self) -> Result<(), CaptureError> {
        debug!("input grab requested (no backend)");
        Ok(())
    }

    fn stop(&self) {
        debug!("input release requested (no backend)");
    }

    fn device_name(&self) -> &str {
        "noop"
    }
}

#[derive(Default)]
pub struct NoopEdgeDetector;

impl EdgeDetector for NoopEdgeDetector {
    fn start_edge_detection(&self) {
        debug!("edge detection start requested (no backend)");
    }

    fn stop_edge_detection(&self) {
        debug!("edge detection stop requested (no backend)");
    }

    fn hide_cursor(&self) {}

    fn flow_back(&self, x: u16, y: u16) {
        debug!("cursor restore requested at ({x}, {y}) (no backend)");
    }
}

#[derive(Default)]
pub struct NoopInhibitor;

impl ScreensaverInhibitor for NoopInhibitor {
    fn inhibit(&self) -> Result<(), CaptureError> {
        Ok(())
    }

    fn uninhibit(&self) {}
}

/// Clipboard backend that holds nothing and accepts everything.
#[derive(Default)]
pub struct NoopClipboard;

#[async_trait]
impl LocalClipboard for NoopClipboard {
    async fn announce_owner_targets(&self, owner_uuid: &str, targets: &[String]) {
        debug!("clipboard owner {owner_uuid} advertises {targets:?} (no backend)");
    }

    async fn read_target(&self, _target: &str) -> Option<Vec<u8>> {
        None
    }

    async fn write_target(&self, target: &str, data: Vec<u8>) {
        debug!("discarding {} byte(s) for {target} (no backend)", data.len());
    }
}
