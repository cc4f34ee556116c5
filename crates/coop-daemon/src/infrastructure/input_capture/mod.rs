//! Local peripheral ports: input grabbing, edge detection, screensaver
//! inhibition, and the system clipboard.
//!
//! The daemon's application layer drives these capabilities but never the
//! platform mechanics behind them — whether grabbing goes through evdev or a
//! compositor protocol, and whether edges come from X11 or a Wayland
//! portal, is an implementation's concern behind these traits.  Tests use
//! the recording doubles in [`mock`].

use async_trait::async_trait;
use thiserror::Error;

pub mod mock;
pub mod noop;

/// Error type for peripheral operations.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to grab input device {device}: {reason}")]
    GrabFailed { device: String, reason: String },
    #[error("screensaver inhibition unavailable: {0}")]
    InhibitUnavailable(String),
}

/// An opaque capture capability for one local input device.
///
/// While grabbed, the device's events are withheld from the local desktop
/// and forwarded to the active peer instead.
pub trait InputGrabber: Send + Sync {
    /// Starts exclusive capture.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::GrabFailed`] if the device cannot be grabbed.
    fn start(&self) -> Result<(), CaptureError>;

    /// Releases the device back to the local desktop.
    fn stop(&self);

    /// Human-readable device name, for logging.
    fn device_name(&self) -> &str;
}

/// Screen-edge detection and cursor control.
///
/// Produces the edge-crossing coordinates that feed
/// [`InputFlowRouter::try_flow_out`](crate::application::flow_router::InputFlowRouter).
pub trait EdgeDetector: Send + Sync {
    fn start_edge_detection(&self);
    fn stop_edge_detection(&self);
    /// Hides the local cursor while input flows to a peer.
    fn hide_cursor(&self);
    /// Restores the cursor at the given position when input flows back.
    fn flow_back(&self, x: u16, y: u16);
}

/// Keeps the screensaver away while device sharing is active.
///
/// Inhibition failure is tolerated: sharing works either way, the screen
/// just may blank.
#[cfg_attr(test, mockall::automock)]
pub trait ScreensaverInhibitor: Send + Sync {
    /// # Errors
    ///
    /// Returns [`CaptureError::InhibitUnavailable`] if the desktop offers no
    /// inhibition interface.
    fn inhibit(&self) -> Result<(), CaptureError>;
    fn uninhibit(&self);
}

/// The local system clipboard.
#[async_trait]
pub trait LocalClipboard: Send + Sync {
    /// Advertises that a remote machine now owns content of these targets.
    async fn announce_owner_targets(&self, owner_uuid: &str, targets: &[String]);
    /// Reads local content for one target type, if present.
    async fn read_target(&self, target: &str) -> Option<Vec<u8>>;
    /// Writes content received from the owning peer into the local clipboard.
    async fn write_target(&self, target: &str, data: Vec<u8>);
}
