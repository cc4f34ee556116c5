//! Input flow routing: decides where input goes when the cursor crosses a
//! screen edge, and owns the grab/ungrab side effects of flowing out.
//!
//! Device sharing associates each sharing machine with a screen edge.  When
//! the local cursor hits an edge, [`InputFlowRouter::try_flow_out`] checks
//! whether a connected, sharing machine claims that edge; if one does, the
//! crossing is accepted, the local input devices are grabbed once, the
//! cursor is hidden, and subsequent input is relayed to that machine.  The
//! peer later returns control with a flow-back event, which releases the
//! grabs and restores the cursor at the returned coordinates.
//!
//! Screensaver inhibition is reference-counted over the number of active
//! sharing relationships: the first start inhibits, the last stop
//! uninhibits.  An unavailable inhibitor merely logs — sharing never fails
//! because the screen might blank.

use std::sync::Arc;

use coop_core::protocol::messages::InputFlowMessage;
use coop_core::{CoopMessage, FlowDirection};
use tracing::{debug, info, warn};

use crate::application::registry::MachineRegistry;
use crate::infrastructure::input_capture::{EdgeDetector, InputGrabber, ScreensaverInhibitor};

/// Routes edge crossings and owns the flowing-out state.
pub struct InputFlowRouter {
    grabbers: Vec<Arc<dyn InputGrabber>>,
    edge: Arc<dyn EdgeDetector>,
    inhibitor: Arc<dyn ScreensaverInhibitor>,
    /// Number of machines currently in a device-sharing relationship.
    sharing_count: u32,
    /// Whether local input is currently flowing to a peer.
    flowing_out: bool,
}

impl InputFlowRouter {
    pub fn new(
        grabbers: Vec<Arc<dyn InputGrabber>>,
        edge: Arc<dyn EdgeDetector>,
        inhibitor: Arc<dyn ScreensaverInhibitor>,
    ) -> Self {
        Self {
            grabbers,
            edge,
            inhibitor,
            sharing_count: 0,
            flowing_out: false,
        }
    }

    pub fn is_flowing_out(&self) -> bool {
        self.flowing_out
    }

    pub fn sharing_count(&self) -> u32 {
        self.sharing_count
    }

    /// Handles an edge crossing at (`x`, `y`) toward `direction`.
    ///
    /// Returns `true` when a connected, sharing machine claims that edge —
    /// the crossing is accepted and the event is forwarded to that machine.
    /// Peer-originated events (`from_peer == true`) are relayed as-is;
    /// locally originated crossings are additionally gated on the
    /// shared-devices switch and fire the one-time flow-out side effects.
    pub fn try_flow_out(
        &mut self,
        registry: &MachineRegistry,
        direction: FlowDirection,
        x: u16,
        y: u16,
        from_peer: bool,
        shared_devices: bool,
    ) -> bool {
        let Some(machine) = registry
            .iter()
            .find(|m| m.is_connected() && m.device_sharing && m.direction == Some(direction))
        else {
            return false;
        };

        if from_peer {
            // A relayed event: pass it straight on, no local grabbing.
            machine.send(CoopMessage::InputFlow(InputFlowMessage { direction, x, y }));
            return true;
        }

        if !shared_devices {
            debug!("edge {direction:?} matched but device sharing is off");
            return false;
        }

        machine.send(CoopMessage::InputFlow(InputFlowMessage { direction, x, y }));
        if !self.flowing_out {
            self.on_flow_out();
        }
        true
    }

    /// One-time side effects of input starting to flow to a peer.
    pub fn on_flow_out(&mut self) {
        self.flowing_out = true;
        for grabber in &self.grabbers {
            if let Err(e) = grabber.start() {
                warn!("failed to grab {}: {e}", grabber.device_name());
            }
        }
        self.edge.hide_cursor();
        info!("input flowing out");
    }

    /// The peer returned control: release grabs, restore the cursor.
    pub fn on_flow_back(&mut self, x: u16, y: u16) {
        if !self.flowing_out {
            return;
        }
        self.flowing_out = false;
        for grabber in &self.grabbers {
            grabber.stop();
        }
        self.edge.flow_back(x, y);
        info!("input flowed back at ({x}, {y})");
    }

    /// A device-sharing relationship started, locally initiated or not.
    pub fn on_start_device_sharing(&mut self) {
        self.sharing_count += 1;
        if self.sharing_count == 1 {
            if let Err(e) = self.inhibitor.inhibit() {
                warn!("screensaver inhibition unavailable: {e}");
            }
            self.edge.start_edge_detection();
        }
    }

    /// A device-sharing relationship ended.
    pub fn on_stop_device_sharing(&mut self) {
        if self.flowing_out {
            // No peer left to return control; release the devices here.
            self.flowing_out = false;
            for grabber in &self.grabbers {
                grabber.stop();
            }
        }
        self.sharing_count = self.sharing_count.saturating_sub(1);
        if self.sharing_count == 0 {
            self.inhibitor.uninhibit();
            self.edge.stop_edge_detection();
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::input_capture::mock::{
        RecordingEdgeDetector, RecordingGrabber, RecordingInhibitor,
    };
    use crate::infrastructure::input_capture::MockScreensaverInhibitor;
    use crate::infrastructure::network::session::SessionHandle;
    use coop_core::{DeviceInfo, DeviceOs};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn make_router() -> (
        InputFlowRouter,
        Arc<RecordingGrabber>,
        Arc<RecordingEdgeDetector>,
        Arc<RecordingInhibitor>,
    ) {
        let grabber = Arc::new(RecordingGrabber::new());
        let edge = Arc::new(RecordingEdgeDetector::new());
        let inhibitor = Arc::new(RecordingInhibitor::new());
        let router = InputFlowRouter::new(
            vec![Arc::clone(&grabber) as Arc<dyn InputGrabber>],
            Arc::clone(&edge) as Arc<dyn EdgeDetector>,
            Arc::clone(&inhibitor) as Arc<dyn ScreensaverInhibitor>,
        );
        (router, grabber, edge, inhibitor)
    }

    /// Registry with one connected machine sharing toward `direction`.
    fn registry_with_sharing_machine(
        direction: FlowDirection,
    ) -> (MachineRegistry, String, mpsc::UnboundedReceiver<CoopMessage>) {
        let mut registry = MachineRegistry::new();
        let dev = DeviceInfo::new(Uuid::new_v4().to_string(), "peer", DeviceOs::Linux);
        let (handle, rx) = SessionHandle::detached();
        let machine = registry.upsert("192.168.1.20".parse().unwrap(), 4000, &dev);
        machine.on_pair(handle);
        machine.device_sharing = true;
        machine.direction = Some(direction);
        (registry, dev.uuid, rx)
    }

    #[test]
    fn test_flow_out_on_claimed_edge_forwards_and_grabs() {
        let (mut router, grabber, edge, _) = make_router();
        let (registry, _, mut rx) = registry_with_sharing_machine(FlowDirection::Right);

        let accepted =
            router.try_flow_out(&registry, FlowDirection::Right, 1919, 500, false, true);

        assert!(accepted);
        assert!(router.is_flowing_out());
        assert_eq!(grabber.start_count(), 1);
        assert_eq!(*edge.cursor_hides.lock().unwrap(), 1);
        match rx.try_recv().unwrap() {
            CoopMessage::InputFlow(m) => {
                assert_eq!(m.direction, FlowDirection::Right);
                assert_eq!((m.x, m.y), (1919, 500));
            }
            other => panic!("expected input flow, got {other:?}"),
        }
    }

    #[test]
    fn test_flow_out_side_effects_fire_once() {
        let (mut router, grabber, edge, _) = make_router();
        let (registry, _, _rx) = registry_with_sharing_machine(FlowDirection::Right);

        router.try_flow_out(&registry, FlowDirection::Right, 1919, 500, false, true);
        router.try_flow_out(&registry, FlowDirection::Right, 1919, 501, false, true);

        assert_eq!(grabber.start_count(), 1);
        assert_eq!(*edge.cursor_hides.lock().unwrap(), 1);
    }

    #[test]
    fn test_unclaimed_edge_is_rejected() {
        let (mut router, grabber, _, _) = make_router();
        let (registry, _, _rx) = registry_with_sharing_machine(FlowDirection::Right);

        let accepted = router.try_flow_out(&registry, FlowDirection::Left, 0, 500, false, true);

        assert!(!accepted);
        assert!(!router.is_flowing_out());
        assert_eq!(grabber.start_count(), 0);
    }

    #[test]
    fn test_local_flow_blocked_while_shared_devices_off() {
        let (mut router, grabber, _, _) = make_router();
        let (registry, _, mut rx) = registry_with_sharing_machine(FlowDirection::Right);

        let accepted =
            router.try_flow_out(&registry, FlowDirection::Right, 1919, 500, false, false);

        assert!(!accepted);
        assert_eq!(grabber.start_count(), 0);
        assert!(rx.try_recv().is_err(), "nothing may be forwarded");
    }

    #[test]
    fn test_peer_flow_forwarded_regardless_of_local_switch() {
        let (mut router, grabber, _, _) = make_router();
        let (registry, _, mut msg_rx) = registry_with_sharing_machine(FlowDirection::Left);

        let accepted = router.try_flow_out(&registry, FlowDirection::Left, 0, 300, true, false);

        assert!(accepted);
        assert!(!router.is_flowing_out(), "relayed flow grabs nothing locally");
        assert_eq!(grabber.start_count(), 0);
        match msg_rx.try_recv().unwrap() {
            CoopMessage::InputFlow(m) => {
                assert_eq!(m.direction, FlowDirection::Left);
                assert_eq!((m.x, m.y), (0, 300));
            }
            other => panic!("expected input flow, got {other:?}"),
        }
    }

    #[test]
    fn test_flow_back_releases_grabs_and_restores_cursor() {
        let (mut router, grabber, edge, _) = make_router();
        let (registry, _, _rx) = registry_with_sharing_machine(FlowDirection::Right);
        router.try_flow_out(&registry, FlowDirection::Right, 1919, 500, false, true);

        router.on_flow_back(10, 500);

        assert!(!router.is_flowing_out());
        assert_eq!(grabber.stop_count(), 1);
        assert_eq!(*edge.flow_backs.lock().unwrap(), vec![(10, 500)]);
    }

    #[test]
    fn test_flow_back_without_flow_out_is_noop() {
        let (mut router, grabber, edge, _) = make_router();
        router.on_flow_back(10, 500);
        assert_eq!(grabber.stop_count(), 0);
        assert!(edge.flow_backs.lock().unwrap().is_empty());
    }

    #[test]
    fn test_inhibition_is_refcounted() {
        let (mut router, _, edge, inhibitor) = make_router();

        router.on_start_device_sharing();
        router.on_start_device_sharing();
        router.on_stop_device_sharing();

        assert_eq!(*inhibitor.inhibits.lock().unwrap(), 1);
        assert_eq!(*inhibitor.uninhibits.lock().unwrap(), 0);
        assert_eq!(*edge.detection_starts.lock().unwrap(), 1);

        router.on_stop_device_sharing();

        assert_eq!(*inhibitor.uninhibits.lock().unwrap(), 1);
        assert_eq!(*edge.detection_stops.lock().unwrap(), 1);
    }

    #[test]
    fn test_inhibitor_failure_degrades_silently() {
        let grabber = Arc::new(RecordingGrabber::new());
        let edge = Arc::new(RecordingEdgeDetector::new());
        let mut inhibitor = MockScreensaverInhibitor::new();
        inhibitor.expect_inhibit().times(1).returning(|| {
            Err(crate::infrastructure::input_capture::CaptureError::InhibitUnavailable(
                "no desktop portal".to_string(),
            ))
        });
        inhibitor.expect_uninhibit().times(1).return_const(());

        let mut router = InputFlowRouter::new(
            vec![grabber as Arc<dyn InputGrabber>],
            Arc::clone(&edge) as Arc<dyn EdgeDetector>,
            Arc::new(inhibitor),
        );

        router.on_start_device_sharing();
        router.on_stop_device_sharing();

        // Edge detection still ran despite the inhibitor failure.
        assert_eq!(*edge.detection_starts.lock().unwrap(), 1);
        assert_eq!(*edge.detection_stops.lock().unwrap(), 1);
    }

    #[test]
    fn test_stop_sharing_while_flowing_releases_devices() {
        let (mut router, grabber, _, _) = make_router();
        let (registry, _, _rx) = registry_with_sharing_machine(FlowDirection::Right);
        router.on_start_device_sharing();
        router.try_flow_out(&registry, FlowDirection::Right, 1919, 500, false, true);

        router.on_stop_device_sharing();

        assert!(!router.is_flowing_out());
        assert_eq!(grabber.stop_count(), 1);
    }
}
