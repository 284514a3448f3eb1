//! Per-frame pose ownership arbitration.
//!
//! Pose control is a lease, not a lock: the host claims the pose by
//! requesting it every render tick, and the claim expires on the first tick
//! it is not renewed. Other controllers can take the pose over at any time,
//! so callers must consult [`FrameArbiter::can_set_pose`] every frame.

use tracing::debug;

use crate::protocol::{GAME_RANK, InputFrame, Pose};

#[derive(Debug, Default)]
pub struct FrameArbiter {
    requested_pose: Option<Pose>,
    requested_tick: u64,
    last_frame_id: u64,
    stale_reference: bool,
}

impl FrameArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the host may drive the pose this frame.
    ///
    /// False before the first synchronized frame (there is no frame context
    /// yet), while the compositor reports a stale reference frame, and
    /// whenever the synchronized pose rank sits above the game rank.
    pub fn can_set_pose(&self, frame: &InputFrame) -> bool {
        if frame.frame_id == 0 || self.stale_reference {
            return false;
        }
        frame.priority.pose <= GAME_RANK
    }

    /// Records a pose request for the given render tick.
    ///
    /// The claim only takes effect if the next synchronization happens on the
    /// same tick; a request left over from an earlier tick releases control
    /// instead. Returns whether the current synchronized rank would allow the
    /// pose to land.
    pub fn request_pose(&mut self, frame: &InputFrame, pose: Pose, tick: u64) -> bool {
        if frame.frame_id == 0 {
            return false;
        }
        self.requested_pose = Some(pose);
        self.requested_tick = tick;
        frame.priority.pose <= GAME_RANK
    }

    /// Merges the pending claim into the frame about to be published.
    ///
    /// Near/far clip distances are always host-driven: they derive from the
    /// active camera, not from whoever owns the pose.
    pub fn apply_claim(&mut self, frame: &mut InputFrame, tick: u64, near_far: Option<(f32, f32)>) {
        match self.requested_pose.take() {
            Some(pose) if self.requested_tick == tick => {
                frame.obtain_control();
                frame.pose = pose;
            }
            _ => frame.release_control(),
        }

        if let Some((near, far)) = near_far {
            frame.pose.near_clip = near;
            frame.pose.far_clip = far;
        }
    }

    /// Bookkeeping after a frame came back from the compositor.
    ///
    /// A reference frame that matches neither 0 nor the last synchronized
    /// frame id means external frames were dropped or reordered; the pose
    /// claim is not considered granted for such a frame.
    pub fn observe_synced(&mut self, frame: &InputFrame) {
        let stale = frame.reference_frame != 0
            && self.last_frame_id != 0
            && frame.reference_frame != self.last_frame_id;
        if stale {
            debug!(
                reference = frame.reference_frame,
                expected = self.last_frame_id,
                "stale input frame, ignoring pose claim"
            );
        }
        self.stale_reference = stale;
        self.last_frame_id = frame.frame_id;
    }

    /// Drops any pending request and releases the published claim.
    pub fn release(&mut self, frame: &mut InputFrame) {
        self.requested_pose = None;
        frame.release_control();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Priority;

    fn synced_frame(frame_id: u64, reference: u64, pose_rank: i8) -> InputFrame {
        let mut frame = InputFrame::default();
        frame.frame_id = frame_id;
        frame.reference_frame = reference;
        frame.priority = Priority::released();
        frame.priority.pose = pose_rank;
        frame
    }

    #[test]
    fn pose_rejected_before_first_synchronization() {
        let mut arbiter = FrameArbiter::new();
        let frame = InputFrame::default();
        assert!(!arbiter.can_set_pose(&frame));
        assert!(!arbiter.request_pose(&frame, Pose::default(), 1));
    }

    #[test]
    fn claim_lands_when_requested_on_the_current_tick() {
        let mut arbiter = FrameArbiter::new();
        let synced = synced_frame(1, 0, GAME_RANK);
        arbiter.observe_synced(&synced);

        let mut requested = Pose::default();
        requested.vertical_fov = 42.0;
        assert!(arbiter.request_pose(&synced, requested, 7));

        let mut publish = synced;
        arbiter.apply_claim(&mut publish, 7, None);
        assert_eq!(publish.priority.pose, GAME_RANK);
        assert_eq!(publish.pose.vertical_fov, 42.0);
    }

    #[test]
    fn claim_expires_when_a_tick_is_skipped() {
        let mut arbiter = FrameArbiter::new();
        let synced = synced_frame(1, 0, GAME_RANK);
        arbiter.observe_synced(&synced);
        arbiter.request_pose(&synced, Pose::default(), 7);

        let mut publish = synced;
        // Synchronization happens one tick later than the request.
        arbiter.apply_claim(&mut publish, 8, None);
        assert!(publish.priority.pose > GAME_RANK);
    }

    #[test]
    fn near_far_overridden_even_without_ownership() {
        let mut arbiter = FrameArbiter::new();
        let mut publish = synced_frame(1, 0, GAME_RANK);
        arbiter.apply_claim(&mut publish, 3, Some((0.25, 512.0)));
        assert!(publish.priority.pose > GAME_RANK);
        assert_eq!(publish.pose.near_clip, 0.25);
        assert_eq!(publish.pose.far_clip, 512.0);
    }

    #[test]
    fn externally_revoked_rank_blocks_the_pose() {
        let mut arbiter = FrameArbiter::new();
        let synced = synced_frame(3, 0, GAME_RANK + 2);
        arbiter.observe_synced(&synced);
        assert!(!arbiter.can_set_pose(&synced));
    }

    #[test]
    fn stale_reference_frame_ignores_the_claim() {
        let mut arbiter = FrameArbiter::new();
        arbiter.observe_synced(&synced_frame(5, 0, GAME_RANK));
        // Next frame claims to extend frame 9, which we never saw.
        let skewed = synced_frame(6, 9, GAME_RANK);
        arbiter.observe_synced(&skewed);
        assert!(!arbiter.can_set_pose(&skewed));
        // A consistent frame clears the condition.
        let consistent = synced_frame(7, 6, GAME_RANK);
        arbiter.observe_synced(&consistent);
        assert!(arbiter.can_set_pose(&consistent));
    }
}
