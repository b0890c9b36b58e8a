//! Compositor session lifecycle tracking.
//!
//! State changes arrive only through runtime events; the tracker never
//! invents transitions. Session begin/end go through the
//! [`SessionControl`] seam so the transition table can be exercised
//! against a recording fake.

use openxr as xr;
use tracing::{info, warn};

use stereopass_core::Result;

/// Session lifecycle phases, as reported by the compositor runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unknown,
    Idle,
    Ready,
    Synchronized,
    Visible,
    Focused,
    Stopping,
    Exiting,
    InstanceLost,
}

impl SessionPhase {
    pub fn from_xr(state: xr::SessionState) -> Self {
        match state {
            xr::SessionState::IDLE => Self::Idle,
            xr::SessionState::READY => Self::Ready,
            xr::SessionState::SYNCHRONIZED => Self::Synchronized,
            xr::SessionState::VISIBLE => Self::Visible,
            xr::SessionState::FOCUSED => Self::Focused,
            xr::SessionState::STOPPING => Self::Stopping,
            xr::SessionState::EXITING => Self::Exiting,
            xr::SessionState::LOSS_PENDING => Self::InstanceLost,
            _ => Self::Unknown,
        }
    }
}

/// Begin/end requests issued on lifecycle transitions.
pub trait SessionControl {
    fn begin_session(&mut self) -> Result<()>;
    fn end_session(&mut self) -> Result<()>;
}

/// Tracks the current phase, whether the session has been begun, and
/// whether the scheduler should terminate.
#[derive(Debug)]
pub struct SessionTracker {
    phase: SessionPhase,
    session_active: bool,
    quit_requested: bool,
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTracker {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Unknown,
            session_active: false,
            quit_requested: false,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn session_active(&self) -> bool {
        self.session_active
    }

    /// Checked once per tick boundary by the scheduler.
    pub fn quit_requested(&self) -> bool {
        self.quit_requested
    }

    /// Rendering runs as soon as the session is Ready, not only once
    /// focused, to keep passthrough latency low.
    pub fn rendering_allowed(&self) -> bool {
        self.session_active
            && matches!(
                self.phase,
                SessionPhase::Ready
                    | SessionPhase::Synchronized
                    | SessionPhase::Visible
                    | SessionPhase::Focused
            )
    }

    /// Apply one state-change event delivered by the runtime.
    ///
    /// A failed begin is logged and leaves the session inactive;
    /// rendering stays off until a later `Ready` event, if any.
    pub fn handle_state_change(&mut self, next: SessionPhase, control: &mut dyn SessionControl) {
        info!(?next, "session state changed");
        self.phase = next;
        match next {
            SessionPhase::Ready => match control.begin_session() {
                Ok(()) => self.session_active = true,
                Err(err) => warn!(%err, "session begin failed"),
            },
            SessionPhase::Stopping => {
                self.session_active = false;
                if let Err(err) = control.end_session() {
                    warn!(%err, "session end failed");
                }
            }
            SessionPhase::Exiting | SessionPhase::InstanceLost => {
                self.session_active = false;
                self.quit_requested = true;
            }
            _ => {}
        }
    }

    /// Instance loss delivered outside the state-change event stream.
    pub fn handle_instance_loss(&mut self) {
        warn!("compositor instance loss pending");
        self.phase = SessionPhase::InstanceLost;
        self.session_active = false;
        self.quit_requested = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stereopass_core::Error;

    #[derive(Default)]
    struct Recorder {
        begins: u32,
        ends: u32,
        fail_begin: bool,
    }

    impl SessionControl for Recorder {
        fn begin_session(&mut self) -> Result<()> {
            self.begins += 1;
            if self.fail_begin {
                Err(Error::compositor("begin rejected"))
            } else {
                Ok(())
            }
        }

        fn end_session(&mut self) -> Result<()> {
            self.ends += 1;
            Ok(())
        }
    }

    #[test]
    fn ready_begins_session_exactly_once() {
        let mut tracker = SessionTracker::new();
        let mut control = Recorder::default();

        tracker.handle_state_change(SessionPhase::Idle, &mut control);
        assert_eq!(control.begins, 0);
        assert!(!tracker.rendering_allowed());

        tracker.handle_state_change(SessionPhase::Ready, &mut control);
        assert_eq!(control.begins, 1);
        assert!(tracker.session_active());
        assert!(tracker.rendering_allowed());
    }

    #[test]
    fn failed_begin_leaves_session_inactive() {
        let mut tracker = SessionTracker::new();
        let mut control = Recorder {
            fail_begin: true,
            ..Default::default()
        };

        tracker.handle_state_change(SessionPhase::Ready, &mut control);
        assert_eq!(control.begins, 1);
        assert!(!tracker.session_active());
        assert!(!tracker.rendering_allowed());
    }

    #[test]
    fn stopping_ends_session_exactly_once() {
        let mut tracker = SessionTracker::new();
        let mut control = Recorder::default();

        tracker.handle_state_change(SessionPhase::Ready, &mut control);
        tracker.handle_state_change(SessionPhase::Stopping, &mut control);
        assert_eq!(control.ends, 1);
        assert!(!tracker.session_active());
        assert!(!tracker.rendering_allowed());
        assert!(!tracker.quit_requested());
    }

    #[test]
    fn exiting_requests_quit() {
        let mut tracker = SessionTracker::new();
        let mut control = Recorder::default();

        tracker.handle_state_change(SessionPhase::Exiting, &mut control);
        assert!(tracker.quit_requested());
    }

    #[test]
    fn instance_loss_requests_quit() {
        let mut tracker = SessionTracker::new();
        let mut control = Recorder::default();

        tracker.handle_state_change(SessionPhase::Ready, &mut control);
        tracker.handle_instance_loss();
        assert!(tracker.quit_requested());
        assert!(!tracker.rendering_allowed());
        assert_eq!(tracker.phase(), SessionPhase::InstanceLost);
    }

    #[test]
    fn rendering_gate_covers_only_eligible_phases() {
        let eligible = [
            SessionPhase::Ready,
            SessionPhase::Synchronized,
            SessionPhase::Visible,
            SessionPhase::Focused,
        ];
        let all = [
            SessionPhase::Unknown,
            SessionPhase::Idle,
            SessionPhase::Ready,
            SessionPhase::Synchronized,
            SessionPhase::Visible,
            SessionPhase::Focused,
            SessionPhase::Stopping,
            SessionPhase::Exiting,
            SessionPhase::InstanceLost,
        ];

        for phase in all {
            let mut tracker = SessionTracker::new();
            let mut control = Recorder::default();
            // Begin first so the active flag is set, then move on.
            tracker.handle_state_change(SessionPhase::Ready, &mut control);
            if phase != SessionPhase::Ready {
                tracker.handle_state_change(phase, &mut control);
            }
            let expect = eligible.contains(&phase);
            assert_eq!(tracker.rendering_allowed(), expect, "{phase:?}");
        }
    }
}
