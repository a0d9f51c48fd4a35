//! Pivot rotation loop and the hover toggle driving it

use crate::config::AnimationMode;
use std::f32::consts::TAU;

/// Rotation applied to the pivot per rendered frame, in radians
pub const ROTATION_STEP: f32 = 0.005;

/// Continuous rotation about the vertical axis.
///
/// `start` and `stop` are idempotent: starting a running loop does not
/// speed it up and stopping an idle loop is a no-op.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RotationLoop {
    running: bool,
    angle: f32,
}

impl RotationLoop {
    /// Returns true if the loop was idle before
    pub fn start(&mut self) -> bool {
        !std::mem::replace(&mut self.running, true)
    }

    /// Returns true if the loop was running before
    pub fn stop(&mut self) -> bool {
        std::mem::replace(&mut self.running, false)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Current rotation, kept in `[0, 2π)`
    pub fn angle(&self) -> f32 {
        self.angle
    }

    /// Advance one frame. Returns the new angle while running.
    pub fn tick(&mut self) -> Option<f32> {
        if !self.running {
            return None;
        }
        self.angle = (self.angle + ROTATION_STEP).rem_euclid(TAU);
        Some(self.angle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationState {
    Idle,
    Animating,
}

/// Per-instance animation behaviour for a configured mode
#[derive(Debug, Clone)]
pub struct AnimationController {
    mode: AnimationMode,
    rotation: RotationLoop,
}

impl AnimationController {
    pub fn new(mode: AnimationMode) -> Self {
        Self {
            mode,
            rotation: RotationLoop::default(),
        }
    }

    pub fn mode(&self) -> AnimationMode {
        self.mode
    }

    /// Called once the model is in place.
    ///
    /// `pointer_inside` tells whether the pointer is already over the
    /// viewer, which starts a rotate-on-hover loop right away.
    pub fn attach(&mut self, pointer_inside: bool) {
        match self.mode {
            AnimationMode::None => {}
            AnimationMode::Rotate => {
                self.rotation.start();
            }
            AnimationMode::RotateOnHover => {
                if pointer_inside {
                    self.rotation.start();
                }
            }
        }
    }

    /// Returns true if this started the loop
    pub fn pointer_entered(&mut self) -> bool {
        self.mode == AnimationMode::RotateOnHover && self.rotation.start()
    }

    /// Returns true if this stopped the loop
    pub fn pointer_left(&mut self) -> bool {
        self.mode == AnimationMode::RotateOnHover && self.rotation.stop()
    }

    pub fn tick(&mut self) -> Option<f32> {
        self.rotation.tick()
    }

    pub fn angle(&self) -> f32 {
        self.rotation.angle()
    }

    pub fn state(&self) -> AnimationState {
        if self.rotation.is_running() {
            AnimationState::Animating
        } else {
            AnimationState::Idle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_accumulates_steps() {
        let mut controller = AnimationController::new(AnimationMode::Rotate);
        controller.attach(false);

        let ticks = 1300;
        for _ in 0..ticks {
            assert!(controller.tick().is_some());
        }

        let expected = (ticks as f32 * ROTATION_STEP).rem_euclid(TAU);
        assert!((controller.angle() - expected).abs() < 1e-3);
        assert_eq!(controller.state(), AnimationState::Animating);
    }

    #[test]
    fn test_rotate_ignores_pointer() {
        let mut controller = AnimationController::new(AnimationMode::Rotate);
        controller.attach(false);
        assert!(!controller.pointer_left());
        assert_eq!(controller.state(), AnimationState::Animating);
    }

    #[test]
    fn test_hover_without_pointer_never_rotates() {
        let mut controller = AnimationController::new(AnimationMode::RotateOnHover);
        controller.attach(false);

        for _ in 0..1000 {
            assert_eq!(controller.tick(), None);
        }
        assert_eq!(controller.angle(), 0.0);
        assert_eq!(controller.state(), AnimationState::Idle);
    }

    #[test]
    fn test_hover_toggle() {
        let mut controller = AnimationController::new(AnimationMode::RotateOnHover);
        controller.attach(false);

        assert!(controller.pointer_entered());
        // Entering twice must not double the rate
        assert!(!controller.pointer_entered());
        controller.tick();
        controller.tick();
        assert!((controller.angle() - 2.0 * ROTATION_STEP).abs() < 1e-6);

        assert!(controller.pointer_left());
        assert!(!controller.pointer_left());
        controller.tick();
        assert!((controller.angle() - 2.0 * ROTATION_STEP).abs() < 1e-6);
    }

    #[test]
    fn test_hover_starts_when_pointer_already_inside() {
        let mut controller = AnimationController::new(AnimationMode::RotateOnHover);
        controller.attach(true);
        assert_eq!(controller.state(), AnimationState::Animating);
    }

    #[test]
    fn test_none_stays_idle() {
        let mut controller = AnimationController::new(AnimationMode::None);
        controller.attach(true);
        assert!(!controller.pointer_entered());
        assert_eq!(controller.tick(), None);
    }

    #[test]
    fn test_loop_start_stop_idempotent() {
        let mut rotation = RotationLoop::default();
        assert!(!rotation.stop());
        assert!(rotation.start());
        assert!(!rotation.start());
        assert!(rotation.stop());
        assert!(!rotation.is_running());
    }
}
