//! Tracked controller input: button and axis queries.

use glam::{Mat4, Vec2};

/// Number of analog axes a controller reports.
pub const MAX_CONTROLLER_AXES: usize = 5;

/// Controller buttons, numbered as the runtime reports them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Button {
    System,
    ApplicationMenu,
    Grip,
    Touchpad,
    Trigger,
}

impl Button {
    pub fn id(self) -> u32 {
        match self {
            Button::System => 0,
            Button::ApplicationMenu => 1,
            Button::Grip => 2,
            Button::Touchpad => 32,
            Button::Trigger => 33,
        }
    }

    pub fn mask(self) -> u64 {
        1u64 << self.id()
    }
}

/// Raw controller state for one frame.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ControllerState {
    /// Bit `n` set when the button with id `n` is held.
    pub buttons_pressed: u64,
    /// Axis 0 is the touchpad, axis 1 the trigger (x only).
    pub axes: [Vec2; MAX_CONTROLLER_AXES],
}

impl ControllerState {
    pub fn with_button(mut self, button: Button) -> Self {
        self.buttons_pressed |= button.mask();
        self
    }

    pub fn with_axis(mut self, index: usize, value: Vec2) -> Self {
        if let Some(axis) = self.axes.get_mut(index) {
            *axis = value;
        }
        self
    }
}

/// A tracked controller as seen by the scene.
#[derive(Clone, Debug)]
pub struct Controller {
    device_index: usize,
    state: ControllerState,
    previous: ControllerState,
    device_to_absolute: Mat4,
}

impl Controller {
    pub fn new(device_index: usize) -> Self {
        Self {
            device_index,
            state: ControllerState::default(),
            previous: ControllerState::default(),
            device_to_absolute: Mat4::IDENTITY,
        }
    }

    /// Records this frame's state; the previous one is kept for deltas.
    pub fn update(&mut self, state: ControllerState, device_to_absolute: Mat4) {
        self.previous = self.state;
        self.state = state;
        self.device_to_absolute = device_to_absolute;
    }

    pub fn device_index(&self) -> usize {
        self.device_index
    }

    pub fn is_button_down(&self, button: Button) -> bool {
        self.state.buttons_pressed & button.mask() != 0
    }

    /// Current value of an analog axis; zero for out-of-range indices.
    pub fn axis(&self, index: usize) -> Vec2 {
        self.state.axes.get(index).copied().unwrap_or(Vec2::ZERO)
    }

    /// Touchpad movement since the previous frame. Zero unless the pad was
    /// touched in both frames.
    pub fn touchpad_delta(&self) -> Vec2 {
        let was_touched = self.previous.axes[0] != Vec2::ZERO;
        let is_touched = self.state.axes[0] != Vec2::ZERO;
        if was_touched && is_touched {
            self.state.axes[0] - self.previous.axes[0]
        } else {
            Vec2::ZERO
        }
    }

    /// Controller pose in tracking space (not inverted).
    pub fn device_to_absolute(&self) -> Mat4 {
        self.device_to_absolute
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_queries_follow_mask() {
        let mut controller = Controller::new(1);
        controller.update(
            ControllerState::default().with_button(Button::Trigger),
            Mat4::IDENTITY,
        );
        assert!(controller.is_button_down(Button::Trigger));
        assert!(!controller.is_button_down(Button::Touchpad));
    }

    #[test]
    fn touchpad_delta_needs_two_touched_frames() {
        let mut controller = Controller::new(1);
        controller.update(
            ControllerState::default().with_axis(0, Vec2::new(0.1, 0.2)),
            Mat4::IDENTITY,
        );
        assert_eq!(controller.touchpad_delta(), Vec2::ZERO);

        controller.update(
            ControllerState::default().with_axis(0, Vec2::new(0.3, 0.1)),
            Mat4::IDENTITY,
        );
        let delta = controller.touchpad_delta();
        assert!((delta - Vec2::new(0.2, -0.1)).length() < 1e-6);
    }

    #[test]
    fn out_of_range_axis_is_zero() {
        let controller = Controller::new(2);
        assert_eq!(controller.axis(99), Vec2::ZERO);
    }
}
