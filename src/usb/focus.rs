/// What currently holds keyboard focus in the host UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusTarget {
    /// The decoder's own hidden capture surface
    Capture,
    Input,
    TextArea,
    Select,
    ContentEditable,
    /// Any other element (buttons, body)
    Other,
    Nothing,
}

impl FocusTarget {
    /// Elements the user is typing into; focus is never taken from these.
    pub fn is_form_field(&self) -> bool {
        matches!(
            self,
            FocusTarget::Input
                | FocusTarget::TextArea
                | FocusTarget::Select
                | FocusTarget::ContentEditable
        )
    }
}

/// Host UI hook for the hidden capture surface.
pub trait FocusSurface: Send + Sync {
    fn active_target(&self) -> FocusTarget;

    /// Whether the host window itself has focus.
    fn window_focused(&self) -> bool {
        true
    }

    /// Move focus to the capture surface without scrolling.
    fn focus_capture(&self);
}

/// Claim focus for the capture surface unless a form field has it.
/// Returns true when focus was moved.
pub fn maintain_focus(surface: &dyn FocusSurface) -> bool {
    let target = surface.active_target();
    if target == FocusTarget::Capture || target.is_form_field() || !surface.window_focused() {
        return false;
    }
    surface.focus_capture();
    log::debug!("Capture surface reclaimed focus from {:?}", target);
    true
}
