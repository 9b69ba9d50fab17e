//! Testing utilities for dulcescan
//!
//! Scriptable stand-ins for the camera backend, the decode engine and the
//! host focus model, so the state machines can be exercised without hardware.

mod mock_backend;
mod mock_focus;
mod scripted_engine;
pub mod synthetic_data;

pub use mock_backend::{MockBackend, MockStream};
pub use mock_focus::MockFocusSurface;
pub use scripted_engine::{ScriptedEngine, ScriptedEngineFactory};
pub use synthetic_data::{
    ean13_check_digit, synthetic_barcode_frame, synthetic_ean13_frame, synthetic_video_frame,
};
