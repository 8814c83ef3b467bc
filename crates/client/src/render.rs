//! Rendering seam.

use skirmish_sim::EntityView;

use crate::error::RenderError;
use crate::session::Phase;

/// Everything a renderer needs to draw one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameView {
    pub local: EntityView,
    pub remote: EntityView,
    pub remote_connected: bool,
    pub phase: Phase,
    pub surface_width: f64,
    pub surface_height: f64,
    pub floor_y: f64,
}

/// Draws frames onto a host surface.
///
/// Returning [`RenderError::MissingSurface`] switches the client to headless
/// mode: simulation and networking continue, drawing stops.
pub trait Renderer {
    fn draw(&mut self, frame: &FrameView) -> Result<(), RenderError>;
}

/// Renderer that draws nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn draw(&mut self, _frame: &FrameView) -> Result<(), RenderError> {
        Ok(())
    }
}
