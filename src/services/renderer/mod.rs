//! Page renderer capability.
//!
//! The capture stage only talks to these traits; `cdp` drives a real
//! browser, tests use in-memory sessions.

mod cdp;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AppError, Result};

pub use cdp::CdpRenderer;

/// Opaque handle of an element found by a selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementHandle(pub i64);

/// Layout box of an element as reported by the renderer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BoxModel {
    /// Margin quad: four (x, y) corner points
    pub margin: Vec<f64>,
    pub width: f64,
    pub height: f64,
}

/// Region of the page to capture.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clip {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoxModel {
    /// Capture region anchored at the margin origin.
    ///
    /// The origin is rounded so the image does not lose a pixel row or
    /// column to subpixel offsets.
    pub fn clip(&self) -> Result<Clip> {
        if self.margin.len() != 8 {
            return Err(AppError::render(
                "bounding box",
                format!("malformed box geometry ({} margin values)", self.margin.len()),
            ));
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(AppError::render(
                "bounding box",
                format!("empty box {}x{}", self.width, self.height),
            ));
        }

        Ok(Clip {
            x: self.margin[0].round(),
            y: self.margin[1].round(),
            width: self.width,
            height: self.height,
        })
    }
}

/// Something that can open isolated browsing sessions.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn open(&self) -> Result<Box<dyn RenderSession>>;
}

/// One browsing session, used for a single edit and then closed.
#[async_trait]
pub trait RenderSession: Send {
    async fn set_viewport(&mut self, width: u32, height: u32) -> Result<()>;

    /// Load the page and wait until it has finished loading.
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Run a script in the page and return its JSON value.
    async fn evaluate(&mut self, script: &str) -> Result<Value>;

    async fn query_selector(&mut self, selector: &str) -> Result<Option<ElementHandle>>;

    async fn bounding_box(&mut self, element: ElementHandle) -> Result<BoxModel>;

    /// Capture the clip region as PNG bytes.
    async fn capture_region(&mut self, clip: Clip, scale: f64) -> Result<Vec<u8>>;

    /// Release the session. Must be safe to call after any failure.
    async fn close(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_rounds_origin() {
        let model = BoxModel {
            margin: vec![10.4, 20.6, 110.4, 20.6, 110.4, 70.6, 10.4, 70.6],
            width: 100.0,
            height: 50.0,
        };
        assert_eq!(
            model.clip().unwrap(),
            Clip {
                x: 10.0,
                y: 21.0,
                width: 100.0,
                height: 50.0
            }
        );
    }

    #[test]
    fn test_clip_rejects_malformed_geometry() {
        let model = BoxModel {
            margin: vec![0.0, 0.0, 1.0],
            width: 100.0,
            height: 50.0,
        };
        assert!(matches!(model.clip(), Err(AppError::Render { .. })));

        let empty = BoxModel {
            margin: vec![0.0; 8],
            width: 0.0,
            height: 50.0,
        };
        assert!(empty.clip().is_err());
    }

    #[test]
    fn test_box_model_decodes_devtools_shape() {
        let raw = r#"{"content":[0,0,1,0,1,1,0,1],"margin":[8,16,808,16,808,416,8,416],"width":800,"height":400}"#;
        let model: BoxModel = serde_json::from_str(raw).unwrap();
        assert_eq!(model.width, 800.0);
        assert_eq!(model.clip().unwrap().y, 16.0);
    }
}
