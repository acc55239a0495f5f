//! Timestamp label drawn in the lower-left corner of each frame.

use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use chrono::{DateTime, Utc};
use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_text_mut;

/// Label text color.
pub const LABEL_COLOR: Rgba<u8> = Rgba([128, 128, 128, 255]);

/// Why a font could not be used for labels.
#[derive(Debug, thiserror::Error)]
pub enum LabelFontError {
    #[error("Cannot read font {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid font {path}")]
    Invalid { path: PathBuf },
}

/// Draws the frame timestamp and an optional caption line.
pub struct LabelRenderer {
    font: FontVec,
    scale: PxScale,
    caption: Option<String>,
}

impl LabelRenderer {
    /// Load a TrueType/OpenType font from disk.
    pub fn load(path: &Path, size: f32, caption: Option<String>) -> Result<Self, LabelFontError> {
        let bytes = std::fs::read(path).map_err(|source| LabelFontError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let font = FontVec::try_from_vec(bytes).map_err(|_| LabelFontError::Invalid {
            path: path.to_path_buf(),
        })?;
        Ok(Self {
            font,
            scale: PxScale::from(size.max(1.0)),
            caption,
        })
    }

    /// Text lines for a frame, top to bottom.
    pub fn lines(&self, timestamp: DateTime<Utc>) -> Vec<String> {
        let mut lines = vec![label_text(timestamp)];
        if let Some(caption) = &self.caption {
            lines.push(caption.clone());
        }
        lines
    }

    /// Draw the label block onto `image`, stacked up from the bottom edge.
    pub fn draw(&self, image: &mut RgbaImage, timestamp: DateTime<Utc>) {
        let lines = self.lines(timestamp);
        let line_height = (self.scale.y * 1.25).ceil() as i32;
        let x = (image.width() / 32) as i32;
        let bottom = image.height() as i32 - image.height() as i32 / 12;

        let top = bottom - line_height * lines.len() as i32;
        for (i, line) in lines.iter().enumerate() {
            let y = (top + line_height * i as i32).max(0);
            draw_text_mut(image, LABEL_COLOR, x, y, self.scale, &self.font, line);
        }
    }
}

/// `MUF 2024-03-02 03:10 UTC`
pub fn label_text(timestamp: DateTime<Utc>) -> String {
    format!("MUF {}", timestamp.format("%Y-%m-%d %H:%M UTC"))
}
