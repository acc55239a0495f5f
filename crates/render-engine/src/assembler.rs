//! Animated GIF assembly.
//!
//! Frames are decoded, scaled to the configured canvas with Lanczos3,
//! labeled, and encoded in [`FrameSet`] order into one infinitely-looping
//! GIF. Encoding is deterministic: the same set and config always produce
//! the same bytes.

use std::path::PathBuf;

use animmuf_common::config::AssemblyConfig;
use animmuf_common::error::RenderError;
use animmuf_frame_model::{Frame, FrameSet};
use image::codecs::gif::{GifEncoder, Repeat};
use image::imageops::FilterType;
use image::{Delay, Frame as GifFrame, RgbaImage};

use crate::converter::staging_path;
use crate::label::LabelRenderer;

/// GIF quantizer speed, 1 (best) to 30 (fastest).
const GIF_SPEED: i32 = 10;

/// Result of a successful assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyOutput {
    /// The written intermediate artifact.
    pub path: PathBuf,

    pub frames_rendered: usize,

    /// Frames whose bytes could not be decoded.
    pub frames_skipped: usize,

    /// Non-fatal problems, e.g. an unusable font.
    pub warnings: Vec<String>,

    /// Whether labels were drawn.
    pub labeled: bool,
}

/// Renders a [`FrameSet`] into the intermediate animation.
#[derive(Debug, Clone)]
pub struct Assembler {
    config: AssemblyConfig,
}

impl Assembler {
    pub fn new(config: AssemblyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AssemblyConfig {
        &self.config
    }

    /// Render `frames` to `config.output_path`.
    ///
    /// The file is written next to its destination and renamed into place,
    /// so a failed run never leaves a truncated GIF behind.
    pub fn render(&self, frames: &FrameSet) -> Result<AssemblyOutput, RenderError> {
        if frames.is_empty() {
            return Err(RenderError::NoFrames);
        }

        let output = &self.config.output_path;
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RenderError::unwritable(parent, e))?;
        }

        let mut warnings = Vec::new();
        let labels = self.label_renderer(&mut warnings);

        let mut canvases = Vec::with_capacity(frames.len());
        let mut frames_skipped = 0;
        for frame in frames.frames() {
            match self.prepare(frame, labels.as_ref()) {
                Ok(canvas) => canvases.push(canvas),
                Err(err) => {
                    tracing::warn!(
                        timestamp = %frame.timestamp(),
                        source = frame.source_id(),
                        error = %err,
                        "Skipping undecodable frame"
                    );
                    warnings.push(format!("frame {} skipped: {err}", frame.key()));
                    frames_skipped += 1;
                }
            }
        }
        if canvases.is_empty() {
            return Err(RenderError::NoFrames);
        }

        let frames_rendered = canvases.len();
        let bytes = self.encode(canvases)?;

        let staging = staging_path(output);
        std::fs::write(&staging, &bytes).map_err(|e| RenderError::unwritable(&staging, e))?;
        std::fs::rename(&staging, output).map_err(|e| {
            let _ = std::fs::remove_file(&staging);
            RenderError::unwritable(output, e)
        })?;

        tracing::info!(
            path = %output.display(),
            frames = frames_rendered,
            skipped = frames_skipped,
            bytes = bytes.len(),
            "Animation written"
        );

        Ok(AssemblyOutput {
            path: output.clone(),
            frames_rendered,
            frames_skipped,
            warnings,
            labeled: labels.is_some(),
        })
    }

    fn label_renderer(&self, warnings: &mut Vec<String>) -> Option<LabelRenderer> {
        let path = self.config.font_path.as_ref()?;
        match LabelRenderer::load(path, self.config.font_size, self.config.caption.clone()) {
            Ok(renderer) => Some(renderer),
            Err(err) => {
                tracing::warn!(error = %err, "Font unavailable, rendering without labels");
                warnings.push(err.to_string());
                None
            }
        }
    }

    fn prepare(
        &self,
        frame: &Frame,
        labels: Option<&LabelRenderer>,
    ) -> Result<RgbaImage, image::ImageError> {
        let decoded = image::load_from_memory(frame.raw_bytes())?.to_rgba8();
        let mut canvas = image::imageops::resize(
            &decoded,
            self.config.width,
            self.config.height,
            FilterType::Lanczos3,
        );
        if let Some(labels) = labels {
            labels.draw(&mut canvas, frame.timestamp());
        }
        Ok(canvas)
    }

    fn encode(&self, canvases: Vec<RgbaImage>) -> Result<Vec<u8>, RenderError> {
        let encode_err = |e: image::ImageError| RenderError::Encode {
            message: e.to_string(),
        };
        let delay = Delay::from_numer_denom_ms(self.config.frame_delay_ms, 1);

        let mut bytes = Vec::new();
        {
            let mut encoder = GifEncoder::new_with_speed(&mut bytes, GIF_SPEED);
            encoder.set_repeat(Repeat::Infinite).map_err(encode_err)?;
            for canvas in canvases {
                encoder
                    .encode_frame(GifFrame::from_parts(canvas, 0, 0, delay))
                    .map_err(encode_err)?;
            }
        }
        Ok(bytes)
    }
}
