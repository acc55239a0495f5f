//! AnimMUF Render Engine
//!
//! Turns an ordered [`FrameSet`](animmuf_frame_model::FrameSet) into the
//! final video in two steps:
//!
//! ```text
//! FrameSet ──┐
//!            ├── decode ── resize (Lanczos3) ── timestamp label
//! font ──────┘                                       │
//!                                                    ▼
//!                                          muf.gif (intermediate)
//!                                                    │
//!                                     converter <gif> <video>
//!                                                    │
//!                                                    ▼
//!                                                 muf.mp4
//! ```
//!
//! The converter is an opaque external program behind the [`Converter`]
//! trait; [`ConverterAdapter`] adds the output post-condition check.

pub mod assembler;
pub mod converter;
pub mod label;

pub use assembler::*;
pub use converter::*;
