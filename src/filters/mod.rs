//! Filter primitives: fixed-size image stages whose working storage lives in a
//! budgeted [`TextureArena`].
//!
//! The chain is a closed set, so handles are an enum rather than trait
//! objects.

pub mod arena;
pub mod blur;
pub mod transform;

use image::GrayImage;

pub use arena::{Texture, TextureArena};
pub use blur::{BlurFilter, BlurParams};
pub use transform::{TransformFilter, TransformParams};

use crate::error::FrameError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn of(image: &GrayImage) -> Self {
        Self::new(image.width(), image.height())
    }

    pub fn pixels(self) -> usize {
        self.width as usize * self.height as usize
    }

    pub(crate) fn mismatch(self, input: &GrayImage) -> FrameError {
        FrameError::DimensionMismatch {
            expected_width: self.width,
            expected_height: self.height,
            actual_width: input.width(),
            actual_height: input.height(),
        }
    }
}

pub(crate) fn check_input(expected: Size, input: &GrayImage) -> Result<(), FrameError> {
    if Size::of(input) != expected {
        return Err(expected.mismatch(input));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterParams {
    Transform(TransformParams),
    Blur(BlurParams),
}

/// A configured filter stage.
pub enum FilterHandle {
    Transform(TransformFilter),
    Blur(BlurFilter),
}

impl FilterHandle {
    /// Allocate the stage's textures for inputs of `size`.
    pub fn configure(arena: &TextureArena, size: Size, params: FilterParams) -> Result<Self, FrameError> {
        Ok(match params {
            FilterParams::Transform(p) => FilterHandle::Transform(TransformFilter::configure(arena, size, p)?),
            FilterParams::Blur(p) => FilterHandle::Blur(BlurFilter::configure(arena, size, p)?),
        })
    }

    /// Run the stage. The input is never modified; the result is a new image.
    pub fn apply(&mut self, input: &GrayImage) -> Result<GrayImage, FrameError> {
        match self {
            FilterHandle::Transform(f) => f.apply(input),
            FilterHandle::Blur(f) => f.apply(input),
        }
    }

    pub fn input_size(&self) -> Size {
        match self {
            FilterHandle::Transform(f) => f.input_size(),
            FilterHandle::Blur(f) => f.size(),
        }
    }

    pub fn output_size(&self) -> Size {
        match self {
            FilterHandle::Transform(f) => f.output_size(),
            FilterHandle::Blur(f) => f.size(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FilterHandle::Transform(_) => "transform",
            FilterHandle::Blur(_) => "blur",
        }
    }
}
