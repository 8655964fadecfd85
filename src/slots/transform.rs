//! Per-instance transform record and its packed control cells.
//!
//! Each slot holds 16 `f32` cells in column-major order (the same order as
//! [`Mat4::to_cols_array`]). The affine part carries scale, rotation and
//! world position. The otherwise-unused bottom row carries instance
//! control data read by the vertex shader:
//!
//! | cell | meaning                                      |
//! |------|----------------------------------------------|
//! | 3    | auxiliary, passed through untouched          |
//! | 7    | alpha fade start distance                    |
//! | 11   | alpha fade end distance                      |
//! | 15   | visibility / rotation mode (`< 0` = culled)  |
//!
//! The culled value doubles as the primitive-culling sentinel in the
//! shader, so tombstoning a slot hides it on the next draw without a
//! separate compaction pass.

use bytemuck::{Pod, Zeroable};
use glam::{EulerRot, Mat4, Quat, Vec2, Vec3};

/// Index of the visibility / rotation mode cell.
pub const VISIBILITY_CELL: usize = 15;
/// Index of the alpha fade start cell.
pub const FADE_START_CELL: usize = 7;
/// Index of the alpha fade end cell.
pub const FADE_END_CELL: usize = 11;
/// Value written into the visibility cell of a culled slot.
pub const CULLED_SENTINEL: f32 = -1.0;

/// How an instance is oriented at draw time, or whether it is drawn at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisibilityRotation {
    /// Not drawn. Tombstoned slots always read back as culled.
    Culled,
    /// Drawn with the stored rotation.
    #[default]
    Static,
    /// Rotated about the vertical axis to face the viewer.
    FaceAzimuth,
    /// Rotated in azimuth and elevation to face the viewer.
    FaceAzimuthElevation,
}

impl VisibilityRotation {
    /// Cell value understood by the vertex shader.
    #[must_use]
    pub fn cell_value(self) -> f32 {
        match self {
            Self::Culled => CULLED_SENTINEL,
            Self::Static => 0.0,
            Self::FaceAzimuth => 1.0,
            Self::FaceAzimuthElevation => 2.0,
        }
    }

    /// Decode a visibility cell. Any negative value is culled; values the
    /// shader does not know fall back to static.
    #[must_use]
    pub fn from_cell(value: f32) -> Self {
        if value < 0.0 {
            Self::Culled
        } else if value == 1.0 {
            Self::FaceAzimuth
        } else if value == 2.0 {
            Self::FaceAzimuthElevation
        } else {
            Self::Static
        }
    }

    /// Returns `true` for [`VisibilityRotation::Culled`].
    #[must_use]
    pub fn is_culled(self) -> bool {
        matches!(self, Self::Culled)
    }
}

/// One slot's GPU record. Must match the WGSL `InstanceTransform` layout
/// (`mat4x4<f32>`).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceTransform {
    /// Column-major matrix cells.
    pub cells: [f32; 16],
}

impl InstanceTransform {
    /// The soft-miss value: zero everywhere except a culled visibility cell.
    pub const CULLED: Self = Self {
        cells: [
            0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, CULLED_SENTINEL,
        ],
    };

    /// Wrap a matrix. All 16 cells are copied bit for bit.
    #[must_use]
    pub fn from_mat4(matrix: Mat4) -> Self {
        Self {
            cells: matrix.to_cols_array(),
        }
    }

    /// The record as a matrix, control cells included.
    #[must_use]
    pub fn to_mat4(&self) -> Mat4 {
        Mat4::from_cols_array(&self.cells)
    }

    /// World position (translation column).
    #[must_use]
    pub fn position(&self) -> Vec3 {
        Vec3::new(self.cells[12], self.cells[13], self.cells[14])
    }

    /// Decoded visibility / rotation mode.
    #[must_use]
    pub fn visibility(&self) -> VisibilityRotation {
        VisibilityRotation::from_cell(self.cells[VISIBILITY_CELL])
    }

    /// Overwrite only the visibility cell.
    pub fn set_visibility(&mut self, mode: VisibilityRotation) {
        self.cells[VISIBILITY_CELL] = mode.cell_value();
    }

    /// Returns `true` when the shader will discard this instance.
    #[must_use]
    pub fn is_culled(&self) -> bool {
        self.cells[VISIBILITY_CELL] < 0.0
    }

    /// Alpha fade distances, if any were packed.
    #[must_use]
    pub fn alpha_fade(&self) -> Option<AlphaFade> {
        let start = self.cells[FADE_START_CELL];
        let end = self.cells[FADE_END_CELL];
        if start == 0.0 && end == 0.0 {
            None
        } else {
            Some(AlphaFade { start, end })
        }
    }

    /// Pack (or clear) the alpha fade distances.
    pub fn set_alpha_fade(&mut self, fade: Option<AlphaFade>) {
        let fade = fade.unwrap_or(AlphaFade {
            start: 0.0,
            end: 0.0,
        });
        self.cells[FADE_START_CELL] = fade.start;
        self.cells[FADE_END_CELL] = fade.end;
    }
}

impl From<Mat4> for InstanceTransform {
    fn from(matrix: Mat4) -> Self {
        Self::from_mat4(matrix)
    }
}

/// Eye-distance band over which an instance fades in or out.
///
/// `start < end` fades in as the viewer approaches; `start > end` fades out.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlphaFade {
    /// Distance at which the fade begins.
    pub start: f32,
    /// Distance at which the fade completes.
    pub end: f32,
}

/// Placement of a flat, textured quad in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BitmapPlacement {
    /// Quad centre in world space.
    pub position: Vec3,
    /// Quad width and height in world units.
    pub size: Vec2,
    /// XYZ euler rotation in radians.
    pub rotation: Vec3,
    /// Draw-time orientation mode.
    pub mode: VisibilityRotation,
    /// Optional distance fade.
    pub alpha_fade: Option<AlphaFade>,
}

impl Default for BitmapPlacement {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            size: Vec2::ONE,
            rotation: Vec3::ZERO,
            mode: VisibilityRotation::Static,
            alpha_fade: None,
        }
    }
}

impl BitmapPlacement {
    /// Static quad of the given size at `position`.
    #[must_use]
    pub fn at(position: Vec3, size: Vec2) -> Self {
        Self {
            position,
            size,
            ..Self::default()
        }
    }

    /// Same placement with a different orientation mode.
    #[must_use]
    pub fn with_mode(mut self, mode: VisibilityRotation) -> Self {
        self.mode = mode;
        self
    }

    /// Same placement with an alpha fade band.
    #[must_use]
    pub fn with_alpha_fade(mut self, start: f32, end: f32) -> Self {
        self.alpha_fade = Some(AlphaFade { start, end });
        self
    }

    /// Compose scale, rotation and translation and pack the fade cells.
    ///
    /// The visibility cell is left at the affine default; the slot store
    /// writes it from [`BitmapPlacement::mode`] on add.
    #[must_use]
    pub fn to_transform(&self) -> InstanceTransform {
        let rotation = Quat::from_euler(
            EulerRot::XYZ,
            self.rotation.x,
            self.rotation.y,
            self.rotation.z,
        );
        let scale = Vec3::new(self.size.x, self.size.y, 1.0);
        let mut transform = InstanceTransform::from_mat4(
            Mat4::from_scale_rotation_translation(
                scale,
                rotation,
                self.position,
            ),
        );
        transform.set_alpha_fade(self.alpha_fade);
        transform
    }
}
