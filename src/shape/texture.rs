use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::geom::HeightField;

/// Where a texture is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TextureSample {
    /// World-space hit point.
    pub p: [f64; 3],
    pub uv: [f64; 2],
}

/// A scalar texture, e.g. an alpha mask.
pub trait FloatTexture: fmt::Debug + Send + Sync {
    fn evaluate(&self, at: &TextureSample) -> f64;
}

/// Named float textures declared by the scene.
pub type TextureRegistry = HashMap<String, Arc<dyn FloatTexture>>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantTexture {
    value: f64,
}

impl ConstantTexture {
    #[must_use]
    pub const fn new(value: f64) -> Self {
        Self { value }
    }

    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }
}

impl FloatTexture for ConstantTexture {
    fn evaluate(&self, _at: &TextureSample) -> f64 {
        self.value
    }
}

/// Looks up a [`HeightField`] by texture coordinate, clamping into `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightFieldTexture {
    field: HeightField,
}

impl HeightFieldTexture {
    #[must_use]
    pub fn new(field: HeightField) -> Self {
        Self { field }
    }
}

impl FloatTexture for HeightFieldTexture {
    fn evaluate(&self, at: &TextureSample) -> f64 {
        let [u, v] = at.uv;
        if !u.is_finite() || !v.is_finite() {
            return 0.0;
        }
        self.field
            .sample_uv(u.clamp(0.0, 1.0), v.clamp(0.0, 1.0))
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_ignores_sample_point() {
        let tex = ConstantTexture::new(0.25);
        let at = TextureSample {
            p: [1.0, 2.0, 3.0],
            uv: [0.5, 0.5],
        };
        assert_eq!(tex.evaluate(&at), 0.25);
        assert_eq!(tex.evaluate(&TextureSample::default()), 0.25);
    }

    #[test]
    fn height_field_texture_clamps_uvs() {
        let field = HeightField::new(2, 1, vec![0.2, 0.8]).unwrap();
        let tex = HeightFieldTexture::new(field);
        let at = |u: f64| TextureSample {
            p: [0.0; 3],
            uv: [u, 0.0],
        };
        assert_eq!(tex.evaluate(&at(0.0)), 0.2);
        assert_eq!(tex.evaluate(&at(1.0)), 0.8);
        assert_eq!(tex.evaluate(&at(7.0)), 0.8);
        assert_eq!(tex.evaluate(&at(f64::NAN)), 0.0);
        assert_eq!(
            HeightFieldTexture::new(HeightField::default()).evaluate(&at(0.5)),
            0.0
        );
    }

    #[test]
    fn registry_holds_shared_handles() {
        let mut registry = TextureRegistry::new();
        registry.insert("half".to_string(), Arc::new(ConstantTexture::new(0.5)));
        let tex = Arc::clone(&registry["half"]);
        assert_eq!(tex.evaluate(&TextureSample::default()), 0.5);
    }
}
