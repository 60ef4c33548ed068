//! Model descriptor handed over by the external model loader.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::bounds::BoundingBox;
use crate::error::{SliceError, SliceResult};
use crate::Scalar;

/// Shading language the model's material function is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShadingLanguage {
    /// An empty tag also selects GLSL.
    #[default]
    #[serde(alias = "")]
    Glsl,
    Wgsl,
}

/// A named material; ordinals are 1-based and follow declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Material {
    pub ordinal: usize,
    pub name: String,
}

impl Material {
    /// Display name made file-name friendly: spaces become hyphens, nothing else changes.
    pub fn sanitized_name(&self) -> String {
        self.name.replace(' ', "-")
    }
}

/// How a model packs its per-material densities into one shader return value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialLayout {
    /// Up to four materials in a 4-vector (`mainModel4`).
    Vec4,
    /// Up to nine materials in a 3x3 matrix (`mainModel9`).
    Mat3,
    /// Up to sixteen materials in a 4x4 matrix (`mainModel16`).
    Mat4,
}

impl MaterialLayout {
    pub const MAX_MATERIALS: usize = 16;

    pub fn for_material_count(count: usize) -> SliceResult<Self> {
        match count {
            0 => Err(SliceError::NoMaterials),
            1..=4 => Ok(Self::Vec4),
            5..=9 => Ok(Self::Mat3),
            10..=16 => Ok(Self::Mat4),
            n => Err(SliceError::UnsupportedMaterialCount(n)),
        }
    }

    pub const fn channel_count(self) -> usize {
        match self {
            Self::Vec4 => 4,
            Self::Mat3 => 9,
            Self::Mat4 => 16,
        }
    }

    pub const fn entry_point(self) -> &'static str {
        match self {
            Self::Vec4 => "mainModel4",
            Self::Mat3 => "mainModel9",
            Self::Mat4 => "mainModel16",
        }
    }
}

/// Loaded model: bounds, materials, shading language and the material-function source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub min: Vec<Scalar>,
    pub max: Vec<Scalar>,
    pub materials: Vec<String>,
    #[serde(default)]
    pub language: ShadingLanguage,
    #[serde(default)]
    pub shader: String,
}

impl ModelDescriptor {
    pub fn from_json(json: &str) -> SliceResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> SliceResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| SliceError::io(path, e))?;
        Self::from_json(&json)
    }

    pub fn bounding_box(&self) -> SliceResult<BoundingBox> {
        BoundingBox::from_slices(&self.min, &self.max)
    }

    pub fn num_materials(&self) -> usize {
        self.materials.len()
    }

    /// Returns the material with the given 1-based ordinal.
    pub fn material(&self, ordinal: usize) -> Option<Material> {
        let name = self.materials.get(ordinal.checked_sub(1)?)?;
        Some(Material {
            ordinal,
            name: name.clone(),
        })
    }

    pub fn materials(&self) -> impl Iterator<Item = Material> + '_ {
        self.materials
            .iter()
            .enumerate()
            .map(|(i, name)| Material {
                ordinal: i + 1,
                name: name.clone(),
            })
    }

    pub fn material_layout(&self) -> SliceResult<MaterialLayout> {
        MaterialLayout::for_material_count(self.materials.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_descriptor_with_defaults() {
        let model = ModelDescriptor::from_json(
            r#"{"min": [0, 0, 0], "max": [3, 3, 3], "materials": ["test material"]}"#,
        )
        .unwrap();
        assert_eq!(model.language, ShadingLanguage::Glsl);
        assert!(model.shader.is_empty());
        assert_eq!(model.num_materials(), 1);
        assert!(model.bounding_box().is_ok());
    }

    #[test]
    fn empty_language_tag_means_glsl() {
        let model = ModelDescriptor::from_json(
            r#"{"min": [0, 0, 0], "max": [1, 1, 1], "materials": ["a"], "language": ""}"#,
        )
        .unwrap();
        assert_eq!(model.language, ShadingLanguage::Glsl);

        let model = ModelDescriptor::from_json(
            r#"{"min": [0, 0, 0], "max": [1, 1, 1], "materials": ["a"], "language": "wgsl"}"#,
        )
        .unwrap();
        assert_eq!(model.language, ShadingLanguage::Wgsl);
    }

    #[test]
    fn materials_are_one_based() {
        let model = ModelDescriptor {
            min: vec![0.0; 3],
            max: vec![1.0; 3],
            materials: vec!["PLA".into(), "dissolvable support".into()],
            language: ShadingLanguage::Wgsl,
            shader: String::new(),
        };
        assert_eq!(model.material(0), None);
        assert_eq!(model.material(3), None);
        let second = model.material(2).unwrap();
        assert_eq!(second.ordinal, 2);
        assert_eq!(second.sanitized_name(), "dissolvable-support");
        let ordinals: Vec<usize> = model.materials().map(|m| m.ordinal).collect();
        assert_eq!(ordinals, vec![1, 2]);
    }

    #[test]
    fn sanitizing_only_touches_spaces() {
        let material = Material {
            ordinal: 1,
            name: "a b_c/d.e".into(),
        };
        assert_eq!(material.sanitized_name(), "a-b_c/d.e");
    }

    #[test]
    fn layout_follows_material_count() {
        assert!(matches!(
            MaterialLayout::for_material_count(0),
            Err(SliceError::NoMaterials)
        ));
        assert_eq!(MaterialLayout::for_material_count(4).unwrap(), MaterialLayout::Vec4);
        assert_eq!(MaterialLayout::for_material_count(5).unwrap(), MaterialLayout::Mat3);
        assert_eq!(MaterialLayout::for_material_count(9).unwrap(), MaterialLayout::Mat3);
        assert_eq!(MaterialLayout::for_material_count(16).unwrap(), MaterialLayout::Mat4);
        assert!(matches!(
            MaterialLayout::for_material_count(17),
            Err(SliceError::UnsupportedMaterialCount(17))
        ));
    }
}
