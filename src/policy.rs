use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Tunable classification data for the transform stages. Every field has a
/// built-in default so a policy file only needs to list what it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformPolicy {
    pub header_scoring: HeaderScoring,
    pub header_templates: Vec<HeaderTemplate>,
    pub corruption_fixes: Vec<CorruptionFix>,
    pub known_references: Vec<KnownReference>,
    pub slug_max_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderScoring {
    /// Only the first `rows_considered` rows may be promoted.
    pub rows_considered: usize,
    pub threshold: i32,
    pub header_cell: i32,
    pub colspan: i32,
    pub rowspan: i32,
    pub bold_marker: i32,
    pub unit_pattern: i32,
    pub low_numeric_density: i32,
    pub numeric_ratio_max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderTemplate {
    pub name: String,
    /// The first body row must contain one of these markers.
    pub first_row_markers: Vec<String>,
    pub min_stacked_cells: usize,
    /// Lower-case text the first stacked cell must contain, if set.
    pub stacked_cell_marker: Option<String>,
    pub labels: Vec<String>,
    /// One extra label per stacked cell, `{n}` replaced by its 1-based index.
    pub per_stacked_label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorruptionFix {
    pub pattern: String,
    pub replacement: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownReference {
    pub needle: String,
    pub href: String,
    pub label: String,
}

impl Default for TransformPolicy {
    fn default() -> Self {
        Self {
            header_scoring: HeaderScoring::default(),
            header_templates: default_header_templates(),
            corruption_fixes: vec![
                CorruptionFix {
                    pattern: "Â¿".to_string(),
                    replacement: ">".to_string(),
                },
                CorruptionFix {
                    pattern: r"(\d+)296\b".to_string(),
                    replacement: "${1}".to_string(),
                },
            ],
            known_references: default_known_references(),
            slug_max_len: 60,
        }
    }
}

impl Default for HeaderScoring {
    fn default() -> Self {
        Self {
            rows_considered: 5,
            threshold: 3,
            header_cell: 5,
            colspan: 3,
            rowspan: 2,
            bold_marker: 4,
            unit_pattern: 3,
            low_numeric_density: 2,
            numeric_ratio_max: 0.3,
        }
    }
}

impl Default for HeaderTemplate {
    fn default() -> Self {
        Self {
            name: String::new(),
            first_row_markers: Vec::new(),
            min_stacked_cells: 0,
            stacked_cell_marker: None,
            labels: Vec::new(),
            per_stacked_label: None,
        }
    }
}

fn default_header_templates() -> Vec<HeaderTemplate> {
    let stage_markers = vec!["Stage 1".to_string(), "Stage1".to_string()];
    vec![
        HeaderTemplate {
            name: "hierarchical-vision-stages".to_string(),
            first_row_markers: stage_markers.clone(),
            min_stacked_cells: 4,
            stacked_cell_marker: Some("dim".to_string()),
            labels: ["Stage", "Downsample Rate", "Swin-T", "Swin-S", "Swin-B", "Swin-L"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            per_stacked_label: None,
        },
        HeaderTemplate {
            name: "model-comparison".to_string(),
            first_row_markers: stage_markers,
            min_stacked_cells: 4,
            stacked_cell_marker: None,
            labels: vec!["Index".to_string(), "Scale".to_string()],
            per_stacked_label: Some("Model {n}".to_string()),
        },
    ]
}

fn default_known_references() -> Vec<KnownReference> {
    let entries: [(&str, &str, &str); 12] = [
        (
            "transposed convolution",
            "Chapter_15_Lecture_15_Image_Segmentation.html#bridging-to-transposed-convolution",
            "§15.2",
        ),
        (
            "deconvolution",
            "Chapter_15_Lecture_15_Image_Segmentation.html#bridging-to-transposed-convolution",
            "§15.2",
        ),
        (
            "u-net",
            "Chapter_15_Lecture_15_Image_Segmentation.html#enrichment-unet-architecture-for-image-segmentation",
            "§15.6",
        ),
        (
            "batch normalization",
            "Chapter_7_Lecture_7_Convolutional_Networks.html#batch-normalization",
            "§7.14",
        ),
        (
            "layer normalization",
            "Chapter_7_Lecture_7_Convolutional_Networks.html#alternative-normalization-methods-ln-in-gn-",
            "§7.14.6",
        ),
        (
            "positional encoding",
            "Chapter_17_Lecture_17_Attention.html#positional-encoding",
            "§17.4",
        ),
        (
            "vision transformer",
            "Chapter_18_Lecture_18_Vision_Transformers.html",
            "§18",
        ),
        (
            "residual connection",
            "Chapter_8_Lecture_8_CNN_Architectures_I.html#the-rise-of-residual-networks-resnets",
            "§8.5",
        ),
        (
            "backpropagation",
            "Chapter_6_Lecture_6_Backpropagation.html",
            "§6",
        ),
        (
            "object detection",
            "Chapter_13_Lecture_13_Object_Detection.html",
            "§13",
        ),
        (
            "autoencoder",
            "Chapter_19_Lecture_19_Generative_Models_I.html",
            "§19",
        ),
        (
            "diffusion",
            "Chapter_20_Lecture_20_Generative_Models_II.html",
            "§20",
        ),
    ];

    entries
        .into_iter()
        .map(|(needle, href, label)| KnownReference {
            needle: needle.to_string(),
            href: href.to_string(),
            label: label.to_string(),
        })
        .collect()
}

impl TransformPolicy {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let policy: Self = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse policy file {}", path.display()))?;
        policy.check()?;

        info!(
            path = %path.display(),
            templates = policy.header_templates.len(),
            known_references = policy.known_references.len(),
            "loaded transform policy"
        );
        Ok(policy)
    }

    fn check(&self) -> Result<()> {
        if self.slug_max_len < 8 {
            bail!("slug_max_len must be at least 8 (got {})", self.slug_max_len);
        }
        if self.header_scoring.rows_considered == 0 {
            bail!("header_scoring.rows_considered must be positive");
        }
        for template in &self.header_templates {
            if template.labels.is_empty() && template.per_stacked_label.is_none() {
                bail!("header template '{}' produces no labels", template.name);
            }
        }
        for reference in &self.known_references {
            if reference.needle.trim().is_empty() {
                bail!("known reference for {} has an empty needle", reference.href);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_policy_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("policy.json");
        fs::write(&path, r#"{"header_scoring": {"threshold": 7}, "slug_max_len": 40}"#)
            .expect("write policy");

        let policy = TransformPolicy::load(Some(&path)).expect("load policy");
        assert_eq!(policy.header_scoring.threshold, 7);
        assert_eq!(policy.header_scoring.header_cell, 5);
        assert_eq!(policy.slug_max_len, 40);
        assert_eq!(policy.header_templates.len(), 2);
    }

    #[test]
    fn template_without_labels_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("policy.json");
        fs::write(&path, r#"{"header_templates": [{"name": "empty"}]}"#).expect("write policy");

        let err = TransformPolicy::load(Some(&path)).expect_err("policy should be rejected");
        assert!(err.to_string().contains("empty"));
    }
}
