use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_FILE_NAME: &str = "readingd.toml";
pub const DEFAULT_PASSING_THRESHOLD: f64 = 75.0;

/// How many categories share one transaction during an assignment request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchAtomicity {
    /// Each category commits on its own; earlier categories survive a later failure.
    #[default]
    PerCategory,
    /// The whole request commits or nothing does.
    AllOrNothing,
}

impl BatchAtomicity {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "per_category" | "perCategory" => Some(BatchAtomicity::PerCategory),
            "all_or_nothing" | "allOrNothing" => Some(BatchAtomicity::AllOrNothing),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BatchAtomicity::PerCategory => "per_category",
            BatchAtomicity::AllOrNothing => "all_or_nothing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryDef {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub locked: bool,
}

/// Ordered category skeleton copied into every new progress document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryCatalog {
    pub version: u32,
    pub categories: Vec<CategoryDef>,
}

impl Default for CategoryCatalog {
    fn default() -> Self {
        let names = [
            "Alphabet Knowledge",
            "Phonological Awareness",
            "Decoding",
            "Word Recognition",
            "Reading Comprehension",
        ];
        CategoryCatalog {
            version: 1,
            categories: names
                .iter()
                .enumerate()
                .map(|(i, name)| CategoryDef {
                    id: i as i64 + 1,
                    name: name.to_string(),
                    locked: i == names.len() - 1,
                })
                .collect(),
        }
    }
}

impl CategoryCatalog {
    pub fn get(&self, id: i64) -> Option<&CategoryDef> {
        self.categories.iter().find(|c| c.id == id)
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.categories.is_empty(), "catalog has no categories");
        let mut seen = std::collections::HashSet::new();
        for c in &self.categories {
            anyhow::ensure!(seen.insert(c.id), "duplicate catalog category id {}", c.id);
            anyhow::ensure!(!c.name.trim().is_empty(), "catalog category {} has no name", c.id);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub busy_timeout_ms: u64,
    pub default_passing_threshold: f64,
    pub batch_atomicity: BatchAtomicity,
    pub catalog: CategoryCatalog,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            busy_timeout_ms: 5000,
            default_passing_threshold: DEFAULT_PASSING_THRESHOLD,
            batch_atomicity: BatchAtomicity::PerCategory,
            catalog: CategoryCatalog::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let cfg: EngineConfig = toml::from_str(content).context("parse readingd.toml")?;
        cfg.catalog.validate()?;
        anyhow::ensure!(
            (0.0..=100.0).contains(&cfg.default_passing_threshold),
            "default_passing_threshold must be within 0..=100"
        );
        Ok(cfg)
    }

    /// Missing file means defaults; a present but broken file is an error.
    pub fn load_from_workspace(workspace: &Path) -> anyhow::Result<Self> {
        let path = workspace.join(CONFIG_FILE_NAME);
        if !path.is_file() {
            return Ok(EngineConfig::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("read {}", path.display()))?;
        Self::from_toml(&content)
    }
}
