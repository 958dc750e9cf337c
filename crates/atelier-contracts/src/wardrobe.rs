use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::outfit::GarmentSlot;

/// Longest label kept for a user-supplied garment.
pub const CUSTOM_LABEL_MAX_CHARS: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WardrobeItem {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: GarmentSlot,
    pub reference: String,
    pub label: String,
}

struct SampleItem {
    id: u64,
    kind: GarmentSlot,
    reference: &'static str,
    label: &'static str,
}

const SAMPLE_CATALOG: &[SampleItem] = &[
    SampleItem {
        id: 1,
        kind: GarmentSlot::Top,
        reference: "clothes/red-shirt-1.png",
        label: "Red Long Sleeve",
    },
    SampleItem {
        id: 2,
        kind: GarmentSlot::Top,
        reference: "clothes/red-shirt-2.png",
        label: "Red Crewneck",
    },
    SampleItem {
        id: 3,
        kind: GarmentSlot::Top,
        reference: "clothes/black-dress-1.png",
        label: "Black Dress",
    },
    SampleItem {
        id: 4,
        kind: GarmentSlot::Top,
        reference: "clothes/black-dress-2.png",
        label: "Black Flare Dress",
    },
    SampleItem {
        id: 5,
        kind: GarmentSlot::Top,
        reference: "clothes/grey-coat-1.png",
        label: "Grey Wool Coat",
    },
    SampleItem {
        id: 6,
        kind: GarmentSlot::Top,
        reference: "clothes/grey-coat-2.png",
        label: "Grey Long Coat",
    },
    SampleItem {
        id: 7,
        kind: GarmentSlot::Bottom,
        reference: "https://images.unsplash.com/photo-1542272454315-4c01d7abdf4a?auto=format&fit=crop&w=600&q=80",
        label: "Dark Wash Jeans",
    },
    SampleItem {
        id: 8,
        kind: GarmentSlot::Bottom,
        reference: "https://images.unsplash.com/photo-1582552938357-32b906df40cb?auto=format&fit=crop&w=600&q=80",
        label: "Denim Shorts",
    },
    SampleItem {
        id: 9,
        kind: GarmentSlot::Shoes,
        reference: "https://images.unsplash.com/photo-1542291026-7eec264c27ff?auto=format&fit=crop&w=600&q=80",
        label: "Red Sneakers",
    },
    SampleItem {
        id: 10,
        kind: GarmentSlot::Shoes,
        reference: "https://images.unsplash.com/photo-1560769629-975e13f01b35?auto=format&fit=crop&w=600&q=80",
        label: "Leather Shoes",
    },
    SampleItem {
        id: 11,
        kind: GarmentSlot::Shoes,
        reference: "https://images.unsplash.com/photo-1595950653106-6c9ebd614d3a?auto=format&fit=crop&w=600&q=80",
        label: "Sport Runners",
    },
];

/// The built-in catalog. It is never modified; deletions are recorded as
/// overrides instead.
pub fn sample_catalog() -> Vec<WardrobeItem> {
    SAMPLE_CATALOG
        .iter()
        .map(|item| WardrobeItem {
            id: item.id,
            kind: item.kind,
            reference: item.reference.to_string(),
            label: item.label.to_string(),
        })
        .collect()
}

fn is_sample_id(id: u64) -> bool {
    SAMPLE_CATALOG.iter().any(|item| item.id == id)
}

/// User edits layered over the catalog: custom garments plus the ids the
/// user removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WardrobeOverrides {
    #[serde(default)]
    pub custom: Vec<WardrobeItem>,
    #[serde(default)]
    pub deleted: BTreeSet<u64>,
}

/// Catalog + overrides, persisted to `wardrobe.json`.
#[derive(Debug, Clone)]
pub struct Wardrobe {
    path: PathBuf,
    overrides: WardrobeOverrides,
}

impl Wardrobe {
    /// Load overrides from `path`. A missing file means no overrides; a
    /// corrupt one is reported rather than silently discarded.
    pub fn load(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let overrides = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|err| {
                anyhow::anyhow!("failed to parse wardrobe file {}: {err}", path.display())
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => WardrobeOverrides::default(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self { path, overrides })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn overrides(&self) -> &WardrobeOverrides {
        &self.overrides
    }

    /// Samples first, then custom garments, without anything deleted.
    pub fn items(&self) -> Vec<WardrobeItem> {
        sample_catalog()
            .into_iter()
            .chain(self.overrides.custom.iter().cloned())
            .filter(|item| !self.overrides.deleted.contains(&item.id))
            .collect()
    }

    pub fn filter(&self, kind: Option<GarmentSlot>) -> Vec<WardrobeItem> {
        self.items()
            .into_iter()
            .filter(|item| kind.map(|kind| item.kind == kind).unwrap_or(true))
            .collect()
    }

    pub fn get(&self, id: u64) -> Option<WardrobeItem> {
        self.items().into_iter().find(|item| item.id == id)
    }

    /// Add a user garment. The label is trimmed to
    /// [`CUSTOM_LABEL_MAX_CHARS`]; the id is a millisecond timestamp, bumped
    /// past every existing id so rapid additions never collide.
    pub fn add_custom(
        &mut self,
        kind: GarmentSlot,
        reference: impl Into<String>,
        label: &str,
    ) -> anyhow::Result<WardrobeItem> {
        let label: String = label.trim().chars().take(CUSTOM_LABEL_MAX_CHARS).collect();
        if label.is_empty() {
            anyhow::bail!("wardrobe label must not be empty");
        }
        let now = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
        let floor = self
            .overrides
            .custom
            .iter()
            .map(|item| item.id + 1)
            .chain(SAMPLE_CATALOG.iter().map(|item| item.id + 1))
            .max()
            .unwrap_or(1);
        let item = WardrobeItem {
            id: now.max(floor),
            kind,
            reference: reference.into(),
            label,
        };
        self.overrides.custom.push(item.clone());
        self.save()?;
        Ok(item)
    }

    /// Remove an item from view. Custom garments are dropped outright;
    /// samples are hidden through the deleted set. Returns the removed item.
    pub fn delete(&mut self, id: u64) -> anyhow::Result<Option<WardrobeItem>> {
        let Some(item) = self.get(id) else {
            return Ok(None);
        };
        if is_sample_id(id) {
            self.overrides.deleted.insert(id);
        } else {
            self.overrides.custom.retain(|custom| custom.id != id);
        }
        self.save()?;
        Ok(Some(item))
    }

    pub fn restore_samples(&mut self) -> anyhow::Result<()> {
        if self.overrides.deleted.is_empty() {
            return Ok(());
        }
        self.overrides.deleted.clear();
        self.save()
    }

    fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&self.overrides)?)?;
        Ok(())
    }
}

/// Label derived from a file name: extension stripped, capped in length.
pub fn label_from_file_name(file_name: &str) -> String {
    let stem = match file_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => file_name,
    };
    stem.chars().take(CUSTOM_LABEL_MAX_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::{label_from_file_name, sample_catalog, Wardrobe};
    use crate::outfit::GarmentSlot;

    #[test]
    fn deleting_a_sample_leaves_catalog_untouched() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut wardrobe = Wardrobe::load(temp.path().join("wardrobe.json"))?;
        let before = sample_catalog();

        let removed = wardrobe.delete(3)?;
        assert_eq!(removed.map(|item| item.label), Some("Black Dress".to_string()));
        assert!(wardrobe.get(3).is_none());
        assert_eq!(sample_catalog(), before);

        let reloaded = Wardrobe::load(wardrobe.path())?;
        assert!(reloaded.get(3).is_none());
        assert!(reloaded.overrides().deleted.contains(&3));
        Ok(())
    }

    #[test]
    fn custom_items_persist_and_delete() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("wardrobe.json");
        let mut wardrobe = Wardrobe::load(&path)?;
        let first = wardrobe.add_custom(GarmentSlot::Top, "/tmp/linen.png", "Linen Shirt")?;
        let second = wardrobe.add_custom(GarmentSlot::Top, "/tmp/linen2.png", "Linen Shirt")?;
        assert_ne!(first.id, second.id);

        let reloaded = Wardrobe::load(&path)?;
        assert_eq!(reloaded.get(first.id), Some(first.clone()));

        let mut reloaded = reloaded;
        assert_eq!(reloaded.delete(first.id)?, Some(first.clone()));
        assert!(reloaded.get(first.id).is_none());
        assert!(reloaded.overrides().deleted.is_empty());
        Ok(())
    }

    #[test]
    fn filter_by_kind() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let wardrobe = Wardrobe::load(temp.path().join("wardrobe.json"))?;
        let shoes = wardrobe.filter(Some(GarmentSlot::Shoes));
        assert_eq!(shoes.len(), 3);
        assert!(shoes.iter().all(|item| item.kind == GarmentSlot::Shoes));
        assert_eq!(wardrobe.filter(None).len(), sample_catalog().len());
        Ok(())
    }

    #[test]
    fn restore_brings_samples_back() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut wardrobe = Wardrobe::load(temp.path().join("wardrobe.json"))?;
        wardrobe.delete(9)?;
        wardrobe.restore_samples()?;
        assert!(wardrobe.get(9).is_some());
        Ok(())
    }

    #[test]
    fn unknown_id_deletes_nothing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("wardrobe.json");
        let mut wardrobe = Wardrobe::load(&path)?;
        assert_eq!(wardrobe.delete(424242)?, None);
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn labels_come_from_file_stems() {
        assert_eq!(label_from_file_name("summer-dress.png"), "summer-dress");
        assert_eq!(
            label_from_file_name("an-extremely-long-garment-name.jpg"),
            "an-extremely-long-ga"
        );
        assert_eq!(label_from_file_name(".hidden"), ".hidden");
    }
}
