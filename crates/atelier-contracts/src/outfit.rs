use serde::{Deserialize, Serialize};

use crate::media::ImagePayload;

/// Number of poses in one lookbook.
pub const POSE_COUNT: usize = 4;

/// Clothing categories a user may fill, in attachment order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GarmentSlot {
    Top,
    Bottom,
    #[serde(alias = "shoe")]
    Shoes,
}

impl GarmentSlot {
    pub const ALL: [GarmentSlot; 3] = [GarmentSlot::Top, GarmentSlot::Bottom, GarmentSlot::Shoes];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Top => "top",
            Self::Bottom => "bottom",
            Self::Shoes => "shoes",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "top" | "tops" => Some(Self::Top),
            "bottom" | "bottoms" => Some(Self::Bottom),
            "shoe" | "shoes" | "footwear" => Some(Self::Shoes),
            _ => None,
        }
    }
}

impl std::fmt::Display for GarmentSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Garments {
    pub top: Option<ImagePayload>,
    pub bottom: Option<ImagePayload>,
    pub shoes: Option<ImagePayload>,
}

impl Garments {
    pub fn get(&self, slot: GarmentSlot) -> Option<&ImagePayload> {
        match slot {
            GarmentSlot::Top => self.top.as_ref(),
            GarmentSlot::Bottom => self.bottom.as_ref(),
            GarmentSlot::Shoes => self.shoes.as_ref(),
        }
    }

    pub fn set(&mut self, slot: GarmentSlot, payload: Option<ImagePayload>) {
        match slot {
            GarmentSlot::Top => self.top = payload,
            GarmentSlot::Bottom => self.bottom = payload,
            GarmentSlot::Shoes => self.shoes = payload,
        }
    }

    /// Present garments in fixed slot order.
    pub fn present(&self) -> impl Iterator<Item = (GarmentSlot, &ImagePayload)> {
        GarmentSlot::ALL
            .into_iter()
            .filter_map(move |slot| self.get(slot).map(|payload| (slot, payload)))
    }

    pub fn is_empty(&self) -> bool {
        self.present().next().is_none()
    }
}

/// One of the four fixed body orientations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoseSpec {
    pub index: usize,
    pub name: &'static str,
    /// Caption drawn under the cell in the lookbook grid.
    pub label: &'static str,
    pub slug: &'static str,
    pub instruction: &'static str,
}

pub static POSES: [PoseSpec; POSE_COUNT] = [
    PoseSpec {
        index: 0,
        name: "Pose 1 - Frontal",
        label: "Frontal",
        slug: "frontal",
        instruction: "POSE: Standing straight facing the camera directly
       - Body facing forward, shoulders square to camera
       - Arms relaxed at sides or one hand on hip
       - Head straight, looking directly at camera
       - Confident and natural stance
       - Weight evenly distributed on both feet

       FRAMING: Full body shot - head to toes visible, centered in frame",
    },
    PoseSpec {
        index: 1,
        name: "Pose 2 - Three Quarter",
        label: "3/4 View",
        slug: "three-quarter",
        instruction: "POSE: Body turned 45 degrees, face towards camera
       - Body angled slightly to the side (3/4 view)
       - Face turned towards camera with gentle expression
       - One hand on hip or touching hair elegantly
       - Relaxed but poised posture
       - Shows outfit from a flattering angle

       FRAMING: Full body shot - entire person visible from head to feet, well centered",
    },
    PoseSpec {
        index: 2,
        name: "Pose 3 - Profile",
        label: "Profile",
        slug: "profile",
        instruction: "POSE: Side profile, elegant stance
       - Body in profile (side view), head turned slightly to show face
       - One leg slightly forward for dynamic look
       - Arms in graceful position (one hand on hip or both relaxed)
       - Shows silhouette and outfit lines beautifully
       - Elegant and fashion-forward

       FRAMING: Full body profile - complete side view, head to feet visible",
    },
    PoseSpec {
        index: 3,
        name: "Pose 4 - Dynamic",
        label: "Dynamic",
        slug: "dynamic",
        instruction: "POSE: Dynamic movement, walking or turning
       - Captured mid-movement (walking towards camera or turning)
       - Natural movement with energy
       - Hair and clothes showing slight motion
       - One foot forward, confident stride
       - Engaging and lively expression

       FRAMING: Full body shot - entire person in frame, no cropping",
    },
];

pub fn pose(index: usize) -> Option<&'static PoseSpec> {
    POSES.get(index)
}

pub fn pose_labels() -> [&'static str; POSE_COUNT] {
    POSES.map(|pose| pose.label)
}

/// Everything one provider call needs. Built per call and dropped after it.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub person: &'a ImagePayload,
    pub garments: &'a Garments,
    pub pose: &'static PoseSpec,
}

#[cfg(test)]
mod tests {
    use super::{pose, pose_labels, GarmentSlot, Garments, POSES};
    use crate::media::ImagePayload;

    #[test]
    fn poses_are_indexed_in_order() {
        for (idx, spec) in POSES.iter().enumerate() {
            assert_eq!(spec.index, idx);
        }
        assert!(pose(4).is_none());
        assert_eq!(pose_labels(), ["Frontal", "3/4 View", "Profile", "Dynamic"]);
    }

    #[test]
    fn present_garments_follow_slot_order() {
        let mut garments = Garments::default();
        assert!(garments.is_empty());
        garments.set(
            GarmentSlot::Shoes,
            Some(ImagePayload::new(vec![1], "image/png", "shoes")),
        );
        garments.set(
            GarmentSlot::Top,
            Some(ImagePayload::new(vec![2], "image/png", "top")),
        );
        let order: Vec<GarmentSlot> = garments.present().map(|(slot, _)| slot).collect();
        assert_eq!(order, vec![GarmentSlot::Top, GarmentSlot::Shoes]);
    }

    #[test]
    fn slot_parsing_accepts_catalog_spelling() -> anyhow::Result<()> {
        assert_eq!(GarmentSlot::parse("shoe"), Some(GarmentSlot::Shoes));
        assert_eq!(GarmentSlot::parse("Bottoms"), Some(GarmentSlot::Bottom));
        assert_eq!(GarmentSlot::parse("hat"), None);
        let parsed: GarmentSlot = serde_json::from_str("\"shoe\"")?;
        assert_eq!(parsed, GarmentSlot::Shoes);
        Ok(())
    }
}
