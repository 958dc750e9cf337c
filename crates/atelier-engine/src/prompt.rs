use std::fmt::Write as _;

use atelier_contracts::media::ImagePayload;
use atelier_contracts::outfit::{pose, GarmentSlot, Garments, GenerationRequest, PoseSpec, POSE_COUNT};
use atelier_contracts::TryOnError;

/// Who an attached image depicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentRole {
    Person,
    Garment(GarmentSlot),
}

#[derive(Debug, Clone, Copy)]
pub struct Attachment<'a> {
    pub role: AttachmentRole,
    pub payload: &'a ImagePayload,
}

/// Images and instruction text for one generation call.
#[derive(Debug, Clone)]
pub struct PromptPlan<'a> {
    /// Person first, then top, bottom, shoes; absent garments are skipped.
    pub attachments: Vec<Attachment<'a>>,
    pub instruction: String,
}

/// Indices outside `0..4` are rejected.
pub fn build_prompt<'a>(
    person: &'a ImagePayload,
    garments: &'a Garments,
    pose_index: usize,
) -> Result<PromptPlan<'a>, TryOnError> {
    let Some(pose) = pose(pose_index) else {
        return Err(TryOnError::validation(format!(
            "pose index {pose_index} is out of range (expected 0..{})",
            POSE_COUNT - 1
        )));
    };
    Ok(plan_for_pose(person, garments, pose))
}

pub fn build_for_request<'a>(request: &GenerationRequest<'a>) -> PromptPlan<'a> {
    plan_for_pose(request.person, request.garments, request.pose)
}

fn plan_for_pose<'a>(
    person: &'a ImagePayload,
    garments: &'a Garments,
    pose: &PoseSpec,
) -> PromptPlan<'a> {
    let mut attachments = vec![Attachment {
        role: AttachmentRole::Person,
        payload: person,
    }];
    attachments.extend(garments.present().map(|(slot, payload)| Attachment {
        role: AttachmentRole::Garment(slot),
        payload,
    }));

    let mut text = String::from(HEADER);
    for (position, (slot, _)) in garments.present().enumerate() {
        // Image 1 is always the person.
        let _ = write!(text, "\n    Image {}: {}", position + 2, roster_line(slot));
    }
    text.push_str(REQUIREMENTS);
    for (slot, _) in garments.present() {
        text.push_str(garment_paragraph(slot));
    }
    let _ = write!(
        text,
        "\n    \n    4. POSE:\n       {}\n       {}\n       \n       IMPORTANT: Only the pose changes - framing, zoom, and person size stay exactly the same.",
        pose.name, pose.instruction
    );
    text.push_str(CLOSING);

    PromptPlan {
        attachments,
        instruction: text,
    }
}

fn roster_line(slot: GarmentSlot) -> &'static str {
    match slot {
        GarmentSlot::Top => "THE TOP - Upper body garment (shirt/dress/coat/blouse)",
        GarmentSlot::Bottom => "THE BOTTOM - Lower body garment (pants/skirt/shorts)",
        GarmentSlot::Shoes => "THE FOOTWEAR - Shoes/boots",
    }
}

fn garment_paragraph(slot: GarmentSlot) -> &'static str {
    match slot {
        GarmentSlot::Top => {
            "
       TOP GARMENT: You MUST use the top/shirt/dress from the provided image.
       - Replace the person's original top completely
       - Use the exact colors and style shown"
        }
        GarmentSlot::Bottom => {
            "
       BOTTOM GARMENT: You MUST use the pants/skirt/shorts from the provided image.
       - Replace the person's original bottom completely
       - Use the exact colors and style shown"
        }
        GarmentSlot::Shoes => {
            "
       SHOES/FOOTWEAR: You MUST put the shoes from the provided image on the person's feet.
       - Replace the original shoes completely
       - The person MUST be wearing the new shoes
       - DO NOT leave the person with old shoes or no shoes
       - The shoes MUST be visible in the photo"
        }
    }
}

const HEADER: &str = "
    ULTRA HIGH-END FASHION PHOTOGRAPHY EXPERT

    You are the world's most acclaimed fashion photographer and digital artist, specializing in luxury editorial photography for Vogue, Harper's Bazaar, and high-fashion runway campaigns.

    INPUT IMAGES:
    Image 1: THE MODEL - The person who will wear the outfit";

const REQUIREMENTS: &str = "

    INSTRUCTION: This is a virtual try-on task. You must dress the person from Image 1 with the garments provided in the other images.

    MANDATORY REQUIREMENTS:

    1. SAME PERSON - CRITICAL:
       The person MUST be IDENTICAL in ALL 4 photos.
       - Use the EXACT person from Image 1 in this photo
       - DO NOT create a different person
       - DO NOT change face, body, skin color, hair, or any features
       - All 4 photos must show the SAME recognizable person

    2. CONSISTENT FRAMING - CRITICAL (All 4 photos MUST have the same framing):
       CAMERA DISTANCE: Keep the same distance from the person in all 4 photos
       ZOOM LEVEL: Use the exact same zoom level - the person should occupy the same amount of space in the frame
       PERSON SIZE: The person's height in the frame must be identical across all 4 photos
       PROPORTIONS: Maintain proper human body proportions - no distortion, stretching, or compression
       FULL BODY: Always show the complete person from head to feet
       CENTERING: Person centered vertically and horizontally in frame
       CONSISTENCY: If the person's head is 20% from the top in one photo, it should be 20% in all photos

       Think of it like this: Same camera, same lens, same distance - only the pose changes.

    3. USE ALL GARMENTS - CRITICAL:";

const CLOSING: &str = "

    5. FULL BODY SHOT:
       - Show complete person from head to feet
       - All body parts visible (head, arms, legs, feet)
       - Person centered in frame
       - Same scale across all 4 photos

    6. WHITE BACKGROUND:
       - Pure white studio background
       - Professional catalog photography
       - Clean and minimal

    VERIFICATION BEFORE GENERATING:
    - Is this the same person from Image 1? YES/NO - MUST BE YES
    - Are ALL garments (top, bottom, shoes) being used? YES/NO - MUST BE YES
    - Is the full body visible without cropping? YES/NO - MUST BE YES
    - Is the framing and zoom consistent with the other photos? YES/NO - MUST BE YES
    - Are the proportions correct (no distortion)? YES/NO - MUST BE YES

    Generate the photo now following these exact instructions.
";

#[cfg(test)]
mod tests {
    use atelier_contracts::media::ImagePayload;
    use atelier_contracts::outfit::{GarmentSlot, Garments, GenerationRequest, POSES};
    use atelier_contracts::TryOnError;

    use super::{build_for_request, build_prompt, AttachmentRole};

    fn payload(tag: &str) -> ImagePayload {
        ImagePayload::new(tag.as_bytes().to_vec(), "image/png", tag)
    }

    #[test]
    fn attachments_follow_fixed_slot_order() -> anyhow::Result<()> {
        let person = payload("person");
        let mut garments = Garments::default();
        garments.set(GarmentSlot::Shoes, Some(payload("shoes")));
        garments.set(GarmentSlot::Top, Some(payload("top")));

        let plan = build_prompt(&person, &garments, 0)?;
        let roles: Vec<AttachmentRole> = plan.attachments.iter().map(|row| row.role).collect();
        assert_eq!(
            roles,
            vec![
                AttachmentRole::Person,
                AttachmentRole::Garment(GarmentSlot::Top),
                AttachmentRole::Garment(GarmentSlot::Shoes),
            ]
        );
        assert!(plan.instruction.contains("Image 2: THE TOP"));
        assert!(plan.instruction.contains("Image 3: THE FOOTWEAR"));
        Ok(())
    }

    #[test]
    fn garment_paragraphs_only_for_present_slots() -> anyhow::Result<()> {
        let person = payload("person");
        let mut garments = Garments::default();
        garments.set(GarmentSlot::Bottom, Some(payload("jeans")));

        let text = build_prompt(&person, &garments, 1)?.instruction;
        assert!(text.contains("BOTTOM GARMENT: You MUST use"));
        assert!(!text.contains("TOP GARMENT:"));
        assert!(!text.contains("SHOES/FOOTWEAR:"));
        assert!(text.contains("Image 2: THE BOTTOM"));
        assert!(text.contains("VERIFICATION BEFORE GENERATING"));
        Ok(())
    }

    #[test]
    fn pose_block_matches_index() -> anyhow::Result<()> {
        let person = payload("person");
        let mut garments = Garments::default();
        garments.set(GarmentSlot::Top, Some(payload("top")));
        for pose in POSES.iter() {
            let text = build_prompt(&person, &garments, pose.index)?.instruction;
            assert!(text.contains(pose.name));
            assert!(text.contains(pose.instruction));
            for other in POSES.iter().filter(|other| other.index != pose.index) {
                assert!(!text.contains(other.name));
            }
        }
        Ok(())
    }

    #[test]
    fn output_is_deterministic() -> anyhow::Result<()> {
        let person = payload("person");
        let mut garments = Garments::default();
        garments.set(GarmentSlot::Top, Some(payload("top")));
        garments.set(GarmentSlot::Bottom, Some(payload("bottom")));
        let first = build_prompt(&person, &garments, 2)?.instruction;
        let second = build_prompt(&person, &garments, 2)?.instruction;
        assert_eq!(first, second);

        let request = GenerationRequest {
            person: &person,
            garments: &garments,
            pose: &POSES[2],
        };
        assert_eq!(build_for_request(&request).instruction, first);
        Ok(())
    }

    #[test]
    fn out_of_range_pose_is_rejected() {
        let person = payload("person");
        let garments = Garments::default();
        let err = build_prompt(&person, &garments, 4).unwrap_err();
        assert!(matches!(err, TryOnError::Validation(_)));
    }
}
