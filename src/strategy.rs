use futures::future::join_all;
use tracing::info;

use crate::capability::Capability;
use crate::error::TryOnError;
use crate::media::{GarmentItem, MediaDescriptor};

const CONSOLIDATED_FALLBACK_DESCRIPTION: &str = "garment";

const CONSOLIDATED_ANALYSIS_PROMPT: &str = "These images all show the SAME single garment photographed from different angles or distances. \
Synthesize them into ONE cohesive technical description of that garment. Cover fabric and texture, construction details \
(seams, closures, neckline, sleeves, hem), silhouette and fit, and exact colors and patterns. Ignore duplicate viewpoints \
and do not describe the images separately. Do not describe any person, mannequin or background. \
Reply with the description only, in at most 120 words.";

const INDIVIDUAL_ANALYSIS_PROMPT: &str = "Describe the garment or accessory in this image as a technical product description. \
Name the item type first (for example dress, jacket, jeans, necklace, hat). Cover fabric and texture, construction details, \
silhouette and fit, and exact colors and patterns. Do not describe any person, mannequin or background. \
Reply with the description only, in at most 80 words.";

/// How the garment images of one request are analyzed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStrategy {
    /// All images are views of one garment; one call describes them together.
    Consolidated,
    /// A single garment image used purely visually; no analysis call.
    SingleVisualOnly,
    /// Distinct garments, each described by its own concurrent call.
    ParallelIndividual,
}

impl AnalysisStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            AnalysisStrategy::Consolidated => "consolidated",
            AnalysisStrategy::SingleVisualOnly => "single_visual_only",
            AnalysisStrategy::ParallelIndividual => "parallel_individual",
        }
    }
}

pub fn select(garment_count: usize, same_garment: bool) -> AnalysisStrategy {
    if same_garment {
        AnalysisStrategy::Consolidated
    } else if garment_count <= 1 {
        AnalysisStrategy::SingleVisualOnly
    } else {
        AnalysisStrategy::ParallelIndividual
    }
}

/// Fills in `description` on every garment according to `strategy`.
///
/// The stage is all-or-nothing: on error the garments are left untouched.
pub async fn analyze_garments(
    capability: &dyn Capability,
    strategy: AnalysisStrategy,
    garments: &mut [GarmentItem],
) -> Result<(), TryOnError> {
    match strategy {
        AnalysisStrategy::SingleVisualOnly => {
            for garment in garments.iter_mut() {
                garment.description = Some(String::new());
            }
            Ok(())
        }
        AnalysisStrategy::Consolidated => {
            let images = garments
                .iter()
                .map(|garment| garment.media.clone())
                .collect::<Vec<_>>();
            let text = capability
                .analyze_text(&images, CONSOLIDATED_ANALYSIS_PROMPT)
                .await
                .map_err(TryOnError::from_analysis)?;
            let description = consolidated_description(&text);
            info!(
                images = images.len(),
                "Consolidated garment description: {}", description
            );
            for garment in garments.iter_mut() {
                garment.description = Some(description.clone());
            }
            Ok(())
        }
        AnalysisStrategy::ParallelIndividual => {
            let descriptions = describe_individually(capability, garments).await?;
            for (garment, description) in garments.iter_mut().zip(descriptions) {
                garment.description = Some(description);
            }
            Ok(())
        }
    }
}

fn consolidated_description(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        CONSOLIDATED_FALLBACK_DESCRIPTION.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Issues one call per garment, waits for all of them, then fails if any did.
///
/// Descriptions come back in garment order; `join_all` keeps input order, so
/// results are paired by position rather than by id.
async fn describe_individually(
    capability: &dyn Capability,
    garments: &[GarmentItem],
) -> Result<Vec<String>, TryOnError> {
    let calls = garments.iter().map(|garment| async move {
        let images = [garment.media.clone()];
        capability
            .analyze_text(&images, INDIVIDUAL_ANALYSIS_PROMPT)
            .await
    });

    let results = join_all(calls).await;
    info!(garments = results.len(), "Individual garment analysis joined");

    results
        .into_iter()
        .map(|result| {
            result
                .map(|text| text.trim().to_string())
                .map_err(TryOnError::from_analysis)
        })
        .collect()
}

/// Descriptions in garment order; undefined descriptions become empty.
pub fn descriptions_of(garments: &[GarmentItem]) -> Vec<String> {
    garments
        .iter()
        .map(|garment| garment.description_or_empty().to_string())
        .collect()
}

pub fn garment_images(garments: &[GarmentItem]) -> Vec<MediaDescriptor> {
    garments.iter().map(|garment| garment.media.clone()).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::capability::testing::{sample_media, ScriptedCapability};
    use crate::capability::{CapabilityError, SynthesisConfig, SynthesisResponse};

    /// Holds each analysis call open briefly and records how many overlap.
    #[derive(Default)]
    struct OverlapTracker {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Capability for OverlapTracker {
        fn name(&self) -> &str {
            "overlap"
        }

        async fn analyze_text(
            &self,
            _images: &[MediaDescriptor],
            _prompt: &str,
        ) -> Result<String, CapabilityError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok("linen shirt".to_string())
        }

        async fn synthesize_image(
            &self,
            _images: &[MediaDescriptor],
            _prompt: &str,
            _config: SynthesisConfig,
        ) -> Result<SynthesisResponse, CapabilityError> {
            Ok(SynthesisResponse::default())
        }

        async fn analyze_structured(
            &self,
            _images: &[MediaDescriptor],
            _prompt: &str,
            _schema: &Value,
        ) -> Result<Option<Value>, CapabilityError> {
            Ok(None)
        }
    }

    fn garments(count: usize) -> Vec<GarmentItem> {
        (0..count)
            .map(|index| GarmentItem::with_id(format!("g{index}"), sample_media(index as u8, 600, 800)))
            .collect()
    }

    #[test]
    fn selection_table_is_total() {
        for count in 1..=5 {
            assert_eq!(select(count, true), AnalysisStrategy::Consolidated);
        }
        assert_eq!(select(1, false), AnalysisStrategy::SingleVisualOnly);
        for count in 2..=5 {
            assert_eq!(select(count, false), AnalysisStrategy::ParallelIndividual);
        }
    }

    #[tokio::test]
    async fn single_visual_only_makes_no_call() {
        let capability = ScriptedCapability::new();
        let mut items = garments(1);
        analyze_garments(&capability, AnalysisStrategy::SingleVisualOnly, &mut items)
            .await
            .expect("no failure");
        assert_eq!(items[0].description.as_deref(), Some(""));
        assert!(capability.calls().is_empty());
    }

    #[tokio::test]
    async fn consolidated_sends_all_images_once_and_copies_text() {
        let capability =
            ScriptedCapability::new().with_text_reply(|_, _| Ok("  a navy wool coat \n".to_string()));
        let mut items = garments(3);
        analyze_garments(&capability, AnalysisStrategy::Consolidated, &mut items)
            .await
            .expect("analysis succeeds");
        assert_eq!(capability.analyze_text_count(), 1);
        match &capability.calls()[0] {
            crate::capability::testing::RecordedCall::AnalyzeText { image_count, .. } => {
                assert_eq!(*image_count, 3)
            }
            other => panic!("unexpected call {other:?}"),
        }
        for item in &items {
            assert_eq!(item.description.as_deref(), Some("a navy wool coat"));
        }
    }

    #[tokio::test]
    async fn consolidated_empty_reply_falls_back_to_garment() {
        let capability = ScriptedCapability::new().with_text_reply(|_, _| Ok("   ".to_string()));
        let mut items = garments(2);
        analyze_garments(&capability, AnalysisStrategy::Consolidated, &mut items)
            .await
            .expect("analysis succeeds");
        assert!(items.iter().all(|item| item.description.as_deref() == Some("garment")));
    }

    #[tokio::test]
    async fn parallel_matches_results_back_by_garment() {
        let capability = ScriptedCapability::new().with_text_reply(|images, _| {
            Ok(format!("garment number {}", images[0].data[0]))
        });
        let mut items = garments(3);
        analyze_garments(&capability, AnalysisStrategy::ParallelIndividual, &mut items)
            .await
            .expect("analysis succeeds");
        assert_eq!(capability.analyze_text_count(), 3);
        for (index, item) in items.iter().enumerate() {
            assert_eq!(
                item.description.as_deref(),
                Some(format!("garment number {index}").as_str())
            );
        }
    }

    #[tokio::test]
    async fn parallel_failure_fails_the_whole_stage() {
        let capability = ScriptedCapability::new().with_text_reply(|images, _| {
            if images[0].data[0] == 1 {
                Err(CapabilityError::Request("status 500".to_string()))
            } else {
                Ok("a skirt".to_string())
            }
        });
        let mut items = garments(3);
        let err = analyze_garments(&capability, AnalysisStrategy::ParallelIndividual, &mut items)
            .await
            .expect_err("one branch failed");
        assert!(matches!(err, TryOnError::AnalysisFailed(_)));
        // Every branch still ran to completion before the join decided.
        assert_eq!(capability.analyze_text_count(), 3);
        assert!(items.iter().all(|item| item.description.is_none()));
    }

    #[tokio::test]
    async fn unavailable_capability_is_reported_as_such() {
        let capability = ScriptedCapability::new()
            .with_text_reply(|_, _| Err(CapabilityError::Unavailable("no key".to_string())));
        let mut items = garments(2);
        let err = analyze_garments(&capability, AnalysisStrategy::Consolidated, &mut items)
            .await
            .expect_err("unavailable");
        assert!(matches!(err, TryOnError::CapabilityUnavailable(_)));
    }

    #[tokio::test]
    async fn parallel_calls_are_all_in_flight_together() {
        let capability = OverlapTracker::default();
        let mut items = garments(4);
        analyze_garments(&capability, AnalysisStrategy::ParallelIndividual, &mut items)
            .await
            .expect("analysis succeeds");
        assert_eq!(capability.peak.load(Ordering::SeqCst), 4);
        assert!(items
            .iter()
            .all(|item| item.description.as_deref() == Some("linen shirt")));
    }

    #[tokio::test]
    async fn parallel_garments_sharing_an_id_keep_their_own_description() {
        let capability = ScriptedCapability::new().with_text_reply(|images, _| {
            Ok(format!("garment number {}", images[0].data[0]))
        });
        let mut items = vec![
            GarmentItem::with_id("dup", sample_media(7, 600, 800)),
            GarmentItem::with_id("dup", sample_media(8, 600, 800)),
        ];
        analyze_garments(&capability, AnalysisStrategy::ParallelIndividual, &mut items)
            .await
            .expect("analysis succeeds");
        assert_eq!(items[0].description.as_deref(), Some("garment number 7"));
        assert_eq!(items[1].description.as_deref(), Some("garment number 8"));
    }

    #[tokio::test]
    async fn rejected_consolidated_analysis_fails_without_descriptions() {
        let capability = ScriptedCapability::new().with_text_reply(|_, _| {
            Err(CapabilityError::InvalidResponse(
                "Request blocked: SAFETY".to_string(),
            ))
        });
        let mut items = garments(2);
        let err = analyze_garments(&capability, AnalysisStrategy::Consolidated, &mut items)
            .await
            .expect_err("blocked analysis");
        assert!(matches!(err, TryOnError::AnalysisFailed(_)));
        assert!(items.iter().all(|item| item.description.is_none()));
    }
}
