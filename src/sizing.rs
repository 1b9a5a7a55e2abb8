use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::aspect;
use crate::capability::{Capability, SynthesisConfig};
use crate::error::TryOnError;
use crate::media::MediaDescriptor;
use crate::progress::ProgressSink;
use crate::tryon::extract_image;

/// Estimated body measurements, in inches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyAnalysis {
    pub height_in: f64,
    pub bust_or_chest_in: f64,
    pub waist_in: f64,
    pub hip_in: f64,
    pub build: String,
    #[serde(default)]
    pub posture_notes: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeRecommendation {
    #[serde(default)]
    pub base_size: Option<String>,
    #[serde(default)]
    pub try_on_sizes: Vec<String>,
    #[serde(default)]
    pub skipped_sizes: Vec<String>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductInfo {
    pub name: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    /// Free-text fit notes, fabric stretch, model size and the like.
    #[serde(default)]
    pub details: Option<String>,
}

impl ProductInfo {
    fn summary(&self) -> String {
        let mut lines = vec![format!("Product: {}", self.name.trim())];
        if let Some(brand) = self.brand.as_deref().filter(|value| !value.trim().is_empty()) {
            lines.push(format!("Brand: {}", brand.trim()));
        }
        if let Some(category) = self.category.as_deref().filter(|value| !value.trim().is_empty()) {
            lines.push(format!("Category: {}", category.trim()));
        }
        if let Some(details) = self.details.as_deref().filter(|value| !value.trim().is_empty()) {
            lines.push(format!("Details: {}", details.trim()));
        }
        lines.join("\n")
    }
}

impl BodyAnalysis {
    fn summary(&self) -> String {
        format!(
            "Height: {:.1} in\nBust/chest: {:.1} in\nWaist: {:.1} in\nHip: {:.1} in\nBuild: {}\nPosture notes: {}",
            self.height_in,
            self.bust_or_chest_in,
            self.waist_in,
            self.hip_in,
            self.build,
            if self.posture_notes.trim().is_empty() {
                "none"
            } else {
                self.posture_notes.trim()
            }
        )
    }
}

const BODY_ANALYSIS_PROMPT: &str = "Estimate this person's body measurements from the photo for clothing size selection. \
Give height, bust or chest, waist and hip circumference in inches, a one or two word build description \
(for example petite, slim, athletic, average, curvy, broad), short notes on posture that affect fit, \
and a confidence between 0 and 1 reflecting how clearly the body is visible. Answer with JSON only.";

fn body_analysis_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "heightIn": { "type": "NUMBER" },
            "bustOrChestIn": { "type": "NUMBER" },
            "waistIn": { "type": "NUMBER" },
            "hipIn": { "type": "NUMBER" },
            "build": { "type": "STRING" },
            "postureNotes": { "type": "STRING" },
            "confidence": { "type": "NUMBER" }
        },
        "required": ["heightIn", "bustOrChestIn", "waistIn", "hipIn", "build", "postureNotes", "confidence"]
    })
}

fn size_recommendation_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "baseSize": { "type": "STRING", "nullable": true },
            "tryOnSizes": { "type": "ARRAY", "items": { "type": "STRING" } },
            "skippedSizes": { "type": "ARRAY", "items": { "type": "STRING" } },
            "reason": { "type": "STRING" }
        },
        "required": ["tryOnSizes", "skippedSizes", "reason"]
    })
}

fn size_recommendation_prompt(
    body: &BodyAnalysis,
    product: &ProductInfo,
    available_sizes: &[String],
) -> String {
    format!(
        "You are a fit specialist. Using the body measurements and product information below, pick the size most \
likely to fit as the base size, list the sizes worth trying on (the base size and any close neighbours), and list \
the sizes that can be skipped. Only use sizes from the available list. Explain the choice in one or two sentences.\n\n\
{}\n\n{}\n\nAvailable sizes: {}\n\nAnswer with JSON only.",
        body.summary(),
        product.summary(),
        available_sizes.join(", ")
    )
}

fn size_fit_prompt(
    body: &BodyAnalysis,
    target_size: &str,
    product: &ProductInfo,
) -> String {
    format!(
        "TASK: Show the person in the FIRST image wearing the garment from the SECOND image in size {target_size}.\n\n\
SIZE GUIDE: The THIRD image is the product's size guide. Read it to find the real measurements of size {target_size} \
and compare them with the person's measurements below.\n\n\
FIT: If the garment measurements are smaller than the body, render a tight fit with visible tension and pulling. \
If they match within about an inch, render a perfect fit. If they are larger, render a loose fit with extra fabric, \
longer sleeves or hem and dropped shoulders as appropriate.\n\n\
BODY (do not change): {}\n\n\
IDENTITY: Never alter the person's body proportions, face, pose, background or lighting to make the garment fit. \
Only the garment's fit changes.\n\n\
{}\n\n\
OUTPUT: Return a single photorealistic image with no text, size labels or annotations.",
        body.summary().replace('\n', "; "),
        product.summary()
    )
}

/// Estimates body measurements from a photo of the person.
pub async fn analyze_body(
    capability: &dyn Capability,
    subject: &MediaDescriptor,
    progress: &dyn ProgressSink,
) -> Result<BodyAnalysis, TryOnError> {
    if subject.is_empty() {
        return Err(TryOnError::MissingInput(
            "a photo of the person is required".to_string(),
        ));
    }

    progress.notify("Estimating body measurements...");
    let value = capability
        .analyze_structured(
            std::slice::from_ref(subject),
            BODY_ANALYSIS_PROMPT,
            &body_analysis_schema(),
        )
        .await
        .map_err(TryOnError::from_analysis)?
        .ok_or_else(|| {
            TryOnError::AnalysisFailed("no body measurements were returned".to_string())
        })?;

    let mut analysis: BodyAnalysis = serde_json::from_value(value).map_err(|err| {
        TryOnError::AnalysisFailed(format!("body measurements could not be parsed: {err}"))
    })?;
    analysis.confidence = analysis.confidence.clamp(0.0, 1.0);
    info!(
        build = %analysis.build,
        confidence = analysis.confidence,
        "Body analysis complete"
    );
    Ok(analysis)
}

/// Asks for a size recommendation. The returned size lists are passed
/// through exactly as the capability produced them.
pub async fn recommend_size(
    capability: &dyn Capability,
    body: &BodyAnalysis,
    product: &ProductInfo,
    available_sizes: &[String],
    progress: &dyn ProgressSink,
) -> Result<SizeRecommendation, TryOnError> {
    if available_sizes.is_empty() {
        return Err(TryOnError::MissingInput(
            "at least one available size is required".to_string(),
        ));
    }

    progress.notify("Finding your best size...");
    let prompt = size_recommendation_prompt(body, product, available_sizes);
    let value = capability
        .analyze_structured(&[], &prompt, &size_recommendation_schema())
        .await
        .map_err(TryOnError::from_analysis)?
        .ok_or_else(|| {
            TryOnError::AnalysisFailed("no size recommendation was returned".to_string())
        })?;

    let recommendation: SizeRecommendation = serde_json::from_value(value).map_err(|err| {
        TryOnError::AnalysisFailed(format!("size recommendation could not be parsed: {err}"))
    })?;
    info!(
        base_size = recommendation.base_size.as_deref().unwrap_or(""),
        try_on = ?recommendation.try_on_sizes,
        skipped = ?recommendation.skipped_sizes,
        "Size recommendation received"
    );
    Ok(recommendation)
}

/// The three photos a size-fit render works from, sent in this order.
#[derive(Debug, Clone, Copy)]
pub struct SizeFitImages<'a> {
    pub subject: &'a MediaDescriptor,
    pub garment: &'a MediaDescriptor,
    pub size_guide: &'a MediaDescriptor,
}

impl SizeFitImages<'_> {
    fn any_empty(&self) -> bool {
        self.subject.is_empty() || self.garment.is_empty() || self.size_guide.is_empty()
    }
}

/// Renders the garment on the person as it would fit in `target_size`.
pub async fn generate_size_fit_try_on(
    capability: &dyn Capability,
    images: SizeFitImages<'_>,
    body: &BodyAnalysis,
    target_size: &str,
    product: &ProductInfo,
    progress: &dyn ProgressSink,
) -> Result<MediaDescriptor, TryOnError> {
    if images.any_empty() {
        return Err(TryOnError::MissingInput(
            "person, garment and size guide images are all required".to_string(),
        ));
    }
    let target_size = target_size.trim();
    if target_size.is_empty() {
        return Err(TryOnError::MissingInput("a target size is required".to_string()));
    }

    progress.notify(&format!("Generating size {target_size} try-on..."));
    let aspect_ratio = aspect::resolve(images.subject.width, images.subject.height);
    let prompt = size_fit_prompt(body, target_size, product);
    let media = [
        images.subject.clone(),
        images.garment.clone(),
        images.size_guide.clone(),
    ];
    let response = capability
        .synthesize_image(&media, &prompt, SynthesisConfig { aspect_ratio })
        .await
        .map_err(TryOnError::from_synthesis)?;

    progress.notify("Checking the generated result...");
    let image = extract_image(response)?;
    progress.notify("Done!");
    Ok(image)
}
