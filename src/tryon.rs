use tracing::{info, warn};

use crate::aspect::{self, AspectRatioBucket};
use crate::capability::{Capability, SynthesisConfig, SynthesisResponse};
use crate::classifier::{self, StylingFlags};
use crate::error::TryOnError;
use crate::media::{GarmentItem, MediaDescriptor};
use crate::progress::ProgressSink;
use crate::prompt;
use crate::strategy::{self, AnalysisStrategy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryOnStage {
    Analyzing,
    Classifying,
    PromptBuilding,
    Synthesizing,
    ExtractingResult,
    Done,
}

impl TryOnStage {
    pub fn message(self, strategy: AnalysisStrategy, garment_count: usize) -> String {
        match self {
            TryOnStage::Analyzing => match strategy {
                AnalysisStrategy::Consolidated => format!(
                    "Analyzing {garment_count} view(s) of the garment together..."
                ),
                AnalysisStrategy::SingleVisualOnly => {
                    "Using the garment image directly...".to_string()
                }
                AnalysisStrategy::ParallelIndividual => {
                    format!("Analyzing {garment_count} garments in parallel...")
                }
            },
            TryOnStage::Classifying => "Working out how to style the outfit...".to_string(),
            TryOnStage::PromptBuilding => "Preparing the styling instructions...".to_string(),
            TryOnStage::Synthesizing => "Generating your try-on image...".to_string(),
            TryOnStage::ExtractingResult => "Checking the generated result...".to_string(),
            TryOnStage::Done => "Done!".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TryOnRequest {
    pub subject: Option<MediaDescriptor>,
    pub garments: Vec<GarmentItem>,
    /// Caller's declaration that every garment image shows the same item.
    pub same_garment: bool,
}

#[derive(Debug, Clone)]
pub struct TryOnOutcome {
    pub image: MediaDescriptor,
    pub strategy: AnalysisStrategy,
    pub flags: StylingFlags,
    pub aspect_ratio: AspectRatioBucket,
    /// Garments with the descriptions produced by analysis.
    pub garments: Vec<GarmentItem>,
}

/// Runs the full try-on pipeline for one request.
///
/// One progress message is emitted per stage before the stage starts. On
/// failure the sink is left at the stage that failed and a single error is
/// returned; nothing partial leaks out.
pub async fn run_try_on(
    capability: &dyn Capability,
    request: TryOnRequest,
    progress: &dyn ProgressSink,
) -> Result<TryOnOutcome, TryOnError> {
    let TryOnRequest {
        subject,
        mut garments,
        same_garment,
    } = request;

    let subject = match subject {
        Some(subject) if !subject.is_empty() => subject,
        _ => {
            return Err(TryOnError::MissingInput(
                "a photo of the person is required".to_string(),
            ))
        }
    };
    if garments.is_empty() {
        return Err(TryOnError::MissingInput(
            "at least one garment image is required".to_string(),
        ));
    }
    if garments.iter().any(|garment| garment.media.is_empty()) {
        return Err(TryOnError::MissingInput(
            "garment images must not be empty".to_string(),
        ));
    }

    let strategy = strategy::select(garments.len(), same_garment);
    info!(
        capability = capability.name(),
        strategy = strategy.as_str(),
        garments = garments.len(),
        "Starting try-on"
    );

    progress.notify(&TryOnStage::Analyzing.message(strategy, garments.len()));
    strategy::analyze_garments(capability, strategy, &mut garments).await?;

    progress.notify(&TryOnStage::Classifying.message(strategy, garments.len()));
    let descriptions = strategy::descriptions_of(&garments);
    let flags = classifier::classify(&descriptions, strategy == AnalysisStrategy::Consolidated);
    info!(?flags, "Styling flags derived");

    progress.notify(&TryOnStage::PromptBuilding.message(strategy, garments.len()));
    let aspect_ratio = aspect::resolve(subject.width, subject.height);
    let directives = prompt::build(&flags, aspect_ratio, &descriptions, strategy);
    let prompt_text = directives.render();

    progress.notify(&TryOnStage::Synthesizing.message(strategy, garments.len()));
    let mut images = Vec::with_capacity(garments.len() + 1);
    images.push(subject);
    images.extend(strategy::garment_images(&garments));
    let response = capability
        .synthesize_image(&images, &prompt_text, SynthesisConfig { aspect_ratio })
        .await
        .map_err(TryOnError::from_synthesis)?;

    progress.notify(&TryOnStage::ExtractingResult.message(strategy, garments.len()));
    let image = extract_image(response)?;

    progress.notify(&TryOnStage::Done.message(strategy, garments.len()));
    info!(
        media_type = %image.media_type,
        bytes = image.data.len(),
        aspect_ratio = aspect_ratio.as_str(),
        "Try-on image produced"
    );

    Ok(TryOnOutcome {
        image,
        strategy,
        flags,
        aspect_ratio,
        garments,
    })
}

/// Takes the first inline image, or reports why none came back.
pub(crate) fn extract_image(response: SynthesisResponse) -> Result<MediaDescriptor, TryOnError> {
    let explanation = response.text();
    match response.into_first_image() {
        Some(image) => Ok(image),
        None => {
            warn!(
                explanation = explanation.as_deref().unwrap_or(""),
                "Synthesis returned no image"
            );
            Err(TryOnError::NoImageProduced { explanation })
        }
    }
}
