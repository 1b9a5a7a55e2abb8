use crate::aspect::AspectRatioBucket;
use crate::classifier::StylingFlags;
use crate::strategy::AnalysisStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeckwearPlacement {
    /// A necklace must stay visible, so scarves and ties move to the arms.
    Arms,
    /// No necklace in play; scarves and ties are styled at the neck.
    Neck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    Task,
    Identity,
    Framing,
    GarmentReference,
    GarmentFidelity,
    FullBody,
    Top,
    Bottoms,
    Shoes,
    Necklace,
    Neckwear(NeckwearPlacement),
    Headwear,
    Output,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub kind: DirectiveKind,
    pub text: String,
}

/// The constraint set sent along with the synthesis call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptDirectives {
    directives: Vec<Directive>,
}

impl PromptDirectives {
    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    pub fn neckwear_placement(&self) -> Option<NeckwearPlacement> {
        self.directives.iter().find_map(|directive| match directive.kind {
            DirectiveKind::Neckwear(placement) => Some(placement),
            _ => None,
        })
    }

    pub fn has(&self, kind: DirectiveKind) -> bool {
        self.directives.iter().any(|directive| directive.kind == kind)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (index, directive) in self.directives.iter().enumerate() {
            if index > 0 {
                out.push_str("\n\n");
            }
            out.push_str(&directive.text);
        }
        out
    }

    fn push(&mut self, kind: DirectiveKind, text: impl Into<String>) {
        self.directives.push(Directive {
            kind,
            text: text.into(),
        });
    }
}

fn garment_reference_text(descriptions: &[String], strategy: AnalysisStrategy) -> String {
    match strategy {
        AnalysisStrategy::SingleVisualOnly => "GARMENT REFERENCE: The second image shows the garment. \
Reproduce it exactly as it appears in that image: same colors, pattern, fabric, cut and details."
            .to_string(),
        AnalysisStrategy::Consolidated => {
            let description = descriptions
                .first()
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .unwrap_or("the garment shown");
            format!(
                "GARMENT REFERENCE: Every image after the first shows the SAME single garment from different angles. \
Combine the views into one garment; do not render it more than once. Garment description: {description}."
            )
        }
        AnalysisStrategy::ParallelIndividual => {
            let mut text = String::from(
                "GARMENT REFERENCE: The images after the first show separate items that must ALL be worn together, in this order:",
            );
            for (index, description) in descriptions.iter().enumerate() {
                let description = description.trim();
                let description = if description.is_empty() {
                    "see reference image"
                } else {
                    description
                };
                text.push_str(&format!("\n- Item {} (image {}): {}", index + 1, index + 2, description));
            }
            text
        }
    }
}

/// Assembles the synthesis directives. The output is deterministic for a
/// given set of inputs.
pub fn build(
    flags: &StylingFlags,
    aspect_ratio: AspectRatioBucket,
    descriptions: &[String],
    strategy: AnalysisStrategy,
) -> PromptDirectives {
    let mut prompt = PromptDirectives {
        directives: Vec::new(),
    };

    prompt.push(
        DirectiveKind::Task,
        "TASK: Create a photorealistic image of the person in the FIRST image wearing the garment(s) from the other images.",
    );
    prompt.push(
        DirectiveKind::Identity,
        "IDENTITY: Preserve the person's face, facial features, skin tone, hair, body shape, proportions and pose exactly. \
Do not beautify, slim, age or otherwise alter the person.",
    );
    prompt.push(
        DirectiveKind::Framing,
        format!(
            "FRAMING: Keep the original background, lighting, camera angle and crop of the first image. \
The output aspect ratio is {aspect_ratio}; do not zoom in or out."
        ),
    );
    prompt.push(
        DirectiveKind::GarmentReference,
        garment_reference_text(descriptions, strategy),
    );
    prompt.push(
        DirectiveKind::GarmentFidelity,
        "GARMENT FIDELITY: Match each garment's color, print, texture, length, neckline and hardware exactly. \
Fit it naturally to the body with realistic drape, folds and shadows.",
    );

    if flags.has_full_body_outfit {
        prompt.push(
            DirectiveKind::FullBody,
            "FULL-BODY OUTFIT: The garment is a one-piece outfit. Render it complete from neckline to hem as a single piece, \
replacing both the current top and bottoms. Never render it as a top only, a skirt only or any other partial garment.",
        );
    } else {
        let top = if flags.replaces_top {
            "TOP: Replace the person's current top with the new top."
        } else {
            "TOP: Keep the person's current top unchanged."
        };
        prompt.push(DirectiveKind::Top, top);

        let bottoms = if flags.replaces_bottoms {
            "BOTTOMS: Replace the person's current bottoms with the new bottoms."
        } else {
            "BOTTOMS: Keep the person's current bottoms unchanged."
        };
        prompt.push(DirectiveKind::Bottoms, bottoms);
    }

    if flags.has_shoes {
        prompt.push(
            DirectiveKind::Shoes,
            "SHOES: Replace the current footwear with the new shoes and make sure the feet are visible if the framing allows.",
        );
    }

    if flags.has_necklace {
        prompt.push(
            DirectiveKind::Necklace,
            "NECKLACE: The necklace must be clearly visible on the neckline and unobstructed.",
        );
        prompt.push(
            DirectiveKind::Neckwear(NeckwearPlacement::Arms),
            "SCARVES AND TIES: Keep the neck area clear. Drape any scarf or tie over the arms or carry it in hand instead.",
        );
    } else {
        prompt.push(
            DirectiveKind::Neckwear(NeckwearPlacement::Neck),
            "SCARVES AND TIES: Style any scarf or tie at the neck in the usual way.",
        );
    }

    if flags.has_headwear {
        prompt.push(
            DirectiveKind::Headwear,
            "HEADWEAR: Remove any hat or cap the person is wearing and replace it with the new headwear.",
        );
    }

    prompt.push(
        DirectiveKind::Output,
        "OUTPUT: Return a single photorealistic image with no text, borders, watermarks or collage.",
    );

    prompt
}
