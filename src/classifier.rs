use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StylingFlags {
    pub has_full_body_outfit: bool,
    pub has_necklace: bool,
    pub has_shoes: bool,
    pub replaces_bottoms: bool,
    pub replaces_top: bool,
    pub has_headwear: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    FullBody,
    Necklace,
    Shoes,
    Bottoms,
    Top,
    Headwear,
}

const VOCABULARY: &[(Category, &[&str])] = &[
    (
        Category::FullBody,
        &[
            "dress", "gown", "frock", "jumpsuit", "romper", "suit", "maxi", "mini", "midi",
        ],
    ),
    (
        Category::Necklace,
        &[
            "necklace", "pendant", "choker", "chain", "jewel", "jewelry", "jewellery", "beads",
            "pearls", "strand", "neckwear",
        ],
    ),
    (
        Category::Shoes,
        &[
            "shoe", "boots", "heels", "sandals", "sneakers", "flats", "pumps", "footwear",
            "stiletto", "wedge",
        ],
    ),
    (
        Category::Bottoms,
        &["skirt", "pants", "trousers", "jeans", "leggings", "shorts"],
    ),
    (
        Category::Top,
        &[
            "top", "shirt", "blouse", "t-shirt", "cardigan", "jacket", "bodysuit", "sweater",
            "vest",
        ],
    ),
    (Category::Headwear, &["hat", "cap", "beanie", "fedora", "beret"]),
];

// Whole words with an optional plural suffix: "dresses" matches, while
// "minimalist", "topstitching" and "suitable" do not.
static MATCHERS: Lazy<Vec<(Category, Regex)>> = Lazy::new(|| {
    VOCABULARY
        .iter()
        .map(|(category, words)| {
            let alternation = words
                .iter()
                .map(|word| regex::escape(word))
                .collect::<Vec<_>>()
                .join("|");
            let pattern = format!(r"(?i)\b(?:{alternation})(?:e?s)?\b");
            let regex = Regex::new(&pattern).expect("classifier vocabulary must compile");
            (*category, regex)
        })
        .collect()
});

fn mentions(text: &str, category: Category) -> bool {
    MATCHERS
        .iter()
        .find(|(candidate, _)| *candidate == category)
        .map(|(_, regex)| regex.is_match(text))
        .unwrap_or(false)
}

fn classification_text<S: AsRef<str>>(descriptions: &[S], consolidated: bool) -> String {
    if consolidated {
        return descriptions
            .first()
            .map(|value| value.as_ref().to_lowercase())
            .unwrap_or_default();
    }
    descriptions
        .iter()
        .map(|value| value.as_ref().trim())
        .filter(|value| !value.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
        .to_lowercase()
}

/// Derives styling flags from garment descriptions.
///
/// In consolidated mode only the first description is considered since every
/// item in the batch carries the same text.
pub fn classify<S: AsRef<str>>(descriptions: &[S], consolidated: bool) -> StylingFlags {
    let text = classification_text(descriptions, consolidated);
    if text.is_empty() {
        return StylingFlags::default();
    }

    let has_full_body_outfit = mentions(&text, Category::FullBody);
    StylingFlags {
        has_full_body_outfit,
        has_necklace: mentions(&text, Category::Necklace),
        has_shoes: mentions(&text, Category::Shoes),
        replaces_bottoms: has_full_body_outfit || mentions(&text, Category::Bottoms),
        replaces_top: has_full_body_outfit || mentions(&text, Category::Top),
        has_headwear: mentions(&text, Category::Headwear),
    }
}
