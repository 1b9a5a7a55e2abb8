use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use dotenvy::dotenv;
use tracing::{error, info};

use tryon_studio::config::CONFIG;
use tryon_studio::progress::LogProgress;
use tryon_studio::sizing::{self, ProductInfo, SizeFitImages};
use tryon_studio::utils::logging::init_logging;
use tryon_studio::{run_try_on, GarmentItem, GeminiCapability, MediaDescriptor, TryOnRequest};

fn usage() -> &'static str {
    "Usage:\n  tryon try-on --subject <path> --garment <path> [--garment <path>...] [--same-garment] --out <path>\n  tryon size-fit --subject <path> --garment <path> --size-guide <path> --sizes <S,M,L> --product <name> [--brand <name>] [--category <name>] [--details <text>] [--target <size>] --out <path>"
}

#[derive(Debug)]
struct TryOnArgs {
    subject: PathBuf,
    garments: Vec<PathBuf>,
    same_garment: bool,
    out: PathBuf,
}

#[derive(Debug)]
struct SizeFitArgs {
    subject: PathBuf,
    garment: PathBuf,
    size_guide: PathBuf,
    sizes: Vec<String>,
    product: ProductInfo,
    target: Option<String>,
    out: PathBuf,
}

#[derive(Debug)]
enum CliCommand {
    TryOn(TryOnArgs),
    SizeFit(SizeFitArgs),
}

fn take_value<'a>(args: &'a [String], index: &mut usize, flag: &str) -> Result<&'a str> {
    *index += 1;
    args.get(*index)
        .map(|value| value.as_str())
        .ok_or_else(|| anyhow!("Missing value for {flag}"))
}

fn parse_try_on_args(args: &[String]) -> Result<TryOnArgs> {
    let mut subject = None;
    let mut garments = Vec::new();
    let mut same_garment = false;
    let mut out = None;

    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--subject" => subject = Some(PathBuf::from(take_value(args, &mut index, "--subject")?)),
            "--garment" => garments.push(PathBuf::from(take_value(args, &mut index, "--garment")?)),
            "--same-garment" => same_garment = true,
            "--out" => out = Some(PathBuf::from(take_value(args, &mut index, "--out")?)),
            other => return Err(anyhow!("Unknown try-on argument: {other}\n{}", usage())),
        }
        index += 1;
    }

    Ok(TryOnArgs {
        subject: subject.ok_or_else(|| anyhow!("--subject is required"))?,
        garments,
        same_garment,
        out: out.ok_or_else(|| anyhow!("--out is required"))?,
    })
}

fn parse_size_fit_args(args: &[String]) -> Result<SizeFitArgs> {
    let mut subject = None;
    let mut garment = None;
    let mut size_guide = None;
    let mut sizes = Vec::new();
    let mut product = ProductInfo::default();
    let mut target = None;
    let mut out = None;

    let mut index = 0;
    while index < args.len() {
        match args[index].as_str() {
            "--subject" => subject = Some(PathBuf::from(take_value(args, &mut index, "--subject")?)),
            "--garment" => garment = Some(PathBuf::from(take_value(args, &mut index, "--garment")?)),
            "--size-guide" => {
                size_guide = Some(PathBuf::from(take_value(args, &mut index, "--size-guide")?))
            }
            "--sizes" => {
                sizes = take_value(args, &mut index, "--sizes")?
                    .split(',')
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
                    .collect();
            }
            "--product" => product.name = take_value(args, &mut index, "--product")?.to_string(),
            "--brand" => product.brand = Some(take_value(args, &mut index, "--brand")?.to_string()),
            "--category" => {
                product.category = Some(take_value(args, &mut index, "--category")?.to_string())
            }
            "--details" => {
                product.details = Some(take_value(args, &mut index, "--details")?.to_string())
            }
            "--target" => target = Some(take_value(args, &mut index, "--target")?.to_string()),
            "--out" => out = Some(PathBuf::from(take_value(args, &mut index, "--out")?)),
            other => return Err(anyhow!("Unknown size-fit argument: {other}\n{}", usage())),
        }
        index += 1;
    }

    if product.name.trim().is_empty() {
        return Err(anyhow!("--product is required"));
    }

    Ok(SizeFitArgs {
        subject: subject.ok_or_else(|| anyhow!("--subject is required"))?,
        garment: garment.ok_or_else(|| anyhow!("--garment is required"))?,
        size_guide: size_guide.ok_or_else(|| anyhow!("--size-guide is required"))?,
        sizes,
        product,
        target,
        out: out.ok_or_else(|| anyhow!("--out is required"))?,
    })
}

fn parse_args(args: &[String]) -> Result<CliCommand> {
    match args.get(1).map(|value| value.as_str()) {
        Some("try-on") => Ok(CliCommand::TryOn(parse_try_on_args(&args[2..])?)),
        Some("size-fit") => Ok(CliCommand::SizeFit(parse_size_fit_args(&args[2..])?)),
        _ => Err(anyhow!(usage())),
    }
}

async fn load_media(path: &Path) -> Result<MediaDescriptor> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read image {}", path.display()))?;
    let media = MediaDescriptor::from_bytes(bytes);
    info!(
        path = %path.display(),
        media_type = %media.media_type,
        width = media.width,
        height = media.height,
        "Loaded image"
    );
    Ok(media)
}

async fn write_media(path: &Path, media: &MediaDescriptor) -> Result<()> {
    tokio::fs::write(path, &media.data)
        .await
        .with_context(|| format!("Failed to write result to {}", path.display()))?;
    info!(path = %path.display(), media_type = %media.media_type, "Saved result");
    Ok(())
}

async fn run_try_on_command(capability: &GeminiCapability, args: TryOnArgs) -> Result<()> {
    let subject = load_media(&args.subject).await?;
    let mut garments = Vec::with_capacity(args.garments.len());
    for path in &args.garments {
        garments.push(GarmentItem::new(load_media(path).await?));
    }

    let request = TryOnRequest {
        subject: Some(subject),
        garments,
        same_garment: args.same_garment,
    };
    let outcome = run_try_on(capability, request, &LogProgress).await?;
    info!(
        strategy = outcome.strategy.as_str(),
        aspect_ratio = outcome.aspect_ratio.as_str(),
        flags = ?outcome.flags,
        "Try-on finished"
    );
    write_media(&args.out, &outcome.image).await
}

async fn run_size_fit_command(capability: &GeminiCapability, args: SizeFitArgs) -> Result<()> {
    let subject = load_media(&args.subject).await?;
    let garment = load_media(&args.garment).await?;
    let size_guide = load_media(&args.size_guide).await?;

    let body = sizing::analyze_body(capability, &subject, &LogProgress).await?;
    info!(
        height_in = body.height_in,
        bust_or_chest_in = body.bust_or_chest_in,
        waist_in = body.waist_in,
        hip_in = body.hip_in,
        confidence = body.confidence,
        "Estimated measurements"
    );

    let recommendation =
        sizing::recommend_size(capability, &body, &args.product, &args.sizes, &LogProgress)
            .await?;
    info!(
        base_size = recommendation.base_size.as_deref().unwrap_or("-"),
        reason = %recommendation.reason,
        "Recommended size"
    );

    let target = args
        .target
        .clone()
        .or_else(|| recommendation.base_size.clone())
        .or_else(|| recommendation.try_on_sizes.first().cloned())
        .ok_or_else(|| anyhow!("No target size given and none was recommended"))?;

    let image = sizing::generate_size_fit_try_on(
        capability,
        SizeFitImages {
            subject: &subject,
            garment: &garment,
            size_guide: &size_guide,
        },
        &body,
        &target,
        &args.product,
        &LogProgress,
    )
    .await?;
    write_media(&args.out, &image).await
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let _guards = init_logging(&CONFIG);

    let args: Vec<String> = std::env::args().collect();
    let command = parse_args(&args)?;

    let capability = GeminiCapability::from_config(&CONFIG);
    info!(
        text_model = capability.text_model(),
        image_model = capability.image_model(),
        "Starting tryon"
    );

    let result = match command {
        CliCommand::TryOn(args) => run_try_on_command(&capability, args).await,
        CliCommand::SizeFit(args) => run_size_fit_command(&capability, args).await,
    };
    if let Err(err) = &result {
        error!("tryon failed: {err:#}");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn parses_try_on_with_repeated_garments() {
        let command = parse_args(&args(&[
            "tryon", "try-on", "--subject", "me.jpg", "--garment", "a.png", "--garment", "b.png",
            "--same-garment", "--out", "out.png",
        ]))
        .expect("valid args");
        match command {
            CliCommand::TryOn(parsed) => {
                assert_eq!(parsed.garments.len(), 2);
                assert!(parsed.same_garment);
                assert_eq!(parsed.out, PathBuf::from("out.png"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_size_fit_sizes_list() {
        let command = parse_args(&args(&[
            "tryon", "size-fit", "--subject", "me.jpg", "--garment", "g.png", "--size-guide",
            "chart.png", "--sizes", "S, M ,L,", "--product", "Wrap dress", "--out", "out.png",
        ]))
        .expect("valid args");
        match command {
            CliCommand::SizeFit(parsed) => {
                assert_eq!(parsed.sizes, vec!["S", "M", "L"]);
                assert_eq!(parsed.product.name, "Wrap dress");
                assert!(parsed.target.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_missing_values_and_unknown_commands() {
        assert!(parse_args(&args(&["tryon", "try-on", "--subject"])).is_err());
        assert!(parse_args(&args(&["tryon", "paint"])).is_err());
        assert!(parse_args(&args(&[
            "tryon", "size-fit", "--subject", "a", "--garment", "b", "--size-guide", "c", "--out",
            "d"
        ]))
        .is_err());
    }
}
