//! Virtual try-on pipelines over a vision-language capability.
//!
//! [`tryon::run_try_on`] composes a photo of a person wearing one or more
//! reference garments; [`sizing`] estimates measurements, recommends a size and
//! renders a size-specific fit. Both talk to the model only through the
//! [`capability::Capability`] trait.

pub mod aspect;
pub mod capability;
pub mod classifier;
pub mod config;
pub mod error;
pub mod media;
pub mod progress;
pub mod prompt;
pub mod sizing;
pub mod strategy;
pub mod tryon;
pub mod utils;

pub use capability::{Capability, CapabilityError, GeminiCapability};
pub use error::TryOnError;
pub use media::{GarmentItem, MediaDescriptor};
pub use progress::ProgressSink;
pub use tryon::{run_try_on, TryOnOutcome, TryOnRequest};
