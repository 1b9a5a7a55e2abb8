use crate::capability::CapabilityError;

/// Terminal failure of one pipeline invocation.
#[derive(Debug, thiserror::Error)]
pub enum TryOnError {
    #[error("Missing input: {0}")]
    MissingInput(String),
    #[error("Analysis failed: {0}")]
    AnalysisFailed(String),
    #[error("No image produced{}", explanation_suffix(.explanation))]
    NoImageProduced { explanation: Option<String> },
    #[error("Image synthesis failed: {0}")]
    SynthesisFailed(String),
    #[error("Capability unavailable: {0}")]
    CapabilityUnavailable(String),
}

fn explanation_suffix(explanation: &Option<String>) -> String {
    match explanation {
        Some(text) => format!(": {text}"),
        None => String::new(),
    }
}

impl TryOnError {
    /// Maps a failed text or structured call.
    pub fn from_analysis(err: CapabilityError) -> Self {
        match err {
            CapabilityError::Unavailable(detail) => TryOnError::CapabilityUnavailable(detail),
            other => TryOnError::AnalysisFailed(other.to_string()),
        }
    }

    /// Maps a failed synthesis call.
    pub fn from_synthesis(err: CapabilityError) -> Self {
        match err {
            CapabilityError::Unavailable(detail) => TryOnError::CapabilityUnavailable(detail),
            other => TryOnError::SynthesisFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_capability_keeps_its_kind() {
        let err = TryOnError::from_analysis(CapabilityError::Unavailable("no key".to_string()));
        assert!(matches!(err, TryOnError::CapabilityUnavailable(_)));
        let err = TryOnError::from_synthesis(CapabilityError::Unavailable("no key".to_string()));
        assert!(matches!(err, TryOnError::CapabilityUnavailable(_)));
    }

    #[test]
    fn request_failures_split_by_stage() {
        let err = TryOnError::from_analysis(CapabilityError::Request("503".to_string()));
        assert!(matches!(err, TryOnError::AnalysisFailed(_)));
        let err = TryOnError::from_synthesis(CapabilityError::Request("503".to_string()));
        assert!(matches!(err, TryOnError::SynthesisFailed(_)));
    }

    #[test]
    fn no_image_message_includes_explanation() {
        let err = TryOnError::NoImageProduced {
            explanation: Some("I can't edit this photo".to_string()),
        };
        assert_eq!(err.to_string(), "No image produced: I can't edit this photo");
        let err = TryOnError::NoImageProduced { explanation: None };
        assert_eq!(err.to_string(), "No image produced");
    }
}
