// Error types shared across the crate
//
// Rejection messages are shown to end users verbatim, so Display carries
// the human-readable text and the variant carries the data.

use std::time::Duration;

/// Why `ImageQueue::submit` turned a request away
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    #[error("Content moderation: your prompt was flagged ({reason}). Please modify your request.")]
    Unsafe { reason: String },

    #[error(
        "Rate limit reached ({used}/{limit} generations per {}). Try again later, in about {}.",
        wait_hint(.window),
        wait_hint(.retry_after)
    )]
    RateLimited {
        used: usize,
        limit: usize,
        window: Duration,
        retry_after: Duration,
    },

    #[error("Please wait {} before requesting another image.", wait_hint(.remaining))]
    Cooldown { remaining: Duration },

    #[error("You already have {limit} image requests waiting (limit {limit} per user). Wait for one to finish first.")]
    TooManyPending { limit: usize },

    #[error("The image queue is full ({max} requests). Please try again later.")]
    QueueFull { max: usize },
}

impl Rejection {
    /// Short machine-friendly label, used in logs and statistics
    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::Unsafe { .. } => "unsafe",
            Rejection::RateLimited { .. } => "rate_limited",
            Rejection::Cooldown { .. } => "cooldown",
            Rejection::TooManyPending { .. } => "too_many_pending",
            Rejection::QueueFull { .. } => "queue_full",
        }
    }
}

/// Failures talking to the image-generation server
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("image server request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("image server returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("image server response contained no images")]
    NoImage,

    #[error("image payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
}

/// Render a wait hint like "45s", "3m 20s" or "1h 5m".
///
/// Sub-second remainders round up so a positive wait never prints as "0s".
pub fn format_wait(wait: Duration) -> String {
    let mut secs = wait.as_secs();
    if wait.subsec_nanos() > 0 {
        secs += 1;
    }
    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

fn wait_hint(wait: &Duration) -> String {
    format_wait(*wait)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_wait() {
        assert_eq!(format_wait(Duration::from_secs(45)), "45s");
        assert_eq!(format_wait(Duration::from_secs(200)), "3m 20s");
        assert_eq!(format_wait(Duration::from_secs(3900)), "1h 5m");
        assert_eq!(format_wait(Duration::from_millis(300)), "1s");
        assert_eq!(format_wait(Duration::ZERO), "0s");
    }

    #[test]
    fn test_rate_limited_message_has_wait_hint() {
        let rejection = Rejection::RateLimited {
            used: 3,
            limit: 3,
            window: Duration::from_secs(3600),
            retry_after: Duration::from_secs(125),
        };
        let message = rejection.to_string();
        assert!(message.contains("3/3"));
        assert!(message.contains("try again later") || message.contains("Try again later"));
        assert!(message.contains("2m 5s"));
        assert_eq!(rejection.kind(), "rate_limited");
    }

    #[test]
    fn test_capacity_messages_state_limit() {
        assert!(Rejection::TooManyPending { limit: 2 }
            .to_string()
            .contains("limit 2"));
        assert!(Rejection::QueueFull { max: 20 }.to_string().contains("20"));
    }
}
