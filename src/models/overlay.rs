use serde::{Deserialize, Serialize};

/// Known out-of-band error codes carried by the inference endpoint.
///
/// These arrive either as the `message` field of a non-2xx JSON body or as
/// an error record inside the response stream. Matched exhaustively; any
/// other code falls through to a generic transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlErrorCode {
    WrongKey,
    NotProAnymore,
    LimitProModelReached,
    UpgradePro,
    LimitReachedPro,
    MaxImages,
    MaxImageSize,
    MaxTotalImageSize,
    DailyFreeLimitReached,
    PremiumSuggestion,
    LimitReached,
}

impl ControlErrorCode {
    /// Map a wire code string onto the closed taxonomy
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "wrong_key" => Some(Self::WrongKey),
            "show_not_pro_anymore" => Some(Self::NotProAnymore),
            "show_limit_pro_model_reached" => Some(Self::LimitProModelReached),
            "show_upgrade_pro" => Some(Self::UpgradePro),
            "show_limit_reached_pro" => Some(Self::LimitReachedPro),
            "limit_max_images" => Some(Self::MaxImages),
            "limit_max_imagesize" => Some(Self::MaxImageSize),
            "limit_max_total_imagesize" => Some(Self::MaxTotalImageSize),
            "show_daily_free_limit_reached" => Some(Self::DailyFreeLimitReached),
            "show_premium_suggestion" => Some(Self::PremiumSuggestion),
            "show_limit_reached" => Some(Self::LimitReached),
            _ => None,
        }
    }

    pub fn as_code(&self) -> &'static str {
        match self {
            Self::WrongKey => "wrong_key",
            Self::NotProAnymore => "show_not_pro_anymore",
            Self::LimitProModelReached => "show_limit_pro_model_reached",
            Self::UpgradePro => "show_upgrade_pro",
            Self::LimitReachedPro => "show_limit_reached_pro",
            Self::MaxImages => "limit_max_images",
            Self::MaxImageSize => "limit_max_imagesize",
            Self::MaxTotalImageSize => "limit_max_total_imagesize",
            Self::DailyFreeLimitReached => "show_daily_free_limit_reached",
            Self::PremiumSuggestion => "show_premium_suggestion",
            Self::LimitReached => "show_limit_reached",
        }
    }

    /// Overlay content shown for this code instead of a conversation message
    pub fn overlay(&self) -> ErrorOverlay {
        match self {
            Self::WrongKey => ErrorOverlay::new(
                "Invalid API key",
                "The configured API key was rejected by the service. Check your key in the settings.",
                "key",
                false,
            ),
            Self::NotProAnymore => ErrorOverlay::new(
                "Subscription expired",
                "Your Pro subscription is no longer active. Renew it to keep using Pro models.",
                "crown",
                true,
            ),
            Self::LimitProModelReached => ErrorOverlay::new(
                "Pro model limit reached",
                "You have used up the quota for this Pro model. Try again later or switch models.",
                "gauge",
                true,
            ),
            Self::UpgradePro => ErrorOverlay::new(
                "Pro required",
                "This feature is only available with a Pro subscription.",
                "crown",
                true,
            ),
            Self::LimitReachedPro => ErrorOverlay::new(
                "Pro quota exhausted",
                "Your Pro usage quota has been reached. It resets at the start of the next period.",
                "gauge",
                true,
            ),
            Self::MaxImages => ErrorOverlay::new(
                "Too many images",
                "This request carries more images than the model accepts. Remove some and retry.",
                "image",
                false,
            ),
            Self::MaxImageSize => ErrorOverlay::new(
                "Image too large",
                "One of the attached images exceeds the maximum size.",
                "image",
                false,
            ),
            Self::MaxTotalImageSize => ErrorOverlay::new(
                "Attachments too large",
                "The combined size of the attached images exceeds the limit.",
                "image",
                false,
            ),
            Self::DailyFreeLimitReached => ErrorOverlay::new(
                "Daily limit reached",
                "The free daily message quota has been used up. Upgrade or come back tomorrow.",
                "gauge",
                true,
            ),
            Self::PremiumSuggestion => ErrorOverlay::new(
                "Try Premium",
                "This request would benefit from a premium model.",
                "sparkles",
                true,
            ),
            Self::LimitReached => ErrorOverlay::new(
                "Limit reached",
                "The message quota has been reached. Please try again later.",
                "gauge",
                true,
            ),
        }
    }
}

/// Blocking modal content raised for a recognized control-error code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorOverlay {
    pub title: String,
    pub body: String,
    pub icon: String,
    /// Whether the overlay should carry an upgrade call-to-action
    pub upsell: bool,
}

impl ErrorOverlay {
    fn new(title: &str, body: &str, icon: &str, upsell: bool) -> Self {
        Self {
            title: title.to_string(),
            body: body.to_string(),
            icon: icon.to_string(),
            upsell,
        }
    }
}

/// Typed events forwarded to the host overlay surface.
/// Fire-and-forget; the core never consumes a return value.
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayEvent {
    Error(ErrorOverlay),
    PremiumSuggestion(serde_json::Value),
    SponsoredContent {
        title: String,
        items: Vec<serde_json::Value>,
        token: String,
    },
}

/// Host collaborator receiving overlay events (modals, sponsored slots)
pub trait OverlayNotifier: Send + Sync {
    fn notify(&self, event: OverlayEvent);
}

/// Host collaborator rendering in-flight turn progress.
/// The provisional buffer lives in the turn controller; this trait only
/// mirrors it for display and clears in-progress flags on completion.
pub trait TurnDisplay: Send + Sync {
    fn turn_started(&self, _conversation_id: &str) {}
    fn delta(&self, _conversation_id: &str, _text: &str) {}
    fn turn_finished(&self, _conversation_id: &str) {}
}

/// No-op display for headless use and tests
pub struct NullDisplay;

impl TurnDisplay for NullDisplay {}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_CODES: &[&str] = &[
        "wrong_key",
        "show_not_pro_anymore",
        "show_limit_pro_model_reached",
        "show_upgrade_pro",
        "show_limit_reached_pro",
        "limit_max_images",
        "limit_max_imagesize",
        "limit_max_total_imagesize",
        "show_daily_free_limit_reached",
        "show_premium_suggestion",
        "show_limit_reached",
    ];

    #[test]
    fn test_code_roundtrip() {
        for code in ALL_CODES {
            let parsed = ControlErrorCode::from_code(code).unwrap();
            assert_eq!(parsed.as_code(), *code);
        }
    }

    #[test]
    fn test_unknown_code_is_none() {
        assert_eq!(ControlErrorCode::from_code("show_teapot"), None);
        assert_eq!(ControlErrorCode::from_code(""), None);
    }

    #[test]
    fn test_every_code_has_overlay_content() {
        for code in ALL_CODES {
            let overlay = ControlErrorCode::from_code(code).unwrap().overlay();
            assert!(!overlay.title.is_empty());
            assert!(!overlay.body.is_empty());
            assert!(!overlay.icon.is_empty());
        }
    }

    #[test]
    fn test_quota_codes_carry_upsell() {
        assert!(ControlErrorCode::DailyFreeLimitReached.overlay().upsell);
        assert!(ControlErrorCode::UpgradePro.overlay().upsell);
        assert!(!ControlErrorCode::WrongKey.overlay().upsell);
    }
}
