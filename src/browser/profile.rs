//! Fingerprint profiles for isolated browser contexts.

use serde::{Deserialize, Serialize};

/// Fingerprint inputs for a context. Absent fields fall back to the safe
/// defaults in `Default`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserProfile {
    pub user_agent: String,
    /// (width, height) in CSS pixels
    pub viewport: (u32, u32),
    pub locale: String,
    pub timezone: String,
    /// (latitude, longitude)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geolocation: Option<(f64, f64)>,
    /// Do-Not-Track header
    pub dnt: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// Apply stealth countermeasures (webdriver flag masking etc.)
    pub stealth: bool,
}

impl Default for BrowserProfile {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36"
                .to_string(),
            viewport: (1920, 1080),
            locale: "en-US".to_string(),
            timezone: "UTC".to_string(),
            geolocation: None,
            dnt: false,
            proxy: None,
            stealth: false,
        }
    }
}

impl BrowserProfile {
    /// The default profile with stealth countermeasures enabled.
    #[must_use]
    pub fn stealth() -> Self {
        Self {
            stealth: true,
            dnt: true,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }
}
