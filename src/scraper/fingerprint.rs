//! Randomized browser identity applied to each new browsing context.

use rand::seq::SliceRandom;
use rand::Rng;

const VIEWPORTS: &[(u32, u32)] = &[
    (1920, 1080),
    (1366, 768),
    (1536, 864),
    (1440, 900),
    (1280, 800),
    (1600, 900),
    (2560, 1440),
];

const LOCALES: &[&str] = &["en-US", "en-GB", "en-CA", "en-AU", "de-DE", "fr-FR", "es-ES", "nl-NL"];

const TIMEZONES: &[&str] = &[
    "America/New_York",
    "America/Chicago",
    "America/Los_Angeles",
    "Europe/London",
    "Europe/Berlin",
    "Europe/Paris",
    "Europe/Amsterdam",
    "Australia/Sydney",
];

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/127.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/127.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36 Edg/128.0.0.0",
];

/// Hides the automation markers headless Chrome exposes to page scripts
pub const STEALTH_INIT_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
Object.defineProperty(navigator, 'languages', { get: () => __LANGUAGES__ });
window.chrome = window.chrome || { runtime: {} };
const originalQuery = window.navigator.permissions && window.navigator.permissions.query;
if (originalQuery) {
  window.navigator.permissions.query = (parameters) =>
    parameters.name === 'notifications'
      ? Promise.resolve({ state: Notification.permission })
      : originalQuery(parameters);
}
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintProfile {
    pub viewport: (u32, u32),
    pub locale: String,
    pub timezone: String,
    pub user_agent: String,
}

impl FingerprintProfile {
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        Self::pick(&mut rng)
    }

    pub fn pick<R: Rng + ?Sized>(rng: &mut R) -> Self {
        // The pools are non-empty constants
        let viewport = *VIEWPORTS.choose(rng).unwrap_or(&VIEWPORTS[0]);
        let locale = LOCALES.choose(rng).unwrap_or(&LOCALES[0]);
        let timezone = TIMEZONES.choose(rng).unwrap_or(&TIMEZONES[0]);
        let user_agent = USER_AGENTS.choose(rng).unwrap_or(&USER_AGENTS[0]);

        Self {
            viewport,
            locale: locale.to_string(),
            timezone: timezone.to_string(),
            user_agent: user_agent.to_string(),
        }
    }

    /// `Accept-Language` value matching the locale, e.g. `de-DE,de;q=0.9,en;q=0.8`
    pub fn accept_language(&self) -> String {
        let primary = self.locale.split('-').next().unwrap_or("en");
        if primary == "en" {
            format!("{},en;q=0.9", self.locale)
        } else {
            format!("{},{};q=0.9,en;q=0.8", self.locale, primary)
        }
    }

    /// Stealth script with `navigator.languages` aligned to the locale
    pub fn init_script(&self) -> String {
        let primary = self.locale.split('-').next().unwrap_or("en");
        let languages = serde_json::json!([self.locale, primary]).to_string();
        STEALTH_INIT_SCRIPT.replace("__LANGUAGES__", &languages)
    }
}
