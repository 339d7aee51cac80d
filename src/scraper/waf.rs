//! Anti-bot challenge detection and best-effort bypass.
//!
//! Detection is table driven: [`CHALLENGE_RULES`] is checked in order against
//! a [`PageProbe`] read from the page, and the first matching rule names the
//! vendor and the kind of challenge. Bypass is bounded in time and never
//! loops beyond one interactive attempt.

use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::scraper::extractor::{ProbeArgs, PROBE_SCRIPT};
use crate::scraper::{RemotePage, ScrapeError, ScraperConfig, MAX_WAIT};

use ChallengeKind::*;
use Signature::*;

/// HTTP statuses that, together with a challenge signature, mean the page stayed blocked
pub const BLOCKING_STATUSES: &[u16] = &[403, 429, 503];

const PROBE_TEXT_LIMIT: usize = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    /// Pointer must be held down on a control
    PressAndHold,
    /// A single click on a proceed control
    ClickThrough,
    /// Script-only interstitial that clears by itself
    JsChallenge,
    Captcha,
    /// Hard refusal; nothing to interact with
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signature {
    /// Lowercase substring of the visible body text
    Text(&'static str),
    /// Body text that also turns up in ordinary articles; only counts alongside a
    /// blocking status or a matched challenge control
    Hint(&'static str),
    /// Lowercase substring of the document title
    Title(&'static str),
    /// CSS selector present in the DOM
    Selector(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChallengeRule {
    pub signature: Signature,
    pub label: &'static str,
    pub kind: ChallengeKind,
}

const fn rule(signature: Signature, label: &'static str, kind: ChallengeKind) -> ChallengeRule {
    ChallengeRule {
        signature,
        label,
        kind,
    }
}

/// Checked in order; the first match wins
pub const CHALLENGE_RULES: &[ChallengeRule] = &[
    // Press-and-hold prompts
    rule(Selector("#px-captcha"), "PerimeterX", PressAndHold),
    rule(Text("press & hold"), "PerimeterX", PressAndHold),
    rule(Hint("press and hold"), "Press-and-hold prompt", PressAndHold),
    // CAPTCHA widgets
    rule(Selector("iframe[src*=\"captcha-delivery.com\"]"), "DataDome", Captcha),
    rule(Selector("iframe[src*=\"hcaptcha.com\"]"), "hCaptcha", Captcha),
    rule(Selector(".h-captcha"), "hCaptcha", Captcha),
    rule(Selector("iframe[src*=\"recaptcha\"]"), "reCAPTCHA", Captcha),
    rule(Selector(".g-recaptcha"), "reCAPTCHA", Captcha),
    // Firewall vendors
    rule(Selector("iframe[src*=\"challenges.cloudflare.com\"]"), "Cloudflare Turnstile", ClickThrough),
    rule(Selector("#challenge-form"), "Cloudflare", JsChallenge),
    rule(Selector("#cf-challenge-running"), "Cloudflare", JsChallenge),
    rule(Title("just a moment"), "Cloudflare", JsChallenge),
    rule(Text("checking your browser before accessing"), "Cloudflare", JsChallenge),
    rule(Text("checking if the site connection is secure"), "Cloudflare", JsChallenge),
    rule(Title("ddos-guard"), "DDoS-Guard", JsChallenge),
    rule(Text("sucuri website firewall"), "Sucuri", JsChallenge),
    rule(Text("incapsula incident id"), "Imperva", Denied),
    rule(Text("you don't have permission to access"), "Akamai", Denied),
    rule(Title("access denied"), "Access denied", Denied),
    // Generic interstitials
    rule(Hint("verify you are human"), "Human verification", ClickThrough),
    rule(Hint("are you a robot"), "Robot check", ClickThrough),
    rule(Hint("click to continue"), "Click-through interstitial", ClickThrough),
    rule(Hint("enable javascript and cookies to continue"), "JavaScript challenge", JsChallenge),
    rule(Hint("please wait while we verify"), "JavaScript challenge", JsChallenge),
];

/// Proceed controls, most specific first. All are scoped to challenge markup
/// so a page's own forms are never submitted.
pub const PROCEED_SELECTORS: &[&str] = &[
    "#px-captcha",
    "[aria-label*=\"Press & Hold\"]",
    "#challenge-stage input[type=\"checkbox\"]",
    ".cb-lb input[type=\"checkbox\"]",
    "#challenge-stage button",
    "#challenge-form input[type=\"checkbox\"]",
    "#challenge-form [type=\"submit\"]",
    "form[action*=\"captcha\"] [type=\"submit\"]",
    "form[id*=\"challenge\"] [type=\"submit\"]",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeState {
    Unknown,
    Detecting,
    NotChallenged,
    ChallengeDetected,
    BypassAttempted,
    Bypassed,
    StillBlocked,
}

/// Page state as reported by the probe script
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PageProbe {
    pub title: String,
    /// Lowercased, truncated body text
    pub text: String,
    pub status: Option<u16>,
    /// Which of the requested selectors exist
    pub matched: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub label: &'static str,
    pub kind: ChallengeKind,
}

impl Signature {
    fn matches(&self, probe: &PageProbe) -> bool {
        match self {
            Text(needle) => probe.text.contains(needle),
            Hint(needle) => {
                probe.text.contains(needle) && (is_blocking_status(probe.status) || !probe.matched.is_empty())
            }
            Title(needle) => probe.title.to_lowercase().contains(needle),
            Selector(selector) => probe.matched.iter().any(|m| m == selector),
        }
    }
}

/// First rule matching the probe, if any
pub fn detect(probe: &PageProbe) -> Option<Detection> {
    CHALLENGE_RULES
        .iter()
        .find(|rule| rule.signature.matches(probe))
        .map(|rule| Detection {
            label: rule.label,
            kind: rule.kind,
        })
}

pub fn is_blocking_status(status: Option<u16>) -> bool {
    status.is_some_and(|s| BLOCKING_STATUSES.contains(&s))
}

/// Every selector the probe needs to report on
pub fn probe_selectors() -> Vec<&'static str> {
    let mut selectors: Vec<&'static str> = CHALLENGE_RULES
        .iter()
        .filter_map(|rule| match rule.signature {
            Selector(s) => Some(s),
            _ => None,
        })
        .collect();
    for s in PROCEED_SELECTORS {
        if !selectors.contains(s) {
            selectors.push(s);
        }
    }
    selectors
}

/// Outcome of challenge handling for one page
#[derive(Debug, Clone, PartialEq)]
pub struct ChallengeReport {
    pub state: ChallengeState,
    pub detection: Option<Detection>,
    /// Document status after handling
    pub status: Option<u16>,
    pub history: Vec<ChallengeState>,
}

impl ChallengeReport {
    /// A signature still matches and the server is refusing the request
    pub fn is_blocked(&self) -> bool {
        self.state == ChallengeState::StillBlocked && is_blocking_status(self.status)
    }

    fn advance(&mut self, next: ChallengeState) {
        debug!("Challenge state {:?} -> {:?}", self.state, next);
        self.state = next;
        self.history.push(next);
    }
}

pub struct WafChallengeHandler {
    hold_duration: Duration,
    wait_limit: Duration,
    poll_interval: Duration,
    selectors: Vec<&'static str>,
}

impl WafChallengeHandler {
    pub fn new(hold_duration: Duration, wait_limit: Duration) -> Self {
        Self {
            hold_duration,
            wait_limit: wait_limit.min(MAX_WAIT),
            poll_interval: Duration::from_millis(500),
            selectors: probe_selectors(),
        }
    }

    pub fn from_config(config: &ScraperConfig) -> Self {
        Self::new(config.hold_duration(), config.challenge_wait())
    }

    pub async fn probe(&self, page: &dyn RemotePage) -> Result<PageProbe, ScrapeError> {
        let call = PROBE_SCRIPT.call(&ProbeArgs {
            selectors: &self.selectors,
            text_limit: PROBE_TEXT_LIMIT,
        });
        let value = page.evaluate(&call).await?;
        let mut probe: PageProbe = serde_json::from_value(value)
            .map_err(|e| ScrapeError::ExtractionFailure(format!("Unreadable probe result: {}", e)))?;
        // Older engines don't expose the navigation status to scripts
        probe.status = probe.status.or_else(|| page.status());
        Ok(probe)
    }

    /// Detect a challenge on the loaded page and try once to get past it
    pub async fn resolve(&self, page: &dyn RemotePage) -> Result<ChallengeReport, ScrapeError> {
        let mut report = ChallengeReport {
            state: ChallengeState::Unknown,
            detection: None,
            status: page.status(),
            history: vec![ChallengeState::Unknown],
        };

        report.advance(ChallengeState::Detecting);
        let probe = self.probe(page).await?;
        report.status = probe.status;

        let Some(detection) = detect(&probe) else {
            report.advance(ChallengeState::NotChallenged);
            return Ok(report);
        };

        info!(
            "Challenge detected: {} ({:?}), status {:?}",
            detection.label, detection.kind, report.status
        );
        report.detection = Some(detection);
        report.advance(ChallengeState::ChallengeDetected);

        let after = if detection.kind == ChallengeKind::Denied {
            debug!("{} is a hard denial, not attempting bypass", detection.label);
            probe
        } else {
            report.advance(ChallengeState::BypassAttempted);
            self.attempt_bypass(page, detection, &probe).await?
        };

        report.status = after.status;
        match detect(&after) {
            None => report.advance(ChallengeState::Bypassed),
            Some(still) => {
                warn!("Challenge still present after handling: {}", still.label);
                report.advance(ChallengeState::StillBlocked);
            }
        }

        Ok(report)
    }

    async fn attempt_bypass(
        &self,
        page: &dyn RemotePage,
        detection: Detection,
        probe: &PageProbe,
    ) -> Result<PageProbe, ScrapeError> {
        if detection.kind != ChallengeKind::JsChallenge {
            if let Some(selector) = PROCEED_SELECTORS
                .iter()
                .find(|s| probe.matched.iter().any(|m| m == *s))
            {
                let acted = if detection.kind == ChallengeKind::PressAndHold {
                    debug!("Holding {} for {:?}", selector, self.hold_duration);
                    page.press_and_hold(selector, self.hold_duration).await?
                } else {
                    debug!("Clicking {}", selector);
                    page.click(selector).await?
                };

                if !acted {
                    debug!("Proceed control {} vanished before interaction", selector);
                }
            } else {
                debug!("No proceed control found, waiting passively");
            }
        }

        self.wait_for_clear(page).await
    }

    /// Poll until no signature matches or the wait limit passes; returns the last probe
    async fn wait_for_clear(&self, page: &dyn RemotePage) -> Result<PageProbe, ScrapeError> {
        let deadline = Instant::now() + self.wait_limit;
        loop {
            let probe = self.probe(page).await?;
            if detect(&probe).is_none() || Instant::now() >= deadline {
                return Ok(probe);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
