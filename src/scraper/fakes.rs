//! Scriptable in-process browser engine for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::scraper::{BrowserHandle, BrowserLauncher, ContextOptions, RemotePage, ScrapeError, ScriptCall};

/// How a fake challenge goes away
#[derive(Debug, Clone, PartialEq)]
pub enum Clearance {
    Never,
    Click(&'static str),
    Hold(&'static str),
    /// Cleared once this many probes have been answered
    AfterProbes(usize),
}

#[derive(Debug, Clone)]
pub struct FakeChallenge {
    pub title: String,
    pub text: String,
    pub matched: Vec<&'static str>,
    pub status: Option<u16>,
    pub clearance: Clearance,
}

impl FakeChallenge {
    pub fn cloudflare(clearance: Clearance) -> Self {
        Self {
            title: "Just a moment...".into(),
            text: "checking your browser before accessing example.com".into(),
            matched: vec!["#challenge-form"],
            status: None,
            clearance,
        }
    }

    pub fn press_and_hold(clearance: Clearance) -> Self {
        Self {
            title: "Access to this page has been denied".into(),
            text: "press & hold to confirm you are a human (and not a bot).".into(),
            matched: vec!["#px-captcha"],
            status: None,
            clearance,
        }
    }

    pub fn click_through(clearance: Clearance) -> Self {
        Self {
            title: "One more step".into(),
            text: "verify you are human by completing the action below.".into(),
            matched: vec!["#challenge-stage button"],
            status: None,
            clearance,
        }
    }

    pub fn denied() -> Self {
        Self {
            title: "Access Denied".into(),
            text: "you don't have permission to access this resource.".into(),
            matched: vec![],
            status: None,
            clearance: Clearance::Never,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }
}

/// What a URL serves when rendered
#[derive(Debug, Clone)]
pub struct FakeSite {
    pub url: String,
    pub status: Option<u16>,
    pub challenge: Option<FakeChallenge>,
    pub preview: Value,
    pub article: Value,
    pub paragraphs: usize,
    pub has_article: bool,
    pub navigate_error: Option<ScrapeError>,
    pub load_delay: Duration,
}

impl FakeSite {
    /// A rendered page with OG metadata and `paragraphs` paragraphs of article text
    pub fn article_page(url: &str, paragraphs: usize) -> Self {
        let body: Vec<String> = (0..paragraphs)
            .map(|i| format!("Paragraph {} of the story, with enough words to count.", i + 1))
            .collect();
        let content_html: String = body.iter().map(|p| format!("<p>{}</p>", p)).collect();

        Self {
            url: url.to_string(),
            status: Some(200),
            challenge: None,
            preview: json!({
                "url": url,
                "title": "Rendered Title | Example",
                "h1": "Rendered Title",
                "metas": [
                    {"property": "og:title", "content": "Rendered Title"},
                    {"property": "og:description", "content": "Rendered description"},
                    {"property": "og:image", "content": "/cover.jpg"}
                ],
                "icons": []
            }),
            article: json!({
                "title": "Rendered Title",
                "byline": "A. Writer",
                "siteName": "Example",
                "excerpt": "Rendered description",
                "lang": "en",
                "contentHtml": content_html,
                "textContent": body.join(" "),
                "links": []
            }),
            paragraphs,
            has_article: paragraphs > 0,
            navigate_error: None,
            load_delay: Duration::ZERO,
        }
    }

    pub fn with_challenge(mut self, challenge: FakeChallenge) -> Self {
        self.challenge = Some(challenge);
        self
    }

    pub fn with_article(mut self, article: Value) -> Self {
        self.article = article;
        self
    }

    pub fn with_navigate_error(mut self, err: ScrapeError) -> Self {
        self.navigate_error = Some(err);
        self
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }
}

/// URL → site routing shared by every page of a fake engine
#[derive(Default)]
pub struct FakeSites {
    routes: Mutex<HashMap<String, FakeSite>>,
}

impl FakeSites {
    pub fn route(&self, site: FakeSite) {
        self.routes.lock().unwrap().insert(site.url.clone(), site);
    }

    /// Navigating to `from` lands on `site`, as after a server redirect
    pub fn redirect(&self, from: &str, site: FakeSite) {
        self.routes.lock().unwrap().insert(from.to_string(), site);
    }

    fn lookup(&self, url: &str) -> Option<FakeSite> {
        self.routes.lock().unwrap().get(url).cloned()
    }
}

#[derive(Default)]
pub struct FakeStats {
    pub contexts_opened: AtomicUsize,
    pub pages_closed: AtomicUsize,
    pub navigations: Mutex<Vec<String>>,
    pub profiles: Mutex<Vec<ContextOptions>>,
}

impl FakeStats {
    pub fn navigation_count(&self) -> usize {
        self.navigations.lock().unwrap().len()
    }
}

#[derive(Default)]
struct PageState {
    site: Option<FakeSite>,
    cleared: bool,
    probes: usize,
    clicks: Vec<String>,
    holds: Vec<String>,
    closed: bool,
}

pub struct FakePage {
    sites: Arc<FakeSites>,
    stats: Arc<FakeStats>,
    state: Mutex<PageState>,
}

impl FakePage {
    /// A page already showing `site`
    pub fn new(site: FakeSite) -> Self {
        let page = Self::routed(Arc::new(FakeSites::default()), Arc::new(FakeStats::default()));
        page.state.lock().unwrap().site = Some(site);
        page
    }

    fn routed(sites: Arc<FakeSites>, stats: Arc<FakeStats>) -> Self {
        Self {
            sites,
            stats,
            state: Mutex::new(PageState::default()),
        }
    }

    pub fn clicks(&self) -> Vec<String> {
        self.state.lock().unwrap().clicks.clone()
    }

    pub fn holds(&self) -> Vec<String> {
        self.state.lock().unwrap().holds.clone()
    }

    fn challenge_active(state: &PageState) -> Option<&FakeChallenge> {
        if state.cleared {
            return None;
        }
        state.site.as_ref().and_then(|s| s.challenge.as_ref())
    }

    fn interact(&self, selector: &str, held: bool) -> bool {
        let mut state = self.state.lock().unwrap();
        if held {
            state.holds.push(selector.to_string());
        } else {
            state.clicks.push(selector.to_string());
        }

        let Some(challenge) = Self::challenge_active(&state) else {
            return false;
        };
        let present = challenge.matched.iter().any(|m| *m == selector);
        let clears = match &challenge.clearance {
            Clearance::Click(s) => !held && *s == selector,
            Clearance::Hold(s) => held && *s == selector,
            _ => false,
        };
        if clears {
            state.cleared = true;
        }
        present
    }
}

#[async_trait]
impl RemotePage for FakePage {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), ScrapeError> {
        self.stats.navigations.lock().unwrap().push(url.to_string());

        let site = match self.state.lock().unwrap().site.clone() {
            Some(site) => Some(site),
            None => self.sites.lookup(url),
        };
        let Some(site) = site else {
            return Err(ScrapeError::Network(format!("no route to {}", url)));
        };

        if !site.load_delay.is_zero() {
            if site.load_delay > timeout {
                tokio::time::sleep(timeout).await;
                return Err(ScrapeError::Network(format!("navigation to {} timed out", url)));
            }
            tokio::time::sleep(site.load_delay).await;
        }

        if let Some(err) = site.navigate_error.clone() {
            return Err(err);
        }

        self.state.lock().unwrap().site = Some(site);
        Ok(())
    }

    async fn evaluate(&self, call: &ScriptCall) -> Result<Value, ScrapeError> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(ScrapeError::Browser("page closed".into()));
        }
        let Some(site) = state.site.clone() else {
            return Err(ScrapeError::Browser("nothing loaded".into()));
        };

        match call.name() {
            "probe" => {
                state.probes += 1;
                if let Some(Clearance::AfterProbes(n)) = site.challenge.as_ref().map(|c| &c.clearance) {
                    if state.probes > *n {
                        state.cleared = true;
                    }
                }
                let value = match Self::challenge_active(&state) {
                    Some(challenge) => json!({
                        "title": challenge.title,
                        "text": challenge.text,
                        "status": null,
                        "matched": challenge.matched,
                    }),
                    None => json!({
                        "title": site.preview["title"].clone(),
                        "text": "an ordinary page",
                        "status": null,
                        "matched": [],
                    }),
                };
                Ok(value)
            }
            "readiness" => Ok(json!({
                "paragraphs": site.paragraphs,
                "hasArticle": site.has_article,
            })),
            "preview" => Ok(site.preview.clone()),
            "article" => Ok(site.article.clone()),
            other => Err(ScrapeError::ExtractionFailure(format!("unknown script {}", other))),
        }
    }

    fn status(&self) -> Option<u16> {
        let state = self.state.lock().unwrap();
        let site_status = state.site.as_ref().and_then(|s| s.status);
        match Self::challenge_active(&state) {
            Some(challenge) => challenge.status.or(site_status),
            None => site_status,
        }
    }

    async fn current_url(&self) -> Option<String> {
        self.state.lock().unwrap().site.as_ref().map(|s| s.url.clone())
    }

    async fn click(&self, selector: &str) -> Result<bool, ScrapeError> {
        Ok(self.interact(selector, false))
    }

    async fn press_and_hold(&self, selector: &str, hold: Duration) -> Result<bool, ScrapeError> {
        tokio::time::sleep(hold).await;
        Ok(self.interact(selector, true))
    }

    async fn close(&self) {
        let mut state = self.state.lock().unwrap();
        if !state.closed {
            state.closed = true;
            self.stats.pages_closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub struct FakeBrowser {
    connected: AtomicBool,
    closed: AtomicBool,
    sites: Arc<FakeSites>,
    stats: Arc<FakeStats>,
}

impl FakeBrowser {
    /// Simulate the engine process dying
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserHandle for FakeBrowser {
    async fn open_context(&self, options: &ContextOptions) -> Result<Box<dyn RemotePage>, ScrapeError> {
        if !self.is_connected() {
            return Err(ScrapeError::Browser("browser disconnected".into()));
        }
        self.stats.contexts_opened.fetch_add(1, Ordering::SeqCst);
        self.stats.profiles.lock().unwrap().push(options.clone());
        Ok(Box::new(FakePage::routed(self.sites.clone(), self.stats.clone())))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct FakeLauncher {
    pub sites: Arc<FakeSites>,
    pub stats: Arc<FakeStats>,
    launches: AtomicUsize,
    launch_delay: Duration,
    fail_launches: AtomicBool,
    browsers: Mutex<Vec<Arc<FakeBrowser>>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(launch_delay: Duration) -> Self {
        Self {
            sites: Arc::new(FakeSites::default()),
            stats: Arc::new(FakeStats::default()),
            launches: AtomicUsize::new(0),
            launch_delay,
            fail_launches: AtomicBool::new(false),
            browsers: Mutex::new(Vec::new()),
        }
    }

    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub fn fail_launches(&self, fail: bool) {
        self.fail_launches.store(fail, Ordering::SeqCst);
    }

    pub fn browser(&self, index: usize) -> Arc<FakeBrowser> {
        self.browsers.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self) -> Result<Arc<dyn BrowserHandle>, ScrapeError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if !self.launch_delay.is_zero() {
            tokio::time::sleep(self.launch_delay).await;
        }
        if self.fail_launches.load(Ordering::SeqCst) {
            return Err(ScrapeError::Browser("Chrome not found".into()));
        }

        let browser = Arc::new(FakeBrowser {
            connected: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            sites: self.sites.clone(),
            stats: self.stats.clone(),
        });
        self.browsers.lock().unwrap().push(browser.clone());
        Ok(browser)
    }
}
