use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetLocaleOverrideParams, SetTimezoneOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, EventRequestPaused, FailRequestParams, RequestPattern, RequestStage,
};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::network::{
    self, ErrorReason, EventResponseReceived, ResourceType, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::scraper::config::ScraperConfig;
use crate::scraper::{BrowserHandle, BrowserLauncher, ContextOptions, RemotePage, ScrapeError, ScriptCall};

const EVALUATE_TIMEOUT: Duration = Duration::from_secs(20);

fn browser_err(context: &str) -> impl FnOnce(chromiumoxide::error::CdpError) -> ScrapeError + '_ {
    move |e| ScrapeError::Browser(format!("{}: {}", context, e))
}

/// Launches headless Chrome/Chromium through chromiumoxide
pub struct ChromeLauncher {
    headless: bool,
    chrome_executable: Option<PathBuf>,
    launches: AtomicU64,
}

impl ChromeLauncher {
    pub fn new(config: &ScraperConfig) -> Self {
        Self {
            headless: config.headless,
            chrome_executable: config.chrome_executable.clone(),
            launches: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Arc<dyn BrowserHandle>, ScrapeError> {
        // A fresh profile per launch, so a closing predecessor never holds its lock
        let launch_no = self.launches.fetch_add(1, Ordering::SeqCst);
        let profile_dir = std::env::temp_dir().join(format!(
            "linkpeek-chrome-{}-{}",
            std::process::id(),
            launch_no
        ));

        let mut builder = BrowserConfig::builder()
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-software-rasterizer")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-extensions")
            .arg("--no-first-run")
            .arg("--mute-audio")
            .user_data_dir(&profile_dir);

        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.chrome_executable {
            builder = builder.chrome_executable(path);
        }

        let browser_config = builder
            .build()
            .map_err(|e| ScrapeError::Browser(format!("Failed to build browser config: {}", e)))?;

        let (browser, mut handler) = Browser::launch(browser_config).await.map_err(|e| {
            ScrapeError::Browser(format!(
                "Failed to launch browser: {}. Is Chrome or Chromium installed and in PATH?",
                e
            ))
        })?;

        let connected = Arc::new(AtomicBool::new(true));
        let flag = connected.clone();
        // The handler drives the CDP connection; when it ends the browser is gone
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {}", e);
                }
            }
            flag.store(false, Ordering::SeqCst);
            debug!("Browser handler exited");
        });

        Ok(Arc::new(ChromeBrowser {
            session: Arc::new(ChromeSession {
                browser: RwLock::new(Some(browser)),
                connected,
            }),
            handler_task: Mutex::new(Some(handler_task)),
            profile_dir,
        }))
    }
}

/// State shared by a browser and the pages it opened
struct ChromeSession {
    browser: RwLock<Option<Browser>>,
    connected: Arc<AtomicBool>,
}

impl ChromeSession {
    async fn dispose_context(&self, context_id: BrowserContextId) {
        let guard = self.browser.read().await;
        if let Some(browser) = guard.as_ref() {
            if let Err(e) = browser.execute(DisposeBrowserContextParams::new(context_id)).await {
                debug!("Failed to dispose browser context: {}", e);
            }
        }
    }
}

/// A running Chrome process
pub struct ChromeBrowser {
    session: Arc<ChromeSession>,
    handler_task: Mutex<Option<JoinHandle<()>>>,
    profile_dir: PathBuf,
}

#[async_trait]
impl BrowserHandle for ChromeBrowser {
    async fn open_context(&self, options: &ContextOptions) -> Result<Box<dyn RemotePage>, ScrapeError> {
        let (page, context_id) = {
            let guard = self.session.browser.read().await;
            let browser = guard
                .as_ref()
                .ok_or_else(|| ScrapeError::Browser("browser already closed".to_string()))?;

            let context_id = browser
                .execute(CreateBrowserContextParams::default())
                .await
                .map_err(browser_err("Failed to create browser context"))?
                .result
                .browser_context_id;

            let target = CreateTargetParams::builder()
                .url("about:blank")
                .browser_context_id(context_id.clone())
                .build()
                .map_err(ScrapeError::Browser)?;

            match browser.new_page(target).await {
                Ok(page) => (page, context_id),
                Err(e) => {
                    let _ = browser.execute(DisposeBrowserContextParams::new(context_id)).await;
                    return Err(ScrapeError::Browser(format!("Failed to create page: {}", e)));
                }
            }
        };

        let mut chrome_page = ChromePage {
            page,
            context_id,
            session: self.session.clone(),
            status: Arc::new(AtomicU16::new(0)),
            listeners: Vec::new(),
            closed: AtomicBool::new(false),
        };

        if let Err(e) = chrome_page.prepare(options).await {
            chrome_page.shut().await;
            return Err(e);
        }

        Ok(Box::new(chrome_page))
    }

    fn is_connected(&self) -> bool {
        self.session.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if let Some(mut browser) = self.session.browser.write().await.take() {
            if let Err(e) = browser.close().await {
                debug!("Browser close command failed: {}", e);
            }
            if let Err(e) = browser.wait().await {
                debug!("Waiting for browser exit failed: {}", e);
            }
        }
        if let Some(task) = self.handler_task.lock().await.take() {
            task.abort();
        }
        self.session.connected.store(false, Ordering::SeqCst);

        if let Err(e) = tokio::fs::remove_dir_all(&self.profile_dir).await {
            debug!("Could not remove browser profile {}: {}", self.profile_dir.display(), e);
        }
    }
}

/// A page in its own browser context
struct ChromePage {
    page: Page,
    context_id: BrowserContextId,
    session: Arc<ChromeSession>,
    /// Main-document HTTP status, 0 until a response arrives
    status: Arc<AtomicU16>,
    listeners: Vec<JoinHandle<()>>,
    closed: AtomicBool,
}

fn resource_type(name: &str) -> Option<ResourceType> {
    match name {
        "Image" => Some(ResourceType::Image),
        "Stylesheet" => Some(ResourceType::Stylesheet),
        "Font" => Some(ResourceType::Font),
        "Media" => Some(ResourceType::Media),
        _ => None,
    }
}

fn request_patterns(options: &ContextOptions) -> Vec<RequestPattern> {
    let by_type = options
        .blocked_resource_types
        .iter()
        .filter_map(|name| resource_type(name))
        .map(|rt| RequestPattern {
            url_pattern: Some("*".to_string()),
            resource_type: Some(rt),
            request_stage: Some(RequestStage::Request),
        });

    let by_domain = options.blocked_domains.iter().flat_map(|domain| {
        [format!("*://{}/*", domain), format!("*://*.{}/*", domain)]
            .into_iter()
            .map(|pattern| RequestPattern {
                url_pattern: Some(pattern),
                resource_type: None,
                request_stage: Some(RequestStage::Request),
            })
    });

    by_type.chain(by_domain).collect()
}

impl ChromePage {
    async fn prepare(&mut self, options: &ContextOptions) -> Result<(), ScrapeError> {
        let profile = &options.profile;
        let (width, height) = profile.viewport;

        self.page
            .execute(SetDeviceMetricsOverrideParams::new(width as i64, height as i64, 1.0, false))
            .await
            .map_err(browser_err("Failed to set viewport"))?;

        self.page
            .execute(SetTimezoneOverrideParams::new(profile.timezone.clone()))
            .await
            .map_err(browser_err("Failed to set timezone"))?;

        self.page
            .execute(SetLocaleOverrideParams {
                locale: Some(profile.locale.clone()),
            })
            .await
            .map_err(browser_err("Failed to set locale"))?;

        let mut user_agent = SetUserAgentOverrideParams::new(profile.user_agent.clone());
        user_agent.accept_language = Some(profile.accept_language());
        self.page
            .execute(user_agent)
            .await
            .map_err(browser_err("Failed to set user agent"))?;

        self.page
            .execute(AddScriptToEvaluateOnNewDocumentParams::new(profile.init_script()))
            .await
            .map_err(browser_err("Failed to install init script"))?;

        self.page
            .execute(network::EnableParams::default())
            .await
            .map_err(browser_err("Failed to enable network events"))?;

        let main_frame = self.page.mainframe().await.ok().flatten();
        let mut responses = self
            .page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(browser_err("Failed to listen for responses"))?;
        let status = self.status.clone();
        self.listeners.push(tokio::spawn(async move {
            while let Some(event) = responses.next().await {
                if event.r#type != ResourceType::Document {
                    continue;
                }
                if main_frame.is_some() && event.frame_id != main_frame {
                    continue;
                }
                let code = u16::try_from(event.response.status).unwrap_or(0);
                status.store(code, Ordering::SeqCst);
            }
        }));

        let patterns = request_patterns(options);
        if !patterns.is_empty() {
            let mut paused = self
                .page
                .event_listener::<EventRequestPaused>()
                .await
                .map_err(browser_err("Failed to listen for paused requests"))?;

            self.page
                .execute(fetch::EnableParams {
                    patterns: Some(patterns),
                    handle_auth_requests: None,
                })
                .await
                .map_err(browser_err("Failed to enable request blocking"))?;

            // Only blocked requests are paused, so every one of them is failed
            let page = self.page.clone();
            self.listeners.push(tokio::spawn(async move {
                while let Some(event) = paused.next().await {
                    let fail = FailRequestParams::new(event.request_id.clone(), ErrorReason::BlockedByClient);
                    if let Err(e) = page.execute(fail).await {
                        debug!("Failed to block request {}: {}", event.request.url, e);
                    }
                }
            }));
        }

        Ok(())
    }

    async fn shut(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in &self.listeners {
            task.abort();
        }
        if let Err(e) = self.page.clone().close().await {
            debug!("Failed to close page: {}", e);
        }
        self.session.dispose_context(self.context_id.clone()).await;
    }
}

#[async_trait]
impl RemotePage for ChromePage {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), ScrapeError> {
        self.status.store(0, Ordering::SeqCst);
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(ScrapeError::Network(format!("Navigation failed: {}", e))),
            Err(_) => Err(ScrapeError::Network(format!(
                "Navigation to {} timed out after {:?}",
                url, timeout
            ))),
        }
    }

    async fn evaluate(&self, call: &ScriptCall) -> Result<serde_json::Value, ScrapeError> {
        let evaluation = tokio::time::timeout(EVALUATE_TIMEOUT, self.page.evaluate(call.expression()))
            .await
            .map_err(|_| ScrapeError::ExtractionFailure(format!("{} timed out", call.script.id())))?
            .map_err(|e| ScrapeError::ExtractionFailure(format!("{} failed: {}", call.script.id(), e)))?;

        evaluation
            .into_value::<serde_json::Value>()
            .map_err(|e| ScrapeError::ExtractionFailure(format!("{} returned no value: {:?}", call.script.id(), e)))
    }

    fn status(&self) -> Option<u16> {
        match self.status.load(Ordering::SeqCst) {
            0 => None,
            code => Some(code),
        }
    }

    async fn current_url(&self) -> Option<String> {
        self.page.url().await.ok().flatten()
    }

    async fn click(&self, selector: &str) -> Result<bool, ScrapeError> {
        let Ok(element) = self.page.find_element(selector).await else {
            return Ok(false);
        };
        element
            .click()
            .await
            .map_err(browser_err("Click failed"))?;
        Ok(true)
    }

    async fn press_and_hold(&self, selector: &str, hold: Duration) -> Result<bool, ScrapeError> {
        let Ok(element) = self.page.find_element(selector).await else {
            return Ok(false);
        };
        let point = element
            .clickable_point()
            .await
            .map_err(browser_err("Control is not clickable"))?;

        let mouse = |kind: DispatchMouseEventType| {
            DispatchMouseEventParams::builder()
                .r#type(kind)
                .x(point.x)
                .y(point.y)
                .button(MouseButton::Left)
                .click_count(1)
                .build()
                .map_err(ScrapeError::Browser)
        };

        self.page
            .execute(mouse(DispatchMouseEventType::MouseMoved)?)
            .await
            .map_err(browser_err("Pointer move failed"))?;
        self.page
            .execute(mouse(DispatchMouseEventType::MousePressed)?)
            .await
            .map_err(browser_err("Pointer down failed"))?;

        tokio::time::sleep(hold).await;

        self.page
            .execute(mouse(DispatchMouseEventType::MouseReleased)?)
            .await
            .map_err(browser_err("Pointer up failed"))?;
        Ok(true)
    }

    async fn close(&self) {
        self.shut().await;
    }
}

impl Drop for ChromePage {
    fn drop(&mut self) {
        if !self.closed.load(Ordering::SeqCst) {
            warn!("Page dropped without close; its browser context leaks until the browser exits");
        }
        for task in &self.listeners {
            task.abort();
        }
    }
}
