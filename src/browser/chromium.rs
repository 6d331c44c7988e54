//! Chrome/Chromium backend over the DevTools protocol.
//!
//! chromiumoxide is async; each [`ChromiumBrowser`] owns a current-thread
//! tokio runtime and blocks on it for every command, so callers see the same
//! synchronous surface as every other [`BrowserSession`]. The CDP handler task
//! runs on that runtime and makes progress whenever a command is in flight.

use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, Instant};

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent, RequestId,
};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Element, Page};
use futures::{Stream, StreamExt, stream};
use serde::Deserialize;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{BrowserError, BrowserLauncher, BrowserResult, BrowserSession, PageInfo};
use crate::config::ExecutorSettings;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// No request in flight for this long counts as network idle
const NETWORK_QUIET: Duration = Duration::from_millis(500);

enum Traffic {
    Started(RequestId),
    Ended(RequestId),
}

/// Requests the page has started but not yet finished
#[derive(Default)]
struct InFlight {
    pending: HashSet<RequestId>,
    // Completions that arrived ahead of their start event
    early: HashSet<RequestId>,
}

impl InFlight {
    fn record(&mut self, traffic: Traffic) {
        match traffic {
            Traffic::Started(id) => {
                if !self.early.remove(&id) {
                    self.pending.insert(id);
                }
            }
            Traffic::Ended(id) => {
                if !self.pending.remove(&id) {
                    self.early.insert(id);
                }
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }
}

async fn network_traffic(page: &Page) -> BrowserResult<impl Stream<Item = Traffic> + Unpin> {
    let listen_error = |e: chromiumoxide::error::CdpError| BrowserError::Command(format!("network listener: {}", e));
    let started = page
        .event_listener::<EventRequestWillBeSent>()
        .await
        .map_err(listen_error)?
        .map(|e| Traffic::Started(e.request_id.clone()));
    let finished = page
        .event_listener::<EventLoadingFinished>()
        .await
        .map_err(listen_error)?
        .map(|e| Traffic::Ended(e.request_id.clone()));
    let failed = page
        .event_listener::<EventLoadingFailed>()
        .await
        .map_err(listen_error)?
        .map(|e| Traffic::Ended(e.request_id.clone()));
    Ok(Box::pin(stream::select(started, stream::select(finished, failed))))
}

/// Script result for reads that must distinguish a missing element
#[derive(Debug, Deserialize)]
struct Lookup<T> {
    found: bool,
    value: T,
}

impl<T> Lookup<T> {
    fn into_result(self, selector: &str) -> BrowserResult<T> {
        if self.found {
            Ok(self.value)
        } else {
            Err(BrowserError::ElementNotFound(selector.to_string()))
        }
    }
}

/// Launches headless or headed Chromium sessions
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    headless: bool,
    viewport: (u32, u32),
}

impl ChromiumLauncher {
    pub fn new(settings: &ExecutorSettings) -> Self {
        Self {
            headless: settings.headless,
            viewport: settings.viewport,
        }
    }
}

impl BrowserLauncher for ChromiumLauncher {
    fn launch(&self) -> BrowserResult<Box<dyn BrowserSession>> {
        Ok(Box::new(ChromiumBrowser::launch(self.headless, self.viewport)?))
    }
}

/// One Chromium process with a single page
pub struct ChromiumBrowser {
    runtime: Runtime,
    browser: Option<Browser>,
    page: Page,
    handler: JoinHandle<()>,
    viewport: (u32, u32),
}

impl ChromiumBrowser {
    /// Start Chromium and open a blank page
    pub fn launch(headless: bool, viewport: (u32, u32)) -> BrowserResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| BrowserError::Session(format!("failed to start runtime: {}", e)))?;

        info!(headless, "launching chromium");

        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .window_size(viewport.0, viewport.1)
            .viewport(Viewport {
                width: viewport.0,
                height: viewport.1,
                ..Viewport::default()
            });
        if !headless {
            builder = builder.with_head();
        }
        let config = builder
            .build()
            .map_err(|e| BrowserError::Session(format!("invalid browser config: {}", e)))?;

        let (browser, page, handler) = runtime.block_on(async {
            let (browser, mut handler) = Browser::launch(config)
                .await
                .map_err(|e| BrowserError::Session(format!("failed to launch browser: {}", e)))?;

            let handler = tokio::spawn(async move {
                while let Some(event) = handler.next().await {
                    if event.is_err() {
                        debug!("CDP handler loop ended");
                        break;
                    }
                }
            });

            let page = browser
                .new_page("about:blank")
                .await
                .map_err(|e| BrowserError::Session(format!("failed to open page: {}", e)))?;

            Ok::<_, BrowserError>((browser, page, handler))
        })?;

        Ok(Self {
            runtime,
            browser: Some(browser),
            page,
            handler,
            viewport,
        })
    }

    /// Poll for `selector` until it appears or `timeout` elapses
    fn find_with_timeout(&self, selector: &str, timeout: Duration) -> BrowserResult<Element> {
        let page = &self.page;
        self.runtime.block_on(async {
            let start = Instant::now();
            loop {
                match page.find_element(selector).await {
                    Ok(element) => return Ok(element),
                    Err(_) if start.elapsed() < timeout => tokio::time::sleep(POLL_INTERVAL).await,
                    Err(_) => {
                        return Err(BrowserError::Timeout {
                            what: format!("selector {}", selector),
                            timeout,
                        });
                    }
                }
            }
        })
    }

    fn find(&self, selector: &str) -> BrowserResult<Element> {
        self.runtime
            .block_on(self.page.find_element(selector))
            .map_err(|_| BrowserError::ElementNotFound(selector.to_string()))
    }

    /// Evaluate `body` as a function of the element matched by `selector`
    fn eval_on<T: serde::de::DeserializeOwned>(&self, selector: &str, body: &str) -> BrowserResult<T> {
        let selector_js = serde_json::to_string(selector)
            .map_err(|e| BrowserError::Command(e.to_string()))?;
        let script = format!(
            "(() => {{ const el = document.querySelector({}); {} }})()",
            selector_js, body
        );
        self.eval(&script)
    }

    fn eval<T: serde::de::DeserializeOwned>(&self, script: &str) -> BrowserResult<T> {
        self.runtime.block_on(async {
            self.page
                .evaluate(script)
                .await
                .map_err(|e| BrowserError::Command(e.to_string()))?
                .into_value::<T>()
                .map_err(|e| BrowserError::Command(format!("unexpected script result: {}", e)))
        })
    }
}

impl BrowserSession for ChromiumBrowser {
    fn navigate(&mut self, url: &str, timeout: Duration) -> BrowserResult<()> {
        debug!(url, "navigating");
        let page = &self.page;
        self.runtime.block_on(async {
            let load = async {
                let mut traffic = network_traffic(page).await?;
                page.goto(url)
                    .await
                    .map_err(|e| BrowserError::Command(format!("navigation to {} failed: {}", url, e)))?;
                loop {
                    let state: String = page
                        .evaluate("document.readyState")
                        .await
                        .ok()
                        .and_then(|v| v.into_value().ok())
                        .unwrap_or_default();
                    if state == "complete" {
                        break;
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }

                // Then until the network has been quiet for a full window
                let mut in_flight = InFlight::default();
                loop {
                    match tokio::time::timeout(NETWORK_QUIET, traffic.next()).await {
                        Ok(Some(event)) => in_flight.record(event),
                        Ok(None) => break,
                        Err(_) if in_flight.is_idle() => break,
                        Err(_) => {}
                    }
                }
                Ok::<(), BrowserError>(())
            };
            tokio::time::timeout(timeout, load)
                .await
                .map_err(|_| BrowserError::Timeout {
                    what: format!("navigation to {}", url),
                    timeout,
                })?
        })
    }

    fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> BrowserResult<()> {
        self.find_with_timeout(selector, timeout).map(|_| ())
    }

    fn click(&mut self, selector: &str) -> BrowserResult<()> {
        let element = self.find(selector)?;
        self.runtime
            .block_on(element.click())
            .map(|_| ())
            .map_err(|e| BrowserError::Command(format!("click on {} failed: {}", selector, e)))
    }

    fn fill(&mut self, selector: &str, value: &str) -> BrowserResult<()> {
        let value_js = serde_json::to_string(value).map_err(|e| BrowserError::Command(e.to_string()))?;
        // Native setter so framework-controlled inputs see the change
        let body = format!(
            "if (!el) return false; el.focus(); \
             const proto = Object.getPrototypeOf(el); \
             const desc = Object.getOwnPropertyDescriptor(proto, 'value'); \
             if (desc && desc.set) {{ desc.set.call(el, {v}); }} else {{ el.value = {v}; }} \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
             return true;",
            v = value_js
        );
        if self.eval_on::<bool>(selector, &body)? {
            Ok(())
        } else {
            Err(BrowserError::ElementNotFound(selector.to_string()))
        }
    }

    fn press(&mut self, selector: &str, key: &str) -> BrowserResult<()> {
        let element = self.find(selector)?;
        self.runtime
            .block_on(async {
                element.focus().await?;
                element.press_key(key).await
            })
            .map(|_| ())
            .map_err(|e| BrowserError::Command(format!("pressing {} failed: {}", key, e)))
    }

    fn select_option(&mut self, selector: &str, value: &str) -> BrowserResult<()> {
        let value_js = serde_json::to_string(value).map_err(|e| BrowserError::Command(e.to_string()))?;
        let body = format!(
            "if (!el) return 'missing'; \
             const opt = Array.from(el.options || []).find(o => o.value === {v} || o.label === {v}); \
             if (!opt) return 'no-option'; \
             el.value = opt.value; \
             el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
             el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
             return 'ok';",
            v = value_js
        );
        match self.eval_on::<String>(selector, &body)?.as_str() {
            "ok" => Ok(()),
            "missing" => Err(BrowserError::ElementNotFound(selector.to_string())),
            _ => Err(BrowserError::Command(format!(
                "option '{}' not found in {}",
                value, selector
            ))),
        }
    }

    fn hover(&mut self, selector: &str) -> BrowserResult<()> {
        let element = self.find(selector)?;
        self.runtime
            .block_on(element.hover())
            .map(|_| ())
            .map_err(|e| BrowserError::Command(format!("hover on {} failed: {}", selector, e)))
    }

    fn scroll_into_view(&mut self, selector: &str) -> BrowserResult<()> {
        let element = self.find(selector)?;
        self.runtime
            .block_on(element.scroll_into_view())
            .map(|_| ())
            .map_err(|e| BrowserError::Command(format!("scroll to {} failed: {}", selector, e)))
    }

    fn scroll_by(&mut self, dx: i64, dy: i64) -> BrowserResult<()> {
        self.eval::<bool>(&format!("(() => {{ window.scrollBy({}, {}); return true; }})()", dx, dy))
            .map(|_| ())
    }

    fn text_content(&mut self, selector: &str) -> BrowserResult<String> {
        let lookup: Lookup<String> = self.eval_on(
            selector,
            "return { found: !!el, value: el ? (el.textContent || '') : '' };",
        )?;
        lookup.into_result(selector)
    }

    fn is_visible(&mut self, selector: &str) -> BrowserResult<bool> {
        self.eval_on(
            selector,
            "if (!el) return false; \
             const style = window.getComputedStyle(el); \
             if (style.visibility === 'hidden' || style.display === 'none') return false; \
             const rect = el.getBoundingClientRect(); \
             return rect.width > 0 && rect.height > 0;",
        )
    }

    fn is_enabled(&mut self, selector: &str) -> BrowserResult<bool> {
        let lookup: Lookup<bool> =
            self.eval_on(selector, "return { found: !!el, value: el ? !el.disabled : false };")?;
        lookup.into_result(selector)
    }

    fn screenshot(&mut self, path: &Path) -> BrowserResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        self.runtime
            .block_on(self.page.save_screenshot(params, path))
            .map(|_| ())
            .map_err(|e| BrowserError::Command(format!("screenshot failed: {}", e)))
    }

    fn page_info(&mut self) -> BrowserResult<PageInfo> {
        let page = &self.page;
        let (url, title) = self.runtime.block_on(async {
            let url = page.url().await.ok().flatten().unwrap_or_default();
            let title = page.get_title().await.ok().flatten().unwrap_or_default();
            (url, title)
        });
        Ok(PageInfo {
            url,
            title,
            viewport: self.viewport,
        })
    }

    fn pause(&mut self, duration: Duration) {
        // Keep the CDP handler running while we wait
        self.runtime.block_on(tokio::time::sleep(duration));
    }

    fn close(&mut self) -> BrowserResult<()> {
        let Some(mut browser) = self.browser.take() else {
            return Ok(());
        };
        info!("closing chromium");
        let result = self.runtime.block_on(browser.close());
        // Reap the child process; it is gone either way
        let _ = self.runtime.block_on(browser.wait());
        self.handler.abort();
        result
            .map(|_| ())
            .map_err(|e| BrowserError::Session(e.to_string()))
    }
}

impl Drop for ChromiumBrowser {
    fn drop(&mut self) {
        if self.browser.is_some() {
            if let Err(e) = self.close() {
                warn!("failed to close chromium on drop: {}", e);
            }
        }
    }
}
