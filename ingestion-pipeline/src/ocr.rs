use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use headless_chrome::{protocol::cdp::Page, Browser};
use lopdf::Document;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use common::{error::AppError, utils::config::AppConfig};

const OCR_PROMPT: &str = "Transcribe all text visible in this image verbatim. Preserve reading order and line breaks. Respond with the transcription only; respond with an empty message if no text is legible.";
const MAX_OCR_TOKENS: u32 = 6400;
const PAGE_SETTLE_MS: u64 = 350;

/// Converts one rasterized page image into text.
#[async_trait]
pub trait RecognitionEngine: Send + Sync {
    async fn recognize(&self, png: &[u8], language_hints: &[String]) -> Result<String, AppError>;
}

/// Renders the requested PDF pages into PNG images at the given zoom scale
/// (1.0 is fit-to-page).
#[async_trait]
pub trait PageRasterizer: Send + Sync {
    async fn rasterize(&self, pdf: &[u8], pages: &[u32], scale: f32)
        -> Result<Vec<Vec<u8>>, AppError>;
}

/// Result of a recognition sweep. Zero recognized pages is a distinct
/// outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OcrOutcome {
    Recognized(String),
    NothingRecognized,
}

/// Per-page progress report for the manual sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OcrProgress {
    pub page: u32,
    pub completed: usize,
    pub total: usize,
}

/// Rasterize-then-recognize adapter over lazily loaded engines.
///
/// Both engines are loaded at most once per process; concurrent callers
/// before the first load completes share the in-flight initialization.
pub struct OcrAdapter {
    config: Arc<AppConfig>,
    engine: OnceCell<Arc<dyn RecognitionEngine>>,
    rasterizer: OnceCell<Arc<dyn PageRasterizer>>,
}

impl OcrAdapter {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self {
            config,
            engine: OnceCell::new(),
            rasterizer: OnceCell::new(),
        }
    }

    /// Builds an adapter over pre-loaded engines, bypassing the lazy
    /// factories.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn with_parts(
        config: Arc<AppConfig>,
        engine: Arc<dyn RecognitionEngine>,
        rasterizer: Arc<dyn PageRasterizer>,
    ) -> Self {
        Self {
            config,
            engine: OnceCell::new_with(Some(engine)),
            rasterizer: OnceCell::new_with(Some(rasterizer)),
        }
    }

    async fn engine(&self) -> Result<&Arc<dyn RecognitionEngine>, AppError> {
        self.engine
            .get_or_try_init(|| async {
                debug!("loading recognition engine");
                Ok(Arc::new(VisionRecognition::new(&self.config)) as Arc<dyn RecognitionEngine>)
            })
            .await
    }

    async fn rasterizer(&self) -> Result<&Arc<dyn PageRasterizer>, AppError> {
        self.rasterizer
            .get_or_try_init(|| async {
                debug!("loading page rasterizer");
                let rasterizer = ChromeRasterizer::load().await?;
                Ok(Arc::new(rasterizer) as Arc<dyn PageRasterizer>)
            })
            .await
    }

    /// Forces the rasterizer load without rendering anything, sharing the
    /// in-flight initialization with any concurrent caller.
    pub async fn warm_rasterizer(&self) -> Result<(), AppError> {
        self.rasterizer().await.map(|_| ())
    }

    /// Renders pages through the lazily loaded rasterizer without running
    /// recognition; the preview renderer draws pages with this.
    pub async fn rasterize_pages(
        &self,
        pdf: &[u8],
        pages: &[u32],
        scale: f32,
    ) -> Result<Vec<Vec<u8>>, AppError> {
        let rasterizer = self.rasterizer().await?;
        rasterizer.rasterize(pdf, pages, scale).await
    }

    /// Runs recognition directly on a full image.
    pub async fn recognize_image(&self, image: &[u8]) -> Result<OcrOutcome, AppError> {
        let engine = self.engine().await?;
        let text = engine
            .recognize(image, &self.config.ocr_language_hints)
            .await?;
        if text.trim().is_empty() {
            Ok(OcrOutcome::NothingRecognized)
        } else {
            Ok(OcrOutcome::Recognized(text.trim().to_string()))
        }
    }

    /// Inline fallback over a bounded page prefix, used when embedded PDF
    /// text comes up short.
    pub async fn ocr_pdf_prefix(&self, pdf: &[u8], page_cap: usize) -> Result<OcrOutcome, AppError> {
        self.sweep(pdf, page_cap, None).await
    }

    /// User-triggered sweep over the whole document up to the configured cap,
    /// reporting per-page progress. A dropped receiver only suppresses the
    /// notifications; the sweep still runs to completion.
    pub async fn ocr_all_pages(
        &self,
        pdf: &[u8],
        page_cap: usize,
        progress: Option<UnboundedSender<OcrProgress>>,
    ) -> Result<OcrOutcome, AppError> {
        self.sweep(pdf, page_cap, progress.as_ref()).await
    }

    async fn sweep(
        &self,
        pdf: &[u8],
        page_cap: usize,
        progress: Option<&UnboundedSender<OcrProgress>>,
    ) -> Result<OcrOutcome, AppError> {
        let page_numbers = load_page_numbers(pdf.to_vec()).await?;
        if page_numbers.is_empty() {
            return Ok(OcrOutcome::NothingRecognized);
        }

        let selected: Vec<u32> = page_numbers.into_iter().take(page_cap).collect();
        let total = selected.len();

        let rasterizer = self.rasterizer().await?;
        let engine = self.engine().await?;

        // Pages are rendered one at a time so a single page that fails to
        // rasterize is skipped like a failed recognition, instead of sinking
        // the whole sweep.
        let mut sections = Vec::new();
        for (idx, page) in selected.iter().enumerate() {
            if let Some(text) = self.recognize_page(rasterizer, engine, pdf, *page).await {
                sections.push(text);
            }
            if let Some(sender) = progress {
                let _ = sender.send(OcrProgress {
                    page: *page,
                    completed: idx + 1,
                    total,
                });
            }
        }

        if sections.is_empty() {
            Ok(OcrOutcome::NothingRecognized)
        } else {
            Ok(OcrOutcome::Recognized(sections.join("\n\n")))
        }
    }

    async fn recognize_page(
        &self,
        rasterizer: &Arc<dyn PageRasterizer>,
        engine: &Arc<dyn RecognitionEngine>,
        pdf: &[u8],
        page: u32,
    ) -> Option<String> {
        let image = match rasterizer.rasterize(pdf, &[page], 1.0).await {
            Ok(images) => images.into_iter().next()?,
            Err(err) => {
                warn!(page, error = %err, "page rasterization failed; skipping");
                return None;
            }
        };

        match engine
            .recognize(&image, &self.config.ocr_language_hints)
            .await
        {
            Ok(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Ok(_) => {
                debug!(page, "page yielded no text");
                None
            }
            Err(err) => {
                warn!(page, error = %err, "page recognition failed; skipping");
                None
            }
        }
    }
}

/// Parses the PDF structure off the async executor to discover page numbers.
pub async fn load_page_numbers(pdf_bytes: Vec<u8>) -> Result<Vec<u32>, AppError> {
    let pages = tokio::task::spawn_blocking(move || -> Result<Vec<u32>, AppError> {
        let document = Document::load_mem(&pdf_bytes)
            .map_err(|err| AppError::Processing(format!("Failed to parse PDF: {err}")))?;
        let mut page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
        page_numbers.sort_unstable();
        Ok(page_numbers)
    })
    .await??;

    Ok(pages)
}

/// Recognition over the vision-capable chat model.
pub struct VisionRecognition {
    client: async_openai::Client<OpenAIConfig>,
    model: String,
}

impl VisionRecognition {
    pub fn new(config: &AppConfig) -> Self {
        let openai_config = OpenAIConfig::new()
            .with_api_key(config.openai_api_key.clone())
            .with_api_base(config.openai_base_url.clone());
        Self {
            client: async_openai::Client::with_config(openai_config),
            model: config.ocr_model.clone(),
        }
    }

    fn prompt(language_hints: &[String]) -> String {
        if language_hints.is_empty() {
            OCR_PROMPT.to_string()
        } else {
            format!(
                "{OCR_PROMPT} The text is expected to be in: {}.",
                language_hints.join(", ")
            )
        }
    }
}

#[async_trait]
impl RecognitionEngine for VisionRecognition {
    async fn recognize(&self, png: &[u8], language_hints: &[String]) -> Result<String, AppError> {
        let image_url = format!("data:image/png;base64,{}", STANDARD.encode(png));

        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.clone())
            .max_tokens(MAX_OCR_TOKENS)
            .messages([ChatCompletionRequestUserMessageArgs::default()
                .content(vec![
                    ChatCompletionRequestMessageContentPartTextArgs::default()
                        .text(Self::prompt(language_hints))
                        .build()?
                        .into(),
                    ChatCompletionRequestMessageContentPartImageArgs::default()
                        .image_url(
                            ImageUrlArgs::default()
                                .url(image_url)
                                .detail(ImageDetail::High)
                                .build()?,
                        )
                        .build()?
                        .into(),
                ])
                .build()?
                .into()])
            .build()?;

        let response = self.client.chat().create(request).await?;
        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_ref())
            .cloned()
            .unwrap_or_default();

        Ok(text)
    }
}

/// Rasterizes PDF pages through headless Chrome's built-in PDF viewer.
pub struct ChromeRasterizer {
    browser: Browser,
}

impl ChromeRasterizer {
    pub async fn load() -> Result<Self, AppError> {
        let browser = tokio::task::spawn_blocking(create_browser).await??;
        Ok(Self { browser })
    }
}

#[async_trait]
impl PageRasterizer for ChromeRasterizer {
    async fn rasterize(
        &self,
        pdf: &[u8],
        pages: &[u32],
        scale: f32,
    ) -> Result<Vec<Vec<u8>>, AppError> {
        let file = tempfile::Builder::new().suffix(".pdf").tempfile()?;
        tokio::fs::write(file.path(), pdf).await?;
        let file_url = url::Url::from_file_path(file.path())
            .map_err(|_| AppError::Processing("Unable to construct PDF file URL".into()))?;

        let tab = self
            .browser
            .new_tab()
            .map_err(|err| AppError::Processing(format!("Failed to create Chrome tab: {err}")))?;
        tab.set_default_timeout(Duration::from_secs(10));

        // The browser outlives this call, so the tab must be closed on both
        // the success and the error path or each call leaks one.
        let captures = capture_pages(&tab, &file_url, pages, scale).await;
        if let Err(err) = tab.close(false) {
            debug!(error = %err, "failed to close Chrome tab");
        }

        captures
    }
}

async fn capture_pages(
    tab: &Arc<headless_chrome::Tab>,
    file_url: &url::Url,
    pages: &[u32],
    scale: f32,
) -> Result<Vec<Vec<u8>>, AppError> {
    let zoom = if (scale - 1.0).abs() < f32::EPSILON {
        "page-fit".to_string()
    } else {
        format!("{}", (scale * 100.0).round() as u32)
    };

    let mut captures = Vec::with_capacity(pages.len());
    for page in pages {
        let target = format!("{file_url}#page={page}&toolbar=0&zoom={zoom}");
        tab.navigate_to(&target)
            .map_err(|err| {
                AppError::Processing(format!("Failed to navigate to PDF page: {err}"))
            })?
            .wait_until_navigated()
            .map_err(|err| {
                AppError::Processing(format!("Navigation to PDF page failed: {err}"))
            })?;

        tab.wait_for_element("embed, canvas, body").map_err(|err| {
            AppError::Processing(format!("Timed out waiting for PDF content: {err}"))
        })?;
        tokio::time::sleep(Duration::from_millis(PAGE_SETTLE_MS)).await;

        let png = tab
            .capture_screenshot(Page::CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(|err| {
                AppError::Processing(format!("Failed to capture PDF page: {err}"))
            })?;

        debug!(page = *page, bytes = png.len(), "captured PDF page screenshot");
        captures.push(png);
    }

    Ok(captures)
}

fn create_browser() -> Result<Browser, AppError> {
    #[cfg(feature = "docker")]
    {
        let options = headless_chrome::LaunchOptionsBuilder::default()
            .sandbox(false)
            .build()
            .map_err(|err| AppError::Processing(format!("Failed to launch Chrome: {err}")))?;
        Browser::new(options)
            .map_err(|err| AppError::Processing(format!("Failed to start Chrome: {err}")))
    }
    #[cfg(not(feature = "docker"))]
    {
        Browser::default()
            .map_err(|err| AppError::Processing(format!("Failed to start Chrome: {err}")))
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use fakes::{blank_pdf, ScriptedRecognition, StubRasterizer};

#[cfg(any(test, feature = "test-utils"))]
mod fakes {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// Recognition fake replaying a scripted sequence of per-page results.
    /// Once the script is exhausted it returns the fallback text, or empty.
    pub struct ScriptedRecognition {
        script: Mutex<VecDeque<Result<String, String>>>,
        fallback: Option<String>,
        delay: Option<Duration>,
    }

    impl ScriptedRecognition {
        pub fn new(script: Vec<Result<&str, &str>>) -> Self {
            Self {
                script: Mutex::new(
                    script
                        .into_iter()
                        .map(|entry| entry.map(str::to_string).map_err(str::to_string))
                        .collect(),
                ),
                fallback: None,
                delay: None,
            }
        }

        pub fn always(text: &str) -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                fallback: Some(text.to_string()),
                delay: None,
            }
        }

        /// Makes each recognition call take the given time, to exercise
        /// callers that overlap long-running sweeps.
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl RecognitionEngine for ScriptedRecognition {
        async fn recognize(
            &self,
            _png: &[u8],
            _language_hints: &[String],
        ) -> Result<String, AppError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self
                .script
                .lock()
                .expect("recognition fake poisoned")
                .pop_front();
            match next {
                Some(Ok(text)) => Ok(text),
                Some(Err(message)) => Err(AppError::Processing(message)),
                None => Ok(self.fallback.clone().unwrap_or_default()),
            }
        }
    }

    /// Rasterizer fake returning a placeholder image per requested page.
    #[derive(Default)]
    pub struct StubRasterizer {
        requests: Mutex<Vec<Vec<u32>>>,
        scales: Mutex<Vec<f32>>,
        fail: AtomicBool,
        fail_pages: Mutex<Vec<u32>>,
    }

    impl StubRasterizer {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn requested_pages(&self) -> Vec<Vec<u32>> {
            self.requests.lock().expect("rasterizer fake poisoned").clone()
        }

        pub fn requested_scales(&self) -> Vec<f32> {
            self.scales.lock().expect("rasterizer fake poisoned").clone()
        }

        pub fn set_fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        /// Makes any request touching the given page fail, while other
        /// pages keep rendering.
        pub fn set_fail_page(&self, page: u32) {
            self.fail_pages
                .lock()
                .expect("rasterizer fake poisoned")
                .push(page);
        }
    }

    #[async_trait]
    impl PageRasterizer for StubRasterizer {
        async fn rasterize(
            &self,
            _pdf: &[u8],
            pages: &[u32],
            scale: f32,
        ) -> Result<Vec<Vec<u8>>, AppError> {
            self.requests
                .lock()
                .expect("rasterizer fake poisoned")
                .push(pages.to_vec());
            self.scales
                .lock()
                .expect("rasterizer fake poisoned")
                .push(scale);
            if self.fail.load(Ordering::SeqCst) {
                return Err(AppError::Processing("rasterizer unavailable".to_string()));
            }
            let failing = self.fail_pages.lock().expect("rasterizer fake poisoned");
            if pages.iter().any(|page| failing.contains(page)) {
                return Err(AppError::Processing(format!(
                    "rasterization failed for pages {pages:?}"
                )));
            }
            Ok(pages.iter().map(|page| vec![*page as u8; 16]).collect())
        }
    }

    /// Serializes a minimal content-free PDF with the given page count, for
    /// exercising the scanned-document paths.
    pub fn blank_pdf(page_count: usize) -> Vec<u8> {
        use lopdf::{dictionary, Object};

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let kids: Vec<Object> = (0..page_count)
            .map(|_| {
                let page_id = doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                });
                Object::Reference(page_id)
            })
            .collect();

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => page_count as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).expect("serialize pdf");
        out
    }
}
