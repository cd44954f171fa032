use std::time::Duration;

use async_trait::async_trait;
use fantoccini::error::CmdError;
use fantoccini::{Client, Locator};
use tracing::debug;

use crate::{ChallengePage, PageError, SubmitOutcome};

/// CSS selectors for the challenge page elements.
#[derive(Clone, Debug)]
pub struct PageSelectors {
    /// The rendered CAPTCHA image.
    pub captcha_image: String,
    /// The text input for the solution.
    pub captcha_input: String,
    /// The submit button.
    pub submit_button: String,
    /// The close button of the rejection dialog.
    pub error_dialog_close: String,
    /// The control that requests a fresh CAPTCHA.
    pub reload_button: String,
    /// URL fragment that marks the post-challenge page.
    pub accepted_url_fragment: String,
}

impl Default for PageSelectors {
    fn default() -> Self {
        Self {
            captcha_image: "img.captcha-img".to_string(),
            captcha_input: "input.captcha-text, input[name='text']".to_string(),
            submit_button: "a.btn.btn-primary".to_string(),
            error_dialog_close: "mat-dialog-container button".to_string(),
            reload_button: "span.material-icons.reload-btn".to_string(),
            accepted_url_fragment: "appointment".to_string(),
        }
    }
}

/// WebDriver-backed challenge page.
pub struct WebDriverPage {
    client: Client,
    selectors: PageSelectors,
    outcome_timeout: Duration,
}

const OUTCOME_POLL_INTERVAL: Duration = Duration::from_millis(500);

impl WebDriverPage {
    /// Wrap an already-navigated WebDriver session.
    pub fn new(client: Client, selectors: PageSelectors, outcome_timeout: Duration) -> Self {
        Self {
            client,
            selectors,
            outcome_timeout,
        }
    }

    /// Close the browser session. Call on every exit path.
    pub async fn close(self) -> Result<(), PageError> {
        self.client.close().await.map_err(page_err)
    }

    async fn find_optional(
        &mut self,
        selector: &str,
    ) -> Result<Option<fantoccini::elements::Element>, PageError> {
        let mut found = self
            .client
            .find_all(Locator::Css(selector))
            .await
            .map_err(page_err)?;
        if found.is_empty() {
            Ok(None)
        } else {
            Ok(Some(found.remove(0)))
        }
    }

    async fn error_dialog_open(&mut self) -> Result<bool, PageError> {
        Ok(self
            .find_optional(&self.selectors.error_dialog_close.clone())
            .await?
            .is_some())
    }
}

fn page_err(e: CmdError) -> PageError {
    PageError(e.to_string())
}

#[async_trait]
impl ChallengePage for WebDriverPage {
    async fn captcha_image(&mut self) -> Result<Option<Vec<u8>>, PageError> {
        let selector = self.selectors.captcha_image.clone();
        let Some(element) = self.find_optional(&selector).await? else {
            return Ok(None);
        };
        let bytes = element.screenshot().await.map_err(page_err)?;
        Ok(Some(bytes))
    }

    async fn refresh_captcha(&mut self) -> Result<(), PageError> {
        let selector = self.selectors.reload_button.clone();
        if let Some(button) = self.find_optional(&selector).await? {
            button.click().await.map_err(page_err)?;
        } else {
            // No reload control; a page refresh re-renders the challenge.
            self.client.refresh().await.map_err(page_err)?;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
        Ok(())
    }

    async fn submit_solution(&mut self, text: &str) -> Result<(), PageError> {
        let input_selector = self.selectors.captcha_input.clone();
        let input = self
            .find_optional(&input_selector)
            .await?
            .ok_or_else(|| PageError("CAPTCHA input not found".to_string()))?;
        input.clear().await.map_err(page_err)?;
        input.send_keys(text).await.map_err(page_err)?;

        let submit_selector = self.selectors.submit_button.clone();
        let button = self
            .find_optional(&submit_selector)
            .await?
            .ok_or_else(|| PageError("Submit button not found".to_string()))?;
        button.click().await.map_err(page_err)?;
        Ok(())
    }

    async fn await_outcome(&mut self) -> Result<SubmitOutcome, PageError> {
        let deadline = tokio::time::Instant::now() + self.outcome_timeout;

        loop {
            let url = self.client.current_url().await.map_err(page_err)?;
            if url.as_str().contains(&self.selectors.accepted_url_fragment) {
                return Ok(SubmitOutcome::Accepted);
            }

            if self.error_dialog_open().await? {
                return Ok(SubmitOutcome::Rejected);
            }

            if tokio::time::Instant::now() >= deadline {
                debug!("No CAPTCHA outcome before timeout");
                return Ok(SubmitOutcome::TimedOut);
            }

            tokio::time::sleep(OUTCOME_POLL_INTERVAL).await;
        }
    }

    async fn dismiss_error(&mut self) -> Result<(), PageError> {
        let selector = self.selectors.error_dialog_close.clone();
        if let Some(button) = self.find_optional(&selector).await? {
            button.click().await.map_err(page_err)?;
        }
        Ok(())
    }
}
