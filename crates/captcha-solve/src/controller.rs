use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::CaptchaSolve;

/// What the page did with a submitted solution.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The page moved past the challenge.
    Accepted,
    /// The page rejected the text and stayed on the challenge.
    Rejected,
    /// Neither acceptance nor rejection was observed in time.
    TimedOut,
}

/// Failure surfaced by a challenge page operation.
#[derive(thiserror::Error, Debug)]
#[error("Page error: {0}")]
pub struct PageError(pub String);

/// The browser-side surface the retry controller drives.
///
/// Implementations own the page session; methods take `&mut self` because
/// every operation can mutate page state.
#[async_trait]
pub trait ChallengePage: Send {
    /// Grab the current CAPTCHA image, or `None` when it is not rendered yet.
    async fn captcha_image(&mut self) -> Result<Option<Vec<u8>>, PageError>;

    /// Request a fresh CAPTCHA image.
    async fn refresh_captcha(&mut self) -> Result<(), PageError>;

    /// Type the solution and submit the form.
    async fn submit_solution(&mut self, text: &str) -> Result<(), PageError>;

    /// Wait for the page to accept, reject, or time out.
    async fn await_outcome(&mut self) -> Result<SubmitOutcome, PageError>;

    /// Close any rejection dialog so the next attempt starts clean.
    async fn dismiss_error(&mut self) -> Result<(), PageError>;
}

/// Attempt bounds for [`RetryController`].
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of solve attempts before giving up.
    pub max_attempts: usize,
    /// Solutions shorter than this are never submitted.
    pub min_submit_length: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            min_submit_length: 4,
        }
    }
}

/// Errors from the bounded solve loop.
#[derive(thiserror::Error, Debug)]
pub enum CaptchaError {
    /// Every attempt was spent without an accepted solution.
    #[error("CAPTCHA not solved after {attempts} attempts")]
    Exhausted {
        /// How many attempts were made.
        attempts: usize,
    },

    /// The page surface failed.
    #[error(transparent)]
    Page(#[from] PageError),

    /// The background solve task failed to complete.
    #[error("Solver task failed: {0}")]
    Task(String),
}

/// An accepted solution and the attempt it took.
#[derive(Clone, Debug)]
pub struct SolvedChallenge {
    /// 1-based attempt number that was accepted.
    pub attempts: usize,
    /// The accepted text.
    pub text: String,
}

/// Bounded solve → submit → detect-outcome → refresh loop.
pub struct RetryController {
    solver: Arc<dyn CaptchaSolve>,
    config: RetryConfig,
}

impl RetryController {
    /// Build a controller around a solver.
    pub fn new(solver: Arc<dyn CaptchaSolve>, config: RetryConfig) -> Self {
        Self { solver, config }
    }

    /// Drive the page until a solution is accepted or attempts run out.
    pub async fn run(&self, page: &mut dyn ChallengePage) -> Result<SolvedChallenge, CaptchaError> {
        for attempt in 1..=self.config.max_attempts {
            info!(
                "CAPTCHA attempt {}/{}",
                attempt, self.config.max_attempts
            );

            let Some(image) = page.captcha_image().await? else {
                warn!("CAPTCHA image not present, refreshing");
                page.refresh_captcha().await?;
                continue;
            };

            // OCR is CPU-bound, so it runs off the async executor.
            let solver = Arc::clone(&self.solver);
            let solution = tokio::task::spawn_blocking(move || solver.solve(&image))
                .await
                .map_err(|e| CaptchaError::Task(e.to_string()))?;

            let Some(text) = solution else {
                warn!("No readable CAPTCHA text, refreshing");
                page.refresh_captcha().await?;
                continue;
            };

            if text.len() < self.config.min_submit_length {
                warn!("CAPTCHA guess '{}' too short to submit, refreshing", text);
                page.refresh_captcha().await?;
                continue;
            }

            info!("Submitting CAPTCHA guess '{}'", text);
            page.submit_solution(&text).await?;

            match page.await_outcome().await? {
                SubmitOutcome::Accepted => {
                    info!("CAPTCHA accepted on attempt {}", attempt);
                    return Ok(SolvedChallenge {
                        attempts: attempt,
                        text,
                    });
                }
                SubmitOutcome::Rejected => {
                    warn!("CAPTCHA guess rejected");
                    page.dismiss_error().await?;
                    page.refresh_captcha().await?;
                }
                SubmitOutcome::TimedOut => {
                    warn!("No outcome observed for CAPTCHA submission");
                    page.refresh_captcha().await?;
                }
            }
        }

        Err(CaptchaError::Exhausted {
            attempts: self.config.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubSolver {
        answer: Option<String>,
    }

    impl CaptchaSolve for StubSolver {
        fn solve(&self, _image_bytes: &[u8]) -> Option<String> {
            self.answer.clone()
        }
    }

    #[derive(Default)]
    struct StubPage {
        accept_on_submit: Option<usize>,
        submits: usize,
        refreshes: usize,
        dismissals: usize,
    }

    #[async_trait]
    impl ChallengePage for StubPage {
        async fn captcha_image(&mut self) -> Result<Option<Vec<u8>>, PageError> {
            Ok(Some(vec![0u8; 4]))
        }

        async fn refresh_captcha(&mut self) -> Result<(), PageError> {
            self.refreshes += 1;
            Ok(())
        }

        async fn submit_solution(&mut self, _text: &str) -> Result<(), PageError> {
            self.submits += 1;
            Ok(())
        }

        async fn await_outcome(&mut self) -> Result<SubmitOutcome, PageError> {
            match self.accept_on_submit {
                Some(n) if self.submits >= n => Ok(SubmitOutcome::Accepted),
                _ => Ok(SubmitOutcome::Rejected),
            }
        }

        async fn dismiss_error(&mut self) -> Result<(), PageError> {
            self.dismissals += 1;
            Ok(())
        }
    }

    fn controller(answer: Option<&str>) -> RetryController {
        RetryController::new(
            Arc::new(StubSolver {
                answer: answer.map(String::from),
            }),
            RetryConfig {
                max_attempts: 3,
                min_submit_length: 4,
            },
        )
    }

    #[tokio::test]
    async fn exhaustion_after_max_attempts_of_rejection() {
        let mut page = StubPage::default();
        let result = controller(Some("aB3dE")).run(&mut page).await;

        assert!(matches!(
            result,
            Err(CaptchaError::Exhausted { attempts: 3 })
        ));
        assert_eq!(page.submits, 3);
        assert_eq!(page.dismissals, 3);
    }

    #[tokio::test]
    async fn acceptance_on_later_attempt_reports_attempt_count() {
        let mut page = StubPage {
            accept_on_submit: Some(2),
            ..Default::default()
        };
        let solved = controller(Some("aB3dE"))
            .run(&mut page)
            .await
            .expect("should solve");

        assert_eq!(solved.attempts, 2);
        assert_eq!(solved.text, "aB3dE");
        assert_eq!(page.submits, 2);
    }

    #[tokio::test]
    async fn unreadable_captcha_never_submits() {
        let mut page = StubPage::default();
        let result = controller(None).run(&mut page).await;

        assert!(matches!(result, Err(CaptchaError::Exhausted { .. })));
        assert_eq!(page.submits, 0);
        assert_eq!(page.refreshes, 3);
    }

    #[tokio::test]
    async fn short_guess_is_refreshed_not_submitted() {
        let mut page = StubPage::default();
        let result = controller(Some("ab")).run(&mut page).await;

        assert!(matches!(result, Err(CaptchaError::Exhausted { .. })));
        assert_eq!(page.submits, 0);
        assert_eq!(page.refreshes, 3);
    }
}
