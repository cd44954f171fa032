//! Booking entry point: drives a browser through the appointment site's
//! CAPTCHA challenge using the OCR solver.

use std::sync::Arc;
use std::time::Duration;

use captcha_solve::{
    CaptchaError, CaptchaSolve, CaptchaSolver, PageSelectors, RetryConfig, RetryController,
    SolverConfig, WebDriverPage, init_engine,
};
use fantoccini::ClientBuilder;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[path = "../config.rs"]
mod config;
use config::AppConfig;

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("🚀 Starting booking assistant...");

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if config.target_url.is_empty() {
        error!("❌ TARGET_URL is not set, nothing to book");
        std::process::exit(1);
    }

    // No working OCR backend means the loop can never succeed; fail now.
    let engine = match init_engine(config.neural_model_path.as_deref(), &config.tesseract_binary) {
        Ok(engine) => engine,
        Err(e) => {
            error!("❌ OCR setup failed: {}", e);
            std::process::exit(1);
        }
    };

    let client = match ClientBuilder::native().connect(&config.webdriver_url).await {
        Ok(client) => {
            info!("🌐 Connected to WebDriver at {}", config.webdriver_url);
            client
        }
        Err(e) => {
            error!("❌ Failed to connect to WebDriver: {}", e);
            error!("💡 Start one with: chromedriver --port=4444");
            std::process::exit(1);
        }
    };

    if let Err(e) = client.goto(&config.target_url).await {
        error!("❌ Failed to open {}: {}", config.target_url, e);
        let _ = client.close().await;
        std::process::exit(1);
    }

    let solver: Arc<dyn CaptchaSolve> =
        Arc::new(CaptchaSolver::new(engine, SolverConfig::default()));
    let controller = RetryController::new(solver, RetryConfig::default());

    let mut page = WebDriverPage::new(
        client,
        PageSelectors::default(),
        Duration::from_secs(15),
    );

    let result = controller.run(&mut page).await;
    let _ = page.close().await;

    match result {
        Ok(solved) => {
            info!(
                "✅ CAPTCHA '{}' accepted on attempt {}",
                solved.text, solved.attempts
            );
        }
        Err(CaptchaError::Exhausted { attempts }) => {
            error!("❌ Gave up after {} attempts", attempts);
            std::process::exit(1);
        }
        Err(e) => {
            error!("❌ Booking flow failed: {}", e);
            std::process::exit(1);
        }
    }
}
