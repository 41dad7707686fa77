use std::io::{IsTerminal, Write as _};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

use icloud_bulk_dl::auth::error::AuthError;
use icloud_bulk_dl::auth::twofa::TWO_FA_CODE_LENGTH;
use icloud_bulk_dl::cli::Cli;
use icloud_bulk_dl::config::Config;
use icloud_bulk_dl::progress::{Phase, ProgressStream, ProgressTracker};
use icloud_bulk_dl::{fault, shutdown, App, Error};

/// Bars track phase fractions at this resolution.
const BAR_SCALE: u64 = 1000;

/// Wrong codes tolerated before giving up on two-factor verification.
const MAX_CODE_ATTEMPTS: u32 = 3;

fn prompt_line(prompt: &str) -> std::io::Result<String> {
    tokio::task::block_in_place(|| {
        print!("{}", prompt);
        std::io::stdout().flush()?;
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        Ok(input.trim().to_string())
    })
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("[{elapsed_precise}] [{bar:40.cyan/blue}] {percent:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("[{elapsed_precise}] {spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Render the update stream on stdout until it ends. Nothing is drawn when
/// the user opted out or stdout is not a terminal.
fn spawn_progress_renderer(mut stream: ProgressStream, hidden: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let hidden = hidden || !std::io::stdout().is_terminal();
        let mut current: Option<(Phase, ProgressBar)> = None;

        while let Some(update) = stream.next().await {
            if current.as_ref().map(|(p, _)| *p) != Some(update.phase) {
                if let Some((_, bar)) = current.take() {
                    bar.finish();
                }
                let bar = if hidden {
                    ProgressBar::hidden()
                } else if update.phase.is_indeterminate() {
                    let bar = ProgressBar::new_spinner().with_style(spinner_style());
                    bar.enable_steady_tick(std::time::Duration::from_millis(120));
                    bar
                } else {
                    ProgressBar::new(BAR_SCALE).with_style(bar_style())
                };
                current = Some((update.phase, bar));
            }

            if let Some((phase, bar)) = &current {
                if phase.is_indeterminate() {
                    bar.set_message(format!("{}: {} records", phase, update.value as u64));
                } else {
                    bar.set_message(phase.label());
                    bar.set_position((update.value.clamp(0.0, 1.0) * BAR_SCALE as f64) as u64);
                }
            }
        }

        if let Some((_, bar)) = current {
            bar.finish();
        }
    })
}

async fn complete_second_factor(app: &App) -> anyhow::Result<()> {
    if !std::io::stdin().is_terminal() {
        anyhow::bail!(
            "Two-factor authentication is required but stdin is not interactive.\n\
             Run `icloud-bulk-dl --auth-only` in a terminal first."
        );
    }
    for attempt in 1..=MAX_CODE_ATTEMPTS {
        let code = prompt_line(&format!(
            "Enter the {}-digit code from a trusted device: ",
            TWO_FA_CODE_LENGTH
        ))?;
        match app.submit_second_factor(&code).await {
            Ok(()) => return Ok(()),
            Err(Error::Auth(AuthError::InvalidTwoFactorCode)) if attempt < MAX_CODE_ATTEMPTS => {
                eprintln!("That is not a {}-digit code, try again.", TWO_FA_CODE_LENGTH);
            }
            Err(e) => return Err(e.into()),
        }
    }
    anyhow::bail!("too many invalid verification codes")
}

async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        concurrency = config.max_parallel,
        "Starting icloud-bulk-dl"
    );

    let password = match config.password.clone() {
        Some(pw) => pw,
        None => tokio::task::block_in_place(|| rpassword::prompt_password("iCloud Password: "))?,
    };

    let app = Arc::new(App::new(&config)?);
    let signal_app = app.clone();
    let _signals = shutdown::install_signal_handler(move || signal_app.cancel());

    let outcome = app.login(&config.username, &password).await?;
    if outcome.requires_2fa {
        complete_second_factor(&app).await?;
    }
    if config.auth_only {
        tracing::info!("Authentication completed successfully");
        return Ok(());
    }

    let (tracker, stream) = ProgressTracker::channel();
    let renderer = spawn_progress_renderer(stream, config.no_progress_bar);
    let result = app.download_all(&config.directory, Some(tracker)).await;
    if let Err(e) = renderer.await {
        tracing::debug!("Progress renderer ended abnormally: {}", e);
    }

    let summary = result?;
    println!(
        "Downloaded {} photos into {} ({} unique in {} archives, {} duplicates)",
        summary.photos,
        config.directory.display(),
        summary.unique,
        summary.batches,
        summary.duplicates
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();
    fault::install_panic_hook();

    let result = match Config::from_cli(cli).await {
        Ok(config) => run(config).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let cancelled = e.downcast_ref::<Error>().is_some_and(Error::is_cancelled);
            if cancelled {
                eprintln!("Cancelled.");
                ExitCode::from(shutdown::FORCE_EXIT_CODE as u8)
            } else {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        }
    }
}
