use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use error::AppError;
use hlsdl_engine::{
    DownloadSession, DownloadStatus, HttpTransport, OverwritePolicy, ProxyConfig, ProxyScheme,
    SessionConfig, create_client,
};
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::writer::MakeWriterExt;

mod cli;
mod error;
mod playlist;
mod utils;

use cli::CliArgs;
use utils::progress::ProgressManager;
use utils::prompt::StdinPrompt;

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        error!(error = ?e, "Application failed");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    let args = CliArgs::parse();

    // Setup logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open("hlsdl.log")?;

    let multi_writer = MakeWriterExt::and(std::io::stdout, log_file);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(multi_writer)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::Initialization(e.to_string()))?;

    info!("hlsdl {} - resumable HLS stream downloader", env!("CARGO_PKG_VERSION"));
    info!("==================================================================");

    if args.threads == 0 {
        return Err(AppError::InvalidInput(
            "--threads must be at least 1".to_string(),
        ));
    }

    let mut builder = SessionConfig::builder()
        .with_output_path(&args.output)
        .with_concurrency(args.threads)
        .with_retry_budget(args.retries)
        .with_resume_offset(args.offset)
        .with_skip_init_segment(args.skip_init)
        .with_request_timeout(Duration::from_secs(args.timeout))
        .with_connect_timeout(Duration::from_secs(args.connect_timeout))
        .with_headers(utils::parse_headers(&args.headers));

    if let Some(user_agent) = &args.user_agent {
        builder = builder.with_user_agent(user_agent);
    }

    if args.force {
        builder = builder.with_overwrite_policy(OverwritePolicy::Overwrite);
    } else if args.continue_existing {
        builder = builder.with_overwrite_policy(OverwritePolicy::Continue);
    }

    // Handle proxy configuration
    builder = if args.no_proxy {
        info!("All proxy settings disabled (--no-proxy flag)");
        builder.with_system_proxy(false)
    } else if let Some(proxy) = args.proxy.as_deref() {
        let mut proxy = if proxy.contains("://") {
            ProxyConfig::from_url(proxy)?
        } else {
            let scheme: ProxyScheme = args.proxy_type.parse().map_err(AppError::InvalidInput)?;
            ProxyConfig::from_host(proxy, scheme)?
        };

        // credentials on the command line win over ones embedded in the URL
        if let (Some(user), Some(pass)) = (&args.proxy_user, &args.proxy_pass) {
            proxy = proxy.with_credentials(user.clone(), pass.clone());
        }

        info!(
            proxy = %proxy,
            has_auth = proxy.credentials().is_some(),
            "Using explicit proxy configuration for downloads"
        );
        builder.with_proxy(proxy)
    } else if args.use_system_proxy {
        info!("Using system proxy settings for downloads");
        builder.with_system_proxy(true)
    } else {
        info!("No proxy settings configured for downloads");
        builder.with_system_proxy(false)
    };

    let mut config = builder.build();
    let client = create_client(&config)?;

    let (playlist, derived_base) =
        playlist::load_playlist(&args.input, &client, &config.headers).await?;
    let base_uri = args.base_url.clone().unwrap_or(derived_base);
    info!(base = %base_uri, "Resolving relative URIs against base");
    config.base_uri = Some(base_uri);

    info!(
        "Downloading {} parts to {} (threads: {}, retries: {})",
        playlist.len(),
        config.output_path.display(),
        config.concurrency,
        config.retry_budget
    );

    let progress_manager = if args.show_progress {
        ProgressManager::new()
    } else {
        ProgressManager::new_disabled()
    };

    let session = DownloadSession::with_transport(
        playlist,
        config,
        Arc::new(HttpTransport::new(client)),
    )?
    .with_overwrite_prompt(Arc::new(StdinPrompt))
    .on_event(Arc::new(move |event| {
        progress_manager.handle_event(event);
    }));

    let result = session.download().await;
    match &result.status {
        DownloadStatus::Completed => {
            info!(
                "Download complete: {} of {} parts",
                result.parts.completed, result.parts.total
            );
            Ok(())
        }
        DownloadStatus::Declined => {
            warn!("Output already exists, nothing downloaded");
            Ok(())
        }
        DownloadStatus::Failed { reason } => {
            if args.offset == 0 {
                info!(
                    "Run again with the same arguments to resume from part {}",
                    result.parts.completed + 1
                );
            }
            Err(AppError::Incomplete(reason.clone()))
        }
    }
}
