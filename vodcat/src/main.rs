use std::ffi::OsString;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use hls_fix::FfmpegMuxer;
use mesio::{DownloaderConfig, ResumableTransfer, RetryPolicy, create_client};
use tokio_util::sync::CancellationToken;
use tracing::{Level, debug, error, info, warn};
use vodcat::cli::CliArgs;
use vodcat::config::{AppPaths, load_user_config, merge_with_command_line};
use vodcat::database::WorkdirCache;
use vodcat::logging::{Verbosity, bootstrap_subscriber, init_logging};
use vodcat::runner::{EntryOptions, EntryOutcome, Runner};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Parse the command line, then again with the user config prepended.
///
/// The first pass makes sure errors on the command line itself are reported
/// as such; an error that only shows up in the second pass comes from the
/// config file.
fn parse_args(paths: &AppPaths) -> Result<CliArgs, ExitCode> {
    let command_line: Vec<OsString> = std::env::args_os().collect();
    let args = CliArgs::parse_from(&command_line);
    if paths.user_config_disabled {
        return Ok(args);
    }

    let config_file = paths.config_file();
    let defaults = tracing::subscriber::with_default(bootstrap_subscriber(), || {
        load_user_config(&config_file).unwrap_or_else(|e| {
            warn!("error loading user config: {e:#}");
            Vec::new()
        })
    });
    if defaults.is_empty() {
        return Ok(args);
    }

    CliArgs::try_parse_from(merge_with_command_line(defaults, command_line)).map_err(|e| {
        let _ = e.print();
        eprintln!(
            "You may want to check your config file \"{}\"",
            config_file.display()
        );
        ExitCode::from(2)
    })
}

/// Cancel `token` on Ctrl-C, or SIGTERM on Unix.
fn spawn_signal_handler(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                    return;
                }
            }
            _ = terminate => {}
        }
        info!("Interrupted, shutting down");
        token.cancel();
    });
}

/// Startup checks on option combinations.
fn validate(args: &CliArgs) -> Result<(), String> {
    if args.batch {
        if args.output.is_some() {
            return Err("output file not allowed in batch mode".into());
        }
        if args.workdir.is_some() {
            return Err("workdir not allowed in batch mode".into());
        }
    }
    if let Some(root) = &args.workroot
        && !root.is_dir()
    {
        return Err(format!("{} does not exist or is not a directory", root.display()));
    }
    if args.workroot.is_none()
        && let Some(workdir) = &args.workdir
        && let Some(parent) = workdir.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        return Err(format!("{} does not exist", parent.display()));
    }
    if args.jobs == Some(0) {
        return Err("jobs must be positive".into());
    }
    Ok(())
}

async fn run(args: CliArgs, paths: AppPaths, verbosity: Verbosity) -> ExitCode {
    if let Err(message) = validate(&args) {
        error!("{message}");
        return ExitCode::FAILURE;
    }

    let Some(ffmpeg) = process_utils::find_program(&args.ffmpeg) else {
        error!("{} not found", args.ffmpeg.display());
        return ExitCode::FAILURE;
    };
    debug!(ffmpeg = %ffmpeg.display(), "Using ffmpeg");

    let cache = if paths.cache_disabled {
        WorkdirCache::disabled()
    } else {
        WorkdirCache::open(&paths.database_file()).await
    };

    let client = match create_client(&DownloaderConfig::default()) {
        Ok(client) => client,
        Err(e) => {
            error!("failed to create HTTP client: {e}");
            return ExitCode::FAILURE;
        }
    };
    let transfer = ResumableTransfer::new(client, RetryPolicy::default());
    let muxer = FfmpegMuxer::new(ffmpeg).with_echo_opening(verbosity.allows(Level::INFO));

    let options = EntryOptions {
        force: args.force,
        exist_ok: args.batch && args.exist_ok,
        workdir: args.workdir.clone(),
        workroot: args.workroot.clone(),
        wipe: args.wipe,
        keep: args.keep,
        jobs: args.jobs,
        concat_method: args.concat_method,
        retries: args.retries,
        progress: verbosity.shows_progress(args.progress_override()),
        ..EntryOptions::default()
    };
    let runner = Runner::new(Arc::new(transfer), Arc::new(muxer), Arc::new(cache), options);

    let token = CancellationToken::new();
    spawn_signal_handler(token.clone());

    if args.batch {
        let manifest = vodcat::utils::fs::absolutize(std::path::Path::new(&args.url));
        match runner
            .process_batch(&manifest, args.remove_manifest_on_success, &token)
            .await
        {
            Ok(report) if report.is_success() => ExitCode::SUCCESS,
            Ok(report) => {
                error!(failed = report.failed, "Some entries failed");
                ExitCode::FAILURE
            }
            Err(e) => {
                error!("{e}");
                ExitCode::FAILURE
            }
        }
    } else {
        match runner
            .process_entry(&args.url, args.output.as_deref(), &token)
            .await
        {
            Ok(EntryOutcome::Completed(output)) => {
                info!(output = %output.display(), "Done");
                ExitCode::SUCCESS
            }
            Ok(EntryOutcome::AlreadyExists(_)) => ExitCode::SUCCESS,
            Err(e) => {
                error!("{e}");
                ExitCode::FAILURE
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let paths = AppPaths::from_env();
    let args = match parse_args(&paths) {
        Ok(args) => args,
        Err(code) => return code,
    };

    let verbosity = Verbosity::from_counts(args.verbose, args.quiet, args.debug);
    let _guard = match init_logging(verbosity, args.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    run(args, paths, verbosity).await
}
