use anyhow::{Result, anyhow};
use asset_dl::cli::Args;
use asset_dl::coordinator::BatchCoordinator;
use asset_dl::destination::{DirHandle, LocalDir};
use asset_dl::error::PickError;
use asset_dl::logging;
use asset_dl::manifest::{AssetManifest, parse_link_file, select_prefix};
use asset_dl::models::Task;
use asset_dl::progress::ConsoleProgress;
use asset_dl::source::{ApiResolver, DirectResolver, HttpTransport, UrlResolver, build_client};
use asset_dl::state::StateManager;
use clap::Parser;
use indicatif::{HumanBytes, HumanDuration};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose)?;

    let client = build_client(args.proxy.as_deref())?;

    let (tasks, resolver): (Vec<Task>, Arc<dyn UrlResolver>) = match (&args.manifest, &args.link_file) {
        (Some(manifest), _) => {
            let api_url = args
                .api_url
                .as_deref()
                .ok_or_else(|| anyhow!("--api-url is required with --manifest"))?;
            let manifest = AssetManifest::load(manifest)?;
            let resolver: Arc<dyn UrlResolver> =
                Arc::new(ApiResolver::new(client.clone(), api_url, args.token.clone()));
            (manifest.flatten(), resolver)
        }
        (None, Some(link_file)) => {
            let resolver: Arc<dyn UrlResolver> = Arc::new(DirectResolver);
            (parse_link_file(link_file)?, resolver)
        }
        (None, None) => return Err(anyhow!("either --manifest or --link-file is required")),
    };

    let tasks = match &args.prefix {
        Some(prefix) => select_prefix(tasks, prefix, args.recursive),
        None => tasks,
    };

    let coordinator = BatchCoordinator::new(
        resolver,
        Arc::new(HttpTransport::new(client)),
        args.batch_options(),
    );

    if args.shareable_links_only {
        return print_links(&coordinator, tasks).await;
    }

    let tasks = if args.resume {
        let output = args
            .output
            .as_ref()
            .ok_or_else(|| anyhow!("--resume needs --output"))?;
        let pending = StateManager::new(output).pending(tasks)?;
        if pending.is_empty() {
            println!("Nothing to do: every file is already downloaded");
            return Ok(());
        }
        pending
    } else {
        tasks
    };

    let total = tasks.len();
    let concurrency = coordinator.options().concurrency;
    let board = coordinator.board();
    let chosen: Arc<Mutex<Option<(PathBuf, Arc<ConsoleProgress>)>>> = Arc::new(Mutex::new(None));
    let picked = Arc::clone(&chosen);
    let preset = args.output.clone();

    let report = coordinator
        .run_with_picker(tasks, || async move {
            let output = match preset {
                Some(output) => output,
                None => prompt_output().await?,
            };
            let root = LocalDir::open_or_create(output.clone()).await?;

            println!(
                "Downloading {} file(s) to {} ({} at a time)",
                total,
                output.display(),
                concurrency
            );
            let progress = Arc::new(ConsoleProgress::new(total));
            board.subscribe(progress.clone());
            *picked.lock() = Some((output, progress));

            Ok::<Arc<dyn DirHandle>, PickError>(Arc::new(root))
        })
        .await?;
    let (Some(report), Some((output, progress))) = (report, chosen.lock().take()) else {
        return Ok(());
    };

    progress.finish(&report.stats);

    let state_manager = StateManager::new(&output);
    if let Err(e) = state_manager.save_state(&coordinator.board().snapshot()) {
        eprintln!(
            "Warning: could not save download state to {}: {e:#}",
            state_manager.path().display()
        );
    }

    println!(
        "\nDone: {} success, {} failed",
        report.stats.completed, report.stats.failed
    );
    println!(
        "Transferred {} in {} ({}/s)",
        HumanBytes(report.bytes_transferred()),
        HumanDuration(report.elapsed),
        HumanBytes(report.average_speed() as u64)
    );
    if args.verbose > 0 {
        for done in &report.completed {
            println!("  ok {} ({})", done.path, HumanBytes(done.bytes));
        }
    }
    for failed in &report.failed {
        println!("  {}: {}", failed.path, failed.error);
    }
    if !report.is_success() {
        println!(
            "Re-run with --resume -o {} to retry the {} unfinished file(s)",
            output.display(),
            report.unfinished().len()
        );
    }

    Ok(())
}

/// Prints `path<TAB>url` lines, which `--link-file` reads back.
async fn print_links(coordinator: &BatchCoordinator, tasks: Vec<Task>) -> Result<()> {
    let (links, failed) = coordinator.resolve_links(tasks).await?;

    for link in &links {
        println!("{}\t{}", link.path, link.url);
    }
    for failed in &failed {
        eprintln!("Skipped {}: {}", failed.path, failed.error);
    }

    if links.is_empty() {
        return Err(anyhow!("no download links could be generated"));
    }
    Ok(())
}

/// Asks for the destination on stdin; an empty answer cancels.
async fn prompt_output() -> Result<PathBuf, PickError> {
    eprint!("Output directory (leave empty to cancel): ");
    let mut line = String::new();
    let read = BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;

    let answer = line.trim();
    if read == 0 || answer.is_empty() {
        return Err(PickError::Cancelled);
    }
    Ok(PathBuf::from(answer))
}
