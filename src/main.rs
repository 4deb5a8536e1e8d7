// Binary entry point - thin command-line wrapper around the sync engine
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use colored::*;
use log::warn;

use photo_autosync::error::Result;
use photo_autosync::{
    format_uri, ConsoleNotifier, HttpUploader, PreferenceStore, RunOutcome, SettingsFile,
    StatusSnapshot, SyncConfig, SyncEngine,
};

fn usage(program: &str) {
    eprintln!("{} Usage:", "❌".red());
    eprintln!("  {} <prefs.db> sync                    run one upload pass", program);
    eprintln!("  {} <prefs.db> daemon                  upload every interval until Ctrl-C", program);
    eprintln!("  {} <prefs.db> configure <file.json>   import settings", program);
    eprintln!("  {} <prefs.db> set-dir <directory>     choose the directory to sync", program);
    eprintln!("  {} <prefs.db> enable|disable          switch periodic sync on or off", program);
    eprintln!("  {} <prefs.db> status                  print current status as JSON", program);
    eprintln!("  {} format-uri <uri>                   show a directory reference as a path", program);
}

fn build_engine(store: Arc<PreferenceStore>) -> Result<SyncEngine> {
    let uploader = HttpUploader::new(None)?;
    Ok(SyncEngine::new(store, Box::new(uploader), Arc::new(ConsoleNotifier)))
}

fn run(args: &[String]) -> Result<i32> {
    let program = args.first().map(String::as_str).unwrap_or("autosync");

    if args.len() == 3 && args[1] == "format-uri" {
        println!("{}", format_uri(&args[2]));
        return Ok(0);
    }

    if args.len() < 3 {
        usage(program);
        return Ok(2);
    }

    let store = Arc::new(PreferenceStore::open(Path::new(&args[1]))?);

    match (args[2].as_str(), args.get(3)) {
        ("sync", None) => {
            let engine = build_engine(store)?;
            match engine.run_once()? {
                RunOutcome::Skipped => println!("⏭️ Another upload is in progress"),
                RunOutcome::Finished(summary) if summary.is_success() => {
                    println!("{} {} images uploaded", "✅".green(), summary.uploaded);
                }
                RunOutcome::Finished(summary) => {
                    println!(
                        "{} {} of {} images failed",
                        "⚠️".yellow(),
                        summary.failed,
                        summary.total
                    );
                    return Ok(1);
                }
            }
        }
        ("daemon", None) => {
            store.set_sync_enabled(true)?;
            let config = SyncConfig::load(&store)?;
            println!("{}", "=".repeat(60).blue());
            println!("🚀 {} - every {} minutes", "Photo AutoSync".bold().green(), config.interval_minutes);
            println!(
                "📁 Directory: {}",
                config.directory.as_deref().map(format_uri).unwrap_or_default().cyan()
            );
            println!("{}", "=".repeat(60).blue());

            let engine = build_engine(store)?;

            let events = engine.events().subscribe();
            thread::spawn(move || {
                while let Ok(event) = events.recv() {
                    println!("📣 {}", event.message());
                }
            });

            // Ctrl-C finishes the current file, then leaves the loop
            let shutdown = Arc::new(AtomicBool::new(false));
            let shutdown_clone = shutdown.clone();
            if let Err(e) = ctrlc::set_handler(move || {
                println!("{} Received shutdown signal, finishing current upload...", "🛑".red());
                shutdown_clone.store(true, Ordering::SeqCst);
            }) {
                warn!("Could not install Ctrl-C handler: {}", e);
            }

            engine.run_periodic(&shutdown);
        }
        ("configure", Some(file)) => {
            SettingsFile::read(Path::new(file))?.apply(&store)?;
            println!("{} Settings saved", "✅".green());
        }
        ("set-dir", Some(directory)) => {
            store.set_directory(directory)?;
            println!("{} Directory: {}", "✅".green(), format_uri(directory));
        }
        ("enable", None) => store.set_sync_enabled(true)?,
        ("disable", None) => store.set_sync_enabled(false)?,
        ("status", None) => {
            let status = StatusSnapshot::load(&store, store.run_in_progress())?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        _ => {
            usage(program);
            return Ok(2);
        }
    }

    Ok(0)
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    match run(&args) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {}", "❌".red(), e);
            std::process::exit(1);
        }
    }
}
