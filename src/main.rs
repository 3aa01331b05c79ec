mod app;

use app::App;
use speedy_narrator::config::Config;
use speedy_narrator::error::{AppError, Result};
use speedy_narrator::models::PlaybackMode;

const USAGE: &str = "Usage: speedy-narrator [--extract | --status | --speak <article-id> [--mode full|summary|translated] | --priority <article-id> <priority>]";

enum Command {
    Worker,
    Extract,
    Status,
    Speak { article_id: i64, mode: PlaybackMode },
    Priority { article_id: i64, priority: i64 },
}

fn parse_number(arg: Option<&String>) -> Result<i64> {
    arg.and_then(|value| value.parse().ok())
        .ok_or_else(|| AppError::Config(USAGE.to_string()))
}

fn parse_args(args: &[String]) -> Result<Command> {
    match args.get(1).map(String::as_str) {
        None => Ok(Command::Worker),
        Some("--extract") => Ok(Command::Extract),
        Some("--status") => Ok(Command::Status),
        Some("--speak") => {
            let article_id = parse_number(args.get(2))?;
            let mode = match (args.get(3).map(String::as_str), args.get(4)) {
                (Some("--mode"), Some(mode)) => mode.parse().map_err(AppError::Config)?,
                (None, _) => PlaybackMode::Full,
                _ => return Err(AppError::Config(USAGE.to_string())),
            };
            Ok(Command::Speak { article_id, mode })
        }
        Some("--priority") => Ok(Command::Priority {
            article_id: parse_number(args.get(2))?,
            priority: parse_number(args.get(3))?,
        }),
        Some(_) => Err(AppError::Config(USAGE.to_string())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (only show warnings and errors by default)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let command = parse_args(&args)?;

    // Load configuration
    let config = Config::load()?;

    let app = App::new(&config).await?;

    match command {
        Command::Extract => {
            let report = app.extract_all().await?;
            println!(
                "Extracted {} articles ({} failed attempts)",
                report.extracted, report.failed
            );
        }
        Command::Status => {
            let (pending, feeds) =
                futures::try_join!(app.pending_count(), app.repository.get_all_feeds())?;
            let rendered = feeds.iter().filter(|f| f.needs_sandboxed_render()).count();
            println!("{} articles waiting for extraction", pending);
            println!("{} feeds ({} rendered in a browser)", feeds.len(), rendered);
        }
        Command::Speak { article_id, mode } => app.speak(article_id, mode).await?,
        Command::Priority {
            article_id,
            priority,
        } => {
            app.set_priority(article_id, priority).await?;
            println!("Article {} now has priority {}", article_id, priority);
        }
        Command::Worker => app.run_worker().await?,
    }

    Ok(())
}
