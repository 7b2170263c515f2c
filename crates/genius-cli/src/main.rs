//! SchoolGenius CLI
//!
//! Serves the lesson API, plays a lesson in the terminal, or lists lessons.

use std::net::SocketAddr;
use std::path::Path;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use genius_lesson::{
    create_router, grade, AppState, Answer, ChallengeMode, ChallengeProblem, Config,
    LessonResolution, LessonResolver, LessonSession, Phase, ProgressReporter, SessionEvent,
    SessionSnapshot, MAX_GRADE,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Default port for the HTTP API server.
const DEFAULT_PORT: u16 = 3000;

/// SchoolGenius - Lesson Engine
///
/// Moves a learner through rules, demo, practice and completion, and records
/// the final score.
#[derive(Parser, Debug)]
#[command(name = "genius")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: genius.json in current directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP and WebSocket API
    Serve {
        /// Port for the HTTP API server
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
    /// Play a lesson in the terminal
    Play {
        /// Grade to pick a lesson for (0 is kindergarten)
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=i64::from(MAX_GRADE)))]
        grade: u8,

        /// Learner identifier recorded with the score
        #[arg(long, value_name = "ID")]
        child: String,

        /// Specific lesson to play
        #[arg(short, long, value_name = "ID")]
        lesson: Option<String>,
    },
    /// List the lessons available for a grade
    Lessons {
        /// Grade to list
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=i64::from(MAX_GRADE)))]
        grade: u8,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(config = ?args.config, "Config file");

    let result = match load_config(args.config.as_deref()) {
        Ok(config) => match args.command {
            Command::Serve { port } => serve(config, port).await,
            Command::Play {
                grade,
                child,
                lesson,
            } => play(config, grade, &child, lesson.as_deref()).await,
            Command::Lessons { grade } => list_lessons(&config, grade).await,
        },
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Loads configuration from the specified path or default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

/// Prints the loaded configuration.
fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  Subject: {}", config.subject);
    println!("  Lessons directory: {}", config.lessons_dir);
    println!("  Fallback grade: {}", config.fallback_grade);
    println!("  Invalid transitions: {:?}", config.invalid_transitions);
    println!("  Session idle timeout: {}s", config.session_idle_seconds);
    println!("  Progress sink: {:?}", config.progress.sink);
}

// ============================================================================
// serve
// ============================================================================

/// Runs the HTTP API until Ctrl+C.
async fn serve(config: Config, port: u16) -> anyhow::Result<()> {
    print_config(&config);

    let state = AppState::from_config(config).map_err(|e| anyhow::anyhow!("{e}"))?;
    let router = create_router(state);

    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    println!();
    println!("HTTP API server running on http://{addr}");
    println!("Press Ctrl+C to stop");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            }
        })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

// ============================================================================
// lessons
// ============================================================================

/// Prints the lessons the resolver would offer for a grade.
async fn list_lessons(config: &Config, grade: u8) -> anyhow::Result<()> {
    let resolver = LessonResolver::from_config(config).map_err(|e| anyhow::anyhow!("{e}"))?;
    let (origin, lessons) = resolver.list(grade).await;

    let Some(origin) = origin else {
        println!("No lessons available for grade {grade}");
        return Ok(());
    };

    println!("Grade {grade} lessons ({origin:?} source):");
    for lesson in lessons {
        println!(
            "  {:<28} {:<7} {} ({} challenges)",
            lesson.id,
            lesson.mode.to_string(),
            lesson.topic,
            lesson.total_challenges()
        );
    }
    Ok(())
}

// ============================================================================
// play
// ============================================================================

/// One line of learner input.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PlayCommand {
    Event(SessionEvent),
    Answer(String),
    Help,
    Quit,
}

fn parse_command(line: &str) -> Option<PlayCommand> {
    let line = line.trim();
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    let command = match word.to_lowercase().as_str() {
        "next" | "n" => PlayCommand::Event(SessionEvent::Advance),
        "skip" => PlayCommand::Event(SessionEvent::Skip),
        "hint" | "h" => PlayCommand::Event(SessionEvent::RequestHint),
        "pass" => PlayCommand::Event(SessionEvent::ChallengeResult { success: true }),
        "fail" => PlayCommand::Event(SessionEvent::ChallengeResult { success: false }),
        "retry" => PlayCommand::Event(SessionEvent::Retry),
        "answer" | "a" => PlayCommand::Answer(rest.trim().replace("\\n", "\n")),
        "help" | "?" => PlayCommand::Help,
        "quit" | "q" | "exit" => PlayCommand::Quit,
        _ => return None,
    };
    Some(command)
}

/// Builds an answer of the shape the challenge expects.
fn to_answer(problem: &ChallengeProblem, text: &str) -> Answer {
    match problem.mode() {
        ChallengeMode::Blocks => Answer::Blocks(text.split_whitespace().map(str::to_string).collect()),
        ChallengeMode::Text => Answer::Text(text.to_string()),
    }
}

/// Grades an answer. A wrong answer keeps the challenge open, so only a
/// correct one produces an event.
fn answer_event(problem: &ChallengeProblem, text: &str) -> Option<SessionEvent> {
    grade(problem, &to_answer(problem, text))
        .then_some(SessionEvent::ChallengeResult { success: true })
}

/// Plays one lesson on stdin/stdout.
async fn play(
    config: Config,
    grade_level: u8,
    child_id: &str,
    lesson_id: Option<&str>,
) -> anyhow::Result<()> {
    let resolver = LessonResolver::from_config(&config).map_err(|e| anyhow::anyhow!("{e}"))?;
    let resolution = resolver.resolve(grade_level, lesson_id).await;
    if matches!(resolution, LessonResolution::FromFallback(_)) {
        println!("(using built-in lesson)");
    }
    let lesson = resolution.into_lesson().map_err(|e| anyhow::anyhow!("{e}"))?;

    let mut session = LessonSession::new(lesson, child_id, config.subject)
        .map_err(|e| anyhow::anyhow!("{e}"))?
        .with_policy(config.invalid_transitions);
    if let Some(sink) =
        genius_lesson::sink_from_config(&config.progress).map_err(|e| anyhow::anyhow!("{e}"))?
    {
        session = session.with_reporter(ProgressReporter::new(sink));
    }

    print_help();
    render(&session.snapshot());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let Some(command) = parse_command(&line) else {
            println!("Unknown command. Type 'help' for commands.");
            continue;
        };

        let event = match command {
            PlayCommand::Quit => break,
            PlayCommand::Help => {
                print_help();
                continue;
            }
            PlayCommand::Event(event) => event,
            PlayCommand::Answer(text) => {
                let Some(challenge) = session.current_challenge() else {
                    println!("There is no challenge to answer right now.");
                    continue;
                };
                let Some(event) = answer_event(&challenge.problem, &text) else {
                    println!("Not quite. Try again, ask for a hint, or type 'fail' to move on.");
                    continue;
                };
                println!("Correct!");
                event
            }
        };

        match session.handle(event) {
            Ok(outcome) => {
                tracing::debug!(outcome = ?outcome, "Event applied");
                render(&session.snapshot());
            }
            Err(e) => println!("{e}"),
        }
    }

    // Let in-flight completion writes finish before the runtime shuts down
    for pending in session.take_pending_persists() {
        if let Err(e) = pending.await {
            tracing::warn!(error = %e, "Progress write task failed");
        }
    }

    Ok(())
}

fn print_help() {
    println!();
    println!("Commands: next, skip, hint, answer <text>, pass, fail, retry, quit");
    println!("  Blocks answers are block ids separated by spaces: answer move1 move2 grab");
    println!("  Text answers may use \\n for new lines: answer age = 12\\nprint(age)");
    println!("  A wrong answer can be tried again; 'fail' gives up on the challenge");
}

/// Prints what the learner should see for the current phase.
fn render(snapshot: &SessionSnapshot) {
    println!();
    match snapshot.phase {
        Phase::Rules => {
            println!("== {} ==", snapshot.topic);
            if let Some(rule) = &snapshot.rule {
                println!("Rule: {rule}");
            }
            if let Some(explanation) = &snapshot.rule_explanation {
                println!("{explanation}");
            }
            println!("(next or skip to see an example)");
        }
        Phase::Demo => {
            println!("== Example ==");
            if let Some(code) = &snapshot.demo_code {
                println!("{code}");
            }
            if let Some(output) = &snapshot.demo_output {
                println!("Output: {output}");
            }
            println!("(next to start practicing)");
        }
        Phase::Practice => {
            println!(
                "== Challenge {} of {} == Score: {}",
                snapshot.current_challenge_index + 1,
                snapshot.total,
                snapshot.score
            );
            if let Some(challenge) = &snapshot.challenge {
                println!("{}", challenge.instruction);
                render_problem(&challenge.problem);
            }
            if let Some(hint) = &snapshot.hint {
                println!("Hint {}: {hint}", snapshot.hint_tier);
            }
        }
        Phase::Complete => {
            if let Some(result) = &snapshot.result {
                println!("== {} ==", result.title);
                println!("{}", result.message);
            }
            println!("Score: {} / {}", snapshot.score, snapshot.total);
            println!("(retry to play again, quit to exit)");
        }
    }
}

fn render_problem(problem: &ChallengeProblem) {
    match problem {
        ChallengeProblem::Blocks {
            available_blocks, ..
        } => {
            println!("Blocks:");
            for block in available_blocks {
                let icon = block.icon.as_deref().unwrap_or("-");
                println!("  {icon} {} [{}]", block.text, block.id);
            }
        }
        ChallengeProblem::Text { starter_code, .. } => {
            if !starter_code.is_empty() {
                println!("Starter code:");
                println!("{starter_code}");
            }
        }
    }
}
