use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tracing_subscriber::EnvFilter;

use leo_companion::audio::{
    CpalMicrophone, CpalSpeaker, INPUT_SAMPLE_RATE, Microphone, OUTPUT_SAMPLE_RATE, SourceId,
    Speaker, duration_secs,
};
use leo_companion::service::decode_data_url;
use leo_companion::{
    AppState, ChatOrchestrator, Config, Emotion, GeminiClient, GeminiLiveConnector, ImageService,
    LiveController, LiveSetup, Rejected, Role, StartOutcome, StateEvent, SubmitOutcome,
};

/// Leo - streaming chat, images and live voice with Gemini
#[derive(Parser)]
#[command(name = "leo", version, about)]
struct Cli {
    /// Path to config file (defaults to ~/.config/leo/config.toml)
    #[arg(short, long, env = "LEO_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive chat (default)
    Chat,
    /// Send a single message and print the reply
    Ask {
        /// Message text
        text: String,
    },
    /// Generate an image
    Image {
        /// Image prompt
        prompt: String,
        /// Write the image to this file
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Start a live voice session (Ctrl-C to end)
    Live,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,leo_companion=info",
        1 => "info,leo_companion=debug",
        2 => "debug",
        _ => "trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref());
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => chat_repl(&config).await,
        Command::Ask { text } => ask(&config, &text).await,
        Command::Image { prompt, out } => image(&config, &prompt, out.as_deref()).await,
        Command::Live => live(&config).await,
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
    }
}

fn orchestrator(config: &Config, state: &AppState) -> anyhow::Result<ChatOrchestrator> {
    let client = Arc::new(GeminiClient::from_config(config)?);
    Ok(ChatOrchestrator::new(
        state.clone(),
        client.clone(),
        client,
        config.chat.history_window,
        config.persona.image_caption.clone(),
    ))
}

/// Print state events as they arrive
fn spawn_renderer(state: &AppState, name: String) -> tokio::task::JoinHandle<()> {
    let mut rx = state.subscribe();
    tokio::spawn(async move {
        let mut last_emotion = Emotion::Neutral;
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "renderer lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            match event {
                StateEvent::MessageAppended(msg) if msg.role == Role::Assistant => {
                    print!("{name}: {}", msg.text);
                    if let Some(url) = &msg.image_url {
                        print!(" [image, {} bytes encoded]", url.len());
                    }
                    if !msg.text.is_empty() || msg.image_url.is_some() {
                        println!();
                    }
                }
                StateEvent::TextAppended { fragment, .. } => print!("{fragment}"),
                StateEvent::SourcesUpdated { sources, .. } => {
                    for source in sources {
                        tracing::debug!(title = %source.title, uri = %source.uri, "citation");
                    }
                }
                StateEvent::FlagsChanged(flags) => {
                    if flags.emotion != last_emotion {
                        tracing::debug!(emotion = ?flags.emotion, "emotion changed");
                        last_emotion = flags.emotion;
                    }
                }
                StateEvent::MessageAppended(_) => {}
            }
            let _ = std::io::stdout().flush();
        }
    })
}

/// Print the citations of the last assistant message
fn print_sources(state: &AppState) {
    let messages = state.messages();
    let Some(last) = messages.last().filter(|m| m.role == Role::Assistant) else {
        return;
    };
    for (i, source) in last.sources.iter().enumerate() {
        println!("  [{}] {} <{}>", i + 1, source.title, source.uri);
    }
}

async fn submit_and_report(chat: &ChatOrchestrator, text: &str) {
    match chat.submit(text).await {
        SubmitOutcome::Rejected(Rejected::Blank) | SubmitOutcome::Image { .. } => {}
        SubmitOutcome::Rejected(Rejected::Busy) => println!("(still thinking...)"),
        SubmitOutcome::Text { completed, .. } => {
            println!();
            if completed {
                print_sources(chat.state());
            } else {
                println!("(something went wrong, the reply may be incomplete)");
            }
        }
    }
}

/// Interactive chat loop on stdin
async fn chat_repl(config: &Config) -> anyhow::Result<()> {
    let state = AppState::new();
    let chat = orchestrator(config, &state)?;
    let renderer = spawn_renderer(&state, config.persona.name.clone());

    println!(
        "Chatting with {}. Type a message, or /quit to exit.",
        config.persona.name
    );

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = LinesStream::new(stdin.lines());

    loop {
        print!("> ");
        let _ = std::io::stdout().flush();

        let Some(line) = lines.next().await else {
            break;
        };
        let line = line?;
        if matches!(line.trim(), "/quit" | "/exit") {
            break;
        }

        submit_and_report(&chat, &line).await;
    }

    renderer.abort();
    Ok(())
}

/// One-shot message
async fn ask(config: &Config, text: &str) -> anyhow::Result<()> {
    let state = AppState::new();
    let chat = orchestrator(config, &state)?;
    let renderer = spawn_renderer(&state, config.persona.name.clone());

    submit_and_report(&chat, text).await;

    // Dropping every sender closes the channel once buffered events drain
    drop(chat);
    drop(state);
    let _ = renderer.await;
    Ok(())
}

/// Generate an image directly
async fn image(config: &Config, prompt: &str, out: Option<&Path>) -> anyhow::Result<()> {
    let client = GeminiClient::from_config(config)?;

    let Some(url) = client.generate_image(prompt).await? else {
        anyhow::bail!("the model returned no image");
    };

    let (mime, bytes) = decode_data_url(&url)?;
    match out {
        Some(path) => {
            std::fs::write(path, &bytes)?;
            println!("Wrote {} ({mime}, {} bytes)", path.display(), bytes.len());
        }
        None => println!("Generated {mime} image ({} bytes); pass --out to save it", bytes.len()),
    }

    Ok(())
}

/// Live voice session until Ctrl-C or server close
#[allow(clippy::future_not_send)]
async fn live(config: &Config) -> anyhow::Result<()> {
    let state = AppState::new();
    let connector = Arc::new(GeminiLiveConnector::from_config(config)?);

    let mut controller = LiveController::new(
        state.clone(),
        connector,
        LiveSetup::from_config(config),
        Box::new(CpalMicrophone::new()),
        Box::new(CpalSpeaker::new()),
    );

    let mut rx = state.subscribe();
    let status = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            if let StateEvent::FlagsChanged(flags) = event {
                let status = match (flags.live, flags.speaking) {
                    (false, _) => "offline",
                    (true, true) => "speaking",
                    (true, false) => "listening",
                };
                println!("[{status}]");
            }
        }
    });

    match controller.start().await {
        StartOutcome::Connecting => {}
        outcome => {
            status.abort();
            anyhow::bail!("could not start live session: {outcome:?}");
        }
    }

    println!(
        "Live with {} (voice {}). Press Ctrl-C to end.",
        config.persona.name, config.live.voice
    );

    let reason = controller
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;

    status.abort();
    println!("Session ended: {reason:?}");
    Ok(())
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut mic = CpalMicrophone::new();
    let mut frames = mic.start()?;

    println!("Sample rate: {INPUT_SAMPLE_RATE} Hz");
    println!("---");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration);
    while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, frames.recv()).await {
        let energy = calculate_rms(&frame);
        let peak = frame.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]");
    }

    mic.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
#[allow(clippy::future_not_send)]
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let mut handle = CpalSpeaker::new().open()?;

    let frequency = 440.0_f32;
    let num_samples = OUTPUT_SAMPLE_RATE as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / OUTPUT_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!(
        "Playing {} samples at {} Hz...",
        samples.len(),
        OUTPUT_SAMPLE_RATE
    );

    let id = SourceId(0);
    let start = handle.sink.now();
    handle.sink.schedule(id, samples, start)?;

    let timeout = Duration::from_secs_f64(duration_secs(num_samples, OUTPUT_SAMPLE_RATE) + 1.0);
    match tokio::time::timeout(timeout, handle.ended.recv()).await {
        Ok(Some(ended)) if ended == id => tracing::debug!("tone finished"),
        _ => tracing::warn!("no playback completion reported"),
    }
    handle.sink.close();

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}
