use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use bytes::Bytes;
use tracing::info;

use dfegrpc::{
    ClientConfig, DialogflowClient, Session, SessionState, SynthesisRequest, TracingCallLogger,
};

/// One telephony frame: 20 ms of 8 kHz µ-law.
const FRAME_BYTES: usize = 160;
const FRAME_INTERVAL: Duration = Duration::from_millis(20);

const USAGE: &str = "Usage: dfegrpc [--config <yaml>] [--language <code>] [--hint <phrase>]... [--audio] <command>

Commands:
  stream <audio-file>      Stream a raw 8 kHz mu-law file and print the results
  event <name>             Trigger an intent with a named event
  synth <dest-file> <text> Synthesize text (or SSML) into a WAV file";

enum Command {
    Stream(PathBuf),
    Event(String),
    Synth { destination: PathBuf, text: String },
}

struct Cli {
    config: Option<PathBuf>,
    language: Option<String>,
    hints: Vec<String>,
    output_audio: bool,
    command: Command,
}

impl Cli {
    fn parse(mut args: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        let mut config = None;
        let mut language = None;
        let mut hints = Vec::new();
        let mut output_audio = false;
        let mut positional = Vec::new();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    let path = args
                        .next()
                        .ok_or_else(|| anyhow!("--config requires a file path"))?;
                    config = Some(PathBuf::from(path));
                }
                "-l" | "--language" => {
                    language = Some(
                        args.next()
                            .ok_or_else(|| anyhow!("--language requires a language code"))?,
                    );
                }
                "--hint" => {
                    hints.push(
                        args.next()
                            .ok_or_else(|| anyhow!("--hint requires a phrase"))?,
                    );
                }
                "--audio" => output_audio = true,
                "-h" | "--help" => anyhow::bail!("{USAGE}"),
                other if other.starts_with('-') => {
                    anyhow::bail!("Unknown option '{other}'\n\n{USAGE}");
                }
                _ => positional.push(arg),
            }
        }

        let mut positional = positional.into_iter();
        let command = match positional.next().as_deref() {
            Some("stream") => Command::Stream(PathBuf::from(
                positional
                    .next()
                    .ok_or_else(|| anyhow!("'stream' requires an audio file"))?,
            )),
            Some("event") => Command::Event(
                positional
                    .next()
                    .ok_or_else(|| anyhow!("'event' requires an event name"))?,
            ),
            Some("synth") => {
                let destination = positional
                    .next()
                    .ok_or_else(|| anyhow!("'synth' requires a destination file"))?;
                let text = positional.by_ref().collect::<Vec<_>>().join(" ");
                if text.is_empty() {
                    anyhow::bail!("'synth' requires text to speak");
                }
                Command::Synth {
                    destination: PathBuf::from(destination),
                    text,
                }
            }
            Some(other) => anyhow::bail!("Unknown command '{other}'\n\n{USAGE}"),
            None => anyhow::bail!("{USAGE}"),
        };

        if let Some(extra) = positional.next() {
            anyhow::bail!("Unexpected argument '{extra}'");
        }

        Ok(Self {
            config,
            language,
            hints,
            output_audio,
            command,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse(env::args().skip(1))?;

    let mut config = match &cli.config {
        Some(path) => ClientConfig::from_file(path),
        None => ClientConfig::from_env(),
    }
    .map_err(|e| anyhow!("Failed to load configuration: {e}"))?;

    if config.session_id.is_empty() {
        config.session_id = format!("dfegrpc-{}", std::process::id());
    }

    // Installs the TLS crypto provider before any channel is built.
    let client = DialogflowClient::init(Arc::new(TracingCallLogger));

    match &cli.command {
        Command::Stream(path) => stream(&client, &config, &cli, path).await,
        Command::Event(name) => event(&client, &config, &cli, name).await,
        Command::Synth { destination, text } => {
            let request = SynthesisRequest::new(text.as_str())
                .with_language(cli.language.clone().unwrap_or_default())
                .with_voice(config.voice.clone().unwrap_or_default());
            let written = client
                .synthesize_to_file(&config.tts_endpoint, &config.auth_key, request, destination)
                .await?;
            println!("Wrote {written} bytes to {}", destination.display());
            Ok(())
        }
    }
}

async fn stream(
    client: &DialogflowClient,
    config: &ClientConfig,
    cli: &Cli,
    path: &Path,
) -> anyhow::Result<()> {
    let audio = tokio::fs::read(path)
        .await
        .map_err(|e| anyhow!("Failed to read {}: {e}", path.display()))?;

    let session = client.create_session(None);
    config.configure_session(&session);

    let language = cli.language.as_deref().unwrap_or(config.language.as_str());
    if let Err(e) = session
        .start_recognition(Some(language), cli.output_audio, &cli.hints)
        .await
    {
        print_results(&session);
        session.close_session().await;
        return Err(e.into());
    }

    let mut ticker = tokio::time::interval(FRAME_INTERVAL);
    for frame in audio.chunks(FRAME_BYTES) {
        ticker.tick().await;
        let state = session.write_audio(Bytes::copy_from_slice(frame)).await;
        if state != SessionState::Started {
            info!(state = %state, "Session stopped accepting audio");
            break;
        }
    }

    let stopped = session.stop_recognition().await;
    print_results(&session);
    println!(
        "responses: {}, bytes written: {}",
        session.response_count(),
        session.bytes_written()
    );
    session.close_session().await;

    stopped.map_err(Into::into)
}

async fn event(
    client: &DialogflowClient,
    config: &ClientConfig,
    cli: &Cli,
    name: &str,
) -> anyhow::Result<()> {
    let session = client.create_session(None);
    config.configure_session(&session);

    let outcome = session
        .recognize_event(name, cli.language.as_deref(), cli.output_audio)
        .await;
    print_results(&session);
    session.close_session().await;

    outcome.map_err(Into::into)
}

fn print_results(session: &Session) {
    for (index, result) in session.results().iter().enumerate() {
        if result.slot == "output_audio" {
            println!(
                "{index:>3} {} = <{} bytes of audio> ({})",
                result.slot,
                result.value.len(),
                result.score
            );
        } else {
            println!(
                "{index:>3} {} = {} ({})",
                result.slot,
                result.value_text(),
                result.score
            );
        }
    }
}
