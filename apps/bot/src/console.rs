//! Stdin command adapter.
//!
//! Drives one local guild from the terminal with the same commands the chat
//! front-end offers. Every line is parsed into a [`ConsoleCommand`] and
//! executed against the engine.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use yone_core::{
    split_by_commas, AddRequest, Attachment, AttachmentSource, ChannelId, ChannelSink,
    ControlAction, ControlOrigin, ControlOutcome, ControlResult, GuildId, MusicEngine, OrderPolicy,
    PresenceUpdate, UserId,
};

const GUILD: GuildId = GuildId(1);
const VOICE: ChannelId = ChannelId(1);
const USER: UserId = UserId(1);

const HELP: &str = "\
commands:
  play <query or url>[, ...]   queue tracks (comma separates requests)
  file <path>                  queue a local audio file
  queue                        show the queue panel
  skip | shuffle | pause | loop | autoleave
  remove <n> [n ...]           remove Up Next entries
  keep <n> [n ...]             keep only these Up Next entries
  seek <time>                  jump to 1:30, 2m, 90 ...
  rewind [time] | forward [time]
  stop                         clear the queue and leave
  leave                        simulate everyone leaving the channel
  help | quit";

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Play(Vec<String>),
    File(PathBuf),
    Queue,
    Control(ControlAction),
    Remove(Vec<usize>),
    Keep(Vec<usize>),
    Seek(String),
    Rewind(Option<String>),
    Forward(Option<String>),
    Stop,
    Leave,
    Help,
    Quit,
}

/// Parses one line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (name, rest) = match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    };
    let optional = || (!rest.is_empty()).then(|| rest.to_string());

    let command = match name.to_lowercase().as_str() {
        "play" | "p" => {
            let references = split_by_commas(rest);
            if references.is_empty() {
                return Err("usage: play <query or url>".to_string());
            }
            ConsoleCommand::Play(references)
        }
        "file" => {
            if rest.is_empty() {
                return Err("usage: file <path>".to_string());
            }
            ConsoleCommand::File(PathBuf::from(rest))
        }
        "queue" | "q" => ConsoleCommand::Queue,
        "skip" => ConsoleCommand::Control(ControlAction::Skip),
        "shuffle" => ConsoleCommand::Control(ControlAction::Shuffle),
        "pause" | "resume" => ConsoleCommand::Control(ControlAction::TogglePause),
        "loop" => ConsoleCommand::Control(ControlAction::CycleLoop),
        "autoleave" => ConsoleCommand::Control(ControlAction::ToggleAutoLeave),
        "remove" => ConsoleCommand::Remove(parse_indices(rest)?),
        "keep" => ConsoleCommand::Keep(parse_indices(rest)?),
        "seek" => {
            if rest.is_empty() {
                return Err("usage: seek <time>".to_string());
            }
            ConsoleCommand::Seek(rest.to_string())
        }
        "rewind" => ConsoleCommand::Rewind(optional()),
        "forward" => ConsoleCommand::Forward(optional()),
        "stop" => ConsoleCommand::Stop,
        "leave" => ConsoleCommand::Leave,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command `{other}` (try `help`)")),
    };
    Ok(Some(command))
}

fn parse_indices(text: &str) -> Result<Vec<usize>, String> {
    let indices = text
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|piece| !piece.is_empty())
        .map(|piece| {
            piece
                .parse::<usize>()
                .map_err(|_| format!("`{piece}` is not a track number"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if indices.is_empty() {
        return Err("give at least one track number".to_string());
    }
    Ok(indices)
}

/// Reads commands from stdin until EOF, `quit` or `shutdown`.
pub async fn run(engine: Arc<MusicEngine>, sink: Arc<dyn ChannelSink>, shutdown: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{HELP}");

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::warn!("[Console] Failed to read stdin: {}", e);
                break;
            }
        };

        match parse_command(&line) {
            Ok(None) => {}
            Ok(Some(ConsoleCommand::Quit)) => break,
            Ok(Some(command)) => execute(&engine, &sink, command).await,
            Err(message) => println!("» {message}"),
        }
    }
    shutdown.cancel();
}

async fn execute(engine: &MusicEngine, sink: &Arc<dyn ChannelSink>, command: ConsoleCommand) {
    match command {
        ConsoleCommand::Play(references) => add(engine, sink, references, Vec::new()).await,
        ConsoleCommand::File(path) => {
            let filename = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            let attachment = Attachment {
                filename,
                source: AttachmentSource::Path(path),
            };
            add(engine, sink, Vec::new(), vec![attachment]).await;
        }
        ConsoleCommand::Queue => {
            if let Err(e) = engine.show_queue_panel(GUILD, USER).await {
                println!("» {e}");
            }
        }
        ConsoleCommand::Control(action) => {
            let result = engine.dispatch(GUILD, ControlOrigin::Command(USER), action).await;
            report(result, true);
        }
        ConsoleCommand::Remove(indices) => report(engine.remove_tracks(GUILD, USER, indices).await, false),
        ConsoleCommand::Keep(indices) => report(engine.keep_tracks(GUILD, USER, indices).await, false),
        ConsoleCommand::Seek(spec) => report(engine.seek(GUILD, USER, &spec).await, false),
        ConsoleCommand::Rewind(spec) => report(engine.rewind(GUILD, USER, spec.as_deref()).await, false),
        ConsoleCommand::Forward(spec) => report(engine.forward(GUILD, USER, spec.as_deref()).await, false),
        ConsoleCommand::Stop => {
            if engine.stop(GUILD).await {
                println!("» ⏹ Stopped");
            } else {
                println!("» Nothing to stop");
            }
        }
        ConsoleCommand::Leave => {
            let update = PresenceUpdate {
                guild: GUILD,
                channel: VOICE,
                humans: 0,
            };
            if !engine.handle_presence(update).await {
                println!("» Staying (auto leave is off or nothing is playing)");
            }
        }
        ConsoleCommand::Help => println!("{HELP}"),
        ConsoleCommand::Quit => {}
    }
}

async fn add(
    engine: &MusicEngine,
    sink: &Arc<dyn ChannelSink>,
    references: Vec<String>,
    attachments: Vec<Attachment>,
) {
    let request = AddRequest {
        guild: GUILD,
        voice_channel: Some(VOICE),
        requester: USER,
        references,
        attachments,
        order: OrderPolicy::default(),
        sink: Arc::clone(sink),
    };
    match engine.add_tracks(request).await {
        Ok(outcome) => log::debug!("[Console] Add finished: {:?}", outcome),
        Err(e) => log::debug!("[Console] Add refused: {}", e),
    }
}

/// Prints a control result. Engine command helpers already post their own notice.
fn report(result: ControlResult<ControlOutcome>, print_notice: bool) {
    match result {
        Ok(outcome) if print_notice => println!("» {}", outcome.notice()),
        Ok(_) => {}
        Err(e) => println!("» ⚠️ {e}"),
    }
}
