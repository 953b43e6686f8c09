use std::cell::Cell;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::io::{self, BufRead, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::mpsc;
use std::thread;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use dm_contracts::chat::{parse_intent, Intent, CHAT_HELP_COMMANDS};
use dm_contracts::events::EventWriter;
use dm_contracts::feedback::FeedbackWriter;
use dm_contracts::session::{SessionEvent, Topic};
use dm_contracts::{Axis, ChatMessage, GenerationError, ImageAttachment, MessageId, OptionCatalog};
use dm_engine::{
    ChatEngine, ClientConfig, Delivery, GenerationClient, HealthStatus, PendingImage, SubmitError,
};

#[derive(Debug, Parser)]
#[command(name = "dm-chat", version, about = "AI Dungeon Master chat client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive chat session.
    Chat(ChatArgs),
    /// Compose a prompt from the given settings and send one message.
    Generate(GenerateArgs),
    /// Generate one image and write it to disk.
    Image(ImageArgs),
    /// List the option catalog.
    Options(OptionsArgs),
    /// Check the backend's /health endpoint.
    Health(ConnectionArgs),
}

#[derive(Debug, Args)]
struct ConnectionArgs {
    #[arg(long)]
    api_base: Option<String>,
    /// Text request timeout in seconds.
    #[arg(long)]
    timeout: Option<u64>,
    /// Image request timeout in seconds.
    #[arg(long)]
    image_timeout: Option<u64>,
    #[arg(long)]
    retries: Option<u64>,
}

#[derive(Debug, Args)]
struct SelectionArgs {
    #[arg(long)]
    choice: Option<String>,
    #[arg(long)]
    biome: Option<String>,
    #[arg(long)]
    features: Option<String>,
    #[arg(long)]
    constriction: Option<String>,
    #[arg(long)]
    style: Option<String>,
}

#[derive(Debug, Args)]
struct ChatArgs {
    #[command(flatten)]
    connection: ConnectionArgs,
    #[command(flatten)]
    selection: SelectionArgs,
    /// Directory for events.jsonl, feedback.jsonl and generated images.
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[command(flatten)]
    connection: ConnectionArgs,
    #[command(flatten)]
    selection: SelectionArgs,
    #[arg(long)]
    message: String,
    /// Print the composed prompt instead of sending it.
    #[arg(long)]
    dry_run: bool,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ImageArgs {
    #[command(flatten)]
    connection: ConnectionArgs,
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct OptionsArgs {
    axis: Option<String>,
}

fn main() {
    init_logging();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("dm-chat error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_logging() {
    let filter = ["DM_LOG", "RUST_LOG"]
        .iter()
        .find_map(|key| {
            env::var(key)
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        })
        .unwrap_or_else(|| "warn".to_string());
    env_logger::Builder::new().parse_filters(&filter).init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Generate(args) => run_generate(args),
        Command::Image(args) => run_image(args),
        Command::Options(args) => run_options(args),
        Command::Health(args) => run_health(args),
    }
}

impl ConnectionArgs {
    /// Flags win over `DM_*` variables; both go through the same parsing and clamping.
    fn client_config(&self) -> ClientConfig {
        let overrides = self.overrides();
        ClientConfig::from_lookup(|key| {
            overrides
                .get(key)
                .cloned()
                .or_else(|| env::var(key).ok())
        })
    }

    fn overrides(&self) -> HashMap<&'static str, String> {
        let mut overrides = HashMap::new();
        if let Some(api_base) = &self.api_base {
            overrides.insert("DM_API_BASE", api_base.clone());
        }
        if let Some(timeout) = self.timeout {
            overrides.insert("DM_TEXT_TIMEOUT_SECS", timeout.to_string());
        }
        if let Some(timeout) = self.image_timeout {
            overrides.insert("DM_IMAGE_TIMEOUT_SECS", timeout.to_string());
        }
        if let Some(retries) = self.retries {
            overrides.insert("DM_TRANSPORT_RETRIES", retries.to_string());
        }
        overrides
    }

    fn client(&self) -> GenerationClient {
        GenerationClient::new(self.client_config())
    }
}

impl SelectionArgs {
    fn values(&self) -> [(Axis, Option<&str>); 5] {
        [
            (Axis::Choice, self.choice.as_deref()),
            (Axis::Biome, self.biome.as_deref()),
            (Axis::Features, self.features.as_deref()),
            (Axis::Constriction, self.constriction.as_deref()),
            (Axis::TextStyle, self.style.as_deref()),
        ]
    }

    fn apply(&self, engine: &mut ChatEngine) -> Result<()> {
        for (axis, value) in self.values() {
            if value.is_none() {
                continue;
            }
            if let Err(err) = engine.select(axis, value) {
                bail!("{err} (see `dm-chat options {}`)", axis.key());
            }
        }
        Ok(())
    }
}

/// Everything the REPL's main loop reacts to. Stdin lines and image completions share
/// one channel so results from background image workers are applied on this thread.
enum ReplEvent {
    Line(String),
    Closed,
    Image {
        pending: PendingImage,
        outcome: Result<ImageAttachment, GenerationError>,
    },
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let client = args.connection.client();
    let mut engine = ChatEngine::new(client.clone());
    args.selection.apply(&mut engine)?;

    let events_path = args
        .events
        .clone()
        .or_else(|| args.out.as_ref().map(|out| out.join("events.jsonl")));
    if let Some(out) = &args.out {
        fs::create_dir_all(out)
            .with_context(|| format!("failed to create output dir {}", out.display()))?;
        engine = engine.with_feedback(FeedbackWriter::new(out.join("feedback.jsonl")));
    }
    if let Some(path) = events_path {
        engine = engine.with_events(EventWriter::new(path, "chat"));
    }
    let images_dir = args.out.as_ref().map(|out| out.join("images"));

    let positions = Rc::new(Cell::new(0usize));
    subscribe_renderer(&mut engine, &positions);

    let (tx, rx) = mpsc::channel();
    spawn_stdin_reader(tx.clone())?;

    println!("Chat with AI DM. Type /help for commands.");
    print_settings(&engine);
    print_prompt()?;

    while let Ok(event) = rx.recv() {
        match event {
            ReplEvent::Closed => {
                wait_for_images(&mut engine, &rx, images_dir.as_deref());
                break;
            }
            ReplEvent::Image { pending, outcome } => {
                apply_image_outcome(&mut engine, pending, outcome, images_dir.as_deref());
            }
            ReplEvent::Line(line) => {
                let keep_going = handle_line(&mut engine, &client, &tx, &positions, &line)?;
                if !keep_going {
                    if let Some(notice) = abandoned_images_notice(&engine) {
                        println!("{notice}");
                    }
                    break;
                }
            }
        }
        print_prompt()?;
    }
    println!();
    Ok(())
}

fn handle_line(
    engine: &mut ChatEngine,
    client: &GenerationClient,
    tx: &mpsc::Sender<ReplEvent>,
    positions: &Rc<Cell<usize>>,
    line: &str,
) -> Result<bool> {
    match parse_intent(line) {
        Intent::Noop => {}
        Intent::Submit { text } => match engine.send_message(&text) {
            Ok(_) => {}
            // The session's error observer has already shown the notice.
            Err(SubmitError::Generation(_)) => {}
            Err(err) => println!("{}", err.user_notice()),
        },
        Intent::SetParameter { axis, value } => match engine.select(axis, value.as_deref()) {
            Ok(Some(value)) => println!(
                "{} set to {value}: {}",
                axis.label(),
                engine.catalog().describe(axis, Some(value.as_str()))
            ),
            Ok(None) => println!("{} cleared.", axis.label()),
            Err(err) => println!("{}. Try /options {}", err.user_notice(), axis.key()),
        },
        Intent::ShowSettings => print_settings(engine),
        Intent::ListOptions { axis } => print_options(engine.catalog(), axis),
        Intent::GenerateImage { target } => {
            let message_id = match target {
                Some(position) => engine.message_at(position).map(|message| message.id),
                None => engine.session().last_assistant_message().map(|message| message.id),
            };
            let Some(message_id) = message_id else {
                println!("No assistant message to illustrate.");
                return Ok(true);
            };
            match engine.prepare_image(message_id) {
                Ok(pending) => spawn_image_worker(engine, client.clone(), pending, tx.clone()),
                Err(err) => println!("{err}"),
            }
        }
        Intent::Rate {
            target,
            rating,
            reason,
        } => {
            let Some(message_id) = engine.message_at(target).map(|message| message.id) else {
                println!("No message #{target}.");
                return Ok(true);
            };
            match engine.rate(message_id, rating, reason.as_deref()) {
                Ok(_) => println!("Recorded {rating} for #{target}."),
                Err(err) => println!("Could not rate #{target}: {err}"),
            }
        }
        Intent::History => {
            for (idx, message) in engine.session().messages().iter().enumerate() {
                println!("{}", render_message(idx + 1, message));
            }
        }
        Intent::NewSession => {
            engine.reset_session();
            positions.set(0);
            println!("Started a new session. Settings were kept.");
        }
        Intent::Health => print_health(&engine.client().health()),
        Intent::Help => println!("Commands: {}", CHAT_HELP_COMMANDS.join(" ")),
        Intent::Quit => return Ok(false),
        Intent::Invalid { reason, .. } => println!("{reason}. Type /help for commands."),
        Intent::Unknown { command, .. } => {
            println!("Unknown command /{command}. Type /help for commands.")
        }
    }
    Ok(true)
}

/// Renders the session from its change notifications. `positions` tracks how many
/// messages the current session has shown so far.
fn subscribe_renderer(engine: &mut ChatEngine, positions: &Rc<Cell<usize>>) {
    let session = engine.session_mut();

    let counter = Rc::clone(positions);
    session.subscribe(
        Topic::Messages,
        Box::new(move |event: &SessionEvent| {
            if let SessionEvent::MessageAppended(message) = event {
                counter.set(counter.get() + 1);
                println!("{}", render_message(counter.get(), message));
            }
        }),
    );
    session.subscribe(
        Topic::Submitting,
        Box::new(|event: &SessionEvent| {
            if let SessionEvent::SubmittingChanged(true) = event {
                println!("AI is thinking...");
            }
        }),
    );
    session.subscribe(
        Topic::Images,
        Box::new(|event: &SessionEvent| {
            if let SessionEvent::ImagePendingChanged { pending: true, .. } = event {
                println!("Generating image...");
            }
        }),
    );
    session.subscribe(
        Topic::Errors,
        Box::new(|event: &SessionEvent| {
            if let SessionEvent::ErrorRecorded(err) = event {
                println!("! {}", err.user_notice());
            }
        }),
    );
}

fn spawn_stdin_reader(tx: mpsc::Sender<ReplEvent>) -> Result<()> {
    thread::Builder::new()
        .name("dm-stdin".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            let mut line = String::new();
            loop {
                line.clear();
                match stdin.lock().read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        let text = line.trim_end_matches(['\n', '\r']).to_string();
                        if tx.send(ReplEvent::Line(text)).is_err() {
                            return;
                        }
                    }
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        log::warn!("stdin read failed: {err}");
                        break;
                    }
                }
            }
            let _ = tx.send(ReplEvent::Closed);
        })
        .context("failed to start stdin reader")?;
    Ok(())
}

fn spawn_image_worker(
    engine: &mut ChatEngine,
    client: GenerationClient,
    pending: PendingImage,
    tx: mpsc::Sender<ReplEvent>,
) {
    let job = pending.clone();
    let spawned = thread::Builder::new()
        .name("dm-image".to_string())
        .spawn(move || {
            let outcome = job.send(&client);
            let _ = tx.send(ReplEvent::Image {
                pending: job,
                outcome,
            });
        });
    if let Err(err) = spawned {
        let failure = GenerationError::request_failed(format!("image worker failed to start: {err}"));
        let _ = engine.finish_image(pending, Err(failure));
    }
}

/// Applies image completions until none are in flight for the current session.
/// Lines still queued behind the end of input are ignored.
fn wait_for_images(
    engine: &mut ChatEngine,
    rx: &mpsc::Receiver<ReplEvent>,
    images_dir: Option<&Path>,
) {
    let waiting = engine.session().pending_image_count();
    if waiting == 0 {
        return;
    }
    println!("\nInput closed. Waiting for {waiting} image generation(s)...");
    while engine.session().pending_image_count() > 0 {
        match rx.recv() {
            Ok(ReplEvent::Image { pending, outcome }) => {
                apply_image_outcome(engine, pending, outcome, images_dir);
            }
            Ok(ReplEvent::Line(_) | ReplEvent::Closed) => {}
            Err(_) => break,
        }
    }
}

fn abandoned_images_notice(engine: &ChatEngine) -> Option<String> {
    let pending = engine.session().pending_image_count();
    (pending > 0).then(|| format!("Abandoning {pending} image generation(s) in progress."))
}

fn apply_image_outcome(
    engine: &mut ChatEngine,
    pending: PendingImage,
    outcome: Result<ImageAttachment, GenerationError>,
    images_dir: Option<&Path>,
) {
    let Ok(Delivery::Delivered(message_id)) = engine.finish_image(pending, outcome) else {
        return;
    };
    let Some(dir) = images_dir else {
        return;
    };
    let saved = engine
        .session()
        .message(message_id)
        .and_then(|message| message.image.as_ref())
        .map(|image| save_image(dir, message_id, image));
    match saved {
        Some(Ok(path)) => println!("Saved image to {}", path.display()),
        Some(Err(err)) => println!("Could not save image: {err:#}"),
        None => {}
    }
}

fn save_image(dir: &Path, message_id: MessageId, image: &ImageAttachment) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create image dir {}", dir.display()))?;
    let path = dir.join(format!("{message_id}.{}", image_extension(&image.mime_type)));
    fs::write(&path, &image.bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

fn image_extension(mime_type: &str) -> &str {
    match mime_type.strip_prefix("image/") {
        Some("jpeg") => "jpg",
        Some(subtype) if !subtype.is_empty() => subtype,
        _ => "bin",
    }
}

fn render_message(position: usize, message: &ChatMessage) -> String {
    let mut rendered = format!(
        "#{position} [{}] {}\n{}",
        message.sender.as_str(),
        message.timestamp.format("%H:%M:%S"),
        message.text
    );
    if let Some(image) = &message.image {
        rendered.push_str(&format!(
            "\n[image {}x{} {}]",
            image.width, image.height, image.mime_type
        ));
    }
    rendered
}

fn print_prompt() -> Result<()> {
    print!("> ");
    io::stdout().flush()?;
    Ok(())
}

fn print_settings(engine: &ChatEngine) {
    println!("I assume role as DM and settings are:");
    let selection = engine.session().selection();
    for axis in Axis::ALL {
        let value = selection.get(axis);
        println!(
            "  {}: {} ({})",
            axis.label(),
            value.unwrap_or("-"),
            engine.catalog().describe(axis, value)
        );
    }
}

fn print_options(catalog: &OptionCatalog, axis: Option<Axis>) {
    let axes = match axis {
        Some(axis) => vec![axis],
        None => Axis::ALL.to_vec(),
    };
    for axis in axes {
        let required = if axis.is_required() { "" } else { " (optional)" };
        println!("{}{required}:", axis.label());
        for option in catalog.options(axis) {
            println!("  {:<14} {}", option.value, option.description);
        }
    }
}

fn print_health(status: &HealthStatus) {
    let state = if status.healthy { "healthy" } else { "unhealthy" };
    println!("Backend: {state}");
    println!(
        "Model server: {}{}",
        if status.backend_running {
            "running"
        } else {
            "not running"
        },
        status
            .backend_version
            .as_deref()
            .map(|version| format!(" (version {version})"))
            .unwrap_or_default()
    );
    if let Some(timestamp) = &status.timestamp {
        println!("Checked at: {timestamp}");
    }
    if let Some(error) = &status.error {
        println!("Error: {error}");
    }
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let mut engine = ChatEngine::new(args.connection.client());
    if let Some(path) = &args.events {
        engine = engine.with_events(EventWriter::new(path, "generate"));
    }
    args.selection.apply(&mut engine)?;

    if args.dry_run {
        let prompt = engine
            .compose(&args.message)
            .map_err(|err| anyhow::anyhow!(err.user_notice()))?;
        println!("{prompt}");
        return Ok(0);
    }

    match engine.send_message(&args.message) {
        Ok(_) => {
            if let Some(reply) = engine.session().last_assistant_message() {
                println!("{}", reply.text);
            }
            Ok(0)
        }
        Err(SubmitError::Generation(err)) => {
            eprintln!("{}", err.user_notice());
            bail!(err)
        }
        Err(err) => bail!(err.user_notice()),
    }
}

fn run_image(args: ImageArgs) -> Result<i32> {
    if args.prompt.trim().is_empty() {
        bail!("--prompt must not be empty");
    }
    let image = args
        .connection
        .client()
        .generate_image(&args.prompt)
        .map_err(|err| anyhow::anyhow!(err))?;
    if let Some(parent) = args.out.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(&args.out, &image.bytes)
        .with_context(|| format!("failed to write {}", args.out.display()))?;
    println!(
        "{} ({}x{} {})",
        args.out.display(),
        image.width,
        image.height,
        image.mime_type
    );
    Ok(0)
}

fn run_options(args: OptionsArgs) -> Result<i32> {
    let axis = match args.axis.as_deref() {
        None => None,
        Some(raw) => match Axis::parse(raw) {
            Some(axis) => Some(axis),
            None => bail!("unknown axis '{raw}'"),
        },
    };
    print_options(&OptionCatalog::default(), axis);
    Ok(0)
}

fn run_health(args: ConnectionArgs) -> Result<i32> {
    let status = args.client().health();
    print_health(&status);
    Ok(if status.healthy { 0 } else { 1 })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn connection(api_base: Option<&str>, timeout: Option<u64>) -> ConnectionArgs {
        ConnectionArgs {
            api_base: api_base.map(str::to_string),
            timeout,
            image_timeout: None,
            retries: Some(99),
        }
    }

    #[test]
    fn flags_override_and_are_clamped() {
        let config = connection(Some("http://127.0.0.1:9000/"), Some(5000)).client_config();
        assert_eq!(config.api_base, "http://127.0.0.1:9000");
        assert_eq!(config.text_timeout, Duration::from_secs(600));
        assert_eq!(config.max_retries, 4);
    }

    #[test]
    fn selection_flags_resolve_labels_and_reject_unknown_values() {
        let mut engine = ChatEngine::new(connection(None, None).client());
        let selection = SelectionArgs {
            choice: Some("tavern".to_string()),
            biome: None,
            features: Some("Secret".to_string()),
            constriction: None,
            style: Some("poetic".to_string()),
        };
        selection.apply(&mut engine).unwrap();
        let current = engine.session().selection();
        assert_eq!(current.choice.as_deref(), Some("Tavern"));
        assert_eq!(current.biome, None);
        assert_eq!(current.text_style.as_deref(), Some("Poetic"));

        let bad = SelectionArgs {
            choice: None,
            biome: Some("Underdark".to_string()),
            features: None,
            constriction: None,
            style: None,
        };
        let err = bad.apply(&mut engine).unwrap_err();
        assert!(err.to_string().contains("Underdark"));
    }

    #[test]
    fn closing_input_waits_for_images_in_flight() {
        let mut engine = ChatEngine::new(connection(None, None).client());
        let reply_id = engine
            .session_mut()
            .append_message(ChatMessage::assistant("A quiet tavern."));
        let pending = engine.prepare_image(reply_id).unwrap();
        assert_eq!(
            abandoned_images_notice(&engine).as_deref(),
            Some("Abandoning 1 image generation(s) in progress.")
        );

        let (tx, rx) = mpsc::channel();
        tx.send(ReplEvent::Line("ignored".to_string())).unwrap();
        tx.send(ReplEvent::Image {
            pending,
            outcome: Err(GenerationError::request_failed("backend down")),
        })
        .unwrap();
        wait_for_images(&mut engine, &rx, None);

        assert_eq!(engine.session().pending_image_count(), 0);
        assert!(engine.session().last_error().is_some());
        assert!(abandoned_images_notice(&engine).is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn rendered_messages_carry_position_and_image_size() {
        let message = ChatMessage::assistant("Generated image based on: a shop").with_image(
            ImageAttachment {
                bytes: vec![0; 4],
                mime_type: "image/png".to_string(),
                width: 512,
                height: 768,
            },
        );
        let rendered = render_message(3, &message);
        assert!(rendered.starts_with("#3 [assistant] "));
        assert!(rendered.contains("Generated image based on: a shop"));
        assert!(rendered.ends_with("[image 512x768 image/png]"));
    }

    #[test]
    fn saved_images_use_mime_extension() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let image = ImageAttachment {
            bytes: vec![1, 2, 3],
            mime_type: "image/jpeg".to_string(),
            width: 1,
            height: 1,
        };
        let message_id = MessageId::new();
        let path = save_image(&temp.path().join("images"), message_id, &image)?;
        assert_eq!(path.extension().and_then(|ext| ext.to_str()), Some("jpg"));
        assert_eq!(fs::read(&path)?, vec![1, 2, 3]);
        assert_eq!(image_extension("application/octet-stream"), "bin");
        Ok(())
    }
}
