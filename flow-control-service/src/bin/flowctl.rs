//! Command-line client for the flow-control endpoint.
//!
//! `flowctl <request>` builds a command, runs its caller-side preparation and
//! prints the request frame on stdout, ready to be piped into
//! `flow-control-service`. `flowctl decode` reads response frames from stdin
//! and prints what they carry.

use anyhow::{Context as _, anyhow};
use clap::Parser as _;
use flow_control::{
    Command, Context, ControlVerb, FlowSelector, GetFlow, ListFlows, RemoteFlowExecution,
    ResponseFrame, RestartFlow, RunRemoteFlow, SendFlowControlCommand, StopFlow, StorageMap,
    decode_response, encode_request,
};
use flow_control_service::{LogFormat, init_tracing};
use std::io::BufRead;
use std::path::{Path, PathBuf};

#[derive(clap::Parser, Debug)]
#[command(version, about = "Builds flow-control request frames", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Request,
}

#[derive(clap::Subcommand, Debug)]
enum Request {
    /// Print the definition of a registered flow.
    Get {
        /// Registry id; -1 selects the only registered flow.
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        id: i64,
    },
    /// List every registered flow.
    List,
    /// Load a flow file on the service side and start it.
    Run {
        /// Path to the flow file, as seen by the service.
        #[arg(long, value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
        flow: PathBuf,

        /// Register the running flow so the other requests can address it.
        #[arg(long)]
        register: bool,
    },
    /// Request a cooperative stop.
    Stop {
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        id: i64,
    },
    /// Pause, resume, stop or restart a registered pipeline.
    Control {
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        id: i64,

        #[arg(value_enum)]
        verb: Verb,
    },
    /// Replace a registered flow with a freshly loaded instance.
    Restart {
        #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
        id: i64,

        /// Grace period between stopping and setting up, in milliseconds.
        #[arg(long, default_value_t = 0)]
        interval: u64,
    },
    /// Send a local flow file, with storage items, to the service for execution.
    Relocate {
        /// Path to the local flow file.
        #[arg(long, value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
        flow: PathBuf,

        /// Storage item to carry over; may be repeated.
        #[arg(long = "storage", value_name = "NAME")]
        storage_names: Vec<String>,

        /// JSON object holding the storage items to copy from.
        #[arg(long = "storage-file", value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
        storage_file: Option<PathBuf>,

        #[arg(long)]
        register: bool,
    },
    /// Read response frames from stdin and print their contents.
    Decode,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum Verb {
    Pause,
    Resume,
    Stop,
    Restart,
}

impl From<Verb> for ControlVerb {
    fn from(verb: Verb) -> Self {
        match verb {
            Verb::Pause => ControlVerb::Pause,
            Verb::Resume => ControlVerb::Resume,
            Verb::Stop => ControlVerb::Stop,
            Verb::Restart => ControlVerb::Restart,
        }
    }
}

fn selector(id: i64) -> anyhow::Result<FlowSelector> {
    Ok(FlowSelector::from_wire(id)?)
}

fn load_storage(path: &Path) -> anyhow::Result<Context> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read storage file {}", path.display()))?;
    let items: StorageMap = serde_json::from_str(&text)
        .with_context(|| format!("Storage file {} is not a JSON object", path.display()))?;
    let storage = Context::new();
    storage.extend(items)?;
    Ok(storage)
}

fn build(request: Request) -> anyhow::Result<Box<dyn Command>> {
    let command: Box<dyn Command> = match request {
        Request::Get { id } => Box::new(GetFlow::new(selector(id)?)),
        Request::List => Box::new(ListFlows::new()),
        Request::Run { flow, register } => Box::new(RunRemoteFlow::new(flow, register)),
        Request::Stop { id } => Box::new(StopFlow::new(selector(id)?)),
        Request::Control { id, verb } => {
            Box::new(SendFlowControlCommand::new(selector(id)?, verb.into()))
        }
        Request::Restart { id, interval } => Box::new(RestartFlow::new(selector(id)?, interval)),
        Request::Relocate {
            flow,
            storage_names,
            storage_file,
            register,
        } => {
            let mut command =
                RemoteFlowExecution::new(flow, storage_names).with_registration(register);
            if let Some(path) = storage_file {
                command = command.with_caller_storage(load_storage(&path)?);
            }
            Box::new(command)
        }
        Request::Decode => return Err(anyhow!("decode does not build a request")),
    };
    Ok(command)
}

fn print_response(frame: &ResponseFrame) -> anyhow::Result<()> {
    if let Some(error) = &frame.error {
        println!("{}: error: {error}", frame.command);
        return Ok(());
    }
    match frame.command.as_str() {
        ListFlows::NAME => {
            let mut list = ListFlows::new();
            decode_response(&mut list, frame)?;
            println!(
                "{:>4}  {:<6}  {:<7}  {:<20}  {:<30}  PATH",
                "ID", "PAUSED", "STOPPED", "NAME", "ANNOTATION"
            );
            for row in list.rows() {
                println!(
                    "{:>4}  {:<6}  {:<7}  {:<20}  {:<30}  {}",
                    row.id,
                    row.paused,
                    row.stopped,
                    row.name,
                    row.annotation,
                    row.path.as_deref().unwrap_or("-")
                );
            }
        }
        _ if frame.payload.is_empty() => println!("{}: ok", frame.command),
        _ => println!("{}", String::from_utf8_lossy(&frame.payload)),
    }
    Ok(())
}

fn decode_stdin() -> anyhow::Result<()> {
    for line in std::io::stdin().lock().lines() {
        let line = line.context("Failed to read response frames")?;
        if line.trim().is_empty() {
            continue;
        }
        let frame = ResponseFrame::from_json(&line)?;
        print_response(&frame)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(LogFormat::parse(
        &std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),
    ));

    let cli = Cli::parse();
    if let Request::Decode = cli.command {
        return decode_stdin();
    }

    let mut command = build(cli.command)?;
    let frame = encode_request(command.as_mut()).await?;
    println!("{}", frame.to_json()?);
    Ok(())
}
