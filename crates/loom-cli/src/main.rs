use async_trait::async_trait;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use loom_agent::{
    AgentError, AgentRuntime, PermissionMode, RunOptions, RuntimeConfig, StreamMessage,
    SystemPrompt, ToolApprover, Turn, sse_frames,
};
use loom_turnstore::{FsSessionStore, SessionStore};
use serde_json::Value;
use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "loom=info";

#[derive(Parser, Debug)]
#[command(name = "loom")]
#[command(about = "Run tool-using agent tasks against a reasoning backend")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a task, optionally resuming or forking a stored session.
    Run(RunArgs),
    /// Print a stored session and its turns.
    Show(ShowArgs),
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    prompt: String,
    #[arg(long, value_enum, default_value_t = ModeArg::AutoAcceptEdits)]
    permission_mode: ModeArg,
    #[arg(long = "allowed-tool")]
    allowed_tools: Vec<String>,
    #[arg(long)]
    resume: Option<String>,
    #[arg(long, action = ArgAction::SetTrue, requires = "resume")]
    fork: bool,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    system_prompt: Option<String>,
    #[arg(long)]
    append_system_prompt: Option<String>,
    #[arg(long)]
    step_limit: Option<usize>,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
    #[arg(long, default_value = ".loom/sessions")]
    store_dir: PathBuf,
    #[arg(long)]
    workdir: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct ShowArgs {
    session_id: String,
    #[arg(long, default_value = ".loom/sessions")]
    store_dir: PathBuf,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ModeArg {
    AutoAcceptEdits,
    Bypass,
    Interactive,
}

impl From<ModeArg> for PermissionMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::AutoAcceptEdits => PermissionMode::AutoAcceptEdits,
            ModeArg::Bypass => PermissionMode::Bypass,
            ModeArg::Interactive => PermissionMode::Interactive,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Sse,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run(args) => run_command(args).await,
        Commands::Show(args) => show_command(args).await,
    };

    match result {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {error}");
            ExitCode::from(1)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

async fn run_command(args: RunArgs) -> Result<ExitCode, AgentError> {
    let config = RuntimeConfig::from_env()?;
    let approval_timeout = config.approval_timeout;
    let store = FsSessionStore::new(&args.store_dir)?;
    let workdir = match args.workdir.clone() {
        Some(path) => path,
        None => std::env::current_dir().map_err(|error| {
            AgentError::invalid_configuration(format!("cannot resolve working directory: {error}"))
        })?,
    };
    let runtime = AgentRuntime::from_config(config, Arc::new(store), workdir)?;

    let output = args.output;
    let stream = runtime.run_task(args.prompt.clone(), run_options(args, approval_timeout)).await?;
    let succeeded = match output {
        OutputFormat::Sse => {
            let mut succeeded = true;
            let mut frames = Box::pin(sse_frames(stream));
            while let Some(frame) = frames.next().await {
                if frame.starts_with("event: error\n") {
                    succeeded = false;
                }
                print!("{frame}");
            }
            succeeded
        }
        OutputFormat::Json | OutputFormat::Text => {
            let mut stream = stream;
            let mut succeeded = true;
            while let Some(message) = stream.next().await {
                if matches!(message, StreamMessage::Error { .. }) {
                    succeeded = false;
                }
                if output == OutputFormat::Json {
                    match serde_json::to_string(&message) {
                        Ok(line) => println!("{line}"),
                        Err(error) => tracing::warn!(error = %error, "failed to encode message"),
                    }
                } else {
                    print_message_text(&message);
                }
            }
            succeeded
        }
    };
    let _ = std::io::stdout().flush();

    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

fn run_options(args: RunArgs, approval_timeout: Duration) -> RunOptions {
    let mode = PermissionMode::from(args.permission_mode);
    let system_prompt = match (args.system_prompt, args.append_system_prompt) {
        (Some(text), Some(extra)) => Some(SystemPrompt::Text(text).with_append(extra)),
        (Some(text), None) => Some(SystemPrompt::Text(text)),
        (None, Some(extra)) => Some(SystemPrompt::default().with_append(extra)),
        (None, None) => None,
    };

    let mut options = RunOptions::default()
        .with_permission_mode(mode)
        .with_allowed_tools(args.allowed_tools);
    if mode != PermissionMode::Bypass && is_interactive_terminal() {
        match ConsoleApprover::stdin(approval_timeout) {
            Ok(approver) => options = options.with_approver(Arc::new(approver)),
            Err(error) => tracing::warn!(error = %error, "running without a console approver"),
        }
    }
    if let Some(session_id) = args.resume {
        options = options.resume(session_id);
        if args.fork {
            options = options.fork();
        }
    }
    if let Some(step_limit) = args.step_limit {
        options = options.with_step_limit(step_limit);
    }
    options.model = args.model;
    options.system_prompt = system_prompt;
    options
}

fn print_message_text(message: &StreamMessage) {
    match message {
        StreamMessage::Init {
            session_id,
            model,
            parent_session_id,
            ..
        } => match parent_session_id {
            Some(parent) => eprintln!("[session {session_id} forked from {parent}, model {model}]"),
            None => eprintln!("[session {session_id}, model {model}]"),
        },
        StreamMessage::AssistantText { text } => println!("{text}"),
        StreamMessage::ToolCall {
            tool_name,
            arguments,
            sequence_no,
            ..
        } => println!("[tool #{sequence_no}] {tool_name} {arguments}"),
        StreamMessage::ToolResult {
            tool_name,
            content,
            is_error,
            denied,
            sequence_no,
            ..
        } => {
            let label = if *denied {
                "denied"
            } else if *is_error {
                "failed"
            } else {
                "ok"
            };
            println!("[result #{sequence_no}] {tool_name} {label}");
            for line in content.lines().take(20) {
                println!("  {line}");
            }
        }
        StreamMessage::Error { code, message } => eprintln!("[error {code}] {message}"),
        StreamMessage::Done {
            steps, usage, ..
        } => eprintln!(
            "[done in {steps} step(s), {} tokens]",
            usage.total_tokens
        ),
    }
}

async fn show_command(args: ShowArgs) -> Result<ExitCode, AgentError> {
    let store = FsSessionStore::new(&args.store_dir)?;
    let record = store.load(&args.session_id).await?;
    let turns = store
        .turns(&args.session_id)
        .await?
        .iter()
        .map(Turn::from_stored)
        .collect::<Result<Vec<_>, _>>()?;

    if args.json {
        let body = serde_json::json!({ "session": record, "turns": turns });
        let rendered = serde_json::to_string_pretty(&body).map_err(|error| {
            AgentError::Store(loom_turnstore::StoreError::Serialization(error.to_string()))
        })?;
        println!("{rendered}");
        return Ok(ExitCode::SUCCESS);
    }

    println!("session: {}", record.session_id);
    println!("status: {}", record.status);
    println!("turns: {}", record.turn_count());
    if let Some(parent) = record.parent_session_id.as_deref() {
        println!("forked_from: {parent}");
    }
    for turn in &turns {
        println!("{}", describe_turn(turn));
    }
    Ok(ExitCode::SUCCESS)
}

fn describe_turn(turn: &Turn) -> String {
    match turn {
        Turn::User { content, .. } => format!("user: {content}"),
        Turn::Assistant { content, .. } => format!("assistant: {content}"),
        Turn::ToolRequest {
            sequence_no,
            tool_name,
            arguments,
            ..
        } => format!("tool_request #{sequence_no}: {tool_name} {arguments}"),
        Turn::ToolResult {
            sequence_no,
            tool_name,
            is_error,
            denied,
            ..
        } => format!(
            "tool_result #{sequence_no}: {tool_name} is_error={is_error} denied={denied}"
        ),
    }
}

/// Asks on the terminal before a gated call runs.
///
/// One reader thread owns stdin for the whole process and forwards lines.
/// Lines typed while no question is open are discarded before the next one
/// is asked.
struct ConsoleApprover {
    answers: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    approval_timeout: Duration,
}

impl ConsoleApprover {
    fn new(answers: mpsc::UnboundedReceiver<String>, approval_timeout: Duration) -> Self {
        Self {
            answers: tokio::sync::Mutex::new(answers),
            approval_timeout,
        }
    }

    fn stdin(approval_timeout: Duration) -> Result<Self, AgentError> {
        let (sender, answers) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("loom-stdin".to_string())
            .spawn(move || {
                for line in std::io::stdin().lock().lines() {
                    let Ok(line) = line else { break };
                    if sender.send(line).is_err() {
                        break;
                    }
                }
            })
            .map_err(|error| {
                AgentError::invalid_configuration(format!("cannot read approvals: {error}"))
            })?;
        Ok(Self::new(answers, approval_timeout))
    }
}

#[async_trait]
impl ToolApprover for ConsoleApprover {
    async fn can_use_tool(&self, tool_name: &str, arguments: &Value) -> Result<bool, AgentError> {
        let mut answers = self.answers.lock().await;
        let mut stale = 0usize;
        while answers.try_recv().is_ok() {
            stale += 1;
        }
        if stale > 0 {
            tracing::debug!(stale, "discarded unanswered approval input");
        }

        let mut stderr = std::io::stderr();
        let _ = write!(
            stderr,
            "allow {tool_name} {arguments}? [y/N, denied after {}s] ",
            self.approval_timeout.as_secs()
        );
        let _ = stderr.flush();
        match answers.recv().await {
            Some(answer) => Ok(is_yes(&answer)),
            None => {
                tracing::warn!(tool = tool_name, "stdin closed; denying tool call");
                Ok(false)
            }
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn is_interactive_terminal() -> bool {
    std::io::stdin().is_terminal() && std::io::stderr().is_terminal()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(flavor = "current_thread")]
    async fn answer_left_over_from_an_expired_prompt_is_discarded() {
        let (sender, answers) = mpsc::unbounded_channel();
        let approver = ConsoleApprover::new(answers, Duration::from_secs(5));
        sender.send("yes".to_string()).expect("send stale answer");

        let input = json!({ "command": "rm -rf build" });
        let (allowed, _) = tokio::join!(
            approver.can_use_tool("Bash", &input),
            async {
                tokio::task::yield_now().await;
                sender.send("n".to_string()).expect("send fresh answer");
            }
        );
        assert!(!allowed.expect("approval should resolve"));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn fresh_yes_approves_and_closed_input_denies() {
        let (sender, answers) = mpsc::unbounded_channel();
        let approver = ConsoleApprover::new(answers, Duration::from_secs(5));

        let input = json!({});
        let (allowed, _) = tokio::join!(approver.can_use_tool("Write", &input), async {
            tokio::task::yield_now().await;
            sender.send(" Y ".to_string()).expect("send answer");
        });
        assert!(allowed.expect("approval should resolve"));

        drop(sender);
        let allowed = approver
            .can_use_tool("Write", &json!({}))
            .await
            .expect("closed input should resolve");
        assert!(!allowed);
    }

    #[test]
    fn only_y_and_yes_approve() {
        assert!(is_yes("y"));
        assert!(is_yes("YES\n"));
        assert!(!is_yes(""));
        assert!(!is_yes("yep"));
        assert!(!is_yes("no"));
    }
}
