mod render;

use anyhow::Context;
use clap::{Parser, Subcommand};
use common::{
    parse_interval, ApiKeyUpdate, DiagnosisJob, FeedbackKind, FeedbackRequest, JobId, PatientForm,
};
use medrag_client::api::with_timeout;
use medrag_client::{
    ChatClient, ChatSession, ClientConfig, ClientError, DiagnosisApi, NoticeBoard, PollSnapshot,
    PollState, StatusPoller,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Parser)]
#[command(author, version, about = "Submit and follow MedRAG diagnoses", long_about = None)]
struct Cli {
    /// Backend base URL (default: MEDRAG_API_URL or http://localhost:8000)
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Send every call through a medrag-gateway at this URL
    #[arg(long, global = true)]
    proxy_url: Option<String>,
    /// Where the login session is kept
    #[arg(long, global = true)]
    session_file: Option<PathBuf>,
    /// Poll interval (e.g. "2s", "500ms")
    #[arg(long, global = true)]
    interval: Option<String>,
    /// Per-request timeout (e.g. "30s")
    #[arg(long, global = true)]
    timeout: Option<String>,
    /// More log output; repeat for debug
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and keep the session for later commands
    Login {
        #[arg(short, long)]
        email: String,
        /// Read from stdin when omitted
        #[arg(short, long)]
        password: Option<String>,
    },
    /// Forget the stored session
    Logout,
    /// Submit a new diagnosis request
    Submit {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        age: u32,
        #[arg(long)]
        gender: String,
        #[arg(long)]
        symptoms: String,
        #[arg(long)]
        history: Option<String>,
        /// Follow the job until it finishes
        #[arg(short, long)]
        watch: bool,
    },
    /// List prior diagnoses
    List,
    /// Show one diagnosis in full
    Get {
        id: String,
    },
    /// Query the status of a diagnosis once
    Status {
        id: String,
    },
    /// Follow a diagnosis until it completes or fails (Ctrl-C stops)
    Watch {
        id: String,
    },
    /// Ask about a diagnosis; without a message, read turns from stdin
    Chat {
        id: String,
        message: Option<String>,
    },
    /// Check that the backend is up
    Health,
    /// Ask the backend to diagnose a case again
    Regenerate {
        id: String,
        /// Follow the job until it finishes
        #[arg(short, long)]
        watch: bool,
    },
    /// Rate a diagnosis
    Feedback {
        id: String,
        /// positive or negative
        #[arg(short, long)]
        kind: FeedbackKind,
        #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=5))]
        rating: u8,
        #[arg(short, long, default_value = "")]
        comments: String,
    },
    /// Download a case as JSON
    Export {
        id: String,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show case counts
    Stats,
    /// Delete the chat history of a diagnosis
    ClearChat {
        id: String,
    },
    /// Replace a model provider's API key
    ApiKey {
        /// Administrator date of birth
        #[arg(long)]
        dob: String,
        #[arg(long, value_parser = ["gemini", "perplexity"])]
        provider: String,
        #[arg(long)]
        key: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = setup_logging(cli.verbose) {
        eprintln!("Failed to set up logging: {}", e);
    }

    let notices = NoticeBoard::new();
    let outcome = run(cli, &notices).await;
    if let Err(ref e) = outcome {
        match e.downcast_ref::<ClientError>() {
            Some(err) if err.is_auth() => {
                notices.error(format!("{}. Run `medrag login` to sign in again.", err));
            }
            _ => {
                notices.error(format!("{:#}", e));
            }
        }
    }

    for notice in notices.active() {
        render::print_notice(&notice);
    }
    if outcome.is_err() {
        std::process::exit(1);
    }
}

fn setup_logging(verbose: u8) -> anyhow::Result<()> {
    let level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                chrono::Local::now().format("%Y-%m-%d][%H:%M:%S"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()?;
    Ok(())
}

fn default_session_file() -> PathBuf {
    match std::env::var("HOME") {
        Ok(home) => {
            let relative = common::DEFAULT_SESSION_FILE.trim_start_matches("~/");
            PathBuf::from(home).join(relative)
        }
        Err(_) => PathBuf::from(common::USER_SESSION_FILE),
    }
}

fn client_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let mut config = ClientConfig::from_env();
    if let Some(ref url) = cli.api_url {
        config.base_url = url.clone();
    }
    if let Some(ref url) = cli.proxy_url {
        config.proxy_url = Some(url.clone());
    }
    if let Some(ref path) = cli.session_file {
        config.session_file = Some(path.clone());
    }
    if config.session_file.is_none() {
        config.session_file = Some(default_session_file());
    }
    if let Some(ref raw) = cli.interval {
        config.poll_interval = parse_interval(raw).context("Invalid --interval")?;
    }
    if let Some(ref raw) = cli.timeout {
        config.request_timeout = parse_interval(raw).context("Invalid --timeout")?;
    }
    Ok(config)
}

async fn run(cli: Cli, notices: &NoticeBoard) -> anyhow::Result<()> {
    let config = client_config(&cli)?;
    let api = medrag_client::connect(&config)?;
    let limit = config.request_timeout;

    match cli.command {
        Commands::Login { email, password } => {
            let password = match password {
                Some(p) => p,
                None => prompt("Password: ").await?,
            };
            with_timeout(limit, api.login(&email, &password)).await?;
            notices.success(format!("Logged in as {}", email));
        }
        Commands::Logout => {
            match api.session() {
                Some(session) => {
                    session.clear()?;
                    match session.path() {
                        Some(path) => notices.info(format!("Logged out, cleared {}", path.display())),
                        None => notices.info("Logged out"),
                    };
                }
                None => {
                    notices.info("Logged out");
                }
            }
        }
        Commands::Submit {
            name,
            email,
            phone,
            age,
            gender,
            symptoms,
            history,
            watch: follow,
        } => {
            let form = PatientForm {
                patient_name: name,
                patient_email: email,
                patient_phone: phone,
                age,
                gender,
                symptoms,
                medical_history: history,
            };
            let problems = form.validate();
            if !problems.is_empty() {
                anyhow::bail!("Form is incomplete:\n  {}", problems.join("\n  "));
            }

            let ack = with_timeout(limit, api.submit(&form)).await?;
            println!("Submitted diagnosis {} ({})", ack.id, ack.status);
            notices.success("Diagnosis request submitted");

            if follow {
                let snapshot = watch(api, &config, DiagnosisJob::submitted(&ack)).await;
                report(&snapshot, notices);
            }
        }
        Commands::List => {
            let cases = with_timeout(limit, api.list()).await?;
            if cases.is_empty() {
                println!("No diagnoses yet.");
            } else {
                println!("{}", render::case_table(&cases));
            }
        }
        Commands::Get { id } => {
            let job = with_timeout(limit, api.get(&JobId(id))).await?;
            render::print_job(&job);
        }
        Commands::Status { id } => {
            let update = with_timeout(limit, api.status(&JobId(id))).await?;
            render::print_status(&update);
        }
        Commands::Watch { id } => {
            let mut job = with_timeout(limit, api.get(&JobId(id))).await?;
            if !job.status.is_terminal() {
                // the record can lag behind the status route
                let update = with_timeout(limit, api.status(&job.id)).await?;
                job.apply_status(&update);
            }
            let snapshot = watch(api, &config, job).await;
            report(&snapshot, notices);
        }
        Commands::Chat { id, message } => {
            let client = ChatClient::new(api, limit);
            let mut session = ChatSession::new(client, JobId(id));
            match message {
                Some(message) => {
                    if let Some(turn) = session.send(&message).await {
                        println!("{}", turn.reply);
                    }
                }
                None => chat_loop(&mut session).await?,
            }
        }
        Commands::Health => {
            let health = with_timeout(limit, api.health()).await?;
            println!("{}", serde_json::to_string_pretty(&health.0)?);
            if !health.is_healthy() {
                anyhow::bail!("Backend reports itself unhealthy");
            }
        }
        Commands::Regenerate { id, watch: follow } => {
            let ack = with_timeout(limit, api.regenerate(&JobId(id))).await?;
            let job = DiagnosisJob::regenerated(&ack);
            notices.success("Diagnosis regenerated");
            if follow {
                let snapshot = watch(api, &config, job).await;
                report(&snapshot, notices);
            } else {
                render::print_job(&job);
            }
        }
        Commands::Feedback {
            id,
            kind,
            rating,
            comments,
        } => {
            let request = FeedbackRequest {
                case_id: JobId(id),
                feedback_type: kind,
                rating,
                comments,
            };
            let ack = with_timeout(limit, api.feedback(&request)).await?;
            log::debug!("Feedback stored as {}", ack.feedback_id);
            notices.success("Thanks for your feedback");
        }
        Commands::Export { id, output } => {
            let export = with_timeout(limit, api.export(&JobId(id))).await?;
            let text = serde_json::to_string_pretty(&export)?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, text)
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    notices.success(format!("Exported {} to {}", export.case_id, path.display()));
                }
                None => println!("{}", text),
            }
        }
        Commands::Stats => {
            let stats = with_timeout(limit, api.dashboard_stats()).await?;
            println!("{}", render::stats_table(&stats));
        }
        Commands::ClearChat { id } => {
            let ack = with_timeout(limit, api.clear_chat(&JobId(id))).await?;
            notices.info(if ack.message.is_empty() {
                "Chat history cleared".to_string()
            } else {
                ack.message
            });
        }
        Commands::ApiKey { dob, provider, key } => {
            let update = ApiKeyUpdate {
                dob,
                provider,
                api_key: key,
            };
            if !update.is_complete() {
                anyhow::bail!("Both --dob and --key are required");
            }
            with_timeout(limit, api.update_api_key(&update)).await?;
            notices.success(format!("{} API key updated successfully", update.provider));
        }
    }

    Ok(())
}

async fn prompt(label: &str) -> anyhow::Result<String> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(label.as_bytes()).await?;
    stdout.flush().await?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    Ok(line.trim_end_matches(&['\r', '\n'][..]).to_string())
}

/// Follow `job` until the poller settles or Ctrl-C is pressed.
async fn watch(api: Arc<DiagnosisApi>, config: &ClientConfig, job: DiagnosisJob) -> PollSnapshot {
    let poller = StatusPoller::new(api, config.poller_config());
    let mut handle = poller.start(job);
    let mut updates = handle.subscribe();

    let mut last_line = render::progress_line(&handle.latest());
    println!("{}", last_line);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                let line = render::progress_line(&snapshot);
                if line != last_line {
                    println!("{}", line);
                    last_line = line;
                }
                if snapshot.state.is_final() && snapshot.state != PollState::Idle {
                    break;
                }
            }
            _ = &mut ctrl_c => {
                log::info!("Interrupted, stopping poll loop");
                handle.cancel();
                break;
            }
        }
    }

    handle.finished().await
}

fn report(snapshot: &PollSnapshot, notices: &NoticeBoard) {
    match snapshot.state {
        PollState::Completed => {
            render::print_job(&snapshot.job);
            notices.success("Diagnosis completed");
        }
        PollState::Failed => {
            render::print_job(&snapshot.job);
            notices.error("Diagnosis failed");
        }
        PollState::Cancelled => {
            notices.info(format!(
                "Stopped watching {}. Resume with `medrag watch {}`",
                snapshot.job.id, snapshot.job.id
            ));
        }
        PollState::Idle | PollState::Polling => {
            notices.info(format!("Diagnosis {} is {}", snapshot.job.id, snapshot.job.status));
        }
    }
}

async fn chat_loop(session: &mut ChatSession) -> anyhow::Result<()> {
    println!("Chatting about diagnosis {}. Type `exit` to leave.", session.job_id());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if matches!(line.trim(), "exit" | "quit") {
            break;
        }
        if let Some(turn) = session.send(&line).await {
            println!("{}", turn.reply);
        }
    }

    log::info!("Chat ended after {} turns", session.turns().len());
    Ok(())
}
