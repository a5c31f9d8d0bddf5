use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use sendlimit::clock::MockClock;
use sendlimit::config::Settings;
use sendlimit::delivery::{InMemoryOutboundStore, RateLimitedSender, RecordingSender, SendRequest, UserId};
use sendlimit::ratelimit::{Classification, Decision, PolicyIndex, RateLimiterProvider, Topic, ValidationMode};

/// Topic-scoped rate limiting for outbound notifications
#[derive(Debug, Parser)]
#[command(name = "sendlimit", version, about)]
struct Cli {
    /// Settings file, overridden by SENDLIMIT_* environment variables
    #[arg(long, global = true)]
    settings: Option<String>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load a policy and print how each topic is classified
    Validate {
        /// Policy file; defaults to the configured policy_path
        #[arg(long)]
        policy: Option<String>,

        /// Fail if any known topic is left unclassified
        #[arg(long)]
        strict: bool,

        /// Known topic, in addition to those in the settings
        #[arg(long = "topic")]
        topics: Vec<Topic>,
    },

    /// Decide whether a send would be allowed against a recorded history
    Check {
        /// Policy file; defaults to the configured policy_path
        #[arg(long)]
        policy: Option<String>,

        /// JSON file of outbound records
        #[arg(long)]
        history: String,

        #[arg(long)]
        user: UserId,

        #[arg(long)]
        topic: Topic,

        /// Evaluation instant in RFC 3339; defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_writer(std::io::stderr);
    match cli.log_format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }

    let mut settings = Settings::load(cli.settings.as_deref()).context("Failed to load settings")?;

    match cli.command {
        Command::Validate { policy, strict, topics } => {
            override_policy(&mut settings, policy);
            if strict {
                settings.validation = ValidationMode::Strict;
            }
            settings.known_topics.extend(topics);

            let index = settings.load_policy()?;
            print_classifications(&index, &settings.known_topics);
            Ok(ExitCode::SUCCESS)
        }
        Command::Check {
            policy,
            history,
            user,
            topic,
            at,
        } => {
            override_policy(&mut settings, policy);

            let index = settings.load_policy()?;
            let store = Arc::new(
                InMemoryOutboundStore::from_file(&history)
                    .with_context(|| format!("Failed to load history from {history}"))?,
            );
            let now = at.unwrap_or_else(Utc::now);
            let clock = Arc::new(MockClock::new(now));
            info!(records = store.len(), at = %now, "Loaded outbound history");

            let provider = Arc::new(RateLimiterProvider::new(index, store.clone(), clock.clone()));
            let sender = RateLimitedSender::new(RecordingSender::new(store, clock), provider);

            let decision = sender.check(&SendRequest::new(user, topic.clone(), "")).await?;
            match decision {
                Decision::Allow => {
                    println!("ALLOW {topic} to user {user}");
                    Ok(ExitCode::SUCCESS)
                }
                Decision::Block(reason) => {
                    println!("BLOCK {topic} to user {user}: {reason}");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
    }
}

fn override_policy(settings: &mut Settings, policy: Option<String>) {
    if policy.is_some() {
        settings.policy_path = policy;
    }
}

fn print_classifications(index: &PolicyIndex, known_topics: &[Topic]) {
    let mut topics = index.topics();
    topics.extend(known_topics.iter().cloned());

    for topic in &topics {
        match index.classify(topic) {
            Classification::Prohibited => println!("{topic}: prohibited"),
            Classification::Unlimited => println!("{topic}: unlimited"),
            Classification::Regular {
                isolated_rules,
                shared_groups,
            } => {
                println!("{topic}: regular");
                for rule in &isolated_rules {
                    println!("  {rule}");
                }
                for group in &shared_groups {
                    let members: Vec<&str> = group.topics.iter().map(Topic::as_str).collect();
                    for rule in &group.rules {
                        println!("  {rule} shared with {}", members.join(", "));
                    }
                }
            }
            Classification::Unconfigured => println!("{topic}: unconfigured (treated as prohibited)"),
        }
    }
}
