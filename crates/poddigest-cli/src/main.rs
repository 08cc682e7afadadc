//! `poddigest` — administrative CLI for the production pipeline.
//!
//! Thin command dispatch over [`poddigest_pipeline::Orchestrator`] and the
//! repository: every mutating subcommand goes through the orchestrator so
//! this tool can never bypass the queue, the same rule the collaborating
//! HTTP API layer is bound by. One `Cli`/`Subcommand` pair, one connection
//! opened in `main`, one `cmd_*` function per subcommand.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use poddigest_domain::{
    ClipLengthPreference, ConfigId, DeliveryMethod, DigestConfig, DigestId, NarrationDepth, Podcast,
    PodcastId, Priority, Structure, Subscription, TargetLengthMinutes, TransitionStyle, UserId,
};
use poddigest_pipeline::Orchestrator;
use poddigest_state::{Repository, SurrealHandle, SurrealQueue, SurrealRepository};
use std::sync::Arc;
use tracing::Level;

#[derive(Parser)]
#[command(name = "poddigest")]
#[command(author = "PodDigest Engineering")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Administrative CLI for the PodDigest production pipeline", long_about = None)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trigger a new digest production run for a user/config pair
    Trigger {
        #[arg(long)]
        user: String,
        #[arg(long)]
        config: String,
    },

    /// Retry a failed digest from the top of the pipeline
    Retry {
        /// Digest id
        digest: String,
    },

    /// Cancel a non-terminal digest
    Cancel {
        /// Digest id
        digest: String,
    },

    /// Show a digest's current status and, if completed, its chapters
    Status {
        /// Digest id
        digest: String,
    },

    /// List completed digests for a user, newest first
    List {
        #[arg(long)]
        user: String,
    },

    /// Register a podcast feed
    AddPodcast {
        #[arg(long)]
        title: String,
        #[arg(long)]
        feed_url: String,
        #[arg(long)]
        author: Option<String>,
    },

    /// Subscribe a user to a podcast
    Subscribe {
        #[arg(long)]
        user: String,
        #[arg(long)]
        podcast: String,
        /// must | preferred | nice
        #[arg(long, default_value = "preferred")]
        priority: String,
    },

    /// Create a digest configuration, printing its new id
    CreateConfig {
        #[arg(long)]
        user: String,
        /// 30 | 60 | 90 | 120
        #[arg(long, default_value = "60")]
        target_length_minutes: u16,
        /// short | medium | long | mixed
        #[arg(long, default_value = "mixed")]
        clip_length: String,
        /// by_score | by_show | by_topic | chronological
        #[arg(long, default_value = "by_score")]
        structure: String,
        #[arg(long, default_value = "50")]
        breadth_depth: u8,
        #[arg(long, default_value = "default-voice")]
        voice_id: String,
        /// brief | standard | detailed
        #[arg(long, default_value = "standard")]
        narration_depth: String,
        /// stinger | soft_fade | whoosh | silence
        #[arg(long, default_value = "silence")]
        transition_style: String,
        /// ISO weekday, 1 = Monday .. 7 = Sunday
        #[arg(long, default_value = "1")]
        delivery_day: u8,
        #[arg(long, default_value = "9")]
        delivery_hour_utc: u8,
        #[arg(long, default_value = "0")]
        delivery_minute_utc: u8,
        /// syndication | push | email | in_app
        #[arg(long, default_value = "syndication")]
        delivery_method: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    poddigest_domain::init_tracing(cli.json, level);

    let db = SurrealHandle::setup_db().await.context("failed to connect to the PodDigest database")?;
    let repo = Arc::new(SurrealRepository::new(db.clone()));
    let queue = Arc::new(SurrealQueue::new(db));
    let orchestrator = Orchestrator::new(repo.clone(), queue);

    match cli.command {
        Commands::Trigger { user, config } => cmd_trigger(&orchestrator, &user, &config).await,
        Commands::Retry { digest } => cmd_retry(&orchestrator, &digest).await,
        Commands::Cancel { digest } => cmd_cancel(&orchestrator, &digest).await,
        Commands::Status { digest } => cmd_status(&repo, &digest).await,
        Commands::List { user } => cmd_list(&repo, &user).await,
        Commands::AddPodcast { title, feed_url, author } => cmd_add_podcast(&repo, &title, &feed_url, author).await,
        Commands::Subscribe { user, podcast, priority } => cmd_subscribe(&repo, &user, &podcast, &priority).await,
        Commands::CreateConfig {
            user,
            target_length_minutes,
            clip_length,
            structure,
            breadth_depth,
            voice_id,
            narration_depth,
            transition_style,
            delivery_day,
            delivery_hour_utc,
            delivery_minute_utc,
            delivery_method,
        } => {
            cmd_create_config(
                &repo,
                &user,
                target_length_minutes,
                &clip_length,
                &structure,
                breadth_depth,
                &voice_id,
                &narration_depth,
                &transition_style,
                delivery_day,
                delivery_hour_utc,
                delivery_minute_utc,
                &delivery_method,
            )
            .await
        }
    }
}

async fn cmd_trigger(orchestrator: &Orchestrator<SurrealRepository, SurrealQueue>, user: &str, config: &str) -> Result<()> {
    let user_id: UserId = user.parse().context("invalid user id")?;
    let config_id: ConfigId = config.parse().context("invalid config id")?;
    let digest_id = orchestrator.trigger(user_id, config_id).await?;
    println!("triggered digest {digest_id}");
    Ok(())
}

async fn cmd_retry(orchestrator: &Orchestrator<SurrealRepository, SurrealQueue>, digest: &str) -> Result<()> {
    let digest_id: DigestId = digest.parse().context("invalid digest id")?;
    orchestrator.retry(digest_id).await?;
    println!("digest {digest_id} reset to pending and requeued");
    Ok(())
}

async fn cmd_cancel(orchestrator: &Orchestrator<SurrealRepository, SurrealQueue>, digest: &str) -> Result<()> {
    let digest_id: DigestId = digest.parse().context("invalid digest id")?;
    orchestrator.cancel(digest_id).await?;
    println!("digest {digest_id} cancelled");
    Ok(())
}

async fn cmd_status(repo: &Arc<SurrealRepository>, digest: &str) -> Result<()> {
    let digest_id: DigestId = digest.parse().context("invalid digest id")?;
    let d = repo.get_digest(digest_id).await?;
    println!("digest {digest_id}");
    println!("  status:   {:?}", d.status);
    println!("  clips:    {}", d.clip_count);
    if let Some(err) = &d.error {
        println!("  error:    {err}");
    }
    if let Some(key) = &d.audio_object_key {
        println!("  audio:    {key}");
        println!("  duration: {:.1}s", d.total_duration_sec.unwrap_or(0.0));
    }
    if let Some(chapters) = &d.chapters {
        println!("  chapters:");
        for (i, ch) in chapters.iter().enumerate() {
            println!("    {i}: {:.1}-{:.1}  {}", ch.start_sec, ch.end_sec, ch.title);
        }
    }
    Ok(())
}

async fn cmd_list(repo: &Arc<SurrealRepository>, user: &str) -> Result<()> {
    let user_id: UserId = user.parse().context("invalid user id")?;
    let digests = repo.list_completed_digests_for_user(user_id).await?;
    if digests.is_empty() {
        println!("no completed digests for user {user_id}");
        return Ok(());
    }
    for d in digests {
        println!(
            "{}  week {} .. {}  clips={}  duration={:.0}s",
            d.id,
            d.week_start.date_naive(),
            d.week_end.date_naive(),
            d.clip_count,
            d.total_duration_sec.unwrap_or(0.0)
        );
    }
    Ok(())
}

async fn cmd_add_podcast(repo: &Arc<SurrealRepository>, title: &str, feed_url: &str, author: Option<String>) -> Result<()> {
    let podcast = Podcast {
        id: PodcastId::new(),
        title: title.to_string(),
        author,
        feed_url: feed_url.to_string(),
        artwork_url: None,
        external_id: None,
        last_crawled_at: None,
    };
    let created = repo.upsert_podcast(&podcast).await?;
    println!("podcast {} ({})", created.id, created.title);
    Ok(())
}

async fn cmd_subscribe(repo: &Arc<SurrealRepository>, user: &str, podcast: &str, priority: &str) -> Result<()> {
    let user_id: UserId = user.parse().context("invalid user id")?;
    let podcast_id: PodcastId = podcast.parse().context("invalid podcast id")?;
    let priority = parse_priority(priority)?;
    repo.upsert_subscription(&Subscription {
        user_id,
        podcast_id,
        priority,
        active: true,
    })
    .await?;
    println!("subscribed {user_id} to {podcast_id} ({priority:?})");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_create_config(
    repo: &Arc<SurrealRepository>,
    user: &str,
    target_length_minutes: u16,
    clip_length: &str,
    structure: &str,
    breadth_depth: u8,
    voice_id: &str,
    narration_depth: &str,
    transition_style: &str,
    delivery_day: u8,
    delivery_hour_utc: u8,
    delivery_minute_utc: u8,
    delivery_method: &str,
) -> Result<()> {
    let user_id: UserId = user.parse().context("invalid user id")?;
    let config = DigestConfig {
        id: ConfigId::new(),
        user_id,
        target_length_minutes: parse_target_length(target_length_minutes)?,
        clip_length_preference: parse_clip_length(clip_length)?,
        structure: parse_structure(structure)?,
        breadth_depth,
        voice_id: voice_id.to_string(),
        narration_depth: parse_narration_depth(narration_depth)?,
        music_style: None,
        transition_style: parse_transition_style(transition_style)?,
        delivery_day,
        delivery_hour_utc,
        delivery_minute_utc,
        delivery_method: parse_delivery_method(delivery_method)?,
        is_active: true,
    };
    let created = repo.upsert_digest_config(&config).await?;
    println!("config {}", created.id);
    Ok(())
}

fn parse_priority(s: &str) -> Result<Priority> {
    match s {
        "must" => Ok(Priority::Must),
        "preferred" => Ok(Priority::Preferred),
        "nice" => Ok(Priority::Nice),
        other => anyhow::bail!("unknown priority: {other} (expected must|preferred|nice)"),
    }
}

fn parse_target_length(minutes: u16) -> Result<TargetLengthMinutes> {
    match minutes {
        30 => Ok(TargetLengthMinutes::Thirty),
        60 => Ok(TargetLengthMinutes::Sixty),
        90 => Ok(TargetLengthMinutes::Ninety),
        120 => Ok(TargetLengthMinutes::OneTwenty),
        other => anyhow::bail!("unsupported target length: {other} (expected 30|60|90|120)"),
    }
}

fn parse_clip_length(s: &str) -> Result<ClipLengthPreference> {
    match s {
        "short" => Ok(ClipLengthPreference::Short),
        "medium" => Ok(ClipLengthPreference::Medium),
        "long" => Ok(ClipLengthPreference::Long),
        "mixed" => Ok(ClipLengthPreference::Mixed),
        other => anyhow::bail!("unknown clip length preference: {other}"),
    }
}

fn parse_structure(s: &str) -> Result<Structure> {
    match s {
        "by_score" => Ok(Structure::ByScore),
        "by_show" => Ok(Structure::ByShow),
        "by_topic" => Ok(Structure::ByTopic),
        "chronological" => Ok(Structure::Chronological),
        other => anyhow::bail!("unknown structure: {other}"),
    }
}

fn parse_narration_depth(s: &str) -> Result<NarrationDepth> {
    match s {
        "brief" => Ok(NarrationDepth::Brief),
        "standard" => Ok(NarrationDepth::Standard),
        "detailed" => Ok(NarrationDepth::Detailed),
        other => anyhow::bail!("unknown narration depth: {other}"),
    }
}

fn parse_transition_style(s: &str) -> Result<TransitionStyle> {
    match s {
        "stinger" => Ok(TransitionStyle::Stinger),
        "soft_fade" => Ok(TransitionStyle::SoftFade),
        "whoosh" => Ok(TransitionStyle::Whoosh),
        "silence" => Ok(TransitionStyle::Silence),
        other => anyhow::bail!("unknown transition style: {other}"),
    }
}

fn parse_delivery_method(s: &str) -> Result<DeliveryMethod> {
    match s {
        "syndication" => Ok(DeliveryMethod::Syndication),
        "push" => Ok(DeliveryMethod::Push),
        "email" => Ok(DeliveryMethod::Email),
        "in_app" => Ok(DeliveryMethod::InApp),
        other => anyhow::bail!("unknown delivery method: {other}"),
    }
}
