//! Analyzer (component F, §4.F) — the scoring and selection engine.
//!
//! The algorithmic heart of the pipeline, kept as pure, deterministic
//! functions (`sliding_windows`, `select_clips`, `order_clips`) wherever
//! possible, with the one LLM call isolated behind [`CandidateScorer`] —
//! grounded on the teacher's separation of `gate::evaluate_gate` (pure)
//! from the I/O shell that drives it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use poddigest_domain::{
    ClipId, DigestClip, DigestConfig, DigestId, EpisodeId, ItemFailure, ScoreDimensions,
    StageFailureKind, StageOutcome, Structure,
};
use poddigest_state::Repository;
use tokio::sync::Semaphore;
use tracing::{instrument, warn};

use crate::retry::{retry_with_backoff, Transient};

/// Score floor below which a candidate is discarded.
const SCORE_FLOOR: f64 = 40.0;
/// Sliding-window construction parameters.
const WINDOW_SEC: f64 = 180.0;
const STEP_SEC: f64 = 90.0;
/// Bound on concurrent scoring calls and the pause between batches.
const MAX_CONCURRENT_SCORES: usize = 5;
const INTER_BATCH_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct CandidateRegion {
    pub episode_id: EpisodeId,
    pub start_sec: f64,
    pub end_sec: f64,
    pub dimensions: ScoreDimensions,
}

impl CandidateRegion {
    pub fn score(&self) -> f64 {
        self.dimensions.weighted_score()
    }

    pub fn duration_sec(&self) -> f64 {
        self.end_sec - self.start_sec
    }

    fn overlaps(&self, other: &CandidateRegion) -> bool {
        self.episode_id == other.episode_id
            && self.start_sec < other.end_sec
            && other.start_sec < self.end_sec
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScorerError {
    #[error("transient scoring error: {0}")]
    Transient(String),
    #[error("scoring error: {0}")]
    Fatal(String),
}

impl Transient for ScorerError {
    fn is_transient(&self) -> bool {
        matches!(self, ScorerError::Transient(_))
    }
}

/// The only I/O boundary in the analyzer: score one candidate time range
/// against the LLM, returning its five dimension values.
#[async_trait]
pub trait CandidateScorer: Send + Sync {
    async fn score_region(
        &self,
        episode_id: EpisodeId,
        excerpt: &str,
        start_sec: f64,
        end_sec: f64,
    ) -> Result<ScoreDimensions, ScorerError>;
}

/// Generate overlapping `[start, start+window)` windows over
/// `[0, total_duration_sec)`, stepping by `step_sec`, per §4.F strategy 2.
pub fn sliding_windows(total_duration_sec: f64, window_sec: f64, step_sec: f64) -> Vec<(f64, f64)> {
    if total_duration_sec <= 0.0 || window_sec <= 0.0 || step_sec <= 0.0 {
        return Vec::new();
    }
    let mut windows = Vec::new();
    let mut start = 0.0;
    while start < total_duration_sec {
        let end = (start + window_sec).min(total_duration_sec);
        windows.push((start, end));
        if end >= total_duration_sec {
            break;
        }
        start += step_sec;
    }
    windows
}

/// `effectiveMin`/`effectiveMax` from §4.F.
pub fn effective_bounds(breadth: f64, lo: f64, hi: f64) -> (f64, f64) {
    let effective_min = lo + breadth * (hi - lo) * 0.3;
    let effective_max = hi - (1.0 - breadth) * (hi - lo) * 0.3;
    (effective_min, effective_max)
}

/// `maxClipsPerEpisode = max(1, round(1 + 4b))` from §4.F.
pub fn max_clips_per_episode(breadth: f64) -> u32 {
    (1.0 + 4.0 * breadth).round().max(1.0) as u32
}

/// Deterministic selection over the filtered candidate set. Input
/// is assumed already filtered to `score >= 40`.
pub fn select_clips(candidates: &[CandidateRegion], config: &DigestConfig) -> Vec<CandidateRegion> {
    let available_content = 0.85 * config.target_length_minutes.as_seconds();
    let (lo, hi) = config.clip_length_preference.range_seconds();
    let breadth = config.breadth_fraction();
    let (effective_min, effective_max) = effective_bounds(breadth, lo, hi);
    let max_per_episode = max_clips_per_episode(breadth);

    let mut sorted: Vec<&CandidateRegion> = candidates.iter().collect();
    sorted.sort_by(|a, b| {
        b.score()
            .partial_cmp(&a.score())
            .unwrap()
            .then(a.start_sec.partial_cmp(&b.start_sec).unwrap())
            .then(a.episode_id.to_string().cmp(&b.episode_id.to_string()))
    });

    let mut selected: Vec<CandidateRegion> = Vec::new();
    let mut running_total = 0.0;
    let mut per_episode: HashMap<EpisodeId, u32> = HashMap::new();

    for candidate in sorted {
        if running_total >= available_content {
            break;
        }
        let duration = candidate.duration_sec();
        if duration < 0.7 * effective_min || duration > 1.3 * effective_max {
            continue;
        }
        if running_total + duration > available_content {
            continue;
        }
        let count = per_episode.get(&candidate.episode_id).copied().unwrap_or(0);
        if count >= max_per_episode {
            continue;
        }
        if selected.iter().any(|s| s.overlaps(candidate)) {
            continue;
        }
        running_total += duration;
        *per_episode.entry(candidate.episode_id).or_insert(0) += 1;
        selected.push(candidate.clone());
    }
    selected
}

/// Final presentation ordering. `podcast_titles` maps
/// `episode_id -> podcast title`, needed by `byShow`/`byTopic`.
pub fn order_clips(
    mut selected: Vec<CandidateRegion>,
    structure: Structure,
    podcast_titles: &HashMap<EpisodeId, String>,
) -> Vec<CandidateRegion> {
    let title_of = |c: &CandidateRegion| podcast_titles.get(&c.episode_id).cloned().unwrap_or_default();
    match structure {
        Structure::ByScore => {
            selected.sort_by(|a, b| b.score().partial_cmp(&a.score()).unwrap());
        }
        Structure::ByShow => {
            selected.sort_by(|a, b| {
                title_of(a)
                    .cmp(&title_of(b))
                    .then(a.start_sec.partial_cmp(&b.start_sec).unwrap())
            });
        }
        Structure::ByTopic => {
            // Placeholder for future clustering: pinned
            // equivalent to byShow, but inner sort is score descending.
            selected.sort_by(|a, b| {
                title_of(a)
                    .cmp(&title_of(b))
                    .then(b.score().partial_cmp(&a.score()).unwrap())
            });
        }
        Structure::Chronological => {
            selected.sort_by(|a, b| {
                a.episode_id
                    .to_string()
                    .cmp(&b.episode_id.to_string())
                    .then(a.start_sec.partial_cmp(&b.start_sec).unwrap())
            });
        }
    }
    selected
}

pub struct Analyzer<R: Repository, S: CandidateScorer> {
    repo: Arc<R>,
    scorer: Arc<S>,
}

impl<R: Repository, S: CandidateScorer> Analyzer<R, S> {
    pub fn new(repo: Arc<R>, scorer: Arc<S>) -> Self {
        Self { repo, scorer }
    }

    /// Build and score every sliding window for one episode's transcript,
    /// bounding concurrency to [`MAX_CONCURRENT_SCORES`] with a short pause
    /// between batches. A window whose scoring ultimately fails is
    /// dropped, not escalated — only the episode-level "no transcript"
    /// case is a per-item failure.
    async fn score_episode_windows(
        &self,
        episode_id: EpisodeId,
        full_text: &str,
        duration_sec: f64,
    ) -> Vec<CandidateRegion> {
        let windows = sliding_windows(duration_sec, WINDOW_SEC, STEP_SEC);
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_SCORES));
        let mut regions = Vec::with_capacity(windows.len());

        for chunk in windows.chunks(MAX_CONCURRENT_SCORES) {
            let mut tasks = Vec::new();
            for &(start, end) in chunk {
                let semaphore = Arc::clone(&semaphore);
                let scorer = Arc::clone(&self.scorer);
                let excerpt = full_text.to_string();
                tasks.push(tokio::spawn(async move {
                    let _permit = semaphore.acquire().await.expect("semaphore not closed");
                    retry_with_backoff(3, Duration::from_millis(250), || {
                        let scorer = Arc::clone(&scorer);
                        let excerpt = excerpt.clone();
                        async move { scorer.score_region(episode_id, &excerpt, start, end).await }
                    })
                    .await
                    .map(|dimensions| CandidateRegion {
                        episode_id,
                        start_sec: start,
                        end_sec: end,
                        dimensions,
                    })
                }));
            }
            for task in tasks {
                match task.await {
                    Ok(Ok(region)) => regions.push(region),
                    Ok(Err(e)) => warn!(episode_id = %episode_id, error = %e, "dropping candidate region"),
                    Err(e) => warn!(episode_id = %episode_id, error = %e, "scoring task panicked"),
                }
            }
            tokio::time::sleep(INTER_BATCH_DELAY).await;
        }

        regions
    }

    #[instrument(skip(self, config), fields(digest_id = %digest_id))]
    pub async fn analyze(
        &self,
        digest_id: DigestId,
        episode_ids: Vec<EpisodeId>,
        config: &DigestConfig,
    ) -> StageOutcome<Vec<ClipId>, EpisodeId> {
        let mut all_candidates = Vec::new();
        let mut podcast_titles = HashMap::new();
        let mut failures = Vec::new();

        for episode_id in episode_ids {
            let transcript = match self.repo.find_completed_transcript(episode_id).await {
                Ok(Some(t)) => t,
                Ok(None) => {
                    failures.push(ItemFailure {
                        key: episode_id,
                        reason: "no completed transcript".to_string(),
                    });
                    continue;
                }
                Err(e) => {
                    failures.push(ItemFailure {
                        key: episode_id,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let episode = match self.repo.get_episode(episode_id).await {
                Ok(e) => e,
                Err(e) => {
                    failures.push(ItemFailure {
                        key: episode_id,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            if let Ok(podcast) = self.repo.get_podcast(episode.podcast_id).await {
                podcast_titles.insert(episode_id, podcast.title);
            }

            let regions = self
                .score_episode_windows(episode_id, &transcript.full_text, episode.duration_sec as f64)
                .await;
            all_candidates.extend(regions.into_iter().filter(|r| r.score() >= SCORE_FLOOR));
        }

        let selected = select_clips(&all_candidates, config);
        if selected.is_empty() {
            return StageOutcome::StageFailure {
                kind: StageFailureKind::NoViableClips,
                message: "zero candidates survived scoring and selection".to_string(),
            };
        }
        let ordered = order_clips(selected, config.structure, &podcast_titles);

        let mut clip_ids = Vec::with_capacity(ordered.len());
        for (position, region) in ordered.iter().enumerate() {
            let clip = DigestClip {
                id: ClipId::new(),
                digest_id,
                episode_id: region.episode_id,
                start_sec: region.start_sec,
                end_sec: region.end_sec,
                score: region.score(),
                score_dimensions: region.dimensions,
                position: position as u32,
                feedback_tag: None,
            };
            match self.repo.append_clip(&clip).await {
                Ok(saved) => clip_ids.push(saved.id),
                Err(e) => warn!(digest_id = %digest_id, error = %e, "failed to persist selected clip"),
            }
        }

        if let Ok(digest) = self.repo.find_digest_for_update(digest_id).await {
            if let Err(e) = self
                .repo
                .set_digest_clip_count(digest_id, digest.version, clip_ids.len() as u32)
                .await
            {
                warn!(digest_id = %digest_id, error = %e, "failed to record clip count");
            }
        }

        if failures.is_empty() {
            StageOutcome::Ok(clip_ids)
        } else {
            StageOutcome::PerItemFailures {
                succeeded: clip_ids,
                failures,
            }
        }
    }
}
