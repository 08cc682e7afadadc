//! Assembler (component H, §4.H) — the most intricate stage.
//!
//! Shells out to `ffmpeg`/`ffprobe` via `tokio::process::Command` for every
//! audio operation (extraction, concatenation, loudness normalization,
//! duration probing), grounded on the teacher's `execute_stage` idiom of
//! spawning a subprocess, piping its output, and awaiting it under a
//! timeout — "shell out and parse", not linking a codec library.
//!
//! All work happens inside one [`tempfile::TempDir`] per digest, which is
//! dropped (and so removed) on every exit path, success or failure.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use futures::StreamExt;
use poddigest_domain::{Chapter, DigestClip, DigestConfig, DigestId, EpisodeId, TransitionStyle};
use poddigest_state::ObjectStore;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{instrument, warn};

use crate::narrator::NarrationAudio;

const FFMPEG_TIMEOUT: Duration = Duration::from_secs(120);
const CLIP_FADE_IN_SEC: f64 = 0.1;
const CLIP_FADE_OUT_SEC: f64 = 0.3;
const SILENCE_GAP_SEC: f64 = 0.5;
const STINGER_GAP_SEC: f64 = 0.6;
const CHAPTER_TITLE_MAX_CHARS: usize = 80;
const TARGET_LOUDNESS_LUFS: f64 = -16.0;
const TARGET_TRUE_PEAK_DBTP: f64 = -1.5;
const TARGET_LOUDNESS_RANGE_LU: f64 = 11.0;

pub struct EpisodeSource {
    pub podcast_title: String,
    pub episode_title: String,
    pub audio_url: String,
}

pub struct AssemblyResult {
    pub audio_object_key: String,
    pub total_duration_sec: f64,
    pub chapters: Vec<Chapter>,
}

/// Gap inserted between adjacent segments.
fn gap_seconds(style: TransitionStyle) -> f64 {
    match style {
        TransitionStyle::Silence => SILENCE_GAP_SEC,
        TransitionStyle::Stinger | TransitionStyle::SoftFade | TransitionStyle::Whoosh => STINGER_GAP_SEC,
    }
}

/// First 80 chars of `"{podcast}: {episode}"`, ellipsis-truncated (§4.H
/// step 6).
pub fn chapter_title(podcast_title: &str, episode_title: &str) -> String {
    let full = format!("{podcast_title}: {episode_title}");
    if full.chars().count() <= CHAPTER_TITLE_MAX_CHARS {
        return full;
    }
    let truncated: String = full.chars().take(CHAPTER_TITLE_MAX_CHARS - 3).collect();
    format!("{truncated}...")
}

struct PlannedSegment {
    duration_sec: f64,
    chapter: Option<String>,
}

/// Build the ordered segment plan: intro, then (transition_i, clip_i) for
/// i = 1..=N, then outro. Only clip segments carry a
/// chapter title.
fn build_segment_plan(
    clips: &[DigestClip],
    narrations: &[NarrationAudio],
    titles: &HashMap<EpisodeId, (String, String)>,
) -> Vec<PlannedSegment> {
    let mut sorted_clips = clips.to_vec();
    sorted_clips.sort_by_key(|c| c.position);
    let mut sorted_narrations: Vec<&NarrationAudio> = narrations.iter().collect();
    sorted_narrations.sort_by_key(|n| n.position);

    let mut plan = Vec::with_capacity(sorted_clips.len() * 2 + 2);
    if let Some(intro) = sorted_narrations.first() {
        plan.push(PlannedSegment {
            duration_sec: intro.duration_sec,
            chapter: None,
        });
    }
    for (i, clip) in sorted_clips.iter().enumerate() {
        if let Some(transition) = sorted_narrations.get(i + 1) {
            plan.push(PlannedSegment {
                duration_sec: transition.duration_sec,
                chapter: None,
            });
        }
        let title = titles
            .get(&clip.episode_id)
            .map(|(podcast, episode)| chapter_title(podcast, episode))
            .unwrap_or_default();
        plan.push(PlannedSegment {
            duration_sec: clip.duration_sec(),
            chapter: Some(title),
        });
    }
    if let Some(outro) = sorted_narrations.last() {
        if sorted_narrations.len() > 1 {
            plan.push(PlannedSegment {
                duration_sec: outro.duration_sec,
                chapter: None,
            });
        }
    }
    plan
}

/// Analytical chapter timing from the segment plan: chapter i's bounds sum
/// preceding segment durations plus the inter-segment gap.
/// Returns the chapters and the analytical total (pre-probe) duration.
pub fn compute_chapters(plan_durations: &[(f64, Option<String>)], gap_sec: f64) -> (Vec<Chapter>, f64) {
    let mut chapters = Vec::new();
    let mut running = 0.0_f64;
    for (idx, (duration, title)) in plan_durations.iter().enumerate() {
        if let Some(title) = title {
            chapters.push(Chapter {
                title: title.clone(),
                start_sec: running,
                end_sec: running + duration,
            });
        }
        running += duration;
        if idx + 1 < plan_durations.len() {
            running += gap_sec;
        }
    }
    (chapters, running)
}

pub struct Assembler<O: ObjectStore> {
    http: reqwest::Client,
    object_store: std::sync::Arc<O>,
}

impl<O: ObjectStore> Assembler<O> {
    pub fn new(http: reqwest::Client, object_store: std::sync::Arc<O>) -> Self {
        Self { http, object_store }
    }

    #[instrument(skip(self, clips, narrations, sources, config), fields(digest_id = %digest_id))]
    pub async fn assemble(
        &self,
        digest_id: DigestId,
        clips: &[DigestClip],
        narrations: &[NarrationAudio],
        sources: &HashMap<EpisodeId, EpisodeSource>,
        config: &DigestConfig,
    ) -> Result<AssemblyResult, String> {
        let scratch = tempfile::TempDir::new().map_err(|e| format!("scratch dir creation failed: {e}"))?;
        let result = self.assemble_in(scratch.path(), digest_id, clips, narrations, sources, config).await;
        // `scratch` drops here regardless of outcome, removing the directory.
        result
    }

    async fn assemble_in(
        &self,
        scratch: &Path,
        digest_id: DigestId,
        clips: &[DigestClip],
        narrations: &[NarrationAudio],
        sources: &HashMap<EpisodeId, EpisodeSource>,
        config: &DigestConfig,
    ) -> Result<AssemblyResult, String> {
        let mut sorted_clips = clips.to_vec();
        sorted_clips.sort_by_key(|c| c.position);

        // Step 1: source acquisition. Any failure fails the whole assembly
        //.
        let mut source_paths: HashMap<EpisodeId, PathBuf> = HashMap::new();
        for episode_id in sorted_clips.iter().map(|c| c.episode_id).collect::<std::collections::HashSet<_>>() {
            let source = sources
                .get(&episode_id)
                .ok_or_else(|| format!("no source registered for episode {episode_id}"))?;
            let dest = scratch.join(format!("source-{episode_id}.mp3"));
            self.stream_download(&source.audio_url, &dest).await?;
            source_paths.insert(episode_id, dest);
        }

        let mut narration_paths: HashMap<u32, PathBuf> = HashMap::new();
        for narration in narrations {
            let bytes = self
                .object_store
                .get(&narration.object_key)
                .await
                .map_err(|e| format!("narration fetch failed: {e}"))?;
            let dest = scratch.join(format!("narration-{}.mp3", narration.position));
            tokio::fs::write(&dest, bytes)
                .await
                .map_err(|e| format!("narration write failed: {e}"))?;
            narration_paths.insert(narration.position, dest);
        }

        // Step 2: clip extraction with fade-in/fade-out.
        let mut clip_paths = Vec::with_capacity(sorted_clips.len());
        for clip in &sorted_clips {
            let source = source_paths
                .get(&clip.episode_id)
                .ok_or_else(|| format!("missing downloaded source for episode {}", clip.episode_id))?;
            let dest = scratch.join(format!("clip-{}.mp3", clip.position));
            let duration = clip.duration_sec();
            let fade_out_start = (duration - CLIP_FADE_OUT_SEC).max(0.0);
            let filter = format!(
                "afade=t=in:st=0:d={CLIP_FADE_IN_SEC},afade=t=out:st={fade_out_start}:d={CLIP_FADE_OUT_SEC}"
            );
            self.run_ffmpeg(&[
                "-y".into(),
                "-ss".into(),
                clip.start_sec.to_string(),
                "-to".into(),
                clip.end_sec.to_string(),
                "-i".into(),
                source.to_string_lossy().into_owned(),
                "-af".into(),
                filter,
                dest.to_string_lossy().into_owned(),
            ])
            .await
            .map_err(|e| format!("clip extraction failed for position {}: {e}", clip.position))?;
            clip_paths.push(dest);
        }

        // Steps 3-4: sequencing and concatenation.
        let mut sorted_narrations: Vec<&NarrationAudio> = narrations.iter().collect();
        sorted_narrations.sort_by_key(|n| n.position);
        let gap = gap_seconds(config.transition_style);
        let gap_file = self.render_gap(scratch, config.transition_style).await?;

        let mut sequence: Vec<PathBuf> = Vec::new();
        if let Some(intro) = sorted_narrations.first() {
            sequence.push(narration_paths[&intro.position].clone());
        }
        for (i, clip_path) in clip_paths.iter().enumerate() {
            if let Some(transition) = sorted_narrations.get(i + 1) {
                sequence.push(narration_paths[&transition.position].clone());
            }
            sequence.push(clip_path.clone());
        }
        if sorted_narrations.len() > 1 {
            if let Some(outro) = sorted_narrations.last() {
                sequence.push(narration_paths[&outro.position].clone());
            }
        }

        let concat_list_path = scratch.join("concat.txt");
        let mut concat_list = String::new();
        for (i, path) in sequence.iter().enumerate() {
            concat_list.push_str(&format!("file '{}'\n", path.display()));
            if i + 1 < sequence.len() {
                concat_list.push_str(&format!("file '{}'\n", gap_file.display()));
            }
        }
        tokio::fs::write(&concat_list_path, concat_list)
            .await
            .map_err(|e| format!("concat list write failed: {e}"))?;

        let concatenated = scratch.join("concatenated.mp3");
        self.run_ffmpeg(&[
            "-y".into(),
            "-f".into(),
            "concat".into(),
            "-safe".into(),
            "0".into(),
            "-i".into(),
            concat_list_path.to_string_lossy().into_owned(),
            "-c".into(),
            "copy".into(),
            concatenated.to_string_lossy().into_owned(),
        ])
        .await
        .map_err(|e| format!("concatenation failed: {e}"))?;

        // Step 5: two-pass loudness normalization.
        let normalized = scratch.join("normalized.mp3");
        self.normalize_loudness(&concatenated, &normalized, digest_id).await?;

        // Step 6: chapters, analytically then clamped to probed duration.
        let plan = build_segment_plan(&sorted_clips, narrations, &episode_titles(sources));
        let plan_durations: Vec<(f64, Option<String>)> =
            plan.into_iter().map(|s| (s.duration_sec, s.chapter)).collect();
        let (mut chapters, _analytical_total) = compute_chapters(&plan_durations, gap);

        let probed_duration = self.probe_duration(&normalized).await?;
        if let Some(last) = chapters.last_mut() {
            last.end_sec = last.end_sec.min(probed_duration);
        }

        // Step 7: tagging.
        let tagged = scratch.join("tagged.mp3");
        self.tag(&normalized, &tagged, digest_id).await?;

        // Step 8: upload.
        let bytes = tokio::fs::read(&tagged)
            .await
            .map_err(|e| format!("final read failed: {e}"))?;
        let object_key = format!("digests/{digest_id}/digest.mp3");
        self.object_store
            .put(&object_key, bytes, "audio/mpeg")
            .await
            .map_err(|e| format!("upload failed: {e}"))?;

        Ok(AssemblyResult {
            audio_object_key: object_key,
            total_duration_sec: probed_duration,
            chapters,
        })
    }

    async fn stream_download(&self, url: &str, dest: &Path) -> Result<(), String> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| format!("source fetch failed: {e}"))?;
        let mut file = tokio::fs::File::create(dest)
            .await
            .map_err(|e| format!("source file creation failed: {e}"))?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| format!("source stream error: {e}"))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| format!("source write failed: {e}"))?;
        }
        Ok(())
    }

    /// Render the inter-segment gap once per assembly: plain silence, or a
    /// 150ms-silence/300ms-tone/150ms-silence bumper for non-silence
    /// transition styles.
    async fn render_gap(&self, scratch: &Path, style: TransitionStyle) -> Result<PathBuf, String> {
        let dest = scratch.join("gap.mp3");
        match style {
            TransitionStyle::Silence => {
                self.run_ffmpeg(&[
                    "-y".into(),
                    "-f".into(),
                    "lavfi".into(),
                    "-i".into(),
                    "anullsrc=r=44100:cl=stereo".into(),
                    "-t".into(),
                    SILENCE_GAP_SEC.to_string(),
                    dest.to_string_lossy().into_owned(),
                ])
                .await?;
            }
            TransitionStyle::Stinger | TransitionStyle::SoftFade | TransitionStyle::Whoosh => {
                let silence = scratch.join("bumper-silence.mp3");
                let tone = scratch.join("bumper-tone.mp3");
                self.run_ffmpeg(&[
                    "-y".into(),
                    "-f".into(),
                    "lavfi".into(),
                    "-i".into(),
                    "anullsrc=r=44100:cl=stereo".into(),
                    "-t".into(),
                    "0.15".into(),
                    silence.to_string_lossy().into_owned(),
                ])
                .await?;
                self.run_ffmpeg(&[
                    "-y".into(),
                    "-f".into(),
                    "lavfi".into(),
                    "-i".into(),
                    "sine=frequency=880:duration=0.3".into(),
                    "-af".into(),
                    "vibrato=f=6:d=0.3".into(),
                    tone.to_string_lossy().into_owned(),
                ])
                .await?;
                let list = scratch.join("bumper-concat.txt");
                tokio::fs::write(
                    &list,
                    format!(
                        "file '{}'\nfile '{}'\nfile '{}'\n",
                        silence.display(),
                        tone.display(),
                        silence.display()
                    ),
                )
                .await
                .map_err(|e| format!("bumper concat list write failed: {e}"))?;
                self.run_ffmpeg(&[
                    "-y".into(),
                    "-f".into(),
                    "concat".into(),
                    "-safe".into(),
                    "0".into(),
                    "-i".into(),
                    list.to_string_lossy().into_owned(),
                    "-c".into(),
                    "copy".into(),
                    dest.to_string_lossy().into_owned(),
                ])
                .await?;
            }
        }
        Ok(dest)
    }

    async fn normalize_loudness(&self, input: &Path, output: &Path, digest_id: DigestId) -> Result<(), String> {
        let measure_filter = format!(
            "loudnorm=I={TARGET_LOUDNESS_LUFS}:TP={TARGET_TRUE_PEAK_DBTP}:LRA={TARGET_LOUDNESS_RANGE_LU}:print_format=json"
        );
        let stderr = self
            .run_ffmpeg_capture_stderr(&[
                "-i".into(),
                input.to_string_lossy().into_owned(),
                "-af".into(),
                measure_filter,
                "-f".into(),
                "null".into(),
                "-".into(),
            ])
            .await
            .map_err(|e| format!("loudness measurement pass failed: {e}"))?;

        let measured = parse_loudnorm_json(&stderr).unwrap_or_else(|| {
            warn!(digest_id = %digest_id, "loudnorm measurement JSON not found, using defaults");
            LoudnormMeasurement::default()
        });

        let correction_filter = format!(
            "loudnorm=I={TARGET_LOUDNESS_LUFS}:TP={TARGET_TRUE_PEAK_DBTP}:LRA={TARGET_LOUDNESS_RANGE_LU}:\
             measured_I={mi}:measured_TP={mtp}:measured_LRA={mlra}:measured_thresh={mt}:offset={off}:linear=true",
            mi = measured.input_i,
            mtp = measured.input_tp,
            mlra = measured.input_lra,
            mt = measured.input_thresh,
            off = measured.target_offset,
        );
        self.run_ffmpeg(&[
            "-y".into(),
            "-i".into(),
            input.to_string_lossy().into_owned(),
            "-af".into(),
            correction_filter,
            "-ar".into(),
            "44100".into(),
            "-ac".into(),
            "2".into(),
            "-b:a".into(),
            "160k".into(),
            output.to_string_lossy().into_owned(),
        ])
        .await
        .map_err(|e| format!("loudness correction pass failed: {e}"))
    }

    async fn tag(&self, input: &Path, output: &Path, digest_id: DigestId) -> Result<(), String> {
        let year = chrono::Utc::now().format("%Y").to_string();
        self.run_ffmpeg(&[
            "-y".into(),
            "-i".into(),
            input.to_string_lossy().into_owned(),
            "-c".into(),
            "copy".into(),
            "-metadata".into(),
            format!("title=PodDigest {digest_id}"),
            "-metadata".into(),
            "artist=PodDigest".into(),
            "-metadata".into(),
            "album=Weekly Digest".into(),
            "-metadata".into(),
            "genre=Podcast".into(),
            "-metadata".into(),
            format!("date={year}"),
            output.to_string_lossy().into_owned(),
        ])
        .await
        .map_err(|e| format!("tagging failed: {e}"))
    }

    async fn probe_duration(&self, path: &Path) -> Result<f64, String> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                &path.to_string_lossy(),
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();
        let output = tokio::time::timeout(FFMPEG_TIMEOUT, output)
            .await
            .map_err(|_| "ffprobe timed out".to_string())?
            .map_err(|e| format!("ffprobe spawn failed: {e}"))?;
        if !output.status.success() {
            return Err(format!(
                "ffprobe exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            ));
        }
        let parsed: serde_json::Value =
            serde_json::from_slice(&output.stdout).map_err(|e| format!("ffprobe JSON parse failed: {e}"))?;
        parsed["format"]["duration"]
            .as_str()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| "ffprobe output missing format.duration".to_string())
    }

    async fn run_ffmpeg(&self, args: &[String]) -> Result<(), String> {
        self.run_ffmpeg_capture_stderr(args).await.map(|_| ())
    }

    async fn run_ffmpeg_capture_stderr(&self, args: &[String]) -> Result<String, String> {
        let output = Command::new("ffmpeg")
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output();
        let output = tokio::time::timeout(FFMPEG_TIMEOUT, output)
            .await
            .map_err(|_| "ffmpeg timed out".to_string())?
            .map_err(|e| format!("ffmpeg spawn failed: {e}"))?;
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            return Err(format!("ffmpeg exited with {}: {stderr}", output.status));
        }
        Ok(stderr)
    }
}

fn episode_titles(sources: &HashMap<EpisodeId, EpisodeSource>) -> HashMap<EpisodeId, (String, String)> {
    sources
        .iter()
        .map(|(id, s)| (*id, (s.podcast_title.clone(), s.episode_title.clone())))
        .collect()
}

#[derive(Debug, Default)]
struct LoudnormMeasurement {
    input_i: String,
    input_tp: String,
    input_lra: String,
    input_thresh: String,
    target_offset: String,
}

/// `ffmpeg`'s `loudnorm` filter prints one JSON object to stderr; pull it
/// out of whatever surrounding log lines accompany it.
fn parse_loudnorm_json(stderr: &str) -> Option<LoudnormMeasurement> {
    let start = stderr.find('{')?;
    let end = stderr.rfind('}')?;
    let json_str = &stderr[start..=end];
    let value: serde_json::Value = serde_json::from_str(json_str).ok()?;
    Some(LoudnormMeasurement {
        input_i: value["input_i"].as_str()?.to_string(),
        input_tp: value["input_tp"].as_str()?.to_string(),
        input_lra: value["input_lra"].as_str()?.to_string(),
        input_thresh: value["input_thresh"].as_str()?.to_string(),
        target_offset: value["target_offset"].as_str()?.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chapter_title_passes_through_short_strings() {
        assert_eq!(chapter_title("Show", "Episode 1"), "Show: Episode 1");
    }

    #[test]
    fn chapter_title_truncates_with_ellipsis_at_80_chars() {
        let long_podcast = "A".repeat(100);
        let title = chapter_title(&long_podcast, "Episode");
        assert_eq!(title.chars().count(), 80);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn gap_seconds_matches_transition_style_table() {
        assert_eq!(gap_seconds(TransitionStyle::Silence), 0.5);
        assert_eq!(gap_seconds(TransitionStyle::Stinger), 0.6);
        assert_eq!(gap_seconds(TransitionStyle::SoftFade), 0.6);
        assert_eq!(gap_seconds(TransitionStyle::Whoosh), 0.6);
    }

    #[test]
    fn chapter_fidelity_matches_scenario_6() {
        // intro 20, t1 30, clip1 300, t2 28, clip2 240, t3 32, clip3 180, outro 18
        let plan = vec![
            (20.0, None),
            (30.0, None),
            (300.0, Some("a".to_string())),
            (28.0, None),
            (240.0, Some("b".to_string())),
            (32.0, None),
            (180.0, Some("c".to_string())),
            (18.0, None),
        ];
        let (chapters, total) = compute_chapters(&plan, 0.6);
        assert!((total - 852.2).abs() < 1e-9);
        assert_eq!(chapters.len(), 3);
        assert!((chapters[0].start_sec - 51.2).abs() < 1e-9);
    }

    #[test]
    fn parses_loudnorm_json_out_of_surrounding_log_noise() {
        let stderr = "some ffmpeg log line\n{\"input_i\":\"-23.00\",\"input_tp\":\"-5.00\",\"input_lra\":\"4.00\",\"input_thresh\":\"-33.00\",\"target_offset\":\"0.50\"}\nmore log";
        let parsed = parse_loudnorm_json(stderr).unwrap();
        assert_eq!(parsed.input_i, "-23.00");
    }
}
