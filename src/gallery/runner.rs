use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, error, info};
use thiserror::Error;

use crate::gallery::archive::{SevenZip, Target, TargetError, TargetKind};
use crate::gallery::config::{ArchiveTypeConfig, Config};
use crate::gallery::delay::DelayScheduler;
use crate::gallery::discovery;
use crate::gallery::lookup::{self, GalleryIdentifier, LookupError, RequestSender, MAX_API_RESULTS};
use crate::gallery::metadata::GalleryMetadata;
use crate::gallery::priority::{self, Candidate, PriorityScore};
use crate::gallery::search::{self, SearchMatch, SearchOrchestrator};

/// Delay channel shared by all metadata API calls.
pub const API_CHANNEL: &str = "api";

/// Why one target produced no metadata record. Contained at the target
/// boundary; never aborts the run.
#[derive(Error, Debug)]
enum TargetFailure {
    #[error("no archive configuration for target type: {0}")]
    MissingTypeConfig(TargetKind),

    #[error("failed to find any results")]
    NoResults,

    #[error("failed to get info for results")]
    NoMetadata,

    #[error("all results were filtered out")]
    AllBlacklisted,

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Target(#[from] TargetError),
}

/// Drives the whole matching workflow: discovery, then one target at a time
/// through search, metadata fetch, scoring and the metadata write chain.
pub struct Runner {
    config: Config,
    sender: RequestSender,
    scheduler: Arc<DelayScheduler>,
    site: &'static str,
    backend: SevenZip,
}

impl Runner {
    /// A non-empty exhentai cookie string switches the run to the member
    /// site; otherwise the public site is used.
    pub fn new(config: Config, ex_cookie_string: Option<String>) -> anyhow::Result<Self> {
        let cookie_string = ex_cookie_string
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let site = if cookie_string.is_some() {
            lookup::MEMBER_SITE
        } else {
            lookup::PUBLIC_SITE
        };
        let sender = RequestSender::new(&lookup::build_cookie_header(cookie_string.as_deref()))?;
        let backend = SevenZip::new(&config.general.seven_zip_commands);
        Ok(Self {
            config,
            sender,
            scheduler: DelayScheduler::new(),
            site,
            backend,
        })
    }

    /// Processes every discovered target, then drains outstanding delay
    /// gates so the process does not exit mid-throttle. Returns the process
    /// exit code.
    pub async fn run(&self, inputs: &[PathBuf]) -> i32 {
        let code = self.run_targets(inputs).await;

        if !self.config.lookup.delay.skip_on_completion
            && !self.scheduler.incomplete_channels().is_empty()
        {
            info!("Waiting for all delays to complete...");
            self.scheduler.wait_for_all().await;
        }
        code
    }

    async fn run_targets(&self, inputs: &[PathBuf]) -> i32 {
        let targets = discovery::discover_targets(inputs, &self.config.scanning, &self.backend);
        if targets.is_empty() {
            info!("No targets found");
        }

        let mut any_failed = false;
        for mut target in targets {
            info!(
                "Processing {}: {}...",
                target.kind(),
                target.source_path().display()
            );
            if let Err(e) = self.process(&mut target).await {
                error!("{e}");
                any_failed = true;
            }
        }
        if any_failed {
            1
        } else {
            0
        }
    }

    async fn process(&self, target: &mut Target) -> Result<(), TargetFailure> {
        let Some(type_config) = self.config.archive.for_kind(target.kind()) else {
            return Err(TargetFailure::MissingTypeConfig(target.kind()));
        };

        if self.should_skip(target, type_config).await? {
            return Ok(());
        }

        let images = {
            let files = target.files().await?;
            search::select_images(
                files,
                &self.config.scanning.image_file_extensions,
                type_config.preferred_image_order.as_deref(),
            )
        };

        let orchestrator = SearchOrchestrator {
            sender: &self.sender,
            scheduler: &self.scheduler,
            site: self.site,
            search_expunged: self.config.lookup.search_expunged,
            search_covers_only: self.config.lookup.search_covers_only,
            search_delay: self.config.lookup.delay.gallery_search,
        };
        let matches = orchestrator
            .search_target(target, &images, type_config)
            .await?;
        if matches.is_empty() {
            return Err(TargetFailure::NoResults);
        }

        info!("Found {} results", matches.len());
        for m in &matches {
            debug!("{} matches={}", m.identifier.url(self.site), m.match_count);
        }

        let mut candidates = self.fetch_candidates(matches).await?;
        if candidates.is_empty() {
            return Err(TargetFailure::NoMetadata);
        }

        priority::score_candidates(
            &mut candidates,
            &self.config.lookup.priorities,
            images.len(),
            target.is_partial(),
        );
        for c in &candidates {
            debug!(
                "{} info: priority={}; blacklist={}",
                c.identifier.url(self.site),
                c.priority.total,
                c.priority.blacklist
            );
        }

        let Some(best) = priority::select_best(candidates) else {
            return Err(TargetFailure::AllBlacklisted);
        };
        info!("Best match: {}", best.identifier.url(self.site));

        self.write_metadata(target, type_config, &best.metadata).await;
        Ok(())
    }

    async fn should_skip(
        &self,
        target: &mut Target,
        type_config: &ArchiveTypeConfig,
    ) -> Result<bool, TargetFailure> {
        if let Some((file, _)) = target
            .find_existing_file_in_archive(&type_config.skip_if_file_exists_in_archive)
            .await?
        {
            info!("Skipped because {file} already exists inside archive");
            return Ok(true);
        }
        if let Some((file, _)) =
            target.find_existing_file_in_folder(&type_config.skip_if_file_exists_in_folder)
        {
            info!("Skipped because {file} already exists inside folder");
            return Ok(true);
        }
        if let Some((file, _)) = target
            .find_existing_file_in_parent_folder(&type_config.skip_if_file_exists_in_parent_folder)
        {
            info!("Skipped because {file} already exists inside parent folder");
            return Ok(true);
        }
        Ok(false)
    }

    /// Fetches metadata for the strongest matches in protocol-sized batches
    /// over the api channel. Per-entry fetch errors drop only that
    /// candidate.
    async fn fetch_candidates(
        &self,
        matches: Vec<SearchMatch>,
    ) -> Result<Vec<Candidate>, TargetFailure> {
        let ranked = rank_and_cap_matches(matches, self.config.lookup.maximum_results_to_check);
        let api_delay = self.config.lookup.delay.api_call;

        let mut candidates = Vec::with_capacity(ranked.len());
        for batch in ranked.chunks(MAX_API_RESULTS) {
            let identifiers: Vec<GalleryIdentifier> =
                batch.iter().map(|(_, m)| m.identifier.clone()).collect();

            self.scheduler.wait_for_delay(API_CHANNEL).await;
            let results = self.sender.fetch_metadata(self.site, &identifiers).await?;
            self.scheduler.set_delay(API_CHANNEL, api_delay);

            for ((rank, m), result) in batch.iter().zip(results) {
                match result {
                    Ok(metadata) => candidates.push(Candidate {
                        identifier: m.identifier.clone(),
                        match_count: m.match_count,
                        rank: *rank,
                        metadata,
                        priority: PriorityScore::default(),
                    }),
                    Err(e) => error!("{e}"),
                }
            }
        }
        Ok(candidates)
    }

    /// Writes the metadata record to each configured destination. A missing
    /// pattern skips its destination; only the in-archive failure has a
    /// dedicated fallback, and no failure stops the remaining attempts.
    async fn write_metadata(
        &self,
        target: &Target,
        type_config: &ArchiveTypeConfig,
        metadata: &GalleryMetadata,
    ) {
        let record = metadata.to_record_json();
        let content = record.as_bytes();

        let stored = self
            .try_write_to_target(
                target,
                type_config.metadata_file_name_in_archive.as_deref(),
                content,
            )
            .await;
        if !stored {
            self.try_write_to_directory(
                target,
                target.dir_path(),
                type_config.metadata_file_name_in_folder_on_failure.as_deref(),
                content,
            );
        }

        self.try_write_to_directory(
            target,
            target.dir_path(),
            type_config.metadata_file_name_in_folder.as_deref(),
            content,
        );

        let parent = target.dir_path().parent().unwrap_or(Path::new(""));
        self.try_write_to_directory(
            target,
            parent,
            type_config.metadata_file_name_in_parent_folder.as_deref(),
            content,
        );
    }

    async fn try_write_to_target(
        &self,
        target: &Target,
        pattern: Option<&str>,
        content: &[u8],
    ) -> bool {
        let Some(pattern) = pattern else {
            // No pattern configured: nothing to do, and no fallback either.
            return true;
        };
        let name = target.file_name_format(pattern);
        match target.write_file(&name, content).await {
            Ok(()) => {
                info!("Successfully added metadata to archive: {name}");
                true
            }
            Err(e) => {
                error!("Failed to add metadata to archive: {name}: {e}");
                false
            }
        }
    }

    fn try_write_to_directory(
        &self,
        target: &Target,
        directory: &Path,
        pattern: Option<&str>,
        content: &[u8],
    ) -> bool {
        let Some(pattern) = pattern else {
            return true;
        };
        let name = target.file_name_format(pattern);
        let path = directory.join(&name);
        let display = path
            .strip_prefix(target.dir_path())
            .unwrap_or(&path)
            .display()
            .to_string();
        match fs::write(&path, content) {
            Ok(()) => {
                info!("Successfully added metadata: {display}");
                true
            }
            Err(e) => {
                error!("Failed to add metadata: {display}: {e}");
                false
            }
        }
    }
}

/// Orders matches by descending match count (stable on aggregation order)
/// and caps them to the fetch limit, keeping each match's original rank.
fn rank_and_cap_matches(matches: Vec<SearchMatch>, max: usize) -> Vec<(usize, SearchMatch)> {
    let mut ranked: Vec<(usize, SearchMatch)> = matches.into_iter().enumerate().collect();
    ranked.sort_by(|a, b| b.1.match_count.cmp(&a.1.match_count).then(a.0.cmp(&b.0)));
    ranked.truncate(max.max(1));
    ranked
}
