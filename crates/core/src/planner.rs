use std::collections::HashSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cancel::{is_cancelled, CancellationToken};
use crate::error::{EngineError, Outcome, Result};
use crate::inventory::Inventory;
use crate::model::{DuplicateGroup, MediaFile, PlanAction, PlanDraft, PlanScope};

pub const DUPLICATE_REASON: &str = "Duplicate of better quality file";

const PLAN_BATCH: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PlanSummary {
    pub total_plans: u64,
    pub delete_plans: u64,
    pub move_plans: u64,
    pub rename_plans: u64,
    pub space_to_reclaim: u64,
    pub files_to_process: u64,
    pub duplicate_groups: u64,
    #[serde(default)]
    pub manual_review: Vec<ManualReviewItem>,
}

impl PlanSummary {
    fn count(&mut self, action: PlanAction, size_bytes: u64) {
        self.total_plans += 1;
        self.files_to_process += 1;
        match action {
            PlanAction::Delete => {
                self.delete_plans += 1;
                self.space_to_reclaim += size_bytes;
            }
            PlanAction::Move => self.move_plans += 1,
            PlanAction::Rename => self.rename_plans += 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ManualReviewItem {
    pub path: PathBuf,
    pub issues: Vec<String>,
}

pub fn generate_plans(
    inventory: &Inventory,
    cancel: Option<&CancellationToken>,
) -> Outcome<PlanSummary> {
    let mut summary = PlanSummary::default();

    if let Err(err) = inventory.clear_pending(PlanScope::Duplicates) {
        return Outcome::partial(summary, err);
    }

    let groups = match inventory
        .find_duplicate_movies()
        .and_then(|movies| Ok((movies, inventory.find_duplicate_episodes()?)))
    {
        Ok((movies, episodes)) => movies.into_iter().chain(episodes).collect::<Vec<_>>(),
        Err(err) => return Outcome::partial(summary, err),
    };

    let mut planned_paths = HashSet::new();
    let mut batch = Vec::new();
    for group in &groups {
        if is_cancelled(cancel) {
            if let Err(err) = flush(inventory, &mut batch, &mut summary) {
                return Outcome::partial(summary, err);
            }
            warn!(
                inserted = summary.total_plans,
                "plan generation cancelled; keeping plans already written"
            );
            return Outcome::partial(summary, EngineError::Cancelled);
        }

        summary.duplicate_groups += 1;
        for file in &group.inferior {
            batch.push(delete_draft(group, file));
            planned_paths.insert(file.path.clone());
        }
        if batch.len() >= PLAN_BATCH {
            if let Err(err) = flush(inventory, &mut batch, &mut summary) {
                return Outcome::partial(summary, err);
            }
        }
    }
    if let Err(err) = flush(inventory, &mut batch, &mut summary) {
        return Outcome::partial(summary, err);
    }

    match inventory.find_non_compliant_files() {
        Ok(files) => {
            summary.manual_review = files
                .into_iter()
                .filter(|file| !planned_paths.contains(&file.path))
                .map(|file| ManualReviewItem {
                    path: file.path,
                    issues: file.compliance_issues,
                })
                .collect();
        }
        Err(err) => return Outcome::partial(summary, err),
    }

    info!(
        plans = summary.total_plans,
        groups = summary.duplicate_groups,
        reclaim_bytes = summary.space_to_reclaim,
        manual_review = summary.manual_review.len(),
        "generated consolidation plans"
    );
    Outcome::complete(summary)
}

fn flush(
    inventory: &Inventory,
    batch: &mut Vec<PlanDraft>,
    summary: &mut PlanSummary,
) -> Result<()> {
    let counted = batch
        .iter()
        .map(|draft| (draft.action, draft.size_bytes))
        .collect::<Vec<_>>();
    inventory.insert_plans(std::mem::take(batch))?;
    for (action, size_bytes) in counted {
        summary.count(action, size_bytes);
    }
    Ok(())
}

fn delete_draft(group: &DuplicateGroup, file: &MediaFile) -> PlanDraft {
    let best = &group.best;
    PlanDraft {
        action: PlanAction::Delete,
        scope: PlanScope::Duplicates,
        media_type: Some(file.media_type),
        source_file_id: Some(file.id),
        source_path: file.path.clone(),
        target_path: None,
        target_root: None,
        size_bytes: file.size_bytes,
        reason: DUPLICATE_REASON.to_string(),
        reason_details: Some(format!(
            "Keeping: {} (score: {}, {} {})",
            best.path.display(),
            best.quality_score,
            best.quality.resolution.label(),
            best.quality.source.label()
        )),
    }
}

pub fn summarize_pending(inventory: &Inventory) -> Result<PlanSummary> {
    let mut summary = PlanSummary::default();
    for plan in inventory.pending_plans()? {
        summary.count(plan.action, plan.size_bytes);
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::{generate_plans, summarize_pending, DUPLICATE_REASON};
    use crate::cancel::CancellationToken;
    use crate::inventory::Inventory;
    use crate::model::{MediaFile, MediaType, PlanAction, PlanOutcome};
    use crate::quality::{QualityProfile, Resolution, SourceType};

    const MIB: u64 = 1024 * 1024;

    fn movie(path: &str, size: u64, score: i64, source: SourceType) -> MediaFile {
        MediaFile {
            normalized_title: "her".to_string(),
            year: Some(2013),
            quality: QualityProfile {
                resolution: Resolution::R1080p,
                source,
                ..QualityProfile::default()
            },
            quality_score: score,
            ..MediaFile::new(path, size, MediaType::Movie)
        }
    }

    fn seed_her(inventory: &Inventory) {
        inventory
            .upsert_file(movie(
                "/movies/Her (2013)/Her.WEB-DL.mkv",
                5_500 * MIB,
                105,
                SourceType::WebDl,
            ))
            .expect("web-dl");
        inventory
            .upsert_file(movie(
                "/archive/Her (2013)/Her.BluRay.mkv",
                9_800 * MIB,
                389,
                SourceType::BluRay,
            ))
            .expect("bluray");
    }

    #[test]
    fn deletes_the_inferior_copy_and_reports_reclaim() {
        let inventory = Inventory::in_memory();
        seed_her(&inventory);

        let summary = generate_plans(&inventory, None)
            .into_result()
            .expect("plans");
        assert_eq!(summary.delete_plans, 1);
        assert_eq!(summary.total_plans, 1);
        assert_eq!(summary.duplicate_groups, 1);
        assert_eq!(summary.space_to_reclaim, 5_500 * MIB);

        let plans = inventory.pending_plans().expect("pending");
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].action, PlanAction::Delete);
        assert_eq!(
            plans[0].source_path.to_str(),
            Some("/movies/Her (2013)/Her.WEB-DL.mkv")
        );
        assert_eq!(plans[0].reason, DUPLICATE_REASON);
        let details = plans[0].reason_details.as_deref().unwrap_or_default();
        assert!(details.contains("Her.BluRay.mkv"));
        assert!(details.contains("score: 389"));
    }

    #[test]
    fn replanning_is_idempotent_and_keeps_history() {
        let inventory = Inventory::in_memory();
        seed_her(&inventory);
        let mut episode_a = MediaFile {
            normalized_title: "silo".to_string(),
            year: Some(2023),
            season: Some(1),
            episode: Some(1),
            quality_score: 300,
            ..MediaFile::new("/lib1/Silo/S01E01.mkv", 100, MediaType::Episode)
        };
        inventory.upsert_file(episode_a.clone()).expect("episode a");
        episode_a.path = "/lib2/Silo/S01E01.mkv".into();
        episode_a.quality_score = 200;
        inventory.upsert_file(episode_a).expect("episode b");

        let first = generate_plans(&inventory, None).into_result().expect("first");
        let second = generate_plans(&inventory, None).into_result().expect("second");
        assert_eq!(first.total_plans, 2);
        assert_eq!(first, second);
        assert_eq!(inventory.pending_plans().expect("pending").len(), 2);

        let done = inventory.pending_plans().expect("pending")[0].id;
        inventory
            .transition_plan(done, PlanOutcome::Failed("disk gone".to_string()))
            .expect("fail");
        generate_plans(&inventory, None).into_result().expect("third");
        assert_eq!(inventory.pending_plans().expect("pending").len(), 2);
        assert_eq!(inventory.all_plans().expect("all").len(), 3);
        assert_eq!(summarize_pending(&inventory).expect("summary").delete_plans, 2);
    }

    #[test]
    fn non_compliant_files_go_to_manual_review() {
        let inventory = Inventory::in_memory();
        let mut file = movie("/movies/her.2013.mkv", 10, 100, SourceType::WebRip);
        file.is_compliant = false;
        file.compliance_issues = vec!["missing year folder".to_string()];
        inventory.upsert_file(file).expect("file");

        let summary = generate_plans(&inventory, None).into_result().expect("plans");
        assert_eq!(summary.total_plans, 0);
        assert_eq!(summary.manual_review.len(), 1);
        assert_eq!(summary.manual_review[0].issues, vec!["missing year folder"]);
    }

    #[test]
    fn cancellation_returns_partial_summary() {
        let inventory = Inventory::in_memory();
        seed_her(&inventory);
        let token = CancellationToken::new();
        token.cancel();

        let outcome = generate_plans(&inventory, Some(&token));
        assert_eq!(outcome.value.total_plans, 0);
        assert!(outcome.error.is_some_and(|err| err.is_cancellation()));
    }
}
