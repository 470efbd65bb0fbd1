//! Serializable per-frame summary.

use crate::session::{FrameOutcome, SkipReason, TrackingSession};
use board_tracker_pose::PoseData;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Skipped,
    Estimated,
    Failed,
}

/// What happened on one frame, for JSON-lines output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameReport {
    pub frame: usize,
    pub outcome: OutcomeKind,
    /// Skip or failure reason in human-readable form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub marker_ids: Vec<u32>,
    pub corner_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose: Option<PoseData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rms_px: Option<f64>,
}

impl FrameReport {
    pub fn new(frame: usize, outcome: &FrameOutcome, session: Option<&TrackingSession>) -> Self {
        let (kind, reason, pose) = match outcome {
            FrameOutcome::Skipped(r) => (OutcomeKind::Skipped, Some(skip_text(r)), None),
            FrameOutcome::Estimated(p) => (OutcomeKind::Estimated, None, Some(*p)),
            FrameOutcome::Failed(r) => (OutcomeKind::Failed, Some(r.to_string()), None),
        };
        let (marker_ids, corner_count) = session
            .map(|s| (s.markers().ids().to_vec(), s.corners().len()))
            .unwrap_or_default();
        let rms_px = pose.and(session.and_then(|s| s.last_rms()));
        Self {
            frame,
            outcome: kind,
            reason,
            marker_ids,
            corner_count,
            pose,
            rms_px,
        }
    }
}

fn skip_text(reason: &SkipReason) -> String {
    match reason {
        SkipReason::NotReady => "not ready".to_string(),
        SkipReason::NoFrame => "no frame".to_string(),
        SkipReason::NoMarkers => "no markers".to_string(),
        SkipReason::TooFewBoardCorners { found } => format!("too few board corners ({found})"),
    }
}
