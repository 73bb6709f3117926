// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Camera flavour session dispatch.
//!
//! Camera has no fingerprint and no node-wide single-flight registry: the
//! reuse cache lives one per session, seeded and grown across the snapshots
//! of one sliding-window trial. Every request is therefore staged directly
//! (§4's "always camera" bulk-input rule) and no claim is ever contended.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ecn_cache::{CameraCache, Rect};
use ecn_name::StagingKind;
use ecn_staging::{rows_per_packet_camera, stage, StagingRequest};
use ecn_transport::Face;
use ecn_workloads::{DetectionRegion, FaceDetector};
use tokio::sync::{Mutex, RwLock};

use crate::core::{PollOutcome, SessionCore};

const CAMERA_STAGE_LIFETIME: Duration = Duration::from_secs(2);

struct CameraSession {
    core: SessionCore,
    cache: Mutex<CameraCache>,
    snapshot_indices: Mutex<HashMap<u64, u32>>,
}

impl CameraSession {
    fn new() -> Self {
        Self {
            core: SessionCore::new(),
            cache: Mutex::new(CameraCache::new()),
            snapshot_indices: Mutex::new(HashMap::new()),
        }
    }
}

/// Dispatches `detectfaces` requests for one CN instance.
pub struct CameraNode {
    detector: Arc<dyn FaceDetector>,
    face: Arc<dyn Face>,
    sessions: RwLock<HashMap<u64, Arc<CameraSession>>>,
    stage_deadline: Duration,
}

impl CameraNode {
    /// Build a node that detects faces with `detector` and pulls snapshot
    /// bytes back from requesters over `face`.
    pub fn new(detector: Arc<dyn FaceDetector>, face: Arc<dyn Face>, stage_deadline: Duration) -> Self {
        Self {
            detector,
            face,
            sessions: RwLock::new(HashMap::new()),
            stage_deadline,
        }
    }

    async fn session_for(&self, requester_id: u64) -> (Arc<CameraSession>, bool) {
        if let Some(session) = self.sessions.read().await.get(&requester_id) {
            let is_idle = session.core.is_idle().await;
            return (session.clone(), is_idle);
        }
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(requester_id)
            .or_insert_with(|| Arc::new(CameraSession::new()))
            .clone();
        let is_idle = session.core.is_idle().await;
        (session, is_idle)
    }

    /// Handle one interest for `requester_id`. Returns the reply payload —
    /// a CTT estimate while a worker is in flight, or the decimal face
    /// count once detection for this snapshot is ready.
    pub async fn handle_request(
        &self,
        requester_id: u64,
        overlap: f64,
        height: u32,
        width: u32,
        first: bool,
    ) -> String {
        let (session, is_idle) = self.session_for(requester_id).await;
        if !is_idle {
            return match session.core.poll().await {
                PollOutcome::Computing(ctt) | PollOutcome::Ready(ctt) => ctt,
            };
        }

        let reply = session.core.start(false).await;
        let detector = self.detector.clone();
        let face = self.face.clone();
        let stage_deadline = self.stage_deadline;

        tokio::spawn(async move {
            let snapshot = match stage(
                face,
                StagingRequest {
                    requester_id,
                    kind: StagingKind::DetectFaces,
                    total_rows: height,
                    rows_per_packet: rows_per_packet_camera(width),
                    lifetime: CAMERA_STAGE_LIFETIME,
                    stage_deadline: Some(stage_deadline),
                },
            )
            .await
            {
                Ok(bytes) => bytes,
                Err(err) => {
                    session.core.finish(format!("error: {err}")).await;
                    return;
                }
            };

            let count = detect_cycle(&session, &detector, &snapshot, overlap, height, width, first).await;
            session.core.finish(count.to_string()).await;
        });

        reply
    }
}

async fn detect_cycle(
    session: &CameraSession,
    detector: &Arc<dyn FaceDetector>,
    snapshot: &[u8],
    overlap: f64,
    height: u32,
    width: u32,
    first: bool,
) -> usize {
    if first {
        session.cache.lock().await.invalidate(overlap);
        session.snapshot_indices.lock().await.insert(overlap.to_bits(), 0);
    }

    let snapshot_index = {
        let mut indices = session.snapshot_indices.lock().await;
        let index = indices.entry(overlap.to_bits()).or_insert(0);
        *index += 1;
        *index
    };

    let move_px = (f64::from(width) * (1.0 - overlap)).ceil() as u32;
    let bootstrap = session.cache.lock().await.is_empty(overlap);

    let region = if bootstrap {
        DetectionRegion { x0: 0, y0: 0, x1: i64::from(width), y1: i64::from(height) }
    } else {
        DetectionRegion {
            x0: i64::from(width - move_px),
            y0: 0,
            x1: i64::from(width),
            y1: i64::from(height),
        }
    };

    let shift = i64::from(snapshot_index - 1) * i64::from(move_px);
    let recovered = if bootstrap {
        Vec::new()
    } else {
        session.cache.lock().await.recover(overlap, shift)
    };

    let detected = detector.detect(snapshot, region).await;
    let translated: Vec<Rect> = detected.into_iter().map(|r| r.translated(shift, 0)).collect();

    let new_count = translated.len();
    session.cache.lock().await.insert_all(overlap, translated);

    new_count + recovered.len()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use ecn_transport::{Data, Interest, LoopbackFace};
    use ecn_workloads::DeterministicFaceDetector;
    use std::time::Duration as StdDuration;

    fn publish_snapshot_responder(face: &Arc<LoopbackFace>, snapshot: Vec<u8>, width: usize) {
        let producer = face.clone();
        let face = face.clone();
        tokio::spawn(async move {
            face.publish_interest_filter(
                "/edge-compute/requester",
                Arc::new(move |interest: Interest| {
                    let producer = producer.clone();
                    let snapshot = snapshot.clone();
                    let name = interest.name.clone();
                    tokio::spawn(async move {
                        let parsed = ecn_name::parse_staging(&name).expect("valid staging name");
                        let len = snapshot.len();
                        let begin = (parsed.begin as usize * width).min(len);
                        let end = (parsed.end as usize * width).min(len);
                        let content = snapshot[begin..end].to_vec();
                        let _ = producer
                            .put_data(Data { name, content, freshness: StdDuration::from_secs(1) })
                            .await;
                    });
                }),
            )
            .await
            .expect("register filter");
        });
    }

    async fn poll_until_ready(node: &CameraNode, requester_id: u64, overlap: f64, h: u32, w: u32, first: bool) -> String {
        loop {
            let reply = node.handle_request(requester_id, overlap, h, w, first).await;
            if !reply.starts_with("CTT") {
                return reply;
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn bootstrap_snapshot_seeds_cache_and_reports_full_frame_detections() {
        let face = Arc::new(LoopbackFace::new());
        publish_snapshot_responder(&face, vec![7u8; 100 * 30], 100);
        tokio::time::sleep(StdDuration::from_millis(10)).await;

        let node = CameraNode::new(
            Arc::new(DeterministicFaceDetector),
            face,
            StdDuration::from_secs(2),
        );
        let first = node.handle_request(1, 0.5, 30, 100, true).await;
        assert!(first.starts_with("CTT: "));
        let reply = poll_until_ready(&node, 1, 0.5, 30, 100, true).await;
        let count: usize = reply.parse().expect("decimal face count");
        assert!(count <= 1);
    }

    #[tokio::test]
    async fn subsequent_snapshot_only_scans_non_overlap_strip_and_recovers_prior() {
        let face = Arc::new(LoopbackFace::new());
        publish_snapshot_responder(&face, vec![9u8; 100 * 30], 100);
        tokio::time::sleep(StdDuration::from_millis(10)).await;

        let node = CameraNode::new(
            Arc::new(DeterministicFaceDetector),
            face,
            StdDuration::from_secs(2),
        );
        poll_until_ready(&node, 2, 0.5, 30, 100, true).await;
        let reply = poll_until_ready(&node, 2, 0.5, 30, 100, false).await;
        assert!(reply.parse::<usize>().is_ok());
    }

    #[tokio::test]
    async fn first_flag_resets_cache_for_that_overlap_only() {
        let face = Arc::new(LoopbackFace::new());
        publish_snapshot_responder(&face, vec![3u8; 100 * 30], 100);
        tokio::time::sleep(StdDuration::from_millis(10)).await;

        let node = CameraNode::new(
            Arc::new(DeterministicFaceDetector),
            face,
            StdDuration::from_secs(2),
        );
        poll_until_ready(&node, 3, 0.5, 30, 100, true).await;
        poll_until_ready(&node, 3, 0.5, 30, 100, false).await;

        let (session, _) = node.session_for(3).await;
        assert!(!session.cache.lock().await.is_empty(0.5));

        poll_until_ready(&node, 3, 0.5, 30, 100, true).await;
        let indices = session.snapshot_indices.lock().await;
        assert_eq!(*indices.get(&0.5f64.to_bits()).unwrap(), 1);
    }
}
