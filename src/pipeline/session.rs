// src/pipeline/session.rs
//
// Per-track frame pipeline. One Session per accepted video source; owns
// the history buffer, phase state, throttles, and feedback endpoint
// exclusively. Every received frame produces exactly one emitted frame
// with its pts and time base unchanged, in arrival order. Failures while
// computing angle, classifying, or indexing keypoints are contained at
// the frame boundary and degrade to "no state change this frame".

use crate::classifier::{argmax, SequenceClassifier};
use crate::detector::PoseDetector;
use crate::exercise::{ExerciseProfile, FEATURES_PER_FRAME};
use crate::geometry::joint_angle;
use crate::offload::DetectionPool;
use crate::overlay;
use crate::pipeline::feedback::FeedbackChannel;
use crate::pipeline::history::HistoryBuffer;
use crate::pipeline::metrics::PipelineMetrics;
use crate::pipeline::phase::{Phase, PhaseTracker};
use crate::pipeline::throttle::{ClassificationThrottle, DetectionThrottle};
use crate::transport::{VideoSink, VideoSource};
use crate::types::{
    ClassificationResult, FeedbackEvent, PipelineConfig, PoseDetection, SkeletonColor, VideoFrame,
};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub struct Session {
    profile: Arc<ExerciseProfile>,
    detector: Arc<dyn PoseDetector>,
    classifier: Box<dyn SequenceClassifier>,
    pool: DetectionPool,
    feedback: FeedbackChannel,
    metrics: PipelineMetrics,

    history: HistoryBuffer,
    phase: PhaseTracker,
    detection: DetectionThrottle,
    classification: ClassificationThrottle,
    frame_counter: u64,
    skeleton_color: SkeletonColor,
}

impl Session {
    pub fn new(
        profile: Arc<ExerciseProfile>,
        detector: Arc<dyn PoseDetector>,
        classifier: Box<dyn SequenceClassifier>,
        pool: DetectionPool,
        feedback: FeedbackChannel,
        metrics: PipelineMetrics,
        config: &PipelineConfig,
    ) -> Result<Self> {
        profile.check_classifier_width(classifier.output_width())?;
        Ok(Self {
            history: HistoryBuffer::new(profile.timesteps),
            phase: PhaseTracker::new(),
            detection: DetectionThrottle::new(config.detection_interval),
            classification: ClassificationThrottle::new(config.prediction_interval),
            frame_counter: 0,
            skeleton_color: SkeletonColor::Unfavorable,
            profile,
            detector,
            classifier,
            pool,
            feedback,
            metrics,
        })
    }

    pub fn frames_processed(&self) -> u64 {
        self.frame_counter
    }

    /// Process one frame end to end. Always returns a frame carrying the
    /// input's pts and time base.
    pub async fn process_frame(&mut self, frame: VideoFrame) -> VideoFrame {
        let index = self.frame_counter;
        self.frame_counter += 1;
        self.metrics.inc(&self.metrics.total_frames);

        if self.detection.should_detect(index) {
            self.run_live_detection(&frame).await;
        } else {
            self.metrics.inc(&self.metrics.cached_reuses);
        }

        let image = match self.detection.last_detection().cloned() {
            Some(detection) => {
                if let Err(err) = self.advance_state(&detection) {
                    warn!("Frame {}: state update failed: {:#}", index, err);
                    self.metrics.inc(&self.metrics.frame_errors);
                }
                let mut image = detection.annotated.clone();
                overlay::draw_skeleton(
                    &mut image,
                    &detection.observation.pixel,
                    &self.profile.interest_points,
                    self.skeleton_color.bgr(),
                );
                image
            }
            None => {
                if index % 30 == 0 {
                    debug!("Frame {}: no subject, plain passthrough", index);
                }
                overlay::resize_canonical(&frame.image)
            }
        };

        VideoFrame {
            image,
            pts: frame.pts,
            time_base: frame.time_base,
        }
    }

    /// Submit the pose-estimation call to the bounded pool and cache the
    /// outcome, subject or not. An executor or detector error keeps the
    /// previous cache entry.
    async fn run_live_detection(&mut self, frame: &VideoFrame) {
        let detector = self.detector.clone();
        let image = frame.image.clone();
        let started = Instant::now();

        match self.pool.run(move || detector.detect(&image)).await {
            Ok(result) => {
                self.metrics.set_timing(
                    &self.metrics.detection_time_us,
                    started.elapsed().as_micros() as u64,
                );
                self.metrics.inc(&self.metrics.live_detections);
                if result.is_none() {
                    self.metrics.inc(&self.metrics.empty_detections);
                }
                self.detection.store(result);
            }
            Err(err) => {
                warn!("Pose detection failed: {:#}", err);
                self.metrics.inc(&self.metrics.frame_errors);
            }
        }
    }

    /// Steps 5–6 of the per-frame contract: history, angle, phase, and
    /// the classification decision.
    fn advance_state(&mut self, detection: &PoseDetection) -> Result<()> {
        self.history
            .push(detection.observation.normalized.clone());

        let angle = self.triplet_angle(detection)?;
        let phase = Phase::from_angle(angle, &self.profile.thresholds);
        self.phase.observe(phase);
        if self.phase.changed() {
            self.classification.note_phase_change();
        }

        if self.classification.should_classify(self.history.is_full()) {
            let result = self.classify()?;
            self.skeleton_color = result.color;

            let accepted = self.feedback.publish(FeedbackEvent {
                error_text: result.error_text.clone(),
                correction_text: result.correction_text.clone(),
                confidence: result.confidence,
            });
            if accepted {
                self.metrics.inc(&self.metrics.feedback_published);
            } else {
                self.metrics.inc(&self.metrics.feedback_dropped);
            }

            debug!(
                "Classified '{}' (conf: {:.2})",
                result.label, result.confidence
            );
        }
        Ok(())
    }

    fn triplet_angle(&self, detection: &PoseDetection) -> Result<f32> {
        let points = &detection.observation.pixel;
        let [ia, ib, ic] = self.profile.angle_triplet;
        let a = *points.get(ia).context("angle joint a out of range")?;
        let b = *points.get(ib).context("angle joint b out of range")?;
        let c = *points.get(ic).context("angle joint c out of range")?;
        Ok(joint_angle(a, b, c))
    }

    fn classify(&mut self) -> Result<ClassificationResult> {
        let sequence = self.history.as_flat();
        let started = Instant::now();
        let probabilities =
            self.classifier
                .classify(&sequence, self.profile.timesteps, FEATURES_PER_FRAME)?;
        self.metrics.set_timing(
            &self.metrics.classification_time_us,
            started.elapsed().as_micros() as u64,
        );
        self.metrics.inc(&self.metrics.classifications);

        let (index, confidence) =
            argmax(&probabilities).context("classifier returned empty distribution")?;
        let label = self
            .profile
            .labels
            .get(index)
            .context("class index outside label set")?;

        Ok(ClassificationResult {
            label: label.label.clone(),
            confidence,
            color: if label.favorable {
                SkeletonColor::Favorable
            } else {
                SkeletonColor::Unfavorable
            },
            error_text: label.error_text.clone(),
            correction_text: label.correction_text.clone(),
        })
    }
}

/// Pump frames from the source through the session into the sink until the
/// track or the sink closes. Frames are processed and emitted strictly in
/// arrival order.
pub async fn run_track(
    mut session: Session,
    mut source: Box<dyn VideoSource>,
    mut sink: Box<dyn VideoSink>,
) {
    info!("Video track attached, pipeline running");
    while let Some(frame) = source.recv().await {
        let out = session.process_frame(frame).await;
        if let Err(err) = sink.send(out).await {
            debug!("Video sink closed: {:#}", err);
            break;
        }
    }
    info!(
        "Video track ended after {} frames",
        session.frames_processed()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exercise::{ExerciseRegistry, KEYPOINT_COUNT};
    use crate::pipeline::feedback;
    use crate::types::{FrameImage, KeypointObservation, TimeBase};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    /// Detector scripted with one entry per live invocation. `None`
    /// entries are the "no subject" outcome.
    struct ScriptedDetector {
        script: Mutex<Vec<Option<f32>>>, // angle per detection, in order
        calls: AtomicUsize,
    }

    impl ScriptedDetector {
        fn new(angles: Vec<Option<f32>>) -> Self {
            let mut script = angles;
            script.reverse(); // pop() yields in original order
            Self {
                script: Mutex::new(script),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl PoseDetector for ScriptedDetector {
        fn detect(&self, _image: &FrameImage) -> Result<Option<PoseDetection>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop().flatten();
            Ok(next.map(detection_with_angle))
        }
    }

    /// Keypoints whose [5, 11, 13] triplet forms the requested angle at
    /// joint 11.
    fn detection_with_angle(angle_deg: f32) -> PoseDetection {
        let mut pixel = vec![[1.0f32, 1.0]; KEYPOINT_COUNT];
        let b = [100.0f32, 100.0];
        let theta = angle_deg.to_radians();
        pixel[5] = [b[0] + 50.0, b[1]];
        pixel[11] = b;
        pixel[13] = [b[0] + 50.0 * theta.cos(), b[1] + 50.0 * theta.sin()];

        let normalized = pixel
            .iter()
            .flat_map(|p| [p[0] / 640.0, p[1] / 640.0])
            .collect();
        PoseDetection {
            observation: KeypointObservation { normalized, pixel },
            annotated: FrameImage::new(640, 640),
        }
    }

    struct CountingClassifier {
        calls: Arc<AtomicUsize>,
        distribution: Vec<f32>,
    }

    impl SequenceClassifier for CountingClassifier {
        fn classify(
            &mut self,
            sequence: &[f32],
            timesteps: usize,
            features: usize,
        ) -> Result<Vec<f32>> {
            assert_eq!(sequence.len(), timesteps * features);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.distribution.clone())
        }

        fn output_width(&self) -> usize {
            self.distribution.len()
        }
    }

    struct SessionHarness {
        session: Session,
        classifier_calls: Arc<AtomicUsize>,
        feedback_rx: mpsc::Receiver<FeedbackEvent>,
    }

    fn harness(
        detector: Arc<dyn PoseDetector>,
        distribution: Vec<f32>,
        config: &PipelineConfig,
    ) -> SessionHarness {
        let registry = ExerciseRegistry::builtin().unwrap();
        let profile = registry.get("deadlift").unwrap();
        let classifier_calls = Arc::new(AtomicUsize::new(0));
        let classifier = Box::new(CountingClassifier {
            calls: classifier_calls.clone(),
            distribution,
        });
        let (feedback, feedback_rx) = feedback::channel(64);
        let session = Session::new(
            profile,
            detector,
            classifier,
            DetectionPool::new(2),
            feedback,
            PipelineMetrics::new(),
            config,
        )
        .unwrap();
        SessionHarness {
            session,
            classifier_calls,
            feedback_rx,
        }
    }

    fn frame(pts: i64) -> VideoFrame {
        VideoFrame {
            image: FrameImage::new(64, 48),
            pts,
            time_base: TimeBase { num: 1, den: 90000 },
        }
    }

    // deadlift profile: timesteps=30, thresholds below=140 / above=175

    #[tokio::test]
    async fn test_neutral_run_classifies_periodically_only() {
        // every derived angle is 150 (neutral); detect every frame so the
        // buffer fills in exactly 30 frames
        let detector = Arc::new(ScriptedDetector::new(vec![Some(150.0); 40]));
        let config = PipelineConfig {
            detection_interval: 1,
            prediction_interval: 5,
            ..PipelineConfig::default()
        };
        let mut h = harness(detector, vec![0.1, 0.7, 0.1, 0.1], &config);

        for pts in 0..29 {
            h.session.process_frame(frame(pts)).await;
            assert_eq!(h.session.phase.current(), Some(Phase::Neutral));
            // buffer not full yet, never classified
            assert_eq!(h.classifier_calls.load(Ordering::SeqCst), 0);
        }

        // frame 30 fills the buffer: first full-buffer check fires
        h.session.process_frame(frame(29)).await;
        assert_eq!(h.classifier_calls.load(Ordering::SeqCst), 1);

        // phase stays neutral: next classification only after 5 more
        // full-buffer checks
        for pts in 30..34 {
            h.session.process_frame(frame(pts)).await;
            assert_eq!(h.classifier_calls.load(Ordering::SeqCst), 1);
        }
        h.session.process_frame(frame(34)).await;
        assert_eq!(h.classifier_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_phase_change_triggers_immediate_classification() {
        // 30 below-threshold frames fill the buffer, then one neutral frame
        let mut angles = vec![Some(130.0); 30];
        angles.push(Some(150.0));
        angles.extend(vec![Some(150.0); 5]);
        let detector = Arc::new(ScriptedDetector::new(angles));
        let config = PipelineConfig {
            detection_interval: 1,
            prediction_interval: 5,
            ..PipelineConfig::default()
        };
        let mut h = harness(detector, vec![0.6, 0.2, 0.1, 0.1], &config);

        for pts in 0..30 {
            h.session.process_frame(frame(pts)).await;
        }
        assert_eq!(h.session.phase.current(), Some(Phase::Below));
        assert_eq!(h.classifier_calls.load(Ordering::SeqCst), 1); // buffer-full check 0

        // check 1: periodic counter says no, but the phase edge fires
        h.session.process_frame(frame(30)).await;
        assert_eq!(h.session.phase.current(), Some(Phase::Neutral));
        assert_eq!(h.classifier_calls.load(Ordering::SeqCst), 2);

        // stable neutral afterwards: edge consumed, back to periodic
        h.session.process_frame(frame(31)).await;
        assert_eq!(h.classifier_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_subject_frames_are_emitted_with_matching_pts() {
        // live detection every frame; frames 5..=8 have no subject
        let mut angles = vec![Some(150.0); 5];
        angles.extend(vec![None; 4]);
        angles.extend(vec![Some(150.0); 3]);
        let detector = Arc::new(ScriptedDetector::new(angles));
        let config = PipelineConfig {
            detection_interval: 1,
            prediction_interval: 5,
            ..PipelineConfig::default()
        };
        let mut h = harness(detector, vec![0.1, 0.7, 0.1, 0.1], &config);

        for pts in 0..12i64 {
            let out = h.session.process_frame(frame(pts)).await;
            // one frame out per frame in, timestamps untouched
            assert_eq!(out.pts, pts);
            assert_eq!(out.time_base, TimeBase { num: 1, den: 90000 });
        }
    }

    #[tokio::test]
    async fn test_passthrough_before_any_detection_is_canonical_resize() {
        let detector = Arc::new(ScriptedDetector::new(vec![None; 3]));
        let config = PipelineConfig {
            detection_interval: 1,
            ..PipelineConfig::default()
        };
        let mut h = harness(detector, vec![0.25; 4], &config);

        let out = h.session.process_frame(frame(7)).await;
        assert_eq!(out.pts, 7);
        assert_eq!(out.image.width, overlay::CANONICAL_SIZE);
        assert_eq!(out.image.height, overlay::CANONICAL_SIZE);
    }

    #[tokio::test]
    async fn test_detection_throttle_reuses_cache_between_live_frames() {
        let detector = Arc::new(ScriptedDetector::new(vec![Some(150.0); 10]));
        let scripted = detector.clone();
        let config = PipelineConfig {
            detection_interval: 3,
            ..PipelineConfig::default()
        };
        let mut h = harness(detector, vec![0.1, 0.7, 0.1, 0.1], &config);

        for pts in 0..9 {
            h.session.process_frame(frame(pts)).await;
        }
        // frames 0, 3, 6 were live; the rest reused the cache
        assert_eq!(scripted.calls(), 3);
        // cached keypoints still feed the history buffer every frame
        assert_eq!(h.session.history.len(), 9);
    }

    #[tokio::test]
    async fn test_classification_publishes_feedback_event() {
        let detector = Arc::new(ScriptedDetector::new(vec![Some(150.0); 31]));
        let config = PipelineConfig {
            detection_interval: 1,
            prediction_interval: 5,
            ..PipelineConfig::default()
        };
        // index 0 wins: spine_fault, unfavorable
        let mut h = harness(detector, vec![0.8, 0.1, 0.05, 0.05], &config);

        for pts in 0..30 {
            h.session.process_frame(frame(pts)).await;
        }
        let event = h.feedback_rx.try_recv().unwrap();
        assert_eq!(event.error_text, "error: rounded spine");
        assert!((event.confidence - 0.8).abs() < 1e-6);
        assert_eq!(h.session.skeleton_color, SkeletonColor::Unfavorable);
    }

    #[tokio::test]
    async fn test_favorable_label_flips_skeleton_color() {
        let detector = Arc::new(ScriptedDetector::new(vec![Some(150.0); 31]));
        let config = PipelineConfig {
            detection_interval: 1,
            prediction_interval: 5,
            ..PipelineConfig::default()
        };
        // index 1 wins: spine_ok, favorable
        let mut h = harness(detector, vec![0.1, 0.7, 0.1, 0.1], &config);

        assert_eq!(h.session.skeleton_color, SkeletonColor::Unfavorable);
        for pts in 0..30 {
            h.session.process_frame(frame(pts)).await;
        }
        assert_eq!(h.session.skeleton_color, SkeletonColor::Favorable);
    }

    #[tokio::test]
    async fn test_classifier_error_degrades_without_state_corruption() {
        struct FailingClassifier;
        impl SequenceClassifier for FailingClassifier {
            fn classify(&mut self, _s: &[f32], _t: usize, _f: usize) -> Result<Vec<f32>> {
                anyhow::bail!("backend gone")
            }
            fn output_width(&self) -> usize {
                4
            }
        }

        let registry = ExerciseRegistry::builtin().unwrap();
        let profile = registry.get("deadlift").unwrap();
        let (feedback_tx, _feedback_rx) = feedback::channel(4);
        let detector: Arc<dyn PoseDetector> =
            Arc::new(ScriptedDetector::new(vec![Some(150.0); 32]));
        let config = PipelineConfig {
            detection_interval: 1,
            ..PipelineConfig::default()
        };
        let mut session = Session::new(
            profile,
            detector,
            Box::new(FailingClassifier),
            DetectionPool::new(2),
            feedback_tx,
            PipelineMetrics::new(),
            &config,
        )
        .unwrap();

        // classification errors at buffer-full must not kill the session
        for pts in 0..32 {
            let out = session.process_frame(frame(pts)).await;
            assert_eq!(out.pts, pts);
        }
        assert_eq!(session.skeleton_color, SkeletonColor::Unfavorable);
        assert!(session.metrics.summary().frame_errors > 0);
    }

    #[tokio::test]
    async fn test_mismatched_classifier_width_rejected_at_bind() {
        let registry = ExerciseRegistry::builtin().unwrap();
        let profile = registry.get("deadlift").unwrap();
        let (feedback_tx, _rx) = feedback::channel(4);
        let detector: Arc<dyn PoseDetector> = Arc::new(ScriptedDetector::new(vec![]));
        let classifier = Box::new(CountingClassifier {
            calls: Arc::new(AtomicUsize::new(0)),
            distribution: vec![0.5, 0.5], // profile has 4 labels
        });
        let result = Session::new(
            profile,
            detector,
            classifier,
            DetectionPool::new(2),
            feedback_tx,
            PipelineMetrics::new(),
            &PipelineConfig::default(),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_track_pumps_until_source_closes() {
        let detector: Arc<dyn PoseDetector> =
            Arc::new(ScriptedDetector::new(vec![Some(150.0); 16]));
        let config = PipelineConfig {
            detection_interval: 1,
            ..PipelineConfig::default()
        };
        let h = harness(detector, vec![0.1, 0.7, 0.1, 0.1], &config);

        let (mut in_sink, in_source) = crate::transport::video_channel(16);
        let (out_sink, mut out_source) = crate::transport::video_channel(16);

        let task = tokio::spawn(run_track(
            h.session,
            Box::new(in_source),
            Box::new(out_sink),
        ));
        for pts in 0..8 {
            in_sink.send(frame(pts)).await.unwrap();
        }
        drop(in_sink);

        for pts in 0..8 {
            assert_eq!(out_source.recv().await.unwrap().pts, pts);
        }
        assert!(out_source.recv().await.is_none());
        task.await.unwrap();
    }
}
