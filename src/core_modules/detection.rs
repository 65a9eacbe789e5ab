// THEORY:
// The detection layer answers "what vehicle is in this photo, and where". It is
// polymorphic over two providers:
//
// 1.  **External detector**: an injected capability (a real model, a remote
//     service stub, a test double). The core only knows the `ExternalDetector`
//     contract: `initialize` once, then `detect` per scan. Either call may fail.
// 2.  **Fallback heuristic**: a deterministic stand-in that always returns exactly
//     one detection covering the centre of the image. It is used whenever the
//     external detector is missing, failed to initialize, or failed to detect.
//
// The orchestrator owns the external detector through a `DetectorSlot`, a small
// state machine (`Uninitialized -> Ready | Unavailable`). Initialization happens at
// most once; `Unavailable` is terminal. No failure from this layer is ever fatal
// to a scan.

use crate::core_modules::estimate::VehicleClass;
use crate::core_modules::pixel_grid::PixelGrid;
use crate::errors::DetectorError;
use futures::future::BoxFuture;
use serde::Serialize;
use tracing::{debug, warn};

/// Labels the scan keeps from an external detector's output.
pub const VEHICLE_LABELS: [&str; 4] = ["car", "truck", "bus", "motorcycle"];

const FALLBACK_X: f64 = 0.12;
const FALLBACK_Y: f64 = 0.20;
const FALLBACK_RIGHT: f64 = 0.88;
const FALLBACK_BOTTOM: f64 = 0.78;
const FALLBACK_HEAVY_CONFIDENCE: u8 = 82;
const FALLBACK_DEFAULT_CONFIDENCE: u8 = 76;

/// An axis-aligned box in source pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// A labeled vehicle detection with an integer confidence (0-100).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub label: String,
    pub confidence: u8,
    pub bbox: BoundingBox,
}

/// One prediction as reported by an external detector.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    pub class: String,
    /// Model score in `[0, 1]`.
    pub score: f32,
    pub bbox: BoundingBox,
}

/// The capability contract for a real object detector.
pub trait ExternalDetector: Send {
    /// Prepares the detector (loads weights, warms up, ...). Called at most once.
    fn initialize(&mut self) -> BoxFuture<'_, Result<(), DetectorError>>;

    /// Runs detection on the full image.
    fn detect<'a>(
        &'a mut self,
        image: &'a PixelGrid,
    ) -> BoxFuture<'a, Result<Vec<RawDetection>, DetectorError>>;
}

/// Keeps allow-listed vehicle classes and converts scores to integer confidences.
pub fn filter_vehicles(raw: Vec<RawDetection>) -> Vec<Detection> {
    raw.into_iter()
        .filter(|d| VEHICLE_LABELS.contains(&d.class.as_str()))
        .map(|d| Detection {
            label: d.class,
            confidence: (d.score.clamp(0.0, 1.0) as f64 * 100.0).round() as u8,
            bbox: d.bbox,
        })
        .collect()
}

/// The deterministic single-detection stand-in.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackHeuristic;

impl FallbackHeuristic {
    pub fn detect(&self, image: &PixelGrid, vehicle_class: VehicleClass) -> Vec<Detection> {
        let width = image.width() as f64;
        let height = image.height() as f64;
        let (label, confidence) = match vehicle_class {
            VehicleClass::Heavy => ("truck", FALLBACK_HEAVY_CONFIDENCE),
            VehicleClass::Passenger | VehicleClass::Light => ("car", FALLBACK_DEFAULT_CONFIDENCE),
        };
        vec![Detection {
            label: label.to_string(),
            confidence,
            bbox: BoundingBox::new(
                FALLBACK_X * width,
                FALLBACK_Y * height,
                (FALLBACK_RIGHT - FALLBACK_X) * width,
                (FALLBACK_BOTTOM - FALLBACK_Y) * height,
            ),
        }]
    }
}

/// Which provider produced a set of detections.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRun {
    pub detections: Vec<Detection>,
    pub used_fallback: bool,
}

/// The orchestrator-owned home of the external detector.
pub enum DetectorSlot {
    Uninitialized(Box<dyn ExternalDetector>),
    Ready(Box<dyn ExternalDetector>),
    Unavailable,
}

impl DetectorSlot {
    pub fn new(detector: Option<Box<dyn ExternalDetector>>) -> Self {
        match detector {
            Some(detector) => DetectorSlot::Uninitialized(detector),
            None => DetectorSlot::Unavailable,
        }
    }

    /// Initializes the detector if that has not been attempted yet.
    /// Returns whether a working detector is available afterwards.
    ///
    /// The detector stays in the slot while `initialize` runs, so a caller that
    /// drops this future part way leaves the slot `Uninitialized`.
    pub async fn ensure_ready(&mut self) -> bool {
        let result = match self {
            DetectorSlot::Uninitialized(detector) => detector.initialize().await,
            DetectorSlot::Ready(_) => return true,
            DetectorSlot::Unavailable => return false,
        };
        let DetectorSlot::Uninitialized(detector) =
            std::mem::replace(self, DetectorSlot::Unavailable)
        else {
            return false;
        };
        match result {
            Ok(()) => {
                debug!("external detector initialized");
                *self = DetectorSlot::Ready(detector);
                true
            }
            Err(err) => {
                warn!(error = %err, "external detector unavailable, using fallback heuristic");
                false
            }
        }
    }

    /// Detects vehicles on the full image, falling back to the heuristic when the
    /// external detector is unavailable or fails.
    pub async fn detect(&mut self, image: &PixelGrid, vehicle_class: VehicleClass) -> DetectionRun {
        if let DetectorSlot::Ready(detector) = self {
            match detector.detect(image).await {
                Ok(raw) => {
                    return DetectionRun {
                        detections: filter_vehicles(raw),
                        used_fallback: false,
                    };
                }
                Err(err) => {
                    warn!(error = %err, "external detection failed, using fallback heuristic");
                }
            }
        }
        DetectionRun {
            detections: FallbackHeuristic.detect(image, vehicle_class),
            used_fallback: true,
        }
    }
}

impl std::fmt::Debug for DetectorSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self {
            DetectorSlot::Uninitialized(_) => "Uninitialized",
            DetectorSlot::Ready(_) => "Ready",
            DetectorSlot::Unavailable => "Unavailable",
        };
        f.debug_tuple("DetectorSlot").field(&state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::pixel::pixel::Pixel;
    use futures::FutureExt;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedDetector {
        init: Result<(), DetectorError>,
        output: Result<Vec<RawDetection>, DetectorError>,
        init_calls: Arc<AtomicUsize>,
    }

    impl ExternalDetector for ScriptedDetector {
        fn initialize(&mut self) -> BoxFuture<'_, Result<(), DetectorError>> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            let result = self.init.clone();
            async move { result }.boxed()
        }

        fn detect<'a>(
            &'a mut self,
            _image: &'a PixelGrid,
        ) -> BoxFuture<'a, Result<Vec<RawDetection>, DetectorError>> {
            let result = self.output.clone();
            async move { result }.boxed()
        }
    }

    fn raw(class: &str, score: f32) -> RawDetection {
        RawDetection {
            class: class.to_string(),
            score,
            bbox: BoundingBox::new(1.0, 2.0, 3.0, 4.0),
        }
    }

    fn image() -> PixelGrid {
        PixelGrid::filled(100, 50, Pixel::new(0, 0, 0, 255))
    }

    #[test]
    fn fallback_covers_the_image_centre() {
        let detections = FallbackHeuristic.detect(&image(), VehicleClass::Passenger);
        assert_eq!(detections.len(), 1);
        let d = &detections[0];
        assert_eq!((d.label.as_str(), d.confidence), ("car", 76));
        assert!((d.bbox.x - 12.0).abs() < 1e-9);
        assert!((d.bbox.y - 10.0).abs() < 1e-9);
        assert!((d.bbox.width - 76.0).abs() < 1e-9);
        assert!((d.bbox.height - 29.0).abs() < 1e-9);
    }

    #[test]
    fn fallback_reports_trucks_for_heavy_vehicles() {
        let d = &FallbackHeuristic.detect(&image(), VehicleClass::Heavy)[0];
        assert_eq!((d.label.as_str(), d.confidence), ("truck", 82));
        let d = &FallbackHeuristic.detect(&image(), VehicleClass::Light)[0];
        assert_eq!((d.label.as_str(), d.confidence), ("car", 76));
    }

    #[test]
    fn filter_keeps_only_vehicles() {
        let detections = filter_vehicles(vec![
            raw("car", 0.914),
            raw("person", 0.99),
            raw("bus", 0.56),
            raw("traffic light", 0.7),
            raw("motorcycle", 1.0),
        ]);
        let summary: Vec<(&str, u8)> = detections
            .iter()
            .map(|d| (d.label.as_str(), d.confidence))
            .collect();
        assert_eq!(summary, vec![("car", 91), ("bus", 56), ("motorcycle", 100)]);
    }

    #[tokio::test]
    async fn slot_initializes_once_and_uses_detector() {
        let init_calls = Arc::new(AtomicUsize::new(0));
        let mut slot = DetectorSlot::new(Some(Box::new(ScriptedDetector {
            init: Ok(()),
            output: Ok(vec![raw("truck", 0.88)]),
            init_calls: init_calls.clone(),
        })));

        assert!(slot.ensure_ready().await);
        assert!(slot.ensure_ready().await);
        assert_eq!(init_calls.load(Ordering::SeqCst), 1);

        let run = slot.detect(&image(), VehicleClass::Passenger).await;
        assert!(!run.used_fallback);
        assert_eq!(run.detections[0].label, "truck");
        assert_eq!(run.detections[0].confidence, 88);
    }

    #[tokio::test]
    async fn failed_initialization_is_sticky() {
        let init_calls = Arc::new(AtomicUsize::new(0));
        let mut slot = DetectorSlot::new(Some(Box::new(ScriptedDetector {
            init: Err(DetectorError::Initialization("no weights".into())),
            output: Ok(vec![raw("car", 0.9)]),
            init_calls: init_calls.clone(),
        })));

        assert!(!slot.ensure_ready().await);
        assert!(!slot.ensure_ready().await);
        assert_eq!(init_calls.load(Ordering::SeqCst), 1);

        let run = slot.detect(&image(), VehicleClass::Heavy).await;
        assert!(run.used_fallback);
        assert_eq!(run.detections[0].label, "truck");
    }

    #[tokio::test]
    async fn detection_failure_falls_back() {
        let mut slot = DetectorSlot::new(Some(Box::new(ScriptedDetector {
            init: Ok(()),
            output: Err(DetectorError::Inference("tensor shape".into())),
            init_calls: Arc::new(AtomicUsize::new(0)),
        })));
        assert!(slot.ensure_ready().await);

        let run = slot.detect(&image(), VehicleClass::Passenger).await;

        assert!(run.used_fallback);
        assert_eq!(run.detections.len(), 1);
        assert_eq!(run.detections[0].confidence, 76);
        assert!(matches!(slot, DetectorSlot::Ready(_)));
    }

    struct SlowInit {
        init_calls: Arc<AtomicUsize>,
    }

    impl ExternalDetector for SlowInit {
        fn initialize(&mut self) -> BoxFuture<'_, Result<(), DetectorError>> {
            self.init_calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                Ok(())
            }
            .boxed()
        }

        fn detect<'a>(
            &'a mut self,
            _image: &'a PixelGrid,
        ) -> BoxFuture<'a, Result<Vec<RawDetection>, DetectorError>> {
            async { Ok(vec![raw("bus", 0.9)]) }.boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn interrupted_initialization_keeps_the_detector() {
        let init_calls = Arc::new(AtomicUsize::new(0));
        let mut slot = DetectorSlot::new(Some(Box::new(SlowInit {
            init_calls: init_calls.clone(),
        })));

        let interrupted =
            tokio::time::timeout(std::time::Duration::from_millis(10), slot.ensure_ready()).await;
        assert!(interrupted.is_err());
        assert!(matches!(slot, DetectorSlot::Uninitialized(_)));

        assert!(slot.ensure_ready().await);
        assert_eq!(init_calls.load(Ordering::SeqCst), 2);
        let run = slot.detect(&image(), VehicleClass::Passenger).await;
        assert!(!run.used_fallback);
        assert_eq!(run.detections[0].label, "bus");
    }

    #[tokio::test]
    async fn missing_detector_uses_fallback() {
        let mut slot = DetectorSlot::new(None);
        assert!(!slot.ensure_ready().await);
        assert!(slot.detect(&image(), VehicleClass::Light).await.used_fallback);
    }
}
