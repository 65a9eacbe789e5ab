// THEORY:
// A `ScanSession` is the bookkeeping for one run of the pipeline: which token it
// holds, where it is in the `Idle -> Loading -> Scanning -> Analyzing -> Done`
// state machine, which of the six scanning steps have completed, and whether the
// caller cancelled it.
//
// Tokens are the cancellation mechanism. Every start and every cancel allocates a
// strictly larger token; a continuation that wakes up holding an older token knows
// it has been superseded and drops its own result.

use serde::Serialize;
use std::fmt;

/// Monotonic identity of a scan session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct ScanToken(u64);

impl ScanToken {
    pub const fn value(self) -> u64 {
        self.0
    }

    pub fn next(self) -> ScanToken {
        ScanToken(self.0 + 1)
    }
}

impl fmt::Display for ScanToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Pipeline state machine positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanStage {
    #[default]
    Idle,
    Loading,
    Scanning,
    Analyzing,
    Done,
    Error,
}

impl ScanStage {
    /// Whether a session in this stage still has continuations pending.
    pub fn is_in_flight(self) -> bool {
        matches!(self, ScanStage::Loading | ScanStage::Scanning | ScanStage::Analyzing)
    }
}

impl fmt::Display for ScanStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanStage::Idle => "idle",
            ScanStage::Loading => "loading",
            ScanStage::Scanning => "scanning",
            ScanStage::Analyzing => "analyzing",
            ScanStage::Done => "done",
            ScanStage::Error => "error",
        };
        f.write_str(name)
    }
}

/// The six scanning steps, in the only order they ever run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanStep {
    Normalize,
    DetectVehicle,
    LocalizeDamage,
    Score,
    Estimate,
    Fraud,
}

impl ScanStep {
    pub const ALL: [ScanStep; 6] = [
        ScanStep::Normalize,
        ScanStep::DetectVehicle,
        ScanStep::LocalizeDamage,
        ScanStep::Score,
        ScanStep::Estimate,
        ScanStep::Fraud,
    ];

    pub fn key(self) -> &'static str {
        match self {
            ScanStep::Normalize => "normalize",
            ScanStep::DetectVehicle => "detectVehicle",
            ScanStep::LocalizeDamage => "localizeDamage",
            ScanStep::Score => "score",
            ScanStep::Estimate => "estimate",
            ScanStep::Fraud => "fraud",
        }
    }

    pub fn log_message(self) -> &'static str {
        match self {
            ScanStep::Normalize => "Normalizing exposure and orientation",
            ScanStep::DetectVehicle => "Detecting vehicle in frame",
            ScanStep::LocalizeDamage => "Localizing damaged area",
            ScanStep::Score => "Scoring damage severity",
            ScanStep::Estimate => "Estimating repair cost",
            ScanStep::Fraud => "Running fraud consistency checks",
        }
    }
}

/// Bookkeeping for the current scan.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSession {
    pub token: ScanToken,
    pub stage: ScanStage,
    pub completed_steps: Vec<ScanStep>,
    pub cancelled: bool,
    /// Human-readable status for the `Error` stage and for cancellations.
    pub message: Option<String>,
}

impl ScanSession {
    /// A fresh session holding `token`, already in `Loading`.
    pub fn start(token: ScanToken) -> Self {
        Self {
            token,
            stage: ScanStage::Loading,
            completed_steps: Vec::with_capacity(ScanStep::ALL.len()),
            cancelled: false,
            message: None,
        }
    }

    /// Records a completed step. Steps must complete in `ScanStep::ALL` order;
    /// an out-of-order or repeated step is ignored and reported as `false`.
    pub fn complete_step(&mut self, step: ScanStep) -> bool {
        let expected = ScanStep::ALL.get(self.completed_steps.len());
        if expected == Some(&step) {
            self.completed_steps.push(step);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_monotonic() {
        let first = ScanToken::default();
        let second = first.next();
        assert!(second > first);
        assert_eq!(second.value(), 1);
        assert_eq!(second.to_string(), "#1");
    }

    #[test]
    fn only_active_stages_are_in_flight() {
        let in_flight: Vec<ScanStage> = [
            ScanStage::Idle,
            ScanStage::Loading,
            ScanStage::Scanning,
            ScanStage::Analyzing,
            ScanStage::Done,
            ScanStage::Error,
        ]
        .into_iter()
        .filter(|s| s.is_in_flight())
        .collect();
        assert_eq!(in_flight, vec![ScanStage::Loading, ScanStage::Scanning, ScanStage::Analyzing]);
    }

    #[test]
    fn steps_complete_in_fixed_order() {
        let mut session = ScanSession::start(ScanToken::default().next());
        assert!(session.complete_step(ScanStep::Normalize));
        assert!(!session.complete_step(ScanStep::Score));
        assert!(!session.complete_step(ScanStep::Normalize));
        assert!(session.complete_step(ScanStep::DetectVehicle));
        assert_eq!(session.completed_steps, vec![ScanStep::Normalize, ScanStep::DetectVehicle]);
    }

    #[test]
    fn step_keys_match_their_serialized_names() {
        for step in ScanStep::ALL {
            let json = serde_json::to_string(&step).unwrap();
            assert_eq!(json, format!("\"{}\"", step.key()));
        }
    }
}
