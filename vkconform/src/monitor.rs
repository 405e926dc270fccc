//! Collecting diagnostics and asserting on them.
//!
//! Every operation on a [`Device`] reports its diagnostics to a [`DiagnosticSink`] that the
//! caller passes in. The [`ErrorMonitor`] is the sink that tests use: a test arms it with the
//! codes it expects, performs the operation under test, and then verifies that exactly the
//! expected diagnostics were reported.
//!
//! ```
//! use vkconform::{monitor::{ErrorMonitor, Verification}, ErrorKind};
//! # use vkconform::{device::{Device, DeviceCreateInfo}, environment::{Environment, EnvironmentCreateInfo}};
//! # use vkconform::buffer::{BufferCreateInfo, BufferUsage};
//! # let environment = Environment::new(EnvironmentCreateInfo::default()).unwrap();
//! # let device = Device::new(environment, DeviceCreateInfo::default()).unwrap();
//!
//! let monitor = ErrorMonitor::default();
//!
//! monitor.expect_kind(ErrorKind::InvalidParams);
//! let _ = device.create_buffer(
//!     &monitor,
//!     BufferCreateInfo {
//!         usage: BufferUsage::VERTEX_BUFFER,
//!         ..Default::default()
//!     },
//! );
//! assert!(matches!(monitor.verify_found(), Ok(Verification::Passed { .. })));
//!
//! // Verifying twice in a row is a mistake in the test.
//! assert!(monitor.verify_found().is_err());
//! ```
//!
//! [`Device`]: crate::device::Device

use crate::{Diagnostic, ErrorKind, NonExhaustive, Severity};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::{error::Error as StdError, fmt, sync::Arc};

/// A destination for diagnostics.
pub trait DiagnosticSink: Send + Sync {
    /// Reports a diagnostic.
    fn emit(&self, diagnostic: Diagnostic);
}

/// Collects every diagnostic, in the order they are emitted.
impl DiagnosticSink for Mutex<Vec<Diagnostic>> {
    fn emit(&self, diagnostic: Diagnostic) {
        self.lock().push(diagnostic);
    }
}

/// The reason why a test was skipped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkipReason {
    message: String,
}

impl SkipReason {
    #[inline]
    pub fn new(message: impl Into<String>) -> Self {
        SkipReason {
            message: message.into(),
        }
    }

    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// A diagnostic that a test expects.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Expectation {
    /// A diagnostic with exactly this VUID.
    Vuid(Arc<str>),

    /// Any diagnostic of this kind.
    Kind(ErrorKind),
}

impl Expectation {
    fn matches(&self, diagnostic: &Diagnostic) -> bool {
        match self {
            Expectation::Vuid(vuid) => *vuid == diagnostic.vuid,
            Expectation::Kind(kind) => *kind == diagnostic.kind,
        }
    }
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::Vuid(vuid) => f.write_str(vuid),
            Expectation::Kind(kind) => write!(f, "any diagnostic of kind `{kind}`"),
        }
    }
}

/// Parameters to create a new [`ErrorMonitor`].
#[derive(Clone, Debug)]
pub struct ErrorMonitorCreateInfo {
    /// VUIDs that never fail a verification, even when they are not expected.
    ///
    /// The default value is empty.
    pub tolerated: Vec<String>,

    /// The severities of unexpected diagnostics that fail a verification. Diagnostics of other
    /// severities are recorded, but otherwise ignored.
    ///
    /// The default value contains only [`Severity::Error`].
    pub failing_severities: SmallVec<[Severity; 3]>,

    pub _ne: NonExhaustive,
}

impl Default for ErrorMonitorCreateInfo {
    #[inline]
    fn default() -> Self {
        ErrorMonitorCreateInfo {
            tolerated: Vec::new(),
            failing_severities: SmallVec::from_slice(&[Severity::Error]),
            _ne: NonExhaustive(()),
        }
    }
}

/// The phase of an [`ErrorMonitor`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MonitorPhase {
    /// No scenario is in progress. Diagnostics emitted in this phase are strays.
    Idle,

    /// Expectations have been registered, but nothing has been emitted yet.
    Armed,

    /// At least one diagnostic has been emitted since the monitor was armed.
    Triggered,
}

/// The successful outcome of a verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verification {
    /// Every expectation was met, and nothing else that fails a check was emitted.
    Passed {
        /// Every diagnostic that was emitted during the scenario, including tolerated ones.
        diagnostics: Vec<Diagnostic>,
    },

    /// The scenario was skipped, because the environment doesn't support what it tests.
    Skipped(SkipReason),
}

/// Error returned when a verification fails.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerifyError {
    /// The monitor was verified without having been armed. This includes verifying twice in a
    /// row.
    Idle,

    /// The scenario did not produce the expected outcome.
    Failed {
        /// The expectations that no diagnostic matched.
        missing: Vec<Expectation>,

        /// The diagnostics that were neither expected nor tolerated.
        unexpected: Vec<Diagnostic>,
    },

    /// Diagnostics were emitted outside of any scenario.
    Stray(Vec<Diagnostic>),
}

impl StdError for VerifyError {}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("the monitor was verified without expectations"),
            Self::Failed {
                missing,
                unexpected,
            } => {
                f.write_str("the scenario failed")?;

                for expectation in missing {
                    write!(f, "\n  expected but not found: {expectation}")?;
                }

                for diagnostic in unexpected {
                    write!(f, "\n  unexpected: {diagnostic}")?;
                }

                Ok(())
            }
            Self::Stray(diagnostics) => {
                f.write_str("diagnostics were emitted outside of a scenario")?;

                for diagnostic in diagnostics {
                    write!(f, "\n  {diagnostic}")?;
                }

                Ok(())
            }
        }
    }
}

#[derive(Debug)]
struct ExpectedEntry {
    expectation: Expectation,
    found: usize,
}

#[derive(Debug)]
struct MonitorState {
    phase: MonitorPhase,
    expected: Vec<ExpectedEntry>,
    allowed: Vec<String>,
    diagnostics: Vec<Diagnostic>,
    unexpected: Vec<Diagnostic>,
    stray: Vec<Diagnostic>,
}

impl MonitorState {
    fn arm(&mut self) {
        if self.phase == MonitorPhase::Idle {
            self.phase = MonitorPhase::Armed;
        }
    }

    fn reset(&mut self) {
        self.phase = MonitorPhase::Idle;
        self.expected.clear();
        self.allowed.clear();
        self.diagnostics.clear();
        self.unexpected.clear();
    }
}

/// A [`DiagnosticSink`] that compares the diagnostics it receives against expectations.
///
/// The monitor goes through the phases `Idle`, `Armed` and `Triggered`. Registering an
/// expectation arms it, emitting a diagnostic triggers it, and verifying it returns it to
/// `Idle`.
///
/// Expectations form a multiset: expecting the same VUID twice requires it to be emitted twice.
/// Once an expectation has been met, further emissions of the same code are tolerated.
#[derive(Debug)]
pub struct ErrorMonitor {
    tolerated: Vec<String>,
    failing_severities: SmallVec<[Severity; 3]>,
    state: Mutex<MonitorState>,
}

impl ErrorMonitor {
    /// Creates a new `ErrorMonitor`.
    pub fn new(create_info: ErrorMonitorCreateInfo) -> Self {
        let ErrorMonitorCreateInfo {
            tolerated,
            failing_severities,
            _ne: _,
        } = create_info;

        ErrorMonitor {
            tolerated,
            failing_severities,
            state: Mutex::new(MonitorState {
                phase: MonitorPhase::Idle,
                expected: Vec::new(),
                allowed: Vec::new(),
                diagnostics: Vec::new(),
                unexpected: Vec::new(),
                stray: Vec::new(),
            }),
        }
    }

    /// Returns the current phase.
    #[inline]
    pub fn phase(&self) -> MonitorPhase {
        self.state.lock().phase
    }

    /// Expects a diagnostic with exactly the given VUID before the next verification.
    pub fn expect(&self, vuid: impl AsRef<str>) {
        let mut state = self.state.lock();
        state.expected.push(ExpectedEntry {
            expectation: Expectation::Vuid(Arc::from(vuid.as_ref())),
            found: 0,
        });
        state.arm();
    }

    /// Expects any diagnostic of the given kind before the next verification.
    pub fn expect_kind(&self, kind: ErrorKind) {
        let mut state = self.state.lock();
        state.expected.push(ExpectedEntry {
            expectation: Expectation::Kind(kind),
            found: 0,
        });
        state.arm();
    }

    /// Arms the monitor without any expectation, so that the next verification checks that
    /// nothing failing was emitted.
    pub fn expect_success(&self) {
        self.state.lock().arm();
    }

    /// Tolerates the given VUID until the next verification. The diagnostic is still recorded.
    pub fn set_unexpected_error(&self, vuid: impl Into<String>) {
        self.state.lock().allowed.push(vuid.into());
    }

    /// Returns the diagnostics emitted since the monitor was last armed.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.state.lock().diagnostics.clone()
    }

    fn is_tolerated(&self, state: &MonitorState, diagnostic: &Diagnostic) -> bool {
        !self.failing_severities.contains(&diagnostic.severity)
            || state
                .allowed
                .iter()
                .chain(&self.tolerated)
                .any(|vuid| **vuid == *diagnostic.vuid)
    }

    /// Verifies that every expectation was met and that nothing failing was emitted since the
    /// monitor was armed, then returns it to the idle phase.
    pub fn verify_found(&self) -> Result<Verification, VerifyError> {
        let mut state = self.state.lock();

        if state.phase == MonitorPhase::Idle {
            return Err(VerifyError::Idle);
        }

        let missing: Vec<_> = state
            .expected
            .iter()
            .filter(|entry| entry.found == 0)
            .map(|entry| entry.expectation.clone())
            .collect();
        let unexpected = std::mem::take(&mut state.unexpected);
        let diagnostics = std::mem::take(&mut state.diagnostics);
        state.reset();

        if missing.is_empty() && unexpected.is_empty() {
            Ok(Verification::Passed { diagnostics })
        } else {
            Err(VerifyError::Failed {
                missing,
                unexpected,
            })
        }
    }

    /// Abandons the current scenario, if any, and records that it was skipped.
    pub fn skip(&self, reason: SkipReason) -> Verification {
        self.state.lock().reset();

        Verification::Skipped(reason)
    }

    /// Returns an error if any failing diagnostic was emitted while no scenario was in progress,
    /// or if a scenario was armed but never verified.
    pub fn finish(&self) -> Result<(), VerifyError> {
        let mut state = self.state.lock();
        let mut stray = std::mem::take(&mut state.stray);

        if state.phase != MonitorPhase::Idle {
            stray.append(&mut state.unexpected);
            state.reset();
        }

        if stray.is_empty() {
            Ok(())
        } else {
            Err(VerifyError::Stray(stray))
        }
    }
}

impl Default for ErrorMonitor {
    #[inline]
    fn default() -> Self {
        ErrorMonitor::new(ErrorMonitorCreateInfo::default())
    }
}

impl DiagnosticSink for ErrorMonitor {
    fn emit(&self, diagnostic: Diagnostic) {
        let mut state = self.state.lock();

        if state.phase == MonitorPhase::Idle {
            if !self.is_tolerated(&state, &diagnostic) {
                log::trace!("stray diagnostic: {diagnostic}");
                state.stray.push(diagnostic);
            }

            return;
        }

        state.phase = MonitorPhase::Triggered;

        // Exact expectations are met first, so that a kind expectation is left for a diagnostic
        // that no exact expectation names.
        let unmet = |state: &MonitorState, exact: bool| {
            state.expected.iter().position(|entry| {
                entry.found == 0
                    && matches!(entry.expectation, Expectation::Vuid(_)) == exact
                    && entry.expectation.matches(&diagnostic)
            })
        };
        let entry_index = unmet(&state, true)
            .or_else(|| unmet(&state, false))
            .or_else(|| {
                state
                    .expected
                    .iter()
                    .position(|entry| entry.expectation.matches(&diagnostic))
            });

        if let Some(entry_index) = entry_index {
            state.expected[entry_index].found += 1;
        } else if !self.is_tolerated(&state, &diagnostic) {
            state.unexpected.push(diagnostic.clone());
        }

        state.diagnostics.push(diagnostic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Id, Severity};

    fn diagnostic(vuid: &str, kind: ErrorKind, severity: Severity) -> Diagnostic {
        Diagnostic {
            vuid: Arc::from(vuid),
            kind,
            severity,
            message: String::new(),
            objects: SmallVec::<[Id; 2]>::new(),
        }
    }

    fn error(vuid: &str) -> Diagnostic {
        diagnostic(vuid, ErrorKind::InvalidParams, Severity::Error)
    }

    #[test]
    fn phases() {
        let monitor = ErrorMonitor::default();
        assert_eq!(monitor.phase(), MonitorPhase::Idle);
        assert_eq!(monitor.verify_found(), Err(VerifyError::Idle));

        monitor.expect("VUID-a");
        assert_eq!(monitor.phase(), MonitorPhase::Armed);
        monitor.emit(error("VUID-a"));
        assert_eq!(monitor.phase(), MonitorPhase::Triggered);
        assert!(matches!(
            monitor.verify_found(),
            Ok(Verification::Passed { diagnostics }) if diagnostics.len() == 1,
        ));
        assert_eq!(monitor.phase(), MonitorPhase::Idle);
        assert_eq!(monitor.verify_found(), Err(VerifyError::Idle));
    }

    #[test]
    fn missing_and_unexpected() {
        let monitor = ErrorMonitor::default();

        monitor.expect("VUID-a");
        monitor.expect("VUID-b");
        monitor.emit(error("VUID-a"));
        monitor.emit(error("VUID-c"));

        match monitor.verify_found() {
            Err(VerifyError::Failed {
                missing,
                unexpected,
            }) => {
                assert_eq!(missing, [Expectation::Vuid(Arc::from("VUID-b"))]);
                assert_eq!(unexpected.len(), 1);
                assert_eq!(&*unexpected[0].vuid, "VUID-c");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn multiset_and_duplicates() {
        let monitor = ErrorMonitor::default();

        // Expecting twice requires two emissions.
        monitor.expect("VUID-a");
        monitor.expect("VUID-a");
        monitor.emit(error("VUID-a"));
        assert!(monitor.verify_found().is_err());

        // Emitting more often than expected is tolerated.
        monitor.expect("VUID-a");
        monitor.emit(error("VUID-a"));
        monitor.emit(error("VUID-a"));
        monitor.verify_found().unwrap();
    }

    #[test]
    fn kinds_and_tolerance() {
        let monitor = ErrorMonitor::new(ErrorMonitorCreateInfo {
            tolerated: vec!["VUID-always".to_owned()],
            ..Default::default()
        });

        monitor.expect("VUID-a");
        monitor.expect_kind(ErrorKind::LayoutMismatch);
        monitor.set_unexpected_error("VUID-once");
        monitor.emit(error("VUID-a"));
        monitor.emit(diagnostic("VUID-x", ErrorKind::LayoutMismatch, Severity::Error));
        monitor.emit(error("VUID-once"));
        monitor.emit(error("VUID-always"));
        monitor.emit(diagnostic("VUID-w", ErrorKind::InvalidParams, Severity::Warning));
        assert!(matches!(
            monitor.verify_found(),
            Ok(Verification::Passed { diagnostics }) if diagnostics.len() == 5,
        ));

        // The per-scenario toleration has been cleared.
        monitor.expect_success();
        monitor.emit(error("VUID-once"));
        assert!(monitor.verify_found().is_err());
    }

    #[test]
    fn skip_and_stray() {
        let monitor = ErrorMonitor::default();

        monitor.expect("VUID-a");
        assert_eq!(
            monitor.skip(SkipReason::new("unsupported")),
            Verification::Skipped(SkipReason::new("unsupported")),
        );
        assert_eq!(monitor.phase(), MonitorPhase::Idle);
        monitor.finish().unwrap();

        monitor.emit(error("VUID-stray"));
        assert!(matches!(
            monitor.finish(),
            Err(VerifyError::Stray(diagnostics)) if diagnostics.len() == 1,
        ));
        monitor.finish().unwrap();
    }

    #[test]
    fn collecting_sink() {
        let sink = Mutex::new(Vec::new());
        sink.emit(error("VUID-a"));
        sink.emit(error("VUID-b"));
        assert_eq!(sink.lock().len(), 2);
    }
}
