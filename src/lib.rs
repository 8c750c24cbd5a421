//! Network Anomaly Core
//!
//! Rule-based anomaly detection over a fully parsed packet capture, plus an
//! inverted index for highlighting the frames behind each finding.
//!
//! ```ignore
//! let mut session = AnalysisSession::new(&AnalysisConfig::from_env());
//! let anomalies = session.analyze(&packets, &CancellationToken::new())?;
//! let frames = session.highlight(&AnomalyFilter::new().with_severities([Severity::Critical]))?;
//! ```

pub mod config;
pub mod constants;
pub mod logic;

pub use config::AnalysisConfig;
pub use logic::anomaly::{AnomalyBuilder, AnomalyCategory, AnomalyRecord, AnomalyType, MetadataValue, Severity};
pub use logic::detection::{CancellationToken, DetectionEngine, DetectionError, DetectionReport, Detector, DetectorKind, DetectorOutcome};
pub use logic::index::{AnomalyFilter, AnomalyIndex, IndexError, IndexStats};
pub use logic::packet::{PacketRecord, TcpFlags, TransportProtocol};
pub use logic::session::{AnalysisSession, SessionError};
