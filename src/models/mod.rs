pub mod approval;
pub mod identity;
pub mod settings;
pub mod subject;

pub use approval::{Approval, ApprovalPolicy, ApprovalRequest, ApprovalView, Grant, Validity};
pub use identity::Identity;
pub use settings::{DocsLocation, UiMode, UserSettings};
pub use subject::{Subject, SubjectKind};
