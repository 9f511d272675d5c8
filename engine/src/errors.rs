use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PolicyError {
    #[error("Failed to load policy file `{path}`")]
    #[diagnostic(
        code(desklock::policy::load),
        help("Check that the file exists and contains valid KDL syntax")
    )]
    PolicyLoadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid policy: {0}")]
    #[diagnostic(
        code(desklock::policy::invalid_policy),
        help("Each policy file may contain `privileged`, `detail-views`, `role` and `suppress` KDL nodes")
    )]
    InvalidPolicy(String),

    #[error("Role `{0}` is defined more than once")]
    #[diagnostic(
        code(desklock::policy::duplicate_role),
        help("Role priority follows definition order, so each role may only be defined once across all policy files")
    )]
    DuplicateRole(String),

    #[error("Landing route `{landing}` of role `{role}` is not allowed by its own rule")]
    #[diagnostic(
        code(desklock::policy::landing_not_allowed),
        help("Add a `paths` entry contained in the landing route, otherwise every visit to it redirects back to itself")
    )]
    LandingNotAllowed { role: String, landing: String },

    #[error("Invalid suppression: {0}")]
    #[diagnostic(
        code(desklock::policy::invalid_suppression),
        help("Suppress syntax: suppress \"Label\" slug=\"route-slug\" mode=\"hide\" (mode is `hide` or `disable`)")
    )]
    InvalidSuppression(String),

    #[error("KDL parse error: {0}")]
    #[diagnostic(
        code(desklock::policy::kdl_parse),
        help("Check your KDL file syntax, see https://kdl.dev")
    )]
    KdlParse(String),

    #[error("Invalid policy bundle: {0}")]
    #[diagnostic(
        code(desklock::policy::bundle),
        help("Regenerate the bundle with `desklock bundle`")
    )]
    Bundle(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    #[diagnostic(code(desklock::policy::io))]
    Io(#[from] std::io::Error),
}

/// Raised by a UI tree adapter when the host markup does not have the shape
/// the adapter expects. Always recoverable: the element is skipped for the
/// current pass.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("element is no longer attached to the tree")]
    Detached,

    #[error("element is missing `{0}`")]
    Missing(String),

    #[error("host rejected mutation: {0}")]
    Rejected(String),
}
