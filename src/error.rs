use thiserror::Error;

/// Invariant and configuration violations raised by the scoring core.
///
/// These are programming or setup errors rather than transient conditions:
/// callers propagate them instead of falling back.
#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("unsupported period type: {0}")]
    UnsupportedPeriod(String),

    #[error("unsupported run mode: {0}")]
    UnsupportedRunMode(String),

    #[error("undefined field for {aspect}: {field}")]
    UnknownField { aspect: String, field: String },

    #[error("unable to combine identical profile: {0}")]
    DuplicateProfile(String),

    #[error("profile [{profile}] already exists for {code}")]
    DuplicateAspect { code: String, profile: String },

    #[error("len of scores[{scores}] does not match len of row ids[{row_ids}]")]
    ReplyLength { scores: usize, row_ids: usize },

    #[error("scores do not match requested series: missing {missing:?}, unexpected {unexpected:?}")]
    RowIdMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("remote scoring failed for {failed} of {total} units")]
    RemoteFailed { failed: usize, total: usize },

    #[error("{code}: insufficient history to collect stats ({got} < {want})")]
    InsufficientHistory { code: String, got: usize, want: usize },
}
