use std::fmt;

/// What a target URL points at, which decides how its body is parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// An HTML page persisted as a single document
    Page,
    /// An RSS or Atom feed whose entries are persisted individually
    Feed,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Feed => "feed",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work: one URL to collect
///
/// Targets are immutable once enqueued and consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub url: String,
    pub kind: TargetKind,
}

impl Target {
    pub fn new(url: impl Into<String>, kind: TargetKind) -> Self {
        Self {
            url: url.into(),
            kind,
        }
    }

    pub fn page(url: impl Into<String>) -> Self {
        Self::new(url, TargetKind::Page)
    }

    pub fn feed(url: impl Into<String>) -> Self {
        Self::new(url, TargetKind::Feed)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.url, self.kind)
    }
}
