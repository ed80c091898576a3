// File Filter Port
// Caller-supplied predicate deciding which planned files are transferred

use chrono::{DateTime, Utc};

/// A file considered for transfer
#[derive(Debug, Clone, Copy)]
pub struct FileCandidate<'a> {
    pub path: &'a str,
    /// Relative to the job source root, `/`-separated
    pub relative_path: &'a str,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

pub trait FileFilter: Send + Sync {
    fn accept(&self, candidate: &FileCandidate<'_>) -> bool;
}

/// Default filter
pub struct AcceptAll;

impl FileFilter for AcceptAll {
    fn accept(&self, _candidate: &FileCandidate<'_>) -> bool {
        true
    }
}

/// Adapts a closure into a filter
pub struct FnFilter<F>(pub F);

impl<F> FileFilter for FnFilter<F>
where
    F: Fn(&FileCandidate<'_>) -> bool + Send + Sync,
{
    fn accept(&self, candidate: &FileCandidate<'_>) -> bool {
        (self.0)(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fn_filter() {
        let filter = FnFilter(|c: &FileCandidate<'_>| !c.relative_path.ends_with(".tmp"));
        let keep = FileCandidate {
            path: "/a/b.txt",
            relative_path: "b.txt",
            size: 1,
            modified: None,
        };
        let temp = FileCandidate {
            relative_path: "b.tmp",
            ..keep
        };
        assert!(filter.accept(&keep));
        assert!(!filter.accept(&temp));
        assert!(AcceptAll.accept(&temp));
    }
}
