mod events;
mod jobs;
mod results;

pub use events::*;
pub use jobs::*;
pub use results::*;

use miette::Diagnostic;
use thiserror::Error;

use crate::QueryError;

/// Offset-paginated listings over the partitioned tables refuse to walk
/// deeper than this many pages unless the caller narrows the scan with a
/// time window.
pub const MAX_UNWINDOWED_PAGES: u32 = 100;

#[derive(Debug, Error, Diagnostic)]
pub enum ListError {
    #[error(
        "page {page} is past the deep-pagination limit of {max} pages; \
        narrow the listing with a time window"
    )]
    DeepOffset { page: u32, max: u32 },

    #[error(transparent)]
    Db(#[from] QueryError),
}

pub(crate) fn guard_page_depth(page: u32, windowed: bool) -> Result<(), ListError> {
    if !windowed && page > MAX_UNWINDOWED_PAGES {
        return Err(ListError::DeepOffset {
            page,
            max: MAX_UNWINDOWED_PAGES,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_depth_guard_rejects_deep_unwindowed_offsets() {
        assert!(guard_page_depth(0, false).is_ok());
        assert!(guard_page_depth(MAX_UNWINDOWED_PAGES, false).is_ok());
        assert!(matches!(
            guard_page_depth(MAX_UNWINDOWED_PAGES + 1, false),
            Err(ListError::DeepOffset { .. })
        ));
        // A window lifts the limit entirely
        assert!(guard_page_depth(MAX_UNWINDOWED_PAGES + 1, true).is_ok());
        assert!(guard_page_depth(10_000, true).is_ok());
    }
}
