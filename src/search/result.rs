use crate::error::AppResult;
use crate::models::{RawEntry, ResumeToken};

/// Outcome of a completed scan
///
/// `entries` is present only when the scan materialized its results.
/// `count_is_exact` is true only when the scan ran until the backend reported
/// no further matches; any early stop leaves it false.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultContainer<T = RawEntry> {
    pub entries: Option<Vec<T>>,
    pub total_count: usize,
    pub count_is_exact: bool,
    pub start_index: u64,
    pub round_trips: usize,
    /// Where a follow-up scan could continue; `None` once the backend is exhausted
    pub resume_token: Option<ResumeToken>,
}

impl<T> ResultContainer<T> {
    pub fn entries(&self) -> &[T] {
        self.entries.as_deref().unwrap_or(&[])
    }

    pub fn into_entries(self) -> Vec<T> {
        self.entries.unwrap_or_default()
    }

    pub fn is_materialized(&self) -> bool {
        self.entries.is_some()
    }

    /// Convert materialized entries, keeping the scan metadata
    pub fn map_entries<U, F>(self, mut convert: F) -> AppResult<ResultContainer<U>>
    where
        F: FnMut(T) -> AppResult<U>,
    {
        let entries = match self.entries {
            Some(entries) => Some(
                entries
                    .into_iter()
                    .map(&mut convert)
                    .collect::<AppResult<Vec<U>>>()?,
            ),
            None => None,
        };

        Ok(ResultContainer {
            entries,
            total_count: self.total_count,
            count_is_exact: self.count_is_exact,
            start_index: self.start_index,
            round_trips: self.round_trips,
            resume_token: self.resume_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    fn container(entries: Option<Vec<RawEntry>>) -> ResultContainer {
        ResultContainer {
            total_count: entries.as_ref().map(|e| e.len()).unwrap_or(7),
            entries,
            count_is_exact: true,
            start_index: 0,
            round_trips: 1,
            resume_token: None,
        }
    }

    #[test]
    fn test_map_entries_keeps_metadata() {
        let c = container(Some(vec![
            RawEntry::new("uid=a,o=gluu"),
            RawEntry::new("uid=b,o=gluu"),
        ]));
        let mapped = c.map_entries(|e| Ok(e.dn)).unwrap();
        assert_eq!(
            mapped.entries().to_vec(),
            vec!["uid=a,o=gluu".to_string(), "uid=b,o=gluu".to_string()]
        );
        assert_eq!(mapped.total_count, 2);
        assert!(mapped.count_is_exact);
    }

    #[test]
    fn test_map_entries_propagates_errors() {
        let c = container(Some(vec![RawEntry::new("uid=a,o=gluu")]));
        let result: AppResult<ResultContainer<String>> =
            c.map_entries(|_| Err(AppError::Internal("decode".to_string())));
        assert!(result.is_err());
    }

    #[test]
    fn test_streamed_container_has_no_entries() {
        let c = container(None);
        assert!(!c.is_materialized());
        assert!(c.entries().is_empty());
        assert_eq!(c.total_count, 7);
    }
}
