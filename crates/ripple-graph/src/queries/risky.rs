//! Files concentrating the most issues.

use std::collections::BTreeMap;

use ripple_core::Severity;
use serde::Serialize;

use super::ImpactAnalyzer;
use crate::control::QueryControl;
use crate::error::GraphResult;

/// Parameters of [`ImpactAnalyzer::find_risky_files`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskyFilesQuery {
    /// Files with fewer matching issues are dropped. Zero keeps every file.
    pub min_issues: usize,
    /// Severities to count. Empty means all.
    pub severities: Vec<Severity>,
    pub limit: usize,
}

impl Default for RiskyFilesQuery {
    fn default() -> Self {
        Self {
            min_issues: 1,
            severities: Vec::new(),
            limit: 10,
        }
    }
}

impl RiskyFilesQuery {
    pub fn with_min_issues(mut self, min_issues: usize) -> Self {
        self.min_issues = min_issues;
        self
    }

    pub fn with_severities(mut self, severities: impl IntoIterator<Item = Severity>) -> Self {
        self.severities = severities.into_iter().collect();
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RiskyFile {
    pub path: String,
    pub issue_count: usize,
    pub by_severity: BTreeMap<Severity, usize>,
}

impl ImpactAnalyzer {
    /// Files ranked by linked issue count, descending; ties by path ascending.
    pub async fn find_risky_files(
        &self,
        query: &RiskyFilesQuery,
        control: &QueryControl,
    ) -> GraphResult<Vec<RiskyFile>> {
        let control = self.effective_control(control);
        let scope = control.start();

        let rows = scope
            .run(self.store.file_issue_counts(&query.severities))
            .await?;
        let mut files: BTreeMap<String, RiskyFile> = BTreeMap::new();
        if query.min_issues == 0 {
            // Issue-free files meet a zero threshold too.
            for path in scope.run(self.store.file_paths()).await? {
                files.insert(
                    path.clone(),
                    RiskyFile {
                        path,
                        issue_count: 0,
                        by_severity: BTreeMap::new(),
                    },
                );
            }
        }
        for row in rows {
            let file = files.entry(row.file_path.clone()).or_insert_with(|| RiskyFile {
                path: row.file_path,
                issue_count: 0,
                by_severity: BTreeMap::new(),
            });
            file.issue_count += row.issues;
            *file.by_severity.entry(row.severity).or_default() += row.issues;
        }

        let mut ranked: Vec<RiskyFile> = files
            .into_values()
            .filter(|f| f.issue_count >= query.min_issues)
            .collect();
        ranked.sort_by(|a, b| b.issue_count.cmp(&a.issue_count).then_with(|| a.path.cmp(&b.path)));
        ranked.truncate(query.limit);
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::GraphClient;
    use ripple_core::{Finding, GraphBuilder};

    async fn issue_graph() -> GraphClient {
        let findings = vec![
            Finding::new("B#one:1", "SELECT * FROM t1", Severity::High).with_issue("full_scan"),
            Finding::new("B#two:2", "SELECT * FROM t2", Severity::Low).with_issue("select_star"),
            Finding::new("A#one:1", "SELECT * FROM t1", Severity::High).with_issue("full_scan"),
            Finding::new("A#two:2", "SELECT * FROM t2", Severity::High).with_issue("full_scan"),
            Finding::new("C#one:1", "SELECT * FROM t3", Severity::Critical).with_issue("n_plus_one"),
            Finding::new("D#one:1", "SELECT * FROM t3", Severity::Low),
        ];
        let client = GraphClient::in_memory();
        client
            .import(&GraphBuilder::java().build(findings))
            .await
            .unwrap();
        client
    }

    fn paths(files: &[RiskyFile]) -> Vec<&str> {
        files.iter().map(|f| f.path.as_str()).collect()
    }

    #[tokio::test]
    async fn test_ranking_breaks_ties_by_path() {
        let client = issue_graph().await;
        let risky = client
            .analyzer()
            .find_risky_files(&RiskyFilesQuery::default(), &QueryControl::none())
            .await
            .unwrap();
        assert_eq!(paths(&risky), vec!["A.java", "B.java", "C.java"]);
        assert_eq!(risky[0].issue_count, 2);
        assert_eq!(risky[1].by_severity[&Severity::Low], 1);
    }

    #[tokio::test]
    async fn test_severity_filter_min_issues_and_limit() {
        let client = issue_graph().await;
        let analyzer = client.analyzer();

        let high = RiskyFilesQuery::default().with_severities([Severity::High]);
        let risky = analyzer.find_risky_files(&high, &QueryControl::none()).await.unwrap();
        assert_eq!(paths(&risky), vec!["A.java", "B.java"]);
        assert_eq!(risky[1].issue_count, 1);

        let busy = RiskyFilesQuery::default().with_min_issues(2);
        let risky = analyzer.find_risky_files(&busy, &QueryControl::none()).await.unwrap();
        assert_eq!(paths(&risky), vec!["A.java", "B.java"]);

        let top = RiskyFilesQuery::default().with_limit(1);
        let risky = analyzer.find_risky_files(&top, &QueryControl::none()).await.unwrap();
        assert_eq!(paths(&risky), vec!["A.java"]);
    }

    #[tokio::test]
    async fn test_zero_threshold_keeps_issue_free_files() {
        let client = issue_graph().await;
        let all = RiskyFilesQuery::default().with_min_issues(0).with_limit(10);
        let risky = client
            .analyzer()
            .find_risky_files(&all, &QueryControl::none())
            .await
            .unwrap();
        assert_eq!(paths(&risky), vec!["A.java", "B.java", "C.java", "D.java"]);
        let quiet = risky.iter().find(|f| f.path == "D.java").unwrap();
        assert_eq!(quiet.issue_count, 0);
        assert!(quiet.by_severity.is_empty());
    }

    #[tokio::test]
    async fn test_ordering_is_stable() {
        let client = issue_graph().await;
        let analyzer = client.analyzer();
        let first = analyzer
            .find_risky_files(&RiskyFilesQuery::default(), &QueryControl::none())
            .await
            .unwrap();
        let second = analyzer
            .find_risky_files(&RiskyFilesQuery::default(), &QueryControl::none())
            .await
            .unwrap();
        assert_eq!(first, second);
    }
}
