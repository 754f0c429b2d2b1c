//! Desired versus observed pipeline set for one repository.
//!
//! A `RepositoryBuildConfiguration` is a snapshot: the repository with its
//! requested branches, and the stacks the registry currently holds for it.
//! All comparisons between branch names and stack branch tags are
//! case-insensitive.

use std::collections::HashSet;

use serde::Serialize;

use super::models::{Branch, Repository, StackInformation};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepositoryBuildConfiguration {
    pub repository: Repository,
    pub provisioned: Vec<StackInformation>,
}

impl RepositoryBuildConfiguration {
    pub fn new(repository: Repository, provisioned: Vec<StackInformation>) -> Self {
        Self {
            repository,
            provisioned,
        }
    }

    /// Branches that should have a pipeline. Always contains the default
    /// branch when it exists in the branch listing.
    pub fn requested_branches(&self) -> Vec<&Branch> {
        self.repository.branches.iter().filter(|b| b.requested).collect()
    }

    /// Requested branches without a provisioned stack. Names differing only
    /// in case are one target; the first listed branch wins.
    pub fn new_monitored_branches(&self) -> Vec<&Branch> {
        let mut seen: HashSet<String> = self
            .provisioned
            .iter()
            .map(|s| s.branch_name.to_lowercase())
            .collect();
        self.requested_branches()
            .into_iter()
            .filter(|b| seen.insert(b.name.to_lowercase()))
            .collect()
    }

    /// Provisioned stacks whose branch is no longer requested, including
    /// stacks of branches that were deleted from the repository.
    pub fn obsolete_pipelines(&self) -> Vec<&StackInformation> {
        let requested: HashSet<String> = self
            .requested_branches()
            .iter()
            .map(|b| b.name.to_lowercase())
            .collect();
        self.provisioned
            .iter()
            .filter(|s| !requested.contains(&s.branch_name.to_lowercase()))
            .collect()
    }
}
