//! Store service — the single reducer-backed workspace.
//!
//! DESIGN
//! ======
//! All mutations go through [`Workspace::apply`], a pure state transition
//! keyed by [`Action`]. The workspace keeps a monotonically increasing
//! revision that bumps on every change that must reach disk; the persistence
//! task compares it against the last flushed revision instead of tracking
//! a separate dirty flag per collection.
//!
//! Selecting the current project and toggling the loading flag are session
//! state and never bump the revision.

use serde::{Deserialize, Serialize};

use crate::model::{AppSettings, GeneratedImage, Project, Reference, ReferenceCategory};

// =============================================================================
// ACTIONS
// =============================================================================

#[derive(Debug, Clone)]
pub enum Action {
    SetProjects(Vec<Project>),
    AddProject(Project),
    UpdateProject(Project),
    DeleteProject(String),
    SetCurrentProject(Option<Project>),
    SetReferences(Vec<Reference>),
    AddReference(Reference),
    UpdateReference(Reference),
    DeleteReference(String),
    SetGeneratedImages(Vec<GeneratedImage>),
    AddGeneratedImage(GeneratedImage),
    SetSettings(AppSettings),
    SetLoading(bool),
}

impl Action {
    /// `true` when the action changes persisted data.
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        !matches!(self, Self::SetCurrentProject(_) | Self::SetLoading(_))
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// The persisted blob. Every key is optional on load so a partial file only
/// overrides what it carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projects: Option<Vec<Project>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<Vec<Reference>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_images: Option<Vec<GeneratedImage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<AppSettings>,
}

// =============================================================================
// WORKSPACE
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct Workspace {
    pub projects: Vec<Project>,
    pub current_project: Option<Project>,
    pub references: Vec<Reference>,
    pub generated_images: Vec<GeneratedImage>,
    pub settings: AppSettings,
    pub loading: bool,
    revision: u64,
}

impl Workspace {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from a snapshot, replaying only the keys that are present.
    #[must_use]
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let mut workspace = Self::new();
        if let Some(projects) = snapshot.projects {
            workspace.apply(Action::SetProjects(projects));
        }
        if let Some(references) = snapshot.references {
            workspace.apply(Action::SetReferences(references));
        }
        if let Some(images) = snapshot.generated_images {
            workspace.apply(Action::SetGeneratedImages(images));
        }
        if let Some(settings) = snapshot.settings {
            workspace.apply(Action::SetSettings(settings));
        }
        workspace.revision = 0;
        workspace
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            projects: Some(self.projects.clone()),
            references: Some(self.references.clone()),
            generated_images: Some(self.generated_images.clone()),
            settings: Some(self.settings.clone()),
        }
    }

    /// Revision of persisted data. Starts at 0 after load.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Apply one action. Actions naming an unknown id leave the workspace
    /// unchanged apart from the revision bump.
    pub fn apply(&mut self, action: Action) {
        if action.is_persistent() {
            self.revision += 1;
        }

        match action {
            Action::SetProjects(projects) => self.projects = projects,
            Action::AddProject(project) => self.projects.push(project),
            Action::UpdateProject(project) => {
                if let Some(slot) = self.projects.iter_mut().find(|p| p.id == project.id) {
                    *slot = project.clone();
                }
                if self.current_project.as_ref().is_some_and(|c| c.id == project.id) {
                    self.current_project = Some(project);
                }
            }
            Action::DeleteProject(id) => {
                self.projects.retain(|p| p.id != id);
                if self.current_project.as_ref().is_some_and(|c| c.id == id) {
                    self.current_project = None;
                }
            }
            Action::SetCurrentProject(project) => self.current_project = project,
            Action::SetReferences(references) => self.references = references,
            Action::AddReference(reference) => self.references.push(reference),
            Action::UpdateReference(reference) => {
                if let Some(slot) = self.references.iter_mut().find(|r| r.id == reference.id) {
                    *slot = reference;
                }
            }
            Action::DeleteReference(id) => self.references.retain(|r| r.id != id),
            Action::SetGeneratedImages(images) => self.generated_images = images,
            Action::AddGeneratedImage(image) => self.generated_images.push(image),
            Action::SetSettings(settings) => self.settings = settings,
            Action::SetLoading(loading) => self.loading = loading,
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn project(&self, id: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.id == id)
    }

    #[must_use]
    pub fn reference(&self, id: &str) -> Option<&Reference> {
        self.references.iter().find(|r| r.id == id)
    }

    /// References matching an optional category and project.
    #[must_use]
    pub fn references_matching(&self, category: Option<ReferenceCategory>, project_id: Option<&str>) -> Vec<Reference> {
        self.references
            .iter()
            .filter(|r| category.is_none_or(|c| r.category == c))
            .filter(|r| project_id.is_none_or(|p| r.project_id == p))
            .cloned()
            .collect()
    }

    /// Count of references in each category, in [`ReferenceCategory::ALL`] order.
    #[must_use]
    pub fn reference_counts(&self) -> Vec<(ReferenceCategory, usize)> {
        ReferenceCategory::ALL
            .into_iter()
            .map(|c| (c, self.references.iter().filter(|r| r.category == c).count()))
            .collect()
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
