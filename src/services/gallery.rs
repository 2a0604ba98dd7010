//! Gallery service — image search, filtering, and usage statistics.
//!
//! Everything here is a read-only view over workspace records; nothing
//! mutates state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::model::{AiModel, GeneratedImage, ProjectTemplate, ReferenceCategory};
use crate::services::store::Workspace;

const MS_PER_DAY: i64 = 86_400_000;
const POPULAR_TAG_LIMIT: usize = 6;

// =============================================================================
// FILTERING
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    #[default]
    Date,
    Name,
    /// Images carry no rating yet; ordered like `Date`.
    Rating,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GalleryQuery {
    pub project_id: Option<String>,
    pub search: Option<String>,
    /// Exact tag match; `all` disables the filter.
    pub tag: Option<String>,
    #[serde(default)]
    pub sort: SortBy,
}

/// Apply project scope, free-text search, tag filter, and ordering.
#[must_use]
pub fn filter_images(images: &[GeneratedImage], query: &GalleryQuery) -> Vec<GeneratedImage> {
    let needle = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase);
    let tag = query.tag.as_deref().filter(|t| !t.is_empty() && *t != "all");

    let mut out: Vec<GeneratedImage> = images
        .iter()
        .filter(|img| query.project_id.as_deref().is_none_or(|p| img.project_id == p))
        .filter(|img| needle.as_deref().is_none_or(|n| matches_search(img, n)))
        .filter(|img| tag.is_none_or(|t| img.metadata.tags.iter().any(|x| x == t)))
        .cloned()
        .collect();

    match query.sort {
        SortBy::Date | SortBy::Rating => out.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        SortBy::Name => out.sort_by(|a, b| a.filename.cmp(&b.filename)),
    }
    out
}

fn matches_search(img: &GeneratedImage, needle: &str) -> bool {
    img.filename.to_lowercase().contains(needle)
        || img.prompt.to_lowercase().contains(needle)
        || img
            .metadata
            .tags
            .iter()
            .any(|t| t.to_lowercase().contains(needle))
}

// =============================================================================
// STATISTICS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "7d")]
    Week,
    #[default]
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "90d")]
    Quarter,
    #[serde(rename = "all")]
    All,
}

impl TimeRange {
    fn days(self) -> Option<i64> {
        match self {
            Self::Week => Some(7),
            Self::Month => Some(30),
            Self::Quarter => Some(90),
            Self::All => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub total_projects: usize,
    pub total_images: usize,
    pub total_references: usize,
    pub images_in_range: usize,
    pub total_image_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyCount {
    pub date: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelUsage {
    pub model: AiModel,
    pub label: &'static str,
    pub count: usize,
    pub percentage: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStat {
    pub id: String,
    pub name: String,
    pub image_count: usize,
    pub template: ProjectTemplate,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub overview: Overview,
    pub reference_categories: Vec<(ReferenceCategory, usize)>,
    pub daily_generations: Vec<DailyCount>,
    pub model_usage: Vec<ModelUsage>,
    pub popular_tags: Vec<TagCount>,
    pub project_stats: Vec<ProjectStat>,
    pub exported_at: i64,
}

/// Compute usage statistics as of `now_ms` for images inside `range`.
#[must_use]
pub fn statistics(workspace: &Workspace, range: TimeRange, now_ms: i64) -> Statistics {
    let cutoff = range.days().map(|d| now_ms - d * MS_PER_DAY);
    let in_range: Vec<&GeneratedImage> = workspace
        .generated_images
        .iter()
        .filter(|img| cutoff.is_none_or(|c| img.created_at >= c))
        .collect();

    let overview = Overview {
        total_projects: workspace.projects.len(),
        total_images: workspace.generated_images.len(),
        total_references: workspace.references.len(),
        images_in_range: in_range.len(),
        total_image_bytes: workspace.generated_images.iter().map(|i| i.metadata.size).sum(),
    };

    let mut project_stats: Vec<ProjectStat> = workspace
        .projects
        .iter()
        .map(|p| ProjectStat {
            id: p.id.clone(),
            name: p.name.clone(),
            image_count: workspace
                .generated_images
                .iter()
                .filter(|img| img.project_id == p.id)
                .count(),
            template: p.template,
            created_at: p.created_at,
        })
        .collect();
    project_stats.sort_by(|a, b| b.image_count.cmp(&a.image_count));

    Statistics {
        overview,
        reference_categories: workspace.reference_counts(),
        daily_generations: daily_generations(&in_range),
        model_usage: model_usage(&in_range),
        popular_tags: popular_tags(&in_range, POPULAR_TAG_LIMIT),
        project_stats,
        exported_at: now_ms,
    }
}

/// Per-day generation counts, oldest day first. Days are UTC.
fn daily_generations(images: &[&GeneratedImage]) -> Vec<DailyCount> {
    let mut by_day: HashMap<i64, usize> = HashMap::new();
    for img in images {
        *by_day.entry(img.created_at.div_euclid(MS_PER_DAY)).or_default() += 1;
    }
    let mut days: Vec<(i64, usize)> = by_day.into_iter().collect();
    days.sort_unstable_by_key(|(day, _)| *day);
    days.into_iter()
        .map(|(day, count)| DailyCount { date: format_day(day), count })
        .collect()
}

fn format_day(day: i64) -> String {
    OffsetDateTime::from_unix_timestamp(day * 86_400).map_or_else(
        |_| day.to_string(),
        |dt| {
            let date = dt.date();
            format!("{:04}-{:02}-{:02}", date.year(), u8::from(date.month()), date.day())
        },
    )
}

fn model_usage(images: &[&GeneratedImage]) -> Vec<ModelUsage> {
    let total = images.len();
    let mut usage: Vec<ModelUsage> = AiModel::ALL
        .into_iter()
        .map(|model| {
            let count = images.iter().filter(|i| i.settings.model == model).count();
            ModelUsage { model, label: model.label(), count, percentage: percent(count, total) }
        })
        .collect();
    usage.sort_by(|a, b| b.count.cmp(&a.count));
    usage
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn percent(count: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((count as f64 / total as f64) * 100.0).round() as u32
}

fn popular_tags(images: &[&GeneratedImage], limit: usize) -> Vec<TagCount> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for img in images {
        for tag in &img.metadata.tags {
            *counts.entry(tag.as_str()).or_default() += 1;
        }
    }
    let mut tags: Vec<TagCount> = counts
        .into_iter()
        .map(|(tag, count)| TagCount { tag: tag.to_string(), count })
        .collect();
    tags.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));
    tags.truncate(limit);
    tags
}

#[cfg(test)]
#[path = "gallery_test.rs"]
mod tests;
