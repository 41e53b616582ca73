//! The feeds exported by a run, in dependency order

use super::types::{
    boolean, float, int, text, timestamp, FeedDescriptor, ScopedDelete, TruncatePolicy,
};
use crate::config::ExporterConfig;
use crate::error::{Error, Result};

pub const INSPECTIONS: &str = "inspections";
pub const INSPECTION_ITEMS: &str = "inspection_items";

/// Every feed, built from the resolved configuration
pub fn catalog(config: &ExporterConfig) -> Vec<FeedDescriptor> {
    vec![
        inspections(config),
        inspection_items(config),
        templates(),
        template_permissions(),
        sites(config),
        site_members(),
        users(),
        groups(),
        group_users(),
        schedules(config),
        schedule_assignees(config),
        schedule_occurrences(config),
        actions(config),
        action_assignees(),
        issues(config),
        issue_assignees(config),
        assets(config),
        training_course_progress(config),
    ]
}

/// Keep the feeds named in `tables`, or all of them when it is empty
pub fn select(feeds: Vec<FeedDescriptor>, tables: &[String]) -> Vec<FeedDescriptor> {
    if tables.is_empty() {
        return feeds;
    }
    feeds
        .into_iter()
        .filter(|f| tables.iter().any(|t| t.trim() == f.name))
        .collect()
}

/// Stable ordering where each feed follows the feed it depends on
///
/// Dependencies outside `feeds` are ignored: they are advisory, the
/// dependent feed still runs.
pub fn dependency_order(feeds: Vec<FeedDescriptor>) -> Result<Vec<FeedDescriptor>> {
    let names: Vec<&'static str> = feeds.iter().map(|f| f.name).collect();
    let mut pending = feeds;
    let mut ordered: Vec<FeedDescriptor> = Vec::with_capacity(pending.len());

    while !pending.is_empty() {
        let ready = pending.iter().position(|f| match f.depends_on {
            Some(dep) if names.contains(&dep) => ordered.iter().any(|o| o.name == dep),
            _ => true,
        });
        match ready {
            Some(i) => ordered.push(pending.remove(i)),
            None => {
                let stuck: Vec<_> = pending.iter().map(|f| f.name).collect();
                return Err(Error::config(format!(
                    "feeds have circular dependencies: {}",
                    stuck.join(", ")
                )));
            }
        }
    }
    Ok(ordered)
}

// ============================================================================
// Inspections
// ============================================================================

fn inspections(config: &ExporterConfig) -> FeedDescriptor {
    let inspection = &config.export.inspection;
    FeedDescriptor::new(INSPECTIONS, "/feed/inspections")
        .columns([
            text("audit_id").key("id"),
            text("name"),
            boolean("archived"),
            text("owner_name"),
            text("owner_id"),
            text("author_name"),
            text("author_id"),
            float("score"),
            float("max_score"),
            float("score_percentage"),
            int("duration"),
            text("template_id"),
            text("organisation_id"),
            text("template_name"),
            text("template_author"),
            text("site_id"),
            timestamp("date_started"),
            timestamp("date_completed").nullable(),
            timestamp("date_modified"),
            timestamp("created_at"),
            timestamp("modified_at"),
            text("document_no"),
            text("prepared_by"),
            text("location"),
            timestamp("conducted_on").nullable(),
            text("personnel"),
            text("client_site"),
            float("latitude").nullable(),
            float("longitude").nullable(),
            text("web_report_link"),
            boolean("deleted"),
        ])
        .primary_key(&["audit_id"])
        .order("modified_at ASC, audit_id")
        .incremental("modified_at")
        .request(|r| {
            r.repeated("template", &config.export.template_ids)
                .param_if_set("archived", &inspection.archived)
                .param_if_set("completed", &inspection.completed)
                .limit("limit", inspection.limit)
                .param_if_set("web_report_link", &inspection.web_report_link)
        })
        .skip_ids("audit_id", &inspection.skip_ids)
        .reconcile_deletions()
}

fn inspection_items(config: &ExporterConfig) -> FeedDescriptor {
    let inspection = &config.export.inspection;
    FeedDescriptor::new(INSPECTION_ITEMS, "/feed/inspection_items")
        .columns([
            text("id"),
            text("item_id"),
            text("audit_id"),
            int("item_index"),
            text("template_id"),
            text("parent_id"),
            timestamp("created_at"),
            timestamp("modified_at"),
            text("type"),
            text("category"),
            text("category_id"),
            text("organisation_id"),
            text("parent_ids"),
            text("label"),
            text("response"),
            text("response_id"),
            text("response_set_id"),
            boolean("is_failed_response"),
            text("comment"),
            text("media_files"),
            text("media_ids"),
            text("media_hypertext_reference"),
            float("score"),
            float("max_score"),
            float("score_percentage"),
            float("combined_score"),
            float("combined_max_score"),
            float("combined_score_percentage"),
            boolean("mandatory"),
            boolean("inactive"),
            float("location_latitude").nullable(),
            float("location_longitude").nullable(),
        ])
        .primary_key(&["id"])
        .order("modified_at ASC, id")
        .incremental("modified_at")
        .depends_on(INSPECTIONS)
        .request(|r| {
            r.repeated("template", &config.export.template_ids)
                .param_if_set("archived", &inspection.archived)
                .param_if_set("completed", &inspection.completed)
                .flag("include_inactive", inspection.included_inactive_items)
                .limit("limit", inspection.limit)
        })
        .skip_ids("audit_id", &inspection.skip_ids)
        .media(config.export.media)
}

// ============================================================================
// Templates
// ============================================================================

fn templates() -> FeedDescriptor {
    FeedDescriptor::new("templates", "/feed/templates")
        .columns([
            text("template_id").key("id"),
            boolean("archived"),
            text("name"),
            text("description"),
            text("organisation_id"),
            text("owner_name"),
            text("owner_id"),
            text("author_name"),
            text("author_id"),
            timestamp("created_at"),
            timestamp("modified_at"),
        ])
        .primary_key(&["template_id"])
        .order("modified_at ASC, template_id")
        .incremental("modified_at")
}

fn template_permissions() -> FeedDescriptor {
    FeedDescriptor::new("template_permissions", "/feed/template_permissions")
        .columns([
            text("permission_id").key("id"),
            text("template_id"),
            text("permission"),
            text("assignee_id"),
            text("assignee_type"),
            text("organisation_id"),
        ])
        .primary_key(&["permission_id"])
        .order("permission_id")
        .truncate(TruncatePolicy::Always)
        .depends_on("templates")
}

// ============================================================================
// Sites
// ============================================================================

fn sites(config: &ExporterConfig) -> FeedDescriptor {
    let site = &config.export.site;
    FeedDescriptor::new("sites", "/feed/sites")
        .columns([
            text("site_id").key("id"),
            text("name"),
            text("creator_id"),
            text("organisation_id"),
            boolean("deleted"),
            text("site_uuid"),
            text("meta_label"),
            text("parent_id"),
        ])
        .primary_key(&["site_id"])
        .order("site_id")
        .request(|r| {
            r.flag("include_deleted", site.include_deleted).param(
                "show_only_leaf_nodes",
                (!site.include_full_hierarchy).to_string(),
            )
        })
}

fn site_members() -> FeedDescriptor {
    FeedDescriptor::new("site_members", "/feed/site_members")
        .columns([text("site_id"), text("member_id")])
        .primary_key(&["site_id", "member_id"])
        .order("site_id, member_id")
        .depends_on("sites")
}

// ============================================================================
// Users and groups
// ============================================================================

fn users() -> FeedDescriptor {
    FeedDescriptor::new("users", "/feed/users")
        .columns([
            text("user_id").key("id"),
            text("organisation_id"),
            text("email"),
            text("firstname"),
            text("lastname"),
            boolean("active"),
            timestamp("last_seen_at").nullable(),
        ])
        .primary_key(&["user_id"])
        .order("user_id")
}

fn groups() -> FeedDescriptor {
    FeedDescriptor::new("groups", "/feed/groups")
        .columns([text("group_id").key("id"), text("name"), text("organisation_id")])
        .primary_key(&["group_id"])
        .order("group_id")
}

/// Memberships carry no modification time, so the organisation's rows are
/// replayed on every run
fn group_users() -> FeedDescriptor {
    FeedDescriptor::new("group_users", "/feed/group_users")
        .columns([text("user_id"), text("group_id"), text("organisation_id")])
        .primary_key(&["user_id", "group_id"])
        .order("group_id, user_id")
        .truncate(TruncatePolicy::Never)
        .scoped_delete(ScopedDelete::Organisation)
        .depends_on("groups")
}

// ============================================================================
// Schedules
// ============================================================================

fn schedules(config: &ExporterConfig) -> FeedDescriptor {
    FeedDescriptor::new("schedules", "/feed/schedules")
        .columns([
            text("schedule_id").key("id"),
            text("description"),
            text("recurrence"),
            text("duration"),
            timestamp("modified_at"),
            timestamp("from_date"),
            timestamp("to_date").nullable(),
            int("start_time_hour"),
            int("start_time_minute"),
            boolean("all_must_complete"),
            text("status"),
            text("organisation_id"),
            text("timezone"),
            boolean("can_late_submit"),
            text("site_id"),
            text("template_id"),
            text("creator_user_id"),
        ])
        .primary_key(&["schedule_id"])
        .order("schedule_id")
        .request(|r| r.repeated("template", &config.export.template_ids))
}

fn schedule_assignees(config: &ExporterConfig) -> FeedDescriptor {
    FeedDescriptor::new("schedule_assignees", "/feed/schedule_assignees")
        .columns([
            text("id"),
            text("schedule_id"),
            text("assignee_id"),
            text("organisation_id"),
            text("type"),
            text("name"),
        ])
        .primary_key(&["id"])
        .order("schedule_id, assignee_id")
        .truncate(TruncatePolicy::Always)
        .depends_on("schedules")
        .request(|r| r.repeated("template", &config.export.template_ids))
}

fn schedule_occurrences(config: &ExporterConfig) -> FeedDescriptor {
    FeedDescriptor::new("schedule_occurrences", "/feed/schedule_occurrences")
        .columns([
            text("id"),
            text("schedule_id"),
            text("occurrence_id"),
            text("template_id"),
            text("organisation_id"),
            timestamp("start_time").nullable(),
            timestamp("due_time").nullable(),
            timestamp("miss_time").nullable(),
            text("occurrence_status"),
            text("audit_id").nullable(),
            timestamp("completed_at").nullable(),
            text("user_id"),
            text("assignee_status"),
        ])
        .primary_key(&["id"])
        .order("occurrence_id ASC, schedule_id")
        .depends_on("schedules")
        .request(|r| r.repeated("template", &config.export.template_ids))
}

// ============================================================================
// Actions and issues
// ============================================================================

fn actions(config: &ExporterConfig) -> FeedDescriptor {
    FeedDescriptor::new("actions", "/feed/actions")
        .columns([
            text("action_id").key("id"),
            text("title"),
            text("description"),
            text("site_id"),
            text("priority"),
            text("status"),
            timestamp("due_date").nullable(),
            timestamp("created_at"),
            timestamp("modified_at"),
            text("creator_user_id"),
            text("creator_user_name"),
            text("template_id"),
            text("audit_id"),
            text("audit_title"),
            text("audit_item_id"),
            text("audit_item_label"),
            text("organisation_id"),
            timestamp("completed_at").nullable(),
        ])
        .primary_key(&["action_id"])
        .order("action_id")
        .incremental("modified_at")
        .request(|r| r.limit("limit", config.export.action.limit))
}

/// Assignees of an action are replaced whenever the action shows up again
fn action_assignees() -> FeedDescriptor {
    FeedDescriptor::new("action_assignees", "/feed/action_assignees")
        .columns([
            text("id"),
            text("action_id"),
            text("assignee_id"),
            text("type"),
            text("name"),
            text("organisation_id"),
            timestamp("modified_at"),
        ])
        .primary_key(&["id"])
        .order("action_id, assignee_id")
        .incremental("modified_at")
        .scoped_delete(ScopedDelete::Parent("action_id"))
        .depends_on("actions")
}

/// Issues and assets are full listings with no deletion signal
fn issues(config: &ExporterConfig) -> FeedDescriptor {
    FeedDescriptor::new("issues", "/feed/issues")
        .columns([
            text("id"),
            text("title"),
            text("description"),
            text("creator_id"),
            text("creator_user_name"),
            timestamp("created_at"),
            timestamp("due_at").nullable(),
            text("priority"),
            text("status"),
            text("template_id"),
            text("inspection_id"),
            text("inspection_name"),
            text("site_id"),
            text("site_name"),
            text("location_name"),
            text("category_id"),
            text("category_label"),
            timestamp("modified_at"),
            timestamp("completed_at").nullable(),
        ])
        .primary_key(&["id"])
        .order("id")
        .truncate(TruncatePolicy::Always)
        .request(|r| r.limit("limit", config.export.issue.limit))
}

fn issue_assignees(config: &ExporterConfig) -> FeedDescriptor {
    FeedDescriptor::new("issue_assignees", "/feed/issue_assignees")
        .columns([
            text("id"),
            text("issue_id"),
            text("assignee_id"),
            text("name"),
            text("organisation_id"),
            timestamp("modified_at"),
            text("type"),
        ])
        .primary_key(&["id"])
        .order("issue_id, assignee_id")
        .truncate(TruncatePolicy::WhenFullRefresh)
        .scoped_delete(ScopedDelete::Parent("issue_id"))
        .depends_on("issues")
        .request(|r| r.limit("limit", config.export.issue.limit))
}

// ============================================================================
// Assets and training
// ============================================================================

fn assets(config: &ExporterConfig) -> FeedDescriptor {
    FeedDescriptor::new("assets", "/feed/assets")
        .columns([
            text("asset_id").key("id"),
            text("code"),
            text("type_id"),
            text("type_name"),
            text("fields"),
            timestamp("created_at"),
            timestamp("modified_at"),
            text("site_id"),
            text("state"),
        ])
        .primary_key(&["asset_id"])
        .order("asset_id")
        .truncate(TruncatePolicy::Always)
        .request(|r| r.limit("limit", config.export.asset.limit))
}

fn training_course_progress(config: &ExporterConfig) -> FeedDescriptor {
    FeedDescriptor::new(
        "training_course_progress",
        "/feed/training-course-progress",
    )
    .columns([
        text("course_progress_id").key("id"),
        timestamp("opened_at").nullable(),
        timestamp("completed_at").nullable(),
        int("total_lessons"),
        int("completed_lessons"),
        text("course_id"),
        text("course_external_id"),
        text("course_title"),
        text("user_email"),
        text("user_first_name"),
        text("user_last_name"),
        text("user_id"),
        text("user_external_id"),
        float("progress_percent"),
        int("score"),
        timestamp("due_at").nullable(),
    ])
    .primary_key(&["course_id", "user_id"])
    .order("opened_at")
    .truncate(TruncatePolicy::WhenFullRefresh)
    .request(|r| r.limit("limit", config.export.course_progress.limit))
}
