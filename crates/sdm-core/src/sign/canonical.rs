//! Canonical serialization of goal events for signing.
//!
//! Signatures are computed over a deterministic, line-structured rendering
//! of the goal event. Structured fields are flattened in a fixed order and
//! absent optional fields render as the literal `undefined`, so two events
//! that differ in any signed field produce different canonical strings.

use crate::goal::SdmGoalEvent;

fn opt(value: Option<&str>) -> &str {
    value.unwrap_or("undefined")
}

/// Renders the canonical form of a goal event.
///
/// The signature field itself is not part of the canonical form.
#[must_use]
pub fn canonical_form(goal: &SdmGoalEvent) -> String {
    let pre_conditions = goal
        .pre_conditions
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let external_urls = goal
        .external_urls
        .iter()
        .map(|u| u.url.clone())
        .collect::<Vec<_>>()
        .join(",");
    let provenance = goal
        .provenance
        .iter()
        .map(crate::goal::Provenance::canonical)
        .collect::<Vec<_>>()
        .join(",");
    let approval = goal.approval.as_ref().map(|p| p.canonical());
    let pre_approval = goal.pre_approval.as_ref().map(|p| p.canonical());

    [
        format!("uniqueName:{}", goal.unique_name),
        format!("environment:{}", goal.environment),
        format!("goalSetId:{}", goal.goal_set_id),
        format!("state:{}", goal.state),
        format!("ts:{}", goal.ts),
        format!("version:{}", goal.version),
        format!("repo:{}", goal.repo.slug()),
        format!("sha:{}", goal.sha),
        format!("branch:{}", goal.branch),
        format!(
            "fulfillment:{}-{}",
            goal.fulfillment.name,
            goal.fulfillment.method.as_str()
        ),
        format!("preConditions:{pre_conditions}"),
        format!("data:{}", opt(goal.data.as_deref())),
        format!("url:{}", opt(goal.url.as_deref())),
        format!("externalUrls:{external_urls}"),
        format!("provenance:{provenance}"),
        format!("retry:{}", goal.retry_feasible),
        format!("approvalRequired:{}", goal.approval_required),
        format!("approval:{}", opt(approval.as_deref())),
        format!("preApprovalRequired:{}", goal.pre_approval_required),
        format!("preApproval:{}", opt(pre_approval.as_deref())),
    ]
    .join("\n")
}
