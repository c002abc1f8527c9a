//! Group aggregation and ranking.
//!
//! Pure functions that turn per-member analyses into a [`GroupSummary`] and
//! per-group snapshots into a [`GroupComparison`]. No I/O happens here.

use crate::models::{
    EntityAnalysis, GroupComparison, GroupKey, GroupMember, GroupSnapshot, GroupSummary,
};
use chrono::Utc;
use std::cmp::Ordering;

/// Members shown in a summary's top list.
pub const TOP_MEMBERS: usize = 5;

/// Keep the `limit` heaviest members, ties in original order.
///
/// A `limit` of zero keeps everyone.
pub fn select_members(mut members: Vec<GroupMember>, limit: usize) -> Vec<GroupMember> {
    if limit == 0 || members.len() <= limit {
        return members;
    }

    // Stable sort keeps original order among equal weights.
    members.sort_by(|a, b| descending(a.effective_weight(), b.effective_weight()));
    members.truncate(limit);
    members
}

/// Aggregate member results into a group summary.
///
/// `results` holds only the members that were analyzed successfully, each
/// with its weight attached.
pub fn summarize(
    group: GroupKey,
    name: Option<String>,
    mut results: Vec<EntityAnalysis>,
) -> GroupSummary {
    let member_count = results.len();
    let total_weight: f64 = results.iter().map(|r| r.weight).sum();

    let weighted_mean = |value: fn(&EntityAnalysis) -> f64| {
        if total_weight > 0.0 {
            results.iter().map(|r| value(r) * r.weight).sum::<f64>() / total_weight
        } else {
            0.0
        }
    };
    let score = round2(weighted_mean(|r| r.score));
    let weighted_change = weighted_mean(|r| r.price_change_percent);

    let up_count = results
        .iter()
        .filter(|r| r.price_change_percent > 0.0)
        .count();
    let down_count = results
        .iter()
        .filter(|r| r.price_change_percent < 0.0)
        .count();
    let flat_count = member_count - up_count - down_count;
    let up_ratio = if member_count > 0 {
        up_count as f64 / member_count as f64
    } else {
        0.0
    };

    results.sort_by(|a, b| descending(a.score, b.score));
    let top_members = results.iter().take(TOP_MEMBERS).cloned().collect();

    GroupSummary {
        group,
        name,
        score,
        member_count,
        up_count,
        down_count,
        flat_count,
        up_ratio,
        weighted_change,
        top_members,
        all_results: results,
        computed_at: Utc::now(),
    }
}

/// Rank snapshots by change, best first.
///
/// `top` is the first `limit` entries and `bottom` the last `limit`, both in
/// ranked order.
pub fn rank_snapshots(mut snapshots: Vec<GroupSnapshot>, limit: usize) -> GroupComparison {
    snapshots.sort_by(|a, b| descending(a.change, b.change));

    let count = snapshots.len();
    let take = limit.min(count);
    let top = snapshots[..take].to_vec();
    let bottom = snapshots[count - take..].to_vec();

    GroupComparison {
        count,
        top,
        bottom,
        results: snapshots,
    }
}

fn descending(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
