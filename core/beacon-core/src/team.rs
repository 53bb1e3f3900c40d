//! Collapsing agent teams.
//!
//! When several sessions share a working directory (a lead agent and its
//! teammates), the list shows one representative per directory.

use std::cmp::Ordering;

use crate::session::{normalize_path, Session};

/// Picks the session that best represents a group sharing one cwd.
///
/// Unacknowledged waiting beats acknowledged waiting beats running. Among
/// waiting sessions the most recently updated wins; in an all-running group
/// the oldest wins.
pub fn select_representative(group: &[Session]) -> Option<&Session> {
    group.iter().max_by(|a, b| compare(a, b))
}

fn tier(session: &Session) -> u8 {
    match (session.is_waiting(), session.is_acknowledged) {
        (true, false) => 2,
        (true, true) => 1,
        (false, _) => 0,
    }
}

fn compare(a: &Session, b: &Session) -> Ordering {
    tier(a).cmp(&tier(b)).then_with(|| {
        if a.is_waiting() {
            a.updated_at.cmp(&b.updated_at)
        } else {
            b.created_at.cmp(&a.created_at)
        }
    })
}

/// One representative per normalized cwd, in order of each group's first
/// appearance.
pub fn collapse(sessions: &[Session]) -> Vec<Session> {
    let mut groups: Vec<(String, Vec<Session>)> = Vec::new();
    for session in sessions {
        let key = normalize_path(&session.cwd);
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(session.clone()),
            None => groups.push((key, vec![session.clone()])),
        }
    }
    groups
        .iter()
        .filter_map(|(_, members)| select_representative(members).cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::WaitingReason;
    use chrono::{Duration, TimeZone, Utc};

    fn make_session(id: &str, cwd: &str, secs: i64) -> Session {
        let at = Utc.with_ymd_and_hms(2026, 1, 27, 10, 0, 0).unwrap() + Duration::seconds(secs);
        Session::new(id, cwd, None, at)
    }

    fn waiting(id: &str, cwd: &str, secs: i64) -> Session {
        let mut s = make_session(id, cwd, secs);
        s.enter_waiting(WaitingReason::Stop);
        s
    }

    #[test]
    fn test_unacknowledged_waiting_beats_running() {
        let group = vec![
            make_session("lead", "/work/app", 0),
            waiting("mate", "/work/app", 5),
            make_session("mate2", "/work/app", 10),
        ];
        assert_eq!(select_representative(&group).unwrap().session_id, "mate");
    }

    #[test]
    fn test_unacknowledged_beats_acknowledged() {
        let mut acked = waiting("acked", "/work/app", 50);
        acked.is_acknowledged = true;
        let group = vec![acked, waiting("fresh", "/work/app", 10)];
        assert_eq!(select_representative(&group).unwrap().session_id, "fresh");
    }

    #[test]
    fn test_most_recent_waiting_wins_ties() {
        let group = vec![waiting("older", "/work/app", 1), waiting("newer", "/work/app", 9)];
        assert_eq!(select_representative(&group).unwrap().session_id, "newer");
    }

    #[test]
    fn test_all_running_prefers_oldest() {
        let group = vec![
            make_session("young", "/work/app", 30),
            make_session("lead", "/work/app", 0),
        ];
        assert_eq!(select_representative(&group).unwrap().session_id, "lead");
        assert!(select_representative(&[]).is_none());
    }

    #[test]
    fn test_collapse_groups_by_normalized_cwd() {
        let sessions = vec![
            make_session("a1", "/work/a", 0),
            make_session("b1", "/work/b", 1),
            waiting("a2", "/work/a/", 2),
        ];
        let collapsed = collapse(&sessions);
        let ids: Vec<_> = collapsed.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["a2", "b1"]);
    }
}
