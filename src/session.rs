//! Start/stop detection from consecutive receiver status snapshots.
//!
//! The device only ever reports the full list of running applications; which ones
//! appeared or went away is derived here, keyed by app id.

use crate::{
    payload::receiver::Session,
    types::app,
};
use std::collections::BTreeSet;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionDiff {
    /// In the current snapshot, with an app id absent from the previous one.
    pub started: Vec<Session>,

    /// In the previous snapshot, with an app id absent from the current one.
    pub stopped: Vec<Session>,
}

impl SessionDiff {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty()
    }
}

pub fn diff_sessions(prev: &[Session], cur: &[Session]) -> SessionDiff {
    let prev_ids = app_ids(prev);
    let cur_ids = app_ids(cur);

    SessionDiff {
        started: cur.iter()
                    .filter(|s| !prev_ids.contains(s.app_id.as_str()))
                    .cloned()
                    .collect(),
        stopped: prev.iter()
                     .filter(|s| !cur_ids.contains(s.app_id.as_str()))
                     .cloned()
                     .collect(),
    }
}

/// The session to attach a status-only player to, if any.
///
/// Only when exactly one application is running and it is neither the default
/// media receiver nor the video app, which get typed players of their own.
pub fn passive_player_candidate(cur: &[Session]) -> Option<&Session> {
    let [only] = cur else {
        return None;
    };

    match only.app_id.as_str() {
        app::DEFAULT_MEDIA_RECEIVER | app::YOUTUBE => None,
        _ => Some(only),
    }
}

fn app_ids(sessions: &[Session]) -> BTreeSet<&str> {
    sessions.iter().map(|s| s.app_id.as_str()).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    fn sessions(app_ids: &[&str]) -> Vec<Session> {
        app_ids.iter()
               .map(|id| Session {
                   app_id: id.to_string(),
                   session_id: format!("session-{id}"),
                   transport_id: format!("transport-{id}"),
                   ..Session::default()
               })
               .collect()
    }

    fn ids(sessions: &[Session]) -> Vec<&str> {
        sessions.iter().map(|s| s.app_id.as_str()).collect()
    }

    #[rstest]
    #[case(&["A", "B"], &["B", "C"], &["C"], &["A"])]
    #[case(&["A", "B"], &["A", "B"], &[], &[])]
    #[case(&[], &["A"], &["A"], &[])]
    #[case(&["A"], &[], &[], &["A"])]
    #[case(&[], &[], &[], &[])]
    fn diff(#[case] prev: &[&str],
            #[case] cur: &[&str],
            #[case] started: &[&str],
            #[case] stopped: &[&str])
    {
        let diff = diff_sessions(&sessions(prev), &sessions(cur));

        assert_eq!(ids(&diff.started), started);
        assert_eq!(ids(&diff.stopped), stopped);
        assert_eq!(diff.is_empty(), started.is_empty() && stopped.is_empty());
    }

    #[test]
    fn relaunch_same_app_is_not_a_change() {
        let prev = sessions(&["A"]);
        let mut cur = sessions(&["A"]);
        cur[0].session_id = "session-A-2".to_string();

        assert!(diff_sessions(&prev, &cur).is_empty());
    }

    #[rstest]
    #[case(&["CC32E753"], Some("CC32E753"))]
    #[case(&[app::DEFAULT_MEDIA_RECEIVER], None)]
    #[case(&[app::YOUTUBE], None)]
    #[case(&["CC32E753", "DEADBEEF"], None)]
    #[case(&[], None)]
    fn passive_player(#[case] running: &[&str], #[case] expected: Option<&str>) {
        let running = sessions(running);

        assert_eq!(passive_player_candidate(&running).map(|s| s.app_id.as_str()), expected);
    }
}
