// src/services/composer.rs

//! Notification text and reply threading.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};

use crate::models::{
    DiffReference, NotificationDraft, NotifyConfig, PostId, Subject, ThreadPlacement, ThreadState,
};

/// Turn a name into a hashtag.
///
/// Names made of several letter runs ("Müller-Lüdenscheidt", "O'Neil") are
/// joined into one word. A single run keeps its spelling.
pub fn hashtag(name: &str) -> String {
    let name = name.trim();
    let runs: Vec<&str> = name
        .split(|c: char| !c.is_alphabetic())
        .filter(|run| !run.is_empty())
        .collect();

    if runs.len() > 1 {
        format!("#{}", runs.concat())
    } else {
        format!("#{name}")
    }
}

/// Name shown in a notification, or `None` if the subject has none.
pub fn display_name(subject: &Subject) -> Option<String> {
    let first = subject.first_name.trim();
    let last = subject.last_name.trim();

    let name = match (first.is_empty(), last.is_empty()) {
        (false, false) => format!("{first} {}", hashtag(last)),
        (true, false) => hashtag(last),
        _ => subject.display_name.trim().to_string(),
    };

    (!name.is_empty()).then_some(name)
}

/// The subject has no usable name; the edit is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameUnavailable {
    pub subject_key: String,
}

impl fmt::Display for NameUnavailable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no display name for '{}'", self.subject_key)
    }
}

/// Per-subject memory of the last published notification.
#[derive(Debug, Clone)]
pub struct ThreadTracker {
    threads: HashMap<String, ThreadState>,
    window: TimeDelta,
}

impl ThreadTracker {
    pub fn new(window: TimeDelta) -> Self {
        Self {
            threads: HashMap::new(),
            window,
        }
    }

    /// Reply to the last post if it is younger than the window.
    pub fn placement(&self, subject_key: &str, now: DateTime<Utc>) -> ThreadPlacement {
        match self.threads.get(subject_key) {
            Some(state) if now - state.last_post_time < self.window => {
                ThreadPlacement::ReplyTo(state.last_post_id.clone())
            }
            _ => ThreadPlacement::Root,
        }
    }

    /// Remember a published post. Call only after the publish succeeded.
    pub fn record(&mut self, subject_key: &str, post_id: PostId, now: DateTime<Utc>) {
        self.threads.insert(
            subject_key.to_string(),
            ThreadState {
                last_post_id: post_id,
                last_post_time: now,
            },
        );
    }

    pub fn get(&self, subject_key: &str) -> Option<&ThreadState> {
        self.threads.get(subject_key)
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

/// Builds notification drafts and owns the thread memory.
#[derive(Debug, Clone)]
pub struct Composer {
    first_notice: String,
    follow_up: String,
    tracker: ThreadTracker,
}

impl Composer {
    pub fn new(config: &NotifyConfig) -> Self {
        Self {
            first_notice: config.first_notice_template.clone(),
            follow_up: config.follow_up_template.clone(),
            tracker: ThreadTracker::new(config.thread_window()),
        }
    }

    pub fn tracker(&self) -> &ThreadTracker {
        &self.tracker
    }

    /// Compose the notification for an admitted, captured edit.
    pub fn compose(
        &self,
        subject: &Subject,
        diff: &DiffReference,
        image: Vec<u8>,
        now: DateTime<Utc>,
    ) -> std::result::Result<NotificationDraft, NameUnavailable> {
        let name = display_name(subject).ok_or_else(|| NameUnavailable {
            subject_key: subject.page_title.clone(),
        })?;

        let affiliation = subject
            .affiliation_tag
            .as_deref()
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .map(|tag| format!(" {}", hashtag(tag)))
            .unwrap_or_default();

        let placement = self.tracker.placement(&subject.page_title, now);
        let template = match placement {
            ThreadPlacement::Root => &self.first_notice,
            ThreadPlacement::ReplyTo(_) => &self.follow_up,
        };

        let text = template
            .replace("{name}", &name)
            .replace("{affiliation}", &affiliation)
            .replace("{url}", diff.as_str());

        Ok(NotificationDraft {
            subject_key: subject.page_title.clone(),
            text,
            image,
            placement,
        })
    }

    /// Update the thread memory after a confirmed publish.
    pub fn record_published(&mut self, draft: &NotificationDraft, post_id: PostId, now: DateTime<Utc>) {
        self.tracker.record(&draft.subject_key, post_id, now);
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn subject(first: &str, last: &str, display: &str) -> Subject {
        Subject {
            page_title: "Angela Merkel".to_string(),
            display_name: display.to_string(),
            first_name: first.to_string(),
            last_name: last.to_string(),
            ..Default::default()
        }
    }

    fn diff() -> DiffReference {
        DiffReference::new(
            "https://de.wikipedia.org/w/index.php?title=Angela_Merkel&diff=2&oldid=1&diffonly=yes"
                .into(),
        )
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_hashtag() {
        assert_eq!(hashtag("Merkel"), "#Merkel");
        assert_eq!(hashtag("Müller-Lüdenscheidt"), "#MüllerLüdenscheidt");
        assert_eq!(hashtag("von der Leyen"), "#vonderLeyen");
        assert_eq!(hashtag("O'Neil"), "#ONeil");
        assert_eq!(hashtag(" SPD "), "#SPD");
    }

    #[test]
    fn test_display_name_fallbacks() {
        assert_eq!(
            display_name(&subject("Angela", "Merkel", "")).as_deref(),
            Some("Angela #Merkel")
        );
        assert_eq!(
            display_name(&subject("", "Merkel", "")).as_deref(),
            Some("#Merkel")
        );
        assert_eq!(
            display_name(&subject("", "", "Angela Dorothea Merkel")).as_deref(),
            Some("Angela Dorothea Merkel")
        );
        // A first name alone is not enough for the hashtag form.
        assert_eq!(
            display_name(&subject("Angela", "", "Angela Merkel")).as_deref(),
            Some("Angela Merkel")
        );
        assert_eq!(display_name(&subject("", "", "")), None);
    }

    #[test]
    fn test_compose_first_notice() {
        let composer = Composer::new(&NotifyConfig::default());
        let mut s = subject("Angela", "Merkel", "Angela Merkel");
        s.affiliation_tag = Some("CDU".to_string());

        let draft = composer.compose(&s, &diff(), vec![1, 2, 3], t0()).unwrap();
        assert_eq!(draft.placement, ThreadPlacement::Root);
        assert_eq!(draft.subject_key, "Angela Merkel");
        assert_eq!(draft.image, vec![1, 2, 3]);
        assert_eq!(
            draft.text,
            format!("Änderung beim Wiki-Eintrag zu Angela #Merkel #CDU\n{}", diff())
        );
    }

    #[test]
    fn test_compose_without_affiliation() {
        let composer = Composer::new(&NotifyConfig::default());
        let draft = composer
            .compose(&subject("", "Merkel", ""), &diff(), Vec::new(), t0())
            .unwrap();
        assert!(draft.text.starts_with("Änderung beim Wiki-Eintrag zu #Merkel\n"));
    }

    #[test]
    fn test_compose_rejects_nameless_subject() {
        let composer = Composer::new(&NotifyConfig::default());
        let err = composer
            .compose(&subject("", "", ""), &diff(), Vec::new(), t0())
            .unwrap_err();
        assert_eq!(err.subject_key, "Angela Merkel");
    }

    #[test]
    fn test_follow_up_within_window() {
        let mut composer = Composer::new(&NotifyConfig::default());
        let s = subject("Angela", "Merkel", "");

        let first = composer.compose(&s, &diff(), Vec::new(), t0()).unwrap();
        composer.record_published(&first, PostId("100".into()), t0());

        let later = t0() + TimeDelta::minutes(119);
        let second = composer.compose(&s, &diff(), Vec::new(), later).unwrap();
        assert_eq!(second.placement, ThreadPlacement::ReplyTo(PostId("100".into())));
        assert!(second.text.starts_with("Noch eine Änderung bei Angela #Merkel\n"));
    }

    #[test]
    fn test_new_root_after_window() {
        let mut composer = Composer::new(&NotifyConfig::default());
        let s = subject("Angela", "Merkel", "");

        let first = composer.compose(&s, &diff(), Vec::new(), t0()).unwrap();
        composer.record_published(&first, PostId("100".into()), t0());

        let later = t0() + TimeDelta::minutes(121);
        let second = composer.compose(&s, &diff(), Vec::new(), later).unwrap();
        assert_eq!(second.placement, ThreadPlacement::Root);
    }

    #[test]
    fn test_unpublished_draft_leaves_no_thread() {
        let composer = Composer::new(&NotifyConfig::default());
        let s = subject("Angela", "Merkel", "");

        composer.compose(&s, &diff(), Vec::new(), t0()).unwrap();
        assert!(composer.tracker().is_empty());

        let second = composer.compose(&s, &diff(), Vec::new(), t0()).unwrap();
        assert_eq!(second.placement, ThreadPlacement::Root);
    }

    #[test]
    fn test_tracker_overwrites_state() {
        let mut tracker = ThreadTracker::new(TimeDelta::hours(2));
        tracker.record("A", PostId("1".into()), t0());
        tracker.record("A", PostId("2".into()), t0() + TimeDelta::minutes(30));

        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.get("A").unwrap().last_post_id, PostId("2".into()));
        assert_eq!(
            tracker.placement("A", t0() + TimeDelta::minutes(140)),
            ThreadPlacement::ReplyTo(PostId("2".into()))
        );
        assert_eq!(tracker.placement("B", t0()), ThreadPlacement::Root);
    }
}
