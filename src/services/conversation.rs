use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::models::Conversation;

const TITLE_MAX_CHARS: usize = 40;

/// Title derived from the first message of a conversation.
pub fn auto_title(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(TITLE_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecencyGroup {
    Today,
    Yesterday,
    Previous7Days,
    Previous30Days,
    Older,
}

impl RecencyGroup {
    pub const ALL: [RecencyGroup; 5] = [
        RecencyGroup::Today,
        RecencyGroup::Yesterday,
        RecencyGroup::Previous7Days,
        RecencyGroup::Previous30Days,
        RecencyGroup::Older,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            RecencyGroup::Today => "Today",
            RecencyGroup::Yesterday => "Yesterday",
            RecencyGroup::Previous7Days => "Previous 7 Days",
            RecencyGroup::Previous30Days => "Previous 30 Days",
            RecencyGroup::Older => "Older",
        }
    }
}

/// Day-aligned boundaries relative to `now`, newest first.
struct Boundaries {
    today: DateTime<Utc>,
    yesterday: DateTime<Utc>,
    week: DateTime<Utc>,
    month: DateTime<Utc>,
}

impl Boundaries {
    fn new<Tz: TimeZone>(now: &DateTime<Tz>) -> Self {
        let midnight = now.date_naive().and_hms_opt(0, 0, 0).unwrap_or_default();
        let today = now
            .timezone()
            .from_local_datetime(&midnight)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|| now.with_timezone(&Utc));

        Self {
            today,
            yesterday: today - Duration::days(1),
            week: today - Duration::days(7),
            month: today - Duration::days(30),
        }
    }

    fn classify(&self, ts: &DateTime<Utc>) -> RecencyGroup {
        if *ts >= self.today {
            RecencyGroup::Today
        } else if *ts >= self.yesterday {
            RecencyGroup::Yesterday
        } else if *ts >= self.week {
            RecencyGroup::Previous7Days
        } else if *ts >= self.month {
            RecencyGroup::Previous30Days
        } else {
            RecencyGroup::Older
        }
    }
}

/// Partition conversations by `updated_at` into recency sections.
///
/// Sections come back in fixed order with empty ones dropped; conversations
/// keep their input order inside a section.
pub fn group_by_recency<Tz: TimeZone>(
    conversations: &[Conversation],
    now: &DateTime<Tz>,
) -> Vec<(RecencyGroup, Vec<Conversation>)> {
    let bounds = Boundaries::new(now);
    let mut groups: Vec<(RecencyGroup, Vec<Conversation>)> = RecencyGroup::ALL
        .iter()
        .map(|g| (*g, Vec::new()))
        .collect();

    for conv in conversations {
        let group = bounds.classify(&conv.updated_at);
        if let Some((_, bucket)) = groups.iter_mut().find(|(g, _)| *g == group) {
            bucket.push(conv.clone());
        }
    }

    groups.retain(|(_, bucket)| !bucket.is_empty());
    groups
}

#[cfg(test)]
mod tests {
    use chrono::FixedOffset;

    use super::*;

    fn conv(id: &str, updated_at: DateTime<Utc>) -> Conversation {
        Conversation {
            id: id.to_string(),
            user_id: None,
            title: id.to_string(),
            created_at: updated_at,
            updated_at,
        }
    }

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_short_title_is_kept() {
        assert_eq!(auto_title("Hi"), "Hi");
    }

    #[test]
    fn test_long_title_is_truncated() {
        let content = "Hello world, this is a long message exceeding forty characters in total";
        let title = auto_title(content);
        assert_eq!(title, format!("{}...", &content[..40]));
        assert_eq!(title, "Hello world, this is a long message exce...");
    }

    #[test]
    fn test_exactly_forty_chars_is_not_truncated() {
        let content = "a".repeat(40);
        assert_eq!(auto_title(&content), content);
    }

    #[test]
    fn test_truncation_counts_characters() {
        let content = "é".repeat(45);
        let title = auto_title(&content);
        assert_eq!(title.chars().count(), 43);
        assert!(title.ends_with("..."));
    }

    #[test]
    fn test_grouping_boundaries() {
        let now = at("2026-10-19T15:30:00Z");
        let conversations = vec![
            conv("today", at("2026-10-19T00:00:00Z")),
            conv("yesterday", at("2026-10-18T23:59:59Z")),
            conv("yesterday-start", at("2026-10-18T00:00:00Z")),
            conv("week", at("2026-10-12T00:00:00Z")),
            conv("month", at("2026-09-19T00:00:00Z")),
            conv("older", at("2026-09-18T23:59:59Z")),
        ];

        let groups = group_by_recency(&conversations, &now);
        let summary: Vec<(RecencyGroup, Vec<&str>)> = groups
            .iter()
            .map(|(g, convs)| (*g, convs.iter().map(|c| c.id.as_str()).collect()))
            .collect();

        assert_eq!(
            summary,
            vec![
                (RecencyGroup::Today, vec!["today"]),
                (RecencyGroup::Yesterday, vec!["yesterday", "yesterday-start"]),
                (RecencyGroup::Previous7Days, vec!["week"]),
                (RecencyGroup::Previous30Days, vec!["month"]),
                (RecencyGroup::Older, vec!["older"]),
            ]
        );
    }

    #[test]
    fn test_grouping_is_a_partition() {
        let now = at("2026-10-19T08:00:00Z");
        let conversations: Vec<Conversation> = (0..90)
            .map(|h| conv(&format!("c{h}"), now - Duration::hours(h * 11)))
            .collect();

        let groups = group_by_recency(&conversations, &now);
        let mut seen: Vec<String> = groups
            .iter()
            .flat_map(|(_, convs)| convs.iter().map(|c| c.id.clone()))
            .collect();
        assert_eq!(seen.len(), conversations.len());
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), conversations.len());
        assert!(groups.iter().all(|(_, convs)| !convs.is_empty()));
    }

    #[test]
    fn test_grouping_uses_local_midnight() {
        // 01:00 at UTC+3 is 22:00 UTC of the previous day.
        let offset = FixedOffset::east_opt(3 * 3600).unwrap();
        let now = at("2026-10-18T22:00:00Z").with_timezone(&offset);
        let conversations = vec![
            conv("after-local-midnight", at("2026-10-18T21:30:00Z")),
            conv("before-local-midnight", at("2026-10-18T20:30:00Z")),
        ];

        let groups = group_by_recency(&conversations, &now);
        assert_eq!(groups[0].0, RecencyGroup::Today);
        assert_eq!(groups[0].1[0].id, "after-local-midnight");
        assert_eq!(groups[1].0, RecencyGroup::Yesterday);
    }

    #[test]
    fn test_empty_input() {
        assert!(group_by_recency(&[], &Utc::now()).is_empty());
    }
}
