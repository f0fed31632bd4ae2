//! Session ordering: spaces same-topic cards apart so a run of reviews
//! alternates between courses instead of clustering.
//!
//! Ordering rules, in priority order: overdue cards surface before
//! not-yet-due ones inside each course group, groups rotate round-robin,
//! and no more than [`MAX_SAME_LESSON_RUN`] consecutive cards may share a
//! `(course, lesson)` pair. When the rotation stalls against that cap the
//! remaining cards are drained in group order: a spacing violation is
//! preferred over dropping a card.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};

use crate::db::card_store::Card;

/// Inputs this small or smaller keep their selector ordering.
const MIN_INTERLEAVE_SIZE: usize = 3;

/// Longest tolerated run of cards sharing `(course, lesson)`.
const MAX_SAME_LESSON_RUN: usize = 3;

pub fn interleave(cards: Vec<Card>, now: DateTime<Utc>) -> Vec<Card> {
    if cards.len() <= MIN_INTERLEAVE_SIZE {
        return cards;
    }

    let total = cards.len();

    // Group by course, preserving first-appearance order for tie breaks.
    let mut course_order: Vec<String> = Vec::new();
    let mut by_course: HashMap<String, Vec<Card>> = HashMap::new();
    for card in cards {
        if !by_course.contains_key(&card.course_id) {
            course_order.push(card.course_id.clone());
        }
        by_course.entry(card.course_id.clone()).or_default().push(card);
    }

    let mut groups: Vec<VecDeque<Card>> = course_order
        .iter()
        .map(|course_id| {
            let mut group = by_course.remove(course_id).unwrap_or_default();
            // Stable: equal due dates keep input order.
            group.sort_by_key(|c| (c.due_date >= now, c.due_date));
            VecDeque::from(group)
        })
        .collect();

    // Earliest-due group leads the rotation.
    groups.sort_by_key(|group| {
        group
            .front()
            .map(|c| c.due_date)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    });

    let take_per_round = if groups.len() > 2 { 1 } else { 2 };

    let mut out: Vec<Card> = Vec::with_capacity(total);
    let mut run_key: Option<(String, i64)> = None;
    let mut run_len = 0usize;

    while out.len() < total {
        let mut emitted = false;
        for group in groups.iter_mut() {
            for _ in 0..take_per_round {
                let Some(front) = group.front() else { break };
                let key = (front.course_id.clone(), front.lesson_index);
                if run_key.as_ref() == Some(&key) && run_len >= MAX_SAME_LESSON_RUN {
                    // Taking this card would make a fourth in a row; let
                    // the other groups break the run first.
                    break;
                }
                if let Some(card) = group.pop_front() {
                    if run_key.as_ref() == Some(&key) {
                        run_len += 1;
                    } else {
                        run_key = Some(key);
                        run_len = 1;
                    }
                    out.push(card);
                    emitted = true;
                }
            }
        }

        if !emitted {
            // Every group is blocked on the run cap; drain rather than drop.
            for group in groups.iter_mut() {
                while let Some(card) = group.pop_front() {
                    out.push(card);
                }
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::card_store::CardState;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 9, 0, 0).unwrap()
    }

    fn card(id: &str, course: &str, lesson: i64, due_offset_hours: i64) -> Card {
        Card {
            id: id.to_string(),
            user_id: "u1".to_string(),
            course_id: course.to_string(),
            lesson_index: lesson,
            step_index: 0,
            state: CardState::Review,
            stability: 5.0,
            difficulty: 5.0,
            scheduled_days: 5.0,
            reps: 3,
            lapses: 0,
            due_date: now() + Duration::hours(due_offset_hours),
            last_review: None,
            concept_ids: vec![],
            version: 0,
            created_at: now() - Duration::days(30),
            updated_at: now(),
        }
    }

    fn ids(cards: &[Card]) -> Vec<&str> {
        cards.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn test_small_input_untouched() {
        let cards = vec![
            card("a", "x", 0, -1),
            card("b", "x", 0, -2),
            card("c", "y", 0, 0),
        ];
        let out = interleave(cards.clone(), now());
        assert_eq!(ids(&out), ids(&cards));
    }

    #[test]
    fn test_two_courses_alternate_in_pairs() {
        let cards = vec![
            card("a1", "a", 0, -4),
            card("a2", "a", 0, -3),
            card("a3", "a", 1, -2),
            card("b1", "b", 0, -1),
            card("b2", "b", 0, 0),
        ];
        let out = interleave(cards, now());
        // Two groups: two cards per group per round, earliest-due first.
        assert_eq!(ids(&out), vec!["a1", "a2", "b1", "b2", "a3"]);
    }

    #[test]
    fn test_three_courses_round_robin_single() {
        let cards = vec![
            card("a1", "a", 0, -3),
            card("a2", "a", 0, -3),
            card("b1", "b", 0, -2),
            card("b2", "b", 0, -2),
            card("c1", "c", 0, -1),
            card("c2", "c", 0, -1),
        ];
        let out = interleave(cards, now());
        assert_eq!(ids(&out), vec!["a1", "b1", "c1", "a2", "b2", "c2"]);
    }

    #[test]
    fn test_overdue_before_upcoming_within_group() {
        let cards = vec![
            card("late", "a", 0, 2),
            card("overdue", "a", 1, -5),
            card("b1", "b", 0, -1),
            card("b2", "b", 0, 1),
        ];
        let out = interleave(cards, now());
        let pos_overdue = out.iter().position(|c| c.id == "overdue").unwrap();
        let pos_late = out.iter().position(|c| c.id == "late").unwrap();
        assert!(pos_overdue < pos_late);
    }

    #[test]
    fn test_single_lesson_input_drains_in_order() {
        // One course, one lesson: the spacing constraint cannot be met, so
        // every card must still come through.
        let cards: Vec<Card> = (0..6)
            .map(|i| card(&format!("c{i}"), "solo", 0, -(6 - i)))
            .collect();
        let out = interleave(cards.clone(), now());
        assert_eq!(out.len(), cards.len());
        assert_eq!(ids(&out), ids(&cards));
    }

    #[test]
    fn test_no_four_in_a_row_with_balanced_groups() {
        let mut cards = Vec::new();
        for i in 0..8 {
            cards.push(card(&format!("a{i}"), "a", 0, -20 + i));
        }
        for i in 0..8 {
            cards.push(card(&format!("b{i}"), "b", 0, -10 + i));
        }
        let out = interleave(cards, now());
        let mut run = 1;
        for pair in out.windows(2) {
            if pair[0].course_id == pair[1].course_id
                && pair[0].lesson_index == pair[1].lesson_index
            {
                run += 1;
                assert!(run <= MAX_SAME_LESSON_RUN);
            } else {
                run = 1;
            }
        }
    }

    #[test]
    fn test_lopsided_groups_keep_every_card() {
        // 8-vs-3: once the small group drains, the run cap stalls the
        // rotation and the tail is force-drained instead of dropped.
        let mut cards = Vec::new();
        for i in 0..8 {
            cards.push(card(&format!("a{i}"), "a", 0, -10 + i));
        }
        for i in 0..3 {
            cards.push(card(&format!("b{i}"), "b", 0, -1 + i));
        }
        let out = interleave(cards, now());
        assert_eq!(out.len(), 11);
    }

    #[test]
    fn test_output_is_permutation() {
        let cards = vec![
            card("a1", "a", 0, -3),
            card("a2", "a", 1, -2),
            card("b1", "b", 0, -4),
            card("b2", "b", 2, 1),
            card("c1", "c", 0, 0),
        ];
        let mut expected: Vec<&str> = ids(&cards);
        let out = interleave(cards.clone(), now());
        let mut got: Vec<&str> = ids(&out);
        expected.sort_unstable();
        got.sort_unstable();
        assert_eq!(got, expected);
    }
}
