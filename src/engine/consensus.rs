//! Team consensus detection

use std::collections::{BTreeMap, BTreeSet};

use super::evaluate::{index_set, normalize_text, submitted_text};
use crate::types::{ParticipantId, QuestionKind, SubmittedAnswer};

#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusResult {
    pub reached: bool,
    /// The agreed answer, present only when `reached`
    pub value: Option<SubmittedAnswer>,
}

impl ConsensusResult {
    fn pending() -> Self {
        Self {
            reached: false,
            value: None,
        }
    }
}

/// Comparison key: index sets ignore order and duplicates, text ignores case and padding.
/// Free-text questions compare every answer by its text form, so `42` and `"42"` agree.
#[derive(Debug, PartialEq)]
enum Normalized {
    Index(usize),
    Indices(BTreeSet<usize>),
    Text(String),
    Pass,
}

fn normalize(answer: &SubmittedAnswer, kind: QuestionKind) -> Normalized {
    if kind == QuestionKind::FreeText {
        if let Some(text) = submitted_text(answer) {
            return Normalized::Text(normalize_text(&text));
        }
    }
    match answer {
        SubmittedAnswer::Index(i) => Normalized::Index(*i),
        SubmittedAnswer::Indices(v) => Normalized::Indices(index_set(v)),
        SubmittedAnswer::Text(t) => Normalized::Text(normalize_text(t)),
        SubmittedAnswer::Pass => Normalized::Pass,
    }
}

/// Whether two submissions count as the same answer to a question of `kind`
pub fn answers_agree(a: &SubmittedAnswer, b: &SubmittedAnswer, kind: QuestionKind) -> bool {
    normalize(a, kind) == normalize(b, kind)
}

/// Decide whether every roster member has answered and all answers agree.
///
/// An empty roster never reaches consensus.
pub fn check_consensus(
    roster: &[ParticipantId],
    bag: &BTreeMap<ParticipantId, SubmittedAnswer>,
    kind: QuestionKind,
) -> ConsensusResult {
    let mut answers = Vec::with_capacity(roster.len());
    for member in roster {
        match bag.get(member) {
            Some(answer) => answers.push(answer),
            None => return ConsensusResult::pending(),
        }
    }

    let Some((first, rest)) = answers.split_first() else {
        return ConsensusResult::pending();
    };

    if rest.iter().all(|other| answers_agree(first, other, kind)) {
        ConsensusResult {
            reached: true,
            value: Some((*first).clone()),
        }
    } else {
        ConsensusResult::pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roster(ids: &[&str]) -> Vec<ParticipantId> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn bag(entries: &[(&str, SubmittedAnswer)]) -> BTreeMap<ParticipantId, SubmittedAnswer> {
        entries
            .iter()
            .map(|(id, a)| (id.to_string(), a.clone()))
            .collect()
    }

    #[test]
    fn test_waits_for_every_member() {
        let result = check_consensus(
            &roster(&["a", "b"]),
            &bag(&[("a", SubmittedAnswer::Index(1))]),
            QuestionKind::SingleChoice,
        );
        assert!(!result.reached);
        assert!(result.value.is_none());
    }

    #[test]
    fn test_agreement_reaches_consensus() {
        let result = check_consensus(
            &roster(&["a", "b"]),
            &bag(&[
                ("a", SubmittedAnswer::Indices(vec![2, 0])),
                ("b", SubmittedAnswer::Indices(vec![0, 2, 2])),
            ]),
            QuestionKind::MultiChoice,
        );
        assert!(result.reached);
        assert_eq!(result.value, Some(SubmittedAnswer::Indices(vec![2, 0])));
    }

    #[test]
    fn test_text_agreement_is_normalized() {
        let result = check_consensus(
            &roster(&["a", "b"]),
            &bag(&[
                ("a", SubmittedAnswer::Text("Paris".into())),
                ("b", SubmittedAnswer::Text(" paris  ".into())),
            ]),
            QuestionKind::FreeText,
        );
        assert!(result.reached);
    }

    #[test]
    fn test_free_text_number_agrees_with_string() {
        let answers = bag(&[
            ("a", SubmittedAnswer::Index(42)),
            ("b", SubmittedAnswer::Text(" 42 ".into())),
        ]);

        let result = check_consensus(&roster(&["a", "b"]), &answers, QuestionKind::FreeText);
        assert!(result.reached);
        assert_eq!(result.value, Some(SubmittedAnswer::Index(42)));

        // Choice questions keep comparing raw shapes
        let result = check_consensus(&roster(&["a", "b"]), &answers, QuestionKind::SingleChoice);
        assert!(!result.reached);
    }

    #[test]
    fn test_free_text_agreement_matches_evaluation() {
        let question = crate::types::Question {
            kind: QuestionKind::FreeText,
            answer: Some(crate::types::CanonicalAnswer::Text("42".into())),
            ..Default::default()
        };
        let a = SubmittedAnswer::Index(42);
        let b = SubmittedAnswer::Text("42".into());

        assert!(answers_agree(&a, &b, QuestionKind::FreeText));
        assert_eq!(
            super::super::evaluate::evaluate(&question, &a).unwrap(),
            super::super::evaluate::evaluate(&question, &b).unwrap()
        );
    }

    #[test]
    fn test_disagreement_keeps_waiting() {
        let result = check_consensus(
            &roster(&["a", "b"]),
            &bag(&[
                ("a", SubmittedAnswer::Index(1)),
                ("b", SubmittedAnswer::Index(2)),
            ]),
            QuestionKind::SingleChoice,
        );
        assert_eq!(result, ConsensusResult::pending());
    }

    #[test]
    fn test_answers_outside_roster_are_ignored() {
        let result = check_consensus(
            &roster(&["a"]),
            &bag(&[
                ("a", SubmittedAnswer::Index(1)),
                ("spectator", SubmittedAnswer::Index(3)),
            ]),
            QuestionKind::SingleChoice,
        );
        assert!(result.reached);
        assert_eq!(result.value, Some(SubmittedAnswer::Index(1)));
    }

    #[test]
    fn test_empty_roster_never_agrees() {
        let result = check_consensus(&[], &BTreeMap::new(), QuestionKind::SingleChoice);
        assert!(!result.reached);
    }
}
