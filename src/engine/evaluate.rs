//! Answer evaluation

use std::borrow::Cow;
use std::collections::BTreeSet;

use super::{EngineError, EngineResult};
use crate::types::{AnswerMode, CanonicalAnswer, Question, QuestionKind, SubmittedAnswer};

/// Relative tolerance for numeric free-text answers
const NUMERIC_TOLERANCE: f64 = 0.02;

/// Check a submitted answer against a question's canonical answer.
///
/// `Pass` and answers whose shape doesn't fit the question kind are simply
/// incorrect. A question with a missing or ill-shaped canonical answer is a
/// data error and is reported as such.
pub fn evaluate(question: &Question, submitted: &SubmittedAnswer) -> EngineResult<bool> {
    let canonical = question
        .answer
        .as_ref()
        .ok_or_else(|| malformed(question, "missing canonical answer"))?;
    validate_canonical(question, canonical)?;

    let correct = match (question.kind, canonical, submitted) {
        (_, _, SubmittedAnswer::Pass) => false,
        (QuestionKind::SingleChoice, CanonicalAnswer::Index(want), SubmittedAnswer::Index(got)) => {
            want == got
        }
        (
            QuestionKind::MultiChoice,
            CanonicalAnswer::Indices(want),
            SubmittedAnswer::Indices(got),
        ) => index_set(want) == index_set(got),
        (QuestionKind::FreeText, _, _) => match (canonical_text(canonical), submitted_text(submitted)) {
            (Some(want), Some(got)) => text_matches(&want, &got, question.answer_mode),
            _ => false,
        },
        _ => false,
    };

    Ok(correct)
}

fn malformed(question: &Question, reason: &str) -> EngineError {
    EngineError::MalformedQuestion {
        id: question.id.clone(),
        reason: reason.to_string(),
    }
}

fn validate_canonical(question: &Question, canonical: &CanonicalAnswer) -> EngineResult<()> {
    let option_count = question.options.len();
    match (question.kind, canonical) {
        (QuestionKind::SingleChoice, CanonicalAnswer::Index(i)) => {
            if *i >= option_count {
                return Err(malformed(question, "answer index out of range"));
            }
        }
        (QuestionKind::MultiChoice, CanonicalAnswer::Indices(indices)) => {
            if indices.is_empty() {
                return Err(malformed(question, "empty answer set"));
            }
            if indices.iter().any(|i| *i >= option_count) {
                return Err(malformed(question, "answer index out of range"));
            }
        }
        (QuestionKind::FreeText, CanonicalAnswer::Text(text)) => {
            if text.trim().is_empty() {
                return Err(malformed(question, "empty answer text"));
            }
        }
        // Bare numbers parse as indices; for free text they are the answer itself
        (QuestionKind::FreeText, CanonicalAnswer::Index(_)) => {}
        (kind, _) => {
            return Err(malformed(
                question,
                &format!("answer shape does not match kind {:?}", kind),
            ));
        }
    }
    Ok(())
}

pub(super) fn index_set(indices: &[usize]) -> BTreeSet<usize> {
    indices.iter().copied().collect()
}

pub(super) fn normalize_text(text: &str) -> String {
    text.trim().to_lowercase()
}

fn canonical_text(canonical: &CanonicalAnswer) -> Option<Cow<'_, str>> {
    match canonical {
        CanonicalAnswer::Text(t) => Some(Cow::Borrowed(t.as_str())),
        CanonicalAnswer::Index(n) => Some(Cow::Owned(n.to_string())),
        CanonicalAnswer::Indices(_) => None,
    }
}

pub(super) fn submitted_text(submitted: &SubmittedAnswer) -> Option<Cow<'_, str>> {
    match submitted {
        SubmittedAnswer::Text(t) => Some(Cow::Borrowed(t.as_str())),
        SubmittedAnswer::Index(n) => Some(Cow::Owned(n.to_string())),
        SubmittedAnswer::Indices(_) | SubmittedAnswer::Pass => None,
    }
}

fn text_matches(want: &str, got: &str, mode: AnswerMode) -> bool {
    let (want, got) = (normalize_text(want), normalize_text(got));
    if want == got {
        return true;
    }
    match mode {
        AnswerMode::Exact => false,
        AnswerMode::Numeric => numeric_matches(&want, &got),
    }
}

fn numeric_matches(want: &str, got: &str) -> bool {
    let Some(got) = parse_number(got) else {
        return false;
    };

    if let Some(want) = parse_number(want) {
        let tolerance = want.abs() * NUMERIC_TOLERANCE;
        return (got - want).abs() <= tolerance;
    }

    match parse_range(want) {
        Some((min, max)) => (min..=max).contains(&got),
        None => false,
    }
}

fn parse_number(text: &str) -> Option<f64> {
    text.trim()
        .replace(',', "")
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
}

/// Parse an inclusive `"min-max"` range. A leading minus belongs to `min`.
fn parse_range(text: &str) -> Option<(f64, f64)> {
    text.char_indices()
        .filter(|(i, c)| *c == '-' && *i > 0)
        .find_map(|(i, _)| {
            let min = parse_number(&text[..i])?;
            let max = parse_number(&text[i + 1..])?;
            Some(if min <= max { (min, max) } else { (max, min) })
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(kind: QuestionKind, answer: Option<CanonicalAnswer>) -> Question {
        Question {
            id: "q".to_string(),
            kind,
            prompt: "?".to_string(),
            options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            answer,
            explanation: String::new(),
            image_url: None,
            answer_mode: AnswerMode::Exact,
            year: None,
            event: None,
        }
    }

    fn free_text(answer: &str, mode: AnswerMode) -> Question {
        Question {
            options: Vec::new(),
            answer_mode: mode,
            ..question(
                QuestionKind::FreeText,
                Some(CanonicalAnswer::Text(answer.to_string())),
            )
        }
    }

    #[test]
    fn test_single_choice() {
        let q = question(QuestionKind::SingleChoice, Some(CanonicalAnswer::Index(2)));
        assert_eq!(evaluate(&q, &SubmittedAnswer::Index(2)), Ok(true));
        assert_eq!(evaluate(&q, &SubmittedAnswer::Index(1)), Ok(false));
        assert_eq!(evaluate(&q, &SubmittedAnswer::Text("2".into())), Ok(false));
    }

    #[test]
    fn test_multi_choice_is_order_independent() {
        let q = question(
            QuestionKind::MultiChoice,
            Some(CanonicalAnswer::Indices(vec![0, 2])),
        );
        assert_eq!(evaluate(&q, &SubmittedAnswer::Indices(vec![2, 0])), Ok(true));
        assert_eq!(evaluate(&q, &SubmittedAnswer::Indices(vec![0])), Ok(false));
        assert_eq!(
            evaluate(&q, &SubmittedAnswer::Indices(vec![0, 2, 3])),
            Ok(false)
        );
    }

    #[test]
    fn test_free_text_trims_and_ignores_case() {
        let q = free_text("Paris", AnswerMode::Exact);
        assert_eq!(evaluate(&q, &SubmittedAnswer::Text("  pARIS ".into())), Ok(true));
        assert_eq!(evaluate(&q, &SubmittedAnswer::Text("Lyon".into())), Ok(false));
    }

    #[test]
    fn test_exact_mode_rejects_near_numbers() {
        let q = free_text("100", AnswerMode::Exact);
        assert_eq!(evaluate(&q, &SubmittedAnswer::Text("100".into())), Ok(true));
        assert_eq!(evaluate(&q, &SubmittedAnswer::Text("101".into())), Ok(false));
    }

    #[test]
    fn test_numeric_mode_tolerance() {
        let q = free_text("100", AnswerMode::Numeric);
        assert_eq!(evaluate(&q, &SubmittedAnswer::Text("101.5".into())), Ok(true));
        assert_eq!(evaluate(&q, &SubmittedAnswer::Text("98".into())), Ok(true));
        assert_eq!(evaluate(&q, &SubmittedAnswer::Text("97.9".into())), Ok(false));
        assert_eq!(evaluate(&q, &SubmittedAnswer::Index(102)), Ok(true));
    }

    #[test]
    fn test_numeric_mode_range() {
        let q = free_text("10-20", AnswerMode::Numeric);
        assert_eq!(evaluate(&q, &SubmittedAnswer::Text("15".into())), Ok(true));
        assert_eq!(evaluate(&q, &SubmittedAnswer::Text("20".into())), Ok(true));
        assert_eq!(evaluate(&q, &SubmittedAnswer::Text("21".into())), Ok(false));

        let negative = free_text("-5--1", AnswerMode::Numeric);
        assert_eq!(evaluate(&negative, &SubmittedAnswer::Text("-3".into())), Ok(true));
    }

    #[test]
    fn test_pass_is_never_correct() {
        let q = free_text("PASS", AnswerMode::Exact);
        assert_eq!(evaluate(&q, &SubmittedAnswer::Pass), Ok(false));
        let q = question(QuestionKind::SingleChoice, Some(CanonicalAnswer::Index(0)));
        assert_eq!(evaluate(&q, &SubmittedAnswer::Pass), Ok(false));
    }

    #[test]
    fn test_missing_answer_is_an_error() {
        let q = question(QuestionKind::SingleChoice, None);
        assert!(matches!(
            evaluate(&q, &SubmittedAnswer::Index(0)),
            Err(EngineError::MalformedQuestion { .. })
        ));
    }

    #[test]
    fn test_ill_shaped_answer_is_an_error() {
        let q = question(QuestionKind::MultiChoice, Some(CanonicalAnswer::Index(0)));
        assert!(evaluate(&q, &SubmittedAnswer::Indices(vec![0])).is_err());

        let q = question(QuestionKind::SingleChoice, Some(CanonicalAnswer::Index(9)));
        assert!(evaluate(&q, &SubmittedAnswer::Index(9)).is_err());
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let q = question(
            QuestionKind::MultiChoice,
            Some(CanonicalAnswer::Indices(vec![1, 3])),
        );
        let answer = SubmittedAnswer::Indices(vec![3, 1]);
        assert_eq!(evaluate(&q, &answer), evaluate(&q, &answer));
    }
}
