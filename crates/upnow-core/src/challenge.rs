//! Dismiss challenges: arithmetic problems and phrase typing.
//!
//! A [`Challenge`] is single-use. [`ChallengeEngine::verify`] takes it by
//! value, so a judged challenge can never be judged again; after an
//! incorrect answer the caller must ask the engine for a fresh one.

use std::fmt;

use rand::prelude::*;
use rand_pcg::Mcg128Xsl64;
use serde::{Deserialize, Serialize};

use crate::alarm::ChallengeType;
use crate::error::ValidationError;

/// Inclusive operand range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperandRange {
    pub min: u32,
    pub max: u32,
}

impl OperandRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    fn sample(&self, rng: &mut impl Rng) -> u32 {
        if self.min >= self.max {
            self.min
        } else {
            rng.gen_range(self.min..=self.max)
        }
    }
}

/// Tunable challenge policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeConfig {
    #[serde(default = "default_addition")]
    pub addition: OperandRange,
    #[serde(default = "default_minuend")]
    pub subtraction_minuend: OperandRange,
    #[serde(default = "default_subtrahend")]
    pub subtraction_subtrahend: OperandRange,
    #[serde(default = "default_multiplication")]
    pub multiplication: OperandRange,
    #[serde(default = "default_phrases")]
    pub phrases: Vec<String>,
    /// Longest numeric answer the keypad accepts.
    #[serde(default = "default_max_answer_digits")]
    pub max_answer_digits: usize,
}

fn default_addition() -> OperandRange {
    OperandRange::new(10, 99)
}
fn default_minuend() -> OperandRange {
    OperandRange::new(50, 99)
}
fn default_subtrahend() -> OperandRange {
    OperandRange::new(1, 49)
}
fn default_multiplication() -> OperandRange {
    OperandRange::new(3, 12)
}
fn default_max_answer_digits() -> usize {
    5
}

/// Phrases offered by the typing challenge.
pub const DEFAULT_PHRASES: [&str; 8] = [
    "I am awake",
    "Rise and shine",
    "Today is a new day",
    "I will not go back to sleep",
    "Good morning world",
    "Up and at them",
    "The early bird gets the worm",
    "My feet are on the floor",
];

fn default_phrases() -> Vec<String> {
    DEFAULT_PHRASES.iter().map(|p| p.to_string()).collect()
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            addition: default_addition(),
            subtraction_minuend: default_minuend(),
            subtraction_subtrahend: default_subtrahend(),
            multiplication: default_multiplication(),
            phrases: default_phrases(),
            max_answer_digits: default_max_answer_digits(),
        }
    }
}

/// Decimal digits needed to write `n`.
fn digit_count(mut n: u64) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

impl ChallengeConfig {
    /// Largest answer any math problem drawn from these ranges can have.
    pub fn largest_math_answer(&self) -> u64 {
        let sum = u64::from(self.addition.max) * 2;
        let difference = u64::from(self.subtraction_minuend.max);
        let product = u64::from(self.multiplication.max) * u64::from(self.multiplication.max);
        sum.max(difference).max(product)
    }

    /// # Errors
    /// Rejects inverted ranges, an empty phrase list, and a keypad digit cap
    /// too short to enter the largest possible answer.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let ranges = [
            ("challenge.addition", self.addition),
            ("challenge.subtraction_minuend", self.subtraction_minuend),
            ("challenge.subtraction_subtrahend", self.subtraction_subtrahend),
            ("challenge.multiplication", self.multiplication),
        ];
        for (field, range) in ranges {
            if range.min > range.max {
                return Err(ValidationError::InvalidValue {
                    field: field.into(),
                    message: format!("min {} exceeds max {}", range.min, range.max),
                });
            }
        }
        if self.phrases.iter().all(|p| p.trim().is_empty()) {
            return Err(ValidationError::EmptyCollection("challenge.phrases".into()));
        }
        let largest = self.largest_math_answer();
        let needed = digit_count(largest);
        if self.max_answer_digits < needed {
            return Err(ValidationError::InvalidValue {
                field: "challenge.max_answer_digits".into(),
                message: format!(
                    "{} digit(s) cannot hold the largest answer {largest} ({needed} digits)",
                    self.max_answer_digits
                ),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
}

impl Operator {
    pub const ALL: [Operator; 3] = [Operator::Add, Operator::Subtract, Operator::Multiply];

    pub fn symbol(self) -> char {
        match self {
            Operator::Add => '+',
            Operator::Subtract => '-',
            Operator::Multiply => '×',
        }
    }
}

/// One arithmetic problem. `answer` is always non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MathProblem {
    pub lhs: u32,
    pub op: Operator,
    pub rhs: u32,
    pub answer: u64,
}

impl MathProblem {
    /// Build a problem, computing the answer from the displayed parts.
    ///
    /// Returns `None` when a subtraction would go negative.
    pub fn new(lhs: u32, op: Operator, rhs: u32) -> Option<Self> {
        let (l, r) = (u64::from(lhs), u64::from(rhs));
        let answer = match op {
            Operator::Add => l + r,
            Operator::Subtract => l.checked_sub(r)?,
            Operator::Multiply => l * r,
        };
        Some(Self { lhs, op, rhs, answer })
    }
}

impl fmt::Display for MathProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} = ?", self.lhs, self.op.symbol(), self.rhs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChallengeKind {
    Math(MathProblem),
    Typing { phrase: String },
}

/// A generated challenge. Not `Clone`: it is judged exactly once.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct Challenge {
    id: u64,
    kind: ChallengeKind,
}

impl Challenge {
    /// Sequence number unique within the issuing engine.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> &ChallengeKind {
        &self.kind
    }

    pub fn challenge_type(&self) -> ChallengeType {
        match self.kind {
            ChallengeKind::Math(_) => ChallengeType::Math,
            ChallengeKind::Typing { .. } => ChallengeType::Typing,
        }
    }

    /// Text shown to the user.
    pub fn prompt(&self) -> String {
        match &self.kind {
            ChallengeKind::Math(problem) => problem.to_string(),
            ChallengeKind::Typing { phrase } => phrase.clone(),
        }
    }

    fn same_content(&self, other: &ChallengeKind) -> bool {
        &self.kind == other
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Correct,
    Incorrect,
}

/// Result of [`ChallengeEngine::judge`].
#[derive(Debug, PartialEq, Eq)]
pub enum Judgement {
    Correct,
    Incorrect { next: Challenge },
}

/// Generates and judges challenges.
#[derive(Debug, Clone)]
pub struct ChallengeEngine {
    config: ChallengeConfig,
    rng: Mcg128Xsl64,
    next_id: u64,
}

impl ChallengeEngine {
    /// Create an engine seeded from OS entropy.
    pub fn new(config: ChallengeConfig) -> Self {
        Self {
            config,
            rng: Mcg128Xsl64::from_entropy(),
            next_id: 1,
        }
    }

    /// Create a deterministic engine (tests, practice mode).
    pub fn seeded(config: ChallengeConfig, seed: u64) -> Self {
        Self {
            config,
            rng: Mcg128Xsl64::seed_from_u64(seed),
            next_id: 1,
        }
    }

    pub fn config(&self) -> &ChallengeConfig {
        &self.config
    }

    pub fn generate(&mut self, challenge_type: ChallengeType) -> Challenge {
        let kind = match challenge_type {
            ChallengeType::Math => ChallengeKind::Math(self.math_problem()),
            ChallengeType::Typing => ChallengeKind::Typing {
                phrase: self.phrase(None),
            },
        };
        self.issue(kind)
    }

    /// Issue a challenge for a known problem.
    pub fn issue_math(&mut self, problem: MathProblem) -> Challenge {
        self.issue(ChallengeKind::Math(problem))
    }

    /// Generate the replacement for a challenge that was answered wrongly.
    ///
    /// Typing challenges always get a different phrase when more than one is
    /// configured; math problems are re-drawn a bounded number of times to
    /// avoid repeating the same problem.
    pub fn regenerate(&mut self, prior: &Challenge) -> Challenge {
        let kind = match &prior.kind {
            ChallengeKind::Typing { phrase } => ChallengeKind::Typing {
                phrase: self.phrase(Some(phrase)),
            },
            ChallengeKind::Math(_) => {
                let mut problem = self.math_problem();
                for _ in 0..16 {
                    if !prior.same_content(&ChallengeKind::Math(problem)) {
                        break;
                    }
                    problem = self.math_problem();
                }
                ChallengeKind::Math(problem)
            }
        };
        self.issue(kind)
    }

    /// Judge `input` against `challenge`, consuming it.
    ///
    /// Math answers are parsed after trimming; typing answers are compared
    /// case-insensitively after trimming surrounding whitespace.
    pub fn verify(&self, challenge: Challenge, input: &str) -> Verdict {
        self.check(&challenge, input)
    }

    /// Judge `input`, consuming the challenge; a wrong answer comes back with
    /// its replacement already generated.
    pub fn judge(&mut self, challenge: Challenge, input: &str) -> Judgement {
        match self.check(&challenge, input) {
            Verdict::Correct => Judgement::Correct,
            Verdict::Incorrect => Judgement::Incorrect {
                next: self.regenerate(&challenge),
            },
        }
    }

    fn check(&self, challenge: &Challenge, input: &str) -> Verdict {
        let correct = match &challenge.kind {
            ChallengeKind::Math(problem) => input
                .trim()
                .parse::<u64>()
                .map(|answer| answer == problem.answer)
                .unwrap_or(false),
            ChallengeKind::Typing { phrase } => {
                input.trim().to_lowercase() == phrase.trim().to_lowercase()
            }
        };
        if correct {
            Verdict::Correct
        } else {
            Verdict::Incorrect
        }
    }

    fn issue(&mut self, kind: ChallengeKind) -> Challenge {
        let id = self.next_id;
        self.next_id += 1;
        Challenge { id, kind }
    }

    fn math_problem(&mut self) -> MathProblem {
        let op = *Operator::ALL.choose(&mut self.rng).unwrap_or(&Operator::Add);
        let (lhs, rhs) = match op {
            Operator::Add => (
                self.config.addition.sample(&mut self.rng),
                self.config.addition.sample(&mut self.rng),
            ),
            Operator::Subtract => {
                let lhs = self.config.subtraction_minuend.sample(&mut self.rng);
                let sub = self.config.subtraction_subtrahend;
                // Clamp so the result can never go negative, whatever the config says.
                let capped = OperandRange::new(sub.min.min(lhs), sub.max.min(lhs));
                (lhs, capped.sample(&mut self.rng))
            }
            Operator::Multiply => (
                self.config.multiplication.sample(&mut self.rng),
                self.config.multiplication.sample(&mut self.rng),
            ),
        };
        MathProblem::new(lhs, op, rhs).unwrap_or(MathProblem {
            lhs,
            op: Operator::Add,
            rhs,
            answer: u64::from(lhs) + u64::from(rhs),
        })
    }

    fn phrase(&mut self, avoid: Option<&str>) -> String {
        let candidates: Vec<&String> = self
            .config
            .phrases
            .iter()
            .filter(|p| !p.trim().is_empty())
            .filter(|p| avoid.map_or(true, |a| p.as_str() != a))
            .collect();
        match candidates.choose(&mut self.rng) {
            Some(phrase) => (*phrase).clone(),
            // Only one usable phrase configured (or none): fall back.
            None => avoid
                .map(str::to_string)
                .unwrap_or_else(|| DEFAULT_PHRASES[0].to_string()),
        }
    }
}

impl Default for ChallengeEngine {
    fn default() -> Self {
        Self::new(ChallengeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ChallengeEngine {
        ChallengeEngine::seeded(ChallengeConfig::default(), 7)
    }

    fn math(challenge: &Challenge) -> MathProblem {
        match challenge.kind() {
            ChallengeKind::Math(problem) => *problem,
            other => panic!("expected math, got {other:?}"),
        }
    }

    #[test]
    fn correct_math_answer_is_accepted() {
        let mut engine = engine();
        for _ in 0..200 {
            let challenge = engine.generate(ChallengeType::Math);
            let answer = math(&challenge).answer.to_string();
            assert_eq!(engine.verify(challenge, &answer), Verdict::Correct);
        }
    }

    #[test]
    fn answer_matches_displayed_operands() {
        let mut engine = engine();
        for _ in 0..500 {
            let p = math(&engine.generate(ChallengeType::Math));
            let (l, r) = (u64::from(p.lhs), u64::from(p.rhs));
            let expected = match p.op {
                Operator::Add => l + r,
                Operator::Subtract => l - r,
                Operator::Multiply => l * r,
            };
            assert_eq!(p.answer, expected);
        }
    }

    #[test]
    fn thousand_subtractions_are_never_negative() {
        let mut engine = engine();
        let mut seen = 0;
        while seen < 1_000 {
            let p = math(&engine.generate(ChallengeType::Math));
            if p.op == Operator::Subtract {
                assert!(p.rhs <= p.lhs, "{p}");
                seen += 1;
            }
        }
    }

    #[test]
    fn subtraction_stays_non_negative_with_hostile_config() {
        let config = ChallengeConfig {
            subtraction_minuend: OperandRange::new(1, 5),
            subtraction_subtrahend: OperandRange::new(10, 90),
            ..ChallengeConfig::default()
        };
        let mut engine = ChallengeEngine::seeded(config, 3);
        for _ in 0..300 {
            let p = math(&engine.generate(ChallengeType::Math));
            if p.op == Operator::Subtract {
                assert!(p.rhs <= p.lhs);
            }
        }
    }

    #[test]
    fn operands_follow_operator_ranges() {
        let mut engine = engine();
        for _ in 0..500 {
            let p = math(&engine.generate(ChallengeType::Math));
            match p.op {
                Operator::Add => {
                    assert!((10..=99).contains(&p.lhs) && (10..=99).contains(&p.rhs))
                }
                Operator::Subtract => {
                    assert!((50..=99).contains(&p.lhs) && (1..=49).contains(&p.rhs))
                }
                Operator::Multiply => {
                    assert!((3..=12).contains(&p.lhs) && (3..=12).contains(&p.rhs))
                }
            }
        }
    }

    #[test]
    fn typing_is_trimmed_and_case_insensitive() {
        let engine = engine();
        let challenge = Challenge {
            id: 1,
            kind: ChallengeKind::Typing {
                phrase: "I am awake".into(),
            },
        };
        assert_eq!(engine.verify(challenge, " I Am Awake "), Verdict::Correct);

        let challenge = Challenge {
            id: 2,
            kind: ChallengeKind::Typing {
                phrase: "I am awake".into(),
            },
        };
        assert_eq!(engine.verify(challenge, "I am awake!"), Verdict::Incorrect);
    }

    #[test]
    fn garbage_math_input_is_incorrect() {
        let mut engine = engine();
        let challenge = engine.generate(ChallengeType::Math);
        assert_eq!(engine.verify(challenge, "seven"), Verdict::Incorrect);
        let challenge = engine.generate(ChallengeType::Math);
        assert_eq!(engine.verify(challenge, "-3"), Verdict::Incorrect);
    }

    #[test]
    fn regenerated_challenge_is_a_new_object() {
        let mut engine = engine();
        let first = engine.generate(ChallengeType::Math);
        let second = engine.regenerate(&first);
        assert_ne!(first.id(), second.id());
        assert_eq!(second.challenge_type(), ChallengeType::Math);
    }

    #[test]
    fn judge_returns_replacement_on_wrong_answer() {
        let mut engine = engine();
        let challenge = engine.generate(ChallengeType::Math);
        let first_id = challenge.id();
        let wrong = (math(&challenge).answer + 1).to_string();
        match engine.judge(challenge, &wrong) {
            Judgement::Incorrect { next } => assert_ne!(next.id(), first_id),
            Judgement::Correct => panic!("wrong answer accepted"),
        }
    }

    #[test]
    fn regenerated_typing_changes_phrase() {
        let mut engine = engine();
        let mut current = engine.generate(ChallengeType::Typing);
        for _ in 0..50 {
            let next = engine.regenerate(&current);
            assert_ne!(next.prompt(), current.prompt());
            current = next;
        }
    }

    #[test]
    fn single_phrase_config_still_regenerates() {
        let config = ChallengeConfig {
            phrases: vec!["Only one".into()],
            ..ChallengeConfig::default()
        };
        let mut engine = ChallengeEngine::seeded(config, 1);
        let first = engine.generate(ChallengeType::Typing);
        let next = engine.regenerate(&first);
        assert_eq!(next.prompt(), "Only one");
        assert_ne!(next.id(), first.id());
    }

    #[test]
    fn seeded_engines_are_reproducible() {
        let mut a = ChallengeEngine::seeded(ChallengeConfig::default(), 42);
        let mut b = ChallengeEngine::seeded(ChallengeConfig::default(), 42);
        for _ in 0..20 {
            assert_eq!(
                a.generate(ChallengeType::Math).prompt(),
                b.generate(ChallengeType::Math).prompt()
            );
        }
    }

    #[test]
    fn prompt_formats_problem() {
        let p = MathProblem::new(3, Operator::Add, 4).unwrap();
        assert_eq!(p.to_string(), "3 + 4 = ?");
        assert_eq!(p.answer, 7);
        assert!(MathProblem::new(3, Operator::Subtract, 4).is_none());
    }

    #[test]
    fn config_validation() {
        assert!(ChallengeConfig::default().validate().is_ok());
        let inverted = ChallengeConfig {
            multiplication: OperandRange::new(9, 2),
            ..ChallengeConfig::default()
        };
        assert!(inverted.validate().is_err());
        let no_phrases = ChallengeConfig {
            phrases: vec![" ".into()],
            ..ChallengeConfig::default()
        };
        assert!(no_phrases.validate().is_err());
    }

    #[test]
    fn digit_cap_must_fit_largest_answer() {
        let defaults = ChallengeConfig::default();
        // 99 + 99 and 12 x 12 are the widest default answers.
        assert_eq!(defaults.largest_math_answer(), 198);

        for digits in [0, 2] {
            let short = ChallengeConfig {
                max_answer_digits: digits,
                ..ChallengeConfig::default()
            };
            assert!(short.validate().is_err(), "{digits} digits accepted");
        }
        let exact = ChallengeConfig {
            max_answer_digits: 3,
            ..ChallengeConfig::default()
        };
        assert!(exact.validate().is_ok());

        let wide_products = ChallengeConfig {
            multiplication: OperandRange::new(3, 400),
            ..exact
        };
        assert_eq!(wide_products.largest_math_answer(), 160_000);
        assert!(wide_products.validate().is_err());
    }
}
